use std::str::FromStr;

use gloo_file::{File as GlooFile, ObjectUrl};
use shared::{AnalyticsReport, Predictions, ProcessResponse, Task, TimingBlock};
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;
use web_sys::{DragEvent, FileList, HtmlCanvasElement, HtmlImageElement, HtmlInputElement,
              HtmlSelectElement};
use yew::prelude::*;

mod api;
mod nav;
mod overlay;
mod prefetch;
mod upload;

use nav::PrefetchController;
use upload::{RetryPolicy, UploadPhase};

// Models
struct FileData {
    file: GlooFile,
    preview_url: ObjectUrl,
}

// Yew msg components
enum Msg {
    // File operations
    FileChosen(GlooFile),
    HandleDrop(DragEvent),
    SetDragging(bool),

    // Inference operations
    TaskChanged(Task),
    Submit,
    Retrying(u32),
    Completed(ProcessResponse),
    Failed(String),

    // UI states
    SetError(Option<String>),
    ImageLoaded,
}

// Main component
struct Model {
    file: Option<FileData>,
    task: Task,
    phase: UploadPhase,
    result: Option<ProcessResponse>,
    error: Option<String>,
    is_dragging: bool,
    canvas_ref: NodeRef,
    image_ref: NodeRef,
    _nav: Option<PrefetchController>,
}

// Yew component implementation
impl Component for Model {
    type Message = Msg;
    type Properties = ();

    fn create(_ctx: &Context<Self>) -> Self {
        Self {
            file: None,
            task: Task::Detect,
            phase: UploadPhase::Idle,
            result: None,
            error: None,
            is_dragging: false,
            canvas_ref: NodeRef::default(),
            image_ref: NodeRef::default(),
            _nav: PrefetchController::attach(),
        }
    }

    fn update(&mut self, ctx: &Context<Self>, msg: Self::Message) -> bool {
        match msg {
            // File operations
            Msg::FileChosen(file) => self.handle_file_chosen(file),
            Msg::HandleDrop(event) => self.handle_drop(ctx, event),
            Msg::SetDragging(is_dragging) => {
                self.is_dragging = is_dragging;
                true
            }

            // Inference operations
            Msg::TaskChanged(task) => self.handle_task_changed(task),
            Msg::Submit => self.handle_submit(ctx),
            Msg::Retrying(attempt) => {
                self.phase = UploadPhase::Retrying { attempt };
                true
            }
            Msg::Completed(envelope) => self.handle_completed(envelope),
            Msg::Failed(message) => self.handle_failed(message),

            // UI states
            Msg::SetError(error) => {
                self.error = error;
                true
            }
            Msg::ImageLoaded => true,
        }
    }

    fn rendered(&mut self, _ctx: &Context<Self>, _first_render: bool) {
        self.draw_overlay();
    }

    fn view(&self, ctx: &Context<Self>) -> Html {
        html! {
            <div class="container">
                { self.render_header() }

                <main class="main-content">
                    { self.render_controls(ctx) }
                    { self.render_upload_area(ctx) }
                    { self.render_preview(ctx) }
                    { self.render_error_message(ctx) }
                    { self.render_results() }
                </main>

                <footer class="app-footer">
                    <p>{"Vision Inference Demo | Fullstack Rust WASM"}</p>
                </footer>
            </div>
        }
    }
}

// Handler methods
impl Model {
    fn handle_file_chosen(&mut self, file: GlooFile) -> bool {
        let preview_url = ObjectUrl::from(file.clone());
        self.file = Some(FileData { file, preview_url });
        self.result = None;
        self.error = None;
        self.phase = UploadPhase::Idle;
        true
    }

    fn handle_drop(&mut self, ctx: &Context<Self>, event: DragEvent) -> bool {
        event.prevent_default();
        self.is_dragging = false;

        if let Some(file) = event
            .data_transfer()
            .and_then(|dt| dt.files())
            .and_then(|list| Self::extract_image_files(&list).into_iter().next())
        {
            ctx.link().send_message(Msg::FileChosen(file));
        }
        true
    }

    fn handle_task_changed(&mut self, task: Task) -> bool {
        self.task = task;
        self.result = None;
        true
    }

    fn handle_submit(&mut self, ctx: &Context<Self>) -> bool {
        if !self.phase.can_submit() {
            return false;
        }
        let Some(file_data) = &self.file else {
            self.error = Some("No image selected.".into());
            return true;
        };

        let file = file_data.file.clone();
        if let Err(e) = upload::validate(&file.raw_mime_type(), file.size()) {
            self.phase = UploadPhase::Failed;
            self.error = Some(e.to_string());
            return true;
        }

        self.error = None;
        self.result = None;
        self.phase = UploadPhase::Uploading { attempt: 1 };

        let task = self.task;
        let link = ctx.link().clone();
        spawn_local(async move {
            let retry_link = link.clone();
            let outcome =
                api::process_with_retry(file, task, RetryPolicy::default(), move |attempt| {
                    retry_link.send_message(Msg::Retrying(attempt));
                })
                .await;
            match outcome {
                Ok(envelope) => link.send_message(Msg::Completed(envelope)),
                Err(e) => link.send_message(Msg::Failed(e.to_string())),
            }
        });
        true
    }

    fn handle_completed(&mut self, envelope: ProcessResponse) -> bool {
        api::send_analytics(AnalyticsReport {
            task: envelope.task.unwrap_or(self.task),
            timing: envelope.timing.unwrap_or_default(),
            success: envelope.success,
        });

        if envelope.success {
            self.phase = UploadPhase::Succeeded;
            self.error = None;
            self.result = Some(envelope);
        } else {
            self.phase = UploadPhase::Failed;
            self.error = Some(
                envelope
                    .error
                    .unwrap_or_else(|| "Processing failed".to_string()),
            );
        }
        true
    }

    fn handle_failed(&mut self, message: String) -> bool {
        api::send_analytics(AnalyticsReport {
            task: self.task,
            timing: TimingBlock::default(),
            success: false,
        });
        self.phase = UploadPhase::Failed;
        self.error = Some(message);
        true
    }

    // Helper methods
    fn extract_image_files(file_list: &FileList) -> Vec<GlooFile> {
        (0..file_list.length())
            .filter_map(|i| file_list.item(i))
            .filter(|file| file.type_().starts_with("image/"))
            .map(GlooFile::from)
            .collect()
    }

    fn draw_overlay(&self) {
        let Some(result) = &self.result else { return };
        let Some(predictions) = &result.predictions else {
            return;
        };
        let (Some(canvas), Some(image)) = (
            self.canvas_ref.cast::<HtmlCanvasElement>(),
            self.image_ref.cast::<HtmlImageElement>(),
        ) else {
            return;
        };
        if !image.complete() {
            return;
        }
        overlay::draw(&canvas, &image, predictions);
    }
}

// Rendering methods
impl Model {
    fn render_header(&self) -> Html {
        html! {
            <header class="app-header">
                <h1><i class="fa-solid fa-eye"></i> {" Vision Inference Demo"}</h1>
                <p class="subtitle">{"Detect, segment, classify, and estimate pose on your images"}</p>
            </header>
        }
    }

    fn render_controls(&self, ctx: &Context<Self>) -> Html {
        let link = ctx.link();
        let handle_task = link.callback(|e: Event| {
            let select: HtmlSelectElement = e.target_unchecked_into();
            Msg::TaskChanged(Task::from_str(&select.value()).unwrap_or(Task::Detect))
        });

        html! {
            <div class="controls">
                <label for="task-select">{"Task:"}</label>
                <select id="task-select" onchange={handle_task}>
                    { for Task::ALL.iter().map(|task| html! {
                        <option value={task.to_string()} selected={*task == self.task}>
                            { task.to_string() }
                        </option>
                    })}
                </select>
                <button
                    class="analyze-btn"
                    onclick={link.callback(|_| Msg::Submit)}
                    disabled={self.file.is_none() || self.phase.in_flight()}
                >
                    { self.render_submit_button_content() }
                </button>
            </div>
        }
    }

    fn render_submit_button_content(&self) -> Html {
        match self.phase {
            UploadPhase::Uploading { .. } => html! {
                <><i class="fa-solid fa-spinner fa-spin"></i>{" Processing..."}</>
            },
            UploadPhase::Retrying { attempt } => html! {
                <><i class="fa-solid fa-spinner fa-spin"></i>{ format!(" Retrying ({attempt}/3)...") }</>
            },
            _ => html! {
                <><i class="fa-solid fa-magnifying-glass"></i>{ format!(" Run {}", self.task) }</>
            },
        }
    }

    fn render_upload_area(&self, ctx: &Context<Self>) -> Html {
        let link = ctx.link();

        let handle_change = link.callback(|e: Event| {
            let input: HtmlInputElement = e.target_unchecked_into();
            let files = input
                .files()
                .map(|list| Self::extract_image_files(&list))
                .unwrap_or_default();
            input.set_value("");
            match files.into_iter().next() {
                Some(file) => Msg::FileChosen(file),
                None => Msg::SetError(Some("No valid image file selected.".into())),
            }
        });

        let handle_drag_over = link.callback(|e: DragEvent| {
            e.prevent_default();
            Msg::SetDragging(true)
        });
        let handle_drag_leave = link.callback(|e: DragEvent| {
            e.prevent_default();
            Msg::SetDragging(false)
        });
        let handle_drop = link.callback(Msg::HandleDrop);

        let trigger_file_input = Callback::from(|_: MouseEvent| {
            if let Some(input) = web_sys::window()
                .and_then(|w| w.document())
                .and_then(|d| d.get_element_by_id("file-input"))
            {
                if let Ok(html_input) = input.dyn_into::<web_sys::HtmlElement>() {
                    html_input.click();
                }
            }
        });

        html! {
            <>
                <input
                    type="file"
                    id="file-input"
                    accept="image/jpeg,image/png,image/webp"
                    style="display: none;"
                    onchange={handle_change}
                />
                <div
                    id="drop-zone"
                    class={classes!("upload-area", self.is_dragging.then_some("drag-over"))}
                    ondragover={handle_drag_over}
                    ondragleave={handle_drag_leave}
                    ondrop={handle_drop}
                    onclick={trigger_file_input}
                >
                    <div class="upload-placeholder">
                        <i class="fa-solid fa-cloud-arrow-up"></i>
                        <p>{"Drag & drop an image here, or click to select"}</p>
                        <p class="file-types">{"Supported formats: JPEG, PNG, WEBP (max 16MB)"}</p>
                    </div>
                </div>
            </>
        }
    }

    fn render_preview(&self, ctx: &Context<Self>) -> Html {
        let Some(file_data) = &self.file else {
            return html! {};
        };
        let show_canvas = self
            .result
            .as_ref()
            .is_some_and(|r| r.predictions.is_some());

        html! {
            <div class="preview-container">
                <img
                    ref={self.image_ref.clone()}
                    src={file_data.preview_url.to_string()}
                    alt={file_data.file.name()}
                    onload={ctx.link().callback(|_| Msg::ImageLoaded)}
                    style={ if show_canvas { "display: none;" } else { "max-width: 100%; max-height: 480px; object-fit: contain;" } }
                />
                if show_canvas {
                    <canvas
                        ref={self.canvas_ref.clone()}
                        style="max-width: 100%; max-height: 480px;"
                    />
                }
            </div>
        }
    }

    fn render_error_message(&self, ctx: &Context<Self>) -> Html {
        if let Some(error_msg) = &self.error {
            html! {
                <div class="error-message">
                    <i class="fa-solid fa-circle-exclamation"></i>
                    <p>{ error_msg }</p>
                    <button
                        class="dismiss-btn"
                        title="Dismiss"
                        onclick={ctx.link().callback(|_| Msg::SetError(None))}
                    >
                        <i class="fa-solid fa-times"></i>
                    </button>
                </div>
            }
        } else {
            html! {}
        }
    }

    fn render_results(&self) -> Html {
        let Some(result) = &self.result else {
            return html! {};
        };

        html! {
            <div class="results-container">
                { result.timing.map(Self::render_timing).unwrap_or_default() }
                { result.predictions.as_ref().map(Self::render_predictions).unwrap_or_default() }
            </div>
        }
    }

    fn render_timing(timing: TimingBlock) -> Html {
        html! {
            <div class="timing-panel">
                <h3>{"Timing"}</h3>
                <table class="timing-table">
                    <tr><td>{"Decode"}</td><td>{ format!("{:.2} ms", timing.decode_ms) }</td></tr>
                    <tr><td>{"Inference"}</td><td>{ format!("{:.2} ms", timing.inference_ms) }</td></tr>
                    <tr><td>{"Postprocess"}</td><td>{ format!("{:.2} ms", timing.process_ms) }</td></tr>
                    <tr><td>{"Total"}</td><td>{ format!("{:.2} ms", timing.total_ms) }</td></tr>
                    <tr><td>{"Throughput"}</td><td>{ format!("{:.1} fps", timing.fps) }</td></tr>
                </table>
            </div>
        }
    }

    fn render_predictions(predictions: &Predictions) -> Html {
        match predictions {
            Predictions::Detect {
                confidences,
                class_names,
                ..
            }
            | Predictions::Segment {
                confidences,
                class_names,
                ..
            } => Self::render_result_bars("Detections", class_names, confidences),
            Predictions::Classify { top } => {
                let names: Vec<String> = top.iter().map(|c| c.class_name.clone()).collect();
                let confidences: Vec<f32> = top.iter().map(|c| c.confidence).collect();
                Self::render_result_bars("Top classes", &names, &confidences)
            }
            Predictions::Pose { keypoints, .. } => html! {
                <div class="detailed-results">
                    <h3>{"Pose"}</h3>
                    <p>{ format!(
                        "{} person(s), {} keypoints each",
                        keypoints.len(),
                        keypoints.first().map(Vec::len).unwrap_or(0),
                    )}</p>
                </div>
            },
        }
    }

    fn render_result_bars(title: &str, names: &[String], confidences: &[f32]) -> Html {
        if names.is_empty() {
            return html! {
                <div class="detailed-results">
                    <h3>{ title }</h3>
                    <p>{"Nothing found above the confidence threshold."}</p>
                </div>
            };
        }

        html! {
            <div class="detailed-results">
                <h3>{ title }</h3>
                <div class="result-bars">
                    { for names.iter().zip(confidences).map(|(name, &conf)| {
                        let percentage = conf * 100.0;
                        html! {
                            <div class="result-item">
                                <div class="result-label">{ name.clone() }</div>
                                <div class="result-bar-container">
                                    <div class="result-bar" style={format!("width: {percentage}%")}></div>
                                </div>
                                <div class="result-value">{ format!("{percentage:.1}%") }</div>
                            </div>
                        }
                    })}
                </div>
            </div>
        }
    }
}

fn main() {
    wasm_logger::init(wasm_logger::Config::default());
    log::info!("App starting...");
    yew::Renderer::<Model>::new().render();
}
