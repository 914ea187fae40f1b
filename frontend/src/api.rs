use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use gloo_file::File;
use gloo_net::http::Request;
use gloo_timers::callback::Timeout;
use gloo_timers::future::TimeoutFuture;
use shared::{AnalyticsReport, ProcessResponse, Task};
use wasm_bindgen_futures::spawn_local;
use web_sys::{AbortController, FormData};

use crate::upload::{RetryPolicy, should_retry};

pub const REQUEST_TIMEOUT_MS: u32 = 30_000;

#[derive(Clone, Debug)]
pub enum ApiError {
    Timeout,
    Network(String),
    Server(u16),
    Parse(String),
}

impl ApiError {
    fn transient(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout | ApiError::Network(_) | ApiError::Server(_)
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Timeout => write!(f, "Request timed out after 30s"),
            ApiError::Network(msg) => write!(f, "Network error: {msg}"),
            ApiError::Server(status) => write!(f, "Server error ({status})"),
            ApiError::Parse(msg) => write!(f, "Failed to parse response: {msg}"),
        }
    }
}

/// One POST to /api/process, aborted client-side when the deadline passes.
async fn process_once(file: &File, task: Task) -> Result<ProcessResponse, ApiError> {
    let controller =
        AbortController::new().map_err(|_| ApiError::Network("AbortController".into()))?;
    let signal = controller.signal();

    let timed_out = Rc::new(Cell::new(false));
    let deadline = Timeout::new(REQUEST_TIMEOUT_MS, {
        let timed_out = timed_out.clone();
        move || {
            timed_out.set(true);
            controller.abort();
        }
    });

    let form = FormData::new().map_err(|_| ApiError::Network("FormData".into()))?;
    form.append_with_blob("image", file.as_ref())
        .map_err(|_| ApiError::Network("FormData".into()))?;
    form.append_with_str("model_type", &task.to_string())
        .map_err(|_| ApiError::Network("FormData".into()))?;

    let sent = Request::post("/api/process")
        .abort_signal(Some(&signal))
        .body(form)
        .map_err(|e| ApiError::Network(e.to_string()))?
        .send()
        .await;
    deadline.cancel();

    let response = sent.map_err(|e| {
        if timed_out.get() {
            ApiError::Timeout
        } else {
            ApiError::Network(e.to_string())
        }
    })?;

    let status = response.status();
    if status >= 500 {
        return Err(ApiError::Server(status));
    }
    response
        .json::<ProcessResponse>()
        .await
        .map_err(|e| ApiError::Parse(e.to_string()))
}

/// Runs `process_once` under the retry policy. Transient failures back off
/// and go again, reporting the upcoming attempt through `on_retry`; terminal
/// failures surface immediately.
pub async fn process_with_retry<F>(
    file: File,
    task: Task,
    policy: RetryPolicy,
    mut on_retry: F,
) -> Result<ProcessResponse, ApiError>
where
    F: FnMut(u32),
{
    let mut attempt = 1;
    loop {
        match process_once(&file, task).await {
            Ok(envelope) => return Ok(envelope),
            Err(e) => {
                if !should_retry(attempt, &policy, e.transient()) {
                    return Err(e);
                }
                log::warn!("Attempt {attempt} for {task} failed ({e}), retrying");
                on_retry(attempt + 1);
                TimeoutFuture::new(policy.backoff_ms(attempt)).await;
                attempt += 1;
            }
        }
    }
}

/// Fire-and-forget client-side analytics report. Delivery failures are
/// logged and otherwise ignored.
pub fn send_analytics(report: AnalyticsReport) {
    spawn_local(async move {
        let request = match Request::post("/api/analytics").json(&report) {
            Ok(request) => request,
            Err(e) => {
                log::debug!("Analytics report not serializable: {e}");
                return;
            }
        };
        if let Err(e) = request.send().await {
            log::debug!("Analytics delivery failed: {e}");
        }
    });
}
