use std::cell::RefCell;
use std::rc::Rc;

use gloo_events::{EventListener, EventListenerOptions};
use gloo_net::http::Request;
use gloo_timers::callback::Timeout;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::spawn_local;
use web_sys::{Document, DomParser, Element, MouseEvent, SupportedType};

use crate::prefetch::{HOVER_DELAY_MS, PrefetchCache};

/// Wires hover-intent prefetching onto the document.
///
/// Hovering an internal link for 100ms fetches it with an `X-Prefetch: 1`
/// marker; clicking a link with fresh cached markup swaps the page in place
/// instead of navigating. Dropping the controller detaches all listeners.
pub struct PrefetchController {
    cache: Rc<RefCell<PrefetchCache>>,
    _listeners: Vec<EventListener>,
}

impl PrefetchController {
    pub fn attach() -> Option<Self> {
        let document = web_sys::window()?.document()?;
        let cache = Rc::new(RefCell::new(PrefetchCache::new()));
        let hover_timer: Rc<RefCell<Option<Timeout>>> = Rc::new(RefCell::new(None));

        let mouseover = {
            let cache = cache.clone();
            let hover_timer = hover_timer.clone();
            EventListener::new(&document, "mouseover", move |event| {
                let Some(url) = internal_link_target(event) else {
                    return;
                };
                let cache = cache.clone();
                let timer = Timeout::new(HOVER_DELAY_MS, move || start_fetch(cache, url));
                if let Some(previous) = hover_timer.borrow_mut().replace(timer) {
                    previous.cancel();
                }
            })
        };

        let mouseout = {
            let hover_timer = hover_timer.clone();
            EventListener::new(&document, "mouseout", move |_| {
                if let Some(timer) = hover_timer.borrow_mut().take() {
                    timer.cancel();
                }
            })
        };

        let click = {
            let cache = cache.clone();
            let document = document.clone();
            EventListener::new_with_options(
                &document.clone(),
                "click",
                EventListenerOptions::enable_prevent_default(),
                move |event| {
                    let Some(url) = internal_link_target(event) else {
                        return;
                    };
                    let cached = cache.borrow_mut().lookup(&url, js_sys::Date::now());
                    if let Some(html) = cached {
                        if let Some(mouse) = event.dyn_ref::<MouseEvent>() {
                            mouse.prevent_default();
                        }
                        swap_document(&document, &html, &url);
                    }
                },
            )
        };

        Some(Self {
            cache,
            _listeners: vec![mouseover, mouseout, click],
        })
    }

    pub fn clear(&self) {
        self.cache.borrow_mut().clear();
    }
}

/// Resolves an event to the href of an enclosing same-site anchor.
fn internal_link_target(event: &web_sys::Event) -> Option<String> {
    let target = event.target()?;
    let element = target.dyn_ref::<Element>()?;
    let anchor = element.closest("a[href]").ok().flatten()?;
    let href = anchor.get_attribute("href")?;
    if href.starts_with('/') && !href.starts_with("//") {
        Some(href)
    } else {
        None
    }
}

fn start_fetch(cache: Rc<RefCell<PrefetchCache>>, url: String) {
    if !cache.borrow_mut().begin(&url, js_sys::Date::now()) {
        return;
    }
    spawn_local(async move {
        let result = Request::get(&url).header("X-Prefetch", "1").send().await;
        match result {
            Ok(response) if response.ok() => match response.text().await {
                Ok(html) => cache.borrow_mut().finish(url, html, js_sys::Date::now()),
                Err(e) => {
                    log::debug!("Prefetch body read failed for {url}: {e}");
                    cache.borrow_mut().fail(&url);
                }
            },
            _ => {
                log::debug!("Prefetch failed for {url}");
                cache.borrow_mut().fail(&url);
            }
        }
    });
}

/// Replaces the title and main region with the prefetched markup and records
/// the new URL without a full navigation.
fn swap_document(document: &Document, html: &str, url: &str) {
    let Ok(parser) = DomParser::new() else {
        return;
    };
    let Ok(parsed) = parser.parse_from_string(html, SupportedType::TextHtml) else {
        return;
    };
    document.set_title(&parsed.title());
    if let (Ok(Some(current)), Ok(Some(next))) = (
        document.query_selector("main"),
        parsed.query_selector("main"),
    ) {
        current.set_inner_html(&next.inner_html());
    }
    if let Some(window) = web_sys::window() {
        if let Ok(history) = window.history() {
            let _ = history.replace_state_with_url(&JsValue::NULL, "", Some(url));
        }
    }
}
