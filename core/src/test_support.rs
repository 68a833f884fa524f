//! Scripted provider doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use deckgen_providers::{
    ChatModel, ChatRequest, ImageModel, ImageRequest, ImageResponse, ProviderError,
};

pub(crate) const STYLE_REPORT: &str =
    r##"{"palette": ["#10243e", "#f4f4f4"], "typography": "geometric sans", "layout": "left rail"}"##;

#[derive(Debug, Clone)]
pub(crate) enum ChatScript {
    Ok(String),
    Degraded,
    Transient,
    Fatal,
}

pub(crate) struct MockChat {
    script: Mutex<VecDeque<ChatScript>>,
    calls: AtomicUsize,
}

impl MockChat {
    pub(crate) fn new(script: Vec<ChatScript>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for MockChat {
    async fn complete(&self, _request: ChatRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(ChatScript::Ok(body)) => Ok(body),
            Some(ChatScript::Degraded) => {
                Err(ProviderError::InvalidResponse("mock degraded response".into()))
            }
            Some(ChatScript::Transient) => Err(ProviderError::RateLimited {
                retry_after_secs: None,
            }),
            Some(ChatScript::Fatal) => Err(ProviderError::Auth {
                message: "mock fatal".into(),
            }),
            None => Err(ProviderError::Auth {
                message: "mock chat script exhausted".into(),
            }),
        }
    }

    fn model_id(&self) -> &str {
        "mock-chat"
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ImageScript {
    Ok,
    Transient,
    Fatal,
    Malformed,
}

/// Image double with per-slide scripts. Unscripted calls succeed with
/// deterministic bytes; the first slide always carries a style report.
pub(crate) struct MockImage {
    scripts: Mutex<HashMap<usize, VecDeque<ImageScript>>>,
    calls: AtomicUsize,
    per_index: Mutex<HashMap<usize, usize>>,
}

impl MockImage {
    pub(crate) fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            per_index: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn set_script(&self, index: usize, script: Vec<ImageScript>) {
        self.scripts.lock().unwrap().insert(index, script.into());
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn calls_for(&self, index: usize) -> usize {
        *self.per_index.lock().unwrap().get(&index).unwrap_or(&0)
    }
}

#[async_trait]
impl ImageModel for MockImage {
    async fn render(&self, request: ImageRequest) -> Result<ImageResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .per_index
            .lock()
            .unwrap()
            .entry(request.page_index)
            .or_insert(0) += 1;
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.page_index)
            .and_then(|q| q.pop_front())
            .unwrap_or(ImageScript::Ok);
        match script {
            ImageScript::Ok => Ok(ImageResponse {
                data: format!("image-bytes-{}", request.page_index).into_bytes(),
                media_type: "image/png".into(),
                model_id: "mock-image".into(),
                style_text: if request.page_index == 0 {
                    Some(STYLE_REPORT.to_string())
                } else {
                    None
                },
            }),
            ImageScript::Transient => Err(ProviderError::RateLimited {
                retry_after_secs: None,
            }),
            ImageScript::Fatal => Err(ProviderError::Auth {
                message: "mock image auth failure".into(),
            }),
            ImageScript::Malformed => Err(ProviderError::InvalidResponse(
                "mock response without image data".into(),
            )),
        }
    }

    fn model_id(&self) -> &str {
        "mock-image"
    }
}
