//! Shared test wiring: a scripted vision backend and pipeline construction
//! against the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use menu_extract::db::memory::MemoryStore;
use menu_extract::services::jobs::JobManager;
use menu_extract::services::metrics::MetricsCollector;
use menu_extract::services::pipeline::ExtractionPipeline;
use menu_extract::services::retry::HttpError;
use menu_extract::services::vision::{
    default_profiles, ImageResolver, VisionBackend, VisionClient, VisionRequest, VisionResponse,
};

/// Vision backend that replays a script of canned replies, in order. Once the
/// script runs dry it keeps repeating the last entry.
pub struct ScriptedBackend {
    replies: Mutex<Vec<Result<VisionResponse, HttpError>>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Result<VisionResponse, HttpError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionBackend for ScriptedBackend {
    async fn complete(&self, _request: &VisionRequest) -> Result<VisionResponse, HttpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.remove(0)
        } else {
            replies
                .first()
                .cloned()
                .unwrap_or_else(|| Err(HttpError::network("empty script")))
        }
    }
}

pub fn ok_reply(content: &str) -> Result<VisionResponse, HttpError> {
    Ok(VisionResponse {
        content: content.to_string(),
        input_tokens: 1000,
        output_tokens: 500,
    })
}

/// Full worker-side stack over the in-memory store, with backoff delays
/// shrunk so ladder tests finish fast.
pub struct TestStack {
    pub store: Arc<MemoryStore>,
    pub manager: Arc<JobManager>,
    pub pipeline: ExtractionPipeline,
}

pub fn build_stack(backend: Arc<dyn VisionBackend>) -> TestStack {
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(JobManager::new(store.clone()));
    let collector = Arc::new(MetricsCollector::new(store.clone()));

    let profiles = default_profiles()
        .into_iter()
        .map(|mut p| {
            p.retry.base_delay = Duration::from_millis(1);
            p.retry.max_delay = Duration::from_millis(2);
            p
        })
        .collect();
    let vision = Arc::new(
        VisionClient::new(backend, ImageResolver::new(None)).with_profiles(profiles),
    );

    let pipeline = ExtractionPipeline::new(manager.clone(), vision, collector);
    TestStack {
        store,
        manager,
        pipeline,
    }
}

/// Valid v1 reply: two categories at confidences 0.95 and 0.92, one item
/// each at the same confidence, so the overall average lands at 0.935.
pub fn valid_v1_menu_json() -> &'static str {
    r#"{
        "categories": [
            {"name": "Starters", "confidence": 0.95, "items": [
                {"name": "Bruschetta", "price": 7.5, "confidence": 0.95}
            ]},
            {"name": "Mains", "confidence": 0.92, "items": [
                {"name": "Risotto", "price": 16.0, "confidence": 0.92}
            ]}
        ],
        "currency": "EUR",
        "uncertain_items": [],
        "superfluous_text": []
    }"#
}
