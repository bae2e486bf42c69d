#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use parking_lot::Mutex;
use serde_json::Value;

use studyhub_engine::config::EngineConfig;
use studyhub_engine::db::Store;
use studyhub_engine::services::oracle::{BackendError, OracleBackend, OracleChain, OracleRequest};
use studyhub_engine::services::progress;
use studyhub_engine::state::AppState;
use studyhub_engine::types::{ContentChunk, Document, Topic};

pub const SUBJECT: &str = "analisi-1";

/// Backend that replays canned replies in order and counts calls.
pub struct ScriptedOracle {
    name: String,
    replies: Mutex<VecDeque<Result<Value, String>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            replies: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            replies: Mutex::new(VecDeque::new()),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn reply(&self, value: Value) -> &Self {
        self.replies.lock().push_back(Ok(value));
        self
    }

    pub fn fail(&self, message: &str) -> &Self {
        self.replies.lock().push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().last().cloned()
    }
}

#[async_trait]
impl OracleBackend for ScriptedOracle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &OracleRequest) -> Result<Value, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().pop_front();
        match next {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(BackendError::Other(message)),
            None => Err(BackendError::Other(format!("{}: no scripted reply left", self.name))),
        }
    }
}

pub fn chain(backends: &[Arc<ScriptedOracle>]) -> OracleChain {
    OracleChain::new(
        backends
            .iter()
            .map(|b| Arc::clone(b) as Arc<dyn OracleBackend>)
            .collect(),
    )
}

pub async fn store() -> Store {
    Store::in_memory().await.expect("in-memory store")
}

pub fn document(id: &str, total_pages: u32) -> Document {
    Document {
        id: id.to_string(),
        subject_name: SUBJECT.to_string(),
        title: format!("Document {id}"),
        total_pages,
        studied_pages: String::new(),
        content_chunks: (1..=total_pages)
            .map(|page| ContentChunk {
                page_number: page,
                text: format!("text of page {page}"),
                is_studied: false,
            })
            .collect(),
        comprehension_score: None,
        studied_pages_updated_at: None,
        created_at: 0,
    }
}

pub fn topic(id: &str, document_id: &str, pages: &[u32]) -> Topic {
    Topic {
        id: id.to_string(),
        subject_name: SUBJECT.to_string(),
        title: format!("Topic {id}"),
        source_document_id: document_id.to_string(),
        source_page_numbers: pages.iter().copied().collect(),
        affrontato: false,
        exercise_stats: Default::default(),
        simulation_stats: Default::default(),
        mastery_score: None,
        last_practiced: None,
        last_studied: None,
    }
}

/// One 10-page document `d1` with topics `t1` (3-4), `t2` (5) and `t3` (8-10).
pub async fn seed(store: &Store) {
    progress::upsert_document(store, SUBJECT, document("d1", 10))
        .await
        .expect("seed document");
    progress::upsert_topics(
        store,
        SUBJECT,
        vec![
            topic("t1", "d1", &[3, 4]),
            topic("t2", "d1", &[5]),
            topic("t3", "d1", &[8, 9, 10]),
        ],
    )
    .await
    .expect("seed topics");
}

pub async fn get_topic(store: &Store, id: &str) -> Topic {
    progress::list_topics(store, SUBJECT)
        .await
        .expect("list topics")
        .into_iter()
        .find(|t| t.id == id)
        .expect("topic exists")
}

pub fn test_app(store: Store, oracle: OracleChain) -> Router {
    studyhub_engine::create_app(AppState::new(store, oracle, EngineConfig::default()))
}
