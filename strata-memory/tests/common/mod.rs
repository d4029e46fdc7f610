//! Shared fixtures for the DST integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;

use strata_memory::lifecycle::prompts::FACT_EXTRACTION_PROMPT;
use strata_memory::llm::{CompletionRequest, LLMProvider, ProviderError, SimLLMProvider};

/// Seeds every DST loop runs over.
pub const DST_SEEDS: std::ops::Range<u64> = 0..16;

fn is_extraction(request: &CompletionRequest) -> bool {
    let heading = FACT_EXTRACTION_PROMPT.lines().next().unwrap_or_default();
    request.prompt.starts_with(heading)
}

/// Answers every extraction call with one candidate per `(certainty, impact)`
/// pair and hands everything else to `SimLLMProvider`.
#[derive(Debug)]
pub struct ScriptedLLMProvider {
    candidates: Vec<(f64, f64)>,
    fallback: SimLLMProvider,
    extraction_calls: AtomicUsize,
}

impl ScriptedLLMProvider {
    pub fn new(seed: u64, candidates: &[(f64, f64)]) -> Arc<Self> {
        Arc::new(Self {
            candidates: candidates.to_vec(),
            fallback: SimLLMProvider::with_seed(seed),
            extraction_calls: AtomicUsize::new(0),
        })
    }

    pub fn extraction_calls(&self) -> usize {
        self.extraction_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for ScriptedLLMProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        if !is_extraction(request) {
            return self.fallback.complete(request).await;
        }
        let call = self.extraction_calls.fetch_add(1, Ordering::SeqCst);

        let facts: Vec<serde_json::Value> = self
            .candidates
            .iter()
            .enumerate()
            .map(|(i, (certainty, impact))| {
                json!({
                    "content": format!("Scripted fact {i} from window {call}."),
                    "certainty": certainty,
                    "impact": impact,
                    "justification": format!("Scripted candidate {i} with impact {impact}."),
                })
            })
            .collect();
        Ok(json!({ "facts": facts }).to_string())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn is_simulation(&self) -> bool {
        true
    }
}

/// Holds every extraction call until [`GatedLLMProvider::open`] is called.
#[derive(Debug)]
pub struct GatedLLMProvider {
    inner: SimLLMProvider,
    open: watch::Sender<bool>,
    entered: watch::Sender<usize>,
}

impl GatedLLMProvider {
    pub fn new(seed: u64) -> Arc<Self> {
        Arc::new(Self {
            inner: SimLLMProvider::with_seed(seed),
            open: watch::channel(false).0,
            entered: watch::channel(0).0,
        })
    }

    /// Release every held call, now and later.
    pub fn open(&self) {
        self.open.send_replace(true);
    }

    /// Wait until `n` extraction calls have reached the gate.
    pub async fn wait_entered(&self, n: usize) {
        let mut entered = self.entered.subscribe();
        entered
            .wait_for(|count| *count >= n)
            .await
            .expect("gate dropped");
    }

    pub fn entered(&self) -> usize {
        *self.entered.borrow()
    }
}

#[async_trait]
impl LLMProvider for GatedLLMProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        if is_extraction(request) {
            self.entered.send_modify(|count| *count += 1);
            let mut open = self.open.subscribe();
            open.wait_for(|open| *open).await.expect("gate dropped");
        }
        self.inner.complete(request).await
    }

    fn name(&self) -> &'static str {
        "gated"
    }

    fn is_simulation(&self) -> bool {
        true
    }
}
