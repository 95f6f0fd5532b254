use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::providers::{ChatProvider, ProviderFuture, ProviderResponse, ProviderUsage};

type Reply = dyn Fn(&str, &str) -> Result<Option<String>> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StubCall {
    pub(crate) system: String,
    pub(crate) user: String,
    pub(crate) max_tokens: u32,
}

/// In-memory chat provider that records every call and answers through a
/// closure of `(system_prompt, user_text)`.
#[derive(Clone)]
pub(crate) struct StubProvider {
    reply: Arc<Reply>,
    calls: Arc<Mutex<Vec<StubCall>>>,
    latency: Duration,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    system: String,
    user: String,
    max_tokens: u32,
}

impl StubProvider {
    pub(crate) fn new<F>(reply: F) -> Self
    where
        F: Fn(&str, &str) -> Result<Option<String>> + Send + Sync + 'static,
    {
        Self {
            reply: Arc::new(reply),
            calls: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            system: String::new(),
            user: String::new(),
            max_tokens: 0,
        }
    }

    pub(crate) fn constant(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(Some(text.clone())))
    }

    /// Every completion sleeps this long while counted as in flight.
    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Highest number of completions that were awaiting a reply at once.
    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> Vec<StubCall> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl ChatProvider for StubProvider {
    fn append_system_input(mut self, input: String) -> Self {
        self.system = input;
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.user = input;
        self
    }

    fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn complete(self) -> ProviderFuture {
        self.calls.lock().expect("calls lock").push(StubCall {
            system: self.system.clone(),
            user: self.user.clone(),
            max_tokens: self.max_tokens,
        });
        let result = (self.reply)(&self.system, &self.user);
        let latency = self.latency;
        let in_flight = self.in_flight.clone();
        let peak = self.peak_in_flight.clone();
        Box::pin(async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            if latency.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(latency).await;
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
            let text = result?;
            Ok(ProviderResponse {
                text,
                model: Some("stub".to_string()),
                usage: Some(ProviderUsage {
                    prompt_tokens: Some(10),
                    completion_tokens: Some(2),
                    total_tokens: None,
                }),
            })
        })
    }
}
