//! Small helpers shared by the pipeline and the HTTP handlers.

use std::future::Future;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;

/// Per-call time budget. Created when a request arrives; any stage that
/// waits on a collaborator bounds the wait by what is left.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new_ms(ms: u64) -> Self {
        Deadline {
            start: Instant::now(),
            budget: Duration::from_millis(ms),
        }
    }

    /// Returns true if the budget has already been exhausted.
    pub fn exceeded(&self) -> bool {
        self.start.elapsed() >= self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.start.elapsed())
    }

    pub fn budget_ms(&self) -> u64 {
        self.budget.as_millis() as u64
    }

    /// Drive `fut` until it completes or the budget runs out. `None` means
    /// the deadline won.
    pub async fn bound<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::time::timeout(self.remaining(), fut).await.ok()
    }
}

/// Header value as an owned, trimmed string. Empty and non-ASCII values are
/// treated as absent.
pub fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
