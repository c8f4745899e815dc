use std::time::{Duration, Instant};

/// Floor for the elapsed time of a turn, so throughput is always defined.
pub const MIN_ELAPSED: Duration = Duration::from_millis(1);

/// Throughput of a finished text turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub tokens_per_second: f64,
    pub total_tokens: usize,
    /// Seconds.
    pub time_taken: f64,
}

impl Metrics {
    /// Tokens are whitespace-delimited words of `text`.
    pub fn compute(text: &str, elapsed: Duration) -> Self {
        let total_tokens = text.split_whitespace().count();
        let time_taken = elapsed.max(MIN_ELAPSED).as_secs_f64();
        Self {
            tokens_per_second: total_tokens as f64 / time_taken,
            total_tokens,
            time_taken,
        }
    }
}

/// Folds fragments of one turn into the assistant text.
#[derive(Debug, Clone)]
pub struct Aggregator {
    text: String,
    started: Instant,
}

impl Aggregator {
    pub fn start(now: Instant) -> Self {
        Self {
            text: String::new(),
            started: now,
        }
    }

    /// Append a fragment and return the text so far.
    pub fn fold(&mut self, fragment: &str) -> &str {
        self.text.push_str(fragment);
        &self.text
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Metrics for the text folded so far, measured at `now`.
    pub fn finish(&self, now: Instant) -> Metrics {
        Metrics::compute(&self.text, now.saturating_duration_since(self.started))
    }
}
