//! Ring buffer of recent request samples backing `Client::health()`.

use crate::clock::{Clock, MonotonicClock};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MAX_SAMPLES: usize = 1000;

#[derive(Debug, Clone)]
pub struct Sample {
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub latency_ms: u64,
    pub attempt: u32,
    pub status: Option<u16>,
    pub success: bool,
    /// Wall-clock-equivalent timestamp (per the injected [`Clock`]), distinct from `latency_ms`.
    /// See SPEC_FULL.md §4.7 / Open Question 1: the source compared `now - latencyMs`, which is
    /// dimensionally wrong; a proper timestamp per sample is required for a windowed count.
    timestamp_millis: u64,
}

pub struct MetricsBuffer {
    samples: Mutex<VecDeque<Sample>>,
    clock: Arc<dyn Clock>,
}

impl Default for MetricsBuffer {
    fn default() -> Self {
        Self { samples: Mutex::new(VecDeque::new()), clock: Arc::new(MonotonicClock::default()) }
    }
}

impl MetricsBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn record(&self, mut sample: Sample) {
        sample.timestamp_millis = self.clock.now_millis();
        let mut samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        if samples.len() >= MAX_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    /// Average latency across all resident samples; `0` if empty.
    pub fn average_latency_ms(&self) -> u64 {
        let samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        if samples.is_empty() {
            return 0;
        }
        let total: u64 = samples.iter().map(|s| s.latency_ms).sum();
        total / samples.len() as u64
    }

    /// Count of failed samples whose timestamp falls within `window` of now.
    pub fn recent_failures(&self, window: Duration) -> usize {
        let now = self.clock.now_millis();
        let window_ms = window.as_millis() as u64;
        let samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        samples
            .iter()
            .filter(|s| !s.success && now.saturating_sub(s.timestamp_millis) <= window_ms)
            .count()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Sample {
    pub fn new(
        request_id: impl Into<String>,
        url: impl Into<String>,
        method: impl Into<String>,
        latency_ms: u64,
        attempt: u32,
        status: Option<u16>,
        success: bool,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            url: url.into(),
            method: method.into(),
            latency_ms,
            attempt,
            status,
            success,
            timestamp_millis: 0,
        }
    }
}
