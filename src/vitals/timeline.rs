use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Named marks relative to a time origin, mirroring `performance.mark` /
/// `performance.measure`. Times are milliseconds since the origin.
pub struct PerformanceTimeline {
    origin: Instant,
    marks: Mutex<HashMap<String, f64>>,
}

impl PerformanceTimeline {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            marks: Mutex::new(HashMap::new()),
        }
    }

    /// Milliseconds elapsed since the origin.
    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    /// Record (or overwrite) a mark and return its start time.
    pub fn mark(&self, name: &str) -> f64 {
        let at = self.now();
        self.marks.lock().insert(name.to_owned(), at);
        at
    }

    /// Duration between `start` and `end` (or now). `None` when a named
    /// mark does not exist.
    pub fn measure(&self, start: &str, end: Option<&str>) -> Option<f64> {
        let marks = self.marks.lock();
        let from = *marks.get(start)?;
        let to = match end {
            Some(end) => *marks.get(end)?,
            None => self.now(),
        };
        Some((to - from).max(0.0))
    }
}

impl Default for PerformanceTimeline {
    fn default() -> Self {
        Self::new()
    }
}
