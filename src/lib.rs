pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod middleware;
pub mod monitor;
pub mod redis_client;
pub mod server;
pub mod sources;
pub mod storage;
pub mod telemetry;
pub mod vitals;

use std::sync::Arc;

pub use monitor::{MonitorConfig, WebVitalsMonitor};

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// The capture pipeline. Handlers query it; beacons feed it via the bus.
    pub monitor: Arc<WebVitalsMonitor>,

    /// Entries reported by pages, fanned out to the monitor's sources.
    pub bus: sources::EntryBus,
}
