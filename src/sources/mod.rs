//! Capture sources.
//!
//! Pages POST their performance entries to the collector; the ingest
//! handler publishes them on an [`EntryBus`], which plays the part of the
//! browser's `PerformanceObserver`. Each [`VitalsSource`] watches the bus
//! for the entry types it cares about and emits [`RawSample`]s into the
//! monitor's [`CaptureSink`].

pub mod derived;
pub mod web_vitals;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::vitals::{MetricName, PageEnvironment, RawSample};

pub use derived::{MarkSource, NavigationTimingSource, TbtSource, TtiSource};
pub use web_vitals::CoreVitalsSource;

/// Entries queued per observer before `publish` waits for it.
const OBSERVER_CAPACITY: usize = 1024;

/// Default window during which long tasks count towards TBT.
pub const DEFAULT_TBT_WINDOW: Duration = Duration::from_secs(5);

// ─── Wire types ──────────────────────────────────────────────────

/// Subset of `PerformanceNavigationTiming`, in ms relative to navigation start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NavigationTiming {
    pub domain_lookup_start: f64,
    pub domain_lookup_end: f64,
    pub connect_start: f64,
    pub connect_end: f64,
    pub request_start: f64,
    pub response_start: f64,
    pub response_end: f64,
    pub dom_loading: f64,
    pub dom_interactive: f64,
    pub dom_complete: f64,
    pub load_event_start: f64,
    pub load_event_end: f64,
}

/// One performance entry as reported by the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entryType", rename_all = "kebab-case")]
pub enum PerformanceEntry {
    /// A finished Core Web Vital value from the page's web-vitals reporter.
    Vital { name: MetricName, value: f64 },
    Navigation(NavigationTiming),
    Longtask { duration: f64 },
    Mark {
        name: String,
        #[serde(rename = "startTime")]
        start_time: f64,
    },
}

/// Batch of entries POSTed by a page.
#[derive(Debug, Clone, Deserialize)]
pub struct Beacon {
    #[serde(default)]
    pub environment: PageEnvironment,
    pub entries: Vec<PerformanceEntry>,
}

/// An entry together with the environment of the page that reported it.
#[derive(Debug, Clone)]
pub struct ObservedEntry {
    pub entry: PerformanceEntry,
    pub environment: Arc<PageEnvironment>,
}

impl ObservedEntry {
    /// Start a sample for this entry, carrying its page environment.
    pub fn sample(&self, name: impl Into<MetricName>, value: f64) -> RawSample {
        RawSample::new(name, value).with_environment((*self.environment).clone())
    }
}

// ─── Entry bus ───────────────────────────────────────────────────

/// Fan-out of reported entries to every attached source.
///
/// Each observer gets its own bounded queue; `publish` waits while a queue
/// is full, so accepted entries are never dropped.
#[derive(Clone, Default)]
pub struct EntryBus {
    observers: Arc<Mutex<Vec<mpsc::Sender<ObservedEntry>>>>,
}

impl EntryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver every entry of `beacon`, in order, to every observer.
    /// Returns how many entries were published.
    pub async fn publish(&self, beacon: Beacon) -> usize {
        let observers = self.observers.lock().clone();
        let environment = Arc::new(beacon.environment);
        let count = beacon.entries.len();

        let mut stopped = false;
        for entry in beacon.entries {
            let observed = ObservedEntry {
                entry,
                environment: environment.clone(),
            };
            for tx in &observers {
                stopped |= tx.send(observed.clone()).await.is_err();
            }
        }

        if stopped {
            self.observers.lock().retain(|tx| !tx.is_closed());
        }
        count
    }

    pub fn subscribe(&self) -> mpsc::Receiver<ObservedEntry> {
        let (tx, rx) = mpsc::channel(OBSERVER_CAPACITY);
        self.observers.lock().push(tx);
        rx
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

// ─── Capture sink ────────────────────────────────────────────────

/// Where sources deliver raw samples. Cheap to clone.
#[derive(Clone)]
pub struct CaptureSink {
    tx: mpsc::UnboundedSender<RawSample>,
}

impl CaptureSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RawSample>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Hand a sample to the monitor. Returns false once the monitor is gone.
    pub fn emit(&self, sample: RawSample) -> bool {
        self.tx.send(sample).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ─── Sources ─────────────────────────────────────────────────────

/// Something that produces raw samples once attached to a sink.
///
/// `attach` is called once per monitor; implementations that observe the
/// bus spawn their observer task there, so it must run inside a Tokio
/// runtime.
pub trait VitalsSource: Send + Sync {
    fn name(&self) -> &str;
    fn attach(&self, sink: CaptureSink);
}

/// Run `handle` for every bus entry until the bus or the sink closes.
pub(crate) fn observe<F>(bus: &EntryBus, sink: CaptureSink, source: String, mut handle: F)
where
    F: FnMut(&ObservedEntry) -> Vec<RawSample> + Send + 'static,
{
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        while let Some(observed) = rx.recv().await {
            for sample in handle(&observed) {
                if !sink.emit(sample) {
                    tracing::debug!(source = %source, "monitor gone, observer stopped");
                    return;
                }
            }
        }
    });
}

/// Sources grouped by when the monitor attaches them.
#[derive(Default)]
pub struct SourceSet {
    /// The Core Web Vitals. Always attached.
    pub core: Vec<Arc<dyn VitalsSource>>,
    /// TTI, TBT and marks. Attached when custom metrics are enabled.
    pub custom: Vec<Arc<dyn VitalsSource>>,
    /// Navigation timing phases. Always attached.
    pub navigation: Vec<Arc<dyn VitalsSource>>,
}

impl SourceSet {
    /// The standard sources, all fed from `bus`.
    pub fn from_bus(bus: &EntryBus, tbt_window: Duration) -> Self {
        Self {
            core: vec![Arc::new(CoreVitalsSource::new(bus.clone())) as Arc<dyn VitalsSource>],
            custom: vec![
                Arc::new(TtiSource::new(bus.clone())) as Arc<dyn VitalsSource>,
                Arc::new(TbtSource::new(bus.clone(), tbt_window)),
                Arc::new(MarkSource::new(bus.clone())),
            ],
            navigation: vec![Arc::new(NavigationTimingSource::new(bus.clone())) as Arc<dyn VitalsSource>],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beacon_json_parses_every_entry_type() {
        let beacon: Beacon = serde_json::from_str(
            r#"{
                "environment": {"url": "https://app.example/", "connectionType": "4g"},
                "entries": [
                    {"entryType": "vital", "name": "LCP", "value": 2100.5},
                    {"entryType": "navigation", "domInteractive": 850, "loadEventEnd": 1200},
                    {"entryType": "longtask", "duration": 120},
                    {"entryType": "mark", "name": "hero", "startTime": 640.2}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(beacon.environment.connection_type.as_deref(), Some("4g"));
        assert_eq!(
            beacon.entries[0],
            PerformanceEntry::Vital { name: MetricName::Lcp, value: 2100.5 }
        );
        match &beacon.entries[1] {
            PerformanceEntry::Navigation(nav) => {
                assert_eq!(nav.dom_interactive, 850.0);
                assert_eq!(nav.connect_start, 0.0);
            }
            other => panic!("unexpected entry {other:?}"),
        }
        assert_eq!(beacon.entries[2], PerformanceEntry::Longtask { duration: 120.0 });
        assert_eq!(
            beacon.entries[3],
            PerformanceEntry::Mark { name: "hero".into(), start_time: 640.2 }
        );
    }

    #[tokio::test]
    async fn bus_fans_out_to_every_subscriber() {
        let bus = EntryBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let published = bus
            .publish(Beacon {
                environment: PageEnvironment::default(),
                entries: vec![PerformanceEntry::Longtask { duration: 60.0 }],
            })
            .await;

        assert_eq!(published, 1);
        assert_eq!(bus.observer_count(), 2);
        assert_eq!(a.recv().await.unwrap().entry, PerformanceEntry::Longtask { duration: 60.0 });
        assert_eq!(b.recv().await.unwrap().entry, PerformanceEntry::Longtask { duration: 60.0 });
    }

    #[tokio::test]
    async fn full_observer_queue_holds_publish_until_drained() {
        let bus = EntryBus::new();
        let mut rx = bus.subscribe();
        let entries = vec![PerformanceEntry::Longtask { duration: 1.0 }; OBSERVER_CAPACITY * 3];

        let publisher = bus.clone();
        let publishing = tokio::spawn(async move {
            publisher
                .publish(Beacon {
                    environment: PageEnvironment::default(),
                    entries,
                })
                .await
        });

        let mut received = 0;
        while received < OBSERVER_CAPACITY * 3 {
            rx.recv().await.unwrap();
            received += 1;
        }
        assert_eq!(publishing.await.unwrap(), OBSERVER_CAPACITY * 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stopped_observers_are_dropped() {
        let bus = EntryBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.publish(Beacon {
            environment: PageEnvironment::default(),
            entries: vec![PerformanceEntry::Longtask { duration: 5.0 }],
        })
        .await;

        assert_eq!(bus.observers.lock().len(), 1);
        assert_eq!(bus.observer_count(), 1);
        drop(kept);
    }

    #[test]
    fn standard_set_observes_core_vitals_in_one_source() {
        let sources = SourceSet::from_bus(&EntryBus::new(), DEFAULT_TBT_WINDOW);
        let names: Vec<&str> = sources.core.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["core-web-vitals"]);
        assert_eq!(sources.custom.len(), 3);
        assert_eq!(sources.navigation.len(), 1);
    }

    #[test]
    fn sink_reports_closed_monitor() {
        let (sink, rx) = CaptureSink::channel();
        assert!(sink.emit(RawSample::new(MetricName::Fcp, 1.0)));
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.emit(RawSample::new(MetricName::Fcp, 1.0)));
    }
}
