//! Sources for metrics derived from raw entries rather than reported
//! directly: TTI, TBT, performance marks and navigation-timing phases.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use super::{observe, CaptureSink, EntryBus, NavigationTiming, PerformanceEntry, VitalsSource};
use crate::vitals::{MetricName, PageEnvironment, RawSample};

// ─── TTI ─────────────────────────────────────────────────────────

/// Time-To-Interactive approximated from navigation timing:
/// `domInteractive`, falling back to `loadEventEnd`.
pub struct TtiSource {
    bus: EntryBus,
}

impl TtiSource {
    pub fn new(bus: EntryBus) -> Self {
        Self { bus }
    }
}

pub fn approximate_tti(nav: &NavigationTiming) -> Option<f64> {
    let tti = if nav.dom_interactive > 0.0 {
        nav.dom_interactive
    } else {
        nav.load_event_end
    };
    (tti > 0.0).then_some(tti)
}

impl VitalsSource for TtiSource {
    fn name(&self) -> &str {
        "TTI"
    }

    fn attach(&self, sink: CaptureSink) {
        observe(&self.bus, sink, "TTI".into(), |observed| match &observed.entry {
            PerformanceEntry::Navigation(nav) => approximate_tti(nav)
                .map(|tti| {
                    observed
                        .sample(MetricName::Tti, tti)
                        .with_metadata("type", "custom")
                })
                .into_iter()
                .collect(),
            _ => Vec::new(),
        });
    }
}

// ─── TBT ─────────────────────────────────────────────────────────

/// Total-Blocking-Time per page load: long-task durations summed over a
/// window that opens at the page's first long task. One sample per page
/// is reported when its window closes.
pub struct TbtSource {
    bus: EntryBus,
    window: Duration,
}

impl TbtSource {
    pub fn new(bus: EntryBus, window: Duration) -> Self {
        Self { bus, window }
    }
}

/// Blocking time accumulated for one page load.
struct PageWindow {
    total: f64,
    closes_at: Instant,
    environment: Arc<PageEnvironment>,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Emit and forget every window closed by `now`, oldest first.
/// Returns false once the monitor is gone.
fn report_closed(
    pages: &mut HashMap<String, PageWindow>,
    now: Instant,
    sink: &CaptureSink,
) -> bool {
    let keys: Vec<String> = pages
        .iter()
        .filter(|(_, page)| page.closes_at <= now)
        .map(|(key, _)| key.clone())
        .collect();
    let mut closed: Vec<(String, PageWindow)> = keys
        .into_iter()
        .filter_map(|key| pages.remove(&key).map(|page| (key, page)))
        .collect();
    closed.sort_by_key(|(_, page)| page.closes_at);

    for (page_key, page) in closed {
        tracing::debug!(page = %page_key, total = page.total, "reporting total blocking time");
        let sample = RawSample::new(MetricName::Tbt, page.total)
            .with_environment((*page.environment).clone())
            .with_metadata("type", "custom");
        if !sink.emit(sample) {
            return false;
        }
    }
    true
}

impl VitalsSource for TbtSource {
    fn name(&self) -> &str {
        "TBT"
    }

    fn attach(&self, sink: CaptureSink) {
        let mut rx = self.bus.subscribe();
        let window = self.window;

        tokio::spawn(async move {
            let mut pages: HashMap<String, PageWindow> = HashMap::new();

            loop {
                let next_close = pages.values().map(|page| page.closes_at).min();

                tokio::select! {
                    received = rx.recv() => {
                        let Some(observed) = received else { break };
                        let PerformanceEntry::Longtask { duration } = observed.entry else {
                            continue;
                        };
                        if !duration.is_finite() || duration <= 0.0 {
                            continue;
                        }

                        pages
                            .entry(observed.environment.page_key().to_owned())
                            .or_insert_with(|| PageWindow {
                                total: 0.0,
                                closes_at: Instant::now() + window,
                                environment: observed.environment.clone(),
                            })
                            .total += duration;
                    }
                    _ = wait_until(next_close) => {
                        if !report_closed(&mut pages, Instant::now(), &sink) {
                            return;
                        }
                    }
                }
            }

            // Bus gone: let the open windows run out, then report them
            if let Some(last) = pages.values().map(|page| page.closes_at).max() {
                tokio::time::sleep_until(last).await;
                report_closed(&mut pages, last, &sink);
            }
        });
    }
}

// ─── Marks ───────────────────────────────────────────────────────

/// Performance marks, reported as `mark_<name>` with the mark's start time.
pub struct MarkSource {
    bus: EntryBus,
}

impl MarkSource {
    pub fn new(bus: EntryBus) -> Self {
        Self { bus }
    }
}

/// Build the sample recorded for a performance mark.
pub fn mark_sample(name: &str, start_time: f64) -> RawSample {
    RawSample::new(format!("mark_{name}"), start_time)
        .with_metadata("type", "custom")
        .with_metadata("markName", name)
        .with_metadata("startTime", start_time)
}

impl VitalsSource for MarkSource {
    fn name(&self) -> &str {
        "marks"
    }

    fn attach(&self, sink: CaptureSink) {
        observe(&self.bus, sink, "marks".into(), |observed| match &observed.entry {
            PerformanceEntry::Mark { name, start_time } => {
                let sample = mark_sample(name, *start_time)
                    .with_environment((*observed.environment).clone());
                vec![sample]
            }
            _ => Vec::new(),
        });
    }
}

// ─── Navigation timing ───────────────────────────────────────────

/// Per-phase durations of the navigation, as `timing_<phase>` metrics.
pub struct NavigationTimingSource {
    bus: EntryBus,
}

impl NavigationTimingSource {
    pub fn new(bus: EntryBus) -> Self {
        Self { bus }
    }
}

/// `(phase label, duration)` for every phase, in load order.
pub fn navigation_phases(nav: &NavigationTiming) -> [(&'static str, f64); 6] {
    [
        ("DNS", nav.domain_lookup_end - nav.domain_lookup_start),
        ("TCP", nav.connect_end - nav.connect_start),
        ("Request", nav.response_start - nav.request_start),
        ("Response", nav.response_end - nav.response_start),
        ("DOM Processing", nav.dom_complete - nav.dom_loading),
        ("Load", nav.load_event_end - nav.load_event_start),
    ]
}

fn phase_metric_name(phase: &str) -> String {
    format!("timing_{}", phase.to_lowercase().replace(' ', "_"))
}

impl VitalsSource for NavigationTimingSource {
    fn name(&self) -> &str {
        "navigation-timing"
    }

    fn attach(&self, sink: CaptureSink) {
        observe(&self.bus, sink, "navigation-timing".into(), |observed| {
            let PerformanceEntry::Navigation(nav) = &observed.entry else {
                return Vec::new();
            };

            navigation_phases(nav)
                .into_iter()
                .filter(|(_, value)| *value > 0.0)
                .map(|(phase, value)| {
                    observed
                        .sample(phase_metric_name(phase), value)
                        .with_metadata("type", "navigation-timing")
                        .with_metadata("phase", json!(phase))
                })
                .collect()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::Beacon;

    async fn publish(bus: &EntryBus, entries: Vec<PerformanceEntry>) {
        publish_from(bus, PageEnvironment::default(), entries).await;
    }

    async fn publish_from(
        bus: &EntryBus,
        environment: PageEnvironment,
        entries: Vec<PerformanceEntry>,
    ) {
        bus.publish(Beacon { environment, entries }).await;
    }

    fn page(id: &str, url: &str) -> PageEnvironment {
        PageEnvironment {
            page_id: Some(id.into()),
            url: Some(url.into()),
            ..PageEnvironment::default()
        }
    }

    #[test]
    fn tti_prefers_dom_interactive() {
        let nav = NavigationTiming {
            dom_interactive: 900.0,
            load_event_end: 1500.0,
            ..NavigationTiming::default()
        };
        assert_eq!(approximate_tti(&nav), Some(900.0));

        let nav = NavigationTiming {
            load_event_end: 1500.0,
            ..NavigationTiming::default()
        };
        assert_eq!(approximate_tti(&nav), Some(1500.0));
        assert_eq!(approximate_tti(&NavigationTiming::default()), None);
    }

    #[test]
    fn phase_names_are_snake_cased() {
        assert_eq!(phase_metric_name("DOM Processing"), "timing_dom_processing");
        assert_eq!(phase_metric_name("DNS"), "timing_dns");
    }

    #[test]
    fn mark_samples_carry_mark_metadata() {
        let sample = mark_sample("hero-image", 640.0);
        assert_eq!(sample.name, MetricName::custom("mark_hero-image"));
        assert_eq!(sample.metadata["markName"], "hero-image");
        assert_eq!(sample.metadata["startTime"], 640.0);
        assert_eq!(sample.metadata["type"], "custom");
    }

    #[tokio::test]
    async fn tti_source_emits_from_navigation_entries() {
        let bus = EntryBus::new();
        let (sink, mut rx) = CaptureSink::channel();
        TtiSource::new(bus.clone()).attach(sink);

        publish(
            &bus,
            vec![PerformanceEntry::Navigation(NavigationTiming {
                dom_interactive: 1234.0,
                ..NavigationTiming::default()
            })],
        )
        .await;

        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.name, MetricName::Tti);
        assert_eq!(sample.value, 1234.0);
    }

    #[tokio::test(start_paused = true)]
    async fn tbt_sums_long_tasks_inside_the_window() {
        let bus = EntryBus::new();
        let (sink, mut rx) = CaptureSink::channel();
        TbtSource::new(bus.clone(), Duration::from_secs(5)).attach(sink);

        publish(
            &bus,
            vec![
                PerformanceEntry::Longtask { duration: 120.0 },
                PerformanceEntry::Longtask { duration: 80.0 },
                PerformanceEntry::Mark { name: "noise".into(), start_time: 1.0 },
            ],
        )
        .await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        publish(&bus, vec![PerformanceEntry::Longtask { duration: 50.0 }]).await;

        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.name, MetricName::Tbt);
        assert_eq!(sample.value, 250.0);
        assert_eq!(sample.metadata["type"], "custom");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn tbt_is_reported_for_pages_arriving_after_startup() {
        let bus = EntryBus::new();
        let (sink, mut rx) = CaptureSink::channel();
        TbtSource::new(bus.clone(), Duration::from_secs(5)).attach(sink);

        tokio::time::sleep(Duration::from_secs(60)).await;
        publish_from(
            &bus,
            page("load-1", "https://app.example/vistorias"),
            vec![PerformanceEntry::Longtask { duration: 300.0 }],
        )
        .await;

        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.name, MetricName::Tbt);
        assert_eq!(sample.value, 300.0);
        assert_eq!(
            sample.environment.url.as_deref(),
            Some("https://app.example/vistorias")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn tbt_windows_are_kept_per_page() {
        let bus = EntryBus::new();
        let (sink, mut rx) = CaptureSink::channel();
        TbtSource::new(bus.clone(), Duration::from_secs(5)).attach(sink);

        let first = page("load-a", "https://app.example/a");
        let second = page("load-b", "https://app.example/b");

        publish_from(&bus, first.clone(), vec![PerformanceEntry::Longtask { duration: 100.0 }]).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        publish_from(&bus, second.clone(), vec![PerformanceEntry::Longtask { duration: 70.0 }]).await;
        publish_from(&bus, first.clone(), vec![PerformanceEntry::Longtask { duration: 60.0 }]).await;

        let a = rx.recv().await.unwrap();
        assert_eq!(a.environment.page_id.as_deref(), Some("load-a"));
        assert_eq!(a.value, 160.0);

        let b = rx.recv().await.unwrap();
        assert_eq!(b.environment.page_id.as_deref(), Some("load-b"));
        assert_eq!(b.value, 70.0);

        // A closed window is forgotten; the same page id starts a new one
        publish_from(&bus, first, vec![PerformanceEntry::Longtask { duration: 40.0 }]).await;
        assert_eq!(rx.recv().await.unwrap().value, 40.0);
    }

    #[tokio::test(start_paused = true)]
    async fn tbt_without_long_tasks_reports_nothing() {
        let bus = EntryBus::new();
        let (sink, mut rx) = CaptureSink::channel();
        TbtSource::new(bus.clone(), Duration::from_secs(5)).attach(sink);

        publish(&bus, vec![PerformanceEntry::Longtask { duration: 0.0 }]).await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn tbt_open_windows_are_reported_when_the_bus_closes() {
        let bus = EntryBus::new();
        let (sink, mut rx) = CaptureSink::channel();
        TbtSource::new(bus.clone(), Duration::from_secs(5)).attach(sink);

        publish(&bus, vec![PerformanceEntry::Longtask { duration: 90.0 }]).await;
        drop(bus);

        assert_eq!(rx.recv().await.unwrap().value, 90.0);
    }

    #[tokio::test]
    async fn navigation_source_skips_empty_phases() {
        let bus = EntryBus::new();
        let (sink, mut rx) = CaptureSink::channel();
        NavigationTimingSource::new(bus.clone()).attach(sink);

        publish(
            &bus,
            vec![PerformanceEntry::Navigation(NavigationTiming {
                domain_lookup_start: 10.0,
                domain_lookup_end: 30.0,
                request_start: 50.0,
                response_start: 170.0,
                response_end: 200.0,
                ..NavigationTiming::default()
            })],
        )
        .await;

        let mut names = Vec::new();
        for _ in 0..3 {
            let sample = rx.recv().await.unwrap();
            assert_eq!(sample.metadata["type"], "navigation-timing");
            names.push((sample.name.to_string(), sample.value));
        }
        assert_eq!(
            names,
            vec![
                ("timing_dns".to_owned(), 20.0),
                ("timing_request".to_owned(), 120.0),
                ("timing_response".to_owned(), 30.0),
            ]
        );
    }

    #[tokio::test]
    async fn mark_source_prefixes_names() {
        let bus = EntryBus::new();
        let (sink, mut rx) = CaptureSink::channel();
        MarkSource::new(bus.clone()).attach(sink);

        publish(
            &bus,
            vec![PerformanceEntry::Mark { name: "pdf-ready".into(), start_time: 3210.0 }],
        )
        .await;

        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.name.as_str(), "mark_pdf-ready");
        assert_eq!(sample.value, 3210.0);
    }
}
