use super::{observe, CaptureSink, EntryBus, PerformanceEntry, VitalsSource};
use crate::vitals::MetricName;

/// Emission point for the Core Web Vitals.
///
/// One observer handles all of them, so vitals reach the monitor in the
/// order the page reported them.
pub struct CoreVitalsSource {
    vitals: Vec<MetricName>,
    bus: EntryBus,
}

impl CoreVitalsSource {
    pub fn new(bus: EntryBus) -> Self {
        Self {
            vitals: MetricName::CORE.to_vec(),
            bus,
        }
    }
}

impl VitalsSource for CoreVitalsSource {
    fn name(&self) -> &str {
        "core-web-vitals"
    }

    fn attach(&self, sink: CaptureSink) {
        let vitals = self.vitals.clone();
        observe(&self.bus, sink, self.name().to_owned(), move |observed| {
            match &observed.entry {
                PerformanceEntry::Vital { name, value } if vitals.contains(name) => {
                    vec![observed.sample(name.clone(), *value)]
                }
                _ => Vec::new(),
            }
        });
    }
}
