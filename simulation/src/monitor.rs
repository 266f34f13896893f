//! Built-in observers
//!
//! - [`ConsoleMonitor`]: human-readable run log through `tracing`
//! - [`StatsMonitor`]: session counters
//! - [`EventRecorder`]: every notification, in order

use oppnet_core::Artifact;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::device::DeviceId;
use crate::events::{
    CommunicationEvent, CommunicationEventKind, CommunicationListener, LifecycleEvent,
    SimulationListener,
};
use crate::population::Population;

/// Where a monitor is in the run it observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorPhase {
    BeforeStart,
    Running,
    Finished,
}

/// Notifications that arrive out of order
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MonitorError {
    #[error("{event} received before the simulation started")]
    EventBeforeStart { event: String },
}

/// Iteration as printed in the run log, e.g. `[0042]`
pub fn format_iteration(iteration: u64) -> String {
    format!("[{iteration:04}]")
}

/// A device pair as printed in the run log, lower id first, e.g. `<3,7>`
pub fn format_pair(a: DeviceId, b: DeviceId) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("<{low},{high}>")
}

fn format_artifacts(artifacts: &[Artifact]) -> String {
    let items: Vec<String> = artifacts.iter().map(|a| a.to_string()).collect();
    format!("[{}]", items.join(", "))
}

#[derive(Debug)]
struct ConsoleState {
    phase: MonitorPhase,
    iteration: u64,
    transferred: usize,
}

/// Text log of a run
///
/// Ticks and protocol transitions are optional; the start, finish and the
/// closing summary are always logged.
#[derive(Debug)]
pub struct ConsoleMonitor {
    log_ticks: bool,
    log_communication: bool,
    state: Mutex<ConsoleState>,
}

impl ConsoleMonitor {
    pub fn new(log_ticks: bool, log_communication: bool) -> Self {
        Self {
            log_ticks,
            log_communication,
            state: Mutex::new(ConsoleState {
                phase: MonitorPhase::BeforeStart,
                iteration: 0,
                transferred: 0,
            }),
        }
    }

    pub fn phase(&self) -> MonitorPhase {
        self.state.lock().phase
    }

    /// Artifacts committed by successful transmissions so far
    pub fn transferred(&self) -> usize {
        self.state.lock().transferred
    }

    /// Closing report: total transferred, then what every store holds
    pub fn summary(&self, population: &Population) -> String {
        let mut out = format!("Total artifacts transferred: {}\n", self.transferred());
        for (label, devices) in [
            ("Beacon", population.beacons()),
            ("Mobile object", population.mobile_objects()),
        ] {
            for device in devices {
                let held = device.store().map(|s| s.list()).unwrap_or_default();
                out.push_str(&format!(
                    "{label} {}: {} artifacts {}\n",
                    device.id(),
                    held.len(),
                    format_artifacts(held)
                ));
            }
        }
        out
    }

    /// Check that an event may be processed; logs a warning if not
    fn accepts(&self, state: &ConsoleState, event: &str) -> bool {
        match state.phase {
            MonitorPhase::Running => true,
            MonitorPhase::Finished => false,
            MonitorPhase::BeforeStart => {
                let error = MonitorError::EventBeforeStart {
                    event: event.to_string(),
                };
                warn!(%error, "console monitor");
                false
            }
        }
    }
}

impl Default for ConsoleMonitor {
    fn default() -> Self {
        Self::new(false, true)
    }
}

impl SimulationListener for ConsoleMonitor {
    fn on_lifecycle(&self, event: &LifecycleEvent, population: &Population) {
        match *event {
            LifecycleEvent::Started { time } => {
                let mut state = self.state.lock();
                state.phase = MonitorPhase::Running;
                state.iteration = 0;
                state.transferred = 0;
                info!("Simulation started at t={time:.2}");
            }
            LifecycleEvent::TickAdvanced { time, iteration } => {
                let mut state = self.state.lock();
                if !self.accepts(&state, "tick") {
                    return;
                }
                state.iteration = iteration;
                if self.log_ticks {
                    info!("{} t={time:.2}", format_iteration(iteration));
                }
            }
            LifecycleEvent::Finished { time } => {
                {
                    let mut state = self.state.lock();
                    if !self.accepts(&state, "finish") {
                        return;
                    }
                    state.phase = MonitorPhase::Finished;
                    info!(
                        "{} Simulation finished at t={time:.2}",
                        format_iteration(state.iteration)
                    );
                }
                for line in self.summary(population).lines() {
                    info!("{line}");
                }
            }
        }
    }
}

impl CommunicationListener for ConsoleMonitor {
    fn on_communication(&self, event: &CommunicationEvent<'_>) {
        let mut state = self.state.lock();
        let kind = event.kind();
        if !self.accepts(&state, &kind.to_string()) {
            return;
        }
        if kind == CommunicationEventKind::TransmissionSucceeded {
            if let Some((to_first, to_second)) = event.artifacts() {
                state.transferred += to_first.len() + to_second.len();
            }
        }
        if !self.log_communication {
            return;
        }

        let (first, second) = event.devices();
        let pair = format_pair(first.id(), second.id());
        let prefix = format_iteration(state.iteration);
        match event.artifacts() {
            Some((to_first, to_second)) => info!(
                "{prefix} {pair} {kind}: {} -> {}: {}, {} -> {}: {}",
                second.id(),
                first.id(),
                format_artifacts(to_first),
                first.id(),
                second.id(),
                format_artifacts(to_second)
            ),
            None => info!("{prefix} {pair} {kind}"),
        }
    }
}

/// Session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub ticks: u64,
    pub initiated: u64,
    pub discovery_succeeded: u64,
    pub discovery_failed: u64,
    pub aborted: u64,
    pub transmission_succeeded: u64,
    pub transmission_failed: u64,
    pub artifacts_transferred: u64,
}

impl SessionStats {
    /// Share of discovered sessions whose transfer was committed
    pub fn delivery_ratio(&self) -> f64 {
        if self.discovery_succeeded == 0 {
            return 0.0;
        }
        self.transmission_succeeded as f64 / self.discovery_succeeded as f64
    }

    /// Sessions that have ended, whatever the outcome
    pub fn sessions_closed(&self) -> u64 {
        self.discovery_failed + self.aborted + self.transmission_succeeded + self.transmission_failed
    }
}

/// Counts protocol outcomes; reset at every run start
#[derive(Debug, Default)]
pub struct StatsMonitor {
    stats: Mutex<SessionStats>,
}

impl StatsMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> SessionStats {
        *self.stats.lock()
    }
}

impl SimulationListener for StatsMonitor {
    fn on_lifecycle(&self, event: &LifecycleEvent, _population: &Population) {
        let mut stats = self.stats.lock();
        match event {
            LifecycleEvent::Started { .. } => *stats = SessionStats::default(),
            LifecycleEvent::TickAdvanced { .. } => stats.ticks += 1,
            LifecycleEvent::Finished { .. } => {}
        }
    }
}

impl CommunicationListener for StatsMonitor {
    fn on_communication(&self, event: &CommunicationEvent<'_>) {
        let mut stats = self.stats.lock();
        match event.kind() {
            CommunicationEventKind::Initiated => stats.initiated += 1,
            CommunicationEventKind::DiscoverySucceeded => stats.discovery_succeeded += 1,
            CommunicationEventKind::DiscoveryFailed => stats.discovery_failed += 1,
            CommunicationEventKind::Aborted => stats.aborted += 1,
            CommunicationEventKind::TransmissionFailed => stats.transmission_failed += 1,
            CommunicationEventKind::TransmissionSucceeded => {
                stats.transmission_succeeded += 1;
                if let Some((to_first, to_second)) = event.artifacts() {
                    stats.artifacts_transferred += (to_first.len() + to_second.len()) as u64;
                }
            }
        }
    }
}

/// One notification as kept by [`EventRecorder`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordedEvent {
    Lifecycle(LifecycleEvent),
    Communication {
        kind: CommunicationEventKind,
        first: DeviceId,
        second: DeviceId,
        to_first: Option<Vec<Artifact>>,
        to_second: Option<Vec<Artifact>>,
    },
}

/// Keeps every notification in delivery order
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Number of protocol transitions of one kind
    pub fn count(&self, kind: CommunicationEventKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, RecordedEvent::Communication { kind: k, .. } if *k == kind))
            .count()
    }

    /// The events as JSON, one object per line
    pub fn to_json_lines(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for event in self.events.lock().iter() {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl SimulationListener for EventRecorder {
    fn on_lifecycle(&self, event: &LifecycleEvent, _population: &Population) {
        self.events.lock().push(RecordedEvent::Lifecycle(*event));
    }
}

impl CommunicationListener for EventRecorder {
    fn on_communication(&self, event: &CommunicationEvent<'_>) {
        let (first, second) = event.devices();
        let lists = event.artifacts();
        self.events.lock().push(RecordedEvent::Communication {
            kind: event.kind(),
            first: first.id(),
            second: second.id(),
            to_first: lists.map(|(to_first, _)| to_first.to_vec()),
            to_second: lists.map(|(_, to_second)| to_second.to_vec()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeviceIdAllocator;
    use crate::device::Device;
    use oppnet_core::{Point, ResourceId};

    fn devices() -> (Device, Device) {
        let mut ids = DeviceIdAllocator::new();
        (
            Device::beacon(&mut ids, Point::default()),
            Device::beacon(&mut ids, Point::new(1.0, 0.0)),
        )
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_iteration(7), "[0007]");
        assert_eq!(format_iteration(12345), "[12345]");
        assert_eq!(format_pair(DeviceId(9), DeviceId(2)), "<2,9>");
        assert_eq!(format_pair(DeviceId(2), DeviceId(9)), "<2,9>");
    }

    #[test]
    fn test_console_phases() {
        let monitor = ConsoleMonitor::new(true, true);
        let pop = Population::new();
        let (a, b) = devices();
        let list = [Artifact::fresh(ResourceId::new(1).unwrap())];
        let success = CommunicationEvent::TransmissionSucceeded {
            first: &a,
            second: &b,
            to_first: &list,
            to_second: &[],
        };

        // Ignored before start
        monitor.on_communication(&success);
        assert_eq!(monitor.phase(), MonitorPhase::BeforeStart);
        assert_eq!(monitor.transferred(), 0);

        monitor.on_lifecycle(&LifecycleEvent::Started { time: 0.0 }, &pop);
        monitor.on_communication(&success);
        assert_eq!(monitor.transferred(), 1);

        monitor.on_lifecycle(&LifecycleEvent::Finished { time: 1.0 }, &pop);
        assert_eq!(monitor.phase(), MonitorPhase::Finished);
        monitor.on_communication(&success);
        assert_eq!(monitor.transferred(), 1, "events after finish are ignored");
    }

    #[test]
    fn test_stats_counts_and_ratio() {
        let monitor = StatsMonitor::new();
        let pop = Population::new();
        let (a, b) = devices();
        let list = [Artifact::fresh(ResourceId::new(1).unwrap())];

        monitor.on_lifecycle(&LifecycleEvent::Started { time: 0.0 }, &pop);
        monitor.on_communication(&CommunicationEvent::Initiated { first: &a, second: &b });
        monitor.on_communication(&CommunicationEvent::DiscoverySucceeded {
            first: &a,
            second: &b,
            to_first: &list,
            to_second: &list,
        });
        monitor.on_communication(&CommunicationEvent::TransmissionSucceeded {
            first: &a,
            second: &b,
            to_first: &list,
            to_second: &list,
        });
        monitor.on_lifecycle(&LifecycleEvent::TickAdvanced { time: 0.1, iteration: 1 }, &pop);

        let stats = monitor.stats();
        assert_eq!(stats.initiated, 1);
        assert_eq!(stats.transmission_succeeded, 1);
        assert_eq!(stats.artifacts_transferred, 2);
        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.delivery_ratio(), 1.0);
        assert_eq!(stats.sessions_closed(), 1);
        assert_eq!(SessionStats::default().delivery_ratio(), 0.0);
    }

    #[test]
    fn test_recorder_keeps_order() {
        let recorder = EventRecorder::new();
        let pop = Population::new();
        let (a, b) = devices();

        recorder.on_lifecycle(&LifecycleEvent::Started { time: 0.0 }, &pop);
        recorder.on_communication(&CommunicationEvent::Initiated { first: &a, second: &b });
        recorder.on_communication(&CommunicationEvent::DiscoveryFailed { first: &a, second: &b });
        recorder.on_lifecycle(&LifecycleEvent::Finished { time: 0.1 }, &pop);

        let events = recorder.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], RecordedEvent::Lifecycle(LifecycleEvent::Started { time: 0.0 }));
        assert!(matches!(
            &events[1],
            RecordedEvent::Communication { kind: CommunicationEventKind::Initiated, to_first: None, .. }
        ));
        assert_eq!(recorder.count(CommunicationEventKind::DiscoveryFailed), 1);

        let json = recorder.to_json_lines().unwrap();
        assert_eq!(json.lines().count(), 4);
    }
}
