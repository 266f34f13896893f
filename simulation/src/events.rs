//! Notifications delivered to observers of a run
//!
//! Two listener traits split the interface: [`SimulationListener`] sees the
//! run lifecycle (start, every tick, finish) and [`CommunicationListener`]
//! sees each protocol transition. Delivery is synchronous and in order.
//! Listeners take `&self` and are shared as `Arc`s, so implementations keep
//! their state behind a lock.

use oppnet_core::Artifact;
use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::population::Population;

/// Lifecycle of one `run`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    Started { time: f64 },
    /// Fired after each tick; the first carries iteration 1
    TickAdvanced { time: f64, iteration: u64 },
    Finished { time: f64 },
}

impl LifecycleEvent {
    pub fn time(&self) -> f64 {
        match self {
            LifecycleEvent::Started { time }
            | LifecycleEvent::TickAdvanced { time, .. }
            | LifecycleEvent::Finished { time } => *time,
        }
    }
}

/// Which protocol transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommunicationEventKind {
    Initiated,
    DiscoverySucceeded,
    DiscoveryFailed,
    Aborted,
    TransmissionSucceeded,
    TransmissionFailed,
}

impl std::fmt::Display for CommunicationEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommunicationEventKind::Initiated => "initiated",
            CommunicationEventKind::DiscoverySucceeded => "discovery succeeded",
            CommunicationEventKind::DiscoveryFailed => "discovery failed",
            CommunicationEventKind::Aborted => "aborted",
            CommunicationEventKind::TransmissionSucceeded => "transmission succeeded",
            CommunicationEventKind::TransmissionFailed => "transmission failed",
        };
        write!(f, "{name}")
    }
}

/// A protocol transition between two devices
///
/// `to_first` and `to_second` are the artifacts bound for each side: the
/// lists armed at discovery, committed on success, dropped on failure or
/// abort.
#[derive(Debug, Clone, Copy)]
pub enum CommunicationEvent<'a> {
    Initiated {
        first: &'a Device,
        second: &'a Device,
    },
    DiscoverySucceeded {
        first: &'a Device,
        second: &'a Device,
        to_first: &'a [Artifact],
        to_second: &'a [Artifact],
    },
    DiscoveryFailed {
        first: &'a Device,
        second: &'a Device,
    },
    Aborted {
        first: &'a Device,
        second: &'a Device,
        to_first: &'a [Artifact],
        to_second: &'a [Artifact],
    },
    TransmissionSucceeded {
        first: &'a Device,
        second: &'a Device,
        to_first: &'a [Artifact],
        to_second: &'a [Artifact],
    },
    TransmissionFailed {
        first: &'a Device,
        second: &'a Device,
        to_first: &'a [Artifact],
        to_second: &'a [Artifact],
    },
}

impl<'a> CommunicationEvent<'a> {
    pub fn kind(&self) -> CommunicationEventKind {
        match self {
            CommunicationEvent::Initiated { .. } => CommunicationEventKind::Initiated,
            CommunicationEvent::DiscoverySucceeded { .. } => {
                CommunicationEventKind::DiscoverySucceeded
            }
            CommunicationEvent::DiscoveryFailed { .. } => CommunicationEventKind::DiscoveryFailed,
            CommunicationEvent::Aborted { .. } => CommunicationEventKind::Aborted,
            CommunicationEvent::TransmissionSucceeded { .. } => {
                CommunicationEventKind::TransmissionSucceeded
            }
            CommunicationEvent::TransmissionFailed { .. } => {
                CommunicationEventKind::TransmissionFailed
            }
        }
    }

    /// The two devices, in the order the transition was invoked with
    pub fn devices(&self) -> (&'a Device, &'a Device) {
        match *self {
            CommunicationEvent::Initiated { first, second }
            | CommunicationEvent::DiscoveryFailed { first, second }
            | CommunicationEvent::DiscoverySucceeded { first, second, .. }
            | CommunicationEvent::Aborted { first, second, .. }
            | CommunicationEvent::TransmissionSucceeded { first, second, .. }
            | CommunicationEvent::TransmissionFailed { first, second, .. } => (first, second),
        }
    }

    /// Artifact lists, absent for transitions that precede discovery
    pub fn artifacts(&self) -> Option<(&'a [Artifact], &'a [Artifact])> {
        match *self {
            CommunicationEvent::Initiated { .. } | CommunicationEvent::DiscoveryFailed { .. } => {
                None
            }
            CommunicationEvent::DiscoverySucceeded {
                to_first, to_second, ..
            }
            | CommunicationEvent::Aborted {
                to_first, to_second, ..
            }
            | CommunicationEvent::TransmissionSucceeded {
                to_first, to_second, ..
            }
            | CommunicationEvent::TransmissionFailed {
                to_first, to_second, ..
            } => Some((to_first, to_second)),
        }
    }
}

/// Observer of the run lifecycle
pub trait SimulationListener: Send + Sync {
    fn on_lifecycle(&self, event: &LifecycleEvent, population: &Population);
}

/// Observer of protocol transitions
pub trait CommunicationListener: Send + Sync {
    fn on_communication(&self, event: &CommunicationEvent<'_>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeviceIdAllocator;
    use oppnet_core::{Point, ResourceId};

    #[test]
    fn test_event_accessors() {
        let mut ids = DeviceIdAllocator::new();
        let a = Device::beacon(&mut ids, Point::default());
        let b = Device::beacon(&mut ids, Point::new(1.0, 0.0));
        let list = [Artifact::fresh(ResourceId::new(1).unwrap())];

        let initiated = CommunicationEvent::Initiated {
            first: &a,
            second: &b,
        };
        assert_eq!(initiated.kind(), CommunicationEventKind::Initiated);
        assert!(initiated.artifacts().is_none());

        let done = CommunicationEvent::TransmissionSucceeded {
            first: &a,
            second: &b,
            to_first: &list,
            to_second: &[],
        };
        let (first, second) = done.devices();
        assert_eq!(first.id(), a.id());
        assert_eq!(second.id(), b.id());
        let (to_first, to_second) = done.artifacts().unwrap();
        assert_eq!(to_first.len(), 1);
        assert!(to_second.is_empty());
    }

    #[test]
    fn test_lifecycle_time() {
        assert_eq!(LifecycleEvent::Started { time: 0.0 }.time(), 0.0);
        assert_eq!(
            LifecycleEvent::TickAdvanced {
                time: 0.5,
                iteration: 5
            }
            .time(),
            0.5
        );
        assert_eq!(CommunicationEventKind::Aborted.to_string(), "aborted");
    }
}
