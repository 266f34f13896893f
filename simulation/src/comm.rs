//! The communication protocol
//!
//! A session pairs two devices and moves through two phases:
//!
//! ```text
//! initiate ──► INITIATION ──(time 0)──► attempt_discovery ──► TRANSMISSION
//!                                           │ fail                 │
//!                                           ▼                      ├─(out of range)──► abort
//!                                         (idle)                   └─(time 0)────────► complete
//! ```
//!
//! Every transition checks its preconditions and reports violations as
//! [`ProtocolError`]s without touching either device. Discovery and
//! transmission succeed with configurable probabilities drawn from the
//! caller's RNG.

use std::sync::Arc;

use oppnet_core::ParameterError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::{Device, Phase};
use crate::error::ProtocolError;
use crate::events::{CommunicationEvent, CommunicationListener};
use crate::population::{DeviceHandle, Population};

/// Protocol timing and reliability parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommConfig {
    /// Seconds spent setting up the channel before discovery
    pub channel_setup_time: f64,
    /// Size of the metadata exchanged in each direction
    pub metadata_size: f64,
    /// Size of one artifact
    pub artifact_size: f64,
    /// Channel bit rate; the byte rate is an eighth of it
    pub data_rate: f64,
    /// Probability that a completed transfer is committed
    pub transmission_success_rate: f64,
    /// Probability that the peers discover each other after setup
    pub hardware_discovery_success_rate: f64,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            channel_setup_time: 0.5,
            metadata_size: 0.1,
            artifact_size: 3.0,
            data_rate: 250.0,
            transmission_success_rate: 0.95,
            hardware_discovery_success_rate: 0.95,
        }
    }
}

impl CommConfig {
    pub fn with_channel_setup_time(mut self, seconds: f64) -> Self {
        self.channel_setup_time = seconds;
        self
    }

    pub fn with_discovery_success_rate(mut self, rate: f64) -> Self {
        self.hardware_discovery_success_rate = rate;
        self
    }

    pub fn with_transmission_success_rate(mut self, rate: f64) -> Self {
        self.transmission_success_rate = rate;
        self
    }

    pub fn validate(&self) -> Result<(), ParameterError> {
        for (name, value) in [
            ("channel_setup_time", self.channel_setup_time),
            ("metadata_size", self.metadata_size),
            ("artifact_size", self.artifact_size),
        ] {
            if value.is_nan() || value < 0.0 {
                return Err(ParameterError::Negative { name, value });
            }
        }
        if self.data_rate.is_nan() || self.data_rate <= 0.0 {
            return Err(ParameterError::NonPositive {
                name: "data_rate",
                value: self.data_rate,
            });
        }
        for (name, value) in [
            ("transmission_success_rate", self.transmission_success_rate),
            (
                "hardware_discovery_success_rate",
                self.hardware_discovery_success_rate,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ParameterError::ProbabilityOutOfRange { name, value });
            }
        }
        Ok(())
    }

    pub fn byte_rate(&self) -> f64 {
        self.data_rate / 8.0
    }

    /// Transmission time for `artifacts` artifacts moving in either direction
    ///
    /// Half duplex: metadata goes one way, then the other, then the
    /// artifacts follow.
    pub fn session_duration(&self, artifacts: usize) -> f64 {
        let byte_rate = self.byte_rate();
        2.0 * (self.metadata_size / byte_rate) + (self.artifact_size * artifacts as f64) / byte_rate
    }
}

/// Drives session transitions for pairs of devices
pub struct CommunicationController {
    config: CommConfig,
    listeners: Vec<Arc<dyn CommunicationListener>>,
}

impl std::fmt::Debug for CommunicationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommunicationController")
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl CommunicationController {
    pub fn new(config: CommConfig) -> Self {
        Self {
            config,
            listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    pub(crate) fn set_config(&mut self, config: CommConfig) {
        self.config = config;
    }

    pub fn add_listener(&mut self, listener: Arc<dyn CommunicationListener>) {
        self.listeners.push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn emit(&self, event: CommunicationEvent<'_>) {
        for listener in &self.listeners {
            listener.on_communication(&event);
        }
    }

    /// Open a session between two idle devices in mutual range
    ///
    /// At least one of them must be a mobile object. Both enter
    /// `INITIATION` for the channel setup time.
    pub fn initiate(
        &self,
        devices: &mut Population,
        a: DeviceHandle,
        b: DeviceHandle,
    ) -> Result<(), ProtocolError> {
        let setup = self.config.channel_setup_time;
        let (first, second) = devices.pair_mut(a, b)?;
        for device in [&*first, &*second] {
            if device.is_communicating() {
                return Err(ProtocolError::AlreadyCommunicating(device.id()));
            }
        }
        if !first.is_mobile() && !second.is_mobile() {
            return Err(ProtocolError::NoMobileParticipant {
                first: first.id(),
                second: second.id(),
            });
        }
        if !first.in_mutual_range(second) {
            return Err(ProtocolError::OutOfRange {
                first: first.id(),
                second: second.id(),
            });
        }

        first.begin_initiation(b, setup);
        second.begin_initiation(a, setup);
        debug!(first = %first.id(), second = %second.id(), "session initiated");

        self.emit(CommunicationEvent::Initiated {
            first: &devices[a],
            second: &devices[b],
        });
        Ok(())
    }

    /// Finish channel setup: succeed into `TRANSMISSION` or drop the session
    ///
    /// Fails outright when the pair has drifted out of range; otherwise one
    /// draw against the hardware discovery rate decides. On success each
    /// side is armed with the artifacts it lacks from the other and both
    /// count down the transfer time. Returns whether discovery succeeded.
    pub fn attempt_discovery<R: Rng + ?Sized>(
        &self,
        devices: &mut Population,
        a: DeviceHandle,
        b: DeviceHandle,
        rng: &mut R,
    ) -> Result<bool, ProtocolError> {
        {
            let (first, second) = devices.pair(a, b)?;
            check_session(first, second, a, b, Phase::Initiation)?;
            check_time_elapsed(first, second)?;
        }

        let (first, second) = devices.pair_mut(a, b)?;
        let discovered = first.in_mutual_range(second)
            && rng.random::<f64>() < self.config.hardware_discovery_success_rate;

        if !discovered {
            first.end_session();
            second.end_session();
            debug!(first = %first.id(), second = %second.id(), "discovery failed");
            self.emit(CommunicationEvent::DiscoveryFailed {
                first: &devices[a],
                second: &devices[b],
            });
            return Ok(false);
        }

        let to_first = first.artifacts_wanted_from(second);
        let to_second = second.artifacts_wanted_from(first);
        let duration = self.config.session_duration(to_first.len() + to_second.len());
        first.begin_transmission(duration, to_first);
        second.begin_transmission(duration, to_second);
        debug!(
            first = %first.id(),
            second = %second.id(),
            duration,
            "discovery succeeded"
        );

        let (first, second) = (&devices[a], &devices[b]);
        self.emit(CommunicationEvent::DiscoverySucceeded {
            first,
            second,
            to_first: first.pending().unwrap_or_default(),
            to_second: second.pending().unwrap_or_default(),
        });
        Ok(true)
    }

    /// Finish a transfer that ran its full time while in range
    ///
    /// One draw against the transmission rate decides whether both sides
    /// commit what they received. The session ends either way. Returns
    /// whether the artifacts were committed.
    pub fn complete<R: Rng + ?Sized>(
        &self,
        devices: &mut Population,
        a: DeviceHandle,
        b: DeviceHandle,
        rng: &mut R,
    ) -> Result<bool, ProtocolError> {
        {
            let (first, second) = devices.pair(a, b)?;
            check_session(first, second, a, b, Phase::Transmission)?;
            check_time_elapsed(first, second)?;
            if !first.in_mutual_range(second) {
                return Err(ProtocolError::OutOfRange {
                    first: first.id(),
                    second: second.id(),
                });
            }
        }

        let (first, second) = devices.pair_mut(a, b)?;
        let success = rng.random::<f64>() < self.config.transmission_success_rate;
        let to_first = first.end_session();
        let to_second = second.end_session();

        if success {
            first.commit(&to_first)?;
            second.commit(&to_second)?;
            debug!(
                first = %first.id(),
                second = %second.id(),
                artifacts = to_first.len() + to_second.len(),
                "transmission succeeded"
            );
            self.emit(CommunicationEvent::TransmissionSucceeded {
                first: &devices[a],
                second: &devices[b],
                to_first: &to_first,
                to_second: &to_second,
            });
        } else {
            debug!(first = %first.id(), second = %second.id(), "transmission failed");
            self.emit(CommunicationEvent::TransmissionFailed {
                first: &devices[a],
                second: &devices[b],
                to_first: &to_first,
                to_second: &to_second,
            });
        }
        Ok(success)
    }

    /// Drop a transfer whose devices moved out of mutual range
    ///
    /// Sessions still in `INITIATION` cannot be aborted.
    pub fn abort(
        &self,
        devices: &mut Population,
        a: DeviceHandle,
        b: DeviceHandle,
    ) -> Result<(), ProtocolError> {
        {
            let (first, second) = devices.pair(a, b)?;
            check_session(first, second, a, b, Phase::Transmission)?;
            if first.in_mutual_range(second) {
                return Err(ProtocolError::StillInRange {
                    first: first.id(),
                    second: second.id(),
                });
            }
            debug!(first = %first.id(), second = %second.id(), "session aborted");
            self.emit(CommunicationEvent::Aborted {
                first,
                second,
                to_first: first.pending().unwrap_or_default(),
                to_second: second.pending().unwrap_or_default(),
            });
        }

        let (first, second) = devices.pair_mut(a, b)?;
        first.end_session();
        second.end_session();
        Ok(())
    }
}

/// Both devices are in `phase` and name each other as partner
fn check_session(
    first: &Device,
    second: &Device,
    a: DeviceHandle,
    b: DeviceHandle,
    phase: Phase,
) -> Result<(), ProtocolError> {
    if a == b {
        return Err(ProtocolError::SelfPairing(first.id()));
    }
    for (device, partner, expected_partner) in [(first, second, b), (second, first, a)] {
        let session = device
            .session()
            .ok_or(ProtocolError::NotCommunicating(device.id()))?;
        if session.partner() != expected_partner {
            return Err(ProtocolError::PartnerMismatch {
                device: device.id(),
                partner: partner.id(),
            });
        }
        if session.phase() != phase {
            return Err(ProtocolError::WrongPhase {
                device: device.id(),
                expected: phase,
                actual: session.phase(),
            });
        }
    }
    Ok(())
}

fn check_time_elapsed(first: &Device, second: &Device) -> Result<(), ProtocolError> {
    for device in [first, second] {
        if device.time_left() > 0.0 {
            return Err(ProtocolError::TimeRemaining {
                device: device.id(),
                remaining: device.time_left(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeviceIdAllocator;
    use oppnet_core::{Artifact, MapBuilder, NodeId, Point, ResourceId};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// Mobile object at handle 0, beacons at 1 and 2, source at 3, all close together
    fn population() -> Population {
        let map = MapBuilder::line(2, 10.0).unwrap();
        let mut ids = DeviceIdAllocator::new();
        let mut pop = Population::new();
        pop.set_mobile_objects(vec![
            Device::mobile_object(&mut ids, &map, NodeId(0), NodeId(1)).unwrap(),
        ])
        .unwrap();
        pop.set_beacons(vec![
            Device::beacon(&mut ids, Point::new(3.0, 0.0)),
            Device::beacon(&mut ids, Point::new(0.0, 3.0)),
        ])
        .unwrap();
        pop.set_information_sources(vec![Device::information_source(
            &mut ids,
            Point::new(0.0, 4.0),
            ResourceId::new(7).unwrap(),
        )])
        .unwrap();
        pop
    }

    const MOBILE: DeviceHandle = DeviceHandle(0);
    const BEACON: DeviceHandle = DeviceHandle(1);
    const OTHER_BEACON: DeviceHandle = DeviceHandle(2);
    const SOURCE: DeviceHandle = DeviceHandle(3);

    fn reliable() -> CommunicationController {
        CommunicationController::new(
            CommConfig::default()
                .with_discovery_success_rate(1.0)
                .with_transmission_success_rate(1.0),
        )
    }

    fn run_out_clock(pop: &mut Population, dt: f64) {
        for device in pop.all_mut() {
            device.advance_communication(dt);
        }
    }

    #[test]
    fn test_default_config() {
        let config = CommConfig::default();
        assert_eq!(config.channel_setup_time, 0.5);
        assert_eq!(config.byte_rate(), 31.25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_duration_formula() {
        let config = CommConfig::default();
        let metadata = 2.0 * 0.1 / 31.25;
        assert!((config.session_duration(0) - metadata).abs() < 1e-12);
        assert!((config.session_duration(2) - (metadata + 6.0 / 31.25)).abs() < 1e-12);
    }

    #[test]
    fn test_config_validation() {
        assert!(matches!(
            CommConfig::default().with_transmission_success_rate(-0.1).validate(),
            Err(ParameterError::ProbabilityOutOfRange { name: "transmission_success_rate", .. })
        ));
        assert!(matches!(
            CommConfig::default().with_channel_setup_time(-1.0).validate(),
            Err(ParameterError::Negative { name: "channel_setup_time", .. })
        ));
        let config = CommConfig {
            data_rate: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ParameterError::NonPositive { .. })));
    }

    #[test]
    fn test_initiate_preconditions() {
        let controller = reliable();
        let mut pop = population();

        assert!(matches!(
            controller.initiate(&mut pop, BEACON, OTHER_BEACON),
            Err(ProtocolError::NoMobileParticipant { .. })
        ));
        assert!(matches!(
            controller.initiate(&mut pop, MOBILE, MOBILE),
            Err(ProtocolError::SelfPairing(_))
        ));

        controller.initiate(&mut pop, MOBILE, BEACON).unwrap();
        assert_eq!(pop[MOBILE].phase(), Some(Phase::Initiation));
        assert_eq!(pop[BEACON].partner(), Some(MOBILE));
        assert_eq!(pop[MOBILE].time_left(), 0.5);

        assert!(matches!(
            controller.initiate(&mut pop, MOBILE, SOURCE),
            Err(ProtocolError::AlreadyCommunicating(_))
        ));
    }

    #[test]
    fn test_initiate_requires_mutual_range() {
        let controller = reliable();
        let mut pop = population();
        pop.get_mut(BEACON).unwrap().set_range(1.0).unwrap();
        assert!(matches!(
            controller.initiate(&mut pop, MOBILE, BEACON),
            Err(ProtocolError::OutOfRange { .. })
        ));
        assert!(!pop[MOBILE].is_communicating(), "failed initiation changes nothing");
    }

    #[test]
    fn test_discovery_needs_elapsed_setup() {
        let controller = reliable();
        let mut pop = population();
        let mut rng = StdRng::seed_from_u64(1);
        controller.initiate(&mut pop, MOBILE, BEACON).unwrap();

        assert!(matches!(
            controller.attempt_discovery(&mut pop, MOBILE, BEACON, &mut rng),
            Err(ProtocolError::TimeRemaining { .. })
        ));
        assert!(matches!(
            controller.attempt_discovery(&mut pop, MOBILE, SOURCE, &mut rng),
            Err(ProtocolError::PartnerMismatch { .. })
        ));

        run_out_clock(&mut pop, 0.5);
        assert!(controller.attempt_discovery(&mut pop, MOBILE, BEACON, &mut rng).unwrap());
        assert_eq!(pop[MOBILE].phase(), Some(Phase::Transmission));
        assert_eq!(pop[BEACON].phase(), Some(Phase::Transmission));
    }

    #[test]
    fn test_discovery_with_source_generates_one_artifact() {
        let controller = reliable();
        let mut pop = population();
        let mut rng = StdRng::seed_from_u64(2);
        controller.initiate(&mut pop, SOURCE, MOBILE).unwrap();
        run_out_clock(&mut pop, 0.5);
        controller.attempt_discovery(&mut pop, SOURCE, MOBILE, &mut rng).unwrap();

        let to_mobile = pop[MOBILE].pending().unwrap();
        assert_eq!(to_mobile.len(), 1);
        assert_eq!(to_mobile[0].resource(), ResourceId::new(7).unwrap());
        assert_eq!(to_mobile[0].age(), 0.0);
        assert!(pop[SOURCE].pending().unwrap().is_empty());
        assert!((pop[MOBILE].time_left() - CommConfig::default().session_duration(1)).abs() < 1e-12);
    }

    #[test]
    fn test_discovery_fails_out_of_range_or_at_zero_rate() {
        let mut pop = population();
        let mut rng = StdRng::seed_from_u64(3);
        let never = CommunicationController::new(CommConfig::default().with_discovery_success_rate(0.0));
        never.initiate(&mut pop, MOBILE, BEACON).unwrap();
        run_out_clock(&mut pop, 1.0);
        assert!(!never.attempt_discovery(&mut pop, MOBILE, BEACON, &mut rng).unwrap());
        assert!(!pop[MOBILE].is_communicating());
        assert!(!pop[BEACON].is_communicating());

        let controller = reliable();
        controller.initiate(&mut pop, MOBILE, BEACON).unwrap();
        run_out_clock(&mut pop, 1.0);
        pop.get_mut(BEACON).unwrap().set_location(Point::new(500.0, 0.0));
        assert!(!controller.attempt_discovery(&mut pop, MOBILE, BEACON, &mut rng).unwrap());
        assert!(!pop[BEACON].is_communicating());
    }

    #[test]
    fn test_complete_commits_both_ways() {
        let controller = reliable();
        let mut pop = population();
        let mut rng = StdRng::seed_from_u64(4);
        let r1 = ResourceId::new(1).unwrap();
        let r2 = ResourceId::new(2).unwrap();
        pop.get_mut(MOBILE).unwrap().store_mut().unwrap().add(Artifact::fresh(r1)).unwrap();
        pop.get_mut(BEACON).unwrap().store_mut().unwrap().add(Artifact::fresh(r2)).unwrap();

        controller.initiate(&mut pop, MOBILE, BEACON).unwrap();
        run_out_clock(&mut pop, 0.5);
        controller.attempt_discovery(&mut pop, MOBILE, BEACON, &mut rng).unwrap();
        assert!(matches!(
            controller.complete(&mut pop, MOBILE, BEACON, &mut rng),
            Err(ProtocolError::TimeRemaining { .. })
        ));
        run_out_clock(&mut pop, 1.0);
        assert!(controller.complete(&mut pop, MOBILE, BEACON, &mut rng).unwrap());

        for handle in [MOBILE, BEACON] {
            let store = pop[handle].store().unwrap();
            assert!(store.contains(r1) && store.contains(r2));
            assert!(!pop[handle].is_communicating());
        }
    }

    #[test]
    fn test_complete_at_zero_rate_commits_nothing() {
        let controller = CommunicationController::new(
            CommConfig::default()
                .with_discovery_success_rate(1.0)
                .with_transmission_success_rate(0.0),
        );
        let mut pop = population();
        let mut rng = StdRng::seed_from_u64(5);
        controller.initiate(&mut pop, MOBILE, SOURCE).unwrap();
        run_out_clock(&mut pop, 0.5);
        controller.attempt_discovery(&mut pop, MOBILE, SOURCE, &mut rng).unwrap();
        run_out_clock(&mut pop, 1.0);

        assert!(!controller.complete(&mut pop, MOBILE, SOURCE, &mut rng).unwrap());
        assert!(pop[MOBILE].store().unwrap().is_empty());
        assert!(!pop[MOBILE].is_communicating());
        assert!(!pop[SOURCE].is_communicating());
    }

    #[test]
    fn test_abort_rules() {
        let controller = reliable();
        let mut pop = population();
        let mut rng = StdRng::seed_from_u64(6);
        controller.initiate(&mut pop, MOBILE, BEACON).unwrap();

        pop.get_mut(BEACON).unwrap().set_location(Point::new(500.0, 0.0));
        assert!(matches!(
            controller.abort(&mut pop, MOBILE, BEACON),
            Err(ProtocolError::WrongPhase { expected: Phase::Transmission, actual: Phase::Initiation, .. })
        ), "setup cannot be aborted");

        pop.get_mut(BEACON).unwrap().set_location(Point::new(3.0, 0.0));
        run_out_clock(&mut pop, 0.5);
        controller.attempt_discovery(&mut pop, MOBILE, BEACON, &mut rng).unwrap();
        assert!(matches!(
            controller.abort(&mut pop, MOBILE, BEACON),
            Err(ProtocolError::StillInRange { .. })
        ));

        pop.get_mut(BEACON).unwrap().set_location(Point::new(500.0, 0.0));
        run_out_clock(&mut pop, 1.0);
        assert!(matches!(
            controller.complete(&mut pop, MOBILE, BEACON, &mut rng),
            Err(ProtocolError::OutOfRange { .. })
        ));
        controller.abort(&mut pop, MOBILE, BEACON).unwrap();
        assert!(!pop[MOBILE].is_communicating());
        assert!(!pop[BEACON].is_communicating());
    }

    #[test]
    fn test_transitions_on_idle_devices() {
        let controller = reliable();
        let mut pop = population();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            controller.attempt_discovery(&mut pop, MOBILE, BEACON, &mut rng),
            Err(ProtocolError::NotCommunicating(pop[MOBILE].id()))
        );
        assert_eq!(
            controller.abort(&mut pop, MOBILE, BEACON),
            Err(ProtocolError::NotCommunicating(pop[MOBILE].id()))
        );
    }
}
