//! Wireless devices: mobile objects, beacons and information sources
//!
//! Every device has an id, a location and a communication range. While it
//! takes part in a session it also carries a [`Session`] naming its partner,
//! the protocol phase, the time left in that phase and the artifacts it
//! will commit when the transfer completes.

use oppnet_core::{
    Artifact, ArtifactContainer, MapError, MobilityMap, NodeId, ParameterError, Point, ResourceId,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::context::DeviceIdAllocator;
use crate::error::{ProtocolError, ScenarioError};
use crate::mobility::Mobility;
use crate::population::DeviceHandle;

/// Default communication range in distance units
pub const DEFAULT_RANGE: f64 = 20.0;

/// Identity of a device, unique within one allocation epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three device variants without their payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    MobileObject,
    Beacon,
    InformationSource,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::MobileObject => write!(f, "mobile object"),
            DeviceType::Beacon => write!(f, "beacon"),
            DeviceType::InformationSource => write!(f, "information source"),
        }
    }
}

/// Protocol phase of a communicating device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Channel setup; ends in a discovery attempt
    Initiation,
    /// Artifact transfer; ends in completion or abort
    Transmission,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Initiation => write!(f, "INITIATION"),
            Phase::Transmission => write!(f, "TRANSMISSION"),
        }
    }
}

/// Transient state of a device taking part in a session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    partner: DeviceHandle,
    phase: Phase,
    time_left: f64,
    /// Artifacts this device commits on success; empty during initiation
    pending: Vec<Artifact>,
}

impl Session {
    pub fn partner(&self) -> DeviceHandle {
        self.partner
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn time_left(&self) -> f64 {
        self.time_left
    }

    pub fn pending(&self) -> &[Artifact] {
        &self.pending
    }
}

/// Variant-specific device state
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceKind {
    /// Walks the map and stores what it receives
    MobileObject {
        mobility: Mobility,
        store: ArtifactContainer,
    },
    /// Stationary store
    Beacon { store: ArtifactContainer },
    /// Stationary generator of one resource; never receives
    InformationSource { resource: ResourceId },
}

/// A simulated wireless device
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    id: DeviceId,
    location: Point,
    range: f64,
    kind: DeviceKind,
    session: Option<Session>,
}

impl Device {
    /// A mobile object standing on `source`, heading for `destination`
    pub fn mobile_object(
        ids: &mut DeviceIdAllocator,
        map: &MobilityMap,
        source: NodeId,
        destination: NodeId,
    ) -> Result<Self, ScenarioError> {
        let id = ids.next_id();
        let location = map
            .node(source)
            .ok_or(ScenarioError::UnknownNode { device: id, node: source })?
            .location();
        let device = Self {
            id,
            location,
            range: DEFAULT_RANGE,
            kind: DeviceKind::MobileObject {
                mobility: Mobility::new(source, destination),
                store: ArtifactContainer::new(),
            },
            session: None,
        };
        device.validate_on(map)?;
        Ok(device)
    }

    pub fn beacon(ids: &mut DeviceIdAllocator, location: Point) -> Self {
        Self {
            id: ids.next_id(),
            location,
            range: DEFAULT_RANGE,
            kind: DeviceKind::Beacon {
                store: ArtifactContainer::new(),
            },
            session: None,
        }
    }

    pub fn information_source(
        ids: &mut DeviceIdAllocator,
        location: Point,
        resource: ResourceId,
    ) -> Self {
        Self {
            id: ids.next_id(),
            location,
            range: DEFAULT_RANGE,
            kind: DeviceKind::InformationSource { resource },
            session: None,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn location(&self) -> Point {
        self.location
    }

    pub fn set_location(&mut self, location: Point) {
        self.location = location;
    }

    pub fn range(&self) -> f64 {
        self.range
    }

    pub fn set_range(&mut self, range: f64) -> Result<(), ParameterError> {
        if range.is_nan() || range < 0.0 {
            return Err(ParameterError::NegativeRange(range));
        }
        self.range = range;
        Ok(())
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    pub fn device_type(&self) -> DeviceType {
        match self.kind {
            DeviceKind::MobileObject { .. } => DeviceType::MobileObject,
            DeviceKind::Beacon { .. } => DeviceType::Beacon,
            DeviceKind::InformationSource { .. } => DeviceType::InformationSource,
        }
    }

    pub fn is_mobile(&self) -> bool {
        matches!(self.kind, DeviceKind::MobileObject { .. })
    }

    /// Stored artifacts; information sources have no store
    pub fn store(&self) -> Option<&ArtifactContainer> {
        match &self.kind {
            DeviceKind::MobileObject { store, .. } | DeviceKind::Beacon { store } => Some(store),
            DeviceKind::InformationSource { .. } => None,
        }
    }

    pub fn store_mut(&mut self) -> Option<&mut ArtifactContainer> {
        match &mut self.kind {
            DeviceKind::MobileObject { store, .. } | DeviceKind::Beacon { store } => Some(store),
            DeviceKind::InformationSource { .. } => None,
        }
    }

    pub fn mobility(&self) -> Option<&Mobility> {
        match &self.kind {
            DeviceKind::MobileObject { mobility, .. } => Some(mobility),
            _ => None,
        }
    }

    pub fn mobility_mut(&mut self) -> Option<&mut Mobility> {
        match &mut self.kind {
            DeviceKind::MobileObject { mobility, .. } => Some(mobility),
            _ => None,
        }
    }

    /// Resource generated by an information source
    pub fn resource(&self) -> Option<ResourceId> {
        match self.kind {
            DeviceKind::InformationSource { resource } => Some(resource),
            _ => None,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_communicating(&self) -> bool {
        self.session.is_some()
    }

    pub fn partner(&self) -> Option<DeviceHandle> {
        self.session.as_ref().map(Session::partner)
    }

    pub fn phase(&self) -> Option<Phase> {
        self.session.as_ref().map(Session::phase)
    }

    /// Remaining time in the current phase, 0 when not communicating
    pub fn time_left(&self) -> f64 {
        self.session.as_ref().map_or(0.0, Session::time_left)
    }

    /// Artifacts awaiting commit, present only during transmission
    pub fn pending(&self) -> Option<&[Artifact]> {
        match &self.session {
            Some(s) if s.phase == Phase::Transmission => Some(&s.pending),
            _ => None,
        }
    }

    /// Whether `other` lies within this device's range
    ///
    /// Reach is not symmetric: ranges may differ.
    pub fn can_reach(&self, other: &Device) -> bool {
        self.location.distance_to(&other.location) <= self.range
    }

    pub fn in_mutual_range(&self, other: &Device) -> bool {
        self.can_reach(other) && other.can_reach(self)
    }

    /// Check a mobile object's route against `map`; other variants always pass
    pub fn validate_on(&self, map: &MobilityMap) -> Result<(), ScenarioError> {
        let Some(mobility) = self.mobility() else {
            return Ok(());
        };
        for node in [mobility.source(), mobility.destination()] {
            if !map.contains(node) {
                return Err(ScenarioError::UnknownNode { device: self.id, node });
            }
        }
        if !map.is_linked(mobility.source(), mobility.destination()) {
            return Err(ScenarioError::NotLinked {
                device: self.id,
                from: mobility.source(),
                to: mobility.destination(),
            });
        }
        Ok(())
    }

    /// A fresh version of the source's resource
    pub fn generate_artifact(&self) -> Option<Artifact> {
        self.resource().map(Artifact::fresh)
    }

    /// Artifacts this device should receive from `sender`
    ///
    /// An information source receives nothing; from an information source
    /// a device receives one freshly generated artifact. Between two stores
    /// it is whatever `sender` holds that this device lacks or holds an
    /// older version of.
    pub fn artifacts_wanted_from(&self, sender: &Device) -> Vec<Artifact> {
        match (&self.kind, &sender.kind) {
            (DeviceKind::InformationSource { .. }, _) => Vec::new(),
            (_, DeviceKind::InformationSource { resource }) => vec![Artifact::fresh(*resource)],
            _ => match (self.store(), sender.store()) {
                (Some(ours), Some(theirs)) => ours.transfer_from(theirs),
                _ => Vec::new(),
            },
        }
    }

    pub(crate) fn advance_mobility<R: Rng + ?Sized>(
        &mut self,
        map: &MobilityMap,
        dt: f64,
        rng: &mut R,
    ) -> Result<(), MapError> {
        let Device { location, kind, .. } = self;
        match kind {
            DeviceKind::MobileObject { mobility, .. } => mobility.advance(location, map, dt, rng),
            _ => Ok(()),
        }
    }

    /// Age stored and in-flight artifacts and count down the current phase
    pub(crate) fn advance_communication(&mut self, dt: f64) {
        if let Some(store) = self.store_mut() {
            store.advance_ages(dt);
        }
        if let Some(session) = &mut self.session {
            for artifact in &mut session.pending {
                artifact.advance_age(dt);
            }
            session.time_left = (session.time_left - dt).max(0.0);
        }
    }

    pub(crate) fn begin_initiation(&mut self, partner: DeviceHandle, setup_time: f64) {
        self.session = Some(Session {
            partner,
            phase: Phase::Initiation,
            time_left: setup_time,
            pending: Vec::new(),
        });
    }

    pub(crate) fn begin_transmission(&mut self, duration: f64, pending: Vec<Artifact>) {
        if let Some(session) = &mut self.session {
            session.phase = Phase::Transmission;
            session.time_left = duration;
            session.pending = pending;
        }
    }

    /// Drop the session, returning whatever was pending
    pub(crate) fn end_session(&mut self) -> Vec<Artifact> {
        self.session.take().map(|s| s.pending).unwrap_or_default()
    }

    /// Commit received artifacts into the store
    pub(crate) fn commit(&mut self, artifacts: &[Artifact]) -> Result<(), ProtocolError> {
        let id = self.id;
        match self.store_mut() {
            Some(store) => Ok(store.copy_all(artifacts)?),
            None if artifacts.is_empty() => Ok(()),
            None => Err(ProtocolError::SourceReceiving(id)),
        }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.id,
            device_type: self.device_type(),
            location: self.location,
            range: self.range,
            phase: self.phase(),
            resource: self.resource(),
            artifacts: self.store().map(|s| s.list().to_vec()).unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{} {} at {}>", self.device_type(), self.id, self.location)
    }
}

/// Serializable view of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: DeviceId,
    pub device_type: DeviceType,
    pub location: Point,
    pub range: f64,
    pub phase: Option<Phase>,
    pub resource: Option<ResourceId>,
    pub artifacts: Vec<Artifact>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use oppnet_core::MapBuilder;

    fn rid(id: u32) -> ResourceId {
        ResourceId::new(id).unwrap()
    }

    fn line_map() -> MobilityMap {
        MapBuilder::line(3, 10.0).unwrap()
    }

    #[test]
    fn test_mobile_object_starts_at_source() {
        let map = line_map();
        let mut ids = DeviceIdAllocator::new();
        let d = Device::mobile_object(&mut ids, &map, NodeId(1), NodeId(2)).unwrap();
        assert_eq!(d.location(), map.node(NodeId(1)).unwrap().location());
        assert_eq!(d.range(), DEFAULT_RANGE);
        assert!(d.is_mobile());
        assert!(d.store().unwrap().is_empty());
        assert!(!d.is_communicating());
    }

    #[test]
    fn test_mobile_object_route_checked() {
        let map = line_map();
        let mut ids = DeviceIdAllocator::new();
        assert!(matches!(
            Device::mobile_object(&mut ids, &map, NodeId(0), NodeId(2)),
            Err(ScenarioError::NotLinked { .. })
        ));
        assert!(matches!(
            Device::mobile_object(&mut ids, &map, NodeId(7), NodeId(0)),
            Err(ScenarioError::UnknownNode { node: NodeId(7), .. })
        ));
    }

    #[test]
    fn test_range_is_not_reciprocal() {
        let mut ids = DeviceIdAllocator::new();
        let mut far_reaching = Device::beacon(&mut ids, Point::new(0.0, 0.0));
        let mut short = Device::beacon(&mut ids, Point::new(30.0, 0.0));
        far_reaching.set_range(50.0).unwrap();
        short.set_range(10.0).unwrap();

        assert!(far_reaching.can_reach(&short));
        assert!(!short.can_reach(&far_reaching));
        assert!(!far_reaching.in_mutual_range(&short));

        short.set_range(30.0).unwrap();
        assert!(far_reaching.in_mutual_range(&short), "range boundary is inclusive");
    }

    #[test]
    fn test_negative_range_rejected() {
        let mut ids = DeviceIdAllocator::new();
        let mut d = Device::beacon(&mut ids, Point::default());
        assert_eq!(d.set_range(-1.0), Err(ParameterError::NegativeRange(-1.0)));
        assert!(d.set_range(0.0).is_ok());
    }

    #[test]
    fn test_wanted_artifacts_by_variant() {
        let map = line_map();
        let mut ids = DeviceIdAllocator::new();
        let mut mobile = Device::mobile_object(&mut ids, &map, NodeId(0), NodeId(1)).unwrap();
        let mut beacon = Device::beacon(&mut ids, Point::new(0.0, 5.0));
        let source = Device::information_source(&mut ids, Point::new(5.0, 5.0), rid(4));

        mobile.store_mut().unwrap().add(Artifact::new(rid(1), 2.0).unwrap()).unwrap();
        beacon.store_mut().unwrap().add(Artifact::new(rid(1), 1.0).unwrap()).unwrap();
        beacon.store_mut().unwrap().add(Artifact::new(rid(2), 1.0).unwrap()).unwrap();

        let to_mobile = mobile.artifacts_wanted_from(&beacon);
        assert_eq!(to_mobile.len(), 2, "newer R1 and missing R2");
        assert!(beacon.artifacts_wanted_from(&mobile).is_empty());

        assert_eq!(mobile.artifacts_wanted_from(&source), vec![Artifact::fresh(rid(4))]);
        assert!(source.artifacts_wanted_from(&mobile).is_empty());
    }

    #[test]
    fn test_communication_countdown_clamps() {
        let mut ids = DeviceIdAllocator::new();
        let mut d = Device::beacon(&mut ids, Point::default());
        d.store_mut().unwrap().add(Artifact::fresh(rid(1))).unwrap();
        d.begin_initiation(DeviceHandle(1), 0.25);

        d.advance_communication(0.1);
        assert!((d.time_left() - 0.15).abs() < 1e-12);
        d.advance_communication(0.1);
        d.advance_communication(0.1);
        assert_eq!(d.time_left(), 0.0, "countdown never goes negative");
        assert!((d.store().unwrap().get(rid(1)).unwrap().age() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_pending_visible_only_in_transmission() {
        let mut ids = DeviceIdAllocator::new();
        let mut d = Device::beacon(&mut ids, Point::default());
        d.begin_initiation(DeviceHandle(3), 0.5);
        assert_eq!(d.phase(), Some(Phase::Initiation));
        assert!(d.pending().is_none());

        d.begin_transmission(1.0, vec![Artifact::fresh(rid(2))]);
        assert_eq!(d.phase(), Some(Phase::Transmission));
        assert_eq!(d.pending().unwrap().len(), 1);
        assert_eq!(d.partner(), Some(DeviceHandle(3)));

        let pending = d.end_session();
        assert_eq!(pending.len(), 1);
        assert!(!d.is_communicating());
    }

    #[test]
    fn test_source_refuses_commits() {
        let mut ids = DeviceIdAllocator::new();
        let mut source = Device::information_source(&mut ids, Point::default(), rid(1));
        assert!(source.commit(&[]).is_ok());
        assert_eq!(
            source.commit(&[Artifact::fresh(rid(1))]),
            Err(ProtocolError::SourceReceiving(source.id()))
        );
        assert_eq!(source.generate_artifact(), Some(Artifact::fresh(rid(1))));
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut ids = DeviceIdAllocator::new();
        let mut d = Device::beacon(&mut ids, Point::new(1.0, 2.0));
        d.store_mut().unwrap().add(Artifact::fresh(rid(3))).unwrap();
        let snapshot = d.snapshot();
        assert_eq!(snapshot.device_type, DeviceType::Beacon);
        assert_eq!(snapshot.artifacts.len(), 1);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"Beacon\""));
    }
}
