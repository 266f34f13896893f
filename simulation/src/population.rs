//! The simulator's device table
//!
//! All devices live in one vector grouped as mobile objects, then beacons,
//! then information sources. The three sub-collections are slices of that
//! vector, so the all-devices view always has exactly their combined size.
//! Session partners refer to each other by [`DeviceHandle`], an index into
//! the table.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::device::{Device, DeviceId, DeviceType};
use crate::error::{ProtocolError, ScenarioError};

/// Index of a device in the population
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceHandle(pub usize);

impl DeviceHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Devices grouped by variant
#[derive(Debug, Clone, Default)]
pub struct Population {
    devices: Vec<Device>,
    mobile_count: usize,
    beacon_count: usize,
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mobile_objects(&self) -> &[Device] {
        &self.devices[..self.mobile_count]
    }

    pub fn beacons(&self) -> &[Device] {
        &self.devices[self.mobile_count..self.sources_start()]
    }

    pub fn information_sources(&self) -> &[Device] {
        &self.devices[self.sources_start()..]
    }

    /// Every device, mobile objects first
    pub fn all(&self) -> &[Device] {
        &self.devices
    }

    pub(crate) fn mobile_objects_mut(&mut self) -> &mut [Device] {
        &mut self.devices[..self.mobile_count]
    }

    pub(crate) fn all_mut(&mut self) -> &mut [Device] {
        &mut self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = DeviceHandle> + '_ {
        (0..self.devices.len()).map(DeviceHandle)
    }

    pub fn get(&self, handle: DeviceHandle) -> Option<&Device> {
        self.devices.get(handle.0)
    }

    pub fn get_mut(&mut self, handle: DeviceHandle) -> Option<&mut Device> {
        self.devices.get_mut(handle.0)
    }

    /// Look up a device, failing with a protocol error for a stale handle
    pub fn try_get(&self, handle: DeviceHandle) -> Result<&Device, ProtocolError> {
        self.get(handle).ok_or(ProtocolError::UnknownDevice(handle.0))
    }

    pub fn find(&self, id: DeviceId) -> Option<(DeviceHandle, &Device)> {
        self.devices
            .iter()
            .enumerate()
            .find(|(_, d)| d.id() == id)
            .map(|(idx, d)| (DeviceHandle(idx), d))
    }

    /// Both devices of a pair, mutably
    pub(crate) fn pair_mut(
        &mut self,
        a: DeviceHandle,
        b: DeviceHandle,
    ) -> Result<(&mut Device, &mut Device), ProtocolError> {
        let len = self.devices.len();
        for handle in [a, b] {
            if handle.0 >= len {
                return Err(ProtocolError::UnknownDevice(handle.0));
            }
        }
        if a == b {
            return Err(ProtocolError::SelfPairing(self.devices[a.0].id()));
        }
        if a.0 < b.0 {
            let (low, high) = self.devices.split_at_mut(b.0);
            Ok((&mut low[a.0], &mut high[0]))
        } else {
            let (low, high) = self.devices.split_at_mut(a.0);
            Ok((&mut high[0], &mut low[b.0]))
        }
    }

    /// Both devices of a pair
    pub fn pair(
        &self,
        a: DeviceHandle,
        b: DeviceHandle,
    ) -> Result<(&Device, &Device), ProtocolError> {
        Ok((self.try_get(a)?, self.try_get(b)?))
    }

    /// Every active session once, as (lower handle, higher handle)
    pub fn session_pairs(&self) -> Vec<(DeviceHandle, DeviceHandle)> {
        self.devices
            .iter()
            .enumerate()
            .filter_map(|(idx, d)| {
                let partner = d.partner()?;
                (idx < partner.0).then_some((DeviceHandle(idx), partner))
            })
            .collect()
    }

    pub fn communicating_count(&self) -> usize {
        self.devices.iter().filter(|d| d.is_communicating()).count()
    }

    pub fn set_mobile_objects(&mut self, devices: Vec<Device>) -> Result<(), ScenarioError> {
        check_type(&devices, DeviceType::MobileObject)?;
        let range = 0..self.mobile_count;
        self.replace(range, devices, |p, n| p.mobile_count = n)
    }

    pub fn set_beacons(&mut self, devices: Vec<Device>) -> Result<(), ScenarioError> {
        check_type(&devices, DeviceType::Beacon)?;
        let range = self.mobile_count..self.sources_start();
        self.replace(range, devices, |p, n| p.beacon_count = n)
    }

    /// Replace the information sources; resources and locations must be distinct
    pub fn set_information_sources(&mut self, devices: Vec<Device>) -> Result<(), ScenarioError> {
        check_type(&devices, DeviceType::InformationSource)?;
        let mut resources = HashSet::new();
        for (idx, device) in devices.iter().enumerate() {
            if let Some(resource) = device.resource() {
                if !resources.insert(resource) {
                    return Err(ScenarioError::DuplicateResource(resource));
                }
            }
            if devices[..idx].iter().any(|d| d.location() == device.location()) {
                return Err(ScenarioError::DuplicateLocation(device.id()));
            }
        }
        let range = self.sources_start()..self.devices.len();
        self.replace(range, devices, |_, _| {})
    }

    /// Splice `devices` over `range` and drop every session
    ///
    /// Handles shift when a collection changes size, so sessions cannot
    /// survive a replacement.
    fn replace(
        &mut self,
        range: std::ops::Range<usize>,
        devices: Vec<Device>,
        set_count: impl FnOnce(&mut Self, usize),
    ) -> Result<(), ScenarioError> {
        let mut seen: HashSet<DeviceId> = self.devices[..range.start]
            .iter()
            .chain(&self.devices[range.end..])
            .map(Device::id)
            .collect();
        for device in &devices {
            if !seen.insert(device.id()) {
                return Err(ScenarioError::DuplicateDevice(device.id()));
            }
        }

        let count = devices.len();
        self.devices.splice(range, devices);
        set_count(self, count);
        for device in &mut self.devices {
            device.end_session();
        }
        Ok(())
    }

    fn sources_start(&self) -> usize {
        self.mobile_count + self.beacon_count
    }
}

fn check_type(devices: &[Device], expected: DeviceType) -> Result<(), ScenarioError> {
    match devices.iter().find(|d| d.device_type() != expected) {
        Some(d) => Err(ScenarioError::WrongDeviceType {
            device: d.id(),
            expected,
            actual: d.device_type(),
        }),
        None => Ok(()),
    }
}

impl std::ops::Index<DeviceHandle> for Population {
    type Output = Device;

    fn index(&self, handle: DeviceHandle) -> &Device {
        &self.devices[handle.0]
    }
}
