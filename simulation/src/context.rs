//! Per-experiment state shared by everything that assembles a simulation
//!
//! A [`SimulationContext`] owns the device id counter, the random number
//! generator and the communication controller. Independent runs use
//! independent contexts, so nothing leaks between experiments; resetting the
//! id counter makes repeated experiments number their devices identically.

use oppnet_core::ParameterError;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::comm::{CommConfig, CommunicationController};
use crate::device::DeviceId;

/// Hands out device ids, starting at 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdAllocator {
    next: u64,
}

impl Default for DeviceIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceIdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> DeviceId {
        let id = DeviceId(self.next);
        self.next += 1;
        id
    }

    /// The id the next device will receive
    pub fn peek(&self) -> DeviceId {
        DeviceId(self.next)
    }

    /// Start numbering from 1 again
    pub fn reset(&mut self) {
        self.next = 1;
    }
}

/// Id counter, RNG and protocol controller for one experiment
#[derive(Debug)]
pub struct SimulationContext {
    ids: DeviceIdAllocator,
    rng: StdRng,
    controller: CommunicationController,
}

impl Default for SimulationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationContext {
    /// Context seeded from OS entropy
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Deterministic context: equal seeds replay equal runs
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            ids: DeviceIdAllocator::new(),
            rng,
            controller: CommunicationController::new(CommConfig::default()),
        }
    }

    /// Replace the protocol parameters
    pub fn with_comm_config(mut self, config: CommConfig) -> Result<Self, ParameterError> {
        config.validate()?;
        self.controller.set_config(config);
        Ok(self)
    }

    pub fn ids(&self) -> &DeviceIdAllocator {
        &self.ids
    }

    pub fn ids_mut(&mut self) -> &mut DeviceIdAllocator {
        &mut self.ids
    }

    pub fn reset_ids(&mut self) {
        self.ids.reset();
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Restart the random stream from `seed`
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn controller(&self) -> &CommunicationController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut CommunicationController {
        &mut self.controller
    }

    pub(crate) fn ids_and_rng(&mut self) -> (&mut DeviceIdAllocator, &mut StdRng) {
        (&mut self.ids, &mut self.rng)
    }

    pub(crate) fn controller_and_rng(&mut self) -> (&CommunicationController, &mut StdRng) {
        (&self.controller, &mut self.rng)
    }
}
