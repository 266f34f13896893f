//! Fixed-timestep simulation driver
//!
//! Each tick:
//! 1. Every mobile object moves for one timestep
//! 2. Communication: ages and phase clocks advance, due sessions react
//!    (discover, abort or complete), idle devices pair up in random order
//! 3. Time and iteration advance and listeners hear about the tick
//! 4. A pending pause blocks here, between ticks

use std::sync::Arc;

use oppnet_core::{MobilityMap, ParameterError, ResourceId, rand_in_range};
use parking_lot::{Condvar, Mutex};
use rand::seq::{IndexedRandom, SliceRandom, index};
use tracing::{debug, info, trace};

use crate::context::SimulationContext;
use crate::device::{Device, Phase};
use crate::error::{ProtocolError, SimResult};
use crate::events::{CommunicationListener, LifecycleEvent, SimulationListener};
use crate::mobility::choose_link;
use crate::population::{DeviceHandle, Population};

/// Default timestep length in simulated seconds
pub const DEFAULT_TIMESTEP: f64 = 0.1;

/// Cooperative pause switch shared with other threads
///
/// The run loop checks it after every tick and blocks while it is set.
#[derive(Debug, Clone, Default)]
pub struct PauseHandle {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl PauseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        *self.inner.0.lock() = true;
    }

    pub fn unpause(&self) {
        let (flag, wake) = &*self.inner;
        *flag.lock() = false;
        wake.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Block the calling thread until the handle is unpaused
    pub fn wait_while_paused(&self) {
        let (flag, wake) = &*self.inner;
        let mut paused = flag.lock();
        while *paused {
            wake.wait(&mut paused);
        }
    }
}

/// Owns the map, the devices and the experiment context, and runs ticks
pub struct Simulator {
    map: MobilityMap,
    population: Population,
    context: SimulationContext,
    timestep: f64,
    time: f64,
    iteration: i64,
    pause: PauseHandle,
    listeners: Vec<Arc<dyn SimulationListener>>,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("nodes", &self.map.len())
            .field("devices", &self.population.len())
            .field("timestep", &self.timestep)
            .field("time", &self.time)
            .field("iteration", &self.iteration)
            .finish()
    }
}

impl Simulator {
    /// Create a simulator on a validated map with no devices
    pub fn new(map: MobilityMap, context: SimulationContext) -> SimResult<Self> {
        map.validate_for_simulation()?;
        Ok(Self {
            map,
            population: Population::new(),
            context,
            timestep: DEFAULT_TIMESTEP,
            time: -1.0,
            iteration: -1,
            pause: PauseHandle::new(),
            listeners: Vec::new(),
        })
    }

    pub fn map(&self) -> &MobilityMap {
        &self.map
    }

    /// Replace the map; current mobile objects must still fit on it
    pub fn set_map(&mut self, map: MobilityMap) -> SimResult<()> {
        map.validate_for_simulation()?;
        for device in self.population.mobile_objects() {
            device.validate_on(&map)?;
        }
        self.map = map;
        Ok(())
    }

    pub fn timestep(&self) -> f64 {
        self.timestep
    }

    pub fn set_timestep(&mut self, timestep: f64) -> Result<(), ParameterError> {
        if timestep.is_nan() || timestep <= 0.0 {
            return Err(ParameterError::NonPositiveTimestep(timestep));
        }
        self.timestep = timestep;
        Ok(())
    }

    /// Simulated time elapsed, -1 before the first run
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Ticks completed, -1 before the first run
    pub fn iteration(&self) -> i64 {
        self.iteration
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn mobile_objects(&self) -> &[Device] {
        self.population.mobile_objects()
    }

    pub fn beacons(&self) -> &[Device] {
        self.population.beacons()
    }

    pub fn information_sources(&self) -> &[Device] {
        self.population.information_sources()
    }

    pub fn all_devices(&self) -> &[Device] {
        self.population.all()
    }

    pub fn context(&self) -> &SimulationContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SimulationContext {
        &mut self.context
    }

    /// Replace the mobile objects; each route must lie on the map
    pub fn set_mobile_objects(&mut self, devices: Vec<Device>) -> SimResult<()> {
        for device in &devices {
            device.validate_on(&self.map)?;
        }
        self.population.set_mobile_objects(devices)?;
        Ok(())
    }

    pub fn set_beacons(&mut self, devices: Vec<Device>) -> SimResult<()> {
        self.population.set_beacons(devices)?;
        Ok(())
    }

    pub fn set_information_sources(&mut self, devices: Vec<Device>) -> SimResult<()> {
        self.population.set_information_sources(devices)?;
        Ok(())
    }

    /// Place `n` mobile objects on random nodes
    ///
    /// Each picks its first destination by plain weighted choice; the return
    /// bias only applies from the first node it reaches onwards.
    pub fn generate_random_mobile_objects(&mut self, n: usize) -> SimResult<()> {
        let (ids, rng) = self.context.ids_and_rng();
        let mut devices = Vec::with_capacity(n);
        for _ in 0..n {
            let node = &self.map.nodes()[rand_in_range(rng, 0, self.map.len() - 1)];
            let destination = choose_link(node, rng)?.goes_to();
            devices.push(Device::mobile_object(ids, &self.map, node.id(), destination)?);
        }
        debug!(count = n, "generated mobile objects");
        self.set_mobile_objects(devices)
    }

    /// Give every mobile object the same speed and return bias
    pub fn configure_mobile_objects(
        &mut self,
        speed: f64,
        return_bias: f64,
    ) -> Result<(), ParameterError> {
        for device in self.population.mobile_objects_mut() {
            if let Some(mobility) = device.mobility_mut() {
                mobility.set_speed(speed)?;
                mobility.set_return_bias(return_bias)?;
            }
        }
        Ok(())
    }

    /// Place `n` information sources on distinct random nodes with resources 1..=n
    pub fn generate_random_information_sources(&mut self, n: usize) -> SimResult<()> {
        let nodes = self.distinct_nodes(n)?;
        let ids = self.context.ids_mut();
        let mut devices = Vec::with_capacity(n);
        for (i, node) in nodes.into_iter().enumerate() {
            let resource = ResourceId::new(i as u32 + 1)?;
            let location = self.map.nodes()[node].location();
            devices.push(Device::information_source(ids, location, resource));
        }
        debug!(count = n, "generated information sources");
        self.set_information_sources(devices)
    }

    /// Place `n` beacons on distinct random nodes
    pub fn generate_random_beacons(&mut self, n: usize) -> SimResult<()> {
        let nodes = self.distinct_nodes(n)?;
        let ids = self.context.ids_mut();
        let devices = nodes
            .into_iter()
            .map(|node| Device::beacon(ids, self.map.nodes()[node].location()))
            .collect();
        debug!(count = n, "generated beacons");
        self.set_beacons(devices)
    }

    fn distinct_nodes(&mut self, n: usize) -> Result<Vec<usize>, ParameterError> {
        let available = self.map.len();
        if n > available {
            return Err(ParameterError::NotEnoughNodes {
                requested: n,
                available,
            });
        }
        Ok(index::sample(self.context.rng_mut(), available, n).into_vec())
    }

    pub fn add_listener(&mut self, listener: Arc<dyn SimulationListener>) {
        self.listeners.push(listener);
    }

    pub fn add_communication_listener(&mut self, listener: Arc<dyn CommunicationListener>) {
        self.context.controller_mut().add_listener(listener);
    }

    /// Register an observer of both the lifecycle and the protocol
    pub fn add_monitor<M>(&mut self, monitor: Arc<M>)
    where
        M: SimulationListener + CommunicationListener + 'static,
    {
        self.add_listener(monitor.clone());
        self.add_communication_listener(monitor);
    }

    pub fn pause_handle(&self) -> PauseHandle {
        self.pause.clone()
    }

    pub fn pause(&self) {
        self.pause.pause();
    }

    pub fn unpause(&self) {
        self.pause.unpause();
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Run until simulated time exceeds `duration`
    ///
    /// Time and iteration restart at 0. The first protocol or map error
    /// stops the run and is returned.
    pub fn run(&mut self, duration: f64) -> SimResult<()> {
        self.time = 0.0;
        self.iteration = 0;
        self.pause.unpause();

        info!(
            duration,
            timestep = self.timestep,
            devices = self.population.len(),
            "simulation started"
        );
        self.emit(LifecycleEvent::Started { time: self.time });

        while self.time <= duration {
            self.advance_mobility()?;
            self.communicate()?;

            self.time += self.timestep;
            self.iteration += 1;
            trace!(iteration = self.iteration, time = self.time, "tick");
            self.emit(LifecycleEvent::TickAdvanced {
                time: self.time,
                iteration: self.iteration as u64,
            });

            if self.pause.is_paused() {
                debug!(iteration = self.iteration, "paused");
                self.pause.wait_while_paused();
                debug!(iteration = self.iteration, "resumed");
            }
        }

        info!(
            time = self.time,
            iterations = self.iteration,
            "simulation finished"
        );
        self.emit(LifecycleEvent::Finished { time: self.time });
        Ok(())
    }

    fn emit(&self, event: LifecycleEvent) {
        for listener in &self.listeners {
            listener.on_lifecycle(&event, &self.population);
        }
    }

    fn advance_mobility(&mut self) -> SimResult<()> {
        let dt = self.timestep;
        let rng = self.context.rng_mut();
        for device in self.population.mobile_objects_mut() {
            device.advance_mobility(&self.map, dt, rng)?;
        }
        Ok(())
    }

    /// Communication step of one tick
    fn communicate(&mut self) -> Result<(), ProtocolError> {
        let dt = self.timestep;
        for device in self.population.all_mut() {
            device.advance_communication(dt);
        }

        let (controller, rng) = self.context.controller_and_rng();

        // Pairs are fixed up front so each session reacts at most once per tick
        for (a, b) in self.population.session_pairs() {
            let (first, second) = self.population.pair(a, b)?;
            match first.phase() {
                Some(Phase::Initiation) => {
                    if first.time_left() <= 0.0 && second.time_left() <= 0.0 {
                        controller.attempt_discovery(&mut self.population, a, b, rng)?;
                    }
                }
                Some(Phase::Transmission) => {
                    if !first.in_mutual_range(second) {
                        controller.abort(&mut self.population, a, b)?;
                    } else if first.time_left() <= 0.0 && second.time_left() <= 0.0 {
                        controller.complete(&mut self.population, a, b, rng)?;
                    }
                }
                None => {}
            }
        }

        let mut idle: Vec<DeviceHandle> = self
            .population
            .handles()
            .filter(|h| !self.population[*h].is_communicating())
            .collect();
        idle.shuffle(rng);

        for &handle in &idle {
            let device = &self.population[handle];
            if device.is_communicating() {
                continue;
            }
            let candidates: Vec<DeviceHandle> = idle
                .iter()
                .copied()
                .filter(|&other| {
                    let partner = &self.population[other];
                    other != handle
                        && !partner.is_communicating()
                        && (device.is_mobile() || partner.is_mobile())
                        && device.in_mutual_range(partner)
                })
                .collect();
            if let Some(&partner) = candidates.choose(rng) {
                controller.initiate(&mut self.population, handle, partner)?;
            }
        }
        Ok(())
    }
}
