//! Simulation control surface: a worker thread that drives the world one
//! cycle at a time, and a handle that starts, suspends, resumes, stops and
//! inspects it from outside.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use antfarm_core::{AntClass, PlayfieldCell, VmState, World, WorldError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// World state shared between the worker and the control handle. The worker
/// holds the lock only for the duration of one cycle.
pub type SharedWorld = Arc<Mutex<World>>;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("failed to lock world state")]
    Lock,
    #[error("simulation was already started")]
    AlreadyStarted,
    #[error("cannot suspend a {0} simulation")]
    NotRunning(VmState),
    #[error("cannot resume a {0} simulation")]
    NotSuspended(VmState),
    #[error(transparent)]
    World(#[from] WorldError),
}

impl<T> From<PoisonError<MutexGuard<'_, T>>> for ControlError {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Self::Lock
    }
}

/// Flags and state shared with the worker thread. The worker consults the
/// flags only between cycles, so every external request takes effect at a
/// cycle boundary.
struct Signals {
    /// Published lifecycle state, decoded with [`VmState::from_raw`].
    state: AtomicU8,
    /// Request to stop; wins over a pending suspend.
    stop: AtomicBool,
    /// Request to park between cycles; cleared by `resume`.
    suspend: Mutex<bool>,
    /// Wakes a suspended worker on resume or stop.
    wake: Condvar,
    /// Message of the fault that terminated the worker, if any.
    fault: Mutex<Option<String>>,
}

impl Signals {
    fn publish(&self, state: VmState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn state(&self) -> VmState {
        VmState::from_raw(self.state.load(Ordering::SeqCst))
    }
}

/// Handle to a simulation and its worker thread.
///
/// Lifecycle: [`VmState::Created`] until [`start`](Self::start), then
/// [`VmState::Running`] with excursions to [`VmState::Suspended`], ending in
/// one of the three terminal states. Dropping the handle without stopping
/// detaches the worker.
pub struct ControlHandle {
    world: SharedWorld,
    signals: Arc<Signals>,
    worker: Option<JoinHandle<()>>,
}

impl ControlHandle {
    /// Wrap a freshly built world. The simulation stays in
    /// [`VmState::Created`] until started.
    #[must_use]
    pub fn new(world: World) -> Self {
        Self {
            world: Arc::new(Mutex::new(world)),
            signals: Arc::new(Signals {
                state: AtomicU8::new(VmState::Created as u8),
                stop: AtomicBool::new(false),
                suspend: Mutex::new(false),
                wake: Condvar::new(),
                fault: Mutex::new(None),
            }),
            worker: None,
        }
    }

    /// Place the queens and launch the worker thread. Fails without side
    /// effects when the playfield has no room for every queen.
    pub fn start(&mut self) -> Result<(), ControlError> {
        if self.signals.state() != VmState::Created || self.worker.is_some() {
            return Err(ControlError::AlreadyStarted);
        }
        {
            let mut world = self.world.lock()?;
            let queens = world.spawn_queens()?;
            info!(queens = queens.len(), "queens placed, simulation starting");
        }
        self.signals.publish(VmState::Running);

        let world = Arc::clone(&self.world);
        let signals = Arc::clone(&self.signals);
        self.worker = Some(std::thread::spawn(move || {
            let exit = run_worker(&world, &signals);
            signals.publish(exit);
            info!(state = %exit, "simulation worker finished");
        }));
        Ok(())
    }

    /// Ask the worker to park after the cycle in flight.
    pub fn suspend(&self) -> Result<(), ControlError> {
        let state = self.state();
        if !matches!(state, VmState::Running | VmState::Suspended) {
            return Err(ControlError::NotRunning(state));
        }
        *self.signals.suspend.lock()? = true;
        debug!("suspend requested");
        Ok(())
    }

    /// Wake a suspended worker.
    pub fn resume(&self) -> Result<(), ControlError> {
        let mut suspend = self.signals.suspend.lock()?;
        if !*suspend {
            return Err(ControlError::NotSuspended(self.state()));
        }
        *suspend = false;
        self.signals.wake.notify_all();
        debug!("resume requested");
        Ok(())
    }

    /// Ask the worker to stop after the cycle in flight. Also wakes a
    /// suspended worker; stop wins over a pending suspend.
    pub fn stop(&self) -> Result<(), ControlError> {
        self.signals.stop.store(true, Ordering::SeqCst);
        self.signals.wake.notify_all();
        debug!("stop requested");
        Ok(())
    }

    /// Block until the worker thread exits and report the terminal state.
    pub fn wait_until_stopped(&mut self) -> Result<VmState, ControlError> {
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!("simulation worker panicked");
            self.signals.publish(VmState::Terminated);
        }
        Ok(self.state())
    }

    /// Current lifecycle state as last published by the worker.
    #[must_use]
    pub fn state(&self) -> VmState {
        self.signals.state()
    }

    /// Message of the fault that terminated the simulation, if any.
    pub fn fault(&self) -> Result<Option<String>, ControlError> {
        Ok(self.signals.fault.lock()?.clone())
    }

    /// Playfield dimensions in cells.
    pub fn dimensions(&self) -> Result<(i32, i32), ControlError> {
        let world = self.world.lock()?;
        let playfield = world.playfield();
        Ok((playfield.width(), playfield.height()))
    }

    /// Copy a rectangle of playfield cells.
    pub fn snapshot_rect(
        &self,
        x: i32,
        y: i32,
        w: i32,
        h: i32,
    ) -> Result<Vec<PlayfieldCell>, ControlError> {
        Ok(self.world.lock()?.snapshot_rect(x, y, w, h)?)
    }

    /// Player display names in tribe order.
    pub fn player_names(&self) -> Result<Vec<String>, ControlError> {
        Ok(self
            .world
            .lock()?
            .rosters()
            .iter()
            .map(|roster| roster.name.clone())
            .collect())
    }

    /// A player's compiled classes, queen first.
    pub fn player_classes(&self, player: usize) -> Result<Vec<Arc<AntClass>>, ControlError> {
        Ok(self.world.lock()?.player_classes(player)?.to_vec())
    }

    /// Number of live ants.
    pub fn ant_count(&self) -> Result<usize, ControlError> {
        Ok(self.world.lock()?.ant_count())
    }

    /// Live ants per player, in tribe order.
    pub fn live_counts(&self) -> Result<Vec<usize>, ControlError> {
        Ok(self.world.lock()?.live_counts())
    }

    /// Number of cycles run so far.
    pub fn cycle(&self) -> Result<u64, ControlError> {
        Ok(self.world.lock()?.cycle())
    }
}

/// Worker loop: run one cycle, sleep, honor the control flags, repeat.
/// Returns the terminal state the caller should publish.
fn run_worker(world: &SharedWorld, signals: &Signals) -> VmState {
    let sleep_per_cycle = {
        let Ok(world) = world.lock() else {
            record_fault(signals, "world lock poisoned");
            return VmState::Terminated;
        };
        Duration::from_millis(world.config().sleep_per_cycle)
    };

    loop {
        {
            let Ok(mut world) = world.lock() else {
                record_fault(signals, "world lock poisoned");
                return VmState::Terminated;
            };
            if world.ant_count() == 0 {
                info!(cycle = world.cycle(), "no ants remain");
                return VmState::StoppedBySimulation;
            }
            match world.run_cycle() {
                Ok(events) => {
                    if let Some(starved) = events.starved {
                        debug!(cycle = events.cycle, ant = ?starved, "ant starved");
                    }
                }
                Err(fault) => {
                    warn!(%fault, "cycle faulted");
                    record_fault(signals, &fault.to_string());
                    return VmState::Terminated;
                }
            }
        }

        if !sleep_per_cycle.is_zero() {
            std::thread::sleep(sleep_per_cycle);
        }

        // Control flags are consulted only here, between cycles.
        if signals.stop.load(Ordering::SeqCst) {
            return VmState::StoppedByCommand;
        }
        let Ok(mut suspend) = signals.suspend.lock() else {
            record_fault(signals, "suspend lock poisoned");
            return VmState::Terminated;
        };
        if *suspend {
            signals.publish(VmState::Suspended);
            while *suspend && !signals.stop.load(Ordering::SeqCst) {
                suspend = match signals.wake.wait(suspend) {
                    Ok(guard) => guard,
                    Err(_) => {
                        record_fault(signals, "suspend lock poisoned");
                        return VmState::Terminated;
                    }
                };
            }
            if signals.stop.load(Ordering::SeqCst) {
                return VmState::StoppedByCommand;
            }
            signals.publish(VmState::Running);
        }
    }
}

fn record_fault(signals: &Signals, message: &str) {
    if let Ok(mut fault) = signals.fault.lock() {
        *fault = Some(message.to_owned());
    }
}
