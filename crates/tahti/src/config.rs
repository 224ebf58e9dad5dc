//! Process-wide run configuration
//!
//! Holds everything registration and negotiation produce: the ordered state
//! and callback tables, the parsed schedule, the lingering controller
//! connection, and the initialization semaphore the embedding thread blocks
//! on. Mutation happens during registration and negotiation; steady state is
//! read-only except for the per-state atomic counters.

use crate::{
    schedule::{HandlerSlot, InstallHandler, Schedule},
    state::State,
    sync::Sema,
};
use parking_lot::{Mutex, RwLock};
use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, Ordering},
};
use tokio::net::TcpStream;
use tracing::trace;

/// Callback invoked on the application thread entering a state, with the
/// state id as argument.
pub type StateCallback = Arc<dyn Fn(u32) + Send + Sync>;

struct CallbackEntry {
    name: String,
    callback: StateCallback,
}

/// The run configuration. One per process in normal operation; tests build
/// their own and pass it through the internal entry points.
pub(crate) struct RunConfig {
    states: RwLock<Vec<Arc<State>>>,
    callbacks: RwLock<Vec<CallbackEntry>>,
    /// Written exactly once, by the negotiator, before the scheduler walks it.
    schedule: OnceLock<Schedule>,
    /// The accepted controller connection, kept open for the life of the
    /// process once negotiation finishes.
    control: Mutex<Option<TcpStream>>,
    /// Posted once the scheduler has the initial epoch's handlers installed
    /// (or has failed); `start` blocks on it.
    pub(crate) ready: Sema,
    started: AtomicBool,
}

// === impl RunConfig ===

impl RunConfig {
    pub(crate) fn new() -> Self {
        Self {
            states: RwLock::new(Vec::new()),
            callbacks: RwLock::new(Vec::new()),
            schedule: OnceLock::new(),
            control: Mutex::new(None),
            ready: Sema::new(0),
            started: AtomicBool::new(false),
        }
    }

    /// The process-wide configuration. Only the public entry points resolve
    /// this; everything below them takes `&RunConfig`.
    pub(crate) fn global() -> &'static Self {
        static CONFIG: OnceLock<RunConfig> = OnceLock::new();
        CONFIG.get_or_init(Self::new)
    }

    /// Appends a state and returns its dense id.
    pub(crate) fn add_state(&self, name: &str) -> u32 {
        let mut states = self.states.write();
        let id = states.len() as u32;
        states.push(Arc::new(State::new(id, name)));
        id
    }

    pub(crate) fn state(&self, id: u32) -> Option<Arc<State>> {
        self.states.read().get(id as usize).cloned()
    }

    pub(crate) fn num_states(&self) -> u32 {
        self.states.read().len() as u32
    }

    /// Appends a callback and returns its table index.
    pub(crate) fn add_callback(&self, name: &str, callback: StateCallback) -> u32 {
        let mut callbacks = self.callbacks.write();
        let id = callbacks.len() as u32;
        callbacks.push(CallbackEntry { name: name.to_owned(), callback });
        id
    }

    pub(crate) fn callback(&self, id: u32) -> Option<StateCallback> {
        let callbacks = self.callbacks.read();
        let entry = callbacks.get(id as usize)?;
        trace!(target: "state", callback = %entry.name, id, "dispatching callback");
        Some(Arc::clone(&entry.callback))
    }

    pub(crate) fn num_callbacks(&self) -> u32 {
        self.callbacks.read().len() as u32
    }

    /// Installs the parsed schedule; `false` if one is already in place.
    pub(crate) fn set_schedule(&self, schedule: Schedule) -> bool {
        self.schedule.set(schedule).is_ok()
    }

    pub(crate) fn schedule(&self) -> Option<&Schedule> {
        self.schedule.get()
    }

    /// Resolves an active-handler reference through the schedule.
    pub(crate) fn resolve(&self, slot: HandlerSlot) -> Option<&InstallHandler> {
        self.schedule.get()?.install(slot)
    }

    /// Keeps the negotiated connection alive; the protocol lingers after the
    /// final `joo` and the peer owns the close.
    pub(crate) fn adopt_control(&self, stream: TcpStream) {
        *self.control.lock() = Some(stream);
    }

    /// Flags the scheduler as started; `false` if it already was.
    pub(crate) fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_ids_are_dense_and_stable() {
        let config = RunConfig::new();
        assert_eq!(config.add_state("alpha"), 0);
        assert_eq!(config.add_state("beta"), 1);
        assert_eq!(config.num_states(), 2);
        assert_eq!(config.state(1).unwrap().name(), "beta");
        assert!(config.state(2).is_none());
    }

    #[test]
    fn callback_table_preserves_order() {
        let config = RunConfig::new();
        let id = config.add_callback("probe", Arc::new(|_| {}));
        assert_eq!(id, 0);
        assert_eq!(config.add_callback("other", Arc::new(|_| {})), 1);
        assert!(config.callback(0).is_some());
        assert!(config.callback(2).is_none());
    }

    #[test]
    fn schedule_installs_once() {
        let config = RunConfig::new();
        assert!(config.set_schedule(Schedule::default()));
        assert!(!config.set_schedule(Schedule::default()));
        assert!(config.schedule().is_some());
    }

    #[test]
    fn started_flips_once() {
        let config = RunConfig::new();
        assert!(config.mark_started());
        assert!(!config.mark_started());
    }
}
