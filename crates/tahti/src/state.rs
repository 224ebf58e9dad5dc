//! Registered states and the state-entry runtime
//!
//! States are registered up front and live for the process. While a handler
//! list is active for a state, threads entering it draw 1-based ordinals from
//! `cur_thread` and dispatch through the first handler covering their
//! ordinal. Reaching the cap stores the dormant sentinel and releases the
//! state's waitstate semaphore, which is what the scheduler's `WAITSTATE`
//! barrier counts.

use crate::{
    ENTER_FAILED,
    config::RunConfig,
    schedule::{HandlerAction, HandlerSlot},
    sync::Sema,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{error, trace, warn};

/// `cap_thread` sentinel: no cap installed, the state is dormant.
pub(crate) const CAP_DORMANT: u32 = u32::MAX;

/// A named program point the application enters at runtime.
pub(crate) struct State {
    id: u32,
    name: String,
    /// Next ordinal to hand out; reset to 1 on each activation.
    cur_thread: AtomicU32,
    /// Highest ordinal plus one for which a handler is installed, or
    /// [`CAP_DORMANT`].
    cap_thread: AtomicU32,
    /// Posted once per activation when the cap is reached.
    waitstate: Sema,
    /// Reference to the install command whose handler list is live, if any.
    active: RwLock<Option<HandlerSlot>>,
}

// === impl State ===

impl State {
    pub(crate) fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            cur_thread: AtomicU32::new(0),
            cap_thread: AtomicU32::new(CAP_DORMANT),
            waitstate: Sema::new(0),
            active: RwLock::new(None),
        }
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn waitstate(&self) -> &Sema {
        &self.waitstate
    }

    /// Points the state at a freshly installed handler list: ordinals restart
    /// at 1 and the cap comes from the install command.
    pub(crate) fn activate(&self, slot: HandlerSlot, tr_max: u32) {
        self.cur_thread.store(1, Ordering::SeqCst);
        self.cap_thread.store(tr_max, Ordering::SeqCst);
        *self.active.write() = Some(slot);
    }

    pub(crate) fn active_slot(&self) -> Option<HandlerSlot> {
        *self.active.read()
    }

    pub(crate) fn is_dormant(&self) -> bool {
        self.cap_thread.load(Ordering::SeqCst) == CAP_DORMANT
    }

    /// Draws the next thread ordinal for the current activation.
    fn next_ordinal(&self) -> u32 {
        self.cur_thread.fetch_add(1, Ordering::SeqCst)
    }

    /// Cap bookkeeping for an ordinal: the thread that reaches the cap stores
    /// the dormant sentinel and posts the waitstate semaphore, exactly once
    /// per activation.
    fn service_cap(&self, td: u32) {
        let cap = self.cap_thread.load(Ordering::SeqCst).saturating_sub(1);
        if td >= cap && self.cap_thread.swap(CAP_DORMANT, Ordering::SeqCst) != CAP_DORMANT {
            trace!(target: "state", state = %self.name, td, "cap reached");
            self.waitstate.post();
        }
    }
}

/// A thread has entered `state_id`. Returns the thread's ordinal for this
/// activation, or [`ENTER_FAILED`] when the id is unknown or no handler list
/// is active.
pub(crate) fn enter(config: &RunConfig, state_id: u32) -> u32 {
    let Some(state) = config.state(state_id) else {
        warn!(target: "state", state_id, "entered unregistered state");
        return ENTER_FAILED;
    };
    let Some(slot) = state.active_slot() else {
        return ENTER_FAILED;
    };
    let Some(install) = config.resolve(slot) else {
        error!(target: "state", state = %state.name(), "active handler reference is stale");
        return ENTER_FAILED;
    };

    let td = state.next_ordinal();
    state.service_cap(td);

    let Some(handler) = install.handler_for(td) else {
        warn!(target: "state", state = %state.name(), td, "no handler covers ordinal");
        return td;
    };

    match &handler.action {
        HandlerAction::Callback(callback_id) => {
            if let Some(callback) = config.callback(*callback_id) {
                trace!(target: "state", state = %state.name(), td, callback_id, "invoking callback");
                callback(state.id());
            } else {
                error!(target: "state", state = %state.name(), callback_id, "callback not registered");
            }
        }
        HandlerAction::Continue => {}
        HandlerAction::Panic => {
            error!(target: "state", state = %state.name(), td, "panic handler hit, aborting");
            std::process::abort();
        }
        HandlerAction::Sleep(ts) => {
            trace!(target: "state", state = %state.name(), td, "sleeping");
            std::thread::sleep(ts.duration());
        }
        HandlerAction::Wait(gate) => {
            trace!(target: "state", state = %state.name(), td, "blocking on wait handler");
            gate.wait();
            trace!(target: "state", state = %state.name(), td, "resumed");
        }
    }

    td
}
