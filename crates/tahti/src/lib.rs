//! Externally-driven thread-schedule fault injection
//!
//! The application under test registers named states and reports every entry
//! into one of them. A controller process connects over TCP, delivers a
//! compiled bytecode schedule, and thereby dictates what happens at each
//! state: which threads continue, block, sleep, or invoke a callback, and
//! when blocked threads are resumed. Rare interleavings become reproducible
//! on demand.
//!
//! The scheduler runs on its own thread and owns the control socket;
//! application threads only synchronize against it through [`enter_state`].
//! Logging goes through [`tracing`]; the embedding application decides on a
//! subscriber.
//!
//! # Example
//!
//! ```no_run
//! use std::net::SocketAddr;
//!
//! let preread = tahti::register_state("preread");
//!
//! // blocks until the controller has delivered a schedule and the initial
//! // handlers are installed
//! let addr: SocketAddr = "127.0.0.1:28806".parse().unwrap();
//! tahti::start(addr);
//!
//! // on each worker thread, at the instrumented program point:
//! let ordinal = tahti::enter_state(preread);
//! # let _ = ordinal;
//! ```
//!
//! Building with `--no-default-features` compiles the instrumentation out:
//! all entry points become no-ops so call sites can stay in place.

#[cfg(feature = "enabled")]
mod config;
#[cfg(feature = "enabled")]
mod server;
#[cfg(feature = "enabled")]
mod service;
#[cfg(feature = "enabled")]
mod state;

#[cfg(feature = "enabled")]
pub mod controller;
#[cfg(feature = "enabled")]
pub mod error;
#[cfg(feature = "enabled")]
pub mod schedule;
#[cfg(feature = "enabled")]
pub mod sync;
#[cfg(feature = "enabled")]
pub mod wire;

use std::net::SocketAddr;

/// Error sentinel returned by [`enter_state`]: the state id is unknown or no
/// handler list is active. The thread should proceed as if the call had done
/// nothing.
pub const ENTER_FAILED: u32 = u32::MAX;

#[cfg(feature = "enabled")]
mod api {
    use super::*;
    use crate::{config::RunConfig, service, state};
    use std::sync::Arc;
    use tracing::{error, warn};

    /// Registers a named state and returns its dense id (0, 1, 2, …).
    ///
    /// All registration must happen before [`start`].
    pub fn register_state(name: &str) -> u32 {
        RunConfig::global().add_state(name)
    }

    /// Registers a callback the schedule can dispatch to by index. The
    /// callback runs on whichever application thread enters the state.
    pub fn register_callback(
        name: &str,
        callback: impl Fn(u32) + Send + Sync + 'static,
    ) -> u32 {
        RunConfig::global().add_callback(name, Arc::new(callback))
    }

    /// Reports that the calling thread entered `state_id` and runs the
    /// installed handler, blocking if the schedule says so. Returns the
    /// thread's ordinal for the current activation, or [`ENTER_FAILED`].
    pub fn enter_state(state_id: u32) -> u32 {
        state::enter(RunConfig::global(), state_id)
    }

    /// Starts the scheduler: listens on `addr`, accepts one controller,
    /// negotiates the schedule, and begins executing it. Blocks the caller
    /// until the initial epoch's handlers are installed (or negotiation has
    /// failed), so no thread can enter a state too early.
    ///
    /// The scheduler starts at most once per process; later calls are
    /// ignored. With no states registered there is nothing to schedule and
    /// the call is refused.
    pub fn start(addr: SocketAddr) {
        let config = RunConfig::global();
        if config.num_states() == 0 {
            error!(target: "sched", "no states registered; refusing to start");
            return;
        }
        if !config.mark_started() {
            warn!(target: "sched", "scheduler already started");
            return;
        }

        let spawned = std::thread::Builder::new()
            .name("tahti-scheduler".into())
            .spawn(move || match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(service::run(config, addr)),
                Err(err) => {
                    error!(target: "sched", %err, "could not build scheduler runtime");
                    config.ready.post();
                }
            });
        if let Err(err) = spawned {
            error!(target: "sched", %err, "could not spawn scheduler thread");
            config.ready.post();
        }

        config.ready.wait();
    }
}

#[cfg(feature = "enabled")]
pub use api::{enter_state, register_callback, register_state, start};

#[cfg(not(feature = "enabled"))]
mod api {
    use super::*;

    /// Stub: the library is compiled out.
    pub fn register_state(_name: &str) -> u32 {
        0
    }

    /// Stub: the library is compiled out.
    pub fn register_callback(
        _name: &str,
        _callback: impl Fn(u32) + Send + Sync + 'static,
    ) -> u32 {
        0
    }

    /// Stub: the library is compiled out.
    pub fn enter_state(_state_id: u32) -> u32 {
        0
    }

    /// Stub: the library is compiled out.
    pub fn start(_addr: SocketAddr) {}
}

#[cfg(not(feature = "enabled"))]
pub use api::{enter_state, register_callback, register_state, start};
