//! In-memory representation of a parsed schedule
//!
//! A schedule is a sequence of epochs; each epoch is a sequence of commands
//! executed in order by the scheduler task. Handlers installed by a command
//! are referenced from states by `(epoch, command)` index pairs rather than
//! pointers, so the configuration's vectors stay the single owner of every
//! record.

use crate::sync::Sema;
use std::time::Duration;

/// Sentinel for the unbounded upper end of a thread-ordinal range.
pub const TR_UNBOUNDED: u32 = u32::MAX;

/// Wire time units for timeouts and sleeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Millis,
    Micros,
    Nanos,
}

// === impl TimeUnit ===

impl TimeUnit {
    /// Decodes the unit byte; `None` for an unknown specifier.
    pub fn from_wire(unit: u8) -> Option<Self> {
        match unit {
            0 => Some(Self::Seconds),
            1 => Some(Self::Millis),
            2 => Some(Self::Micros),
            3 => Some(Self::Nanos),
            _ => None,
        }
    }

    /// The unit byte as it appears on the wire.
    pub fn wire_code(&self) -> u8 {
        match self {
            Self::Seconds => 0,
            Self::Millis => 1,
            Self::Micros => 2,
            Self::Nanos => 3,
        }
    }
}

/// A duration as transferred: unit plus magnitude.
///
/// The raw pair is kept so that re-encoding a schedule reproduces its input
/// byte for byte; conversion to a [`Duration`] happens at execution time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeSpec {
    pub unit: TimeUnit,
    pub value: u32,
}

// === impl TimeSpec ===

impl TimeSpec {
    /// Splits the magnitude into whole seconds and a nanosecond remainder.
    pub fn duration(&self) -> Duration {
        let (quotient, multiplier) = match self.unit {
            TimeUnit::Seconds => (1, 0),
            TimeUnit::Millis => (1_000, 1_000_000),
            TimeUnit::Micros => (1_000_000, 1_000),
            TimeUnit::Nanos => (1_000_000_000, 1),
        };
        let secs = u64::from(self.value / quotient);
        let nanos = (self.value % quotient) * multiplier;
        Duration::new(secs, nanos)
    }
}

/// What happens to a thread whose ordinal falls in a handler's range.
#[derive(Clone, Debug)]
pub enum HandlerAction {
    /// Invoke the callback registered under this index.
    Callback(u32),
    /// Return immediately.
    Continue,
    /// Abort the process.
    Panic,
    /// Sleep for the given duration, then return.
    Sleep(TimeSpec),
    /// Block on the handler's semaphore until a `RESUME` releases it.
    Wait(Sema),
}

/// One installed handler: an inclusive ordinal range and its action.
#[derive(Clone, Debug)]
pub struct Handler {
    /// Epoch the handler was installed in; used for wait/resume ordering
    /// checks, immaterial for execution.
    pub epoch: u32,
    pub tr_start: u32,
    pub tr_end: u32,
    pub action: HandlerAction,
}

// === impl Handler ===

impl Handler {
    /// Whether `td` falls within this handler's inclusive range.
    pub fn covers(&self, td: u32) -> bool {
        td >= self.tr_start && td <= self.tr_end
    }
}

/// Install a fresh handler list for a state.
#[derive(Clone, Debug)]
pub struct InstallHandler {
    pub state_id: u32,
    /// Derived thread cap for the state: one past the highest ordinal covered
    /// by a bounded handler.
    pub tr_max: u32,
    pub handlers: Vec<Handler>,
}

// === impl InstallHandler ===

impl InstallHandler {
    /// First handler whose range contains `td`.
    pub fn handler_for(&self, td: u32) -> Option<&Handler> {
        self.handlers.iter().find(|h| h.covers(td))
    }

    /// Handler with exactly this range, if one was installed.
    pub fn handler_for_range(&self, tr_start: u32, tr_end: u32) -> Option<&Handler> {
        self.handlers.iter().find(|h| h.tr_start == tr_start && h.tr_end == tr_end)
    }
}

/// Unblock the wait handler previously installed for this exact range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resume {
    pub state_id: u32,
    pub tr_start: u32,
    pub tr_end: u32,
}

// === impl Resume ===

impl Resume {
    /// Number of thread ordinals in the resumed range, one release each.
    pub fn width(&self) -> u32 {
        self.tr_end - self.tr_start + 1
    }
}

/// A single scheduler command.
#[derive(Clone, Debug)]
pub enum Command {
    InstallHandler(InstallHandler),
    Resume(Resume),
    /// Scheduler sleeps before proceeding.
    Timeout(TimeSpec),
    /// Scheduler blocks until every participating state's cap is reached.
    WaitState,
}

/// One timeslice of the schedule.
#[derive(Clone, Debug)]
pub struct Epoch {
    pub id: u32,
    /// Protocol hint; stored and re-encoded, no runtime effect.
    pub notify: bool,
    pub commands: Vec<Command>,
}

/// Index of an install command within the schedule; this is the active-handler
/// reference states carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct HandlerSlot {
    pub epoch_ix: u32,
    pub cmd_ix: u32,
}

/// The full parsed schedule.
#[derive(Clone, Debug, Default)]
pub struct Schedule {
    pub epochs: Vec<Epoch>,
}

// === impl Schedule ===

impl Schedule {
    /// Resolves an active-handler reference back to its install command.
    pub(crate) fn install(&self, slot: HandlerSlot) -> Option<&InstallHandler> {
        match self.epochs.get(slot.epoch_ix as usize)?.commands.get(slot.cmd_ix as usize)? {
            Command::InstallHandler(install) => Some(install),
            _ => None,
        }
    }

    /// State ids referenced by install commands in epochs up to and including
    /// `max_epoch_ix`, in scheduler order, duplicates included.
    pub(crate) fn install_targets(
        &self,
        max_epoch_ix: usize,
    ) -> impl Iterator<Item = u32> + '_ {
        self.epochs
            .iter()
            .take(max_epoch_ix.saturating_add(1))
            .flat_map(|epoch| &epoch.commands)
            .filter_map(|cmd| match cmd {
                Command::InstallHandler(install) => Some(install.state_id),
                _ => None,
            })
    }
}
