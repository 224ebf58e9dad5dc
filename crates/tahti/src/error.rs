//! Aggregated error types

/// Failures while talking to the controller.
///
/// Any of these makes the negotiator reply `ei` and terminates the scheduler
/// task; the library then stays silent for the life of the process.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("bad magic in {0} packet")]
    BadMagic(&'static str),
    #[error("unsupported dialect {0:#06x}")]
    UnknownDialect(u16),
    #[error("bytecode crc mismatch: header {header:#010x}, payload {computed:#010x}")]
    CrcMismatch { header: u32, computed: u32 },
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    /// Controller side: the library replied `ei`.
    #[error("request refused by the peer")]
    Refused,
    /// Controller side: the reply was neither `joo` nor `ei`.
    #[error("unintelligible reply from the peer")]
    BadReply,
}

/// Reasons the bytecode parser rejects a schedule.
///
/// Rejection is wholesale: a schedule that trips any of these is discarded.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("bytecode ended while reading {0}")]
    Truncated(&'static str),
    #[error("expected timeslice prologue, got {0:#010x}")]
    ExpectedTimeslice(u32),
    #[error("first timeslice id must be 0, got {0}")]
    BadFirstSlice(u32),
    #[error("timeslice {got} does not follow timeslice {prev}")]
    UnorderedSlice { prev: u32, got: u32 },
    #[error("invalid notify value {0}")]
    BadNotify(u8),
    #[error("unknown command tag {0:#010x}")]
    UnknownCommand(u32),
    #[error("unknown handler action tag {0:#06x}")]
    UnknownAction(u16),
    #[error("invalid time unit specifier {0}")]
    BadTimeUnit(u8),
    #[error("state id {0} exceeds the number of registered states")]
    UnknownState(u32),
    #[error("callback id {0} exceeds the number of registered callbacks")]
    UnknownCallback(u32),
    #[error("thread range {start}..={end} is inverted")]
    InvertedRange { start: u32, end: u32 },
    #[error("expected NUL after state id, got {0:#04x}")]
    BadWhenPad(u8),
    #[error("handler list for state {0} is empty")]
    EmptyHandlerList(u32),
    #[error("resume of state {state_id} range {start}..={end} matches no installed handler")]
    ResumeUnmatched { state_id: u32, start: u32, end: u32 },
    #[error("resume of state {state_id} range {start}..={end} targets a handler that is not a wait")]
    ResumeNotWait { state_id: u32, start: u32, end: u32 },
    #[error("no waitstate between epoch {handler_epoch} and the resume of its wait handler")]
    ResumeBeforeWaitstate { handler_epoch: u32 },
}

/// Faults the scheduler hits while executing an accepted schedule.
///
/// These indicate a schedule/runtime mismatch; the scheduler logs the error
/// and terminates, leaving application threads to proceed on their own.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ExecError {
    #[error("install references unregistered state {0}")]
    InstallUnknownState(u32),
    #[error("resume references unregistered state {0}")]
    ResumeUnknownState(u32),
    #[error("resume of state {0} with no active handler list")]
    ResumeDormantState(u32),
    #[error("resume of state {state_id} range {start}..={end} not present in the active handler list")]
    ResumeUnmatched { state_id: u32, start: u32, end: u32 },
    #[error("resume of state {state_id} range {start}..={end} whose handler is not a wait")]
    ResumeNotWait { state_id: u32, start: u32, end: u32 },
}
