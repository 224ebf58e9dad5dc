//! Two-level bytecode parser
//!
//! The outer machine alternates between timeslice prologues and command
//! words; inside a `WHEN` body an inner machine alternates between ordinal
//! ranges and action words until the end sentinel shows up in range position.
//! All ordering constraints are enforced here, so the scheduler can execute
//! an accepted schedule without re-validating it.

use crate::{
    error::ScheduleError,
    schedule::{
        Command, Epoch, Handler, HandlerAction, InstallHandler, Resume, Schedule, TR_UNBOUNDED,
        TimeSpec, TimeUnit,
    },
    sync::Sema,
    wire,
};
use bytes::Buf;
use tracing::trace;

/// What the bytecode is validated against: the sizes of the registration
/// tables at negotiation time.
#[derive(Clone, Copy, Debug)]
pub struct ParseContext {
    pub num_states: u32,
    pub num_callbacks: u32,
}

/// Decodes and validates a full bytecode stream.
pub fn parse(ctx: &ParseContext, mut buf: &[u8]) -> Result<Schedule, ScheduleError> {
    let mut schedule = Schedule::default();
    // epoch of the most recent WAITSTATE in stream order; a resume may only
    // target a wait handler installed at or before it
    let mut last_waitstate = None;
    while buf.has_remaining() {
        let epoch = parse_timeslice(ctx, &schedule, &mut last_waitstate, &mut buf)?;
        trace!(target: "wire", epoch = epoch.id, commands = epoch.commands.len(), "parsed timeslice");
        schedule.epochs.push(epoch);
    }
    Ok(schedule)
}

fn parse_timeslice(
    ctx: &ParseContext,
    schedule: &Schedule,
    last_waitstate: &mut Option<u32>,
    buf: &mut &[u8],
) -> Result<Epoch, ScheduleError> {
    let word = take_u32(buf, "timeslice prologue")?;
    if word != wire::TIMESLICE {
        return Err(ScheduleError::ExpectedTimeslice(word));
    }

    let id = take_u32(buf, "timeslice id")?;
    match schedule.epochs.last() {
        None if id != 0 => return Err(ScheduleError::BadFirstSlice(id)),
        Some(prev) if id.checked_sub(prev.id) != Some(1) => {
            return Err(ScheduleError::UnorderedSlice { prev: prev.id, got: id });
        }
        _ => {}
    }

    let notify = match take_u8(buf, "notify flag")? {
        0 => false,
        1 => true,
        other => return Err(ScheduleError::BadNotify(other)),
    };

    let mut epoch = Epoch { id, notify, commands: Vec::new() };
    loop {
        let word = take_u32(buf, "command tag")?;
        match word {
            wire::TIMESLICE_END => break,
            wire::WHEN => {
                let install = parse_when(ctx, epoch.id, buf)?;
                epoch.commands.push(Command::InstallHandler(install));
            }
            wire::RESUME => {
                let resume = parse_resume(ctx, schedule, &epoch, *last_waitstate, buf)?;
                epoch.commands.push(Command::Resume(resume));
            }
            wire::TIMEOUT => {
                epoch.commands.push(Command::Timeout(parse_timespec(buf)?));
            }
            wire::WAITSTATE => {
                *last_waitstate = Some(epoch.id);
                epoch.commands.push(Command::WaitState);
            }
            other => return Err(ScheduleError::UnknownCommand(other)),
        }
    }
    Ok(epoch)
}

/// Parses a `WHEN` body: alternating `(range, action)` records up to the end
/// sentinel, then derives the state's thread cap.
fn parse_when(
    ctx: &ParseContext,
    epoch_id: u32,
    buf: &mut &[u8],
) -> Result<InstallHandler, ScheduleError> {
    let state_id = take_u32(buf, "when state id")?;
    if state_id >= ctx.num_states {
        return Err(ScheduleError::UnknownState(state_id));
    }
    let pad = take_u8(buf, "when separator")?;
    if pad != 0 {
        return Err(ScheduleError::BadWhenPad(pad));
    }

    let mut handlers = Vec::new();
    loop {
        // range position: either the end sentinel or tr_start
        let word = take_u32(buf, "handler range")?;
        if word == wire::WHEN_END {
            break;
        }
        let tr_start = word;
        let tr_end = take_u32(buf, "handler range")?;
        if tr_end < tr_start {
            return Err(ScheduleError::InvertedRange { start: tr_start, end: tr_end });
        }

        let action = match take_u16(buf, "handler action")? {
            wire::ACT_CALLBACK => {
                let callback_id = take_u32(buf, "callback id")?;
                if callback_id >= ctx.num_callbacks {
                    return Err(ScheduleError::UnknownCallback(callback_id));
                }
                HandlerAction::Callback(callback_id)
            }
            wire::ACT_CONTINUE => HandlerAction::Continue,
            wire::ACT_PANIC => HandlerAction::Panic,
            wire::ACT_SLEEP => HandlerAction::Sleep(parse_timespec(buf)?),
            wire::ACT_WAIT => HandlerAction::Wait(Sema::new(0)),
            other => return Err(ScheduleError::UnknownAction(other)),
        };

        handlers.push(Handler { epoch: epoch_id, tr_start, tr_end, action });
    }

    if handlers.is_empty() {
        return Err(ScheduleError::EmptyHandlerList(state_id));
    }

    // the cap is one past the highest specifically-handled ordinal: the start
    // of the unbounded range when there is one, max(tr_end) + 1 otherwise
    let tr_max = handlers
        .iter()
        .find(|h| h.tr_end == TR_UNBOUNDED)
        .map(|h| h.tr_start)
        .unwrap_or_else(|| {
            handlers.iter().map(|h| h.tr_end).max().unwrap_or(0).saturating_add(1)
        });

    Ok(InstallHandler { state_id, tr_max, handlers })
}

fn parse_resume(
    ctx: &ParseContext,
    schedule: &Schedule,
    cur: &Epoch,
    last_waitstate: Option<u32>,
    buf: &mut &[u8],
) -> Result<Resume, ScheduleError> {
    let state_id = take_u32(buf, "resume state id")?;
    let tr_start = take_u32(buf, "resume range")?;
    let tr_end = take_u32(buf, "resume range")?;

    if state_id >= ctx.num_states {
        return Err(ScheduleError::UnknownState(state_id));
    }
    if tr_end < tr_start {
        return Err(ScheduleError::InvertedRange { start: tr_start, end: tr_end });
    }

    // the range being resumed must be expecting to wake up
    let handler = find_handler(schedule, cur, state_id, tr_start, tr_end)
        .ok_or(ScheduleError::ResumeUnmatched { state_id, start: tr_start, end: tr_end })?;
    if !matches!(handler.action, HandlerAction::Wait(_)) {
        return Err(ScheduleError::ResumeNotWait { state_id, start: tr_start, end: tr_end });
    }
    // without a waitstate between install and resume there is no guarantee
    // the waiting thread ever reached the state; refuse the race
    if !last_waitstate.is_some_and(|seen| handler.epoch <= seen) {
        return Err(ScheduleError::ResumeBeforeWaitstate { handler_epoch: handler.epoch });
    }

    Ok(Resume { state_id, tr_start, tr_end })
}

/// Searches every install command parsed so far, earlier epochs first, for a
/// handler with exactly this range.
fn find_handler<'a>(
    schedule: &'a Schedule,
    cur: &'a Epoch,
    state_id: u32,
    tr_start: u32,
    tr_end: u32,
) -> Option<&'a Handler> {
    schedule
        .epochs
        .iter()
        .chain(std::iter::once(cur))
        .flat_map(|epoch| &epoch.commands)
        .filter_map(|cmd| match cmd {
            Command::InstallHandler(install) if install.state_id == state_id => Some(install),
            _ => None,
        })
        .find_map(|install| install.handler_for_range(tr_start, tr_end))
}

fn parse_timespec(buf: &mut &[u8]) -> Result<TimeSpec, ScheduleError> {
    let unit = take_u8(buf, "time unit")?;
    let value = take_u32(buf, "time value")?;
    let unit = TimeUnit::from_wire(unit).ok_or(ScheduleError::BadTimeUnit(unit))?;
    Ok(TimeSpec { unit, value })
}

fn take_u8(buf: &mut &[u8], what: &'static str) -> Result<u8, ScheduleError> {
    if buf.remaining() < 1 {
        return Err(ScheduleError::Truncated(what));
    }
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut &[u8], what: &'static str) -> Result<u16, ScheduleError> {
    if buf.remaining() < 2 {
        return Err(ScheduleError::Truncated(what));
    }
    Ok(buf.get_u16())
}

fn take_u32(buf: &mut &[u8], what: &'static str) -> Result<u32, ScheduleError> {
    if buf.remaining() < 4 {
        return Err(ScheduleError::Truncated(what));
    }
    Ok(buf.get_u32())
}
