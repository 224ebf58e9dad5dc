//! Schedule re-encoder
//!
//! Inverse of [`parse`](super::parse): serializing a schedule the parser
//! accepted reproduces the original bytecode byte for byte. Controllers use
//! this to compile schedules they build in memory.

use crate::{
    schedule::{Command, HandlerAction, Schedule},
    wire,
};
use bytes::BufMut;

/// Serializes a schedule into control bytecode.
pub fn encode(schedule: &Schedule) -> Vec<u8> {
    let mut buf = Vec::new();
    for epoch in &schedule.epochs {
        buf.put_u32(wire::TIMESLICE);
        buf.put_u32(epoch.id);
        buf.put_u8(u8::from(epoch.notify));
        for cmd in &epoch.commands {
            match cmd {
                Command::InstallHandler(install) => {
                    buf.put_u32(wire::WHEN);
                    buf.put_u32(install.state_id);
                    buf.put_u8(0);
                    for handler in &install.handlers {
                        buf.put_u32(handler.tr_start);
                        buf.put_u32(handler.tr_end);
                        match &handler.action {
                            HandlerAction::Callback(callback_id) => {
                                buf.put_u16(wire::ACT_CALLBACK);
                                buf.put_u32(*callback_id);
                            }
                            HandlerAction::Continue => buf.put_u16(wire::ACT_CONTINUE),
                            HandlerAction::Panic => buf.put_u16(wire::ACT_PANIC),
                            HandlerAction::Sleep(ts) => {
                                buf.put_u16(wire::ACT_SLEEP);
                                buf.put_u8(ts.unit.wire_code());
                                buf.put_u32(ts.value);
                            }
                            HandlerAction::Wait(_) => buf.put_u16(wire::ACT_WAIT),
                        }
                    }
                    buf.put_u32(wire::WHEN_END);
                }
                Command::Resume(resume) => {
                    buf.put_u32(wire::RESUME);
                    buf.put_u32(resume.state_id);
                    buf.put_u32(resume.tr_start);
                    buf.put_u32(resume.tr_end);
                }
                Command::Timeout(ts) => {
                    buf.put_u32(wire::TIMEOUT);
                    buf.put_u8(ts.unit.wire_code());
                    buf.put_u32(ts.value);
                }
                Command::WaitState => buf.put_u32(wire::WAITSTATE),
            }
        }
        buf.put_u32(wire::TIMESLICE_END);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{Epoch, Handler, InstallHandler, TimeSpec, TimeUnit};
    use crate::sync::Sema;
    use crate::wire::parse::{ParseContext, parse};

    #[test]
    fn empty_schedule_encodes_to_nothing() {
        assert!(encode(&Schedule::default()).is_empty());
    }

    #[test]
    fn built_schedule_survives_a_parse() {
        let schedule = Schedule {
            epochs: vec![
                Epoch {
                    id: 0,
                    notify: false,
                    commands: vec![
                        Command::InstallHandler(InstallHandler {
                            state_id: 0,
                            tr_max: 2,
                            handlers: vec![
                                Handler {
                                    epoch: 0,
                                    tr_start: 1,
                                    tr_end: 1,
                                    action: HandlerAction::Wait(Sema::new(0)),
                                },
                                Handler {
                                    epoch: 0,
                                    tr_start: 2,
                                    tr_end: 2,
                                    action: HandlerAction::Sleep(TimeSpec {
                                        unit: TimeUnit::Millis,
                                        value: 5,
                                    }),
                                },
                            ],
                        }),
                        Command::WaitState,
                    ],
                },
                Epoch {
                    id: 1,
                    notify: true,
                    commands: vec![Command::Resume(crate::schedule::Resume {
                        state_id: 0,
                        tr_start: 1,
                        tr_end: 1,
                    })],
                },
            ],
        };

        let bytecode = encode(&schedule);
        let ctx = ParseContext { num_states: 1, num_callbacks: 0 };
        let reparsed = parse(&ctx, &bytecode).unwrap();
        assert_eq!(encode(&reparsed), bytecode);
        assert_eq!(reparsed.epochs.len(), 2);
        assert!(reparsed.epochs[1].notify);
    }
}
