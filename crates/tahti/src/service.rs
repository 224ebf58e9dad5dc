//! The scheduler task
//!
//! A long-lived task, started once, that negotiates the schedule over the
//! control socket and then walks it epoch by epoch, executing each command
//! synchronously. Application threads only start entering states after the
//! initialization semaphore is posted, which happens at the first suspension
//! point so the initial epoch's handlers are guaranteed to be in place.

use crate::{
    config::RunConfig,
    error::ExecError,
    schedule::{Command, HandlerAction, HandlerSlot, Resume, Schedule},
    server,
};
use std::net::SocketAddr;
use tracing::{error, trace};

/// Entry point of the scheduler task: negotiate, then execute.
pub(crate) async fn run(config: &RunConfig, addr: SocketAddr) {
    if let Err(err) = server::negotiate(config, addr).await {
        error!(target: "sched", %err, "control negotiation failed; not scheduling");
        config.ready.post();
        return;
    }
    execute(config).await;
}

/// Walks the negotiated schedule. Always posts the initialization semaphore
/// exactly once, even when execution aborts early.
pub(crate) async fn execute(config: &RunConfig) {
    let mut posted = false;
    match config.schedule() {
        Some(schedule) => {
            if let Err(err) = walk(config, schedule, &mut posted).await {
                error!(target: "sched", %err, "schedule execution aborted");
            }
        }
        None => error!(target: "sched", "no schedule negotiated"),
    }
    if !posted {
        config.ready.post();
    }
}

async fn walk(
    config: &RunConfig,
    schedule: &Schedule,
    posted: &mut bool,
) -> Result<(), ExecError> {
    for (epoch_ix, epoch) in schedule.epochs.iter().enumerate() {
        trace!(target: "sched", epoch = epoch.id, commands = epoch.commands.len(), "executing epoch");
        for (cmd_ix, cmd) in epoch.commands.iter().enumerate() {
            // the first suspension point of the whole schedule is where the
            // embedding thread is released: every handler installed so far is
            // visible before any application thread can enter a state
            if !*posted && matches!(cmd, Command::Timeout(_) | Command::WaitState) {
                *posted = true;
                config.ready.post();
            }

            match cmd {
                Command::InstallHandler(install) => {
                    let state = config
                        .state(install.state_id)
                        .ok_or(ExecError::InstallUnknownState(install.state_id))?;
                    trace!(
                        target: "sched",
                        state = %state.name(),
                        tr_max = install.tr_max,
                        handlers = install.handlers.len(),
                        "installing handlers"
                    );
                    state.activate(
                        HandlerSlot { epoch_ix: epoch_ix as u32, cmd_ix: cmd_ix as u32 },
                        install.tr_max,
                    );
                }
                Command::Resume(resume) => release(config, resume)?,
                Command::Timeout(ts) => {
                    trace!(target: "sched", duration = ?ts.duration(), "timeout");
                    tokio::time::sleep(ts.duration()).await;
                }
                Command::WaitState => {
                    trace!(target: "sched", epoch = epoch.id, "waitstate barrier");
                    barrier(config, schedule, epoch_ix).await;
                }
            }
        }
    }
    trace!(target: "sched", "schedule complete");
    Ok(())
}

/// Releases the wait handler for exactly this range, once per ordinal in it.
fn release(config: &RunConfig, resume: &Resume) -> Result<(), ExecError> {
    let state = config
        .state(resume.state_id)
        .ok_or(ExecError::ResumeUnknownState(resume.state_id))?;
    let slot = state
        .active_slot()
        .ok_or(ExecError::ResumeDormantState(resume.state_id))?;
    let install = config
        .resolve(slot)
        .ok_or(ExecError::ResumeDormantState(resume.state_id))?;
    let handler = install.handler_for_range(resume.tr_start, resume.tr_end).ok_or(
        ExecError::ResumeUnmatched {
            state_id: resume.state_id,
            start: resume.tr_start,
            end: resume.tr_end,
        },
    )?;
    let HandlerAction::Wait(gate) = &handler.action else {
        return Err(ExecError::ResumeNotWait {
            state_id: resume.state_id,
            start: resume.tr_start,
            end: resume.tr_end,
        });
    };
    trace!(
        target: "sched",
        state = %state.name(),
        tr_start = resume.tr_start,
        tr_end = resume.tr_end,
        "resuming range"
    );
    gate.post_many(resume.width());
    Ok(())
}

/// Blocks until every state installed in epochs up to `max_epoch_ix` whose
/// cap is still finite has been entered by its full complement of threads.
async fn barrier(config: &RunConfig, schedule: &Schedule, max_epoch_ix: usize) {
    for state_id in schedule.install_targets(max_epoch_ix) {
        let Some(state) = config.state(state_id) else {
            continue;
        };
        if state.is_dormant() {
            continue;
        }
        trace!(target: "sched", state = %state.name(), "waiting for cap");
        state.waitstate().acquire().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{Epoch, Handler, InstallHandler, TR_UNBOUNDED, TimeSpec, TimeUnit};
    use crate::sync::Sema;
    use crate::state;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn install(state_id: u32, tr_max: u32, handlers: Vec<Handler>) -> Command {
        Command::InstallHandler(InstallHandler { state_id, tr_max, handlers })
    }

    fn unbounded_continue() -> Handler {
        Handler {
            epoch: 0,
            tr_start: 1,
            tr_end: TR_UNBOUNDED,
            action: HandlerAction::Continue,
        }
    }

    #[tokio::test]
    async fn empty_schedule_finishes_and_posts_ready() {
        let config = RunConfig::new();
        config.set_schedule(Schedule::default());
        execute(&config).await;
        config.ready.wait();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ready_posted_before_first_timeout() {
        let config = Arc::new(RunConfig::new());
        config.add_state("s");
        config.set_schedule(Schedule {
            epochs: vec![Epoch {
                id: 0,
                notify: false,
                commands: vec![
                    install(0, 2, vec![unbounded_continue()]),
                    Command::Timeout(TimeSpec { unit: TimeUnit::Seconds, value: 5 }),
                ],
            }],
        });

        let started = Instant::now();
        let sched = Arc::clone(&config);
        tokio::spawn(async move { execute(&sched).await });
        // ready comes up front, long before the timeout elapses
        tokio::task::block_in_place(|| config.ready.wait());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn install_activates_the_state() {
        let config = Arc::new(RunConfig::new());
        config.add_state("s");
        config.set_schedule(Schedule {
            epochs: vec![Epoch {
                id: 0,
                notify: false,
                commands: vec![install(0, 2, vec![unbounded_continue()])],
            }],
        });
        execute(&config).await;
        assert_eq!(state::enter(&config, 0), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn waitstate_blocks_until_cap_then_resume_releases_waiters() {
        let gate = Sema::new(0);
        let config = Arc::new(RunConfig::new());
        config.add_state("raced");
        config.set_schedule(Schedule {
            epochs: vec![
                Epoch {
                    id: 0,
                    notify: false,
                    commands: vec![
                        install(
                            0,
                            3,
                            vec![
                                Handler {
                                    epoch: 0,
                                    tr_start: 1,
                                    tr_end: 2,
                                    action: HandlerAction::Wait(gate.clone()),
                                },
                                unbounded_continue(),
                            ],
                        ),
                        Command::WaitState,
                    ],
                },
                Epoch {
                    id: 1,
                    notify: false,
                    commands: vec![Command::Resume(Resume {
                        state_id: 0,
                        tr_start: 1,
                        tr_end: 2,
                    })],
                },
            ],
        });

        let sched = Arc::clone(&config);
        let scheduler = tokio::spawn(async move { execute(&sched).await });

        tokio::task::block_in_place(|| config.ready.wait());

        // two threads block in the wait range, a third trips the cap
        let mut workers = Vec::new();
        for _ in 0..3 {
            let entering = Arc::clone(&config);
            workers.push(std::thread::spawn(move || state::enter(&entering, 0)));
        }

        scheduler.await.unwrap();
        let mut ordinals: Vec<_> =
            workers.into_iter().map(|w| w.join().unwrap()).collect();
        ordinals.sort_unstable();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn resume_of_displaced_handler_aborts_execution() {
        // the second install replaces the first; the resume then points at a
        // range the active list no longer carries
        let config = RunConfig::new();
        config.add_state("s");
        config.set_schedule(Schedule {
            epochs: vec![Epoch {
                id: 0,
                notify: false,
                commands: vec![
                    install(
                        0,
                        2,
                        vec![Handler {
                            epoch: 0,
                            tr_start: 1,
                            tr_end: 1,
                            action: HandlerAction::Wait(Sema::new(0)),
                        }],
                    ),
                    install(0, 2, vec![unbounded_continue()]),
                    Command::Resume(Resume { state_id: 0, tr_start: 1, tr_end: 1 }),
                ],
            }],
        });
        execute(&config).await;
        // execution aborted but ready is still posted
        config.ready.wait();
    }

    #[tokio::test]
    async fn timeout_sleeps_for_the_decoded_duration() {
        let config = RunConfig::new();
        config.set_schedule(Schedule {
            epochs: vec![Epoch {
                id: 0,
                notify: false,
                commands: vec![Command::Timeout(TimeSpec { unit: TimeUnit::Millis, value: 30 })],
            }],
        });
        let started = Instant::now();
        execute(&config).await;
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
