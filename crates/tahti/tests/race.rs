//! End-to-end: two-thread wait/resume race
//!
//! Timeslice 0 installs a wait for ordinal 1 and a continue for ordinal 2 on
//! one state, then raises the waitstate barrier; timeslice 1 resumes ordinal
//! 1. The first thread in blocks until the second has arrived.

use std::{net::SocketAddr, time::Duration};
use tahti::{
    controller::Controller,
    schedule::{
        Command, Epoch, Handler, HandlerAction, InstallHandler, Resume, Schedule,
    },
    sync::Sema,
};

fn init_tracing() {
    let _ = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn race_schedule(state_id: u32) -> Schedule {
    Schedule {
        epochs: vec![
            Epoch {
                id: 0,
                notify: false,
                commands: vec![
                    Command::InstallHandler(InstallHandler {
                        state_id,
                        tr_max: 0, // derived by the receiver, not on the wire
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
                                action: HandlerAction::Continue,
                            },
                        ],
                    }),
                    Command::WaitState,
                ],
            },
            Epoch {
                id: 1,
                notify: false,
                commands: vec![Command::Resume(Resume {
                    state_id,
                    tr_start: 1,
                    tr_end: 1,
                })],
            },
        ],
    }
}

#[test]
fn first_thread_waits_for_the_second() {
    init_tracing();

    let preread = tahti::register_state("preread");
    let addr: SocketAddr = "127.0.0.1:28807".parse().unwrap();

    let schedule = race_schedule(preread);
    let controller = std::thread::spawn(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(async {
                let mut controller = Controller::connect(addr).await?;
                controller
                    .send_schedule(&schedule)
                    .await
                    .map_err(std::io::Error::other)?;
                Ok::<_, std::io::Error>(())
            })
    });

    // blocks until the handlers above are installed
    tahti::start(addr);
    controller.join().unwrap().unwrap();

    // the lone first thread draws ordinal 1 and must hang on its wait
    // handler: the resume is gated on the barrier, which needs ordinal 2
    let first = std::thread::spawn(move || tahti::enter_state(preread));
    std::thread::sleep(Duration::from_millis(200));
    assert!(!first.is_finished(), "ordinal 1 resumed before the barrier");

    let second = std::thread::spawn(move || tahti::enter_state(preread));

    let mut ordinals = vec![first.join().unwrap(), second.join().unwrap()];
    ordinals.sort_unstable();
    assert_eq!(ordinals, vec![1, 2]);
}
