//! End-to-end: malformed bytecode is refused
//!
//! A well-formed timeslice prologue followed by an unknown command tag: the
//! greeting gets its `joo`, the `ota se` is answered with `ei`, and the
//! library schedules nothing for the rest of the process lifetime.

use std::net::SocketAddr;
use tahti::{ENTER_FAILED, controller::Controller, error::WireError};

#[test]
fn unknown_command_tag_is_refused() {
    let probe = tahti::register_state("probe");
    let addr: SocketAddr = "127.0.0.1:28808".parse().unwrap();

    let controller = std::thread::spawn(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(async {
                let mut controller = Controller::connect(addr).await.unwrap();
                // timeslice 0, notify 0, then a tag the parser has never
                // heard of
                let mut bytecode = vec![0x76, 0x04, 0x6c, 0x00];
                bytecode.extend_from_slice(&0u32.to_be_bytes());
                bytecode.push(0);
                bytecode.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
                controller.send_bytecode(&bytecode).await
            })
    });

    // returns despite the failure: the scheduler gives up and releases us
    tahti::start(addr);

    let verdict = controller.join().unwrap();
    assert!(matches!(verdict, Err(WireError::Refused)));

    // nothing was installed and nothing ever will be
    assert_eq!(tahti::enter_state(probe), ENTER_FAILED);
}
