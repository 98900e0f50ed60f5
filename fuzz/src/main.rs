//! AFL persistent-mode target for the datagram parser.
//!
//! Any datagram that parses must survive an encode/parse round trip
//! unchanged; a panic marks the input as a crash.

#![expect(clippy::expect_used, reason = "panics are how AFL detects failures")]

use std::io::{self, Read};

use dots_client::message::wire::{MAX_DATAGRAM, parse_message};

unsafe extern "C" {
    fn __AFL_LOOP(cnt: u32) -> i32;
}

fn main() {
    let mut data = Vec::with_capacity(MAX_DATAGRAM);
    let limit = u64::try_from(MAX_DATAGRAM).unwrap_or(u64::MAX);
    loop {
        // SAFETY: provided by the AFL runtime linked into instrumented builds.
        if unsafe { __AFL_LOOP(1000) } == 0 {
            break;
        }
        data.clear();
        if io::stdin().take(limit).read_to_end(&mut data).is_err() {
            return;
        }

        let Ok(message) = parse_message(&data) else {
            continue;
        };
        let bytes = message.to_bytes().expect("parsed message re-encodes");
        let reparsed = parse_message(&bytes).expect("encoded message parses");
        assert_eq!(reparsed, message, "round trip changed the message");
    }
}
