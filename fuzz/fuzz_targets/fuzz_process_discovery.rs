//! Fuzz target: `fuser` and `fstat` output parsing.
//!
//! Discovery is best effort, so garbage must map to "not found", never panic.

#![no_main]

use keeper_executor::discovery::{parse_fstat_tap, parse_fuser_pid, Discovery};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);

    if let Discovery::Found(pid) = parse_fuser_pid(&text) {
        assert_ne!(pid, 0, "pid 0 is never a hypervisor");
    }

    if let Some(tap) = parse_fstat_tap(&text) {
        assert!(tap.starts_with("tap"));
        assert!(tap.len() > 3 && tap[3..].bytes().all(|b| b.is_ascii_digit()));
    }
});
