//! Fuzz target: unescaping of quoted `grub:in` literals.
//!
//! Arbitrary property values must either decode or be rejected, never panic.

#![no_main]

use keeper_core::{unquote, BootInput};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(bytes) = unquote(text) {
        // Every escape shrinks or keeps the length; the quotes are dropped.
        assert!(bytes.len() + 2 <= text.len(), "decoded literal longer than its source");
    }

    match BootInput::from_property(Some(text)) {
        Ok(BootInput::Literal(_)) => assert!(text.starts_with('"')),
        Ok(BootInput::Inherit) => assert_eq!(text, "-"),
        Ok(_) | Err(_) => {}
    }
});
