//! Fuzz target: `zfs get -H` output into the property resolver.
//!
//! Arbitrary tool output must parse without panicking, and only keys of the
//! VM namespace may survive into [`Properties`].

#![no_main]

use keeper_core::properties::default_for;
use keeper_core::Properties;
use keeper_executor::zfs::parse_tabular;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let rows = parse_tabular(&text);

    let props = Properties::from_metadata(
        rows.into_iter()
            .filter_map(|row| Some((row.first()?.clone(), row.get(1)?.clone()))),
    );

    for (key, value) in props.iter() {
        assert!(!key.is_empty(), "bare namespace prefix must be dropped");
        assert_eq!(props.get(key), value, "stored value must win over defaults");
    }
    for key in ["bridge", "cpus", "mem", "grub:root"] {
        if props.explicit(key).is_none() {
            assert_eq!(Some(props.get(key)), default_for(key));
        }
    }
});
