//! VM configuration resolved from volume metadata.
//!
//! Volume metadata is a flat key/value space. Only keys under
//! [`PROPERTY_PREFIX`] are VM properties; the prefix is stripped to form the
//! visible key. Lookups go through two layers: the values read from the volume,
//! then the fixed [`PROPERTY_DEFAULTS`] table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metadata namespace holding VM configuration.
pub const PROPERTY_PREFIX: &str = "bhyve:";

/// Metadata key whose locally-set value names the VM backed by a volume.
pub const NAME_TAG: &str = "bhyve:name";

/// Values used when a property is not set on the volume.
pub const PROPERTY_DEFAULTS: [(&str, &str); 4] = [
    ("bridge", "bridge0"),
    ("cpus", "1"),
    ("grub:root", "hd0,msdos1"),
    ("mem", "1024"),
];

/// Property keys with a meaning to the lifecycle manager.
pub mod keys {
    /// Bridge interface the VM's tap joins.
    pub const BRIDGE: &str = "bridge";
    /// Virtual CPU count.
    pub const CPUS: &str = "cpus";
    /// Memory size in megabytes.
    pub const MEM: &str = "mem";
    /// Root device passed to the boot loader.
    pub const GRUB_ROOT: &str = "grub:root";
    /// Boot loader input: `-` for stdin, or a double-quoted literal.
    pub const GRUB_IN: &str = "grub:in";
    /// Optional ISO image attached as a CD-ROM.
    pub const CDROM_ISO: &str = "cdrom_iso";
}

/// Returns the default for `key`, if the defaults table has one.
#[must_use]
pub fn default_for(key: &str) -> Option<&'static str> {
    PROPERTY_DEFAULTS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
}

/// Properties explicitly set on a VM's volume.
///
/// Immutable once built; a fresh read of the volume produces a new value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    /// Builds the property set from raw `(key, value)` metadata entries.
    ///
    /// Entries outside [`PROPERTY_PREFIX`] are dropped and the prefix is
    /// stripped from the rest. A later duplicate key overwrites an earlier one.
    pub fn from_metadata<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let values = entries
            .into_iter()
            .filter_map(|(key, value)| {
                key.as_ref()
                    .strip_prefix(PROPERTY_PREFIX)
                    .filter(|k| !k.is_empty())
                    .map(|k| (k.to_owned(), value.into()))
            })
            .collect();
        Self { values }
    }

    /// Resolves `key`: the stored value, else the default, else `""`.
    #[must_use]
    pub fn get(&self, key: &str) -> &str {
        self.values
            .get(key)
            .map(String::as_str)
            .or_else(|| default_for(key))
            .unwrap_or("")
    }

    /// Returns the stored value only, ignoring defaults.
    #[must_use]
    pub fn explicit(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the value of `key` when it is set and non-empty.
    #[must_use]
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        Some(self.get(key)).filter(|v| !v.is_empty())
    }

    /// Iterates over explicitly stored properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merged view of defaults overlaid with stored values.
    #[must_use]
    pub fn resolved(&self) -> BTreeMap<String, String> {
        let mut merged: BTreeMap<String, String> = PROPERTY_DEFAULTS
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        merged.extend(self.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Properties {
        Properties::from_metadata([
            ("type", "volume"),
            ("volsize", "10G"),
            ("bhyve:name", "web01"),
            ("bhyve:mem", "2048"),
            ("bhyve:bridge", "bridge0"),
            ("bhyve:", "dropped"),
        ])
    }

    #[test]
    fn from_metadata_keeps_only_prefixed_keys() {
        let props = sample();
        let keys: Vec<&str> = props.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["bridge", "mem", "name"]);
    }

    #[test]
    fn get_prefers_stored_value_over_default() {
        let props = sample();
        assert_eq!(props.get(keys::MEM), "2048");
        assert_eq!(props.get(keys::CPUS), "1", "unset key falls back to default");
    }

    #[test]
    fn get_returns_stored_value_equal_to_default() {
        let props = sample();
        assert_eq!(props.get(keys::BRIDGE), "bridge0");
        assert_eq!(props.explicit(keys::BRIDGE), Some("bridge0"), "value must count as set");
    }

    #[test]
    fn get_unknown_key_without_default_is_empty() {
        assert_eq!(sample().get(keys::CDROM_ISO), "");
        assert_eq!(sample().non_empty(keys::CDROM_ISO), None);
    }

    #[test]
    fn stored_empty_string_shadows_default() {
        let props = Properties::from_metadata([("bhyve:grub:root", "")]);
        assert_eq!(props.get(keys::GRUB_ROOT), "");
    }

    #[test]
    fn resolved_merges_defaults_and_stored_values() {
        let resolved = sample().resolved();
        assert_eq!(resolved.get("mem").map(String::as_str), Some("2048"));
        assert_eq!(resolved.get("grub:root").map(String::as_str), Some("hd0,msdos1"));
        assert_eq!(resolved.get("name").map(String::as_str), Some("web01"));
    }
}
