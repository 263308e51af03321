use std::fmt;
use std::str::FromStr;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Leading "vendor" bytes of every derived hardware address.
///
/// `0x02` sets the locally-administered bit and leaves the multicast bit
/// clear, so every derived address is a unicast LAA.
pub const MAC_VENDOR_PREFIX: [u8; 3] = [0x02, 0xab, 0xee];

/// Name of a managed VM.
///
/// The name addresses the kernel device node (`/dev/vmm/<name>`) and seeds the
/// hardware address, so it must be a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VmName(String);

impl VmName {
    /// Validates and wraps a VM name.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidVmName`] for empty names, `.`/`..`, or names
    /// containing `/`, NUL or whitespace.
    pub fn new(name: impl Into<String>) -> Result<Self, CoreError> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("name is empty")
        } else if name == "." || name == ".." {
            Some("name is a relative path component")
        } else if name.contains('/') {
            Some("name contains '/'")
        } else if name.chars().any(|c| c == '\0' || c.is_whitespace()) {
            Some("name contains whitespace or NUL")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(CoreError::InvalidVmName { name, reason: reason.to_owned() }),
            None => Ok(Self(name)),
        }
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VmName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VmName {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<VmName> for String {
    fn from(name: VmName) -> Self {
        name.0
    }
}

/// A 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Creates an address from raw bytes.
    #[must_use]
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Derives the address of the VM called `name`.
    ///
    /// The result is [`MAC_VENDOR_PREFIX`] followed by the first three bytes of
    /// MD5(`name`). It depends on nothing but the name, so a VM keeps its
    /// address (and its DHCP lease) across destroy/recreate cycles.
    ///
    /// Only 24 bits come from the name: two different names collide with
    /// probability ~n²/2²⁵ over a fleet of n VMs. Fine for a single host's
    /// handful of VMs, not a uniqueness guarantee.
    #[must_use]
    pub fn derive(name: &str) -> Self {
        let digest = Md5::digest(name.as_bytes());
        let [a, b, c] = MAC_VENDOR_PREFIX;
        Self([a, b, c, digest[0], digest[1], digest[2]])
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// True when the locally-administered bit is set.
    #[must_use]
    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// True when the multicast bit is clear.
    #[must_use]
    pub fn is_unicast(&self) -> bool {
        self.0[0] & 0x01 == 0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidMacAddress(s.to_owned());
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in &mut bytes {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}
