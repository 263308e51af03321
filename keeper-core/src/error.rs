/// Errors produced by the `keeper-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A VM name cannot be used to address device nodes.
    #[error("invalid VM name {name:?}: {reason}")]
    InvalidVmName { name: String, reason: String },

    /// A quoted boot-input literal could not be unescaped.
    #[error("invalid boot input {literal:?}: {reason}")]
    InvalidBootInput { literal: String, reason: String },

    /// A hardware address string could not be parsed.
    #[error("invalid MAC address {0:?}")]
    InvalidMacAddress(String),
}
