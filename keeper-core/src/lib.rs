//! Core types for the bheekeeper VM lifecycle manager.
//!
//! Defines the domain types shared by the executor and the CLI: validated VM
//! names, derived hardware addresses, the property resolver backed by volume
//! metadata, boot-loader input, and the lifecycle state model.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod boot;
pub mod error;
pub mod id;
pub mod properties;
pub mod state;

pub use boot::{unquote, BootInput, DeviceMap, ScriptedInput};
pub use error::CoreError;
pub use id::{MacAddress, VmName, MAC_VENDOR_PREFIX};
pub use properties::{Properties, NAME_TAG, PROPERTY_DEFAULTS, PROPERTY_PREFIX};
pub use state::{HypervisorExit, VmState, VmStatus};
