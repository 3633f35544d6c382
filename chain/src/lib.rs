//! Marscoin SPV header-chain validation and chain selection.
//!
//! *Handles header import, difficulty calculation, chain storage and
//! fork selection.*
#![warn(missing_docs)]
pub mod chain;
pub mod difficulty;
pub mod error;
pub mod registry;
pub mod store;

pub use error::Error;
pub use registry::Registry;
