//! Library of common Marscoin functionality shared by the ares crates.
#![warn(missing_docs)]
pub mod block;
pub mod compact;
pub mod network;
