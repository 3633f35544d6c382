//! Errors raised by the header-chain engine.
use thiserror::Error;

use ares_common::block::{Bits, BlockHash, DecodeError, Height};
use ares_common::compact;

use crate::store;

/// An error related to header-chain validation or storage.
#[derive(Debug, Error)]
pub enum Error {
    /// The header bytes are malformed.
    #[error("invalid header: {0}")]
    InvalidHeader(#[from] DecodeError),

    /// A referenced height is not known yet. During chunk verification this
    /// is a retry signal; anywhere else it is a hard failure.
    #[error("missing header at height {0}")]
    MissingHeader(Height),

    /// A compact-target encoding was out of range.
    #[error("compact target: {0}")]
    Compact(#[from] compact::Error),

    /// The header does not link to the claimed previous block.
    #[error("previous hash mismatch at height {height}: expected {expected}, got {got}")]
    ChainLinkage {
        /// Height of the offending header.
        height: Height,
        /// Hash the chain holds at `height - 1`.
        expected: BlockHash,
        /// Previous hash the header declares.
        got: BlockHash,
    },

    /// The header hash differs from the expected (already-known) hash.
    #[error("header hash mismatch at height {0}")]
    HashMismatch(Height),

    /// The header's compact target disagrees with the required one.
    #[error("bits mismatch at height {height}: expected {expected:#010x}, got {got:#010x}")]
    BitsMismatch {
        /// Height of the offending header.
        height: Height,
        /// Required compact target.
        expected: Bits,
        /// Compact target the header declares.
        got: Bits,
    },

    /// The proof-of-work hash exceeds the target.
    #[error("insufficient proof of work at height {0}")]
    InsufficientWork(Height),

    /// A chain may not fork below the last checkpoint.
    #[error("cannot fork below max checkpoint, forkpoint: {0}")]
    ForkBelowCheckpoint(Height),

    /// The fork-swap loop exceeded its bound.
    #[error("chainwork inconsistency: swapped fork with parent {0} times")]
    ChainworkInconsistency(usize),

    /// A filesystem failure underneath a chain.
    #[error("storage error: {0}")]
    Storage(#[from] store::Error),
}
