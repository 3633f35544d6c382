//! Block header primitives and the 80-byte wire codec.
use std::fmt;
use std::str::FromStr;

use primitive_types::U256;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Difficulty target of a block.
pub type Target = U256;

/// Block work.
pub type Work = U256;

/// Compact difficulty bits (target) of a block.
pub type Bits = u32;

/// Height of a block.
pub type Height = u64;

/// Block time (seconds since Epoch).
pub type BlockTime = u32;

/// Size of a serialized block header, in bytes.
pub const HEADER_SIZE: usize = 80;

/// Number of headers in a retarget period ("chunk").
pub const CHUNK_SIZE: Height = 2016;

/// An error decoding a block header.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The input was empty.
    #[error("invalid header: empty input")]
    Empty,
    /// The input was not exactly [`HEADER_SIZE`] bytes.
    #[error("invalid header length: {0}")]
    Length(usize),
}

/// A 256-bit block hash.
///
/// Held in internal (digest) byte order, which is also the order hashes
/// appear in on the wire. The hex form is byte-reversed, as displayed by
/// every other Bitcoin-family tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    /// The all-zero hash, standing in for the virtual block below genesis.
    pub const ZERO: Self = BlockHash([0; 32]);

    /// Construct a hash from bytes in internal order.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        BlockHash(bytes)
    }

    /// The hash bytes, in internal order.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether this is the all-zero sentinel.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// The hash read as a 256-bit integer, in the byte order used for
    /// comparisons against a difficulty target.
    pub fn to_u256(&self) -> U256 {
        U256::from_little_endian(&self.0)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        write!(f, "{}", hex::encode(reversed))
    }
}

impl FromStr for BlockHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        bytes.reverse();
        Ok(BlockHash(bytes))
    }
}

/// An 80-byte block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Block version.
    pub version: u32,
    /// Hash of the previous block. All-zero for the genesis block.
    pub prev_blockhash: BlockHash,
    /// Merkle root of the block's transactions.
    pub merkle_root: BlockHash,
    /// Block timestamp, seconds since Epoch.
    pub time: BlockTime,
    /// Compact encoding of the difficulty target.
    pub bits: Bits,
    /// Proof-of-work nonce.
    pub nonce: u32,
}

impl Header {
    /// Serialize the header to its 80-byte wire form. Integers are
    /// little-endian; hashes are written in internal byte order.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4..36].copy_from_slice(self.prev_blockhash.as_bytes());
        buf[36..68].copy_from_slice(self.merkle_root.as_bytes());
        buf[68..72].copy_from_slice(&self.time.to_le_bytes());
        buf[72..76].copy_from_slice(&self.bits.to_le_bytes());
        buf[76..80].copy_from_slice(&self.nonce.to_le_bytes());

        buf
    }

    /// Deserialize a header from exactly 80 bytes.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }
        if data.len() != HEADER_SIZE {
            return Err(DecodeError::Length(data.len()));
        }
        let u32_at = |i: usize| {
            u32::from_le_bytes(data[i..i + 4].try_into().expect("slice is four bytes"))
        };
        let hash_at = |i: usize| {
            BlockHash::from_bytes(data[i..i + 32].try_into().expect("slice is 32 bytes"))
        };

        Ok(Header {
            version: u32_at(0),
            prev_blockhash: hash_at(4),
            merkle_root: hash_at(36),
            time: u32_at(68),
            bits: u32_at(72),
            nonce: u32_at(76),
        })
    }

    /// The header's identifying hash: double-SHA-256 of its wire form.
    pub fn block_hash(&self) -> BlockHash {
        BlockHash(sha256d(&self.encode()))
    }

    /// The header's proof-of-work hash: scrypt (N=1024, r=1, p=1) of its
    /// wire form, with the header doubling as its own salt.
    pub fn pow_hash(&self) -> BlockHash {
        let data = self.encode();
        let params = scrypt::Params::new(10, 1, 1, 32).expect("scrypt parameters are valid");
        let mut out = [0u8; 32];

        scrypt::scrypt(&data, &data, &params, &mut out)
            .expect("output length is valid for scrypt");

        BlockHash(out)
    }
}

/// Compute the double-SHA-256 of the given data.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}
