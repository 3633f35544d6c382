//! Marscoin peer network. Eg. *Mainnet*.
use std::collections::BTreeMap;

use primitive_types::U256;

use crate::block::{Bits, BlockHash, BlockTime, Height, Target, CHUNK_SIZE};

/// Highest (easiest) allowed proof-of-work target,
/// `0x00000fffff000000...` as a 256-bit integer.
pub const MAX_TARGET: Target = U256([0, 0, 0, 0x0000_0fff_ff00_0000]);

/// Mainnet genesis block id.
pub const GENESIS_MAINNET: &str =
    "04f40f4fd508d4ee3f35ce2c3d5e237882b1a25056e5c73f3f4cc20b0bbe29a0";

/// Testnet genesis block id.
pub const GENESIS_TESTNET: &str =
    "4966625a4b2851d9fdee139e56211a0d88575f59ed816ff5e6a63deb4e3ebfe2";

/// Marscoin peer network.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Network {
    /// Marscoin Mainnet.
    Mainnet,
    /// Marscoin Testnet.
    Testnet,
}

impl Default for Network {
    fn default() -> Self {
        Self::Mainnet
    }
}

impl Network {
    /// Return the short string representation of this network.
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }

    /// Get the hash of the genesis block of this network.
    pub fn genesis_hash(&self) -> BlockHash {
        let hash = match self {
            Self::Mainnet => GENESIS_MAINNET,
            Self::Testnet => GENESIS_TESTNET,
        };
        hash.parse()
            .expect("the genesis hash has the right number of bytes")
    }

    /// Get the consensus parameters for this network.
    pub fn params(&self) -> Params {
        match self {
            Self::Mainnet => Params {
                genesis_hash: self.genesis_hash(),
                max_target: MAX_TARGET,
                legacy_retarget_height: 126_000,
                asert_anchor_height: 2_999_999,
                asert_anchor_bits: 0x1e0fffff,
                target_spacing: 123,
                asert_half_life: 2 * 3600,
                checkpoint_bits: checkpoint_bits_mainnet(),
                checkpoints: Vec::new(),
                testnet: false,
            },
            Self::Testnet => Params {
                genesis_hash: self.genesis_hash(),
                max_target: MAX_TARGET,
                legacy_retarget_height: 126_000,
                asert_anchor_height: 2_999_999,
                asert_anchor_bits: 0x1e0fffff,
                target_spacing: 123,
                asert_half_life: 2 * 3600,
                checkpoint_bits: BTreeMap::new(),
                checkpoints: Vec::new(),
                testnet: true,
            },
        }
    }
}

/// Consensus parameters of a network.
#[derive(Debug, Clone)]
pub struct Params {
    /// Id of the genesis block.
    pub genesis_hash: BlockHash,
    /// Highest allowed proof-of-work target.
    pub max_target: Target,
    /// First height governed by the legacy moving-average rule.
    pub legacy_retarget_height: Height,
    /// Anchor height of the exponential (ASERT) rule.
    pub asert_anchor_height: Height,
    /// Required compact target of the anchor block.
    pub asert_anchor_bits: Bits,
    /// Target seconds between blocks.
    pub target_spacing: BlockTime,
    /// ASERT half-life, in seconds.
    pub asert_half_life: BlockTime,
    /// Per-height compact-target overrides, consulted before any arithmetic.
    pub checkpoint_bits: BTreeMap<Height, Bits>,
    /// Bootstrap checkpoints, one per 2016-header chunk.
    pub checkpoints: Vec<Checkpoint>,
    /// Whether proof-of-work enforcement is skipped (test networks).
    pub testnet: bool,
}

impl Params {
    /// Height of the last checkpointed header, `-1` if there are none.
    pub fn max_checkpoint(&self) -> i64 {
        self.checkpoints.len() as i64 * CHUNK_SIZE as i64 - 1
    }
}

/// A bootstrap checkpoint covering one 2016-header chunk, enough for a
/// peer to resume validation without the chain's full history.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// Hash of the last header of the chunk.
    pub hash: BlockHash,
    /// Required target at the end of the chunk.
    pub target: Target,
    /// Trailing raw headers seeding the moving-average window, newest first.
    pub headers: Vec<(Height, Vec<u8>)>,
}

/// Compact-target overrides for mainnet.
fn checkpoint_bits_mainnet() -> BTreeMap<Height, Bits> {
    [
        (2_999_999, 0x1e0fffff),
        (3_000_000, 0x1e0fcfef),
        (3_000_001, 0x1e0fa86f),
        (3_000_002, 0x1e0f8157),
        (3_000_100, 0x1e05ec8f),
        (3_000_999, 0x1c3908fc),
        (3_001_999, 0x1c009e02),
        (3_010_999, 0x1c00c5a0),
        (3_030_048, 0x1c00d6e9),
        (3_030_977, 0x1c00b788),
        (3_030_978, 0x1c00bc01),
        (3_055_555, 0x1c0097e6),
        (3_085_376, 0x1c00bf09),
        (3_150_020, 0x1c016afc),
        (3_150_021, 0x1c0167ec),
        (3_150_022, 0x1c0168d3),
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compact;

    #[test]
    fn test_max_target_matches_compact_form() {
        assert_eq!(compact::bits_to_target(0x1e0fffff).unwrap(), MAX_TARGET);
        assert_eq!(
            MAX_TARGET,
            U256::from(0x0f_ffffu64) << 216,
        );
    }

    #[test]
    fn test_genesis_hashes_parse() {
        assert_eq!(Network::Mainnet.genesis_hash().to_string(), GENESIS_MAINNET);
        assert_eq!(Network::Testnet.genesis_hash().to_string(), GENESIS_TESTNET);
    }

    #[test]
    fn test_anchor_override_is_present() {
        let params = Network::Mainnet.params();

        assert_eq!(
            params.checkpoint_bits.get(&params.asert_anchor_height),
            Some(&params.asert_anchor_bits)
        );
        assert_eq!(params.max_checkpoint(), -1);
    }

    #[test]
    fn test_testnet_skips_pow() {
        assert!(Network::Testnet.params().testnet);
        assert!(!Network::Mainnet.params().testnet);
    }
}
