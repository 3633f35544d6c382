//! Difficulty retargeting rules.
//!
//! Two arithmetic rules, selected purely by height: a Dark-Gravity-Wave v3
//! moving average in the legacy era, and the ASERT exponential schedule
//! anchored at a fixed block above it. Heights below the legacy era use the
//! network's maximum target.
use primitive_types::{U256, U512};

use ares_common::block::{Bits, BlockHash, Header, Height, Target, Work};
use ares_common::compact;
use ares_common::network::Params;

use crate::error::Error;

/// Number of past headers consulted by the legacy moving-average rule.
pub const DGW_PAST_BLOCKS: Height = 24;

/// The retargeting rule in effect at a given height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyRule {
    /// Fixed maximum target, for the chain's early history.
    MaxTarget,
    /// Dark-Gravity-Wave v3 moving average.
    LegacyMovingAverage,
    /// Absolutely Scheduled Exponentially Rising Target.
    Asert,
}

impl DifficultyRule {
    /// Select the rule in effect at `height`.
    pub fn at(height: Height, params: &Params) -> Self {
        if height < params.legacy_retarget_height {
            Self::MaxTarget
        } else if height < params.asert_anchor_height {
            Self::LegacyMovingAverage
        } else {
            Self::Asert
        }
    }
}

/// Read-only access to the headers a difficulty rule consults.
pub trait HeaderSource {
    /// Return the header at the given height, if known.
    fn header_at(&self, height: Height) -> Result<Option<Header>, Error>;
}

/// Headers of a chunk that were verified but not yet persisted.
///
/// While a chunk is validated, the moving-average rule must be able to walk
/// back through headers that live earlier in the same chunk, before the
/// chain file has been written.
#[derive(Debug, Default)]
pub struct ChunkWindow {
    start: Height,
    headers: Vec<Header>,
}

impl ChunkWindow {
    /// Whether no headers are pending.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Append a verified header. Heights must be contiguous.
    pub fn push(&mut self, height: Height, header: Header) {
        if self.headers.is_empty() {
            self.start = height;
        } else {
            assert_eq!(height, self.start + self.headers.len() as Height);
        }
        self.headers.push(header);
    }

    /// The pending header at `height`, if inside the window.
    pub fn get(&self, height: Height) -> Option<&Header> {
        if self.headers.is_empty() || height < self.start {
            return None;
        }
        self.headers.get((height - self.start) as usize)
    }
}

/// A header source overlaying a pending chunk window on a base source.
pub struct WithWindow<'a, S> {
    /// Persisted headers.
    pub base: &'a S,
    /// Verified but not yet persisted headers.
    pub window: &'a ChunkWindow,
}

impl<S: HeaderSource> HeaderSource for WithWindow<'_, S> {
    fn header_at(&self, height: Height) -> Result<Option<Header>, Error> {
        if let Some(header) = self.window.get(height) {
            return Ok(Some(*header));
        }
        self.base.header_at(height)
    }
}

/// Compute the required target at `height` under the rule in effect.
pub fn required_target<S: HeaderSource>(
    height: Height,
    source: &S,
    params: &Params,
) -> Result<Target, Error> {
    match DifficultyRule::at(height, params) {
        DifficultyRule::MaxTarget => Ok(params.max_target),
        DifficultyRule::LegacyMovingAverage => dgw3_target(height, source, params),
        DifficultyRule::Asert => {
            let prev = source
                .header_at(height - 1)?
                .ok_or(Error::MissingHeader(height - 1))?;
            asert_target(height, &prev, source, params)
        }
    }
}

/// Compute the compact target required at `height`, consulting the
/// checkpoint-bits override table before any arithmetic.
pub fn required_bits<S: HeaderSource>(
    height: Height,
    source: &S,
    params: &Params,
) -> Result<Bits, Error> {
    if let Some(&bits) = params.checkpoint_bits.get(&height) {
        return Ok(bits);
    }
    if height == params.asert_anchor_height {
        return Ok(params.asert_anchor_bits);
    }
    let target = required_target(height, source, params)?;
    match DifficultyRule::at(height, params) {
        DifficultyRule::Asert => Ok(compact::encode_compact(target)),
        _ => Ok(compact::target_to_bits(target)?),
    }
}

/// Decode the compact target in effect at `height` with the era's codec.
pub fn target_of_bits(height: Height, bits: Bits, params: &Params) -> Result<Target, Error> {
    if height >= params.asert_anchor_height {
        Ok(compact::decode_compact(bits)?)
    } else {
        Ok(compact::bits_to_target(bits)?)
    }
}

/// Dark-Gravity-Wave v3: a weighted average of the targets of the past
/// [`DGW_PAST_BLOCKS`] headers, scaled by the clamped elapsed time between
/// the oldest and newest of them.
fn dgw3_target<S: HeaderSource>(
    height: Height,
    source: &S,
    params: &Params,
) -> Result<Target, Error> {
    let mut avg = U256::zero();
    let mut newest_time = 0;
    let mut oldest_time = 0;

    for k in 1..=DGW_PAST_BLOCKS {
        let h = height - k;
        let header = source.header_at(h)?.ok_or(Error::MissingHeader(h))?;
        let target = compact::bits_to_target(header.bits)?;

        if k == 1 {
            avg = target;
            newest_time = header.time;
        }
        avg = (avg * U256::from(k) + target) / U256::from(k + 1);
        oldest_time = header.time;
    }

    let expected = DGW_PAST_BLOCKS as i64 * params.target_spacing as i64;
    let actual = (newest_time as i64 - oldest_time as i64).clamp(expected / 3, expected * 3);

    let target = avg * U256::from(actual as u64) / U256::from(expected as u64);
    if target > params.max_target {
        return Ok(params.max_target);
    }
    // Round-trip through the compact encoding, losing the same precision
    // the full nodes lose.
    Ok(compact::bits_to_target(compact::target_to_bits(target)?)?)
}

/// ASERT: the target doubles for every half-life the chain falls behind its
/// absolute schedule, measured from the anchor block.
fn asert_target<S: HeaderSource>(
    height: Height,
    prev: &Header,
    source: &S,
    params: &Params,
) -> Result<Target, Error> {
    let anchor_height = params.asert_anchor_height;

    // Heights at or before the anchor keep the anchor's own target.
    if height <= anchor_height {
        return Ok(params.max_target);
    }
    let anchor = source
        .header_at(anchor_height)?
        .ok_or(Error::MissingHeader(anchor_height))?;
    let anchor_target = compact::decode_compact(anchor.bits)?;

    let time_diff = prev.time as i64 - anchor.time as i64;
    let height_diff = (height - anchor_height - 1) as i64;
    let expected_secs = params.target_spacing as i64 * (height_diff + 1);

    let numerator = (time_diff - expected_secs) * 65536;
    // Rust's integer division truncates toward zero, exactly like the
    // C++ nodes; Python-style floor division would disagree here.
    let exponent = numerator / params.asert_half_life as i64;

    let shifts = exponent >> 16;
    let frac = (exponent & 0xffff) as u64;

    // `factor` carries 16 fractional bits approximating 2^(frac / 2^16).
    let mut next = u512_from(anchor_target) * U512::from(asert_factor(frac));
    next >>= 16;

    if shifts < 0 {
        let shift = -shifts as usize;
        next = if shift >= 512 { U512::zero() } else { next >> shift };
    } else {
        let shift = shifts as usize;
        if shift >= 512 || next.bits() + shift > 512 {
            return Ok(params.max_target);
        }
        next <<= shift;
    }

    let max = u512_from(params.max_target);
    if next > max {
        return Ok(params.max_target);
    }
    Ok(u256_from(next))
}

/// Cubic fixed-point approximation of `2^(frac / 2^16)`, scaled by 2^16.
fn asert_factor(frac: u64) -> u64 {
    debug_assert!(frac < 65536);
    let frac = frac as u128;

    // The polynomial saturates u64 near frac = 0xffff, hence u128.
    let poly = 195_766_423_245_049u128 * frac
        + 971_821_376u128 * frac * frac
        + 5_127u128 * frac * frac * frac
        + (1u128 << 47);

    65536 + (poly >> 48) as u64
}

/// Verify a header against its required compact target.
///
/// Test networks enforce linkage only and skip proof-of-work.
pub fn verify_header(
    header: &Header,
    height: Height,
    prev_hash: &BlockHash,
    required: Bits,
    expected_hash: Option<&BlockHash>,
    params: &Params,
) -> Result<(), Error> {
    let hash = header.block_hash();

    if let Some(expected) = expected_hash {
        if *expected != hash {
            return Err(Error::HashMismatch(height));
        }
    }
    if *prev_hash != header.prev_blockhash {
        return Err(Error::ChainLinkage {
            height,
            expected: *prev_hash,
            got: header.prev_blockhash,
        });
    }
    if params.testnet {
        return Ok(());
    }
    if header.bits != required {
        return Err(Error::BitsMismatch {
            height,
            expected: required,
            got: header.bits,
        });
    }
    let target = target_of_bits(height, required, params)?;
    if header.pow_hash().to_u256() > target {
        return Err(Error::InsufficientWork(height));
    }
    Ok(())
}

/// Expected number of hashes to find a block at the given target.
pub fn work(target: Target) -> Work {
    // floor(2^256 / (target + 1)), kept inside 256 bits.
    (!target / (target + 1)) + 1
}

fn u512_from(value: U256) -> U512 {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    U512::from_big_endian(&bytes)
}

fn u256_from(value: U512) -> U256 {
    debug_assert!(value.bits() <= 256);
    let mut bytes = [0u8; 64];
    value.to_big_endian(&mut bytes);
    U256::from_big_endian(&bytes[32..])
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    use ares_common::block::BlockHash;
    use ares_common::network::{Network, MAX_TARGET};

    struct MapSource(BTreeMap<Height, Header>);

    impl HeaderSource for MapSource {
        fn header_at(&self, height: Height) -> Result<Option<Header>, Error> {
            Ok(self.0.get(&height).copied())
        }
    }

    fn header(time: u32, bits: Bits) -> Header {
        Header {
            version: 2,
            prev_blockhash: BlockHash::ZERO,
            merkle_root: BlockHash::ZERO,
            time,
            bits,
            nonce: 0,
        }
    }

    fn params() -> Params {
        Network::Mainnet.params()
    }

    #[test]
    fn test_rule_selection() {
        let params = params();

        assert_eq!(DifficultyRule::at(0, &params), DifficultyRule::MaxTarget);
        assert_eq!(
            DifficultyRule::at(125_999, &params),
            DifficultyRule::MaxTarget
        );
        assert_eq!(
            DifficultyRule::at(126_000, &params),
            DifficultyRule::LegacyMovingAverage
        );
        assert_eq!(
            DifficultyRule::at(2_999_998, &params),
            DifficultyRule::LegacyMovingAverage
        );
        assert_eq!(DifficultyRule::at(2_999_999, &params), DifficultyRule::Asert);
        assert_eq!(DifficultyRule::at(3_500_000, &params), DifficultyRule::Asert);
    }

    #[test]
    fn test_early_history_uses_max_target() {
        let source = MapSource(BTreeMap::new());
        assert_eq!(required_target(100, &source, &params()).unwrap(), MAX_TARGET);
    }

    #[test]
    fn test_dgw3_no_drift_when_on_schedule() {
        let params = params();
        let height = 126_100;
        let bits = 0x1d2208fc;
        let spacing = params.target_spacing as i64;

        // 24 headers with identical bits; the oldest-to-newest span equals
        // the full target timespan.
        let mut headers = BTreeMap::new();
        for k in 1..=DGW_PAST_BLOCKS {
            let time = 1_700_000_000 - (k as i64 - 1) * spacing - spacing;
            headers.insert(height - k, header(time as u32, bits));
        }
        // Make the span exactly 24 spacings.
        let newest = 1_700_000_000u32 - spacing as u32;
        let oldest = newest - (DGW_PAST_BLOCKS as u32 * params.target_spacing);
        headers
            .get_mut(&(height - DGW_PAST_BLOCKS))
            .unwrap()
            .time = oldest;
        let source = MapSource(headers);

        let input = compact::bits_to_target(bits).unwrap();
        let result = required_target(height, &source, &params).unwrap();

        assert_eq!(result, input);
        assert_eq!(required_bits(height, &source, &params).unwrap(), bits);
    }

    #[test]
    fn test_dgw3_caps_at_max_target() {
        let params = params();
        let height = 126_100;

        // Maximum-target headers spread over far too much time would
        // push the average above the cap.
        let mut headers = BTreeMap::new();
        for k in 1..=DGW_PAST_BLOCKS {
            let time = 1_700_000_000 - k as u32 * 100_000;
            headers.insert(height - k, header(time, 0x1e0fffff));
        }
        let source = MapSource(headers);

        assert_eq!(required_target(height, &source, &params).unwrap(), MAX_TARGET);
    }

    #[test]
    fn test_dgw3_missing_header_is_reported() {
        let source = MapSource(BTreeMap::new());

        assert!(matches!(
            required_target(126_100, &source, &params()),
            Err(Error::MissingHeader(126_099))
        ));
    }

    #[test]
    fn test_asert_on_schedule_keeps_anchor_target() {
        let params = params();
        let anchor_height = params.asert_anchor_height;
        let anchor_time = 1_700_000_000u32;
        let anchor_bits = 0x1c3908fc;

        // Height chosen to miss the checkpoint-bits table.
        let height = anchor_height + 4;
        let expected_secs = params.target_spacing * (height - anchor_height) as u32;

        let mut headers = BTreeMap::new();
        headers.insert(anchor_height, header(anchor_time, anchor_bits));
        headers.insert(height - 1, header(anchor_time + expected_secs, 0));
        let source = MapSource(headers);

        let anchor_target = compact::decode_compact(anchor_bits).unwrap();
        assert_eq!(required_target(height, &source, &params).unwrap(), anchor_target);
        assert_eq!(required_bits(height, &source, &params).unwrap(), anchor_bits);
    }

    #[test]
    fn test_asert_doubles_per_half_life_behind() {
        let params = params();
        let anchor_height = params.asert_anchor_height;
        let anchor_time = 1_700_000_000u32;
        let anchor_bits = 0x1c3908fc;

        let height = anchor_height + 4;
        let expected_secs = params.target_spacing * (height - anchor_height) as u32;

        let mut headers = BTreeMap::new();
        headers.insert(anchor_height, header(anchor_time, anchor_bits));
        headers.insert(
            height - 1,
            header(anchor_time + expected_secs + params.asert_half_life, 0),
        );
        let source = MapSource(headers);

        let anchor_target = compact::decode_compact(anchor_bits).unwrap();
        let result = required_target(height, &source, &params).unwrap();

        assert_eq!(result, anchor_target * U256::from(2u64));
        assert_eq!(required_bits(height, &source, &params).unwrap(), 0x1c7211f8);
    }

    #[test]
    fn test_asert_halves_per_half_life_ahead() {
        let params = params();
        let anchor_height = params.asert_anchor_height;
        let anchor_time = 1_700_000_000u32;
        let anchor_bits = 0x1c3908fc;

        let height = anchor_height + 4;
        let expected_secs = params.target_spacing * (height - anchor_height) as u32;

        let mut headers = BTreeMap::new();
        headers.insert(anchor_height, header(anchor_time, anchor_bits));
        headers.insert(
            height - 1,
            header(anchor_time + expected_secs - params.asert_half_life, 0),
        );
        let source = MapSource(headers);

        let anchor_target = compact::decode_compact(anchor_bits).unwrap();
        let result = required_target(height, &source, &params).unwrap();

        assert_eq!(result, anchor_target / U256::from(2u64));
    }

    #[test]
    fn test_asert_truncating_division_is_continuous() {
        let params = params();
        let anchor_height = params.asert_anchor_height;
        let anchor_time = 1_700_000_000u32;
        let anchor_bits = 0x1c3908fc;

        let height = anchor_height + 4;
        let expected_secs = params.target_spacing * (height - anchor_height) as u32;

        // One second ahead of schedule: the target shrinks, but only
        // marginally, which distinguishes truncation from floor division.
        let mut headers = BTreeMap::new();
        headers.insert(anchor_height, header(anchor_time, anchor_bits));
        headers.insert(height - 1, header(anchor_time + expected_secs - 1, 0));
        let source = MapSource(headers);

        let anchor_target = compact::decode_compact(anchor_bits).unwrap();
        let result = required_target(height, &source, &params).unwrap();

        assert!(result < anchor_target);
        assert!(result > anchor_target / U256::from(2u64));
    }

    #[test]
    fn test_asert_caps_at_max_target() {
        let params = params();
        let anchor_height = params.asert_anchor_height;

        let height = anchor_height + 4;
        let mut headers = BTreeMap::new();
        headers.insert(anchor_height, header(1_700_000_000, 0x1e0fffff));
        // Decades behind schedule.
        headers.insert(height - 1, header(1_700_000_000 + 1_000_000_000, 0));
        let source = MapSource(headers);

        assert_eq!(required_target(height, &source, &params).unwrap(), MAX_TARGET);
    }

    #[test]
    fn test_checkpoint_bits_short_circuit() {
        let params = params();
        // No headers at all: the override table alone answers.
        let source = MapSource(BTreeMap::new());

        assert_eq!(required_bits(3_000_000, &source, &params).unwrap(), 0x1e0fcfef);
        assert_eq!(required_bits(3_150_022, &source, &params).unwrap(), 0x1c0168d3);
    }

    #[test]
    fn test_anchor_bits_enforced() {
        let params = params();
        let source = MapSource(BTreeMap::new());
        let required = required_bits(params.asert_anchor_height, &source, &params).unwrap();

        assert_eq!(required, params.asert_anchor_bits);

        // Wrong anchor bits fail regardless of the proof-of-work hash.
        let mut anchor = header(1_700_000_000, 0x1e0ffffe);
        anchor.prev_blockhash = BlockHash::from_bytes([7; 32]);
        let result = verify_header(
            &anchor,
            params.asert_anchor_height,
            &BlockHash::from_bytes([7; 32]),
            required,
            None,
            &params,
        );
        assert!(matches!(result, Err(Error::BitsMismatch { .. })));
    }

    #[test]
    fn test_verify_header_linkage() {
        let params = params();
        let h = header(1_500_000_000, 0x1e0fffff);

        let result = verify_header(
            &h,
            10,
            &BlockHash::from_bytes([9; 32]),
            0x1e0fffff,
            None,
            &params,
        );
        assert!(matches!(result, Err(Error::ChainLinkage { .. })));

        let expected = BlockHash::from_bytes([1; 32]);
        let result = verify_header(&h, 10, &BlockHash::ZERO, 0x1e0fffff, Some(&expected), &params);
        assert!(matches!(result, Err(Error::HashMismatch(10))));
    }

    #[test]
    fn test_testnet_skips_pow() {
        let params = Network::Testnet.params();
        // Bits that could never satisfy any real target.
        let h = header(1_500_000_000, 0x1c000001);

        verify_header(&h, 10, &BlockHash::ZERO, 0x1e0fffff, None, &params).unwrap();
    }

    #[test]
    fn test_chunk_window_overlay() {
        let mut window = ChunkWindow::default();
        assert!(window.is_empty());

        window.push(100, header(1, 0x1e0fffff));
        window.push(101, header(2, 0x1e0fffff));

        assert_eq!(window.get(100).unwrap().time, 1);
        assert_eq!(window.get(101).unwrap().time, 2);
        assert_eq!(window.get(99), None);
        assert_eq!(window.get(102), None);

        let mut base = BTreeMap::new();
        base.insert(99, header(0, 0x1e0fffff));
        let base = MapSource(base);
        let overlay = WithWindow {
            base: &base,
            window: &window,
        };

        assert_eq!(overlay.header_at(99).unwrap().unwrap().time, 0);
        assert_eq!(overlay.header_at(100).unwrap().unwrap().time, 1);
        assert_eq!(overlay.header_at(102).unwrap(), None);
    }

    #[test]
    fn test_asert_factor_bounds() {
        assert_eq!(asert_factor(0), 65536);
        // Approaches, but never reaches, a full doubling.
        assert!(asert_factor(65535) > 131_000);
        assert!(asert_factor(65535) < 131_072);
        // Monotone in the fractional part.
        assert!(asert_factor(1) > asert_factor(0));
        assert!(asert_factor(40_000) > asert_factor(20_000));
    }

    #[test]
    fn test_work_of_target() {
        assert_eq!(work(U256::MAX - 1), U256::from(1u64));
        assert_eq!(work(U256::from(1u64)), U256::one() << 255);
        // Halving the target doubles the work, up to integer truncation.
        let t = MAX_TARGET;
        assert!(work(t / U256::from(2u64)) >= work(t) * U256::from(2u64) - U256::from(2u64));
    }
}
