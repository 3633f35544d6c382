//! Compact ("bits") encodings of the 256-bit difficulty target.
//!
//! Two distinct codecs live here and must not be conflated. The *classic*
//! codec is the Bitcoin compact encoding with a restricted exponent and
//! mantissa window, used by the legacy moving-average retargeting rule. The
//! *signed-magnitude* codec mirrors OpenSSL's bignum-to-MPI packing and is
//! the encoding the exponential (ASERT) rule emits; it tolerates the wider
//! range of values that rule produces.
use primitive_types::U256;
use thiserror::Error;

use crate::block::{Bits, Target};

/// An error in a compact-target conversion.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The exponent byte is outside the classic `[0x03, 0x1e]` window.
    #[error("compact exponent {0:#04x} outside [0x03, 0x1e]")]
    Exponent(u8),
    /// The mantissa is outside the classic `[0x8000, 0x7fffff]` window.
    #[error("compact mantissa {0:#x} outside [0x8000, 0x7fffff]")]
    Mantissa(u32),
    /// The sign flag of a signed-magnitude encoding is set.
    #[error("compact target is negative")]
    Negative,
    /// A signed-magnitude encoding does not fit in 256 bits.
    #[error("compact target has overflown")]
    Overflow,
}

/// Decode classic compact bits into a target.
pub fn bits_to_target(bits: Bits) -> Result<Target, Error> {
    let exponent = (bits >> 24) as u8;
    if !(0x03..=0x1e).contains(&exponent) {
        return Err(Error::Exponent(exponent));
    }
    let mantissa = bits & 0x00ff_ffff;
    if !(0x8000..=0x7f_ffff).contains(&mantissa) {
        return Err(Error::Mantissa(mantissa));
    }
    Ok(U256::from(mantissa) << (8 * (exponent as usize - 3)))
}

/// Encode a target as classic compact bits, using the minimal byte length
/// and left-padding when the top bit of the first significant byte is set.
pub fn target_to_bits(target: Target) -> Result<Bits, Error> {
    let mut size = (target.bits() + 7) / 8;
    let mut mantissa = if size <= 3 {
        size = 3;
        target.low_u64() as u32
    } else {
        (target >> (8 * (size - 3))).low_u64() as u32
    };
    // Avoid the sign bit of the underlying signed-magnitude representation.
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        size += 1;
    }
    if !(0x03..=0x1e).contains(&size) {
        return Err(Error::Exponent(size as u8));
    }
    if !(0x8000..=0x7f_ffff).contains(&mantissa) {
        return Err(Error::Mantissa(mantissa));
    }
    Ok((size as u32) << 24 | mantissa)
}

/// Encode a target in the signed-magnitude compact form produced by the
/// arbitrary-precision "big number to bits" routine of the full nodes.
///
/// The value is laid out as a minimal big-endian byte string with an extra
/// zero byte whenever the most-significant data byte has its top bit set, so
/// the encoding can never be misread as negative. The compact word packs the
/// byte length with the first three data bytes.
pub fn encode_compact(target: Target) -> Bits {
    let mut bytes = [0u8; 32];
    target.to_big_endian(&mut bytes);

    let start = match bytes.iter().position(|&b| b != 0) {
        Some(start) => start,
        None => return 0,
    };
    let mut data = Vec::with_capacity(33);
    if bytes[start] & 0x80 != 0 {
        data.push(0);
    }
    data.extend_from_slice(&bytes[start..]);

    let mut size = data.len() as u32;
    let mut compact = size << 24;
    for (i, &b) in data.iter().take(3).enumerate() {
        compact |= (b as u32) << (16 - 8 * i);
    }
    // If the packed word ended up with the sign bit set, shift a byte out
    // and account for it in the length.
    if compact & 0x0080_0000 != 0 {
        size += 1;
        compact = size << 24 | (compact >> 8) & 0x007f_ffff;
    }
    compact
}

/// Decode a signed-magnitude compact word into a target. Rejects encodings
/// flagged negative or too long to fit in 256 bits.
pub fn decode_compact(compact: Bits) -> Result<Target, Error> {
    let size = (compact >> 24) as usize;
    let word = compact & 0x007f_ffff;

    if word == 0 {
        return Ok(U256::zero());
    }
    if compact & 0x0080_0000 != 0 {
        return Err(Error::Negative);
    }
    if size > 34 || (size > 33 && word > 0xff) || (size > 32 && word > 0xffff) {
        return Err(Error::Overflow);
    }
    if size <= 3 {
        Ok(U256::from(word >> (8 * (3 - size))))
    } else {
        Ok(U256::from(word) << (8 * (size - 3)))
    }
}
