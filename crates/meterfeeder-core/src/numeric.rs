//! Typed random values derived from raw entropy bytes.
//!
//! The conversions are pure functions of the bytes they are given. The
//! `rand_*` helpers take a `fetch` closure that acquires `n` fresh bytes from
//! a generator; any acquisition error is returned as-is and no value is
//! derived from partial data.

use crate::error::{Error, Result};

/// Bytes consumed by [`int32_from_le`].
pub const INT32_BYTES: usize = 4;

/// Bytes consumed by [`uniform_from_le48`] (48-bit mantissa).
pub const UNIFORM_BYTES: usize = 6;

/// 2^48, the number of distinct uniform values.
pub const UNIFORM_SCALE: f64 = 281_474_976_710_656.0;

/// Half of the uniform distribution's LSB width (2^-49), added to both
/// Box-Muller inputs so `ln(0)` is never taken.
pub const HALF_UNIFORM_LSB: f64 = 1.776_356_839_400_250_5e-15;

/// Little-endian signed 32-bit integer.
pub fn int32_from_le(bytes: [u8; INT32_BYTES]) -> i32 {
    i32::from_le_bytes(bytes)
}

/// Little-endian unsigned 48-bit mantissa scaled into `[0, 1)`.
pub fn uniform_from_le48(bytes: [u8; UNIFORM_BYTES]) -> f64 {
    let mut wide = [0u8; 8];
    wide[..UNIFORM_BYTES].copy_from_slice(&bytes);
    u64::from_le_bytes(wide) as f64 / UNIFORM_SCALE
}

/// Box-Muller cosine deviate from two uniforms in `[0, 1)`.
///
/// Only `cos(2πu2)·sqrt(-2·ln(u1))` is returned; the sine companion is
/// discarded.
pub fn normal_from_uniforms(u1: f64, u2: f64) -> f64 {
    let u1 = u1 + HALF_UNIFORM_LSB;
    let u2 = u2 + HALF_UNIFORM_LSB;
    let sqrt_term = (-2.0 * u1.ln()).sqrt();
    (std::f64::consts::TAU * u2).cos() * sqrt_term
}

fn take<const N: usize>(bytes: Vec<u8>) -> Result<[u8; N]> {
    bytes.try_into().map_err(|v: Vec<u8>| Error::BufferLength {
        expected: N,
        received: v.len(),
    })
}

/// Acquire 4 bytes and interpret them as an `i32`.
pub fn rand_int32<F>(mut fetch: F) -> Result<i32>
where
    F: FnMut(usize) -> Result<Vec<u8>>,
{
    Ok(int32_from_le(take(fetch(INT32_BYTES)?)?))
}

/// Acquire 6 bytes and scale them into `[0, 1)`.
pub fn rand_uniform<F>(mut fetch: F) -> Result<f64>
where
    F: FnMut(usize) -> Result<Vec<u8>>,
{
    Ok(uniform_from_le48(take(fetch(UNIFORM_BYTES)?)?))
}

/// Standard normal deviate from two separate uniform acquisitions.
pub fn rand_normal<F>(mut fetch: F) -> Result<f64>
where
    F: FnMut(usize) -> Result<Vec<u8>>,
{
    let u1 = rand_uniform(&mut fetch)?;
    let u2 = rand_uniform(&mut fetch)?;
    Ok(normal_from_uniforms(u1, u2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(bytes: &'static [u8]) -> impl FnMut(usize) -> Result<Vec<u8>> {
        let mut offset = 0;
        move |n| {
            let out = bytes[offset..offset + n].to_vec();
            offset += n;
            Ok(out)
        }
    }

    #[test]
    fn test_int32_little_endian() {
        assert_eq!(int32_from_le([0x01, 0x00, 0x00, 0x00]), 1);
        assert_eq!(int32_from_le([0xFF, 0xFF, 0xFF, 0xFF]), -1);
        assert_eq!(int32_from_le([0x00, 0x00, 0x00, 0x80]), i32::MIN);
        assert_eq!(rand_int32(fixed(&[0x78, 0x56, 0x34, 0x12])).unwrap(), 0x1234_5678);
    }

    #[test]
    fn test_uniform_bounds() {
        assert_eq!(uniform_from_le48([0; 6]), 0.0);
        let top = uniform_from_le48([0xFF; 6]);
        assert!(top < 1.0);
        assert_eq!(top, (UNIFORM_SCALE - 1.0) / UNIFORM_SCALE);
    }

    #[test]
    fn test_uniform_scaling_is_little_endian() {
        assert_eq!(uniform_from_le48([1, 0, 0, 0, 0, 0]), 1.0 / UNIFORM_SCALE);
        assert_eq!(uniform_from_le48([0, 0, 0, 0, 0, 0x80]), 0.5);
    }

    #[test]
    fn test_half_lsb_constant() {
        assert_eq!(HALF_UNIFORM_LSB, 0.5 / UNIFORM_SCALE);
    }

    #[test]
    fn test_normal_from_zero_uniforms_is_finite() {
        let n = normal_from_uniforms(0.0, 0.0);
        assert!(n.is_finite());
        assert!(n > 8.0);
    }

    #[test]
    fn test_normal_reference_values() {
        // u1 = 0.5, u2 = 0.5 (minus epsilon): cos(π) * sqrt(2 ln 2)
        let n = normal_from_uniforms(0.5 - HALF_UNIFORM_LSB, 0.5 - HALF_UNIFORM_LSB);
        let expected = -(2.0 * std::f64::consts::LN_2).sqrt();
        assert!((n - expected).abs() < 1e-12, "{n} vs {expected}");
    }

    #[test]
    fn test_rand_normal_consumes_two_uniforms() {
        let mut calls = Vec::new();
        let n = rand_normal(|len| {
            calls.push(len);
            Ok(vec![0, 0, 0, 0, 0, 0x80])
        })
        .unwrap();
        assert_eq!(calls, vec![UNIFORM_BYTES, UNIFORM_BYTES]);
        assert!(n.is_finite());
    }

    #[test]
    fn test_rand_normal_propagates_second_failure() {
        let mut n = 0;
        let result = rand_normal(|len| {
            n += 1;
            if n == 2 {
                Err(Error::NotFound)
            } else {
                Ok(vec![0xAB; len])
            }
        });
        assert_eq!(result, Err(Error::NotFound));
    }

    #[test]
    fn test_wrong_buffer_length_is_rejected() {
        let err = rand_uniform(|_| Ok(vec![1, 2, 3])).unwrap_err();
        assert_eq!(
            err,
            Error::BufferLength {
                expected: UNIFORM_BYTES,
                received: 3
            }
        );
    }
}
