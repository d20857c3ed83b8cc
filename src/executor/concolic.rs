use num_bigint_dig::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::executor::utils::{all_ones, wrap_to_width};
use crate::ir::expression::{Expr, ExprRef};
use crate::ir::types::Type;

/// Algorithms a concolic variable can stand for.
pub const SUPPORTED_ALGORITHMS: [&str; 5] = ["crc32", "crc16", "identity", "csum16", "xor16"];

pub fn is_supported(algorithm: &str) -> bool {
    SUPPORTED_ALGORITHMS.contains(&algorithm)
}

/// Packs constant bit-vector arguments into a byte string, most significant
/// field first. The bit string is left-padded with zeros to a byte boundary.
fn pack_bytes(args: &[ExprRef]) -> Option<Vec<u8>> {
    let mut acc = BigInt::zero();
    let mut total_width: u32 = 0;
    for arg in args {
        let (value, width) = match arg.as_ref() {
            Expr::Constant { ty, value } => (value.clone(), ty.width_bits()?),
            Expr::Bool { value } => (BigInt::from(*value as u8), 1),
            _ => return None,
        };
        let value = wrap_to_width(&value, width, false);
        acc = (acc << width as usize) | value;
        total_width += width;
    }
    let num_bytes = ((total_width + 7) / 8) as usize;
    let mut bytes = Vec::with_capacity(num_bytes);
    for i in (0..num_bytes).rev() {
        let byte = (&acc >> (i * 8)) & BigInt::from(0xFFu32);
        bytes.push(byte.to_u8()?);
    }
    Some(bytes)
}

fn crc32(bytes: &[u8]) -> u64 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for b in bytes {
        crc ^= *b as u32;
        for _ in 0..8 {
            let lsb = crc & 1;
            crc >>= 1;
            if lsb != 0 {
                crc ^= 0xEDB8_8320;
            }
        }
    }
    (crc ^ 0xFFFF_FFFF) as u64
}

fn crc16(bytes: &[u8]) -> u64 {
    let mut crc: u16 = 0;
    for b in bytes {
        crc ^= *b as u16;
        for _ in 0..8 {
            let lsb = crc & 1;
            crc >>= 1;
            if lsb != 0 {
                crc ^= 0xA001;
            }
        }
    }
    crc as u64
}

fn words16(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes.chunks(2).map(|c| {
        let hi = c[0] as u32;
        let lo = if c.len() > 1 { c[1] as u32 } else { 0 };
        (hi << 8) | lo
    })
}

fn csum16(bytes: &[u8]) -> u64 {
    let mut sum: u32 = 0;
    for w in words16(bytes) {
        sum += w;
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    (!sum & 0xFFFF) as u64
}

fn xor16(bytes: &[u8]) -> u64 {
    words16(bytes).fold(0u32, |acc, w| acc ^ w) as u64
}

/// Computes the concrete value of a concolic function once all of its
/// arguments are constants.
///
/// # Arguments
///
/// * `algorithm` - One of `SUPPORTED_ALGORITHMS`.
/// * `args` - The data fields, in order.
/// * `ty` - Result type; the digest is truncated to its width.
///
/// # Returns
///
/// `None` if an argument is not yet constant or the algorithm is unknown.
pub fn compute(algorithm: &str, args: &[ExprRef], ty: &Type) -> Option<BigInt> {
    let width = ty.width_bits()?;
    let result = if algorithm == "identity" {
        let mut acc = BigInt::zero();
        for arg in args {
            let (value, w) = match arg.as_ref() {
                Expr::Constant { ty, value } => (value.clone(), ty.width_bits()?),
                Expr::Bool { value } => (BigInt::from(*value as u8), 1),
                _ => return None,
            };
            acc = (acc << w as usize) | wrap_to_width(&value, w, false);
        }
        acc
    } else {
        let bytes = pack_bytes(args)?;
        let digest = match algorithm {
            "crc32" => crc32(&bytes),
            "crc16" => crc16(&bytes),
            "csum16" => csum16(&bytes),
            "xor16" => xor16(&bytes),
            _ => return None,
        };
        BigInt::from(digest)
    };
    Some(result & all_ones(width))
}
