use num_bigint_dig::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};

/// Returns a mask with the lowest `width` bits set.
pub fn all_ones(width: u32) -> BigInt {
    (BigInt::one() << width as usize) - BigInt::one()
}

/// Wraps `value` into the range of a `width`-bit vector.
///
/// # Arguments
///
/// * `value` - The value to wrap.
/// * `width` - Bit width of the target type.
/// * `signed` - Whether the target type is two's complement.
///
/// # Returns
///
/// The wrapped value, in `[0, 2^width)` for unsigned types and in
/// `[-2^(width-1), 2^(width-1))` for signed ones.
pub fn wrap_to_width(value: &BigInt, width: u32, signed: bool) -> BigInt {
    if width == 0 {
        return BigInt::zero();
    }
    let modulus = BigInt::one() << width as usize;
    let mut v = value % &modulus;
    if v.is_negative() {
        v += &modulus;
    }
    if signed && v >= (&modulus >> 1) {
        v -= modulus;
    }
    v
}

/// Length of the contiguous prefix of ones in a `width`-bit mask. Returns
/// `None` if the mask is not a prefix mask.
///
/// # Examples
/// ```
/// use num_bigint_dig::BigInt;
/// use p4testgen::executor::utils::prefix_length;
///
/// assert_eq!(prefix_length(&BigInt::from(0xFFFFFF00u32), 32), Some(24));
/// assert_eq!(prefix_length(&BigInt::from(0x0Fu32), 8), None);
/// ```
pub fn prefix_length(mask: &BigInt, width: u32) -> Option<u32> {
    let mut len = 0;
    let mut seen_zero = false;
    for bit in (0..width).rev() {
        let set = !((mask >> bit as usize) & BigInt::one()).is_zero();
        if set {
            if seen_zero {
                return None;
            }
            len += 1;
        } else {
            seen_zero = true;
        }
    }
    Some(len)
}

/// Converts a shift amount to `usize`, saturating at `width` so that
/// oversized shifts clear the value.
pub fn shift_amount(amount: &BigInt, width: u32) -> usize {
    match amount.to_usize() {
        Some(a) if a <= width as usize => a,
        _ => width as usize,
    }
}

/// Extracts bits `hi..=lo` of `value`.
pub fn extract_bits(value: &BigInt, hi: u32, lo: u32) -> BigInt {
    (value >> lo as usize) & all_ones(hi - lo + 1)
}

pub fn italic(text: &str) -> String {
    format!("\x1b[3m{}\x1b[0m", text)
}
