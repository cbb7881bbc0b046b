//! Base-64 variable-length quantities, as used by the `mappings` field of
//! a revision 3 source map.
//!
//! Each value is split into 5-bit groups, least significant first. The
//! lowest bit of the first group is the sign, and bit 6 of every digit
//! marks a continuation.

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const SHIFT: u32 = 5;
const CONTINUATION: u8 = 1 << SHIFT;
const MASK: u8 = CONTINUATION - 1;

/// An error decoding a VLQ string.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VlqError {
    /// A character outside the base-64 alphabet.
    #[error("invalid base-64 digit {0:?}")]
    InvalidDigit(char),
    /// The input ended in the middle of a value.
    #[error("unterminated value")]
    Unterminated,
    /// The value does not fit in 63 bits.
    #[error("value overflows")]
    Overflow,
    /// The value has redundant digits or is a negative zero, and would
    /// not re-encode to the same text.
    #[error("non-canonical encoding")]
    NonCanonical,
}

fn digit_value(c: u8) -> Option<u8> {
    match c {
        b'A'..=b'Z' => Some(c - b'A'),
        b'a'..=b'z' => Some(c - b'a' + 26),
        b'0'..=b'9' => Some(c - b'0' + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

/// Appends the encoding of `value` to `out`.
pub fn encode(value: i64, out: &mut String) {
    let magnitude = value.unsigned_abs();
    let mut rest = (magnitude << 1) | u64::from(value < 0);
    loop {
        // The mask keeps the digit below 32.
        #[allow(clippy::cast_possible_truncation)]
        let mut digit = (rest & u64::from(MASK)) as u8;
        rest >>= SHIFT;
        if rest != 0 {
            digit |= CONTINUATION;
        }
        out.push(char::from(ALPHABET[usize::from(digit)]));
        if rest == 0 {
            break;
        }
    }
}

/// Decodes every value in `input`, which must consist only of VLQ digits.
pub fn decode(input: &str) -> Result<Vec<i64>, VlqError> {
    let mut values = Vec::new();
    let mut digits = input.bytes();
    while let Some(first) = digits.next() {
        values.push(decode_one(first, &mut digits)?);
    }
    Ok(values)
}

fn decode_one(first: u8, rest: &mut impl Iterator<Item = u8>) -> Result<i64, VlqError> {
    let mut raw: u64 = 0;
    let mut shift: u32 = 0;
    let mut next = Some(first);
    let mut count: usize = 0;
    loop {
        let c = next.ok_or(VlqError::Unterminated)?;
        let digit = digit_value(c).ok_or(VlqError::InvalidDigit(char::from(c)))?;
        count = count.saturating_add(1);
        let bits = u64::from(digit & MASK);
        if shift >= 63 || (shift > 0 && bits >> (63u32.saturating_sub(shift)) != 0) {
            return Err(VlqError::Overflow);
        }
        raw |= bits << shift;
        if digit & CONTINUATION == 0 {
            if count > 1 && bits == 0 {
                return Err(VlqError::NonCanonical);
            }
            break;
        }
        shift = shift.saturating_add(SHIFT);
        next = rest.next();
    }
    if raw == 1 {
        return Err(VlqError::NonCanonical);
    }
    let magnitude = i64::try_from(raw >> 1).map_err(|_| VlqError::Overflow)?;
    if raw & 1 == 1 {
        Ok(magnitude.wrapping_neg())
    } else {
        Ok(magnitude)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn enc(v: i64) -> String {
        let mut s = String::new();
        encode(v, &mut s);
        s
    }

    #[test]
    fn test_known_values() {
        let cases = [
            (0, "A"),
            (1, "C"),
            (-1, "D"),
            (11, "W"),
            (12, "Y"),
            (-12, "Z"),
            (15, "e"),
            (16, "gB"),
            (48, "gD"),
            (-1000, "x+B"),
        ];
        for (v, s) in cases {
            assert_eq!(enc(v), s, "encode {v}");
            assert_eq!(decode(s), Ok(vec![v]), "decode {s}");
        }
    }

    #[test]
    fn test_decode_sequence() {
        assert_eq!(decode("AAgDW"), Ok(vec![0, 0, 48, 11]));
        assert_eq!(decode(""), Ok(vec![]));
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode("g"), Err(VlqError::Unterminated));
        assert_eq!(decode("A*"), Err(VlqError::InvalidDigit('*')));
        // negative zero
        assert_eq!(decode("B"), Err(VlqError::NonCanonical));
        // trailing zero group
        assert_eq!(decode("gA"), Err(VlqError::NonCanonical));
        assert_eq!(decode("gggggggggggggggB"), Err(VlqError::Overflow));
    }

    proptest! {
        #[test]
        fn proptest_reencode(v in any::<i32>()) {
            let v = i64::from(v);
            let s = enc(v);
            prop_assert_eq!(decode(&s), Ok(vec![v]));
        }
    }
}
