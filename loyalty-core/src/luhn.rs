//! Luhn checksum for order numbers and withdrawal references
//!
//! Runs before any stateful work so malformed numbers never reach the store.

/// Returns `true` when `number` is a non-empty string of ASCII digits whose
/// Luhn checksum is zero.
pub fn is_valid(number: &str) -> bool {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    checksum(number.bytes().rev(), false) % 10 == 0
}

/// Check digit that makes `payload` followed by it Luhn-valid.
///
/// Returns `None` when `payload` contains anything but ASCII digits.
pub fn check_digit(payload: &str) -> Option<u8> {
    if !payload.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    // The check digit will occupy the rightmost position, so the payload's
    // last digit is the first one to be doubled.
    let sum = checksum(payload.bytes().rev(), true);
    Some(((10 - sum % 10) % 10) as u8)
}

fn checksum(digits_from_right: impl Iterator<Item = u8>, double_first: bool) -> u32 {
    digits_from_right
        .enumerate()
        .map(|(idx, byte)| {
            let digit = u32::from(byte - b'0');
            let doubled = (idx % 2 == 0) == double_first;
            if doubled {
                let d = digit * 2;
                if d > 9 {
                    d - 9
                } else {
                    d
                }
            } else {
                digit
            }
        })
        .sum()
}
