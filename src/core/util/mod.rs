// Copyright 2019 Zhizhesihai (Beijing) Technology Limited.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

mod bit_vector;
mod counter;
mod small_float;

pub use self::bit_vector::BitVector;
pub use self::counter::AtomicCounter;
pub use self::small_float::{byte315_to_float, float_to_byte315};

use error::{ErrorKind, Result};

pub type DocId = i32;

/// Interface for random access to a bit set.
pub trait Bits: Send + Sync {
    fn get(&self, index: usize) -> bool;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const RADIX_36_DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Renders a non-negative number in radix 36, the way segment names and
/// file generations are spelled.
pub fn to_base36(value: u64) -> String {
    let mut value = value;
    let mut buf = Vec::with_capacity(13);
    loop {
        buf.push(RADIX_36_DIGITS[(value % 36) as usize]);
        value /= 36;
        if value == 0 {
            break;
        }
    }
    buf.reverse();
    // the digit table is pure ASCII
    String::from_utf8(buf).unwrap()
}

pub fn from_base36(text: &str) -> Result<u64> {
    let mut value = 0u64;
    for c in text.chars() {
        let digit = c.to_digit(36).ok_or_else(|| {
            ErrorKind::RuntimeError(format!("not a radix 36 number: {}", text))
        })?;
        value = value
            .checked_mul(36)
            .and_then(|v| v.checked_add(u64::from(digit)))
            .ok_or_else(|| {
                ErrorKind::RuntimeError(format!("radix 36 overflow: {}", text))
            })?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base36_round_trip() {
        for &v in &[0u64, 1, 35, 36, 37, 1295, 1296, 46655, 123_456_789] {
            assert_eq!(from_base36(&to_base36(v)).unwrap(), v);
        }
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn base36_rejects_garbage() {
        assert!(from_base36("_0").is_err());
    }
}
