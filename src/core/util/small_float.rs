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

//! Lossy float-to-byte encoding for per-document field norms: 3 mantissa
//! bits, zero exponent point 15. One byte per document buys a dynamic range
//! of about 7e9 at ~10% precision.

pub fn float_to_byte315(f: f32) -> u8 {
    float_to_byte(f, 3, 15)
}

pub fn byte315_to_float(b: u8) -> f32 {
    byte_to_float(b, 3, 15)
}

fn float_to_byte(f: f32, num_mantissa_bits: i32, zero_exp: i32) -> u8 {
    let fzero = (63 - zero_exp) << num_mantissa_bits;
    let bits = f.to_bits() as i32;
    let small_float = bits >> (24 - num_mantissa_bits);
    if small_float <= fzero {
        if bits <= 0 {
            0
        } else {
            1
        }
    } else if small_float >= fzero + 0x100 {
        0xff
    } else {
        (small_float - fzero) as u8
    }
}

fn byte_to_float(b: u8, num_mantissa_bits: i32, zero_exp: i32) -> f32 {
    if b == 0 {
        return 0.0;
    }
    let mut bits = i32::from(b) << (24 - num_mantissa_bits);
    bits += (63 - zero_exp) << 24;
    f32::from_bits(bits as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_saturation() {
        assert_eq!(float_to_byte315(0.0), 0);
        assert_eq!(byte315_to_float(0), 0.0);
        assert_eq!(float_to_byte315(-1.0), 0);
        assert_eq!(float_to_byte315(1e10), 0xff);
    }

    #[test]
    fn round_trip_is_monotonic() {
        let mut last = -1.0f32;
        for b in 0..=255u8 {
            let f = byte315_to_float(b);
            assert!(f >= last);
            last = f;
            assert_eq!(float_to_byte315(f), b);
        }
    }
}
