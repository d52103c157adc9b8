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

//! Self-describing framing for per-segment files: every file opens with a
//! magic, a codec name and a version, and checksummed files close with a
//! fixed-length footer carrying a CRC32 of everything before it.

use core::store::{ChecksumIndexInput, ChecksumIndexOutput, DataInput, DataOutput};
use error::{ErrorKind, Result};

pub const CODEC_MAGIC: i32 = 0x3FD7_6C17;
pub const FOOTER_MAGIC: i32 = !CODEC_MAGIC;

pub fn write_header<T: DataOutput + ?Sized>(out: &mut T, codec: &str, version: i32) -> Result<()> {
    let clen = codec.len();
    if clen >= 128 {
        bail!(ErrorKind::IllegalArgument(format!(
            "codec must be simple ASCII less than 128 characters, got {}[length={}]",
            codec, clen,
        )));
    }
    out.write_int(CODEC_MAGIC)?;
    out.write_string(codec)?;
    out.write_int(version)
}

pub fn header_length(codec: &str) -> usize {
    9 + codec.len()
}

pub fn check_header<T: DataInput + ?Sized>(
    data_input: &mut T,
    codec: &str,
    min_ver: i32,
    max_ver: i32,
) -> Result<i32> {
    let actual_header = data_input.read_int()?;
    if actual_header != CODEC_MAGIC {
        bail!(ErrorKind::CorruptIndex(format!(
            "codec header mismatch: actual=0x{:X}, expected=0x{:X}",
            actual_header, CODEC_MAGIC
        )));
    }
    let actual_codec = data_input.read_string()?;
    if actual_codec != codec {
        bail!(ErrorKind::CorruptIndex(format!(
            "codec mismatch: actual={}, expected={}",
            actual_codec, codec
        )));
    }
    let actual_ver = data_input.read_int()?;
    if actual_ver < min_ver || actual_ver > max_ver {
        bail!(ErrorKind::CorruptIndex(format!(
            "index format either too new or too old: {} <= {} <= {} doesn't hold",
            min_ver, actual_ver, max_ver
        )));
    }
    Ok(actual_ver)
}

#[inline(always)]
pub fn footer_length() -> usize {
    16
}

pub fn write_footer(out: &mut ChecksumIndexOutput) -> Result<()> {
    out.write_int(FOOTER_MAGIC)?;
    out.write_int(0)?;
    out.finish_checksum()
}

pub fn check_footer(input: &mut ChecksumIndexInput) -> Result<i64> {
    validate_footer(input)?;
    let actual_checksum = input.checksum();
    let expected_checksum = read_crc(input)?;
    if actual_checksum != expected_checksum {
        bail!(ErrorKind::CorruptIndex(format!(
            "checksum failed (hardware problems?): expected=0x{:X}, actual=0x{:X}",
            expected_checksum, actual_checksum
        )));
    }
    Ok(actual_checksum)
}

fn validate_footer(input: &mut ChecksumIndexInput) -> Result<()> {
    use core::store::IndexInput;

    let remaining = input.len() as i64 - input.file_pointer() as i64;
    let expected = footer_length() as i64;
    if remaining < expected {
        bail!(ErrorKind::CorruptIndex(format!(
            "misplaced codec footer (file truncated?): remaining={}, expected={}",
            remaining, expected
        )));
    } else if remaining > expected {
        bail!(ErrorKind::CorruptIndex(format!(
            "misplaced codec footer (file extended?): remaining={}, expected={}",
            remaining, expected
        )));
    }
    let magic = input.read_int()?;
    if magic != FOOTER_MAGIC {
        bail!(ErrorKind::CorruptIndex(format!(
            "codec footer mismatch: actual={} vs expected={}",
            magic, FOOTER_MAGIC
        )));
    }
    let algorithm_id = input.read_int()?;
    if algorithm_id != 0 {
        bail!(ErrorKind::CorruptIndex(format!(
            "codec footer mismatch: unknown algorithm_id: {}",
            algorithm_id
        )));
    }
    Ok(())
}

fn read_crc(input: &mut ChecksumIndexInput) -> Result<i64> {
    let val = input.read_long()?;
    if (val as u64 & 0xFFFF_FFFF_0000_0000) != 0 {
        bail!(ErrorKind::CorruptIndex(format!(
            "illegal CRC-32 checksum: {}",
            val
        )));
    }
    Ok(val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::store::{Directory, IndexOutput, RAMDirectory, BUFFER_SIZE};

    #[test]
    fn header_and_footer_round_trip() {
        let dir = RAMDirectory::new();
        {
            let out = dir.create_output("x").unwrap();
            let mut out = ChecksumIndexOutput::new(out);
            write_header(&mut out, "TestCodec", 2).unwrap();
            out.write_vint(42).unwrap();
            write_footer(&mut out).unwrap();
            out.close().unwrap();
        }
        let input = dir.open_input("x", BUFFER_SIZE).unwrap();
        let mut input = ChecksumIndexInput::new(input);
        assert_eq!(check_header(&mut input, "TestCodec", 0, 2).unwrap(), 2);
        assert_eq!(input.read_vint().unwrap(), 42);
        check_footer(&mut input).unwrap();
    }

    #[test]
    fn detects_codec_mismatch_and_corruption() {
        let dir = RAMDirectory::new();
        {
            let out = dir.create_output("x").unwrap();
            let mut out = ChecksumIndexOutput::new(out);
            write_header(&mut out, "CodecA", 1).unwrap();
            write_footer(&mut out).unwrap();
            out.close().unwrap();
        }
        let input = dir.open_input("x", BUFFER_SIZE).unwrap();
        let mut input = ChecksumIndexInput::new(input);
        assert!(check_header(&mut input, "CodecB", 0, 1).is_err());

        let input = dir.open_input("x", BUFFER_SIZE).unwrap();
        let mut input = ChecksumIndexInput::new(input);
        assert!(check_header(&mut input, "CodecA", 2, 3).is_err());
    }
}
