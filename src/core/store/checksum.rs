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

use crc32fast::Hasher;

use core::store::{DataInput, DataOutput, IndexInput, IndexOutput};
use error::{ErrorKind, Result};

/// Wraps an input and accumulates a CRC32 of every byte read. Seeking is
/// restricted to the current position; checksummed files are read front to
/// back.
pub struct ChecksumIndexInput {
    input: Box<dyn IndexInput>,
    digest: Hasher,
}

impl ChecksumIndexInput {
    pub fn new(input: Box<dyn IndexInput>) -> Self {
        ChecksumIndexInput {
            input,
            digest: Hasher::new(),
        }
    }

    pub fn checksum(&self) -> i64 {
        i64::from(self.digest.clone().finalize())
    }

    pub fn into_inner(self) -> Box<dyn IndexInput> {
        self.input
    }
}

impl DataInput for ChecksumIndexInput {
    fn read_byte(&mut self) -> Result<u8> {
        let b = self.input.read_byte()?;
        self.digest.update(&[b]);
        Ok(b)
    }

    fn read_bytes(&mut self, b: &mut [u8]) -> Result<()> {
        self.input.read_bytes(b)?;
        self.digest.update(b);
        Ok(())
    }
}

impl IndexInput for ChecksumIndexInput {
    fn clone_input(&self) -> Result<Box<dyn IndexInput>> {
        bail!(ErrorKind::UnsupportedOperation(
            "cannot clone a checksumming input".into()
        ))
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos != self.input.file_pointer() {
            bail!(ErrorKind::UnsupportedOperation(
                "checksumming inputs only read forward".into()
            ));
        }
        Ok(())
    }

    fn file_pointer(&self) -> u64 {
        self.input.file_pointer()
    }

    fn len(&self) -> u64 {
        self.input.len()
    }
}

/// Wraps an output and accumulates a CRC32 of every byte written.
pub struct ChecksumIndexOutput {
    output: Box<dyn IndexOutput>,
    digest: Hasher,
}

impl ChecksumIndexOutput {
    pub fn new(output: Box<dyn IndexOutput>) -> Self {
        ChecksumIndexOutput {
            output,
            digest: Hasher::new(),
        }
    }

    pub fn checksum(&self) -> i64 {
        i64::from(self.digest.clone().finalize())
    }

    /// Append the checksum itself, excluded from the digest.
    pub fn finish_checksum(&mut self) -> Result<()> {
        let sum = self.checksum();
        self.output.write_long(sum)
    }
}

impl DataOutput for ChecksumIndexOutput {
    fn write_byte(&mut self, b: u8) -> Result<()> {
        self.digest.update(&[b]);
        self.output.write_byte(b)
    }

    fn write_bytes(&mut self, b: &[u8]) -> Result<()> {
        self.digest.update(b);
        self.output.write_bytes(b)
    }
}

impl IndexOutput for ChecksumIndexOutput {
    fn file_pointer(&self) -> u64 {
        self.output.file_pointer()
    }

    fn flush(&mut self) -> Result<()> {
        self.output.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.output.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::store::{Directory, RAMDirectory, BUFFER_SIZE};

    #[test]
    fn digest_matches_across_write_and_read() {
        let dir = RAMDirectory::new();
        let written = {
            let out = dir.create_output("c").unwrap();
            let mut out = ChecksumIndexOutput::new(out);
            out.write_string("checksummed payload").unwrap();
            out.write_vlong(987654321).unwrap();
            let sum = out.checksum();
            out.finish_checksum().unwrap();
            out.close().unwrap();
            sum
        };
        let input = dir.open_input("c", BUFFER_SIZE).unwrap();
        let mut input = ChecksumIndexInput::new(input);
        assert_eq!(input.read_string().unwrap(), "checksummed payload");
        assert_eq!(input.read_vlong().unwrap(), 987654321);
        let computed = input.checksum();
        assert_eq!(computed, written);
        assert_eq!(input.read_long().unwrap(), written);
    }
}
