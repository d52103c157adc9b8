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

use core::store::{DataInput, DataOutput, Directory, IndexOutput, BUFFER_SIZE};
use core::util::Bits;
use error::{ErrorKind, Result};

/// A fixed-size bitmap with a maintained set-bit count, persisted as a
/// deletion file. Dense form stores the raw bytes; when few bits are set a
/// d-gaps form stores deltas of the set positions instead.
#[derive(Clone, Debug)]
pub struct BitVector {
    bits: Vec<u8>,
    size: usize,
    count: usize,
}

// Marker for the sparse on-disk form; the dense form starts with the
// non-negative size.
const SPARSE_MARKER: i32 = -1;

impl BitVector {
    pub fn new(size: usize) -> Self {
        BitVector {
            bits: vec![0u8; (size + 7) / 8],
            size,
            count: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.size);
        self.bits[index >> 3] & (1 << (index & 7)) != 0
    }

    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.size);
        if !self.get(index) {
            self.bits[index >> 3] |= 1 << (index & 7);
            self.count += 1;
        }
    }

    pub fn clear(&mut self, index: usize) {
        debug_assert!(index < self.size);
        if self.get(index) {
            self.bits[index >> 3] &= !(1 << (index & 7));
            self.count -= 1;
        }
    }

    fn is_sparse(&self) -> bool {
        // worst-case d-gap entry is cheaper than the dense byte share
        self.count * 24 < self.size
    }

    pub fn write(&self, dir: &dyn Directory, name: &str) -> Result<()> {
        let mut out = dir.create_output(name)?;
        if self.is_sparse() {
            out.write_int(SPARSE_MARKER)?;
            out.write_int(self.size as i32)?;
            out.write_int(self.count as i32)?;
            let mut last = 0usize;
            for index in 0..self.size {
                if self.get(index) {
                    out.write_vint((index - last) as i32)?;
                    last = index;
                }
            }
        } else {
            out.write_int(self.size as i32)?;
            out.write_int(self.count as i32)?;
            out.write_bytes(&self.bits)?;
        }
        out.close()
    }

    pub fn read(dir: &dyn Directory, name: &str) -> Result<BitVector> {
        let mut input = dir.open_input(name, BUFFER_SIZE)?;
        let first = input.read_int()?;
        if first == SPARSE_MARKER {
            let size = input.read_int()?;
            let count = input.read_int()?;
            if size < 0 || count < 0 || count > size {
                bail!(ErrorKind::CorruptIndex(format!(
                    "invalid deletions file {}: size={} count={}",
                    name, size, count
                )));
            }
            let mut bv = BitVector::new(size as usize);
            let mut index = 0usize;
            for i in 0..count as usize {
                let gap = input.read_vint()?;
                if gap < 0 {
                    bail!(ErrorKind::CorruptIndex(format!(
                        "invalid d-gap in {}: {}",
                        name, gap
                    )));
                }
                index += gap as usize;
                if index >= bv.size() || (i > 0 && gap == 0) {
                    bail!(ErrorKind::CorruptIndex(format!(
                        "d-gap points past end of {}",
                        name
                    )));
                }
                bv.set(index);
            }
            Ok(bv)
        } else {
            let size = first;
            let count = input.read_int()?;
            if size < 0 || count < 0 || count > size {
                bail!(ErrorKind::CorruptIndex(format!(
                    "invalid deletions file {}: size={} count={}",
                    name, size, count
                )));
            }
            let mut bits = vec![0u8; (size as usize + 7) / 8];
            input.read_bytes(&mut bits)?;
            let bv = BitVector {
                bits,
                size: size as usize,
                count: count as usize,
            };
            if bv.recount() != bv.count {
                bail!(ErrorKind::CorruptIndex(format!(
                    "deletion count mismatch in {}",
                    name
                )));
            }
            Ok(bv)
        }
    }

    fn recount(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }
}

impl Bits for BitVector {
    fn get(&self, index: usize) -> bool {
        BitVector::get(self, index)
    }

    fn len(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::store::RAMDirectory;

    #[test]
    fn set_clear_count() {
        let mut bv = BitVector::new(100);
        assert_eq!(bv.count(), 0);
        bv.set(3);
        bv.set(3);
        bv.set(99);
        assert_eq!(bv.count(), 2);
        assert!(bv.get(3));
        assert!(!bv.get(4));
        bv.clear(3);
        bv.clear(3);
        assert_eq!(bv.count(), 1);
    }

    #[test]
    fn dense_round_trip() {
        let dir = RAMDirectory::new();
        let mut bv = BitVector::new(250);
        for i in 0..250 {
            if i % 2 == 0 {
                bv.set(i);
            }
        }
        assert!(!bv.is_sparse());
        bv.write(&dir, "_1.del").unwrap();
        let read = BitVector::read(&dir, "_1.del").unwrap();
        assert_eq!(read.size(), 250);
        assert_eq!(read.count(), 125);
        for i in 0..250 {
            assert_eq!(read.get(i), i % 2 == 0);
        }
    }

    #[test]
    fn sparse_round_trip() {
        let dir = RAMDirectory::new();
        let mut bv = BitVector::new(10_000);
        for &i in &[0usize, 17, 4095, 9999] {
            bv.set(i);
        }
        assert!(bv.is_sparse());
        bv.write(&dir, "_2.del").unwrap();
        let read = BitVector::read(&dir, "_2.del").unwrap();
        assert_eq!(read.count(), 4);
        for &i in &[0usize, 17, 4095, 9999] {
            assert!(read.get(i));
        }
        assert!(!read.get(1));
    }
}
