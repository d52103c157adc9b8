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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use core::index::SegmentInfo;
use core::store::{DataInput, DataOutput, Directory, DirectoryRc, IndexInput, IndexOutput, BUFFER_SIZE};
use error::{ErrorKind, Result};

/// Leading bytes of a shared norms file; one norm byte per document per
/// field follows, fields in number order.
pub const NORMS_HEADER: [u8; 4] = [b'N', b'R', b'M', 0xff];

/// One field's norm bytes for one segment. Bytes load lazily and are
/// shared between cloned readers through the `Arc`; the first write after
/// a clone copies them privately. A dirty norm is rewritten into the next
/// separate-norm generation at commit.
pub struct Norm {
    source: Mutex<NormSource>,
    doc_count: i32,
    field_number: i32,
    bytes: Mutex<Option<Arc<Vec<u8>>>>,
    dirty: AtomicBool,
    rollback_dirty: AtomicBool,
}

struct NormSource {
    dir: DirectoryRc,
    filename: String,
    norm_seek: u64,
}

impl Norm {
    pub fn new(
        dir: DirectoryRc,
        filename: String,
        norm_seek: u64,
        doc_count: i32,
        field_number: i32,
    ) -> Norm {
        Norm {
            source: Mutex::new(NormSource {
                dir,
                filename,
                norm_seek,
            }),
            doc_count,
            field_number,
            bytes: Mutex::new(None),
            dirty: AtomicBool::new(false),
            rollback_dirty: AtomicBool::new(false),
        }
    }

    pub fn field_number(&self) -> i32 {
        self.field_number
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Loads (if needed) and returns the shared byte array.
    pub fn bytes(&self) -> Result<Arc<Vec<u8>>> {
        let mut slot = self.bytes.lock()?;
        if let Some(ref bytes) = *slot {
            return Ok(Arc::clone(bytes));
        }
        let source = self.source.lock()?;
        let mut input = source.dir.open_input(&source.filename, BUFFER_SIZE)?;
        input.seek(source.norm_seek)?;
        let mut bytes = vec![0u8; self.doc_count as usize];
        input.read_bytes(&mut bytes)?;
        let bytes = Arc::new(bytes);
        *slot = Some(Arc::clone(&bytes));
        Ok(bytes)
    }

    /// Writes one norm byte, copying the array first if clones share it.
    pub fn set(&self, doc: i32, value: u8) -> Result<()> {
        if doc < 0 || doc >= self.doc_count {
            bail!(ErrorKind::IllegalArgument(format!(
                "doc {} out of bounds [0, {})",
                doc, self.doc_count
            )));
        }
        self.bytes()?;
        let mut slot = self.bytes.lock()?;
        {
            let arc = slot.as_mut().expect("bytes were just loaded");
            if Arc::strong_count(arc) > 1 {
                *arc = Arc::new(arc.as_ref().clone());
            }
            let bytes = Arc::get_mut(arc).expect("private copy has a single owner");
            bytes[doc as usize] = value;
        }
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// A clone sharing the loaded bytes (copy-on-write on either side).
    pub fn clone_norm(&self) -> Result<Norm> {
        let source = self.source.lock()?;
        let bytes = self.bytes.lock()?;
        Ok(Norm {
            source: Mutex::new(NormSource {
                dir: Arc::clone(&source.dir),
                filename: source.filename.clone(),
                norm_seek: source.norm_seek,
            }),
            doc_count: self.doc_count,
            field_number: self.field_number,
            bytes: Mutex::new(bytes.as_ref().map(Arc::clone)),
            dirty: AtomicBool::new(self.dirty.load(Ordering::Acquire)),
            rollback_dirty: AtomicBool::new(false),
        })
    }

    pub fn start_commit(&self) {
        self.rollback_dirty
            .store(self.dirty.load(Ordering::Acquire), Ordering::Release);
    }

    pub fn rollback_commit(&self) {
        self.dirty
            .store(self.rollback_dirty.load(Ordering::Acquire), Ordering::Release);
    }

    /// Flushes dirty bytes into the next separate-norm generation of the
    /// owning segment and repoints this norm at the new file. Separate
    /// norm files always live in the segment's main directory, never
    /// inside a compound file.
    pub fn re_write(&self, si: &SegmentInfo) -> Result<()> {
        debug_assert!(self.is_dirty());
        let bytes = self.bytes()?;
        si.advance_norm_gen(self.field_number);
        let filename = si.norm_file_name(self.field_number);
        let main_dir = Arc::clone(si.directory());
        let mut out = main_dir.create_output(&filename)?;
        out.write_bytes(&bytes)?;
        out.close()?;
        let mut source = self.source.lock()?;
        source.dir = main_dir;
        source.filename = filename;
        source.norm_seek = 0;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::store::{IndexOutput, RAMDirectory};

    fn dir_with_norms(bytes: &[u8]) -> DirectoryRc {
        let dir = RAMDirectory::new();
        {
            let mut out = dir.create_output("_0.nrm").unwrap();
            out.write_bytes(&NORMS_HEADER).unwrap();
            out.write_bytes(bytes).unwrap();
            out.close().unwrap();
        }
        Arc::new(dir)
    }

    #[test]
    fn lazy_load_and_set() {
        let dir = dir_with_norms(&[10, 20, 30]);
        let norm = Norm::new(Arc::clone(&dir), "_0.nrm".to_string(), 4, 3, 0);
        assert!(!norm.is_dirty());
        assert_eq!(norm.bytes().unwrap().as_slice(), &[10, 20, 30]);
        norm.set(1, 99).unwrap();
        assert!(norm.is_dirty());
        assert_eq!(norm.bytes().unwrap().as_slice(), &[10, 99, 30]);
    }

    #[test]
    fn clone_copies_on_write() {
        let dir = dir_with_norms(&[1, 2]);
        let norm = Norm::new(Arc::clone(&dir), "_0.nrm".to_string(), 4, 2, 0);
        norm.bytes().unwrap();
        let clone = norm.clone_norm().unwrap();
        clone.set(0, 42).unwrap();
        assert_eq!(clone.bytes().unwrap().as_slice(), &[42, 2]);
        assert_eq!(norm.bytes().unwrap().as_slice(), &[1, 2]);
    }

    #[test]
    fn rollback_restores_dirty_flag() {
        let dir = dir_with_norms(&[5]);
        let norm = Norm::new(Arc::clone(&dir), "_0.nrm".to_string(), 4, 1, 0);
        norm.start_commit();
        norm.set(0, 6).unwrap();
        assert!(norm.is_dirty());
        norm.rollback_commit();
        assert!(!norm.is_dirty());
    }
}
