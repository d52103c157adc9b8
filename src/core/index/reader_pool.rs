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

use std::collections::HashMap;
use std::sync::Mutex;

use core::index::{SegmentInfoRc, SegmentReader, SegmentReaderRc};
use core::store::BUFFER_SIZE;
use error::Result;

/// Cache of open segment readers keyed by segment name. The writer pulls
/// readers from here to apply deletes, run merges and commit deletion and
/// norm files; each checked-out reader carries one reference for the
/// caller on top of the pool's own.
pub struct ReaderPool {
    reader_map: Mutex<HashMap<String, SegmentReaderRc>>,
    default_terms_index_divisor: i32,
}

impl ReaderPool {
    pub fn new(default_terms_index_divisor: i32) -> ReaderPool {
        ReaderPool {
            reader_map: Mutex::new(HashMap::new()),
            default_terms_index_divisor,
        }
    }

    /// Checked-out reader for a segment, opened on first use. Requests
    /// that need doc stores or a loaded terms index upgrade the pooled
    /// reader in place.
    pub fn get(&self, info: &SegmentInfoRc, do_open_stores: bool) -> Result<SegmentReaderRc> {
        self.get_full(
            info,
            do_open_stores,
            BUFFER_SIZE,
            self.default_terms_index_divisor,
        )
    }

    pub fn get_full(
        &self,
        info: &SegmentInfoRc,
        do_open_stores: bool,
        read_buffer_size: usize,
        terms_index_divisor: i32,
    ) -> Result<SegmentReaderRc> {
        let mut map = self.reader_map.lock()?;
        let reader = match map.get(info.name()) {
            Some(existing) => {
                if do_open_stores {
                    existing.core().open_doc_stores(info)?;
                }
                if terms_index_divisor != -1 && !existing.core().terms_index_is_loaded()? {
                    existing.core().load_terms_index(terms_index_divisor)?;
                }
                SegmentReaderRc::clone(existing)
            }
            None => {
                let reader = SegmentReader::get_with(
                    false,
                    info,
                    read_buffer_size,
                    do_open_stores,
                    terms_index_divisor,
                )?;
                map.insert(info.name().to_string(), SegmentReaderRc::clone(&reader));
                reader
            }
        };
        reader.inc_ref();
        Ok(reader)
    }

    pub fn get_if_exists(&self, info: &SegmentInfoRc) -> Result<Option<SegmentReaderRc>> {
        let map = self.reader_map.lock()?;
        Ok(map.get(info.name()).map(|reader| {
            reader.inc_ref();
            SegmentReaderRc::clone(reader)
        }))
    }

    /// A read-only clone not enrolled in the pool; the caller closes it
    /// directly instead of releasing it.
    pub fn get_read_only_clone(
        &self,
        info: &SegmentInfoRc,
        do_open_stores: bool,
        terms_index_divisor: i32,
    ) -> Result<SegmentReaderRc> {
        let reader = self.get_full(info, do_open_stores, BUFFER_SIZE, terms_index_divisor)?;
        let clone = reader.clone_reader(true);
        self.release(&reader, false)?;
        clone
    }

    /// Returns a checked-out reader. With `drop`, or when the pool holds
    /// the only remaining reference, the reader leaves the pool and
    /// closes; closing with pending changes writes the new deletion and
    /// norm files, and the return value tells the caller to checkpoint.
    pub fn release(&self, reader: &SegmentReaderRc, drop: bool) -> Result<bool> {
        let mut map = self.reader_map.lock()?;
        reader.dec_ref()?;
        if reader.ref_count() == 1 && map.contains_key(reader.segment_name()) {
            // only the pool's reference is left
            map.remove(reader.segment_name());
            if drop {
                reader.discard_changes();
                reader.dec_ref_discard()?;
                Ok(false)
            } else {
                let had_changes = reader.has_changes();
                // the last dec_ref commits pending deletion/norm files
                reader.dec_ref()?;
                Ok(had_changes)
            }
        } else {
            Ok(false)
        }
    }

    /// Commits every pooled reader with pending changes, writing their
    /// new deletion/norm generations. The caller checkpoints afterwards.
    pub fn commit(&self) -> Result<()> {
        let map = self.reader_map.lock()?;
        for reader in map.values() {
            if reader.has_changes() {
                reader.start_commit()?;
                match reader.commit_changes() {
                    Ok(()) => {}
                    Err(e) => {
                        reader.rollback_commit()?;
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Zeroes the dirty state of the given segments' readers (all of them
    /// when `infos` is None) without closing anything; used when merged
    /// segments make pending changes moot and on rollback.
    pub fn clear(&self, infos: Option<&[SegmentInfoRc]>) -> Result<()> {
        let map = self.reader_map.lock()?;
        match infos {
            None => {
                for reader in map.values() {
                    reader.discard_changes();
                }
            }
            Some(infos) => {
                for info in infos {
                    if let Some(reader) = map.get(info.name()) {
                        reader.discard_changes();
                    }
                }
            }
        }
        Ok(())
    }

    /// Commits dirty readers then drops every pool reference.
    pub fn close(&self) -> Result<()> {
        let mut map = self.reader_map.lock()?;
        let mut first_err = None;
        for (_, reader) in map.drain() {
            if reader.has_changes() {
                if let Err(e) = reader.commit_changes() {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                    reader.discard_changes();
                }
            }
            if let Err(e) = reader.dec_ref_discard() {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Whether any pooled reader holds uncommitted changes.
    pub fn any_pending_changes(&self) -> Result<bool> {
        let map = self.reader_map.lock()?;
        Ok(map.values().any(|reader| reader.has_changes()))
    }
}
