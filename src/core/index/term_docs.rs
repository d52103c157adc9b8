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

use std::sync::Arc;

use core::index::{CoreReaders, SegmentTermEnum, Term, TermInfo};
use core::store::{DataInput, IndexInput};
use core::util::{BitVector, DocId};
use error::{ErrorKind, Result};

/// Uniform cursor over the `(doc id, frequency)` postings of one term.
/// Deleted documents never surface from the cursor.
pub trait TermDocs: Send {
    /// Positions onto a term's postings; `None` resets the cursor.
    fn seek(&mut self, term: Option<&Term>) -> Result<()>;

    /// Positions using a dictionary cursor that is already on a term,
    /// skipping the extra dictionary lookup.
    fn seek_term_enum(&mut self, term_enum: &SegmentTermEnum) -> Result<()>;

    fn doc(&self) -> DocId;

    fn freq(&self) -> i32;

    fn next(&mut self) -> Result<bool>;

    /// Bulk variant of `next`: fills the parallel arrays and returns how
    /// many entries were written.
    fn read(&mut self, docs: &mut [DocId], freqs: &mut [i32]) -> Result<usize> {
        debug_assert_eq!(docs.len(), freqs.len());
        let mut count = 0;
        while count < docs.len() {
            if !self.next()? {
                break;
            }
            docs[count] = self.doc();
            freqs[count] = self.freq();
            count += 1;
        }
        Ok(count)
    }

    /// Advances to the first doc >= `target`; false when exhausted.
    fn skip_to(&mut self, target: DocId) -> Result<bool>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A `TermDocs` that also walks the per-occurrence position stream.
pub trait TermPositions: TermDocs {
    /// The next position of the current doc; call at most `freq()` times.
    fn next_position(&mut self) -> Result<i32>;

    fn payload_length(&self) -> i32;

    /// The payload at the current position; consumes it.
    fn payload(&mut self) -> Result<Vec<u8>>;

    fn is_payload_available(&self) -> bool;
}

/// Postings cursor reading the `.frq` stream.
pub struct SegmentTermDocs {
    core: Arc<CoreReaders>,
    freq_stream: Box<dyn IndexInput>,
    deleted_docs: Option<Arc<BitVector>>,
    count: i32,
    doc_freq: i32,
    doc: DocId,
    freq: i32,
    omit_tf: bool,
}

impl SegmentTermDocs {
    pub fn new(core: Arc<CoreReaders>, deleted_docs: Option<Arc<BitVector>>) -> Result<SegmentTermDocs> {
        let freq_stream = core.clone_freq_stream()?;
        Ok(SegmentTermDocs {
            core,
            freq_stream,
            deleted_docs,
            count: 0,
            doc_freq: 0,
            doc: 0,
            freq: 0,
            omit_tf: false,
        })
    }

    fn seek_term_info(&mut self, ti: Option<TermInfo>, omit_tf: bool) -> Result<()> {
        self.count = 0;
        self.doc = 0;
        self.freq = 0;
        match ti {
            None => {
                self.doc_freq = 0;
            }
            Some(ti) => {
                self.doc_freq = ti.doc_freq;
                self.omit_tf = omit_tf;
                self.freq_stream.seek(ti.freq_pointer as u64)?;
            }
        }
        Ok(())
    }

    fn is_deleted(&self, doc: DocId) -> bool {
        match self.deleted_docs {
            Some(ref del) => del.get(doc as usize),
            None => false,
        }
    }

    fn omit_tf_for(&self, term: &Term) -> bool {
        self.core
            .field_infos()
            .by_name(term.field())
            .map(|f| f.omit_term_freq_and_positions)
            .unwrap_or(false)
    }
}

impl TermDocs for SegmentTermDocs {
    fn seek(&mut self, term: Option<&Term>) -> Result<()> {
        match term {
            None => self.seek_term_info(None, false),
            Some(term) => {
                let ti = self.core.term_info(term)?;
                let omit_tf = self.omit_tf_for(term);
                self.seek_term_info(ti, omit_tf)
            }
        }
    }

    fn seek_term_enum(&mut self, term_enum: &SegmentTermEnum) -> Result<()> {
        match term_enum.term() {
            None => self.seek_term_info(None, false),
            Some(ref term) => {
                let omit_tf = self.omit_tf_for(term);
                self.seek_term_info(Some(term_enum.term_info()), omit_tf)
            }
        }
    }

    fn doc(&self) -> DocId {
        self.doc
    }

    fn freq(&self) -> i32 {
        self.freq
    }

    fn next(&mut self) -> Result<bool> {
        loop {
            if self.count == self.doc_freq {
                return Ok(false);
            }
            let code = self.freq_stream.read_vint()?;
            if self.omit_tf {
                self.doc += code;
                self.freq = 1;
            } else {
                self.doc += code >> 1;
                if code & 1 != 0 {
                    self.freq = 1;
                } else {
                    self.freq = self.freq_stream.read_vint()?;
                }
            }
            self.count += 1;
            if !self.is_deleted(self.doc) {
                return Ok(true);
            }
        }
    }

    fn skip_to(&mut self, target: DocId) -> Result<bool> {
        while self.next()? {
            if self.doc >= target {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Postings cursor that additionally streams `.prx`. Position reads are
/// lazy: advancing a doc first drains whatever positions of the previous
/// doc were never requested.
pub struct SegmentTermPositions {
    docs: SegmentTermDocs,
    prox_stream: Box<dyn IndexInput>,
    prox_pointer: i64,
    position: i32,
    pending_positions: i32,
    payload_length: i32,
    payload_pending: bool,
    need_prox_seek: bool,
}

impl SegmentTermPositions {
    pub fn new(
        core: Arc<CoreReaders>,
        deleted_docs: Option<Arc<BitVector>>,
    ) -> Result<SegmentTermPositions> {
        let prox_stream = core.clone_prox_stream()?;
        let docs = SegmentTermDocs::new(core, deleted_docs)?;
        Ok(SegmentTermPositions {
            docs,
            prox_stream,
            prox_pointer: 0,
            position: 0,
            pending_positions: 0,
            payload_length: 0,
            payload_pending: false,
            need_prox_seek: false,
        })
    }

    fn start_term(&mut self, prox_pointer: i64) {
        self.prox_pointer = prox_pointer;
        self.pending_positions = 0;
        self.position = 0;
        self.payload_pending = false;
        self.need_prox_seek = true;
    }

    fn skip_payload(&mut self) -> Result<()> {
        if self.payload_pending && self.payload_length > 0 {
            let mut skip = vec![0u8; self.payload_length as usize];
            self.prox_stream.read_bytes(&mut skip)?;
        }
        self.payload_pending = false;
        Ok(())
    }

    fn skip_pending_positions(&mut self) -> Result<()> {
        while self.pending_positions > 0 {
            self.next_position()?;
        }
        self.skip_payload()
    }
}

impl TermDocs for SegmentTermPositions {
    fn seek(&mut self, term: Option<&Term>) -> Result<()> {
        match term {
            None => {
                self.docs.seek(None)?;
                self.pending_positions = 0;
                Ok(())
            }
            Some(term) => {
                let ti = self.docs.core.term_info(term)?;
                let omit_tf = self.docs.omit_tf_for(term);
                let prox_pointer = ti.map(|t| t.prox_pointer).unwrap_or(0);
                self.docs.seek_term_info(ti, omit_tf)?;
                self.start_term(prox_pointer);
                Ok(())
            }
        }
    }

    fn seek_term_enum(&mut self, term_enum: &SegmentTermEnum) -> Result<()> {
        match term_enum.term() {
            None => self.seek(None),
            Some(ref term) => {
                let ti = term_enum.term_info();
                let omit_tf = self.docs.omit_tf_for(term);
                self.docs.seek_term_info(Some(ti), omit_tf)?;
                self.start_term(ti.prox_pointer);
                Ok(())
            }
        }
    }

    fn doc(&self) -> DocId {
        self.docs.doc()
    }

    fn freq(&self) -> i32 {
        self.docs.freq()
    }

    fn next(&mut self) -> Result<bool> {
        if self.need_prox_seek {
            self.prox_stream.seek(self.prox_pointer as u64)?;
            self.need_prox_seek = false;
        } else {
            self.skip_pending_positions()?;
        }
        if self.docs.next()? {
            self.pending_positions = if self.docs.omit_tf { 0 } else { self.freq() };
            self.position = 0;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn skip_to(&mut self, target: DocId) -> Result<bool> {
        while self.next()? {
            if self.doc() >= target {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl TermPositions for SegmentTermPositions {
    fn next_position(&mut self) -> Result<i32> {
        if self.pending_positions <= 0 {
            bail!(ErrorKind::IllegalState(
                "next_position called more than freq() times".into()
            ));
        }
        self.skip_payload()?;
        self.pending_positions -= 1;
        let code = self.prox_stream.read_vint()?;
        self.position += code >> 1;
        if code & 1 != 0 {
            self.payload_length = self.prox_stream.read_vint()?;
            self.payload_pending = true;
        } else {
            self.payload_length = 0;
            self.payload_pending = false;
        }
        Ok(self.position)
    }

    fn payload_length(&self) -> i32 {
        self.payload_length
    }

    fn payload(&mut self) -> Result<Vec<u8>> {
        if !self.payload_pending {
            bail!(ErrorKind::IllegalState("no payload at this position".into()));
        }
        let mut bytes = vec![0u8; self.payload_length as usize];
        self.prox_stream.read_bytes(&mut bytes)?;
        self.payload_pending = false;
        Ok(bytes)
    }

    fn is_payload_available(&self) -> bool {
        self.payload_pending
    }
}

/// The match-all cursor: every live document in `[0, max_doc)` with
/// frequency one.
pub struct AllTermDocs {
    max_doc: DocId,
    deleted_docs: Option<Arc<BitVector>>,
    doc: DocId,
}

impl AllTermDocs {
    pub fn new(max_doc: DocId, deleted_docs: Option<Arc<BitVector>>) -> AllTermDocs {
        AllTermDocs {
            max_doc,
            deleted_docs,
            doc: -1,
        }
    }

    fn is_deleted(&self, doc: DocId) -> bool {
        match self.deleted_docs {
            Some(ref del) => del.get(doc as usize),
            None => false,
        }
    }
}

impl TermDocs for AllTermDocs {
    fn seek(&mut self, term: Option<&Term>) -> Result<()> {
        match term {
            None => {
                self.doc = -1;
                Ok(())
            }
            Some(_) => bail!(ErrorKind::UnsupportedOperation(
                "the match-all cursor cannot seek to a term".into()
            )),
        }
    }

    fn seek_term_enum(&mut self, _term_enum: &SegmentTermEnum) -> Result<()> {
        bail!(ErrorKind::UnsupportedOperation(
            "the match-all cursor cannot seek to a term".into()
        ))
    }

    fn doc(&self) -> DocId {
        self.doc
    }

    fn freq(&self) -> i32 {
        1
    }

    fn next(&mut self) -> Result<bool> {
        self.skip_to(self.doc + 1)
    }

    fn skip_to(&mut self, target: DocId) -> Result<bool> {
        self.doc = target.max(self.doc + 1).max(0);
        while self.doc < self.max_doc && self.is_deleted(self.doc) {
            self.doc += 1;
        }
        Ok(self.doc < self.max_doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_term_docs_skips_deleted() {
        let mut deleted = BitVector::new(6);
        deleted.set(1);
        deleted.set(4);
        let mut all = AllTermDocs::new(6, Some(Arc::new(deleted)));
        let mut seen = Vec::new();
        while all.next().unwrap() {
            assert_eq!(all.freq(), 1);
            seen.push(all.doc());
        }
        assert_eq!(seen, vec![0, 2, 3, 5]);
    }

    #[test]
    fn all_term_docs_skip_to_lands_on_live_doc() {
        let mut deleted = BitVector::new(10);
        deleted.set(5);
        deleted.set(6);
        let mut all = AllTermDocs::new(10, Some(Arc::new(deleted)));
        assert!(all.skip_to(5).unwrap());
        assert_eq!(all.doc(), 7);
        assert!(!all.skip_to(10).unwrap());
    }

    #[test]
    fn all_term_docs_rejects_term_seek() {
        let mut all = AllTermDocs::new(3, None);
        assert!(all.seek(Some(&Term::new("f", "x"))).is_err());
        all.seek(None).unwrap();
        assert!(all.next().unwrap());
        assert_eq!(all.doc(), 0);
    }

    #[test]
    fn all_term_docs_bulk_read() {
        let mut all = AllTermDocs::new(4, None);
        let mut docs = [0 as DocId; 8];
        let mut freqs = [0i32; 8];
        let n = all.read(&mut docs, &mut freqs).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&docs[..4], &[0, 1, 2, 3]);
        assert!(freqs[..4].iter().all(|&f| f == 1));
    }
}
