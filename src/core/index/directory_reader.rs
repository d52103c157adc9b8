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

use core::doc::Document;
use core::index::{SegmentInfos, SegmentReader, SegmentReaderRc, Term, TermDocs};
use core::store::DirectoryRc;
use core::util::DocId;
use error::{ErrorKind, Result};

/// A point-in-time reader over the latest commit of a directory: one
/// segment reader per committed segment, documents numbered by
/// concatenation. The view never changes, no matter what a concurrent
/// writer does; reopening after a commit yields the new graph.
pub struct DirectoryReader {
    dir: DirectoryRc,
    segment_infos: SegmentInfos,
    readers: Vec<SegmentReaderRc>,
    starts: Vec<DocId>,
    closed: bool,
}

impl DirectoryReader {
    pub fn open(dir: &DirectoryRc) -> Result<DirectoryReader> {
        let segment_infos = SegmentInfos::read_current(dir)?;
        let mut readers = Vec::with_capacity(segment_infos.len());
        let mut starts = Vec::with_capacity(segment_infos.len() + 1);
        let mut base = 0;
        for si in segment_infos.segments() {
            starts.push(base);
            base += si.doc_count();
            match SegmentReader::get(true, si, 1) {
                Ok(reader) => readers.push(reader),
                Err(e) => {
                    for reader in &readers {
                        let _ = reader.close();
                    }
                    return Err(e);
                }
            }
        }
        starts.push(base);
        Ok(DirectoryReader {
            dir: DirectoryRc::clone(dir),
            segment_infos,
            readers,
            starts,
            closed: false,
        })
    }

    pub fn directory(&self) -> &DirectoryRc {
        &self.dir
    }

    pub fn segment_infos(&self) -> &SegmentInfos {
        &self.segment_infos
    }

    pub fn segment_readers(&self) -> &[SegmentReaderRc] {
        &self.readers
    }

    pub fn version(&self) -> i64 {
        self.segment_infos.version
    }

    pub fn max_doc(&self) -> DocId {
        *self.starts.last().unwrap_or(&0)
    }

    pub fn num_docs(&self) -> i32 {
        self.readers.iter().map(|r| r.num_docs()).sum()
    }

    pub fn num_deleted_docs(&self) -> i32 {
        self.max_doc() - self.num_docs()
    }

    pub fn has_deletions(&self) -> bool {
        self.readers.iter().any(|r| r.has_deletions())
    }

    /// How many live documents carry the term. Unlike the per-segment
    /// dictionary doc-freq, documents deleted but not yet merged away are
    /// not counted.
    pub fn doc_freq(&self, term: &Term) -> Result<i32> {
        let mut total = 0;
        for reader in &self.readers {
            let mut docs = reader.term_docs()?;
            docs.seek(Some(term))?;
            while docs.next()? {
                total += 1;
            }
        }
        Ok(total)
    }

    fn reader_index(&self, doc: DocId) -> Result<usize> {
        if doc < 0 || doc >= self.max_doc() {
            bail!(ErrorKind::IllegalArgument(format!(
                "doc {} out of bounds [0, {})",
                doc,
                self.max_doc()
            )));
        }
        // the last start <= doc
        let mut lo = 0usize;
        let mut hi = self.readers.len() - 1;
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.starts[mid] <= doc {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        Ok(lo)
    }

    pub fn is_deleted(&self, doc: DocId) -> bool {
        let i = self
            .reader_index(doc)
            .expect("doc id out of bounds for is_deleted");
        self.readers[i].is_deleted(doc - self.starts[i])
    }

    pub fn document(&self, doc: DocId) -> Result<Document> {
        let i = self.reader_index(doc)?;
        self.readers[i].document(doc - self.starts[i])
    }

    /// All live documents matching a term, in global doc-id order.
    pub fn term_doc_ids(&self, term: &Term) -> Result<Vec<DocId>> {
        let mut out = Vec::new();
        for (i, reader) in self.readers.iter().enumerate() {
            let mut docs = reader.term_docs()?;
            docs.seek(Some(term))?;
            while docs.next()? {
                out.push(self.starts[i] + docs.doc());
            }
        }
        Ok(out)
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut first_err = None;
        for reader in &self.readers {
            if let Err(e) = reader.close() {
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
}

impl Drop for DirectoryReader {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
