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

//! Fuses N segment readers into one new segment: field infos are unioned,
//! stored fields and vectors are copied (raw chunks when the source
//! encodes identically, document by document otherwise), the sorted term
//! streams interleave through a queue with doc ids remapped around
//! deletions, and norms concatenate last. The abort handle is consulted
//! between units of work.

use std::sync::Arc;

use core::index::norms::NORMS_HEADER;
use core::index::term_docs::TermPositions;
use core::index::{
    segment_file_name, CompoundFileWriter, FieldInfos, FieldsWriter, OneMergeRc, PostingsWriter,
    SegmentReaderRc, SegmentTermEnum, Term, TermDocs, TermInfo, TermInfosWriter,
    TermVectorsWriter, INDEX_EXTENSIONS_IN_COMPOUND_FILE, NORMS_EXTENSION,
};
use core::store::{DataOutput, Directory, DirectoryRc, IndexOutput};
use core::util::DocId;
use error::{ErrorKind, Result};

/// Maximum number of contiguous documents to bulk-copy at once when
/// merging stored fields or vectors.
pub const MAX_RAW_MERGE_DOCS: usize = 4192;

/// Rewrites payload bytes as postings stream through a merge.
pub trait PayloadProcessor: Send + Sync {
    fn process(&self, payload: Vec<u8>) -> Result<Vec<u8>>;
}

/// Chooses a payload processor per source directory and term; None
/// passes payloads through untouched.
pub trait PayloadProcessorProvider: Send + Sync {
    fn processor(
        &self,
        dir: &DirectoryRc,
        term: &Term,
    ) -> Result<Option<Arc<dyn PayloadProcessor>>>;
}

/// Work-unit accounting between abort checks: roughly a second of merge
/// work passes between two polls of the abort flag.
pub struct CheckAbort {
    merge: Option<OneMergeRc>,
    dir: DirectoryRc,
    work_count: f64,
}

impl CheckAbort {
    pub fn new(merge: Option<OneMergeRc>, dir: DirectoryRc) -> CheckAbort {
        CheckAbort {
            merge,
            dir,
            work_count: 0.0,
        }
    }

    pub fn work(&mut self, units: f64) -> Result<()> {
        self.work_count += units;
        if self.work_count >= 10000.0 {
            if let Some(ref merge) = self.merge {
                merge.check_aborted(&self.dir)?;
            }
            self.work_count = 0.0;
        }
        Ok(())
    }
}

// Postings cursor over one source segment; position-aware only when the
// segment carries a prox stream.
enum MergeCursor {
    Positions(Box<dyn TermPositions>),
    Docs(Box<dyn TermDocs>),
}

impl MergeCursor {
    fn seek_term_enum(&mut self, term_enum: &SegmentTermEnum) -> Result<()> {
        match *self {
            MergeCursor::Positions(ref mut c) => c.seek_term_enum(term_enum),
            MergeCursor::Docs(ref mut c) => c.seek_term_enum(term_enum),
        }
    }

    fn next(&mut self) -> Result<bool> {
        match *self {
            MergeCursor::Positions(ref mut c) => c.next(),
            MergeCursor::Docs(ref mut c) => c.next(),
        }
    }

    fn doc(&self) -> DocId {
        match *self {
            MergeCursor::Positions(ref c) => c.doc(),
            MergeCursor::Docs(ref c) => c.doc(),
        }
    }

    fn freq(&self) -> i32 {
        match *self {
            MergeCursor::Positions(ref c) => c.freq(),
            MergeCursor::Docs(ref c) => c.freq(),
        }
    }
}

// One source segment's place in the term merge: its dictionary cursor,
// postings cursor, doc-id base and remap table.
struct SegmentMergeInfo {
    base: DocId,
    term_enum: SegmentTermEnum,
    cursor: MergeCursor,
    doc_map: Option<Vec<DocId>>,
    dir: DirectoryRc,
    exhausted: bool,
}

impl SegmentMergeInfo {
    fn current(&self) -> Option<Term> {
        if self.exhausted {
            None
        } else {
            self.term_enum.term()
        }
    }

    fn advance(&mut self) -> Result<()> {
        if !self.term_enum.next()? {
            self.exhausted = true;
        }
        Ok(())
    }

    fn remap(&self, doc: DocId) -> DocId {
        match self.doc_map {
            Some(ref map) => {
                let mapped = map[doc as usize];
                debug_assert!(mapped != -1, "postings returned a deleted doc");
                self.base + mapped
            }
            None => self.base + doc,
        }
    }
}

pub struct SegmentMerger {
    dir: DirectoryRc,
    segment: String,
    term_index_interval: i32,
    check_abort: CheckAbort,
    payload_processor_provider: Option<Arc<dyn PayloadProcessorProvider>>,
    field_infos: FieldInfos,
    readers: Vec<SegmentReaderRc>,
    // per reader: new-id table for readers with deletions
    doc_maps: Vec<Option<Vec<DocId>>>,
    bases: Vec<DocId>,
    matched_count: usize,
    merged_docs: i32,
}

impl SegmentMerger {
    pub fn new(
        dir: DirectoryRc,
        segment: &str,
        term_index_interval: i32,
        merge: Option<OneMergeRc>,
        payload_processor_provider: Option<Arc<dyn PayloadProcessorProvider>>,
        field_infos: FieldInfos,
    ) -> SegmentMerger {
        let check_abort = CheckAbort::new(merge, Arc::clone(&dir));
        SegmentMerger {
            dir,
            segment: segment.to_string(),
            term_index_interval,
            check_abort,
            payload_processor_provider,
            field_infos,
            readers: Vec::new(),
            doc_maps: Vec::new(),
            bases: Vec::new(),
            matched_count: 0,
            merged_docs: 0,
        }
    }

    pub fn add(&mut self, reader: SegmentReaderRc) {
        self.readers.push(reader);
    }

    pub fn field_infos(&self) -> &FieldInfos {
        &self.field_infos
    }

    pub fn matched_count(&self) -> usize {
        self.matched_count
    }

    /// Runs the whole merge; returns the merged document count.
    pub fn merge(&mut self) -> Result<i32> {
        self.merge_field_infos();
        self.merged_docs = self.merge_fields()?;
        if self.field_infos.has_vectors() {
            self.merge_vectors()?;
        }
        self.merge_terms()?;
        if self.field_infos.has_norms() {
            self.merge_norms()?;
        }
        Ok(self.merged_docs)
    }

    // Step 1: union every reader's field flags into the output table.
    fn merge_field_infos(&mut self) {
        for reader in &self.readers {
            for fi in reader.field_infos().iter() {
                self.field_infos.add_or_update(
                    &fi.name,
                    fi.is_indexed,
                    fi.store_term_vector,
                    fi.store_positions_with_term_vector,
                    fi.store_offsets_with_term_vector,
                    fi.omit_norms,
                    fi.store_payloads,
                    fi.omit_term_freq_and_positions,
                );
            }
        }
    }

    // A reader whose field-number table matches the merged one encodes
    // its stored records and vectors identically, so bytes can move
    // without decoding.
    fn is_matching(&self, reader: &SegmentReaderRc) -> bool {
        let theirs = reader.field_infos();
        if theirs.len() != self.field_infos.len() {
            return false;
        }
        self.field_infos
            .iter()
            .zip(theirs.iter())
            .all(|(a, b)| a.name == b.name && a.number == b.number)
    }

    // Step 2: stored fields, building each reader's doc map as we go.
    fn merge_fields(&mut self) -> Result<i32> {
        let mut fields_writer = FieldsWriter::new(self.dir.as_ref(), &self.segment)?;
        let mut doc_base = 0;
        self.doc_maps.clear();
        self.bases.clear();
        self.matched_count = 0;

        for i in 0..self.readers.len() {
            let reader = SegmentReaderRc::clone(&self.readers[i]);
            self.bases.push(doc_base);
            let max_doc = reader.max_doc();
            let matching = self.is_matching(&reader);
            if matching {
                self.matched_count += 1;
            }

            if reader.has_deletions() {
                // remap around the holes
                let mut map = vec![-1 as DocId; max_doc as usize];
                let mut new_id = 0;
                for doc in 0..max_doc {
                    if !reader.is_deleted(doc) {
                        map[doc as usize] = new_id;
                        new_id += 1;
                    }
                }

                if matching {
                    // bulk-copy runs of consecutive live docs
                    let fields_reader = reader.core().fields_reader()?;
                    let mut doc = 0;
                    while doc < max_doc {
                        if reader.is_deleted(doc) {
                            doc += 1;
                            continue;
                        }
                        let mut run = 0usize;
                        while doc + (run as i32) < max_doc
                            && !reader.is_deleted(doc + run as i32)
                            && run < MAX_RAW_MERGE_DOCS
                        {
                            run += 1;
                        }
                        let mut lengths = vec![0u64; run];
                        let mut raw = fields_reader.raw_docs(&mut lengths, doc)?;
                        fields_writer.add_raw_documents(raw.as_mut(), &lengths)?;
                        self.check_abort.work(300.0 * run as f64)?;
                        doc += run as i32;
                    }
                } else {
                    for doc in 0..max_doc {
                        if reader.is_deleted(doc) {
                            continue;
                        }
                        let document = reader.document(doc)?;
                        fields_writer.add_document(&document, &self.field_infos)?;
                        self.check_abort.work(300.0)?;
                    }
                }
                doc_base += new_id;
                self.doc_maps.push(Some(map));
            } else {
                if matching {
                    let fields_reader = reader.core().fields_reader()?;
                    let mut doc = 0;
                    while doc < max_doc {
                        let run = ((max_doc - doc) as usize).min(MAX_RAW_MERGE_DOCS);
                        let mut lengths = vec![0u64; run];
                        let mut raw = fields_reader.raw_docs(&mut lengths, doc)?;
                        fields_writer.add_raw_documents(raw.as_mut(), &lengths)?;
                        self.check_abort.work(300.0 * run as f64)?;
                        doc += run as i32;
                    }
                } else {
                    for doc in 0..max_doc {
                        let document = reader.document(doc)?;
                        fields_writer.add_document(&document, &self.field_infos)?;
                        self.check_abort.work(300.0)?;
                    }
                }
                doc_base += max_doc;
                self.doc_maps.push(None);
            }
        }
        fields_writer.close()?;
        Ok(doc_base)
    }

    // Step 3: term vectors, same matching and chunking pattern.
    fn merge_vectors(&mut self) -> Result<()> {
        let mut vectors_writer = TermVectorsWriter::new(self.dir.as_ref(), &self.segment)?;
        for i in 0..self.readers.len() {
            let reader = SegmentReaderRc::clone(&self.readers[i]);
            let max_doc = reader.max_doc();
            let vectors_reader = reader.core().vectors_reader()?;
            let matching = self.is_matching(&reader) && vectors_reader.is_some();

            match vectors_reader {
                None => {
                    // a source without vectors still owns doc slots
                    for doc in 0..max_doc {
                        if !reader.is_deleted(doc) {
                            vectors_writer.add_document(&[], &self.field_infos)?;
                            self.check_abort.work(300.0)?;
                        }
                    }
                }
                Some(vectors_reader) => {
                    if reader.has_deletions() {
                        if matching {
                            let mut doc = 0;
                            while doc < max_doc {
                                if reader.is_deleted(doc) {
                                    doc += 1;
                                    continue;
                                }
                                let mut run = 0usize;
                                while doc + (run as i32) < max_doc
                                    && !reader.is_deleted(doc + run as i32)
                                    && run < MAX_RAW_MERGE_DOCS
                                {
                                    run += 1;
                                }
                                let mut tvd_lengths = vec![0u64; run];
                                let mut tvf_lengths = vec![0u64; run];
                                let (mut tvd, mut tvf) = vectors_reader.raw_docs(
                                    &mut tvd_lengths,
                                    &mut tvf_lengths,
                                    doc,
                                )?;
                                vectors_writer.add_raw_documents(
                                    tvd.as_mut(),
                                    tvf.as_mut(),
                                    &tvd_lengths,
                                    &tvf_lengths,
                                )?;
                                self.check_abort.work(300.0 * run as f64)?;
                                doc += run as i32;
                            }
                        } else {
                            for doc in 0..max_doc {
                                if reader.is_deleted(doc) {
                                    continue;
                                }
                                let vectors = vectors_reader.get(doc)?;
                                vectors_writer.add_document(&vectors, &self.field_infos)?;
                                self.check_abort.work(300.0)?;
                            }
                        }
                    } else if matching {
                        let mut doc = 0;
                        while doc < max_doc {
                            let run = ((max_doc - doc) as usize).min(MAX_RAW_MERGE_DOCS);
                            let mut tvd_lengths = vec![0u64; run];
                            let mut tvf_lengths = vec![0u64; run];
                            let (mut tvd, mut tvf) =
                                vectors_reader.raw_docs(&mut tvd_lengths, &mut tvf_lengths, doc)?;
                            vectors_writer.add_raw_documents(
                                tvd.as_mut(),
                                tvf.as_mut(),
                                &tvd_lengths,
                                &tvf_lengths,
                            )?;
                            self.check_abort.work(300.0 * run as f64)?;
                            doc += run as i32;
                        }
                    } else {
                        for doc in 0..max_doc {
                            let vectors = vectors_reader.get(doc)?;
                            vectors_writer.add_document(&vectors, &self.field_infos)?;
                            self.check_abort.work(300.0)?;
                        }
                    }
                }
            }
        }
        if vectors_writer.doc_count() != self.merged_docs {
            bail!(ErrorKind::RuntimeError(format!(
                "merged vectors count {} does not match merged docs {}",
                vectors_writer.doc_count(),
                self.merged_docs
            )));
        }
        vectors_writer.close()
    }

    // Step 4: interleave the sorted term streams of every reader.
    fn merge_terms(&mut self) -> Result<()> {
        let has_prox = self.field_infos.has_prox();
        let mut postings_writer = PostingsWriter::new(self.dir.as_ref(), &self.segment, has_prox)?;
        let merged_field_infos = Arc::new(self.field_infos.clone());
        let mut tis_writer = TermInfosWriter::new(
            self.dir.as_ref(),
            &self.segment,
            Arc::clone(&merged_field_infos),
            self.term_index_interval,
        )?;

        // one entry per source, each already on its first term
        let mut sources: Vec<SegmentMergeInfo> = Vec::with_capacity(self.readers.len());
        for (i, reader) in self.readers.iter().enumerate() {
            let mut term_enum = reader.terms()?;
            let exhausted = !term_enum.next()?;
            let cursor = if reader.segment_info().has_prox() {
                MergeCursor::Positions(reader.term_positions()?)
            } else {
                MergeCursor::Docs(reader.term_docs()?)
            };
            sources.push(SegmentMergeInfo {
                base: self.bases[i],
                term_enum,
                cursor,
                doc_map: self.doc_maps[i].clone(),
                dir: Arc::clone(reader.directory()),
                exhausted,
            });
        }

        loop {
            // the smallest current term across sources
            let mut smallest: Option<Term> = None;
            for source in &sources {
                if let Some(term) = source.current() {
                    let is_smaller = match smallest {
                        None => true,
                        Some(ref s) => term < *s,
                    };
                    if is_smaller {
                        smallest = Some(term);
                    }
                }
            }
            let term = match smallest {
                None => break,
                Some(term) => term,
            };

            let field_info = self
                .field_infos
                .by_name(term.field())
                .expect("merged fields cover every source term");
            let field_number = field_info.number;
            let omit_tf = field_info.omit_term_freq_and_positions;

            let pointers = postings_writer.start_term();
            let mut doc_freq = 0;

            // sources are visited in add order, so remapped doc ids rise
            // monotonically across them
            for source in &mut sources {
                let matches = match source.current() {
                    Some(ref t) => *t == term,
                    None => false,
                };
                if !matches {
                    continue;
                }
                source.cursor.seek_term_enum(&source.term_enum)?;
                while source.cursor.next()? {
                    let doc = source.remap(source.cursor.doc());
                    let freq = source.cursor.freq();
                    postings_writer.add_doc(doc, freq, omit_tf)?;
                    doc_freq += 1;
                    if has_prox && !omit_tf {
                        match source.cursor {
                            MergeCursor::Positions(ref mut positions) => {
                                for _ in 0..freq {
                                    let position = positions.next_position()?;
                                    let payload = if positions.is_payload_available() {
                                        let bytes = positions.payload()?;
                                        Some(self.process_payload(&source.dir, &term, bytes)?)
                                    } else {
                                        None
                                    };
                                    postings_writer.add_position(
                                        position,
                                        payload.as_ref().map(|p| p.as_slice()),
                                    )?;
                                }
                            }
                            MergeCursor::Docs(_) => {
                                // source had no positions; none to carry
                            }
                        }
                    }
                }
                source.advance()?;
            }

            if doc_freq > 0 {
                let ti = TermInfo {
                    doc_freq,
                    freq_pointer: pointers.0,
                    prox_pointer: pointers.1,
                };
                tis_writer.add(field_number, term.text(), &ti)?;
            }
            self.check_abort.work(f64::from(doc_freq.max(1)) / 3.0)?;
        }

        postings_writer.close()?;
        tis_writer.close()?;

        self.field_infos.write(
            self.dir.as_ref(),
            &segment_file_name(&self.segment, super::FIELD_INFOS_EXTENSION),
        )
    }

    fn process_payload(
        &self,
        source_dir: &DirectoryRc,
        term: &Term,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>> {
        match self.payload_processor_provider {
            Some(ref provider) => match provider.processor(source_dir, term)? {
                Some(processor) => processor.process(payload),
                None => Ok(payload),
            },
            None => Ok(payload),
        }
    }

    // Step 5: norms concatenate per field, skipping deleted docs.
    fn merge_norms(&mut self) -> Result<()> {
        let mut out = self
            .dir
            .create_output(&segment_file_name(&self.segment, NORMS_EXTENSION))?;
        out.write_bytes(&NORMS_HEADER)?;
        for fi in self.field_infos.iter() {
            if !fi.has_norms() {
                continue;
            }
            for reader in &self.readers {
                let max_doc = reader.max_doc();
                let bytes = reader.norms(&fi.name)?;
                match bytes {
                    Some(bytes) => {
                        if reader.has_deletions() {
                            for doc in 0..max_doc {
                                if !reader.is_deleted(doc) {
                                    out.write_byte(bytes[doc as usize])?;
                                }
                            }
                        } else {
                            out.write_bytes(&bytes)?;
                        }
                    }
                    None => {
                        // source never stored norms for this field
                        for doc in 0..max_doc {
                            if !reader.is_deleted(doc) {
                                out.write_byte(0)?;
                            }
                        }
                    }
                }
                self.check_abort.work(f64::from(max_doc))?;
            }
        }
        out.close()
    }

    /// Packages the merged segment's files into a compound file and
    /// returns the member list (the caller unlinks the originals).
    pub fn create_compound_file(&mut self, filename: &str) -> Result<Vec<String>> {
        let mut writer = CompoundFileWriter::new(Arc::clone(&self.dir), filename);
        let mut added = Vec::new();
        for ext in INDEX_EXTENSIONS_IN_COMPOUND_FILE.iter() {
            let name = segment_file_name(&self.segment, ext);
            if self.dir.file_exists(&name) {
                writer.add_file(&name);
                added.push(name);
            }
        }
        writer.close()?;
        Ok(added)
    }
}
