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

//! The in-memory indexing chain. Added documents are inverted into
//! per-field posting lists; stored fields, vectors and norms buffer
//! alongside until a flush turns the whole batch into one new segment's
//! files.
//!
//! Tokenization runs outside the buffer lock on the calling thread, which
//! is bound to an indexing slot for scratch-buffer affinity; only folding
//! the inverted document into the shared postings buffer is serialized.
//! A failed fold marks the half-added document deleted so the segment
//! stays atomic at document granularity.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use crossbeam::queue::SegQueue;

use core::analysis::Analyzer;
use core::doc::Document;
use core::index::norms::NORMS_HEADER;
use core::index::{
    segment_file_name, BufferedDeletes, FieldInfos, FieldsWriter, FlushControl, PostingsWriter,
    SegmentDeletes, SegmentInfo, SegmentInfoRc, SegmentInfos, Term, TermFreqVector,
    TermInfo, TermInfosWriter, TermVectorsWriter, FIELD_INFOS_EXTENSION, NORMS_EXTENSION,
};
use core::search::Query;
use core::store::{DataOutput, Directory, DirectoryRc, IndexOutput};
use core::util::{float_to_byte315, to_base36, DocId};
use error::{ErrorKind, Result};

// rough in-memory cost accounting, in the spirit of the delete constants
const BYTES_PER_POSTING: i64 = 64;
const BYTES_PER_DOC_ENTRY: i64 = 24;
const BYTES_PER_POSITION: i64 = 12;
const BYTES_PER_STORED_DOC: i64 = 48;

/// Allocates segment names; shared between the supervisor (which seeds
/// and persists the counter) and the documents writer (which names the
/// in-memory segment). Every allocation is an index change.
pub struct SegmentNameSource {
    counter: AtomicI32,
    changes: AtomicI64,
}

impl SegmentNameSource {
    pub fn new(start: i32) -> SegmentNameSource {
        SegmentNameSource {
            counter: AtomicI32::new(start),
            changes: AtomicI64::new(0),
        }
    }

    pub fn next_name(&self) -> String {
        self.changes.fetch_add(1, Ordering::AcqRel);
        let n = self.counter.fetch_add(1, Ordering::AcqRel);
        format!("_{}", to_base36(n as u64))
    }

    pub fn counter(&self) -> i32 {
        self.counter.load(Ordering::Acquire)
    }

    pub fn note_change(&self) -> i64 {
        self.changes.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn change_count(&self) -> i64 {
        self.changes.load(Ordering::Acquire)
    }
}

/// Deferred cleanup raised while the buffer lock was held; the supervisor
/// drains these under its own lock.
pub enum WriterEvent {
    /// A flush died after creating files; the named segment's files must
    /// be removed.
    FlushFailed(String),
}

struct PostingList {
    entries: Vec<(DocId, i32)>,
    positions: Vec<Vec<(i32, Option<Vec<u8>>)>>,
}

struct BufferState {
    segment: Option<String>,
    num_docs: i32,
    field_infos: FieldInfos,
    // field name -> term text -> postings, naturally in dictionary order
    postings: BTreeMap<String, BTreeMap<String, PostingList>>,
    stored_docs: Vec<Document>,
    vectors: Vec<Vec<TermFreqVector>>,
    norms: HashMap<i32, Vec<u8>>,
    pending_deletes: SegmentDeletes,
    bytes_used: i64,
}

impl BufferState {
    fn new() -> BufferState {
        BufferState {
            segment: None,
            num_docs: 0,
            field_infos: FieldInfos::new(),
            postings: BTreeMap::new(),
            stored_docs: Vec::new(),
            vectors: Vec::new(),
            norms: HashMap::new(),
            pending_deletes: SegmentDeletes::new(),
            bytes_used: 0,
        }
    }

    fn reset_after_flush(&mut self) {
        self.segment = None;
        self.num_docs = 0;
        self.postings.clear();
        self.stored_docs.clear();
        self.vectors.clear();
        self.norms.clear();
        self.bytes_used = 0;
        // field infos persist so field numbers stay stable across the
        // writer's segments; pending deletes are pushed by the caller
    }
}

// One tokenized field of one document, staged outside the buffer lock.
struct InvertedField {
    name: String,
    is_indexed: bool,
    is_tokenized: bool,
    store_term_vector: bool,
    store_positions_with_term_vector: bool,
    store_offsets_with_term_vector: bool,
    omit_norms: bool,
    omit_tf: bool,
    has_payloads: bool,
    // (text, position, start offset, end offset, payload)
    tokens: Vec<(String, i32, i32, i32, Option<Vec<u8>>)>,
}

struct Slot {
    scratch: Vec<InvertedField>,
}

#[derive(Default)]
struct SlotRegistry {
    bindings: HashMap<ThreadId, usize>,
    slots: Vec<Slot>,
}

pub struct DocumentsWriter {
    dir: DirectoryRc,
    analyzer: Arc<dyn Analyzer>,
    term_index_interval: i32,
    max_field_length: i32,
    max_buffered_docs: i32,
    max_buffered_delete_terms: i32,
    ram_buffer_bytes: i64,
    flush_control: Arc<FlushControl>,
    buffered_deletes: Arc<BufferedDeletes>,
    name_source: Arc<SegmentNameSource>,
    state: Mutex<BufferState>,
    slots: Mutex<SlotRegistry>,
    pub events: SegQueue<WriterEvent>,
    closed: AtomicBool,
}

impl DocumentsWriter {
    #[allow(too_many_arguments)]
    pub fn new(
        dir: DirectoryRc,
        analyzer: Arc<dyn Analyzer>,
        term_index_interval: i32,
        max_field_length: i32,
        max_buffered_docs: i32,
        max_buffered_delete_terms: i32,
        ram_buffer_bytes: i64,
        flush_control: Arc<FlushControl>,
        buffered_deletes: Arc<BufferedDeletes>,
        name_source: Arc<SegmentNameSource>,
    ) -> DocumentsWriter {
        DocumentsWriter {
            dir,
            analyzer,
            term_index_interval,
            max_field_length,
            max_buffered_docs,
            max_buffered_delete_terms,
            ram_buffer_bytes,
            flush_control,
            buffered_deletes,
            name_source,
            state: Mutex::new(BufferState::new()),
            slots: Mutex::new(SlotRegistry::default()),
            events: SegQueue::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            bail!(ErrorKind::AlreadyClosed("this IndexWriter is closed".into()));
        }
        Ok(())
    }

    pub fn num_docs(&self) -> i32 {
        self.state.lock().unwrap().num_docs
    }

    pub fn bytes_used(&self) -> i64 {
        self.state.lock().unwrap().bytes_used
    }

    pub fn any_changes(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.num_docs > 0 || state.pending_deletes.any()
    }

    pub fn any_deletions(&self) -> bool {
        self.state.lock().unwrap().pending_deletes.any()
    }

    pub fn pending_segment_name(&self) -> Option<String> {
        self.state.lock().unwrap().segment.clone()
    }

    /// Shrinks over-allocated buffers and reports the footprint; the
    /// flush control consults this before declaring a RAM flush.
    pub fn balance_ram(&self) -> Result<i64> {
        let mut state = self.state.lock()?;
        state.stored_docs.shrink_to_fit();
        state.vectors.shrink_to_fit();
        let mut slots = self.slots.lock()?;
        for slot in &mut slots.slots {
            slot.scratch = Vec::new();
        }
        Ok(state.bytes_used + self.buffered_deletes.bytes_used())
    }

    fn wait_update(&self, doc_inc: i32, del_inc: i32, skip_wait: bool) -> Result<bool> {
        let ram_used = self.bytes_used() + self.buffered_deletes.bytes_used();
        self.flush_control.wait_update(
            doc_inc,
            del_inc,
            skip_wait,
            self.max_buffered_docs,
            self.max_buffered_delete_terms,
            self.ram_buffer_bytes,
            ram_used,
            &mut || self.balance_ram(),
        )
    }

    pub fn delete_term(&self, term: Term, skip_wait: bool) -> Result<bool> {
        self.ensure_open()?;
        let do_flush = self.wait_update(0, 1, skip_wait)?;
        let mut state = self.state.lock()?;
        let upto = state.num_docs;
        state.pending_deletes.add_term(term, upto);
        Ok(do_flush)
    }

    pub fn delete_terms(&self, terms: Vec<Term>) -> Result<bool> {
        self.ensure_open()?;
        let do_flush = self.wait_update(0, terms.len() as i32, false)?;
        let mut state = self.state.lock()?;
        let upto = state.num_docs;
        for term in terms {
            state.pending_deletes.add_term(term, upto);
        }
        Ok(do_flush)
    }

    pub fn delete_query(&self, query: Arc<dyn Query>) -> Result<bool> {
        self.ensure_open()?;
        let do_flush = self.wait_update(0, 1, false)?;
        let mut state = self.state.lock()?;
        let upto = state.num_docs;
        state.pending_deletes.add_query(query, upto);
        Ok(do_flush)
    }

    pub fn delete_queries(&self, queries: Vec<Arc<dyn Query>>) -> Result<bool> {
        self.ensure_open()?;
        let do_flush = self.wait_update(0, queries.len() as i32, false)?;
        let mut state = self.state.lock()?;
        let upto = state.num_docs;
        for query in queries {
            state.pending_deletes.add_query(query, upto);
        }
        Ok(do_flush)
    }

    /// Adds one document, optionally replacing the docs matching
    /// `del_term`. Returns whether the caller should flush now.
    pub fn update_document(&self, doc: &Document, del_term: Option<Term>) -> Result<bool> {
        self.ensure_open()?;
        let do_flush = self.wait_update(1, if del_term.is_some() { 1 } else { 0 }, false)?;

        // tokenize outside the buffer lock
        let mut inverted = self.take_scratch();
        self.invert(doc, &mut inverted);

        let mut state = self.state.lock()?;
        if state.segment.is_none() {
            state.segment = Some(self.name_source.next_name());
        }
        let doc_id = state.num_docs;

        let fold = self.fold_document(&mut state, doc, &inverted, doc_id);
        match fold {
            Ok(()) => {
                if let Some(term) = del_term {
                    // the bound excludes the doc just added, so an update
                    // never deletes itself
                    state.pending_deletes.add_term(term, doc_id);
                }
                state.num_docs += 1;
            }
            Err(e) => {
                // keep the segment atomic per document: the partial doc
                // stays but is born deleted
                state.pending_deletes.add_doc_id(doc_id);
                state.num_docs += 1;
                self.return_scratch(inverted);
                return Err(e);
            }
        }
        self.return_scratch(inverted);
        Ok(do_flush)
    }

    fn take_scratch(&self) -> Vec<InvertedField> {
        let mut registry = self.slots.lock().unwrap();
        let id = thread::current().id();
        let index = match registry.bindings.get(&id) {
            Some(&index) => index,
            None => {
                let index = registry.slots.len();
                registry.slots.push(Slot {
                    scratch: Vec::new(),
                });
                registry.bindings.insert(id, index);
                index
            }
        };
        ::std::mem::replace(&mut registry.slots[index].scratch, Vec::new())
    }

    fn return_scratch(&self, mut scratch: Vec<InvertedField>) {
        scratch.clear();
        let mut registry = self.slots.lock().unwrap();
        let id = thread::current().id();
        if let Some(&index) = registry.bindings.get(&id) {
            registry.slots[index].scratch = scratch;
        }
    }

    fn invert(&self, doc: &Document, out: &mut Vec<InvertedField>) {
        for field in doc.fields() {
            // multi-valued fields fold into one inverted field; positions
            // continue across the instances
            if let Some(existing) = out.iter_mut().find(|f| f.name == field.name()) {
                existing.is_indexed |= field.is_indexed();
                existing.is_tokenized |= field.is_tokenized();
                existing.store_term_vector |= field.store_term_vector();
                existing.store_positions_with_term_vector |=
                    field.store_positions_with_term_vector();
                existing.store_offsets_with_term_vector |=
                    field.store_offsets_with_term_vector();
                existing.omit_norms |= field.omit_norms();
                existing.omit_tf |= field.omit_term_freq_and_positions();
                if field.is_indexed() {
                    let mut position =
                        existing.tokens.last().map(|&(_, p, _, _, _)| p).unwrap_or(-1);
                    if field.is_tokenized() {
                        let mut stream = self.analyzer.token_stream(field.name(), field.value());
                        while let Some(token) = stream.next_token() {
                            if existing.tokens.len() as i32 >= self.max_field_length {
                                break;
                            }
                            position += token.position_increment.max(1);
                            existing.has_payloads |= token.payload.is_some();
                            existing.tokens.push((
                                token.text,
                                position,
                                token.start_offset,
                                token.end_offset,
                                token.payload,
                            ));
                        }
                    } else {
                        existing.tokens.push((
                            field.value().to_string(),
                            position + 1,
                            0,
                            field.value().len() as i32,
                            None,
                        ));
                    }
                }
                continue;
            }
            let mut inverted = InvertedField {
                name: field.name().to_string(),
                is_indexed: field.is_indexed(),
                is_tokenized: field.is_tokenized(),
                store_term_vector: field.store_term_vector(),
                store_positions_with_term_vector: field.store_positions_with_term_vector(),
                store_offsets_with_term_vector: field.store_offsets_with_term_vector(),
                omit_norms: field.omit_norms(),
                omit_tf: field.omit_term_freq_and_positions(),
                has_payloads: false,
                tokens: Vec::new(),
            };
            if field.is_indexed() {
                if field.is_tokenized() {
                    let mut stream = self.analyzer.token_stream(field.name(), field.value());
                    let mut position = -1i32;
                    while let Some(token) = stream.next_token() {
                        if inverted.tokens.len() as i32 >= self.max_field_length {
                            debug!(
                                target: "DW",
                                "field {} hit max length {}; truncating",
                                field.name(), self.max_field_length
                            );
                            break;
                        }
                        position += token.position_increment.max(1);
                        inverted.has_payloads |= token.payload.is_some();
                        inverted.tokens.push((
                            token.text,
                            position,
                            token.start_offset,
                            token.end_offset,
                            token.payload,
                        ));
                    }
                } else {
                    inverted.tokens.push((
                        field.value().to_string(),
                        0,
                        0,
                        field.value().len() as i32,
                        None,
                    ));
                }
            }
            out.push(inverted);
        }
    }

    fn fold_document(
        &self,
        state: &mut BufferState,
        doc: &Document,
        inverted: &[InvertedField],
        doc_id: DocId,
    ) -> Result<()> {
        for field in inverted {
            let number = state.field_infos.add_or_update(
                &field.name,
                field.is_indexed,
                field.store_term_vector,
                field.store_positions_with_term_vector,
                field.store_offsets_with_term_vector,
                field.omit_norms,
                field.has_payloads,
                field.omit_tf,
            );
            if !field.is_indexed {
                continue;
            }

            // collapse this doc's occurrences per term
            let mut per_term: BTreeMap<&str, Vec<(i32, i32, i32, Option<&Vec<u8>>)>> =
                BTreeMap::new();
            for &(ref text, position, start, end, ref payload) in &field.tokens {
                per_term.entry(text.as_str()).or_insert_with(Vec::new).push((
                    position,
                    start,
                    end,
                    payload.as_ref(),
                ));
            }

            {
                let field_postings = state
                    .postings
                    .entry(field.name.clone())
                    .or_insert_with(BTreeMap::new);
                let mut added_bytes = 0i64;
                for (text, occurrences) in &per_term {
                    let is_new = !field_postings.contains_key(*text);
                    let posting = field_postings
                        .entry(text.to_string())
                        .or_insert_with(|| PostingList {
                            entries: Vec::new(),
                            positions: Vec::new(),
                        });
                    if is_new {
                        added_bytes += BYTES_PER_POSTING + text.len() as i64;
                    }
                    posting.entries.push((doc_id, occurrences.len() as i32));
                    added_bytes += BYTES_PER_DOC_ENTRY;
                    let mut positions = Vec::with_capacity(occurrences.len());
                    for &(position, _, _, payload) in occurrences {
                        positions.push((position, payload.cloned()));
                        added_bytes +=
                            BYTES_PER_POSITION + payload.map(|p| p.len() as i64).unwrap_or(0);
                    }
                    posting.positions.push(positions);
                }
                state.bytes_used += added_bytes;
            }

            // one norm byte per doc for fields that keep norms
            if !field.omit_norms {
                let num_docs = state.num_docs;
                let norm = float_to_byte315(1.0 / (field.tokens.len().max(1) as f32).sqrt());
                let bytes = state.norms.entry(number).or_insert_with(Vec::new);
                bytes.resize(num_docs as usize, 0);
                bytes.push(norm);
            }

            // term vectors for this doc
            if field.store_term_vector {
                let mut terms = Vec::with_capacity(per_term.len());
                let mut freqs = Vec::with_capacity(per_term.len());
                let mut positions = if field.store_positions_with_term_vector {
                    Some(Vec::with_capacity(per_term.len()))
                } else {
                    None
                };
                let mut offsets = if field.store_offsets_with_term_vector {
                    Some(Vec::with_capacity(per_term.len()))
                } else {
                    None
                };
                for (text, occurrences) in &per_term {
                    terms.push(text.to_string());
                    freqs.push(occurrences.len() as i32);
                    if let Some(ref mut positions) = positions {
                        positions.push(occurrences.iter().map(|&(p, _, _, _)| p).collect());
                    }
                    if let Some(ref mut offsets) = offsets {
                        offsets.push(occurrences.iter().map(|&(_, s, e, _)| (s, e)).collect());
                    }
                }
                while state.vectors.len() < doc_id as usize {
                    state.vectors.push(Vec::new());
                }
                if state.vectors.len() == doc_id as usize {
                    state.vectors.push(Vec::new());
                }
                state.vectors[doc_id as usize].push(TermFreqVector {
                    field: field.name.clone(),
                    terms,
                    freqs,
                    positions,
                    offsets,
                });
            }
        }

        state.stored_docs.push(doc.clone());
        state.bytes_used += BYTES_PER_STORED_DOC
            + doc
                .fields()
                .iter()
                .filter(|f| f.is_stored())
                .map(|f| f.value().len() as i64)
                .sum::<i64>();
        Ok(())
    }

    /// Turns the buffered batch into one new segment's files. Returns
    /// None when no documents are buffered; buffered deletions stay put
    /// either way until `push_deletes` runs.
    pub fn flush(&self) -> Result<Option<SegmentInfoRc>> {
        let mut state = self.state.lock()?;
        if state.num_docs == 0 {
            return Ok(None);
        }
        let segment = state
            .segment
            .clone()
            .expect("buffered docs always carry a segment name");
        debug!(target: "DW", "flush: {} docs into segment {}", state.num_docs, segment);

        match self.write_segment(&state, &segment) {
            Ok(si) => {
                state.reset_after_flush();
                Ok(Some(Arc::new(si)))
            }
            Err(e) => {
                // aborting error: the buffered docs are lost and the
                // supervisor removes the partial files
                error!(target: "DW", "flush of segment {} failed: {}", segment, e);
                self.events.push(WriterEvent::FlushFailed(segment));
                state.pending_deletes.clear();
                state.reset_after_flush();
                Err(e)
            }
        }
    }

    fn write_segment(&self, state: &BufferState, segment: &str) -> Result<SegmentInfo> {
        let field_infos = &state.field_infos;
        let has_prox = field_infos.has_prox();

        // postings plus dictionary
        let mut postings_writer = PostingsWriter::new(self.dir.as_ref(), segment, has_prox)?;
        let mut tis_writer = TermInfosWriter::new(
            self.dir.as_ref(),
            segment,
            Arc::new(field_infos.clone()),
            self.term_index_interval,
        )?;
        for (field_name, terms) in &state.postings {
            let info = field_infos
                .by_name(field_name)
                .expect("postings only exist for known fields");
            let (number, omit_tf) = (info.number, info.omit_term_freq_and_positions);
            for (text, posting) in terms {
                let pointers = postings_writer.start_term();
                for (i, &(doc, freq)) in posting.entries.iter().enumerate() {
                    postings_writer.add_doc(doc, freq, omit_tf)?;
                    if has_prox && !omit_tf {
                        for &(position, ref payload) in &posting.positions[i] {
                            postings_writer
                                .add_position(position, payload.as_ref().map(|p| p.as_slice()))?;
                        }
                    }
                }
                let ti = TermInfo {
                    doc_freq: posting.entries.len() as i32,
                    freq_pointer: pointers.0,
                    prox_pointer: pointers.1,
                };
                tis_writer.add(number, text, &ti)?;
            }
        }
        postings_writer.close()?;
        tis_writer.close()?;

        field_infos.write(
            self.dir.as_ref(),
            &segment_file_name(segment, FIELD_INFOS_EXTENSION),
        )?;

        if field_infos.has_norms() {
            let mut out = self
                .dir
                .create_output(&segment_file_name(segment, NORMS_EXTENSION))?;
            out.write_bytes(&NORMS_HEADER)?;
            for field in field_infos.iter() {
                if !field.has_norms() {
                    continue;
                }
                let mut bytes = state
                    .norms
                    .get(&field.number)
                    .cloned()
                    .unwrap_or_else(Vec::new);
                bytes.resize(state.num_docs as usize, 0);
                out.write_bytes(&bytes)?;
            }
            out.close()?;
        }

        let mut fields_writer = FieldsWriter::new(self.dir.as_ref(), segment)?;
        for doc in &state.stored_docs {
            fields_writer.add_document(doc, field_infos)?;
        }
        fields_writer.close()?;

        let has_vectors = field_infos.has_vectors();
        if has_vectors {
            let mut vectors_writer = TermVectorsWriter::new(self.dir.as_ref(), segment)?;
            static EMPTY: &[TermFreqVector] = &[];
            for doc_id in 0..state.num_docs as usize {
                let vectors = state
                    .vectors
                    .get(doc_id)
                    .map(|v| v.as_slice())
                    .unwrap_or(EMPTY);
                vectors_writer.add_document(vectors, field_infos)?;
            }
            vectors_writer.close()?;
        }

        let si = SegmentInfo::new(
            segment,
            state.num_docs,
            Arc::clone(&self.dir),
            false,
            true,
            has_prox,
            has_vectors,
        );
        si.set_num_fields(field_infos.len());
        Ok(si)
    }

    /// Routes the buffered deletions after a flush: onto the fresh
    /// segment if one was written, otherwise (unbounded) onto the most
    /// recent flushed segment, or dropped when the index is empty.
    pub fn push_deletes(
        &self,
        new_segment: Option<&SegmentInfoRc>,
        infos: &SegmentInfos,
    ) -> Result<()> {
        let mut state = self.state.lock()?;
        if !state.pending_deletes.any() {
            return Ok(());
        }
        let pending = ::std::mem::replace(&mut state.pending_deletes, SegmentDeletes::new());
        match new_segment {
            Some(si) => {
                debug!(target: "DW", "push buffered deletes to new segment {}", si.name());
                self.buffered_deletes.push_deletes(pending, si)
            }
            None => {
                if infos.is_empty() {
                    debug!(target: "DW", "drop buffered deletes: no segments");
                    Ok(())
                } else {
                    let last = infos.info(infos.len() - 1);
                    debug!(target: "DW", "push buffered deletes to last segment {}", last.name());
                    self.buffered_deletes.push_deletes_no_limit(pending, last)
                }
            }
        }
    }

    /// Discards every buffered doc and deletion; used by rollback and
    /// after aborting errors.
    pub fn abort(&self) -> Result<()> {
        debug!(target: "DW", "abort buffered state");
        let mut state = self.state.lock()?;
        state.pending_deletes.clear();
        state.reset_after_flush();
        Ok(())
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::analysis::WhitespaceAnalyzer;
    use core::doc::{Field, Index, Store};
    use core::index::flush_control::DISABLE_AUTO_FLUSH;
    use core::store::RAMDirectory;

    fn writer() -> DocumentsWriter {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        DocumentsWriter::new(
            dir,
            Arc::new(WhitespaceAnalyzer),
            16,
            ::std::i32::MAX,
            DISABLE_AUTO_FLUSH,
            DISABLE_AUTO_FLUSH,
            16 * 1024 * 1024,
            Arc::new(FlushControl::new()),
            Arc::new(BufferedDeletes::new()),
            Arc::new(SegmentNameSource::new(0)),
        )
    }

    fn doc(text: &str) -> Document {
        let mut d = Document::new();
        d.add(Field::new("content", text, Store::Yes, Index::Analyzed));
        d
    }

    #[test]
    fn buffer_then_flush_builds_a_segment() {
        let dw = writer();
        dw.update_document(&doc("a b c"), None).unwrap();
        dw.update_document(&doc("a d"), None).unwrap();
        assert_eq!(dw.num_docs(), 2);
        assert!(dw.any_changes());

        let si = dw.flush().unwrap().unwrap();
        assert_eq!(si.name(), "_0");
        assert_eq!(si.doc_count(), 2);
        assert_eq!(dw.num_docs(), 0);
        let dir = si.directory();
        assert!(dir.file_exists("_0.tis"));
        assert!(dir.file_exists("_0.tii"));
        assert!(dir.file_exists("_0.frq"));
        assert!(dir.file_exists("_0.prx"));
        assert!(dir.file_exists("_0.fnm"));
        assert!(dir.file_exists("_0.fdx"));
        assert!(dir.file_exists("_0.fdt"));
        assert!(dir.file_exists("_0.nrm"));
        assert!(!dir.file_exists("_0.tvx"));
    }

    #[test]
    fn empty_buffer_flushes_to_none() {
        let dw = writer();
        assert!(dw.flush().unwrap().is_none());
    }

    #[test]
    fn update_buffers_delete_term_below_own_doc() {
        let dw = writer();
        dw.update_document(&doc("a"), Some(Term::new("content", "a")))
            .unwrap();
        let state = dw.state.lock().unwrap();
        // the bound excludes the doc that was just added
        assert_eq!(state.pending_deletes.terms[&Term::new("content", "a")], 0);
        assert_eq!(state.num_docs, 1);
    }

    #[test]
    fn abort_discards_buffered_docs() {
        let dw = writer();
        dw.update_document(&doc("a"), None).unwrap();
        dw.delete_term(Term::new("content", "zz"), false).unwrap();
        assert!(dw.any_changes());
        dw.abort().unwrap();
        assert!(!dw.any_changes());
        assert_eq!(dw.num_docs(), 0);
    }
}
