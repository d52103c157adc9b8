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
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use core::codec::codec_util;
use core::doc::Document;
use core::index::postings::{
    FRQ_CODEC, POSTINGS_VERSION_CURRENT, POSTINGS_VERSION_START, PRX_CODEC,
};
use core::index::{
    segment_file_name, AllTermDocs, CompoundFileReader, FieldInfos, FieldsReader, Norm,
    SegmentInfo, SegmentInfoRc, SegmentTermDocs, SegmentTermEnum, SegmentTermPositions, Term,
    TermDocs, TermFreqVector, TermInfo, TermInfosReader, TermVectorsReader,
    COMPOUND_FILE_EXTENSION, COMPOUND_FILE_STORE_EXTENSION,
};
use core::index::norms::NORMS_HEADER;
use core::index::term_docs::TermPositions;
use core::store::{Directory, DirectoryRc, IndexInput, BUFFER_SIZE};
use core::util::{BitVector, DocId};
use error::{ErrorKind, Result};

/// The readers shared by every clone and reopen of one segment: terms
/// dictionary, postings streams, field infos, stored fields and vectors.
/// Reference counted; the count reaching zero drops the doc-store readers
/// and the last `Arc` closes the streams.
pub struct CoreReaders {
    segment: String,
    dir: DirectoryRc,
    reading_dir: DirectoryRc,
    cfs_reader: Option<Arc<CompoundFileReader>>,
    store_cfs_reader: Mutex<Option<Arc<CompoundFileReader>>>,
    field_infos: Arc<FieldInfos>,
    tis: RwLock<TermInfosReader>,
    freq_stream: Box<dyn IndexInput>,
    prox_stream: Option<Box<dyn IndexInput>>,
    fields_reader: Mutex<Option<Arc<FieldsReader>>>,
    vectors_reader: Mutex<Option<Arc<TermVectorsReader>>>,
    read_buffer_size: usize,
    ref_count: AtomicI32,
}

impl CoreReaders {
    fn open(
        si: &SegmentInfoRc,
        read_buffer_size: usize,
        terms_index_divisor: i32,
    ) -> Result<CoreReaders> {
        let dir = Arc::clone(si.directory());
        let segment = si.name().to_string();

        let (reading_dir, cfs_reader): (DirectoryRc, Option<Arc<CompoundFileReader>>) =
            if si.use_compound_file() {
                let cfs = Arc::new(CompoundFileReader::open(
                    Arc::clone(&dir),
                    &segment_file_name(&segment, COMPOUND_FILE_EXTENSION),
                )?);
                (Arc::clone(&cfs) as DirectoryRc, Some(cfs))
            } else {
                (Arc::clone(&dir), None)
            };

        let field_infos = Arc::new(FieldInfos::read(
            reading_dir.as_ref(),
            &segment_file_name(&segment, super::FIELD_INFOS_EXTENSION),
        )?);

        let tis = TermInfosReader::open(
            reading_dir.as_ref(),
            &segment,
            Arc::clone(&field_infos),
            read_buffer_size,
            terms_index_divisor,
        )?;

        let mut freq_stream = reading_dir.open_input(
            &segment_file_name(&segment, super::FREQ_EXTENSION),
            read_buffer_size,
        )?;
        codec_util::check_header(
            freq_stream.as_mut(),
            FRQ_CODEC,
            POSTINGS_VERSION_START,
            POSTINGS_VERSION_CURRENT,
        )?;

        let prox_stream = if si.has_prox() {
            let mut prox = reading_dir.open_input(
                &segment_file_name(&segment, super::PROX_EXTENSION),
                read_buffer_size,
            )?;
            codec_util::check_header(
                prox.as_mut(),
                PRX_CODEC,
                POSTINGS_VERSION_START,
                POSTINGS_VERSION_CURRENT,
            )?;
            Some(prox)
        } else {
            None
        };

        Ok(CoreReaders {
            segment,
            dir,
            reading_dir,
            cfs_reader,
            store_cfs_reader: Mutex::new(None),
            field_infos,
            tis: RwLock::new(tis),
            freq_stream,
            prox_stream,
            fields_reader: Mutex::new(None),
            vectors_reader: Mutex::new(None),
            read_buffer_size,
            ref_count: AtomicI32::new(1),
        })
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn field_infos(&self) -> &Arc<FieldInfos> {
        &self.field_infos
    }

    pub fn directory(&self) -> &DirectoryRc {
        &self.dir
    }

    pub fn term_info(&self, term: &Term) -> Result<Option<TermInfo>> {
        self.tis.read()?.get(term)
    }

    pub fn doc_freq(&self, term: &Term) -> Result<i32> {
        self.tis.read()?.doc_freq(term)
    }

    pub fn terms(&self) -> Result<SegmentTermEnum> {
        self.tis.read()?.terms()
    }

    pub fn terms_from(&self, term: &Term) -> Result<SegmentTermEnum> {
        self.tis.read()?.terms_from(term)
    }

    pub fn terms_index_is_loaded(&self) -> Result<bool> {
        Ok(self.tis.read()?.index_is_loaded())
    }

    pub fn terms_index_divisor(&self) -> Result<i32> {
        Ok(self.tis.read()?.index_divisor())
    }

    /// Loads (or reloads at a smaller divisor) the in-memory terms index.
    /// Called when a reader opened for merging gets promoted to serve
    /// lookups.
    pub fn load_terms_index(&self, terms_index_divisor: i32) -> Result<()> {
        let mut tis = self.tis.write()?;
        if !tis.index_is_loaded() || tis.index_divisor() > terms_index_divisor {
            *tis = TermInfosReader::open(
                self.reading_dir.as_ref(),
                &self.segment,
                Arc::clone(&self.field_infos),
                self.read_buffer_size,
                terms_index_divisor,
            )?;
        }
        Ok(())
    }

    pub fn clone_freq_stream(&self) -> Result<Box<dyn IndexInput>> {
        self.freq_stream.clone_input()
    }

    pub fn clone_prox_stream(&self) -> Result<Box<dyn IndexInput>> {
        match self.prox_stream {
            Some(ref prox) => prox.clone_input(),
            None => bail!(ErrorKind::IllegalState(format!(
                "segment {} has no positions",
                self.segment
            ))),
        }
    }

    /// Opens the stored-fields and vectors readers, honoring doc-store
    /// sharing; idempotent.
    pub fn open_doc_stores(&self, si: &SegmentInfo) -> Result<()> {
        {
            let fields = self.fields_reader.lock()?;
            if fields.is_some() {
                return Ok(());
            }
        }

        let (store_dir, store_segment, offset, size): (DirectoryRc, String, i32, i32) =
            if si.doc_store_offset() != -1 {
                let store_segment = si.doc_store_segment();
                let store_dir: DirectoryRc = if si.doc_store_is_compound() {
                    let mut slot = self.store_cfs_reader.lock()?;
                    if slot.is_none() {
                        *slot = Some(Arc::new(CompoundFileReader::open(
                            Arc::clone(&self.dir),
                            &segment_file_name(&store_segment, COMPOUND_FILE_STORE_EXTENSION),
                        )?));
                    }
                    Arc::clone(slot.as_ref().expect("just inserted")) as DirectoryRc
                } else {
                    Arc::clone(&self.dir)
                };
                (store_dir, store_segment, si.doc_store_offset(), si.doc_count())
            } else {
                (
                    Arc::clone(&self.reading_dir),
                    self.segment.clone(),
                    -1,
                    si.doc_count(),
                )
            };

        let fields = FieldsReader::new(
            store_dir.as_ref(),
            &store_segment,
            Arc::clone(&self.field_infos),
            self.read_buffer_size,
            offset,
            size,
        )?;
        *self.fields_reader.lock()? = Some(Arc::new(fields));

        if si.has_vectors() {
            let vectors = TermVectorsReader::new(
                store_dir.as_ref(),
                &store_segment,
                Arc::clone(&self.field_infos),
                self.read_buffer_size,
                offset,
                size,
            )?;
            *self.vectors_reader.lock()? = Some(Arc::new(vectors));
        }
        Ok(())
    }

    pub fn fields_reader(&self) -> Result<Arc<FieldsReader>> {
        match *self.fields_reader.lock()? {
            Some(ref fields) => Ok(Arc::clone(fields)),
            None => bail!(ErrorKind::IllegalState(format!(
                "doc stores of segment {} are not open",
                self.segment
            ))),
        }
    }

    pub fn vectors_reader(&self) -> Result<Option<Arc<TermVectorsReader>>> {
        Ok(self.vectors_reader.lock()?.as_ref().map(Arc::clone))
    }

    pub fn doc_stores_open(&self) -> bool {
        self.fields_reader.lock().unwrap().is_some()
    }

    pub fn inc_ref(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn dec_ref(&self) -> Result<()> {
        let before = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(before >= 1);
        if before == 1 {
            // the last reader is gone; drop the doc stores now, the
            // postings streams close when the final Arc drops
            *self.fields_reader.lock()? = None;
            *self.vectors_reader.lock()? = None;
            *self.store_cfs_reader.lock()? = None;
        }
        Ok(())
    }

    pub fn ref_count(&self) -> i32 {
        self.ref_count.load(Ordering::Acquire)
    }
}

struct Rollback {
    has_changes: bool,
    deleted_docs_dirty: bool,
    norms_dirty: bool,
    pending_delete_count: i32,
    si_snapshot: Option<SegmentInfo>,
}

/// A read view of one segment: live-docs bitmap, norms, terms, stored
/// fields and vectors. Clones share the `CoreReaders` block; the bitmap
/// and each norm byte array copy on first write.
pub struct SegmentReader {
    si: SegmentInfoRc,
    read_only: bool,
    core: Arc<CoreReaders>,
    deleted_docs: Mutex<Option<Arc<BitVector>>>,
    norms: Mutex<HashMap<String, Norm>>,
    deleted_docs_dirty: AtomicBool,
    norms_dirty: AtomicBool,
    has_changes: AtomicBool,
    pending_delete_count: AtomicI32,
    rollback: Mutex<Option<Rollback>>,
    ref_count: AtomicI32,
    deletes_cache_key: Arc<()>,
}

pub type SegmentReaderRc = Arc<SegmentReader>;

impl SegmentReader {
    /// Opens a reader with doc stores and default buffering.
    pub fn get(
        read_only: bool,
        si: &SegmentInfoRc,
        terms_index_divisor: i32,
    ) -> Result<SegmentReaderRc> {
        Self::get_with(read_only, si, BUFFER_SIZE, true, terms_index_divisor)
    }

    pub fn get_with(
        read_only: bool,
        si: &SegmentInfoRc,
        read_buffer_size: usize,
        do_open_stores: bool,
        terms_index_divisor: i32,
    ) -> Result<SegmentReaderRc> {
        let core = Arc::new(CoreReaders::open(si, read_buffer_size, terms_index_divisor)?);
        if do_open_stores {
            core.open_doc_stores(si)?;
        }

        let deleted_docs = if si.has_deletions()? {
            let bv = BitVector::read(si.directory().as_ref(), &si.del_file_name())?;
            if bv.size() != si.doc_count() as usize {
                bail!(ErrorKind::CorruptIndex(format!(
                    "deletions file size {} does not match doc count {} of segment {}",
                    bv.size(),
                    si.doc_count(),
                    si.name()
                )));
            }
            debug_assert_eq!(bv.count() as i32, si.del_count()?);
            Some(Arc::new(bv))
        } else {
            None
        };

        let reader = SegmentReader {
            si: Arc::clone(si),
            read_only,
            core,
            deleted_docs: Mutex::new(deleted_docs),
            norms: Mutex::new(HashMap::new()),
            deleted_docs_dirty: AtomicBool::new(false),
            norms_dirty: AtomicBool::new(false),
            has_changes: AtomicBool::new(false),
            pending_delete_count: AtomicI32::new(0),
            rollback: Mutex::new(None),
            ref_count: AtomicI32::new(1),
            deletes_cache_key: Arc::new(()),
        };
        reader.open_norms()?;
        Ok(Arc::new(reader))
    }

    // Builds the per-field Norm table. Fields live in the shared `.nrm`
    // unless a separate generation file has superseded them.
    fn open_norms(&self) -> Result<()> {
        let mut norms = self.norms.lock()?;
        let doc_count = self.si.doc_count();
        self.si.set_num_fields(self.core.field_infos.len());
        let mut nrm_slot = 0i64;
        for field in self.core.field_infos.iter() {
            if !field.has_norms() {
                continue;
            }
            let filename = self.si.norm_file_name(field.number);
            let (dir, seek): (DirectoryRc, u64) =
                if filename.ends_with(super::NORMS_EXTENSION) {
                    // inside the compound file when the segment is compound
                    (
                        Arc::clone(&self.core.reading_dir),
                        NORMS_HEADER.len() as u64 + (nrm_slot * i64::from(doc_count)) as u64,
                    )
                } else {
                    // separate generations always live in the main directory
                    (Arc::clone(&self.core.dir), 0)
                };
            norms.insert(
                field.name.clone(),
                Norm::new(dir, filename, seek, doc_count, field.number),
            );
            nrm_slot += 1;
        }
        Ok(())
    }

    /// A reader over the same core with its own view of deletions and
    /// norms. Byte arrays are shared until either side writes.
    pub fn clone_reader(&self, open_read_only: bool) -> Result<SegmentReaderRc> {
        self.core.inc_ref();
        let deleted_docs = self.deleted_docs.lock()?.as_ref().map(Arc::clone);
        let mut norms = HashMap::new();
        for (name, norm) in self.norms.lock()?.iter() {
            norms.insert(name.clone(), norm.clone_norm()?);
        }
        Ok(Arc::new(SegmentReader {
            si: Arc::clone(&self.si),
            read_only: open_read_only,
            core: Arc::clone(&self.core),
            deleted_docs: Mutex::new(deleted_docs),
            norms: Mutex::new(norms),
            deleted_docs_dirty: AtomicBool::new(false),
            norms_dirty: AtomicBool::new(false),
            has_changes: AtomicBool::new(false),
            pending_delete_count: AtomicI32::new(0),
            rollback: Mutex::new(None),
            ref_count: AtomicI32::new(1),
            deletes_cache_key: Arc::clone(&self.deletes_cache_key),
        }))
    }

    /// Reopens against an advanced descriptor generation: the core stays
    /// shared, deletions and norms reload at the new generations.
    pub fn reopen_segment(
        &self,
        si: &SegmentInfoRc,
        open_read_only: bool,
    ) -> Result<SegmentReaderRc> {
        debug_assert_eq!(si.name(), self.si.name());
        self.core.inc_ref();
        let deleted_docs = if si.has_deletions()? {
            Some(Arc::new(BitVector::read(
                si.directory().as_ref(),
                &si.del_file_name(),
            )?))
        } else {
            None
        };
        let reader = SegmentReader {
            si: Arc::clone(si),
            read_only: open_read_only,
            core: Arc::clone(&self.core),
            deleted_docs: Mutex::new(deleted_docs),
            norms: Mutex::new(HashMap::new()),
            deleted_docs_dirty: AtomicBool::new(false),
            norms_dirty: AtomicBool::new(false),
            has_changes: AtomicBool::new(false),
            pending_delete_count: AtomicI32::new(0),
            rollback: Mutex::new(None),
            ref_count: AtomicI32::new(1),
            deletes_cache_key: Arc::clone(&self.deletes_cache_key),
        };
        reader.open_norms()?;
        Ok(Arc::new(reader))
    }

    pub fn segment_info(&self) -> &SegmentInfoRc {
        &self.si
    }

    pub fn segment_name(&self) -> &str {
        self.si.name()
    }

    pub fn directory(&self) -> &DirectoryRc {
        self.core.directory()
    }

    pub fn core(&self) -> &Arc<CoreReaders> {
        &self.core
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn max_doc(&self) -> i32 {
        self.si.doc_count()
    }

    // The deletion accessors feed the merge doc-skip loops and the
    // mid-merge delete transfer; a poisoned bitmap lock must panic, never
    // read as "nothing deleted".
    pub fn num_deleted_docs(&self) -> i32 {
        self.deleted_docs
            .lock()
            .unwrap()
            .as_ref()
            .map(|bv| bv.count() as i32)
            .unwrap_or(0)
    }

    pub fn num_docs(&self) -> i32 {
        self.max_doc() - self.num_deleted_docs()
    }

    pub fn has_deletions(&self) -> bool {
        self.deleted_docs.lock().unwrap().is_some()
    }

    pub fn is_deleted(&self, doc: DocId) -> bool {
        self.deleted_docs
            .lock()
            .unwrap()
            .as_ref()
            .map(|bv| bv.get(doc as usize))
            .unwrap_or(false)
    }

    pub fn deleted_docs_snapshot(&self) -> Option<Arc<BitVector>> {
        self.deleted_docs.lock().unwrap().as_ref().map(Arc::clone)
    }

    pub fn field_infos(&self) -> &Arc<FieldInfos> {
        self.core.field_infos()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.core
            .field_infos
            .iter()
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn terms(&self) -> Result<SegmentTermEnum> {
        self.core.terms()
    }

    pub fn terms_from(&self, term: &Term) -> Result<SegmentTermEnum> {
        self.core.terms_from(term)
    }

    pub fn doc_freq(&self, term: &Term) -> Result<i32> {
        self.core.doc_freq(term)
    }

    pub fn term_docs(&self) -> Result<Box<dyn TermDocs>> {
        Ok(Box::new(SegmentTermDocs::new(
            Arc::clone(&self.core),
            self.deleted_docs_snapshot(),
        )?))
    }

    pub fn term_docs_for(&self, term: &Term) -> Result<Box<dyn TermDocs>> {
        let mut docs = self.term_docs()?;
        docs.seek(Some(term))?;
        Ok(docs)
    }

    pub fn term_positions(&self) -> Result<Box<dyn TermPositions>> {
        Ok(Box::new(SegmentTermPositions::new(
            Arc::clone(&self.core),
            self.deleted_docs_snapshot(),
        )?))
    }

    /// Cursor over every live document.
    pub fn all_term_docs(&self) -> AllTermDocs {
        AllTermDocs::new(self.max_doc(), self.deleted_docs_snapshot())
    }

    pub fn document(&self, n: DocId) -> Result<Document> {
        self.core.fields_reader()?.doc(n)
    }

    pub fn get_term_freq_vector(&self, doc: DocId, field: &str) -> Result<Option<TermFreqVector>> {
        match self.core.vectors_reader()? {
            Some(vectors) => vectors.get_field(doc, field),
            None => Ok(None),
        }
    }

    pub fn get_term_freq_vectors(&self, doc: DocId) -> Result<Vec<TermFreqVector>> {
        match self.core.vectors_reader()? {
            Some(vectors) => vectors.get(doc),
            None => Ok(Vec::new()),
        }
    }

    pub fn has_norms(&self, field: &str) -> Result<bool> {
        Ok(self.norms.lock()?.contains_key(field))
    }

    /// The norm byte array for a field, or None when the field omits
    /// norms.
    pub fn norms(&self, field: &str) -> Result<Option<Arc<Vec<u8>>>> {
        let norms = self.norms.lock()?;
        match norms.get(field) {
            Some(norm) => Ok(Some(norm.bytes()?)),
            None => Ok(None),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            bail!(ErrorKind::UnsupportedOperation(
                "this reader is read-only".into()
            ));
        }
        Ok(())
    }

    /// Marks one document deleted; returns whether the bit was newly set.
    pub fn delete_document(&self, doc: DocId) -> Result<bool> {
        self.ensure_writable()?;
        if doc < 0 || doc >= self.max_doc() {
            bail!(ErrorKind::IllegalArgument(format!(
                "doc {} out of bounds [0, {})",
                doc,
                self.max_doc()
            )));
        }
        let mut slot = self.deleted_docs.lock()?;
        if slot.is_none() {
            *slot = Some(Arc::new(BitVector::new(self.max_doc() as usize)));
        }
        {
            let arc = slot.as_mut().expect("bitmap was just created");
            if arc.get(doc as usize) {
                return Ok(false);
            }
            if Arc::strong_count(arc) > 1 {
                // clones share the bitmap; give this reader a private copy
                *arc = Arc::new(arc.as_ref().clone());
            }
            let bv = Arc::get_mut(arc).expect("private copy has a single owner");
            bv.set(doc as usize);
        }
        self.deleted_docs_dirty.store(true, Ordering::Release);
        self.has_changes.store(true, Ordering::Release);
        self.pending_delete_count.fetch_add(1, Ordering::AcqRel);
        Ok(true)
    }

    /// Drops the whole deletion bitmap.
    pub fn undelete_all(&self) -> Result<()> {
        self.ensure_writable()?;
        *self.deleted_docs.lock()? = None;
        self.si.clear_del_gen();
        self.si.set_del_count(0);
        self.deleted_docs_dirty.store(false, Ordering::Release);
        self.pending_delete_count.store(0, Ordering::Release);
        self.has_changes.store(true, Ordering::Release);
        Ok(())
    }

    pub fn set_norm(&self, doc: DocId, field: &str, value: u8) -> Result<()> {
        self.ensure_writable()?;
        let norms = self.norms.lock()?;
        let norm = norms.get(field).ok_or_else(|| {
            ErrorKind::IllegalArgument(format!("field {} has no norms", field))
        })?;
        norm.set(doc, value)?;
        self.norms_dirty.store(true, Ordering::Release);
        self.has_changes.store(true, Ordering::Release);
        Ok(())
    }

    pub fn has_changes(&self) -> bool {
        self.has_changes.load(Ordering::Acquire)
    }

    pub fn pending_delete_count(&self) -> i32 {
        self.pending_delete_count.load(Ordering::Acquire)
    }

    /// Snapshots the dirty state so a failed commit can be undone.
    pub fn start_commit(&self) -> Result<()> {
        let mut rollback = self.rollback.lock()?;
        *rollback = Some(Rollback {
            has_changes: self.has_changes.load(Ordering::Acquire),
            deleted_docs_dirty: self.deleted_docs_dirty.load(Ordering::Acquire),
            norms_dirty: self.norms_dirty.load(Ordering::Acquire),
            pending_delete_count: self.pending_delete_count.load(Ordering::Acquire),
            si_snapshot: Some(self.si.clone_info()),
        });
        for norm in self.norms.lock()?.values() {
            norm.start_commit();
        }
        Ok(())
    }

    /// Writes a new deletions file and new norms files at the next
    /// generations, then advances the descriptor.
    pub fn commit_changes(&self) -> Result<()> {
        if self.deleted_docs_dirty.load(Ordering::Acquire) {
            let slot = self.deleted_docs.lock()?;
            let bv = slot.as_ref().expect("dirty deletions imply a bitmap");
            self.si.advance_del_gen();
            bv.write(self.core.dir.as_ref(), &self.si.del_file_name())?;
            self.si.set_del_count(bv.count() as i32);
        }
        if self.norms_dirty.load(Ordering::Acquire) {
            for norm in self.norms.lock()?.values() {
                if norm.is_dirty() {
                    norm.re_write(&self.si)?;
                }
            }
        }
        self.deleted_docs_dirty.store(false, Ordering::Release);
        self.norms_dirty.store(false, Ordering::Release);
        self.pending_delete_count.store(0, Ordering::Release);
        self.has_changes.store(false, Ordering::Release);
        Ok(())
    }

    /// Forgets pending changes without writing them; the deletion bitmap
    /// and norms keep their in-memory state but will not be committed.
    pub fn discard_changes(&self) {
        self.has_changes.store(false, Ordering::Release);
        self.deleted_docs_dirty.store(false, Ordering::Release);
        self.norms_dirty.store(false, Ordering::Release);
        self.pending_delete_count.store(0, Ordering::Release);
    }

    /// Restores the pre-commit state recorded by `start_commit`.
    pub fn rollback_commit(&self) -> Result<()> {
        if let Some(rollback) = self.rollback.lock()?.take() {
            self.has_changes.store(rollback.has_changes, Ordering::Release);
            self.deleted_docs_dirty
                .store(rollback.deleted_docs_dirty, Ordering::Release);
            self.norms_dirty.store(rollback.norms_dirty, Ordering::Release);
            self.pending_delete_count
                .store(rollback.pending_delete_count, Ordering::Release);
            if let Some(ref snapshot) = rollback.si_snapshot {
                self.si.reset_from(snapshot);
            }
            for norm in self.norms.lock()?.values() {
                norm.rollback_commit();
            }
        }
        Ok(())
    }

    /// Stable identity for external field caches: unchanged across clones
    /// and reopens that share the core.
    pub fn field_cache_key(&self) -> usize {
        Arc::as_ptr(&self.core) as usize
    }

    /// Stable identity of the deletion lineage shared by clones.
    pub fn deletes_cache_key(&self) -> usize {
        Arc::as_ptr(&self.deletes_cache_key) as usize
    }

    pub fn inc_ref(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn ref_count(&self) -> i32 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Drops one reference. The last reference first commits pending
    /// changes, then releases the shared core.
    pub fn dec_ref(&self) -> Result<()> {
        let before = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(before >= 1);
        if before == 1 {
            if self.has_changes() {
                self.commit_changes()?;
            }
            self.core.dec_ref()?;
        }
        Ok(())
    }

    /// Drops one reference, discarding (not committing) pending changes.
    pub fn dec_ref_discard(&self) -> Result<()> {
        let before = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(before >= 1);
        if before == 1 {
            self.has_changes.store(false, Ordering::Release);
            self.core.dec_ref()?;
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.dec_ref()
    }

    pub fn files(&self) -> Result<::std::collections::HashSet<String>> {
        self.si.files()
    }
}

impl ::std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(
            f,
            "SegmentReader({}, docs={}/{})",
            self.si.name(),
            self.num_docs(),
            self.max_doc()
        )
    }
}
