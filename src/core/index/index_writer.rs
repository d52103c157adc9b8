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

//! The top-level writer. One `IndexWriter` owns a directory (guarded by
//! the write lock) and sequences everything that mutates it: document
//! adds and updates, buffered deletions, flushes, background merges,
//! two-phase commits and rollback.
//!
//! Lock order is strict to stay deadlock free: the writer's own lock
//! first, then the buffered-deletes lock, then the reader pool or flush
//! control. File sync during commit runs outside every lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use core::analysis::Analyzer;
use core::doc::Document;
use core::index::{
    segment_file_name, BufferedDeletes, CompoundFileWriter, DocumentsWriter, FieldInfos,
    FlushControl, IndexFileDeleter, IndexWriterConfig, MergePolicy, MergeScheduler,
    MergedSegmentWarmer, OneMergeRc, OpenMode, PayloadProcessorProvider, ReaderPool,
    SegmentInfo, SegmentInfoRc, SegmentInfos, SegmentMerger, SegmentNameSource, SegmentReaderRc,
    Term, WriterEvent, COMPOUND_FILE_EXTENSION, INDEX_EXTENSIONS_IN_COMPOUND_FILE,
};
use core::search::Query;
use core::store::{DataOutput, Directory, DirectoryRc, IndexInput, IndexOutput, Lock, BUFFER_SIZE, MERGE_BUFFER_SIZE};
use core::util::to_base36;
use error::{Error, ErrorKind, Result};

pub const WRITE_LOCK_NAME: &str = "write.lock";

struct WriterCore {
    segment_infos: SegmentInfos,
    rollback_segment_infos: SegmentInfos,
    deleter: IndexFileDeleter,
    pending_merges: VecDeque<OneMergeRc>,
    running_merges: Vec<OneMergeRc>,
    merging_segments: HashSet<String>,
    segments_to_optimize: HashSet<String>,
    optimize_max_num_segments: i32,
    merge_exceptions: Vec<OneMergeRc>,
    merge_gen: i64,
    stop_merges: bool,
    pending_commit: Option<SegmentInfos>,
    pending_commit_change_count: i64,
    keep_fully_deleted_segments: bool,
}

struct IndexWriterInner {
    dir: DirectoryRc,
    analyzer: Arc<dyn Analyzer>,
    term_index_interval: i32,
    reader_terms_index_divisor: i32,
    ram_buffer_bytes: i64,
    merge_policy: Arc<dyn MergePolicy>,
    merge_scheduler: Arc<dyn MergeScheduler>,
    merged_segment_warmer: Option<Arc<dyn MergedSegmentWarmer>>,
    payload_processor_provider: Option<Arc<dyn PayloadProcessorProvider>>,
    doc_writer: DocumentsWriter,
    buffered_deletes: Arc<BufferedDeletes>,
    reader_pool: ReaderPool,
    flush_control: Arc<FlushControl>,
    name_source: Arc<SegmentNameSource>,
    core: Mutex<WriterCore>,
    cond: Condvar,
    commit_lock: Mutex<()>,
    write_lock: Mutex<Option<Box<dyn Lock>>>,
    closed: AtomicBool,
    closing: AtomicBool,
    hit_oom: AtomicBool,
    last_commit_change_count: AtomicI64,
    flush_count: AtomicI32,
    flush_deletes_count: AtomicI32,
}

/// Cheap cloneable handle onto one writer; merge scheduler threads hold
/// their own.
pub struct IndexWriter {
    inner: Arc<IndexWriterInner>,
}

impl Clone for IndexWriter {
    fn clone(&self) -> IndexWriter {
        IndexWriter {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl IndexWriter {
    /// Opens a writer on a directory, obtaining its write lock. CREATE
    /// truncates, APPEND requires an existing index, CREATE_OR_APPEND
    /// decides by looking.
    pub fn open(dir: DirectoryRc, config: IndexWriterConfig) -> Result<IndexWriter> {
        let mut write_lock = dir.make_lock(WRITE_LOCK_NAME);
        write_lock.obtain(config.write_lock_timeout_ms)?;
        // open_internal releases the lock again if anything below fails
        Self::open_internal(&dir, config, write_lock)
    }

    fn open_internal(
        dir: &DirectoryRc,
        config: IndexWriterConfig,
        mut write_lock: Box<dyn Lock>,
    ) -> Result<IndexWriter> {
        let init = (|| -> Result<IndexWriter> {
            let ram_buffer_bytes = config.ram_buffer_size_bytes();
            let index_exists = SegmentInfos::current_generation(&dir.list_all()?)? > 0;
            let create = match config.open_mode {
                OpenMode::Create => true,
                OpenMode::Append => {
                    if !index_exists {
                        bail!(ErrorKind::CorruptIndex(format!(
                            "no index found in {} to append to",
                            dir
                        )));
                    }
                    false
                }
                OpenMode::CreateOrAppend => !index_exists,
            };

            let segment_infos = if create {
                let mut infos = SegmentInfos::new();
                if index_exists {
                    // keep generations moving forward so old readers never
                    // see a replayed commit
                    let old = SegmentInfos::read_current(dir)?;
                    infos.update_generation(&old);
                    infos.counter = old.counter;
                    infos.version = old.version + 1;
                }
                infos
            } else {
                SegmentInfos::read_current(dir)?
            };
            let rollback_segment_infos = segment_infos.clone_infos();

            let name_source = Arc::new(SegmentNameSource::new(segment_infos.counter));
            let buffered_deletes = Arc::new(BufferedDeletes::new());
            let flush_control = Arc::new(FlushControl::new());
            let doc_writer = DocumentsWriter::new(
                Arc::clone(dir),
                Arc::clone(&config.analyzer),
                config.term_index_interval,
                config.max_field_length,
                config.max_buffered_docs,
                config.max_buffered_delete_terms,
                ram_buffer_bytes,
                Arc::clone(&flush_control),
                Arc::clone(&buffered_deletes),
                Arc::clone(&name_source),
            );
            let reader_pool = ReaderPool::new(config.reader_terms_index_divisor);

            let deleter =
                IndexFileDeleter::new(Arc::clone(dir), config.deletion_policy, &segment_infos)?;

            let writer = IndexWriter {
                inner: Arc::new(IndexWriterInner {
                    dir: Arc::clone(dir),
                    analyzer: config.analyzer,
                    term_index_interval: config.term_index_interval,
                    reader_terms_index_divisor: config.reader_terms_index_divisor,
                    ram_buffer_bytes,
                    merge_policy: config.merge_policy,
                    merge_scheduler: config.merge_scheduler,
                    merged_segment_warmer: config.merged_segment_warmer,
                    payload_processor_provider: config.payload_processor_provider,
                    doc_writer,
                    buffered_deletes,
                    reader_pool,
                    flush_control,
                    name_source,
                    core: Mutex::new(WriterCore {
                        segment_infos,
                        rollback_segment_infos,
                        deleter,
                        pending_merges: VecDeque::new(),
                        running_merges: Vec::new(),
                        merging_segments: HashSet::new(),
                        segments_to_optimize: HashSet::new(),
                        optimize_max_num_segments: 0,
                        merge_exceptions: Vec::new(),
                        merge_gen: 0,
                        stop_merges: false,
                        pending_commit: None,
                        pending_commit_change_count: 0,
                        keep_fully_deleted_segments: false,
                    }),
                    cond: Condvar::new(),
                    commit_lock: Mutex::new(()),
                    write_lock: Mutex::new(None),
                    closed: AtomicBool::new(false),
                    closing: AtomicBool::new(false),
                    hit_oom: AtomicBool::new(false),
                    last_commit_change_count: AtomicI64::new(0),
                    flush_count: AtomicI32::new(0),
                    flush_deletes_count: AtomicI32::new(0),
                }),
            };
            if create {
                // an empty CREATE still publishes an (empty) first commit
                writer.inner.name_source.note_change();
            }
            Ok(writer)
        })();

        match init {
            Ok(writer) => {
                *writer.inner.write_lock.lock()? = Some(write_lock);
                Ok(writer)
            }
            Err(e) => {
                let _ = write_lock.release();
                Err(e)
            }
        }
    }

    /// Whether a writer currently holds the directory's write lock.
    pub fn is_locked(dir: &DirectoryRc) -> bool {
        dir.make_lock(WRITE_LOCK_NAME).is_locked()
    }

    /// Forcibly releases the write lock; only safe when no writer is
    /// alive (e.g. after a crash).
    pub fn unlock(dir: &DirectoryRc) -> Result<()> {
        let mut lock = dir.make_lock(WRITE_LOCK_NAME);
        if lock.try_obtain()? {
            lock.release()?;
        } else {
            // stale lock file from a dead process
            lock.release().or_else(|_| {
                if dir.file_exists(WRITE_LOCK_NAME) {
                    dir.delete_file(WRITE_LOCK_NAME)
                } else {
                    Ok(())
                }
            })?;
        }
        Ok(())
    }

    fn ensure_open_full(&self, include_pending_close: bool) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire)
            || (include_pending_close && self.inner.closing.load(Ordering::Acquire))
        {
            bail!(ErrorKind::AlreadyClosed("this IndexWriter is closed".into()));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        self.ensure_open_full(true)
    }

    fn ensure_no_oom(&self) -> Result<()> {
        if self.inner.hit_oom.load(Ordering::Acquire) {
            bail!(ErrorKind::IllegalState(
                "this writer hit an unrecoverable error; can only rollback or close".into()
            ));
        }
        Ok(())
    }

    pub fn directory(&self) -> &DirectoryRc {
        &self.inner.dir
    }

    pub fn analyzer(&self) -> &Arc<dyn Analyzer> {
        &self.inner.analyzer
    }

    pub fn change_count(&self) -> i64 {
        self.inner.name_source.change_count()
    }

    fn checkpoint(&self, core: &mut WriterCore) -> Result<()> {
        self.inner.name_source.note_change();
        core.segment_infos.counter = self.inner.name_source.counter();
        core.deleter.checkpoint(&core.segment_infos, false)
    }

    pub fn new_segment_name(&self) -> String {
        self.inner.name_source.next_name()
    }

    /// Total docs, counting buffered ones and not counting deletions.
    pub fn max_doc(&self) -> Result<i32> {
        let core = self.inner.core.lock()?;
        Ok(self.inner.doc_writer.num_docs() + core.segment_infos.total_doc_count())
    }

    /// Total docs net of buffered and committed deletions.
    pub fn num_docs(&self) -> Result<i32> {
        let core = self.inner.core.lock()?;
        let mut count = self.inner.doc_writer.num_docs();
        for si in core.segment_infos.segments() {
            count += si.doc_count() - self.num_deleted_docs(si)?;
        }
        Ok(count)
    }

    pub fn num_deleted_docs(&self, info: &SegmentInfoRc) -> Result<i32> {
        match self.inner.reader_pool.get_if_exists(info)? {
            Some(reader) => {
                let count = reader.num_deleted_docs();
                self.inner.reader_pool.release(&reader, false)?;
                Ok(count)
            }
            None => info.del_count(),
        }
    }

    pub fn has_deletions(&self) -> Result<bool> {
        self.ensure_open()?;
        if self.inner.buffered_deletes.any() || self.inner.doc_writer.any_deletions() {
            return Ok(true);
        }
        let core = self.inner.core.lock()?;
        for si in core.segment_infos.segments() {
            if si.has_deletions()? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn segment_count(&self) -> Result<usize> {
        Ok(self.inner.core.lock()?.segment_infos.len())
    }

    pub fn num_ram_docs(&self) -> i32 {
        self.inner.doc_writer.num_docs()
    }

    pub fn ram_size_in_bytes(&self) -> i64 {
        self.inner.doc_writer.bytes_used() + self.inner.buffered_deletes.bytes_used()
    }

    pub fn seg_string(&self) -> Result<String> {
        let core = self.inner.core.lock()?;
        let mut buffer = String::new();
        for (i, si) in core.segment_infos.segments().iter().enumerate() {
            if i > 0 {
                buffer.push(' ');
            }
            buffer.push_str(&si.to_string_with(&self.inner.dir, 0));
        }
        Ok(buffer)
    }

    // ------------------------------------------------------------------
    // add / update / delete

    pub fn add_document(&self, doc: &Document) -> Result<()> {
        self.update_document(None, doc)
    }

    /// Atomically deletes the docs matching `term` (if any) and adds the
    /// new document.
    pub fn update_document(&self, term: Option<Term>, doc: &Document) -> Result<()> {
        self.ensure_open()?;
        let do_flush = self.inner.doc_writer.update_document(doc, term);
        let do_flush = match do_flush {
            Ok(f) => f,
            Err(e) => {
                debug!(target: "IW", "hit exception adding document: {}", e);
                if let Err(cleanup) = self.process_events() {
                    warn!(target: "IW", "cleanup after failed add also failed: {}", cleanup);
                }
                return Err(e);
            }
        };
        if do_flush {
            self.flush(true, false)?;
        }
        self.process_events()
    }

    pub fn delete_documents(&self, term: Term) -> Result<()> {
        self.ensure_open()?;
        if self.inner.doc_writer.delete_term(term, false)? {
            self.flush(true, false)?;
        }
        Ok(())
    }

    pub fn delete_documents_by_terms(&self, terms: Vec<Term>) -> Result<()> {
        self.ensure_open()?;
        if self.inner.doc_writer.delete_terms(terms)? {
            self.flush(true, false)?;
        }
        Ok(())
    }

    pub fn delete_documents_by_query(&self, query: Arc<dyn Query>) -> Result<()> {
        self.ensure_open()?;
        if self.inner.doc_writer.delete_query(query)? {
            self.flush(true, false)?;
        }
        Ok(())
    }

    pub fn delete_documents_by_queries(&self, queries: Vec<Arc<dyn Query>>) -> Result<()> {
        self.ensure_open()?;
        if self.inner.doc_writer.delete_queries(queries)? {
            self.flush(true, false)?;
        }
        Ok(())
    }

    /// Drops every document (and every buffered change) while keeping the
    /// writer open; far cheaper than deleting by match-all.
    pub fn delete_all(&self) -> Result<()> {
        self.ensure_open()?;
        let mut guard = self.inner.core.lock()?;
        guard = self.finish_merges_locked(guard, false)?;
        let core = &mut *guard;
        self.inner.doc_writer.abort()?;
        self.inner.buffered_deletes.clear()?;
        core.segment_infos.clear_segments();
        self.checkpoint(core)?;
        core.deleter.refresh(None)?;
        drop(guard);
        self.inner.reader_pool.clear(None)?;
        self.inner.name_source.note_change();
        Ok(())
    }

    fn process_events(&self) -> Result<()> {
        while let Some(event) = self.inner.doc_writer.events.pop() {
            match event {
                WriterEvent::FlushFailed(segment) => {
                    let mut guard = self.inner.core.lock()?;
                    let core = &mut *guard;
                    core.deleter.refresh(Some(&segment))?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // flush

    pub fn flush(&self, trigger_merge: bool, apply_all_deletes: bool) -> Result<()> {
        // never hold the writer lock while the scheduler runs: merges can
        // take a long time and re-enter
        self.ensure_open_full(false)?;
        if self.do_flush(apply_all_deletes)? && trigger_merge {
            self.maybe_merge()?;
        }
        Ok(())
    }

    fn do_flush(&self, apply_all_deletes: bool) -> Result<bool> {
        self.ensure_no_oom()?;
        self.inner
            .flush_control
            .set_flush_pending_no_wait("explicit flush");

        let result = self.do_flush_internal(apply_all_deletes);
        self.inner.flush_control.clear_flush_pending();
        if result.is_err() {
            debug!(target: "IW", "hit exception during flush");
            if let Err(e) = self.process_events() {
                warn!(target: "IW", "cleanup after failed flush also failed: {}", e);
            }
        }
        result
    }

    fn do_flush_internal(&self, mut apply_all_deletes: bool) -> Result<bool> {
        let mut guard = self.inner.core.lock()?;
        debug!(target: "IW", "start flush: apply_all_deletes={}", apply_all_deletes);

        let new_segment = self.inner.doc_writer.flush()?;
        if let Some(ref si) = new_segment {
            self.set_diagnostics(si, "flush", None);
            {
                let core = &mut *guard;
                core.segment_infos.push(Arc::clone(si));
            }
            // compound wrapping happens before anyone reads the segment
            let use_compound = {
                let core = &*guard;
                self.inner
                    .merge_policy
                    .use_compound_file(&core.segment_infos, si)
            };
            if use_compound {
                let members = self.build_compound_file(si)?;
                let core = &mut *guard;
                for member in &members {
                    core.deleter.delete_file(member);
                }
                si.set_use_compound_file(true);
            }
            {
                let core = &mut *guard;
                self.checkpoint(core)?;
            }
        }

        {
            let core = &*guard;
            self.inner
                .doc_writer
                .push_deletes(new_segment.as_ref(), &core.segment_infos)?;
        }

        if !apply_all_deletes {
            // deletes eating half the buffer get applied eagerly, so a
            // long tail of tiny segments can't pin them forever
            let half_buffer = self.inner.ram_buffer_bytes / 2;
            if self.inner.flush_control.flush_deletes()
                || (self.inner.ram_buffer_bytes > 0
                    && self.inner.buffered_deletes.bytes_used() > half_buffer)
            {
                apply_all_deletes = true;
                debug!(
                    target: "IW",
                    "force apply deletes: bytes={}", self.inner.buffered_deletes.bytes_used()
                );
            }
        }

        if apply_all_deletes {
            self.inner.flush_deletes_count.fetch_add(1, Ordering::AcqRel);
            let applied = {
                let core = &*guard;
                self.inner.buffered_deletes.apply_deletes(
                    &self.inner.reader_pool,
                    &core.segment_infos,
                    core.segment_infos.segments(),
                )?
            };
            if applied {
                let core = &mut *guard;
                self.checkpoint(core)?;
            }
            self.inner.flush_control.clear_deletes();
        } else {
            debug!(
                target: "IW",
                "defer deletes: terms={} bytes={}",
                self.inner.buffered_deletes.num_terms(),
                self.inner.buffered_deletes.bytes_used()
            );
        }

        self.inner.flush_count.fetch_add(1, Ordering::AcqRel);
        Ok(new_segment.is_some())
    }

    // Bundles a freshly flushed (non-merge) segment into a compound file.
    fn build_compound_file(&self, si: &SegmentInfoRc) -> Result<Vec<String>> {
        let cfs_name = segment_file_name(si.name(), COMPOUND_FILE_EXTENSION);
        let mut writer = CompoundFileWriter::new(Arc::clone(&self.inner.dir), &cfs_name);
        let mut members = Vec::new();
        for ext in INDEX_EXTENSIONS_IN_COMPOUND_FILE.iter() {
            let name = segment_file_name(si.name(), ext);
            if self.inner.dir.file_exists(&name) {
                writer.add_file(&name);
                members.push(name);
            }
        }
        writer.close()?;
        Ok(members)
    }

    fn set_diagnostics(&self, si: &SegmentInfoRc, source: &str, details: Option<HashMap<String, String>>) {
        let mut diagnostics = HashMap::new();
        diagnostics.insert("source".to_string(), source.to_string());
        diagnostics.insert(
            "engine.version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );
        diagnostics.insert("os".to_string(), ::std::env::consts::OS.to_string());
        if let Some(details) = details {
            diagnostics.extend(details);
        }
        si.set_diagnostics(diagnostics);
    }

    // ------------------------------------------------------------------
    // merges

    pub fn maybe_merge(&self) -> Result<()> {
        self.update_pending_merges(1, false)?;
        self.inner.merge_scheduler.merge(self)
    }

    fn update_pending_merges(&self, max_num_segments_optimize: i32, optimize: bool) -> Result<()> {
        debug_assert!(!optimize || max_num_segments_optimize > 0);
        let mut guard = self.inner.core.lock()?;
        if guard.stop_merges || self.inner.hit_oom.load(Ordering::Acquire) {
            return Ok(());
        }
        let spec = {
            let core = &*guard;
            if optimize {
                let spec = self.inner.merge_policy.find_merges_for_optimize(
                    &core.segment_infos,
                    max_num_segments_optimize,
                    &core.segments_to_optimize,
                )?;
                if let Some(ref spec) = spec {
                    for merge in &spec.merges {
                        merge.set_optimize(max_num_segments_optimize);
                    }
                }
                spec
            } else {
                self.inner.merge_policy.find_merges(&core.segment_infos)?
            }
        };
        if let Some(spec) = spec {
            for merge in spec.merges {
                self.register_merge(&mut guard, &merge)?;
            }
        }
        Ok(())
    }

    fn ensure_contiguous_merge(core: &WriterCore, merge: &OneMergeRc) -> Result<usize> {
        let first = match core.segment_infos.index_of(&merge.segments[0]) {
            Some(first) => first,
            None => bail!(ErrorKind::RuntimeError(format!(
                "merge policy selected segment {} that is not in the index",
                merge.segments[0].name()
            ))),
        };
        for (i, si) in merge.segments.iter().enumerate() {
            let at = core.segment_infos.index_of(si);
            if at != Some(first + i) {
                bail!(ErrorKind::RuntimeError(
                    "merge policy selected non-contiguous segments".into()
                ));
            }
        }
        Ok(first)
    }

    fn register_merge(
        &self,
        guard: &mut MutexGuard<WriterCore>,
        merge: &OneMergeRc,
    ) -> Result<bool> {
        let core = &mut **guard;
        if merge.is_register_done() {
            return Ok(true);
        }
        if core.stop_merges {
            merge.abort();
            bail!(ErrorKind::MergeAborted(format!(
                "merge is aborted: {}",
                merge.seg_string(&self.inner.dir)
            )));
        }
        let mut is_external = false;
        for si in &merge.segments {
            if core.merging_segments.contains(si.name()) {
                return Ok(false);
            }
            if !core.segment_infos.contains(si) {
                return Ok(false);
            }
            if !si.same_dir(&self.inner.dir) {
                is_external = true;
            }
            if core.segments_to_optimize.contains(si.name()) {
                merge.set_optimize(core.optimize_max_num_segments);
            }
        }
        Self::ensure_contiguous_merge(core, merge)?;

        debug!(
            target: "IW",
            "register merge: {} [{} pending]",
            merge.seg_string(&self.inner.dir),
            core.pending_merges.len() + 1
        );
        merge.set_merge_gen(core.merge_gen);
        merge.set_external(is_external);
        for si in &merge.segments {
            core.merging_segments.insert(si.name().to_string());
        }
        core.pending_merges.push_back(Arc::clone(merge));
        merge.set_register_done(true);
        Ok(true)
    }

    /// Hands the next registered merge to a scheduler worker.
    pub fn next_merge(&self) -> Result<Option<OneMergeRc>> {
        let mut guard = self.inner.core.lock()?;
        let core = &mut *guard;
        match core.pending_merges.pop_front() {
            Some(merge) => {
                core.running_merges.push(Arc::clone(&merge));
                Ok(Some(merge))
            }
            None => Ok(None),
        }
    }

    pub fn has_pending_merges(&self) -> bool {
        !self.inner.core.lock().unwrap().pending_merges.is_empty()
    }

    /// Runs one merge to completion (scheduler entry point). Internal
    /// aborts are swallowed; external (cross-directory) merges surface
    /// them.
    pub fn merge(&self, merge: &OneMergeRc) -> Result<()> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.merge_guarded(merge)));
        match outcome {
            Ok(result) => result,
            Err(_) => {
                // a panicking merge may have corrupted in-memory state;
                // poison the writer so only rollback/close remain
                self.inner.hit_oom.store(true, Ordering::Release);
                let e = Error::from(ErrorKind::RuntimeError(
                    "merge thread panicked; writer is poisoned".into(),
                ));
                merge.set_error(&e);
                Err(e)
            }
        }
    }

    fn merge_guarded(&self, merge: &OneMergeRc) -> Result<()> {
        let mut success = false;
        let result = (|| -> Result<()> {
            self.merge_init(merge)?;
            debug!(target: "IW", "now merge {}", merge.seg_string(&self.inner.dir));
            self.merge_middle(merge)?;
            success = true;
            Ok(())
        })();

        {
            let mut guard = self.inner.core.lock()?;
            self.merge_finish(&mut guard, merge);
            if !success {
                debug!(target: "IW", "hit exception during merge");
                let core = &mut *guard;
                if let Some(info) = merge.info() {
                    if !core.segment_infos.contains(&info) {
                        core.deleter.refresh(Some(info.name()))?;
                    }
                }
            }
        }

        let result = match result {
            Err(e) => {
                merge.set_error(&e);
                {
                    let mut guard = self.inner.core.lock()?;
                    let core = &mut *guard;
                    if merge.merge_gen() == core.merge_gen
                        && !core
                            .merge_exceptions
                            .iter()
                            .any(|m| Arc::ptr_eq(m, merge))
                    {
                        core.merge_exceptions.push(Arc::clone(merge));
                    }
                }
                match *e.kind() {
                    // internal aborts are expected when closing/rolling back
                    ErrorKind::MergeAborted(_) if !merge.is_external() => Ok(()),
                    _ => Err(e),
                }
            }
            Ok(()) => Ok(()),
        };

        if success && !merge.is_aborted() {
            let closing = self.inner.closing.load(Ordering::Acquire)
                || self.inner.closed.load(Ordering::Acquire);
            if merge.is_optimize() || !closing {
                // this merge may have enabled new ones
                self.update_pending_merges(merge.max_num_segments_optimize().max(1), merge.is_optimize())?;
            }
        }
        result
    }

    fn merge_init(&self, merge: &OneMergeRc) -> Result<()> {
        let mut guard = self.inner.core.lock()?;
        self.ensure_no_oom()?;
        debug_assert!(merge.is_register_done());
        if merge.info().is_some() {
            return Ok(());
        }
        if merge.is_aborted() {
            return Ok(());
        }

        // deletes targeting the merged segments must be on disk before
        // the merger reads them. Lock order: IW -> BD -> RP
        let applied = {
            let core = &*guard;
            self.inner.buffered_deletes.apply_deletes(
                &self.inner.reader_pool,
                &core.segment_infos,
                &merge.segments,
            )?
        };
        if applied {
            let core = &mut *guard;
            self.checkpoint(core)?;
        }

        let has_vectors = merge.segments.iter().any(|si| si.has_vectors());
        let name = self.new_segment_name();
        let info = Arc::new(SegmentInfo::new(
            &name,
            0,
            Arc::clone(&self.inner.dir),
            false,
            true,
            false,
            has_vectors,
        ));
        let mut details = HashMap::new();
        details.insert("optimize".to_string(), merge.is_optimize().to_string());
        details.insert("mergeFactor".to_string(), merge.segments.len().to_string());
        self.set_diagnostics(&info, "merge", Some(details));
        merge.set_info(Arc::clone(&info));

        // keep the target from being selected for another merge while the
        // compound file is still building
        let core = &mut *guard;
        core.merging_segments.insert(name);
        Ok(())
    }

    fn merge_middle(&self, merge: &OneMergeRc) -> Result<i32> {
        merge.check_aborted(&self.inner.dir)?;
        let info = merge.info().expect("merge_init ran");
        let merged_name = info.name().to_string();

        let mut merger = SegmentMerger::new(
            Arc::clone(&self.inner.dir),
            &merged_name,
            self.inner.term_index_interval,
            Some(Arc::clone(merge)),
            self.inner.payload_processor_provider.clone(),
            FieldInfos::new(),
        );

        // hold "live" readers to commit merged deletes later; merge from
        // clones so concurrent deletes don't shift under the merger
        let mut readers: Vec<SegmentReaderRc> = Vec::with_capacity(merge.segments.len());
        let mut clones: Vec<SegmentReaderRc> = Vec::with_capacity(merge.segments.len());
        let open_result = (|| -> Result<()> {
            for si in &merge.segments {
                let reader = self.inner.reader_pool.get_full(
                    si,
                    true,
                    MERGE_BUFFER_SIZE,
                    -1,
                )?;
                readers.push(reader);
                let clone = readers
                    .last()
                    .expect("just pushed")
                    .clone_reader(true)?;
                merger.add(SegmentReaderRc::clone(&clone));
                clones.push(clone);
            }
            Ok(())
        })();
        if let Err(e) = open_result {
            self.close_merge_readers_lists(&readers, &clones, true)?;
            return Err(e);
        }
        merge.set_readers(readers, clones);

        let body = (|| -> Result<i32> {
            merge.check_aborted(&self.inner.dir)?;

            let merged_doc_count = merger.merge()?;
            info.set_doc_count(merged_doc_count);
            info.set_has_prox(merger.field_infos().has_prox());
            info.set_has_vectors(merger.field_infos().has_vectors());
            merge.set_merge_docs(merged_doc_count);

            let use_compound = {
                let core = self.inner.core.lock()?;
                !merge.is_aborted()
                    && self
                        .inner
                        .merge_policy
                        .use_compound_file(&core.segment_infos, &info)
            };
            if use_compound {
                let cfs_name = segment_file_name(&merged_name, COMPOUND_FILE_EXTENSION);
                debug!(target: "IW", "create compound file {}", cfs_name);
                match merger.create_compound_file(&cfs_name) {
                    Ok(members) => {
                        let mut guard = self.inner.core.lock()?;
                        let core = &mut *guard;
                        for member in &members {
                            core.deleter.delete_file(member);
                        }
                        if merge.is_aborted() {
                            debug!(target: "IW", "abort merge after building CFS");
                            core.deleter.delete_file(&cfs_name);
                            bail!(ErrorKind::MergeAborted(
                                "merge aborted after building compound file".into()
                            ));
                        }
                        info.set_use_compound_file(true);
                    }
                    Err(e) => {
                        let mut guard = self.inner.core.lock()?;
                        let core = &mut *guard;
                        core.deleter.delete_file(&cfs_name);
                        core.deleter.refresh(Some(&merged_name))?;
                        return Err(e);
                    }
                }
            }

            // open (and optionally warm) the merged segment, then fold in
            // deletions that raced the merge
            let load_stores = self.inner.merged_segment_warmer.is_some();
            let divisor = if load_stores {
                self.inner.reader_terms_index_divisor
            } else {
                -1
            };
            let merged_reader =
                self.inner
                    .reader_pool
                    .get_full(&info, load_stores, BUFFER_SIZE, divisor)?;
            let commit_result = (|| -> Result<bool> {
                if let Some(ref warmer) = self.inner.merged_segment_warmer {
                    warmer.warm(&merged_reader)?;
                }
                self.commit_merge(merge, &merged_reader)
            })();
            // must checkpoint after releasing: the merged reader may have
            // just written a new deletes file
            let released = self.inner.reader_pool.release(&merged_reader, false)?;
            if released {
                let mut guard = self.inner.core.lock()?;
                let core = &mut *guard;
                self.checkpoint(core)?;
            }
            match commit_result {
                Ok(true) => Ok(merged_doc_count),
                Ok(false) => bail!(ErrorKind::MergeAborted(
                    "merge was aborted before its commit".into()
                )),
                Err(e) => Err(e),
            }
        })();

        if body.is_err() {
            let (readers, clones) = merge.take_readers();
            self.close_merge_readers_lists(&readers, &clones, true)?;
        }
        body
    }

    fn close_merge_readers_lists(
        &self,
        readers: &[SegmentReaderRc],
        clones: &[SegmentReaderRc],
        suppress: bool,
    ) -> Result<()> {
        let mut any_changes = false;
        let mut first_err: Option<Error> = None;
        for clone in clones {
            match clone.close() {
                Ok(()) => {}
                Err(e) => {
                    if !suppress && first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        for reader in readers {
            match self.inner.reader_pool.release(reader, true) {
                Ok(changed) => any_changes |= changed,
                Err(e) => {
                    if !suppress && first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        if any_changes {
            let mut guard = self.inner.core.lock()?;
            let core = &mut *guard;
            self.checkpoint(core)?;
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // Folds deletions that arrived while the merge ran: any doc deleted
    // in the live reader but not in the merge-time clone is re-deleted in
    // the merged segment at its remapped id.
    fn commit_merged_deletes(
        &self,
        merge: &OneMergeRc,
        merged_reader: &SegmentReaderRc,
    ) -> Result<()> {
        let (readers, clones) = merge.readers_snapshot();
        debug_assert_eq!(readers.len(), merge.segments.len());
        let mut doc_upto = 0;
        let mut del_count = 0;
        for (i, si) in merge.segments.iter().enumerate() {
            let doc_count = si.doc_count();
            let previous = &clones[i];
            let current = &readers[i];
            if previous.has_deletions() {
                // the merge collapsed the old deletions away; newly
                // flushed ones must be remapped one by one
                if current.num_deleted_docs() > previous.num_deleted_docs() {
                    for j in 0..doc_count {
                        if previous.is_deleted(j) {
                            debug_assert!(current.is_deleted(j));
                        } else {
                            if current.is_deleted(j) {
                                merged_reader.delete_document(doc_upto)?;
                                del_count += 1;
                            }
                            doc_upto += 1;
                        }
                    }
                } else {
                    doc_upto += doc_count - previous.num_deleted_docs();
                }
            } else if current.has_deletions() {
                // this segment had no deletions when the merge started
                for j in 0..doc_count {
                    if current.is_deleted(j) {
                        merged_reader.delete_document(doc_upto)?;
                        del_count += 1;
                    }
                    doc_upto += 1;
                }
            } else {
                doc_upto += doc_count;
            }
        }
        debug_assert_eq!(merged_reader.num_deleted_docs(), del_count);
        Ok(())
    }

    fn commit_merge(&self, merge: &OneMergeRc, merged_reader: &SegmentReaderRc) -> Result<bool> {
        let mut guard = self.inner.core.lock()?;
        self.ensure_no_oom()?;
        debug_assert!(merge.is_register_done());
        debug!(
            target: "IW",
            "commitMerge: {}", merge.seg_string(&self.inner.dir)
        );

        // rollback or close may have aborted this merge while it ran
        if merge.is_aborted() {
            debug!(target: "IW", "commitMerge: skipping aborted merge");
            return Ok(false);
        }
        let info = merge.info().expect("merge_init ran");

        let start = Self::ensure_contiguous_merge(&guard, merge)?;
        self.commit_merged_deletes(merge, merged_reader)?;

        {
            let core = &mut *guard;
            core.segment_infos
                .remove_range(start, start + merge.segments.len());
            debug_assert!(!core.segment_infos.contains(&info));
            core.segment_infos.insert(start, Arc::clone(&info));
            // commits in flight must not lose the swap
            self.checkpoint(core)?;
            if merge.is_optimize() {
                // cascade the optimize onto the merged segment
                core.segments_to_optimize.insert(info.name().to_string());
            }
        }
        drop(guard);

        let (readers, clones) = merge.take_readers();
        self.close_merge_readers_lists(&readers, &clones, false)?;

        // pending changes of the merged-away segments are moot now
        self.inner.reader_pool.clear(Some(&merge.segments))?;

        // deletes that arrived against the last source move to the new
        // segment. Lock order: IW -> BD
        self.inner
            .buffered_deletes
            .commit_merge(&merge.segments, &info)?;
        Ok(true)
    }

    fn merge_finish(&self, guard: &mut MutexGuard<WriterCore>, merge: &OneMergeRc) {
        let core = &mut **guard;
        if merge.is_register_done() {
            for si in &merge.segments {
                core.merging_segments.remove(si.name());
            }
            if let Some(info) = merge.info() {
                core.merging_segments.remove(info.name());
            }
            merge.set_register_done(false);
        }
        core.running_merges.retain(|m| !Arc::ptr_eq(m, merge));
        self.inner.cond.notify_all();
    }

    fn finish_merges_locked<'a>(
        &self,
        mut guard: MutexGuard<'a, WriterCore>,
        wait: bool,
    ) -> Result<MutexGuard<'a, WriterCore>> {
        if !wait {
            guard.stop_merges = true;
            for merge in guard.pending_merges.drain(..).collect::<Vec<_>>() {
                debug!(target: "IW", "abort pending merge {}", merge.seg_string(&self.inner.dir));
                merge.abort();
                // unwind its registration by hand; it never ran
                let core = &mut *guard;
                if merge.is_register_done() {
                    for si in &merge.segments {
                        core.merging_segments.remove(si.name());
                    }
                    merge.set_register_done(false);
                }
            }
            for merge in guard.running_merges.iter() {
                debug!(target: "IW", "abort running merge {}", merge.seg_string(&self.inner.dir));
                merge.abort();
            }
            while !guard.running_merges.is_empty() {
                debug!(
                    target: "IW",
                    "wait for {} running merges to abort", guard.running_merges.len()
                );
                let (g, _) = self
                    .inner
                    .cond
                    .wait_timeout(guard, Duration::from_secs(1))?;
                guard = g;
            }
            guard.stop_merges = false;
            self.inner.cond.notify_all();
            debug_assert!(guard.merging_segments.is_empty());
            debug!(target: "IW", "all running merges have aborted");
        } else {
            while !guard.pending_merges.is_empty() || !guard.running_merges.is_empty() {
                let (g, _) = self
                    .inner
                    .cond
                    .wait_timeout(guard, Duration::from_secs(1))?;
                guard = g;
            }
        }
        Ok(guard)
    }

    /// Blocks until every registered merge has finished.
    pub fn wait_for_merges(&self) -> Result<()> {
        let guard = self.inner.core.lock()?;
        self.finish_merges_locked(guard, true)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // optimize / expunge

    /// Merges the index down to at most `max_num_segments` segments.
    pub fn optimize(&self, max_num_segments: i32, do_wait: bool) -> Result<()> {
        self.ensure_open()?;
        if max_num_segments < 1 {
            bail!(ErrorKind::IllegalArgument(format!(
                "max_num_segments must be >= 1; got {}",
                max_num_segments
            )));
        }
        debug!(target: "IW", "optimize: index now {}", self.seg_string()?);
        self.flush(true, true)?;

        {
            let mut guard = self.inner.core.lock()?;
            let core = &mut *guard;
            core.merge_exceptions.clear();
            core.segments_to_optimize.clear();
            core.optimize_max_num_segments = max_num_segments;
            for si in core.segment_infos.segments() {
                core.segments_to_optimize.insert(si.name().to_string());
            }
            // in-flight merges become optimize merges too
            for merge in core.pending_merges.iter().chain(core.running_merges.iter()) {
                merge.set_optimize(max_num_segments);
            }
        }

        self.update_pending_merges(max_num_segments, true)?;
        self.inner.merge_scheduler.merge(self)?;

        if do_wait {
            let mut guard = self.inner.core.lock()?;
            loop {
                self.ensure_no_oom()?;
                let failed: Vec<String> = guard
                    .merge_exceptions
                    .iter()
                    .filter(|m| m.is_optimize())
                    .filter_map(|m| m.error())
                    .collect();
                if let Some(first) = failed.into_iter().next() {
                    bail!(ErrorKind::RuntimeError(format!(
                        "background merge hit exception: {}",
                        first
                    )));
                }
                let pending = guard
                    .pending_merges
                    .iter()
                    .chain(guard.running_merges.iter())
                    .any(|m| m.is_optimize());
                if !pending {
                    break;
                }
                let (g, _) = self
                    .inner
                    .cond
                    .wait_timeout(guard, Duration::from_secs(1))?;
                guard = g;
            }
            drop(guard);
            // close mid-optimize surfaces to the caller
            self.ensure_open()?;
        }
        Ok(())
    }

    /// Merges away deleted documents without changing the logical index.
    pub fn expunge_deletes(&self, do_wait: bool) -> Result<()> {
        self.ensure_open()?;
        debug!(target: "IW", "expungeDeletes: index now {}", self.seg_string()?);
        let spec = {
            let mut guard = self.inner.core.lock()?;
            let spec = {
                let core = &*guard;
                self.inner
                    .merge_policy
                    .find_merges_to_expunge_deletes(&core.segment_infos)?
            };
            if let Some(ref spec) = spec {
                for merge in &spec.merges {
                    self.register_merge(&mut guard, merge)?;
                }
            }
            spec
        };
        self.inner.merge_scheduler.merge(self)?;

        if let (true, Some(spec)) = (do_wait, spec) {
            let mut guard = self.inner.core.lock()?;
            loop {
                self.ensure_no_oom()?;
                for merge in &spec.merges {
                    if let Some(e) = merge.error() {
                        bail!(ErrorKind::RuntimeError(format!(
                            "background merge hit exception: {}",
                            e
                        )));
                    }
                }
                let running = spec.merges.iter().any(|m| {
                    guard.pending_merges.iter().any(|p| Arc::ptr_eq(p, m))
                        || guard.running_merges.iter().any(|r| Arc::ptr_eq(r, m))
                });
                if !running {
                    break;
                }
                let (g, _) = self
                    .inner
                    .cond
                    .wait_timeout(guard, Duration::from_secs(1))?;
                guard = g;
            }
        }
        Ok(())
    }

    /// Fully deleted segments stay in the graph at commit time when set;
    /// normally they are pruned from the committed snapshot.
    pub fn keep_fully_deleted_segments(&self) -> Result<()> {
        let mut guard = self.inner.core.lock()?;
        guard.keep_fully_deleted_segments = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // add indexes

    fn no_dup_dirs(&self, dirs: &[DirectoryRc]) -> Result<()> {
        for (i, dir) in dirs.iter().enumerate() {
            if Arc::ptr_eq(dir, &self.inner.dir) {
                bail!(ErrorKind::IllegalArgument(
                    "cannot add a directory to itself".into()
                ));
            }
            for other in &dirs[..i] {
                if Arc::ptr_eq(dir, other) {
                    bail!(ErrorKind::IllegalArgument(
                        "directory given twice to add_indexes".into()
                    ));
                }
            }
        }
        Ok(())
    }

    /// Copies every committed segment of the given directories into this
    /// index under fresh names; shared doc stores keep their sharing.
    pub fn add_indexes(&self, dirs: &[DirectoryRc]) -> Result<()> {
        self.ensure_open()?;
        self.no_dup_dirs(dirs)?;
        debug!(target: "IW", "add_indexes from {} directories", dirs.len());
        self.flush(false, true)?;

        for dir in dirs {
            // per-invocation map: old doc-store name -> new name
            let mut ds_names: HashMap<String, String> = HashMap::new();
            let infos = SegmentInfos::read_current(dir)?;
            for si in infos.segments() {
                let new_info = self.copy_segment_as_is(si, dir, &mut ds_names)?;
                let mut guard = self.inner.core.lock()?;
                let core = &mut *guard;
                core.segment_infos.push(Arc::new(new_info));
                self.checkpoint(core)?;
            }
        }
        self.maybe_merge()
    }

    fn copy_segment_as_is(
        &self,
        si: &SegmentInfoRc,
        source_dir: &DirectoryRc,
        ds_names: &mut HashMap<String, String>,
    ) -> Result<SegmentInfo> {
        let new_name = self.new_segment_name();
        let old_ds_name = si.doc_store_segment();
        let share_doc_store = si.doc_store_offset() != -1;
        let (new_ds_name, copy_doc_store) = if share_doc_store {
            match ds_names.get(&old_ds_name) {
                Some(existing) => (existing.clone(), false),
                None => {
                    ds_names.insert(old_ds_name.clone(), new_name.clone());
                    (new_name.clone(), true)
                }
            }
        } else {
            (new_name.clone(), true)
        };

        for file in si.files()? {
            let is_store_file = super::is_doc_store_file(&file)
                || super::matches_extension(&file, super::COMPOUND_FILE_STORE_EXTENSION);
            if is_store_file && share_doc_store && !copy_doc_store {
                // another enrolled segment already brought this store over
                continue;
            }
            let base = if is_store_file && share_doc_store {
                &new_ds_name
            } else {
                &new_name
            };
            let dest = format!("{}{}", base, super::strip_segment_name(&file));
            if self.inner.dir.file_exists(&dest) {
                bail!(ErrorKind::IllegalState(format!(
                    "file {} already exists while adding indexes",
                    dest
                )));
            }
            let mut input = source_dir.open_input(&file, MERGE_BUFFER_SIZE)?;
            let mut output = self.inner.dir.create_output(&dest)?;
            let len = input.len();
            output.copy_bytes(input.as_mut(), len)?;
            output.close()?;
        }

        let new_info = si.clone_renamed(
            Arc::clone(&self.inner.dir),
            &new_name,
            if share_doc_store {
                Some(new_ds_name.as_str())
            } else {
                None
            },
        );
        Ok(new_info)
    }

    /// Merges already-open readers into this index as one new segment.
    pub fn add_indexes_readers(&self, readers: &[SegmentReaderRc]) -> Result<()> {
        self.ensure_open()?;
        debug!(target: "IW", "add_indexes from {} readers", readers.len());
        self.flush(false, true)?;

        let merged_name = self.new_segment_name();
        let mut merger = SegmentMerger::new(
            Arc::clone(&self.inner.dir),
            &merged_name,
            self.inner.term_index_interval,
            None,
            self.inner.payload_processor_provider.clone(),
            FieldInfos::new(),
        );
        for reader in readers {
            merger.add(SegmentReaderRc::clone(reader));
        }
        let doc_count = merger.merge()?;

        let info = Arc::new(SegmentInfo::new(
            &merged_name,
            doc_count,
            Arc::clone(&self.inner.dir),
            false,
            true,
            merger.field_infos().has_prox(),
            merger.field_infos().has_vectors(),
        ));
        info.set_num_fields(merger.field_infos().len());
        self.set_diagnostics(&info, "addIndexes(readers)", None);

        let use_compound = {
            let mut guard = self.inner.core.lock()?;
            let core = &mut *guard;
            core.segment_infos.push(Arc::clone(&info));
            self.checkpoint(core)?;
            self.inner
                .merge_policy
                .use_compound_file(&core.segment_infos, &info)
        };
        if use_compound {
            let cfs_name = segment_file_name(&merged_name, COMPOUND_FILE_EXTENSION);
            let members = merger.create_compound_file(&cfs_name)?;
            let mut guard = self.inner.core.lock()?;
            let core = &mut *guard;
            info.set_use_compound_file(true);
            self.checkpoint(core)?;
            for member in &members {
                core.deleter.delete_file(member);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // commit / rollback / close

    /// First half of a two-phase commit: flush, apply deletes, write
    /// every file durably and stage the new segments file. Nothing is
    /// visible to readers yet.
    pub fn prepare_commit(&self, commit_user_data: Option<HashMap<String, String>>) -> Result<()> {
        self.ensure_no_oom()?;
        {
            let guard = self.inner.core.lock()?;
            if guard.pending_commit.is_some() {
                bail!(ErrorKind::IllegalState(
                    "prepare_commit was already called with no corresponding call to commit".into()
                ));
            }
        }
        debug!(target: "IW", "prepareCommit: flush");
        self.flush(true, true)?;
        self.start_commit(commit_user_data)
    }

    fn start_commit(&self, commit_user_data: Option<HashMap<String, String>>) -> Result<()> {
        self.ensure_no_oom()?;
        let my_change_count;
        let mut to_sync;
        {
            let mut guard = self.inner.core.lock()?;
            let change_count = self.inner.name_source.change_count();
            let last = self.inner.last_commit_change_count.load(Ordering::Acquire);
            debug_assert!(last <= change_count);
            // even a no-change commit advances the generation; only the
            // referenced file set stays identical
            my_change_count = change_count;

            // flush the dirty deletion/norm files of pooled readers first
            // so the snapshot references their new generations
            self.inner.reader_pool.commit()?;
            {
                let core = &mut *guard;
                self.checkpoint(core)?;
            }

            let core = &mut *guard;
            core.segment_infos.counter = self.inner.name_source.counter();
            to_sync = core.segment_infos.clone_infos();
            if !core.keep_fully_deleted_segments {
                to_sync.prune_deleted_segments()?;
            }
            if let Some(user_data) = commit_user_data {
                to_sync.set_user_data(user_data);
            }
            // protect the snapshot's files from a concurrent merge commit
            core.deleter.inc_ref_infos(&to_sync, false)?;
        }

        // the expensive part runs without the writer lock
        let sync_result = (|| -> Result<()> {
            let files = to_sync.files(&self.inner.dir, false)?;
            self.inner.dir.sync(&files)?;
            Ok(())
        })();

        let mut guard = self.inner.core.lock()?;
        match sync_result.and_then(|_| to_sync.prepare_commit(&self.inner.dir)) {
            Ok(()) => {
                debug!(target: "IW", "done all syncs");
                let core = &mut *guard;
                core.segment_infos.update_generation(&to_sync);
                core.pending_commit = Some(to_sync);
                core.pending_commit_change_count = my_change_count;
                Ok(())
            }
            Err(e) => {
                debug!(target: "IW", "hit exception committing segments file");
                let core = &mut *guard;
                core.segment_infos.update_generation(&to_sync);
                core.deleter.dec_ref_infos(&to_sync, false)?;
                Err(e)
            }
        }
    }

    /// Publishes the pending commit (or performs a whole commit when none
    /// was prepared). Only one commit runs at a time.
    pub fn commit(&self) -> Result<()> {
        self.commit_with(None)
    }

    pub fn commit_with(&self, commit_user_data: Option<HashMap<String, String>>) -> Result<()> {
        self.ensure_open()?;
        self.commit_internal(commit_user_data)
    }

    fn commit_internal(&self, commit_user_data: Option<HashMap<String, String>>) -> Result<()> {
        debug!(target: "IW", "commit: start");
        let _commit_guard = self.inner.commit_lock.lock()?;
        let has_pending = {
            let guard = self.inner.core.lock()?;
            guard.pending_commit.is_some()
        };
        if !has_pending {
            debug!(target: "IW", "commit: now prepare");
            self.prepare_commit(commit_user_data)?;
        } else {
            debug!(target: "IW", "commit: already prepared");
        }
        self.finish_commit()
    }

    fn finish_commit(&self) -> Result<()> {
        let mut guard = self.inner.core.lock()?;
        let pending = {
            let core = &mut *guard;
            core.pending_commit.take()
        };
        let mut pending = match pending {
            Some(pending) => pending,
            None => {
                debug!(target: "IW", "commit: pendingCommit == null; skip");
                return Ok(());
            }
        };

        let finish = pending.finish_commit(&self.inner.dir);
        let result = match finish {
            Ok(file_name) => {
                debug!(target: "IW", "commit: wrote segments file {}", file_name);
                let change_count = guard.pending_commit_change_count;
                self.inner
                    .last_commit_change_count
                    .store(change_count, Ordering::Release);
                let core = &mut *guard;
                core.segment_infos.update_generation(&pending);
                core.segment_infos
                    .set_user_data(pending.user_data().clone());
                core.rollback_segment_infos = pending.clone_infos();
                core.deleter.checkpoint(&pending, true)?;
                Ok(())
            }
            Err(e) => {
                // the rename never happened: the previous commit is still
                // the latest and the staged file is abandoned
                pending.rollback_commit(&self.inner.dir);
                Err(e)
            }
        };

        {
            let core = &mut *guard;
            // matches the inc_ref in start_commit
            core.deleter.dec_ref_infos(&pending, false)?;
        }
        self.inner.cond.notify_all();
        debug!(target: "IW", "commit: done");
        result
    }

    /// Discards every change since the last commit and closes the writer.
    pub fn rollback(&self) -> Result<()> {
        self.ensure_open_full(false)?;
        if self.should_close()? {
            self.rollback_internal()
        } else {
            Ok(())
        }
    }

    fn should_close(&self) -> Result<bool> {
        let mut guard = self.inner.core.lock()?;
        loop {
            if self.inner.closed.load(Ordering::Acquire) {
                return Ok(false);
            }
            if !self.inner.closing.load(Ordering::Acquire) {
                self.inner.closing.store(true, Ordering::Release);
                return Ok(true);
            }
            // another thread is closing; wait for it to finish either way
            let (g, _) = self
                .inner
                .cond
                .wait_timeout(guard, Duration::from_secs(1))?;
            guard = g;
        }
    }

    fn rollback_internal(&self) -> Result<()> {
        debug!(target: "IW", "rollback");
        let result = (|| -> Result<()> {
            {
                let guard = self.inner.core.lock()?;
                self.finish_merges_locked(guard, false)?;
            }
            self.inner.merge_policy.close();
            self.inner.merge_scheduler.close()?;
            self.inner.buffered_deletes.clear()?;

            let mut guard = self.inner.core.lock()?;
            {
                let core = &mut *guard;
                core.stop_merges = true;
                if let Some(mut pending) = core.pending_commit.take() {
                    pending.rollback_commit(&self.inner.dir);
                    core.deleter.dec_ref_infos(&pending, false)?;
                }
                self.inner.cond.notify_all();

                // the same graph instance lives on with the last-commit
                // descriptors, so the next commit writes a new generation
                let rollback = core.rollback_segment_infos.clone_infos();
                core.segment_infos.clear_segments();
                core.segment_infos.replace_segments(&rollback);
            }
            self.inner.doc_writer.abort()?;
            {
                let core = &mut *guard;
                core.deleter.checkpoint(&core.segment_infos, false)?;
                core.deleter.refresh(None)?;
            }
            drop(guard);
            self.inner.reader_pool.clear(None)?;
            self.inner
                .last_commit_change_count
                .store(self.inner.name_source.change_count(), Ordering::Release);
            Ok(())
        })();

        if let Err(ref e) = result {
            self.inner.closing.store(false, Ordering::Release);
            self.inner.cond.notify_all();
            debug!(target: "IW", "hit exception during rollback: {}", e);
        }
        result?;
        self.close_internal(false)
    }

    /// Flushes, optionally waits for merges, commits and releases the
    /// write lock. A writer that hit an unrecoverable error rolls back
    /// instead of committing.
    pub fn close(&self) -> Result<()> {
        self.close_with(true)
    }

    pub fn close_with(&self, wait_for_merges: bool) -> Result<()> {
        if self.should_close()? {
            if self.inner.hit_oom.load(Ordering::Acquire) {
                self.rollback_internal()
            } else {
                self.close_internal(wait_for_merges)
            }
        } else {
            Ok(())
        }
    }

    fn close_internal(&self, wait_for_merges: bool) -> Result<()> {
        let result = (|| -> Result<()> {
            debug!(target: "IW", "now flush at close; wait_for_merges={}", wait_for_merges);
            self.inner.doc_writer.close();

            if !self.inner.hit_oom.load(Ordering::Acquire) {
                self.flush(wait_for_merges, true)?;
            }
            if wait_for_merges {
                // give merges one last chance to run
                self.inner.merge_scheduler.merge(self)?;
            }
            self.inner.merge_policy.close();
            {
                let guard = self.inner.core.lock()?;
                let mut guard = self.finish_merges_locked(guard, wait_for_merges)?;
                guard.stop_merges = true;
            }
            self.inner.merge_scheduler.close()?;

            if !self.inner.hit_oom.load(Ordering::Acquire) {
                debug!(target: "IW", "now call final commit");
                self.commit_internal(None)?;
            }

            self.inner.reader_pool.close()?;
            {
                let mut guard = self.inner.core.lock()?;
                let core = &mut *guard;
                core.deleter.close()?;
            }

            if let Some(mut lock) = self.inner.write_lock.lock()?.take() {
                lock.release()?;
            }
            self.inner.closed.store(true, Ordering::Release);
            Ok(())
        })();

        self.inner.closing.store(false, Ordering::Release);
        self.inner.cond.notify_all();
        if result.is_err() && !self.inner.closed.load(Ordering::Acquire) {
            debug!(target: "IW", "hit exception while closing");
        }
        result
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// The name the next flushed segment would take; diagnostic.
    pub fn newest_segment_name(&self) -> String {
        format!(
            "_{}",
            to_base36(self.inner.name_source.counter().max(0) as u64)
        )
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        // the last handle must not leave the write lock behind
        if Arc::strong_count(&self.inner) == 1 && !self.inner.closed.load(Ordering::Acquire) {
            if let Err(e) = self.close_with(false) {
                error!(target: "IW", "close on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::doc::{Document, Field, Index, Store};
    use core::index::{DirectoryReader, LogDocMergePolicy, OneMerge};
    use core::store::RAMDirectory;

    fn content_doc(text: &str) -> Document {
        let mut doc = Document::new();
        doc.add(Field::new("content", text, Store::Yes, Index::Analyzed));
        doc
    }

    // Walks the merge lifecycle by hand so a delete can land strictly
    // between the reader-clone snapshot and the merge commit: the live
    // pooled reader then carries one more deletion than its clone, which
    // is exactly the state the per-document remap loop in
    // commit_merged_deletes exists for.
    #[test]
    fn delete_arriving_mid_merge_remaps_into_merged_segment() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let config = IndexWriterConfig::builder()
            .open_mode(OpenMode::Create)
            .merge_policy(Arc::new(LogDocMergePolicy::new(100, false)))
            .build();
        let writer = IndexWriter::open(Arc::clone(&dir), config).unwrap();

        // three segments of ten docs, each doc carrying a unique id term
        for i in 0..3 {
            for j in 0..10 {
                writer
                    .add_document(&content_doc(&format!("x id{}_{}", i, j)))
                    .unwrap();
            }
            writer.commit().unwrap();
        }
        // a committed deletion in the middle segment, so the merge-time
        // clone already has deletions and the strict diff branch runs
        writer
            .delete_documents(Term::new("content", "id1_2"))
            .unwrap();
        writer.commit().unwrap();

        let segments: Vec<SegmentInfoRc> = {
            let guard = writer.inner.core.lock().unwrap();
            guard.segment_infos.segments().to_vec()
        };
        assert_eq!(segments.len(), 3);

        let merge = OneMerge::new(segments);
        {
            let mut guard = writer.inner.core.lock().unwrap();
            assert!(writer.register_merge(&mut guard, &merge).unwrap());
        }
        let running = writer.next_merge().unwrap().unwrap();
        assert!(Arc::ptr_eq(&running, &merge));
        writer.merge_init(&merge).unwrap();
        let info = merge.info().unwrap();

        // open the live readers and frozen clones the way merge_middle does
        let mut merger = SegmentMerger::new(
            Arc::clone(&writer.inner.dir),
            info.name(),
            writer.inner.term_index_interval,
            Some(Arc::clone(&merge)),
            None,
            FieldInfos::new(),
        );
        let mut readers: Vec<SegmentReaderRc> = Vec::new();
        let mut clones: Vec<SegmentReaderRc> = Vec::new();
        for si in &merge.segments {
            let reader = writer
                .inner
                .reader_pool
                .get_full(si, true, MERGE_BUFFER_SIZE, -1)
                .unwrap();
            let clone = reader.clone_reader(true).unwrap();
            merger.add(SegmentReaderRc::clone(&clone));
            readers.push(reader);
            clones.push(clone);
        }
        merge.set_readers(readers, clones);

        let merged_docs = merger.merge().unwrap();
        assert_eq!(merged_docs, 29);
        info.set_doc_count(merged_docs);
        info.set_has_prox(merger.field_infos().has_prox());
        info.set_has_vectors(merger.field_infos().has_vectors());

        // the racing delete: applied onto the live pooled reader only,
        // after the merger has already read from the clones
        writer
            .delete_documents(Term::new("content", "id1_5"))
            .unwrap();
        writer.do_flush(true).unwrap();
        {
            let (live, frozen) = merge.readers_snapshot();
            assert_eq!(frozen[1].num_deleted_docs(), 1);
            assert_eq!(live[1].num_deleted_docs(), 2);
        }

        let merged_reader = writer
            .inner
            .reader_pool
            .get_full(&info, false, BUFFER_SIZE, -1)
            .unwrap();
        assert!(writer.commit_merge(&merge, &merged_reader).unwrap());

        // segment 0 contributes docs 0..10; in segment 1 the merge
        // collapsed doc 2 away, so doc 5 lands at 10 + (5 - 1) = 14
        assert_eq!(merged_reader.num_deleted_docs(), 1);
        assert!(merged_reader.is_deleted(14));
        assert!(!merged_reader.is_deleted(13));
        assert!(!merged_reader.is_deleted(15));

        let released = writer
            .inner
            .reader_pool
            .release(&merged_reader, false)
            .unwrap();
        assert!(released);
        {
            let mut guard = writer.inner.core.lock().unwrap();
            let core = &mut *guard;
            writer.checkpoint(core).unwrap();
        }
        {
            let mut guard = writer.inner.core.lock().unwrap();
            writer.merge_finish(&mut guard, &merge);
        }
        writer.commit().unwrap();

        let reader = DirectoryReader::open(&dir).unwrap();
        assert_eq!(reader.segment_infos().len(), 1);
        assert_eq!(reader.max_doc(), 29);
        assert_eq!(reader.num_docs(), 28);
        assert_eq!(reader.doc_freq(&Term::new("content", "id1_2")).unwrap(), 0);
        assert_eq!(reader.doc_freq(&Term::new("content", "id1_5")).unwrap(), 0);
        assert!(reader.is_deleted(14));
        // neighbors of the transferred delete survived at their
        // remapped positions
        assert_eq!(
            reader.term_doc_ids(&Term::new("content", "id1_4")).unwrap(),
            vec![13]
        );
        assert_eq!(
            reader.term_doc_ids(&Term::new("content", "id1_6")).unwrap(),
            vec![15]
        );
        assert_eq!(reader.doc_freq(&Term::new("content", "x")).unwrap(), 28);
        drop(reader);
        writer.close().unwrap();
    }

    // The sibling path: a source with no deletions at merge start that
    // gains some before the commit takes the full-scan transfer branch.
    #[test]
    fn delete_on_clean_segment_mid_merge_is_transferred() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let config = IndexWriterConfig::builder()
            .open_mode(OpenMode::Create)
            .merge_policy(Arc::new(LogDocMergePolicy::new(100, false)))
            .build();
        let writer = IndexWriter::open(Arc::clone(&dir), config).unwrap();
        for i in 0..2 {
            for j in 0..5 {
                writer
                    .add_document(&content_doc(&format!("y id{}_{}", i, j)))
                    .unwrap();
            }
            writer.commit().unwrap();
        }

        let segments: Vec<SegmentInfoRc> = {
            let guard = writer.inner.core.lock().unwrap();
            guard.segment_infos.segments().to_vec()
        };
        let merge = OneMerge::new(segments);
        {
            let mut guard = writer.inner.core.lock().unwrap();
            assert!(writer.register_merge(&mut guard, &merge).unwrap());
        }
        writer.next_merge().unwrap().unwrap();
        writer.merge_init(&merge).unwrap();
        let info = merge.info().unwrap();

        let mut merger = SegmentMerger::new(
            Arc::clone(&writer.inner.dir),
            info.name(),
            writer.inner.term_index_interval,
            Some(Arc::clone(&merge)),
            None,
            FieldInfos::new(),
        );
        let mut readers: Vec<SegmentReaderRc> = Vec::new();
        let mut clones: Vec<SegmentReaderRc> = Vec::new();
        for si in &merge.segments {
            let reader = writer
                .inner
                .reader_pool
                .get_full(si, true, MERGE_BUFFER_SIZE, -1)
                .unwrap();
            let clone = reader.clone_reader(true).unwrap();
            merger.add(SegmentReaderRc::clone(&clone));
            readers.push(reader);
            clones.push(clone);
        }
        merge.set_readers(readers, clones);
        let merged_docs = merger.merge().unwrap();
        assert_eq!(merged_docs, 10);
        info.set_doc_count(merged_docs);
        info.set_has_prox(merger.field_infos().has_prox());
        info.set_has_vectors(merger.field_infos().has_vectors());

        writer
            .delete_documents(Term::new("content", "id1_3"))
            .unwrap();
        writer.do_flush(true).unwrap();

        let merged_reader = writer
            .inner
            .reader_pool
            .get_full(&info, false, BUFFER_SIZE, -1)
            .unwrap();
        assert!(writer.commit_merge(&merge, &merged_reader).unwrap());
        // no collapsed docs ahead of it: segment 1 doc 3 lands at 5 + 3
        assert_eq!(merged_reader.num_deleted_docs(), 1);
        assert!(merged_reader.is_deleted(8));

        writer
            .inner
            .reader_pool
            .release(&merged_reader, false)
            .unwrap();
        {
            let mut guard = writer.inner.core.lock().unwrap();
            let core = &mut *guard;
            writer.checkpoint(core).unwrap();
        }
        {
            let mut guard = writer.inner.core.lock().unwrap();
            writer.merge_finish(&mut guard, &merge);
        }
        writer.commit().unwrap();

        let reader = DirectoryReader::open(&dir).unwrap();
        assert_eq!(reader.num_docs(), 9);
        assert_eq!(reader.doc_freq(&Term::new("content", "id1_3")).unwrap(), 0);
        assert!(reader.is_deleted(8));
        drop(reader);
        writer.close().unwrap();
    }
}
