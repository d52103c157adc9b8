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

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI32, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use core::index::segment_infos;
use core::index::{
    file_name_from_generation, segment_file_name, CompoundFileReader, COMPOUND_FILE_EXTENSION,
    COMPOUND_FILE_STORE_EXTENSION, DELETES_EXTENSION, FIELDS_EXTENSION, FIELDS_INDEX_EXTENSION,
    NON_STORE_INDEX_EXTENSIONS, NORMS_EXTENSION, PLAIN_NORMS_EXTENSION, SEPARATE_NORMS_EXTENSION,
    VECTORS_DOCUMENTS_EXTENSION, VECTORS_FIELDS_EXTENSION, VECTORS_INDEX_EXTENSION,
};
use core::store::{DataInput, DataOutput, Directory, DirectoryRc};
use core::util::BitVector;
use error::Result;

/// No deletes, no separate norms.
pub const NO: i64 = -1;
/// Deletes or separate norms exist at this or a later generation.
pub const YES: i64 = 1;
/// Pre-lockless layout: the directory must be probed for the file.
pub const CHECK_DIR: i64 = 0;
/// A file name carrying no generation stamp.
pub const WITHOUT_GEN: i64 = 0;

/// Metadata for one immutable segment: name, size, deletion and norm
/// generations, layout flags, doc-store sharing, diagnostics. The derived
/// file set is cached and recomputed whenever a mutator runs.
///
/// Instances are shared (`SegmentInfoRc`) between the live segment graph,
/// open readers, buffered-delete keys and in-flight merges; the mutable
/// portion lives behind one short-section lock. Identity is directory plus
/// segment name.
pub struct SegmentInfo {
    name: String,
    doc_count: AtomicI32,
    dir: DirectoryRc,
    state: Mutex<State>,
}

pub type SegmentInfoRc = Arc<SegmentInfo>;

struct State {
    del_gen: i64,
    norm_gen: Option<Vec<i64>>,
    is_compound: i64,
    pre_lockless: bool,
    has_single_norm_file: bool,
    doc_store_offset: i32,
    doc_store_segment: String,
    doc_store_is_compound: bool,
    del_count: i32,
    has_prox: bool,
    has_vectors: bool,
    diagnostics: HashMap<String, String>,
    version: String,
    files: Option<HashSet<String>>,
    size_no_store: i64,
    size_with_store: i64,
}

impl SegmentInfo {
    pub fn new(
        name: &str,
        doc_count: i32,
        dir: DirectoryRc,
        is_compound_file: bool,
        has_single_norm_file: bool,
        has_prox: bool,
        has_vectors: bool,
    ) -> SegmentInfo {
        SegmentInfo {
            name: name.to_string(),
            doc_count: AtomicI32::new(doc_count),
            dir,
            state: Mutex::new(State {
                del_gen: NO,
                norm_gen: None,
                is_compound: if is_compound_file { YES } else { NO },
                pre_lockless: false,
                has_single_norm_file,
                doc_store_offset: -1,
                doc_store_segment: name.to_string(),
                doc_store_is_compound: false,
                del_count: 0,
                has_prox,
                has_vectors,
                diagnostics: HashMap::new(),
                version: segment_infos::ENGINE_MAIN_VERSION.to_string(),
                files: None,
                size_no_store: -1,
                size_with_store: -1,
            }),
        }
    }

    /// Reads one descriptor record from a segments stream written at the
    /// given format. Older formats omit trailing fields; each gets its
    /// documented default, and truly ancient records fall back to
    /// directory probing (`CHECK_DIR`).
    pub fn read<T: DataInput + ?Sized>(
        dir: DirectoryRc,
        format: i32,
        input: &mut T,
    ) -> Result<SegmentInfo> {
        let version = if format <= segment_infos::FORMAT_3_1 {
            input.read_string()?
        } else {
            String::new()
        };
        let name = input.read_string()?;
        let doc_count = input.read_int()?;

        let mut state = State {
            del_gen: CHECK_DIR,
            norm_gen: None,
            is_compound: CHECK_DIR,
            pre_lockless: true,
            has_single_norm_file: false,
            doc_store_offset: -1,
            doc_store_segment: name.clone(),
            doc_store_is_compound: false,
            del_count: -1,
            has_prox: true,
            has_vectors: false,
            diagnostics: HashMap::new(),
            version,
            files: None,
            size_no_store: -1,
            size_with_store: -1,
        };

        if format <= segment_infos::FORMAT_LOCKLESS {
            state.del_gen = input.read_long()?;
            if format <= segment_infos::FORMAT_SHARED_DOC_STORE {
                state.doc_store_offset = input.read_int()?;
                if state.doc_store_offset != -1 {
                    state.doc_store_segment = input.read_string()?;
                    state.doc_store_is_compound = input.read_byte()? == 1;
                }
            }
            if format <= segment_infos::FORMAT_SINGLE_NORM_FILE {
                state.has_single_norm_file = input.read_byte()? == 1;
            }
            let num_norm_gen = input.read_int()?;
            if i64::from(num_norm_gen) != NO {
                let mut norm_gen = Vec::with_capacity(num_norm_gen as usize);
                for _ in 0..num_norm_gen {
                    norm_gen.push(input.read_long()?);
                }
                state.norm_gen = Some(norm_gen);
            }
            state.is_compound = i64::from(input.read_byte()? as i8);
            state.pre_lockless = state.is_compound == CHECK_DIR;
            if format <= segment_infos::FORMAT_DEL_COUNT {
                state.del_count = input.read_int()?;
                debug_assert!(state.del_count <= doc_count);
            }
            if format <= segment_infos::FORMAT_HAS_PROX {
                state.has_prox = input.read_byte()? == 1;
            }
            if format <= segment_infos::FORMAT_DIAGNOSTICS {
                state.diagnostics = input.read_string_string_map()?;
            }
            if format <= segment_infos::FORMAT_HAS_VECTORS {
                state.has_vectors = input.read_byte()? == 1;
            } else {
                // pre-vectors-flag record: probe the store for a vectors
                // index file, through the compound reader if needed
                let (stores_segment, is_compound, ext) = if state.doc_store_offset != -1 {
                    (
                        state.doc_store_segment.clone(),
                        state.doc_store_is_compound,
                        COMPOUND_FILE_STORE_EXTENSION,
                    )
                } else {
                    (
                        name.clone(),
                        state.is_compound == YES,
                        COMPOUND_FILE_EXTENSION,
                    )
                };
                let vectors_file =
                    segment_file_name(&stores_segment, VECTORS_INDEX_EXTENSION);
                state.has_vectors = if is_compound {
                    let cfs = CompoundFileReader::open(
                        Arc::clone(&dir),
                        &segment_file_name(&stores_segment, ext),
                    )?;
                    cfs.file_exists(&vectors_file)
                } else {
                    dir.file_exists(&vectors_file)
                };
            }
        }

        Ok(SegmentInfo {
            name,
            doc_count: AtomicI32::new(doc_count),
            dir,
            state: Mutex::new(state),
        })
    }

    /// Appends this descriptor to a segments stream in the current format.
    pub fn write<T: DataOutput + ?Sized>(&self, output: &mut T) -> Result<()> {
        let state = self.state.lock()?;
        debug_assert!(state.del_count <= self.doc_count.load(AtomicOrdering::Acquire));
        output.write_string(&state.version)?;
        output.write_string(&self.name)?;
        output.write_int(self.doc_count.load(AtomicOrdering::Acquire))?;
        output.write_long(state.del_gen)?;
        output.write_int(state.doc_store_offset)?;
        if state.doc_store_offset != -1 {
            output.write_string(&state.doc_store_segment)?;
            output.write_byte(if state.doc_store_is_compound { 1 } else { 0 })?;
        }
        output.write_byte(if state.has_single_norm_file { 1 } else { 0 })?;
        match state.norm_gen {
            None => output.write_int(NO as i32)?,
            Some(ref norm_gen) => {
                output.write_int(norm_gen.len() as i32)?;
                for &gen in norm_gen {
                    output.write_long(gen)?;
                }
            }
        }
        output.write_byte(state.is_compound as u8)?;
        output.write_int(state.del_count)?;
        output.write_byte(if state.has_prox { 1 } else { 0 })?;
        output.write_string_string_map(&state.diagnostics)?;
        output.write_byte(if state.has_vectors { 1 } else { 0 })
    }

    /// Restores the mutable fields from a snapshot taken with
    /// `clone_info`; the name, doc count and directory must match.
    pub fn reset_from(&self, src: &SegmentInfo) {
        debug_assert_eq!(self.name, src.name);
        let src_state = src.state.lock().expect("segment info lock poisoned");
        let mut state = self.state.lock().expect("segment info lock poisoned");
        state.del_gen = src_state.del_gen;
        state.norm_gen = src_state.norm_gen.clone();
        state.is_compound = src_state.is_compound;
        state.pre_lockless = src_state.pre_lockless;
        state.has_single_norm_file = src_state.has_single_norm_file;
        state.doc_store_offset = src_state.doc_store_offset;
        state.doc_store_segment = src_state.doc_store_segment.clone();
        state.doc_store_is_compound = src_state.doc_store_is_compound;
        state.del_count = src_state.del_count;
        state.files = None;
        state.size_no_store = -1;
        state.size_with_store = -1;
    }

    /// A deep copy sharing nothing mutable with the original.
    pub fn clone_info(&self) -> SegmentInfo {
        let state = self.state.lock().expect("segment info lock poisoned");
        SegmentInfo {
            name: self.name.clone(),
            doc_count: AtomicI32::new(self.doc_count.load(AtomicOrdering::Acquire)),
            dir: Arc::clone(&self.dir),
            state: Mutex::new(State {
                del_gen: state.del_gen,
                norm_gen: state.norm_gen.clone(),
                is_compound: state.is_compound,
                pre_lockless: state.pre_lockless,
                has_single_norm_file: state.has_single_norm_file,
                doc_store_offset: state.doc_store_offset,
                doc_store_segment: state.doc_store_segment.clone(),
                doc_store_is_compound: state.doc_store_is_compound,
                del_count: state.del_count,
                has_prox: state.has_prox,
                has_vectors: state.has_vectors,
                diagnostics: state.diagnostics.clone(),
                version: state.version.clone(),
                files: None,
                size_no_store: -1,
                size_with_store: -1,
            }),
        }
    }

    /// A copy enrolled under another directory and name; used when whole
    /// segments are copied between indexes. The doc-store segment name is
    /// rewritten when sharing is preserved across the copy.
    pub fn clone_renamed(
        &self,
        dir: DirectoryRc,
        name: &str,
        doc_store_segment: Option<&str>,
    ) -> SegmentInfo {
        let copy = self.clone_info();
        let state = copy.state.into_inner().expect("fresh clone lock");
        SegmentInfo {
            name: name.to_string(),
            doc_count: AtomicI32::new(self.doc_count()),
            dir,
            state: Mutex::new(State {
                doc_store_segment: match doc_store_segment {
                    Some(ds) => ds.to_string(),
                    None => name.to_string(),
                },
                ..state
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc_count(&self) -> i32 {
        self.doc_count.load(AtomicOrdering::Acquire)
    }

    pub fn set_doc_count(&self, doc_count: i32) {
        self.doc_count.store(doc_count, AtomicOrdering::Release);
        self.clear_files_cache();
    }

    pub fn directory(&self) -> &DirectoryRc {
        &self.dir
    }

    pub fn same_dir(&self, dir: &DirectoryRc) -> bool {
        Arc::ptr_eq(&self.dir, dir)
    }

    pub fn has_deletions(&self) -> Result<bool> {
        let state = self.state.lock()?;
        if state.del_gen == NO {
            Ok(false)
        } else if state.del_gen >= YES {
            Ok(true)
        } else {
            Ok(self.dir.file_exists(&Self::del_file_name_for(&self.name, state.del_gen)))
        }
    }

    pub fn advance_del_gen(&self) {
        let mut state = self.state.lock().expect("segment info lock poisoned");
        // generation 0 is reserved for the pre-lockless layout
        if state.del_gen == NO {
            state.del_gen = YES;
        } else {
            state.del_gen += 1;
        }
        state.files = None;
        state.size_no_store = -1;
        state.size_with_store = -1;
    }

    pub fn clear_del_gen(&self) {
        let mut state = self.state.lock().expect("segment info lock poisoned");
        state.del_gen = NO;
        state.files = None;
        state.size_no_store = -1;
        state.size_with_store = -1;
    }

    pub fn del_gen(&self) -> i64 {
        let state = self.state.lock().expect("segment info lock poisoned");
        state.del_gen
    }

    fn del_file_name_for(name: &str, del_gen: i64) -> String {
        file_name_from_generation(name, DELETES_EXTENSION, del_gen)
    }

    /// Empty when no deletion file exists for this segment.
    pub fn del_file_name(&self) -> String {
        let state = self.state.lock().expect("segment info lock poisoned");
        Self::del_file_name_for(&self.name, state.del_gen)
    }

    pub fn del_count(&self) -> Result<i32> {
        let cached = {
            let state = self.state.lock()?;
            state.del_count
        };
        if cached != -1 {
            return Ok(cached);
        }
        let del_count = if self.has_deletions()? {
            BitVector::read(self.dir.as_ref(), &self.del_file_name())?.count() as i32
        } else {
            0
        };
        debug_assert!(del_count <= self.doc_count());
        let mut state = self.state.lock()?;
        state.del_count = del_count;
        Ok(del_count)
    }

    pub fn set_del_count(&self, del_count: i32) {
        debug_assert!(del_count <= self.doc_count());
        let mut state = self.state.lock().expect("segment info lock poisoned");
        state.del_count = del_count;
    }

    /// Ensures the norm generation table covers `num_fields` entries.
    pub fn set_num_fields(&self, num_fields: usize) {
        let mut state = self.state.lock().expect("segment info lock poisoned");
        if state.norm_gen.is_none() {
            let fill = if state.pre_lockless { CHECK_DIR } else { NO };
            state.norm_gen = Some(vec![fill; num_fields]);
        }
    }

    pub fn has_separate_norms_for(&self, field_number: i32) -> bool {
        let state = self.state.lock().expect("segment info lock poisoned");
        self.has_separate_norms_locked(&state, field_number)
    }

    fn has_separate_norms_locked(&self, state: &State, field_number: i32) -> bool {
        match state.norm_gen {
            None => {
                state.pre_lockless
                    && self.dir.file_exists(&format!(
                        "{}.{}{}",
                        self.name, SEPARATE_NORMS_EXTENSION, field_number
                    ))
            }
            Some(ref norm_gen) => match norm_gen.get(field_number as usize) {
                Some(&gen) if gen == CHECK_DIR => self.dir.file_exists(&format!(
                    "{}.{}{}",
                    self.name, SEPARATE_NORMS_EXTENSION, field_number
                )),
                Some(&gen) => gen != NO,
                None => false,
            },
        }
    }

    pub fn has_separate_norms(&self) -> Result<bool> {
        let state = self.state.lock()?;
        match state.norm_gen {
            None => {
                if !state.pre_lockless {
                    Ok(false)
                } else {
                    // pre-lockless record: the directory listing decides
                    let prefix = format!("{}.{}", self.name, SEPARATE_NORMS_EXTENSION);
                    let files = self.dir.list_all()?;
                    Ok(files.iter().any(|f| {
                        f.starts_with(&prefix)
                            && f[prefix.len()..].chars().all(|c| c.is_ascii_digit())
                            && f.len() > prefix.len()
                    }))
                }
            }
            Some(ref norm_gen) => {
                if norm_gen.iter().any(|&gen| gen >= YES) {
                    return Ok(true);
                }
                Ok((0..norm_gen.len() as i32).any(|i| {
                    norm_gen[i as usize] == CHECK_DIR && self.has_separate_norms_locked(&state, i)
                }))
            }
        }
    }

    pub fn advance_norm_gen(&self, field_number: i32) {
        let mut state = self.state.lock().expect("segment info lock poisoned");
        {
            let norm_gen = state
                .norm_gen
                .as_mut()
                .expect("set_num_fields must run before advancing a norm generation");
            let slot = &mut norm_gen[field_number as usize];
            if *slot == NO {
                *slot = YES;
            } else {
                *slot += 1;
            }
        }
        state.files = None;
        state.size_no_store = -1;
        state.size_with_store = -1;
    }

    pub fn norm_gen(&self, field_number: i32) -> i64 {
        let state = self.state.lock().expect("segment info lock poisoned");
        match state.norm_gen {
            Some(ref norm_gen) => norm_gen
                .get(field_number as usize)
                .cloned()
                .unwrap_or(CHECK_DIR),
            None => CHECK_DIR,
        }
    }

    /// The current norms file for a field: a generation-stamped separate
    /// file once `set_norm` ran, the shared `.nrm` when the segment was
    /// written with one, or the per-field plain file otherwise.
    pub fn norm_file_name(&self, field_number: i32) -> String {
        let state = self.state.lock().expect("segment info lock poisoned");
        let gen = match state.norm_gen {
            None => CHECK_DIR,
            Some(ref norm_gen) => norm_gen
                .get(field_number as usize)
                .cloned()
                .unwrap_or(CHECK_DIR),
        };
        if self.has_separate_norms_locked(&state, field_number) {
            file_name_from_generation(
                &self.name,
                &format!("{}{}", SEPARATE_NORMS_EXTENSION, field_number),
                gen,
            )
        } else if state.has_single_norm_file {
            file_name_from_generation(&self.name, NORMS_EXTENSION, WITHOUT_GEN)
        } else {
            file_name_from_generation(
                &self.name,
                &format!("{}{}", PLAIN_NORMS_EXTENSION, field_number),
                WITHOUT_GEN,
            )
        }
    }

    pub fn has_single_norm_file(&self) -> bool {
        let state = self.state.lock().expect("segment info lock poisoned");
        state.has_single_norm_file
    }

    pub fn set_use_compound_file(&self, is_compound: bool) {
        let mut state = self.state.lock().expect("segment info lock poisoned");
        state.is_compound = if is_compound { YES } else { NO };
        state.files = None;
        state.size_no_store = -1;
        state.size_with_store = -1;
    }

    pub fn use_compound_file(&self) -> bool {
        let state = self.state.lock().expect("segment info lock poisoned");
        if state.is_compound == NO {
            false
        } else if state.is_compound == YES {
            true
        } else {
            self.dir
                .file_exists(&segment_file_name(&self.name, COMPOUND_FILE_EXTENSION))
        }
    }

    pub fn doc_store_offset(&self) -> i32 {
        let state = self.state.lock().expect("segment info lock poisoned");
        state.doc_store_offset
    }

    pub fn doc_store_segment(&self) -> String {
        let state = self.state.lock().expect("segment info lock poisoned");
        state.doc_store_segment.clone()
    }

    pub fn doc_store_is_compound(&self) -> bool {
        let state = self.state.lock().expect("segment info lock poisoned");
        state.doc_store_is_compound
    }

    pub fn set_doc_store_is_compound(&self, v: bool) {
        let mut state = self.state.lock().expect("segment info lock poisoned");
        state.doc_store_is_compound = v;
        state.files = None;
    }

    pub fn set_doc_store(&self, offset: i32, segment: &str, is_compound: bool) {
        let mut state = self.state.lock().expect("segment info lock poisoned");
        state.doc_store_offset = offset;
        state.doc_store_segment = segment.to_string();
        state.doc_store_is_compound = is_compound;
        state.files = None;
    }

    pub fn has_prox(&self) -> bool {
        let state = self.state.lock().expect("segment info lock poisoned");
        state.has_prox
    }

    pub fn set_has_prox(&self, has_prox: bool) {
        let mut state = self.state.lock().expect("segment info lock poisoned");
        state.has_prox = has_prox;
        state.files = None;
    }

    pub fn has_vectors(&self) -> bool {
        let state = self.state.lock().expect("segment info lock poisoned");
        state.has_vectors
    }

    pub fn set_has_vectors(&self, has_vectors: bool) {
        let mut state = self.state.lock().expect("segment info lock poisoned");
        state.has_vectors = has_vectors;
        state.files = None;
    }

    pub fn diagnostics(&self) -> HashMap<String, String> {
        let state = self.state.lock().expect("segment info lock poisoned");
        state.diagnostics.clone()
    }

    pub fn set_diagnostics(&self, diagnostics: HashMap<String, String>) {
        let mut state = self.state.lock().expect("segment info lock poisoned");
        state.diagnostics = diagnostics;
    }

    pub fn version(&self) -> String {
        let state = self.state.lock().expect("segment info lock poisoned");
        state.version.clone()
    }

    fn add_if_exists(&self, files: &mut HashSet<String>, name: String) {
        if self.dir.file_exists(&name) {
            files.insert(name);
        }
    }

    /// The full set of directory files attributable to this segment, derived
    /// from the flags and generations; cached until a mutator runs.
    pub fn files(&self) -> Result<HashSet<String>> {
        let use_compound = self.use_compound_file();
        let mut state = self.state.lock()?;
        if let Some(ref files) = state.files {
            return Ok(files.clone());
        }

        let mut files = HashSet::new();
        if use_compound {
            files.insert(segment_file_name(&self.name, COMPOUND_FILE_EXTENSION));
        } else {
            for ext in NON_STORE_INDEX_EXTENSIONS.iter() {
                self.add_if_exists(&mut files, segment_file_name(&self.name, ext));
            }
        }

        if state.doc_store_offset != -1 {
            // sharing stored fields and vectors with other segments
            debug_assert!(!state.doc_store_segment.is_empty());
            if state.doc_store_is_compound {
                files.insert(segment_file_name(
                    &state.doc_store_segment,
                    COMPOUND_FILE_STORE_EXTENSION,
                ));
            } else {
                files.insert(segment_file_name(
                    &state.doc_store_segment,
                    FIELDS_INDEX_EXTENSION,
                ));
                files.insert(segment_file_name(&state.doc_store_segment, FIELDS_EXTENSION));
                if state.has_vectors {
                    files.insert(segment_file_name(
                        &state.doc_store_segment,
                        VECTORS_INDEX_EXTENSION,
                    ));
                    files.insert(segment_file_name(
                        &state.doc_store_segment,
                        VECTORS_DOCUMENTS_EXTENSION,
                    ));
                    files.insert(segment_file_name(
                        &state.doc_store_segment,
                        VECTORS_FIELDS_EXTENSION,
                    ));
                }
            }
        } else if !use_compound {
            files.insert(segment_file_name(&self.name, FIELDS_INDEX_EXTENSION));
            files.insert(segment_file_name(&self.name, FIELDS_EXTENSION));
            if state.has_vectors {
                files.insert(segment_file_name(&self.name, VECTORS_INDEX_EXTENSION));
                files.insert(segment_file_name(&self.name, VECTORS_DOCUMENTS_EXTENSION));
                files.insert(segment_file_name(&self.name, VECTORS_FIELDS_EXTENSION));
            }
        }

        let del_file_name =
            file_name_from_generation(&self.name, DELETES_EXTENSION, state.del_gen);
        if !del_file_name.is_empty()
            && (state.del_gen >= YES || self.dir.file_exists(&del_file_name))
        {
            files.insert(del_file_name);
        }

        // careful logic for the norms files
        if let Some(ref norm_gen) = state.norm_gen {
            for (i, &gen) in norm_gen.iter().enumerate() {
                if gen >= YES {
                    // a separate norms file, stamped with its generation
                    files.insert(file_name_from_generation(
                        &self.name,
                        &format!("{}{}", SEPARATE_NORMS_EXTENSION, i),
                        gen,
                    ));
                } else if gen == NO {
                    if !state.has_single_norm_file && !use_compound {
                        let name = segment_file_name(
                            &self.name,
                            &format!("{}{}", PLAIN_NORMS_EXTENSION, i),
                        );
                        self.add_if_exists(&mut files, name);
                    }
                } else if gen == CHECK_DIR {
                    // pre-lockless record: existence decides
                    let name = if use_compound {
                        segment_file_name(&self.name, &format!("{}{}", SEPARATE_NORMS_EXTENSION, i))
                    } else if !state.has_single_norm_file {
                        segment_file_name(&self.name, &format!("{}{}", PLAIN_NORMS_EXTENSION, i))
                    } else {
                        String::new()
                    };
                    if !name.is_empty() {
                        self.add_if_exists(&mut files, name);
                    }
                }
            }
        } else if state.pre_lockless || (!state.has_single_norm_file && !use_compound) {
            // no norm generation table: scan for the per-field families
            let prefix = if use_compound {
                format!("{}.{}", self.name, SEPARATE_NORMS_EXTENSION)
            } else {
                format!("{}.{}", self.name, PLAIN_NORMS_EXTENSION)
            };
            for file in self.dir.list_all()? {
                if file.len() > prefix.len()
                    && file.starts_with(&prefix)
                    && file.as_bytes()[prefix.len()].is_ascii_digit()
                {
                    files.insert(file);
                }
            }
        }

        state.files = Some(files.clone());
        Ok(files)
    }

    pub fn clear_files_cache(&self) {
        let mut state = self.state.lock().expect("segment info lock poisoned");
        state.files = None;
        state.size_no_store = -1;
        state.size_with_store = -1;
    }

    /// Total bytes of the segment's files, optionally skipping files held
    /// in a shared doc store (those bytes belong to another segment).
    pub fn size_in_bytes(&self, include_doc_stores: bool) -> Result<i64> {
        {
            let state = self.state.lock()?;
            let cached = if include_doc_stores {
                state.size_with_store
            } else {
                state.size_no_store
            };
            if cached != -1 {
                return Ok(cached);
            }
        }
        let files = self.files()?;
        let doc_store_offset = self.doc_store_offset();
        let mut sum = 0i64;
        for file in &files {
            if include_doc_stores {
                if doc_store_offset != -1 && super::is_doc_store_file(file) {
                    continue;
                }
            } else if super::is_doc_store_file(file) {
                continue;
            }
            sum += self.dir.file_length(file)? as i64;
        }
        let mut state = self.state.lock()?;
        if include_doc_stores {
            state.size_with_store = sum;
        } else {
            state.size_no_store = sum;
        }
        Ok(sum)
    }

    /// Compact human form:
    /// `<name>(<version>):<cfs><external><vectors><doc-count>[/<dels>][-><docstore>]`.
    pub fn to_string_with(&self, dir: &DirectoryRc, pending_del_count: i32) -> String {
        let mut buffer = String::new();
        let version = self.version();
        buffer.push_str(&self.name);
        buffer.push('(');
        buffer.push_str(if version.is_empty() { "?" } else { &version });
        buffer.push_str("):");
        buffer.push(if self.use_compound_file() { 'c' } else { 'C' });
        if !self.same_dir(dir) {
            buffer.push('x');
        }
        if self.has_vectors() {
            buffer.push('v');
        }
        buffer.push_str(&self.doc_count().to_string());
        let del_count = self.del_count().unwrap_or(-1);
        let del_count = if del_count == -1 {
            del_count
        } else {
            del_count + pending_del_count
        };
        if del_count != 0 {
            buffer.push('/');
            if del_count == -1 {
                buffer.push('?');
            } else {
                buffer.push_str(&del_count.to_string());
            }
        }
        if self.doc_store_offset() != -1 {
            buffer.push_str("->");
            buffer.push_str(&self.doc_store_segment());
            buffer.push(if self.doc_store_is_compound() { 'c' } else { 'C' });
            buffer.push('+');
            buffer.push_str(&self.doc_store_offset().to_string());
        }
        buffer
    }
}

impl fmt::Display for SegmentInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_string_with(&self.dir, 0))
    }
}

impl fmt::Debug for SegmentInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SegmentInfo({})", self.name)
    }
}

impl PartialEq for SegmentInfo {
    fn eq(&self, other: &SegmentInfo) -> bool {
        Arc::ptr_eq(&self.dir, &other.dir) && self.name == other.name
    }
}

impl Eq for SegmentInfo {}

impl Hash for SegmentInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Serialize for SegmentInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("SegmentInfo", 6)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("doc_count", &self.doc_count())?;
        s.serialize_field("del_gen", &self.del_gen())?;
        s.serialize_field("compound", &self.use_compound_file())?;
        s.serialize_field("has_vectors", &self.has_vectors())?;
        s.serialize_field("diagnostics", &self.diagnostics())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::store::{IndexOutput, RAMDirectory};

    fn ram_dir() -> DirectoryRc {
        Arc::new(RAMDirectory::new())
    }

    #[test]
    fn fresh_segment_defaults() {
        let dir = ram_dir();
        let si = SegmentInfo::new("_0", 7, Arc::clone(&dir), false, true, true, false);
        assert_eq!(si.del_gen(), NO);
        assert!(!si.has_deletions().unwrap());
        assert_eq!(si.del_file_name(), "");
        assert_eq!(si.del_count().unwrap(), 0);
        assert!(!si.use_compound_file());
    }

    #[test]
    fn del_gen_advances_and_names_files() {
        let dir = ram_dir();
        let si = SegmentInfo::new("_2", 10, dir, false, true, true, false);
        si.advance_del_gen();
        assert_eq!(si.del_gen(), 1);
        assert_eq!(si.del_file_name(), "_2_1.del");
        si.advance_del_gen();
        assert_eq!(si.del_file_name(), "_2_2.del");
        si.clear_del_gen();
        assert_eq!(si.del_file_name(), "");
    }

    #[test]
    fn norm_gen_three_valued_naming() {
        let dir = ram_dir();
        let si = SegmentInfo::new("_1", 5, dir, false, true, true, false);
        si.set_num_fields(2);
        // no separate norms yet: the shared file
        assert_eq!(si.norm_file_name(0), "_1.nrm");
        si.advance_norm_gen(0);
        assert_eq!(si.norm_file_name(0), "_1_1.s0");
        si.advance_norm_gen(0);
        assert_eq!(si.norm_file_name(0), "_1_2.s0");
        assert_eq!(si.norm_file_name(1), "_1.nrm");
        assert!(si.has_separate_norms().unwrap());
    }

    #[test]
    fn files_derivation_tracks_mutators() {
        let dir = ram_dir();
        for name in &["_0.tis", "_0.tii", "_0.frq", "_0.prx", "_0.fnm", "_0.nrm"] {
            let mut out = dir.create_output(name).unwrap();
            out.write_byte(0).unwrap();
            out.close().unwrap();
        }
        let si = SegmentInfo::new("_0", 3, Arc::clone(&dir), false, true, true, false);
        let files = si.files().unwrap();
        assert!(files.contains("_0.tis"));
        assert!(files.contains("_0.fdx"));
        assert!(files.contains("_0.fdt"));
        assert!(!files.contains("_0.tvx"));
        assert!(!files.contains("_0.del"));

        si.advance_del_gen();
        let files = si.files().unwrap();
        assert!(files.contains("_0_1.del"));

        si.set_use_compound_file(true);
        let files = si.files().unwrap();
        assert!(files.contains("_0.cfs"));
        assert!(!files.contains("_0.tis"));
    }

    #[test]
    fn write_read_write_is_stable() {
        use core::index::segment_infos::FORMAT_CURRENT;
        use core::store::{IndexOutput, BUFFER_SIZE};

        let dir = ram_dir();
        let si = SegmentInfo::new("_5", 42, Arc::clone(&dir), true, true, false, true);
        si.advance_del_gen();
        si.set_num_fields(3);
        si.advance_norm_gen(1);
        si.set_del_count(7);
        let mut diag = HashMap::new();
        diag.insert("source".to_string(), "flush".to_string());
        si.set_diagnostics(diag);

        {
            let mut out = dir.create_output("si_a").unwrap();
            si.write(out.as_mut()).unwrap();
            out.close().unwrap();
        }
        let mut input = dir.open_input("si_a", BUFFER_SIZE).unwrap();
        let read = SegmentInfo::read(Arc::clone(&dir), FORMAT_CURRENT, input.as_mut()).unwrap();
        assert_eq!(read.name(), "_5");
        assert_eq!(read.doc_count(), 42);
        assert_eq!(read.del_gen(), 1);
        assert_eq!(read.del_count().unwrap(), 7);
        assert!(read.use_compound_file());
        assert!(read.has_vectors());
        assert!(!read.has_prox());
        assert_eq!(read.norm_gen(1), 1);
        assert_eq!(read.diagnostics()["source"], "flush");

        {
            let mut out = dir.create_output("si_b").unwrap();
            read.write(out.as_mut()).unwrap();
            out.close().unwrap();
        }
        let a = dir.open_input("si_a", BUFFER_SIZE).unwrap();
        let b = dir.open_input("si_b", BUFFER_SIZE).unwrap();
        assert_eq!(a.len(), b.len());
        let mut a = a;
        let mut b = b;
        for _ in 0..a.len() {
            assert_eq!(a.read_byte().unwrap(), b.read_byte().unwrap());
        }
    }

    #[test]
    fn equality_is_dir_and_name() {
        let dir = ram_dir();
        let a = SegmentInfo::new("_0", 1, Arc::clone(&dir), false, true, true, false);
        let b = SegmentInfo::new("_0", 99, Arc::clone(&dir), true, false, false, true);
        let c = SegmentInfo::new("_1", 1, Arc::clone(&dir), false, true, true, false);
        let other_dir = ram_dir();
        let d = SegmentInfo::new("_0", 1, other_dir, false, true, true, false);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}
