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
use std::sync::Arc;

use core::index::{
    file_name_from_generation, SegmentInfo, SegmentInfoRc, INDEX_FILE_PENDING_SEGMENTS,
    INDEX_FILE_SEGMENTS, INDEX_FILE_SEGMENTS_GEN,
};
use core::store::{
    ChecksumIndexInput, ChecksumIndexOutput, DataInput, DataOutput, Directory, DirectoryRc,
    IndexOutput, BUFFER_SIZE,
};
use core::util::from_base36;
use error::{Error, ErrorKind, Result};

/// Version string stamped into fresh segment descriptors.
pub const ENGINE_MAIN_VERSION: &str = "0.1";

// Segments-file format markers. Monotonically decreasing: smaller is
// newer. Writers always emit the current marker; readers accept the whole
// range back to the original layout.
pub const FORMAT: i32 = -1;
pub const FORMAT_LOCKLESS: i32 = -2;
pub const FORMAT_SINGLE_NORM_FILE: i32 = -3;
pub const FORMAT_SHARED_DOC_STORE: i32 = -4;
pub const FORMAT_CHECKSUM: i32 = -5;
pub const FORMAT_DEL_COUNT: i32 = -6;
pub const FORMAT_HAS_PROX: i32 = -7;
pub const FORMAT_USER_DATA: i32 = -8;
pub const FORMAT_DIAGNOSTICS: i32 = -9;
pub const FORMAT_HAS_VECTORS: i32 = -10;
pub const FORMAT_3_1: i32 = -11;
pub const FORMAT_CURRENT: i32 = FORMAT_3_1;
pub const FORMAT_MINIMUM: i32 = FORMAT;

const FORMAT_SEGMENTS_GEN_FILE: i32 = -2;

/// The segment graph: an ordered list of segment descriptors plus the
/// name counter and commit generation. The graph is the unit of commit;
/// each commit writes the whole list into a new `segments_N` file, staged
/// as `pending_segments_N` until `finish_commit` renames it into
/// visibility.
pub struct SegmentInfos {
    segments: Vec<SegmentInfoRc>,
    /// Source of fresh segment names (`_<counter-in-radix-36>`).
    pub counter: i32,
    /// Bumped on every committed change; readers use it for staleness.
    pub version: i64,
    generation: i64,
    last_generation: i64,
    user_data: HashMap<String, String>,
    pending_segn_file: Option<String>,
}

impl Default for SegmentInfos {
    fn default() -> Self {
        SegmentInfos {
            segments: Vec::new(),
            counter: 0,
            version: 0,
            generation: 0,
            last_generation: 0,
            user_data: HashMap::new(),
            pending_segn_file: None,
        }
    }
}

impl SegmentInfos {
    pub fn new() -> SegmentInfos {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn info(&self, index: usize) -> &SegmentInfoRc {
        &self.segments[index]
    }

    pub fn segments(&self) -> &[SegmentInfoRc] {
        &self.segments
    }

    pub fn push(&mut self, info: SegmentInfoRc) {
        self.segments.push(info);
    }

    pub fn insert(&mut self, index: usize, info: SegmentInfoRc) {
        self.segments.insert(index, info);
    }

    pub fn remove_range(&mut self, start: usize, end: usize) {
        self.segments.drain(start..end);
    }

    pub fn clear_segments(&mut self) {
        self.segments.clear();
    }

    pub fn replace_segments(&mut self, other: &SegmentInfos) {
        self.segments = other.segments.clone();
        self.last_generation = other.last_generation;
        self.user_data = other.user_data.clone();
    }

    pub fn index_of(&self, info: &SegmentInfoRc) -> Option<usize> {
        self.segments.iter().position(|si| Arc::ptr_eq(si, info))
    }

    pub fn contains(&self, info: &SegmentInfoRc) -> bool {
        self.index_of(info).is_some()
    }

    pub fn by_name(&self, name: &str) -> Option<&SegmentInfoRc> {
        self.segments.iter().find(|si| si.name() == name)
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn last_generation(&self) -> i64 {
        self.last_generation
    }

    pub fn user_data(&self) -> &HashMap<String, String> {
        &self.user_data
    }

    pub fn set_user_data(&mut self, data: HashMap<String, String>) {
        self.user_data = data;
    }

    pub fn changed(&mut self) {
        self.version += 1;
    }

    /// Total docs across the graph.
    pub fn total_doc_count(&self) -> i32 {
        self.segments.iter().map(|si| si.doc_count()).sum()
    }

    /// A deep copy: every descriptor is cloned so the snapshot is immune
    /// to later mutators on the live graph.
    pub fn clone_infos(&self) -> SegmentInfos {
        SegmentInfos {
            segments: self
                .segments
                .iter()
                .map(|si| Arc::new(si.clone_info()))
                .collect(),
            counter: self.counter,
            version: self.version,
            generation: self.generation,
            last_generation: self.last_generation,
            user_data: self.user_data.clone(),
            pending_segn_file: None,
        }
    }

    /// Drops segments whose documents are all deleted.
    pub fn prune_deleted_segments(&mut self) -> Result<()> {
        let mut kept = Vec::with_capacity(self.segments.len());
        for si in self.segments.drain(..) {
            if si.del_count()? < si.doc_count() {
                kept.push(si);
            }
        }
        self.segments = kept;
        Ok(())
    }

    /// Every file referenced by this graph inside `dir`, optionally
    /// including the segments file of the last commit.
    pub fn files(&self, dir: &DirectoryRc, include_segments_file: bool) -> Result<Vec<String>> {
        let mut files: HashSet<String> = HashSet::new();
        if include_segments_file {
            let name = self.current_segments_file_name();
            if !name.is_empty() {
                files.insert(name);
            }
        }
        for si in &self.segments {
            if si.same_dir(dir) {
                files.extend(si.files()?);
            }
        }
        let mut files: Vec<String> = files.into_iter().collect();
        files.sort();
        Ok(files)
    }

    pub fn current_segments_file_name(&self) -> String {
        file_name_from_generation(INDEX_FILE_SEGMENTS, "", self.last_generation)
    }

    fn next_pending_file_name(&self) -> String {
        file_name_from_generation(INDEX_FILE_PENDING_SEGMENTS, "", self.generation + 1)
    }

    /// Latest commit generation visible in a directory listing, 0 when the
    /// directory holds no commit.
    pub fn current_generation(files: &[String]) -> Result<i64> {
        let mut max_gen = 0i64;
        for file in files {
            if file.starts_with(INDEX_FILE_SEGMENTS) && file != INDEX_FILE_SEGMENTS_GEN {
                let gen = generation_from_segments_file_name(file)?;
                if gen > max_gen {
                    max_gen = gen;
                }
            }
        }
        Ok(max_gen)
    }

    pub fn current_segments_file_name_in(dir: &DirectoryRc) -> Result<String> {
        let gen = Self::current_generation(&dir.list_all()?)?;
        if gen == 0 {
            bail!(ErrorKind::CorruptIndex(format!(
                "no segments file found in {}",
                dir
            )));
        }
        Ok(file_name_from_generation(INDEX_FILE_SEGMENTS, "", gen))
    }

    /// Reads the newest readable commit. Candidate generations are tried
    /// from the highest downward so a torn or partially visible commit
    /// falls back to the previous one.
    pub fn read_current(dir: &DirectoryRc) -> Result<SegmentInfos> {
        let listing = dir.list_all()?;
        let mut max_gen = Self::current_generation(&listing)?;
        // segments.gen is advisory: trust it only upward
        if let Ok(gen) = read_segments_gen(dir) {
            if gen > max_gen && dir
                .file_exists(&file_name_from_generation(INDEX_FILE_SEGMENTS, "", gen))
            {
                max_gen = gen;
            }
        }
        if max_gen == 0 {
            bail!(ErrorKind::CorruptIndex(format!(
                "no segments file found in {}: files={:?}",
                dir, listing
            )));
        }

        let mut last_err: Option<Error> = None;
        let mut gen = max_gen;
        while gen > 0 {
            let name = file_name_from_generation(INDEX_FILE_SEGMENTS, "", gen);
            if dir.file_exists(&name) {
                match Self::read(dir, &name) {
                    Ok(infos) => {
                        if let Some(e) = last_err {
                            warn!(
                                target: "IW",
                                "fell back to {} after failing a newer commit: {}",
                                name, e
                            );
                        }
                        return Ok(infos);
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            gen -= 1;
        }
        Err(last_err.unwrap_or_else(|| {
            Error::from(ErrorKind::CorruptIndex(format!(
                "no readable segments file in {}",
                dir
            )))
        }))
    }

    /// Reads one specific segments file.
    pub fn read(dir: &DirectoryRc, segment_file_name: &str) -> Result<SegmentInfos> {
        let generation = generation_from_segments_file_name(segment_file_name)?;
        let input = dir.open_input(segment_file_name, BUFFER_SIZE)?;
        let mut input = ChecksumIndexInput::new(input);

        let format = input.read_int()?;
        if format < FORMAT_CURRENT {
            bail!(ErrorKind::CorruptIndex(format!(
                "unknown (newer?) segments format: {}",
                format
            )));
        }
        if format > FORMAT_MINIMUM {
            bail!(ErrorKind::CorruptIndex(format!(
                "unrecognized segments format: {}",
                format
            )));
        }

        let version = input.read_long()?;
        let counter = input.read_int()?;
        let size = input.read_int()?;
        if size < 0 {
            bail!(ErrorKind::CorruptIndex(format!(
                "invalid segment count: {}",
                size
            )));
        }
        let mut segments = Vec::with_capacity(size as usize);
        for _ in 0..size {
            segments.push(Arc::new(SegmentInfo::read(
                Arc::clone(dir),
                format,
                &mut input,
            )?));
        }

        let user_data = if format <= FORMAT_USER_DATA {
            if format <= FORMAT_DIAGNOSTICS {
                input.read_string_string_map()?
            } else if input.read_byte()? != 0 {
                let mut map = HashMap::new();
                map.insert("userData".to_string(), input.read_string()?);
                map
            } else {
                HashMap::new()
            }
        } else {
            HashMap::new()
        };

        if format <= FORMAT_CHECKSUM {
            let computed = input.checksum();
            let stored = input.read_long()?;
            if stored != computed {
                bail!(ErrorKind::CorruptIndex(format!(
                    "checksum mismatch in segments file {}: stored=0x{:X} computed=0x{:X}",
                    segment_file_name, stored, computed
                )));
            }
        }

        Ok(SegmentInfos {
            segments,
            counter,
            version,
            generation,
            last_generation: generation,
            user_data,
            pending_segn_file: None,
        })
    }

    fn write_contents<T: DataOutput + ?Sized>(&self, out: &mut T) -> Result<()> {
        out.write_int(FORMAT_CURRENT)?;
        out.write_long(self.version)?;
        out.write_int(self.counter)?;
        out.write_int(self.segments.len() as i32)?;
        for si in &self.segments {
            si.write(out)?;
        }
        out.write_string_string_map(&self.user_data)
    }

    /// First half of a commit: stage the full graph into a hidden
    /// `pending_segments_N` file. Nothing is visible to readers yet.
    pub fn prepare_commit(&mut self, dir: &DirectoryRc) -> Result<()> {
        if self.pending_segn_file.is_some() {
            bail!(ErrorKind::IllegalState(
                "prepare_commit was already called".into()
            ));
        }
        self.version += 1;
        let pending = self.next_pending_file_name();
        let out = dir.create_output(&pending)?;
        let mut out = ChecksumIndexOutput::new(out);
        let res = (|| -> Result<()> {
            self.write_contents(&mut out)?;
            out.finish_checksum()?;
            out.close()
        })();
        if let Err(e) = res {
            // leave no pending state behind
            let _ = dir.delete_file(&pending);
            return Err(e);
        }
        dir.sync(&[pending.clone()])?;
        self.generation += 1;
        self.pending_segn_file = Some(pending);
        Ok(())
    }

    /// Second half of a commit: rename the staged file into its numbered
    /// `segments_N` slot, making the commit durable and visible, then
    /// refresh the advisory generation file.
    pub fn finish_commit(&mut self, dir: &DirectoryRc) -> Result<String> {
        let pending = match self.pending_segn_file.take() {
            Some(p) => p,
            None => bail!(ErrorKind::IllegalState("prepare_commit was not called".into())),
        };
        let file_name = file_name_from_generation(INDEX_FILE_SEGMENTS, "", self.generation);
        dir.rename(&pending, &file_name)?;
        dir.sync(&[file_name.clone()])?;
        self.last_generation = self.generation;
        if let Err(e) = write_segments_gen(dir, self.generation) {
            // advisory only; readers fall back to the directory listing
            warn!(target: "IW", "could not write {}: {}", INDEX_FILE_SEGMENTS_GEN, e);
        }
        Ok(file_name)
    }

    /// Abandon a prepared commit.
    pub fn rollback_commit(&mut self, dir: &DirectoryRc) {
        if let Some(pending) = self.pending_segn_file.take() {
            if let Err(e) = dir.delete_file(&pending) {
                warn!(target: "IW", "could not remove {}: {}", pending, e);
            }
            self.generation -= 1;
        }
    }

    /// One-step commit used where the two phases aren't split.
    pub fn commit(&mut self, dir: &DirectoryRc) -> Result<String> {
        self.prepare_commit(dir)?;
        self.finish_commit(dir)
    }

    /// Records the generations another instance just prepared or
    /// committed, so this instance never rewrites the same `segments_N`.
    pub fn update_generation(&mut self, other: &SegmentInfos) {
        self.generation = self.generation.max(other.generation);
        self.last_generation = self.last_generation.max(other.last_generation);
    }
}

impl ::std::fmt::Display for SegmentInfos {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(f, "segments_{} [", self.generation)?;
        for (i, si) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", si.name())?;
        }
        write!(f, "]")
    }
}

/// Extracts N from `segments_N` (or `pending_segments_N`).
pub fn generation_from_segments_file_name(name: &str) -> Result<i64> {
    let base = if name.starts_with(INDEX_FILE_PENDING_SEGMENTS) {
        INDEX_FILE_PENDING_SEGMENTS
    } else {
        INDEX_FILE_SEGMENTS
    };
    if name == base {
        return Ok(0);
    }
    if !name.starts_with(base)
        || name.len() <= base.len() + 1
        || name.as_bytes()[base.len()] != b'_'
    {
        bail!(ErrorKind::IllegalArgument(format!(
            "file name {} is not a segments file",
            name
        )));
    }
    Ok(from_base36(&name[base.len() + 1..])? as i64)
}

fn write_segments_gen(dir: &DirectoryRc, generation: i64) -> Result<()> {
    let mut out = dir.create_output(INDEX_FILE_SEGMENTS_GEN)?;
    out.write_int(FORMAT_SEGMENTS_GEN_FILE)?;
    out.write_long(generation)?;
    out.write_long(generation)?;
    out.close()?;
    dir.sync(&[INDEX_FILE_SEGMENTS_GEN.to_string()])
}

fn read_segments_gen(dir: &DirectoryRc) -> Result<i64> {
    if !dir.file_exists(INDEX_FILE_SEGMENTS_GEN) {
        bail!(ErrorKind::RuntimeError("no segments.gen".into()));
    }
    let mut input = dir.open_input(INDEX_FILE_SEGMENTS_GEN, BUFFER_SIZE)?;
    let format = input.read_int()?;
    if format != FORMAT_SEGMENTS_GEN_FILE {
        bail!(ErrorKind::CorruptIndex(format!(
            "unrecognized segments.gen format: {}",
            format
        )));
    }
    let gen0 = input.read_long()?;
    let gen1 = input.read_long()?;
    if gen0 != gen1 {
        bail!(ErrorKind::CorruptIndex(format!(
            "segments.gen generations differ: {} vs {}",
            gen0, gen1
        )));
    }
    Ok(gen0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::store::RAMDirectory;

    fn ram_dir() -> DirectoryRc {
        Arc::new(RAMDirectory::new())
    }

    fn new_si(dir: &DirectoryRc, name: &str, docs: i32) -> SegmentInfoRc {
        Arc::new(SegmentInfo::new(
            name,
            docs,
            Arc::clone(dir),
            false,
            true,
            true,
            false,
        ))
    }

    #[test]
    fn generation_parsing() {
        assert_eq!(generation_from_segments_file_name("segments_1").unwrap(), 1);
        assert_eq!(
            generation_from_segments_file_name("segments_10").unwrap(),
            36
        );
        assert_eq!(
            generation_from_segments_file_name("pending_segments_2").unwrap(),
            2
        );
        assert!(generation_from_segments_file_name("write.lock").is_err());
    }

    #[test]
    fn commit_then_read_round_trip() {
        let dir = ram_dir();
        let mut infos = SegmentInfos::new();
        infos.counter = 3;
        infos.push(new_si(&dir, "_0", 5));
        infos.push(new_si(&dir, "_1", 2));
        let mut user_data = HashMap::new();
        user_data.insert("writer".to_string(), "test".to_string());
        infos.set_user_data(user_data);

        let name = infos.commit(&dir).unwrap();
        assert_eq!(name, "segments_1");
        assert!(dir.file_exists("segments_1"));
        assert!(dir.file_exists("segments.gen"));

        let read = SegmentInfos::read_current(&dir).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read.counter, 3);
        assert_eq!(read.info(0).name(), "_0");
        assert_eq!(read.info(1).doc_count(), 2);
        assert_eq!(read.user_data()["writer"], "test");
        assert_eq!(read.generation(), 1);
    }

    #[test]
    fn pending_commit_is_invisible_until_finished() {
        let dir = ram_dir();
        let mut infos = SegmentInfos::new();
        infos.push(new_si(&dir, "_0", 1));
        infos.prepare_commit(&dir).unwrap();
        assert!(dir.file_exists("pending_segments_1"));
        assert!(!dir.file_exists("segments_1"));
        assert!(SegmentInfos::read_current(&dir).is_err());

        infos.finish_commit(&dir).unwrap();
        assert!(!dir.file_exists("pending_segments_1"));
        let read = SegmentInfos::read_current(&dir).unwrap();
        assert_eq!(read.len(), 1);
    }

    #[test]
    fn rollback_drops_pending_file() {
        let dir = ram_dir();
        let mut infos = SegmentInfos::new();
        infos.push(new_si(&dir, "_0", 1));
        infos.prepare_commit(&dir).unwrap();
        infos.rollback_commit(&dir);
        assert!(!dir.file_exists("pending_segments_1"));
        // the next commit starts over at the same generation
        infos.commit(&dir).unwrap();
        assert!(dir.file_exists("segments_1"));
    }

    #[test]
    fn corrupt_newest_falls_back_to_previous_commit() {
        let dir = ram_dir();
        let mut infos = SegmentInfos::new();
        infos.push(new_si(&dir, "_0", 1));
        infos.commit(&dir).unwrap();
        // simulate a torn newer commit
        let mut out = dir.create_output("segments_2").unwrap();
        out.write_int(FORMAT_CURRENT).unwrap();
        out.write_long(99).unwrap();
        out.close().unwrap();

        let read = SegmentInfos::read_current(&dir).unwrap();
        assert_eq!(read.generation(), 1);
        assert_eq!(read.len(), 1);
    }

    #[test]
    fn second_commit_advances_generation() {
        let dir = ram_dir();
        let mut infos = SegmentInfos::new();
        infos.push(new_si(&dir, "_0", 1));
        assert_eq!(infos.commit(&dir).unwrap(), "segments_1");
        infos.push(new_si(&dir, "_1", 1));
        assert_eq!(infos.commit(&dir).unwrap(), "segments_2");
        let read = SegmentInfos::read_current(&dir).unwrap();
        assert_eq!(read.generation(), 2);
        assert_eq!(read.len(), 2);
    }

    #[test]
    fn prune_deleted_segments_drops_fully_deleted() {
        let dir = ram_dir();
        let mut infos = SegmentInfos::new();
        let alive = new_si(&dir, "_0", 4);
        alive.set_del_count(2);
        let dead = new_si(&dir, "_1", 3);
        dead.set_del_count(3);
        infos.push(alive);
        infos.push(dead);
        infos.prune_deleted_segments().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos.info(0).name(), "_0");
    }
}
