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

use core::index::segment_infos;
use core::index::{
    is_index_file, IndexCommitPoint, IndexDeletionPolicy, SegmentInfos, INDEX_FILE_SEGMENTS,
    INDEX_FILE_SEGMENTS_GEN,
};
use core::store::{Directory, DirectoryRc};
use error::Result;

/// Reference-counted lifecycle for every file the index owns. Each
/// checkpoint references the files of the current graph; commits also
/// become commit points the deletion policy rules over. A file whose
/// count returns to zero is deleted, with undeletable files retried on
/// the next checkpoint.
///
/// The supervisor owns the deleter and calls it only under its own lock.
pub struct IndexFileDeleter {
    dir: DirectoryRc,
    policy: Box<dyn IndexDeletionPolicy>,
    ref_counts: HashMap<String, u32>,
    commits: Vec<IndexCommitPoint>,
    // files referenced by the last non-commit checkpoint
    last_files: Vec<String>,
    // deletions that failed (file busy); retried on each checkpoint
    deletable: Vec<String>,
    /// True when the directory held a commit newer than the one the
    /// writer opened on (a prior crash mid-commit).
    pub starting_commit_deleted: bool,
}

impl IndexFileDeleter {
    /// Scans the directory, builds the commit points found there, lets
    /// the policy delete old ones, then removes every unreferenced index
    /// file. `segment_infos` is the graph the writer opens with.
    pub fn new(
        dir: DirectoryRc,
        policy: Box<dyn IndexDeletionPolicy>,
        segment_infos: &SegmentInfos,
    ) -> Result<IndexFileDeleter> {
        let current_segments_file = segment_infos.current_segments_file_name();
        let mut deleter = IndexFileDeleter {
            dir,
            policy,
            ref_counts: HashMap::new(),
            commits: Vec::new(),
            last_files: Vec::new(),
            deletable: Vec::new(),
            starting_commit_deleted: false,
        };

        for file in deleter.dir.list_all()? {
            if !is_index_file(&file) || file == INDEX_FILE_SEGMENTS_GEN {
                continue;
            }
            deleter.ref_counts.entry(file.clone()).or_insert(0);
            if file.starts_with(INDEX_FILE_SEGMENTS) {
                debug!(target: "IFD", "init: load commit {}", file);
                match SegmentInfos::read(&deleter.dir, &file) {
                    Ok(infos) => {
                        let mut files = infos.files(&deleter.dir, false)?;
                        files.push(file.clone());
                        for f in &files {
                            deleter.inc_ref(f);
                        }
                        let gen = segment_infos::generation_from_segments_file_name(&file)?;
                        deleter
                            .commits
                            .push(IndexCommitPoint::new(file.clone(), gen, files));
                    }
                    Err(e) => {
                        // a torn commit; it will be garbage collected below
                        warn!(target: "IFD", "init: could not read {}: {}", file, e);
                    }
                }
            }
        }
        deleter.commits.sort_by_key(|c| c.generation);

        let had_current = deleter
            .commits
            .iter()
            .any(|c| c.segments_file_name == current_segments_file);

        deleter.policy.on_init(&mut deleter.commits);
        if !current_segments_file.is_empty() && had_current {
            deleter.starting_commit_deleted = deleter
                .commits
                .iter()
                .find(|c| c.segments_file_name == current_segments_file)
                .map(|c| c.is_deleted())
                .unwrap_or(true);
        }
        deleter.delete_commits()?;

        // protect what the writer starts from
        deleter.checkpoint(segment_infos, false)?;

        // now drop everything nothing references
        let orphans: Vec<String> = deleter
            .ref_counts
            .iter()
            .filter(|&(_, &rc)| rc == 0)
            .map(|(f, _)| f.clone())
            .collect();
        for file in orphans {
            deleter.ref_counts.remove(&file);
            debug!(target: "IFD", "init: remove unreferenced {}", file);
            deleter.delete_file(&file);
        }
        Ok(deleter)
    }

    fn inc_ref(&mut self, file: &str) {
        let count = self.ref_counts.entry(file.to_string()).or_insert(0);
        *count += 1;
    }

    fn dec_ref(&mut self, file: &str) {
        let remove = match self.ref_counts.get_mut(file) {
            Some(count) => {
                debug_assert!(*count > 0);
                *count -= 1;
                *count == 0
            }
            None => {
                debug_assert!(false, "decRef of untracked file {}", file);
                false
            }
        };
        if remove {
            self.ref_counts.remove(file);
            self.delete_file(file);
        }
    }

    pub fn exists(&self, file: &str) -> bool {
        self.ref_counts.get(file).map(|&rc| rc > 0).unwrap_or(false)
    }

    /// References every file of the graph; a commit checkpoint also
    /// creates a commit point and consults the policy, a plain checkpoint
    /// replaces the previous checkpoint's references.
    pub fn checkpoint(&mut self, segment_infos: &SegmentInfos, is_commit: bool) -> Result<()> {
        self.retry_deletions();
        let mut files = segment_infos.files(&self.dir, is_commit)?;
        if is_commit {
            for file in &files {
                self.inc_ref(file);
            }
            let gen = segment_infos.last_generation();
            self.commits.push(IndexCommitPoint::new(
                segment_infos.current_segments_file_name(),
                gen,
                files,
            ));
            self.policy.on_commit(&mut self.commits);
            self.delete_commits()?;
        } else {
            for file in &files {
                self.inc_ref(file);
            }
            let old = ::std::mem::replace(&mut self.last_files, Vec::new());
            for file in &old {
                self.dec_ref(file);
            }
            ::std::mem::swap(&mut self.last_files, &mut files);
        }
        Ok(())
    }

    /// References a snapshot about to be synced by a commit in flight.
    pub fn inc_ref_infos(&mut self, infos: &SegmentInfos, include_segments_file: bool) -> Result<()> {
        let files = infos.files(&self.dir, include_segments_file)?;
        for file in &files {
            self.inc_ref(file);
        }
        Ok(())
    }

    pub fn dec_ref_infos(&mut self, infos: &SegmentInfos, include_segments_file: bool) -> Result<()> {
        let files = infos.files(&self.dir, include_segments_file)?;
        for file in &files {
            self.dec_ref(file);
        }
        Ok(())
    }

    fn delete_commits(&mut self) -> Result<()> {
        let commits = std::mem::take(&mut self.commits);
        let mut kept = Vec::with_capacity(commits.len());
        for commit in commits {
            if commit.is_deleted() {
                debug!(
                    target: "IFD",
                    "delete commit point {}", commit.segments_file_name
                );
                for file in &commit.files {
                    let remove = match self.ref_counts.get_mut(file) {
                        Some(count) => {
                            *count = count.saturating_sub(1);
                            *count == 0
                        }
                        None => false,
                    };
                    if remove {
                        self.ref_counts.remove(file);
                        self.delete_file(file);
                    }
                }
            } else {
                kept.push(commit);
            }
        }
        self.commits = kept;
        Ok(())
    }

    /// Removes index files nothing references (optionally restricted to
    /// one segment's files); used after aborted flushes and merges and on
    /// rollback.
    pub fn refresh(&mut self, segment_name: Option<&str>) -> Result<()> {
        for file in self.dir.list_all()? {
            if !is_index_file(&file) || file == INDEX_FILE_SEGMENTS_GEN {
                continue;
            }
            if let Some(prefix) = segment_name {
                let matches = super::parse_segment_name(&file) == prefix;
                if !matches {
                    continue;
                }
            }
            if !self.ref_counts.contains_key(&file) {
                debug!(target: "IFD", "refresh: remove {}", file);
                self.delete_file(&file);
            }
        }
        Ok(())
    }

    /// Deletes files a failed operation wrote but never registered.
    pub fn delete_new_files<'a, I: IntoIterator<Item = &'a String>>(&mut self, files: I) {
        for file in files {
            if !self.ref_counts.contains_key(file.as_str()) {
                self.delete_file(file);
            }
        }
    }

    pub fn delete_file(&mut self, file: &str) {
        if !self.dir.file_exists(file) {
            return;
        }
        if let Err(e) = self.dir.delete_file(file) {
            // running readers can hold the file open; try again later
            debug!(target: "IFD", "unable to remove {} now: {}; will retry", file, e);
            self.deletable.push(file.to_string());
        }
    }

    fn retry_deletions(&mut self) {
        let pending = ::std::mem::replace(&mut self.deletable, Vec::new());
        for file in pending {
            if self.ref_counts.contains_key(&file) {
                continue;
            }
            self.delete_file(&file);
        }
    }

    pub fn close(&mut self) -> Result<()> {
        let old = ::std::mem::replace(&mut self.last_files, Vec::new());
        for file in &old {
            self.dec_ref(file);
        }
        self.retry_deletions();
        Ok(())
    }
}
