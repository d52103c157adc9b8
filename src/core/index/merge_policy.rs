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

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use core::index::{SegmentInfoRc, SegmentInfos, SegmentReaderRc};
use core::store::DirectoryRc;
use error::{Error, ErrorKind, Result};

/// One planned merge: a contiguous run of source segments that will be
/// fused into a single new segment. Shared between the supervisor, the
/// scheduler thread executing it, and abort paths.
pub struct OneMerge {
    pub segments: Vec<SegmentInfoRc>,
    pub total_doc_count: i32,
    info: Mutex<Option<SegmentInfoRc>>,
    optimize: AtomicBool,
    max_num_segments_optimize: AtomicI32,
    aborted: AtomicBool,
    register_done: AtomicBool,
    is_external: AtomicBool,
    merge_gen: AtomicI64,
    merge_docs: AtomicI32,
    readers: Mutex<Vec<SegmentReaderRc>>,
    readers_clone: Mutex<Vec<SegmentReaderRc>>,
    error: Mutex<Option<String>>,
}

pub type OneMergeRc = Arc<OneMerge>;

impl OneMerge {
    pub fn new(segments: Vec<SegmentInfoRc>) -> OneMergeRc {
        debug_assert!(!segments.is_empty());
        let total_doc_count = segments.iter().map(|si| si.doc_count()).sum();
        Arc::new(OneMerge {
            segments,
            total_doc_count,
            info: Mutex::new(None),
            optimize: AtomicBool::new(false),
            max_num_segments_optimize: AtomicI32::new(0),
            aborted: AtomicBool::new(false),
            register_done: AtomicBool::new(false),
            is_external: AtomicBool::new(false),
            merge_gen: AtomicI64::new(0),
            merge_docs: AtomicI32::new(0),
            readers: Mutex::new(Vec::new()),
            readers_clone: Mutex::new(Vec::new()),
            error: Mutex::new(None),
        })
    }

    pub fn info(&self) -> Option<SegmentInfoRc> {
        self.info.lock().unwrap().as_ref().map(Arc::clone)
    }

    pub fn set_info(&self, info: SegmentInfoRc) {
        *self.info.lock().unwrap() = Some(info);
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Raises `MergeAborted` once the abort flag is set; the merger calls
    /// this between units of work.
    pub fn check_aborted(&self, dir: &DirectoryRc) -> Result<()> {
        if self.is_aborted() {
            bail!(ErrorKind::MergeAborted(format!(
                "merge is aborted: {}",
                self.seg_string(dir)
            )));
        }
        Ok(())
    }

    pub fn set_optimize(&self, max_num_segments: i32) {
        self.optimize.store(true, Ordering::Release);
        self.max_num_segments_optimize
            .store(max_num_segments, Ordering::Release);
    }

    pub fn is_optimize(&self) -> bool {
        self.optimize.load(Ordering::Acquire)
    }

    pub fn max_num_segments_optimize(&self) -> i32 {
        self.max_num_segments_optimize.load(Ordering::Acquire)
    }

    pub fn set_register_done(&self, done: bool) {
        self.register_done.store(done, Ordering::Release);
    }

    pub fn is_register_done(&self) -> bool {
        self.register_done.load(Ordering::Acquire)
    }

    pub fn set_external(&self, external: bool) {
        self.is_external.store(external, Ordering::Release);
    }

    pub fn is_external(&self) -> bool {
        self.is_external.load(Ordering::Acquire)
    }

    pub fn set_merge_gen(&self, gen: i64) {
        self.merge_gen.store(gen, Ordering::Release);
    }

    pub fn merge_gen(&self) -> i64 {
        self.merge_gen.load(Ordering::Acquire)
    }

    pub fn set_merge_docs(&self, docs: i32) {
        self.merge_docs.store(docs, Ordering::Release);
    }

    pub fn merge_docs(&self) -> i32 {
        self.merge_docs.load(Ordering::Acquire)
    }

    pub fn set_error(&self, e: &Error) {
        *self.error.lock().unwrap() = Some(e.to_string());
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }

    pub fn set_readers(&self, readers: Vec<SegmentReaderRc>, clones: Vec<SegmentReaderRc>) {
        *self.readers.lock().unwrap() = readers;
        *self.readers_clone.lock().unwrap() = clones;
    }

    pub fn take_readers(&self) -> (Vec<SegmentReaderRc>, Vec<SegmentReaderRc>) {
        let readers = ::std::mem::replace(&mut *self.readers.lock().unwrap(), Vec::new());
        let clones = ::std::mem::replace(&mut *self.readers_clone.lock().unwrap(), Vec::new());
        (readers, clones)
    }

    pub fn readers_snapshot(&self) -> (Vec<SegmentReaderRc>, Vec<SegmentReaderRc>) {
        let readers = self.readers.lock().unwrap().clone();
        let clones = self.readers_clone.lock().unwrap().clone();
        (readers, clones)
    }

    pub fn seg_string(&self, dir: &DirectoryRc) -> String {
        let mut buffer = String::new();
        for (i, si) in self.segments.iter().enumerate() {
            if i > 0 {
                buffer.push(' ');
            }
            buffer.push_str(&si.to_string_with(dir, 0));
        }
        if let Some(info) = self.info() {
            buffer.push_str(" into ");
            buffer.push_str(info.name());
        }
        if self.is_optimize() {
            buffer.push_str(" [optimize]");
        }
        buffer
    }
}

/// The set of merges a policy asked for in one pass.
#[derive(Default)]
pub struct MergeSpecification {
    pub merges: Vec<OneMergeRc>,
}

impl MergeSpecification {
    pub fn new() -> MergeSpecification {
        Default::default()
    }

    pub fn add(&mut self, merge: OneMergeRc) {
        self.merges.push(merge);
    }

    pub fn is_empty(&self) -> bool {
        self.merges.is_empty()
    }
}

/// Selects which segments to fuse. Implementations see the whole graph
/// and return contiguous runs; the supervisor registers and schedules
/// them.
pub trait MergePolicy: Send + Sync {
    /// Natural background merges after a flush or commit.
    fn find_merges(&self, infos: &SegmentInfos) -> Result<Option<MergeSpecification>>;

    /// Merges that shrink the graph to at most `max_num_segments`,
    /// restricted to `segments_to_optimize` (by segment name).
    fn find_merges_for_optimize(
        &self,
        infos: &SegmentInfos,
        max_num_segments: i32,
        segments_to_optimize: &HashSet<String>,
    ) -> Result<Option<MergeSpecification>>;

    /// Merges that reclaim deleted documents.
    fn find_merges_to_expunge_deletes(
        &self,
        infos: &SegmentInfos,
    ) -> Result<Option<MergeSpecification>>;

    /// Whether a freshly written segment should be wrapped in a compound
    /// file.
    fn use_compound_file(&self, infos: &SegmentInfos, new_segment: &SegmentInfoRc) -> bool;

    fn close(&self) {}
}

pub const DEFAULT_MERGE_FACTOR: usize = 10;
pub const DEFAULT_MAX_MERGE_DOCS: i32 = i32::max_value();
pub const DEFAULT_MIN_MERGE_DOCS: i32 = 1000;

// Merges happen within a level band this wide (in log-merge-factor
// units), so a long tail of small segments does not drag a huge one in.
const LEVEL_LOG_SPAN: f64 = 0.75;

/// Levelled merging by document count: segments land in levels of
/// `merge_factor` powers, and `merge_factor` segments of one level fuse
/// into one of the next.
pub struct LogDocMergePolicy {
    pub merge_factor: usize,
    pub max_merge_docs: i32,
    pub min_merge_docs: i32,
    use_compound: bool,
}

impl Default for LogDocMergePolicy {
    fn default() -> Self {
        LogDocMergePolicy {
            merge_factor: DEFAULT_MERGE_FACTOR,
            max_merge_docs: DEFAULT_MAX_MERGE_DOCS,
            min_merge_docs: DEFAULT_MIN_MERGE_DOCS,
            use_compound: true,
        }
    }
}

impl LogDocMergePolicy {
    pub fn new(merge_factor: usize, use_compound: bool) -> LogDocMergePolicy {
        LogDocMergePolicy {
            merge_factor: merge_factor.max(2),
            max_merge_docs: DEFAULT_MAX_MERGE_DOCS,
            min_merge_docs: DEFAULT_MIN_MERGE_DOCS,
            use_compound,
        }
    }

    fn size(&self, si: &SegmentInfoRc) -> i64 {
        // deleted docs don't count toward a segment's weight
        let del = si.del_count().unwrap_or(0);
        i64::from((si.doc_count() - del).max(1))
    }

    fn level(&self, size: i64) -> f64 {
        (size as f64).ln() / (self.merge_factor as f64).ln()
    }

    /// Fully merged for optimize purposes: one compound-consistent
    /// segment without deletions or separate norms.
    fn is_optimized(&self, si: &SegmentInfoRc) -> Result<bool> {
        Ok(!si.has_deletions()?
            && !si.has_separate_norms()?
            && si.use_compound_file() == self.use_compound)
    }
}

impl MergePolicy for LogDocMergePolicy {
    fn find_merges(&self, infos: &SegmentInfos) -> Result<Option<MergeSpecification>> {
        let count = infos.len();
        if count == 0 {
            return Ok(None);
        }
        let levels: Vec<f64> = infos
            .segments()
            .iter()
            .map(|si| self.level(self.size(si)))
            .collect();
        let level_floor = self.level(i64::from(self.min_merge_docs.max(1)));

        let mut spec = MergeSpecification::new();
        let mut start = 0usize;
        while start < count {
            // the highest level of the remaining segments decides the band
            let mut max_level = levels[start];
            for &l in &levels[start + 1..] {
                if l > max_level {
                    max_level = l;
                }
            }
            let mut level_bottom = max_level - LEVEL_LOG_SPAN;
            if level_bottom < level_floor {
                level_bottom = level_floor;
            }

            // the band runs through the last segment still inside it
            let mut upto = count - 1;
            loop {
                if levels[upto] >= level_bottom {
                    break;
                }
                if upto == start {
                    break;
                }
                upto -= 1;
            }
            if levels[upto] < level_bottom {
                // nothing in the band; the tail is all below the floor
                upto = count - 1;
            }

            // full windows inside the band become merges
            let mut window_start = start;
            while window_start + self.merge_factor <= upto + 1 {
                let window = &infos.segments()[window_start..window_start + self.merge_factor];
                let any_too_large = window
                    .iter()
                    .any(|si| si.doc_count() > self.max_merge_docs);
                if !any_too_large {
                    spec.add(OneMerge::new(window.to_vec()));
                }
                window_start += self.merge_factor;
            }
            start = upto + 1;
        }

        if spec.is_empty() {
            Ok(None)
        } else {
            Ok(Some(spec))
        }
    }

    fn find_merges_for_optimize(
        &self,
        infos: &SegmentInfos,
        max_num_segments: i32,
        segments_to_optimize: &HashSet<String>,
    ) -> Result<Option<MergeSpecification>> {
        debug_assert!(max_num_segments > 0);
        let count = infos.len();
        if count == 0 {
            return Ok(None);
        }
        // the eligible suffix: trailing segments enrolled for optimize
        let mut first = count;
        while first > 0 && segments_to_optimize.contains(infos.info(first - 1).name()) {
            first -= 1;
        }
        if first == count {
            return Ok(None);
        }

        if count as i64 <= i64::from(max_num_segments) {
            // already few enough; a lone unoptimized segment still gets
            // rewritten when fully optimizing
            if max_num_segments == 1 && count == 1 && !self.is_optimized(infos.info(0))? {
                let mut spec = MergeSpecification::new();
                spec.add(OneMerge::new(vec![Arc::clone(infos.info(0))]));
                return Ok(Some(spec));
            }
            return Ok(None);
        }

        let mut spec = MergeSpecification::new();
        let mut last = count;
        // full windows while well above the target; the cascade re-enters
        // after each one commits
        while last as i64 - i64::from(max_num_segments) + 1 >= self.merge_factor as i64
            && last >= first + self.merge_factor
        {
            spec.add(OneMerge::new(
                infos.segments()[last - self.merge_factor..last].to_vec(),
            ));
            last -= self.merge_factor;
        }

        if spec.is_empty() && last as i64 > i64::from(max_num_segments) {
            // one partial merge landing exactly on the target count
            let num_to_merge = last - max_num_segments as usize + 1;
            if last - num_to_merge >= first {
                spec.add(OneMerge::new(
                    infos.segments()[last - num_to_merge..last].to_vec(),
                ));
            }
        }

        if spec.is_empty() {
            Ok(None)
        } else {
            Ok(Some(spec))
        }
    }

    fn find_merges_to_expunge_deletes(
        &self,
        infos: &SegmentInfos,
    ) -> Result<Option<MergeSpecification>> {
        let mut spec = MergeSpecification::new();
        let mut first_with_deletes: Option<usize> = None;
        for i in 0..infos.len() {
            let has = infos.info(i).has_deletions()?;
            match (has, first_with_deletes) {
                (true, None) => first_with_deletes = Some(i),
                (true, Some(first)) => {
                    // cap each merge at merge_factor inputs
                    if i - first + 1 == self.merge_factor {
                        spec.add(OneMerge::new(infos.segments()[first..=i].to_vec()));
                        first_with_deletes = None;
                    }
                }
                (false, Some(first)) => {
                    spec.add(OneMerge::new(infos.segments()[first..i].to_vec()));
                    first_with_deletes = None;
                }
                (false, None) => {}
            }
        }
        if let Some(first) = first_with_deletes {
            spec.add(OneMerge::new(infos.segments()[first..].to_vec()));
        }
        if spec.is_empty() {
            Ok(None)
        } else {
            Ok(Some(spec))
        }
    }

    fn use_compound_file(&self, _infos: &SegmentInfos, _new_segment: &SegmentInfoRc) -> bool {
        self.use_compound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::index::SegmentInfo;
    use core::store::RAMDirectory;

    fn infos_with(dir: &DirectoryRc, docs: &[i32]) -> SegmentInfos {
        let mut infos = SegmentInfos::new();
        for (i, &count) in docs.iter().enumerate() {
            infos.push(Arc::new(SegmentInfo::new(
                &format!("_{}", i),
                count,
                Arc::clone(dir),
                false,
                true,
                true,
                false,
            )));
        }
        infos
    }

    #[test]
    fn equal_segments_merge_in_factor_groups() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let infos = infos_with(&dir, &[10; 25]);
        let policy = LogDocMergePolicy::new(10, false);
        let spec = policy.find_merges(&infos).unwrap().unwrap();
        assert_eq!(spec.merges.len(), 2);
        assert_eq!(spec.merges[0].segments.len(), 10);
        assert_eq!(spec.merges[0].segments[0].name(), "_0");
        assert_eq!(spec.merges[1].segments[0].name(), "_10");
    }

    #[test]
    fn few_segments_produce_no_merge() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let infos = infos_with(&dir, &[10; 5]);
        let policy = LogDocMergePolicy::new(10, false);
        assert!(policy.find_merges(&infos).unwrap().is_none());
    }

    #[test]
    fn optimize_reaches_target_count() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let infos = infos_with(&dir, &[5; 20]);
        let all: HashSet<String> = infos
            .segments()
            .iter()
            .map(|si| si.name().to_string())
            .collect();
        let policy = LogDocMergePolicy::new(10, false);
        let spec = policy
            .find_merges_for_optimize(&infos, 3, &all)
            .unwrap()
            .unwrap();
        // one full window now; the cascade continues after it commits
        assert_eq!(spec.merges.len(), 1);
        assert_eq!(spec.merges[0].segments.len(), 10);
    }

    #[test]
    fn expunge_groups_contiguous_deleted_runs() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let infos = infos_with(&dir, &[10; 6]);
        infos.info(1).advance_del_gen();
        infos.info(2).advance_del_gen();
        infos.info(4).advance_del_gen();
        let policy = LogDocMergePolicy::new(10, false);
        let spec = policy.find_merges_to_expunge_deletes(&infos).unwrap().unwrap();
        assert_eq!(spec.merges.len(), 2);
        assert_eq!(spec.merges[0].segments.len(), 2);
        assert_eq!(spec.merges[0].segments[0].name(), "_1");
        assert_eq!(spec.merges[1].segments.len(), 1);
        assert_eq!(spec.merges[1].segments[0].name(), "_4");
    }

    #[test]
    fn abort_flag_raises_on_check() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let infos = infos_with(&dir, &[1]);
        let merge = OneMerge::new(vec![Arc::clone(infos.info(0))]);
        merge.check_aborted(&dir).unwrap();
        merge.abort();
        assert!(merge.check_aborted(&dir).is_err());
    }
}
