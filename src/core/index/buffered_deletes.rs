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

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use core::index::{ReaderPool, SegmentInfoRc, SegmentInfos, SegmentReaderRc, Term, TermDocs};
use core::search::{DocIterator, Query, NO_MORE_DOCS};
use core::util::{AtomicCounter, DocId};
use error::Result;

/// Rough cost of one buffered delete term: map entry overhead plus the
/// term object, not counting the text (added per byte).
pub const BYTES_PER_DEL_TERM: i64 = 128;

/// Rough cost of one buffered doc id.
pub const BYTES_PER_DEL_DOCID: i64 = 28;

/// Rough cost of one buffered delete query; queries themselves are
/// usually undercounted.
pub const BYTES_PER_DEL_QUERY: i64 = 88;

/// Deletions buffered against one segment: terms with their upper-bound
/// doc ids, queries likewise, and raw doc ids. Doc ids always refer to the
/// in-memory segment being built and never move across segments; once an
/// instance is published against a flushed segment its doc-id list must be
/// empty or about to be applied.
pub struct SegmentDeletes {
    pub terms: BTreeMap<Term, DocId>,
    queries: HashMap<String, (Arc<dyn Query>, DocId)>,
    pub doc_ids: Vec<DocId>,
    pub num_term_deletes: AtomicCounter,
    pub bytes_used: AtomicCounter,
}

impl Default for SegmentDeletes {
    fn default() -> Self {
        SegmentDeletes {
            terms: BTreeMap::new(),
            queries: HashMap::new(),
            doc_ids: Vec::new(),
            num_term_deletes: AtomicCounter::new(0),
            bytes_used: AtomicCounter::new(0),
        }
    }
}

impl SegmentDeletes {
    pub fn new() -> SegmentDeletes {
        Default::default()
    }

    /// Buffers a delete-by-term effective for doc ids below `doc_id_upto`.
    /// A term already buffered with a higher bound keeps it: the larger
    /// bound covers more recently added docs, and racing updates of the
    /// same term must not resurrect the earlier doc.
    pub fn add_term(&mut self, term: Term, doc_id_upto: DocId) {
        let exists = self.terms.contains_key(&term);
        if exists && doc_id_upto < self.terms[&term] {
            return;
        }
        if !exists {
            self.bytes_used
                .add_and_get(BYTES_PER_DEL_TERM + term.text().len() as i64);
            self.num_term_deletes.increment_and_get();
        }
        self.terms.insert(term, doc_id_upto);
    }

    pub fn add_query(&mut self, query: Arc<dyn Query>, doc_id_upto: DocId) {
        let key = query.query_key();
        if !self.queries.contains_key(&key) {
            self.bytes_used.add_and_get(BYTES_PER_DEL_QUERY);
        }
        self.queries.insert(key, (query, doc_id_upto));
    }

    pub fn add_doc_id(&mut self, doc_id: DocId) {
        self.doc_ids.push(doc_id);
        self.bytes_used.add_and_get(BYTES_PER_DEL_DOCID);
    }

    /// Merges another accumulator's terms and queries into this one. With
    /// `no_limit` the merged entries apply to every doc of the target
    /// segment. Doc ids never merge across segments.
    pub fn update(&mut self, other: &SegmentDeletes, no_limit: bool) {
        for (term, &upto) in &other.terms {
            let limit = if no_limit { NO_MORE_DOCS } else { upto };
            if !self.terms.contains_key(term) {
                self.bytes_used
                    .add_and_get(BYTES_PER_DEL_TERM + term.text().len() as i64);
                self.num_term_deletes.increment_and_get();
            }
            self.terms.insert(term.clone(), limit);
        }
        for (key, &(ref query, upto)) in &other.queries {
            let limit = if no_limit { NO_MORE_DOCS } else { upto };
            if !self.queries.contains_key(key) {
                self.bytes_used.add_and_get(BYTES_PER_DEL_QUERY);
            }
            self.queries
                .insert(key.clone(), (Arc::clone(query), limit));
        }
    }

    pub fn clear_doc_ids(&mut self) {
        self.bytes_used
            .add_and_get(-(self.doc_ids.len() as i64 * BYTES_PER_DEL_DOCID));
        self.doc_ids.clear();
    }

    pub fn clear(&mut self) {
        self.terms.clear();
        self.queries.clear();
        self.doc_ids.clear();
        self.num_term_deletes.set(0);
        self.bytes_used.set(0);
    }

    pub fn any(&self) -> bool {
        !self.terms.is_empty() || !self.queries.is_empty() || !self.doc_ids.is_empty()
    }

    pub fn queries(&self) -> impl Iterator<Item = (&Arc<dyn Query>, DocId)> {
        self.queries.values().map(|&(ref q, upto)| (q, upto))
    }

    pub fn num_queries(&self) -> usize {
        self.queries.len()
    }
}

impl ::std::fmt::Display for SegmentDeletes {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        if self.num_term_deletes.get() != 0 {
            write!(
                f,
                " {} deleted terms (unique count={})",
                self.num_term_deletes.get(),
                self.terms.len()
            )?;
        }
        if !self.queries.is_empty() {
            write!(f, " {} deleted queries", self.queries.len())?;
        }
        if !self.doc_ids.is_empty() {
            write!(f, " {} deleted docIDs", self.doc_ids.len())?;
        }
        if self.bytes_used.get() != 0 {
            write!(f, " bytesUsed={}", self.bytes_used.get())?;
        }
        Ok(())
    }
}

/// Process-wide map from flushed segment to its pending deletions, with
/// global term and byte accounting that always equals the sum over the
/// entries.
pub struct BufferedDeletes {
    deletes_map: Mutex<HashMap<String, SegmentDeletes>>,
    num_terms: AtomicCounter,
    bytes_used: AtomicCounter,
}

impl Default for BufferedDeletes {
    fn default() -> Self {
        BufferedDeletes {
            deletes_map: Mutex::new(HashMap::new()),
            num_terms: AtomicCounter::new(0),
            bytes_used: AtomicCounter::new(0),
        }
    }
}

impl BufferedDeletes {
    pub fn new() -> BufferedDeletes {
        Default::default()
    }

    pub fn any(&self) -> bool {
        self.bytes_used.get() != 0
    }

    pub fn num_terms(&self) -> i64 {
        self.num_terms.get()
    }

    pub fn bytes_used(&self) -> i64 {
        self.bytes_used.get()
    }

    pub fn clear(&self) -> Result<()> {
        let mut map = self.deletes_map.lock()?;
        map.clear();
        self.num_terms.set(0);
        self.bytes_used.set(0);
        Ok(())
    }

    /// Publishes deletions against a freshly flushed segment. The segment
    /// must not already have an entry.
    pub fn push_deletes(&self, new_deletes: SegmentDeletes, info: &SegmentInfoRc) -> Result<()> {
        self.push_deletes_internal(new_deletes, info, false)
    }

    /// Merges deletions into the segment's existing entry with unbounded
    /// uptos; used when a flush produced no segment and the deletions
    /// attach to the most recent flushed segment instead.
    pub fn push_deletes_no_limit(
        &self,
        new_deletes: SegmentDeletes,
        info: &SegmentInfoRc,
    ) -> Result<()> {
        self.push_deletes_internal(new_deletes, info, true)
    }

    fn push_deletes_internal(
        &self,
        new_deletes: SegmentDeletes,
        info: &SegmentInfoRc,
        no_limit: bool,
    ) -> Result<()> {
        debug_assert!(new_deletes.any());
        let mut map = self.deletes_map.lock()?;
        if no_limit {
            let entry = map
                .entry(info.name().to_string())
                .or_insert_with(SegmentDeletes::new);
            self.num_terms.add_and_get(-entry.num_term_deletes.get());
            self.bytes_used.add_and_get(-entry.bytes_used.get());
            entry.update(&new_deletes, true);
            self.num_terms.add_and_get(entry.num_term_deletes.get());
            self.bytes_used.add_and_get(entry.bytes_used.get());
        } else {
            debug_assert!(!map.contains_key(info.name()));
            self.num_terms.add_and_get(new_deletes.num_term_deletes.get());
            self.bytes_used.add_and_get(new_deletes.bytes_used.get());
            map.insert(info.name().to_string(), new_deletes);
        }
        debug!(target: "BD", "push deletes seg={}", info.name());
        debug_assert!(self.check_delete_stats(&map));
        Ok(())
    }

    /// After a merge commits, deletions that arrived against the last
    /// source segment while the merge ran are carried forward onto the
    /// merged segment. Earlier sources must not hold any deletions: the
    /// pre-merge apply pass consumed them.
    pub fn commit_merge(&self, sources: &[SegmentInfoRc], merged: &SegmentInfoRc) -> Result<()> {
        let mut map = self.deletes_map.lock()?;
        debug_assert!(self.check_delete_stats(&map));
        let last = sources
            .last()
            .expect("a merge always has at least one source");
        if let Some(last_deletes) = map.remove(last.name()) {
            debug_assert!(!map.contains_key(merged.name()));
            // counters don't move: the entry is re-keyed, not copied
            map.insert(merged.name().to_string(), last_deletes);
            debug!(target: "BD", "commitMerge carried deletes onto {}", merged.name());
        }
        debug_assert!(sources[..sources.len() - 1]
            .iter()
            .all(|si| !map.contains_key(si.name())));
        debug_assert!(self.check_delete_stats(&map));
        Ok(())
    }

    /// Applies buffered deletions against a suffix-contiguous slice of the
    /// segment list, walking the full list backwards and coalescing
    /// deletions so each one also reaches every earlier segment. Returns
    /// whether any document was actually deleted.
    pub fn apply_deletes(
        &self,
        pool: &ReaderPool,
        segment_infos: &SegmentInfos,
        apply_infos: &[SegmentInfoRc],
    ) -> Result<bool> {
        if !self.any() {
            return Ok(false);
        }
        debug_assert!(!apply_infos.is_empty());

        let mut map = self.deletes_map.lock()?;
        debug_assert!(self.check_delete_stats(&map));

        let first_idx = segment_infos
            .index_of(&apply_infos[0])
            .expect("apply slice must be part of the segment list");
        let last_idx = segment_infos
            .index_of(&apply_infos[apply_infos.len() - 1])
            .expect("apply slice must be part of the segment list");
        // the slice must be contiguous and aligned with the full list
        debug_assert_eq!(last_idx - first_idx + 1, apply_infos.len());

        debug!(
            target: "BD",
            "applyDeletes: apply {} segments of {}", apply_infos.len(), segment_infos.len()
        );

        let mut any = false;
        let mut coalesced: Option<SegmentDeletes> = None;
        let mut has_deletes = false;

        for seg_idx in (first_idx..segment_infos.len()).rev() {
            let info = segment_infos.info(seg_idx);
            let has_entry = map.contains_key(info.name());
            debug_assert!(map.get(info.name()).map_or(true, |d| d.any()));
            if !has_entry && coalesced.is_none() {
                continue;
            }
            if has_entry {
                has_deletes = true;
            }

            if seg_idx <= last_idx && has_deletes {
                let del_count_inc = {
                    let deletes = map.get(info.name());
                    self.apply_to_segment(pool, info, coalesced.as_ref(), deletes)?
                };
                if del_count_inc != 0 {
                    any = true;
                }
                debug!(target: "BD", "deletes touched {} docIDs in {}", del_count_inc, info.name());
                if let Some(deletes) = map.get_mut(info.name()) {
                    // doc ids only ever apply to the segment they were
                    // issued against
                    self.bytes_used
                        .add_and_get(-(deletes.doc_ids.len() as i64 * BYTES_PER_DEL_DOCID));
                    deletes.clear_doc_ids();
                }
            }

            if has_entry {
                let deletes = &map[info.name()];
                coalesced
                    .get_or_insert_with(SegmentDeletes::new)
                    .update(deletes, true);
            }
        }

        // deletions in the applied slice either move to the segment just
        // before it (so they survive a merge and re-apply to earlier
        // segments) or, when there is no earlier segment, are dropped
        let mut moved: Vec<SegmentDeletes> = Vec::new();
        for info in apply_infos {
            if let Some(entry) = map.remove(info.name()) {
                debug_assert!(entry.any());
                self.num_terms.add_and_get(-entry.num_term_deletes.get());
                self.bytes_used.add_and_get(-entry.bytes_used.get());
                moved.push(entry);
            }
        }
        if first_idx > 0 && !moved.is_empty() {
            let prev_name = segment_infos.info(first_idx - 1).name().to_string();
            let target = map.entry(prev_name).or_insert_with(SegmentDeletes::new);
            self.num_terms.add_and_get(-target.num_term_deletes.get());
            self.bytes_used.add_and_get(-target.bytes_used.get());
            for entry in &moved {
                target.update(entry, true);
            }
            self.num_terms.add_and_get(target.num_term_deletes.get());
            self.bytes_used.add_and_get(target.bytes_used.get());
        }
        debug_assert!(self.num_terms.get() >= 0 && self.bytes_used.get() >= 0);
        debug_assert!(self.check_delete_stats(&map));

        Ok(any)
    }

    // Lock order: IW -> BD -> RP
    fn apply_to_segment(
        &self,
        pool: &ReaderPool,
        info: &SegmentInfoRc,
        coalesced: Option<&SegmentDeletes>,
        deletes: Option<&SegmentDeletes>,
    ) -> Result<i64> {
        debug_assert!(coalesced.map_or(true, |c| c.doc_ids.is_empty()));
        let reader = pool.get(info, false)?;
        let mut del_count = 0i64;
        let mut res: Result<()> = Ok(());
        if let Some(coalesced) = coalesced {
            res = Self::apply_to_reader(coalesced, &reader, &mut del_count);
        }
        if res.is_ok() {
            if let Some(deletes) = deletes {
                res = Self::apply_to_reader(deletes, &reader, &mut del_count);
            }
        }
        // on failure drop the reader's pending deletions so no deletion
        // file is written; the accumulator stays intact for a retry
        pool.release(&reader, res.is_err())?;
        res.map(|_| del_count)
    }

    fn apply_to_reader(
        deletes: &SegmentDeletes,
        reader: &SegmentReaderRc,
        del_count: &mut i64,
    ) -> Result<()> {
        if !deletes.terms.is_empty() {
            let mut docs = reader.term_docs()?;
            let mut last_term: Option<&Term> = None;
            for (term, &limit) in &deletes.terms {
                // terms arrive sorted, so the cursor only seeks forward
                debug_assert!(last_term.map_or(true, |last| last < term));
                last_term = Some(term);
                docs.seek(Some(term))?;
                while docs.next()? {
                    let doc_id = docs.doc();
                    if doc_id >= limit {
                        break;
                    }
                    reader.delete_document(doc_id)?;
                    *del_count += 1;
                }
            }
        }

        for &doc_id in &deletes.doc_ids {
            reader.delete_document(doc_id)?;
            *del_count += 1;
        }

        for (query, limit) in deletes.queries() {
            if let Some(mut iter) = query.create_iterator(reader)? {
                loop {
                    let doc = iter.next()?;
                    if doc >= limit || doc == NO_MORE_DOCS {
                        break;
                    }
                    reader.delete_document(doc)?;
                    *del_count += 1;
                }
            }
        }
        Ok(())
    }

    fn check_delete_stats(&self, map: &HashMap<String, SegmentDeletes>) -> bool {
        let num_terms2: i64 = map.values().map(|d| d.num_term_deletes.get()).sum();
        let bytes_used2: i64 = map.values().map(|d| d.bytes_used.get()).sum();
        debug_assert_eq!(num_terms2, self.num_terms.get());
        debug_assert_eq!(bytes_used2, self.bytes_used.get());
        true
    }

    pub fn has_deletes_for(&self, info: &SegmentInfoRc) -> bool {
        self.deletes_map.lock().unwrap().contains_key(info.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::search::TermQuery;

    #[test]
    fn add_term_keeps_greater_upto() {
        let mut deletes = SegmentDeletes::new();
        deletes.add_term(Term::new("f", "a"), 10);
        deletes.add_term(Term::new("f", "a"), 5);
        assert_eq!(deletes.terms[&Term::new("f", "a")], 10);
        deletes.add_term(Term::new("f", "a"), 20);
        assert_eq!(deletes.terms[&Term::new("f", "a")], 20);
        // the counter moves only on first insert
        assert_eq!(deletes.num_term_deletes.get(), 1);
    }

    #[test]
    fn byte_accounting_tracks_inserts_only() {
        let mut deletes = SegmentDeletes::new();
        deletes.add_term(Term::new("f", "abc"), 1);
        let after_first = deletes.bytes_used.get();
        assert_eq!(after_first, BYTES_PER_DEL_TERM + 3);
        deletes.add_term(Term::new("f", "abc"), 2);
        assert_eq!(deletes.bytes_used.get(), after_first);

        let q: Arc<dyn Query> = Arc::new(TermQuery::new(Term::new("f", "x")));
        deletes.add_query(Arc::clone(&q), 1);
        deletes.add_query(q, 3);
        assert_eq!(
            deletes.bytes_used.get(),
            after_first + BYTES_PER_DEL_QUERY
        );

        deletes.add_doc_id(7);
        deletes.add_doc_id(9);
        assert_eq!(
            deletes.bytes_used.get(),
            after_first + BYTES_PER_DEL_QUERY + 2 * BYTES_PER_DEL_DOCID
        );
        deletes.clear_doc_ids();
        assert_eq!(
            deletes.bytes_used.get(),
            after_first + BYTES_PER_DEL_QUERY
        );
    }

    #[test]
    fn update_no_limit_widens_uptos() {
        let mut a = SegmentDeletes::new();
        a.add_term(Term::new("f", "a"), 3);
        let mut b = SegmentDeletes::new();
        b.update(&a, true);
        assert_eq!(b.terms[&Term::new("f", "a")], NO_MORE_DOCS);
        assert_eq!(b.num_term_deletes.get(), 1);

        let mut c = SegmentDeletes::new();
        c.update(&a, false);
        assert_eq!(c.terms[&Term::new("f", "a")], 3);
    }

    #[test]
    fn any_reflects_all_three_kinds() {
        let mut deletes = SegmentDeletes::new();
        assert!(!deletes.any());
        deletes.add_doc_id(1);
        assert!(deletes.any());
        deletes.clear();
        assert!(!deletes.any());
        deletes.add_term(Term::new("f", "t"), 1);
        assert!(deletes.any());
    }
}
