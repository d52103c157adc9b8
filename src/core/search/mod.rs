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

//! The query-side boundary of the engine. Query expression trees and
//! scoring live outside; the indexing core only needs enough of the
//! interface to drive delete-by-query: a `Query` produces a doc iterator
//! over one segment reader. `TermQuery` is the reference implementation.

use std::fmt;
use std::i32;

use core::index::{SegmentReader, Term, TermDocs};
use core::util::DocId;
use error::Result;

/// When returned by `next()` and `advance(DocId)` it means there are no
/// more docs in the iterator.
pub const NO_MORE_DOCS: DocId = i32::MAX;

/// Iteration over a set of non-decreasing doc ids. `NO_MORE_DOCS` is the
/// exhaustion sentinel, so implementations must treat `i32::MAX` as an
/// invalid doc id.
pub trait DocIterator {
    /// Returns the following:
    ///
    /// * `-1` if `next()` or `advance(DocId)` were not called yet.
    /// * `NO_MORE_DOCS` if the iterator has exhausted.
    /// * Otherwise it should return the doc ID it is currently on.
    fn doc_id(&self) -> DocId;

    /// Advances to the next document in the set and returns the doc it is
    /// currently on, or `NO_MORE_DOCS` if there are no more docs in the set.
    fn next(&mut self) -> Result<DocId>;

    /// Advances to the first document whose number is greater than or equal
    /// to `target`, and returns it. Exhausts the iterator and returns
    /// `NO_MORE_DOCS` if `target` is past the highest document in the set.
    fn advance(&mut self, target: DocId) -> Result<DocId>;

    /// An upper bound on the number of documents the iterator might match.
    fn cost(&self) -> usize;
}

/// A query restricted to what buffered delete application needs: identity
/// (so buffered queries can be deduplicated) plus per-segment iteration.
pub trait Query: Send + Sync + fmt::Display {
    /// Matching docs of one segment, or None when nothing can match.
    fn create_iterator(&self, reader: &SegmentReader) -> Result<Option<Box<dyn DocIterator>>>;

    /// Stable identity of this query; equal keys mean equal queries.
    fn query_key(&self) -> String;
}

#[derive(Clone, Debug)]
pub struct TermQuery {
    term: Term,
}

impl TermQuery {
    pub fn new(term: Term) -> TermQuery {
        TermQuery { term }
    }

    pub fn term(&self) -> &Term {
        &self.term
    }
}

impl fmt::Display for TermQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.term.field(), self.term.text())
    }
}

impl Query for TermQuery {
    fn create_iterator(&self, reader: &SegmentReader) -> Result<Option<Box<dyn DocIterator>>> {
        let mut docs = reader.term_docs()?;
        docs.seek(Some(&self.term))?;
        Ok(Some(Box::new(TermDocsIterator {
            docs,
            doc: -1,
            cost: reader.max_doc() as usize,
        })))
    }

    fn query_key(&self) -> String {
        format!("term:{}:{}", self.term.field(), self.term.text())
    }
}

struct TermDocsIterator {
    docs: Box<dyn TermDocs>,
    doc: DocId,
    cost: usize,
}

impl DocIterator for TermDocsIterator {
    fn doc_id(&self) -> DocId {
        self.doc
    }

    fn next(&mut self) -> Result<DocId> {
        self.doc = if self.docs.next()? {
            self.docs.doc()
        } else {
            NO_MORE_DOCS
        };
        Ok(self.doc)
    }

    fn advance(&mut self, target: DocId) -> Result<DocId> {
        self.doc = if self.docs.skip_to(target)? {
            self.docs.doc()
        } else {
            NO_MORE_DOCS
        };
        Ok(self.doc)
    }

    fn cost(&self) -> usize {
        self.cost
    }
}
