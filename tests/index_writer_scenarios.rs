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

extern crate lupin;

use std::sync::Arc;

use lupin::core::doc::{Document, Field, Index, Store};
use lupin::core::index::{
    DirectoryReader, IndexWriter, IndexWriterConfig, LogDocMergePolicy, OpenMode, Term,
    DISABLE_AUTO_FLUSH,
};
use lupin::core::search::TermQuery;
use lupin::core::store::{Directory, DirectoryRc, RAMDirectory};

fn ram_dir() -> DirectoryRc {
    Arc::new(RAMDirectory::new())
}

fn content_doc(text: &str) -> Document {
    let mut doc = Document::new();
    doc.add(Field::new("content", text, Store::Yes, Index::Analyzed));
    doc
}

fn open_writer(dir: &DirectoryRc, mode: OpenMode) -> IndexWriter {
    let config = IndexWriterConfig::builder()
        .open_mode(mode)
        .merge_policy(Arc::new(LogDocMergePolicy::new(10, false)))
        .build();
    IndexWriter::open(Arc::clone(dir), config).unwrap()
}

// one segment per call
fn add_segment(writer: &IndexWriter, texts: &[&str]) {
    for text in texts {
        writer.add_document(&content_doc(text)).unwrap();
    }
    writer.commit().unwrap();
}

#[test]
fn basic_add_and_commit() {
    // S1: three docs, one commit, freshly opened reader sees them all
    let dir = ram_dir();
    let writer = open_writer(&dir, OpenMode::Create);
    writer.add_document(&content_doc("a b c")).unwrap();
    writer.add_document(&content_doc("a d")).unwrap();
    writer.add_document(&content_doc("e")).unwrap();
    writer.commit().unwrap();

    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 3);
    assert_eq!(reader.doc_freq(&Term::new("content", "a")).unwrap(), 2);
    assert_eq!(reader.doc_freq(&Term::new("content", "e")).unwrap(), 1);
    assert_eq!(reader.doc_freq(&Term::new("content", "zzz")).unwrap(), 0);
    assert_eq!(
        reader.document(0).unwrap().get("content"),
        Some("a b c")
    );
    writer.close().unwrap();
}

#[test]
fn delete_by_term() {
    // S2: continues from the S1 state
    let dir = ram_dir();
    let writer = open_writer(&dir, OpenMode::Create);
    writer.add_document(&content_doc("a b c")).unwrap();
    writer.add_document(&content_doc("a d")).unwrap();
    writer.add_document(&content_doc("e")).unwrap();
    writer.commit().unwrap();

    writer
        .delete_documents(Term::new("content", "a"))
        .unwrap();
    writer.commit().unwrap();

    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 1);
    assert_eq!(reader.doc_freq(&Term::new("content", "a")).unwrap(), 0);
    assert_eq!(reader.doc_freq(&Term::new("content", "e")).unwrap(), 1);
    assert_eq!(reader.term_doc_ids(&Term::new("content", "e")).unwrap().len(), 1);
    writer.close().unwrap();
}

#[test]
fn delete_by_query() {
    let dir = ram_dir();
    let writer = open_writer(&dir, OpenMode::Create);
    writer.add_document(&content_doc("apple pie")).unwrap();
    writer.add_document(&content_doc("apple juice")).unwrap();
    writer.add_document(&content_doc("plum juice")).unwrap();
    writer.commit().unwrap();

    writer
        .delete_documents_by_query(Arc::new(TermQuery::new(Term::new("content", "apple"))))
        .unwrap();
    writer.commit().unwrap();

    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 1);
    assert_eq!(reader.doc_freq(&Term::new("content", "juice")).unwrap(), 1);
    writer.close().unwrap();
}

#[test]
fn update_document_replaces_by_term() {
    let dir = ram_dir();
    let writer = open_writer(&dir, OpenMode::Create);
    let mut doc = Document::new();
    doc.add(Field::new("id", "1", Store::Yes, Index::NotAnalyzed));
    doc.add(Field::new("content", "old text", Store::Yes, Index::Analyzed));
    writer.add_document(&doc).unwrap();
    writer.commit().unwrap();

    let mut updated = Document::new();
    updated.add(Field::new("id", "1", Store::Yes, Index::NotAnalyzed));
    updated.add(Field::new("content", "new text", Store::Yes, Index::Analyzed));
    writer
        .update_document(Some(Term::new("id", "1")), &updated)
        .unwrap();
    writer.commit().unwrap();

    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 1);
    assert_eq!(reader.doc_freq(&Term::new("content", "old")).unwrap(), 0);
    assert_eq!(reader.doc_freq(&Term::new("content", "new")).unwrap(), 1);
    writer.close().unwrap();
}

#[test]
fn merge_preserves_doc_and_term_counts() {
    // merge N segments of C docs each with no deletions: the merged
    // segment carries N*C docs and summed doc freqs
    let dir = ram_dir();
    let writer = open_writer(&dir, OpenMode::Create);
    for _ in 0..4 {
        add_segment(&writer, &["x y", "x", "y z"]);
    }
    assert_eq!(writer.segment_count().unwrap(), 4);

    writer.optimize(1, true).unwrap();
    writer.commit().unwrap();
    assert_eq!(writer.segment_count().unwrap(), 1);

    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 12);
    assert_eq!(reader.doc_freq(&Term::new("content", "x")).unwrap(), 8);
    assert_eq!(reader.doc_freq(&Term::new("content", "y")).unwrap(), 8);
    assert_eq!(reader.doc_freq(&Term::new("content", "z")).unwrap(), 4);
    writer.close().unwrap();
}

#[test]
fn deletes_applied_before_a_merge_stay_deleted() {
    // deletes buffered and applied ahead of an optimize are collapsed
    // away by the merge (the delete racing the merge itself is covered by
    // the writer's own mid-merge transfer test)
    let dir = ram_dir();
    let writer = open_writer(&dir, OpenMode::Create);
    for i in 0..3 {
        let texts: Vec<String> = (0..10).map(|j| format!("x id{}_{}", i, j)).collect();
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        add_segment(&writer, &refs);
    }
    assert_eq!(writer.segment_count().unwrap(), 3);

    // delete one doc of the middle segment while merging is possible
    writer
        .delete_documents(Term::new("content", "id1_5"))
        .unwrap();
    writer.optimize(1, true).unwrap();
    writer.commit().unwrap();

    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.max_doc(), 29);
    assert_eq!(reader.num_docs(), 29);
    assert_eq!(reader.doc_freq(&Term::new("content", "id1_5")).unwrap(), 0);
    assert_eq!(reader.doc_freq(&Term::new("content", "id1_4")).unwrap(), 1);
    assert_eq!(reader.doc_freq(&Term::new("content", "x")).unwrap(), 29);
    writer.close().unwrap();
}

#[test]
fn rollback_discards_uncommitted_adds() {
    // S4: adds after the last commit vanish on rollback
    let dir = ram_dir();
    {
        let writer = open_writer(&dir, OpenMode::Create);
        writer.add_document(&content_doc("a b c")).unwrap();
        writer.add_document(&content_doc("a d")).unwrap();
        writer.add_document(&content_doc("e")).unwrap();
        writer.commit().unwrap();

        writer.add_document(&content_doc("f")).unwrap();
        writer.add_document(&content_doc("g")).unwrap();
        writer.rollback().unwrap();
    }

    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 3);
    assert_eq!(reader.doc_freq(&Term::new("content", "f")).unwrap(), 0);

    // the directory is writable again after rollback released the lock
    let writer = open_writer(&dir, OpenMode::CreateOrAppend);
    writer.add_document(&content_doc("h")).unwrap();
    writer.commit().unwrap();
    writer.close().unwrap();
    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 4);
}

#[test]
fn prepare_commit_is_invisible_until_commit() {
    // S5: a prepared commit must not leak to fresh readers
    let dir = ram_dir();
    let writer = open_writer(&dir, OpenMode::Create);
    writer.add_document(&content_doc("a")).unwrap();
    writer.commit().unwrap();

    writer.add_document(&content_doc("b")).unwrap();
    writer.prepare_commit(None).unwrap();

    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 1);
    assert_eq!(reader.doc_freq(&Term::new("content", "b")).unwrap(), 0);
    drop(reader);

    writer.commit().unwrap();
    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 2);
    assert_eq!(reader.doc_freq(&Term::new("content", "b")).unwrap(), 1);
    writer.close().unwrap();
}

#[test]
fn optimize_reduces_segment_count() {
    // S6: twenty seeded segments of five docs optimize down to three
    let dir = ram_dir();
    let writer = open_writer(&dir, OpenMode::Create);
    for i in 0..20 {
        let texts: Vec<String> = (0..5).map(|j| format!("w{}_{}", i, j)).collect();
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        add_segment(&writer, &refs);
    }
    assert_eq!(writer.segment_count().unwrap(), 20);

    writer.optimize(3, true).unwrap();
    writer.commit().unwrap();
    assert!(writer.segment_count().unwrap() <= 3);

    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 100);
    assert_eq!(reader.doc_freq(&Term::new("content", "w7_3")).unwrap(), 1);
    writer.close().unwrap();
}

#[test]
fn flush_with_only_deletes_reaches_older_segment() {
    // no buffered docs: the deletions push against the newest existing
    // segment unbounded, and still reach older ones on apply
    let dir = ram_dir();
    let writer = open_writer(&dir, OpenMode::Create);
    add_segment(&writer, &["a", "b"]);
    add_segment(&writer, &["a c"]);

    writer.delete_documents(Term::new("content", "a")).unwrap();
    writer.commit().unwrap();

    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 1);
    assert_eq!(reader.doc_freq(&Term::new("content", "a")).unwrap(), 0);
    assert_eq!(reader.doc_freq(&Term::new("content", "b")).unwrap(), 1);
    writer.close().unwrap();
}

#[test]
fn create_mode_truncates_existing_index() {
    let dir = ram_dir();
    {
        let writer = open_writer(&dir, OpenMode::Create);
        add_segment(&writer, &["old1", "old2"]);
        writer.close().unwrap();
    }
    {
        let writer = open_writer(&dir, OpenMode::Create);
        writer.add_document(&content_doc("fresh")).unwrap();
        writer.commit().unwrap();
        writer.close().unwrap();
    }
    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 1);
    assert_eq!(reader.doc_freq(&Term::new("content", "old1")).unwrap(), 0);
    assert_eq!(reader.doc_freq(&Term::new("content", "fresh")).unwrap(), 1);
}

#[test]
fn append_mode_requires_an_index() {
    let dir = ram_dir();
    let config = IndexWriterConfig::builder()
        .open_mode(OpenMode::Append)
        .build();
    assert!(IndexWriter::open(Arc::clone(&dir), config).is_err());
    // the failed open left no write lock behind
    assert!(!IndexWriter::is_locked(&dir));
}

#[test]
fn second_writer_cannot_obtain_the_lock() {
    let dir = ram_dir();
    let writer = open_writer(&dir, OpenMode::Create);
    let config = IndexWriterConfig::builder()
        .write_lock_timeout_ms(20)
        .build();
    assert!(IndexWriter::open(Arc::clone(&dir), config).is_err());
    writer.close().unwrap();

    let config = IndexWriterConfig::builder().build();
    let reopened = IndexWriter::open(Arc::clone(&dir), config).unwrap();
    reopened.close().unwrap();
}

#[test]
fn empty_field_values_are_allowed() {
    let dir = ram_dir();
    let writer = open_writer(&dir, OpenMode::Create);
    let mut doc = Document::new();
    doc.add(Field::new("content", "", Store::Yes, Index::Analyzed));
    writer.add_document(&doc).unwrap();
    writer.commit().unwrap();

    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 1);
    assert_eq!(reader.document(0).unwrap().get("content"), Some(""));
    writer.close().unwrap();
}

#[test]
fn commit_without_changes_keeps_file_set() {
    let dir = ram_dir();
    let writer = open_writer(&dir, OpenMode::Create);
    add_segment(&writer, &["a"]);
    let files_before: Vec<String> = dir
        .list_all()
        .unwrap()
        .into_iter()
        .filter(|f| !f.starts_with("segments") && f != "write.lock")
        .collect();
    // no intervening change: commit is a no-op for the referenced files
    writer.commit().unwrap();
    let files_after: Vec<String> = dir
        .list_all()
        .unwrap()
        .into_iter()
        .filter(|f| !f.starts_with("segments") && f != "write.lock")
        .collect();
    assert_eq!(files_before, files_after);
    writer.close().unwrap();
}

#[test]
fn delete_all_keeps_writer_usable() {
    let dir = ram_dir();
    let writer = open_writer(&dir, OpenMode::Create);
    add_segment(&writer, &["a", "b"]);
    writer.delete_all().unwrap();
    writer.commit().unwrap();

    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 0);
    drop(reader);

    writer.add_document(&content_doc("again")).unwrap();
    writer.commit().unwrap();
    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 1);
    writer.close().unwrap();
}

#[test]
fn add_indexes_copies_foreign_segments() {
    let source_a = ram_dir();
    {
        let writer = open_writer(&source_a, OpenMode::Create);
        add_segment(&writer, &["apple", "pear"]);
        writer.close().unwrap();
    }
    let source_b = ram_dir();
    {
        let writer = open_writer(&source_b, OpenMode::Create);
        add_segment(&writer, &["cherry"]);
        writer.close().unwrap();
    }

    let dir = ram_dir();
    let writer = open_writer(&dir, OpenMode::Create);
    add_segment(&writer, &["plum"]);
    writer
        .add_indexes(&[Arc::clone(&source_a), Arc::clone(&source_b)])
        .unwrap();
    writer.commit().unwrap();

    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 4);
    assert_eq!(reader.doc_freq(&Term::new("content", "apple")).unwrap(), 1);
    assert_eq!(reader.doc_freq(&Term::new("content", "cherry")).unwrap(), 1);
    assert_eq!(reader.doc_freq(&Term::new("content", "plum")).unwrap(), 1);

    // cannot add a directory to itself
    assert!(writer.add_indexes(&[Arc::clone(&dir)]).is_err());
    writer.close().unwrap();
}

#[test]
fn expunge_deletes_reclaims_deleted_docs() {
    let dir = ram_dir();
    let writer = open_writer(&dir, OpenMode::Create);
    add_segment(&writer, &["keep1", "drop me1"]);
    add_segment(&writer, &["keep2"]);
    writer.delete_documents(Term::new("content", "me1")).unwrap();
    writer.commit().unwrap();

    writer.expunge_deletes(true).unwrap();
    writer.commit().unwrap();

    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 2);
    assert_eq!(reader.max_doc(), 2);
    writer.close().unwrap();
}

#[test]
fn flush_by_doc_count_creates_segments() {
    let dir = ram_dir();
    let config = IndexWriterConfig::builder()
        .open_mode(OpenMode::Create)
        .max_buffered_docs(2)
        .max_buffered_delete_terms(DISABLE_AUTO_FLUSH)
        .merge_policy(Arc::new(LogDocMergePolicy::new(100, false)))
        .build();
    let writer = IndexWriter::open(Arc::clone(&dir), config).unwrap();
    for i in 0..6 {
        writer
            .add_document(&content_doc(&format!("doc{}", i)))
            .unwrap();
    }
    writer.commit().unwrap();
    // two buffered docs per flush
    assert_eq!(writer.segment_count().unwrap(), 3);
    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 6);
    writer.close().unwrap();
}

#[test]
fn compound_file_segments_read_back() {
    let dir = ram_dir();
    let config = IndexWriterConfig::builder()
        .open_mode(OpenMode::Create)
        .merge_policy(Arc::new(LogDocMergePolicy::new(10, true)))
        .build();
    let writer = IndexWriter::open(Arc::clone(&dir), config).unwrap();
    writer.add_document(&content_doc("inside compound")).unwrap();
    writer.commit().unwrap();
    writer.close().unwrap();

    assert!(dir.file_exists("_0.cfs"));
    assert!(!dir.file_exists("_0.tis"));
    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 1);
    assert_eq!(
        reader.doc_freq(&Term::new("content", "compound")).unwrap(),
        1
    );
    assert_eq!(
        reader.document(0).unwrap().get("content"),
        Some("inside compound")
    );
}

#[test]
fn old_commits_are_garbage_collected() {
    let dir = ram_dir();
    let writer = open_writer(&dir, OpenMode::Create);
    add_segment(&writer, &["one"]);
    add_segment(&writer, &["two"]);
    writer.optimize(1, true).unwrap();
    writer.commit().unwrap();
    writer.close().unwrap();

    // only the live commit remains
    let segments_files: Vec<String> = dir
        .list_all()
        .unwrap()
        .into_iter()
        .filter(|f| f.starts_with("segments_"))
        .collect();
    assert_eq!(segments_files.len(), 1);

    // and the merged-away segment files are gone
    let reader = DirectoryReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 2);
    let live: ::std::collections::HashSet<String> = reader.segment_readers()[0]
        .files()
        .unwrap()
        .into_iter()
        .collect();
    for file in dir.list_all().unwrap() {
        if file.starts_with("segments") || file == "write.lock" {
            continue;
        }
        assert!(live.contains(&file), "orphaned file: {}", file);
    }
}
