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

mod buffered_deletes;
mod compound_file;
mod directory_reader;
mod documents_writer;
mod field_infos;
mod flush_control;
mod index_deletion_policy;
mod index_file_deleter;
mod index_writer;
pub mod index_writer_config;
mod merge_policy;
mod merge_scheduler;
mod norms;
mod postings;
mod reader_pool;
mod segment_info;
mod segment_infos;
mod segment_merger;
mod segment_reader;
mod stored_fields;
mod term;
mod term_docs;
mod term_infos;
mod term_vectors;

pub use self::buffered_deletes::{BufferedDeletes, SegmentDeletes};
pub use self::compound_file::{CompoundFileReader, CompoundFileWriter};
pub use self::directory_reader::DirectoryReader;
pub use self::documents_writer::{DocumentsWriter, SegmentNameSource, WriterEvent};
pub use self::field_infos::{FieldInfo, FieldInfos};
pub use self::flush_control::{FlushControl, DISABLE_AUTO_FLUSH};
pub use self::index_deletion_policy::{
    IndexCommitPoint, IndexDeletionPolicy, KeepOnlyLastCommitDeletionPolicy,
};
pub use self::index_file_deleter::IndexFileDeleter;
pub use self::index_writer::IndexWriter;
pub use self::index_writer_config::{
    IndexWriterConfig, IndexWriterConfigBuilder, MergedSegmentWarmer, OpenMode,
};
pub use self::merge_policy::{
    LogDocMergePolicy, MergePolicy, MergeSpecification, OneMerge, OneMergeRc,
};
pub use self::merge_scheduler::{ConcurrentMergeScheduler, MergeScheduler, SerialMergeScheduler};
pub use self::norms::Norm;
pub use self::postings::PostingsWriter;
pub use self::reader_pool::ReaderPool;
pub use self::segment_info::{SegmentInfo, SegmentInfoRc, CHECK_DIR, NO, WITHOUT_GEN, YES};
pub use self::segment_infos::SegmentInfos;
pub use self::segment_merger::{
    CheckAbort, PayloadProcessor, PayloadProcessorProvider, SegmentMerger,
};
pub use self::segment_reader::{CoreReaders, SegmentReader, SegmentReaderRc};
pub use self::stored_fields::{FieldsReader, FieldsWriter};
pub use self::term::Term;
pub use self::term_docs::{
    AllTermDocs, SegmentTermDocs, SegmentTermPositions, TermDocs, TermPositions,
};
pub use self::term_infos::{SegmentTermEnum, TermInfo, TermInfosReader, TermInfosWriter};
pub use self::term_vectors::{TermFreqVector, TermVectorsReader, TermVectorsWriter};

use regex::Regex;

use core::util::to_base36;

// index-level file names
pub const INDEX_FILE_SEGMENTS: &str = "segments";
pub const INDEX_FILE_PENDING_SEGMENTS: &str = "pending_segments";
pub const INDEX_FILE_SEGMENTS_GEN: &str = "segments.gen";
pub const INDEX_FILE_DELETABLE: &str = "deletable";

// per-segment file extensions
pub const NORMS_EXTENSION: &str = "nrm";
pub const FREQ_EXTENSION: &str = "frq";
pub const PROX_EXTENSION: &str = "prx";
pub const TERMS_EXTENSION: &str = "tis";
pub const TERMS_INDEX_EXTENSION: &str = "tii";
pub const FIELDS_INDEX_EXTENSION: &str = "fdx";
pub const FIELDS_EXTENSION: &str = "fdt";
pub const VECTORS_FIELDS_EXTENSION: &str = "tvf";
pub const VECTORS_DOCUMENTS_EXTENSION: &str = "tvd";
pub const VECTORS_INDEX_EXTENSION: &str = "tvx";
pub const COMPOUND_FILE_EXTENSION: &str = "cfs";
pub const COMPOUND_FILE_STORE_EXTENSION: &str = "cfx";
pub const DELETES_EXTENSION: &str = "del";
pub const FIELD_INFOS_EXTENSION: &str = "fnm";
pub const PLAIN_NORMS_EXTENSION: &str = "f";
pub const SEPARATE_NORMS_EXTENSION: &str = "s";
pub const GEN_EXTENSION: &str = "gen";

lazy_static! {
    /// Every extension the engine writes, except the per-field `.f<n>` and
    /// `.s<n>` norm families; `segments_N` files carry no extension at all.
    pub static ref INDEX_EXTENSIONS: Vec<&'static str> = vec![
        COMPOUND_FILE_EXTENSION,
        FIELD_INFOS_EXTENSION,
        FIELDS_INDEX_EXTENSION,
        FIELDS_EXTENSION,
        TERMS_INDEX_EXTENSION,
        TERMS_EXTENSION,
        FREQ_EXTENSION,
        PROX_EXTENSION,
        DELETES_EXTENSION,
        VECTORS_INDEX_EXTENSION,
        VECTORS_DOCUMENTS_EXTENSION,
        VECTORS_FIELDS_EXTENSION,
        GEN_EXTENSION,
        NORMS_EXTENSION,
        COMPOUND_FILE_STORE_EXTENSION,
    ];

    /// Extensions bundled into a compound file: everything above minus
    /// `del`, `gen` and the compound containers themselves.
    pub static ref INDEX_EXTENSIONS_IN_COMPOUND_FILE: Vec<&'static str> = vec![
        FIELD_INFOS_EXTENSION,
        FIELDS_INDEX_EXTENSION,
        FIELDS_EXTENSION,
        TERMS_INDEX_EXTENSION,
        TERMS_EXTENSION,
        FREQ_EXTENSION,
        PROX_EXTENSION,
        VECTORS_INDEX_EXTENSION,
        VECTORS_DOCUMENTS_EXTENSION,
        VECTORS_FIELDS_EXTENSION,
        NORMS_EXTENSION,
    ];

    pub static ref STORE_INDEX_EXTENSIONS: Vec<&'static str> = vec![
        VECTORS_INDEX_EXTENSION,
        VECTORS_DOCUMENTS_EXTENSION,
        VECTORS_FIELDS_EXTENSION,
        FIELDS_INDEX_EXTENSION,
        FIELDS_EXTENSION,
    ];

    pub static ref NON_STORE_INDEX_EXTENSIONS: Vec<&'static str> = vec![
        FIELD_INFOS_EXTENSION,
        FREQ_EXTENSION,
        PROX_EXTENSION,
        TERMS_EXTENSION,
        TERMS_INDEX_EXTENSION,
        NORMS_EXTENSION,
    ];

    pub static ref VECTOR_EXTENSIONS: Vec<&'static str> = vec![
        VECTORS_INDEX_EXTENSION,
        VECTORS_DOCUMENTS_EXTENSION,
        VECTORS_FIELDS_EXTENSION,
    ];

    static ref SEGMENT_FILE_PATTERN: Regex =
        Regex::new(r"^_[a-z0-9]+(_[a-z0-9]+)*\.[a-z0-9]+$").unwrap();
}

/// Computes the full file name from base, extension and generation.
/// Generation `-1` means the file does not exist and yields the empty
/// string; `0` yields `base.ext`; positive generations yield
/// `base_<gen-in-radix-36>.ext`.
pub fn file_name_from_generation(base: &str, ext: &str, gen: i64) -> String {
    if gen < 0 {
        String::new()
    } else if gen == 0 {
        segment_file_name(base, ext)
    } else {
        let mut name = String::with_capacity(base.len() + ext.len() + 15);
        name.push_str(base);
        name.push('_');
        name.push_str(&to_base36(gen as u64));
        if !ext.is_empty() {
            name.push('.');
            name.push_str(ext);
        }
        name
    }
}

/// `<segment>.<ext>`, or just the segment name when the extension is empty.
pub fn segment_file_name(name: &str, ext: &str) -> String {
    if ext.is_empty() {
        name.to_string()
    } else {
        let mut filename = String::with_capacity(name.len() + 1 + ext.len());
        filename.push_str(name);
        filename.push('.');
        filename.push_str(ext);
        filename
    }
}

pub fn matches_extension(filename: &str, ext: &str) -> bool {
    filename.len() > ext.len() + 1 && filename.ends_with(ext) && {
        let dot = filename.len() - ext.len() - 1;
        filename.as_bytes()[dot] == b'.'
    }
}

// Boundary after the segment name: past the first '.', or past the second
// '_' for generation-stamped files like `_3_2.del`.
fn index_of_segment_name(filename: &str) -> Option<usize> {
    if filename.is_empty() {
        return None;
    }
    let rest = &filename[1..];
    if let Some(i) = rest.find('_') {
        return Some(i + 2);
    }
    filename.find('.').map(|i| i + 1)
}

/// Strips the segment name out of the given file name; returns the name
/// unchanged if it contains neither '.' nor a second '_'.
pub fn strip_segment_name(filename: &str) -> &str {
    match index_of_segment_name(filename) {
        Some(idx) => &filename[idx - 1..],
        None => filename,
    }
}

/// The segment name prefix of an index file name.
pub fn parse_segment_name(filename: &str) -> &str {
    match index_of_segment_name(filename) {
        Some(idx) => &filename[..idx - 1],
        None => filename,
    }
}

/// True for stored-fields and term-vector files, the candidates for
/// doc-store sharing between segments.
pub fn is_doc_store_file(filename: &str) -> bool {
    STORE_INDEX_EXTENSIONS
        .iter()
        .any(|ext| matches_extension(filename, ext))
}

/// Whether a directory entry belongs to the index: segments files, the
/// generation reference, plus per-segment files (including the `.f<n>` and
/// `.s<n>` norm families).
pub fn is_index_file(filename: &str) -> bool {
    filename.starts_with(INDEX_FILE_SEGMENTS)
        || filename.starts_with(INDEX_FILE_PENDING_SEGMENTS)
        || filename == INDEX_FILE_SEGMENTS_GEN
        || filename == INDEX_FILE_DELETABLE
        || SEGMENT_FILE_PATTERN.is_match(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_generations() {
        assert_eq!(file_name_from_generation("_3", "del", -1), "");
        assert_eq!(file_name_from_generation("_3", "del", 0), "_3.del");
        assert_eq!(file_name_from_generation("_3", "del", 1), "_3_1.del");
        assert_eq!(file_name_from_generation("_3", "del", 36), "_3_10.del");
        assert_eq!(file_name_from_generation("segments", "", 37), "segments_11");
    }

    #[test]
    fn segment_file_names() {
        assert_eq!(segment_file_name("_0", "tis"), "_0.tis");
        assert_eq!(segment_file_name("_0", ""), "_0");
    }

    #[test]
    fn extension_matching() {
        assert!(matches_extension("_0.tis", "tis"));
        assert!(!matches_extension("_0.tis", "is"));
        assert!(!matches_extension("tis", "tis"));
    }

    #[test]
    fn strip_and_parse_segment_name() {
        assert_eq!(strip_segment_name("_3.del"), ".del");
        assert_eq!(strip_segment_name("_3_2.del"), "_2.del");
        assert_eq!(strip_segment_name("nodot"), "nodot");
        assert_eq!(parse_segment_name("_3.del"), "_3");
        assert_eq!(parse_segment_name("_3_2.del"), "_3");
    }

    #[test]
    fn doc_store_files() {
        assert!(is_doc_store_file("_1.fdt"));
        assert!(is_doc_store_file("_1.tvx"));
        assert!(!is_doc_store_file("_1.tis"));
        assert!(!is_doc_store_file("_1.del"));
    }

    #[test]
    fn index_file_filter() {
        assert!(is_index_file("segments_1"));
        assert!(is_index_file("segments.gen"));
        assert!(is_index_file("_0.frq"));
        assert!(is_index_file("_0_1.del"));
        assert!(is_index_file("_0.s0"));
        assert!(!is_index_file("write.lock"));
        assert!(!is_index_file("other.txt"));
    }
}
