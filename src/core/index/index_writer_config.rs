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

use std::sync::Arc;

use core::analysis::{Analyzer, WhitespaceAnalyzer};
use core::index::flush_control::DISABLE_AUTO_FLUSH;
use core::index::segment_merger::PayloadProcessorProvider;
use core::index::term_infos::DEFAULT_TERM_INDEX_INTERVAL;
use core::index::{
    IndexDeletionPolicy, KeepOnlyLastCommitDeletionPolicy, LogDocMergePolicy, MergePolicy,
    MergeScheduler, SegmentReaderRc, SerialMergeScheduler,
};
use error::Result;

pub const DEFAULT_RAM_BUFFER_SIZE_MB: f64 = 16.0;
pub const DEFAULT_MAX_BUFFERED_DOCS: i32 = DISABLE_AUTO_FLUSH;
pub const DEFAULT_MAX_BUFFERED_DELETE_TERMS: i32 = DISABLE_AUTO_FLUSH;
pub const DEFAULT_READER_TERMS_INDEX_DIVISOR: i32 = 1;
pub const DEFAULT_WRITE_LOCK_TIMEOUT_MS: u64 = 1000;
pub const UNLIMITED_FIELD_LENGTH: i32 = ::std::i32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    /// Truncate and overwrite whatever the directory holds.
    Create,
    /// Require an existing index.
    Append,
    /// Append when an index exists, create otherwise.
    CreateOrAppend,
}

/// Warms a freshly merged segment before it starts serving, so the first
/// search does not pay the lazy-load cost.
pub trait MergedSegmentWarmer: Send + Sync {
    fn warm(&self, reader: &SegmentReaderRc) -> Result<()>;
}

/// Everything a writer is configured with, fixed at construction. There
/// are no process-wide defaults to mutate; build a config per writer.
pub struct IndexWriterConfig {
    pub open_mode: OpenMode,
    pub max_buffered_docs: i32,
    pub max_buffered_delete_terms: i32,
    pub ram_buffer_size_mb: f64,
    pub term_index_interval: i32,
    pub reader_terms_index_divisor: i32,
    pub write_lock_timeout_ms: u64,
    pub max_field_length: i32,
    pub analyzer: Arc<dyn Analyzer>,
    pub merge_policy: Arc<dyn MergePolicy>,
    pub merge_scheduler: Arc<dyn MergeScheduler>,
    pub deletion_policy: Box<dyn IndexDeletionPolicy>,
    pub merged_segment_warmer: Option<Arc<dyn MergedSegmentWarmer>>,
    pub payload_processor_provider: Option<Arc<dyn PayloadProcessorProvider>>,
}

impl IndexWriterConfig {
    pub fn builder() -> IndexWriterConfigBuilder {
        IndexWriterConfigBuilder::new()
    }

    /// The RAM trigger in bytes, or 0 when flushing by size is disabled.
    pub fn ram_buffer_size_bytes(&self) -> i64 {
        if self.ram_buffer_size_mb <= 0.0 {
            0
        } else {
            (self.ram_buffer_size_mb * 1024.0 * 1024.0) as i64
        }
    }
}

pub struct IndexWriterConfigBuilder {
    open_mode: OpenMode,
    max_buffered_docs: i32,
    max_buffered_delete_terms: i32,
    ram_buffer_size_mb: f64,
    term_index_interval: i32,
    reader_terms_index_divisor: i32,
    write_lock_timeout_ms: u64,
    max_field_length: i32,
    analyzer: Option<Arc<dyn Analyzer>>,
    merge_policy: Option<Arc<dyn MergePolicy>>,
    merge_scheduler: Option<Arc<dyn MergeScheduler>>,
    deletion_policy: Option<Box<dyn IndexDeletionPolicy>>,
    merged_segment_warmer: Option<Arc<dyn MergedSegmentWarmer>>,
    payload_processor_provider: Option<Arc<dyn PayloadProcessorProvider>>,
}

impl Default for IndexWriterConfigBuilder {
    fn default() -> Self {
        IndexWriterConfigBuilder {
            open_mode: OpenMode::CreateOrAppend,
            max_buffered_docs: DEFAULT_MAX_BUFFERED_DOCS,
            max_buffered_delete_terms: DEFAULT_MAX_BUFFERED_DELETE_TERMS,
            ram_buffer_size_mb: DEFAULT_RAM_BUFFER_SIZE_MB,
            term_index_interval: DEFAULT_TERM_INDEX_INTERVAL,
            reader_terms_index_divisor: DEFAULT_READER_TERMS_INDEX_DIVISOR,
            write_lock_timeout_ms: DEFAULT_WRITE_LOCK_TIMEOUT_MS,
            max_field_length: UNLIMITED_FIELD_LENGTH,
            analyzer: None,
            merge_policy: None,
            merge_scheduler: None,
            deletion_policy: None,
            merged_segment_warmer: None,
            payload_processor_provider: None,
        }
    }
}

impl IndexWriterConfigBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn open_mode(mut self, mode: OpenMode) -> Self {
        self.open_mode = mode;
        self
    }

    pub fn max_buffered_docs(mut self, count: i32) -> Self {
        self.max_buffered_docs = count;
        self
    }

    pub fn max_buffered_delete_terms(mut self, count: i32) -> Self {
        self.max_buffered_delete_terms = count;
        self
    }

    pub fn ram_buffer_size_mb(mut self, mb: f64) -> Self {
        self.ram_buffer_size_mb = mb;
        self
    }

    pub fn term_index_interval(mut self, interval: i32) -> Self {
        self.term_index_interval = interval;
        self
    }

    pub fn reader_terms_index_divisor(mut self, divisor: i32) -> Self {
        self.reader_terms_index_divisor = divisor;
        self
    }

    pub fn write_lock_timeout_ms(mut self, timeout: u64) -> Self {
        self.write_lock_timeout_ms = timeout;
        self
    }

    pub fn max_field_length(mut self, length: i32) -> Self {
        self.max_field_length = length;
        self
    }

    pub fn analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn merge_policy(mut self, policy: Arc<dyn MergePolicy>) -> Self {
        self.merge_policy = Some(policy);
        self
    }

    pub fn merge_scheduler(mut self, scheduler: Arc<dyn MergeScheduler>) -> Self {
        self.merge_scheduler = Some(scheduler);
        self
    }

    pub fn deletion_policy(mut self, policy: Box<dyn IndexDeletionPolicy>) -> Self {
        self.deletion_policy = Some(policy);
        self
    }

    pub fn merged_segment_warmer(mut self, warmer: Arc<dyn MergedSegmentWarmer>) -> Self {
        self.merged_segment_warmer = Some(warmer);
        self
    }

    pub fn payload_processor_provider(
        mut self,
        provider: Arc<dyn PayloadProcessorProvider>,
    ) -> Self {
        self.payload_processor_provider = Some(provider);
        self
    }

    pub fn build(self) -> IndexWriterConfig {
        IndexWriterConfig {
            open_mode: self.open_mode,
            max_buffered_docs: self.max_buffered_docs,
            max_buffered_delete_terms: self.max_buffered_delete_terms,
            ram_buffer_size_mb: self.ram_buffer_size_mb,
            term_index_interval: self.term_index_interval,
            reader_terms_index_divisor: self.reader_terms_index_divisor,
            write_lock_timeout_ms: self.write_lock_timeout_ms,
            max_field_length: self.max_field_length,
            analyzer: self
                .analyzer
                .unwrap_or_else(|| Arc::new(WhitespaceAnalyzer)),
            merge_policy: self
                .merge_policy
                .unwrap_or_else(|| Arc::new(LogDocMergePolicy::default())),
            merge_scheduler: self
                .merge_scheduler
                .unwrap_or_else(|| Arc::new(SerialMergeScheduler)),
            deletion_policy: self
                .deletion_policy
                .unwrap_or_else(|| Box::new(KeepOnlyLastCommitDeletionPolicy)),
            merged_segment_warmer: self.merged_segment_warmer,
            payload_processor_provider: self.payload_processor_provider,
        }
    }
}
