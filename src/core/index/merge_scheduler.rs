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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use core::index::IndexWriter;
use error::Result;

/// Executes the merges a writer has registered. The writer hands over
/// after registering plans; the scheduler decides on which threads the
/// work runs.
pub trait MergeScheduler: Send + Sync {
    fn merge(&self, writer: &IndexWriter) -> Result<()>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Runs every pending merge on the calling thread, in registration
/// order. The default: deterministic and easy to reason about.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialMergeScheduler;

impl MergeScheduler for SerialMergeScheduler {
    fn merge(&self, writer: &IndexWriter) -> Result<()> {
        while let Some(merge) = writer.next_merge()? {
            writer.merge(&merge)?;
        }
        Ok(())
    }
}

/// Runs merges on background threads, a bounded number at a time. Each
/// worker drains pending merges until none remain; failures land on the
/// merge itself (and in the writer's exception list) rather than on any
/// caller.
pub struct ConcurrentMergeScheduler {
    max_thread_count: usize,
    active: Arc<AtomicUsize>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for ConcurrentMergeScheduler {
    fn default() -> Self {
        // half the cores, capped: merges are IO heavy and more threads
        // mostly fight over the same disk
        let threads = (num_cpus::get() / 2).max(1).min(3);
        ConcurrentMergeScheduler::new(threads)
    }
}

impl ConcurrentMergeScheduler {
    pub fn new(max_thread_count: usize) -> ConcurrentMergeScheduler {
        ConcurrentMergeScheduler {
            max_thread_count: max_thread_count.max(1),
            active: Arc::new(AtomicUsize::new(0)),
            handles: Mutex::new(Vec::new()),
        }
    }

    fn reap_finished(handles: &mut Vec<JoinHandle<()>>) {
        let mut i = 0;
        while i < handles.len() {
            if handles[i].is_finished() {
                let handle = handles.swap_remove(i);
                if handle.join().is_err() {
                    error!(target: "IW", "merge thread panicked");
                }
            } else {
                i += 1;
            }
        }
    }
}

impl MergeScheduler for ConcurrentMergeScheduler {
    fn merge(&self, writer: &IndexWriter) -> Result<()> {
        let mut handles = self.handles.lock()?;
        Self::reap_finished(&mut handles);
        while self.active.load(Ordering::Acquire) < self.max_thread_count
            && writer.has_pending_merges()
        {
            self.active.fetch_add(1, Ordering::AcqRel);
            let writer = writer.clone();
            let active = Arc::clone(&self.active);
            let handle = thread::Builder::new()
                .name("merge-worker".to_string())
                .spawn(move || {
                    loop {
                        let merge = match writer.next_merge() {
                            Ok(Some(merge)) => merge,
                            Ok(None) => break,
                            Err(e) => {
                                error!(target: "IW", "merge worker could not poll: {}", e);
                                break;
                            }
                        };
                        if let Err(e) = writer.merge(&merge) {
                            // recorded on the merge; optimize() surfaces it
                            warn!(target: "IW", "background merge hit exception: {}", e);
                        }
                    }
                    active.fetch_sub(1, Ordering::AcqRel);
                })?;
            handles.push(handle);
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut handles = self.handles.lock()?;
        for handle in handles.drain(..) {
            if handle.join().is_err() {
                error!(target: "IW", "merge thread panicked");
            }
        }
        Ok(())
    }
}
