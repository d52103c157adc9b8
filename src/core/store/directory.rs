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

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use core::store::{IndexInput, IndexOutput};
use error::{ErrorKind, Result};

pub const LOCK_POLL_INTERVAL_MS: u64 = 50;

/// A flat namespace of index files. Files are written once through
/// `create_output`, become visible on close, and are immutable afterwards
/// except for deletion and the commit-time rename of the pending segments
/// file.
pub trait Directory: Send + Sync + fmt::Display {
    fn list_all(&self) -> Result<Vec<String>>;
    fn file_exists(&self, name: &str) -> bool;
    fn file_length(&self, name: &str) -> Result<u64>;
    fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>>;
    fn open_input(&self, name: &str, buffer_size: usize) -> Result<Box<dyn IndexInput>>;
    fn delete_file(&self, name: &str) -> Result<()>;
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Force the named files to durable storage.
    fn sync(&self, names: &[String]) -> Result<()>;

    fn make_lock(&self, name: &str) -> Box<dyn Lock>;
}

pub type DirectoryRc = Arc<dyn Directory>;

/// An inter-process mutual exclusion primitive scoped to one directory.
pub trait Lock: Send {
    /// One non-blocking acquisition attempt.
    fn try_obtain(&mut self) -> Result<bool>;

    fn is_locked(&self) -> bool;

    fn release(&mut self) -> Result<()>;

    /// Poll until the lock is obtained or `timeout_ms` elapses.
    fn obtain(&mut self, timeout_ms: u64) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.try_obtain()? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!(ErrorKind::LockObtainFailed(format!(
                    "timed out after {} ms",
                    timeout_ms
                )));
            }
            thread::sleep(Duration::from_millis(LOCK_POLL_INTERVAL_MS));
        }
    }
}
