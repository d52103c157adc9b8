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

mod checksum;
mod data_io;
mod directory;
mod fs_directory;
mod ram_directory;

pub use self::checksum::{ChecksumIndexInput, ChecksumIndexOutput};
pub use self::data_io::{DataInput, DataOutput, IndexInput, IndexOutput};
pub use self::directory::{Directory, DirectoryRc, Lock, LOCK_POLL_INTERVAL_MS};
pub use self::fs_directory::FSDirectory;
pub use self::ram_directory::RAMDirectory;

/// Default read buffer size for file-backed inputs.
pub const BUFFER_SIZE: usize = 1024;

/// Larger buffer used when streaming whole segments during merges.
pub const MERGE_BUFFER_SIZE: usize = 4096;
