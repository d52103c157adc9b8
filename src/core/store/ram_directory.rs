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

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use core::store::{DataInput, DataOutput, Directory, IndexInput, IndexOutput, Lock};
use error::{ErrorKind, Result};

/// A heap-resident directory. Files become immutable `Arc<Vec<u8>>` blocks
/// when their output closes, so inputs are cheap cursor clones. Used by
/// tests and as the source side of cross-directory segment copies.
pub struct RAMDirectory {
    files: Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>,
    locks: Arc<Mutex<HashSet<String>>>,
}

impl Default for RAMDirectory {
    fn default() -> Self {
        RAMDirectory {
            files: Arc::new(RwLock::new(HashMap::new())),
            locks: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl RAMDirectory {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.files.read().unwrap().values().map(|f| f.len()).sum()
    }
}

impl fmt::Display for RAMDirectory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RAMDirectory@{:p}", self.files)
    }
}

impl Directory for RAMDirectory {
    fn list_all(&self) -> Result<Vec<String>> {
        let files = self.files.read()?;
        let mut names: Vec<String> = files.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.read().unwrap().contains_key(name)
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        let files = self.files.read()?;
        match files.get(name) {
            Some(data) => Ok(data.len() as u64),
            None => bail!(ErrorKind::RuntimeError(format!("no such file: {}", name))),
        }
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>> {
        Ok(Box::new(RAMOutputStream {
            name: name.to_string(),
            files: Arc::clone(&self.files),
            buffer: Vec::new(),
            closed: false,
        }))
    }

    fn open_input(&self, name: &str, _buffer_size: usize) -> Result<Box<dyn IndexInput>> {
        let files = self.files.read()?;
        match files.get(name) {
            Some(data) => Ok(Box::new(RAMInputStream {
                data: Arc::clone(data),
                pos: 0,
            })),
            None => bail!(ErrorKind::RuntimeError(format!("no such file: {}", name))),
        }
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        let mut files = self.files.write()?;
        if files.remove(name).is_none() {
            bail!(ErrorKind::RuntimeError(format!("no such file: {}", name)));
        }
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut files = self.files.write()?;
        match files.remove(from) {
            Some(data) => {
                files.insert(to.to_string(), data);
                Ok(())
            }
            None => bail!(ErrorKind::RuntimeError(format!("no such file: {}", from))),
        }
    }

    fn sync(&self, _names: &[String]) -> Result<()> {
        Ok(())
    }

    fn make_lock(&self, name: &str) -> Box<dyn Lock> {
        Box::new(RAMLock {
            name: name.to_string(),
            locks: Arc::clone(&self.locks),
            held: false,
        })
    }
}

struct RAMOutputStream {
    name: String,
    files: Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>,
    buffer: Vec<u8>,
    closed: bool,
}

impl RAMOutputStream {
    fn install(&mut self) -> Result<()> {
        let data = ::std::mem::replace(&mut self.buffer, Vec::new());
        let mut files = self.files.write()?;
        files.insert(self.name.clone(), Arc::new(data));
        Ok(())
    }
}

impl DataOutput for RAMOutputStream {
    fn write_byte(&mut self, b: u8) -> Result<()> {
        self.buffer.push(b);
        Ok(())
    }

    fn write_bytes(&mut self, b: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(b);
        Ok(())
    }
}

impl IndexOutput for RAMOutputStream {
    fn file_pointer(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.install()?;
        }
        Ok(())
    }
}

impl Drop for RAMOutputStream {
    fn drop(&mut self) {
        if !self.closed {
            // best effort: abandoned outputs still leave the bytes behind
            let _ = self.install();
        }
    }
}

struct RAMInputStream {
    data: Arc<Vec<u8>>,
    pos: usize,
}

impl DataInput for RAMInputStream {
    fn read_byte(&mut self) -> Result<u8> {
        if self.pos >= self.data.len() {
            bail!(ErrorKind::CorruptIndex("read past EOF".into()));
        }
        let b = self.data[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, b: &mut [u8]) -> Result<()> {
        if self.pos + b.len() > self.data.len() {
            bail!(ErrorKind::CorruptIndex("read past EOF".into()));
        }
        b.copy_from_slice(&self.data[self.pos..self.pos + b.len()]);
        self.pos += b.len();
        Ok(())
    }
}

impl IndexInput for RAMInputStream {
    fn clone_input(&self) -> Result<Box<dyn IndexInput>> {
        Ok(Box::new(RAMInputStream {
            data: Arc::clone(&self.data),
            pos: self.pos,
        }))
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.data.len() as u64 {
            bail!(ErrorKind::CorruptIndex("seek past EOF".into()));
        }
        self.pos = pos as usize;
        Ok(())
    }

    fn file_pointer(&self) -> u64 {
        self.pos as u64
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

struct RAMLock {
    name: String,
    locks: Arc<Mutex<HashSet<String>>>,
    held: bool,
}

impl Lock for RAMLock {
    fn try_obtain(&mut self) -> Result<bool> {
        let mut locks = self.locks.lock()?;
        if locks.contains(&self.name) {
            Ok(false)
        } else {
            locks.insert(self.name.clone());
            self.held = true;
            Ok(true)
        }
    }

    fn is_locked(&self) -> bool {
        self.locks.lock().unwrap().contains(&self.name)
    }

    fn release(&mut self) -> Result<()> {
        if self.held {
            let mut locks = self.locks.lock()?;
            locks.remove(&self.name);
            self.held = false;
        }
        Ok(())
    }
}

impl Drop for RAMLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::store::BUFFER_SIZE;

    #[test]
    fn write_then_read() {
        let dir = RAMDirectory::new();
        {
            let mut out = dir.create_output("test.bin").unwrap();
            out.write_vint(1234).unwrap();
            out.write_string("hello").unwrap();
            out.close().unwrap();
        }
        assert!(dir.file_exists("test.bin"));
        let mut input = dir.open_input("test.bin", BUFFER_SIZE).unwrap();
        assert_eq!(input.read_vint().unwrap(), 1234);
        assert_eq!(input.read_string().unwrap(), "hello");
    }

    #[test]
    fn rename_replaces_target_name() {
        let dir = RAMDirectory::new();
        let mut out = dir.create_output("pending_segments_1").unwrap();
        out.write_byte(7).unwrap();
        out.close().unwrap();
        dir.rename("pending_segments_1", "segments_1").unwrap();
        assert!(!dir.file_exists("pending_segments_1"));
        assert!(dir.file_exists("segments_1"));
    }

    #[test]
    fn lock_excludes_second_holder() {
        let dir = RAMDirectory::new();
        let mut l1 = dir.make_lock("write.lock");
        let mut l2 = dir.make_lock("write.lock");
        assert!(l1.try_obtain().unwrap());
        assert!(!l2.try_obtain().unwrap());
        l1.release().unwrap();
        assert!(l2.try_obtain().unwrap());
        l2.release().unwrap();
    }

    #[test]
    fn clones_are_independent_cursors() {
        let dir = RAMDirectory::new();
        let mut out = dir.create_output("f").unwrap();
        for i in 0..100 {
            out.write_byte(i as u8).unwrap();
        }
        out.close().unwrap();
        let mut a = dir.open_input("f", BUFFER_SIZE).unwrap();
        a.seek(50).unwrap();
        let mut b = a.clone_input().unwrap();
        assert_eq!(b.file_pointer(), 50);
        assert_eq!(a.read_byte().unwrap(), 50);
        assert_eq!(b.read_byte().unwrap(), 50);
        b.seek(0).unwrap();
        assert_eq!(b.read_byte().unwrap(), 0);
        assert_eq!(a.read_byte().unwrap(), 51);
    }
}
