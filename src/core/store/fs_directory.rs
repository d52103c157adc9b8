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
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use core::store::{DataInput, DataOutput, Directory, IndexInput, IndexOutput, Lock};
use error::{ErrorKind, Result};

/// A directory of plain files. Reads are buffered; `sync` issues fsync so a
/// commit point survives process and OS crashes.
pub struct FSDirectory {
    path: PathBuf,
}

impl FSDirectory {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<FSDirectory> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            fs::create_dir_all(&path)?;
        }
        if !path.is_dir() {
            bail!(ErrorKind::IllegalArgument(format!(
                "not a directory: {}",
                path.display()
            )));
        }
        Ok(FSDirectory { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    fn sync_dir(&self) {
        // directory metadata fsync; not supported everywhere
        if let Ok(dir) = File::open(&self.path) {
            if let Err(e) = dir.sync_all() {
                warn!("directory fsync failed for {}: {}", self.path.display(), e);
            }
        }
    }
}

impl fmt::Display for FSDirectory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FSDirectory({})", self.path.display())
    }
}

impl Directory for FSDirectory {
    fn list_all(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Ok(name) = entry.file_name().into_string() {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn file_exists(&self, name: &str) -> bool {
        self.resolve(name).is_file()
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        Ok(fs::metadata(self.resolve(name))?.len())
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>> {
        let path = self.resolve(name);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Box::new(FSIndexOutput {
            writer: BufWriter::new(file),
            written: 0,
            closed: false,
        }))
    }

    fn open_input(&self, name: &str, buffer_size: usize) -> Result<Box<dyn IndexInput>> {
        let path = self.resolve(name);
        let file = File::open(&path)?;
        let length = file.metadata()?.len();
        Ok(Box::new(FSIndexInput {
            path,
            file,
            length,
            pos: 0,
            buffer: Vec::with_capacity(buffer_size),
            buffer_start: 0,
            buffer_size,
        }))
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        fs::remove_file(self.resolve(name))?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.resolve(from), self.resolve(to))?;
        self.sync_dir();
        Ok(())
    }

    fn sync(&self, names: &[String]) -> Result<()> {
        for name in names {
            let file = File::open(self.resolve(name))?;
            file.sync_all()?;
        }
        self.sync_dir();
        Ok(())
    }

    fn make_lock(&self, name: &str) -> Box<dyn Lock> {
        Box::new(SimpleFSLock {
            path: self.resolve(name),
            held: false,
        })
    }
}

struct FSIndexOutput {
    writer: BufWriter<File>,
    written: u64,
    closed: bool,
}

impl DataOutput for FSIndexOutput {
    fn write_byte(&mut self, b: u8) -> Result<()> {
        self.writer.write_all(&[b])?;
        self.written += 1;
        Ok(())
    }

    fn write_bytes(&mut self, b: &[u8]) -> Result<()> {
        self.writer.write_all(b)?;
        self.written += b.len() as u64;
        Ok(())
    }
}

impl IndexOutput for FSIndexOutput {
    fn file_pointer(&self) -> u64 {
        self.written
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.writer.flush()?;
        }
        Ok(())
    }
}

struct FSIndexInput {
    path: PathBuf,
    file: File,
    length: u64,
    // logical position of the next read_byte
    pos: u64,
    buffer: Vec<u8>,
    buffer_start: u64,
    buffer_size: usize,
}

impl FSIndexInput {
    fn refill(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.pos))?;
        let want = ::std::cmp::min(self.buffer_size as u64, self.length - self.pos) as usize;
        if want == 0 {
            bail!(ErrorKind::CorruptIndex(format!(
                "read past EOF: {}",
                self.path.display()
            )));
        }
        self.buffer.resize(want, 0);
        self.file.read_exact(&mut self.buffer)?;
        self.buffer_start = self.pos;
        Ok(())
    }

    fn buffered(&self) -> Option<u8> {
        if self.pos >= self.buffer_start && self.pos < self.buffer_start + self.buffer.len() as u64
        {
            Some(self.buffer[(self.pos - self.buffer_start) as usize])
        } else {
            None
        }
    }
}

impl DataInput for FSIndexInput {
    fn read_byte(&mut self) -> Result<u8> {
        if self.buffered().is_none() {
            self.refill()?;
        }
        // refill either succeeded for this position or bailed
        let b = self.buffered().expect("refill populated the buffer");
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, b: &mut [u8]) -> Result<()> {
        if self.pos + b.len() as u64 > self.length {
            bail!(ErrorKind::CorruptIndex(format!(
                "read past EOF: {}",
                self.path.display()
            )));
        }
        // serve large reads directly, small ones through the buffer
        if b.len() >= self.buffer_size {
            self.file.seek(SeekFrom::Start(self.pos))?;
            self.file.read_exact(b)?;
            self.pos += b.len() as u64;
        } else {
            for slot in b.iter_mut() {
                *slot = self.read_byte()?;
            }
        }
        Ok(())
    }
}

impl IndexInput for FSIndexInput {
    fn clone_input(&self) -> Result<Box<dyn IndexInput>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(FSIndexInput {
            path: self.path.clone(),
            file,
            length: self.length,
            pos: self.pos,
            buffer: Vec::with_capacity(self.buffer_size),
            buffer_start: 0,
            buffer_size: self.buffer_size,
        }))
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.length {
            bail!(ErrorKind::CorruptIndex(format!(
                "seek past EOF: {}",
                self.path.display()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    fn file_pointer(&self) -> u64 {
        self.pos
    }

    fn len(&self) -> u64 {
        self.length
    }
}

/// Write lock held by creating the lock file exclusively; stale locks are
/// left for the operator (or `IndexWriter::unlock`) to clean up.
struct SimpleFSLock {
    path: PathBuf,
    held: bool,
}

impl Lock for SimpleFSLock {
    fn try_obtain(&mut self) -> Result<bool> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => {
                self.held = true;
                Ok(true)
            }
            Err(ref e) if e.kind() == ::std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn is_locked(&self) -> bool {
        self.path.exists()
    }

    fn release(&mut self) -> Result<()> {
        if self.held {
            self.held = false;
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl Drop for SimpleFSLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    extern crate tempfile;

    use super::*;
    use core::store::BUFFER_SIZE;

    #[test]
    fn write_sync_read() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FSDirectory::open(tmp.path()).unwrap();
        {
            let mut out = dir.create_output("data.bin").unwrap();
            for i in 0..5000i32 {
                out.write_vint(i).unwrap();
            }
            out.close().unwrap();
        }
        dir.sync(&["data.bin".to_string()]).unwrap();
        let mut input = dir.open_input("data.bin", BUFFER_SIZE).unwrap();
        for i in 0..5000i32 {
            assert_eq!(input.read_vint().unwrap(), i);
        }
        assert_eq!(input.file_pointer(), input.len());
    }

    #[test]
    fn lock_file_excludes() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FSDirectory::open(tmp.path()).unwrap();
        let mut a = dir.make_lock("write.lock");
        let mut b = dir.make_lock("write.lock");
        assert!(a.try_obtain().unwrap());
        assert!(!b.try_obtain().unwrap());
        assert!(b.obtain(10).is_err());
        a.release().unwrap();
        assert!(b.try_obtain().unwrap());
        b.release().unwrap();
    }

    #[test]
    fn seek_and_clone() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FSDirectory::open(tmp.path()).unwrap();
        {
            let mut out = dir.create_output("f").unwrap();
            out.write_bytes(&(0..200).map(|i| i as u8).collect::<Vec<u8>>())
                .unwrap();
            out.close().unwrap();
        }
        let mut input = dir.open_input("f", 16).unwrap();
        input.seek(100).unwrap();
        let clone = input.clone_input().unwrap();
        assert_eq!(input.read_byte().unwrap(), 100);
        let mut clone = clone;
        assert_eq!(clone.read_byte().unwrap(), 100);
    }
}
