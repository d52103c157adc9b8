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

//! The compound file packages all of a segment's files into one, trading
//! file handles for a level of indirection. The reader presents itself as
//! a read-only `Directory` so every other reader opens member files
//! unchanged.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use core::codec::codec_util;
use core::store::{
    DataInput, DataOutput, Directory, DirectoryRc, IndexInput, IndexOutput, Lock,
};
use error::{ErrorKind, Result};

const CFS_CODEC: &str = "CompoundFile";
const VERSION_START: i32 = 0;
const VERSION_CURRENT: i32 = VERSION_START;

pub struct CompoundFileWriter {
    dir: DirectoryRc,
    filename: String,
    entries: Vec<String>,
    closed: bool,
}

impl CompoundFileWriter {
    pub fn new(dir: DirectoryRc, filename: &str) -> CompoundFileWriter {
        CompoundFileWriter {
            dir,
            filename: filename.to_string(),
            entries: Vec::new(),
            closed: false,
        }
    }

    pub fn add_file(&mut self, name: &str) {
        self.entries.push(name.to_string());
    }

    fn vint_len(mut v: u32) -> u64 {
        let mut len = 1;
        while v & !0x7f != 0 {
            len += 1;
            v >>= 7;
        }
        len
    }

    fn string_len(s: &str) -> u64 {
        Self::vint_len(s.len() as u32) + s.len() as u64
    }

    /// Writes the table of contents and copies every member file.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            bail!(ErrorKind::IllegalState("compound writer already closed".into()));
        }
        if self.entries.is_empty() {
            bail!(ErrorKind::IllegalState("no entries added".into()));
        }
        self.closed = true;

        let mut lengths = Vec::with_capacity(self.entries.len());
        for name in &self.entries {
            lengths.push(self.dir.file_length(name)?);
        }

        // the data section begins right after the fixed-size table
        let mut header_len = codec_util::header_length(CFS_CODEC) as u64;
        header_len += Self::vint_len(self.entries.len() as u32);
        for name in &self.entries {
            header_len += 8 + 8 + Self::string_len(name);
        }

        let mut out = self.dir.create_output(&self.filename)?;
        codec_util::write_header(out.as_mut(), CFS_CODEC, VERSION_CURRENT)?;
        out.write_vint(self.entries.len() as i32)?;
        let mut offset = header_len;
        for (i, name) in self.entries.iter().enumerate() {
            out.write_long(offset as i64)?;
            out.write_long(lengths[i] as i64)?;
            out.write_string(name)?;
            offset += lengths[i];
        }
        debug_assert_eq!(out.file_pointer(), header_len);
        for (i, name) in self.entries.iter().enumerate() {
            let mut input = self.dir.open_input(name, 4096)?;
            out.copy_bytes(input.as_mut(), lengths[i])?;
        }
        out.close()
    }
}

/// Read-only view of a compound file as a directory of its members.
pub struct CompoundFileReader {
    dir: DirectoryRc,
    filename: String,
    base: Box<dyn IndexInput>,
    entries: HashMap<String, (u64, u64)>,
}

impl CompoundFileReader {
    pub fn open(dir: DirectoryRc, filename: &str) -> Result<CompoundFileReader> {
        let mut base = dir.open_input(filename, 1024)?;
        codec_util::check_header(base.as_mut(), CFS_CODEC, VERSION_START, VERSION_CURRENT)?;
        let count = base.read_vint()?;
        if count <= 0 {
            bail!(ErrorKind::CorruptIndex(format!(
                "compound file {} has no entries",
                filename
            )));
        }
        let mut entries = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let offset = base.read_long()? as u64;
            let length = base.read_long()? as u64;
            let name = base.read_string()?;
            entries.insert(name, (offset, length));
        }
        Ok(CompoundFileReader {
            dir,
            filename: filename.to_string(),
            base,
            entries,
        })
    }

    pub fn base_directory(&self) -> &DirectoryRc {
        &self.dir
    }
}

impl fmt::Display for CompoundFileReader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CompoundFileReader({} in {})", self.filename, self.dir)
    }
}

impl Directory for CompoundFileReader {
    fn list_all(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn file_exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        match self.entries.get(name) {
            Some(&(_, length)) => Ok(length),
            None => bail!(ErrorKind::RuntimeError(format!(
                "no such file in compound: {}",
                name
            ))),
        }
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>> {
        bail!(ErrorKind::UnsupportedOperation(
            format!("compound files are read-only: {}", name).into()
        ))
    }

    fn open_input(&self, name: &str, _buffer_size: usize) -> Result<Box<dyn IndexInput>> {
        let &(offset, length) = self.entries.get(name).ok_or_else(|| {
            ErrorKind::RuntimeError(format!("no such file in compound: {}", name))
        })?;
        let mut base = self.base.clone_input()?;
        base.seek(offset)?;
        Ok(Box::new(SlicedIndexInput {
            base,
            offset,
            length,
        }))
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        bail!(ErrorKind::UnsupportedOperation(
            format!("compound files are read-only: {}", name).into()
        ))
    }

    fn rename(&self, from: &str, _to: &str) -> Result<()> {
        bail!(ErrorKind::UnsupportedOperation(
            format!("compound files are read-only: {}", from).into()
        ))
    }

    fn sync(&self, _names: &[String]) -> Result<()> {
        Ok(())
    }

    fn make_lock(&self, _name: &str) -> Box<dyn Lock> {
        Box::new(NoLock)
    }
}

struct NoLock;

impl Lock for NoLock {
    fn try_obtain(&mut self) -> Result<bool> {
        Ok(true)
    }

    fn is_locked(&self) -> bool {
        false
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

struct SlicedIndexInput {
    base: Box<dyn IndexInput>,
    offset: u64,
    length: u64,
}

impl DataInput for SlicedIndexInput {
    fn read_byte(&mut self) -> Result<u8> {
        if self.file_pointer() >= self.length {
            bail!(ErrorKind::CorruptIndex("read past EOF in compound slice".into()));
        }
        self.base.read_byte()
    }

    fn read_bytes(&mut self, b: &mut [u8]) -> Result<()> {
        if self.file_pointer() + b.len() as u64 > self.length {
            bail!(ErrorKind::CorruptIndex("read past EOF in compound slice".into()));
        }
        self.base.read_bytes(b)
    }
}

impl IndexInput for SlicedIndexInput {
    fn clone_input(&self) -> Result<Box<dyn IndexInput>> {
        Ok(Box::new(SlicedIndexInput {
            base: self.base.clone_input()?,
            offset: self.offset,
            length: self.length,
        }))
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.length {
            bail!(ErrorKind::CorruptIndex("seek past EOF in compound slice".into()));
        }
        self.base.seek(self.offset + pos)
    }

    fn file_pointer(&self) -> u64 {
        self.base.file_pointer() - self.offset
    }

    fn len(&self) -> u64 {
        self.length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::store::RAMDirectory;

    fn write_file(dir: &dyn Directory, name: &str, content: &[u8]) {
        let mut out = dir.create_output(name).unwrap();
        out.write_bytes(content).unwrap();
        out.close().unwrap();
    }

    #[test]
    fn bundle_and_reopen() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        write_file(dir.as_ref(), "_0.tis", b"terms data here");
        write_file(dir.as_ref(), "_0.frq", b"freqs");
        {
            let mut writer = CompoundFileWriter::new(Arc::clone(&dir), "_0.cfs");
            writer.add_file("_0.tis");
            writer.add_file("_0.frq");
            writer.close().unwrap();
        }

        let cfs = CompoundFileReader::open(Arc::clone(&dir), "_0.cfs").unwrap();
        assert_eq!(cfs.list_all().unwrap(), vec!["_0.frq", "_0.tis"]);
        assert!(cfs.file_exists("_0.tis"));
        assert_eq!(cfs.file_length("_0.frq").unwrap(), 5);

        let mut input = cfs.open_input("_0.tis", 1024).unwrap();
        let mut buf = vec![0u8; 15];
        input.read_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"terms data here");
        assert!(input.read_byte().is_err());

        // sliced cursors seek within their member only
        let mut input = cfs.open_input("_0.frq", 1024).unwrap();
        input.seek(2).unwrap();
        assert_eq!(input.read_byte().unwrap(), b'e');
        assert_eq!(input.file_pointer(), 3);
        assert_eq!(input.len(), 5);
    }

    #[test]
    fn writes_into_compound_are_rejected() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        write_file(dir.as_ref(), "_0.tis", b"x");
        {
            let mut writer = CompoundFileWriter::new(Arc::clone(&dir), "_0.cfs");
            writer.add_file("_0.tis");
            writer.close().unwrap();
        }
        let cfs = CompoundFileReader::open(dir, "_0.cfs").unwrap();
        assert!(cfs.create_output("x").is_err());
        assert!(cfs.delete_file("_0.tis").is_err());
    }
}
