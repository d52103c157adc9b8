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

//! Stored fields. `.fdx` is a flat array of longs, one per document,
//! pointing at the document's record in `.fdt`; records are self-contained
//! so the merger can relocate them byte-for-byte.

use std::sync::{Arc, Mutex};

use core::codec::codec_util;
use core::doc::{Document, Field, Index, Store};
use core::index::{segment_file_name, FieldInfos, FIELDS_EXTENSION, FIELDS_INDEX_EXTENSION};
use core::store::{DataInput, DataOutput, Directory, IndexInput, IndexOutput};
use core::util::DocId;
use error::{ErrorKind, Result};

const FDX_CODEC: &str = "StoredFieldsIndex";
const FDT_CODEC: &str = "StoredFieldsData";
const VERSION_START: i32 = 0;
const VERSION_CURRENT: i32 = VERSION_START;

const FIELD_IS_TOKENIZED: u8 = 0x1;

pub struct FieldsWriter {
    fdx: Box<dyn IndexOutput>,
    fdt: Box<dyn IndexOutput>,
    index_start: u64,
    doc_count: i32,
}

impl FieldsWriter {
    pub fn new(dir: &dyn Directory, segment: &str) -> Result<FieldsWriter> {
        let mut fdx = dir.create_output(&segment_file_name(segment, FIELDS_INDEX_EXTENSION))?;
        let mut fdt = dir.create_output(&segment_file_name(segment, FIELDS_EXTENSION))?;
        codec_util::write_header(fdx.as_mut(), FDX_CODEC, VERSION_CURRENT)?;
        codec_util::write_header(fdt.as_mut(), FDT_CODEC, VERSION_CURRENT)?;
        let index_start = fdx.file_pointer();
        Ok(FieldsWriter {
            fdx,
            fdt,
            index_start,
            doc_count: 0,
        })
    }

    pub fn doc_count(&self) -> i32 {
        self.doc_count
    }

    pub fn add_document(&mut self, doc: &Document, field_infos: &FieldInfos) -> Result<()> {
        self.fdx.write_long(self.fdt.file_pointer() as i64)?;
        let stored: Vec<&Field> = doc.fields().iter().filter(|f| f.is_stored()).collect();
        self.fdt.write_vint(stored.len() as i32)?;
        for field in stored {
            let number = field_infos.field_number(field.name()).ok_or_else(|| {
                ErrorKind::IllegalState(format!("unknown stored field: {}", field.name()))
            })?;
            self.fdt.write_vint(number)?;
            let mut bits = 0u8;
            if field.is_tokenized() {
                bits |= FIELD_IS_TOKENIZED;
            }
            self.fdt.write_byte(bits)?;
            self.fdt.write_string(field.value())?;
        }
        self.doc_count += 1;
        Ok(())
    }

    /// Bulk-appends documents already encoded by an identical writer.
    /// `lengths` holds each record's byte size; `input` must be positioned
    /// at the first record.
    pub fn add_raw_documents(
        &mut self,
        input: &mut dyn IndexInput,
        lengths: &[u64],
    ) -> Result<()> {
        let mut total = 0u64;
        for &len in lengths {
            self.fdx.write_long(self.fdt.file_pointer() as i64 + total as i64)?;
            total += len;
        }
        self.fdt.copy_bytes(input, total)?;
        self.doc_count += lengths.len() as i32;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.fdx.close()?;
        self.fdt.close()
    }
}

pub struct FieldsReader {
    field_infos: Arc<FieldInfos>,
    // master cursors; per-call clones keep `doc` reentrant
    fdx: Box<dyn IndexInput>,
    fdt: Box<dyn IndexInput>,
    index_start: u64,
    data_length: u64,
    size: i32,
    doc_store_offset: i32,
    streams: Mutex<()>,
}

impl FieldsReader {
    pub fn new(
        dir: &dyn Directory,
        segment: &str,
        field_infos: Arc<FieldInfos>,
        buffer_size: usize,
        doc_store_offset: i32,
        size: i32,
    ) -> Result<FieldsReader> {
        let mut fdx = dir.open_input(&segment_file_name(segment, FIELDS_INDEX_EXTENSION), buffer_size)?;
        let mut fdt = dir.open_input(&segment_file_name(segment, FIELDS_EXTENSION), buffer_size)?;
        codec_util::check_header(fdx.as_mut(), FDX_CODEC, VERSION_START, VERSION_CURRENT)?;
        codec_util::check_header(fdt.as_mut(), FDT_CODEC, VERSION_START, VERSION_CURRENT)?;
        let index_start = fdx.file_pointer();
        let data_length = fdt.len();
        let total = ((fdx.len() - index_start) / 8) as i32;
        let size = if size >= 0 { size } else { total };
        let offset = if doc_store_offset >= 0 { doc_store_offset } else { 0 };
        if offset + size > total {
            bail!(ErrorKind::CorruptIndex(format!(
                "stored fields of {} too short: offset={} size={} total={}",
                segment, offset, size, total
            )));
        }
        Ok(FieldsReader {
            field_infos,
            fdx,
            fdt,
            index_start,
            data_length,
            size,
            doc_store_offset: offset,
            streams: Mutex::new(()),
        })
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    fn pointer_at(&self, fdx: &mut dyn IndexInput, doc: DocId) -> Result<u64> {
        fdx.seek(self.index_start + (self.doc_store_offset as u64 + doc as u64) * 8)?;
        Ok(fdx.read_long()? as u64)
    }

    pub fn doc(&self, n: DocId) -> Result<Document> {
        if n < 0 || n >= self.size {
            bail!(ErrorKind::IllegalArgument(format!(
                "doc {} out of bounds [0, {})",
                n, self.size
            )));
        }
        let _guard = self.streams.lock()?;
        let mut fdx = self.fdx.clone_input()?;
        let mut fdt = self.fdt.clone_input()?;
        let pointer = self.pointer_at(fdx.as_mut(), n)?;
        fdt.seek(pointer)?;
        let field_count = fdt.read_vint()?;
        let mut doc = Document::new();
        for _ in 0..field_count {
            let number = fdt.read_vint()?;
            let bits = fdt.read_byte()?;
            let value = fdt.read_string()?;
            let name = self
                .field_infos
                .by_number(number)
                .map(|f| f.name.as_str())
                .unwrap_or("");
            let index = if bits & FIELD_IS_TOKENIZED != 0 {
                Index::Analyzed
            } else {
                Index::No
            };
            doc.add(Field::new(name, &value, Store::Yes, index));
        }
        Ok(doc)
    }

    /// For bulk merging: fills `lengths` with the record sizes of
    /// `lengths.len()` documents starting at `start_doc` and returns a
    /// `.fdt` cursor positioned on the first record.
    pub fn raw_docs(&self, lengths: &mut [u64], start_doc: DocId) -> Result<Box<dyn IndexInput>> {
        let _guard = self.streams.lock()?;
        let mut fdx = self.fdx.clone_input()?;
        let first = self.pointer_at(fdx.as_mut(), start_doc)?;
        let mut last = first;
        let total_entries = (self.fdx.len() - self.index_start) / 8;
        for (i, slot) in lengths.iter_mut().enumerate() {
            let next_doc = self.doc_store_offset as u64 + start_doc as u64 + i as u64 + 1;
            let next = if next_doc < total_entries {
                fdx.read_long()? as u64
            } else {
                self.data_length
            };
            *slot = next - last;
            last = next;
        }
        let mut fdt = self.fdt.clone_input()?;
        fdt.seek(first)?;
        Ok(fdt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::store::{RAMDirectory, BUFFER_SIZE};

    fn infos() -> Arc<FieldInfos> {
        let mut fi = FieldInfos::new();
        fi.add_simple("title", true);
        fi.add_simple("body", true);
        Arc::new(fi)
    }

    fn doc(title: &str, body: &str) -> Document {
        let mut d = Document::new();
        d.add(Field::new("title", title, Store::Yes, Index::Analyzed));
        d.add(Field::new("body", body, Store::Yes, Index::Analyzed));
        d
    }

    #[test]
    fn write_read_documents() {
        let dir = RAMDirectory::new();
        let fi = infos();
        let mut writer = FieldsWriter::new(&dir, "_0").unwrap();
        writer.add_document(&doc("one", "first body"), &fi).unwrap();
        writer.add_document(&doc("two", "second body"), &fi).unwrap();
        writer.close().unwrap();

        let reader =
            FieldsReader::new(&dir, "_0", Arc::clone(&fi), BUFFER_SIZE, -1, -1).unwrap();
        assert_eq!(reader.size(), 2);
        let d0 = reader.doc(0).unwrap();
        assert_eq!(d0.get("title"), Some("one"));
        assert_eq!(d0.get("body"), Some("first body"));
        let d1 = reader.doc(1).unwrap();
        assert_eq!(d1.get("title"), Some("two"));
        assert!(reader.doc(2).is_err());
    }

    #[test]
    fn raw_copy_preserves_documents() {
        let dir = RAMDirectory::new();
        let fi = infos();
        let mut writer = FieldsWriter::new(&dir, "_0").unwrap();
        for i in 0..5 {
            writer
                .add_document(&doc(&format!("t{}", i), &format!("b{}", i)), &fi)
                .unwrap();
        }
        writer.close().unwrap();

        let reader = FieldsReader::new(&dir, "_0", Arc::clone(&fi), BUFFER_SIZE, -1, -1).unwrap();
        let mut lengths = vec![0u64; 3];
        let mut raw = reader.raw_docs(&mut lengths, 1).unwrap();

        let mut out = FieldsWriter::new(&dir, "_1").unwrap();
        out.add_raw_documents(raw.as_mut(), &lengths).unwrap();
        out.close().unwrap();

        let copied = FieldsReader::new(&dir, "_1", fi, BUFFER_SIZE, -1, -1).unwrap();
        assert_eq!(copied.size(), 3);
        assert_eq!(copied.doc(0).unwrap().get("title"), Some("t1"));
        assert_eq!(copied.doc(2).unwrap().get("title"), Some("t3"));
    }

    #[test]
    fn doc_store_offset_views_a_slice() {
        let dir = RAMDirectory::new();
        let fi = infos();
        let mut writer = FieldsWriter::new(&dir, "_shared").unwrap();
        for i in 0..6 {
            writer
                .add_document(&doc(&format!("t{}", i), "x"), &fi)
                .unwrap();
        }
        writer.close().unwrap();

        let reader =
            FieldsReader::new(&dir, "_shared", fi, BUFFER_SIZE, 2, 3).unwrap();
        assert_eq!(reader.size(), 3);
        assert_eq!(reader.doc(0).unwrap().get("title"), Some("t2"));
        assert_eq!(reader.doc(2).unwrap().get("title"), Some("t4"));
    }
}
