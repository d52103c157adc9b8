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

//! Term vectors. `.tvx` holds two longs per document (its `.tvd` and
//! `.tvf` positions); `.tvd` lists the vectorized fields of the document
//! with relative `.tvf` offsets; `.tvf` holds one record per field with
//! prefix-coded terms, frequencies and optional positions/offsets. All
//! offsets inside `.tvd` are document-relative, so records relocate
//! byte-for-byte during merges.

use std::sync::{Arc, Mutex};

use core::codec::codec_util;
use core::index::{
    segment_file_name, FieldInfos, VECTORS_DOCUMENTS_EXTENSION, VECTORS_FIELDS_EXTENSION,
    VECTORS_INDEX_EXTENSION,
};
use core::store::{DataInput, DataOutput, Directory, IndexInput, IndexOutput};
use core::util::DocId;
use error::{ErrorKind, Result};

const TVX_CODEC: &str = "VectorsIndex";
const TVD_CODEC: &str = "VectorsDocs";
const TVF_CODEC: &str = "VectorsFields";
const VERSION_START: i32 = 0;
const VERSION_CURRENT: i32 = VERSION_START;

const STORE_POSITIONS: u8 = 0x1;
const STORE_OFFSETS: u8 = 0x2;

/// One field's term vector: parallel term/frequency arrays with optional
/// per-occurrence positions and offsets.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TermFreqVector {
    pub field: String,
    pub terms: Vec<String>,
    pub freqs: Vec<i32>,
    pub positions: Option<Vec<Vec<i32>>>,
    pub offsets: Option<Vec<Vec<(i32, i32)>>>,
}

impl TermFreqVector {
    pub fn size(&self) -> usize {
        self.terms.len()
    }
}

pub struct TermVectorsWriter {
    tvx: Box<dyn IndexOutput>,
    tvd: Box<dyn IndexOutput>,
    tvf: Box<dyn IndexOutput>,
    doc_count: i32,
}

impl TermVectorsWriter {
    pub fn new(dir: &dyn Directory, segment: &str) -> Result<TermVectorsWriter> {
        let mut tvx = dir.create_output(&segment_file_name(segment, VECTORS_INDEX_EXTENSION))?;
        let mut tvd = dir.create_output(&segment_file_name(segment, VECTORS_DOCUMENTS_EXTENSION))?;
        let mut tvf = dir.create_output(&segment_file_name(segment, VECTORS_FIELDS_EXTENSION))?;
        codec_util::write_header(tvx.as_mut(), TVX_CODEC, VERSION_CURRENT)?;
        codec_util::write_header(tvd.as_mut(), TVD_CODEC, VERSION_CURRENT)?;
        codec_util::write_header(tvf.as_mut(), TVF_CODEC, VERSION_CURRENT)?;
        Ok(TermVectorsWriter {
            tvx,
            tvd,
            tvf,
            doc_count: 0,
        })
    }

    pub fn doc_count(&self) -> i32 {
        self.doc_count
    }

    /// Writes one document's vectors; `vectors` may be empty.
    pub fn add_document(
        &mut self,
        vectors: &[TermFreqVector],
        field_infos: &FieldInfos,
    ) -> Result<()> {
        self.tvx.write_long(self.tvd.file_pointer() as i64)?;
        let tvf_start = self.tvf.file_pointer();
        self.tvx.write_long(tvf_start as i64)?;

        self.tvd.write_vint(vectors.len() as i32)?;
        let mut last_field = 0i32;
        let mut offsets_in_doc = Vec::with_capacity(vectors.len());
        for vector in vectors {
            let number = field_infos.field_number(&vector.field).ok_or_else(|| {
                ErrorKind::IllegalState(format!("unknown vector field: {}", vector.field))
            })?;
            self.tvd.write_vint(number - last_field)?;
            last_field = number;
            offsets_in_doc.push(self.tvf.file_pointer() - tvf_start);
            self.write_field(vector)?;
        }
        // document-relative tvf offsets keep records relocatable
        for offset in offsets_in_doc {
            self.tvd.write_vlong(offset as i64)?;
        }
        self.doc_count += 1;
        Ok(())
    }

    fn write_field(&mut self, vector: &TermFreqVector) -> Result<()> {
        self.tvf.write_vint(vector.terms.len() as i32)?;
        let mut bits = 0u8;
        if vector.positions.is_some() {
            bits |= STORE_POSITIONS;
        }
        if vector.offsets.is_some() {
            bits |= STORE_OFFSETS;
        }
        self.tvf.write_byte(bits)?;
        let mut last_term = String::new();
        for (i, term) in vector.terms.iter().enumerate() {
            let prefix = common_prefix(&last_term, term);
            self.tvf.write_vint(prefix as i32)?;
            self.tvf.write_string(&term[prefix..])?;
            self.tvf.write_vint(vector.freqs[i])?;
            if let Some(ref positions) = vector.positions {
                let mut last = 0i32;
                for &pos in &positions[i] {
                    self.tvf.write_vint(pos - last)?;
                    last = pos;
                }
            }
            if let Some(ref offsets) = vector.offsets {
                let mut last_end = 0i32;
                for &(start, end) in &offsets[i] {
                    self.tvf.write_vint(start - last_end)?;
                    self.tvf.write_vint(end - start)?;
                    last_end = end;
                }
            }
            last_term.clear();
            last_term.push_str(term);
        }
        Ok(())
    }

    /// Bulk-appends documents encoded by an identical writer. The inputs
    /// must be positioned on the first copied record of their stream.
    pub fn add_raw_documents(
        &mut self,
        tvd_input: &mut dyn IndexInput,
        tvf_input: &mut dyn IndexInput,
        tvd_lengths: &[u64],
        tvf_lengths: &[u64],
    ) -> Result<()> {
        debug_assert_eq!(tvd_lengths.len(), tvf_lengths.len());
        let mut tvd_offset = 0u64;
        let mut tvf_offset = 0u64;
        for i in 0..tvd_lengths.len() {
            self.tvx
                .write_long(self.tvd.file_pointer() as i64 + tvd_offset as i64)?;
            self.tvx
                .write_long(self.tvf.file_pointer() as i64 + tvf_offset as i64)?;
            tvd_offset += tvd_lengths[i];
            tvf_offset += tvf_lengths[i];
        }
        self.tvd.copy_bytes(tvd_input, tvd_offset)?;
        self.tvf.copy_bytes(tvf_input, tvf_offset)?;
        self.doc_count += tvd_lengths.len() as i32;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.tvx.close()?;
        self.tvd.close()?;
        self.tvf.close()
    }
}

pub struct TermVectorsReader {
    field_infos: Arc<FieldInfos>,
    tvx: Box<dyn IndexInput>,
    tvd: Box<dyn IndexInput>,
    tvf: Box<dyn IndexInput>,
    index_start: u64,
    tvd_length: u64,
    tvf_length: u64,
    size: i32,
    doc_store_offset: i32,
    streams: Mutex<()>,
}

impl TermVectorsReader {
    pub fn new(
        dir: &dyn Directory,
        segment: &str,
        field_infos: Arc<FieldInfos>,
        buffer_size: usize,
        doc_store_offset: i32,
        size: i32,
    ) -> Result<TermVectorsReader> {
        let mut tvx = dir.open_input(&segment_file_name(segment, VECTORS_INDEX_EXTENSION), buffer_size)?;
        let mut tvd =
            dir.open_input(&segment_file_name(segment, VECTORS_DOCUMENTS_EXTENSION), buffer_size)?;
        let mut tvf = dir.open_input(&segment_file_name(segment, VECTORS_FIELDS_EXTENSION), buffer_size)?;
        codec_util::check_header(tvx.as_mut(), TVX_CODEC, VERSION_START, VERSION_CURRENT)?;
        codec_util::check_header(tvd.as_mut(), TVD_CODEC, VERSION_START, VERSION_CURRENT)?;
        codec_util::check_header(tvf.as_mut(), TVF_CODEC, VERSION_START, VERSION_CURRENT)?;
        let index_start = tvx.file_pointer();
        let total = ((tvx.len() - index_start) / 16) as i32;
        let size = if size >= 0 { size } else { total };
        let offset = if doc_store_offset >= 0 { doc_store_offset } else { 0 };
        if offset + size > total {
            bail!(ErrorKind::CorruptIndex(format!(
                "term vectors of {} too short: offset={} size={} total={}",
                segment, offset, size, total
            )));
        }
        Ok(TermVectorsReader {
            field_infos,
            tvd_length: tvd.len(),
            tvf_length: tvf.len(),
            tvx,
            tvd,
            tvf,
            index_start,
            size,
            doc_store_offset: offset,
            streams: Mutex::new(()),
        })
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    fn pointers_at(&self, tvx: &mut dyn IndexInput, doc: DocId) -> Result<(u64, u64)> {
        tvx.seek(self.index_start + (self.doc_store_offset as u64 + doc as u64) * 16)?;
        let tvd_ptr = tvx.read_long()? as u64;
        let tvf_ptr = tvx.read_long()? as u64;
        Ok((tvd_ptr, tvf_ptr))
    }

    /// All vectors of one document; empty when none were stored.
    pub fn get(&self, doc: DocId) -> Result<Vec<TermFreqVector>> {
        if doc < 0 || doc >= self.size {
            bail!(ErrorKind::IllegalArgument(format!(
                "doc {} out of bounds [0, {})",
                doc, self.size
            )));
        }
        let _guard = self.streams.lock()?;
        let mut tvx = self.tvx.clone_input()?;
        let (tvd_ptr, tvf_base) = self.pointers_at(tvx.as_mut(), doc)?;
        let mut tvd = self.tvd.clone_input()?;
        tvd.seek(tvd_ptr)?;
        let field_count = tvd.read_vint()?;
        let mut numbers = Vec::with_capacity(field_count as usize);
        let mut last = 0i32;
        for _ in 0..field_count {
            last += tvd.read_vint()?;
            numbers.push(last);
        }
        let mut offsets = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            offsets.push(tvd.read_vlong()? as u64);
        }
        let mut vectors = Vec::with_capacity(field_count as usize);
        let mut tvf = self.tvf.clone_input()?;
        for (i, &number) in numbers.iter().enumerate() {
            tvf.seek(tvf_base + offsets[i])?;
            let field = self
                .field_infos
                .by_number(number)
                .map(|f| f.name.clone())
                .unwrap_or_default();
            vectors.push(self.read_field(tvf.as_mut(), field)?);
        }
        Ok(vectors)
    }

    /// One field's vector for a document, or None.
    pub fn get_field(&self, doc: DocId, field: &str) -> Result<Option<TermFreqVector>> {
        Ok(self.get(doc)?.into_iter().find(|v| v.field == field))
    }

    fn read_field(&self, tvf: &mut dyn IndexInput, field: String) -> Result<TermFreqVector> {
        let term_count = tvf.read_vint()?;
        let bits = tvf.read_byte()?;
        let store_positions = bits & STORE_POSITIONS != 0;
        let store_offsets = bits & STORE_OFFSETS != 0;
        let mut vector = TermFreqVector {
            field,
            terms: Vec::with_capacity(term_count as usize),
            freqs: Vec::with_capacity(term_count as usize),
            positions: if store_positions { Some(Vec::new()) } else { None },
            offsets: if store_offsets { Some(Vec::new()) } else { None },
        };
        let mut last_term = String::new();
        for _ in 0..term_count {
            let prefix = tvf.read_vint()? as usize;
            let suffix = tvf.read_string()?;
            last_term.truncate(prefix);
            last_term.push_str(&suffix);
            let freq = tvf.read_vint()?;
            vector.terms.push(last_term.clone());
            vector.freqs.push(freq);
            if store_positions {
                let mut positions = Vec::with_capacity(freq as usize);
                let mut pos = 0i32;
                for _ in 0..freq {
                    pos += tvf.read_vint()?;
                    positions.push(pos);
                }
                if let Some(ref mut all) = vector.positions {
                    all.push(positions);
                }
            }
            if store_offsets {
                let mut offsets = Vec::with_capacity(freq as usize);
                let mut last_end = 0i32;
                for _ in 0..freq {
                    let start = last_end + tvf.read_vint()?;
                    let end = start + tvf.read_vint()?;
                    offsets.push((start, end));
                    last_end = end;
                }
                if let Some(ref mut all) = vector.offsets {
                    all.push(offsets);
                }
            }
        }
        Ok(vector)
    }

    /// For bulk merging: record sizes for a run of documents plus `.tvd`
    /// and `.tvf` cursors positioned on the first record of each stream.
    pub fn raw_docs(
        &self,
        tvd_lengths: &mut [u64],
        tvf_lengths: &mut [u64],
        start_doc: DocId,
    ) -> Result<(Box<dyn IndexInput>, Box<dyn IndexInput>)> {
        debug_assert_eq!(tvd_lengths.len(), tvf_lengths.len());
        let _guard = self.streams.lock()?;
        let mut tvx = self.tvx.clone_input()?;
        let (first_tvd, first_tvf) = self.pointers_at(tvx.as_mut(), start_doc)?;
        let mut last_tvd = first_tvd;
        let mut last_tvf = first_tvf;
        let total_entries = (self.tvx.len() - self.index_start) / 16;
        for i in 0..tvd_lengths.len() {
            let next_doc = self.doc_store_offset as u64 + start_doc as u64 + i as u64 + 1;
            let (next_tvd, next_tvf) = if next_doc < total_entries {
                (tvx.read_long()? as u64, tvx.read_long()? as u64)
            } else {
                (self.tvd_length, self.tvf_length)
            };
            tvd_lengths[i] = next_tvd - last_tvd;
            tvf_lengths[i] = next_tvf - last_tvf;
            last_tvd = next_tvd;
            last_tvf = next_tvf;
        }
        let mut tvd = self.tvd.clone_input()?;
        tvd.seek(first_tvd)?;
        let mut tvf = self.tvf.clone_input()?;
        tvf.seek(first_tvf)?;
        Ok((tvd, tvf))
    }
}

fn common_prefix(a: &str, b: &str) -> usize {
    let mut n = 0;
    let limit = a.len().min(b.len());
    let (ab, bb) = (a.as_bytes(), b.as_bytes());
    while n < limit && ab[n] == bb[n] {
        n += 1;
    }
    while n > 0 && !b.is_char_boundary(n) {
        n -= 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::store::{RAMDirectory, BUFFER_SIZE};

    fn infos() -> Arc<FieldInfos> {
        let mut fi = FieldInfos::new();
        fi.add_or_update("content", true, true, true, true, false, false, false);
        fi.add_or_update("tags", true, true, false, false, false, false, false);
        Arc::new(fi)
    }

    fn content_vector() -> TermFreqVector {
        TermFreqVector {
            field: "content".to_string(),
            terms: vec!["apple".to_string(), "applesauce".to_string(), "pear".to_string()],
            freqs: vec![2, 1, 1],
            positions: Some(vec![vec![0, 3], vec![1], vec![2]]),
            offsets: Some(vec![vec![(0, 5), (20, 25)], vec![(6, 16)], vec![(17, 21)]]),
        }
    }

    #[test]
    fn vector_round_trip() {
        let dir = RAMDirectory::new();
        let fi = infos();
        let mut writer = TermVectorsWriter::new(&dir, "_0").unwrap();
        let tags = TermFreqVector {
            field: "tags".to_string(),
            terms: vec!["x".to_string()],
            freqs: vec![4],
            positions: None,
            offsets: None,
        };
        writer
            .add_document(&[content_vector(), tags.clone()], &fi)
            .unwrap();
        writer.add_document(&[], &fi).unwrap();
        writer.add_document(&[tags.clone()], &fi).unwrap();
        writer.close().unwrap();

        let reader =
            TermVectorsReader::new(&dir, "_0", Arc::clone(&fi), BUFFER_SIZE, -1, -1).unwrap();
        assert_eq!(reader.size(), 3);
        let v0 = reader.get(0).unwrap();
        assert_eq!(v0.len(), 2);
        assert_eq!(v0[0], content_vector());
        assert_eq!(v0[1], tags);
        assert!(reader.get(1).unwrap().is_empty());
        assert_eq!(
            reader.get_field(2, "tags").unwrap().unwrap().freqs,
            vec![4]
        );
        assert!(reader.get_field(2, "content").unwrap().is_none());
    }

    #[test]
    fn raw_copy_relocates_documents() {
        let dir = RAMDirectory::new();
        let fi = infos();
        let mut writer = TermVectorsWriter::new(&dir, "_0").unwrap();
        for _ in 0..4 {
            writer.add_document(&[content_vector()], &fi).unwrap();
        }
        writer.close().unwrap();

        let reader = TermVectorsReader::new(&dir, "_0", Arc::clone(&fi), BUFFER_SIZE, -1, -1).unwrap();
        let mut tvd_lengths = vec![0u64; 2];
        let mut tvf_lengths = vec![0u64; 2];
        let (mut tvd, mut tvf) = reader
            .raw_docs(&mut tvd_lengths, &mut tvf_lengths, 1)
            .unwrap();

        let mut out = TermVectorsWriter::new(&dir, "_1").unwrap();
        out.add_raw_documents(tvd.as_mut(), tvf.as_mut(), &tvd_lengths, &tvf_lengths)
            .unwrap();
        out.close().unwrap();

        let copied = TermVectorsReader::new(&dir, "_1", fi, BUFFER_SIZE, -1, -1).unwrap();
        assert_eq!(copied.size(), 2);
        assert_eq!(copied.get(0).unwrap()[0], content_vector());
        assert_eq!(copied.get(1).unwrap()[0], content_vector());
    }
}
