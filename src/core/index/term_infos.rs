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

//! The terms dictionary. `.tis` holds every term in (field, text) order
//! with prefix-coded text and delta-coded postings pointers; `.tii` holds
//! every `index_interval`-th term with absolute pointers so a cursor can
//! drop in mid-stream. Both close with a fixed-width trailer ahead of the
//! codec footer so readers can find the counts without a back-pointer.

use std::sync::Arc;

use core::codec::codec_util;
use core::index::{segment_file_name, FieldInfos, Term, TERMS_EXTENSION, TERMS_INDEX_EXTENSION};
use core::store::{
    ChecksumIndexOutput, DataInput, DataOutput, Directory, IndexInput, IndexOutput,
};
use error::{ErrorKind, Result};

const TIS_CODEC: &str = "TermsDict";
const TII_CODEC: &str = "TermsIndex";
const VERSION_START: i32 = 0;
const VERSION_CURRENT: i32 = VERSION_START;

// trailer: one long (term count) before the 16-byte footer
const TIS_TRAILER_LENGTH: u64 = 8 + 16;
// trailer: index term count long + interval int before the footer
const TII_TRAILER_LENGTH: u64 = 8 + 4 + 16;

pub const DEFAULT_TERM_INDEX_INTERVAL: i32 = 128;

/// Dictionary entry for one term: how many documents carry it and where
/// its postings start.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TermInfo {
    pub doc_freq: i32,
    pub freq_pointer: i64,
    pub prox_pointer: i64,
}

/// Streams the sorted term sequence into `.tis`/`.tii`. Terms must arrive
/// in strict (field, text) order.
pub struct TermInfosWriter {
    tis: ChecksumIndexOutput,
    tii: ChecksumIndexOutput,
    field_infos: Arc<FieldInfos>,
    index_interval: i32,
    count: i64,
    index_count: i64,
    last_field: i32,
    last_text: String,
    last_term_info: TermInfo,
}

impl TermInfosWriter {
    pub fn new(
        dir: &dyn Directory,
        segment: &str,
        field_infos: Arc<FieldInfos>,
        index_interval: i32,
    ) -> Result<TermInfosWriter> {
        let mut tis =
            ChecksumIndexOutput::new(dir.create_output(&segment_file_name(segment, TERMS_EXTENSION))?);
        let mut tii = ChecksumIndexOutput::new(
            dir.create_output(&segment_file_name(segment, TERMS_INDEX_EXTENSION))?,
        );
        codec_util::write_header(&mut tis, TIS_CODEC, VERSION_CURRENT)?;
        codec_util::write_header(&mut tii, TII_CODEC, VERSION_CURRENT)?;
        Ok(TermInfosWriter {
            tis,
            tii,
            field_infos,
            index_interval,
            count: 0,
            index_count: 0,
            last_field: -1,
            last_text: String::new(),
            last_term_info: TermInfo::default(),
        })
    }

    fn field_name(&self, number: i32) -> &str {
        self.field_infos
            .by_number(number)
            .map(|f| f.name.as_str())
            .unwrap_or("")
    }

    /// Terms must be added in (field name, text) order; this is the order
    /// every cursor and the merge queue observe.
    pub fn add(&mut self, field_number: i32, text: &str, ti: &TermInfo) -> Result<()> {
        debug_assert!(
            self.count == 0
                || (self.field_name(self.last_field), self.last_text.as_str())
                    < (self.field_name(field_number), text),
            "terms out of order"
        );

        let prefix = if self.last_field == field_number {
            common_prefix(&self.last_text, text)
        } else {
            0
        };
        self.tis.write_vint(prefix as i32)?;
        self.tis.write_string(&text[prefix..])?;
        self.tis.write_vint(field_number)?;
        self.tis.write_vint(ti.doc_freq)?;
        self.tis
            .write_vlong(ti.freq_pointer - self.last_term_info.freq_pointer)?;
        self.tis
            .write_vlong(ti.prox_pointer - self.last_term_info.prox_pointer)?;

        if self.count % i64::from(self.index_interval) == 0 {
            // index entry with absolute pointers. The stored position is
            // just past this term's record: a cursor dropped onto the
            // entry treats the term as already consumed, so the next
            // record's prefix coding lines up with the entry's text.
            self.tii.write_vint(field_number)?;
            self.tii.write_string(text)?;
            self.tii.write_vint(ti.doc_freq)?;
            self.tii.write_vlong(ti.freq_pointer)?;
            self.tii.write_vlong(ti.prox_pointer)?;
            self.tii.write_vlong(self.tis.file_pointer() as i64)?;
            self.tii.write_vlong(self.count)?;
            self.index_count += 1;
        }

        self.last_field = field_number;
        self.last_text.clear();
        self.last_text.push_str(text);
        self.last_term_info = *ti;
        self.count += 1;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.tis.write_long(self.count)?;
        codec_util::write_footer(&mut self.tis)?;
        self.tis.close()?;
        self.tii.write_long(self.index_count)?;
        self.tii.write_int(self.index_interval)?;
        codec_util::write_footer(&mut self.tii)?;
        self.tii.close()
    }
}

fn common_prefix(a: &str, b: &str) -> usize {
    let mut n = 0;
    // prefixes are sliced back out of the new text, so stop on char
    // boundaries of both strings
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

/// Sequential cursor over the `.tis` stream.
pub struct SegmentTermEnum {
    input: Box<dyn IndexInput>,
    field_infos: Arc<FieldInfos>,
    size: i64,
    position: i64,
    field: i32,
    text: String,
    term_info: TermInfo,
}

impl SegmentTermEnum {
    fn new(
        input: Box<dyn IndexInput>,
        field_infos: Arc<FieldInfos>,
        size: i64,
        data_start: u64,
    ) -> Result<SegmentTermEnum> {
        let mut input = input;
        input.seek(data_start)?;
        Ok(SegmentTermEnum {
            input,
            field_infos,
            size,
            position: -1,
            field: -1,
            text: String::new(),
            term_info: TermInfo::default(),
        })
    }

    /// Advances to the next term; false once the dictionary is exhausted.
    pub fn next(&mut self) -> Result<bool> {
        if self.position + 1 >= self.size {
            self.position = self.size;
            return Ok(false);
        }
        self.position += 1;
        let prefix = self.input.read_vint()? as usize;
        let suffix = self.input.read_string()?;
        let field = self.input.read_vint()?;
        if prefix > self.text.len() || (field != self.field && prefix != 0) {
            bail!(ErrorKind::CorruptIndex("broken term prefix coding".into()));
        }
        self.text.truncate(prefix);
        self.text.push_str(&suffix);
        self.field = field;
        let doc_freq = self.input.read_vint()?;
        let freq_delta = self.input.read_vlong()?;
        let prox_delta = self.input.read_vlong()?;
        self.term_info = TermInfo {
            doc_freq,
            freq_pointer: self.term_info.freq_pointer + freq_delta,
            prox_pointer: self.term_info.prox_pointer + prox_delta,
        };
        Ok(true)
    }

    /// Repositions onto an index entry; the next `next()` reads the term
    /// right after it.
    fn seek_index_entry(&mut self, entry: &IndexEntry) -> Result<()> {
        self.input.seek(entry.tis_pointer)?;
        self.position = entry.position;
        self.field = entry.field;
        self.text.clear();
        self.text.push_str(&entry.text);
        self.term_info = entry.term_info;
        Ok(())
    }

    pub fn term(&self) -> Option<Term> {
        if self.position < 0 || self.position >= self.size {
            None
        } else {
            let field_name = self
                .field_infos
                .by_number(self.field)
                .map(|f| f.name.as_str())
                .unwrap_or("");
            Some(Term::new(field_name, &self.text))
        }
    }

    pub fn term_info(&self) -> TermInfo {
        self.term_info
    }

    pub fn doc_freq(&self) -> i32 {
        self.term_info.doc_freq
    }

    fn at_or_past_end(&self) -> bool {
        self.position >= self.size
    }
}

struct IndexEntry {
    field: i32,
    text: String,
    term_info: TermInfo,
    tis_pointer: u64,
    position: i64,
}

/// Random access into the terms dictionary via the in-memory `.tii`
/// sample. A divisor of `-1` skips loading the index; such a reader can
/// only stream sequentially (that is all merging needs) or seek by linear
/// scan.
pub struct TermInfosReader {
    tis_input: Box<dyn IndexInput>,
    field_infos: Arc<FieldInfos>,
    size: i64,
    data_start: u64,
    index: Option<Vec<IndexEntry>>,
    index_divisor: i32,
}

impl TermInfosReader {
    pub fn open(
        dir: &dyn Directory,
        segment: &str,
        field_infos: Arc<FieldInfos>,
        buffer_size: usize,
        index_divisor: i32,
    ) -> Result<TermInfosReader> {
        let mut tis_input = dir.open_input(&segment_file_name(segment, TERMS_EXTENSION), buffer_size)?;
        codec_util::check_header(&mut *tis_input, TIS_CODEC, VERSION_START, VERSION_CURRENT)?;
        let data_start = tis_input.file_pointer();
        if tis_input.len() < data_start + TIS_TRAILER_LENGTH {
            bail!(ErrorKind::CorruptIndex(format!(
                "terms dictionary of {} is truncated",
                segment
            )));
        }
        tis_input.seek(tis_input.len() - TIS_TRAILER_LENGTH)?;
        let size = tis_input.read_long()?;
        if size < 0 {
            bail!(ErrorKind::CorruptIndex(format!(
                "negative term count in {}",
                segment
            )));
        }
        tis_input.seek(data_start)?;

        let mut reader = TermInfosReader {
            tis_input,
            field_infos,
            size,
            data_start,
            index: None,
            index_divisor,
        };
        if index_divisor > 0 {
            reader.load_index(dir, segment, buffer_size)?;
        }
        Ok(reader)
    }

    fn load_index(&mut self, dir: &dyn Directory, segment: &str, buffer_size: usize) -> Result<()> {
        let mut tii =
            dir.open_input(&segment_file_name(segment, TERMS_INDEX_EXTENSION), buffer_size)?;
        codec_util::check_header(&mut *tii, TII_CODEC, VERSION_START, VERSION_CURRENT)?;
        let data_start = tii.file_pointer();
        if tii.len() < data_start + TII_TRAILER_LENGTH {
            bail!(ErrorKind::CorruptIndex(format!(
                "terms index of {} is truncated",
                segment
            )));
        }
        tii.seek(tii.len() - TII_TRAILER_LENGTH)?;
        let index_count = tii.read_long()?;
        let _interval = tii.read_int()?;
        tii.seek(data_start)?;

        let divisor = i64::from(self.index_divisor);
        let mut entries = Vec::with_capacity((index_count / divisor + 1) as usize);
        for i in 0..index_count {
            let field = tii.read_vint()?;
            let text = tii.read_string()?;
            let doc_freq = tii.read_vint()?;
            let freq_pointer = tii.read_vlong()?;
            let prox_pointer = tii.read_vlong()?;
            let tis_pointer = tii.read_vlong()? as u64;
            let position = tii.read_vlong()?;
            if i % divisor == 0 {
                entries.push(IndexEntry {
                    field,
                    text,
                    term_info: TermInfo {
                        doc_freq,
                        freq_pointer,
                        prox_pointer,
                    },
                    tis_pointer,
                    position,
                });
            }
        }
        self.index = Some(entries);
        Ok(())
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn index_is_loaded(&self) -> bool {
        self.index.is_some()
    }

    pub fn index_divisor(&self) -> i32 {
        self.index_divisor
    }

    /// A fresh sequential cursor over the whole dictionary.
    pub fn terms(&self) -> Result<SegmentTermEnum> {
        SegmentTermEnum::new(
            self.tis_input.clone_input()?,
            Arc::clone(&self.field_infos),
            self.size,
            self.data_start,
        )
    }

    /// A cursor positioned at the first term >= `term`.
    pub fn terms_from(&self, term: &Term) -> Result<SegmentTermEnum> {
        let mut term_enum = self.terms()?;
        self.seek_enum(&mut term_enum, term)?;
        Ok(term_enum)
    }

    // Positions the enum on the first term >= target.
    fn seek_enum(&self, term_enum: &mut SegmentTermEnum, target: &Term) -> Result<()> {
        if let Some(ref index) = self.index {
            // greatest index entry <= target, comparing by field name
            let mut lo = 0i64;
            let mut hi = index.len() as i64 - 1;
            let mut best: i64 = -1;
            while lo <= hi {
                let mid = (lo + hi) / 2;
                let entry = &index[mid as usize];
                let entry_field = self
                    .field_infos
                    .by_number(entry.field)
                    .map(|f| f.name.as_str())
                    .unwrap_or("");
                let cmp = (entry_field, entry.text.as_str()) <= (target.field(), target.text());
                if cmp {
                    best = mid;
                    lo = mid + 1;
                } else {
                    hi = mid - 1;
                }
            }
            if best >= 0 {
                term_enum.seek_index_entry(&index[best as usize])?;
                if let Some(current) = term_enum.term() {
                    if &current >= target {
                        return Ok(());
                    }
                }
            }
        }
        while term_enum.next()? {
            if let Some(current) = term_enum.term() {
                if &current >= target {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Dictionary entry for an exact term, or None.
    pub fn get(&self, term: &Term) -> Result<Option<TermInfo>> {
        if self.size == 0 {
            return Ok(None);
        }
        let mut term_enum = self.terms()?;
        self.seek_enum(&mut term_enum, term)?;
        if term_enum.at_or_past_end() {
            return Ok(None);
        }
        match term_enum.term() {
            Some(ref current) if current == term => Ok(Some(term_enum.term_info())),
            _ => Ok(None),
        }
    }

    pub fn doc_freq(&self, term: &Term) -> Result<i32> {
        Ok(self.get(term)?.map(|ti| ti.doc_freq).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::store::{RAMDirectory, BUFFER_SIZE};

    fn field_infos() -> Arc<FieldInfos> {
        let mut infos = FieldInfos::new();
        infos.add_simple("author", true);
        infos.add_simple("body", true);
        Arc::new(infos)
    }

    fn write_dict(dir: &RAMDirectory, terms: &[(i32, &str, i32)]) {
        let mut writer = TermInfosWriter::new(dir, "_0", field_infos(), 4).unwrap();
        let mut pointer = 0i64;
        for &(field, text, df) in terms {
            let ti = TermInfo {
                doc_freq: df,
                freq_pointer: pointer,
                prox_pointer: pointer * 2,
            };
            writer.add(field, text, &ti).unwrap();
            pointer += i64::from(df);
        }
        writer.close().unwrap();
    }

    #[test]
    fn sequential_enum_returns_all_terms() {
        let dir = RAMDirectory::new();
        let terms = [
            (0, "alpha", 2),
            (0, "alphabet", 1),
            (0, "beta", 3),
            (1, "alpha", 1),
            (1, "gamma", 5),
        ];
        write_dict(&dir, &terms);

        let reader = TermInfosReader::open(&dir, "_0", field_infos(), BUFFER_SIZE, 1).unwrap();
        assert_eq!(reader.size(), 5);
        let mut te = reader.terms().unwrap();
        let mut seen = Vec::new();
        while te.next().unwrap() {
            let t = te.term().unwrap();
            seen.push((t.field().to_string(), t.text().to_string(), te.doc_freq()));
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0], ("author".to_string(), "alpha".to_string(), 2));
        assert_eq!(seen[1], ("author".to_string(), "alphabet".to_string(), 1));
        assert_eq!(seen[3], ("body".to_string(), "alpha".to_string(), 1));
        assert_eq!(seen[4], ("body".to_string(), "gamma".to_string(), 5));
    }

    #[test]
    fn exact_lookup_and_misses() {
        let dir = RAMDirectory::new();
        let terms = [
            (0, "a", 1),
            (0, "b", 2),
            (0, "c", 3),
            (0, "d", 4),
            (0, "e", 5),
            (0, "f", 6),
            (1, "a", 7),
        ];
        write_dict(&dir, &terms);
        let reader = TermInfosReader::open(&dir, "_0", field_infos(), BUFFER_SIZE, 1).unwrap();
        assert_eq!(reader.doc_freq(&Term::new("author", "d")).unwrap(), 4);
        assert_eq!(reader.doc_freq(&Term::new("body", "a")).unwrap(), 7);
        assert_eq!(reader.doc_freq(&Term::new("author", "zz")).unwrap(), 0);
        assert_eq!(reader.doc_freq(&Term::new("body", "b")).unwrap(), 0);
        let ti = reader.get(&Term::new("author", "f")).unwrap().unwrap();
        assert_eq!(ti.doc_freq, 6);
        assert_eq!(ti.freq_pointer, 1 + 2 + 3 + 4 + 5);
    }

    #[test]
    fn divisor_minus_one_skips_index_but_still_seeks() {
        let dir = RAMDirectory::new();
        write_dict(&dir, &[(0, "a", 1), (0, "m", 2), (0, "z", 3)]);
        let reader = TermInfosReader::open(&dir, "_0", field_infos(), BUFFER_SIZE, -1).unwrap();
        assert!(!reader.index_is_loaded());
        assert_eq!(reader.doc_freq(&Term::new("author", "m")).unwrap(), 2);
    }

    #[test]
    fn terms_from_positions_at_ceiling() {
        let dir = RAMDirectory::new();
        write_dict(&dir, &[(0, "b", 1), (0, "d", 1), (0, "f", 1)]);
        let reader = TermInfosReader::open(&dir, "_0", field_infos(), BUFFER_SIZE, 1).unwrap();
        let te = reader.terms_from(&Term::new("author", "c")).unwrap();
        assert_eq!(te.term().unwrap(), Term::new("author", "d"));
    }

    #[test]
    fn empty_dictionary() {
        let dir = RAMDirectory::new();
        write_dict(&dir, &[]);
        let reader = TermInfosReader::open(&dir, "_0", field_infos(), BUFFER_SIZE, 1).unwrap();
        assert_eq!(reader.size(), 0);
        assert!(reader.get(&Term::new("author", "a")).unwrap().is_none());
        let mut te = reader.terms().unwrap();
        assert!(!te.next().unwrap());
    }
}
