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

use core::codec::codec_util;
use core::store::{ChecksumIndexInput, ChecksumIndexOutput, DataInput, DataOutput, Directory, IndexOutput, BUFFER_SIZE};
use error::{ErrorKind, Result};

const CODEC_NAME: &str = "FieldInfos";
const VERSION_START: i32 = 0;
const VERSION_CURRENT: i32 = VERSION_START;

const IS_INDEXED: u8 = 0x1;
const STORE_TERM_VECTOR: u8 = 0x2;
const STORE_POSITIONS_WITH_TERM_VECTOR: u8 = 0x4;
const STORE_OFFSETS_WITH_TERM_VECTOR: u8 = 0x8;
const OMIT_NORMS: u8 = 0x10;
const STORE_PAYLOADS: u8 = 0x20;
const OMIT_TERM_FREQ_AND_POSITIONS: u8 = 0x40;

#[derive(Clone, Debug)]
pub struct FieldInfo {
    pub name: String,
    pub number: i32,
    pub is_indexed: bool,
    pub store_term_vector: bool,
    pub store_positions_with_term_vector: bool,
    pub store_offsets_with_term_vector: bool,
    pub omit_norms: bool,
    pub store_payloads: bool,
    pub omit_term_freq_and_positions: bool,
}

impl FieldInfo {
    fn bits(&self) -> u8 {
        let mut bits = 0u8;
        if self.is_indexed {
            bits |= IS_INDEXED;
        }
        if self.store_term_vector {
            bits |= STORE_TERM_VECTOR;
        }
        if self.store_positions_with_term_vector {
            bits |= STORE_POSITIONS_WITH_TERM_VECTOR;
        }
        if self.store_offsets_with_term_vector {
            bits |= STORE_OFFSETS_WITH_TERM_VECTOR;
        }
        if self.omit_norms {
            bits |= OMIT_NORMS;
        }
        if self.store_payloads {
            bits |= STORE_PAYLOADS;
        }
        if self.omit_term_freq_and_positions {
            bits |= OMIT_TERM_FREQ_AND_POSITIONS;
        }
        bits
    }

    /// Whether this field contributes a norm byte per document.
    pub fn has_norms(&self) -> bool {
        self.is_indexed && !self.omit_norms
    }
}

/// The per-segment field table. Field numbers are assigned in first-seen
/// order and stay stable for the life of the segment.
#[derive(Clone, Debug, Default)]
pub struct FieldInfos {
    by_number: Vec<FieldInfo>,
}

impl FieldInfos {
    pub fn new() -> FieldInfos {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }

    pub fn by_number(&self, number: i32) -> Option<&FieldInfo> {
        self.by_number.get(number as usize)
    }

    pub fn by_name(&self, name: &str) -> Option<&FieldInfo> {
        self.by_number.iter().find(|f| f.name == name)
    }

    pub fn field_number(&self, name: &str) -> Option<i32> {
        self.by_name(name).map(|f| f.number)
    }

    pub fn iter(&self) -> ::std::slice::Iter<FieldInfo> {
        self.by_number.iter()
    }

    /// Adds the field if absent, otherwise unions the flags into the
    /// existing entry. Flag union is how field schemas from several
    /// segments reconcile during merges.
    #[allow(too_many_arguments)]
    pub fn add_or_update(
        &mut self,
        name: &str,
        is_indexed: bool,
        store_term_vector: bool,
        store_positions_with_term_vector: bool,
        store_offsets_with_term_vector: bool,
        omit_norms: bool,
        store_payloads: bool,
        omit_term_freq_and_positions: bool,
    ) -> i32 {
        if let Some(number) = self.field_number(name) {
            let info = &mut self.by_number[number as usize];
            info.is_indexed |= is_indexed;
            info.store_term_vector |= store_term_vector;
            info.store_positions_with_term_vector |= store_positions_with_term_vector;
            info.store_offsets_with_term_vector |= store_offsets_with_term_vector;
            // once a segment omits norms for a field, the merged field
            // cannot regain them
            info.omit_norms |= omit_norms;
            info.store_payloads |= store_payloads;
            info.omit_term_freq_and_positions |= omit_term_freq_and_positions;
            number
        } else {
            let number = self.by_number.len() as i32;
            self.by_number.push(FieldInfo {
                name: name.to_string(),
                number,
                is_indexed,
                store_term_vector,
                store_positions_with_term_vector,
                store_offsets_with_term_vector,
                omit_norms,
                store_payloads,
                omit_term_freq_and_positions,
            });
            number
        }
    }

    pub fn add_simple(&mut self, name: &str, is_indexed: bool) -> i32 {
        self.add_or_update(name, is_indexed, false, false, false, false, false, false)
    }

    pub fn has_vectors(&self) -> bool {
        self.by_number.iter().any(|f| f.store_term_vector)
    }

    pub fn has_prox(&self) -> bool {
        self.by_number
            .iter()
            .any(|f| f.is_indexed && !f.omit_term_freq_and_positions)
    }

    pub fn has_norms(&self) -> bool {
        self.by_number.iter().any(|f| f.has_norms())
    }

    pub fn write(&self, dir: &dyn Directory, filename: &str) -> Result<()> {
        let out = dir.create_output(filename)?;
        let mut out = ChecksumIndexOutput::new(out);
        codec_util::write_header(&mut out, CODEC_NAME, VERSION_CURRENT)?;
        out.write_vint(self.by_number.len() as i32)?;
        for info in &self.by_number {
            out.write_string(&info.name)?;
            out.write_byte(info.bits())?;
        }
        codec_util::write_footer(&mut out)?;
        out.close()
    }

    pub fn read(dir: &dyn Directory, filename: &str) -> Result<FieldInfos> {
        let input = dir.open_input(filename, BUFFER_SIZE)?;
        let mut input = ChecksumIndexInput::new(input);
        codec_util::check_header(&mut input, CODEC_NAME, VERSION_START, VERSION_CURRENT)?;
        let count = input.read_vint()?;
        if count < 0 {
            bail!(ErrorKind::CorruptIndex(format!(
                "invalid field count in {}: {}",
                filename, count
            )));
        }
        let mut infos = FieldInfos::new();
        for number in 0..count {
            let name = input.read_string()?;
            let bits = input.read_byte()?;
            infos.by_number.push(FieldInfo {
                name,
                number,
                is_indexed: bits & IS_INDEXED != 0,
                store_term_vector: bits & STORE_TERM_VECTOR != 0,
                store_positions_with_term_vector: bits & STORE_POSITIONS_WITH_TERM_VECTOR != 0,
                store_offsets_with_term_vector: bits & STORE_OFFSETS_WITH_TERM_VECTOR != 0,
                omit_norms: bits & OMIT_NORMS != 0,
                store_payloads: bits & STORE_PAYLOADS != 0,
                omit_term_freq_and_positions: bits & OMIT_TERM_FREQ_AND_POSITIONS != 0,
            });
        }
        codec_util::check_footer(&mut input)?;
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::store::RAMDirectory;

    #[test]
    fn round_trip() {
        let dir = RAMDirectory::new();
        let mut infos = FieldInfos::new();
        infos.add_or_update("content", true, true, true, false, false, false, false);
        infos.add_or_update("id", true, false, false, false, true, false, true);
        infos.add_or_update("blob", false, false, false, false, false, false, false);
        infos.write(&dir, "_0.fnm").unwrap();

        let read = FieldInfos::read(&dir, "_0.fnm").unwrap();
        assert_eq!(read.len(), 3);
        let content = read.by_name("content").unwrap();
        assert!(content.is_indexed && content.store_term_vector);
        assert!(content.store_positions_with_term_vector);
        assert!(!content.store_offsets_with_term_vector);
        let id = read.by_name("id").unwrap();
        assert!(id.omit_norms && id.omit_term_freq_and_positions);
        assert_eq!(read.by_number(2).unwrap().name, "blob");
        assert!(read.has_vectors());
        assert!(read.has_prox());
    }

    #[test]
    fn update_unions_flags() {
        let mut infos = FieldInfos::new();
        let n1 = infos.add_simple("f", false);
        let n2 = infos.add_or_update("f", true, true, false, false, false, false, false);
        assert_eq!(n1, n2);
        assert_eq!(infos.len(), 1);
        let f = infos.by_name("f").unwrap();
        assert!(f.is_indexed && f.store_term_vector);
    }
}
