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

//! Writer for the postings streams, shared by the flush path and the
//! segment merger.
//!
//! `.frq` per term: ascending doc deltas; for fields with term
//! frequencies the delta is shifted left one bit, low bit set when the
//! frequency is exactly one (no separate vint then). `.prx` per term, for
//! fields with positions: per occurrence a position delta shifted left one
//! bit, low bit flagging an inline payload (vint length plus bytes).

use core::codec::codec_util;
use core::index::{segment_file_name, TermInfo, FREQ_EXTENSION, PROX_EXTENSION};
use core::store::{DataOutput, Directory, IndexOutput};
use core::util::DocId;
use error::{ErrorKind, Result};

pub const FRQ_CODEC: &str = "Postings";
pub const PRX_CODEC: &str = "Positions";
pub const POSTINGS_VERSION_START: i32 = 0;
pub const POSTINGS_VERSION_CURRENT: i32 = POSTINGS_VERSION_START;

pub struct PostingsWriter {
    freq_out: Box<dyn IndexOutput>,
    prox_out: Option<Box<dyn IndexOutput>>,
    last_doc: DocId,
    last_position: i32,
}

impl PostingsWriter {
    pub fn new(dir: &dyn Directory, segment: &str, has_prox: bool) -> Result<PostingsWriter> {
        let mut freq_out = dir.create_output(&segment_file_name(segment, FREQ_EXTENSION))?;
        codec_util::write_header(freq_out.as_mut(), FRQ_CODEC, POSTINGS_VERSION_CURRENT)?;
        let prox_out = if has_prox {
            let mut out = dir.create_output(&segment_file_name(segment, PROX_EXTENSION))?;
            codec_util::write_header(out.as_mut(), PRX_CODEC, POSTINGS_VERSION_CURRENT)?;
            Some(out)
        } else {
            None
        };
        Ok(PostingsWriter {
            freq_out,
            prox_out,
            last_doc: 0,
            last_position: 0,
        })
    }

    /// Starts the postings of a new term and returns its pointers.
    pub fn start_term(&mut self) -> (i64, i64) {
        self.last_doc = 0;
        let freq_pointer = self.freq_out.file_pointer() as i64;
        let prox_pointer = self
            .prox_out
            .as_ref()
            .map(|p| p.file_pointer() as i64)
            .unwrap_or(0);
        (freq_pointer, prox_pointer)
    }

    /// Appends one document to the current term's postings. Docs must
    /// arrive in ascending order within the term.
    pub fn add_doc(&mut self, doc: DocId, freq: i32, omit_tf: bool) -> Result<()> {
        if doc < self.last_doc && !(doc == 0 && self.last_doc == 0) {
            bail!(ErrorKind::CorruptIndex(format!(
                "docs out of order: {} after {}",
                doc, self.last_doc
            )));
        }
        let delta = doc - self.last_doc;
        self.last_doc = doc;
        self.last_position = 0;
        if omit_tf {
            self.freq_out.write_vint(delta)?;
        } else if freq == 1 {
            self.freq_out.write_vint((delta << 1) | 1)?;
        } else {
            self.freq_out.write_vint(delta << 1)?;
            self.freq_out.write_vint(freq)?;
        }
        Ok(())
    }

    /// Appends one position (with optional payload) for the current doc.
    pub fn add_position(&mut self, position: i32, payload: Option<&[u8]>) -> Result<()> {
        let out = match self.prox_out {
            Some(ref mut out) => out,
            None => {
                bail!(ErrorKind::IllegalState(
                    "positions written to a segment without prox".into()
                ))
            }
        };
        let delta = position - self.last_position;
        self.last_position = position;
        match payload {
            Some(bytes) => {
                out.write_vint((delta << 1) | 1)?;
                out.write_vint(bytes.len() as i32)?;
                out.write_bytes(bytes)
            }
            None => out.write_vint(delta << 1),
        }
    }

    pub fn close(mut self) -> Result<()> {
        self.freq_out.close()?;
        if let Some(ref mut prox) = self.prox_out {
            prox.close()?;
        }
        Ok(())
    }
}

/// Pointers carried between `start_term` and the dictionary entry.
pub fn term_info_for(doc_freq: i32, pointers: (i64, i64)) -> TermInfo {
    TermInfo {
        doc_freq,
        freq_pointer: pointers.0,
        prox_pointer: pointers.1,
    }
}
