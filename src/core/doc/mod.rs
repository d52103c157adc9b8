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

/// Whether a field's value is kept in the stored-fields files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Store {
    Yes,
    No,
}

/// How a field participates in the inverted index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Index {
    /// Tokenize the value through the analyzer.
    Analyzed,
    /// Index the whole value as a single term.
    NotAnalyzed,
    No,
}

/// Term-vector capture for a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermVector {
    No,
    Yes,
    WithPositions,
    WithOffsets,
    WithPositionsOffsets,
}

#[derive(Clone, Debug)]
pub struct Field {
    name: String,
    value: String,
    stored: bool,
    indexed: bool,
    tokenized: bool,
    term_vector: TermVector,
    omit_norms: bool,
    omit_term_freq_and_positions: bool,
}

impl Field {
    pub fn new(name: &str, value: &str, store: Store, index: Index) -> Field {
        Field {
            name: name.to_string(),
            value: value.to_string(),
            stored: store == Store::Yes,
            indexed: index != Index::No,
            tokenized: index == Index::Analyzed,
            term_vector: TermVector::No,
            omit_norms: false,
            omit_term_freq_and_positions: false,
        }
    }

    pub fn with_term_vector(mut self, tv: TermVector) -> Field {
        self.term_vector = tv;
        self
    }

    pub fn with_omit_norms(mut self, omit: bool) -> Field {
        self.omit_norms = omit;
        self
    }

    pub fn with_omit_term_freq_and_positions(mut self, omit: bool) -> Field {
        self.omit_term_freq_and_positions = omit;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_stored(&self) -> bool {
        self.stored
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn is_tokenized(&self) -> bool {
        self.tokenized
    }

    pub fn store_term_vector(&self) -> bool {
        self.term_vector != TermVector::No
    }

    pub fn store_positions_with_term_vector(&self) -> bool {
        self.term_vector == TermVector::WithPositions
            || self.term_vector == TermVector::WithPositionsOffsets
    }

    pub fn store_offsets_with_term_vector(&self) -> bool {
        self.term_vector == TermVector::WithOffsets
            || self.term_vector == TermVector::WithPositionsOffsets
    }

    pub fn omit_norms(&self) -> bool {
        self.omit_norms
    }

    pub fn omit_term_freq_and_positions(&self) -> bool {
        self.omit_term_freq_and_positions
    }
}

#[derive(Clone, Debug, Default)]
pub struct Document {
    fields: Vec<Field>,
}

impl Document {
    pub fn new() -> Document {
        Default::default()
    }

    pub fn add(&mut self, field: Field) {
        self.fields.push(field);
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// First stored value for the named field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name() == name)
            .map(|f| f.value())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
