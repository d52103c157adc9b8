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

use std::cmp::Ordering;
use std::fmt;

/// A word out of one field. The terms dictionary and every buffered-delete
/// map order terms by field first, then text, so forward-only cursor seeks
/// stay monotonic.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Term {
    field: String,
    text: String,
}

impl Term {
    pub fn new(field: &str, text: &str) -> Term {
        Term {
            field: field.to_string(),
            text: text.to_string(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Ord for Term {
    fn cmp(&self, other: &Term) -> Ordering {
        self.field
            .cmp(&other.field)
            .then_with(|| self.text.cmp(&other.text))
    }
}

impl PartialOrd for Term {
    fn partial_cmp(&self, other: &Term) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_orders_before_text() {
        let a = Term::new("author", "zz");
        let b = Term::new("body", "aa");
        let c = Term::new("body", "ab");
        assert!(a < b);
        assert!(b < c);
        assert_eq!(b.cmp(&b), Ordering::Equal);
    }
}
