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

//! The tokenization boundary. Language-specific analyzers live outside the
//! engine; the whitespace analyzer here is the reference collaborator the
//! indexing chain is exercised with.

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub text: String,
    /// Position gap to the previous token; 1 for adjacent tokens.
    pub position_increment: i32,
    pub start_offset: i32,
    pub end_offset: i32,
    pub payload: Option<Vec<u8>>,
}

impl Token {
    pub fn new(text: &str, start_offset: i32, end_offset: i32) -> Token {
        Token {
            text: text.to_string(),
            position_increment: 1,
            start_offset,
            end_offset,
            payload: None,
        }
    }
}

pub trait TokenStream {
    fn next_token(&mut self) -> Option<Token>;
}

pub trait Analyzer: Send + Sync {
    fn token_stream(&self, field: &str, text: &str) -> Box<dyn TokenStream>;
}

/// Splits on Unicode whitespace, keeping offsets into the original text.
#[derive(Clone, Copy, Debug, Default)]
pub struct WhitespaceAnalyzer;

impl Analyzer for WhitespaceAnalyzer {
    fn token_stream(&self, _field: &str, text: &str) -> Box<dyn TokenStream> {
        let mut tokens = Vec::new();
        let mut start: Option<usize> = None;
        for (i, c) in text.char_indices() {
            if c.is_whitespace() {
                if let Some(s) = start.take() {
                    tokens.push(Token::new(&text[s..i], s as i32, i as i32));
                }
            } else if start.is_none() {
                start = Some(i);
            }
        }
        if let Some(s) = start {
            tokens.push(Token::new(&text[s..], s as i32, text.len() as i32));
        }
        tokens.reverse();
        Box::new(VecTokenStream { tokens })
    }
}

struct VecTokenStream {
    // reversed; next_token pops from the back
    tokens: Vec<Token>,
}

impl TokenStream for VecTokenStream {
    fn next_token(&mut self) -> Option<Token> {
        self.tokens.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_tokens_and_offsets() {
        let a = WhitespaceAnalyzer;
        let mut ts = a.token_stream("content", "  a bb  ccc ");
        let t = ts.next_token().unwrap();
        assert_eq!((t.text.as_str(), t.start_offset, t.end_offset), ("a", 2, 3));
        let t = ts.next_token().unwrap();
        assert_eq!((t.text.as_str(), t.start_offset, t.end_offset), ("bb", 4, 6));
        let t = ts.next_token().unwrap();
        assert_eq!(
            (t.text.as_str(), t.start_offset, t.end_offset),
            ("ccc", 8, 11)
        );
        assert!(ts.next_token().is_none());
    }

    #[test]
    fn empty_text_yields_no_tokens() {
        let a = WhitespaceAnalyzer;
        let mut ts = a.token_stream("content", "");
        assert!(ts.next_token().is_none());
    }
}
