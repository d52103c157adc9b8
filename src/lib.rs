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

//! Lupin is a persistent full-text indexing engine: documents stream in,
//! immutable segments come out, and readers always observe a well-defined
//! commit point. The writer supports buffered deletions (by term, doc id or
//! query), background segment merging, two-phase commits and rollback.

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

extern crate crc32fast;
extern crate crossbeam;
extern crate num_cpus;
extern crate regex;
extern crate serde;

pub mod core;
pub mod error;
