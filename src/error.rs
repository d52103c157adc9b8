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

use std::borrow::Cow;
use std::sync::PoisonError;

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    foreign_links {
        Io(::std::io::Error);
        FromUtf8(::std::string::FromUtf8Error);
        Utf8(::std::str::Utf8Error);
        ParseInt(::std::num::ParseIntError);
    }

    errors {
        IllegalState(desc: String) {
            description("illegal state")
            display("illegal state: {}", desc)
        }
        IllegalArgument(desc: String) {
            description("illegal argument")
            display("illegal argument: {}", desc)
        }
        UnsupportedOperation(desc: Cow<'static, str>) {
            description("unsupported operation")
            display("unsupported operation: {}", desc)
        }
        CorruptIndex(desc: String) {
            description("corrupt index")
            display("corrupt index: {}", desc)
        }
        AlreadyClosed(desc: String) {
            description("already closed")
            display("already closed: {}", desc)
        }
        LockObtainFailed(desc: String) {
            description("lock obtain timed out")
            display("lock obtain timed out: {}", desc)
        }
        MergeAborted(desc: String) {
            description("merge was aborted")
            display("merge was aborted: {}", desc)
        }
        RuntimeError(desc: String) {
            description("runtime error")
            display("runtime error: {}", desc)
        }
    }
}

// Mutex poisoning means a writer thread panicked while holding state; the
// index on disk is still consistent, so surface it as a runtime error
// instead of propagating the panic into every caller.
impl<Guard> From<PoisonError<Guard>> for Error {
    fn from(e: PoisonError<Guard>) -> Error {
        ErrorKind::RuntimeError(format!("lock poisoned: {}", e)).into()
    }
}
