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

use std::sync::{Condvar, Mutex};

use error::Result;

/// Sentinel disabling a count- or size-based flush trigger.
pub const DISABLE_AUTO_FLUSH: i32 = -1;

#[derive(Default)]
struct State {
    flush_pending: bool,
    flush_deletes: bool,
    doc_count: i32,
    del_count: i32,
}

/// Decides when the in-memory buffer flushes: by buffered doc count, by
/// buffered delete-term count, or by RAM usage. While a flush is pending
/// every updating thread parks here until the flusher clears the flag.
pub struct FlushControl {
    state: Mutex<State>,
    changed: Condvar,
}

impl Default for FlushControl {
    fn default() -> Self {
        FlushControl {
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
        }
    }
}

impl FlushControl {
    pub fn new() -> FlushControl {
        Default::default()
    }

    /// Accounts an update and reports whether the caller must flush.
    ///
    /// `ram_used` is the current buffer footprint (documents plus
    /// buffered deletes); when it crosses `ram_threshold` the documents
    /// buffer is first asked to `rebalance` and the verdict falls on the
    /// usage it reports back.
    #[allow(too_many_arguments)]
    pub fn wait_update(
        &self,
        doc_inc: i32,
        del_inc: i32,
        skip_wait: bool,
        max_buffered_docs: i32,
        max_buffered_delete_terms: i32,
        ram_threshold: i64,
        ram_used: i64,
        rebalance: &mut dyn FnMut() -> Result<i64>,
    ) -> Result<bool> {
        let mut state = self.state.lock()?;
        if !skip_wait {
            while state.flush_pending {
                state = self.changed.wait(state)?;
            }
        }
        state.doc_count += doc_inc;
        state.del_count += del_inc;

        if max_buffered_docs != DISABLE_AUTO_FLUSH && state.doc_count >= max_buffered_docs {
            debug!(target: "IW", "flush trigger: {} buffered docs", state.doc_count);
            state.flush_pending = true;
            return Ok(true);
        }
        if max_buffered_delete_terms != DISABLE_AUTO_FLUSH
            && state.del_count >= max_buffered_delete_terms
        {
            debug!(target: "IW", "flush trigger: {} buffered delete terms", state.del_count);
            state.flush_pending = true;
            state.flush_deletes = true;
            return Ok(true);
        }
        if ram_threshold > 0 && ram_used >= ram_threshold {
            let after = rebalance()?;
            if after >= ram_threshold {
                debug!(target: "IW", "flush trigger: {} bytes buffered", after);
                state.flush_pending = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Unconditionally marks a flush pending, pausing updaters; used for
    /// externally requested flushes (commit, close).
    pub fn set_flush_pending_no_wait(&self, reason: &str) {
        let mut state = self.state.lock().unwrap();
        debug!(target: "IW", "flush pending: {}", reason);
        state.flush_pending = true;
    }

    pub fn flush_pending(&self) -> bool {
        self.state.lock().unwrap().flush_pending
    }

    pub fn flush_deletes(&self) -> bool {
        self.state.lock().unwrap().flush_deletes
    }

    /// Ends the pending flush: resets the counters and wakes updaters.
    pub fn clear_flush_pending(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.flush_pending = false;
            state.flush_deletes = false;
            state.doc_count = 0;
            state.del_count = 0;
        }
        self.changed.notify_all();
    }

    pub fn clear_deletes(&self) {
        self.state.lock().unwrap().del_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_rebalance() -> Box<dyn FnMut() -> Result<i64>> {
        Box::new(|| Ok(0))
    }

    #[test]
    fn doc_count_trigger() {
        let fc = FlushControl::new();
        let mut rb = no_rebalance();
        assert!(!fc
            .wait_update(1, 0, false, 3, DISABLE_AUTO_FLUSH, 0, 0, rb.as_mut())
            .unwrap());
        assert!(!fc
            .wait_update(1, 0, false, 3, DISABLE_AUTO_FLUSH, 0, 0, rb.as_mut())
            .unwrap());
        assert!(fc
            .wait_update(1, 0, false, 3, DISABLE_AUTO_FLUSH, 0, 0, rb.as_mut())
            .unwrap());
        assert!(fc.flush_pending());
        assert!(!fc.flush_deletes());
        fc.clear_flush_pending();
        assert!(!fc.flush_pending());
        // counters reset with the flag
        assert!(!fc
            .wait_update(1, 0, false, 3, DISABLE_AUTO_FLUSH, 0, 0, rb.as_mut())
            .unwrap());
    }

    #[test]
    fn delete_count_trigger_sets_both_flags() {
        let fc = FlushControl::new();
        let mut rb = no_rebalance();
        assert!(fc
            .wait_update(0, 2, false, DISABLE_AUTO_FLUSH, 2, 0, 0, rb.as_mut())
            .unwrap());
        assert!(fc.flush_pending());
        assert!(fc.flush_deletes());
    }

    #[test]
    fn ram_trigger_consults_rebalance() {
        let fc = FlushControl::new();
        // rebalance frees enough: no flush
        let mut shrinks = Box::new(|| Ok(10i64)) as Box<dyn FnMut() -> Result<i64>>;
        assert!(!fc
            .wait_update(1, 0, false, DISABLE_AUTO_FLUSH, DISABLE_AUTO_FLUSH, 100, 150, shrinks.as_mut())
            .unwrap());
        // rebalance doesn't help: flush
        let mut stuck = Box::new(|| Ok(150i64)) as Box<dyn FnMut() -> Result<i64>>;
        assert!(fc
            .wait_update(1, 0, false, DISABLE_AUTO_FLUSH, DISABLE_AUTO_FLUSH, 100, 150, stuck.as_mut())
            .unwrap());
    }

    #[test]
    fn skip_wait_bypasses_pending_flush() {
        let fc = FlushControl::new();
        fc.set_flush_pending_no_wait("test");
        let mut rb = no_rebalance();
        // would deadlock without skip_wait in this single-threaded test;
        // the update is accounted but triggers no second flush
        assert!(!fc
            .wait_update(0, 1, true, DISABLE_AUTO_FLUSH, DISABLE_AUTO_FLUSH, 0, 0, rb.as_mut())
            .unwrap());
        assert!(fc.flush_pending());
    }
}
