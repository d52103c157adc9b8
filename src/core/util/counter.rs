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

use std::sync::atomic::{AtomicI64, Ordering};

/// A 64-bit counter safe for concurrent updates, used wherever byte and
/// term-delete totals must survive racing writers. Sequentially consistent
/// per counter; no ordering is implied between distinct counters.
#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicI64,
}

impl AtomicCounter {
    pub fn new(value: i64) -> Self {
        AtomicCounter {
            value: AtomicI64::new(value),
        }
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst)
    }

    pub fn add_and_get(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn get_and_add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::SeqCst)
    }

    pub fn increment_and_get(&self) -> i64 {
        self.add_and_get(1)
    }

    pub fn decrement_and_get(&self) -> i64 {
        self.add_and_get(-1)
    }

    pub fn get_and_increment(&self) -> i64 {
        self.get_and_add(1)
    }

    pub fn get_and_decrement(&self) -> i64 {
        self.get_and_add(-1)
    }

    pub fn compare_and_set(&self, expect: i64, update: i64) -> bool {
        self.value
            .compare_exchange(expect, update, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn get_and_set(&self, new_value: i64) -> i64 {
        self.value.swap(new_value, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn basic_ops() {
        let c = AtomicCounter::new(5);
        assert_eq!(c.get(), 5);
        assert_eq!(c.add_and_get(3), 8);
        assert_eq!(c.get_and_add(2), 8);
        assert_eq!(c.get(), 10);
        assert_eq!(c.increment_and_get(), 11);
        assert_eq!(c.decrement_and_get(), 10);
        assert_eq!(c.get_and_set(42), 10);
        assert_eq!(c.get(), 42);
        c.set(-1);
        assert_eq!(c.get(), -1);
    }

    #[test]
    fn get_and_increment_mutates() {
        // the pre-mutation value comes back, and the mutation sticks
        let c = AtomicCounter::new(7);
        assert_eq!(c.get_and_increment(), 7);
        assert_eq!(c.get(), 8);
        assert_eq!(c.get_and_decrement(), 8);
        assert_eq!(c.get(), 7);
    }

    #[test]
    fn compare_and_set() {
        let c = AtomicCounter::new(1);
        assert!(c.compare_and_set(1, 2));
        assert!(!c.compare_and_set(1, 3));
        assert_eq!(c.get(), 2);
    }

    #[test]
    fn concurrent_adds() {
        let c = Arc::new(AtomicCounter::new(0));
        let mut handles = vec![];
        for _ in 0..8 {
            let c = Arc::clone(&c);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    c.increment_and_get();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.get(), 8000);
    }
}
