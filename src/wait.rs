// Copyright (C) 2023 Ant Group CO., Ltd. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A minimal condition-variable-shaped primitive for the reclaimer's wait
//! point (spec.md §5, "Suspension points").
//!
//! The teacher is bare-metal and has no thread scheduler of its own, so
//! this cannot lean on a real OS wait queue the way
//! `asterinas-asterinas`'s `sync::wait::WaitQueue` does. `WaitCell` keeps
//! that type's `wait_until(condition)` / `notify` shape — check the
//! condition, and only block if it's still false — but the "block" step is
//! a pluggable [`ParkHook`] rather than a task-scheduler handoff. A host
//! integrating this crate supplies a real parking primitive (e.g. one
//! backed by its own wait queue); the default just spins.

use core::sync::atomic::{AtomicU64, Ordering};

/// How the current thread waits between polls of the wait condition.
pub trait ParkHook: Send + Sync {
    fn park(&self);
}

/// Default, dependency-free hook: a bounded spin loop. Adequate for tests
/// and for hosts that haven't wired in a real scheduler yet.
pub struct SpinParkHook;

impl ParkHook for SpinParkHook {
    fn park(&self) {
        for _ in 0..64 {
            core::hint::spin_loop();
        }
    }
}

pub struct WaitCell {
    generation: AtomicU64,
}

impl WaitCell {
    pub const fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
        }
    }

    /// Block until `cond` returns `true`. The condition is re-checked after
    /// recording the current generation so a `notify` racing with the
    /// check is never lost (same ordering discipline as
    /// `WaitQueue::wait_until`: enqueue/observe before sleeping).
    pub fn wait_until(&self, park: &dyn ParkHook, mut cond: impl FnMut() -> bool) {
        loop {
            let gen = self.generation.load(Ordering::Acquire);
            if cond() {
                return;
            }
            while self.generation.load(Ordering::Acquire) == gen {
                park.park();
            }
        }
    }

    /// Wake anyone parked in `wait_until`.
    pub fn notify(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }
}

impl Default for WaitCell {
    fn default() -> Self {
        Self::new()
    }
}
