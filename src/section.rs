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

//! `EpcSection`: one firmware-reported contiguous EPC bank (spec.md §3,
//! §4.2).
//!
//! The free stack uses the same asymmetric-lock trick as the original
//! Linux core (`sgx_try_alloc_page`/`sgx_free_page`): allocation takes the
//! section's write lock because it must atomically test-and-decrement the
//! free count, but returning a page only needs the read lock, because the
//! slot it writes into is reserved up front by an atomic fetch-add, making
//! concurrent frees disjoint writes into the backing array.

use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::ops::Range;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::RwLock;

use crate::error::HvResult;
use crate::page::PageId;

/// Fixed-capacity stack of free `PageId`s, indexed by an atomic count so
/// that pushes (frees) and the single in-flight pop (alloc) can be
/// synchronized with a reader/writer split instead of one exclusive lock.
struct FreeStack {
    // SAFETY: entries at indices `< len` are only ever written by the
    // unique writer that reserved that index via `len.fetch_add`, under the
    // section's read lock; the write-lock holder (pop) has exclusive access
    // to the whole array and never aliases a concurrent push.
    slots: UnsafeCell<Vec<PageId>>,
    len: AtomicUsize,
}

unsafe impl Sync for FreeStack {}

impl FreeStack {
    fn with_capacity(cap: usize) -> Self {
        Self {
            slots: UnsafeCell::new(alloc::vec![PageId(0); cap]),
            len: AtomicUsize::new(0),
        }
    }

    /// Exclusive pop: caller must hold the section's write lock.
    fn pop_exclusive(&self) -> Option<PageId> {
        let len = self.len.load(Ordering::Relaxed);
        if len == 0 {
            return None;
        }
        let slots = unsafe { &*self.slots.get() };
        let page = slots[len - 1];
        self.len.store(len - 1, Ordering::Relaxed);
        Some(page)
    }

    /// Shared push: caller must hold the section's read lock. Reserves a
    /// unique index before writing into it.
    fn push_shared(&self, page: PageId) {
        let idx = self.len.fetch_add(1, Ordering::AcqRel);
        let slots = unsafe { &mut *self.slots.get() };
        slots[idx] = page;
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }
}

pub struct EpcSection {
    pub phys_base: usize,
    pub virt_base: usize,
    /// Range of global `PageId`s that belong to this section.
    pub page_range: Range<u32>,
    free: FreeStack,
    /// `RwLock` guarding the free-stack's size invariant: writers are
    /// allocators (pop), readers are `free_page` (push). The `()` payload
    /// carries no data — the lock exists purely for the exclusion policy.
    lock: RwLock<()>,
    /// Pages that must be `REMOVE`d before first use (spec.md §3).
    unsanitized: spin::Mutex<Vec<PageId>>,
}

impl EpcSection {
    pub fn new(phys_base: usize, virt_base: usize, page_range: Range<u32>) -> Self {
        let count = page_range.len();
        let free = FreeStack::with_capacity(count);
        for (i, id) in page_range.clone().enumerate() {
            // SAFETY: single-threaded during construction.
            unsafe { (&mut *free.slots.get())[i] = PageId(id) };
        }
        free.len.store(count, Ordering::Relaxed);
        Self {
            phys_base,
            virt_base,
            page_range,
            free,
            lock: RwLock::new(()),
            unsanitized: spin::Mutex::new(Vec::new()),
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_range.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn contains(&self, id: PageId) -> bool {
        self.page_range.contains(&id.0)
    }

    /// Non-blocking pop from the free stack (the allocator's write path).
    pub fn try_pop(&self) -> Option<PageId> {
        let _guard = self.lock.write();
        self.free.pop_exclusive()
    }

    /// Return a page to the free stack (`free_page`'s read path).
    pub fn push(&self, id: PageId) {
        debug_assert!(self.contains(id), "page does not belong to this section");
        let _guard = self.lock.read();
        self.free.push_shared(id);
    }

    pub fn mark_unsanitized(&self, id: PageId) {
        self.unsanitized.lock().push(id);
    }

    /// Drain the unsanitized list so the caller can `REMOVE` each page
    /// before it first becomes available to `Allocator`.
    pub fn take_unsanitized(&self) -> Vec<PageId> {
        core::mem::take(&mut *self.unsanitized.lock())
    }
}

/// Describes one firmware-reported `(physical_base, size)` EPC bank
/// (spec.md §6, "Firmware discovery").
#[derive(Debug, Clone, Copy)]
pub struct EpcBankInfo {
    pub phys_base: usize,
    pub size: usize,
}

impl EpcBankInfo {
    pub fn page_count(&self) -> usize {
        self.size / crate::consts::PAGE_SIZE
    }
}

/// Maps a physical EPC bank into kernel-visible virtual space. The
/// out-of-scope fault handler / memory-map layer supplies the mapping; this
/// crate only needs the resulting virtual base address.
pub trait EpcMapper {
    fn map(&self, phys_base: usize, size: usize) -> HvResult<usize>;
    fn unmap(&self, virt_base: usize, size: usize);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_round_trip_preserves_count() {
        let section = EpcSection::new(0x7000_0000, 0xffff_0000_0000, 0..512);
        assert_eq!(section.free_count(), 512);
        let page = section.try_pop().unwrap();
        assert_eq!(section.free_count(), 511);
        section.push(page);
        assert_eq!(section.free_count(), 512);
    }

    #[test]
    fn empty_section_returns_none() {
        let section = EpcSection::new(0x7000_0000, 0xffff_0000_0000, 0..0);
        assert!(section.try_pop().is_none());
    }
}
