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

//! `VersionArrayPage` and the per-owner VA-page ring (spec.md §3, §4.7,
//! SPEC_FULL.md §B.2). Grounded on
//! `drivers/platform/x86/intel_sgx/sgx_encl_page.c`'s
//! `sgx_alloc_va_slot`/`sgx_va_page_full`/`sgx_free_va_slot`.

use alloc::collections::VecDeque;

use crate::consts::{SLOTS_PER_VA_PAGE, SLOT_STRIDE};
use crate::page::PageId;

/// One version-array EPC page: up to [`SLOTS_PER_VA_PAGE`] slots, each
/// binding the integrity metadata of one swapped-out page. `epc_page` must
/// already be typed via `EPA` before use.
pub struct VaPage {
    pub epc_page: PageId,
    slots: u32,
}

impl VaPage {
    pub fn new(epc_page: PageId) -> Self {
        Self { epc_page, slots: 0 }
    }

    /// Allocate the lowest-numbered free slot, returning its byte offset
    /// inside the page (`slot_index * SLOT_STRIDE`).
    pub fn alloc_slot(&mut self) -> Option<usize> {
        let slot = (0..SLOTS_PER_VA_PAGE).find(|&i| self.slots & (1 << i) == 0)?;
        self.slots |= 1 << slot;
        Some(slot * SLOT_STRIDE)
    }

    pub fn free_slot(&mut self, offset: usize) {
        let slot = offset / SLOT_STRIDE;
        self.slots &= !(1 << slot);
    }

    pub fn is_full(&self) -> bool {
        // SLOTS_PER_VA_PAGE is exactly 32, so the all-occupied mask spans
        // the full width of `slots`; `1u32 << 32` would overflow the shift.
        self.slots == u32::MAX
    }

    pub fn is_slot_occupied(&self, offset: usize) -> bool {
        self.slots & (1 << (offset / SLOT_STRIDE)) != 0
    }
}

/// The ring of VA pages an owner draws slots from. Mirrors
/// `encl->va_pages`: the head is tried first, and a page that fills up
/// rotates to the tail (spec.md §4.7 step 1).
#[derive(Default)]
pub struct VaRing {
    pages: VecDeque<VaPage>,
}

impl VaRing {
    pub fn new() -> Self {
        Self {
            pages: VecDeque::new(),
        }
    }

    pub fn push(&mut self, page: VaPage) {
        self.pages.push_back(page);
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Allocate a slot from the head VA page, rotating it to the tail if it
    /// is now full. Returns the VA page's `PageId` and the slot's byte
    /// offset inside it.
    pub fn alloc_slot(&mut self) -> Option<(PageId, usize)> {
        let mut head = self.pages.pop_front()?;
        let offset = head.alloc_slot();
        let epc_page = head.epc_page;
        let full = head.is_full();
        self.pages.push_front(head);
        if full {
            if let Some(page) = self.pages.pop_front() {
                self.pages.push_back(page);
            }
        }
        offset.map(|o| (epc_page, o))
    }

    pub fn free_slot(&mut self, va_page: PageId, offset: usize) {
        if let Some(page) = self.pages.iter_mut().find(|p| p.epc_page == va_page) {
            page.free_slot(offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_allocate_in_order_and_free() {
        let mut page = VaPage::new(PageId(0));
        assert_eq!(page.alloc_slot(), Some(0));
        assert_eq!(page.alloc_slot(), Some(SLOT_STRIDE));
        page.free_slot(0);
        assert!(!page.is_full());
        assert_eq!(page.alloc_slot(), Some(0));
    }

    #[test]
    fn full_va_page_rejects_further_allocation() {
        let mut page = VaPage::new(PageId(0));
        for _ in 0..SLOTS_PER_VA_PAGE {
            assert!(page.alloc_slot().is_some());
        }
        assert!(page.is_full());
        assert_eq!(page.alloc_slot(), None);
    }

    #[test]
    fn ring_rotates_full_page_to_tail() {
        let mut ring = VaRing::new();
        ring.push(VaPage::new(PageId(1)));
        ring.push(VaPage::new(PageId(2)));

        for _ in 0..SLOTS_PER_VA_PAGE {
            let (id, _) = ring.alloc_slot().unwrap();
            assert_eq!(id, PageId(1));
        }
        // page 1 is now full and should have rotated behind page 2.
        let (id, _) = ring.alloc_slot().unwrap();
        assert_eq!(id, PageId(2));
    }
}
