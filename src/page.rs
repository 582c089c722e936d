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

//! `EpcPage`: the descriptor for one hardware EPC page (spec.md §3).

use alloc::sync::Weak;
use bitflags::bitflags;
use spin::Mutex;

use crate::consts::{PAGE_SIZE, SECTION_MASK};
use crate::owner::OwnerProtocol;

/// Index into [`crate::registry::PageRegistry`]'s flat page array. Stable
/// for the lifetime of the process: the page set is fixed at boot and
/// never resized (spec.md §3, "destroyed never").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u32);

bitflags! {
    /// The four flag bits named in spec.md §3.
    pub struct EpcPageFlags: u8 {
        /// On the global `ActiveList`, a candidate for reclaim.
        const RECLAIMABLE         = 1 << 0;
        /// Detached from every list visible to `Allocator`/`ActiveList`
        /// while the reclaimer works on it.
        const RECLAIM_IN_PROGRESS = 1 << 1;
        /// Belongs to an enclave's address space (as opposed to a VA page).
        const ENCLAVE             = 1 << 2;
        /// Typed as a version-array page via `EPA`.
        const VERSION_ARRAY       = 1 << 3;
    }
}

/// Mutable per-page state, guarded by one lock per page. Flag transitions
/// and owner assignment only ever happen under `Allocator`/`ActiveList`/
/// `Reclaimer` bookkeeping, so a per-page lock (rather than a single
/// crate-wide one) keeps unrelated pages from contending with each other.
struct PageState {
    flags: EpcPageFlags,
    owner: Option<Weak<dyn OwnerProtocol>>,
}

pub struct EpcPage {
    /// `(phys_base + i * PAGE_SIZE) | section_index`, per spec.md §4.2.
    /// Immutable after section construction — physical identity never
    /// changes for the life of the page.
    desc: usize,
    state: Mutex<PageState>,
}

impl EpcPage {
    pub(crate) fn new(phys_addr: usize, section_index: u8) -> Self {
        debug_assert_eq!(phys_addr & !(PAGE_SIZE - 1), phys_addr, "phys_addr must be page-aligned");
        Self {
            desc: phys_addr | section_index as usize,
            state: Mutex::new(PageState {
                flags: EpcPageFlags::empty(),
                owner: None,
            }),
        }
    }

    /// The section this page belongs to (low 8 bits of the descriptor).
    pub fn section_index(&self) -> u8 {
        (self.desc & SECTION_MASK) as u8
    }

    /// Page-aligned physical address.
    pub fn phys_addr(&self) -> usize {
        self.desc & !(PAGE_SIZE - 1)
    }

    /// Physical page-frame number (`phys_addr >> PAGE_SHIFT`).
    pub fn pfn(&self) -> usize {
        self.phys_addr() >> crate::consts::PAGE_SHIFT
    }

    pub fn flags(&self) -> EpcPageFlags {
        self.state.lock().flags
    }

    pub(crate) fn insert_flags(&self, flags: EpcPageFlags) {
        self.state.lock().flags.insert(flags);
    }

    pub(crate) fn remove_flags(&self, flags: EpcPageFlags) {
        self.state.lock().flags.remove(flags);
    }

    pub fn is_reclaim_in_progress(&self) -> bool {
        self.flags().contains(EpcPageFlags::RECLAIM_IN_PROGRESS)
    }

    pub(crate) fn set_owner(&self, owner: Option<Weak<dyn OwnerProtocol>>) {
        self.state.lock().owner = owner;
    }

    pub(crate) fn owner(&self) -> Option<Weak<dyn OwnerProtocol>> {
        self.state.lock().owner.clone()
    }

    pub fn has_owner(&self) -> bool {
        self.state.lock().owner.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_packs_phys_addr_and_section() {
        let page = EpcPage::new(0x7000_1000, 3);
        assert_eq!(page.section_index(), 3);
        assert_eq!(page.phys_addr(), 0x7000_1000);
        assert_eq!(page.pfn(), 0x7000_1);
    }

    #[test]
    fn flags_round_trip() {
        let page = EpcPage::new(0x1000, 0);
        assert!(page.flags().is_empty());
        page.insert_flags(EpcPageFlags::RECLAIMABLE);
        assert!(page.flags().contains(EpcPageFlags::RECLAIMABLE));
        page.remove_flags(EpcPageFlags::RECLAIMABLE);
        assert!(page.flags().is_empty());
    }
}
