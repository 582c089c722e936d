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

//! `Allocator` (spec.md §4.3): blocking and non-blocking page allocation
//! against the free pool, and `free_page` (spec.md §4.6). Implemented as
//! an `impl EpcManager` block — see [`crate::manager`] for why.

use bitflags::bitflags;
use core::sync::atomic::Ordering;

use log::trace;

use crate::consts::LOW_WATERMARK;
use crate::encls;
use crate::error::{HvError, HvResult};
use crate::manager::EpcManager;
use crate::page::PageId;

bitflags! {
    pub struct AllocFlags: u32 {
        /// Never block: fail with `Busy` instead of synchronously
        /// reclaiming or yielding (spec.md §4.3).
        const ATOMIC = 1 << 0;
    }
}

impl EpcManager {
    /// Non-blocking allocation: round-robins across sections starting from
    /// the section after the last successful allocation, so repeated
    /// allocation pressure doesn't starve any one bank.
    pub fn try_alloc(&self) -> Option<PageId> {
        let sections = self.registry.sections();
        let count = sections.len();
        if count == 0 {
            return None;
        }
        let start = self.next_section.fetch_add(1, Ordering::Relaxed) % count;
        for offset in 0..count {
            let idx = (start + offset) % count;
            if let Some(id) = sections[idx].try_pop() {
                self.free_count.fetch_sub(1, Ordering::AcqRel);
                return Some(id);
            }
        }
        None
    }

    /// Allocate a page, reclaiming synchronously and retrying when the
    /// pool is empty (spec.md §4.3, §5). `ATOMIC` callers get `Busy`
    /// immediately instead of triggering a reclaim pass.
    pub fn alloc(&self, flags: AllocFlags) -> HvResult<PageId> {
        loop {
            if let Some(id) = self.try_alloc() {
                if self.free_count() < LOW_WATERMARK {
                    self.reclaim_wait.notify();
                }
                return Ok(id);
            }

            if flags.contains(AllocFlags::ATOMIC) {
                return crate::hv_result_err!(
                    Busy,
                    "no free EPC page available for an atomic allocation"
                );
            }

            if self.is_interrupted() {
                return crate::hv_result_err!(Interrupted);
            }

            trace!("alloc: pool empty, running a synchronous reclaim pass");
            self.reclaim_cluster()?;
        }
    }

    /// Return a page to its section's free pool (spec.md §4.6). The page
    /// must first be invalidated in hardware: on `EREMOVE` failure the page
    /// is left exactly where it was (still "owned by hardware") rather than
    /// freed into a pool where a stale mapping could be reused.
    pub fn free_page(&self, id: PageId) -> HvResult {
        let page = self.registry.page(id);
        encls::remove(self.backend(), page.phys_addr()).map_err(HvError::from)?;
        page.remove_flags(crate::page::EpcPageFlags::all());
        page.set_owner(None);
        let section = self.registry.resolve(id)?;
        section.push(id);
        self.free_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encls::mock::MockEnclsBackend;
    use crate::manager::EpcConfig;
    use crate::section::{EpcBankInfo, EpcMapper};
    use alloc::boxed::Box;

    struct IdentityMapper;
    impl EpcMapper for IdentityMapper {
        fn map(&self, phys_base: usize, _size: usize) -> HvResult<usize> {
            Ok(phys_base | 0xffff_0000_0000_0000)
        }
        fn unmap(&self, _virt_base: usize, _size: usize) {}
    }

    fn small_manager(pages: usize) -> EpcManager {
        let banks = [EpcBankInfo {
            phys_base: 0x1000_0000,
            size: pages * crate::consts::PAGE_SIZE,
        }];
        EpcManager::init(
            EpcConfig::default(),
            Box::new(MockEnclsBackend::new()),
            &banks,
            &IdentityMapper,
        )
        .unwrap()
    }

    #[test]
    fn try_alloc_on_empty_pool_returns_none() {
        let manager = small_manager(0);
        assert_eq!(manager.try_alloc(), None);
    }

    #[test]
    fn atomic_alloc_fails_fast_without_reclaiming() {
        let manager = small_manager(0);
        let err = manager.alloc(AllocFlags::ATOMIC).unwrap_err();
        assert_eq!(err.kind(), crate::error::HvErrorKind::Busy);
    }

    #[test]
    fn free_page_round_trips_through_remove_and_push() {
        let manager = small_manager(4);
        let id = manager.try_alloc().unwrap();
        assert_eq!(manager.free_count(), 3);
        manager.free_page(id).unwrap();
        assert_eq!(manager.free_count(), 4);
    }
}
