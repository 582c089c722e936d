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

//! `PageRegistry`: owns every `EpcPage` descriptor, resolves a page to its
//! section, and exposes pin/unpin (spec.md §4.2).

use alloc::vec::Vec;
use core::ops::Deref;

use crate::consts::PAGE_SIZE;
use crate::error::HvResult;
use crate::page::{EpcPage, PageId};
use crate::section::EpcSection;

pub struct PageRegistry {
    pages: Vec<EpcPage>,
    sections: Vec<EpcSection>,
}

impl PageRegistry {
    pub(crate) fn new(pages: Vec<EpcPage>, sections: Vec<EpcSection>) -> Self {
        Self { pages, sections }
    }

    pub fn page(&self, id: PageId) -> &EpcPage {
        &self.pages[id.0 as usize]
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn section(&self, index: u8) -> HvResult<&EpcSection> {
        self.sections
            .get(index as usize)
            .ok_or_else(|| hv_err!(BadState, "section index out of range"))
    }

    pub fn sections(&self) -> &[EpcSection] {
        &self.sections
    }

    /// `PageRegistry::resolve(page) -> &section`.
    pub fn resolve(&self, id: PageId) -> HvResult<&EpcSection> {
        self.section(self.page(id).section_index())
    }

    /// Pin `id` for the duration of the returned guard, yielding a usable
    /// virtual address. Callers must not retain the address past the
    /// guard's scope (spec.md §4.2).
    pub fn pin(&self, id: PageId) -> HvResult<PinnedPage<'_>> {
        let page = self.page(id);
        let section = self.resolve(id)?;
        let addr = section.virt_base + (page.phys_addr() - section.phys_base);
        Ok(PinnedPage { addr, _marker: core::marker::PhantomData })
    }
}

/// A scoped, guaranteed-release virtual-address mapping for one EPC page.
///
/// On 64-bit hosts the EPC mapping is permanent, so dropping this guard is a
/// no-op; it still exists so callers have a single RAII shape regardless of
/// host bitness (spec.md §4.2: "unpin is a no-op ... and a scoped
/// atomic-map release on 32-bit").
pub struct PinnedPage<'a> {
    addr: usize,
    _marker: core::marker::PhantomData<&'a ()>,
}

impl PinnedPage<'_> {
    pub fn addr(&self) -> usize {
        self.addr
    }
}

impl Deref for PinnedPage<'_> {
    type Target = usize;
    fn deref(&self) -> &usize {
        &self.addr
    }
}

static_assertions::const_assert!(PAGE_SIZE > 0);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::EpcPage;
    use crate::section::EpcSection;

    fn build_registry() -> PageRegistry {
        let section = EpcSection::new(0x7000_0000, 0xffff_8000_0000, 0..4);
        let pages = (0..4u32)
            .map(|i| EpcPage::new(0x7000_0000 + i as usize * PAGE_SIZE, 0))
            .collect();
        PageRegistry::new(pages, alloc::vec![section])
    }

    #[test]
    fn resolve_and_pin_compute_expected_address() {
        let reg = build_registry();
        let id = PageId(2);
        let section = reg.resolve(id).unwrap();
        assert_eq!(section.phys_base, 0x7000_0000);
        let pinned = reg.pin(id).unwrap();
        assert_eq!(*pinned, 0xffff_8000_0000 + 2 * PAGE_SIZE);
    }
}
