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

//! `EpcManager`: the process-wide singleton tying sections, the page
//! registry, the active list and the reclaimer together (spec.md §9,
//! "Global mutable state ... modeled as a process-wide singleton").
//!
//! `Allocator` and `Reclaimer` (spec.md §4.3, §4.5) are not separate
//! structs here: their state (the free pool, the active list, the
//! reclaim wait point) all lives on one `EpcManager`, and their
//! operations are split across [`crate::allocator`] and
//! [`crate::reclaimer`] as `impl EpcManager` blocks in those files, the
//! way the teacher keeps one `Vcpu` or `Enclave` struct's behavior spread
//! across several modules.

use alloc::boxed::Box;
use alloc::sync::Weak;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::{debug, info};

use crate::active_list::ActiveList;
use crate::encls::EnclsBackend;
use crate::error::HvResult;
use crate::msr_cache::LaunchMsrCache;
use crate::owner::OwnerProtocol;
use crate::page::EpcPage;
use crate::page::PageId;
use crate::registry::PageRegistry;
use crate::section::{EpcBankInfo, EpcMapper, EpcSection};
use crate::wait::WaitCell;

/// Runtime configuration supplied by the host at [`EpcManager::init`]
/// (SPEC_FULL.md §A.3).
#[derive(Debug, Clone, Copy)]
pub struct EpcConfig {
    /// Whether the platform enables launch control (writable
    /// `IA32_SGXLEPUBKEYHASH*`). When `false`, [`crate::msr_cache::einit`]
    /// skips the MSR-diffing path entirely (spec.md §4.8).
    pub launch_control_enabled: bool,
}

impl Default for EpcConfig {
    fn default() -> Self {
        Self {
            launch_control_enabled: true,
        }
    }
}

pub struct EpcManager {
    pub(crate) registry: PageRegistry,
    pub(crate) active_list: ActiveList,
    pub(crate) free_count: AtomicUsize,
    pub(crate) next_section: AtomicUsize,
    pub(crate) reclaim_wait: WaitCell,
    pub(crate) interrupted: AtomicBool,
    pub(crate) backend: Box<dyn EnclsBackend>,
    pub(crate) msr_cache: LaunchMsrCache,
    pub(crate) config: EpcConfig,
}

impl EpcManager {
    /// Build the registry from firmware-discovered `(phys_base, size)`
    /// banks (SPEC_FULL.md §B.1), mapping each into virtual space via
    /// `mapper`.
    pub fn init(
        config: EpcConfig,
        backend: Box<dyn EnclsBackend>,
        banks: &[EpcBankInfo],
        mapper: &dyn EpcMapper,
    ) -> HvResult<Self> {
        if banks.is_empty() || banks.len() > crate::consts::MAX_FIRMWARE_BANKS {
            return crate::hv_result_err!(BadState, "unexpected firmware EPC bank count");
        }

        let mut sections = Vec::with_capacity(banks.len());
        let mut pages = Vec::new();
        let mut next_id: u32 = 0;
        for bank in banks {
            let virt_base = mapper.map(bank.phys_base, bank.size)?;
            let section_index = sections.len() as u8;
            let page_count = bank.page_count() as u32;
            let range = next_id..(next_id + page_count);
            for i in 0..page_count {
                let phys = bank.phys_base + i as usize * crate::consts::PAGE_SIZE;
                pages.push(EpcPage::new(phys, section_index));
            }
            sections.push(EpcSection::new(bank.phys_base, virt_base, range));
            next_id += page_count;
            info!(
                "EPC section {}: {} pages at phys {:#x}",
                section_index, page_count, bank.phys_base
            );
        }

        let free_count = sections.iter().map(|s| s.free_count()).sum();
        let registry = PageRegistry::new(pages, sections);

        Ok(Self {
            registry,
            active_list: ActiveList::new(),
            free_count: AtomicUsize::new(free_count),
            next_section: AtomicUsize::new(0),
            reclaim_wait: WaitCell::new(),
            interrupted: AtomicBool::new(false),
            backend,
            msr_cache: LaunchMsrCache::new(),
            config,
        })
    }

    pub fn registry(&self) -> &PageRegistry {
        &self.registry
    }

    pub fn active_list(&self) -> &ActiveList {
        &self.active_list
    }

    pub fn backend(&self) -> &dyn EnclsBackend {
        self.backend.as_ref()
    }

    pub fn msr_cache(&self) -> &LaunchMsrCache {
        &self.msr_cache
    }

    pub fn config(&self) -> &EpcConfig {
        &self.config
    }

    pub fn free_count(&self) -> usize {
        self.free_count.load(Ordering::Relaxed)
    }

    pub fn page_count(&self) -> usize {
        self.registry.page_count()
    }

    /// Request that any thread blocked in [`crate::allocator`]'s
    /// non-atomic `alloc` unwind with `Interrupted` at its next poll
    /// (spec.md §7). The host is responsible for deciding when this is
    /// appropriate (e.g. a pending signal against the calling task).
    pub fn request_interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    pub fn clear_interrupt(&self) {
        self.interrupted.store(false, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// Bind `page` to the owner that will be asked for `get`/`reclaim`/
    /// `block`/`write` if it ever becomes reclaimable. A `Weak` reference
    /// is stored, not an `Arc`, so an owner mid-teardown is observable to
    /// the reclaimer rather than kept artificially alive (spec.md §9).
    pub fn assign_owner(&self, page: PageId, owner: Weak<dyn OwnerProtocol>) {
        self.registry.page(page).set_owner(Some(owner));
    }

    pub fn clear_owner(&self, page: PageId) {
        self.registry.page(page).set_owner(None);
    }

    /// Tear down: nothing to free explicitly, since every `EpcPage`'s
    /// lifetime is tied to this struct's, but log the final occupancy so a
    /// leaked-reservation bug at shutdown is visible (spec.md §3,
    /// "destroyed never" during normal operation; this path only runs at
    /// process exit).
    pub fn teardown(&self) {
        let reserved = self.page_count() - self.free_count();
        if reserved != 0 {
            debug!("EPC teardown with {} pages still reserved", reserved);
        }
    }
}

/// Enumerate EPC banks via `CPUID.(EAX=12H, ECX>=2)` (SPEC_FULL.md §B.1),
/// grounded on `sgx_init_epc_bank`'s boot-time loop over sub-leaves in
/// `arch/x86/kernel/cpu/intel_sgx.c`: sub-leaf `i` is valid exactly while
/// its low nibble of `EAX` is `1`.
#[cfg(target_arch = "x86_64")]
pub fn discover_epc_banks() -> Vec<EpcBankInfo> {
    use raw_cpuid::cpuid;

    let mut banks = Vec::new();
    for sub_leaf in 2..(2 + crate::consts::MAX_FIRMWARE_BANKS as u32) {
        let res = cpuid!(0x12, sub_leaf);
        if res.eax & 0xf != 1 {
            break;
        }
        let phys_base =
            ((res.eax as u64 & 0xffff_f000) | ((res.ebx as u64 & 0xf_ffff) << 32)) as usize;
        let size = ((res.ecx as u64 & 0xffff_f000) | ((res.edx as u64 & 0xf_ffff) << 32)) as usize;
        banks.push(EpcBankInfo { phys_base, size });
    }
    banks
}

/// Mirrors `sgx_is_enabled` in `arch/x86/kernel/cpu/intel_sgx.c`: SGX is
/// usable only when the CPU advertises the feature *and* firmware has
/// locked `IA32_FEATURE_CONTROL` with the SGX-enable bit set (bit 18).
#[cfg(target_arch = "x86_64")]
pub fn sgx_enabled() -> bool {
    use raw_cpuid::CpuId;
    use x86_64::registers::model_specific::Msr;

    const IA32_FEATURE_CONTROL: u32 = 0x3a;
    const LOCK_BIT: u64 = 1 << 0;
    const SGX_ENABLE_BIT: u64 = 1 << 18;

    let has_sgx = CpuId::new()
        .get_extended_feature_info()
        .map(|f| f.has_sgx())
        .unwrap_or(false);
    if !has_sgx {
        return false;
    }

    // SAFETY: reading a documented, always-present MSR.
    let feature_control = unsafe { Msr::new(IA32_FEATURE_CONTROL).read() };
    feature_control & LOCK_BIT != 0 && feature_control & SGX_ENABLE_BIT != 0
}
