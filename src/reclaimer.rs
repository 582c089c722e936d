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

//! `Reclaimer` (spec.md §4.5): the three-phase cluster reclaim algorithm,
//! grounded directly on `sgx_swap_cluster`/`ksgxswapd` in
//! `arch/x86/kernel/cpu/intel_sgx.c`. Implemented as an `impl EpcManager`
//! block — see [`crate::manager`].
//!
//! Phase 1 (select) walks the active list head-first, asking each owner's
//! `get`/`reclaim` whether the page can be taken this pass; phase 2
//! (block) calls `block` on every selected page; phase 3 (write) calls
//! `write` (which folds in `ETRACK`/`EWB`/`NOT_TRACKED` retry, per
//! [`crate::owner::OwnerProtocol::write`]'s contract) and then frees the
//! page. A failure partway through phase 2 or 3 rolls the *untouched*
//! remainder of the cluster back onto the active list rather than leaking
//! their `RECLAIM_IN_PROGRESS` reservation.

use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{trace, warn};

use crate::consts::{CLUSTER, HIGH_WATERMARK};
use crate::error::HvResult;
use crate::manager::EpcManager;
use crate::owner::OwnerProtocol;
use crate::page::PageId;
use crate::wait::ParkHook;

type Candidate = (PageId, Arc<dyn OwnerProtocol>);

impl EpcManager {
    /// Run one reclaim pass: select up to [`CLUSTER`] pages, block them,
    /// write them back, and return their physical pages to the free pool.
    pub fn reclaim_cluster(&self) -> HvResult {
        let cluster = self.select_cluster();
        if cluster.is_empty() {
            return crate::hv_result_err!(
                OutOfMemory,
                "no reclaimable page found on the active list"
            );
        }
        trace!("reclaim: selected {} pages", cluster.len());

        if let Err(e) = self.block_phase(&cluster) {
            return Err(e);
        }
        self.write_phase(cluster)
    }

    /// Bounded by the number of pages *examined*, not accepted: a pass
    /// where every candidate rotates past or gets vetoed must still
    /// terminate after `CLUSTER` pops, mirroring `sgx_swap_cluster`'s
    /// `SGX_NR_TO_SCAN` bound.
    fn select_cluster(&self) -> Vec<Candidate> {
        let mut cluster = Vec::with_capacity(CLUSTER);
        for _ in 0..CLUSTER {
            let Some(id) = self.active_list.peek_head() else {
                break;
            };
            let Some(owner) = self
                .registry
                .page(id)
                .owner()
                .and_then(|weak| weak.upgrade())
            else {
                // Owner has already been torn down; its own teardown path
                // is responsible for this page, so it is simply dropped
                // from the active list rather than reinserted.
                self.active_list.take_head(&self.registry);
                continue;
            };
            if !owner.get(id) {
                // Owner declined the probe; rotate past without detaching
                // so the page keeps its place on the list for the next
                // pass instead of leaking `RECLAIM_IN_PROGRESS`.
                self.active_list.rotate_head_to_tail();
                continue;
            }
            self.active_list.take_head(&self.registry);
            if !owner.reclaim(id) {
                owner.put(id);
                self.active_list.reinsert(&self.registry, id);
                continue;
            }
            cluster.push((id, owner));
        }
        cluster
    }

    fn block_phase(&self, cluster: &[Candidate]) -> HvResult {
        for (i, (id, owner)) in cluster.iter().enumerate() {
            if let Err(e) = owner.block(*id) {
                warn!("reclaim: block failed on page {:?}: {}", id, e);
                self.rollback(&cluster[i..]);
                return Err(e);
            }
        }
        Ok(())
    }

    fn write_phase(&self, cluster: Vec<Candidate>) -> HvResult {
        for (i, (id, owner)) in cluster.iter().enumerate() {
            if let Err(e) = owner.write(*id) {
                warn!("reclaim: write-back failed on page {:?}: {}", id, e);
                self.rollback(&cluster[i..]);
                return Err(e);
            }
            owner.put(*id);
            self.free_page(*id)?;
        }
        Ok(())
    }

    fn rollback(&self, remaining: &[Candidate]) {
        for (id, owner) in remaining {
            owner.put(*id);
            self.active_list.reinsert(&self.registry, *id);
        }
    }

    /// Background task body: sleeps until `free_count` drops under
    /// [`crate::consts::LOW_WATERMARK`] (spec.md §5) and reclaims clusters
    /// until it has climbed back over [`HIGH_WATERMARK`]. Intended to run
    /// on a dedicated host-spawned task; `park` is the host's blocking
    /// primitive (see [`crate::wait`]).
    pub fn run_reclaim_loop(&self, park: &dyn ParkHook) {
        loop {
            self.reclaim_wait
                .wait_until(park, || self.free_count() < HIGH_WATERMARK);
            while self.free_count() < HIGH_WATERMARK {
                if self.reclaim_cluster().is_err() {
                    break;
                }
            }
        }
    }
}
