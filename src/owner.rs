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

//! `OwnerProtocol`: the capability set an owner implements so the
//! `Reclaimer` can cooperate with it (spec.md §4.7).
//!
//! This is a capability interface, not an inheritance hierarchy (spec.md
//! §9): the reclaimer only ever calls through `&dyn OwnerProtocol` and never
//! downcasts to a concrete owner kind. `EpcPage::owner` holds a `Weak`
//! reference to the same trait object so an owner mid-teardown is
//! observable without keeping it alive.

use crate::error::HvResult;
use crate::page::PageId;

/// The contract an owner (e.g. an enclave page, or a version-array page
/// belonging to an enclave) implements.
pub trait OwnerProtocol: Send + Sync {
    /// Try to take a reference so the owner cannot vanish during reclaim.
    /// Returns `false` if the owner is already being torn down.
    fn get(&self, page: PageId) -> bool;

    /// Drop the reference taken by a matching `get`. May be the owner's
    /// last reference, triggering owner teardown.
    fn put(&self, page: PageId);

    /// Acquire the owner's lock and decide whether `page` may be reclaimed
    /// this pass: `false` if the page is hot (young bit set) or already
    /// reserved, otherwise marks it reserved and returns `true`.
    fn reclaim(&self, page: PageId) -> bool;

    /// Invoke `BLOCK` under the owner's lock.
    fn block(&self, page: PageId) -> HvResult;

    /// Perform the write-back protocol (spec.md §4.7): pick a VA slot,
    /// `WRITEBACK`, recover locally from `NOT_TRACKED`, record the VA
    /// location, and clear `RESERVED`/`LOADED`.
    fn write(&self, page: PageId) -> HvResult;

    /// Hook for spec.md §B.3's SECS write-back cascade: called by an
    /// owner's `write` implementation when it was the enclave's last child
    /// and the enclave is already initialized. Most owner kinds (e.g. a
    /// bare version-array page) have nothing to do here.
    fn on_last_child_freed(&self) -> HvResult {
        Ok(())
    }
}
