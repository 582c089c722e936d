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

//! A process-wide manager for the Enclave Page Cache (EPC): the fixed,
//! non-pageable-by-the-OS physical memory SGX enclaves are built from.
//!
//! This crate owns the free-page pool, the page registry, the global
//! reclaimable-page list, and the cluster-based reclaim algorithm that
//! keeps the pool above its low watermark by writing cold enclave pages
//! out to an external [`backing::BackingStore`]. It does not implement an
//! enclave loader, a driver ioctl surface, or a scheduler: those are
//! host concerns that sit on top of [`manager::EpcManager`] and
//! [`owner::OwnerProtocol`].
//!
//! `#![no_std]`: this crate runs in the same privileged, allocator-only
//! environment as the rest of the hypervisor it is extracted from.

#![no_std]

extern crate alloc;

pub mod error;

pub mod active_list;
pub mod allocator;
pub mod backing;
pub mod consts;
pub mod encls;
pub mod manager;
pub mod msr_cache;
pub mod owner;
pub mod page;
pub mod reclaimer;
pub mod registry;
pub mod section;
pub mod va;
pub mod wait;

pub use error::{HvError, HvErrorKind, HvResult};
pub use manager::{EpcConfig, EpcManager};
pub use page::PageId;
