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

//! Numeric constants that must agree across every layer (spec.md §6).

/// Every hardware page is 4 KiB.
pub const PAGE_SIZE: usize = 0x1000;
pub const PAGE_SHIFT: usize = 12;

/// Low 8 bits of a page descriptor carry the owning section's index.
pub const SECTION_MASK: usize = 0xff;

/// The descriptor format allows up to this many distinct sections to exist.
pub const MAX_SECTIONS: usize = 256;

/// Firmware may report at most this many distinct EPC banks.
pub const MAX_FIRMWARE_BANKS: usize = 8;

/// A version-array page authenticates this many swapped-out pages.
pub const SLOTS_PER_VA_PAGE: usize = 32;

/// Byte distance between two adjacent VA slots.
pub const SLOT_STRIDE: usize = 8;

/// Upper bound on the number of pages a single reclaim pass considers.
pub const CLUSTER: usize = 16;

/// `alloc()` wakes the reclaimer once free_count drops below this.
pub const LOW_WATERMARK: usize = 32;

/// The reclaimer's background wait condition.
pub const HIGH_WATERMARK: usize = 64;

/// Size in bytes of one integrity-metadata (pcmd) record.
pub const METADATA_RECORD: usize = 128;

/// Number of metadata records packed into one backing metadata block.
pub const METADATA_RECORDS_PER_BLOCK: usize = PAGE_SIZE / METADATA_RECORD;

static_assertions::const_assert_eq!(METADATA_RECORDS_PER_BLOCK, SLOTS_PER_VA_PAGE);
static_assertions::const_assert!(CLUSTER <= LOW_WATERMARK);
static_assertions::const_assert!(LOW_WATERMARK < HIGH_WATERMARK);
