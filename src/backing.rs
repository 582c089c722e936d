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

//! `BackingStore` (spec.md §6, SPEC_FULL.md §B.4): the external
//! collaborator that holds a swapped-out page's ciphertext and integrity
//! metadata while it is out of the EPC. Grounded on
//! `sgx_get_backing`/`sgx_put_backing` in
//! `arch/x86/kernel/cpu/intel_sgx.c`: backing pages and PCMD (metadata)
//! records are addressed by the same linear page index, with up to
//! [`crate::consts::METADATA_RECORDS_PER_BLOCK`] metadata records packed
//! into one backing page.

use crate::consts::METADATA_RECORD;
use crate::error::HvResult;

/// Byte offset of page `index`'s metadata record within its metadata
/// block (`index & 0x1f` selects the record, matching
/// `PCMD_FIRST_MASK` in the original driver).
pub fn metadata_offset(index: u64) -> usize {
    (index as usize & (crate::consts::METADATA_RECORDS_PER_BLOCK - 1)) * METADATA_RECORD
}

/// Which metadata block page `index`'s record lives in.
pub fn metadata_block_index(index: u64) -> u64 {
    index / crate::consts::METADATA_RECORDS_PER_BLOCK as u64
}

/// External storage for a page's ciphertext and its integrity metadata.
/// An implementation is typically backed by an anonymous-memory object or
/// a file; this crate only needs pinned, page-aligned addresses for the
/// duration of one `write`/`load_unblocked` call.
pub trait BackingStore: Send + Sync {
    /// Pin and return the virtual address of backing page `index`.
    fn get_page(&self, index: u64) -> HvResult<usize>;

    /// Unpin backing page `index`. `dirty` must be `true` only when the
    /// page was just written by a successful `EWB` (spec.md §B.4: "dirty
    /// only on success" — a failed write-back must not mark stale
    /// ciphertext as authoritative).
    fn put_page(&self, index: u64, dirty: bool) -> HvResult;

    /// Pin and return the virtual address of the metadata block
    /// containing `index`'s record. Callers add [`metadata_offset`] to
    /// reach the record itself.
    fn get_metadata(&self, index: u64) -> HvResult<usize>;

    fn put_metadata(&self, index: u64, dirty: bool) -> HvResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_offset_wraps_within_a_block() {
        assert_eq!(metadata_offset(0), 0);
        assert_eq!(metadata_offset(31), 31 * METADATA_RECORD);
        assert_eq!(metadata_offset(32), 0);
        assert_eq!(metadata_offset(33), METADATA_RECORD);
    }

    #[test]
    fn metadata_block_index_groups_32_pages() {
        assert_eq!(metadata_block_index(0), 0);
        assert_eq!(metadata_block_index(31), 0);
        assert_eq!(metadata_block_index(32), 1);
    }
}
