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

//! Typed, fallible wrappers around every privileged page-management opcode
//! (spec.md §4.1, "InstructionWrappers").
//!
//! Every function here takes a `&dyn EnclsBackend` so the caller controls
//! which concrete ISA dispatch is used (real hardware vs. a test mock), and
//! returns [`EnclsError`] rather than [`crate::error::HvError`] directly:
//! `NOT_TRACKED` must be recoverable locally by the write-back path (spec.md
//! §7), so it has to survive as a distinguishable variant at this layer
//! rather than being collapsed into the generic taxonomy immediately.

mod backend;
mod status;

pub use backend::EnclsBackend;
#[cfg(target_arch = "x86_64")]
pub use backend::X86EnclsBackend;
#[cfg(any(test, feature = "std"))]
pub use backend::mock;
pub use status::{decode, EnclsError, SgxStatus};

/// `ECREATE(pginfo, secs)` — build a secure enclave control page.
pub fn create(b: &dyn EnclsBackend, pginfo: usize, secs: usize) -> Result<(), EnclsError> {
    decode(b.ecreate(pginfo, secs))
}

/// `EADD(pginfo, epc)` — copy-and-measure a source page into an enclave.
pub fn add(b: &dyn EnclsBackend, pginfo: usize, epc: usize) -> Result<(), EnclsError> {
    decode(b.eadd(pginfo, epc))
}

/// `EEXTEND(secs, epc)` — extend the measurement over 256 bytes of `epc`.
pub fn extend(b: &dyn EnclsBackend, secs: usize, epc: usize) -> Result<(), EnclsError> {
    decode(b.eextend(secs, epc))
}

/// `EINIT(sigstruct, einittoken, secs)` — finalize an enclave. May return
/// `Interrupted`; the caller retries at a higher level (spec.md §4.1).
pub fn init(
    b: &dyn EnclsBackend,
    sigstruct: usize,
    einittoken: usize,
    secs: usize,
) -> Result<(), EnclsError> {
    decode(b.einit(sigstruct, einittoken, secs))
}

/// `EREMOVE(epc)` — invalidate an enclave page; required before it may
/// re-enter the free pool.
pub fn remove(b: &dyn EnclsBackend, epc: usize) -> Result<(), EnclsError> {
    decode(b.eremove(epc))
}

/// `EBLOCK(epc)` — mark a page blocked. Idempotent; may report `Busy`.
pub fn block(b: &dyn EnclsBackend, epc: usize) -> Result<(), EnclsError> {
    decode(b.eblock(epc))
}

/// `ETRACK(epc)` — start a new tracking epoch on the enclave.
pub fn track(b: &dyn EnclsBackend, epc: usize) -> Result<(), EnclsError> {
    decode(b.etrack(epc))
}

/// `EWB(pginfo, epc, va)` — encrypt and write back a page, consuming one VA
/// slot. May return `NotTracked`, meaning the caller must force a tracking
/// epoch (and possibly a cross-CPU TLB flush) and retry.
pub fn writeback(
    b: &dyn EnclsBackend,
    pginfo: usize,
    epc: usize,
    va: usize,
) -> Result<(), EnclsError> {
    decode(b.ewb(pginfo, epc, va))
}

/// `ELDU(pginfo, epc, va)` — decrypt and restore a page, freeing its VA slot.
pub fn load_unblocked(
    b: &dyn EnclsBackend,
    pginfo: usize,
    epc: usize,
    va: usize,
) -> Result<(), EnclsError> {
    decode(b.eldu(pginfo, epc, va))
}

/// `EPA(epc)` — type the page as a version array.
pub fn pa(b: &dyn EnclsBackend, epc: usize) -> Result<(), EnclsError> {
    decode(b.epa(epc))
}

/// `EDBGRD(epc, addr) -> data` — debug-read 8 bytes of an enclave page.
pub fn dbgread(b: &dyn EnclsBackend, epc: usize) -> Result<u64, EnclsError> {
    let mut data = 0u64;
    let raw = b.edbgrd(epc, &mut data);
    decode(raw)?;
    Ok(data)
}

/// `EDBGWR(epc, addr, data)` — debug-write 8 bytes of an enclave page.
pub fn dbgwrite(b: &dyn EnclsBackend, epc: usize, data: u64) -> Result<(), EnclsError> {
    decode(b.edbgwr(epc, data))
}

/// `EAUG(pginfo, epc)` — dynamically add a page to a running enclave.
pub fn aug(b: &dyn EnclsBackend, pginfo: usize, epc: usize) -> Result<(), EnclsError> {
    decode(b.eaug(pginfo, epc))
}

/// `EMODPR(secinfo, epc)` — restrict an enclave page's permissions.
pub fn modpr(b: &dyn EnclsBackend, secinfo: usize, epc: usize) -> Result<(), EnclsError> {
    decode(b.emodpr(secinfo, epc))
}

/// `EMODT(secinfo, epc)` — change an enclave page's type.
pub fn modt(b: &dyn EnclsBackend, secinfo: usize, epc: usize) -> Result<(), EnclsError> {
    decode(b.emodt(secinfo, epc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encls::mock::MockEnclsBackend;

    #[test]
    fn writeback_surfaces_not_tracked_distinctly() {
        let backend = MockEnclsBackend::new();
        backend.push_result(11); // SGX_NOT_TRACKED
        assert_eq!(writeback(&backend, 1, 2, 3), Err(EnclsError::NotTracked));
    }

    #[test]
    fn default_mock_result_is_success() {
        let backend = MockEnclsBackend::new();
        assert_eq!(block(&backend, 0x1000), Ok(()));
        assert_eq!(backend.calls.lock().as_slice(), &["EBLOCK"]);
    }
}
