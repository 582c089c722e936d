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

//! Hardware status codes returned in `RAX` by `ENCLS` leaves, and the
//! uniform raw-result encoding described in spec.md §4.1: the low 16 bits
//! carry the status code, the high 16 bits (if non-zero) carry a CPU fault
//! vector taken on the instruction itself.

use crate::error::{HvError, HvErrorKind};

numeric_enum_macro::numeric_enum! {
    #[repr(u16)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SgxStatus {
        Success = 0,
        InvalidSigStruct = 1,
        InvalidAttribute = 2,
        BlkState = 3,
        InvalidMeasurement = 4,
        NotBlockable = 5,
        PgInvld = 6,
        LockFail = 7,
        InvalidSignature = 8,
        MacCompareFail = 9,
        PageNotBlocked = 10,
        NotTracked = 11,
        VaSlotOccupied = 12,
        ChildPresent = 13,
        EnclaveAct = 14,
        EntryEpochLocked = 15,
        InvalidEinitToken = 16,
        PrevTrkIncmpl = 17,
        PgIsSecs = 18,
        InvalidCpuSvn = 32,
        InvalidIsvSvn = 64,
        UnmaskedEvent = 128,
        TooManyEpoch = 129,
    }
}

/// Everything a caller of an `ENCLS` leaf must be able to distinguish
/// (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnclsError {
    /// A fault (e.g. #GP, #PF) was raised on the instruction itself.
    Fault(u8),
    InvalidAttribute,
    /// Retryable: the caller must force a tracking epoch (and possibly a
    /// cross-CPU TLB flush) and retry.
    NotTracked,
    UnmaskedEvent,
    MacCompareFail,
    EntryEpochLocked,
    /// Any other non-success status code, carried verbatim for diagnostics.
    Denied(u16),
}

impl From<EnclsError> for HvError {
    fn from(e: EnclsError) -> Self {
        match e {
            EnclsError::Fault(_) => hv_err!(Fault, "ENCLS raised a fault"),
            EnclsError::InvalidAttribute => hv_err!(Denied, "INVALID_ATTRIBUTE"),
            EnclsError::NotTracked => hv_err!(Denied, "NOT_TRACKED escaped its owner"),
            EnclsError::UnmaskedEvent => hv_err!(Interrupted),
            EnclsError::MacCompareFail => hv_err!(Integrity),
            EnclsError::EntryEpochLocked => hv_err!(Busy),
            EnclsError::Denied(_) => hv_err!(Denied),
        }
    }
}

impl EnclsError {
    pub const fn kind(&self) -> HvErrorKind {
        match self {
            EnclsError::Fault(_) => HvErrorKind::Fault,
            EnclsError::InvalidAttribute | EnclsError::Denied(_) => HvErrorKind::Denied,
            EnclsError::NotTracked => HvErrorKind::Denied,
            EnclsError::UnmaskedEvent => HvErrorKind::Interrupted,
            EnclsError::MacCompareFail => HvErrorKind::Integrity,
            EnclsError::EntryEpochLocked => HvErrorKind::Busy,
        }
    }
}

/// Decode the uniform raw-result encoding produced by every wrapped leaf.
pub fn decode(raw: u32) -> Result<(), EnclsError> {
    let fault_vector = (raw >> 16) as u16;
    if fault_vector != 0 {
        return Err(EnclsError::Fault(fault_vector as u8));
    }
    let status = (raw & 0xffff) as u16;
    match SgxStatus::try_from(status) {
        Ok(SgxStatus::Success) => Ok(()),
        Ok(SgxStatus::InvalidAttribute) => Err(EnclsError::InvalidAttribute),
        Ok(SgxStatus::NotTracked) => Err(EnclsError::NotTracked),
        Ok(SgxStatus::UnmaskedEvent) => Err(EnclsError::UnmaskedEvent),
        Ok(SgxStatus::MacCompareFail) => Err(EnclsError::MacCompareFail),
        Ok(SgxStatus::EntryEpochLocked) => Err(EnclsError::EntryEpochLocked),
        Ok(_other) => Err(EnclsError::Denied(status)),
        Err(raw_status) => Err(EnclsError::Denied(raw_status)),
    }
}
