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

//! The error taxonomy shared by every layer of the page-cache manager.
//!
//! Hardware status codes returned by `ENCLS` leaves are translated into
//! [`HvErrorKind`] at the [`crate::encls`] boundary; everything above that
//! boundary only ever sees [`HvError`].

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvErrorKind {
    /// No free EPC page and the active list is empty.
    OutOfMemory,
    /// `ENTRYEPOCH_LOCKED`, or an atomic allocation found no free page.
    Busy,
    /// `UNMASKED_EVENT`, or a pending user-directed interruption.
    Interrupted,
    /// `MAC_COMPARE_FAIL`: fatal for the owning enclave.
    Integrity,
    /// A fault was raised on a privileged instruction: fatal and diagnostic.
    Fault,
    /// Any other hardware status code.
    Denied,
    /// A request was made against an object in the wrong lifecycle state
    /// (not part of the hardware taxonomy, but needed by a real
    /// implementation of the invariants in spec.md §8).
    BadState,
    /// The host platform does not support the requested feature
    /// (e.g. `EINIT` with no writable launch-authority registers path).
    NotSupported,
}

impl HvErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            HvErrorKind::OutOfMemory => "out of memory",
            HvErrorKind::Busy => "busy",
            HvErrorKind::Interrupted => "interrupted",
            HvErrorKind::Integrity => "integrity failure",
            HvErrorKind::Fault => "fault",
            HvErrorKind::Denied => "denied",
            HvErrorKind::BadState => "bad state",
            HvErrorKind::NotSupported => "not supported",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HvError {
    kind: HvErrorKind,
    msg: Option<&'static str>,
}

impl HvError {
    pub const fn new(kind: HvErrorKind, msg: Option<&'static str>) -> Self {
        Self { kind, msg }
    }

    pub const fn kind(&self) -> HvErrorKind {
        self.kind
    }
}

impl fmt::Display for HvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.msg {
            Some(msg) => write!(f, "{}: {}", self.kind.as_str(), msg),
            None => write!(f, "{}", self.kind.as_str()),
        }
    }
}

pub type HvResult<T = ()> = Result<T, HvError>;

/// Build an [`HvError`] value, e.g. `hv_err!(Busy)` or
/// `hv_err!(Busy, "section lock contended")`.
#[macro_export]
macro_rules! hv_err {
    ($kind: ident) => {
        $crate::error::HvError::new($crate::error::HvErrorKind::$kind, None)
    };
    ($kind: ident, $msg: expr) => {
        $crate::error::HvError::new($crate::error::HvErrorKind::$kind, Some($msg))
    };
}

/// Build an `Err(HvError)`, the form almost every fallible function returns.
#[macro_export]
macro_rules! hv_result_err {
    ($kind: ident) => {
        Err($crate::hv_err!($kind))
    };
    ($kind: ident, $msg: expr) => {
        Err($crate::hv_err!($kind, $msg))
    };
}
