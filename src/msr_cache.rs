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

//! `LaunchMsrCache` and `einit` (spec.md §4.8): skip redundant
//! `IA32_SGXLEPUBKEYHASH*` MSR writes when the launch-authority hash
//! already matches what is cached for this core.
//!
//! One `LaunchMsrCache` belongs to exactly one logical CPU; the host is
//! responsible for giving each core its own instance (e.g. a per-CPU
//! array), the same way the original driver keys its cache off
//! `this_cpu_ptr`. The MSR write itself goes through [`MsrPort`], the same
//! pluggable-backend idiom as [`crate::encls::EnclsBackend`], so the
//! diffing logic can be exercised without privileged hardware access.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::encls::{self, EnclsBackend};
use crate::error::{HvError, HvResult};
use crate::manager::EpcConfig;

/// `IA32_SGXLEPUBKEYHASH0..3`.
pub const LEPUBKEYHASH_MSRS: [u32; 4] = [0x8c, 0x8d, 0x8e, 0x8f];

/// Abstracts the single WRMSR `LaunchMsrCache` needs, so the diffing logic
/// is testable without CPL0.
///
/// # Safety
///
/// Implementors execute a privileged WRMSR; callers must only pass MSR
/// indices this crate actually uses ([`LEPUBKEYHASH_MSRS`]).
pub unsafe trait MsrPort: Send + Sync {
    fn write(&self, msr: u32, value: u64);
}

#[cfg(target_arch = "x86_64")]
pub struct X86MsrPort;

#[cfg(target_arch = "x86_64")]
unsafe impl MsrPort for X86MsrPort {
    fn write(&self, msr: u32, value: u64) {
        use x86_64::registers::model_specific::Msr;
        // SAFETY: writing IA32_SGXLEPUBKEYHASHi is only valid with launch
        // control enabled and CPL0, which callers of `einit` guarantee.
        unsafe {
            Msr::new(msr).write(value);
        }
    }
}

#[cfg(any(test, feature = "std"))]
pub mod mock {
    use super::MsrPort;
    use spin::Mutex;

    /// Records every `(msr, value)` write issued against it, for
    /// assertions about which MSRs a diff pass actually touched.
    #[derive(Default)]
    pub struct MockMsrPort {
        pub writes: Mutex<alloc::vec::Vec<(u32, u64)>>,
    }

    impl MockMsrPort {
        pub fn new() -> Self {
            Self::default()
        }
    }

    unsafe impl MsrPort for MockMsrPort {
        fn write(&self, msr: u32, value: u64) {
            self.writes.lock().push((msr, value));
        }
    }
}

pub struct LaunchMsrCache {
    cached: [AtomicU64; 4],
    valid: AtomicBool,
}

impl LaunchMsrCache {
    pub const fn new() -> Self {
        Self {
            cached: [
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ],
            valid: AtomicBool::new(false),
        }
    }

    fn matches(&self, hash: &[u64; 4]) -> bool {
        self.valid.load(Ordering::Relaxed)
            && self
                .cached
                .iter()
                .zip(hash.iter())
                .all(|(cached, wanted)| cached.load(Ordering::Relaxed) == *wanted)
    }

    /// Write only the MSRs that differ from what is already cached for
    /// this core, then update the cache.
    fn sync_msrs(&self, port: &dyn MsrPort, hash: &[u64; 4]) {
        for (i, &value) in hash.iter().enumerate() {
            if !self.valid.load(Ordering::Relaxed) || self.cached[i].load(Ordering::Relaxed) != value {
                port.write(LEPUBKEYHASH_MSRS[i], value);
                self.cached[i].store(value, Ordering::Relaxed);
            }
        }
        self.valid.store(true, Ordering::Relaxed);
    }

    /// `EINIT`, diffing the launch-authority hash against this core's
    /// cache first when launch control is enabled (spec.md §4.8). When
    /// launch control is disabled, the MSRs are fixed by the platform and
    /// there is nothing to cache or write.
    pub fn einit(
        &self,
        backend: &dyn EnclsBackend,
        port: &dyn MsrPort,
        config: &EpcConfig,
        sigstruct: usize,
        einittoken: usize,
        secs: usize,
        launch_hash: [u64; 4],
    ) -> HvResult {
        if config.launch_control_enabled && !self.matches(&launch_hash) {
            self.sync_msrs(port, &launch_hash);
        }
        encls::init(backend, sigstruct, einittoken, secs).map_err(HvError::from)
    }
}

impl Default for LaunchMsrCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encls::mock::MockEnclsBackend;
    use crate::msr_cache::mock::MockMsrPort;

    #[test]
    fn matching_hash_is_a_cache_hit() {
        let cache = LaunchMsrCache::new();
        assert!(!cache.matches(&[1, 2, 3, 4]));
        cache.valid.store(true, Ordering::Relaxed);
        for (i, v) in [1u64, 2, 3, 4].iter().enumerate() {
            cache.cached[i].store(*v, Ordering::Relaxed);
        }
        assert!(cache.matches(&[1, 2, 3, 4]));
        assert!(!cache.matches(&[1, 2, 3, 5]));
    }

    #[test]
    fn einit_with_launch_control_disabled_skips_msr_bookkeeping() {
        let cache = LaunchMsrCache::new();
        let backend = MockEnclsBackend::new();
        let port = MockMsrPort::new();
        let config = EpcConfig {
            launch_control_enabled: false,
        };
        cache
            .einit(&backend, &port, &config, 1, 2, 3, [9, 9, 9, 9])
            .unwrap();
        assert!(!cache.valid.load(Ordering::Relaxed));
        assert!(port.writes.lock().is_empty());
        assert_eq!(backend.calls.lock().as_slice(), &["EINIT"]);
    }

    #[test]
    fn second_einit_with_same_hash_writes_no_msrs() {
        let cache = LaunchMsrCache::new();
        let backend = MockEnclsBackend::new();
        let port = MockMsrPort::new();
        let config = EpcConfig {
            launch_control_enabled: true,
        };
        let hash = [1u64, 2, 3, 4];

        cache
            .einit(&backend, &port, &config, 1, 2, 3, hash)
            .unwrap();
        assert_eq!(port.writes.lock().len(), 4);

        port.writes.lock().clear();
        cache
            .einit(&backend, &port, &config, 1, 2, 3, hash)
            .unwrap();
        assert!(port.writes.lock().is_empty());
    }
}
