// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Platform neutral capability model.
//!
//! Policy decisions are expressed over [`CapabilitySet`] values; only
//! the `apply` functions at the bottom touch the host kernel, keeping
//! the container contract identical across targets.

use thiserror::Error;

/// Kernel capabilities the runtime knows how to reason about
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    Chown = 0,
    DacOverride,
    Fowner,
    Setgid,
    Setuid,
    Setfcap,
    SysChroot,
    SysAdmin,
    AuditControl,
    AuditRead,
    AuditWrite,
    MacAdmin,
    MacOverride,
    SysModule,
    SysBoot,
    SysTime,
    WakeAlarm,
    SysPtrace,
    NetAdmin,
    NetRaw,
    Syslog,
    SysRawio,
}

/// A bitmask over [`Capability`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet(u64);

impl CapabilitySet {
    pub const EMPTY: Self = Self(0);

    /// Capabilities needed while the environment is prepared:
    /// filesystem ownership, chroot and mount rights
    pub const CONTAINER_INIT: Self = Self::with(&[
        Capability::Chown,
        Capability::DacOverride,
        Capability::Fowner,
        Capability::Setuid,
        Capability::Setgid,
        Capability::Setfcap,
        Capability::SysChroot,
        Capability::SysAdmin,
    ]);

    /// The only capabilities a worker keeps after dropping to an
    /// unprivileged identity
    pub const PRIMARY_PROCESS: Self = Self::with(&[Capability::Setuid, Capability::Setgid]);

    /// Explicitly removed from the bounding set during initialization
    pub const DANGEROUS: Self = Self::with(&[
        Capability::AuditControl,
        Capability::AuditRead,
        Capability::AuditWrite,
        Capability::MacAdmin,
        Capability::MacOverride,
        Capability::SysModule,
        Capability::SysBoot,
        Capability::SysTime,
        Capability::WakeAlarm,
        Capability::SysPtrace,
        Capability::NetAdmin,
        Capability::NetRaw,
        Capability::Syslog,
        Capability::SysRawio,
    ]);

    pub const fn with(caps: &[Capability]) -> Self {
        let mut bits = 0u64;
        let mut i = 0;
        while i < caps.len() {
            bits |= 1 << caps[i] as u8;
            i += 1;
        }
        Self(bits)
    }

    pub const fn contains(self, capability: Capability) -> bool {
        self.0 & (1 << capability as u8) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn is_disjoint(self, other: Self) -> bool {
        self.0 & other.0 == 0
    }

    pub const fn is_subset(self, other: Self) -> bool {
        self.0 & other.0 == self.0
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        use strum::IntoEnumIterator;

        Capability::iter().filter(move |capability| self.contains(*capability))
    }
}

impl std::ops::BitOr for CapabilitySet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl std::ops::BitAnd for CapabilitySet {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        iter.into_iter().fold(Self::EMPTY, |set, capability| {
            Self(set.0 | 1 << capability as u8)
        })
    }
}

/// Remove `dropped` from the calling thread's bounding set
pub fn reduce_bounding(dropped: CapabilitySet) -> Result<(), Error> {
    imp::reduce_bounding(dropped)
}

/// Clear ambient capabilities, then raise exactly `primary`
pub fn set_ambient(primary: CapabilitySet) -> Result<(), Error> {
    imp::set_ambient(primary)
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("drop {capability} from bounding set")]
    DropBounding {
        capability: Capability,
        source: caps::errors::CapsError,
    },
    #[error("clear ambient set")]
    ClearAmbient { source: caps::errors::CapsError },
    #[error("raise {capability} to ambient set")]
    RaiseAmbient {
        capability: Capability,
        source: caps::errors::CapsError,
    },
}

#[cfg(target_os = "linux")]
mod imp {
    use caps::CapSet;

    use super::{Capability, CapabilitySet, Error};

    fn kernel_cap(capability: Capability) -> caps::Capability {
        match capability {
            Capability::Chown => caps::Capability::CAP_CHOWN,
            Capability::DacOverride => caps::Capability::CAP_DAC_OVERRIDE,
            Capability::Fowner => caps::Capability::CAP_FOWNER,
            Capability::Setgid => caps::Capability::CAP_SETGID,
            Capability::Setuid => caps::Capability::CAP_SETUID,
            Capability::Setfcap => caps::Capability::CAP_SETFCAP,
            Capability::SysChroot => caps::Capability::CAP_SYS_CHROOT,
            Capability::SysAdmin => caps::Capability::CAP_SYS_ADMIN,
            Capability::AuditControl => caps::Capability::CAP_AUDIT_CONTROL,
            Capability::AuditRead => caps::Capability::CAP_AUDIT_READ,
            Capability::AuditWrite => caps::Capability::CAP_AUDIT_WRITE,
            Capability::MacAdmin => caps::Capability::CAP_MAC_ADMIN,
            Capability::MacOverride => caps::Capability::CAP_MAC_OVERRIDE,
            Capability::SysModule => caps::Capability::CAP_SYS_MODULE,
            Capability::SysBoot => caps::Capability::CAP_SYS_BOOT,
            Capability::SysTime => caps::Capability::CAP_SYS_TIME,
            Capability::WakeAlarm => caps::Capability::CAP_WAKE_ALARM,
            Capability::SysPtrace => caps::Capability::CAP_SYS_PTRACE,
            Capability::NetAdmin => caps::Capability::CAP_NET_ADMIN,
            Capability::NetRaw => caps::Capability::CAP_NET_RAW,
            Capability::Syslog => caps::Capability::CAP_SYSLOG,
            Capability::SysRawio => caps::Capability::CAP_SYS_RAWIO,
        }
    }

    pub fn reduce_bounding(dropped: CapabilitySet) -> Result<(), Error> {
        for capability in dropped.iter() {
            caps::drop(None, CapSet::Bounding, kernel_cap(capability))
                .map_err(|source| Error::DropBounding { capability, source })?;
        }
        Ok(())
    }

    pub fn set_ambient(primary: CapabilitySet) -> Result<(), Error> {
        caps::clear(None, CapSet::Ambient).map_err(|source| Error::ClearAmbient { source })?;

        for capability in primary.iter() {
            let cap = kernel_cap(capability);
            // Ambient raise requires the capability inheritable first
            caps::raise(None, CapSet::Inheritable, cap)
                .and_then(|_| caps::raise(None, CapSet::Ambient, cap))
                .map_err(|source| Error::RaiseAmbient { capability, source })?;
        }

        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::{CapabilitySet, Error};

    pub fn reduce_bounding(_dropped: CapabilitySet) -> Result<(), Error> {
        Ok(())
    }

    pub fn set_ambient(_primary: CapabilitySet) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn base_sets_are_disjoint_from_dangerous() {
        assert!(CapabilitySet::CONTAINER_INIT.is_disjoint(CapabilitySet::DANGEROUS));
        assert!(CapabilitySet::PRIMARY_PROCESS.is_disjoint(CapabilitySet::DANGEROUS));
        assert!(CapabilitySet::PRIMARY_PROCESS.is_subset(CapabilitySet::CONTAINER_INIT));
    }

    #[test]
    fn set_algebra() {
        let a = CapabilitySet::with(&[Capability::Chown, Capability::Setuid]);
        let b = CapabilitySet::with(&[Capability::Setuid, Capability::NetAdmin]);

        assert!(a.contains(Capability::Chown));
        assert!(!a.contains(Capability::NetAdmin));
        assert_eq!(a.union(b), CapabilitySet::with(&[Capability::Chown, Capability::Setuid, Capability::NetAdmin]));
        assert_eq!(a.intersection(b), CapabilitySet::with(&[Capability::Setuid]));
        assert_eq!(a.difference(b), CapabilitySet::with(&[Capability::Chown]));
        assert!(!a.is_disjoint(b));
        assert!(a.difference(b).is_disjoint(b));

        let collected: CapabilitySet = a.iter().collect();
        assert_eq!(collected, a);
    }
}
