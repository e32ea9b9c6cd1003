//! Capability bits carried by a role and the any-of evaluator every gated
//! endpoint goes through.
//!
//! Evaluation only ever reads the single role assigned on the caller's
//! subscription edge. Parent roles are not traversed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One independently grantable capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum Permission {
    /// Universal override. Passes every check.
    Administrator = 8,
    ManageChannels = 16,
    ManageBoard = 32,
    ReadMessages = 1024,
    SendMessages = 2048,
    ReadMessageHistory = 65536,
}

impl Permission {
    pub fn bit(self) -> u64 {
        self as u64
    }

    /// Name used in rejection reasons.
    pub fn name(self) -> &'static str {
        match self {
            Permission::Administrator => "ADMINISTRATOR",
            Permission::ManageChannels => "MANAGE_CHANNELS",
            Permission::ManageBoard => "MANAGE_BOARD",
            Permission::ReadMessages => "READ_MESSAGES",
            Permission::SendMessages => "SEND_MESSAGES",
            Permission::ReadMessageHistory => "READ_MESSAGE_HISTORY",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A role's permission bitmask. Bits outside [`Permission`] are kept
/// verbatim and carry no meaning here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(pub u64);

impl Permissions {
    /// Bitmask given to a board's `Owner` role.
    pub const OWNER: Permissions = Permissions(Permission::Administrator as u64);

    /// Bitmask given to a board's `everyone` role.
    pub const EVERYONE_DEFAULT: Permissions = Permissions(104_324_161);

    pub fn contains(self, permission: Permission) -> bool {
        self.0 & permission.bit() != 0
    }

    /// True if any of `accepted` is set, or the administrator bit is.
    pub fn allows_any(self, accepted: &[Permission]) -> bool {
        self.contains(Permission::Administrator) || accepted.iter().any(|p| self.contains(*p))
    }

    pub fn allows(self, permission: Permission) -> bool {
        self.allows_any(&[permission])
    }

    /// Like [`allows_any`](Self::allows_any) but reports the capability
    /// that was missing.
    pub fn require(self, accepted: &[Permission]) -> Result<(), MissingPermission> {
        if self.allows_any(accepted) {
            Ok(())
        } else {
            Err(MissingPermission(
                accepted.first().copied().unwrap_or(Permission::Administrator),
            ))
        }
    }
}

impl From<u64> for Permissions {
    fn from(bits: u64) -> Self {
        Permissions(bits)
    }
}

impl std::ops::BitOr<Permission> for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Permission) -> Permissions {
        Permissions(self.0 | rhs.bit())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Permission {0} not set")]
pub struct MissingPermission(pub Permission);
