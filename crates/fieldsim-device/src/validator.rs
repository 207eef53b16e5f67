//! Inverter write-protection rules.
//!
//! Flow and energy meters accept any register write. Inverters gate writes
//! four ways, checked in this order:
//!
//! 1. the password register 0x0000 is always writable (that is how a
//!    password is established or entered),
//! 2. the U00/U01 status groups and the two communication status registers
//!    are read-only (exception 0x02),
//! 3. with parameter protection engaged and the device locked, everything
//!    except 0x0000 and the protection register itself is refused
//!    (exception 0x04; Modbus has no dedicated "locked" code),
//! 4. the control registers carry numeric range checks (exception 0x03).
//!
//! Checking is free of side effects so FC16 can validate a whole batch
//! before anything is applied; the apply step handles password transitions
//! and the unlock activity clock.

use crate::profile::DeviceKind;
use crate::registry::UnlockState;
use fieldsim_core::pdu::ExceptionCode;
use std::time::{Duration, Instant};

pub const PASSWORD_REGISTER: u16 = 0x0000;
pub const PROTECTION_REGISTER: u16 = 0x0002;

/// Idle time after which an unlocked inverter re-locks. Reads do not count
/// as activity.
pub const UNLOCK_IDLE_LIMIT: Duration = Duration::from_secs(5 * 60);

fn is_read_only(address: u16) -> bool {
    matches!(address, 0x3000..=0x30FF | 0x3100..=0x31FF | 0x2100 | 0x2101)
}

fn control_value_ok(address: u16, value: u16) -> bool {
    match address {
        0x2000 => value <= 7,
        0x2001 => value <= 60000,
        0x2002 | 0x2003 => value <= 1000,
        // Signed register: the wire carries two's complement.
        0x2004 => (-3000..=3000).contains(&i32::from(value as i16)),
        _ => true,
    }
}

/// Expire an overdue unlock. Returns true when the device re-locked on this
/// call, so the caller can log the transition.
pub fn expire_unlock(unlock: &mut UnlockState, now: Instant) -> bool {
    if !unlock.unlocked {
        return false;
    }
    let idle = unlock
        .last_activity
        .map(|at| now.saturating_duration_since(at))
        .unwrap_or(Duration::MAX);
    if idle > UNLOCK_IDLE_LIMIT {
        *unlock = UnlockState::default();
        return true;
    }
    false
}

/// Side-effect-free admission check for one register write.
///
/// `protection_on` is the current value of register 0x0002 interpreted as a
/// flag; the caller reads it from the bank so a batch is judged against the
/// state before any of its writes land.
pub fn check_write(
    kind: DeviceKind,
    protection_on: bool,
    unlock: &UnlockState,
    address: u16,
    value: u16,
) -> Result<(), ExceptionCode> {
    if kind != DeviceKind::Inverter || address == PASSWORD_REGISTER {
        return Ok(());
    }
    if is_read_only(address) {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    if protection_on && address != PROTECTION_REGISTER && !unlock.unlocked {
        return Err(ExceptionCode::DeviceFailure);
    }
    if !control_value_ok(address, value) {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

/// Result of a write to the password register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordOutcome {
    /// No password was set; the written value becomes the password.
    PasswordSet,
    /// The entered value matched; the device is now unlocked.
    Unlocked,
    /// Wrong password; nothing changed.
    Mismatch,
}

/// Apply a password-register write against the stored password.
pub fn apply_password(
    stored: u16,
    entered: u16,
    unlock: &mut UnlockState,
    now: Instant,
) -> PasswordOutcome {
    if stored == 0 {
        PasswordOutcome::PasswordSet
    } else if entered == stored {
        unlock.unlocked = true;
        unlock.last_activity = Some(now);
        PasswordOutcome::Unlocked
    } else {
        PasswordOutcome::Mismatch
    }
}

/// Record write activity so an unlocked device stays unlocked.
pub fn note_write(unlock: &mut UnlockState, now: Instant) {
    if unlock.unlocked {
        unlock.last_activity = Some(now);
    }
}
