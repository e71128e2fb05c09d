// crates/opensafety-rs/src/serr.rs
//! SERR, the error reporter of the stack.
//!
//! Every protocol-visible error is a 16 bit code laid out as
//! `[type:2 | class:2 | unit:4 | local:8]`. Frame-processing failures are
//! never propagated through the call chain; the affected unit records the
//! error here and returns a plain "not ok", leaving the application to
//! decide whether to keep feeding the stack. FATAL class errors oblige the
//! application to enter its fail-safe state; the stack only signals.

use crate::log::{my_debug, my_error, my_warn};
use crate::sapl::SnApplication;

/// No additional error information is available.
pub const SERR_K_NO_ADD_INFO: u32 = 0;

/// Fail-safe relevance of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorType {
    NotFailSafe = 0,
    FailSafe = 1,
}

/// Severity class of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorClass {
    /// Transient, ignorable.
    Info = 0,
    /// Protocol violation by a peer or local validation failure; the
    /// affected frame or request is rejected and processing continues.
    Minor = 1,
    /// Internal invariant violation; the application must fail-safe.
    Fatal = 2,
}

/// The reporting unit, encoded in bits 11..8 of the error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnitId {
    Ssc = 1,
    Sfs = 2,
    Sod = 3,
    Snmts = 4,
    Snmtm = 5,
    Scm = 6,
    SsdoServer = 7,
    SsdoClient = 8,
    Spdo = 9,
    Sdn = 10,
}

/// Builds a 16 bit error code from its four fields.
pub const fn build_error(ty: ErrorType, class: ErrorClass, unit: UnitId, local: u8) -> u16 {
    ((ty as u16) << 14) | ((class as u16) << 12) | ((unit as u16) << 8) | (local as u16)
}

/// Extracts the unit id bits of an error code.
pub const fn unit_id(error: u16) -> u8 {
    ((error & 0x0F00) >> 8) as u8
}

/// Extracts the severity class bits of an error code.
pub const fn error_class(error: u16) -> u8 {
    ((error & 0x3000) >> 12) as u8
}

/// Per-instance state of the error reporter.
#[derive(Debug, Default)]
pub struct Serr {
    last_add_info: u32,
}

impl Serr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an error, retains its additional info and signals the
    /// application.
    pub fn set_error(
        &mut self,
        instance: u8,
        app: &mut dyn SnApplication,
        error: u16,
        add_info: u32,
    ) {
        self.last_add_info = add_info;
        match error_class(error) {
            c if c == ErrorClass::Fatal as u8 => {
                my_error!(
                    "[SERR] instance {}: FATAL error {:#06X}, add info {:#010X}",
                    instance,
                    error,
                    add_info
                );
            }
            c if c == ErrorClass::Minor as u8 => {
                my_warn!(
                    "[SERR] instance {}: minor error {:#06X}, add info {:#010X}",
                    instance,
                    error,
                    add_info
                );
            }
            _ => {
                my_debug!(
                    "[SERR] instance {}: info {:#06X}, add info {:#010X}",
                    instance,
                    error,
                    add_info
                );
            }
        }
        app.signal_error(instance, error, add_info);
    }

    /// Returns the additional info of the most recent error. Only
    /// meaningful immediately after a stack function returned "not ok".
    pub fn last_add_info(&self) -> u32 {
        self.last_add_info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_layout() {
        let code = build_error(ErrorType::FailSafe, ErrorClass::Fatal, UnitId::Snmts, 0x42);
        assert_eq!(code, 0b01_10_0100_0100_0010);
        assert_eq!(unit_id(code), UnitId::Snmts as u8);
        assert_eq!(error_class(code), ErrorClass::Fatal as u8);
    }

    #[test]
    fn test_minor_code_layout() {
        let code = build_error(ErrorType::NotFailSafe, ErrorClass::Minor, UnitId::Sfs, 3);
        assert_eq!(code >> 14, 0);
        assert_eq!(error_class(code), 1);
        assert_eq!(unit_id(code), UnitId::Sfs as u8);
        assert_eq!(code & 0xFF, 3);
    }
}
