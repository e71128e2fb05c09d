// crates/opensafety-rs/src/snmts/timers.rs
//! Refresh and life-guarding timers of the SNMT slave.
//!
//! Both timers are driven purely by the consecutive time the application
//! passes into the stack; no wall clock is read anywhere.

use crate::sod::constants::{
    IDX_LIFE_GUARDING, IDX_PRE_OP_RETRIES, IDX_PRE_OP_SIGNAL, K_UNLIMITED_RETRIES,
    SUBIDX_GUARD_TIME, SUBIDX_LIFE_TIME_FACTOR,
};
use crate::sod::Sod;
use crate::shnf::SafetyError;
use crate::types::ct_elapsed as elapsed;

/// The pre-operational refresh timer. While the SN sits in
/// PRE-OPERATIONAL it periodically signals "reset guarding" towards the
/// SCM, up to the configured retry limit (0xFF = unlimited).
#[derive(Debug, Default)]
pub struct RefreshTimer {
    active: bool,
    deadline: u32,
    elapsed_retries: u8,
}

impl RefreshTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh refresh interval and resets the retry counter.
    pub fn start(&mut self, sod: &Sod, ct: u32) -> Result<(), SafetyError> {
        let refresh_time = sod
            .read_u32(IDX_PRE_OP_SIGNAL, 0)
            .ok_or(SafetyError::ObjectNotFound)?;
        self.deadline = ct.wrapping_add(refresh_time);
        self.elapsed_retries = 0;
        self.active = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    /// Checks the refresh interval. Returns true when the interval has
    /// elapsed and the retry budget permits another signal; the interval
    /// is then restarted.
    pub fn check(&mut self, sod: &Sod, ct: u32) -> Result<bool, SafetyError> {
        if !self.active || !elapsed(ct, self.deadline) {
            return Ok(false);
        }
        let max_retries = sod
            .read_u8(IDX_PRE_OP_RETRIES, 0)
            .ok_or(SafetyError::ObjectNotFound)?;
        if max_retries != K_UNLIMITED_RETRIES && self.elapsed_retries >= max_retries {
            self.active = false;
            return Ok(false);
        }
        self.elapsed_retries = self.elapsed_retries.saturating_add(1);
        let refresh_time = sod
            .read_u32(IDX_PRE_OP_SIGNAL, 0)
            .ok_or(SafetyError::ObjectNotFound)?;
        self.deadline = ct.wrapping_add(refresh_time);
        Ok(true)
    }
}

/// The life-guarding timer of the OPERATIONAL state. Every guarding
/// request restarts it; every elapsed guard interval decrements the life
/// factor counter, and at zero the node falls back to PRE-OPERATIONAL.
#[derive(Debug, Default)]
pub struct LifeTimer {
    running: bool,
    deadline: u32,
    factor_remaining: u8,
}

impl LifeTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Starts (or restarts, on a guarding request) the guard interval
    /// with a full life factor.
    pub fn start(&mut self, sod: &Sod, ct: u32) -> Result<(), SafetyError> {
        let guard_time = sod
            .read_u32(IDX_LIFE_GUARDING, SUBIDX_GUARD_TIME)
            .ok_or(SafetyError::ObjectNotFound)?;
        let factor = sod
            .read_u8(IDX_LIFE_GUARDING, SUBIDX_LIFE_TIME_FACTOR)
            .ok_or(SafetyError::ObjectNotFound)?;
        self.deadline = ct.wrapping_add(guard_time);
        self.factor_remaining = factor;
        self.running = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Checks the guard interval. Returns true when the whole life time
    /// (guard time x factor) has elapsed without a guarding request.
    pub fn check(&mut self, sod: &Sod, ct: u32) -> Result<bool, SafetyError> {
        if !self.running || !elapsed(ct, self.deadline) {
            return Ok(false);
        }
        self.factor_remaining = self.factor_remaining.saturating_sub(1);
        if self.factor_remaining == 0 {
            self.running = false;
            return Ok(true);
        }
        let guard_time = sod
            .read_u32(IDX_LIFE_GUARDING, SUBIDX_GUARD_TIME)
            .ok_or(SafetyError::ObjectNotFound)?;
        self.deadline = self.deadline.wrapping_add(guard_time);
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sod::{SodAttr, SodEntry, SodValue};

    fn timer_sod(guard: u32, factor: u8, refresh: u32, retries: u8) -> Sod {
        let mut sod = Sod::new(0);
        sod.insert(
            IDX_LIFE_GUARDING,
            SUBIDX_GUARD_TIME,
            SodEntry::new(SodValue::U32(guard), SodAttr::RW),
        );
        sod.insert(
            IDX_LIFE_GUARDING,
            SUBIDX_LIFE_TIME_FACTOR,
            SodEntry::new(SodValue::U8(factor), SodAttr::RW),
        );
        sod.insert(
            IDX_PRE_OP_SIGNAL,
            0x00,
            SodEntry::new(SodValue::U32(refresh), SodAttr::RW),
        );
        sod.insert(
            IDX_PRE_OP_RETRIES,
            0x00,
            SodEntry::new(SodValue::U8(retries), SodAttr::RW),
        );
        sod
    }

    #[test]
    fn test_life_time_is_guard_time_times_factor() {
        let sod = timer_sod(100, 5, 0, 0);
        let mut life = LifeTimer::new();
        life.start(&sod, 0).unwrap();
        // Four elapsed guard intervals only consume the factor.
        for interval in 1..5u32 {
            assert!(!life.check(&sod, interval * 100).unwrap());
        }
        // The fifth elapses the whole life time.
        assert!(life.check(&sod, 500).unwrap());
        assert!(!life.is_running());
    }

    #[test]
    fn test_guarding_request_restarts_life() {
        let sod = timer_sod(100, 2, 0, 0);
        let mut life = LifeTimer::new();
        life.start(&sod, 0).unwrap();
        assert!(!life.check(&sod, 150).unwrap());
        // A guarding request restarts interval and factor.
        life.start(&sod, 150).unwrap();
        assert!(!life.check(&sod, 260).unwrap());
        assert!(life.check(&sod, 370).unwrap());
    }

    #[test]
    fn test_refresh_retry_limit() {
        let sod = timer_sod(0, 0, 50, 2);
        let mut refresh = RefreshTimer::new();
        refresh.start(&sod, 0).unwrap();
        assert!(refresh.check(&sod, 50).unwrap());
        assert!(refresh.check(&sod, 100).unwrap());
        // Retry budget exhausted.
        assert!(!refresh.check(&sod, 150).unwrap());
        assert!(!refresh.check(&sod, 500).unwrap());
    }

    #[test]
    fn test_refresh_unlimited_retries() {
        let sod = timer_sod(0, 0, 50, K_UNLIMITED_RETRIES);
        let mut refresh = RefreshTimer::new();
        refresh.start(&sod, 0).unwrap();
        for round in 1..100u32 {
            assert!(refresh.check(&sod, round * 50).unwrap());
        }
    }

    #[test]
    fn test_timers_survive_ct_wrap() {
        let sod = timer_sod(100, 1, 0, 0);
        let mut life = LifeTimer::new();
        life.start(&sod, u32::MAX - 10).unwrap();
        assert!(!life.check(&sod, u32::MAX).unwrap());
        assert!(life.check(&sod, 95).unwrap());
    }
}
