// crates/opensafety-rs/src/sdn.rs
//! Accessors for the Safety Domain Number held in the SOD (0x1200/0x01).

use crate::sod::constants::{IDX_COMMON_COM_PARAM, SUBIDX_SDN};
use crate::sod::{Sod, SodValue};
use crate::shnf::SafetyError;
use crate::types::Sdn;
use core::convert::TryFrom;

/// Reads the domain number of this instance.
pub fn get(sod: &Sod) -> Result<Sdn, SafetyError> {
    let raw = sod
        .read_u16(IDX_COMMON_COM_PARAM, SUBIDX_SDN)
        .ok_or(SafetyError::ObjectNotFound)?;
    Sdn::try_from(raw).map_err(SafetyError::from)
}

/// Stores the domain number of this instance.
pub fn set(sod: &mut Sod, sdn: Sdn) -> Result<(), SafetyError> {
    sod.write_internal(IDX_COMMON_COM_PARAM, SUBIDX_SDN, SodValue::U16(sdn.0))
        .map_err(|_| SafetyError::ObjectNotFound)
}
