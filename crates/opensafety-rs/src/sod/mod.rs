// crates/opensafety-rs/src/sod/mod.rs

pub mod constants;
mod entry;

pub use entry::{
    DomainData, SodAbortCode, SodAttr, SodCallback, SodEntry, SodService, SodValue, ValueRange,
};

use crate::log::my_trace;
use crate::serr::{self, ErrorClass, ErrorType, UnitId};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Bound::{Excluded, Unbounded};

const fn err(local: u8) -> u16 {
    serr::build_error(ErrorType::NotFailSafe, ErrorClass::Minor, UnitId::Sod, local)
}

// SERR codes of the SOD unit.
pub const SOD_K_ERR_OBJ_NOT_FOUND: u16 = err(0x01);
pub const SOD_K_ERR_SUB_NOT_FOUND: u16 = err(0x02);
pub const SOD_K_ERR_OBJ_IS_WRITE_PROTECTED: u16 = err(0x03);
pub const SOD_K_ERR_OBJ_IS_READ_ONLY: u16 = err(0x04);
pub const SOD_K_ERR_VALUE_RANGE_EXCEEDED: u16 = err(0x05);
pub const SOD_K_ERR_TYPE_LEN: u16 = err(0x06);
pub const SOD_K_ERR_CLBK_ABORT: u16 = err(0x07);
pub const SOD_K_ERR_OFFSET_SIZE: u16 = err(0x08);
pub const SOD_K_ERR_NOT_A_DOMAIN: u16 = err(0x09);

/// Error of an SOD access: the SERR code for local reporting plus the
/// abort code returned to a remote SSDO peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SodError {
    pub code: u16,
    pub abort: SodAbortCode,
}

impl SodError {
    const fn new(code: u16, abort: SodAbortCode) -> Self {
        Self { code, abort }
    }
}

/// Handle to one SOD entry, the result of an attribute lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SodAccess {
    pub index: u16,
    pub sub: u8,
    pub attr: SodAttr,
    pub max_len: usize,
}

/// The Safety Object Dictionary of one instance.
pub struct Sod {
    entries: BTreeMap<(u16, u8), SodEntry>,
    write_disabled: bool,
    instance: u8,
}

impl fmt::Debug for Sod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sod")
            .field("entries", &self.entries.len())
            .field("write_disabled", &self.write_disabled)
            .field("instance", &self.instance)
            .finish()
    }
}

impl Sod {
    /// Creates a new, empty SOD. The application inserts its entries and
    /// the stack-reserved indices before starting the stack.
    pub fn new(instance: u8) -> Self {
        Self {
            entries: BTreeMap::new(),
            write_disabled: false,
            instance,
        }
    }

    /// Inserts an entry at `(index, sub)`.
    pub fn insert(&mut self, index: u16, sub: u8, entry: SodEntry) {
        self.entries.insert((index, sub), entry);
    }

    /// Looks an entry up and returns its access handle.
    pub fn attr_get(&self, index: u16, sub: u8) -> Result<SodAccess, SodError> {
        match self.entries.get(&(index, sub)) {
            Some(entry) => Ok(SodAccess {
                index,
                sub,
                attr: entry.attr,
                max_len: entry.value.max_len(),
            }),
            None => {
                // Distinguish a missing sub-index under an existing index.
                let index_exists = self
                    .entries
                    .range((index, 0)..=(index, 0xFF))
                    .next()
                    .is_some();
                if index_exists {
                    Err(SodError::new(
                        SOD_K_ERR_SUB_NOT_FOUND,
                        SodAbortCode::SubIndexDoesNotExist,
                    ))
                } else {
                    Err(SodError::new(
                        SOD_K_ERR_OBJ_NOT_FOUND,
                        SodAbortCode::ObjectDoesNotExist,
                    ))
                }
            }
        }
    }

    /// Sequential iteration over the dictionary in ascending
    /// (index, sub) order; pass `None` to start from the beginning.
    pub fn attr_get_next(&self, after: Option<(u16, u8)>) -> Option<SodAccess> {
        let mut range = match after {
            None => self.entries.range(..),
            Some(key) => self.entries.range((Excluded(key), Unbounded)),
        };
        range.next().map(|(&(index, sub), entry)| SodAccess {
            index,
            sub,
            attr: entry.attr,
            max_len: entry.value.max_len(),
        })
    }

    /// Reads `size` bytes at `offset` from an entry; `size` 0 reads the
    /// whole value. Runs the before-read callback when attributed.
    pub fn read(
        &mut self,
        acs: &SodAccess,
        offset: usize,
        size: usize,
    ) -> Result<Vec<u8>, SodError> {
        let instance = self.instance;
        let entry = self
            .entries
            .get_mut(&(acs.index, acs.sub))
            .ok_or(SodError::new(
                SOD_K_ERR_OBJ_NOT_FOUND,
                SodAbortCode::ObjectDoesNotExist,
            ))?;

        if entry.attr.contains(SodAttr::BEF_RD) {
            if let Some(cb) = entry.callback.as_mut() {
                cb(instance, SodService::BeforeRead, acs.index, acs.sub, &[])
                    .map_err(|abort| SodError::new(SOD_K_ERR_CLBK_ABORT, abort))?;
            }
        }

        let bytes = entry.value.to_bytes();
        if size == 0 && offset == 0 {
            return Ok(bytes);
        }
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= bytes.len())
            .ok_or(SodError::new(
                SOD_K_ERR_OFFSET_SIZE,
                SodAbortCode::LengthTooHigh,
            ))?;
        Ok(bytes[offset..end].to_vec())
    }

    /// Writes `data` to an entry.
    ///
    /// `overwrite_ro` permits writing RO objects and is reserved for local
    /// accesses; the SSDO server always passes `false`. RO_CONST objects
    /// never accept writes and the global write lock rejects everything.
    /// `offset` is only meaningful for domain entries.
    pub fn write(
        &mut self,
        acs: &SodAccess,
        data: &[u8],
        overwrite_ro: bool,
        offset: usize,
    ) -> Result<(), SodError> {
        let instance = self.instance;
        if self.write_disabled {
            return Err(SodError::new(
                SOD_K_ERR_OBJ_IS_WRITE_PROTECTED,
                SodAbortCode::LocalControl,
            ));
        }
        let entry = self
            .entries
            .get_mut(&(acs.index, acs.sub))
            .ok_or(SodError::new(
                SOD_K_ERR_OBJ_NOT_FOUND,
                SodAbortCode::ObjectDoesNotExist,
            ))?;

        if entry.attr.contains(SodAttr::RO_CONST)
            || (entry.attr.contains(SodAttr::RO) && !overwrite_ro)
        {
            return Err(SodError::new(
                SOD_K_ERR_OBJ_IS_READ_ONLY,
                SodAbortCode::WriteReadOnlyObject,
            ));
        }

        let new_value = build_value(&entry.value, data, offset)?;

        if let (Some(range), Some(scalar)) = (&entry.range, new_value.as_scalar()) {
            let min = range.min.as_scalar().unwrap_or(i64::MIN);
            let max = range.max.as_scalar().unwrap_or(i64::MAX);
            if scalar < min || scalar > max {
                return Err(SodError::new(
                    SOD_K_ERR_VALUE_RANGE_EXCEEDED,
                    SodAbortCode::ValueRangeExceeded,
                ));
            }
        }

        if entry.attr.contains(SodAttr::BEF_WR) {
            if let Some(cb) = entry.callback.as_mut() {
                cb(instance, SodService::BeforeWrite, acs.index, acs.sub, data)
                    .map_err(|abort| SodError::new(SOD_K_ERR_CLBK_ABORT, abort))?;
            }
        }

        let previous = core::mem::replace(&mut entry.value, new_value);

        if entry.attr.contains(SodAttr::AFT_WR) {
            if let Some(cb) = entry.callback.as_mut() {
                if let Err(abort) = cb(instance, SodService::AfterWrite, acs.index, acs.sub, data) {
                    entry.value = previous;
                    return Err(SodError::new(SOD_K_ERR_CLBK_ABORT, abort));
                }
            }
        }
        my_trace!(
            "[SOD] instance {}: wrote {} byte(s) to {:#06X}/{:#04X}",
            instance,
            data.len(),
            acs.index,
            acs.sub
        );
        Ok(())
    }

    /// Sets the actual length of a domain entry; the expected total of a
    /// segmented download.
    pub fn actual_len_set(&mut self, acs: &SodAccess, len: usize) -> Result<(), SodError> {
        if self.write_disabled {
            return Err(SodError::new(
                SOD_K_ERR_OBJ_IS_WRITE_PROTECTED,
                SodAbortCode::LocalControl,
            ));
        }
        let entry = self
            .entries
            .get_mut(&(acs.index, acs.sub))
            .ok_or(SodError::new(
                SOD_K_ERR_OBJ_NOT_FOUND,
                SodAbortCode::ObjectDoesNotExist,
            ))?;
        match &mut entry.value {
            SodValue::Domain(domain) => {
                if len > domain.max_len {
                    return Err(SodError::new(
                        SOD_K_ERR_OFFSET_SIZE,
                        SodAbortCode::LengthTooHigh,
                    ));
                }
                domain.actual_len = len;
                domain.data.resize(len, 0);
                Ok(())
            }
            _ => Err(SodError::new(
                SOD_K_ERR_NOT_A_DOMAIN,
                SodAbortCode::UnsupportedAccess,
            )),
        }
    }

    /// Disables every write access; the global SOD lock. The application
    /// must hold the lock while calculating the parameter-set checksum
    /// to guarantee a quiescent snapshot.
    pub fn disable_write(&mut self) {
        self.write_disabled = true;
    }

    /// Re-enables write accesses.
    pub fn enable_write(&mut self) {
        self.write_disabled = false;
    }

    /// Returns whether the SOD is write-locked.
    pub fn is_locked(&self) -> bool {
        self.write_disabled
    }

    /// Keys of all CRC-attributed entries in ascending (index, sub) order;
    /// the iteration base of the parameter-set checksum.
    pub fn entries_with_crc(&self) -> Vec<(u16, u8)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.attr.contains(SodAttr::CRC))
            .map(|(&key, _)| key)
            .collect()
    }

    // --- Start of Type-Safe Accessors ---
    // Internal accessors of the stack; they bypass entry callbacks.

    pub fn read_u8(&self, index: u16, sub: u8) -> Option<u8> {
        match self.entries.get(&(index, sub)).map(|e| &e.value) {
            Some(SodValue::U8(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn read_u16(&self, index: u16, sub: u8) -> Option<u16> {
        match self.entries.get(&(index, sub)).map(|e| &e.value) {
            Some(SodValue::U16(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn read_u32(&self, index: u16, sub: u8) -> Option<u32> {
        match self.entries.get(&(index, sub)).map(|e| &e.value) {
            Some(SodValue::U32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn read_octets(&self, index: u16, sub: u8) -> Option<&[u8]> {
        match self.entries.get(&(index, sub)).map(|e| &e.value) {
            Some(SodValue::OctetString(v)) => Some(v.as_slice()),
            Some(SodValue::Domain(d)) => Some(&d.data[..d.actual_len]),
            _ => None,
        }
    }
    // --- End of Type-Safe Accessors ---

    /// Internal write of the stack. Bypasses attribute checks but still
    /// honours the global lock and the stored type.
    pub(crate) fn write_internal(
        &mut self,
        index: u16,
        sub: u8,
        value: SodValue,
    ) -> Result<(), SodError> {
        if self.write_disabled {
            return Err(SodError::new(
                SOD_K_ERR_OBJ_IS_WRITE_PROTECTED,
                SodAbortCode::LocalControl,
            ));
        }
        let entry = self.entries.get_mut(&(index, sub)).ok_or(SodError::new(
            SOD_K_ERR_OBJ_NOT_FOUND,
            SodAbortCode::ObjectDoesNotExist,
        ))?;
        if core::mem::discriminant(&entry.value) != core::mem::discriminant(&value) {
            return Err(SodError::new(
                SOD_K_ERR_TYPE_LEN,
                SodAbortCode::LengthDoesNotMatch,
            ));
        }
        entry.value = value;
        Ok(())
    }
}

/// Builds the candidate value of a write from the current storage kind.
fn build_value(current: &SodValue, data: &[u8], offset: usize) -> Result<SodValue, SodError> {
    let type_err = SodError::new(SOD_K_ERR_TYPE_LEN, SodAbortCode::LengthDoesNotMatch);
    let offset_err = SodError::new(SOD_K_ERR_OFFSET_SIZE, SodAbortCode::LengthTooHigh);

    if offset != 0 && !matches!(current, SodValue::Domain(_)) {
        return Err(offset_err);
    }
    match current {
        SodValue::U8(_) => match data {
            [v] => Ok(SodValue::U8(*v)),
            _ => Err(type_err),
        },
        SodValue::I8(_) => match data {
            [v] => Ok(SodValue::I8(*v as i8)),
            _ => Err(type_err),
        },
        SodValue::U16(_) => match data {
            [a, b] => Ok(SodValue::U16(u16::from_le_bytes([*a, *b]))),
            _ => Err(type_err),
        },
        SodValue::U32(_) => match data {
            [a, b, c, d] => Ok(SodValue::U32(u32::from_le_bytes([*a, *b, *c, *d]))),
            _ => Err(type_err),
        },
        SodValue::OctetString(existing) => {
            if data.len() != existing.len() {
                return Err(type_err);
            }
            Ok(SodValue::OctetString(data.to_vec()))
        }
        SodValue::Domain(domain) => {
            let mut updated = domain.clone();
            if updated.actual_len == 0 && offset == 0 {
                // Unsegmented write: the data is the whole object.
                if data.len() > updated.max_len {
                    return Err(offset_err);
                }
                updated.actual_len = data.len();
                updated.data = data.to_vec();
            } else {
                let end = offset.checked_add(data.len()).ok_or(offset_err)?;
                if end > updated.actual_len {
                    return Err(offset_err);
                }
                updated.data[offset..end].copy_from_slice(data);
            }
            Ok(SodValue::Domain(updated))
        }
    }
}
