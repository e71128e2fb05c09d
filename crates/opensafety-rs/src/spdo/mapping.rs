// crates/opensafety-rs/src/spdo/mapping.rs
//! SPDO mapping entries: the description of which SOD objects travel in
//! which payload bytes, and the packing/unpacking helpers built on it.

use crate::snmt;
use crate::sod::{Sod, SodAttr};
use crate::types::EPLS_CFG_MAX_PYLD_LEN;
use crate::types::SPDO_CFG_MAX_SPDO_MAPP_ENTRIES;
use alloc::vec::Vec;

/// A single SPDO mapping entry, parsed from a 32 bit SOD value:
/// `index:16 | sub:8 | bit length:8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpdoMappingEntry {
    pub index: u16,
    pub sub: u8,
    pub length_bits: u8,
}

impl SpdoMappingEntry {
    /// Deserializes a mapping entry from its SOD representation.
    pub fn from_u32(value: u32) -> Self {
        Self {
            index: (value >> 16) as u16,
            sub: ((value >> 8) & 0xFF) as u8,
            length_bits: (value & 0xFF) as u8,
        }
    }

    /// Serializes the mapping entry for storing in the SOD.
    pub fn to_u32(&self) -> u32 {
        ((self.index as u32) << 16) | ((self.sub as u32) << 8) | self.length_bits as u32
    }

    /// Mapping lengths are byte aligned; bit granular objects are not
    /// supported by this profile.
    pub fn byte_length(&self) -> Option<usize> {
        if self.length_bits % 8 == 0 && self.length_bits > 0 {
            Some(self.length_bits as usize / 8)
        } else {
            None
        }
    }
}

/// Reads and validates the mapping list of one SPDO from the SOD.
///
/// Every mapped object must exist, carry the PDO_MAP attribute and be
/// byte aligned; the packed size must fit one payload. The error carries
/// the SN FAIL code the caller reports (`MAP_FAILED_RX`/`MAP_FAILED_TX`).
pub(crate) fn read_mapping(
    sod: &Sod,
    mapping_index: u16,
    fail_code: u8,
) -> Result<Vec<SpdoMappingEntry>, (u8, u8)> {
    let fail = (snmt::K_FAIL_GRP_STK, fail_code);
    let count = sod.read_u8(mapping_index, 0).ok_or(fail)?;
    if count as usize > SPDO_CFG_MAX_SPDO_MAPP_ENTRIES {
        return Err(fail);
    }
    let mut entries = Vec::with_capacity(count as usize);
    let mut total_bytes = 0usize;
    for sub in 1..=count {
        let raw = sod.read_u32(mapping_index, sub).ok_or(fail)?;
        let entry = SpdoMappingEntry::from_u32(raw);
        let byte_length = entry.byte_length().ok_or(fail)?;
        let acs = sod.attr_get(entry.index, entry.sub).map_err(|_| fail)?;
        if !acs.attr.contains(SodAttr::PDO_MAP) || byte_length > acs.max_len {
            return Err(fail);
        }
        total_bytes += byte_length;
        entries.push(entry);
    }
    if total_bytes > EPLS_CFG_MAX_PYLD_LEN {
        return Err(fail);
    }
    Ok(entries)
}

/// Packed byte size of a mapping list.
pub(crate) fn mapped_size(entries: &[SpdoMappingEntry]) -> usize {
    entries
        .iter()
        .map(|e| e.byte_length().unwrap_or(0))
        .sum()
}

/// Packs the mapped SOD objects into an SPDO payload.
pub(crate) fn pack(sod: &mut Sod, entries: &[SpdoMappingEntry]) -> Option<Vec<u8>> {
    let mut payload = Vec::with_capacity(mapped_size(entries));
    for entry in entries {
        let len = entry.byte_length()?;
        let acs = sod.attr_get(entry.index, entry.sub).ok()?;
        let bytes = sod.read(&acs, 0, len).ok()?;
        payload.extend_from_slice(&bytes);
    }
    Some(payload)
}

/// Unpacks an SPDO payload into the mapped SOD objects.
pub(crate) fn unpack(sod: &mut Sod, entries: &[SpdoMappingEntry], payload: &[u8]) -> bool {
    let mut offset = 0usize;
    for entry in entries {
        let len = match entry.byte_length() {
            Some(len) => len,
            None => return false,
        };
        let chunk = &payload[offset..offset + len];
        let acs = match sod.attr_get(entry.index, entry.sub) {
            Ok(acs) => acs,
            Err(_) => return false,
        };
        if sod.write(&acs, chunk, true, 0).is_err() {
            return false;
        }
        offset += len;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sod::{SodEntry, SodValue};

    #[test]
    fn test_mapping_entry_roundtrip() {
        let entry = SpdoMappingEntry {
            index: 0x6000,
            sub: 0x01,
            length_bits: 16,
        };
        let raw = entry.to_u32();
        assert_eq!(raw, 0x6000_0110);
        assert_eq!(SpdoMappingEntry::from_u32(raw), entry);
    }

    fn mapping_sod() -> Sod {
        let mut sod = Sod::new(0);
        sod.insert(
            0x6000,
            0x01,
            SodEntry::new(SodValue::U8(0x42), SodAttr::RW.with(SodAttr::PDO_MAP)),
        );
        sod.insert(
            0x6000,
            0x02,
            SodEntry::new(SodValue::U16(0), SodAttr::RW.with(SodAttr::PDO_MAP)),
        );
        sod.insert(0x6001, 0x01, SodEntry::new(SodValue::U8(0), SodAttr::RW));
        sod.insert(
            0x1800,
            0x00,
            SodEntry::new(SodValue::U8(2), SodAttr::RW),
        );
        sod.insert(
            0x1800,
            0x01,
            SodEntry::new(
                SodValue::U32(
                    SpdoMappingEntry {
                        index: 0x6000,
                        sub: 1,
                        length_bits: 8,
                    }
                    .to_u32(),
                ),
                SodAttr::RW,
            ),
        );
        sod.insert(
            0x1800,
            0x02,
            SodEntry::new(
                SodValue::U32(
                    SpdoMappingEntry {
                        index: 0x6000,
                        sub: 2,
                        length_bits: 16,
                    }
                    .to_u32(),
                ),
                SodAttr::RW,
            ),
        );
        sod
    }

    #[test]
    fn test_read_mapping_validates_and_packs() {
        let mut sod = mapping_sod();
        let entries = read_mapping(&sod, 0x1800, snmt::K_FAIL_ERR_MAP_FAILED_RX).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(mapped_size(&entries), 3);
        let payload = pack(&mut sod, &entries).unwrap();
        assert_eq!(payload, [0x42, 0x00, 0x00]);
    }

    #[test]
    fn test_read_mapping_rejects_unmappable_object() {
        let mut sod = mapping_sod();
        // 0x6001/1 lacks the PDO_MAP attribute.
        sod.insert(
            0x1800,
            0x01,
            SodEntry::new(
                SodValue::U32(
                    SpdoMappingEntry {
                        index: 0x6001,
                        sub: 1,
                        length_bits: 8,
                    }
                    .to_u32(),
                ),
                SodAttr::RW,
            ),
        );
        let result = read_mapping(&sod, 0x1800, snmt::K_FAIL_ERR_MAP_FAILED_RX);
        assert_eq!(
            result.unwrap_err(),
            (snmt::K_FAIL_GRP_STK, snmt::K_FAIL_ERR_MAP_FAILED_RX)
        );
    }

    #[test]
    fn test_unpack_writes_mapped_objects() {
        let mut sod = mapping_sod();
        let entries = read_mapping(&sod, 0x1800, snmt::K_FAIL_ERR_MAP_FAILED_RX).unwrap();
        assert!(unpack(&mut sod, &entries, &[0x11, 0x22, 0x33]));
        assert_eq!(sod.read_u8(0x6000, 1), Some(0x11));
        assert_eq!(sod.read_u16(0x6000, 2), Some(0x3322));
    }
}
