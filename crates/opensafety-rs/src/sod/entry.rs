// crates/opensafety-rs/src/sod/entry.rs
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

/// Attribute flags of an SOD entry, as a type-safe bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SodAttr(pub u16);

impl SodAttr {
    // --- Flag Constants ---
    /// Read-only, value is constant.
    pub const RO_CONST: Self = Self(1 << 0);
    /// Read-only; writable locally with the overwrite flag only.
    pub const RO: Self = Self(1 << 1);
    /// Read and write access.
    pub const RW: Self = Self(1 << 2);
    /// Entry participates in the parameter-set checksum.
    pub const CRC: Self = Self(1 << 3);
    /// Entry may be mapped into an SPDO.
    pub const PDO_MAP: Self = Self(1 << 4);
    /// Callback runs before every read.
    pub const BEF_RD: Self = Self(1 << 5);
    /// Callback runs before every write and may veto it.
    pub const BEF_WR: Self = Self(1 << 6);
    /// Callback runs after every committed write.
    pub const AFT_WR: Self = Self(1 << 7);

    // --- Methods ---

    /// Checks if all of the specified flags are set.
    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Returns an empty set of flags.
    pub fn empty() -> Self {
        Self(0)
    }

    /// Returns the union of two flag sets.
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Abort codes returned to a remote SSDO peer when an access fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SodAbortCode {
    ToggleBitNotAlternated = 0x0503_0000,
    UnsupportedAccess = 0x0601_0000,
    ReadWriteOnlyObject = 0x0601_0001,
    WriteReadOnlyObject = 0x0601_0002,
    ObjectDoesNotExist = 0x0602_0000,
    ObjectNotMappable = 0x0604_0041,
    LengthDoesNotMatch = 0x0607_0010,
    LengthTooHigh = 0x0607_0012,
    LengthTooLow = 0x0607_0013,
    SubIndexDoesNotExist = 0x0609_0011,
    ValueRangeExceeded = 0x0609_0030,
    ValueTooHigh = 0x0609_0031,
    ValueTooLow = 0x0609_0032,
    GeneralError = 0x0800_0000,
    DataCannotBeTransferred = 0x0800_0020,
    /// Access blocked because of local control (the SOD write lock).
    LocalControl = 0x0800_0021,
    PresentDeviceState = 0x0800_0022,
}

/// Data of a domain entry: an explicit actual length over a fixed
/// capacity buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainData {
    pub max_len: usize,
    pub actual_len: usize,
    pub data: Vec<u8>,
}

impl DomainData {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            actual_len: 0,
            data: Vec::new(),
        }
    }
}

/// Typed storage of an SOD entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SodValue {
    U8(u8),
    U16(u16),
    U32(u32),
    I8(i8),
    OctetString(Vec<u8>),
    Domain(DomainData),
}

impl SodValue {
    /// Current byte length of the stored value.
    pub fn len(&self) -> usize {
        match self {
            SodValue::U8(_) | SodValue::I8(_) => 1,
            SodValue::U16(_) => 2,
            SodValue::U32(_) => 4,
            SodValue::OctetString(v) => v.len(),
            SodValue::Domain(d) => d.actual_len,
        }
    }

    /// Maximum byte length the entry accepts.
    pub fn max_len(&self) -> usize {
        match self {
            SodValue::OctetString(v) => v.len(),
            SodValue::Domain(d) => d.max_len,
            other => other.len(),
        }
    }

    /// Serializes the value into little endian wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            SodValue::U8(v) => Vec::from([*v]),
            SodValue::I8(v) => Vec::from([*v as u8]),
            SodValue::U16(v) => Vec::from(v.to_le_bytes()),
            SodValue::U32(v) => Vec::from(v.to_le_bytes()),
            SodValue::OctetString(v) => v.clone(),
            SodValue::Domain(d) => d.data[..d.actual_len].to_vec(),
        }
    }

    /// Interprets scalar values as an unsigned magnitude for range checks.
    pub fn as_scalar(&self) -> Option<i64> {
        match self {
            SodValue::U8(v) => Some(*v as i64),
            SodValue::U16(v) => Some(*v as i64),
            SodValue::U32(v) => Some(*v as i64),
            SodValue::I8(v) => Some(*v as i64),
            _ => None,
        }
    }
}

/// Represents a range of valid values for a scalar entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRange {
    pub min: SodValue,
    pub max: SodValue,
}

/// Access kind passed to an entry callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SodService {
    BeforeRead,
    BeforeWrite,
    AfterWrite,
}

/// Per-entry access callback. Vetoing returns the abort code the access
/// is rejected with. The callback must not call back into the stack.
pub type SodCallback =
    Box<dyn FnMut(u8, SodService, u16, u8, &[u8]) -> Result<(), SodAbortCode> + Send>;

/// A complete entry in the Safety Object Dictionary.
pub struct SodEntry {
    /// The actual data.
    pub value: SodValue,
    /// The attribute flags of the entry.
    pub attr: SodAttr,
    /// The default value restored on init. `None` keeps the initial value.
    pub default: Option<SodValue>,
    /// The valid value range. `None` for unchecked or complex types.
    pub range: Option<ValueRange>,
    /// Access callback, required when any of BEF_RD/BEF_WR/AFT_WR is set.
    pub callback: Option<SodCallback>,
}

impl fmt::Debug for SodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SodEntry")
            .field("value", &self.value)
            .field("attr", &self.attr)
            .field("range", &self.range)
            .field(
                "callback",
                &if self.callback.is_some() {
                    "Some(<callback>)"
                } else {
                    "None"
                },
            )
            .finish()
    }
}

impl SodEntry {
    /// Creates a plain entry without range or callback.
    pub fn new(value: SodValue, attr: SodAttr) -> Self {
        Self {
            value,
            attr,
            default: None,
            range: None,
            callback: None,
        }
    }

    /// Creates a range-checked scalar entry.
    pub fn with_range(value: SodValue, attr: SodAttr, min: SodValue, max: SodValue) -> Self {
        Self {
            value,
            attr,
            default: None,
            range: Some(ValueRange { min, max }),
            callback: None,
        }
    }

    /// Creates an entry with an access callback.
    pub fn with_callback(value: SodValue, attr: SodAttr, callback: SodCallback) -> Self {
        Self {
            value,
            attr,
            default: None,
            range: None,
            callback: Some(callback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_attr_contains() {
        let attr = SodAttr::RW.with(SodAttr::CRC);
        assert!(attr.contains(SodAttr::RW));
        assert!(attr.contains(SodAttr::CRC));
        assert!(!attr.contains(SodAttr::PDO_MAP));
    }

    #[test]
    fn test_value_lengths() {
        assert_eq!(SodValue::U8(0).len(), 1);
        assert_eq!(SodValue::U16(0).len(), 2);
        assert_eq!(SodValue::U32(0).len(), 4);
        assert_eq!(SodValue::OctetString(vec![0; 6]).len(), 6);
        let mut d = DomainData::new(100);
        d.actual_len = 40;
        d.data = vec![0; 40];
        assert_eq!(SodValue::Domain(d).len(), 40);
    }

    #[test]
    fn test_scalar_bytes_little_endian() {
        assert_eq!(SodValue::U16(0x1234).to_bytes(), vec![0x34, 0x12]);
        assert_eq!(
            SodValue::U32(0x8899AABB).to_bytes(),
            vec![0xBB, 0xAA, 0x99, 0x88]
        );
    }
}
