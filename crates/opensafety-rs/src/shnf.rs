// crates/opensafety-rs/src/shnf.rs
use crate::frame::{codec, FrameClass, FrameHeader};
use crate::types::{AddressError, Sadr};
use alloc::vec::Vec;
use core::fmt;

/// Defines a portable, descriptive Error type for the openSAFETY stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyError {
    /// The provided buffer is too small for the operation.
    BufferTooShort,
    /// The whole-frame length matches none of the permitted layouts.
    InvalidFrameLength(usize),
    /// The 6 bit frame identifier is not a known frame type.
    InvalidFrameId(u8),
    /// A sub-frame CRC did not verify.
    CrcMismatch,
    /// The unmasked sub-frame two payload differs from sub-frame one.
    PayloadMismatch,
    /// The two LE images of the frame disagree, or LE exceeds the limit.
    LengthFieldMismatch,
    /// An address field is not a valid 10 bit address.
    InvalidAddress,
    /// The requested SOD index does not exist.
    ObjectNotFound,
    /// The requested sub-index does not exist for the given index.
    SubObjectNotFound,
    /// An access used a value of the wrong primitive type or length.
    TypeMismatch,
    /// The SOD is globally write-locked.
    ObjectWriteProtected,
    /// The object is read-only for this kind of access.
    ObjectReadOnly,
    /// A range-checked write was outside [min, max].
    ValueRangeExceeded,
    /// A before/after access callback vetoed the access.
    CallbackAbort(u32),
    /// An SSDO transfer was aborted by the peer; carries the abort code.
    SsdoAborted(u32),
    /// SSDO segment out of order (toggle bit or unexpected segment kind).
    SsdoSequenceError(&'static str),
    /// No request FSM is free in the SNMTM/SSDOC pool.
    NoFsmAvailable,
    /// A handle passed by the application does not address a pending item.
    InvalidHandle(u16),
    /// The device is not yet configured or ready for the operation.
    NotReady,
    /// The SHNF could not supply a transmit memory block.
    NoTxMemBlock,
    /// An underlying I/O error occurred.
    IoError,
    /// Internal logic error.
    InternalError(&'static str),
}

impl fmt::Display for SafetyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooShort => write!(f, "Buffer is too short"),
            Self::InvalidFrameLength(l) => write!(f, "Invalid frame length: {}", l),
            Self::InvalidFrameId(id) => write!(f, "Invalid frame id: {:#04x}", id),
            Self::CrcMismatch => write!(f, "Sub-frame CRC mismatch"),
            Self::PayloadMismatch => write!(f, "Sub-frame payload images differ"),
            Self::LengthFieldMismatch => write!(f, "LE field inconsistent"),
            Self::InvalidAddress => write!(f, "Address outside 10 bit range"),
            Self::ObjectNotFound => write!(f, "SOD index not found"),
            Self::SubObjectNotFound => write!(f, "SOD sub-index not found"),
            Self::TypeMismatch => write!(f, "Data type mismatch"),
            Self::ObjectWriteProtected => write!(f, "SOD is write locked"),
            Self::ObjectReadOnly => write!(f, "Object is read-only"),
            Self::ValueRangeExceeded => write!(f, "Value outside configured range"),
            Self::CallbackAbort(code) => write!(f, "Access vetoed, abort {:#010X}", code),
            Self::SsdoAborted(code) => write!(f, "SSDO aborted with code {:#010X}", code),
            Self::SsdoSequenceError(s) => write!(f, "SSDO sequence error: {}", s),
            Self::NoFsmAvailable => write!(f, "No free request FSM"),
            Self::InvalidHandle(h) => write!(f, "Invalid handle: {}", h),
            Self::NotReady => write!(f, "Device not ready or configured"),
            Self::NoTxMemBlock => write!(f, "SHNF supplied no tx memory block"),
            Self::IoError => write!(f, "Underlying I/O error"),
            Self::InternalError(s) => write!(f, "Internal error: {}", s),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SafetyError {}

impl From<AddressError> for SafetyError {
    fn from(_: AddressError) -> Self {
        SafetyError::InvalidAddress
    }
}

/// A frame handed up by the transport.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub data: Vec<u8>,
    pub frame_class: FrameClass,
}

/// Safety Hardware Near Firmware: the abstract transport seam.
///
/// The transport below this trait is a black channel; the stack is ignorant
/// of sockets, endpoints, topic names and any serialization above the
/// safety frame. Implementations are responsible for mutual exclusion
/// between their network thread and the (single) stack thread.
pub trait Shnf {
    /// Initializes the transport for one instance. Called once at startup,
    /// before any other stack function.
    fn init(&mut self, instance: u8, loopback_sadr: Sadr) -> Result<(), SafetyError>;

    /// Requests a writable memory block for one outbound frame.
    ///
    /// The returned buffer is exactly `length` bytes. `tx_spdo_num` is only
    /// meaningful for SPDO frames and 0 otherwise.
    fn get_tx_mem_block(
        &mut self,
        instance: u8,
        length: usize,
        frame_class: FrameClass,
        tx_spdo_num: u16,
    ) -> Option<Vec<u8>>;

    /// Hands a filled memory block to the transport for transmission. The
    /// block is owned by the transport for the life of the emitted frame.
    fn mark_tx_mem_block(&mut self, instance: u8, frame: Vec<u8>) -> Result<(), SafetyError>;

    /// Polls the inbound queue. Returns `None` when no frame is pending.
    /// The same frame is returned again until it is released.
    fn get_epls_frame(&mut self) -> Option<ReceivedFrame>;

    /// Releases the frame most recently returned by [`Self::get_epls_frame`].
    fn release_epls_frame(&mut self);
}

/// Serializes one frame into a transport supplied memory block and hands
/// it over for transmission.
pub(crate) fn send_frame(
    shnf: &mut dyn Shnf,
    instance: u8,
    hdr: &FrameHeader,
    payload: &[u8],
    tx_spdo_num: u16,
) -> Result<(), SafetyError> {
    let length = codec::frame_length(hdr.le, hdr.frame_type.is_slim());
    let mut block = shnf
        .get_tx_mem_block(instance, length, hdr.frame_type.class(), tx_spdo_num)
        .ok_or(SafetyError::NoTxMemBlock)?;
    block.resize(length, 0);
    codec::serialize(hdr, payload, &mut block)?;
    shnf.mark_tx_mem_block(instance, block)
}
