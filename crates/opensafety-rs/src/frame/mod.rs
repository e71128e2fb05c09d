// crates/opensafety-rs/src/frame/mod.rs

pub mod codec;
pub mod crc;

pub use codec::{deserialize, frame_length, serialize};

use crate::shnf::SafetyError;
use core::convert::TryFrom;

// --- Frame Identifiers (6 bit ID field of sub-frame one) ---

/// SNMT extended service request.
pub const K_FRAME_ID_SNMT_SERV_REQ: u8 = 0x28;
/// SNMT extended service response.
pub const K_FRAME_ID_SNMT_SERV_RESP: u8 = 0x29;
/// SNMT UDID request.
pub const K_FRAME_ID_SNMT_UDID_REQ: u8 = 0x2A;
/// SNMT UDID response.
pub const K_FRAME_ID_SNMT_UDID_RESP: u8 = 0x2B;
/// SNMT SADR assignment request.
pub const K_FRAME_ID_SNMT_ASS_SADR_REQ: u8 = 0x2C;
/// SNMT SADR assignment response.
pub const K_FRAME_ID_SNMT_ASS_SADR_RESP: u8 = 0x2D;
/// SPDO carrying process data only.
pub const K_FRAME_ID_SPDO_DATA_ONLY: u8 = 0x30;
/// SPDO carrying process data and a time request.
pub const K_FRAME_ID_SPDO_TREQ: u8 = 0x32;
/// SPDO carrying process data and a time response.
pub const K_FRAME_ID_SPDO_TRES: u8 = 0x34;
/// SSDO service request.
pub const K_FRAME_ID_SSDO_REQ: u8 = 0x38;
/// SSDO service response.
pub const K_FRAME_ID_SSDO_RESP: u8 = 0x39;
/// Slim SSDO service request.
pub const K_FRAME_ID_SSDO_SLIM_REQ: u8 = 0x3A;
/// Slim SSDO service response.
pub const K_FRAME_ID_SSDO_SLIM_RESP: u8 = 0x3B;

// --- Frame class masks (applied to the 6 bit id shifted left by two) ---

pub const K_SNMT_FRAME_MASK: u8 = 0xA0;
pub const K_SPDO_FRAME_MASK: u8 = 0xC0;
pub const K_SSDO_FRAME_MASK: u8 = 0xE0;
pub const K_SLIM_SSDO_FRAME_MASK: u8 = 0xE8;

/// Maximum value of the 6 bit time request (TR) field.
pub const K_MAX_TR: u8 = 0x3F;

/// The coarse frame class as seen by the SHNF and the SSC dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    Snmt,
    Spdo,
    Ssdo,
    SsdoSlim,
}

/// Fully discriminated frame type.
///
/// The discriminant is derived once during deserialization so downstream
/// code never re-hashes the id bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    SnmtServiceRequest,
    SnmtServiceResponse,
    SnmtUdidRequest,
    SnmtUdidResponse,
    SnmtSadrAssignRequest,
    SnmtSadrAssignResponse,
    SpdoDataOnly,
    SpdoTimeRequest,
    SpdoTimeResponse,
    SsdoServiceRequest,
    SsdoServiceResponse,
    SsdoSlimServiceRequest,
    SsdoSlimServiceResponse,
}

impl TryFrom<u8> for FrameType {
    type Error = SafetyError;
    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            K_FRAME_ID_SNMT_SERV_REQ => Ok(FrameType::SnmtServiceRequest),
            K_FRAME_ID_SNMT_SERV_RESP => Ok(FrameType::SnmtServiceResponse),
            K_FRAME_ID_SNMT_UDID_REQ => Ok(FrameType::SnmtUdidRequest),
            K_FRAME_ID_SNMT_UDID_RESP => Ok(FrameType::SnmtUdidResponse),
            K_FRAME_ID_SNMT_ASS_SADR_REQ => Ok(FrameType::SnmtSadrAssignRequest),
            K_FRAME_ID_SNMT_ASS_SADR_RESP => Ok(FrameType::SnmtSadrAssignResponse),
            K_FRAME_ID_SPDO_DATA_ONLY => Ok(FrameType::SpdoDataOnly),
            K_FRAME_ID_SPDO_TREQ => Ok(FrameType::SpdoTimeRequest),
            K_FRAME_ID_SPDO_TRES => Ok(FrameType::SpdoTimeResponse),
            K_FRAME_ID_SSDO_REQ => Ok(FrameType::SsdoServiceRequest),
            K_FRAME_ID_SSDO_RESP => Ok(FrameType::SsdoServiceResponse),
            K_FRAME_ID_SSDO_SLIM_REQ => Ok(FrameType::SsdoSlimServiceRequest),
            K_FRAME_ID_SSDO_SLIM_RESP => Ok(FrameType::SsdoSlimServiceResponse),
            other => Err(SafetyError::InvalidFrameId(other)),
        }
    }
}

impl FrameType {
    /// Returns the 6 bit frame identifier.
    pub fn id(&self) -> u8 {
        match self {
            FrameType::SnmtServiceRequest => K_FRAME_ID_SNMT_SERV_REQ,
            FrameType::SnmtServiceResponse => K_FRAME_ID_SNMT_SERV_RESP,
            FrameType::SnmtUdidRequest => K_FRAME_ID_SNMT_UDID_REQ,
            FrameType::SnmtUdidResponse => K_FRAME_ID_SNMT_UDID_RESP,
            FrameType::SnmtSadrAssignRequest => K_FRAME_ID_SNMT_ASS_SADR_REQ,
            FrameType::SnmtSadrAssignResponse => K_FRAME_ID_SNMT_ASS_SADR_RESP,
            FrameType::SpdoDataOnly => K_FRAME_ID_SPDO_DATA_ONLY,
            FrameType::SpdoTimeRequest => K_FRAME_ID_SPDO_TREQ,
            FrameType::SpdoTimeResponse => K_FRAME_ID_SPDO_TRES,
            FrameType::SsdoServiceRequest => K_FRAME_ID_SSDO_REQ,
            FrameType::SsdoServiceResponse => K_FRAME_ID_SSDO_RESP,
            FrameType::SsdoSlimServiceRequest => K_FRAME_ID_SSDO_SLIM_REQ,
            FrameType::SsdoSlimServiceResponse => K_FRAME_ID_SSDO_SLIM_RESP,
        }
    }

    /// Returns the coarse frame class (the masked high bits of the id).
    pub fn class(&self) -> FrameClass {
        match self {
            FrameType::SnmtServiceRequest
            | FrameType::SnmtServiceResponse
            | FrameType::SnmtUdidRequest
            | FrameType::SnmtUdidResponse
            | FrameType::SnmtSadrAssignRequest
            | FrameType::SnmtSadrAssignResponse => FrameClass::Snmt,
            FrameType::SpdoDataOnly | FrameType::SpdoTimeRequest | FrameType::SpdoTimeResponse => {
                FrameClass::Spdo
            }
            FrameType::SsdoServiceRequest | FrameType::SsdoServiceResponse => FrameClass::Ssdo,
            FrameType::SsdoSlimServiceRequest | FrameType::SsdoSlimServiceResponse => {
                FrameClass::SsdoSlim
            }
        }
    }

    /// Direction bit: true for responses (low bit of the id is set).
    pub fn is_response(&self) -> bool {
        self.id() & 0x01 != 0
    }

    /// True for frames using the slim layout (no payload image in
    /// sub-frame two).
    pub fn is_slim(&self) -> bool {
        matches!(
            self,
            FrameType::SsdoSlimServiceRequest | FrameType::SsdoSlimServiceResponse
        )
    }
}

/// Parsed header of an openSAFETY frame.
///
/// `adr` addresses the Safety Node the frame concerns (the slave for SNMT,
/// the producer for SPDO, the server for SSDO requests); `tadr` carries the
/// peer address (the time request target for SPDOs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    /// 10 bit address field of sub-frame one.
    pub adr: u16,
    /// 10 bit safety domain number.
    pub sdn: u16,
    /// Number of payload bytes.
    pub le: u8,
    /// Low 16 bits of the consecutive time of the sender.
    pub ct: u16,
    /// 10 bit target address field of sub-frame two.
    pub tadr: u16,
    /// 6 bit time request distinguisher.
    pub tr: u8,
}

impl FrameHeader {
    /// Builds the header of a response to `request`, keeping the address
    /// and domain fields and echoing the consecutive time.
    pub fn response_to(request: &FrameHeader, frame_type: FrameType, le: u8) -> Self {
        FrameHeader {
            frame_type,
            adr: request.adr,
            sdn: request.sdn,
            le,
            ct: request.ct,
            tadr: request.tadr,
            tr: request.tr,
        }
    }
}

/// A frame prepared for transmission: header plus sub-frame one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameData {
    pub hdr: FrameHeader,
    pub payload: alloc::vec::Vec<u8>,
}
