// crates/opensafety-rs/src/ssdo/mod.rs
//! SSDO, the Safety Service Data Object transfer layer.
//!
//! Object accesses travel as expedited transfers (one request, one
//! response) or as segmented transfers with an alternating toggle bit.
//! The service command byte is a bitfield; the abort command carries a
//! 32 bit abort code with the SOD abort embedded.

pub mod client;
pub mod server;

pub use client::Ssdoc;
pub use server::Ssdos;

use crate::frame::{FrameData, FrameHeader, FrameType};
use alloc::vec::Vec;

// --- Service command bits (data byte 0) ---

pub const SACMD_DOWNLOAD: u8 = 0x01;
pub const SACMD_UPLOAD: u8 = 0x02;
pub const SACMD_ABORT: u8 = 0x04;
pub const SACMD_SEGMENTED: u8 = 0x08;
pub const SACMD_TOGGLE: u8 = 0x10;
pub const SACMD_INITIATE: u8 = 0x20;
pub const SACMD_END_SEGMENT: u8 = 0x40;

/// Download initiate, expedited.
pub const K_DWNLD_INIT_EXP: u8 = SACMD_INITIATE | SACMD_DOWNLOAD;
/// Download initiate, segmented.
pub const K_DWNLD_INIT_SEG: u8 = SACMD_INITIATE | SACMD_SEGMENTED | SACMD_DOWNLOAD;
/// Download middle segment.
pub const K_DWNLD_SEG_MID: u8 = SACMD_SEGMENTED | SACMD_DOWNLOAD;
/// Download end segment.
pub const K_DWNLD_SEG_END: u8 = SACMD_END_SEGMENT | SACMD_SEGMENTED | SACMD_DOWNLOAD;
/// Upload initiate, expedited.
pub const K_UPLD_INIT_EXP: u8 = SACMD_INITIATE | SACMD_UPLOAD;
/// Upload initiate, segmented.
pub const K_UPLD_INIT_SEG: u8 = SACMD_INITIATE | SACMD_SEGMENTED | SACMD_UPLOAD;
/// Upload middle segment.
pub const K_UPLD_SEG_MID: u8 = SACMD_SEGMENTED | SACMD_UPLOAD;
/// Upload end segment.
pub const K_UPLD_SEG_END: u8 = SACMD_END_SEGMENT | SACMD_SEGMENTED | SACMD_UPLOAD;

/// Offset of the object index/sub-index in initiate and abort frames.
pub const K_OFS_IDX: usize = 1;
pub const K_OFS_SUB: usize = 3;
/// Offset of the payload of an expedited download initiate.
pub const K_OFS_EXP_DATA: usize = 4;
/// Offset of the total length of a segmented initiate.
pub const K_OFS_SEG_LEN: usize = 4;
/// Offset of the first data of a segmented download initiate.
pub const K_OFS_SEG_DATA: usize = 8;

/// Strips the toggle bit off a command byte.
pub fn sacmd_kind(cmd: u8) -> u8 {
    cmd & !SACMD_TOGGLE
}

/// Builds an abort frame for either direction.
pub fn abort_frame(
    request: &FrameHeader,
    response: bool,
    index: u16,
    sub: u8,
    abort_code: u32,
) -> FrameData {
    let frame_type = if response {
        FrameType::SsdoServiceResponse
    } else {
        FrameType::SsdoServiceRequest
    };
    let mut payload = Vec::with_capacity(8);
    payload.push(SACMD_ABORT);
    payload.extend_from_slice(&index.to_le_bytes());
    payload.push(sub);
    payload.extend_from_slice(&abort_code.to_le_bytes());
    FrameData {
        hdr: FrameHeader::response_to(request, frame_type, payload.len() as u8),
        payload,
    }
}

/// Parses `(index, sub)` out of an initiate or abort payload.
pub fn parse_idx_sub(payload: &[u8]) -> (u16, u8) {
    (
        u16::from_le_bytes([payload[K_OFS_IDX], payload[K_OFS_IDX + 1]]),
        payload[K_OFS_SUB],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_values() {
        assert_eq!(K_DWNLD_INIT_EXP, 0x21);
        assert_eq!(K_DWNLD_INIT_SEG, 0x29);
        assert_eq!(K_DWNLD_SEG_MID, 0x09);
        assert_eq!(K_DWNLD_SEG_END, 0x49);
        assert_eq!(K_UPLD_INIT_EXP, 0x22);
        assert_eq!(K_UPLD_INIT_SEG, 0x2A);
        assert_eq!(sacmd_kind(K_DWNLD_SEG_MID | SACMD_TOGGLE), K_DWNLD_SEG_MID);
    }
}
