// crates/opensafety-rs/src/snmts/response.rs
//! Construction of SNMT slave response frames.

use crate::frame::{FrameData, FrameHeader, FrameType};
use crate::snmt::ExtServResp;
use crate::sod::constants::{
    IDX_COMMON_COM_PARAM, IDX_TX_SPDO_COM_BASE, IDX_UDID, SUBIDX_SADR_SCM, SUBIDX_SDN,
    SUBIDX_TX_SADR,
};
use crate::sod::Sod;
use crate::types::UDID_SIZE;
use alloc::vec::Vec;

/// Reads the main SADR of this SN (SOD 0x1C00/0x01).
pub fn main_sadr(sod: &Sod) -> Option<u16> {
    sod.read_u16(IDX_TX_SPDO_COM_BASE, SUBIDX_TX_SADR)
        .filter(|&sadr| sadr != 0)
}

/// Builds the response to a "UDID request" carrying the own physical
/// address from SOD 0x1019/0x00.
pub fn udid_response(sod: &Sod, request: &FrameHeader) -> Option<FrameData> {
    let udid = sod.read_octets(IDX_UDID, 0)?;
    if udid.len() != UDID_SIZE {
        return None;
    }
    Some(FrameData {
        hdr: FrameHeader::response_to(request, FrameType::SnmtUdidResponse, UDID_SIZE as u8),
        payload: udid.to_vec(),
    })
}

/// Builds the response to a "SADR assignment", echoing the UDID.
pub fn sadr_assigned(request: &FrameHeader, request_payload: &[u8]) -> FrameData {
    FrameData {
        hdr: FrameHeader::response_to(
            request,
            FrameType::SnmtSadrAssignResponse,
            UDID_SIZE as u8,
        ),
        payload: request_payload[..UDID_SIZE].to_vec(),
    }
}

/// Builds an extended service response with `extra` payload bytes after
/// the response id.
pub fn ext_response(request: &FrameHeader, resp: ExtServResp, extra: &[u8]) -> FrameData {
    let mut payload = Vec::with_capacity(1 + extra.len());
    payload.push(resp as u8);
    payload.extend_from_slice(extra);
    FrameData {
        hdr: FrameHeader::response_to(
            request,
            FrameType::SnmtServiceResponse,
            payload.len() as u8,
        ),
        payload,
    }
}

/// Builds the SN FAIL response reporting `(group, code)`.
pub fn sn_fail(request: &FrameHeader, group: u8, code: u8) -> FrameData {
    ext_response(request, ExtServResp::SnFail, &[group, code])
}

/// Builds the unsolicited "reset guarding" pulse the refresh timer emits
/// towards the SCM while the SN sits in PRE-OPERATIONAL.
pub fn reset_guard_scm(sod: &Sod, ct: u32) -> Option<FrameData> {
    let sadr = main_sadr(sod)?;
    let sdn = sod.read_u16(IDX_COMMON_COM_PARAM, SUBIDX_SDN)?;
    let scm_sadr = sod
        .read_u16(IDX_COMMON_COM_PARAM, SUBIDX_SADR_SCM)
        .unwrap_or(0);
    Some(FrameData {
        hdr: FrameHeader {
            frame_type: FrameType::SnmtServiceResponse,
            adr: sadr,
            sdn,
            le: 1,
            ct: ct as u16,
            tadr: scm_sadr,
            tr: 0,
        },
        payload: Vec::from([ExtServResp::SnStsPreop as u8]),
    })
}
