// crates/opensafety-rs/src/ssdo/server.rs
//! SSDOS, the SSDO server of a Safety Node.
//!
//! Serves expedited and segmented object accesses against the local SOD.
//! Remote writes never carry the overwrite privilege; every SOD rejection
//! is answered with an abort frame embedding the SOD abort code.

use super::*;
use crate::frame::{FrameData, FrameHeader, FrameType};
use crate::log::{my_debug, my_warn};
use crate::sapl::SnApplication;
use crate::serr::{self, ErrorClass, ErrorType, Serr, UnitId};
use crate::sod::constants::{IDX_COMMON_COM_PARAM, SUBIDX_SDN};
use crate::sod::{Sod, SodAbortCode};
use crate::types::EPLS_CFG_MAX_PYLD_LEN;
use alloc::vec::Vec;

const fn err_minor(local: u8) -> u16 {
    serr::build_error(
        ErrorType::NotFailSafe,
        ErrorClass::Minor,
        UnitId::SsdoServer,
        local,
    )
}

pub const SSDOS_K_ERR_PYLD_LEN: u16 = err_minor(0x01);
pub const SSDOS_K_ERR_CMD_UNKNOWN: u16 = err_minor(0x02);
pub const SSDOS_K_ERR_TOGGLE: u16 = err_minor(0x03);
pub const SSDOS_K_ERR_NO_TRANSFER: u16 = err_minor(0x04);
pub const SSDOS_K_ERR_SDN_INV: u16 = err_minor(0x05);

/// Largest data chunk of one segment: the payload budget minus the
/// command byte, rounded to keep initiate frames transportable.
pub const K_MAX_SEG_DATA: usize = EPLS_CFG_MAX_PYLD_LEN - 9;

/// Data size up to which an upload is answered expedited.
pub const K_MAX_EXP_DATA: usize = EPLS_CFG_MAX_PYLD_LEN - 4;

#[derive(Debug)]
enum TransferState {
    Idle,
    SegDownload {
        index: u16,
        sub: u8,
        toggle: bool,
        received: usize,
        total: usize,
    },
    SegUpload {
        index: u16,
        sub: u8,
        toggle: bool,
        offset: usize,
        data: Vec<u8>,
    },
}

/// Per-instance SSDO server; one transfer is in flight at a time.
#[derive(Debug)]
pub struct Ssdos {
    instance: u8,
    state: TransferState,
}

impl Ssdos {
    pub fn new(instance: u8) -> Self {
        Self {
            instance,
            state: TransferState::Idle,
        }
    }

    /// Resets any transfer in progress (stack init).
    pub fn init(&mut self) {
        self.state = TransferState::Idle;
    }

    /// Processes one SSDO service request and produces the response (a
    /// data response or an abort frame).
    pub fn process_request(
        &mut self,
        sod: &mut Sod,
        serr: &mut Serr,
        app: &mut dyn SnApplication,
        hdr: &crate::frame::FrameHeader,
        payload: &[u8],
    ) -> Option<FrameData> {
        let own_sdn = sod.read_u16(IDX_COMMON_COM_PARAM, SUBIDX_SDN).unwrap_or(0);
        if hdr.sdn != own_sdn {
            serr.set_error(self.instance, app, SSDOS_K_ERR_SDN_INV, hdr.sdn as u32);
            return None;
        }
        if payload.is_empty() {
            serr.set_error(self.instance, app, SSDOS_K_ERR_PYLD_LEN, 0);
            return None;
        }
        let slim = hdr.frame_type.is_slim();
        let cmd = payload[0];
        match sacmd_kind(cmd) {
            K_DWNLD_INIT_EXP => self.download_expedited(sod, hdr, payload, slim),
            K_DWNLD_INIT_SEG => self.download_init_segmented(sod, hdr, payload, slim),
            K_DWNLD_SEG_MID | K_DWNLD_SEG_END => {
                self.download_segment(sod, serr, app, hdr, payload, cmd, slim)
            }
            K_UPLD_INIT_EXP => self.upload_initiate(sod, hdr, payload, slim),
            K_UPLD_SEG_MID => self.upload_segment(serr, app, hdr, cmd, slim),
            SACMD_ABORT => {
                if payload.len() >= 8 {
                    let (index, sub) = parse_idx_sub(payload);
                    let code = u32::from_le_bytes([
                        payload[4], payload[5], payload[6], payload[7],
                    ]);
                    my_warn!(
                        "[SSDOS] instance {}: client aborted {:#06X}/{:#04X} with {:#010X}",
                        self.instance,
                        index,
                        sub,
                        code
                    );
                }
                self.state = TransferState::Idle;
                None
            }
            other => {
                serr.set_error(self.instance, app, SSDOS_K_ERR_CMD_UNKNOWN, other as u32);
                None
            }
        }
    }

    fn respond(
        &self,
        hdr: &crate::frame::FrameHeader,
        slim: bool,
        payload: Vec<u8>,
    ) -> Option<FrameData> {
        let frame_type = if slim {
            FrameType::SsdoSlimServiceResponse
        } else {
            FrameType::SsdoServiceResponse
        };
        Some(FrameData {
            hdr: FrameHeader::response_to(hdr, frame_type, payload.len() as u8),
            payload,
        })
    }

    fn abort(
        &mut self,
        hdr: &crate::frame::FrameHeader,
        index: u16,
        sub: u8,
        code: SodAbortCode,
    ) -> Option<FrameData> {
        self.state = TransferState::Idle;
        Some(abort_frame(hdr, true, index, sub, code as u32))
    }

    fn download_expedited(
        &mut self,
        sod: &mut Sod,
        hdr: &crate::frame::FrameHeader,
        payload: &[u8],
        slim: bool,
    ) -> Option<FrameData> {
        if payload.len() < K_OFS_EXP_DATA {
            return None;
        }
        let (index, sub) = parse_idx_sub(payload);
        let data = &payload[K_OFS_EXP_DATA..];
        let result = sod
            .attr_get(index, sub)
            .and_then(|acs| sod.write(&acs, data, false, 0));
        match result {
            Ok(()) => {
                let mut resp = Vec::with_capacity(4);
                resp.push(K_DWNLD_INIT_EXP);
                resp.extend_from_slice(&index.to_le_bytes());
                resp.push(sub);
                self.respond(hdr, slim, resp)
            }
            Err(e) => self.abort(hdr, index, sub, e.abort),
        }
    }

    fn download_init_segmented(
        &mut self,
        sod: &mut Sod,
        hdr: &crate::frame::FrameHeader,
        payload: &[u8],
        slim: bool,
    ) -> Option<FrameData> {
        if payload.len() < K_OFS_SEG_DATA {
            return None;
        }
        let (index, sub) = parse_idx_sub(payload);
        let total = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]) as usize;
        let first = &payload[K_OFS_SEG_DATA..];
        let result = sod.attr_get(index, sub).and_then(|acs| {
            sod.actual_len_set(&acs, total)?;
            sod.write(&acs, first, false, 0)
        });
        match result {
            Ok(()) => {
                self.state = TransferState::SegDownload {
                    index,
                    sub,
                    toggle: false,
                    received: first.len(),
                    total,
                };
                my_debug!(
                    "[SSDOS] instance {}: segmented download of {} byte(s) to {:#06X}/{:#04X}",
                    self.instance,
                    total,
                    index,
                    sub
                );
                let mut resp = Vec::with_capacity(4);
                resp.push(K_DWNLD_INIT_SEG);
                resp.extend_from_slice(&index.to_le_bytes());
                resp.push(sub);
                self.respond(hdr, slim, resp)
            }
            Err(e) => self.abort(hdr, index, sub, e.abort),
        }
    }

    fn download_segment(
        &mut self,
        sod: &mut Sod,
        serr: &mut Serr,
        app: &mut dyn SnApplication,
        hdr: &crate::frame::FrameHeader,
        payload: &[u8],
        cmd: u8,
        slim: bool,
    ) -> Option<FrameData> {
        let (index, sub, toggle, received, total) = match self.state {
            TransferState::SegDownload {
                index,
                sub,
                toggle,
                received,
                total,
            } => (index, sub, toggle, received, total),
            _ => {
                serr.set_error(self.instance, app, SSDOS_K_ERR_NO_TRANSFER, cmd as u32);
                return None;
            }
        };
        let expected_toggle = !toggle;
        if (cmd & SACMD_TOGGLE != 0) != expected_toggle {
            serr.set_error(self.instance, app, SSDOS_K_ERR_TOGGLE, cmd as u32);
            return self.abort(hdr, index, sub, SodAbortCode::ToggleBitNotAlternated);
        }
        let data = &payload[1..];
        let is_end = sacmd_kind(cmd) == K_DWNLD_SEG_END;
        let result = sod
            .attr_get(index, sub)
            .and_then(|acs| sod.write(&acs, data, false, received));
        match result {
            Ok(()) => {
                let received = received + data.len();
                if is_end {
                    if received != total {
                        return self.abort(hdr, index, sub, SodAbortCode::LengthDoesNotMatch);
                    }
                    self.state = TransferState::Idle;
                } else {
                    self.state = TransferState::SegDownload {
                        index,
                        sub,
                        toggle: expected_toggle,
                        received,
                        total,
                    };
                }
                self.respond(hdr, slim, Vec::from([cmd]))
            }
            Err(e) => self.abort(hdr, index, sub, e.abort),
        }
    }

    fn upload_initiate(
        &mut self,
        sod: &mut Sod,
        hdr: &crate::frame::FrameHeader,
        payload: &[u8],
        slim: bool,
    ) -> Option<FrameData> {
        if payload.len() < K_OFS_EXP_DATA {
            return None;
        }
        let (index, sub) = parse_idx_sub(payload);
        let result = sod
            .attr_get(index, sub)
            .and_then(|acs| sod.read(&acs, 0, 0));
        let data = match result {
            Ok(data) => data,
            Err(e) => return self.abort(hdr, index, sub, e.abort),
        };
        if data.len() <= K_MAX_EXP_DATA {
            let mut resp = Vec::with_capacity(4 + data.len());
            resp.push(K_UPLD_INIT_EXP);
            resp.extend_from_slice(&index.to_le_bytes());
            resp.push(sub);
            resp.extend_from_slice(&data);
            self.respond(hdr, slim, resp)
        } else {
            let mut resp = Vec::with_capacity(8 + K_MAX_SEG_DATA);
            resp.push(K_UPLD_INIT_SEG);
            resp.extend_from_slice(&index.to_le_bytes());
            resp.push(sub);
            resp.extend_from_slice(&(data.len() as u32).to_le_bytes());
            resp.extend_from_slice(&data[..K_MAX_SEG_DATA]);
            self.state = TransferState::SegUpload {
                index,
                sub,
                toggle: false,
                offset: K_MAX_SEG_DATA,
                data,
            };
            self.respond(hdr, slim, resp)
        }
    }

    fn upload_segment(
        &mut self,
        serr: &mut Serr,
        app: &mut dyn SnApplication,
        hdr: &crate::frame::FrameHeader,
        cmd: u8,
        slim: bool,
    ) -> Option<FrameData> {
        let state = core::mem::replace(&mut self.state, TransferState::Idle);
        let TransferState::SegUpload {
            index,
            sub,
            toggle,
            offset,
            data,
        } = state
        else {
            serr.set_error(self.instance, app, SSDOS_K_ERR_NO_TRANSFER, cmd as u32);
            return None;
        };
        let expected_toggle = !toggle;
        if (cmd & SACMD_TOGGLE != 0) != expected_toggle {
            serr.set_error(self.instance, app, SSDOS_K_ERR_TOGGLE, cmd as u32);
            return self.abort(hdr, index, sub, SodAbortCode::ToggleBitNotAlternated);
        }
        let remaining = data.len() - offset;
        let chunk_len = remaining.min(K_MAX_SEG_DATA);
        let last = offset + chunk_len >= data.len();
        let toggle_bit = if expected_toggle { SACMD_TOGGLE } else { 0 };
        let resp_cmd = if last {
            K_UPLD_SEG_END | toggle_bit
        } else {
            K_UPLD_SEG_MID | toggle_bit
        };
        let mut resp = Vec::with_capacity(1 + chunk_len);
        resp.push(resp_cmd);
        resp.extend_from_slice(&data[offset..offset + chunk_len]);
        if !last {
            self.state = TransferState::SegUpload {
                index,
                sub,
                toggle: expected_toggle,
                offset: offset + chunk_len,
                data,
            };
        }
        self.respond(hdr, slim, resp)
    }
}
