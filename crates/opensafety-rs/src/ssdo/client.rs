// crates/opensafety-rs/src/ssdo/client.rs
//! SSDOC, the SSDO client of the configuration manager.
//!
//! Holds a pool of outstanding transfers, one per node being configured.
//! Requests are retried on timeout with the budget from the SSDO
//! communication parameters; a finished transfer parks its result until
//! the SCM collects it by registration number.

use super::*;
use crate::frame::{FrameData, FrameHeader, FrameType};
use crate::log::{my_debug, my_warn};
use crate::sapl::SnApplication;
use crate::serr::{self, ErrorClass, ErrorType, Serr, UnitId};
use crate::shnf::{self, SafetyError, Shnf};
use crate::sod::constants::{
    IDX_COMMON_COM_PARAM, IDX_SSDO_COM_PARAM, SUBIDX_SDN, SUBIDX_SSDO_RETRIES,
    SUBIDX_SSDO_TIMEOUT,
};
use crate::sod::Sod;
use crate::types::{ct_elapsed, EPLS_CFG_MAX_PYLD_LEN, SCM_CFG_MAX_NUM_OF_NODES};
use alloc::vec::Vec;

const fn err_minor(local: u8) -> u16 {
    serr::build_error(
        ErrorType::NotFailSafe,
        ErrorClass::Minor,
        UnitId::SsdoClient,
        local,
    )
}

pub const SSDOC_K_ERR_SDN_INV: u16 = err_minor(0x01);

/// Abort code of an expired transfer (protocol timed out).
pub const K_ABORT_TIMEOUT: u32 = 0x0504_0000;

/// Fallback request timeout in CT ticks when the SOD carries none.
const K_DEFAULT_TIMEOUT: u32 = 1_000;
const K_DEFAULT_RETRIES: u8 = 2;

#[derive(Debug)]
enum Kind {
    DownloadExpedited,
    DownloadSegmented {
        data: Vec<u8>,
        offset: usize,
        toggle: bool,
        max_seg: usize,
    },
    Upload {
        collected: Vec<u8>,
        toggle: bool,
    },
}

#[derive(Debug)]
struct Transfer {
    reg_num: u16,
    sadr: u16,
    index: u16,
    sub: u8,
    kind: Kind,
    deadline: u32,
    retries_left: u8,
    last_request: FrameData,
    result: Option<Result<Vec<u8>, u32>>,
}

/// Per-instance SSDO client pool.
#[derive(Debug)]
pub struct Ssdoc {
    instance: u8,
    transfers: Vec<Transfer>,
}

impl Ssdoc {
    pub fn new(instance: u8) -> Self {
        Self {
            instance,
            transfers: Vec::new(),
        }
    }

    /// Drops every outstanding transfer (stack init).
    pub fn init(&mut self) {
        self.transfers.clear();
    }

    /// Whether another transfer can be started.
    pub fn has_free_slot(&self) -> bool {
        self.transfers.len() < SCM_CFG_MAX_NUM_OF_NODES
    }

    fn com_params(sod: &Sod) -> (u32, u8) {
        (
            sod.read_u32(IDX_SSDO_COM_PARAM, SUBIDX_SSDO_TIMEOUT)
                .unwrap_or(K_DEFAULT_TIMEOUT),
            sod.read_u8(IDX_SSDO_COM_PARAM, SUBIDX_SSDO_RETRIES)
                .unwrap_or(K_DEFAULT_RETRIES),
        )
    }

    fn request_header(own_sadr: u16, sadr: u16, sdn: u16, ct: u32, le: u8) -> FrameHeader {
        FrameHeader {
            frame_type: FrameType::SsdoServiceRequest,
            adr: sadr,
            sdn,
            le,
            ct: ct as u16,
            tadr: own_sadr,
            tr: 0,
        }
    }

    /// Starts a write of `data` to `(index, sub)` on the node at `sadr`.
    /// `max_seg` is the SSDO payload capacity of the server.
    #[allow(clippy::too_many_arguments)]
    pub fn write_object(
        &mut self,
        sod: &Sod,
        shnf: &mut dyn Shnf,
        ct: u32,
        reg_num: u16,
        own_sadr: u16,
        sdn: u16,
        sadr: u16,
        index: u16,
        sub: u8,
        data: &[u8],
        max_seg: usize,
    ) -> Result<(), SafetyError> {
        if !self.has_free_slot() {
            return Err(SafetyError::NoFsmAvailable);
        }
        let max_seg = max_seg.clamp(1, EPLS_CFG_MAX_PYLD_LEN - K_OFS_SEG_DATA);
        let expedited =
            data.len() <= max_seg && data.len() + K_OFS_EXP_DATA <= EPLS_CFG_MAX_PYLD_LEN;

        let (payload, kind) = if expedited {
            let mut payload = Vec::with_capacity(K_OFS_EXP_DATA + data.len());
            payload.push(K_DWNLD_INIT_EXP);
            payload.extend_from_slice(&index.to_le_bytes());
            payload.push(sub);
            payload.extend_from_slice(data);
            (payload, Kind::DownloadExpedited)
        } else {
            let first = max_seg.min(data.len());
            let mut payload = Vec::with_capacity(K_OFS_SEG_DATA + first);
            payload.push(K_DWNLD_INIT_SEG);
            payload.extend_from_slice(&index.to_le_bytes());
            payload.push(sub);
            payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
            payload.extend_from_slice(&data[..first]);
            (
                payload,
                Kind::DownloadSegmented {
                    data: data.to_vec(),
                    offset: first,
                    toggle: false,
                    max_seg,
                },
            )
        };

        let request = FrameData {
            hdr: Self::request_header(own_sadr, sadr, sdn, ct, payload.len() as u8),
            payload,
        };
        self.start_transfer(sod, shnf, ct, reg_num, sadr, index, sub, kind, request)
    }

    /// Starts a read of `(index, sub)` from the node at `sadr`.
    #[allow(clippy::too_many_arguments)]
    pub fn read_object(
        &mut self,
        sod: &Sod,
        shnf: &mut dyn Shnf,
        ct: u32,
        reg_num: u16,
        own_sadr: u16,
        sdn: u16,
        sadr: u16,
        index: u16,
        sub: u8,
    ) -> Result<(), SafetyError> {
        if !self.has_free_slot() {
            return Err(SafetyError::NoFsmAvailable);
        }
        let mut payload = Vec::with_capacity(K_OFS_EXP_DATA);
        payload.push(K_UPLD_INIT_EXP);
        payload.extend_from_slice(&index.to_le_bytes());
        payload.push(sub);
        let request = FrameData {
            hdr: Self::request_header(own_sadr, sadr, sdn, ct, payload.len() as u8),
            payload,
        };
        self.start_transfer(
            sod,
            shnf,
            ct,
            reg_num,
            sadr,
            index,
            sub,
            Kind::Upload {
                collected: Vec::new(),
                toggle: false,
            },
            request,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn start_transfer(
        &mut self,
        sod: &Sod,
        shnf: &mut dyn Shnf,
        ct: u32,
        reg_num: u16,
        sadr: u16,
        index: u16,
        sub: u8,
        kind: Kind,
        request: FrameData,
    ) -> Result<(), SafetyError> {
        let (timeout, retries) = Self::com_params(sod);
        shnf::send_frame(shnf, self.instance, &request.hdr, &request.payload, 0)?;
        self.transfers.push(Transfer {
            reg_num,
            sadr,
            index,
            sub,
            kind,
            deadline: ct.wrapping_add(timeout),
            retries_left: retries,
            last_request: request,
            result: None,
        });
        Ok(())
    }

    /// Collects the result of a finished transfer: the uploaded bytes
    /// (empty for downloads) or the abort code.
    pub fn take_result(&mut self, reg_num: u16) -> Option<Result<Vec<u8>, u32>> {
        let position = self
            .transfers
            .iter()
            .position(|t| t.reg_num == reg_num && t.result.is_some())?;
        self.transfers.remove(position).result
    }

    /// Whether a transfer for `reg_num` is still pending.
    pub fn is_pending(&self, reg_num: u16) -> bool {
        self.transfers
            .iter()
            .any(|t| t.reg_num == reg_num && t.result.is_none())
    }

    /// Resends expired requests; an exhausted retry budget finishes the
    /// transfer with the timeout abort code.
    pub fn check_timeouts(&mut self, sod: &Sod, shnf: &mut dyn Shnf, ct: u32) {
        let (timeout, _) = Self::com_params(sod);
        let instance = self.instance;
        for transfer in &mut self.transfers {
            if transfer.result.is_some() || !ct_elapsed(ct, transfer.deadline) {
                continue;
            }
            if transfer.retries_left == 0 {
                my_warn!(
                    "[SSDOC] instance {}: transfer {} ({:#06X}/{:#04X}) to SADR {} timed out",
                    instance,
                    transfer.reg_num,
                    transfer.index,
                    transfer.sub,
                    transfer.sadr
                );
                transfer.result = Some(Err(K_ABORT_TIMEOUT));
                continue;
            }
            transfer.retries_left -= 1;
            transfer.deadline = ct.wrapping_add(timeout);
            let _ = shnf::send_frame(
                shnf,
                instance,
                &transfer.last_request.hdr,
                &transfer.last_request.payload,
                0,
            );
        }
    }

    /// Processes one SSDO service response routed here by the dispatcher.
    #[allow(clippy::too_many_arguments)]
    pub fn process_response(
        &mut self,
        sod: &Sod,
        serr: &mut Serr,
        app: &mut dyn SnApplication,
        shnf: &mut dyn Shnf,
        ct: u32,
        hdr: &FrameHeader,
        payload: &[u8],
    ) {
        let instance = self.instance;
        let own_sdn = sod.read_u16(IDX_COMMON_COM_PARAM, SUBIDX_SDN).unwrap_or(0);
        if hdr.sdn != own_sdn {
            serr.set_error(instance, app, SSDOC_K_ERR_SDN_INV, hdr.sdn as u32);
            return;
        }
        let (timeout, _) = Self::com_params(sod);
        let Some(transfer) = self
            .transfers
            .iter_mut()
            .find(|t| t.sadr == hdr.adr && t.result.is_none())
        else {
            my_debug!(
                "[SSDOC] instance {}: unmatched SSDO response from SADR {}",
                instance,
                hdr.adr
            );
            return;
        };
        if payload.is_empty() {
            return;
        }
        let cmd = payload[0];

        if sacmd_kind(cmd) == SACMD_ABORT {
            let code = if payload.len() >= 8 {
                u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]])
            } else {
                SACMD_ABORT as u32
            };
            my_warn!(
                "[SSDOC] instance {}: transfer {} aborted by server: {:#010X}",
                instance,
                transfer.reg_num,
                code
            );
            transfer.result = Some(Err(code));
            return;
        }

        // Next request of a continuing transfer, if any.
        let mut next: Option<Vec<u8>> = None;
        match &mut transfer.kind {
            Kind::DownloadExpedited => {
                if sacmd_kind(cmd) == K_DWNLD_INIT_EXP {
                    transfer.result = Some(Ok(Vec::new()));
                }
            }
            Kind::DownloadSegmented {
                data,
                offset,
                toggle,
                max_seg,
            } => match sacmd_kind(cmd) {
                K_DWNLD_INIT_SEG | K_DWNLD_SEG_MID => {
                    if sacmd_kind(cmd) == K_DWNLD_SEG_MID {
                        *toggle = !*toggle;
                    }
                    let remaining = data.len() - *offset;
                    let chunk_len = remaining.min(*max_seg);
                    let last = *offset + chunk_len >= data.len();
                    let toggle_bit = if !*toggle { SACMD_TOGGLE } else { 0 };
                    let next_cmd = if last {
                        K_DWNLD_SEG_END | toggle_bit
                    } else {
                        K_DWNLD_SEG_MID | toggle_bit
                    };
                    let mut request = Vec::with_capacity(1 + chunk_len);
                    request.push(next_cmd);
                    request.extend_from_slice(&data[*offset..*offset + chunk_len]);
                    *offset += chunk_len;
                    next = Some(request);
                }
                K_DWNLD_SEG_END => {
                    transfer.result = Some(Ok(Vec::new()));
                }
                _ => {}
            },
            Kind::Upload { collected, toggle } => match sacmd_kind(cmd) {
                K_UPLD_INIT_EXP => {
                    if payload.len() >= K_OFS_EXP_DATA {
                        transfer.result =
                            Some(Ok(payload[K_OFS_EXP_DATA..].to_vec()));
                    }
                }
                K_UPLD_INIT_SEG => {
                    if payload.len() >= K_OFS_SEG_DATA {
                        collected.extend_from_slice(&payload[K_OFS_SEG_DATA..]);
                        next = Some(Vec::from([K_UPLD_SEG_MID | SACMD_TOGGLE]));
                        *toggle = false;
                    }
                }
                K_UPLD_SEG_MID => {
                    collected.extend_from_slice(&payload[1..]);
                    *toggle = !*toggle;
                    let toggle_bit = if !*toggle { SACMD_TOGGLE } else { 0 };
                    next = Some(Vec::from([K_UPLD_SEG_MID | toggle_bit]));
                }
                K_UPLD_SEG_END => {
                    collected.extend_from_slice(&payload[1..]);
                    let collected = core::mem::take(collected);
                    transfer.result = Some(Ok(collected));
                }
                _ => {}
            },
        }

        if let Some(request_payload) = next {
            let request = FrameData {
                hdr: Self::request_header(
                    hdr.tadr,
                    transfer.sadr,
                    hdr.sdn,
                    ct,
                    request_payload.len() as u8,
                ),
                payload: request_payload,
            };
            if shnf::send_frame(shnf, instance, &request.hdr, &request.payload, 0).is_ok() {
                transfer.deadline = ct.wrapping_add(timeout);
                transfer.last_request = request;
            }
        }
    }
}
