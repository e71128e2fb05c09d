// crates/opensafety-rs/src/snmtm/mod.rs
//! SNMTM, the network management master of the configuration manager.
//!
//! Owns a fixed pool of request FSMs, one outstanding SNMT service
//! request each. Responses are matched back by the addressed SADR and
//! surfaced to the SCM as events carrying the registration number of the
//! original request; an unsolicited "SN status PRE-OPERATIONAL" becomes
//! the reset-guarding event.

use crate::frame::{FrameData, FrameHeader, FrameType};
use crate::log::{my_debug, my_warn};
use crate::sapl::SnApplication;
use crate::serr::{self, ErrorClass, ErrorType, Serr, UnitId};
use crate::shnf::{self, SafetyError, Shnf};
use crate::snmt::{self, ExtServResp};
use crate::sod::constants::{IDX_SSDO_COM_PARAM, SUBIDX_SSDO_RETRIES, SUBIDX_SSDO_TIMEOUT};
use crate::sod::Sod;
use crate::types::{ct_elapsed, Udid, SCM_CFG_MAX_NUM_OF_NODES, UDID_SIZE};
use alloc::vec::Vec;
use core::convert::TryFrom;

const fn err_minor(local: u8) -> u16 {
    serr::build_error(
        ErrorType::NotFailSafe,
        ErrorClass::Minor,
        UnitId::Snmtm,
        local,
    )
}

pub const SNMTM_K_ERR_RESP_UNMATCHED: u16 = err_minor(0x01);
pub const SNMTM_K_ERR_RESP_INV: u16 = err_minor(0x02);

/// Registration number of events that no request initiated.
pub const K_REG_UNSOLICITED: u16 = u16::MAX;

const K_DEFAULT_TIMEOUT: u32 = 1_000;
const K_DEFAULT_RETRIES: u8 = 2;

/// A service request the SCM can initiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmtmRequest {
    /// Request the physical address of the SN at the target SADR.
    Udid,
    /// Assign the target SADR to the device with this UDID.
    AssignSadr(Udid),
    /// Announce the UDID of the SCM.
    AssignUdidScm(Udid),
    /// Initialize the 40 bit extended CT.
    InitExtCt(u64),
    /// Assign an additional SADR to a TxSPDO of the node.
    AssignAddSadr { sadr: u16, tx_spdo: u16 },
    /// Node guarding poll.
    Guard,
    SetToPreop,
    /// Set to OPERATIONAL, carrying the parameter timestamp.
    SetToOp { timestamp: u32 },
    /// Acknowledge a reported SN FAIL. Fire-and-forget, not responded.
    SnAck { err_group: u8, err_code: u8 },
}

/// What a matched (or unsolicited) response reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmtmResponse {
    UdidResponse(Udid),
    SadrAssigned(Udid),
    SnStatusPreop,
    SnStatusOp,
    SnStatusBusy,
    SnFail { err_group: u8, err_code: u8 },
    AddSadrAssigned { sadr: u16, tx_spdo: u16 },
    UdidScmAssigned,
    ExtCtInitialized,
    /// The retry budget of the request expired.
    Timeout,
    /// Unsolicited PRE-OPERATIONAL status: an SN asks for guarding reset.
    ResetGuard,
    /// A UDID or SADR-assignment response from an address no request was
    /// sent to: a live SN answering under the wrong SADR. The SCM matches
    /// the carried UDID against its expectations.
    UnexpectedSource(Udid),
}

/// Event surfaced to the SCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmtmEvent {
    pub reg_num: u16,
    pub sadr: u16,
    pub response: SnmtmResponse,
}

#[derive(Debug)]
struct MasterFsm {
    reg_num: u16,
    sadr: u16,
    request: FrameData,
    deadline: u32,
    retries_left: u8,
}

/// Per-instance SNMT master.
#[derive(Debug)]
pub struct Snmtm {
    instance: u8,
    fsms: Vec<MasterFsm>,
    events: Vec<SnmtmEvent>,
}

impl Snmtm {
    pub fn new(instance: u8) -> Self {
        Self {
            instance,
            fsms: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Resets every request FSM (stack init).
    pub fn init(&mut self) {
        self.fsms.clear();
        self.events.clear();
    }

    /// Whether a request FSM is free. Must be consulted before
    /// initiating a request.
    pub fn check_fsm_available(&self) -> bool {
        self.fsms.len() < SCM_CFG_MAX_NUM_OF_NODES
    }

    fn com_params(sod: &Sod) -> (u32, u8) {
        (
            sod.read_u32(IDX_SSDO_COM_PARAM, SUBIDX_SSDO_TIMEOUT)
                .unwrap_or(K_DEFAULT_TIMEOUT),
            sod.read_u8(IDX_SSDO_COM_PARAM, SUBIDX_SSDO_RETRIES)
                .unwrap_or(K_DEFAULT_RETRIES),
        )
    }

    /// Initiates one SNMT service request towards the SN at `sadr`.
    #[allow(clippy::too_many_arguments)]
    pub fn request(
        &mut self,
        sod: &Sod,
        shnf: &mut dyn Shnf,
        ct: u32,
        reg_num: u16,
        own_sadr: u16,
        sdn: u16,
        sadr: u16,
        request: SnmtmRequest,
    ) -> Result<(), SafetyError> {
        let (frame_type, payload) = build_request(&request);
        let hdr = FrameHeader {
            frame_type,
            adr: sadr,
            sdn,
            le: payload.len() as u8,
            ct: ct as u16,
            tadr: own_sadr,
            tr: 0,
        };
        let unacknowledged = matches!(request, SnmtmRequest::SnAck { .. });
        if !unacknowledged && !self.check_fsm_available() {
            return Err(SafetyError::NoFsmAvailable);
        }
        shnf::send_frame(shnf, self.instance, &hdr, &payload, 0)?;
        if !unacknowledged {
            let (timeout, retries) = Self::com_params(sod);
            self.fsms.push(MasterFsm {
                reg_num,
                sadr,
                request: FrameData { hdr, payload },
                deadline: ct.wrapping_add(timeout),
                retries_left: retries,
            });
        }
        Ok(())
    }

    /// Resends expired requests; exhausted budgets surface a timeout
    /// event and free the FSM.
    pub fn check_timeouts(&mut self, sod: &Sod, shnf: &mut dyn Shnf, ct: u32) {
        let (timeout, _) = Self::com_params(sod);
        let instance = self.instance;
        let events = &mut self.events;
        self.fsms.retain_mut(|fsm| {
            if !ct_elapsed(ct, fsm.deadline) {
                return true;
            }
            if fsm.retries_left == 0 {
                my_warn!(
                    "[SNMTM] instance {}: request {} to SADR {} timed out",
                    instance,
                    fsm.reg_num,
                    fsm.sadr
                );
                events.push(SnmtmEvent {
                    reg_num: fsm.reg_num,
                    sadr: fsm.sadr,
                    response: SnmtmResponse::Timeout,
                });
                return false;
            }
            fsm.retries_left -= 1;
            fsm.deadline = ct.wrapping_add(timeout);
            let _ = shnf::send_frame(shnf, instance, &fsm.request.hdr, &fsm.request.payload, 0);
            true
        });
    }

    /// Processes one SNMT service response routed here by the dispatcher.
    pub fn process_response(
        &mut self,
        serr: &mut Serr,
        app: &mut dyn SnApplication,
        hdr: &FrameHeader,
        payload: &[u8],
    ) {
        let response = match parse_response(hdr, payload) {
            Some(response) => response,
            None => {
                serr.set_error(
                    self.instance,
                    app,
                    SNMTM_K_ERR_RESP_INV,
                    hdr.frame_type.id() as u32,
                );
                return;
            }
        };
        match self.fsms.iter().position(|f| f.sadr == hdr.adr) {
            Some(position) => {
                let fsm = self.fsms.remove(position);
                my_debug!(
                    "[SNMTM] instance {}: request {} answered with {:?}",
                    self.instance,
                    fsm.reg_num,
                    response
                );
                self.events.push(SnmtmEvent {
                    reg_num: fsm.reg_num,
                    sadr: fsm.sadr,
                    response,
                });
            }
            None => match response {
                SnmtmResponse::SnStatusPreop => {
                    // No precedent request: the SN signals its presence
                    // in PRE-OPERATIONAL and asks for a guarding reset.
                    self.events.push(SnmtmEvent {
                        reg_num: K_REG_UNSOLICITED,
                        sadr: hdr.adr,
                        response: SnmtmResponse::ResetGuard,
                    });
                }
                SnmtmResponse::UdidResponse(udid) | SnmtmResponse::SadrAssigned(udid) => {
                    // A live SN answered from an address that carries no
                    // outstanding request. Whether this is a wrong-SADR
                    // condition only the SCM can tell, by the UDID.
                    self.events.push(SnmtmEvent {
                        reg_num: K_REG_UNSOLICITED,
                        sadr: hdr.adr,
                        response: SnmtmResponse::UnexpectedSource(udid),
                    });
                }
                _ => {
                    serr.set_error(
                        self.instance,
                        app,
                        SNMTM_K_ERR_RESP_UNMATCHED,
                        hdr.adr as u32,
                    );
                }
            },
        }
    }

    /// Cancels the outstanding request registered under `reg_num`
    /// without surfacing an event.
    pub fn abort_request(&mut self, reg_num: u16) {
        self.fsms.retain(|f| f.reg_num != reg_num);
    }

    /// Drains the accumulated events for the SCM.
    pub fn take_events(&mut self) -> Vec<SnmtmEvent> {
        core::mem::take(&mut self.events)
    }
}

fn build_request(request: &SnmtmRequest) -> (FrameType, Vec<u8>) {
    match request {
        SnmtmRequest::Udid => (FrameType::SnmtUdidRequest, Vec::new()),
        SnmtmRequest::AssignSadr(udid) => {
            (FrameType::SnmtSadrAssignRequest, udid.0.to_vec())
        }
        SnmtmRequest::AssignUdidScm(udid) => {
            let mut payload = Vec::with_capacity(1 + UDID_SIZE);
            payload.push(snmt::K_ASS_UDID_SCM);
            payload.extend_from_slice(&udid.0);
            (FrameType::SnmtServiceRequest, payload)
        }
        SnmtmRequest::InitExtCt(init) => {
            let mut payload = Vec::with_capacity(6);
            payload.push(snmt::K_INITIALIZE_EXT_CT);
            payload.extend_from_slice(&init.to_le_bytes()[..5]);
            (FrameType::SnmtServiceRequest, payload)
        }
        SnmtmRequest::AssignAddSadr { sadr, tx_spdo } => {
            let mut payload = Vec::with_capacity(5);
            payload.push(snmt::K_ASS_ADD_SADR);
            payload.extend_from_slice(&sadr.to_le_bytes());
            payload.extend_from_slice(&tx_spdo.to_le_bytes());
            (FrameType::SnmtServiceRequest, payload)
        }
        SnmtmRequest::Guard => (
            FrameType::SnmtServiceRequest,
            Vec::from([snmt::K_SCM_GUARD_SN]),
        ),
        SnmtmRequest::SetToPreop => (
            FrameType::SnmtServiceRequest,
            Vec::from([snmt::K_SN_SET_TO_PREOP]),
        ),
        SnmtmRequest::SetToOp { timestamp } => {
            let mut payload = Vec::with_capacity(5);
            payload.push(snmt::K_SN_SET_TO_OP);
            payload.extend_from_slice(&timestamp.to_le_bytes());
            (FrameType::SnmtServiceRequest, payload)
        }
        SnmtmRequest::SnAck {
            err_group,
            err_code,
        } => (
            FrameType::SnmtServiceRequest,
            Vec::from([snmt::K_SN_ACK, *err_group, *err_code]),
        ),
    }
}

fn parse_response(hdr: &FrameHeader, payload: &[u8]) -> Option<SnmtmResponse> {
    match hdr.frame_type {
        FrameType::SnmtUdidResponse => {
            let udid: [u8; UDID_SIZE] = payload.try_into().ok()?;
            Some(SnmtmResponse::UdidResponse(Udid(udid)))
        }
        FrameType::SnmtSadrAssignResponse => {
            let udid: [u8; UDID_SIZE] = payload.try_into().ok()?;
            Some(SnmtmResponse::SadrAssigned(Udid(udid)))
        }
        FrameType::SnmtServiceResponse => match ExtServResp::try_from(*payload.first()?).ok()? {
            ExtServResp::SnStsPreop => Some(SnmtmResponse::SnStatusPreop),
            ExtServResp::SnStsOp => Some(SnmtmResponse::SnStatusOp),
            ExtServResp::SnStsBusy => Some(SnmtmResponse::SnStatusBusy),
            ExtServResp::SnFail => Some(SnmtmResponse::SnFail {
                err_group: *payload.get(1)?,
                err_code: *payload.get(2)?,
            }),
            ExtServResp::AddSadrAssigned => Some(SnmtmResponse::AddSadrAssigned {
                sadr: u16::from_le_bytes([*payload.get(1)?, *payload.get(2)?]),
                tx_spdo: u16::from_le_bytes([*payload.get(3)?, *payload.get(4)?]),
            }),
            ExtServResp::UdidScmAssigned => Some(SnmtmResponse::UdidScmAssigned),
            ExtServResp::ExtCtInitialized => Some(SnmtmResponse::ExtCtInitialized),
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_guard_request() {
        let (frame_type, payload) = build_request(&SnmtmRequest::Guard);
        assert_eq!(frame_type, FrameType::SnmtServiceRequest);
        assert_eq!(payload, [snmt::K_SCM_GUARD_SN]);
    }

    #[test]
    fn test_build_set_to_op_carries_timestamp() {
        let (_, payload) = build_request(&SnmtmRequest::SetToOp {
            timestamp: 0x8899AABB,
        });
        assert_eq!(payload, [snmt::K_SN_SET_TO_OP, 0xBB, 0xAA, 0x99, 0x88]);
    }

    #[test]
    fn test_parse_sn_fail() {
        let hdr = FrameHeader {
            frame_type: FrameType::SnmtServiceResponse,
            adr: 2,
            sdn: 1,
            le: 3,
            ct: 0,
            tadr: 1,
            tr: 0,
        };
        let parsed = parse_response(&hdr, &[ExtServResp::SnFail as u8, 4, 1]).unwrap();
        assert_eq!(
            parsed,
            SnmtmResponse::SnFail {
                err_group: 4,
                err_code: 1
            }
        );
    }
}
