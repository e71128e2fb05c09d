// crates/opensafety-rs/src/snmts/state_machine.rs
//! The internal lifecycle FSM of the SNMT slave.
//!
//! Several request handlers are split into two steps: the first reception
//! only advances the state and reports "busy" so the dispatcher can spread
//! the work over two invocations; the continuation call then produces the
//! response. Any event a state does not handle is answered uniformly with
//! SN FAIL (stack group, unexpected FSM event) and a rewind to the wait
//! state for SADR assignment.

use super::response;
use super::{Snmts, SnmtsOutcome, SNMTS_K_ERR_PARAM_TIMESTAMP};
use crate::frame::FrameHeader;
use crate::log::{my_debug, my_info};
use crate::sapl::SnApplication;
use crate::serr::{Serr, SERR_K_NO_ADD_INFO};
use crate::snmt::{self, ExtServResp};
use crate::sod::constants::{
    IDX_ADD_SADR_BASE, IDX_COMMON_COM_PARAM, IDX_DEVICE_VEN_ID, IDX_TX_SPDO_COM_BASE,
    SUBIDX_PARAM_TIMESTAMP, SUBIDX_TX_SADR, SUBIDX_UDID_SCM,
};
use crate::sod::{Sod, SodValue};
use crate::spdo::Spdo;
use crate::types::{EPLS_K_MAX_SADR, EPLS_K_MIN_SADR, SPDO_CFG_MAX_NO_TX_SPDO};

/// Internal FSM states of the SNMT slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    Initialization,
    /// Wait for SADR assignment, step 1.
    WfSadrAssStep1,
    /// Wait for SADR assignment, step 2 (response construction).
    WfSadrAssStep2,
    /// Wait for the UDID of the SCM.
    WfUdidScmAss,
    /// Wait for the first "SN set to OP", step 1.
    WfSetToOp1Step1,
    /// Wait for the first "SN set to OP", step 2 (mapping activation).
    WfSetToOp1Step2,
    /// Wait for the parameter checksum from the application.
    WfApiChksum,
    /// Wait for the second "SN set to OP" (checksum comparison).
    WfSetToOp2,
    /// Wait for the application confirmation to switch to OP.
    WfApiConf,
    /// Wait for the third "SN set to OP".
    WfSetToOp3,
    /// OPERATIONAL, ready for guarding.
    OperationalStep1,
    /// OPERATIONAL, continuation of a repeated "SN set to OP".
    OperationalStep2,
}

/// Events driving the SN FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnEvent {
    /// SNMT Service Request "SADR assignment" received.
    RxSadr,
    /// SNMT Service Request "Additional SADR assignment" received.
    RxSadrAdd,
    /// SNMT Service Request "SN set to OP" received.
    RxSetToOp,
    /// Parameter checksum validity provided by the application.
    ChksumAvail,
    /// Enter-OP confirmation provided by the application.
    ConfAvail,
    /// SNMT Service Request "SN set to PREOP" received.
    RxSetToPreop,
    /// The application forces the transition into PRE-OPERATIONAL.
    ApiSetToPreop,
    /// SNMT Service Request "node guarding" received.
    RxGuarding,
    /// SNMT Service Request "UDID of SCM assignment" received.
    RxUdidScm,
    /// SNMT Service Request "initialize extended CT" received.
    #[cfg(feature = "extended-ct")]
    RxInitCt,
}

impl Snmts {
    /// Processes one FSM event. `hdr`/`payload` reference the received
    /// frame for frame-borne events.
    pub(super) fn fsm_process(
        &mut self,
        sod: &mut Sod,
        spdo: &mut Spdo,
        serr: &mut Serr,
        app: &mut dyn SnApplication,
        ct: u32,
        event: SnEvent,
        hdr: &FrameHeader,
        payload: &[u8],
    ) -> SnmtsOutcome {
        match (self.fsm_state, event) {
            // --- SADR assignment, two-step ---
            (FsmState::WfSadrAssStep1, SnEvent::RxSadr)
            | (FsmState::WfUdidScmAss, SnEvent::RxSadr) => {
                // The assigned address travels in the frame address field.
                if !(EPLS_K_MIN_SADR..=EPLS_K_MAX_SADR).contains(&hdr.adr)
                    || sod
                        .write_internal(
                            IDX_TX_SPDO_COM_BASE,
                            SUBIDX_TX_SADR,
                            SodValue::U16(hdr.adr),
                        )
                        .is_err()
                {
                    return self.unexpected(sod, spdo, serr, app, ct, hdr);
                }
                my_info!(
                    "[SNMTS] instance {}: main SADR {} assigned",
                    self.instance,
                    hdr.adr
                );
                self.fsm_state = FsmState::WfSadrAssStep2;
                SnmtsOutcome::Busy
            }
            (FsmState::WfSadrAssStep2, SnEvent::RxSadr) => {
                self.fsm_state = FsmState::WfUdidScmAss;
                SnmtsOutcome::Response(response::sadr_assigned(hdr, payload))
            }

            // --- UDID of SCM assignment ---
            (FsmState::WfUdidScmAss, SnEvent::RxUdidScm)
            | (FsmState::WfSetToOp1Step1, SnEvent::RxUdidScm) => {
                let udid = &payload[1..7];
                if sod
                    .write_internal(
                        IDX_COMMON_COM_PARAM,
                        SUBIDX_UDID_SCM,
                        SodValue::OctetString(udid.to_vec()),
                    )
                    .is_err()
                {
                    return self.unexpected(sod, spdo, serr, app, ct, hdr);
                }
                self.fsm_state = FsmState::WfSetToOp1Step1;
                SnmtsOutcome::Response(response::ext_response(
                    hdr,
                    ExtServResp::UdidScmAssigned,
                    udid,
                ))
            }

            // --- First "SN set to OP", two-step ---
            (FsmState::WfSetToOp1Step1, SnEvent::RxSetToOp) => {
                self.fsm_state = FsmState::WfSetToOp1Step2;
                SnmtsOutcome::Busy
            }
            (FsmState::WfSetToOp1Step2, SnEvent::RxSetToOp) => {
                if !app.parameter_set_processed(self.instance) {
                    // The parameter set is still being written; the SCM
                    // retries with the next "SN set to OP".
                    self.fsm_state = FsmState::WfSetToOp1Step1;
                    return SnmtsOutcome::Response(response::ext_response(
                        hdr,
                        ExtServResp::SnStsBusy,
                        &[],
                    ));
                }
                if let Err((group, code)) = spdo.activate(sod) {
                    return self.fail(hdr, group, code, FsmState::WfSetToOp1Step1);
                }
                self.chksum_requested = true;
                app.calc_param_chksum(self.instance);
                self.fsm_state = FsmState::WfApiChksum;
                SnmtsOutcome::Response(response::ext_response(hdr, ExtServResp::SnStsBusy, &[]))
            }

            // --- Checksum interlock ---
            (FsmState::WfApiChksum, SnEvent::ChksumAvail) => {
                self.fsm_state = FsmState::WfSetToOp2;
                SnmtsOutcome::None
            }
            (FsmState::WfApiChksum, SnEvent::RxSetToOp) => {
                SnmtsOutcome::Response(response::ext_response(hdr, ExtServResp::SnStsBusy, &[]))
            }

            // --- Second "SN set to OP": checksum and timestamp compare ---
            (FsmState::WfSetToOp2, SnEvent::RxSetToOp) => {
                let received_ts = u32::from_le_bytes([
                    payload[1], payload[2], payload[3], payload[4],
                ]);
                let stored_ts = sod.read_u32(IDX_DEVICE_VEN_ID, SUBIDX_PARAM_TIMESTAMP);
                if self.chksum_valid && stored_ts == Some(received_ts) {
                    self.conf_requested = true;
                    app.switch_to_op_req(self.instance);
                    self.fsm_state = FsmState::WfApiConf;
                    SnmtsOutcome::Response(response::ext_response(
                        hdr,
                        ExtServResp::SnStsBusy,
                        &[],
                    ))
                } else {
                    if stored_ts != Some(received_ts) {
                        serr.set_error(
                            self.instance,
                            app,
                            SNMTS_K_ERR_PARAM_TIMESTAMP,
                            received_ts,
                        );
                    }
                    spdo.deactivate();
                    self.fail(
                        hdr,
                        snmt::K_FAIL_GRP_STK,
                        snmt::K_FAIL_ERR_CRC_CHKSUM,
                        FsmState::WfSetToOp1Step1,
                    )
                }
            }

            // --- Confirmation interlock ---
            (FsmState::WfApiConf, SnEvent::ConfAvail) => {
                self.fsm_state = FsmState::WfSetToOp3;
                SnmtsOutcome::None
            }
            (FsmState::WfApiConf, SnEvent::RxSetToOp) => {
                SnmtsOutcome::Response(response::ext_response(hdr, ExtServResp::SnStsBusy, &[]))
            }

            // --- Third "SN set to OP": enter OPERATIONAL ---
            (FsmState::WfSetToOp3, SnEvent::RxSetToOp) => match self.conf.take() {
                Some((true, _, _)) => {
                    if self.life.start(sod, ct).is_err() {
                        spdo.deactivate();
                        return self.fail(
                            hdr,
                            snmt::K_FAIL_GRP_STK,
                            snmt::K_FAIL_ERR_DEFAULT,
                            FsmState::WfSetToOp1Step1,
                        );
                    }
                    self.refresh.stop();
                    self.fsm_state = FsmState::OperationalStep1;
                    my_info!("[SNMTS] instance {}: entering OPERATIONAL", self.instance);
                    SnmtsOutcome::Response(response::ext_response(
                        hdr,
                        ExtServResp::SnStsOp,
                        &[],
                    ))
                }
                Some((false, group, code)) => {
                    spdo.deactivate();
                    self.fail(hdr, group, code, FsmState::WfSetToOp1Step1)
                }
                None => self.unexpected(sod, spdo, serr, app, ct, hdr),
            },

            // --- OPERATIONAL ---
            (FsmState::OperationalStep1, SnEvent::RxGuarding) => {
                let _ = self.life.start(sod, ct);
                SnmtsOutcome::Response(response::ext_response(hdr, ExtServResp::SnStsOp, &[]))
            }
            (FsmState::OperationalStep1, SnEvent::RxSetToOp) => {
                self.fsm_state = FsmState::OperationalStep2;
                SnmtsOutcome::Busy
            }
            (FsmState::OperationalStep2, SnEvent::RxSetToOp) => {
                let _ = self.life.start(sod, ct);
                self.fsm_state = FsmState::OperationalStep1;
                SnmtsOutcome::Response(response::ext_response(hdr, ExtServResp::SnStsOp, &[]))
            }
            (FsmState::OperationalStep1, SnEvent::RxSetToPreop)
            | (FsmState::OperationalStep1, SnEvent::ApiSetToPreop) => {
                self.enter_pre_operational(sod, spdo, ct);
                if event == SnEvent::ApiSetToPreop {
                    SnmtsOutcome::None
                } else {
                    SnmtsOutcome::Response(response::ext_response(
                        hdr,
                        ExtServResp::SnStsPreop,
                        &[],
                    ))
                }
            }

            // --- Requests legal in any pre-operational wait state ---
            (
                FsmState::WfSadrAssStep1
                | FsmState::WfUdidScmAss
                | FsmState::WfSetToOp1Step1
                | FsmState::WfApiChksum
                | FsmState::WfSetToOp2
                | FsmState::WfApiConf
                | FsmState::WfSetToOp3,
                SnEvent::RxGuarding,
            ) => SnmtsOutcome::Response(response::ext_response(
                hdr,
                ExtServResp::SnStsPreop,
                &[],
            )),
            (
                FsmState::WfSetToOp1Step1
                | FsmState::WfApiChksum
                | FsmState::WfSetToOp2
                | FsmState::WfApiConf
                | FsmState::WfSetToOp3,
                SnEvent::RxSetToPreop,
            ) => {
                self.enter_pre_operational(sod, spdo, ct);
                SnmtsOutcome::Response(response::ext_response(
                    hdr,
                    ExtServResp::SnStsPreop,
                    &[],
                ))
            }

            // --- Additional SADR assignment ---
            (FsmState::WfSetToOp1Step1, SnEvent::RxSadrAdd) => {
                let sadr = u16::from_le_bytes([payload[1], payload[2]]);
                let spdo_num = u16::from_le_bytes([payload[3], payload[4]]);
                if !(EPLS_K_MIN_SADR..=EPLS_K_MAX_SADR).contains(&sadr)
                    || !(2..=SPDO_CFG_MAX_NO_TX_SPDO as u16).contains(&spdo_num)
                    || sod
                        .write_internal(IDX_ADD_SADR_BASE, spdo_num as u8, SodValue::U16(sadr))
                        .is_err()
                {
                    return self.unexpected(sod, spdo, serr, app, ct, hdr);
                }
                my_debug!(
                    "[SNMTS] instance {}: additional SADR {} for TxSPDO {}",
                    self.instance,
                    sadr,
                    spdo_num
                );
                SnmtsOutcome::Response(response::ext_response(
                    hdr,
                    ExtServResp::AddSadrAssigned,
                    &payload[1..5],
                ))
            }

            // --- Extended CT initialization ---
            #[cfg(feature = "extended-ct")]
            (
                FsmState::WfSetToOp1Step1 | FsmState::WfUdidScmAss,
                SnEvent::RxInitCt,
            ) => {
                let mut init = [0u8; 8];
                init[..5].copy_from_slice(&payload[1..6]);
                spdo.init_ext_ct(u64::from_le_bytes(init));
                SnmtsOutcome::Response(response::ext_response(
                    hdr,
                    ExtServResp::ExtCtInitialized,
                    &payload[1..6],
                ))
            }

            // --- Everything else is a protocol violation ---
            (_, _) => self.unexpected(sod, spdo, serr, app, ct, hdr),
        }
    }

    /// Common transition back into the pre-operational wait state.
    fn enter_pre_operational(&mut self, sod: &Sod, spdo: &mut Spdo, ct: u32) {
        spdo.deactivate();
        self.life.stop();
        let _ = self.refresh.start(sod, ct);
        self.chksum_requested = false;
        self.chksum_valid = false;
        self.conf_requested = false;
        self.conf = None;
        self.fsm_state = FsmState::WfSetToOp1Step1;
    }

    /// Responds SN FAIL with `(group, code)` and rewinds to `next`.
    fn fail(&mut self, hdr: &FrameHeader, group: u8, code: u8, next: FsmState) -> SnmtsOutcome {
        self.last_fail = Some((group, code));
        self.fsm_state = next;
        SnmtsOutcome::Response(response::sn_fail(hdr, group, code))
    }

    /// Uniform handling of events a state does not expect. Any running
    /// SPDO exchange is torn down along the rewind.
    fn unexpected(
        &mut self,
        sod: &Sod,
        spdo: &mut Spdo,
        serr: &mut Serr,
        app: &mut dyn SnApplication,
        ct: u32,
        hdr: &FrameHeader,
    ) -> SnmtsOutcome {
        serr.set_error(
            self.instance,
            app,
            super::SNMTS_K_ERR_EVENT_UNEXPECTED,
            SERR_K_NO_ADD_INFO,
        );
        spdo.deactivate();
        self.life.stop();
        let _ = self.refresh.start(sod, ct);
        self.chksum_requested = false;
        self.chksum_valid = false;
        self.conf_requested = false;
        self.conf = None;
        self.fail(
            hdr,
            snmt::K_FAIL_GRP_STK,
            snmt::K_FAIL_ERR_UNEXPECTED_FSM_EVENT,
            FsmState::WfSadrAssStep1,
        )
    }
}
