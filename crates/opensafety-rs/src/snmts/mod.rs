// crates/opensafety-rs/src/snmts/mod.rs
//! SNMTS, the network management slave unit.
//!
//! Responds to the SNMT service requests of the master, drives the SN
//! lifecycle FSM and runs the refresh and life-guarding timers. The
//! interlocked application answers (parameter checksum, enter-OP
//! confirmation) arrive through the API calls below, never from inside a
//! callback.

mod response;
mod state_machine;
pub mod timers;

pub use state_machine::{FsmState, SnEvent};

use crate::frame::{FrameData, FrameHeader, FrameType};
use crate::log::{my_debug, my_warn};
use crate::sapl::SnApplication;
use crate::serr::{self, ErrorClass, ErrorType, Serr, UnitId, SERR_K_NO_ADD_INFO};
use crate::shnf::{self, Shnf};
use crate::snmt;
use crate::sod::constants::{IDX_COMMON_COM_PARAM, SUBIDX_SDN};
use crate::sod::Sod;
use crate::spdo::Spdo;
use crate::types::UDID_SIZE;
use timers::{LifeTimer, RefreshTimer};

const fn err_minor(local: u8) -> u16 {
    serr::build_error(ErrorType::NotFailSafe, ErrorClass::Minor, UnitId::Snmts, local)
}

const fn err_info(local: u8) -> u16 {
    serr::build_error(ErrorType::NotFailSafe, ErrorClass::Info, UnitId::Snmts, local)
}

// SERR codes of the SNMTS unit.
pub const SNMTS_K_ERR_LE_INV: u16 = err_minor(0x01);
pub const SNMTS_K_ERR_RX_FRMID_INV: u16 = err_minor(0x02);
pub const SNMTS_K_ERR_SADR_INV: u16 = err_minor(0x03);
pub const SNMTS_K_ERR_SDN_INV: u16 = err_minor(0x04);
pub const SNMTS_K_ERR_UDID_MISMATCH: u16 = err_minor(0x05);
pub const SNMTS_K_ERR_EXT_REQ_UNKNOWN: u16 = err_minor(0x06);
pub const SNMTS_K_ERR_SN_ACK1: u16 = err_minor(0x07);
pub const SNMTS_K_ERR_API_CALL_INV: u16 = err_minor(0x08);
pub const SNMTS_K_ERR_EVENT_UNEXPECTED: u16 = err_minor(0x09);
pub const SNMTS_K_ERR_PARAM_TIMESTAMP: u16 = err_minor(0x0A);
pub const SNMTS_K_ERR_LIFE_TIME_ELAPSED: u16 = err_info(0x0B);
pub const SNMTS_K_ERR_REFRESH_PULSE: u16 = err_info(0x0C);

/// The SN states visible to the SNMT master and the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnState {
    Initialization,
    PreOperational,
    Operational,
}

/// Result of processing one SNMTS request or event.
#[derive(Debug)]
pub enum SnmtsOutcome {
    /// Nothing to transmit (the request was consumed or rejected).
    None,
    /// Processing continues on the next invocation with the same frame.
    Busy,
    /// A response frame is ready for serialization.
    Response(FrameData),
    /// "SCM set to STOP" received; the dispatcher deactivates a
    /// co-located SCM. Not responded.
    ScmSetToStop,
    /// "SCM set to OP" received; the dispatcher activates a co-located
    /// SCM. Not responded.
    ScmSetToOp,
}

/// Per-instance state of the SNMT slave.
#[derive(Debug)]
pub struct Snmts {
    instance: u8,
    fsm_state: FsmState,
    pub(crate) refresh: RefreshTimer,
    pub(crate) life: LifeTimer,
    /// Parameter checksum interlock: request issued / answer value.
    chksum_requested: bool,
    chksum_valid: bool,
    /// Enter-OP interlock: request issued / stored answer.
    conf_requested: bool,
    conf: Option<(bool, u8, u8)>,
    /// Last emitted SN FAIL, awaited by SN ACK.
    last_fail: Option<(u8, u8)>,
}

impl Snmts {
    pub fn new(instance: u8) -> Self {
        Self {
            instance,
            fsm_state: FsmState::Initialization,
            refresh: RefreshTimer::new(),
            life: LifeTimer::new(),
            chksum_requested: false,
            chksum_valid: false,
            conf_requested: false,
            conf: None,
            last_fail: None,
        }
    }

    /// Resets the slave into the INITIALIZATION state (stack init).
    pub fn init(&mut self) {
        *self = Snmts::new(self.instance);
    }

    /// Returns the coarse SN state.
    pub fn get_sn_state(&self) -> SnState {
        match self.fsm_state {
            FsmState::Initialization => SnState::Initialization,
            FsmState::OperationalStep1 | FsmState::OperationalStep2 => SnState::Operational,
            _ => SnState::PreOperational,
        }
    }

    /// Returns the fine-grained FSM state (diagnostics and tests).
    pub fn get_fsm_state(&self) -> FsmState {
        self.fsm_state
    }

    /// Moves the SN out of INITIALIZATION (or out of OPERATIONAL) into
    /// PRE-OPERATIONAL and starts the refresh timer. Must not be called
    /// while already pre-operational.
    pub fn perform_trans_pre_op(&mut self, sod: &mut Sod, spdo: &mut Spdo, ct: u32) -> bool {
        match self.fsm_state {
            FsmState::Initialization => {
                self.fsm_state = FsmState::WfSadrAssStep1;
                self.refresh.start(sod, ct).is_ok()
            }
            FsmState::OperationalStep1 | FsmState::OperationalStep2 => {
                spdo.deactivate();
                self.life.stop();
                self.fsm_state = FsmState::WfSetToOp1Step1;
                self.refresh.start(sod, ct).is_ok()
            }
            _ => false,
        }
    }

    /// Stores the parameter checksum validity calculated by the
    /// application. Only valid while a calculation request is pending.
    pub fn pass_param_chk_sum_valid(&mut self, valid: bool) -> bool {
        if !self.chksum_requested || self.fsm_state != FsmState::WfApiChksum {
            return false;
        }
        self.chksum_requested = false;
        self.chksum_valid = valid;
        self.fsm_state = FsmState::WfSetToOp2;
        true
    }

    /// Stores the application confirmation for the transition into
    /// OPERATIONAL. Only valid while a confirmation request is pending.
    pub fn enter_op_state(&mut self, enter_op: bool, err_group: u8, err_code: u8) -> bool {
        if !self.conf_requested || self.fsm_state != FsmState::WfApiConf {
            return false;
        }
        if enter_op && err_group == snmt::K_FAIL_GRP_STK {
            // The stack group is reserved for stack-internal codes.
            return false;
        }
        self.conf_requested = false;
        self.conf = Some((enter_op, err_group, err_code));
        self.fsm_state = FsmState::WfSetToOp3;
        true
    }

    /// Checks the guarding timer (OPERATIONAL) respectively the refresh
    /// timer (PRE-OPERATIONAL) against `ct` and emits the "reset
    /// guarding" pulse when due.
    pub fn timer_check(
        &mut self,
        sod: &mut Sod,
        spdo: &mut Spdo,
        serr: &mut Serr,
        app: &mut dyn SnApplication,
        shnf: &mut dyn Shnf,
        ct: u32,
        free_frames: &mut u8,
    ) {
        match self.get_sn_state() {
            SnState::Operational => {
                if self.life.check(sod, ct).unwrap_or(false) {
                    serr.set_error(
                        self.instance,
                        app,
                        SNMTS_K_ERR_LIFE_TIME_ELAPSED,
                        SERR_K_NO_ADD_INFO,
                    );
                    spdo.deactivate();
                    self.fsm_state = FsmState::WfSetToOp1Step1;
                    let _ = self.refresh.start(sod, ct);
                }
            }
            SnState::PreOperational => {
                if *free_frames > 0 && self.refresh.check(sod, ct).unwrap_or(false) {
                    if let Some(frame) = response::reset_guard_scm(sod, ct) {
                        match shnf::send_frame(shnf, self.instance, &frame.hdr, &frame.payload, 0)
                        {
                            Ok(()) => {
                                *free_frames -= 1;
                                serr.set_error(
                                    self.instance,
                                    app,
                                    SNMTS_K_ERR_REFRESH_PULSE,
                                    SERR_K_NO_ADD_INFO,
                                );
                            }
                            Err(_) => my_warn!(
                                "[SNMTS] instance {}: refresh pulse not transmitted",
                                self.instance
                            ),
                        }
                    }
                }
            }
            SnState::Initialization => {}
        }
    }

    /// Processes one SNMT service request routed here by the dispatcher.
    pub fn process_request(
        &mut self,
        sod: &mut Sod,
        spdo: &mut Spdo,
        serr: &mut Serr,
        app: &mut dyn SnApplication,
        ct: u32,
        hdr: &FrameHeader,
        payload: &[u8],
    ) -> SnmtsOutcome {
        match hdr.frame_type {
            FrameType::SnmtUdidRequest => {
                if hdr.le != 0 {
                    serr.set_error(self.instance, app, SNMTS_K_ERR_LE_INV, hdr.le as u32);
                    return SnmtsOutcome::None;
                }
                // Answered from any state; the SCM polls it during
                // address verification before the SN owns a SADR.
                match response::udid_response(sod, hdr) {
                    Some(frame) => SnmtsOutcome::Response(frame),
                    None => SnmtsOutcome::None,
                }
            }
            FrameType::SnmtSadrAssignRequest => {
                if hdr.le as usize != UDID_SIZE {
                    serr.set_error(self.instance, app, SNMTS_K_ERR_LE_INV, hdr.le as u32);
                    return SnmtsOutcome::None;
                }
                if !self.check_rx_udid(sod, serr, app, payload) {
                    return SnmtsOutcome::None;
                }
                self.fsm_process(sod, spdo, serr, app, ct, SnEvent::RxSadr, hdr, payload)
            }
            FrameType::SnmtServiceRequest => {
                if hdr.le < snmt::K_LEN_SERV_CMD {
                    serr.set_error(self.instance, app, SNMTS_K_ERR_LE_INV, hdr.le as u32);
                    return SnmtsOutcome::None;
                }
                if !self.check_rx_addr(sod, serr, app, hdr) {
                    return SnmtsOutcome::None;
                }
                self.process_request_ext(sod, spdo, serr, app, ct, hdr, payload)
            }
            _ => {
                serr.set_error(
                    self.instance,
                    app,
                    SNMTS_K_ERR_RX_FRMID_INV,
                    hdr.frame_type.id() as u32,
                );
                SnmtsOutcome::None
            }
        }
    }

    /// Dispatches an extended service request by its command byte.
    fn process_request_ext(
        &mut self,
        sod: &mut Sod,
        spdo: &mut Spdo,
        serr: &mut Serr,
        app: &mut dyn SnApplication,
        ct: u32,
        hdr: &FrameHeader,
        payload: &[u8],
    ) -> SnmtsOutcome {
        let expect_le = |le: u8| -> bool { hdr.le == le };
        let command = payload[0];
        match command {
            snmt::K_SN_SET_TO_PREOP if expect_le(snmt::K_LEN_SERV_CMD) => {
                self.fsm_process(sod, spdo, serr, app, ct, SnEvent::RxSetToPreop, hdr, payload)
            }
            snmt::K_SN_SET_TO_OP if expect_le(snmt::K_LEN_SERV_CMD + snmt::K_LEN_TSTMP) => {
                self.fsm_process(sod, spdo, serr, app, ct, SnEvent::RxSetToOp, hdr, payload)
            }
            snmt::K_SCM_GUARD_SN if expect_le(snmt::K_LEN_SERV_CMD) => {
                self.fsm_process(sod, spdo, serr, app, ct, SnEvent::RxGuarding, hdr, payload)
            }
            snmt::K_ASS_ADD_SADR if expect_le(snmt::K_LEN_SERV_CMD + snmt::K_LEN_SADR_SPDO) => {
                self.fsm_process(sod, spdo, serr, app, ct, SnEvent::RxSadrAdd, hdr, payload)
            }
            snmt::K_ASS_UDID_SCM
                if expect_le(snmt::K_LEN_SERV_CMD + UDID_SIZE as u8) =>
            {
                self.fsm_process(sod, spdo, serr, app, ct, SnEvent::RxUdidScm, hdr, payload)
            }
            snmt::K_SN_ACK if expect_le(snmt::K_LEN_SERV_CMD + snmt::K_LEN_ERR_GROUP_CODE) => {
                self.check_sn_ack(serr, app, payload);
                SnmtsOutcome::None
            }
            // SCM lifecycle commands concern a co-located SCM and are not
            // responded; the dispatcher forwards them.
            snmt::K_SCM_SET_TO_STOP if expect_le(snmt::K_LEN_SERV_CMD) => {
                SnmtsOutcome::ScmSetToStop
            }
            snmt::K_SCM_SET_TO_OP if expect_le(snmt::K_LEN_SERV_CMD) => SnmtsOutcome::ScmSetToOp,
            #[cfg(feature = "extended-ct")]
            snmt::K_INITIALIZE_EXT_CT
                if expect_le(snmt::K_LEN_SERV_CMD + snmt::K_LEN_EXT_CT) =>
            {
                self.fsm_process(sod, spdo, serr, app, ct, SnEvent::RxInitCt, hdr, payload)
            }
            snmt::K_SN_SET_TO_PREOP
            | snmt::K_SN_SET_TO_OP
            | snmt::K_SCM_GUARD_SN
            | snmt::K_ASS_ADD_SADR
            | snmt::K_ASS_UDID_SCM
            | snmt::K_SN_ACK
            | snmt::K_SCM_SET_TO_STOP
            | snmt::K_SCM_SET_TO_OP => {
                serr.set_error(self.instance, app, SNMTS_K_ERR_LE_INV, hdr.le as u32);
                SnmtsOutcome::None
            }
            other => {
                serr.set_error(self.instance, app, SNMTS_K_ERR_EXT_REQ_UNKNOWN, other as u32);
                SnmtsOutcome::None
            }
        }
    }

    /// Address filter for extended service requests: the frame must
    /// address this SN within its own domain.
    fn check_rx_addr(
        &mut self,
        sod: &Sod,
        serr: &mut Serr,
        app: &mut dyn SnApplication,
        hdr: &FrameHeader,
    ) -> bool {
        let own_sdn = sod.read_u16(IDX_COMMON_COM_PARAM, SUBIDX_SDN).unwrap_or(0);
        if hdr.sdn != own_sdn {
            serr.set_error(self.instance, app, SNMTS_K_ERR_SDN_INV, hdr.sdn as u32);
            return false;
        }
        match response::main_sadr(sod) {
            Some(sadr) if sadr == hdr.adr => true,
            _ => {
                serr.set_error(self.instance, app, SNMTS_K_ERR_SADR_INV, hdr.adr as u32);
                false
            }
        }
    }

    /// UDID filter for the SADR assignment: the request names the
    /// physical device it addresses.
    fn check_rx_udid(
        &mut self,
        sod: &Sod,
        serr: &mut Serr,
        app: &mut dyn SnApplication,
        payload: &[u8],
    ) -> bool {
        use crate::sod::constants::IDX_UDID;
        match sod.read_octets(IDX_UDID, 0) {
            Some(own) if own == &payload[..UDID_SIZE] => true,
            _ => {
                serr.set_error(
                    self.instance,
                    app,
                    SNMTS_K_ERR_UDID_MISMATCH,
                    SERR_K_NO_ADD_INFO,
                );
                false
            }
        }
    }

    /// Matches an SN ACK against the last emitted SN FAIL and notifies
    /// the application on success.
    fn check_sn_ack(&mut self, serr: &mut Serr, app: &mut dyn SnApplication, payload: &[u8]) {
        let group = payload[1];
        let code = payload[2];
        match self.last_fail {
            Some((fail_group, fail_code)) if fail_group == group && fail_code == code => {
                my_debug!(
                    "[SNMTS] instance {}: SN FAIL ({}, {}) acknowledged",
                    self.instance,
                    group,
                    code
                );
                self.last_fail = None;
                app.error_ack(self.instance, group, code);
            }
            _ => {
                serr.set_error(
                    self.instance,
                    app,
                    SNMTS_K_ERR_SN_ACK1,
                    ((group as u32) << 8) | code as u32,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameData;
    use crate::snmt::ExtServResp;
    use crate::sod::constants::*;
    use crate::sod::{SodEntry, SodValue};
    use crate::types::UDID_SIZE;
    use alloc::vec;
    use alloc::vec::Vec;

    const SN_SADR: u16 = 2;
    const SCM_SADR: u16 = 1;
    const SDN: u16 = 1;
    const UDID: [u8; UDID_SIZE] = [0x00, 0x60, 0x65, 0x00, 0x00, 0x02];
    const TIMESTAMP: u32 = 0x8899AABB;

    struct MiniApp {
        chksum_requested: bool,
        conf_requested: bool,
        error_acks: Vec<(u8, u8)>,
        errors: Vec<u16>,
    }

    impl MiniApp {
        fn new() -> Self {
            Self {
                chksum_requested: false,
                conf_requested: false,
                error_acks: Vec::new(),
                errors: Vec::new(),
            }
        }
    }

    impl SnApplication for MiniApp {
        fn calc_param_chksum(&mut self, _instance: u8) {
            self.chksum_requested = true;
        }
        fn switch_to_op_req(&mut self, _instance: u8) {
            self.conf_requested = true;
        }
        fn error_ack(&mut self, _instance: u8, err_group: u8, err_code: u8) {
            self.error_acks.push((err_group, err_code));
        }
        fn parameter_set_processed(&mut self, _instance: u8) -> bool {
            true
        }
        fn signal_error(&mut self, _instance: u8, error: u16, _add_info: u32) {
            self.errors.push(error);
        }
    }

    fn test_sod() -> Sod {
        let mut sod = Sod::new(0);
        sod.insert(
            IDX_COMMON_COM_PARAM,
            SUBIDX_SDN,
            SodEntry::new(SodValue::U16(SDN), crate::sod::SodAttr::RW),
        );
        sod.insert(
            IDX_COMMON_COM_PARAM,
            SUBIDX_UDID_SCM,
            SodEntry::new(
                SodValue::OctetString(vec![0; UDID_SIZE]),
                crate::sod::SodAttr::RW,
            ),
        );
        sod.insert(
            IDX_UDID,
            0,
            SodEntry::new(SodValue::OctetString(UDID.to_vec()), crate::sod::SodAttr::RO),
        );
        sod.insert(
            IDX_TX_SPDO_COM_BASE,
            SUBIDX_TX_SADR,
            SodEntry::new(SodValue::U16(0), crate::sod::SodAttr::RW),
        );
        sod.insert(
            IDX_TX_SPDO_MAPP_BASE,
            0,
            SodEntry::new(SodValue::U8(0), crate::sod::SodAttr::RW),
        );
        sod.insert(
            IDX_DEVICE_VEN_ID,
            SUBIDX_PARAM_TIMESTAMP,
            SodEntry::new(SodValue::U32(TIMESTAMP), crate::sod::SodAttr::RW),
        );
        sod.insert(
            IDX_LIFE_GUARDING,
            SUBIDX_GUARD_TIME,
            SodEntry::new(SodValue::U32(100), crate::sod::SodAttr::RW),
        );
        sod.insert(
            IDX_LIFE_GUARDING,
            SUBIDX_LIFE_TIME_FACTOR,
            SodEntry::new(SodValue::U8(5), crate::sod::SodAttr::RW),
        );
        sod.insert(
            IDX_PRE_OP_SIGNAL,
            0,
            SodEntry::new(SodValue::U32(50), crate::sod::SodAttr::RW),
        );
        sod.insert(
            IDX_PRE_OP_RETRIES,
            0,
            SodEntry::new(SodValue::U8(K_UNLIMITED_RETRIES), crate::sod::SodAttr::RW),
        );
        sod
    }

    fn ext_request(command: u8, extra: &[u8]) -> (FrameHeader, Vec<u8>) {
        let mut payload = vec![command];
        payload.extend_from_slice(extra);
        (
            FrameHeader {
                frame_type: FrameType::SnmtServiceRequest,
                adr: SN_SADR,
                sdn: SDN,
                le: payload.len() as u8,
                ct: 7,
                tadr: SCM_SADR,
                tr: 0,
            },
            payload,
        )
    }

    struct Fixture {
        snmts: Snmts,
        sod: Sod,
        spdo: crate::spdo::Spdo,
        serr: Serr,
        app: MiniApp,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                snmts: Snmts::new(0),
                sod: test_sod(),
                spdo: crate::spdo::Spdo::new(0),
                serr: Serr::new(),
                app: MiniApp::new(),
            }
        }

        /// Feeds one request, driving busy continuations to completion.
        fn drive(&mut self, hdr: &FrameHeader, payload: &[u8]) -> Option<FrameData> {
            loop {
                match self.snmts.process_request(
                    &mut self.sod,
                    &mut self.spdo,
                    &mut self.serr,
                    &mut self.app,
                    100,
                    hdr,
                    payload,
                ) {
                    SnmtsOutcome::Busy => continue,
                    SnmtsOutcome::Response(frame) => return Some(frame),
                    _ => return None,
                }
            }
        }

        fn bring_to_operational(&mut self) {
            assert!(self
                .snmts
                .perform_trans_pre_op(&mut self.sod, &mut self.spdo, 0));
            let hdr = FrameHeader {
                frame_type: FrameType::SnmtSadrAssignRequest,
                adr: SN_SADR,
                sdn: SDN,
                le: UDID_SIZE as u8,
                ct: 1,
                tadr: SCM_SADR,
                tr: 0,
            };
            let response = self.drive(&hdr, &UDID).unwrap();
            assert_eq!(response.hdr.frame_type, FrameType::SnmtSadrAssignResponse);

            let (hdr, payload) = ext_request(snmt::K_ASS_UDID_SCM, &[1; UDID_SIZE]);
            let response = self.drive(&hdr, &payload).unwrap();
            assert_eq!(response.payload[0], ExtServResp::UdidScmAssigned as u8);

            let (hdr, payload) =
                ext_request(snmt::K_SN_SET_TO_OP, &TIMESTAMP.to_le_bytes());
            let response = self.drive(&hdr, &payload).unwrap();
            assert_eq!(response.payload[0], ExtServResp::SnStsBusy as u8);
            assert!(self.app.chksum_requested);
            assert!(self.snmts.pass_param_chk_sum_valid(true));

            let response = self.drive(&hdr, &payload).unwrap();
            assert_eq!(response.payload[0], ExtServResp::SnStsBusy as u8);
            assert!(self.app.conf_requested);
            assert!(self.snmts.enter_op_state(true, 0, 0));

            let response = self.drive(&hdr, &payload).unwrap();
            assert_eq!(response.payload[0], ExtServResp::SnStsOp as u8);
            assert_eq!(self.snmts.get_sn_state(), SnState::Operational);
        }
    }

    #[test]
    fn test_visible_state_walk_to_operational() {
        let mut fixture = Fixture::new();
        assert_eq!(fixture.snmts.get_sn_state(), SnState::Initialization);
        fixture.bring_to_operational();
        // The assigned address was persisted to the SOD.
        assert_eq!(
            fixture.sod.read_u16(IDX_TX_SPDO_COM_BASE, SUBIDX_TX_SADR),
            Some(SN_SADR)
        );
    }

    #[test]
    fn test_chksum_answer_rejected_without_request() {
        let mut fixture = Fixture::new();
        assert!(!fixture.snmts.pass_param_chk_sum_valid(true));
        assert!(!fixture.snmts.enter_op_state(true, 0, 0));
    }

    #[test]
    fn test_wrong_checksum_emits_sn_fail() {
        let mut fixture = Fixture::new();
        assert!(fixture
            .snmts
            .perform_trans_pre_op(&mut fixture.sod, &mut fixture.spdo, 0));
        let hdr = FrameHeader {
            frame_type: FrameType::SnmtSadrAssignRequest,
            adr: SN_SADR,
            sdn: SDN,
            le: UDID_SIZE as u8,
            ct: 1,
            tadr: SCM_SADR,
            tr: 0,
        };
        fixture.drive(&hdr, &UDID).unwrap();
        let (hdr, payload) = ext_request(snmt::K_ASS_UDID_SCM, &[1; UDID_SIZE]);
        fixture.drive(&hdr, &payload).unwrap();

        let (hdr, payload) = ext_request(snmt::K_SN_SET_TO_OP, &TIMESTAMP.to_le_bytes());
        fixture.drive(&hdr, &payload).unwrap();
        assert!(fixture.snmts.pass_param_chk_sum_valid(false));

        let response = fixture.drive(&hdr, &payload).unwrap();
        assert_eq!(
            response.payload,
            vec![
                ExtServResp::SnFail as u8,
                snmt::K_FAIL_GRP_STK,
                snmt::K_FAIL_ERR_CRC_CHKSUM
            ]
        );
        assert_eq!(fixture.snmts.get_fsm_state(), FsmState::WfSetToOp1Step1);

        // Matching SN ACK reaches the application...
        let (hdr, payload) = ext_request(
            snmt::K_SN_ACK,
            &[snmt::K_FAIL_GRP_STK, snmt::K_FAIL_ERR_CRC_CHKSUM],
        );
        assert!(fixture.drive(&hdr, &payload).is_none());
        assert_eq!(
            fixture.app.error_acks,
            vec![(snmt::K_FAIL_GRP_STK, snmt::K_FAIL_ERR_CRC_CHKSUM)]
        );

        // ...while a mismatching one only raises the acknowledge error.
        let (hdr, payload) = ext_request(snmt::K_SN_ACK, &[0, 0]);
        assert!(fixture.drive(&hdr, &payload).is_none());
        assert!(fixture.app.errors.contains(&SNMTS_K_ERR_SN_ACK1));
    }

    #[test]
    fn test_unexpected_event_rewinds_to_sadr_assignment() {
        let mut fixture = Fixture::new();
        assert!(fixture
            .snmts
            .perform_trans_pre_op(&mut fixture.sod, &mut fixture.spdo, 0));
        let hdr = FrameHeader {
            frame_type: FrameType::SnmtSadrAssignRequest,
            adr: SN_SADR,
            sdn: SDN,
            le: UDID_SIZE as u8,
            ct: 1,
            tadr: SCM_SADR,
            tr: 0,
        };
        fixture.drive(&hdr, &UDID).unwrap();
        assert_eq!(fixture.snmts.get_fsm_state(), FsmState::WfUdidScmAss);

        // "SN set to OP" is not legal before the UDID of the SCM.
        let (hdr, payload) = ext_request(snmt::K_SN_SET_TO_OP, &TIMESTAMP.to_le_bytes());
        let response = fixture.drive(&hdr, &payload).unwrap();
        assert_eq!(
            response.payload,
            vec![
                ExtServResp::SnFail as u8,
                snmt::K_FAIL_GRP_STK,
                snmt::K_FAIL_ERR_UNEXPECTED_FSM_EVENT
            ]
        );
        assert_eq!(fixture.snmts.get_fsm_state(), FsmState::WfSadrAssStep1);
    }

    #[test]
    fn test_guarding_keeps_operational_alive() {
        let mut fixture = Fixture::new();
        fixture.bring_to_operational();
        let (hdr, payload) = ext_request(snmt::K_SCM_GUARD_SN, &[]);
        let response = fixture.drive(&hdr, &payload).unwrap();
        assert_eq!(response.payload, vec![ExtServResp::SnStsOp as u8]);
    }

    #[test]
    fn test_guarding_in_pre_operational_reports_preop() {
        let mut fixture = Fixture::new();
        assert!(fixture
            .snmts
            .perform_trans_pre_op(&mut fixture.sod, &mut fixture.spdo, 0));
        let hdr = FrameHeader {
            frame_type: FrameType::SnmtSadrAssignRequest,
            adr: SN_SADR,
            sdn: SDN,
            le: UDID_SIZE as u8,
            ct: 1,
            tadr: SCM_SADR,
            tr: 0,
        };
        fixture.drive(&hdr, &UDID).unwrap();
        let (hdr, payload) = ext_request(snmt::K_SCM_GUARD_SN, &[]);
        let response = fixture.drive(&hdr, &payload).unwrap();
        assert_eq!(response.payload, vec![ExtServResp::SnStsPreop as u8]);
    }

    #[test]
    fn test_udid_request_served_in_any_state() {
        let mut fixture = Fixture::new();
        let hdr = FrameHeader {
            frame_type: FrameType::SnmtUdidRequest,
            adr: SN_SADR,
            sdn: SDN,
            le: 0,
            ct: 1,
            tadr: SCM_SADR,
            tr: 0,
        };
        let response = fixture.drive(&hdr, &[]).unwrap();
        assert_eq!(response.hdr.frame_type, FrameType::SnmtUdidResponse);
        assert_eq!(response.payload, UDID.to_vec());
    }
}

