// crates/opensafety-rs/src/scm/mod.rs
//! SCM, the Safety Configuration Manager.
//!
//! Walks every configured Safety Node from address verification through
//! parameter download to OPERATIONAL, then guards it. One FSM per node;
//! `trigger` advances them all, bounded by the caller's free frame
//! budget. Requests ride on the SNMT master and the SSDO client, matched
//! back by the node handle used as registration number.

mod fsm;

pub use fsm::{NodeStatus, ScmStep, SnRecord};

use crate::log::{my_debug, my_info, my_warn};
use crate::sapl::{ScmApplication, SnApplication};
use crate::serr::{self, ErrorClass, ErrorType, Serr};
use crate::shnf::Shnf;
use crate::snmt;
use crate::snmtm::{Snmtm, SnmtmRequest, SnmtmResponse, K_REG_UNSOLICITED};
use crate::sod::constants::{
    IDX_COMMON_COM_PARAM, IDX_DEVICE_VEN_ID, IDX_LIFE_GUARDING, IDX_PARAM_DOWNLOAD,
    IDX_SADR_DVI_BASE, IDX_SADR_UDID_BASE, IDX_UDID, SUBIDX_DVI_MAX_SSDO_PYLD,
    SUBIDX_DVI_NODE_STATUS, SUBIDX_DVI_PARAM_SET, SUBIDX_DVI_PARAM_TIMESTAMP,
    SUBIDX_DVI_PRODUCT_CODE, SUBIDX_DVI_REVISION_NUMBER, SUBIDX_DVI_SADR, SUBIDX_DVI_VENDOR_ID,
    SUBIDX_GUARD_TIME, SUBIDX_PARAM_TIMESTAMP, SUBIDX_PRODUCT_CODE, SUBIDX_REVISION_NUMBER,
    SUBIDX_SADR_SCM, SUBIDX_SDN, SUBIDX_UDID_LIST_UDID, SUBIDX_VENDOR_ID,
};
use crate::sod::{Sod, SodValue};
use crate::ssdo::Ssdoc;
use crate::types::{ct_elapsed, Sadr, Udid, SCM_CFG_MAX_NUM_OF_NODES, UDID_SIZE};
use alloc::vec::Vec;

const fn err_minor(local: u8) -> u16 {
    serr::build_error(
        ErrorType::NotFailSafe,
        ErrorClass::Minor,
        serr::UnitId::Scm,
        local,
    )
}

pub const SCM_K_ERR_EVENT_UNEXPECTED: u16 = err_minor(0x01);
pub const SCM_K_ERR_SOD_CFG: u16 = err_minor(0x02);

/// Pacing of a retried configuration round, in guard time units.
const K_RETRY_GUARD_CYCLES: u32 = 1;

/// Per-instance configuration manager.
#[derive(Debug)]
pub struct Scm {
    instance: u8,
    active: bool,
    nodes: Vec<SnRecord>,
}

impl Scm {
    pub fn new(instance: u8) -> Self {
        Self {
            instance,
            active: false,
            nodes: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Loads the node pool from the SADR-DVI and SADR-UDID lists and
    /// starts configuration plus node guarding.
    pub fn activate(&mut self, sod: &Sod) -> bool {
        self.nodes.clear();
        for slot in 0..SCM_CFG_MAX_NUM_OF_NODES as u16 {
            let base = IDX_SADR_DVI_BASE + slot;
            let sadr = match sod.read_u16(base, SUBIDX_DVI_SADR) {
                Some(sadr) if sadr != 0 => sadr,
                _ => continue,
            };
            let Some(udid) = sod
                .read_octets(IDX_SADR_UDID_BASE + slot, SUBIDX_UDID_LIST_UDID)
                .and_then(|bytes| <[u8; UDID_SIZE]>::try_from(bytes).ok())
            else {
                my_warn!(
                    "[SCM] instance {}: no expected UDID for SADR {}, slot skipped",
                    self.instance,
                    sadr
                );
                continue;
            };
            let Some(param_timestamp) = sod.read_u32(base, SUBIDX_DVI_PARAM_TIMESTAMP) else {
                my_warn!(
                    "[SCM] instance {}: no parameter timestamp for SADR {}, slot skipped",
                    self.instance,
                    sadr
                );
                continue;
            };
            self.nodes.push(SnRecord {
                handle: slot,
                sadr,
                step: ScmStep::VerifyUdid,
                status: NodeStatus::Missing,
                pending: false,
                next_action_ct: 0,
                guard_now: false,
                pending_ack: None,
                expected_udid: Udid(udid),
                vendor_id: sod.read_u32(base, SUBIDX_DVI_VENDOR_ID).unwrap_or(0),
                product_code: sod.read_u32(base, SUBIDX_DVI_PRODUCT_CODE).unwrap_or(0),
                revision: sod.read_u32(base, SUBIDX_DVI_REVISION_NUMBER).unwrap_or(0),
                param_timestamp,
                max_ssdo_len: sod
                    .read_u8(base, SUBIDX_DVI_MAX_SSDO_PYLD)
                    .map(|len| len as usize)
                    .unwrap_or(8),
                param_set: sod
                    .read_octets(base, SUBIDX_DVI_PARAM_SET)
                    .map(|bytes| bytes.to_vec())
                    .unwrap_or_default(),
            });
        }
        self.active = !self.nodes.is_empty();
        my_info!(
            "[SCM] instance {}: activated with {} node(s)",
            self.instance,
            self.nodes.len()
        );
        self.active
    }

    /// Stops configuration and guarding; the node pool is dropped.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.nodes.clear();
    }

    /// Operator acknowledge of a UDID mismatch; restarts verification.
    pub fn operator_ack(&mut self, handle: u16) -> bool {
        match self
            .nodes
            .iter_mut()
            .find(|n| n.handle == handle && n.step == ScmStep::WfOperatorAck)
        {
            Some(node) => {
                node.restart_verification();
                true
            }
            None => false,
        }
    }

    /// Application acknowledge of a reported SN FAIL; the SN ACK is
    /// transmitted on the next trigger and verification restarts.
    pub fn sn_fail_ack(&mut self, handle: u16, err_group: u8, err_code: u8) -> bool {
        match self
            .nodes
            .iter_mut()
            .find(|n| n.handle == handle && n.step == ScmStep::WfSaplAck)
        {
            Some(node) => {
                node.pending_ack = Some((err_group, err_code));
                true
            }
            None => false,
        }
    }

    /// Restarts node guarding: guarded nodes are polled immediately,
    /// nodes parked on an operator acknowledge restart verification.
    pub fn reset_node_guarding(&mut self) {
        for node in &mut self.nodes {
            match node.step {
                ScmStep::Guarding => node.guard_now = true,
                ScmStep::WfOperatorAck => node.restart_verification(),
                _ => {}
            }
        }
    }

    /// Current status of the node at `sadr`.
    pub fn node_status(&self, sadr: u16) -> Option<NodeStatus> {
        self.nodes
            .iter()
            .find(|n| n.sadr == sadr)
            .map(|n| n.status)
    }

    /// Advances every node FSM: consumes transport events, paces
    /// guarding, emits the next request of each node.
    #[allow(clippy::too_many_arguments)]
    pub fn trigger(
        &mut self,
        sod: &mut Sod,
        snmtm: &mut Snmtm,
        ssdoc: &mut Ssdoc,
        serr: &mut Serr,
        sn_app: &mut dyn SnApplication,
        scm_app: &mut dyn ScmApplication,
        shnf: &mut dyn Shnf,
        ct: u32,
        free_frames: &mut u8,
    ) {
        if !self.active {
            return;
        }
        let instance = self.instance;
        let guard_time = sod
            .read_u32(IDX_LIFE_GUARDING, SUBIDX_GUARD_TIME)
            .unwrap_or(1_000);

        snmtm.check_timeouts(sod, shnf, ct);
        ssdoc.check_timeouts(sod, shnf, ct);

        // Consume SNMT master events.
        for event in snmtm.take_events() {
            if event.reg_num == K_REG_UNSOLICITED {
                match event.response {
                    SnmtmResponse::ResetGuard => {
                        if let Some(node) =
                            self.nodes.iter_mut().find(|n| n.sadr == event.sadr)
                        {
                            match node.step {
                                ScmStep::Guarding => node.guard_now = true,
                                ScmStep::WfOperatorAck => node.restart_verification(),
                                _ => {}
                            }
                        }
                    }
                    SnmtmResponse::UnexpectedSource(udid) => {
                        // The UDID identifies which pending node answered
                        // from an address it was never addressed under.
                        if let Some(node) = self.nodes.iter_mut().find(|n| {
                            n.pending
                                && matches!(
                                    n.step,
                                    ScmStep::VerifyUdid | ScmStep::AssignSadr
                                )
                                && n.expected_udid == udid
                                && n.sadr != event.sadr
                        }) {
                            snmtm.abort_request(node.handle);
                            handle_snmtm_event(
                                instance,
                                sod,
                                scm_app,
                                node,
                                SnmtmResponse::UnexpectedSource(udid),
                                ct,
                                guard_time,
                            );
                        }
                    }
                    _ => {}
                }
                continue;
            }
            match self.nodes.iter_mut().find(|n| n.handle == event.reg_num) {
                Some(node) => handle_snmtm_event(
                    instance, sod, scm_app, node, event.response, ct, guard_time,
                ),
                None => serr.set_error(
                    instance,
                    sn_app,
                    SCM_K_ERR_EVENT_UNEXPECTED,
                    event.sadr as u32,
                ),
            }
        }

        // Collect finished SSDO transfers.
        for node in &mut self.nodes {
            if node.pending && is_ssdo_step(node.step) {
                if let Some(result) = ssdoc.take_result(node.handle) {
                    handle_ssdo_result(instance, sod, scm_app, node, result, ct, guard_time);
                }
            }
        }

        // Emit the next request of every idle node.
        let own_sadr = sod
            .read_u16(IDX_COMMON_COM_PARAM, SUBIDX_SADR_SCM)
            .unwrap_or(0);
        let sdn = sod.read_u16(IDX_COMMON_COM_PARAM, SUBIDX_SDN).unwrap_or(0);
        let own_udid = sod
            .read_octets(IDX_UDID, 0)
            .and_then(|bytes| <[u8; UDID_SIZE]>::try_from(bytes).ok())
            .map(Udid)
            .unwrap_or_default();

        for node in &mut self.nodes {
            if *free_frames == 0 {
                return;
            }
            if node.pending {
                continue;
            }
            if !node.guard_now && !ct_elapsed(ct, node.next_action_ct) {
                continue;
            }
            advance_node(
                instance, sod, snmtm, ssdoc, scm_app, shnf, node, ct, guard_time, own_sadr, sdn,
                own_udid, free_frames,
            );
        }
    }
}

fn is_ssdo_step(step: ScmStep) -> bool {
    matches!(
        step,
        ScmStep::VerifyVendor
            | ScmStep::VerifyProduct
            | ScmStep::VerifyRevision
            | ScmStep::DownloadParams
            | ScmStep::VerifyParams
    )
}

/// Records and reports a node status change.
fn set_status(
    sod: &mut Sod,
    scm_app: &mut dyn ScmApplication,
    node: &mut SnRecord,
    new_status: NodeStatus,
) {
    if node.status == new_status {
        return;
    }
    let old = node.status;
    node.status = new_status;
    let _ = sod.write_internal(
        IDX_SADR_DVI_BASE + node.handle,
        SUBIDX_DVI_NODE_STATUS,
        SodValue::U8(new_status as u8),
    );
    scm_app.node_status_changed(Sadr(node.sadr), old, new_status);
}

/// Applies one SNMT master event to a node FSM.
fn handle_snmtm_event(
    instance: u8,
    sod: &mut Sod,
    scm_app: &mut dyn ScmApplication,
    node: &mut SnRecord,
    response: SnmtmResponse,
    ct: u32,
    guard_time: u32,
) {
    node.pending = false;
    match (node.step, response) {
        (ScmStep::VerifyUdid, SnmtmResponse::UdidResponse(udid)) => {
            if udid == node.expected_udid {
                node.step = ScmStep::AssignSadr;
            } else {
                my_warn!(
                    "[SCM] instance {}: SADR {} answered with unexpected UDID {}",
                    instance,
                    node.sadr,
                    udid
                );
                set_status(sod, scm_app, node, NodeStatus::UdidMismatch);
                node.step = ScmStep::WfOperatorAck;
                scm_app.udid_mismatch(Sadr(node.sadr), udid, node.handle);
            }
        }
        (ScmStep::AssignSadr, SnmtmResponse::SadrAssigned(udid)) => {
            if udid == node.expected_udid {
                node.step = ScmStep::AssignUdidScm;
            } else {
                set_status(sod, scm_app, node, NodeStatus::Invalid);
                node.restart_verification();
                node.next_action_ct = ct.wrapping_add(guard_time * K_RETRY_GUARD_CYCLES);
            }
        }
        (
            ScmStep::VerifyUdid | ScmStep::AssignSadr,
            SnmtmResponse::UnexpectedSource(udid),
        ) => {
            // The expected device is alive but answers under a SADR the
            // SCM never addressed it with.
            my_warn!(
                "[SCM] instance {}: node {} (expected at SADR {}) responds to the wrong SADR",
                instance,
                udid,
                node.sadr
            );
            set_status(sod, scm_app, node, NodeStatus::WrongSadr);
            node.restart_verification();
            node.next_action_ct = ct.wrapping_add(guard_time * K_RETRY_GUARD_CYCLES);
        }
        (ScmStep::AssignUdidScm, SnmtmResponse::UdidScmAssigned) => {
            #[cfg(feature = "extended-ct")]
            {
                node.step = ScmStep::InitExtCt;
            }
            #[cfg(not(feature = "extended-ct"))]
            {
                node.step = ScmStep::VerifyVendor;
            }
        }
        #[cfg(feature = "extended-ct")]
        (ScmStep::InitExtCt, SnmtmResponse::ExtCtInitialized) => {
            node.step = ScmStep::VerifyVendor;
        }
        #[cfg(feature = "extended-ct")]
        (ScmStep::InitExtCt, SnmtmResponse::SnFail { .. } | SnmtmResponse::Timeout) => {
            set_status(sod, scm_app, node, NodeStatus::ErrInitCt);
            node.restart_verification();
            node.next_action_ct = ct.wrapping_add(guard_time * K_RETRY_GUARD_CYCLES);
        }
        (ScmStep::SetToOp, SnmtmResponse::SnStatusBusy) => {
            // The SN is waiting for its application; ask again shortly.
            node.next_action_ct = ct.wrapping_add(1);
        }
        (ScmStep::SetToOp, SnmtmResponse::SnStatusOp) => {
            my_info!(
                "[SCM] instance {}: SADR {} reached OPERATIONAL",
                instance,
                node.sadr
            );
            set_status(sod, scm_app, node, NodeStatus::Ok);
            node.step = ScmStep::Guarding;
            node.next_action_ct = ct.wrapping_add(guard_time);
        }
        (ScmStep::SetToOp, SnmtmResponse::SnFail {
            err_group,
            err_code,
        }) => {
            let status = if err_group == snmt::K_FAIL_GRP_ADD {
                NodeStatus::WrongAddParam
            } else if err_code == snmt::K_FAIL_ERR_CRC_CHKSUM
                || err_code == snmt::K_FAIL_ERR_MAP_FAILED_RX
                || err_code == snmt::K_FAIL_ERR_MAP_FAILED_TX
            {
                NodeStatus::WrongParam
            } else {
                NodeStatus::Invalid
            };
            set_status(sod, scm_app, node, status);
            node.step = ScmStep::WfSaplAck;
            scm_app.sn_fail(Sadr(node.sadr), err_group, err_code, node.handle);
        }
        (ScmStep::Guarding, SnmtmResponse::SnStatusOp) => {
            node.next_action_ct = ct.wrapping_add(guard_time);
        }
        (ScmStep::Guarding, SnmtmResponse::SnStatusPreop) => {
            // The node fell back to PRE-OPERATIONAL; repeat the
            // operational handshake (its parameters are unchanged).
            set_status(sod, scm_app, node, NodeStatus::Valid);
            node.step = ScmStep::SetToOp;
            node.next_action_ct = ct;
        }
        (_, SnmtmResponse::Timeout) => {
            set_status(sod, scm_app, node, NodeStatus::Missing);
            node.restart_verification();
            node.next_action_ct = ct.wrapping_add(guard_time * K_RETRY_GUARD_CYCLES);
        }
        (step, response) => {
            my_debug!(
                "[SCM] instance {}: SADR {} sent {:?} while in {:?}, ignored",
                instance,
                node.sadr,
                response,
                step
            );
        }
    }
}

/// Applies one finished SSDO transfer to a node FSM.
fn handle_ssdo_result(
    instance: u8,
    sod: &mut Sod,
    scm_app: &mut dyn ScmApplication,
    node: &mut SnRecord,
    result: Result<Vec<u8>, u32>,
    ct: u32,
    guard_time: u32,
) {
    node.pending = false;
    let fail = |sod: &mut Sod, scm_app: &mut dyn ScmApplication, node: &mut SnRecord, status| {
        set_status(sod, scm_app, node, status);
        node.restart_verification();
        node.next_action_ct = ct.wrapping_add(guard_time * K_RETRY_GUARD_CYCLES);
    };
    let bytes = match result {
        Ok(bytes) => bytes,
        Err(abort) => {
            my_warn!(
                "[SCM] instance {}: SSDO transfer for SADR {} aborted with {:#010X}",
                instance,
                node.sadr,
                abort
            );
            let status = if is_identity_step(node.step) {
                NodeStatus::Invalid
            } else {
                NodeStatus::WrongParam
            };
            fail(sod, scm_app, node, status);
            return;
        }
    };
    let as_u32 = |bytes: &[u8]| -> Option<u32> {
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    };
    match node.step {
        ScmStep::VerifyVendor => match as_u32(&bytes) {
            Some(vendor) if vendor == node.vendor_id => node.step = ScmStep::VerifyProduct,
            _ => fail(sod, scm_app, node, NodeStatus::Invalid),
        },
        ScmStep::VerifyProduct => match as_u32(&bytes) {
            Some(product) if product == node.product_code => {
                node.step = ScmStep::VerifyRevision
            }
            _ => fail(sod, scm_app, node, NodeStatus::Invalid),
        },
        ScmStep::VerifyRevision => match as_u32(&bytes) {
            Some(revision)
                if scm_app.revision_number(Sadr(node.sadr), node.revision, revision) =>
            {
                node.step = ScmStep::DownloadParams
            }
            _ => fail(sod, scm_app, node, NodeStatus::IncompVersion),
        },
        ScmStep::DownloadParams => {
            node.step = ScmStep::VerifyParams;
        }
        ScmStep::VerifyParams => match as_u32(&bytes) {
            Some(timestamp) if timestamp == node.param_timestamp => {
                node.step = ScmStep::SetToOp;
            }
            _ => fail(sod, scm_app, node, NodeStatus::WrongParam),
        },
        _ => {}
    }
}

fn is_identity_step(step: ScmStep) -> bool {
    matches!(
        step,
        ScmStep::VerifyVendor | ScmStep::VerifyProduct | ScmStep::VerifyRevision
    )
}

/// Emits the next request of one node.
#[allow(clippy::too_many_arguments)]
fn advance_node(
    instance: u8,
    sod: &Sod,
    snmtm: &mut Snmtm,
    ssdoc: &mut Ssdoc,
    scm_app: &mut dyn ScmApplication,
    shnf: &mut dyn Shnf,
    node: &mut SnRecord,
    ct: u32,
    guard_time: u32,
    own_sadr: u16,
    sdn: u16,
    own_udid: Udid,
    free_frames: &mut u8,
) {
    match node.step {
        ScmStep::VerifyUdid => {
            if !scm_app.process_sn(Sadr(node.sadr)) {
                node.next_action_ct = ct.wrapping_add(guard_time);
                return;
            }
            send_snmt(
                snmtm,
                sod,
                shnf,
                ct,
                own_sadr,
                sdn,
                node,
                free_frames,
                SnmtmRequest::Udid,
            );
        }
        ScmStep::WfOperatorAck => {}
        ScmStep::AssignSadr => send_snmt(
            snmtm,
            sod,
            shnf,
            ct,
            own_sadr,
            sdn,
            node,
            free_frames,
            SnmtmRequest::AssignSadr(node.expected_udid),
        ),
        ScmStep::AssignUdidScm => send_snmt(
            snmtm,
            sod,
            shnf,
            ct,
            own_sadr,
            sdn,
            node,
            free_frames,
            SnmtmRequest::AssignUdidScm(own_udid),
        ),
        #[cfg(feature = "extended-ct")]
        ScmStep::InitExtCt => {
            let initial = scm_app.initial_ct_value();
            send_snmt(
                snmtm,
                sod,
                shnf,
                ct,
                own_sadr,
                sdn,
                node,
                free_frames,
                SnmtmRequest::InitExtCt(initial),
            );
        }
        ScmStep::VerifyVendor | ScmStep::VerifyProduct | ScmStep::VerifyRevision => {
            let sub = match node.step {
                ScmStep::VerifyVendor => SUBIDX_VENDOR_ID,
                ScmStep::VerifyProduct => SUBIDX_PRODUCT_CODE,
                _ => SUBIDX_REVISION_NUMBER,
            };
            if ssdoc
                .read_object(
                    sod,
                    shnf,
                    ct,
                    node.handle,
                    own_sadr,
                    sdn,
                    node.sadr,
                    IDX_DEVICE_VEN_ID,
                    sub,
                )
                .is_ok()
            {
                node.pending = true;
                *free_frames -= 1;
            }
        }
        ScmStep::DownloadParams => {
            my_debug!(
                "[SCM] instance {}: downloading {} parameter byte(s) to SADR {}",
                instance,
                node.param_set.len(),
                node.sadr
            );
            if ssdoc
                .write_object(
                    sod,
                    shnf,
                    ct,
                    node.handle,
                    own_sadr,
                    sdn,
                    node.sadr,
                    IDX_PARAM_DOWNLOAD,
                    0,
                    &node.param_set,
                    node.max_ssdo_len,
                )
                .is_ok()
            {
                node.pending = true;
                *free_frames -= 1;
            }
        }
        ScmStep::VerifyParams => {
            if ssdoc
                .read_object(
                    sod,
                    shnf,
                    ct,
                    node.handle,
                    own_sadr,
                    sdn,
                    node.sadr,
                    IDX_DEVICE_VEN_ID,
                    SUBIDX_PARAM_TIMESTAMP,
                )
                .is_ok()
            {
                node.pending = true;
                *free_frames -= 1;
            }
        }
        ScmStep::SetToOp => send_snmt(
            snmtm,
            sod,
            shnf,
            ct,
            own_sadr,
            sdn,
            node,
            free_frames,
            SnmtmRequest::SetToOp {
                timestamp: node.param_timestamp,
            },
        ),
        ScmStep::WfSaplAck => {
            if let Some((err_group, err_code)) = node.pending_ack.take() {
                // Fire-and-forget acknowledge towards the SN, then the
                // verification starts over.
                let _ = snmtm.request(
                    sod,
                    shnf,
                    ct,
                    node.handle,
                    own_sadr,
                    sdn,
                    node.sadr,
                    SnmtmRequest::SnAck {
                        err_group,
                        err_code,
                    },
                );
                *free_frames = free_frames.saturating_sub(1);
                node.restart_verification();
                node.next_action_ct = ct.wrapping_add(guard_time);
            }
        }
        ScmStep::Guarding => {
            node.guard_now = false;
            send_snmt(
                snmtm,
                sod,
                shnf,
                ct,
                own_sadr,
                sdn,
                node,
                free_frames,
                SnmtmRequest::Guard,
            );
            node.next_action_ct = ct.wrapping_add(guard_time);
        }
    }
}

/// Emits one SNMT request for a node and books the frame budget.
#[allow(clippy::too_many_arguments)]
fn send_snmt(
    snmtm: &mut Snmtm,
    sod: &Sod,
    shnf: &mut dyn Shnf,
    ct: u32,
    own_sadr: u16,
    sdn: u16,
    node: &mut SnRecord,
    free_frames: &mut u8,
    request: SnmtmRequest,
) {
    if snmtm
        .request(sod, shnf, ct, node.handle, own_sadr, sdn, node.sadr, request)
        .is_ok()
    {
        node.pending = true;
        *free_frames -= 1;
    }
}
