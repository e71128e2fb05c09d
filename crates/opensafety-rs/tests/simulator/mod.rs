// crates/opensafety-rs/tests/simulator/mod.rs
//! A virtual safety network: in-memory SHNF implementations, scripted
//! application callbacks and SOD builders for the end-to-end tests.
#![allow(dead_code)]

use opensafety_rs::frame::FrameClass;
use opensafety_rs::sapl::{ScmApplication, SnApplication};
use opensafety_rs::scm::NodeStatus;
use opensafety_rs::shnf::{ReceivedFrame, SafetyError, Shnf};
use opensafety_rs::sod::constants::*;
use opensafety_rs::sod::{DomainData, Sod, SodAttr, SodEntry, SodValue};
use opensafety_rs::types::UDID_SIZE;
use opensafety_rs::{Sadr, Udid};
use std::collections::VecDeque;

/// An in-memory transport endpoint. Outbound frames accumulate in
/// `sent`; inbound frames are queued by the test via [`deliver`].
pub struct SimShnf {
    pending_class: VecDeque<FrameClass>,
    pub sent: Vec<(FrameClass, Vec<u8>)>,
    inbox: VecDeque<ReceivedFrame>,
}

impl SimShnf {
    pub fn new() -> Self {
        Self {
            pending_class: VecDeque::new(),
            sent: Vec::new(),
            inbox: VecDeque::new(),
        }
    }

    /// Queues one frame for reception.
    pub fn deliver(&mut self, frame_class: FrameClass, data: Vec<u8>) {
        self.inbox.push_back(ReceivedFrame { data, frame_class });
    }

    /// Moves every frame sent so far into the peer's inbox.
    pub fn pump_into(&mut self, peer: &mut SimShnf) {
        for (class, data) in self.sent.drain(..) {
            peer.inbox.push_back(ReceivedFrame {
                data,
                frame_class: class,
            });
        }
    }

    /// Drops everything sent so far and returns it.
    pub fn take_sent(&mut self) -> Vec<(FrameClass, Vec<u8>)> {
        std::mem::take(&mut self.sent)
    }
}

impl Shnf for SimShnf {
    fn init(&mut self, _instance: u8, _loopback_sadr: Sadr) -> Result<(), SafetyError> {
        Ok(())
    }

    fn get_tx_mem_block(
        &mut self,
        _instance: u8,
        length: usize,
        frame_class: FrameClass,
        _tx_spdo_num: u16,
    ) -> Option<Vec<u8>> {
        self.pending_class.push_back(frame_class);
        Some(vec![0u8; length])
    }

    fn mark_tx_mem_block(&mut self, _instance: u8, frame: Vec<u8>) -> Result<(), SafetyError> {
        let class = self
            .pending_class
            .pop_front()
            .ok_or(SafetyError::InternalError("mark without get"))?;
        self.sent.push((class, frame));
        Ok(())
    }

    fn get_epls_frame(&mut self) -> Option<ReceivedFrame> {
        self.inbox.front().cloned()
    }

    fn release_epls_frame(&mut self) {
        self.inbox.pop_front();
    }
}

/// Scripted SN application: records every callback and parks the
/// interlock requests for the test loop to answer.
pub struct ScriptedSnApp {
    pub param_processed: bool,
    pub chksum_requested: bool,
    pub conf_requested: bool,
    pub error_acks: Vec<(u8, u8)>,
    pub errors: Vec<(u16, u32)>,
}

impl ScriptedSnApp {
    pub fn new() -> Self {
        Self {
            param_processed: true,
            chksum_requested: false,
            conf_requested: false,
            error_acks: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl SnApplication for ScriptedSnApp {
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
        self.param_processed
    }

    fn signal_error(&mut self, _instance: u8, error: u16, add_info: u32) {
        self.errors.push((error, add_info));
    }
}

/// Scripted SCM application: records callbacks, answers the revision
/// check with a configurable verdict.
pub struct ScriptedScmApp {
    pub accept_revision: bool,
    pub status_changes: Vec<(u16, NodeStatus, NodeStatus)>,
    pub sn_fails: Vec<(u16, u8, u8, u16)>,
    pub udid_mismatches: Vec<(u16, Udid, u16)>,
}

impl ScriptedScmApp {
    pub fn new() -> Self {
        Self {
            accept_revision: true,
            status_changes: Vec::new(),
            sn_fails: Vec::new(),
            udid_mismatches: Vec::new(),
        }
    }
}

impl ScmApplication for ScriptedScmApp {
    fn sn_fail(&mut self, sadr: Sadr, err_group: u8, err_code: u8, handle: u16) {
        self.sn_fails.push((sadr.0, err_group, err_code, handle));
    }

    fn udid_mismatch(&mut self, sadr: Sadr, received_udid: Udid, handle: u16) {
        self.udid_mismatches.push((sadr.0, received_udid, handle));
    }

    fn node_status_changed(&mut self, sadr: Sadr, old: NodeStatus, new: NodeStatus) {
        self.status_changes.push((sadr.0, old, new));
    }

    fn revision_number(&mut self, _sadr: Sadr, expected: u32, received: u32) -> bool {
        self.accept_revision && expected == received
    }

    fn process_sn(&mut self, _sadr: Sadr) -> bool {
        true
    }
}

// --- Domain constants of the simulated network ---

pub const SDN: u16 = 1;
pub const SCM_SADR: u16 = 1;
pub const SN_SADR: u16 = 2;
pub const SCM_UDID: [u8; UDID_SIZE] = [0x00, 0x60, 0x65, 0x00, 0x00, 0x01];
pub const SN_UDID: [u8; UDID_SIZE] = [0x00, 0x60, 0x65, 0x00, 0x00, 0x02];
pub const PARAM_TIMESTAMP: u32 = 0x8899AABB;
pub const VENDOR_ID: u32 = 0x0060_0065;
pub const PRODUCT_CODE: u32 = 0x0001_0002;
pub const REVISION: u32 = 0x0003_0004;
pub const GUARD_TIME: u32 = 100;
pub const LIFE_FACTOR: u8 = 5;
pub const REFRESH_TIME: u32 = 50;

fn rw() -> SodAttr {
    SodAttr::RW
}

/// Builds the SOD of a plain Safety Node.
pub fn sn_sod(instance: u8, udid: [u8; UDID_SIZE]) -> Sod {
    let mut sod = Sod::new(instance);
    // Common communication parameters.
    sod.insert(
        IDX_COMMON_COM_PARAM,
        SUBIDX_SDN,
        SodEntry::new(SodValue::U16(SDN), rw()),
    );
    sod.insert(
        IDX_COMMON_COM_PARAM,
        SUBIDX_SADR_SCM,
        SodEntry::new(SodValue::U16(SCM_SADR), rw()),
    );
    sod.insert(
        IDX_COMMON_COM_PARAM,
        SUBIDX_CT_BASE,
        SodEntry::new(SodValue::U8(0), rw()),
    );
    sod.insert(
        IDX_COMMON_COM_PARAM,
        SUBIDX_UDID_SCM,
        SodEntry::new(SodValue::OctetString(vec![0; UDID_SIZE]), rw()),
    );
    // Physical address.
    sod.insert(
        IDX_UDID,
        0,
        SodEntry::new(SodValue::OctetString(udid.to_vec()), SodAttr::RO),
    );
    // Life guarding and refresh signalling.
    sod.insert(
        IDX_LIFE_GUARDING,
        SUBIDX_GUARD_TIME,
        SodEntry::new(SodValue::U32(GUARD_TIME), rw()),
    );
    sod.insert(
        IDX_LIFE_GUARDING,
        SUBIDX_LIFE_TIME_FACTOR,
        SodEntry::new(SodValue::U8(LIFE_FACTOR), rw()),
    );
    sod.insert(
        IDX_PRE_OP_SIGNAL,
        0,
        SodEntry::new(SodValue::U32(REFRESH_TIME), rw()),
    );
    sod.insert(
        IDX_PRE_OP_RETRIES,
        0,
        SodEntry::new(SodValue::U8(K_UNLIMITED_RETRIES), rw()),
    );
    // Device vendor information.
    sod.insert(
        IDX_DEVICE_VEN_ID,
        SUBIDX_VENDOR_ID,
        SodEntry::new(SodValue::U32(VENDOR_ID), SodAttr::RO),
    );
    sod.insert(
        IDX_DEVICE_VEN_ID,
        SUBIDX_PRODUCT_CODE,
        SodEntry::new(SodValue::U32(PRODUCT_CODE), SodAttr::RO),
    );
    sod.insert(
        IDX_DEVICE_VEN_ID,
        SUBIDX_REVISION_NUMBER,
        SodEntry::new(SodValue::U32(REVISION), SodAttr::RO),
    );
    sod.insert(
        IDX_DEVICE_VEN_ID,
        SUBIDX_SERIAL_NUMBER,
        SodEntry::new(SodValue::U32(0x0000_0001), SodAttr::RO),
    );
    sod.insert(
        IDX_DEVICE_VEN_ID,
        SUBIDX_FIRMWARE_CHKSUM,
        SodEntry::new(SodValue::U32(0xDEAD_F00D), SodAttr::RO),
    );
    let mut chksum = DomainData::new(4);
    chksum.actual_len = 4;
    chksum.data = vec![0; 4];
    sod.insert(
        IDX_DEVICE_VEN_ID,
        SUBIDX_PARAM_CHKSUM,
        SodEntry::new(SodValue::Domain(chksum), rw()),
    );
    sod.insert(
        IDX_DEVICE_VEN_ID,
        SUBIDX_PARAM_TIMESTAMP,
        SodEntry::new(
            SodValue::U32(PARAM_TIMESTAMP),
            SodAttr::RW.with(SodAttr::CRC),
        ),
    );
    // Parameter download target.
    sod.insert(
        IDX_PARAM_DOWNLOAD,
        0,
        SodEntry::new(SodValue::Domain(DomainData::new(64)), rw()),
    );
    // Main SADR slot (TxSPDO 1 communication parameters).
    sod.insert(
        IDX_TX_SPDO_COM_BASE,
        SUBIDX_TX_SADR,
        SodEntry::new(SodValue::U16(0), rw()),
    );
    sod.insert(
        IDX_TX_SPDO_COM_BASE,
        SUBIDX_TX_REFRESH_PRESCALE,
        SodEntry::new(SodValue::U16(1), rw()),
    );
    sod.insert(
        IDX_TX_SPDO_MAPP_BASE,
        0,
        SodEntry::new(SodValue::U8(0), rw()),
    );
    sod
}

/// Builds the SOD of the configuration manager, expecting one SN.
pub fn scm_sod(instance: u8, expected_sn_udid: [u8; UDID_SIZE], param_set: &[u8]) -> Sod {
    let mut sod = sn_sod(instance, SCM_UDID);
    // The SCM owns its address from the start.
    let acs = sod.attr_get(IDX_TX_SPDO_COM_BASE, SUBIDX_TX_SADR).unwrap();
    sod.write(&acs, &SCM_SADR.to_le_bytes(), true, 0).unwrap();
    // SSDO communication parameters.
    sod.insert(
        IDX_SSDO_COM_PARAM,
        SUBIDX_SSDO_TIMEOUT,
        SodEntry::new(SodValue::U32(500), rw()),
    );
    sod.insert(
        IDX_SSDO_COM_PARAM,
        SUBIDX_SSDO_RETRIES,
        SodEntry::new(SodValue::U8(3), rw()),
    );
    // SADR-DVI list, slot 0.
    sod.insert(
        IDX_SADR_DVI_BASE,
        SUBIDX_DVI_SADR,
        SodEntry::new(SodValue::U16(SN_SADR), rw()),
    );
    sod.insert(
        IDX_SADR_DVI_BASE,
        SUBIDX_DVI_VENDOR_ID,
        SodEntry::new(SodValue::U32(VENDOR_ID), rw()),
    );
    sod.insert(
        IDX_SADR_DVI_BASE,
        SUBIDX_DVI_PRODUCT_CODE,
        SodEntry::new(SodValue::U32(PRODUCT_CODE), rw()),
    );
    sod.insert(
        IDX_SADR_DVI_BASE,
        SUBIDX_DVI_REVISION_NUMBER,
        SodEntry::new(SodValue::U32(REVISION), rw()),
    );
    sod.insert(
        IDX_SADR_DVI_BASE,
        SUBIDX_DVI_NODE_STATUS,
        SodEntry::new(SodValue::U8(0), rw()),
    );
    sod.insert(
        IDX_SADR_DVI_BASE,
        SUBIDX_DVI_MAX_SSDO_PYLD,
        SodEntry::new(SodValue::U8(8), rw()),
    );
    sod.insert(
        IDX_SADR_DVI_BASE,
        SUBIDX_DVI_PARAM_TIMESTAMP,
        SodEntry::new(SodValue::U32(PARAM_TIMESTAMP), rw()),
    );
    let mut param_domain = DomainData::new(64);
    param_domain.actual_len = param_set.len();
    param_domain.data = param_set.to_vec();
    sod.insert(
        IDX_SADR_DVI_BASE,
        SUBIDX_DVI_PARAM_SET,
        SodEntry::new(SodValue::Domain(param_domain), rw()),
    );
    // SADR-UDID list, slot 0.
    sod.insert(
        IDX_SADR_UDID_BASE,
        SUBIDX_UDID_LIST_UDID,
        SodEntry::new(SodValue::OctetString(expected_sn_udid.to_vec()), rw()),
    );
    sod
}

/// Adds a process data object to an SOD.
pub fn add_process_object(sod: &mut Sod, index: u16, sub: u8, value: SodValue) {
    sod.insert(
        index,
        sub,
        SodEntry::new(value, SodAttr::RW.with(SodAttr::PDO_MAP)),
    );
}
