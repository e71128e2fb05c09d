// crates/opensafety-rs/src/scm/fsm.rs
//! Per-node state of the configuration manager.

use crate::types::Udid;
use alloc::vec::Vec;

/// Safety Node status as kept in the SADR-DVI list (sub-index 5) and
/// reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeStatus {
    /// SN is missing.
    Missing = 0,
    /// SN is invalid at this SADR.
    Invalid = 1,
    /// SN responds to the wrong SADR.
    WrongSadr = 2,
    /// SN reports the wrong UDID.
    UdidMismatch = 3,
    /// SN has a wrong parameter set.
    WrongParam = 4,
    /// SN is missing additional parameters.
    WrongAddParam = 5,
    /// SN has an incompatible version.
    IncompVersion = 6,
    /// SN failed to initialize the extended CT.
    ErrInitCt = 7,
    /// SN configuration is valid.
    Valid = 128,
    /// SN is correctly configured and operational.
    Ok = 129,
}

/// Position of a node in the configuration walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScmStep {
    /// Request the UDID and compare it against the expectation.
    VerifyUdid,
    /// A UDID mismatch waits for the operator acknowledge.
    WfOperatorAck,
    /// Assign the logical address.
    AssignSadr,
    /// Announce the UDID of the SCM.
    AssignUdidScm,
    /// Initialize the 40 bit extended CT.
    #[cfg(feature = "extended-ct")]
    InitExtCt,
    /// Read and compare the vendor id (0x1018/0x01).
    VerifyVendor,
    /// Read and compare the product code (0x1018/0x02).
    VerifyProduct,
    /// Read the revision number (0x1018/0x03) and ask the application.
    VerifyRevision,
    /// Download the parameter set to 0x101A/0x00.
    DownloadParams,
    /// Read back the parameter timestamp (0x1018/0x07).
    VerifyParams,
    /// Drive the three-step "SN set to OP" handshake.
    SetToOp,
    /// A reported SN FAIL waits for the application acknowledge.
    WfSaplAck,
    /// Node guarding of the OPERATIONAL node.
    Guarding,
}

/// Everything the SCM holds about one configured Safety Node.
#[derive(Debug)]
pub struct SnRecord {
    /// Handle of this node: its slot in the pool and the registration
    /// number of its outstanding requests.
    pub handle: u16,
    pub sadr: u16,
    pub step: ScmStep,
    pub status: NodeStatus,
    /// A request is outstanding; events for this node are awaited.
    pub pending: bool,
    /// Next CT at which the node wants attention (guarding, retries).
    pub next_action_ct: u32,
    /// Guard the node on the next trigger regardless of the schedule.
    pub guard_now: bool,
    /// SN ACK parameters stored by `sn_fail_ack`, sent on the next
    /// trigger.
    pub pending_ack: Option<(u8, u8)>,

    // Expectations from the SADR-DVI and SADR-UDID lists.
    pub expected_udid: Udid,
    pub vendor_id: u32,
    pub product_code: u32,
    pub revision: u32,
    pub param_timestamp: u32,
    pub max_ssdo_len: usize,
    pub param_set: Vec<u8>,
}

impl SnRecord {
    /// First step after the operator or application resolved a stop
    /// condition: the whole verification starts over.
    pub fn restart_verification(&mut self) {
        self.step = ScmStep::VerifyUdid;
        self.pending = false;
        self.guard_now = false;
    }
}
