// crates/opensafety-rs/src/snmt.rs
//! Definitions shared by the SNMT master and slave units: the extended
//! service command vocabulary and the SN failure classification.

use core::convert::TryFrom;

// --- Extended service request commands (data byte 0, even values) ---

pub const K_SN_SET_TO_PREOP: u8 = 0;
pub const K_SN_SET_TO_OP: u8 = 2;
pub const K_ASS_ADD_SADR: u8 = 4;
pub const K_SN_ACK: u8 = 6;
pub const K_SCM_GUARD_SN: u8 = 8;
pub const K_SCM_SET_TO_STOP: u8 = 10;
pub const K_SCM_SET_TO_OP: u8 = 12;
pub const K_ASS_UDID_SCM: u8 = 14;
pub const K_INITIALIZE_EXT_CT: u8 = 16;

// --- Extended service payload lengths ---

/// Command byte only.
pub const K_LEN_SERV_CMD: u8 = 1;
/// Parameter timestamp carried by "SN set to OP".
pub const K_LEN_TSTMP: u8 = 4;
/// Error group and error code of SN ACK / SN FAIL.
pub const K_LEN_ERR_GROUP_CODE: u8 = 2;
/// Additional SADR and TxSPDO number.
pub const K_LEN_SADR_SPDO: u8 = 4;
/// 40 bit initialization value of the extended CT.
pub const K_LEN_EXT_CT: u8 = 5;

/// Extended service responses (data byte 0, odd values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExtServResp {
    /// The SNMTS acknowledges the state transition into PRE-OPERATIONAL.
    SnStsPreop = 1,
    /// The SNMTS acknowledges the current state is OPERATIONAL.
    SnStsOp = 3,
    /// The SNMTS acknowledges the assignment of an additional SADR.
    AddSadrAssigned = 5,
    /// The SNMTS reports error information to the SNMTM.
    SnFail = 7,
    /// The SNMTS is waiting for the checksum or the confirmation of the
    /// application.
    SnStsBusy = 9,
    /// The SNMTS acknowledges the assignment of the UDID of the SCM.
    UdidScmAssigned = 15,
    /// The SNMTS acknowledges the initialization of the extended CT.
    ExtCtInitialized = 17,
}

impl TryFrom<u8> for ExtServResp {
    type Error = u8;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ExtServResp::SnStsPreop),
            3 => Ok(ExtServResp::SnStsOp),
            5 => Ok(ExtServResp::AddSadrAssigned),
            7 => Ok(ExtServResp::SnFail),
            9 => Ok(ExtServResp::SnStsBusy),
            15 => Ok(ExtServResp::UdidScmAssigned),
            17 => Ok(ExtServResp::ExtCtInitialized),
            other => Err(other),
        }
    }
}

// --- Fail error groups (SN FAIL / SN ACK) ---

/// Group device.
pub const K_FAIL_GRP_DVC: u8 = 0;
/// Group application.
pub const K_FAIL_GRP_APL: u8 = 1;
/// Group parameter.
pub const K_FAIL_GRP_PAR: u8 = 2;
/// Group vendor.
pub const K_FAIL_GRP_VDR: u8 = 3;
/// Group safety stack.
pub const K_FAIL_GRP_STK: u8 = 4;
/// Group additional parameters.
pub const K_FAIL_GRP_ADD: u8 = 5;

// --- Fail error codes ---

/// Default error.
pub const K_FAIL_ERR_DEFAULT: u8 = 0;
/// Calculated and received CRC checksum are not equal.
pub const K_FAIL_ERR_CRC_CHKSUM: u8 = 1;
/// RxSPDO mapping failed.
pub const K_FAIL_ERR_MAP_FAILED_RX: u8 = 2;
/// TxSPDO mapping failed.
pub const K_FAIL_ERR_MAP_FAILED_TX: u8 = 3;
/// Unexpected event in the SN state machine.
pub const K_FAIL_ERR_UNEXPECTED_FSM_EVENT: u8 = 4;
