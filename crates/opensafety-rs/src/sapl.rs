// crates/opensafety-rs/src/sapl.rs
//! Callback interfaces towards the safety application (SAPL).
//!
//! The stack never stores these trait objects; they are passed into each
//! entry point. None of the callbacks may call back into the stack: the
//! interlocked answers (parameter checksum, enter-operational confirmation,
//! operator and SN-fail acknowledges) are delivered through the dedicated
//! API calls on the owning instance after the callback has returned.

use crate::scm::NodeStatus;
use crate::types::{Sadr, Udid};

/// Application callbacks of a Safety Node.
pub trait SnApplication {
    /// The SCM requested the transition to OPERATIONAL; the application
    /// must calculate the parameter checksum and answer later via
    /// `pass_param_chk_sum_valid`.
    fn calc_param_chksum(&mut self, instance: u8);

    /// The transition to OPERATIONAL is ready for application
    /// confirmation; answer later via `enter_op_state`.
    fn switch_to_op_req(&mut self, instance: u8);

    /// The SCM acknowledged a previously reported SN failure.
    fn error_ack(&mut self, instance: u8, err_group: u8, err_code: u8);

    /// Asked while handling "SN set to OP" whether the parameter set
    /// downloaded by the SCM has been processed.
    fn parameter_set_processed(&mut self, instance: u8) -> bool;

    /// A stack error was recorded by the error reporter. FATAL class
    /// errors oblige the application to enter the fail-safe state.
    fn signal_error(&mut self, instance: u8, error: u16, add_info: u32);
}

/// Application callbacks of the Safety Configuration Manager.
pub trait ScmApplication {
    /// An SN answered a configuration step with SN FAIL. Acknowledge via
    /// `sn_fail_ack(handle, ...)`.
    fn sn_fail(&mut self, sadr: Sadr, err_group: u8, err_code: u8, handle: u16);

    /// A node at `sadr` reported a UDID different from the expected one.
    /// The operator resumes configuration via `operator_ack(handle)`.
    fn udid_mismatch(&mut self, sadr: Sadr, received_udid: Udid, handle: u16);

    /// Reported on every node status change.
    fn node_status_changed(&mut self, sadr: Sadr, old: NodeStatus, new: NodeStatus);

    /// Asked whether a received revision number should be accepted.
    fn revision_number(&mut self, sadr: Sadr, expected: u32, received: u32) -> bool;

    /// Asked before every configuration round whether the node may be
    /// processed at all.
    fn process_sn(&mut self, sadr: Sadr) -> bool;

    /// Supplies the initial value of the 40 bit extended CT during node
    /// initialization. Only consulted in extended CT mode.
    fn initial_ct_value(&mut self) -> u64 {
        0
    }
}
