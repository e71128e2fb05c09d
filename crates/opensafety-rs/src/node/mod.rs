// crates/opensafety-rs/src/node/mod.rs
//! The per-instance container tying the units together.
//!
//! One `SafetyInstance` is one safety domain membership: it owns the
//! SOD, the SN-side units and (on the configuring node) the SCM-side
//! units. All entry points are driven by the application with an
//! explicit consecutive time; the stack never reads a clock.

use crate::sapl::{ScmApplication, SnApplication};
use crate::scm::{NodeStatus, Scm};
use crate::serr::Serr;
use crate::shnf::Shnf;
use crate::snmtm::Snmtm;
use crate::snmts::{SnState, Snmts};
use crate::sod::Sod;
use crate::spdo::Spdo;
use crate::ssc::{ProcessResult, Ssc};
use crate::ssdo::{Ssdoc, Ssdos};

/// The master-side units of an SCM-capable instance.
#[derive(Debug)]
pub struct ScmNode {
    pub snmtm: Snmtm,
    pub ssdoc: Ssdoc,
    pub scm: Scm,
}

/// One stack instance.
#[derive(Debug)]
pub struct SafetyInstance {
    instance: u8,
    pub sod: Sod,
    pub serr: Serr,
    pub snmts: Snmts,
    pub ssdos: Ssdos,
    pub spdo: Spdo,
    ssc: Ssc,
    scm_node: Option<ScmNode>,
}

impl SafetyInstance {
    /// Creates a plain Safety Node instance over an application-built
    /// SOD.
    pub fn new(instance: u8, sod: Sod) -> Self {
        Self {
            instance,
            sod,
            serr: Serr::new(),
            snmts: Snmts::new(instance),
            ssdos: Ssdos::new(instance),
            spdo: Spdo::new(instance),
            ssc: Ssc::new(),
            scm_node: None,
        }
    }

    /// Creates an SCM-capable instance (a Safety Node that additionally
    /// runs the configuration manager).
    pub fn new_scm(instance: u8, sod: Sod) -> Self {
        let mut this = Self::new(instance, sod);
        this.scm_node = Some(ScmNode {
            snmtm: Snmtm::new(instance),
            ssdoc: Ssdoc::new(instance),
            scm: Scm::new(instance),
        });
        this
    }

    pub fn instance_num(&self) -> u8 {
        self.instance
    }

    pub fn is_scm_capable(&self) -> bool {
        self.scm_node.is_some()
    }

    /// Resets every unit of the instance; the analogue of the one-time
    /// stack initialization.
    pub fn init_all(&mut self) {
        self.serr = Serr::new();
        self.snmts.init();
        self.ssdos.init();
        self.spdo.deactivate();
        self.ssc.init();
        if let Some(scm_node) = &mut self.scm_node {
            scm_node.snmtm.init();
            scm_node.ssdoc.init();
            scm_node.scm.deactivate();
        }
    }

    // --- SN lifecycle API ---

    pub fn sn_state(&self) -> SnState {
        self.snmts.get_sn_state()
    }

    /// Moves the SN into PRE-OPERATIONAL; must be called once after
    /// initialization (and may be called again from OPERATIONAL).
    pub fn perform_trans_pre_op(&mut self, ct: u32) -> bool {
        self.snmts
            .perform_trans_pre_op(&mut self.sod, &mut self.spdo, ct)
    }

    /// Hands the application's parameter checksum verdict to the SNMTS.
    pub fn pass_param_chk_sum_valid(&mut self, valid: bool) -> bool {
        self.snmts.pass_param_chk_sum_valid(valid)
    }

    /// Hands the application's enter-OPERATIONAL verdict to the SNMTS.
    pub fn enter_op_state(&mut self, enter_op: bool, err_group: u8, err_code: u8) -> bool {
        self.snmts.enter_op_state(enter_op, err_group, err_code)
    }

    /// Checks the guarding and refresh timers.
    pub fn snmts_timer_check(
        &mut self,
        ct: u32,
        free_frames: &mut u8,
        shnf: &mut dyn Shnf,
        app: &mut dyn SnApplication,
    ) {
        self.snmts.timer_check(
            &mut self.sod,
            &mut self.spdo,
            &mut self.serr,
            app,
            shnf,
            ct,
            free_frames,
        );
    }

    // --- Acyclic frame path ---

    /// Processes one received SNMT/SSDO frame (or continues a busy one
    /// when `rx_frame` is `None`).
    pub fn process_snmt_ssdo_frame(
        &mut self,
        ct: u32,
        rx_frame: Option<&[u8]>,
        shnf: &mut dyn Shnf,
        app: &mut dyn SnApplication,
    ) -> ProcessResult {
        let scm_units = self
            .scm_node
            .as_mut()
            .map(|s| (&mut s.snmtm, &mut s.ssdoc, &mut s.scm));
        self.ssc.process_snmt_ssdo_frame(
            self.instance,
            &mut self.sod,
            &mut self.snmts,
            &mut self.ssdos,
            &mut self.spdo,
            scm_units,
            &mut self.serr,
            app,
            shnf,
            ct,
            rx_frame,
        )
    }

    /// Drains the transport's inbound queue, routing SPDO frames to the
    /// SPDO engine and everything else through the dispatcher.
    pub fn process_inbound(&mut self, ct: u32, shnf: &mut dyn Shnf, app: &mut dyn SnApplication) {
        while let Some(received) = shnf.get_epls_frame() {
            match received.frame_class {
                crate::frame::FrameClass::Spdo => {
                    self.process_rx_spdo(ct, &received.data, app);
                }
                _ => {
                    let mut result =
                        self.process_snmt_ssdo_frame(ct, Some(&received.data), shnf, app);
                    // A busy request finishes within a bounded number of
                    // continuations; no time advance is required.
                    let mut continuations = 0;
                    while result == ProcessResult::Busy && continuations < 4 {
                        result = self.process_snmt_ssdo_frame(ct, None, shnf, app);
                        continuations += 1;
                    }
                }
            }
            shnf.release_epls_frame();
        }
    }

    // --- Cyclic data path ---

    pub fn build_tx_spdo(
        &mut self,
        ct: u32,
        free_frames: &mut u8,
        shnf: &mut dyn Shnf,
        app: &mut dyn SnApplication,
    ) {
        self.spdo
            .build_tx_spdo(&mut self.sod, &mut self.serr, app, shnf, ct, free_frames);
    }

    pub fn process_rx_spdo(&mut self, ct: u32, frame: &[u8], app: &mut dyn SnApplication) {
        self.spdo
            .process_rx_spdo(&mut self.sod, &mut self.serr, app, ct, frame);
    }

    pub fn spdo_check_rx_timeout(&mut self, ct: u32) {
        self.spdo.check_rx_timeout(ct);
    }

    pub fn get_rx_spdo_status(&self, rx_spdo_num: u16, ct: u32) -> bool {
        self.spdo.get_rx_spdo_status(rx_spdo_num, ct)
    }

    pub fn tx_data_changed(&mut self, tx_spdo_num: u16) -> bool {
        self.spdo.tx_data_changed(tx_spdo_num)
    }

    // --- SCM API (SCM-capable instances only) ---

    /// Activates the configuration manager and the node guarding.
    pub fn scm_activate(&mut self) -> bool {
        match &mut self.scm_node {
            Some(scm_node) => scm_node.scm.activate(&self.sod),
            None => false,
        }
    }

    /// Deactivates the configuration manager.
    pub fn scm_deactivate(&mut self) {
        if let Some(scm_node) = &mut self.scm_node {
            scm_node.scm.deactivate();
        }
    }

    /// Advances the node configuration and guarding FSMs.
    pub fn scm_trigger(
        &mut self,
        ct: u32,
        free_frames: &mut u8,
        shnf: &mut dyn Shnf,
        sn_app: &mut dyn SnApplication,
        scm_app: &mut dyn ScmApplication,
    ) {
        if let Some(scm_node) = &mut self.scm_node {
            scm_node.scm.trigger(
                &mut self.sod,
                &mut scm_node.snmtm,
                &mut scm_node.ssdoc,
                &mut self.serr,
                sn_app,
                scm_app,
                shnf,
                ct,
                free_frames,
            );
        }
    }

    /// Operator acknowledge of a UDID mismatch.
    pub fn scm_operator_ack(&mut self, handle: u16) -> bool {
        self.scm_node
            .as_mut()
            .map(|s| s.scm.operator_ack(handle))
            .unwrap_or(false)
    }

    /// Application acknowledge of a reported SN FAIL.
    pub fn scm_sn_fail_ack(&mut self, handle: u16, err_group: u8, err_code: u8) -> bool {
        self.scm_node
            .as_mut()
            .map(|s| s.scm.sn_fail_ack(handle, err_group, err_code))
            .unwrap_or(false)
    }

    /// Restarts the node guarding.
    pub fn scm_reset_node_guarding(&mut self) {
        if let Some(scm_node) = &mut self.scm_node {
            scm_node.scm.reset_node_guarding();
        }
    }

    /// Current status of a configured node.
    pub fn scm_node_status(&self, sadr: u16) -> Option<NodeStatus> {
        self.scm_node
            .as_ref()
            .and_then(|s| s.scm.node_status(sadr))
    }
}
