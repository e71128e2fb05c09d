// crates/opensafety-rs/src/ssc.rs
//! SSC, the stack control unit.
//!
//! Classifies each received acyclic frame (SNMT/SSDO) by its id class
//! and direction and hands it to the responsible unit, then serializes
//! any prepared response into a transport memory block. Processing of a
//! request may span two invocations: a `Busy` return asks the caller to
//! re-invoke with no frame to continue. SPDO frames never pass through
//! here; the application feeds them to the SPDO engine directly.

use crate::frame::{codec, FrameClass, FrameData, FrameHeader};
use crate::log::my_warn;
use crate::sapl::SnApplication;
use crate::scm::Scm;
use crate::serr::{self, ErrorClass, ErrorType, Serr, UnitId, SERR_K_NO_ADD_INFO};
use crate::shnf::{self, Shnf};
use crate::snmtm::Snmtm;
use crate::snmts::{Snmts, SnmtsOutcome};
use crate::sod::Sod;
use crate::spdo::Spdo;
use crate::ssdo::{Ssdoc, Ssdos};
use alloc::vec::Vec;

const fn err_minor(local: u8) -> u16 {
    serr::build_error(ErrorType::NotFailSafe, ErrorClass::Minor, UnitId::Ssc, local)
}

pub const SSC_K_ERR_FRAME_INV: u16 = err_minor(0x01);
pub const SSC_K_ERR_NO_PENDING_FRAME: u16 = err_minor(0x02);
pub const SSC_K_ERR_NOT_SCM_CAPABLE: u16 = err_minor(0x03);
pub const SSC_K_ERR_TX_FAILED: u16 = err_minor(0x04);

/// Result of one `process_snmt_ssdo_frame` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// The frame is completely processed; a new frame may be passed.
    Ok,
    /// Processing continues; call again with no frame.
    Busy,
}

/// Per-instance dispatcher state: the three-phase mini FSM reduces to
/// the continuation frame parked between a `Busy` return and the
/// follow-up invocation.
#[derive(Debug, Default)]
pub struct Ssc {
    pending: Option<(FrameHeader, Vec<u8>)>,
}

impl Ssc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self) {
        self.pending = None;
    }

    /// Deserializes, dispatches and responds to one SNMT or SSDO frame.
    #[allow(clippy::too_many_arguments)]
    pub fn process_snmt_ssdo_frame(
        &mut self,
        instance: u8,
        sod: &mut Sod,
        snmts: &mut Snmts,
        ssdos: &mut Ssdos,
        spdo: &mut Spdo,
        mut scm_units: Option<(&mut Snmtm, &mut Ssdoc, &mut Scm)>,
        serr: &mut Serr,
        app: &mut dyn SnApplication,
        shnf: &mut dyn Shnf,
        ct: u32,
        rx_frame: Option<&[u8]>,
    ) -> ProcessResult {
        // --- DESERIALIZE ---
        let (hdr, payload) = match rx_frame {
            Some(bytes) => {
                // A new frame supersedes any parked continuation.
                self.pending = None;
                match codec::deserialize(bytes) {
                    Ok((hdr, payload)) => (hdr, payload.to_vec()),
                    Err(_) => {
                        // The frame is rejected; a corrupted frame is a
                        // MINOR condition, never a stack failure.
                        serr.set_error(instance, app, SSC_K_ERR_FRAME_INV, bytes.len() as u32);
                        return ProcessResult::Ok;
                    }
                }
            }
            None => match self.pending.take() {
                Some(parked) => parked,
                None => {
                    serr.set_error(
                        instance,
                        app,
                        SSC_K_ERR_NO_PENDING_FRAME,
                        SERR_K_NO_ADD_INFO,
                    );
                    return ProcessResult::Ok;
                }
            },
        };

        // --- REQ_PROC ---
        let response: Option<FrameData> = match (hdr.frame_type.class(), hdr.frame_type.is_response())
        {
            (FrameClass::Snmt, false) => {
                match snmts.process_request(sod, spdo, serr, app, ct, &hdr, &payload) {
                    SnmtsOutcome::Response(frame) => Some(frame),
                    SnmtsOutcome::Busy => {
                        self.pending = Some((hdr, payload));
                        return ProcessResult::Busy;
                    }
                    SnmtsOutcome::None => None,
                    SnmtsOutcome::ScmSetToStop => {
                        match scm_units.as_mut() {
                            Some((_, _, scm)) => scm.deactivate(),
                            None => serr.set_error(
                                instance,
                                app,
                                SSC_K_ERR_NOT_SCM_CAPABLE,
                                SERR_K_NO_ADD_INFO,
                            ),
                        }
                        None
                    }
                    SnmtsOutcome::ScmSetToOp => {
                        match scm_units.as_mut() {
                            Some((_, _, scm)) => {
                                scm.activate(sod);
                            }
                            None => serr.set_error(
                                instance,
                                app,
                                SSC_K_ERR_NOT_SCM_CAPABLE,
                                SERR_K_NO_ADD_INFO,
                            ),
                        }
                        None
                    }
                }
            }
            (FrameClass::Snmt, true) => {
                match scm_units.as_mut() {
                    Some((snmtm, _, _)) => snmtm.process_response(serr, app, &hdr, &payload),
                    None => serr.set_error(
                        instance,
                        app,
                        SSC_K_ERR_NOT_SCM_CAPABLE,
                        hdr.frame_type.id() as u32,
                    ),
                }
                None
            }
            (FrameClass::Ssdo | FrameClass::SsdoSlim, false) => {
                ssdos.process_request(sod, serr, app, &hdr, &payload)
            }
            (FrameClass::Ssdo | FrameClass::SsdoSlim, true) => {
                match scm_units.as_mut() {
                    Some((_, ssdoc, _)) => {
                        ssdoc.process_response(sod, serr, app, shnf, ct, &hdr, &payload)
                    }
                    None => serr.set_error(
                        instance,
                        app,
                        SSC_K_ERR_NOT_SCM_CAPABLE,
                        hdr.frame_type.id() as u32,
                    ),
                }
                None
            }
            (FrameClass::Spdo, _) => {
                serr.set_error(
                    instance,
                    app,
                    SSC_K_ERR_FRAME_INV,
                    hdr.frame_type.id() as u32,
                );
                None
            }
        };

        // --- SERIALIZE ---
        if let Some(frame) = response {
            if shnf::send_frame(shnf, instance, &frame.hdr, &frame.payload, 0).is_err() {
                my_warn!("[SSC] instance {}: response not transmitted", instance);
                serr.set_error(instance, app, SSC_K_ERR_TX_FAILED, SERR_K_NO_ADD_INFO);
            }
        }
        ProcessResult::Ok
    }
}
