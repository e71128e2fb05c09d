// crates/opensafety-rs/src/spdo/mod.rs
//! SPDO, the cyclic safety process data engine.
//!
//! Transmit SPDOs are rebuilt when their refresh prescale elapses or the
//! application flags changed data; time requests and responses piggyback
//! on them. Receive SPDOs are delivered into the mapped SOD objects only
//! after a successful time synchronization, a monotonic producer CT and a
//! propagation delay inside the configured window; the Safety Control
//! Time bounds the age of the last accepted SPDO.

pub mod mapping;
mod rx;
mod tx;

pub use mapping::SpdoMappingEntry;

use crate::log::my_debug;
use crate::sapl::SnApplication;
use crate::serr::{self, ErrorClass, ErrorType, Serr, UnitId};
use crate::shnf::Shnf;
use crate::snmt;
use crate::sod::constants::{
    IDX_RX_SPDO_COM_BASE, IDX_RX_SPDO_MAPP_BASE, IDX_TX_SPDO_COM_BASE, IDX_TX_SPDO_MAPP_BASE,
    SUBIDX_RX_MAX_SPDO_PROP_DELAY, SUBIDX_RX_MAX_TSYNC_PROP_DELAY, SUBIDX_RX_MIN_SPDO_PROP_DELAY,
    SUBIDX_RX_MIN_TSYNC_PROP_DELAY, SUBIDX_RX_SADR, SUBIDX_RX_SCT, SUBIDX_RX_TIME_REQUEST_CYCLE,
    SUBIDX_RX_TX_SPDO_NO, SUBIDX_TX_REFRESH_PRESCALE, SUBIDX_TX_SADR,
};
use crate::sod::Sod;
use crate::types::{ct_elapsed, SPDO_CFG_MAX_NO_RX_SPDO, SPDO_CFG_MAX_NO_TX_SPDO};
use alloc::vec::Vec;

const fn err_minor(local: u8) -> u16 {
    serr::build_error(ErrorType::NotFailSafe, ErrorClass::Minor, UnitId::Spdo, local)
}

// SERR codes of the SPDO unit.
pub const SPDO_K_ERR_FRAME_INV: u16 = err_minor(0x01);
pub const SPDO_K_ERR_SDN_INV: u16 = err_minor(0x02);
pub const SPDO_K_ERR_UNKNOWN_PRODUCER: u16 = err_minor(0x03);
pub const SPDO_K_ERR_PYLD_LEN: u16 = err_minor(0x04);
pub const SPDO_K_ERR_CT_NOT_NEWER: u16 = err_minor(0x05);
pub const SPDO_K_ERR_PROP_DELAY: u16 = err_minor(0x06);
pub const SPDO_K_ERR_TSYNC_DELAY: u16 = err_minor(0x07);
pub const SPDO_K_ERR_TR_MISMATCH: u16 = err_minor(0x08);
pub const SPDO_K_ERR_UNPACK: u16 = err_minor(0x09);

/// One configured transmit SPDO.
#[derive(Debug)]
pub(crate) struct TxSpdo {
    /// TxSPDO number, 1-based; number 1 carries the main SADR.
    pub num: u16,
    /// Source address the SPDO is produced under.
    pub sadr: u16,
    /// Number of build calls between two unforced transmissions.
    pub prescale: u16,
    pub counter: u16,
    pub data_changed: bool,
    /// A received time request awaiting its response `(requester, tr)`.
    pub pending_tres: Option<(u16, u8)>,
    pub mapping: Vec<SpdoMappingEntry>,
}

/// One configured receive SPDO.
#[derive(Debug)]
pub(crate) struct RxSpdo {
    pub num: u16,
    /// Producer address this SPDO is consumed from.
    pub sadr: u16,
    /// Safety Control Time: maximum age of the last accepted SPDO.
    pub sct: u32,
    pub min_tsync_prop_delay: u32,
    pub max_tsync_prop_delay: u32,
    pub min_spdo_prop_delay: u32,
    pub max_spdo_prop_delay: u32,
    pub time_request_cycle: u32,
    /// Number of the TxSPDO that carries our time requests.
    pub tx_spdo_no: u16,
    pub mapping: Vec<SpdoMappingEntry>,

    // Dynamic state.
    pub conn_valid: bool,
    pub any_accepted: bool,
    pub last_ct: u16,
    pub sct_deadline: u32,
    pub tr_counter: u8,
    pub treq_pending: bool,
    pub treq_sent_ct: u32,
    pub next_treq_ct: u32,
    pub synced: bool,
    /// Producer-to-local offset of the 16 bit wire CT.
    pub ct_offset: u16,
}

impl RxSpdo {
    /// Clears any outstanding time request whose answer stayed out
    /// longer than the maximum propagation delay; the connection is no
    /// longer trustworthy then.
    pub(crate) fn expire_treq(&mut self, ct: u32) {
        if self.treq_pending
            && ct_elapsed(ct, self.treq_sent_ct.wrapping_add(self.max_tsync_prop_delay))
        {
            self.treq_pending = false;
            self.synced = false;
            self.conn_valid = false;
        }
    }

    /// Whether a (new) time request is due.
    pub(crate) fn treq_due(&self, ct: u32) -> bool {
        if self.treq_pending {
            return false;
        }
        !self.synced || ct_elapsed(ct, self.next_treq_ct)
    }

    pub(crate) fn next_tr(&mut self) -> u8 {
        self.tr_counter = (self.tr_counter + 1) & 0x3F;
        self.tr_counter
    }
}

/// Per-instance state of the SPDO engine.
#[derive(Debug)]
pub struct Spdo {
    instance: u8,
    active: bool,
    pub(crate) tx: Vec<TxSpdo>,
    pub(crate) rx: Vec<RxSpdo>,
    #[cfg(feature = "extended-ct")]
    ext_ct: u64,
}

impl Spdo {
    pub fn new(instance: u8) -> Self {
        Self {
            instance,
            active: false,
            tx: Vec::new(),
            rx: Vec::new(),
            #[cfg(feature = "extended-ct")]
            ext_ct: 0,
        }
    }

    pub(crate) fn instance(&self) -> u8 {
        self.instance
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Builds the SPDO exchange from the SOD communication and mapping
    /// parameters; called on "SN set to OP". The error carries the
    /// SN FAIL `(group, code)` pair of the failed direction.
    pub fn activate(&mut self, sod: &Sod) -> Result<(), (u8, u8)> {
        self.deactivate();

        for slot in 0..SPDO_CFG_MAX_NO_TX_SPDO as u16 {
            let com_index = IDX_TX_SPDO_COM_BASE + slot;
            let sadr = match sod.read_u16(com_index, SUBIDX_TX_SADR) {
                Some(sadr) if sadr != 0 => sadr,
                _ => continue,
            };
            let mapping = mapping::read_mapping(
                sod,
                IDX_TX_SPDO_MAPP_BASE + slot,
                snmt::K_FAIL_ERR_MAP_FAILED_TX,
            )?;
            if mapping.is_empty() && slot > 0 {
                // Secondary TxSPDOs without a mapping are not configured.
                continue;
            }
            let prescale = sod
                .read_u16(com_index, SUBIDX_TX_REFRESH_PRESCALE)
                .unwrap_or(1);
            self.tx.push(TxSpdo {
                num: slot + 1,
                sadr,
                prescale,
                counter: 0,
                data_changed: false,
                pending_tres: None,
                mapping,
            });
        }

        for slot in 0..SPDO_CFG_MAX_NO_RX_SPDO as u16 {
            let com_index = IDX_RX_SPDO_COM_BASE + slot;
            let sadr = match sod.read_u16(com_index, SUBIDX_RX_SADR) {
                Some(sadr) if sadr != 0 => sadr,
                _ => continue,
            };
            let mapping = mapping::read_mapping(
                sod,
                IDX_RX_SPDO_MAPP_BASE + slot,
                snmt::K_FAIL_ERR_MAP_FAILED_RX,
            )?;
            let fail = (snmt::K_FAIL_GRP_STK, snmt::K_FAIL_ERR_MAP_FAILED_RX);
            let sct = sod.read_u32(com_index, SUBIDX_RX_SCT).ok_or(fail)?;
            self.rx.push(RxSpdo {
                num: slot + 1,
                sadr,
                sct,
                min_tsync_prop_delay: sod
                    .read_u32(com_index, SUBIDX_RX_MIN_TSYNC_PROP_DELAY)
                    .unwrap_or(0),
                max_tsync_prop_delay: sod
                    .read_u32(com_index, SUBIDX_RX_MAX_TSYNC_PROP_DELAY)
                    .ok_or(fail)?,
                min_spdo_prop_delay: sod
                    .read_u32(com_index, SUBIDX_RX_MIN_SPDO_PROP_DELAY)
                    .unwrap_or(0),
                max_spdo_prop_delay: sod
                    .read_u32(com_index, SUBIDX_RX_MAX_SPDO_PROP_DELAY)
                    .ok_or(fail)?,
                time_request_cycle: sod
                    .read_u32(com_index, SUBIDX_RX_TIME_REQUEST_CYCLE)
                    .unwrap_or(0),
                tx_spdo_no: sod
                    .read_u16(com_index, SUBIDX_RX_TX_SPDO_NO)
                    .unwrap_or(1),
                mapping,
                conn_valid: false,
                any_accepted: false,
                last_ct: 0,
                sct_deadline: 0,
                tr_counter: 0,
                treq_pending: false,
                treq_sent_ct: 0,
                next_treq_ct: 0,
                synced: false,
                ct_offset: 0,
            });
        }

        self.active = true;
        my_debug!(
            "[SPDO] instance {}: activated {} tx / {} rx SPDO(s)",
            self.instance,
            self.tx.len(),
            self.rx.len()
        );
        Ok(())
    }

    /// Tears the SPDO exchange down; every transition back to
    /// PRE-OPERATIONAL lands here.
    pub fn deactivate(&mut self) {
        self.tx.clear();
        self.rx.clear();
        self.active = false;
    }

    /// Flags the process data of a TxSPDO as changed, forcing a
    /// transmission on the next build call regardless of the prescale.
    pub fn tx_data_changed(&mut self, tx_spdo_num: u16) -> bool {
        match self.tx.iter_mut().find(|t| t.num == tx_spdo_num) {
            Some(tx) => {
                tx.data_changed = true;
                true
            }
            None => false,
        }
    }

    /// Builds and hands every due TxSPDO to the transport.
    pub fn build_tx_spdo(
        &mut self,
        sod: &mut Sod,
        serr: &mut Serr,
        app: &mut dyn SnApplication,
        shnf: &mut dyn Shnf,
        ct: u32,
        free_frames: &mut u8,
    ) {
        tx::build_all(self, sod, serr, app, shnf, ct, free_frames, None);
    }

    /// Builds a single TxSPDO, for applications that interleave the
    /// build calls with their control loop.
    #[allow(clippy::too_many_arguments)]
    pub fn build_tx_spdo_ix(
        &mut self,
        sod: &mut Sod,
        serr: &mut Serr,
        app: &mut dyn SnApplication,
        shnf: &mut dyn Shnf,
        ct: u32,
        tx_spdo_num: u16,
        free_frames: &mut u8,
    ) {
        tx::build_all(self, sod, serr, app, shnf, ct, free_frames, Some(tx_spdo_num));
    }

    /// Processes one received SPDO frame.
    pub fn process_rx_spdo(
        &mut self,
        sod: &mut Sod,
        serr: &mut Serr,
        app: &mut dyn SnApplication,
        ct: u32,
        frame: &[u8],
    ) {
        rx::process(self, sod, serr, app, ct, frame);
    }

    /// Sweeps the Safety Control Time of every RxSPDO; an elapsed SCT
    /// invalidates the connection.
    pub fn check_rx_timeout(&mut self, ct: u32) {
        for rx in &mut self.rx {
            if rx.conn_valid && ct_elapsed(ct, rx.sct_deadline) {
                my_debug!(
                    "[SPDO] instance {}: SCT elapsed for RxSPDO {}",
                    self.instance,
                    rx.num
                );
                rx.conn_valid = false;
            }
        }
    }

    /// Returns whether the data of an RxSPDO is currently trustworthy.
    pub fn get_rx_spdo_status(&self, rx_spdo_num: u16, ct: u32) -> bool {
        self.rx
            .iter()
            .find(|r| r.num == rx_spdo_num)
            .map(|r| r.conn_valid && !ct_elapsed(ct, r.sct_deadline))
            .unwrap_or(false)
    }

    /// Stores the 40 bit initialization value received via the SNMT
    /// "initialize extended CT" service.
    #[cfg(feature = "extended-ct")]
    pub fn init_ext_ct(&mut self, init: u64) {
        self.ext_ct = init & 0x00FF_FFFF_FFFF;
    }

    /// Inflates the 32 bit application CT into the running 40 bit value.
    #[cfg(feature = "extended-ct")]
    pub fn update_ext_ct_value(&mut self, ct: u32) {
        let low = self.ext_ct as u32;
        if ct < low {
            // 32 bit wrap of the application counter.
            self.ext_ct = self.ext_ct.wrapping_add(1 << 32) & 0x00FF_FFFF_FFFF;
        }
        self.ext_ct = (self.ext_ct & 0x00FF_0000_0000) | ct as u64;
    }

    /// The multiplexed extra CT byte of the extended mode.
    #[cfg(feature = "extended-ct")]
    pub(crate) fn ext_ct_byte(&self) -> u8 {
        ((self.ext_ct >> 16) & 0xFF) as u8
    }
}
