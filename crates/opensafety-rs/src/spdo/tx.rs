// crates/opensafety-rs/src/spdo/tx.rs
//! TxSPDO build path.

use super::mapping;
use super::Spdo;
use crate::frame::{FrameHeader, FrameType};
use crate::log::{my_trace, my_warn};
use crate::sapl::SnApplication;
use crate::serr::Serr;
use crate::shnf::{self, Shnf};
use crate::sod::constants::{IDX_COMMON_COM_PARAM, SUBIDX_SDN};
use crate::sod::Sod;

/// Walks every TxSPDO and transmits the due ones, bounded by the
/// caller's free frame budget. `only` restricts the walk to a single
/// TxSPDO number.
pub(super) fn build_all(
    spdo: &mut Spdo,
    sod: &mut Sod,
    serr: &mut Serr,
    app: &mut dyn SnApplication,
    shnf: &mut dyn Shnf,
    ct: u32,
    free_frames: &mut u8,
    only: Option<u16>,
) {
    if !spdo.is_active() {
        return;
    }
    let instance = spdo.instance();
    let sdn = sod.read_u16(IDX_COMMON_COM_PARAM, SUBIDX_SDN).unwrap_or(0);

    #[cfg(feature = "extended-ct")]
    spdo.update_ext_ct_value(ct);
    #[cfg(feature = "extended-ct")]
    let ext_ct_byte = spdo.ext_ct_byte();

    let Spdo { tx, rx, .. } = spdo;
    for tx_spdo in tx.iter_mut() {
        if only.is_some_and(|num| num != tx_spdo.num) {
            continue;
        }
        if *free_frames == 0 {
            return;
        }

        // Outstanding time requests that ran past the allowed window are
        // abandoned before scheduling new ones.
        for rx_spdo in rx.iter_mut() {
            rx_spdo.expire_treq(ct);
        }

        let duty_tres = tx_spdo.pending_tres.is_some();
        let treq_rx = rx
            .iter_mut()
            .find(|r| r.tx_spdo_no == tx_spdo.num && r.treq_due(ct));

        tx_spdo.counter = tx_spdo.counter.saturating_add(1);
        let prescale_due = tx_spdo.prescale != 0 && tx_spdo.counter >= tx_spdo.prescale;
        if !(prescale_due || tx_spdo.data_changed || duty_tres || treq_rx.is_some()) {
            continue;
        }

        let Some(data) = mapping::pack(sod, &tx_spdo.mapping) else {
            serr.set_error(
                instance,
                app,
                super::SPDO_K_ERR_UNPACK,
                tx_spdo.num as u32,
            );
            continue;
        };
        #[cfg(feature = "extended-ct")]
        let payload = {
            let mut payload = alloc::vec::Vec::with_capacity(data.len() + 1);
            payload.push(ext_ct_byte);
            payload.extend_from_slice(&data);
            payload
        };
        #[cfg(not(feature = "extended-ct"))]
        let payload = data;

        // A pending time response outranks a new time request.
        let (frame_type, tadr, tr) = if let Some((requester, tr)) = tx_spdo.pending_tres.take() {
            (FrameType::SpdoTimeResponse, requester, tr)
        } else if let Some(rx_spdo) = treq_rx {
            let tr = rx_spdo.next_tr();
            rx_spdo.treq_pending = true;
            rx_spdo.treq_sent_ct = ct;
            (FrameType::SpdoTimeRequest, rx_spdo.sadr, tr)
        } else {
            (FrameType::SpdoDataOnly, 0, 0)
        };

        let hdr = FrameHeader {
            frame_type,
            adr: tx_spdo.sadr,
            sdn,
            le: payload.len() as u8,
            ct: ct as u16,
            tadr,
            tr,
        };
        match shnf::send_frame(shnf, instance, &hdr, &payload, tx_spdo.num) {
            Ok(()) => {
                my_trace!(
                    "[SPDO] instance {}: TxSPDO {} sent as {:?} at ct {}",
                    instance,
                    tx_spdo.num,
                    frame_type,
                    ct
                );
                tx_spdo.counter = 0;
                tx_spdo.data_changed = false;
                *free_frames -= 1;
            }
            Err(_) => {
                my_warn!(
                    "[SPDO] instance {}: no tx memory block for TxSPDO {}",
                    instance,
                    tx_spdo.num
                );
                return;
            }
        }
    }
}
