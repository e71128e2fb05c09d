// crates/opensafety-rs/src/spdo/rx.rs
//! RxSPDO processing: time synchronization, temporal validation and
//! delivery into the mapped SOD objects.

use super::{mapping, Spdo};
use crate::frame::{codec, FrameClass, FrameType};
use crate::log::my_trace;
use crate::sapl::SnApplication;
use crate::serr::Serr;
use crate::sod::constants::{IDX_COMMON_COM_PARAM, SUBIDX_SDN};
use crate::sod::Sod;
use crate::types::ct_wire_newer;

pub(super) fn process(
    spdo: &mut Spdo,
    sod: &mut Sod,
    serr: &mut Serr,
    app: &mut dyn SnApplication,
    ct: u32,
    frame: &[u8],
) {
    if !spdo.is_active() {
        return;
    }
    let instance = spdo.instance();

    let (hdr, payload) = match codec::deserialize(frame) {
        Ok(parsed) => parsed,
        Err(_) => {
            serr.set_error(instance, app, super::SPDO_K_ERR_FRAME_INV, frame.len() as u32);
            return;
        }
    };
    if hdr.frame_type.class() != FrameClass::Spdo {
        serr.set_error(
            instance,
            app,
            super::SPDO_K_ERR_FRAME_INV,
            hdr.frame_type.id() as u32,
        );
        return;
    }
    let own_sdn = sod.read_u16(IDX_COMMON_COM_PARAM, SUBIDX_SDN).unwrap_or(0);
    if hdr.sdn != own_sdn {
        serr.set_error(instance, app, super::SPDO_K_ERR_SDN_INV, hdr.sdn as u32);
        return;
    }

    #[cfg(feature = "extended-ct")]
    let payload = if payload.is_empty() {
        payload
    } else {
        // Strip the multiplexed extra CT byte of the extended mode.
        &payload[1..]
    };

    // A time request addresses one of our TxSPDOs; the response is
    // piggybacked on its next transmission.
    if hdr.frame_type == FrameType::SpdoTimeRequest {
        if let Some(tx) = spdo.tx.iter_mut().find(|t| t.sadr == hdr.tadr) {
            tx.pending_tres = Some((hdr.adr, hdr.tr));
            my_trace!(
                "[SPDO] instance {}: time request tr {} from SADR {}",
                instance,
                hdr.tr,
                hdr.adr
            );
        }
    }

    let Some(rx) = spdo.rx.iter_mut().find(|r| r.sadr == hdr.adr) else {
        if hdr.frame_type != FrameType::SpdoTimeRequest {
            serr.set_error(
                instance,
                app,
                super::SPDO_K_ERR_UNKNOWN_PRODUCER,
                hdr.adr as u32,
            );
        }
        return;
    };

    // Time response: close the round trip and derive the CT offset.
    if hdr.frame_type == FrameType::SpdoTimeResponse {
        if !rx.treq_pending || hdr.tr != rx.tr_counter {
            serr.set_error(instance, app, super::SPDO_K_ERR_TR_MISMATCH, hdr.tr as u32);
            return;
        }
        rx.treq_pending = false;
        let round_trip = ct.wrapping_sub(rx.treq_sent_ct);
        if round_trip < rx.min_tsync_prop_delay || round_trip > rx.max_tsync_prop_delay {
            rx.synced = false;
            rx.conn_valid = false;
            serr.set_error(instance, app, super::SPDO_K_ERR_TSYNC_DELAY, round_trip);
            return;
        }
        rx.synced = true;
        rx.ct_offset = (ct as u16).wrapping_sub(hdr.ct);
        rx.next_treq_ct = ct.wrapping_add(rx.time_request_cycle);
        my_trace!(
            "[SPDO] instance {}: RxSPDO {} synchronized, round trip {}",
            instance,
            rx.num,
            round_trip
        );
    }

    // Payload delivery, common to all three SPDO frame kinds.
    if payload.len() != mapping::mapped_size(&rx.mapping) {
        serr.set_error(instance, app, super::SPDO_K_ERR_PYLD_LEN, payload.len() as u32);
        return;
    }
    if !rx.synced {
        // Without a propagation delay measurement the age of the data is
        // unknown; nothing is delivered.
        return;
    }
    if rx.any_accepted && !ct_wire_newer(hdr.ct, rx.last_ct) {
        serr.set_error(instance, app, super::SPDO_K_ERR_CT_NOT_NEWER, hdr.ct as u32);
        return;
    }
    let produced_at_local = hdr.ct.wrapping_add(rx.ct_offset);
    let age = (ct as u16).wrapping_sub(produced_at_local) as u32;
    if age < rx.min_spdo_prop_delay || age > rx.max_spdo_prop_delay {
        rx.conn_valid = false;
        serr.set_error(instance, app, super::SPDO_K_ERR_PROP_DELAY, age);
        return;
    }

    rx.last_ct = hdr.ct;
    rx.any_accepted = true;
    rx.sct_deadline = ct.wrapping_add(rx.sct);
    if !mapping::unpack(sod, &rx.mapping, payload) {
        serr.set_error(instance, app, super::SPDO_K_ERR_UNPACK, rx.num as u32);
        rx.conn_valid = false;
        return;
    }
    rx.conn_valid = true;
}
