// crates/opensafety-rs/tests/guarding_spdo_test.rs
//! Guard-time expiration and the cyclic SPDO data path between two
//! operational Safety Nodes.

mod simulator;

use opensafety_rs::frame::{codec, frame_length, FrameClass, FrameHeader, FrameType};
use opensafety_rs::snmt;
use opensafety_rs::sod::constants::*;
use opensafety_rs::sod::{SodEntry, SodValue};
use opensafety_rs::spdo::SpdoMappingEntry;
use opensafety_rs::{ProcessResult, SafetyInstance, SnState, SodAttr};
use simulator::*;

/// Serializes one SNMT frame addressed to `sadr`.
fn snmt_frame(frame_type: FrameType, sadr: u16, payload: &[u8], ct: u32) -> Vec<u8> {
    let hdr = FrameHeader {
        frame_type,
        adr: sadr,
        sdn: SDN,
        le: payload.len() as u8,
        ct: ct as u16,
        tadr: SCM_SADR,
        tr: 0,
    };
    let mut frame = vec![0u8; frame_length(hdr.le, false)];
    codec::serialize(&hdr, payload, &mut frame).unwrap();
    frame
}

/// Feeds one frame, driving busy continuations to completion.
fn drive(
    instance: &mut SafetyInstance,
    shnf: &mut SimShnf,
    app: &mut ScriptedSnApp,
    ct: u32,
    frame: &[u8],
) {
    let mut result = instance.process_snmt_ssdo_frame(ct, Some(frame), shnf, app);
    while result == ProcessResult::Busy {
        result = instance.process_snmt_ssdo_frame(ct, None, shnf, app);
    }
}

/// Drives the SNMT handshake of one node up to OPERATIONAL, the way the
/// SCM would over the wire.
fn bring_to_operational(
    instance: &mut SafetyInstance,
    shnf: &mut SimShnf,
    app: &mut ScriptedSnApp,
    sadr: u16,
    udid: [u8; 6],
    ct: u32,
) {
    assert!(instance.perform_trans_pre_op(ct));
    drive(
        instance,
        shnf,
        app,
        ct,
        &snmt_frame(FrameType::SnmtSadrAssignRequest, sadr, &udid, ct),
    );

    let mut udid_scm = vec![snmt::K_ASS_UDID_SCM];
    udid_scm.extend_from_slice(&SCM_UDID);
    drive(
        instance,
        shnf,
        app,
        ct,
        &snmt_frame(FrameType::SnmtServiceRequest, sadr, &udid_scm, ct),
    );

    let mut set_to_op = vec![snmt::K_SN_SET_TO_OP];
    set_to_op.extend_from_slice(&PARAM_TIMESTAMP.to_le_bytes());
    let frame = snmt_frame(FrameType::SnmtServiceRequest, sadr, &set_to_op, ct);

    drive(instance, shnf, app, ct, &frame);
    assert!(app.chksum_requested);
    app.chksum_requested = false;
    assert!(instance.pass_param_chk_sum_valid(true));

    drive(instance, shnf, app, ct, &frame);
    assert!(app.conf_requested);
    app.conf_requested = false;
    assert!(instance.enter_op_state(true, 0, 0));

    drive(instance, shnf, app, ct, &frame);
    assert_eq!(instance.sn_state(), SnState::Operational);
    shnf.take_sent();
}

/// Producer node: TxSPDO 1 maps 0x6000/0x01.
fn producer_sod(instance: u8, prescale: u16) -> opensafety_rs::Sod {
    let mut sod = sn_sod(instance, SN_UDID);
    let acs = sod
        .attr_get(IDX_TX_SPDO_COM_BASE, SUBIDX_TX_REFRESH_PRESCALE)
        .unwrap();
    sod.write(&acs, &prescale.to_le_bytes(), true, 0).unwrap();
    let acs = sod.attr_get(IDX_TX_SPDO_MAPP_BASE, 0).unwrap();
    sod.write(&acs, &[1], true, 0).unwrap();
    sod.insert(
        IDX_TX_SPDO_MAPP_BASE,
        1,
        SodEntry::new(
            SodValue::U32(
                SpdoMappingEntry {
                    index: 0x6000,
                    sub: 1,
                    length_bits: 8,
                }
                .to_u32(),
            ),
            SodAttr::RW,
        ),
    );
    add_process_object(&mut sod, 0x6000, 1, SodValue::U8(0));
    sod
}

/// Consumer node: RxSPDO 1 consumes the producer into 0x6000/0x02 and
/// carries its time requests on TxSPDO 1 (which maps nothing).
fn consumer_sod(instance: u8, producer_sadr: u16, sct: u32) -> opensafety_rs::Sod {
    let mut sod = sn_sod(instance, [0x00, 0x60, 0x65, 0x00, 0x00, 0x03]);
    sod.insert(
        IDX_RX_SPDO_COM_BASE,
        SUBIDX_RX_SADR,
        SodEntry::new(SodValue::U16(producer_sadr), SodAttr::RW),
    );
    sod.insert(
        IDX_RX_SPDO_COM_BASE,
        SUBIDX_RX_SCT,
        SodEntry::new(SodValue::U32(sct), SodAttr::RW),
    );
    sod.insert(
        IDX_RX_SPDO_COM_BASE,
        SUBIDX_RX_MIN_TSYNC_PROP_DELAY,
        SodEntry::new(SodValue::U32(0), SodAttr::RW),
    );
    sod.insert(
        IDX_RX_SPDO_COM_BASE,
        SUBIDX_RX_MAX_TSYNC_PROP_DELAY,
        SodEntry::new(SodValue::U32(100), SodAttr::RW),
    );
    sod.insert(
        IDX_RX_SPDO_COM_BASE,
        SUBIDX_RX_MIN_SPDO_PROP_DELAY,
        SodEntry::new(SodValue::U32(0), SodAttr::RW),
    );
    sod.insert(
        IDX_RX_SPDO_COM_BASE,
        SUBIDX_RX_MAX_SPDO_PROP_DELAY,
        SodEntry::new(SodValue::U32(100), SodAttr::RW),
    );
    sod.insert(
        IDX_RX_SPDO_COM_BASE,
        SUBIDX_RX_TIME_REQUEST_CYCLE,
        SodEntry::new(SodValue::U32(1_000), SodAttr::RW),
    );
    sod.insert(
        IDX_RX_SPDO_COM_BASE,
        SUBIDX_RX_TX_SPDO_NO,
        SodEntry::new(SodValue::U16(1), SodAttr::RW),
    );
    sod.insert(IDX_RX_SPDO_MAPP_BASE, 0, SodEntry::new(SodValue::U8(1), SodAttr::RW));
    sod.insert(
        IDX_RX_SPDO_MAPP_BASE,
        1,
        SodEntry::new(
            SodValue::U32(
                SpdoMappingEntry {
                    index: 0x6000,
                    sub: 2,
                    length_bits: 8,
                }
                .to_u32(),
            ),
            SodAttr::RW,
        ),
    );
    add_process_object(&mut sod, 0x6000, 2, SodValue::U8(0));
    sod
}

/// Ferries every sent SPDO frame into the peer's SPDO engine.
fn ferry_spdos(
    from: &mut SimShnf,
    to: &mut SafetyInstance,
    to_app: &mut ScriptedSnApp,
    ct: u32,
) -> usize {
    let mut count = 0;
    for (class, frame) in from.take_sent() {
        if class == FrameClass::Spdo {
            to.process_rx_spdo(ct, &frame, to_app);
            count += 1;
        }
    }
    count
}

/// Runs the TReq/TRes synchronization between consumer and producer.
fn synchronize(
    producer: &mut SafetyInstance,
    producer_shnf: &mut SimShnf,
    producer_app: &mut ScriptedSnApp,
    consumer: &mut SafetyInstance,
    consumer_shnf: &mut SimShnf,
    consumer_app: &mut ScriptedSnApp,
    ct: u32,
) {
    let mut free_frames = 4u8;
    consumer.build_tx_spdo(ct, &mut free_frames, consumer_shnf, consumer_app);
    assert_eq!(ferry_spdos(consumer_shnf, producer, producer_app, ct + 1), 1);

    let mut free_frames = 4u8;
    producer.build_tx_spdo(ct + 2, &mut free_frames, producer_shnf, producer_app);
    assert_eq!(ferry_spdos(producer_shnf, consumer, consumer_app, ct + 3), 1);
}

#[test]
fn test_spdo_round_trip_delivers_process_data() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut producer = SafetyInstance::new(0, producer_sod(0, 1));
    let mut consumer = SafetyInstance::new(1, consumer_sod(1, SN_SADR, 500));
    let mut producer_shnf = SimShnf::new();
    let mut consumer_shnf = SimShnf::new();
    let mut producer_app = ScriptedSnApp::new();
    let mut consumer_app = ScriptedSnApp::new();

    bring_to_operational(
        &mut producer,
        &mut producer_shnf,
        &mut producer_app,
        SN_SADR,
        SN_UDID,
        0,
    );
    bring_to_operational(
        &mut consumer,
        &mut consumer_shnf,
        &mut consumer_app,
        3,
        [0x00, 0x60, 0x65, 0x00, 0x00, 0x03],
        0,
    );

    synchronize(
        &mut producer,
        &mut producer_shnf,
        &mut producer_app,
        &mut consumer,
        &mut consumer_shnf,
        &mut consumer_app,
        100,
    );
    assert!(consumer.get_rx_spdo_status(1, 104));

    // A changed process value crosses the wire within one build.
    let acs = producer.sod.attr_get(0x6000, 1).unwrap();
    producer.sod.write(&acs, &[0x42], true, 0).unwrap();
    assert!(producer.tx_data_changed(1));
    let mut free_frames = 4u8;
    producer.build_tx_spdo(110, &mut free_frames, &mut producer_shnf, &mut producer_app);
    assert_eq!(
        ferry_spdos(&mut producer_shnf, &mut consumer, &mut consumer_app, 111),
        1
    );
    assert_eq!(consumer.sod.read_u8(0x6000, 2), Some(0x42));
    assert!(consumer.get_rx_spdo_status(1, 111));

    // Without further SPDOs the Safety Control Time runs out.
    consumer.spdo_check_rx_timeout(111 + 501);
    assert!(!consumer.get_rx_spdo_status(1, 111 + 501));
}

#[test]
fn test_refresh_prescale_gates_transmissions() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut producer = SafetyInstance::new(0, producer_sod(0, 1_000));
    let mut shnf = SimShnf::new();
    let mut app = ScriptedSnApp::new();
    bring_to_operational(&mut producer, &mut shnf, &mut app, SN_SADR, SN_UDID, 0);

    let acs = producer.sod.attr_get(0x6000, 1).unwrap();
    producer.sod.write(&acs, &[0x55], true, 0).unwrap();

    // 999 build calls produce nothing.
    for call in 0..999u32 {
        let mut free_frames = 4u8;
        producer.build_tx_spdo(100 + call, &mut free_frames, &mut shnf, &mut app);
        assert!(shnf.sent.is_empty(), "frame sent early at call {}", call);
    }
    // The 1000th call emits exactly one frame with the mapped byte.
    let mut free_frames = 4u8;
    producer.build_tx_spdo(1_100, &mut free_frames, &mut shnf, &mut app);
    let sent = shnf.take_sent();
    assert_eq!(sent.len(), 1);
    let (hdr, payload) = codec::deserialize(&sent[0].1).unwrap();
    assert_eq!(hdr.frame_type, FrameType::SpdoDataOnly);
    assert_eq!(hdr.adr, SN_SADR);
    assert_eq!(payload, [0x55]);

    // The data-changed flag forces a transmission ahead of the prescale.
    assert!(producer.tx_data_changed(1));
    let mut free_frames = 4u8;
    producer.build_tx_spdo(1_101, &mut free_frames, &mut shnf, &mut app);
    assert_eq!(shnf.take_sent().len(), 1);
}

#[test]
fn test_late_time_response_invalidates_connection() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut producer = SafetyInstance::new(0, producer_sod(0, 1));
    let mut consumer = SafetyInstance::new(1, consumer_sod(1, SN_SADR, 500));
    let mut producer_shnf = SimShnf::new();
    let mut consumer_shnf = SimShnf::new();
    let mut producer_app = ScriptedSnApp::new();
    let mut consumer_app = ScriptedSnApp::new();

    bring_to_operational(
        &mut producer,
        &mut producer_shnf,
        &mut producer_app,
        SN_SADR,
        SN_UDID,
        0,
    );
    bring_to_operational(
        &mut consumer,
        &mut consumer_shnf,
        &mut consumer_app,
        3,
        [0x00, 0x60, 0x65, 0x00, 0x00, 0x03],
        0,
    );

    // The time response arrives after MaxTSyncPropDelay (100): dropped,
    // connection invalid.
    let mut free_frames = 4u8;
    consumer.build_tx_spdo(100, &mut free_frames, &mut consumer_shnf, &mut consumer_app);
    assert_eq!(
        ferry_spdos(&mut consumer_shnf, &mut producer, &mut producer_app, 101),
        1
    );
    let mut free_frames = 4u8;
    producer.build_tx_spdo(102, &mut free_frames, &mut producer_shnf, &mut producer_app);
    assert_eq!(
        ferry_spdos(&mut producer_shnf, &mut consumer, &mut consumer_app, 250),
        1
    );
    assert!(!consumer.get_rx_spdo_status(1, 251));
}

#[test]
fn test_guard_time_expiry_falls_back_to_pre_operational() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut node = SafetyInstance::new(0, producer_sod(0, 1));
    let mut shnf = SimShnf::new();
    let mut app = ScriptedSnApp::new();
    bring_to_operational(&mut node, &mut shnf, &mut app, SN_SADR, SN_UDID, 0);
    assert!(node.spdo.is_active());

    // LIFE_FACTOR guard intervals without a guarding request: the node
    // reverts to PRE-OPERATIONAL and tears the SPDO exchange down.
    let mut ct = 0u32;
    for _ in 0..=LIFE_FACTOR as u32 {
        ct += GUARD_TIME + 1;
        let mut free_frames = 4u8;
        node.snmts_timer_check(ct, &mut free_frames, &mut shnf, &mut app);
    }
    assert_eq!(node.sn_state(), SnState::PreOperational);
    assert!(!node.spdo.is_active());

    // After the refresh time the node pulses "reset guarding" at the
    // SCM: an unsolicited PRE-OPERATIONAL status response.
    shnf.take_sent();
    ct += REFRESH_TIME + 1;
    let mut free_frames = 4u8;
    node.snmts_timer_check(ct, &mut free_frames, &mut shnf, &mut app);
    let sent = shnf.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(free_frames, 3);
    let (hdr, payload) = codec::deserialize(&sent[0].1).unwrap();
    assert_eq!(hdr.frame_type, FrameType::SnmtServiceResponse);
    assert_eq!(payload, [1]); // SN status PRE-OPERATIONAL
    assert_eq!(hdr.adr, SN_SADR);
}
