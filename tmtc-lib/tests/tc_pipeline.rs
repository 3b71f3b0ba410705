mod common;

use std::{
    io::Read,
    net::{TcpListener, UdpSocket},
    sync::Arc,
};

use hifitime::Epoch;
use rand::{Rng, SeedableRng};
use test_case::test_case;
use tmtc::{
    link::{build_link, LinkConfig, LinkContext, LinkHandle, LinkStatus, QUEUE_FULL},
    spacepacket::{sequence_count, SequenceCounters},
    tc::{
        AckStatus, AttrValue, CommandHistoryPublisher, CommandRouter, PostprocessorConfig, TcLink,
        ACK_SENT, ATTR_SEQCOUNT,
    },
    testing::{command, wait_for, HistoryEntry, HistoryRecorder, ManualClock, PacketRecorder},
    timecode::TimeService,
    tm::TmSink,
};

use common::{tc_packet, tm_packet};

fn context(history: &Arc<HistoryRecorder>) -> LinkContext {
    LinkContext::builder()
        .sink(Arc::new(PacketRecorder::default()) as Arc<dyn TmSink>)
        .history(history.clone() as Arc<dyn CommandHistoryPublisher>)
        .time_service(
            ManualClock::new(Epoch::from_gregorian_utc_at_midnight(2024, 6, 1))
                as Arc<dyn TimeService>,
        )
        .build()
}

fn tc_link(config: serde_json::Value, history: &Arc<HistoryRecorder>) -> LinkHandle {
    let config: LinkConfig = serde_json::from_value(config).unwrap();
    build_link(&config, &context(history)).unwrap()
}

#[test_case(7; "one byte")]
#[test_case(64; "typical")]
fn postprocessing_without_secondary_header(len: usize) {
    let history = Arc::new(HistoryRecorder::default());
    let pp = PostprocessorConfig::default()
        .build(
            "it",
            history.clone() as Arc<dyn CommandHistoryPublisher>,
            SequenceCounters::new(),
        )
        .unwrap();

    let binary = tc_packet(100, len);
    for seq in 0..3u16 {
        let out = pp.process(&command(seq.into(), binary.clone())).unwrap();
        assert_eq!(out.len(), binary.len());
        assert_eq!(sequence_count(&out), seq);
        assert_eq!(out[..2], binary[..2]);
        assert_eq!(out[4..], binary[4..]);
        assert_eq!(
            history.attr_for(seq.into(), ATTR_SEQCOUNT),
            Some(AttrValue::Int(seq.into()))
        );
    }
}

#[test]
fn tcp_link_delivers_finalized_commands() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let lengths: Vec<usize> = (0..5).map(|_| rng.gen_range(8..200)).collect();
    let expected: usize = lengths.iter().sum();

    let server = std::thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        let mut received = vec![0u8; expected];
        conn.read_exact(&mut received).unwrap();
        received
    });

    let history = Arc::new(HistoryRecorder::default());
    let handle = tc_link(
        serde_json::json!({"name": "tc", "type": "TCP_TC", "host": "127.0.0.1", "port": port}),
        &history,
    );
    let commands = handle.commands.clone().unwrap();
    let binaries: Vec<Vec<u8>> = lengths.iter().map(|&n| tc_packet(200, n)).collect();
    for (seq, binary) in binaries.iter().enumerate() {
        assert!(commands.send_command(command(seq as u32, binary.clone())));
    }

    let received = server.join().unwrap();
    let mut offset = 0;
    for (seq, binary) in binaries.iter().enumerate() {
        let sent = &received[offset..offset + binary.len()];
        offset += binary.len();
        assert_eq!(sequence_count(sent), seq as u16, "{}", hex::encode(sent));
        assert_eq!(sent[4..], binary[4..]);
    }

    for seq in 0..binaries.len() as u32 {
        wait_for(|| !history.acks_for(seq).is_empty());
        assert_eq!(history.acks_for(seq), vec![(AckStatus::Ok, None)]);
        assert_eq!(
            history.attr_for(seq, ATTR_SEQCOUNT),
            Some(AttrValue::Int(seq.into()))
        );
    }
    assert_eq!(handle.link.core().data_out_count(), 5);
}

#[test]
fn udp_link_sends_one_datagram_per_command() {
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = receiver.local_addr().unwrap().port();
    let history = Arc::new(HistoryRecorder::default());
    let handle = tc_link(
        serde_json::json!({"name": "tc", "type": "UDP_TC", "host": "127.0.0.1", "port": port}),
        &history,
    );

    let commands = handle.commands.clone().unwrap();
    assert!(commands.send_command(command(1, tc_packet(3, 12))));
    let mut buf = [0u8; 64];
    let n = receiver.recv(&mut buf).unwrap();
    assert_eq!(n, 12);
    assert_eq!(buf[4..12], tc_packet(3, 12)[4..]);
    wait_for(|| history.acks_for(1) == vec![(AckStatus::Ok, None)]);
}

#[test]
fn full_queue_fails_command() {
    let history = Arc::new(HistoryRecorder::default());
    let handle = tc_link(
        serde_json::json!({
            "name": "tc",
            "type": "TCP_TC",
            "host": "127.0.0.1",
            "port": 1,
            "initialDelay": 3_600_000,
            "tcQueueSize": 1,
        }),
        &history,
    );
    let commands = handle.commands.clone().unwrap();

    assert!(commands.send_command(command(1, tc_packet(1, 10))));
    assert!(commands.send_command(command(2, tc_packet(1, 10))));
    assert!(history.entries_for(1).is_empty());
    assert_eq!(
        history.acks_for(2),
        vec![(AckStatus::Nok, Some(QUEUE_FULL.to_string()))]
    );
    assert!(history
        .entries_for(2)
        .contains(&HistoryEntry::Failed {
            reason: QUEUE_FULL.to_string()
        }));

    handle.link.disable();
    assert_eq!(
        history.acks_for(1),
        vec![(AckStatus::Nok, Some("link disabled".to_string()))]
    );
}

#[test]
fn enable_and_disable_are_idempotent() {
    let history = Arc::new(HistoryRecorder::default());
    let handle = tc_link(
        serde_json::json!({
            "name": "tc",
            "type": "UDP_TC",
            "host": "127.0.0.1",
            "port": 1,
            "enabledAtStartup": false,
        }),
        &history,
    );
    let link = &handle.link;
    assert_eq!(link.status(), LinkStatus::Disabled);
    link.disable();
    assert_eq!(link.status(), LinkStatus::Disabled);

    link.enable().unwrap();
    link.enable().unwrap();
    assert_ne!(link.status(), LinkStatus::Disabled);
    link.disable();
    link.disable();
    assert_eq!(link.status(), LinkStatus::Disabled);
}

#[test]
fn router_fails_commands_without_link() {
    let history = Arc::new(HistoryRecorder::default());
    let handle = tc_link(
        serde_json::json!({
            "name": "tc",
            "type": "UDP_TC",
            "host": "127.0.0.1",
            "port": 1,
            "enabledAtStartup": false,
        }),
        &history,
    );
    let mut router = CommandRouter::new(
        history.clone() as Arc<dyn CommandHistoryPublisher>,
        ManualClock::new(Epoch::from_gregorian_utc_at_midnight(2024, 6, 1)) as Arc<dyn TimeService>,
    );
    router.add_link(handle.commands.clone().unwrap() as Arc<dyn TcLink>);

    assert!(!router.route(command(9, tc_packet(1, 10))));
    assert_eq!(
        history.entries_for(9),
        vec![
            HistoryEntry::Ack {
                name: ACK_SENT.to_string(),
                status: AckStatus::Nok,
                reason: Some(CommandRouter::NO_LINK_AVAILABLE.to_string()),
            },
            HistoryEntry::Failed {
                reason: CommandRouter::NO_LINK_AVAILABLE.to_string()
            },
        ]
    );
}

#[test]
fn reset_counters_action() {
    let history = Arc::new(HistoryRecorder::default());
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = receiver.local_addr().unwrap().port();
    let handle = tc_link(
        serde_json::json!({"name": "tc", "type": "UDP_TC", "host": "127.0.0.1", "port": port}),
        &history,
    );
    let commands = handle.commands.clone().unwrap();
    assert!(commands.send_command(command(1, tc_packet(3, 12))));
    wait_for(|| handle.link.core().data_out_count() == 1);

    handle
        .link
        .execute_action("reset-counters", &serde_json::Value::Null)
        .unwrap();
    assert_eq!(handle.link.core().data_out_count(), 0);
    assert!(handle
        .link
        .execute_action("no-such-action", &serde_json::Value::Null)
        .is_err());
}

#[test]
fn received_telemetry_does_not_advance_command_counts() {
    let history = Arc::new(HistoryRecorder::default());
    let sink = Arc::new(PacketRecorder::default());
    let shared = SequenceCounters::new();
    let ctx = LinkContext::builder()
        .sink(sink.clone() as Arc<dyn TmSink>)
        .history(history.clone() as Arc<dyn CommandHistoryPublisher>)
        .tc_counters(shared.clone())
        .build();

    let tm_port = UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let tm_config: LinkConfig = serde_json::from_value(serde_json::json!({
        "name": "tm", "type": "UDP_TM", "host": "127.0.0.1", "port": tm_port,
    }))
    .unwrap();
    let tm = build_link(&tm_config, &ctx).unwrap();
    wait_for(|| tm.link.status() == LinkStatus::Ok);

    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    let tc_port = receiver.local_addr().unwrap().port();
    let tc_config: LinkConfig = serde_json::from_value(serde_json::json!({
        "name": "tc", "type": "UDP_TC", "host": "127.0.0.1", "port": tc_port,
    }))
    .unwrap();
    let tc = build_link(&tc_config, &ctx).unwrap();

    // telemetry on the same APID as the command
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender
        .send_to(&tm_packet(100, 500, 0, 0), ("127.0.0.1", tm_port))
        .unwrap();
    wait_for(|| sink.len() == 1);
    assert_eq!(shared.get(100), None);

    let commands = tc.commands.clone().unwrap();
    assert!(commands.send_command(command(1, tc_packet(100, 12))));
    let mut buf = [0u8; 64];
    let n = receiver.recv(&mut buf).unwrap();
    assert_eq!(sequence_count(&buf[..n]), 0);
    wait_for(|| !history.acks_for(1).is_empty());
    assert_eq!(history.attr_for(1, ATTR_SEQCOUNT), Some(AttrValue::Int(0)));
    assert_eq!(shared.get(100), Some(0));

    tm.link.disable();
    tc.link.disable();
}
