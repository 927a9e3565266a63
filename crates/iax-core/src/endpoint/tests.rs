use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use super::*;
use crate::auth;
use crate::channel::ChannelEvent;
use crate::config::UserConfig;
use crate::frame::{format, parse_header, FullHeader, IaxParams, MiniHeader, ParsedHeader};

const REMOTE_CALL: u16 = 7;

fn remote() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4570))
}

fn engine_with(users: Vec<UserConfig>) -> Arc<Engine> {
    let mut config = IaxConfig::default();
    config.users = users;
    Engine::new(config)
}

fn guest() -> UserConfig {
    UserConfig {
        name: "guest".to_string(),
        ..UserConfig::default()
    }
}

fn full(dst: u16, ts: u32, seqno: u16, frame_type: FrameType, subclass: u32, payload: &[u8]) -> Bytes {
    FullHeader {
        src_call: REMOTE_CALL,
        dst_call: dst,
        timestamp: ts,
        seqno,
        frame_type: frame_type.as_u8(),
        subclass,
    }
    .to_datagram(payload)
}

fn command(dst: u16, ts: u32, seqno: u16, command: IaxCommand, payload: &[u8]) -> Bytes {
    full(dst, ts, seqno, FrameType::Iax, command.subclass(), payload)
}

fn new_call(params: IaxParams) -> Bytes {
    command(0, 0, 0, IaxCommand::New, &params.encode())
}

/// Drain the engine and return every datagram it wants sent
fn sent(engine: &Engine, now: Instant) -> Vec<(ParsedHeader, Bytes)> {
    engine.drain(now);
    engine
        .take_outbox()
        .into_iter()
        .map(|d| {
            let header = parse_header(&d.data).unwrap();
            let payload = d.data.slice(header.payload_offset..);
            (header, payload)
        })
        .collect()
}

fn commands(frames: &[(ParsedHeader, Bytes)]) -> Vec<IaxCommand> {
    frames
        .iter()
        .filter(|(h, _)| h.is_full && h.frame_type == FrameType::Iax.as_u8())
        .filter_map(|(h, _)| IaxCommand::from_subclass(h.subclass))
        .collect()
}

/// Accept an unauthenticated inbound call and return its channel
fn inbound_call(engine: &Arc<Engine>, now: Instant) -> IaxChannel {
    let params = IaxParams::new()
        .with("exten", "100")
        .with("formats", format::ULAW)
        .with("version", 1);
    engine.handle_datagram(&new_call(params), remote(), now);
    sent(engine, now);
    engine.take_incoming().pop().unwrap()
}

fn outbound_target() -> CallTarget {
    CallTarget {
        addr: remote(),
        peer: None,
        username: String::new(),
        secret: String::new(),
        exten: "100".to_string(),
        context: String::new(),
        callerid: String::new(),
        capability: format::ULAW | format::GSM,
        format: format::ULAW,
    }
}

#[test]
fn test_new_without_secret_is_accepted() {
    let engine = engine_with(vec![guest()]);
    let t0 = Instant::now();
    let params = IaxParams::new()
        .with("exten", "100")
        .with("callerid", "Alice <200>")
        .with("formats", format::ULAW)
        .with("version", 1);
    engine.handle_datagram(&new_call(params), remote(), t0);

    let out = sent(&engine, t0);
    assert_eq!(commands(&out), vec![IaxCommand::Ack, IaxCommand::Accept]);
    let (accept, payload) = &out[1];
    assert_eq!(accept.dst_call, REMOTE_CALL);
    assert_eq!(IaxParams::parse(payload).get_u32("formats"), Some(format::ULAW));

    let channel = engine.take_incoming().pop().unwrap();
    assert_eq!(channel.state(), ChannelState::Ringing);
    assert_eq!(channel.format(), format::ULAW);
    assert_eq!(channel.info().exten, "100");
    assert_eq!(channel.info().callerid, "Alice <200>");
    assert_eq!(channel.info().context, "default");
    assert_eq!(engine.call_state(channel.call()), Some(CallState::Started));
}

#[test]
fn test_new_without_matching_user_is_rejected() {
    let engine = engine_with(vec![]);
    let t0 = Instant::now();
    engine.handle_datagram(&new_call(IaxParams::new().with("formats", 4)), remote(), t0);

    let out = sent(&engine, t0);
    assert_eq!(commands(&out), vec![IaxCommand::Ack, IaxCommand::Reject]);
    assert_eq!(&out[1].1[..], b"No authority found");
    assert!(engine.take_incoming().is_empty());
}

#[test]
fn test_new_with_no_common_codec_is_rejected() {
    let engine = engine_with(vec![guest()]);
    let t0 = Instant::now();
    let params = IaxParams::new()
        .with("formats", 1 << 16)
        .with("capability", 1 << 16);
    engine.handle_datagram(&new_call(params), remote(), t0);

    let out = sent(&engine, t0);
    assert_eq!(commands(&out), vec![IaxCommand::Ack, IaxCommand::Reject]);
    assert_eq!(&out[1].1[..], b"Unable to negotiate codec");
}

#[test]
fn test_md5_challenge_and_reply() {
    let user = UserConfig {
        name: "alice".to_string(),
        secret: "s3cret".to_string(),
        auth: "md5".to_string(),
        ..UserConfig::default()
    };
    let engine = engine_with(vec![user]);
    let t0 = Instant::now();
    let params = IaxParams::new()
        .with("exten", "100")
        .with("username", "alice")
        .with("formats", format::GSM);
    engine.handle_datagram(&new_call(params), remote(), t0);

    let out = sent(&engine, t0);
    assert_eq!(commands(&out), vec![IaxCommand::Ack, IaxCommand::AuthReq]);
    let request = IaxParams::parse(&out[1].1);
    assert_eq!(request.get("methods"), Some("md5"));
    assert_eq!(request.get("username"), Some("alice"));
    let challenge = request.get("challenge").unwrap().to_string();
    assert!(challenge.parse::<u32>().is_ok());
    let callno = out[1].0.src_call;

    let reply = IaxParams::new().with("md5secret", auth::md5_digest(&challenge, "s3cret"));
    engine.handle_datagram(
        &command(callno, 10, 1, IaxCommand::AuthRep, &reply.encode()),
        remote(),
        t0 + Duration::from_millis(10),
    );
    let out = sent(&engine, t0 + Duration::from_millis(10));
    assert_eq!(commands(&out), vec![IaxCommand::Ack, IaxCommand::Accept]);

    let channel = engine.take_incoming().pop().unwrap();
    assert_eq!(channel.format(), format::GSM);
    assert_eq!(channel.info().username, "alice");
}

#[test]
fn test_wrong_md5_reply_is_rejected() {
    let user = UserConfig {
        name: "alice".to_string(),
        secret: "s3cret".to_string(),
        ..UserConfig::default()
    };
    let engine = engine_with(vec![user]);
    let t0 = Instant::now();
    engine.handle_datagram(
        &new_call(IaxParams::new().with("username", "alice").with("formats", 4)),
        remote(),
        t0,
    );
    let out = sent(&engine, t0);
    let callno = out[1].0.src_call;

    let reply = IaxParams::new().with("md5secret", "00000000000000000000000000000000");
    engine.handle_datagram(
        &command(callno, 10, 1, IaxCommand::AuthRep, &reply.encode()),
        remote(),
        t0,
    );
    let out = sent(&engine, t0);
    assert_eq!(commands(&out), vec![IaxCommand::Ack, IaxCommand::Reject]);
    assert!(engine.take_incoming().is_empty());
}

#[test]
fn test_unacknowledged_frame_times_out_after_four_sends() {
    let engine = engine_with(vec![]);
    let t0 = Instant::now();
    let mut channel = engine.start_call(outbound_target(), t0).unwrap();

    let mut new_sends = Vec::new();
    for step in 0..=66u64 {
        let now = t0 + Duration::from_millis(step * 500);
        engine.run_timers(now);
        let count = commands(&sent(&engine, now))
            .iter()
            .filter(|c| **c == IaxCommand::New)
            .count();
        new_sends.extend(std::iter::repeat(step * 500).take(count));
    }
    assert_eq!(new_sends, vec![0, 2000, 12000, 22000]);

    assert_eq!(
        channel.try_recv(),
        Some(ChannelEvent::Hangup {
            cause: Some(CallError::TimedOut)
        })
    );
    assert_eq!(channel.state(), ChannelState::Down);
    assert_eq!(channel.error(), Some(CallError::TimedOut));
    assert!(engine.stats().timeouts >= 1);

    drop(channel);
    assert_eq!(engine.stats().calls, 0);
}

#[test]
fn test_duplicate_ack_is_harmless() {
    let engine = engine_with(vec![]);
    let t0 = Instant::now();
    let channel = engine.start_call(outbound_target(), t0).unwrap();
    let out = sent(&engine, t0);
    assert_eq!(commands(&out), vec![IaxCommand::New]);
    assert_eq!(out[0].0.seqno, 0);

    let ack = command(channel.callno(), 0, 0, IaxCommand::Ack, &[]);
    engine.handle_datagram(&ack, remote(), t0);
    engine.handle_datagram(&ack, remote(), t0);
    assert!(sent(&engine, t0).is_empty());
    assert_eq!(engine.stats().queued_frames, 0);

    // The retransmit timer went with the frame
    engine.run_timers(t0 + Duration::from_millis(2500));
    assert!(commands(&sent(&engine, t0 + Duration::from_millis(2500))).is_empty());
}

#[test]
fn test_sequence_numbers() {
    let engine = engine_with(vec![guest()]);
    let t0 = Instant::now();
    let channel = inbound_call(&engine, t0);
    let callno = channel.callno();

    let ping = command(callno, 50, 1, IaxCommand::Ping, &[]);
    engine.handle_datagram(&ping, remote(), t0);
    let out = sent(&engine, t0);
    assert_eq!(commands(&out), vec![IaxCommand::Ack, IaxCommand::Pong]);
    assert_eq!(out[0].0.seqno, 1);
    // ACCEPT took 0
    assert_eq!(out[1].0.seqno, 1);
    assert_eq!(out[1].0.timestamp, 50);

    // Retransmitted copy is acked again but not processed
    engine.handle_datagram(&ping, remote(), t0);
    let out = sent(&engine, t0);
    assert_eq!(commands(&out), vec![IaxCommand::Ack]);
    assert_eq!(out[0].0.seqno, 1);

    // A frame from the future is ignored outright
    engine.handle_datagram(&command(callno, 60, 5, IaxCommand::Ping, &[]), remote(), t0);
    assert!(sent(&engine, t0).is_empty());

    let (iseqno, oseqno) = engine.with_sessions(|t| {
        let s = t.get(callno).unwrap();
        (s.iseqno, s.oseqno)
    });
    assert_eq!(iseqno, 2);
    assert_eq!(oseqno, 2);
}

#[test]
fn test_late_mini_frame_is_dropped() {
    let engine = engine_with(vec![guest()]);
    let t0 = Instant::now();
    let mut channel = inbound_call(&engine, t0);
    let callno = channel.callno();

    let voice = full(callno, 20, 1, FrameType::Voice, format::ULAW, b"\x7f\x7f");
    engine.handle_datagram(&voice, remote(), t0 + Duration::from_millis(20));
    match channel.try_recv() {
        Some(ChannelEvent::Frame(frame)) => {
            assert_eq!(frame.timestamp, 20);
            assert_eq!(&frame.payload[..], b"\x7f\x7f");
        }
        other => panic!("expected voice, got {:?}", other),
    }

    // 5 ms later than the buffer allows
    let mini = MiniHeader {
        src_call: REMOTE_CALL,
        timestamp: 35,
    }
    .to_datagram(b"\x7f\x7f");
    engine.handle_datagram(&mini, remote(), t0 + Duration::from_millis(40));
    assert_eq!(channel.try_recv(), None);
    assert_eq!(engine.stats().late_drops, 1);
    assert_eq!(channel.error(), None);
}

#[test]
fn test_unknown_call_gets_inval() {
    let engine = engine_with(vec![]);
    let t0 = Instant::now();
    engine.handle_datagram(&command(99, 0, 3, IaxCommand::Ping, &[]), remote(), t0);
    let out = sent(&engine, t0);
    assert_eq!(commands(&out), vec![IaxCommand::Inval]);
    assert_eq!(out[0].0.src_call, 99);
    assert_eq!(out[0].0.dst_call, REMOTE_CALL);

    // Never answer an INVAL, and ignore runts
    engine.handle_datagram(&command(99, 0, 0, IaxCommand::Inval, &[]), remote(), t0);
    engine.handle_datagram(&[0x80, 0x01], remote(), t0);
    assert!(sent(&engine, t0).is_empty());
    assert_eq!(engine.stats().invalid_datagrams, 1);
}

#[test]
fn test_remote_hangup_reaches_channel() {
    let engine = engine_with(vec![guest()]);
    let t0 = Instant::now();
    let mut channel = inbound_call(&engine, t0);
    let callno = channel.callno();

    engine.handle_datagram(&command(callno, 100, 1, IaxCommand::Hangup, &[]), remote(), t0);
    assert_eq!(channel.try_recv(), Some(ChannelEvent::Hangup { cause: None }));

    // Only the ACK goes out; hanging up a gone call sends nothing
    let out = sent(&engine, t0);
    assert_eq!(commands(&out), vec![IaxCommand::Ack]);
    drop(channel);
    assert!(sent(&engine, t0).is_empty());
    assert_eq!(engine.stats().calls, 0);
}

#[test]
fn test_outbound_accept_and_reject() {
    let engine = engine_with(vec![]);
    let t0 = Instant::now();

    let mut accepted = engine.start_call(outbound_target(), t0).unwrap();
    sent(&engine, t0);
    let accept = IaxParams::new().with("formats", format::GSM);
    engine.handle_datagram(
        &command(accepted.callno(), 5, 0, IaxCommand::Accept, &accept.encode()),
        remote(),
        t0,
    );
    assert_eq!(
        accepted.try_recv(),
        Some(ChannelEvent::Accepted { format: format::GSM })
    );
    assert_eq!(accepted.format(), format::GSM);
    assert_eq!(engine.call_state(accepted.call()), Some(CallState::Started));

    let mut rejected = engine.start_call(outbound_target(), t0).unwrap();
    sent(&engine, t0);
    let reject = FullHeader {
        src_call: REMOTE_CALL + 1,
        dst_call: rejected.callno(),
        timestamp: 5,
        seqno: 0,
        frame_type: FrameType::Iax.as_u8(),
        subclass: IaxCommand::Reject.subclass(),
    }
    .to_datagram(b"No authority found");
    engine.handle_datagram(&reject, remote(), t0);
    assert_eq!(
        rejected.try_recv(),
        Some(ChannelEvent::Hangup {
            cause: Some(CallError::Rejected)
        })
    );
    assert_eq!(rejected.error(), Some(CallError::Rejected));
}

#[test]
fn test_local_hangup_sends_final_hangup() {
    let engine = engine_with(vec![guest()]);
    let t0 = Instant::now();
    let mut channel = inbound_call(&engine, t0);
    let callno = channel.callno();

    channel.hangup();
    let out = sent(&engine, t0);
    assert_eq!(commands(&out), vec![IaxCommand::Hangup]);
    assert_eq!(engine.stats().calls, 1);

    // The call is released once the far end acknowledges
    assert_eq!(out[0].0.seqno, 1);
    engine.handle_datagram(&command(callno, 10, 1, IaxCommand::Ack, &[]), remote(), t0);
    assert_eq!(engine.stats().calls, 0);
}

#[test]
fn test_shutdown_hangs_up_channels() {
    let engine = engine_with(vec![guest()]);
    let t0 = Instant::now();
    let mut channel = inbound_call(&engine, t0);
    engine.shutdown();
    assert_eq!(channel.try_recv(), Some(ChannelEvent::Hangup { cause: None }));
    drop(channel);
    engine.drain(t0);
    assert_eq!(engine.stats().calls, 0);
    assert_eq!(engine.stats().pending_timers, 0);
}

#[test]
fn test_channel_recv_wakes_on_remote_hangup() {
    let engine = engine_with(vec![guest()]);
    let t0 = Instant::now();
    let mut channel = inbound_call(&engine, t0);
    let callno = channel.callno();

    {
        let mut recv = tokio_test::task::spawn(channel.recv());
        tokio_test::assert_pending!(recv.poll());
        engine.handle_datagram(&command(callno, 30, 1, IaxCommand::Hangup, &[]), remote(), t0);
        assert!(recv.is_woken());
        tokio_test::assert_ready_eq!(recv.poll(), Some(ChannelEvent::Hangup { cause: None }));
    }
    assert_eq!(channel.state(), ChannelState::Down);
}

fn at(t0: Instant, ms: u64) -> Instant {
    t0 + Duration::from_millis(ms)
}

/// Inbound call whose jitter buffer has grown to 100 ms: five voice frames
/// arrive 100 ms behind their timestamps
fn buffered_call(engine: &Arc<Engine>, t0: Instant) -> IaxChannel {
    let mut channel = inbound_call(engine, t0);
    let callno = channel.callno();
    for seqno in 1..=5u16 {
        let ts = 20 * seqno as u32;
        let voice = full(callno, ts, seqno, FrameType::Voice, format::ULAW, b"\x7f");
        engine.handle_datagram(&voice, remote(), at(t0, ts as u64 + 100));
    }
    while channel.try_recv().is_some() {}
    let size = engine.with_sessions(|t| t.get(callno).unwrap().jitter.size());
    assert_eq!(size, 100);
    channel
}

#[test]
fn test_jitter_buffer_holds_early_frame() {
    let engine = engine_with(vec![guest()]);
    let t0 = Instant::now();
    let mut channel = buffered_call(&engine, t0);
    let callno = channel.callno();

    // On time, so it waits out the whole buffer
    let timers = engine.stats().pending_timers;
    let voice = full(callno, 200, 6, FrameType::Voice, format::ULAW, b"\x55");
    engine.handle_datagram(&voice, remote(), at(t0, 200));
    assert_eq!(channel.try_recv(), None);
    assert_eq!(engine.stats().pending_timers, timers + 1);

    engine.run_timers(at(t0, 299));
    assert_eq!(channel.try_recv(), None);

    engine.run_timers(at(t0, 300));
    match channel.try_recv() {
        Some(ChannelEvent::Frame(frame)) => {
            assert_eq!(frame.frame_type, FrameType::Voice);
            assert_eq!(frame.timestamp, 200);
            assert_eq!(&frame.payload[..], b"\x55");
        }
        other => panic!("expected buffered voice, got {:?}", other),
    }
    assert_eq!(engine.stats().pending_timers, timers);
}

#[test]
fn test_buffered_frame_dies_with_its_call() {
    let engine = engine_with(vec![guest()]);
    let t0 = Instant::now();
    let mut channel = buffered_call(&engine, t0);
    let callno = channel.callno();

    let voice = full(callno, 200, 6, FrameType::Voice, format::ULAW, b"\x55");
    engine.handle_datagram(&voice, remote(), at(t0, 200));
    engine.handle_datagram(&command(callno, 250, 7, IaxCommand::Hangup, &[]), remote(), at(t0, 250));
    assert_eq!(channel.try_recv(), Some(ChannelEvent::Hangup { cause: None }));

    engine.run_timers(at(t0, 400));
    assert_eq!(channel.try_recv(), None);
    assert_eq!(channel.error(), None);
}

#[test]
fn test_probes_follow_configured_intervals() {
    let engine = engine_with(vec![guest()]);
    let t0 = Instant::now();
    let channel = inbound_call(&engine, t0);
    let callno = channel.callno();
    // ACCEPT was seqno 0
    engine.handle_datagram(&command(callno, 1, 0, IaxCommand::Ack, &[]), remote(), t0);

    engine.run_timers(at(t0, 9_999));
    assert!(sent(&engine, at(t0, 9_999)).is_empty());

    engine.run_timers(at(t0, 10_000));
    let out = sent(&engine, at(t0, 10_000));
    assert_eq!(commands(&out), vec![IaxCommand::LagRq]);
    assert_eq!(out[0].0.seqno, 1);
    engine.handle_datagram(&command(callno, 2, 1, IaxCommand::Ack, &[]), remote(), at(t0, 10_000));

    engine.run_timers(at(t0, 19_999));
    assert!(sent(&engine, at(t0, 19_999)).is_empty());

    engine.run_timers(at(t0, 20_000));
    let mut probes = commands(&sent(&engine, at(t0, 20_000)));
    probes.sort_by_key(|c| c.subclass());
    let mut expected = vec![IaxCommand::Ping, IaxCommand::LagRq];
    expected.sort_by_key(|c| c.subclass());
    assert_eq!(probes, expected);
}

#[test]
fn test_timers_for_destroyed_call_do_nothing() {
    let engine = engine_with(vec![guest()]);
    let t0 = Instant::now();
    let channel = inbound_call(&engine, t0);
    let call = channel.call();

    engine.handle_datagram(&command(call.callno, 10, 1, IaxCommand::Hangup, &[]), remote(), t0);
    drop(channel);
    sent(&engine, t0);
    assert_eq!(engine.stats().calls, 0);

    let pending = engine.stats().pending_timers;
    {
        let mut timers = engine.timers.lock();
        let soon = Duration::from_millis(10);
        timers.schedule(t0, soon, TimerTask::Ping { call });
        timers.schedule(t0, soon, TimerTask::LagRequest { call });
        timers.schedule(
            t0,
            soon,
            TimerTask::Deliver {
                call,
                frame: MediaFrame::voice(format::ULAW, Bytes::from_static(b"\x7f")),
            },
        );
    }

    assert_eq!(engine.run_timers(at(t0, 10)), 3);
    assert!(sent(&engine, at(t0, 10)).is_empty());
    assert_eq!(engine.stats().calls, 0);
    // Probes for a gone call are not rearmed
    assert_eq!(engine.stats().pending_timers, pending);
}

#[test]
fn test_concurrent_new_calls_get_distinct_numbers() {
    let engine = engine_with(vec![guest()]);
    let t0 = Instant::now();

    std::thread::scope(|scope| {
        for thread in 0..8u8 {
            let engine = &engine;
            scope.spawn(move || {
                for call in 1..=4u8 {
                    let from = SocketAddr::from(([10, 0, thread, call], 4569));
                    let params = IaxParams::new()
                        .with("formats", format::ULAW)
                        .with("version", 1);
                    engine.handle_datagram(&new_call(params), from, t0);
                }
            });
        }
    });

    let (callnos, addrs): (Vec<u16>, HashSet<SocketAddr>) = engine.with_sessions(|t| {
        (
            t.iter().map(|s| s.callno).collect(),
            t.iter().map(|s| s.addr).collect(),
        )
    });
    assert_eq!(callnos.len(), 32);
    assert_eq!(addrs.len(), 32);
    assert_eq!(callnos.iter().collect::<HashSet<_>>().len(), 32);
    assert!(!callnos.contains(&0));
    assert_eq!(engine.take_incoming().len(), 32);
}

/// Collects formatted log output
#[derive(Clone, Default)]
struct LogCapture(Arc<parking_lot::Mutex<Vec<u8>>>);

impl LogCapture {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_frame_trace_logs_only_datagrams_sent() {
    let capture = LogCapture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let engine = engine_with(vec![]);
        engine.set_debug(true);
        let t0 = Instant::now();

        // The call fails before its NEW reaches the outbox
        let failed = engine.start_call(outbound_target(), t0).unwrap();
        engine.sessions.lock().get_mut(failed.callno()).unwrap().error = Some(CallError::Rejected);
        assert!(sent(&engine, t0).is_empty());
        assert_eq!(capture.text().matches("Tx ").count(), 0);

        let _live = engine.start_call(outbound_target(), t0).unwrap();
        assert_eq!(commands(&sent(&engine, t0)), vec![IaxCommand::New]);
        let text = capture.text();
        assert_eq!(text.matches("Tx ").count(), 1);
        assert!(text.contains("NEW"));

        // Retransmissions are traced as they go out
        engine.run_timers(at(t0, 2_000));
        assert_eq!(commands(&sent(&engine, at(t0, 2_000))), vec![IaxCommand::New]);
        assert_eq!(capture.text().matches("Tx ").count(), 2);
    });
}
