use std::sync::Arc;
use std::time::Duration;

use flightcheck::bridge::{BridgeError, CommandBridge};
use flightcheck::config::LinkConfig;
use flightcheck::messages::*;
use flightcheck::transport::{Frame, LoopbackTransport, TransportError, UdpTransport};

const TIMEOUT: Duration = Duration::from_secs(3);

fn console_reply(text: &[u8]) -> Frame {
    let mut data = ConsoleData::new();
    data.try_extend_from_slice(text).unwrap();
    let message = SerialControl {
        baudrate: 0,
        timeout_ms: 0,
        device: SERIAL_CONTROL_DEV_SHELL,
        flags: SERIAL_CONTROL_FLAG_REPLY,
        data,
    };
    Frame::new(msg_id::SERIAL_CONTROL, message.encode())
}

fn request_text(frame: &Frame) -> Vec<u8> {
    SerialControl::decode(&frame.payload).unwrap().data.to_vec()
}

#[tokio::test]
async fn test_ver_all_over_fragmented_frames() {
    let transport = LoopbackTransport::with_responder(|frame| {
        if frame.msg_id != msg_id::SERIAL_CONTROL || request_text(frame) != b"ver all\n" {
            return Vec::new();
        }
        vec![
            console_reply(b"NuttX bu"),
            console_reply(b"ild\nFW version: v1.9"),
            console_reply(b".0-clever\nns"),
            console_reply(b"h> "),
        ]
    });
    let bridge = CommandBridge::new(transport.clone(), "nsh>");

    let output = bridge.execute("ver all", TIMEOUT).await.unwrap();
    assert_eq!(output, "NuttX build\nFW version: v1.9.0-clever");
}

#[tokio::test]
async fn test_prompt_line_is_trimmed() {
    let transport = LoopbackTransport::with_responder(|_| vec![console_reply(b"foo\nbar\nnsh>")]);
    let bridge = CommandBridge::new(transport.clone(), "nsh>");

    assert_eq!(bridge.execute("echo", TIMEOUT).await.unwrap(), "foo\nbar");
}

#[tokio::test]
async fn test_request_frame_layout() {
    let transport = LoopbackTransport::new();
    let bridge = CommandBridge::new(transport.clone(), "nsh>");
    let _ = bridge.execute("ver all", Duration::from_millis(10)).await.unwrap();

    let published = transport.published();
    assert_eq!(published.len(), 1);
    let frame = &published[0];
    assert_eq!(frame.msg_id, msg_id::SERIAL_CONTROL);
    assert_eq!(frame.payload.len(), SERIAL_CONTROL_LEN);

    let request = SerialControl::decode(&frame.payload).unwrap();
    assert_eq!(request.device, SERIAL_CONTROL_DEV_SHELL);
    assert_eq!(
        request.flags,
        SERIAL_CONTROL_FLAG_RESPOND | SERIAL_CONTROL_FLAG_EXCLUSIVE | SERIAL_CONTROL_FLAG_MULTI
    );
    assert_eq!(&request.data[..], b"ver all\n");
    assert!(frame.payload[9 + 8..].iter().all(|b| *b == 0));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_returns_partial_output_in_time() {
    let transport = LoopbackTransport::with_responder(|_| vec![console_reply(b"partial out")]);
    let bridge = CommandBridge::new(transport.clone(), "nsh>");

    let started = tokio::time::Instant::now();
    let output = bridge.execute("commander check", TIMEOUT).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(output, "partial out");
    assert!(elapsed >= TIMEOUT);
    assert!(elapsed < TIMEOUT + Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_silent_console_gives_empty_output() {
    let transport = LoopbackTransport::new();
    let bridge = CommandBridge::new(transport.clone(), "nsh>");

    assert_eq!(bridge.execute("ver all", TIMEOUT).await.unwrap(), "");
}

#[tokio::test]
async fn test_malformed_and_foreign_frames_are_ignored() {
    let transport = LoopbackTransport::with_responder(|_| {
        let mut echo = console_reply(b"nsh> not a reply\n");
        // our own request echoed back without the reply flag
        echo.payload[7] = SERIAL_CONTROL_FLAG_RESPOND;
        vec![
            Frame::new(msg_id::SERIAL_CONTROL, vec![1, 2, 3]),
            echo,
            Frame::new(msg_id::ATTITUDE, vec![0; 28]),
            console_reply(b"ok\nnsh> "),
        ]
    });
    let bridge = CommandBridge::new(transport.clone(), "nsh>");

    assert_eq!(bridge.execute("free", TIMEOUT).await.unwrap(), "ok");
    assert_eq!(bridge.decode_failures(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_output_is_dropped() {
    let transport = LoopbackTransport::new();
    let bridge = CommandBridge::new(transport.clone(), "nsh>");

    assert_eq!(bridge.execute("top", Duration::from_millis(50)).await.unwrap(), "");

    // the answer to the timed out call shows up afterwards
    transport.deliver(&console_reply(b"stale\nnsh> "));
    assert_eq!(bridge.dropped_frames(), 1);

    let feeder = Arc::clone(&transport);
    let (output, _) = tokio::join!(bridge.execute("ver all", TIMEOUT), async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        feeder.deliver(&console_reply(b"fresh\nnsh> "));
    });
    assert_eq!(output.unwrap(), "fresh");
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_calls_are_serialised() {
    let transport = LoopbackTransport::new();
    let bridge = Arc::new(CommandBridge::new(transport.clone(), "nsh>"));

    let first = tokio::spawn({
        let bridge = Arc::clone(&bridge);
        async move { bridge.execute("first", TIMEOUT).await.unwrap() }
    });
    let second = tokio::spawn({
        let bridge = Arc::clone(&bridge);
        async move { bridge.execute("second", TIMEOUT).await.unwrap() }
    });

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(transport.published().len(), 1);

    transport.deliver(&console_reply(b"one\nnsh> "));
    tokio::time::sleep(Duration::from_millis(5)).await;
    let published = transport.published();
    assert_eq!(published.len(), 2);
    assert_eq!(request_text(&published[0]), b"first\n");
    assert_eq!(request_text(&published[1]), b"second\n");

    transport.deliver(&console_reply(b"two\nnsh> "));
    assert_eq!(first.await.unwrap(), "one");
    assert_eq!(second.await.unwrap(), "two");
}

#[tokio::test]
async fn test_dead_link_is_an_error() {
    let transport = LoopbackTransport::new();
    transport.close();
    let bridge = CommandBridge::new(transport.clone(), "nsh>");

    let result = bridge.execute("ver all", TIMEOUT).await;
    assert!(matches!(result, Err(BridgeError::Transport(TransportError::Closed))));
}

#[tokio::test]
async fn test_link_without_peer_gives_empty_output() {
    let link = LinkConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        remote: None,
        ..LinkConfig::default()
    };
    let transport = UdpTransport::bind(&link).await.unwrap();
    let bridge = CommandBridge::new(transport.clone(), "nsh>");

    let started = std::time::Instant::now();
    assert_eq!(bridge.execute("commander check", TIMEOUT).await.unwrap(), "");
    assert!(started.elapsed() < TIMEOUT);
    assert_eq!(transport.peer(), None);
}
