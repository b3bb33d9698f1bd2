//! Integration tests for blizzard.
//!
//! Sessions are exercised two ways: session-to-session over an in-memory
//! duplex stream, and session-to-raw-peer where the test reads and
//! writes frames by hand to pin down exact wire behavior.

use blizzard::protocol::{build_frame, codes, kind, Header, HEADER_SIZE};
use blizzard::{BlizzardError, Payload, Phase, Session, SessionEvent};
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Duration};

/// Read one frame from a raw peer stream.
async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> (u8, u32, Vec<u8>) {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await.unwrap();
    let header = Header::decode(&header).expect("valid header with magic byte");

    let mut payload = vec![0u8; header.length as usize];
    reader.read_exact(&mut payload).await.unwrap();
    (header.kind, header.id, payload)
}

/// Write one frame to a raw peer stream.
async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, kind: u8, id: u32, payload: &[u8]) {
    let bytes = build_frame(&Header::new(kind, id, payload.len() as u32), payload);
    writer.write_all(&bytes).await.unwrap();
}

/// Assert that nothing arrives on the stream for a little while.
async fn assert_silent<R: AsyncReadExt + Unpin>(reader: &mut R) {
    let mut byte = [0u8; 1];
    let read = timeout(Duration::from_millis(100), reader.read(&mut byte)).await;
    assert!(read.is_err(), "unexpected bytes on the wire");
}

/// An instigator's very first bytes on the wire are the zero-length
/// handshake, and receiving one back makes the session ready.
#[tokio::test]
async fn test_handshake_first_bytes_and_ready() {
    let (local, mut remote) = duplex(4096);
    let (session, mut events) = Session::builder().instigate(local).await.unwrap();

    let mut first = [0u8; HEADER_SIZE];
    remote.read_exact(&mut first).await.unwrap();
    assert_eq!(first, [0x59, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

    assert_eq!(session.phase(), Phase::Opening);

    write_frame(&mut remote, kind::HANDSHAKE, 0, b"").await;
    assert_eq!(events.recv().await, Some(SessionEvent::Ready));
    assert_eq!(session.phase(), Phase::Ready);
}

/// An instigator call goes out as a JSON frame at the first even id, and
/// the correlated reply resolves the caller.
#[tokio::test]
async fn test_call_round_trip_with_raw_peer() {
    let (local, mut remote) = duplex(4096);
    let (session, mut events) = Session::builder().instigate(local).await.unwrap();

    // Drain the session's handshake and answer it.
    read_frame(&mut remote).await;
    write_frame(&mut remote, kind::HANDSHAKE, 0, b"").await;
    events.wait_ready().await.unwrap();

    let (result, ()) = tokio::join!(session.call("add", [1, 2]), async {
        let (frame_kind, id, payload) = read_frame(&mut remote).await;
        assert_eq!(frame_kind, kind::JSON);
        assert_eq!(id, 2, "first instigator id is even");
        assert_eq!(payload, br#"{"method":"add","params":[1,2]}"#);

        write_frame(&mut remote, kind::JSON, id, br#"{"result":3}"#).await;
    });

    assert_eq!(result.unwrap(), Payload::Json(json!(3)));

    // The next call steps to the next even id.
    let (result, ()) = tokio::join!(session.call("add", [2, 3]), async {
        let (_, id, _) = read_frame(&mut remote).await;
        assert_eq!(id, 4);
        write_frame(&mut remote, kind::JSON, id, br#"{"result":5}"#).await;
    });
    assert_eq!(result.unwrap(), Payload::Json(json!(5)));
}

/// An acceptor session allocates odd ids.
#[tokio::test]
async fn test_acceptor_allocates_odd_ids() {
    let (local, mut remote) = duplex(4096);
    let (session, mut events) = Session::builder().accept(local).await.unwrap();

    read_frame(&mut remote).await;
    write_frame(&mut remote, kind::HANDSHAKE, 0, b"").await;
    events.wait_ready().await.unwrap();

    let (result, ()) = tokio::join!(session.call("whoami", ()), async {
        let (_, id, payload) = read_frame(&mut remote).await;
        assert_eq!(id, 1, "first acceptor id is odd");
        assert_eq!(payload, br#"{"method":"whoami"}"#);
        write_frame(&mut remote, kind::JSON, id, br#"{"result":"acceptor"}"#).await;
    });
    assert_eq!(result.unwrap(), Payload::Json(json!("acceptor")));
}

/// A request for a method nobody exposed is answered with a method-not-
/// found error reply at the request id.
#[tokio::test]
async fn test_unknown_method_error_reply() {
    let (local, mut remote) = duplex(4096);
    let (_session, _events) = Session::builder().instigate(local).await.unwrap();

    read_frame(&mut remote).await;
    write_frame(&mut remote, kind::HANDSHAKE, 0, b"").await;

    write_frame(&mut remote, kind::JSON, 7, br#"{"method":"nope"}"#).await;

    let (frame_kind, id, payload) = read_frame(&mut remote).await;
    assert_eq!(frame_kind, kind::JSON);
    assert_eq!(id, 7);
    assert_eq!(
        payload,
        br#"{"error":{"code":-32601,"message":"Method nope not found."}}"#
    );
}

/// A handler's binary reply is one buffer frame immediately followed by
/// its zero-length terminator.
#[tokio::test]
async fn test_binary_reply_wire_shape() {
    let (local, mut remote) = duplex(4096);
    let (_session, _events) = Session::builder()
        .expose("blob", |_params: Value, ctx| async move {
            ctx.resolve_binary(Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]))
                .await
        })
        .instigate(local)
        .await
        .unwrap();

    read_frame(&mut remote).await;
    write_frame(&mut remote, kind::HANDSHAKE, 0, b"").await;

    write_frame(&mut remote, kind::JSON, 9, br#"{"method":"blob"}"#).await;

    let (frame_kind, id, payload) = read_frame(&mut remote).await;
    assert_eq!(frame_kind, kind::BUFFER_RESPONSE);
    assert_eq!(id, 9);
    assert_eq!(payload, [0xDE, 0xAD, 0xBE, 0xEF]);

    let (frame_kind, id, payload) = read_frame(&mut remote).await;
    assert_eq!(frame_kind, kind::BUFFER_RESPONSE);
    assert_eq!(id, 9);
    assert!(payload.is_empty(), "terminator is zero-length");
}

/// A stray non-magic byte produces no outbound traffic, and the frame
/// starting at the next byte still parses.
#[tokio::test]
async fn test_bad_magic_resync() {
    let (local, mut remote) = duplex(4096);
    let (_session, _events) = Session::builder()
        .expose("add", |params: Vec<i64>, ctx| async move {
            ctx.resolve(&params.iter().sum::<i64>()).await
        })
        .instigate(local)
        .await
        .unwrap();

    read_frame(&mut remote).await;
    write_frame(&mut remote, kind::HANDSHAKE, 0, b"").await;

    // Stray byte, then a correctly-aligned request.
    remote.write_all(&[0xFF]).await.unwrap();
    write_frame(&mut remote, kind::JSON, 6, br#"{"method":"add","params":[1,2]}"#).await;

    let (frame_kind, id, payload) = read_frame(&mut remote).await;
    assert_eq!(frame_kind, kind::JSON);
    assert_eq!(id, 6);
    assert_eq!(payload, br#"{"result":3}"#);

    // The magic violation itself is unaddressable and stays local.
    assert_silent(&mut remote).await;
}

/// An error reply for an id nobody is waiting on is dropped without any
/// outbound frame; a success reply for such an id is answered with an
/// internal error so the peers can notice they are out of sync.
#[tokio::test]
async fn test_unknown_id_replies() {
    let (local, mut remote) = duplex(4096);
    let (_session, _events) = Session::builder().instigate(local).await.unwrap();

    read_frame(&mut remote).await;
    write_frame(&mut remote, kind::HANDSHAKE, 0, b"").await;

    // Error reply for an unknown id: swallowed, no error loop.
    write_frame(
        &mut remote,
        kind::JSON,
        41,
        br#"{"error":{"code":-32000,"message":"boom"}}"#,
    )
    .await;
    assert_silent(&mut remote).await;

    // Success reply for an unknown id: internal error back at that id.
    write_frame(&mut remote, kind::JSON, 40, br#"{"result":1}"#).await;
    let (frame_kind, id, payload) = read_frame(&mut remote).await;
    assert_eq!(frame_kind, kind::JSON);
    assert_eq!(id, 40);
    assert_eq!(
        payload,
        br#"{"error":{"code":-32603,"message":"No callback for id"}}"#
    );
}

/// A terminator for a stream that never had a chunk is invalid.
#[tokio::test]
async fn test_terminator_for_unknown_stream() {
    let (local, mut remote) = duplex(4096);
    let (_session, _events) = Session::builder().instigate(local).await.unwrap();

    read_frame(&mut remote).await;
    write_frame(&mut remote, kind::HANDSHAKE, 0, b"").await;

    write_frame(&mut remote, kind::BUFFER_RESPONSE, 33, b"").await;

    let (frame_kind, id, payload) = read_frame(&mut remote).await;
    assert_eq!(frame_kind, kind::JSON);
    assert_eq!(id, 33);
    assert_eq!(
        payload,
        br#"{"error":{"code":-32600,"message":"Final packet for unknown stream"}}"#
    );
}

/// Chunked binary replies reassemble into a single binary payload for
/// the caller.
#[tokio::test]
async fn test_binary_reassembly_for_caller() {
    let (local, mut remote) = duplex(4096);
    let (session, mut events) = Session::builder().instigate(local).await.unwrap();

    read_frame(&mut remote).await;
    write_frame(&mut remote, kind::HANDSHAKE, 0, b"").await;
    events.wait_ready().await.unwrap();

    let (result, ()) = tokio::join!(session.call("blob", ()), async {
        let (_, id, _) = read_frame(&mut remote).await;

        // Three chunks, then the terminator.
        write_frame(&mut remote, kind::BUFFER_RESPONSE, id, &[0xDE]).await;
        write_frame(&mut remote, kind::BUFFER_RESPONSE, id, &[0xAD, 0xBE]).await;
        write_frame(&mut remote, kind::BUFFER_RESPONSE, id, &[0xEF]).await;
        write_frame(&mut remote, kind::BUFFER_RESPONSE, id, b"").await;
    });

    match result.unwrap() {
        Payload::Binary(bytes) => assert_eq!(&bytes[..], &[0xDE, 0xAD, 0xBE, 0xEF]),
        other => panic!("expected binary payload, got {:?}", other),
    }
}

/// A notification goes out at id 0 and leaves no pending completion; a
/// handler resolving a notification produces no outbound frame.
#[tokio::test]
async fn test_notification_semantics() {
    let (local, mut remote) = duplex(4096);

    let (handled_tx, mut handled_rx) = tokio::sync::mpsc::channel::<Value>(1);
    let (session, _events) = Session::builder()
        .expose("ping", move |params: Value, ctx| {
            let handled = handled_tx.clone();
            async move {
                let _ = handled.send(params).await;
                ctx.resolve(&"ignored").await
            }
        })
        .instigate(local)
        .await
        .unwrap();

    read_frame(&mut remote).await;
    write_frame(&mut remote, kind::HANDSHAKE, 0, b"").await;

    // Outbound notification: id 0 on the wire.
    session.notify("status", json!({"ok": true})).await.unwrap();
    let (frame_kind, id, payload) = read_frame(&mut remote).await;
    assert_eq!(frame_kind, kind::JSON);
    assert_eq!(id, 0);
    assert_eq!(payload, br#"{"method":"status","params":{"ok":true}}"#);

    // Inbound notification: the handler runs, its reply is discarded.
    write_frame(&mut remote, kind::JSON, 0, br#"{"method":"ping","params":[7]}"#).await;
    let params = timeout(Duration::from_secs(1), handled_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(params, json!([7]));
    assert_silent(&mut remote).await;
}

/// Two full sessions talking to each other, both directions.
#[tokio::test]
async fn test_session_to_session_both_directions() {
    let (a_stream, b_stream) = duplex(64 * 1024);

    let (a, mut a_events) = Session::builder()
        .expose("upper", |params: Vec<String>, ctx| async move {
            let out: Vec<String> = params.iter().map(|s| s.to_uppercase()).collect();
            ctx.resolve(&out).await
        })
        .instigate(a_stream)
        .await
        .unwrap();

    let (b, mut b_events) = Session::builder()
        .expose("add", |params: Vec<i64>, ctx| async move {
            ctx.resolve(&params.iter().sum::<i64>()).await
        })
        .expose("blob", |_params: Value, ctx| async move {
            ctx.resolve_binary(Bytes::from_static(b"binary payload")).await
        })
        .accept(b_stream)
        .await
        .unwrap();

    a_events.wait_ready().await.unwrap();
    b_events.wait_ready().await.unwrap();

    // Instigator calls acceptor.
    let sum = a.call("add", [1, 2, 3]).await.unwrap();
    assert_eq!(sum, Payload::Json(json!(6)));

    // Acceptor calls instigator.
    let upper = b.call("upper", ["hi"]).await.unwrap();
    assert_eq!(upper, Payload::Json(json!(["HI"])));

    // Binary reply reassembles transparently.
    let blob = a.call("blob", ()).await.unwrap();
    assert_eq!(blob, Payload::Binary(Bytes::from_static(b"binary payload")));
}

/// A handler rejection surfaces at the caller as a remote error with the
/// vendor user code.
#[tokio::test]
async fn test_handler_rejection_propagates() {
    let (a_stream, b_stream) = duplex(4096);

    let (a, mut a_events) = Session::builder().instigate(a_stream).await.unwrap();
    let (_b, mut b_events) = Session::builder()
        .expose("explode", |_params: Value, ctx| async move {
            ctx.reject("kaboom").await
        })
        .accept(b_stream)
        .await
        .unwrap();

    a_events.wait_ready().await.unwrap();
    b_events.wait_ready().await.unwrap();

    let err = a.call("explode", ()).await.unwrap_err();
    match err {
        BlizzardError::Remote { code, message } => {
            assert_eq!(code, codes::USER);
            assert_eq!(message, "kaboom");
        }
        other => panic!("expected remote error, got {:?}", other),
    }
}

/// Params the handler cannot deserialize come back as a user error, not
/// a hang or a crash.
#[tokio::test]
async fn test_bad_params_rejected_by_typed_handler() {
    let (a_stream, b_stream) = duplex(4096);

    let (a, mut a_events) = Session::builder().instigate(a_stream).await.unwrap();
    let (_b, mut b_events) = Session::builder()
        .expose("add", |params: Vec<i64>, ctx| async move {
            ctx.resolve(&params.iter().sum::<i64>()).await
        })
        .accept(b_stream)
        .await
        .unwrap();

    a_events.wait_ready().await.unwrap();
    b_events.wait_ready().await.unwrap();

    let err = a.call("add", "not a list").await.unwrap_err();
    match err {
        BlizzardError::Remote { code, message } => {
            assert_eq!(code, codes::USER);
            assert!(message.contains("invalid params"));
        }
        other => panic!("expected remote error, got {:?}", other),
    }
}

/// Methods exposed after the session is live are dispatchable.
#[tokio::test]
async fn test_expose_on_live_session() {
    let (a_stream, b_stream) = duplex(4096);

    let (a, mut a_events) = Session::builder().instigate(a_stream).await.unwrap();
    let (b, mut b_events) = Session::builder().accept(b_stream).await.unwrap();

    a_events.wait_ready().await.unwrap();
    b_events.wait_ready().await.unwrap();

    let err = a.call("late", ()).await.unwrap_err();
    assert!(matches!(
        err,
        BlizzardError::Remote {
            code: codes::METHOD,
            ..
        }
    ));

    b.expose("late", |_params: Value, ctx| async move {
        ctx.resolve(&"now exposed").await
    });

    let result = a.call("late", ()).await.unwrap();
    assert_eq!(result, Payload::Json(json!("now exposed")));
}

/// Ending a session stops dispatch on the other side too: the remote
/// observes the close and winds down.
#[tokio::test]
async fn test_end_propagates_to_peer() {
    let (a_stream, b_stream) = duplex(4096);

    let (a, mut a_events) = Session::builder().instigate(a_stream).await.unwrap();
    let (_b, mut b_events) = Session::builder().accept(b_stream).await.unwrap();

    a_events.wait_ready().await.unwrap();
    b_events.wait_ready().await.unwrap();

    a.end();

    // Local side reports End and refuses new work.
    loop {
        match a_events.recv().await {
            Some(SessionEvent::End) => break,
            Some(_) => continue,
            None => panic!("event stream ended without End"),
        }
    }
    assert!(matches!(
        a.call("x", ()).await,
        Err(BlizzardError::SessionClosed)
    ));

    // Peer sees EOF and winds down as well.
    loop {
        match b_events.recv().await {
            Some(SessionEvent::End) => break,
            Some(_) => continue,
            None => panic!("peer event stream ended without End"),
        }
    }
}

/// JSON frames that decode but violate the message grammar are answered
/// with invalid-message errors at their id.
#[tokio::test]
async fn test_grammar_violations_answered_at_id() {
    let (local, mut remote) = duplex(4096);
    let (_session, _events) = Session::builder().instigate(local).await.unwrap();

    read_frame(&mut remote).await;
    write_frame(&mut remote, kind::HANDSHAKE, 0, b"").await;

    // Id-bearing message with none of method/error/result.
    write_frame(&mut remote, kind::JSON, 12, br#"{"other":true}"#).await;
    let (_, id, payload) = read_frame(&mut remote).await;
    assert_eq!(id, 12);
    let body: Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(body["error"]["code"], json!(codes::INVALID));
    assert_eq!(
        body["error"]["message"],
        json!("Messages with IDs must contain method, error, or result")
    );

    // Top-level array.
    write_frame(&mut remote, kind::JSON, 13, br#"[1,2]"#).await;
    let (_, id, payload) = read_frame(&mut remote).await;
    assert_eq!(id, 13);
    let body: Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(body["error"]["code"], json!(codes::INVALID));

    // Malformed JSON.
    write_frame(&mut remote, kind::JSON, 14, b"{broken").await;
    let (_, id, payload) = read_frame(&mut remote).await;
    assert_eq!(id, 14);
    let body: Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(body["error"]["code"], json!(codes::PARSE));

    // Id-less grammar violations are unaddressable and swallowed.
    write_frame(&mut remote, kind::JSON, 0, br#"{"result":1}"#).await;
    assert_silent(&mut remote).await;
}

/// The reserved frame kind is rejected at its id.
#[tokio::test]
async fn test_reserved_kind_rejected() {
    let (local, mut remote) = duplex(4096);
    let (_session, _events) = Session::builder().instigate(local).await.unwrap();

    read_frame(&mut remote).await;
    write_frame(&mut remote, kind::HANDSHAKE, 0, b"").await;

    write_frame(&mut remote, kind::RESERVED, 21, b"whatever").await;

    let (_, id, payload) = read_frame(&mut remote).await;
    assert_eq!(id, 21);
    let body: Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(body["error"]["code"], json!(codes::INVALID));
    assert_eq!(body["error"]["message"], json!("Unknown packet type"));
}

/// Sessions work over real TCP end to end.
#[tokio::test]
async fn test_over_tcp() {
    use blizzard::transport::tcp;

    let listener = tcp::Listener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _peer) = listener.accept().await.unwrap();
        let (_session, mut events) = Session::builder()
            .expose("echo", |params: Value, ctx| async move {
                ctx.resolve(&params).await
            })
            .accept(stream)
            .await
            .unwrap();

        events.wait_ready().await.unwrap();
        // Hold the session until the client is done.
        loop {
            match events.recv().await {
                Some(SessionEvent::End) | None => break,
                Some(_) => continue,
            }
        }
    });

    let stream = tcp::connect(addr).await.unwrap();
    let (client, mut events) = Session::builder().instigate(stream).await.unwrap();
    events.wait_ready().await.unwrap();

    let result = client.call("echo", json!({"n": 7})).await.unwrap();
    assert_eq!(result, Payload::Json(json!({"n": 7})));

    client.end();
    server.await.unwrap();
}
