//! End-to-end tests against an in-process Telnet server

use bbsbot_core::core::transport::codec::{
    subnegotiation, DO, IAC, OPT_NAWS, OPT_TERMINAL_TYPE, TTYPE_IS, TTYPE_SEND,
};
use bbsbot_core::core::transport::naws_frame;
use bbsbot_core::{
    send_input, wait_for_prompt, InputKind, PatternDecl, PatternSet, PromptDetector, Session,
    SessionError, SessionManager, SessionOptions, SessionRequest, TelnetConfig, TelnetTransport,
    TransportTrait, WaitCallbacks, WaitOptions,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_test::{assert_err, assert_ok};

const STEP: Duration = Duration::from_secs(5);

async fn listener() -> (TcpListener, TelnetConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = TelnetConfig::new("127.0.0.1")
        .port(port)
        .connect_timeout(Duration::from_secs(2));
    (listener, config)
}

/// Read from `stream` into `seen` until `needle` shows up
async fn read_until(stream: &mut TcpStream, seen: &mut Vec<u8>, needle: &[u8]) {
    let found = tokio::time::timeout(STEP, async {
        let mut chunk = [0u8; 256];
        while !seen.windows(needle.len()).any(|w| w == needle) {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed while waiting for {needle:?}");
            seen.extend_from_slice(&chunk[..n]);
        }
    })
    .await;
    assert!(found.is_ok(), "never saw {needle:?} in {seen:?}");
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn detector() -> Arc<PromptDetector> {
    let patterns = PatternSet::new(vec![
        PatternDecl::new("pause", r"\[Pause\]").input(InputKind::AnyKey),
        PatternDecl::new("login_name", r"Enter your name:"),
    ])
    .unwrap();
    Arc::new(PromptDetector::new(patterns))
}

fn quick_wait() -> WaitOptions {
    WaitOptions::default()
        .timeout(Duration::from_secs(5))
        .idle_threshold(Duration::from_millis(100))
        .poll_interval(Duration::from_millis(50))
}

#[tokio::test]
async fn test_negotiates_terminal_type_and_window_size() {
    let (listener, config) = listener().await;
    let (tx, rx) = oneshot::channel();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut seen = Vec::new();
        read_until(&mut stream, &mut seen, &[IAC, DO, 1]).await;

        let mut out = vec![IAC, DO, OPT_NAWS, IAC, DO, OPT_TERMINAL_TYPE];
        out.extend(subnegotiation(OPT_TERMINAL_TYPE, &[TTYPE_SEND]));
        out.extend_from_slice(b"hi");
        stream.write_all(&out).await.unwrap();

        let mut ttype = vec![TTYPE_IS];
        ttype.extend_from_slice(b"ANSI");
        let ttype = subnegotiation(OPT_TERMINAL_TYPE, &ttype);
        read_until(&mut stream, &mut seen, &ttype).await;
        read_until(&mut stream, &mut seen, &naws_frame(100, 30)).await;
        tx.send(seen).unwrap();
        // Hold the socket until the client is done
        let _ = stream.read(&mut [0u8; 16]).await;
    });

    let mut transport = assert_ok!(TelnetTransport::open(config.size(100, 30)).await);
    let mut data = Vec::new();
    while data.len() < 2 {
        data.extend_from_slice(&assert_ok!(transport.receive(1024, STEP).await));
    }
    assert_eq!(data, b"hi");

    let seen = tokio::time::timeout(STEP, rx).await.unwrap().unwrap();
    // The opening offer already said WILL, so DO is acknowledged silently
    assert_eq!(seen.iter().filter(|&&b| b == IAC).count(), 4 + 2 + 2);
    assert!(transport.options().naws());
    assert!(transport.options().terminal_type());

    transport.disconnect().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_iac_bytes_cross_the_wire_escaped() {
    let (listener, config) = listener().await;
    let (tx, rx) = oneshot::channel();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut seen = Vec::new();
        read_until(&mut stream, &mut seen, &[b'A', IAC, IAC, b'B']).await;
        stream.write_all(&[b'x', IAC, IAC, b'y']).await.unwrap();
        tx.send(seen).unwrap();
        let _ = stream.read(&mut [0u8; 16]).await;
    });

    let mut transport = assert_ok!(TelnetTransport::open(config).await);
    assert_eq!(assert_ok!(transport.send(&[b'A', 0xFF, b'B']).await), 3);

    let mut received = Vec::new();
    while received.len() < 3 {
        received.extend_from_slice(&assert_ok!(transport.receive(64, STEP).await));
    }
    assert_eq!(received, vec![b'x', 0xFF, b'y']);
    assert_eq!(transport.stats().bytes_sent, 3);

    let seen = tokio::time::timeout(STEP, rx).await.unwrap().unwrap();
    assert!(contains(&seen, &[b'A', IAC, IAC, b'B']));

    transport.disconnect().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_login_then_pause_flow() {
    let (listener, config) = listener().await;
    let (tx, rx) = oneshot::channel();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut seen = Vec::new();
        stream
            .write_all(b"\x1b[2J\x1b[HWelcome to the board\r\nEnter your name: ")
            .await
            .unwrap();
        read_until(&mut stream, &mut seen, b"hello\r").await;

        stream.write_all(b"\r\nNews of the day\r\n[Pause]").await.unwrap();
        seen.clear();
        read_until(&mut stream, &mut seen, b" ").await;
        tx.send(seen).unwrap();
        let _ = stream.read(&mut [0u8; 16]).await;
    });

    let session = assert_ok!(Session::connect(config, SessionOptions::default(), detector()).await);

    let login = assert_ok!(
        wait_for_prompt(&session, &quick_wait().expect("login"), &WaitCallbacks::new()).await
    );
    assert_eq!(login.prompt_id, "login_name");
    assert_eq!(login.input_kind, InputKind::Line);
    assert!(login.idle);
    assert!(login.text.contains("Welcome to the board"));
    assert_ok!(send_input(&session, "hello", login.input_kind, Duration::ZERO).await);

    let pause = assert_ok!(
        wait_for_prompt(&session, &quick_wait().expect("pause"), &WaitCallbacks::new()).await
    );
    assert_eq!(pause.input_kind, InputKind::AnyKey);
    assert_ok!(send_input(&session, "ignored", pause.input_kind, Duration::ZERO).await);

    let seen = tokio::time::timeout(STEP, rx).await.unwrap().unwrap();
    assert_eq!(seen, b" ");

    let stats = session.stats().await;
    assert_eq!(stats.sends, 2);
    assert!(stats.prompts_detected >= 2);

    session.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_timeout_is_not_connection_loss() {
    let (listener, config) = listener().await;
    let (hangup_tx, hangup_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(b"Loading...\r\n").await.unwrap();
        hangup_rx.await.unwrap();
        drop(stream);
    });

    let session = assert_ok!(Session::connect(config, SessionOptions::default(), detector()).await);

    let options = quick_wait().timeout(Duration::from_millis(300));
    let started = Instant::now();
    let err = assert_err!(wait_for_prompt(&session, &options, &WaitCallbacks::new()).await);
    let elapsed = started.elapsed();
    assert!(err.is_timeout(), "{err}");
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed <= Duration::from_millis(300 + 50 + 100), "{elapsed:?}");
    assert!(session.is_connected());

    hangup_tx.send(()).unwrap();
    server.await.unwrap();

    let err = assert_err!(wait_for_prompt(&session, &quick_wait(), &WaitCallbacks::new()).await);
    assert!(err.is_connection(), "{err}");
    assert!(!session.is_connected());
    assert!(session.close().await.is_ok());
}

#[tokio::test]
async fn test_manager_against_live_server() {
    let (listener, config) = listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = stream.read(&mut [0u8; 64]).await;
        let _ = stream.read(&mut [0u8; 64]).await;
    });

    let manager = SessionManager::new(1, detector());
    let first = assert_ok!(manager.create_session(SessionRequest::new(config.clone())).await);
    assert!(first.is_connected());

    let err = assert_err!(manager.create_session(SessionRequest::new(config.clone())).await);
    assert!(matches!(err, SessionError::Capacity { max: 1 }));

    let reused = assert_ok!(
        manager
            .create_session(SessionRequest::new(config).reuse(true))
            .await
    );
    assert_eq!(reused.id(), first.id());

    assert!(manager.close_session(first.id()).await);
    assert!(manager.is_empty().await);
    server.await.unwrap();
}

#[tokio::test]
async fn test_refused_connect_releases_slot() {
    let (listener, config) = listener().await;
    drop(listener);

    let manager = SessionManager::new(1, detector());
    let err = assert_err!(manager.create_session(SessionRequest::new(config.clone())).await);
    assert!(err.is_connection(), "{err}");

    // The failed attempt must not keep its reservation
    let (listener, config) = self::listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = stream.read(&mut [0u8; 64]).await;
    });
    let session = assert_ok!(manager.create_session(SessionRequest::new(config)).await);
    manager.close_session(session.id()).await;
    server.await.unwrap();
}
