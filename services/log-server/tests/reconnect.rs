//! End-to-end scenario: a client-side output writer
//! targeting an address nothing is listening on yet still queues its writes
//! (spooled to disk), and delivers them in order, once, after the endpoint
//! comes up and the reconnect loop's backoff fires.

use log_transport::ReconnectingClientOutput;
use log_text::TextOutput;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

#[tokio::test(flavor = "multi_thread")]
async fn events_written_before_the_endpoint_exists_arrive_in_order_after_it_comes_up() {
    // Reserve a free loopback port, then release it: the client's first
    // connect attempt is guaranteed to find nothing listening there yet.
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let spool_dir = tempfile::tempdir().unwrap();
    let spool_path = spool_dir.path().join("reconnect.spool");

    let mut output = ReconnectingClientOutput::connect_tcp(addr.to_string(), spool_path);
    for i in 1..=5 {
        output.write(&format!("event-{i}\n"));
    }

    // Give the first (failing) connect attempt time to run and enter its
    // backoff sleep before the listener comes up.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let listener = TcpListener::bind(addr).await.unwrap();
    let (mut stream, _peer) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("client should reconnect within the backoff window")
        .unwrap();

    let expected = "event-1\nevent-2\nevent-3\nevent-4\nevent-5\n";
    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while received.len() < expected.len() {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        assert!(remaining > Duration::ZERO, "timed out waiting for spooled events to replay");
        let n = tokio::time::timeout(remaining, stream.read(&mut buf))
            .await
            .expect("read timed out")
            .unwrap();
        assert_ne!(n, 0, "connection closed before all events arrived");
        received.extend_from_slice(&buf[..n]);
    }

    assert_eq!(String::from_utf8(received).unwrap(), expected);
}
