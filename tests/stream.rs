//! Tests for the shared streaming cache's core: Stream and Listener.

use relaycache::cache::Stream;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// A `tokio::io::duplex` pair gives us a pin-boxable `AsyncRead` half we
/// can feed from a separate task, standing in for the network response
/// body in these tests without opening any sockets.
fn upstream_pair() -> (relaycache::cache::UpstreamReader, tokio::io::DuplexStream) {
    let (reader, writer) = tokio::io::duplex(4096);
    (Box::pin(reader), writer)
}

#[tokio::test]
async fn basic_replay() {
    let (reader, mut writer) = upstream_pair();
    let stream = Stream::new(reader, CancellationToken::new());

    writer.write_all(b"hello world").await.unwrap();
    drop(writer);

    let listener = stream.create_listener();

    let mut collected = Vec::new();
    loop {
        let mut buf = [0u8; 64];
        match listener.read(&mut buf) {
            Ok(0) => {
                if stream.error().is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(n) => collected.extend_from_slice(&buf[..n]),
            Err(_) => break,
        }
    }

    assert_eq!(collected, b"hello world");
    assert!(stream.error().is_some());
}

#[tokio::test]
async fn second_reader_replays_from_start() {
    let (reader, mut writer) = upstream_pair();
    let stream = Stream::new(reader, CancellationToken::new());

    writer.write_all(b"hello world").await.unwrap();
    drop(writer);

    let a = stream.create_listener();
    drain_until_error(&stream, &a).await;

    let b = stream.create_listener();
    assert_eq!(b.position(), 0);
    let collected = drain_until_error(&stream, &b).await;
    assert_eq!(collected, b"hello world");
}

#[tokio::test]
async fn concurrent_fan_out_staggered_listeners() {
    let (reader, mut writer) = upstream_pair();
    let stream = Stream::new(reader, CancellationToken::new());

    let early = stream.create_listener();

    let pump = tokio::spawn(async move {
        for i in 0..10u8 {
            writer.write_all(&[i; 10]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let mid = stream.create_listener();
    let mid_start = mid.position();

    pump.await.unwrap();

    let early_bytes = drain_until_error(&stream, &early).await;
    let mid_bytes = drain_until_error(&stream, &mid).await;

    assert_eq!(early_bytes.len(), 100);
    let full = stream.content();
    assert_eq!(&full[mid_start..], mid_bytes.as_slice());
}

#[tokio::test]
async fn seek_to_end_makes_listener_live_tail() {
    let (reader, mut writer) = upstream_pair();
    let stream = Stream::new(reader, CancellationToken::new());

    writer.write_all(b"first").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let listener = stream.create_listener();
    // Wait for the pumper to have actually appended "first".
    while stream.size() < 5 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    listener.set_position(stream.size());

    writer.write_all(b"second").await.unwrap();
    drop(writer);

    let collected = drain_until_error(&stream, &listener).await;
    assert_eq!(collected, b"second");
}

#[tokio::test]
async fn closed_listener_reads_as_zero_and_disappears() {
    let (reader, mut writer) = upstream_pair();
    let stream = Stream::new(reader, CancellationToken::new());
    writer.write_all(b"data").await.unwrap();
    drop(writer);

    let listener = stream.create_listener();
    listener.close();

    assert!(stream.listeners().is_empty());
    let mut buf = [0u8; 8];
    assert_eq!(listener.read(&mut buf).unwrap(), 0);

    // Closing again is a no-op.
    listener.close();
}

#[tokio::test]
async fn close_waits_for_pumper_and_is_idempotent() {
    let (reader, _writer) = upstream_pair();
    let cancel = CancellationToken::new();
    let stream = Stream::new(reader, cancel);
    let _listener = stream.create_listener();

    stream.close().await.unwrap();
    // A second close observes the already-fired completion signal.
    stream.close().await.unwrap();
}

async fn drain_until_error(stream: &Stream, listener: &relaycache::cache::Listener) -> Vec<u8> {
    let mut collected = Vec::new();
    loop {
        let mut buf = [0u8; 64];
        match listener.read(&mut buf) {
            Ok(0) => {
                if stream.error().is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(n) => collected.extend_from_slice(&buf[..n]),
            Err(_) => break,
        }
    }
    collected
}

/// An in-memory `tracing-subscriber` writer, so tests can assert on
/// structured log content instead of just process stdout.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

/// Runs on the current-thread runtime so the pumper task polls on the
/// same thread as the test body, keeping it under the thread-local
/// subscriber installed below.
#[tokio::test(flavor = "current_thread")]
async fn pumper_logs_start_and_terminal_events() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .without_time()
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let (reader, mut writer) = upstream_pair();
    let stream = Stream::new(reader, CancellationToken::new());
    writer.write_all(b"x").await.unwrap();
    drop(writer);

    let listener = stream.create_listener();
    drain_until_error(&stream, &listener).await;

    let output = logs.contents();
    assert!(
        output.contains("stream pumper starting"),
        "missing pumper-start event in: {output}"
    );
    assert!(
        output.contains("stream pumper reached end of upstream data"),
        "missing terminal-status event in: {output}"
    );
}
