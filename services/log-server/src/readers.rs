//! The three reader variants: stdin, AF_UNIX accept, TCP accept. Each
//! drives its connections on the same single-threaded `LocalSet` the rest
//! of the pipeline runs on — `Rc<RefCell<_>>` sinks and factories are not
//! `Send`, so every task here is `spawn_local`, not `spawn` (mirrors the
//! cooperative, single-OS-thread event loop; see DESIGN.md for why this
//! isn't expressed as a `dyn Reader` trait object).

use crate::wire::WireAdapter;
use log_model::Severity;
use log_sink::StreamSinkFactory;
use log_valtree::StreamParser;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, UnixListener};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Matches the streaming parser's bounded-memory guarantee: no single
/// event may grow past this before it's rejected.
const MAX_TOKEN_SIZE: usize = 1 << 20;
const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads `stream` to EOF, feeding bytes through a fresh parser/sink pair.
/// `is_stdin` selects the EOF-without-`finish` behavior (synthesize
/// `finish{clean=false}`) instead of the ordinary disconnect-aborts-the-stream
/// behavior every other reader uses.
async fn drive<R: AsyncRead + Unpin>(
    mut stream: R,
    factory: Rc<RefCell<dyn StreamSinkFactory>>,
    severity_threshold: Severity,
    is_stdin: bool,
) {
    let sink = factory.borrow_mut().make_stream();
    let stream_id = sink.borrow().stream_id();
    let mut adapter = WireAdapter::new(sink, severity_threshold);
    let mut parser = StreamParser::builder().max_token_size(MAX_TOKEN_SIZE).build();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                if is_stdin {
                    adapter.on_stdin_eof();
                } else {
                    debug!(stream_id, "client disconnected");
                    adapter.on_disconnect();
                }
                break;
            }
            Ok(n) => {
                if let Err(e) = parser.feed(&buf[..n], &mut adapter) {
                    warn!(stream_id, error = %e, "parser error, closing stream");
                    adapter.on_disconnect();
                    break;
                }
            }
            Err(e) => {
                warn!(stream_id, error = %e, "read error, aborting stream");
                adapter.on_disconnect();
                break;
            }
        }
    }
}

/// Spawns the stdin reader. Always active: the original EAGine `log_server`
/// reads `std::cin` unconditionally alongside whatever accept loops are
/// configured.
pub fn spawn_stdin_reader(
    factory: Rc<RefCell<dyn StreamSinkFactory>>,
    severity_threshold: Severity,
) -> JoinHandle<()> {
    tokio::task::spawn_local(async move {
        let stdin = tokio::io::stdin();
        drive(stdin, factory, severity_threshold, true).await;
    })
}

/// Binds an AF_UNIX accept loop at `path`; each accepted connection gets a
/// fresh parser+sink pair. Socket errors on one client tear down only that
/// client.
pub fn spawn_unix_reader(
    path: impl AsRef<Path>,
    factory: Rc<RefCell<dyn StreamSinkFactory>>,
    severity_threshold: Severity,
) -> Result<JoinHandle<()>, ReaderError> {
    let path = path.as_ref().to_path_buf();
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path).map_err(|source| ReaderError::Bind {
        addr: path.display().to_string(),
        source,
    })?;
    info!(path = %path.display(), "AF_UNIX input reader listening");

    Ok(tokio::task::spawn_local(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    debug!("accepted AF_UNIX input connection");
                    let factory = Rc::clone(&factory);
                    tokio::task::spawn_local(async move {
                        drive(stream, factory, severity_threshold, false).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "AF_UNIX input accept failed, stopping this reader");
                    break;
                }
            }
        }
        let _ = std::fs::remove_file(&path);
    }))
}

/// Binds a TCP accept loop at `addr` (`HOST:PORT`, or `HOST` alone to use
/// the default input port). Same per-client isolation as the AF_UNIX reader.
pub async fn spawn_tcp_reader(
    addr: &str,
    factory: Rc<RefCell<dyn StreamSinkFactory>>,
    severity_threshold: Severity,
) -> Result<(JoinHandle<()>, std::net::SocketAddr), ReaderError> {
    let addr = normalize_tcp_addr(addr, log_transport::DEFAULT_TCP_INPUT_PORT);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ReaderError::Bind { addr: addr.clone(), source })?;
    let local_addr = listener.local_addr()?;
    info!(%addr, "TCP input reader listening");

    let handle = tokio::task::spawn_local(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted TCP input connection");
                    let _ = stream.set_nodelay(true);
                    let factory = Rc::clone(&factory);
                    tokio::task::spawn_local(async move {
                        drive(stream, factory, severity_threshold, false).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "TCP input accept failed, stopping this reader");
                    break;
                }
            }
        }
    });
    Ok((handle, local_addr))
}

fn normalize_tcp_addr(addr: &str, default_port: u16) -> String {
    if addr.contains(':') {
        addr.to_owned()
    } else {
        format!("{addr}:{default_port}")
    }
}
