//! Async TCP/AF_UNIX output streams: pool-backed double buffering for
//! accepted clients, and a reconnecting client-side writer with a spooled
//! backlog for when the far end is unreachable.
//!
//! Ported from `asio_output_impl.cpp`'s `asio_output_stream<Socket>`
//! template (double buffer + pool + write-then-rearm state machine) and
//! `services/forwarder/src/local_fanout.rs`'s broadcast-channel fan-out,
//! translated onto `tokio`.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log_text::TextOutput;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

pub const DEFAULT_UNIX_INPUT_PATH: &str = "/tmp/eagine-log";
pub const DEFAULT_UNIX_OUTPUT_PATH: &str = "/tmp/eagine-text-log";
pub const DEFAULT_TCP_INPUT_PORT: u16 = 34917;
pub const DEFAULT_TCP_OUTPUT_PORT: u16 = 34915;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// Buffer pool
// ---------------------------------------------------------------------------

const POOL_CAPACITY: usize = 64;

/// Process-wide pool of reusable write buffers. Only ever touched from the
/// single cooperative-loop thread's tasks.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn acquire(&self) -> PooledBuffer {
        let buf = self.inner.lock().unwrap().pop().unwrap_or_default();
        PooledBuffer {
            buf,
            pool: Arc::clone(&self.inner),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new()
    }
}

/// A move-only buffer on loan from a [`BufferPool`]; returns itself (after
/// clearing) to the pool on drop.
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;
    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        if let Ok(mut pool) = self.pool.lock() {
            if pool.len() < POOL_CAPACITY {
                pool.push(buf);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Double buffer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Idle,
    Writing,
}

/// Accumulates appended bytes into a pending, pool-backed buffer; `swap`
/// hands the accumulated bytes to the caller for writing and marks the
/// stream `Writing` until [`Self::mark_idle`] is called back.
pub struct DoubleBuffer {
    pool: BufferPool,
    pending: PooledBuffer,
    state: WriteState,
}

impl DoubleBuffer {
    pub fn new(pool: BufferPool) -> Self {
        let pending = pool.acquire();
        DoubleBuffer {
            pool,
            pending,
            state: WriteState::Idle,
        }
    }

    pub fn append(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    pub fn is_writing(&self) -> bool {
        self.state == WriteState::Writing
    }

    /// Takes whatever has accumulated since the last swap, or `None` if
    /// nothing is pending.
    pub fn swap(&mut self) -> Option<PooledBuffer> {
        if self.pending.is_empty() {
            return None;
        }
        self.state = WriteState::Writing;
        Some(std::mem::replace(&mut self.pending, self.pool.acquire()))
    }

    pub fn mark_idle(&mut self) {
        self.state = WriteState::Idle;
    }
}

async fn drain_double_buffer<W: tokio::io::AsyncWrite + Unpin>(
    stream: &mut W,
    db: &mut DoubleBuffer,
) -> io::Result<()> {
    while let Some(chunk) = db.swap() {
        stream.write_all(&chunk).await?;
    }
    db.mark_idle();
    Ok(())
}

// ---------------------------------------------------------------------------
// Server-side fan-out outputs (TCP / AF_UNIX acceptors)
// ---------------------------------------------------------------------------

/// An accepting output: every `write()` is broadcast to every currently
/// connected client. `flush` is a no-op — writes go out as soon as the
/// per-client task drains its double buffer.
pub struct FanoutOutput {
    tx: broadcast::Sender<Vec<u8>>,
}

impl FanoutOutput {
    fn new(tx: broadcast::Sender<Vec<u8>>) -> Self {
        FanoutOutput { tx }
    }

    /// Accept TCP clients on `addr` (defaults to port [`DEFAULT_TCP_OUTPUT_PORT`]
    /// when `addr` is `None`), spawning the accept loop in the background.
    pub async fn bind_tcp(addr: Option<&str>) -> Result<Self, TransportError> {
        let addr = addr
            .map(str::to_owned)
            .unwrap_or_else(|| format!("0.0.0.0:{DEFAULT_TCP_OUTPUT_PORT}"));
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let (tx, _rx) = broadcast::channel(1024);
        let pool = BufferPool::new();
        let accept_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        debug!(%peer, "output client connected");
                        let rx = accept_tx.subscribe();
                        tokio::spawn(serve_tcp_client(stream, rx, pool.clone()));
                    }
                    Err(e) => {
                        warn!(error = %e, "tcp output accept failed");
                        break;
                    }
                }
            }
        });
        Ok(FanoutOutput::new(tx))
    }

    /// Accept AF_UNIX clients on `path` (defaults to
    /// [`DEFAULT_UNIX_OUTPUT_PATH`] when `path` is `None`).
    pub async fn bind_unix(path: Option<&Path>) -> Result<Self, TransportError> {
        let path: PathBuf = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_UNIX_OUTPUT_PATH));
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).map_err(|source| TransportError::Bind {
            addr: path.display().to_string(),
            source,
        })?;
        let (tx, _rx) = broadcast::channel(1024);
        let pool = BufferPool::new();
        let accept_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _peer)) => {
                        debug!("output client connected");
                        let rx = accept_tx.subscribe();
                        tokio::spawn(serve_unix_client(stream, rx, pool.clone()));
                    }
                    Err(e) => {
                        warn!(error = %e, "unix output accept failed");
                        break;
                    }
                }
            }
            let _ = std::fs::remove_file(&path);
        });
        Ok(FanoutOutput::new(tx))
    }
}

impl TextOutput for FanoutOutput {
    fn write(&mut self, chunk: &str) {
        // No subscribers is not an error: the chunk is simply dropped,
        // matching "refusal" semantics living entirely at the sink layer.
        let _ = self.tx.send(chunk.as_bytes().to_vec());
    }

    fn flush(&mut self) {}
}

async fn serve_tcp_client(mut stream: TcpStream, rx: broadcast::Receiver<Vec<u8>>, pool: BufferPool) {
    serve_client(&mut stream, rx, pool).await;
}

async fn serve_unix_client(mut stream: UnixStream, rx: broadcast::Receiver<Vec<u8>>, pool: BufferPool) {
    serve_client(&mut stream, rx, pool).await;
}

async fn serve_client<W: tokio::io::AsyncWrite + Unpin>(
    stream: &mut W,
    mut rx: broadcast::Receiver<Vec<u8>>,
    pool: BufferPool,
) {
    let mut db = DoubleBuffer::new(pool);
    loop {
        match rx.recv().await {
            Ok(data) => db.append(&data),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "output client lagged, dropping missed chunks");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
        if drain_double_buffer(stream, &mut db).await.is_err() {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk spool — length-prefixed temporary storage for reconnect replay
// ---------------------------------------------------------------------------

fn write_varint(out: &mut Vec<u8>, mut n: u64) {
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            out.push(byte);
            break;
        } else {
            out.push(byte | 0x80);
        }
    }
}

fn read_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &b) in bytes.iter().enumerate() {
        value |= ((b & 0x7f) as u64) << shift;
        if b & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
    None
}

/// Temporary, length-prefixed (varint) chunk storage used while a
/// client-side output is disconnected, so accumulated output can be replayed
/// in order once the connection is reestablished.
pub struct ChunkSpool {
    path: PathBuf,
}

impl ChunkSpool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ChunkSpool { path: path.into() }
    }

    pub async fn append(&self, chunk: &[u8]) -> io::Result<()> {
        let mut framed = Vec::with_capacity(chunk.len() + 5);
        write_varint(&mut framed, chunk.len() as u64);
        framed.extend_from_slice(chunk);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&framed).await
    }

    /// Reads every spooled chunk in FIFO order and truncates the spool file.
    pub async fn drain(&self) -> io::Result<Vec<Vec<u8>>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut out = Vec::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            let Some((len, consumed)) = read_varint(&bytes[pos..]) else {
                break;
            };
            pos += consumed;
            let len = len as usize;
            if pos + len > bytes.len() {
                break;
            }
            out.push(bytes[pos..pos + len].to_vec());
            pos += len;
        }
        let _ = tokio::fs::remove_file(&self.path).await;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Bounded exponential backoff
// ---------------------------------------------------------------------------

/// Minimum 1s, doubling on each failed attempt up to a cap, reset to
/// minimum on a successful connect.
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Backoff {
            min,
            max,
            current: min,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn bump(&mut self) {
        self.current = (self.current * 2).min(self.max);
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

// ---------------------------------------------------------------------------
// Reconnecting client-side output
// ---------------------------------------------------------------------------

/// A `TextOutput` that connects outward to a fixed TCP address (the
/// `--netcat`/`--socat` consumer role), reconnecting with bounded backoff.
/// While disconnected, chunks are appended to a [`ChunkSpool`] and replayed,
/// in order, immediately after the next successful connect.
pub struct ReconnectingClientOutput {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ReconnectingClientOutput {
    pub fn connect_tcp(addr: String, spool_path: PathBuf) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_reconnecting_client(addr, spool_path, rx));
        ReconnectingClientOutput { tx }
    }
}

impl TextOutput for ReconnectingClientOutput {
    fn write(&mut self, chunk: &str) {
        let _ = self.tx.send(chunk.as_bytes().to_vec());
    }

    fn flush(&mut self) {}
}

async fn run_reconnecting_client(
    addr: String,
    spool_path: PathBuf,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let spool = ChunkSpool::new(spool_path);
    let mut backoff = Backoff::default();
    let mut queue: VecDeque<Vec<u8>> = VecDeque::new();

    loop {
        let mut stream = match TcpStream::connect(&addr).await {
            Ok(s) => {
                backoff.reset();
                s
            }
            Err(e) => {
                warn!(%addr, error = %e, backoff = ?backoff.current(), "reconnect failed");
                tokio::time::sleep(backoff.current()).await;
                backoff.bump();
                continue;
            }
        };
        let _ = stream.set_nodelay(true);

        match spool.drain().await {
            Ok(replayed) => queue.extend(replayed),
            Err(e) => warn!(error = %e, "failed to drain chunk spool"),
        }

        let mut connected = true;
        while connected {
            if let Some(chunk) = queue.pop_front() {
                if stream.write_all(&chunk).await.is_err() {
                    queue.push_front(chunk);
                    connected = false;
                    break;
                }
                continue;
            }
            match rx.recv().await {
                Some(chunk) => {
                    if stream.write_all(&chunk).await.is_err() {
                        queue.push_back(chunk);
                        connected = false;
                    }
                }
                None => return, // sender dropped: shutting down
            }
        }

        // disconnected: spool anything already queued, then keep accepting
        // new writes into the spool until reconnect succeeds.
        for chunk in queue.drain(..) {
            if let Err(e) = spool.append(&chunk).await {
                warn!(error = %e, "failed to spool chunk while disconnected");
            }
        }
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(chunk) => {
                        if let Err(e) = spool.append(&chunk).await {
                            warn!(error = %e, "failed to spool chunk while disconnected");
                        }
                    }
                    None => return,
                },
                _ = tokio::time::sleep(backoff.current()) => break,
            }
        }
        backoff.bump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trips() {
        for n in [0u64, 1, 127, 128, 300, 16384, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, n);
            let (decoded, consumed) = read_varint(&buf).unwrap();
            assert_eq!(decoded, n);
            assert_eq!(consumed, buf.len());
        }
    }

    #[tokio::test]
    async fn chunk_spool_replays_in_fifo_order() {
        let dir = tempfile::tempdir().unwrap();
        let spool = ChunkSpool::new(dir.path().join("spool.bin"));
        spool.append(b"first").await.unwrap();
        spool.append(b"second").await.unwrap();
        let drained = spool.drain().await.unwrap();
        assert_eq!(drained, vec![b"first".to_vec(), b"second".to_vec()]);
        // second drain is empty: the spool file was truncated
        assert!(spool.drain().await.unwrap().is_empty());
    }

    #[test]
    fn backoff_doubles_until_capped_and_resets() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(8));
        assert_eq!(b.current(), Duration::from_secs(1));
        b.bump();
        assert_eq!(b.current(), Duration::from_secs(2));
        b.bump();
        b.bump();
        b.bump();
        assert_eq!(b.current(), Duration::from_secs(8), "capped at max");
        b.reset();
        assert_eq!(b.current(), Duration::from_secs(1));
    }

    #[test]
    fn buffer_pool_reuses_returned_buffers() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"hello");
        }
        let buf2 = pool.acquire();
        assert!(buf2.is_empty(), "returned buffer must be cleared");
    }

    #[test]
    fn double_buffer_swap_is_none_when_empty() {
        let pool = BufferPool::new();
        let mut db = DoubleBuffer::new(pool);
        assert!(db.swap().is_none());
        db.append(b"x");
        assert!(db.swap().is_some());
    }
}
