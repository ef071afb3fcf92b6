//! Out-of-process embedding worker client
//!
//! One persistent duplex byte stream carries newline-delimited JSON
//! frames, one object per line. A background reader task matches each
//! response line to the pending call with the same correlation id, so any
//! number of requests can be in flight at once and responses may arrive in
//! any order. Unmatched or malformed lines are discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::EMBEDDING_DIM;

#[derive(Debug, Serialize)]
struct WorkerRequest<'a> {
    id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct WorkerResponse {
    id: String,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    error: Option<String>,
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Option<Vec<f32>>>>>>;

/// Client side of the embedding worker protocol.
///
/// The connection is established lazily on first use and replaced when it
/// drops. Individual requests are never retried: a request caught by a
/// dying connection resolves to `None` and stays failed.
pub struct WorkerClient {
    addr: Option<String>,
    conn: tokio::sync::Mutex<Option<Arc<WorkerConn>>>,
}

impl WorkerClient {
    /// Client for a worker listening at `addr` (`host:port`). No
    /// connection is attempted until the first call.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: Some(addr.into()),
            conn: tokio::sync::Mutex::new(None),
        }
    }

    /// Client over an already-established duplex stream. Used where the
    /// transport is supplied by the caller, e.g. in-memory pipes in tests.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self {
            addr: None,
            conn: tokio::sync::Mutex::new(Some(Arc::new(WorkerConn::spawn(stream)))),
        }
    }

    /// Request one embedding. Every transport or worker-reported failure
    /// yields `None`.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let conn = self.connection().await?;
        conn.request(text).await
    }

    async fn connection(&self) -> Option<Arc<WorkerConn>> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            if !conn.is_closed() {
                return Some(Arc::clone(conn));
            }
        }
        let addr = self.addr.as_deref()?;
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!(addr, "connected to embedding worker");
                let conn = Arc::new(WorkerConn::spawn(stream));
                *guard = Some(Arc::clone(&conn));
                Some(conn)
            }
            Err(err) => {
                warn!(addr, error = %err, "embedding worker unreachable");
                *guard = None;
                None
            }
        }
    }
}

struct WorkerConn {
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl WorkerConn {
    fn spawn<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            BufReader::new(read_half),
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));
        Self {
            writer: tokio::sync::Mutex::new(Box::new(write_half)),
            pending,
            closed,
            reader,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn request(&self, text: &str) -> Option<Vec<f32>> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(id.clone(), tx);

        let frame = match serde_json::to_string(&WorkerRequest { id: &id, text }) {
            Ok(mut line) => {
                line.push('\n');
                line
            }
            Err(err) => {
                warn!(error = %err, "failed to encode worker request");
                self.forget(&id);
                return None;
            }
        };

        {
            let mut writer = self.writer.lock().await;
            if let Err(err) = writer.write_all(frame.as_bytes()).await {
                warn!(error = %err, "worker write failed");
                self.closed.store(true, Ordering::SeqCst);
                self.forget(&id);
                return None;
            }
            if let Err(err) = writer.flush().await {
                warn!(error = %err, "worker flush failed");
                self.closed.store(true, Ordering::SeqCst);
                self.forget(&id);
                return None;
            }
        }

        // If the reader drained the pending map before this id was
        // registered, no response can ever arrive for it.
        if self.is_closed() {
            self.forget(&id);
            return None;
        }

        // The reader task resolves the id; a dropped sender means the
        // connection died first.
        rx.await.unwrap_or(None)
    }

    fn forget(&self, id: &str) {
        self.pending.lock().expect("pending map poisoned").remove(id);
    }
}

impl Drop for WorkerConn {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(reader: BufReader<R>, pending: PendingMap, closed: Arc<AtomicBool>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => dispatch_line(&line, &pending),
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "worker stream read failed");
                break;
            }
        }
    }
    closed.store(true, Ordering::SeqCst);
    // Dropping the senders resolves every still-pending call to None.
    pending.lock().expect("pending map poisoned").clear();
}

fn dispatch_line(line: &str, pending: &PendingMap) {
    if line.trim().is_empty() {
        return;
    }
    let response: WorkerResponse = match serde_json::from_str(line) {
        Ok(response) => response,
        Err(_) => {
            debug!("discarding malformed worker frame");
            return;
        }
    };
    let Some(tx) = pending
        .lock()
        .expect("pending map poisoned")
        .remove(&response.id)
    else {
        debug!(id = %response.id, "discarding unmatched worker frame");
        return;
    };

    let vector = match (response.embedding, response.error) {
        (_, Some(error)) => {
            warn!(%error, "worker reported embedding failure");
            None
        }
        (Some(vector), None) if vector.len() == EMBEDDING_DIM => Some(vector),
        (Some(vector), None) => {
            warn!(dims = vector.len(), "worker returned wrong embedding dimension");
            None
        }
        (None, None) => {
            debug!("worker frame carried neither embedding nor error");
            None
        }
    };
    let _ = tx.send(vector);
}
