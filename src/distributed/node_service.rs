//! Region worker service
//!
//! Runs on each worker host. The service:
//! - Listens for coordinator connections (one task per connection)
//! - Validates the protocol version of every request
//! - Evaluates the requested region with its own local concurrency
//! - Replies with column-major pixels plus per-thread timings
//!
//! Between calls the only state kept is one scratch buffer per node index,
//! reallocated only when the requested region size changes. A failed
//! evaluation is reported back as [`Message::Error`]; it never takes the
//! service down.

use crate::distributed::protocol::*;
use crate::error::ClusterError;
use crate::render::FragmentEvaluator;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Worker side of the compute RPC
#[derive(Clone)]
pub struct RegionWorkerService {
    inner: Arc<WorkerState>,
}

struct WorkerState {
    /// Port to listen on
    listen_port: u16,

    /// Node identifier (hostname)
    node_id: String,

    evaluator: FragmentEvaluator,

    /// Reusable output buffers keyed by node index
    buffers: Mutex<HashMap<i32, Vec<u8>>>,

    /// Number of times a buffer had to be (re)allocated
    allocations: AtomicU64,
}

impl RegionWorkerService {
    pub fn new(listen_port: u16, evaluator: FragmentEvaluator) -> Self {
        Self {
            inner: Arc::new(WorkerState {
                listen_port,
                node_id: get_node_id(),
                evaluator,
                buffers: Mutex::new(HashMap::new()),
                allocations: AtomicU64::new(0),
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub fn allocations(&self) -> u64 {
        self.inner.allocations.load(Ordering::Relaxed)
    }

    /// Bind the configured port on all interfaces
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("0.0.0.0:{}", self.inner.listen_port);
        TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind region worker on {}", addr))
    }

    /// Bind and serve until the process is stopped
    pub async fn run(self) -> Result<()> {
        let listener = self.bind().await?;

        println!("Region worker listening on port {}", self.inner.listen_port);
        println!("Node ID: {}", self.inner.node_id);
        println!("Local concurrency: {}", self.inner.evaluator.concurrency());
        println!("Waiting for coordinator connections...");

        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await.context("Failed to accept connection")?;
            info!(%peer, "coordinator connected");

            let service = self.clone();
            tokio::spawn(async move {
                if let Err(e) = service.handle_connection(stream, peer).await {
                    warn!(%peer, "connection closed with error: {:#}", e);
                }
            });
        }
    }

    /// Serve request/response pairs until the peer hangs up
    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let _ = stream.set_nodelay(true);

        loop {
            let msg = match read_message(&mut stream).await {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(%peer, "stopped reading: {:#}", e);
                    return Ok(());
                }
            };

            let reply = match msg {
                Message::ComputeRegion(request) => self.handle_request(request).await,
                other => Message::Error(ErrorMessage {
                    node_id: self.inner.node_id.clone(),
                    node_index: -1,
                    error: format!("Expected ComputeRegion, got {}", message_kind(&other)),
                }),
            };

            write_message(&mut stream, &reply).await?;

            // Take the pixel buffer back for the next call of this node index
            if let Message::RegionComputed(response) = reply {
                self.store_buffer(response.node_index, response.pixels);
            }
        }
    }

    /// Compute one region and build the reply
    pub async fn handle_request(&self, request: ComputeRegionRequest) -> Message {
        let node_index = request.node_index;

        if request.protocol_version != PROTOCOL_VERSION {
            warn!(
                node_index,
                coordinator = request.protocol_version,
                worker = PROTOCOL_VERSION,
                "protocol version mismatch"
            );
            return self.error_reply(
                node_index,
                format!(
                    "Protocol version mismatch: coordinator={}, worker={}",
                    request.protocol_version, PROTOCOL_VERSION
                ),
            );
        }

        match self.compute(request).await {
            Ok(msg) => msg,
            Err(e) => {
                warn!(node_index, "{}", e);
                self.error_reply(node_index, e.to_string())
            }
        }
    }

    async fn compute(&self, request: ComputeRegionRequest) -> Result<Message, ClusterError> {
        let node_index = request.node_index;
        let region = request.region;
        let params = request.params();

        if !region.is_consistent() {
            return Err(ClusterError::compute(
                node_index,
                format!("region {:?} has inconsistent width/height", region),
            ));
        }
        if region.pixel_bytes() > MAX_MESSAGE_BYTES {
            return Err(ClusterError::compute(
                node_index,
                format!(
                    "region {}x{} needs {} bytes, more than one reply can carry ({})",
                    region.width,
                    region.height,
                    region.pixel_bytes(),
                    MAX_MESSAGE_BYTES
                ),
            ));
        }

        let mut buffer = self.take_buffer(node_index, region.pixel_bytes())?;
        let evaluator = self.inner.evaluator.clone();

        let (buffer, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = evaluator.evaluate_into(&region, &params, &mut buffer);
            (buffer, outcome)
        })
        .await
        .map_err(|e| ClusterError::compute(node_index, format!("evaluation task failed: {}", e)))?;

        let thread_times = outcome.map_err(|e| ClusterError::compute(node_index, e.to_string()))?;

        debug!(
            node_index,
            x_start = region.x_start,
            x_end = region.x_end,
            bytes = buffer.len(),
            "region computed"
        );

        Ok(Message::RegionComputed(ComputeRegionResponse::new(
            node_index,
            buffer,
            &thread_times,
        )))
    }

    /// Reuse this node index's buffer when the size matches, otherwise allocate
    fn take_buffer(&self, node_index: i32, size: usize) -> Result<Vec<u8>, ClusterError> {
        let previous = self
            .inner
            .buffers
            .lock()
            .map_err(|_| ClusterError::compute(node_index, "buffer table poisoned"))?
            .remove(&node_index);

        match previous {
            Some(buffer) if buffer.len() == size => Ok(buffer),
            _ => {
                let mut fresh = Vec::new();
                fresh.try_reserve_exact(size).map_err(|e| {
                    ClusterError::compute(node_index, format!("cannot allocate {} byte buffer: {}", size, e))
                })?;
                fresh.resize(size, 0);
                self.inner.allocations.fetch_add(1, Ordering::Relaxed);
                Ok(fresh)
            }
        }
    }

    fn store_buffer(&self, node_index: i32, buffer: Vec<u8>) {
        if let Ok(mut buffers) = self.inner.buffers.lock() {
            buffers.insert(node_index, buffer);
        }
    }

    fn error_reply(&self, node_index: i32, error: String) -> Message {
        Message::Error(ErrorMessage {
            node_id: self.inner.node_id.clone(),
            node_index,
            error,
        })
    }
}

fn message_kind(msg: &Message) -> &'static str {
    match msg {
        Message::ComputeRegion(_) => "ComputeRegion",
        Message::RegionComputed(_) => "RegionComputed",
        Message::Error(_) => "Error",
    }
}

/// Get node identifier (hostname)
fn get_node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
