//! Coordinator-side client for one region worker
//!
//! Keeps at most one TCP connection per worker. The connection is opened
//! lazily, reused across frames, and dropped whenever a call fails or times
//! out so that a late reply can never be mistaken for the next frame's.

use super::protocol::*;
use super::RegionOutput;
use crate::error::ClusterError;
use anyhow::Context;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Debug)]
pub struct RemoteNode {
    index: usize,
    address: String,
    stream: Option<TcpStream>,
}

impl RemoteNode {
    pub fn new(index: usize, address: impl Into<String>) -> Self {
        Self {
            index,
            address: address.into(),
            stream: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the connection now instead of on the first call
    pub async fn connect(&mut self, timeout: Duration) -> Result<(), ClusterError> {
        match tokio::time::timeout(timeout, open(&self.address)).await {
            Ok(Ok(stream)) => {
                self.stream = Some(stream);
                Ok(())
            }
            Ok(Err(e)) => Err(self.network_error(format!("{:#}", e))),
            Err(_) => Err(self.network_error(format!("connect timed out after {:?}", timeout))),
        }
    }

    /// Send one compute request and wait at most `timeout` for the reply
    ///
    /// The timeout covers connecting, sending and receiving.
    pub async fn compute(
        &mut self,
        request: &ComputeRegionRequest,
        timeout: Duration,
    ) -> Result<RegionOutput, ClusterError> {
        let reply = match tokio::time::timeout(timeout, self.exchange(request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                self.stream = None;
                return Err(self.network_error(format!("{:#}", e)));
            }
            Err(_) => {
                self.stream = None;
                return Err(self.network_error(format!("no reply within {:?}", timeout)));
            }
        };

        let node_index = request.node_index;
        match reply {
            Message::RegionComputed(response) => {
                if response.node_index != node_index {
                    self.stream = None;
                    return Err(ClusterError::compute(
                        node_index,
                        format!("reply was for node {}", response.node_index),
                    ));
                }
                let expected = request.region.pixel_bytes();
                if response.pixels.len() != expected {
                    return Err(ClusterError::compute(
                        node_index,
                        format!("expected {} pixel bytes, got {}", expected, response.pixels.len()),
                    ));
                }
                let thread_times = response.thread_times();
                Ok(RegionOutput {
                    node_index: self.index,
                    pixels: response.pixels,
                    thread_times,
                })
            }
            Message::Error(err) => Err(ClusterError::compute(
                node_index,
                format!("{} reported: {}", err.node_id, err.error),
            )),
            Message::ComputeRegion(_) => {
                self.stream = None;
                Err(ClusterError::compute(node_index, "worker sent a request instead of a reply"))
            }
        }
    }

    async fn exchange(&mut self, request: &ComputeRegionRequest) -> anyhow::Result<Message> {
        if self.stream.is_none() {
            debug!(address = %self.address, "connecting to region worker");
            self.stream = Some(open(&self.address).await?);
        }
        let stream = self.stream.as_mut().context("connection unavailable")?;

        write_message(stream, &Message::ComputeRegion(request.clone())).await?;
        read_message(stream).await
    }

    fn network_error(&self, reason: String) -> ClusterError {
        ClusterError::network(self.index as i32, &self.address, reason)
    }
}

async fn open(address: &str) -> anyhow::Result<TcpStream> {
    let stream = TcpStream::connect(address)
        .await
        .with_context(|| format!("Failed to connect to {}", address))?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}
