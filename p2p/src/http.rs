//! HTTP transport
//!
//! Delivers messages to a peer's RPC endpoint (`POST /rpc/send_in_msg`). Rejections
//! reported by the peer surface as unreachable, like any other failed send.

use crate::message::Message;
use crate::transport::Transport;
use async_trait::async_trait;
use reqwest::Client;
use rvr_core::{RvrError, RvrResult};
use serde::Deserialize;
use std::time::Duration;
use tracing::trace;

/// Envelope returned by every RPC route
#[derive(Debug, Deserialize)]
struct RpcReply {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// reqwest-backed transport
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// URL of `method` on the node at `addr`
    pub fn rpc_url(addr: &str, method: &str) -> String {
        let base = addr.trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            format!("{}/rpc/{}", base, method)
        } else {
            format!("http://{}/rpc/{}", base, method)
        }
    }

    async fn check(addr: &str, response: reqwest::Response) -> RvrResult<()> {
        let reply: RpcReply = response
            .json()
            .await
            .map_err(|e| RvrError::PeerUnreachable(format!("{}: {}", addr, e)))?;
        if reply.success {
            Ok(())
        } else {
            Err(RvrError::PeerUnreachable(format!(
                "{}: {}",
                addr,
                reply.error.unwrap_or_else(|| "rejected".to_string())
            )))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_in_msg(&self, addr: &str, msg: &Message, timeout: Duration) -> RvrResult<()> {
        let url = Self::rpc_url(addr, "send_in_msg");
        trace!(%url, kind = %msg.kind, "sending message");
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(msg)
            .send()
            .await
            .map_err(|e| RvrError::PeerUnreachable(format!("{}: {}", addr, e)))?;
        Self::check(addr, response).await
    }

    async fn black_hole(&self, addr: &str, payload: &[u8], timeout: Duration) -> RvrResult<()> {
        let url = Self::rpc_url(addr, "black_hole");
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| RvrError::PeerUnreachable(format!("{}: {}", addr, e)))?;
        Self::check(addr, response).await
    }
}
