// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ephemeral client connections to the command socket.
//!
//! Every send from outside the poller task goes through one of these: a
//! fresh connection announces a throwaway identity, delivers one frame,
//! optionally waits for one addressed reply, and closes. The poller remains
//! the only long-lived owner of any socket.

use std::time::Duration;

use futures_util::SinkExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use uuid::Uuid;

use crate::protocol::{decode_frame, encode_tail, Frame};
use crate::tick::epoch_secs;

/// Client side of the command socket.
#[derive(Debug, Clone)]
pub struct CommandClient {
    address: String,
}

impl CommandClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into() }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send `[code, ...payload]` with a fresh timestamp, fire-and-forget.
    pub async fn send(&self, tail: &[Value]) -> anyhow::Result<()> {
        let mut framed = self.connect().await?;
        self.deliver(&mut framed, tail).await?;
        Ok(())
    }

    /// Send `[code, ...payload]` and wait for a single reply frame
    /// addressed back to this connection.
    pub async fn request(&self, tail: &[Value], timeout: Duration) -> anyhow::Result<Frame> {
        let mut framed = self.connect().await?;
        self.deliver(&mut framed, tail).await?;
        let reply = tokio::time::timeout(timeout, framed.next())
            .await
            .map_err(|_| anyhow::anyhow!("timeout, no reply received"))?
            .ok_or_else(|| anyhow::anyhow!("command socket closed before replying"))?;
        decode_frame(&reply?).map_err(Into::into)
    }

    async fn connect(&self) -> anyhow::Result<Framed<TcpStream, LengthDelimitedCodec>> {
        let stream = TcpStream::connect(&self.address).await?;
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
        // Announce a throwaway identity so addressed replies can find us.
        let identity = Uuid::new_v4();
        framed.send(bytes::Bytes::copy_from_slice(identity.as_bytes())).await?;
        Ok(framed)
    }

    async fn deliver(
        &self,
        framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
        tail: &[Value],
    ) -> anyhow::Result<()> {
        let mut elements = Vec::with_capacity(tail.len() + 1);
        elements.push(Value::from(epoch_secs()));
        elements.extend_from_slice(tail);
        framed.send(encode_tail(&elements)?).await?;
        Ok(())
    }
}
