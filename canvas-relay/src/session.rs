//! Per-connection lifecycle.
//!
//! ```text
//!  Connecting ──init──► register ──replay──► read loop ──► Closed
//!      │                              │           │            ▲
//!      └─ send failed: no entry       └─ failed ──┴── ended ───┘
//! ```
//!
//! Every exit from the active phase goes through [`Session::close`], which
//! deregisters, closes the channel and (in the identity variant) announces
//! the departure.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::context::RelayContext;
use crate::error::{RelayError, Result};
use crate::protocol::{frame_payload, ServerMessage};
use crate::registry::{ConnectionKey, Membership};

/// Why the active phase ended.
#[derive(Debug)]
enum SessionEnd {
    /// History could not be delivered; the peer never reached the read loop.
    ReplayFailed(RelayError),
    /// Close frame or end of stream.
    PeerClosed,
    ReadFailed(RelayError),
    /// Removed from the registry by a failed broadcast write.
    Evicted,
}

impl SessionEnd {
    fn reached_read_loop(&self) -> bool {
        !matches!(self, Self::ReplayFailed(_))
    }
}

struct Session {
    ctx: Arc<RelayContext>,
    key: ConnectionKey,
    identity: Option<String>,
    peer: SocketAddr,
}

/// Run one accepted WebSocket to completion.
///
/// Transport errors end the session; they are logged and never propagated.
pub async fn run_session<S>(ctx: Arc<RelayContext>, ws: WebSocketStream<S>, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut inbound) = ws.split();
    let identity = ctx
        .policy()
        .track_identity
        .then(|| Uuid::new_v4().to_string());

    // `init` goes out before registration so it is always the first frame.
    if let Some(id) = &identity {
        if let Err(e) = send_init(&mut sink, id).await {
            log::warn!("Failed to send init to {peer}: {e}");
            let _ = sink.close().await;
            return;
        }
    }

    ctx.record_connection();
    let (key, mut membership) = ctx
        .registry()
        .register(Box::pin(sink), identity.clone())
        .await;
    log::info!(
        "Client {} connected from {peer} as {key}",
        identity.as_deref().unwrap_or("(anonymous)")
    );

    let session = Session {
        ctx,
        key,
        identity,
        peer,
    };
    let end = session.drive(&mut inbound, &mut membership).await;
    session.close(end).await;
}

async fn send_init<K>(sink: &mut K, id: &str) -> Result<()>
where
    K: futures_util::Sink<Message, Error = WsError> + Unpin,
{
    let init = ServerMessage::init(id).to_payload()?;
    sink.send(Message::Text(init)).await.map_err(RelayError::Write)
}

impl Session {
    async fn drive<St>(&self, inbound: &mut St, membership: &mut Membership) -> SessionEnd
    where
        St: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    {
        match self.replay().await {
            Ok(count) => log::debug!("Replayed {count} events to {}", self.key),
            Err(e) => return SessionEnd::ReplayFailed(e),
        }

        loop {
            tokio::select! {
                _ = membership.revoked() => return SessionEnd::Evicted,
                frame = inbound.next() => match frame {
                    None | Some(Ok(Message::Close(_))) => return SessionEnd::PeerClosed,
                    Some(Err(e)) => return SessionEnd::ReadFailed(RelayError::Read(e)),
                    Some(Ok(msg)) => self.handle_frame(msg).await,
                },
            }
        }
    }

    /// Send the current history, in order, one frame per event.
    async fn replay(&self) -> Result<usize> {
        let history = self.ctx.history().snapshot().await;
        for payload in &history {
            self.ctx.registry().send_to(self.key, payload).await?;
        }
        Ok(history.len())
    }

    async fn handle_frame(&self, msg: Message) {
        let payload = match frame_payload(msg) {
            None => return,
            Some(Ok(payload)) => payload,
            Some(Err(e)) => {
                self.ctx.record_rejected();
                log::warn!("Dropping frame from {}: {e}", self.peer);
                return;
            }
        };

        log::trace!("{} -> {}", self.key, payload.as_str());
        if let Err(e) = self.ctx.dispatch(self.key, payload).await {
            log::warn!("Invalid event from {}: {e}", self.peer);
        }
    }

    async fn close(self, end: SessionEnd) {
        match &end {
            SessionEnd::ReplayFailed(e) => {
                log::warn!("Error writing history to {}: {e}", self.peer)
            }
            SessionEnd::ReadFailed(e) => log::debug!("{} read loop ended: {e}", self.key),
            SessionEnd::Evicted => log::debug!("{} was evicted", self.key),
            SessionEnd::PeerClosed => {}
        }

        let departed = self
            .ctx
            .registry()
            .deregister(self.key)
            .await
            .or(self.identity);

        if end.reached_read_loop() && self.ctx.policy().track_identity {
            if let Some(id) = &departed {
                match ServerMessage::cursor_remove(id.as_str()).to_payload() {
                    Ok(payload) => {
                        self.ctx.announce(&payload).await;
                    }
                    Err(e) => log::error!("Failed to encode cursor_remove for {id}: {e}"),
                }
            }
        }

        log::info!(
            "Client {} disconnected ({})",
            departed.as_deref().unwrap_or("(anonymous)"),
            self.key
        );
    }
}
