//! Loopback development transport.
//!
//! Stands in for a real protocol connector so the gateway can run end
//! to end without external infrastructure. Behavior:
//!
//! - Without stored credentials: emits a pairing code, then after the
//!   configured auto-pair delay persists a credential blob (as a real
//!   transport would after the user scans the code) and reports
//!   connected.
//! - With stored credentials: reports connected immediately.
//! - `send` succeeds and echoes an inbound reply from the destination,
//!   so the message log sees traffic in both directions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    AuthState, CredsUpdate, MessageContent, MessageEnvelope, OpenedSession, Transport,
    TransportError, TransportEvent, TransportSession,
};

pub struct LoopbackTransport {
    suffix: String,
    auto_pair: Duration,
}

impl LoopbackTransport {
    pub fn new(suffix: impl Into<String>, auto_pair_ms: u64) -> Self {
        Self {
            suffix: suffix.into(),
            auto_pair: Duration::from_millis(auto_pair_ms),
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open(&self, tenant: &str, auth: AuthState) -> Result<OpenedSession, TransportError> {
        let (tx, rx) = mpsc::channel(32);
        let session = LoopbackSession {
            events: tx.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        };

        let paired = auth.credentials.is_some();
        let auto_pair = self.auto_pair;
        let keys = auth.keys;
        let tenant = tenant.to_string();
        tokio::spawn(async move {
            if paired {
                let _ = tx.send(TransportEvent::Connected).await;
                return;
            }

            let code = Uuid::new_v4().simple().to_string();
            if tx.send(TransportEvent::Pairing(code)).await.is_err() {
                return;
            }
            tokio::time::sleep(auto_pair).await;

            // A real connector would receive fresh credentials from the
            // wire here; we mint a marker blob so restarts skip pairing.
            let blob = format!("loopback:{tenant}").into_bytes();
            if let Err(e) = keys.save_credentials(&blob).await {
                tracing::warn!(tenant, error = %e, "loopback credential persist failed");
            }
            let _ = tx
                .send(TransportEvent::CredsUpdated(CredsUpdate {
                    credentials: Some(blob),
                    keys: Vec::new(),
                }))
                .await;
            let _ = tx.send(TransportEvent::Connected).await;
        });

        Ok(OpenedSession {
            session: Box::new(session),
            events: rx,
        })
    }

    fn address_suffix(&self) -> &str {
        &self.suffix
    }
}

struct LoopbackSession {
    events: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl TransportSession for LoopbackSession {
    async fn send(&self, address: &str, body: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Send("session closed".into()));
        }
        // Echo a reply so the inbound path is exercised.
        let _ = self
            .events
            .send(TransportEvent::Message(MessageEnvelope {
                id: Some(Uuid::new_v4().to_string()),
                remote: address.to_string(),
                from_me: false,
                content: MessageContent::Text {
                    text: format!("echo: {body}"),
                },
            }))
            .await;
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
