//! Message delivery: heartbeat, retransmission, dispatch.
//!
//! Given one live connection, three duties run concurrently until any one
//! of them fails; the first failure cancels the other two and bubbles up
//! to the lifecycle loop that owns the connection. Per-record validation
//! failures never kill the connection — they are logged and skipped.

use std::sync::Arc;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use veilchat_transport::{trimmed_for_log, FramedConnection, Record, RecordError};

use crate::engine::ChatEngine;
use crate::errors::Result;
use crate::events::ChatEvent;
use crate::store::MessagePayload;

/// Builds the wire record for a stored payload.
pub(crate) fn message_record(id: i64, payload: &MessagePayload) -> Record {
    Record::Message {
        id,
        text: payload.text.clone(),
        image_list: payload.image_list.clone(),
    }
}

impl ChatEngine {
    /// Runs the delivery trio on one connection until it breaks.
    ///
    /// `try_join!` is the cancellation mechanism: the first duty to fail
    /// resolves the join, and the other two are dropped at their next
    /// suspension point. No duty holds anything across an await that its
    /// connection's `close` does not release.
    pub(crate) async fn run_delivery(&self, connection: Arc<FramedConnection>) -> Result<()> {
        tokio::try_join!(
            self.heartbeat_duty(&connection),
            self.resend_duty(&connection),
            self.receive_duty(&connection),
        )?;
        Ok(())
    }

    /// Outbound liveness clock: a `ping` every interval, never reads.
    async fn heartbeat_duty(&self, connection: &FramedConnection) -> Result<()> {
        loop {
            connection.send(&Record::Ping).await?;
            sleep(self.config.heartbeat_interval).await;
        }
    }

    /// The sole retransmission mechanism: every tick, resend everything
    /// still pending in ascending id order. No backoff, no retry cap — an
    /// entry leaves the table only through an ack.
    async fn resend_duty(&self, connection: &FramedConnection) -> Result<()> {
        loop {
            for (id, payload) in self.store.pending_snapshot().await {
                trace!(id, "retransmitting pending message");
                connection.send(&message_record(id, &payload)).await?;
            }
            sleep(self.config.resend_interval).await;
        }
    }

    /// Reads and dispatches records until the stream ends.
    async fn receive_duty(&self, connection: &FramedConnection) -> Result<()> {
        loop {
            match connection.recv(self.config.recv_timeout).await? {
                None => return Err(veilchat_transport::Error::ConnectionClosed.into()),
                Some(value) => self.dispatch_record(value).await,
            }
        }
    }

    async fn dispatch_record(&self, value: Value) {
        match Record::from_value(&value) {
            Ok((Record::Ping, _)) => {
                self.record_peer_ping();
            }

            Ok((Record::Ack { message_id }, _)) => {
                let removed = self.store.ack_local(message_id).await;
                trace!(message_id, removed, "ack processed");
                self.session
                    .events()
                    .publish(ChatEvent::ConversationChanged);
            }

            Ok((
                Record::Message {
                    id,
                    text,
                    image_list,
                },
                extra,
            )) => {
                // Ack even a duplicate: the sender cannot know whether the
                // earlier ack was lost.
                self.send_ack(id).await;
                if self.store.is_received(id).await {
                    debug!(id, "duplicate message, already delivered");
                    return;
                }
                if !extra.is_empty() {
                    warn!(id, fields = ?extra, "message record has extra fields");
                }
                self.store
                    .record_remote(id, MessagePayload { text, image_list })
                    .await;
                self.session
                    .events()
                    .publish(ChatEvent::ConversationChanged);
            }

            Err(RecordError::MessagePayload { id, reason }) => {
                // The id parsed, so the sender still gets its ack and
                // stops retransmitting a record we will never store.
                warn!(id, %reason, record = %trimmed_for_log(&value), "discarding message");
                self.send_ack(id).await;
            }

            Err(e) => {
                warn!(error = %e, record = %trimmed_for_log(&value), "discarding record");
            }
        }
    }

    /// Sends an ack over whichever direction is currently live, incoming
    /// preferred. Send failures are left to the owning duty loop to
    /// notice.
    async fn send_ack(&self, message_id: i64) {
        if self.session.control().await.is_none() {
            return;
        }
        let Some(connection) = self.preferred_connection().await else {
            return;
        };
        if let Err(e) = connection.send(&Record::Ack { message_id }).await {
            debug!(error = %e, message_id, "failed to send ack");
        }
    }
}
