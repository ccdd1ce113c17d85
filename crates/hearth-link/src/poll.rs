// ── Context poll ──
//
// Correlation table of requests in flight: id → context + resend
// deadline. The sweep task periodically removes expired entries and
// either re-enqueues them (bounded) or fails the awaiter.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::LinkError;
use crate::message::{MessageId, ServerMessage};
use crate::queue::OutboundContext;

struct Pending {
    context: OutboundContext,
    resend_at: Instant,
}

#[derive(Default)]
pub(crate) struct ContextPoll {
    pending: Mutex<HashMap<MessageId, Pending>>,
}

impl ContextPoll {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Track a context that was just written to the socket.
    pub(crate) fn insert(&self, context: OutboundContext, resend_timeout: Duration) {
        let id = context.id();
        self.pending.lock().expect("poll lock poisoned").insert(
            id,
            Pending {
                context,
                resend_at: Instant::now() + resend_timeout,
            },
        );
    }

    /// Deliver a server answer to its awaiter. Returns `false` when no
    /// pending request matches the id.
    pub(crate) fn complete(&self, answer: ServerMessage) -> bool {
        let mut pending = self.pending.lock().expect("poll lock poisoned");
        let Some(mut entry) = pending.remove(&answer.id()) else {
            return false;
        };
        drop(pending);

        entry.context.finish(Ok(answer));
        true
    }

    /// Remove and return every context whose resend deadline passed.
    pub(crate) fn take_expired(&self) -> Vec<OutboundContext> {
        let now = Instant::now();
        let mut pending = self.pending.lock().expect("poll lock poisoned");

        let expired: Vec<MessageId> = pending
            .iter()
            .filter(|(_, entry)| entry.resend_at <= now)
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| pending.remove(&id))
            .map(|entry| entry.context)
            .collect()
    }

    /// Fail every pending context, for terminal shutdown.
    pub(crate) fn fail_all(&self, error: impl Fn() -> LinkError) {
        let drained: Vec<Pending> = {
            let mut pending = self.pending.lock().expect("poll lock poisoned");
            pending.drain().map(|(_, entry)| entry).collect()
        };

        for mut entry in drained {
            debug!(id = %entry.context.id(), "failing pending context");
            entry.context.finish(Err(error()));
        }
    }

    #[allow(dead_code)]
    pub(crate) fn len(&self) -> usize {
        self.pending.lock().expect("poll lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::message::GatewayMessage;

    fn context() -> (
        OutboundContext,
        tokio::sync::oneshot::Receiver<Result<ServerMessage, LinkError>>,
    ) {
        OutboundContext::new(GatewayMessage::DeviceListRequest {
            id: Uuid::new_v4(),
            device_prefix: hearth_core::DevicePrefix::Ble,
        })
    }

    #[tokio::test]
    async fn complete_fulfils_the_awaiter_and_removes_the_entry() {
        let poll = ContextPoll::new();
        let (ctx, rx) = context();
        let id = ctx.id();

        poll.insert(ctx, Duration::from_secs(10));
        assert!(poll.complete(ServerMessage::GenericAck { id }));
        assert_eq!(poll.len(), 0);

        assert!(matches!(
            rx.await.unwrap(),
            Ok(ServerMessage::GenericAck { .. })
        ));
    }

    #[tokio::test]
    async fn unmatched_answer_is_reported() {
        let poll = ContextPoll::new();
        assert!(!poll.complete(ServerMessage::GenericAck { id: Uuid::new_v4() }));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_honours_the_resend_deadline() {
        let poll = ContextPoll::new();
        let (ctx, _rx) = context();
        let id = ctx.id();

        poll.insert(ctx, Duration::from_millis(500));
        assert!(poll.take_expired().is_empty());

        tokio::time::advance(Duration::from_millis(600)).await;

        let expired = poll.take_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id(), id);
        assert_eq!(poll.len(), 0);
    }

    #[tokio::test]
    async fn fail_all_completes_every_awaiter() {
        let poll = ContextPoll::new();
        let (first, rx1) = context();
        let (second, rx2) = context();

        poll.insert(first, Duration::from_secs(10));
        poll.insert(second, Duration::from_secs(10));
        poll.fail_all(|| LinkError::Stopped);

        assert!(matches!(rx1.await.unwrap(), Err(LinkError::Stopped)));
        assert!(matches!(rx2.await.unwrap(), Err(LinkError::Stopped)));
        assert_eq!(poll.len(), 0);
    }
}
