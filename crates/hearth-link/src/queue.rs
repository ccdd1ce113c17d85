// ── Output queue ──
//
// FIFO of outbound contexts. The sender drains it in enqueue order;
// a `Notify` doubles as the ready-to-send event so an idle sender can
// also wake up to emit pings.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;

use crate::error::LinkError;
use crate::message::{GatewayMessage, MessageId, ServerMessage};

/// One in-progress outbound request: the message, its resend budget,
/// and the channel that completes the caller.
pub(crate) struct OutboundContext {
    pub(crate) message: GatewayMessage,
    pub(crate) created_at: Instant,
    pub(crate) attempts: u32,
    pub(crate) awaiter: Option<oneshot::Sender<Result<ServerMessage, LinkError>>>,
}

impl OutboundContext {
    pub(crate) fn new(
        message: GatewayMessage,
    ) -> (Self, oneshot::Receiver<Result<ServerMessage, LinkError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                message,
                created_at: Instant::now(),
                attempts: 0,
                awaiter: Some(tx),
            },
            rx,
        )
    }

    pub(crate) fn id(&self) -> MessageId {
        self.message.id()
    }

    /// Complete the caller. Later calls are no-ops.
    pub(crate) fn finish(&mut self, result: Result<ServerMessage, LinkError>) {
        if let Some(awaiter) = self.awaiter.take() {
            let _ = awaiter.send(result);
        }
    }
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<OutboundContext>,
    closed: bool,
}

#[derive(Default)]
pub(crate) struct OutputQueue {
    state: Mutex<QueueState>,
    ready: Notify,
}

impl OutputQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a context and signal the sender. Once the queue has been
    /// closed, the context is failed with [`LinkError::Stopped`]
    /// instead; the closed check and the append happen under one lock,
    /// so no context can slip in behind the terminal drain.
    pub(crate) fn enqueue(&self, mut context: OutboundContext) {
        {
            let mut state = self.state.lock().expect("queue lock poisoned");
            if !state.closed {
                state.items.push_back(context);
                self.ready.notify_one();
                return;
            }
        }

        context.finish(Err(LinkError::Stopped));
    }

    /// Pop the oldest context, waiting up to `timeout` for one to
    /// appear. `None` means the sender has been idle for the whole
    /// window (time to ping).
    pub(crate) async fn dequeue(&self, timeout: Duration) -> Option<OutboundContext> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(context) = self
                .state
                .lock()
                .expect("queue lock poisoned")
                .items
                .pop_front()
            {
                return Some(context);
            }

            let remaining = deadline.checked_duration_since(Instant::now())?;
            if tokio::time::timeout(remaining, self.ready.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    /// Terminal shutdown: refuse all future contexts and hand back
    /// whatever was still queued.
    pub(crate) fn close(&self) -> Vec<OutboundContext> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.closed = true;
        state.items.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn context() -> (OutboundContext, oneshot::Receiver<Result<ServerMessage, LinkError>>) {
        OutboundContext::new(GatewayMessage::DeviceListRequest {
            id: Uuid::new_v4(),
            device_prefix: hearth_core::DevicePrefix::Ble,
        })
    }

    #[tokio::test]
    async fn dequeue_returns_in_fifo_order() {
        let queue = OutputQueue::new();
        let (first, _rx1) = context();
        let (second, _rx2) = context();
        let first_id = first.id();
        let second_id = second.id();

        queue.enqueue(first);
        queue.enqueue(second);

        assert_eq!(
            queue.dequeue(Duration::from_millis(10)).await.unwrap().id(),
            first_id
        );
        assert_eq!(
            queue.dequeue(Duration::from_millis(10)).await.unwrap().id(),
            second_id
        );
    }

    #[tokio::test]
    async fn dequeue_times_out_when_empty() {
        let queue = OutputQueue::new();
        let started = Instant::now();

        assert!(queue.dequeue(Duration::from_millis(50)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn enqueue_wakes_a_waiting_dequeue() {
        let queue = std::sync::Arc::new(OutputQueue::new());

        let waiter = std::sync::Arc::clone(&queue);
        let handle =
            tokio::spawn(async move { waiter.dequeue(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let (ctx, _rx) = context();
        let id = ctx.id();
        queue.enqueue(ctx);

        let dequeued = handle.await.unwrap().unwrap();
        assert_eq!(dequeued.id(), id);
    }

    #[tokio::test]
    async fn finish_is_idempotent() {
        let (mut ctx, mut rx) = context();
        let id = ctx.id();

        ctx.finish(Ok(ServerMessage::GenericAck { id }));
        ctx.finish(Err(LinkError::Stopped));

        match rx.try_recv().unwrap() {
            Ok(ServerMessage::GenericAck { id: got }) => assert_eq!(got, id),
            other => panic!("unexpected completion: {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_hands_back_queued_contexts() {
        let queue = OutputQueue::new();
        let (ctx, _rx) = context();
        let id = ctx.id();

        queue.enqueue(ctx);
        let drained = queue.close();

        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].id(), id);
    }

    #[tokio::test]
    async fn enqueue_after_close_fails_the_context() {
        let queue = OutputQueue::new();
        assert!(queue.close().is_empty());

        let (ctx, rx) = context();
        queue.enqueue(ctx);

        // The context never reaches the queue; its awaiter is failed
        // on the spot.
        assert!(matches!(rx.await.unwrap(), Err(LinkError::Stopped)));
        assert!(queue.dequeue(Duration::from_millis(10)).await.is_none());
    }
}
