//! In-process bounded queue transport.
//!
//! The sender side implements [`Transport`]; the receiver is handed to
//! whatever consumes the topic. A full queue blocks the sender up to
//! `send_timeout`, after which the send fails with a `Timeout` error.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::transport::{
    CallContext, MessageRequest, Payload, Transport, TransportError, TransportErrorKind,
    TransportResponse,
};

/// A message delivered through [`MemoryQueue`].
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub request_id: Uuid,
    /// Resolved endpoint of the send, i.e. the topic name.
    pub topic: String,
    pub payload: Payload,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct MemoryQueue {
    sender: mpsc::Sender<QueuedMessage>,
    send_timeout: Duration,
}

#[derive(Debug)]
pub struct QueueReceiver {
    receiver: mpsc::Receiver<QueuedMessage>,
}

impl MemoryQueue {
    pub fn new(capacity: usize, send_timeout: Duration) -> (Self, QueueReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                send_timeout,
            },
            QueueReceiver { receiver },
        )
    }

    /// Free slots left in the queue.
    pub fn available(&self) -> usize {
        self.sender.capacity()
    }
}

#[async_trait]
impl Transport for MemoryQueue {
    async fn send(
        &self,
        ctx: &CallContext,
        request: &MessageRequest,
    ) -> Result<TransportResponse, TransportError> {
        let message = QueuedMessage {
            request_id: request.request_id(),
            topic: ctx.endpoint().to_string(),
            payload: request.payload().clone(),
            headers: request.headers().clone(),
        };

        match tokio::time::timeout(self.send_timeout, self.sender.send(message)).await {
            Ok(Ok(())) => Ok(TransportResponse::default()),
            Ok(Err(_)) => Err(TransportError::new(
                TransportErrorKind::Io,
                "queue receiver dropped",
            )),
            Err(_) => Err(TransportError::new(
                TransportErrorKind::Timeout,
                format!("queue full for {:?}", self.send_timeout),
            )),
        }
    }
}

impl QueueReceiver {
    /// Next message, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<QueuedMessage> {
        self.receiver.recv().await
    }

    /// Next message, or `None` if nothing arrives within `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<QueuedMessage> {
        tokio::time::timeout(timeout, self.receiver.recv())
            .await
            .ok()
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx(topic: &str) -> CallContext {
        CallContext::new(topic, None, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_delivers_to_receiver() {
        let (queue, mut rx) = MemoryQueue::new(4, Duration::from_millis(100));
        let request = MessageRequest::new("orders").with_payload("created");

        let response = queue.send(&ctx("orders"), &request).await.unwrap();
        assert_eq!(response.status_code, 0);

        let message = rx.recv_timeout(Duration::from_millis(100)).await.unwrap();
        assert_eq!(message.topic, "orders");
        assert_eq!(message.request_id, request.request_id());
        assert_eq!(message.payload, Payload::Text("created".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_times_out() {
        let (queue, _rx) = MemoryQueue::new(1, Duration::from_millis(200));
        let request = MessageRequest::new("orders");

        queue.send(&ctx("orders"), &request).await.unwrap();
        let err = queue.send(&ctx("orders"), &request).await.unwrap_err();

        assert_eq!(err.kind, TransportErrorKind::Timeout);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_dropped_receiver() {
        let (queue, rx) = MemoryQueue::new(1, Duration::from_millis(100));
        drop(rx);

        let err = queue
            .send(&ctx("orders"), &MessageRequest::new("orders"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Io);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_timeout_on_empty_queue() {
        let (_queue, mut rx) = MemoryQueue::new(1, Duration::from_millis(100));
        assert!(rx.recv_timeout(Duration::from_millis(50)).await.is_none());
    }
}
