//! Single-use channel carrying the payload from producer to consumer.
//!
//! Both halves are consumed by use, so a run can send at most one payload and
//! receive at most once. The slot is buffered: `send` never waits for the
//! consumer.

use crate::payload::Payload;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Consumer went away before the payload was delivered")]
    ReceiverDropped,
    #[error("Producer finished without sending a payload")]
    SenderDropped,
}

pub fn channel() -> (PayloadSender, PayloadReceiver) {
    let (tx, rx) = oneshot::channel();
    (PayloadSender(tx), PayloadReceiver(rx))
}

#[derive(Debug)]
pub struct PayloadSender(oneshot::Sender<Payload>);

impl PayloadSender {
    pub fn send(self, payload: Payload) -> Result<(), ChannelError> {
        self.0
            .send(payload)
            .map_err(|_| ChannelError::ReceiverDropped)
    }
}

#[derive(Debug)]
pub struct PayloadReceiver(oneshot::Receiver<Payload>);

impl PayloadReceiver {
    pub async fn receive(self) -> Result<Payload, ChannelError> {
        self.0.await.map_err(|_| ChannelError::SenderDropped)
    }

    /// Blocking variant for consumers running outside the async runtime.
    pub fn blocking_receive(self) -> Result<Payload, ChannelError> {
        self.0
            .blocking_recv()
            .map_err(|_| ChannelError::SenderDropped)
    }
}
