use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::InboundMessage;

/// Buffered inbound messages per subscription.
pub const SUBSCRIPTION_CAPACITY: usize = 256;

/// Stream of inbound messages for a fixed set of chats.
///
/// The receiving half is usually handed to a consumer task via
/// [`Subscription::into_parts`] while the owner keeps the
/// [`SubscriptionCloser`] to stop delivery.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<InboundMessage>,
    closer: SubscriptionCloser,
}

/// Stops the producer side of a [`Subscription`].
#[derive(Debug)]
pub struct SubscriptionCloser {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// `task` is the producer, if any; it must stop once `cancel` fires.
    pub fn new(
        receiver: mpsc::Receiver<InboundMessage>,
        cancel: CancellationToken,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            receiver,
            closer: SubscriptionCloser { cancel, task },
        }
    }

    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.receiver.recv().await
    }

    pub fn into_parts(self) -> (mpsc::Receiver<InboundMessage>, SubscriptionCloser) {
        (self.receiver, self.closer)
    }

    pub async fn close(self) {
        self.closer.close().await;
    }
}

impl SubscriptionCloser {
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the producer and wait for it to exit.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    debug!(error = %err, "subscription producer ended abnormally");
                }
            }
        }
    }
}

impl Drop for SubscriptionCloser {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_stops_producer_task() {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let cancel = CancellationToken::new();
        let producer_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            producer_cancel.cancelled().await;
            drop(tx);
        });

        let subscription = Subscription::new(rx, cancel.clone(), Some(task));
        let (mut receiver, closer) = subscription.into_parts();
        closer.close().await;

        assert!(cancel.is_cancelled());
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_closer_cancels() {
        let (_tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let subscription = Subscription::new(rx, cancel.clone(), None);

        drop(subscription);

        assert!(cancel.is_cancelled());
    }
}
