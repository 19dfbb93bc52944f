//! Consumer half of a live subscription.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::{CoreError, Result};

/// An infinite, cancellable feed of emissions from the subscription hub.
///
/// Emissions arrive in commit order. `recv` suspends between emissions
/// with no busy polling. Dropping the subscription (or calling
/// [`cancel`](Self::cancel)) immediately stops further emissions; the hub
/// releases the registration on its next publish.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx }
    }

    /// Wait for the next emission.
    ///
    /// Returns [`CoreError::SubscriptionClosed`] once the host side has
    /// terminated the stream (core shutdown). A subscriber that cancelled
    /// itself simply stops calling `recv`.
    pub async fn recv(&mut self) -> Result<T> {
        self.rx.recv().await.ok_or(CoreError::SubscriptionClosed)
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when no
    /// emission is queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Cancel the subscription. Equivalent to dropping it.
    pub fn cancel(mut self) {
        self.rx.close();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn recv_yields_in_send_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new(rx);

        tx.send(1).unwrap();
        tx.send(2).unwrap();

        assert_eq!(sub.recv().await.unwrap(), 1);
        assert_eq!(sub.recv().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn recv_reports_closed_when_host_drops_sender() {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let mut sub = Subscription::new(rx);
        drop(tx);

        assert!(matches!(
            sub.recv().await,
            Err(CoreError::SubscriptionClosed)
        ));
    }

    #[tokio::test]
    async fn stream_ends_on_close() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new(rx);

        tx.send("a").unwrap();
        drop(tx);

        assert_eq!(sub.next().await, Some("a"));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn cancelled_subscription_rejects_new_sends() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = Subscription::new(rx);
        sub.cancel();

        assert!(tx.send(1).is_err());
    }
}
