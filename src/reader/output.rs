use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

use crate::feed::Item;

/// Capacity of the shared output stream when none is configured.
pub const DEFAULT_OUTPUT_CAPACITY: usize = 500;

/// Creates the bounded stream shared by every feed loop.
pub fn output_channel(capacity: usize) -> (OutputSender, OutputStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (OutputSender { tx }, OutputStream { rx })
}

/// What happened to an offered item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Sent,
    /// The buffer was full; the item was discarded.
    Dropped,
    /// The consumer is gone.
    Closed,
}

/// Producer half. Never blocks: a full buffer drops the item.
#[derive(Debug, Clone)]
pub struct OutputSender {
    tx: mpsc::Sender<Item>,
}

impl OutputSender {
    pub fn offer(&self, item: Item) -> Offer {
        match self.tx.try_send(item) {
            Ok(()) => Offer::Sent,
            Err(TrySendError::Full(_)) => Offer::Dropped,
            Err(TrySendError::Closed(_)) => Offer::Closed,
        }
    }
}

/// Consumer half of the output stream.
///
/// `recv` returns `None` once the reader has stopped and every buffered item
/// has been read.
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::Receiver<Item>,
}

impl OutputStream {
    pub async fn recv(&mut self) -> Option<Item> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Item, TryRecvError> {
        self.rx.try_recv()
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Stream for OutputStream {
    type Item = Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Item>> {
        self.rx.poll_recv(cx)
    }
}
