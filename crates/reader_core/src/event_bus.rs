//! General events are fire-once; the book lifecycle is replay-latest.

use shared::protocol::{BookLifecycle, ReaderEvent};
use tokio::sync::{
    broadcast::{self, error::RecvError, error::TryRecvError},
    watch,
};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};

pub struct EventBus {
    events: broadcast::Sender<ReaderEvent>,
    book: watch::Sender<Option<BookLifecycle>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (book, _) = watch::channel(None);
        Self { events, book }
    }

    pub fn publish(&self, event: ReaderEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("event published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.events.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn publish_book(&self, lifecycle: BookLifecycle) {
        self.book.send_replace(Some(lifecycle));
    }

    pub fn book_lifecycle(&self) -> watch::Receiver<Option<BookLifecycle>> {
        self.book.subscribe()
    }
}

pub struct EventSubscription {
    rx: broadcast::Receiver<ReaderEvent>,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> Option<ReaderEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event subscriber lagged; skipping missed events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<ReaderEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event subscriber lagged; skipping missed events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ReaderEvent> {
        BroadcastStream::new(self.rx).filter_map(|item| item.ok())
    }
}
