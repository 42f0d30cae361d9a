use async_channel::{Receiver, Sender};

use crate::services::driver::{ConceptRow, Document};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Success,
    Error,
    /// Echo of the statement being run
    TypeQl,
}

/// What produced a concept-row stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Insert,
    Update,
    Get,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem<T> {
    Next(T),
    Done,
}

/// Consumer end of one result stream. Items arrive in production order and
/// the stream ends with a single [`StreamItem::Done`].
#[derive(Debug, Clone)]
pub struct Stream<T> {
    receiver: Receiver<StreamItem<T>>,
}

impl<T> Stream<T> {
    pub(crate) fn new() -> (StreamSender<T>, Self) {
        let (sender, receiver) = async_channel::unbounded();
        (StreamSender { sender }, Self { receiver })
    }

    /// `None` once the producer is gone and every item was taken.
    pub async fn recv(&self) -> Option<StreamItem<T>> {
        self.receiver.recv().await.ok()
    }

    pub fn try_recv(&self) -> Option<StreamItem<T>> {
        self.receiver.try_recv().ok()
    }

    /// Take every item up to (and not including) `Done`.
    pub async fn drain(&self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(StreamItem::Next(item)) = self.recv().await {
            items.push(item);
        }
        items
    }
}

/// Producer end. Dropping it ends the stream, so `Done` is sent exactly once
/// even when the producer unwinds.
pub(crate) struct StreamSender<T> {
    sender: Sender<StreamItem<T>>,
}

impl<T> StreamSender<T> {
    pub(crate) fn next(&self, item: T) {
        let _ = self.sender.try_send(StreamItem::Next(item));
    }
}

impl<T> Drop for StreamSender<T> {
    fn drop(&mut self) {
        let _ = self.sender.try_send(StreamItem::Done);
    }
}

#[derive(Debug, Clone)]
pub enum ResponseStream {
    ConceptRows {
        source: StreamSource,
        stream: Stream<ConceptRow>,
    },
    Json(Stream<Document>),
}

/// One event in a runner's output, in production order.
#[derive(Debug, Clone)]
pub enum Response {
    /// End of the runner's output
    Done,
    Message { kind: MessageKind, text: String },
    /// Scalar answer, e.g. of an aggregate
    Value(serde_json::Value),
    Stream(ResponseStream),
}

impl Response {
    pub fn message(kind: MessageKind, text: impl Into<String>) -> Self {
        Response::Message {
            kind,
            text: text.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Response::Done)
    }
}
