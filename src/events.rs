use crate::catalog::{Attribute, Collection, Index};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaEventKind {
    CreateAttribute,
    UpdateAttribute,
    DeleteAttribute,
    CreateIndex,
    DeleteIndex,
    DeleteCollection,
}

impl SchemaEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaEventKind::CreateAttribute => "create_attribute",
            SchemaEventKind::UpdateAttribute => "update_attribute",
            SchemaEventKind::DeleteAttribute => "delete_attribute",
            SchemaEventKind::CreateIndex => "create_index",
            SchemaEventKind::DeleteIndex => "delete_index",
            SchemaEventKind::DeleteCollection => "delete_collection",
        }
    }
}

/// The schema element a physical change applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaElement {
    Attribute(Attribute),
    Index(Index),
    Collection(Collection),
}

impl SchemaElement {
    pub fn key(&self) -> &str {
        match self {
            SchemaElement::Attribute(a) => &a.key,
            SchemaElement::Index(i) => &i.key,
            SchemaElement::Collection(c) => &c.id,
        }
    }
}

/// Request for the external worker to apply physical DDL.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaEvent {
    pub kind: SchemaEventKind,
    pub project_id: String,
    pub database_id: String,
    pub collection_id: String,
    pub element: SchemaElement,
}

/// Fire-and-forget queue towards the worker. Enqueueing never fails the
/// mutation that produced the event.
pub trait EventSink: Send + Sync {
    fn enqueue(&self, event: SchemaEvent);
}

#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SchemaEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SchemaEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn enqueue(&self, event: SchemaEvent) {
        if let Err(err) = self.tx.send(event) {
            let event = err.0;
            warn!(
                kind = event.kind.as_str(),
                database_id = %event.database_id,
                collection_id = %event.collection_id,
                element = event.element.key(),
                "schema event dropped: worker queue closed"
            );
        }
    }
}

/// Records events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<SchemaEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SchemaEvent> {
        self.events.lock().clone()
    }

    pub fn drain(&self) -> Vec<SchemaEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for MemorySink {
    fn enqueue(&self, event: SchemaEvent) {
        self.events.lock().push(event);
    }
}
