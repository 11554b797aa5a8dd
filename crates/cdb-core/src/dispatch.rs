//! Listener registry for decoded live events.
//!
//! Registration happens once at startup; dispatch fans one event out to the
//! listeners registered for its kind, sequentially and in registration
//! order. A listener error is not caught here; it propagates to the live
//! link's fault handling for that read iteration.

use std::sync::Arc;

use async_trait::async_trait;

use crate::events::{EventKind, MessageEvent};
use crate::Result;

/// Handler for one or more live event kinds. Implement only the methods for
/// the kinds you register for; the rest default to no-ops.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn on_created(&self, _event: &MessageEvent) -> Result<()> {
        Ok(())
    }

    async fn on_updated(&self, _event: &MessageEvent) -> Result<()> {
        Ok(())
    }

    async fn on_deleted(&self, _event: &MessageEvent) -> Result<()> {
        Ok(())
    }
}

/// Per-kind listener registry. Built once, then shared by `Arc`.
#[derive(Default)]
pub struct EventDispatch {
    created: Vec<Arc<dyn MessageListener>>,
    updated: Vec<Arc<dyn MessageListener>>,
    deleted: Vec<Arc<dyn MessageListener>>,
}

impl EventDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_created(&mut self, listener: Arc<dyn MessageListener>) {
        self.created.push(listener);
    }

    pub fn on_updated(&mut self, listener: Arc<dyn MessageListener>) {
        self.updated.push(listener);
    }

    pub fn on_deleted(&mut self, listener: Arc<dyn MessageListener>) {
        self.deleted.push(listener);
    }

    /// Invoke every listener registered for the event's kind, in order.
    pub async fn dispatch(&self, event: &MessageEvent) -> Result<()> {
        match event.kind {
            EventKind::Created => {
                for listener in &self.created {
                    listener.on_created(event).await?;
                }
            }
            EventKind::Updated => {
                for listener in &self.updated {
                    listener.on_updated(event).await?;
                }
            }
            EventKind::Deleted => {
                for listener in &self.deleted {
                    listener.on_deleted(event).await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RemoteMessageId, RoomId};
    use crate::events::RemoteMessage;
    use std::sync::Mutex;

    struct Recorder {
        label: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl MessageListener for Recorder {
        async fn on_created(&self, _event: &MessageEvent) -> Result<()> {
            self.calls.lock().unwrap().push(format!("{}:created", self.label));
            Ok(())
        }

        async fn on_deleted(&self, _event: &MessageEvent) -> Result<()> {
            self.calls.lock().unwrap().push(format!("{}:deleted", self.label));
            Ok(())
        }
    }

    fn event(kind: EventKind) -> MessageEvent {
        MessageEvent {
            message: RemoteMessage {
                id: RemoteMessageId(1),
                text: "x".into(),
                markup: "plaintext".into(),
            },
            kind,
            user: None,
            room: RoomId(1),
        }
    }

    #[tokio::test]
    async fn dispatches_to_matching_kind_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut dispatch = EventDispatch::new();
        dispatch.on_created(Arc::new(Recorder { label: "a", calls: calls.clone() }));
        dispatch.on_created(Arc::new(Recorder { label: "b", calls: calls.clone() }));
        dispatch.on_deleted(Arc::new(Recorder { label: "c", calls: calls.clone() }));

        dispatch.dispatch(&event(EventKind::Created)).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["a:created", "b:created"]);

        dispatch.dispatch(&event(EventKind::Deleted)).await.unwrap();
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["a:created", "b:created", "c:deleted"]
        );
    }

    #[tokio::test]
    async fn kind_with_no_listeners_is_a_no_op() {
        let dispatch = EventDispatch::new();
        dispatch.dispatch(&event(EventKind::Updated)).await.unwrap();
    }
}
