//! Operation event delivery to the UI.

use async_trait::async_trait;
use depotctl_core::credentials::{CodeRequest, SecondFactorPrompt};
use depotctl_core::operation::OperationEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Optional, cloneable sender of operation events.
///
/// Sending never fails: events are dropped when nobody listens.
#[derive(Clone, Default)]
pub struct EventSink {
    sender: Option<mpsc::UnboundedSender<OperationEvent>>,
}

impl EventSink {
    pub fn new(sender: mpsc::UnboundedSender<OperationEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// A sink that discards everything.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: OperationEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}

/// Wraps the UI's prompt so every code request is also announced as an event.
pub struct EventingPrompt {
    inner: Arc<dyn SecondFactorPrompt>,
    operation_id: Uuid,
    events: EventSink,
}

impl EventingPrompt {
    pub fn new(inner: Arc<dyn SecondFactorPrompt>, operation_id: Uuid, events: EventSink) -> Self {
        Self {
            inner,
            operation_id,
            events,
        }
    }
}

#[async_trait]
impl SecondFactorPrompt for EventingPrompt {
    async fn request_code(&self, request: CodeRequest) -> Option<String> {
        self.events.emit(OperationEvent::SecondFactorRequested {
            operation_id: self.operation_id,
            attempt: request.attempt,
        });
        self.inner.request_code(request).await
    }

    async fn mobile_confirmation_pending(&self) {
        self.events.emit(OperationEvent::MobileConfirmationPending {
            operation_id: self.operation_id,
        });
        self.inner.mobile_confirmation_pending().await;
    }
}
