use tracing::info;

use crate::model::{CorrelationIds, InboundNotification, PaymentRequest, RequestKind};

/// Single-slot holder for the request currently awaiting a notification.
///
/// A new request replaces the previous one; the previous request is orphaned
/// and nothing is ever attributed to it again.
#[derive(Debug, Default)]
pub struct RequestTracker {
    slot: Option<PaymentRequest>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly acknowledged request. Returns the displaced request,
    /// if one was still awaiting.
    pub fn begin_tracking(
        &mut self,
        kind: RequestKind,
        ids: CorrelationIds,
    ) -> Option<PaymentRequest> {
        let previous = self.slot.replace(PaymentRequest::awaiting(kind, ids));
        if let Some(orphan) = &previous {
            info!(
                kind = %orphan.kind,
                primary = %orphan.primary_id(),
                "replacing unsettled request"
            );
        }
        previous
    }

    pub fn matches(&self, notification: &InboundNotification) -> bool {
        self.slot
            .as_ref()
            .is_some_and(|request| request.matches(notification))
    }

    /// Empty the slot.
    pub fn clear(&mut self) -> Option<PaymentRequest> {
        self.slot.take()
    }

    pub fn current(&self) -> Option<&PaymentRequest> {
        self.slot.as_ref()
    }

    pub fn is_tracking(&self) -> bool {
        self.slot.is_some()
    }
}
