//! Payment session controller.
//!
//! The session owns the request tracker, submits payments through a
//! [`PaymentGateway`] and settles the tracked request from a stream of
//! [`ChannelEvent`]s. Presentation updates are published as
//! [`SessionEvent`]s to every subscriber.

use parking_lot::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::channel::ChannelEvent;
use crate::error::SubmitError;
use crate::fanout::Fanout;
use crate::form::PaymentForm;
use crate::gateway::{Acknowledgment, PaymentGateway};
use crate::model::{ConnectionState, InboundNotification, PaymentRequest, RequestStatus};

mod dispatch;
pub use dispatch::{Failure, Outcome, OutcomeResult, Receipt, classify, hint_for};

mod tracker;
pub use tracker::RequestTracker;

/// Presentation updates, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A submission is in flight; input should be disabled.
    Submitting,
    /// The gateway accepted the request; waiting for its notification.
    Awaiting(PaymentRequest),
    /// The tracked request received its terminal outcome.
    Settled {
        request: PaymentRequest,
        outcome: Outcome,
    },
    /// The submission failed before anything was tracked.
    SubmissionFailed(String),
    /// Ready for new input.
    Ready,
    Connection(ConnectionState),
}

/// Tracks one in-flight payment and settles it from channel notifications.
pub struct Session<G> {
    gateway: G,
    tracker: Mutex<RequestTracker>,
    events: Fanout<SessionEvent>,
}

/// Public API
impl<G: PaymentGateway> Session<G> {
    pub fn new(gateway: G) -> Self {
        Self {
            gateway,
            tracker: Mutex::new(RequestTracker::new()),
            events: Fanout::new(),
        }
    }

    /// Stream of presentation updates. Dropping it unsubscribes; updates
    /// queue up until read.
    pub fn subscribe(&self) -> impl Stream<Item = SessionEvent> + Unpin + Send + 'static {
        UnboundedReceiverStream::new(self.events.subscribe())
    }

    /// Snapshot of the tracked request.
    pub fn tracked(&self) -> Option<PaymentRequest> {
        self.tracker.lock().current().cloned()
    }

    /// Validate and submit a payment, then track its identifiers.
    ///
    /// Any error leaves the tracker untouched and returns the session to
    /// the ready state.
    pub async fn submit(&self, form: &PaymentForm) -> Result<Acknowledgment, SubmitError> {
        let kind = form.kind();
        if let Err(e) = form.validate() {
            return Err(self.submission_failed(e.into()));
        }

        self.publish(SessionEvent::Submitting);
        let ack = match self.gateway.submit(form).await {
            Ok(ack) => ack,
            Err(e) => return Err(self.submission_failed(e)),
        };

        let request = {
            let mut tracker = self.tracker.lock();
            tracker.begin_tracking(kind, ack.ids.clone());
            tracker.current().cloned()
        };
        if let Some(request) = request {
            info!(%kind, primary = %request.primary_id(), "awaiting payment notification");
            self.publish(SessionEvent::Awaiting(request));
        }
        Ok(ack)
    }

    /// Settle the tracked request if `notification` belongs to it.
    ///
    /// Returns the outcome when the notification settled the request; the
    /// tracker is cleared in the same step so duplicates are ignored.
    pub fn dispatch(&self, notification: &InboundNotification) -> Option<Outcome> {
        let (request, outcome) = {
            let mut tracker = self.tracker.lock();
            let outcome = classify(tracker.current(), notification)?;
            let mut request = tracker.clear()?;
            request.status = RequestStatus::Settled;
            (request, outcome)
        };

        Self::log_outcome(&request, &outcome);
        self.publish(SessionEvent::Settled {
            request,
            outcome: outcome.clone(),
        });
        self.publish(SessionEvent::Ready);
        Some(outcome)
    }

    /// Process channel events in arrival order until the stream ends.
    pub async fn run(&self, mut events: impl Stream<Item = ChannelEvent> + Unpin) {
        while let Some(event) = events.next().await {
            match event {
                ChannelEvent::Notification(notification) => {
                    // unrelated notifications are expected, nothing to report
                    let _ = self.dispatch(&notification);
                }
                ChannelEvent::State(state) => {
                    info!(?state, "notification channel state changed");
                    self.publish(SessionEvent::Connection(state));
                }
            }
        }
    }
}

/// Private API
impl<G: PaymentGateway> Session<G> {
    fn publish(&self, event: SessionEvent) {
        self.events.publish(event);
    }

    fn submission_failed(&self, error: SubmitError) -> SubmitError {
        warn!(reason = %error, "payment submission failed");
        self.publish(SessionEvent::SubmissionFailed(error.to_string()));
        self.publish(SessionEvent::Ready);
        error
    }

    fn log_outcome(request: &PaymentRequest, outcome: &Outcome) {
        match outcome {
            Outcome::Success(receipt) => info!(
                kind = %request.kind,
                primary = %request.primary_id(),
                receipt = ?receipt.receipt,
                amount = ?receipt.amount,
                "payment settled"
            ),
            Outcome::Failure(failure) => info!(
                kind = %request.kind,
                primary = %request.primary_id(),
                code = failure.code,
                reason = %failure.description,
                "payment failed"
            ),
            Outcome::Timeout { .. } => info!(
                kind = %request.kind,
                primary = %request.primary_id(),
                "payment timed out"
            ),
        }
    }
}
