use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::model::{Reservation, RoomInfo};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Created,
    Confirmed,
    PaymentConfirmed,
    Cancelled,
}

impl NoticeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::Created => "created",
            NoticeKind::Confirmed => "confirmed",
            NoticeKind::PaymentConfirmed => "payment_confirmed",
            NoticeKind::Cancelled => "cancelled",
        }
    }
}

/// What a guest or the front desk is told after a committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub reservation: Reservation,
    pub room: RoomInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Delivery could not be attempted (transport down, timeout).
    Unavailable(String),
    /// The receiving side refused the message.
    Rejected(String),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Unavailable(e) => write!(f, "notifier unavailable: {e}"),
            NotifyError::Rejected(e) => write!(f, "notification rejected: {e}"),
        }
    }
}

impl std::error::Error for NotifyError {}

/// Outbound delivery channel (email, SMS, chat hook...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notice: &Notice) -> Result<(), NotifyError>;
}

/// Writes each notice as a structured log line.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notice: &Notice) -> Result<(), NotifyError> {
        let body = serde_json::to_string(notice).map_err(|e| NotifyError::Rejected(e.to_string()))?;
        tracing::info!(
            kind = notice.kind.as_str(),
            reservation_id = %notice.reservation.id,
            room_id = %notice.room.id,
            %body,
            "notification"
        );
        Ok(())
    }
}

/// Fire-and-forget delivery with bounded retry, plus an in-process broadcast
/// for anyone who wants to watch transitions as they commit.
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    max_attempts: u32,
    backoff: Duration,
    events: broadcast::Sender<Notice>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            notifier,
            max_attempts: max_attempts.max(1),
            backoff,
            events: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Log-only dispatcher with three attempts. Handy for tests and tooling.
    pub fn logging() -> Self {
        Self::new(Arc::new(LogNotifier), 3, Duration::from_millis(100))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.events.subscribe()
    }

    /// Hand `notice` off to a background task. Never blocks the caller and never
    /// reports failure back; the handle is only useful to tests.
    pub fn dispatch(&self, notice: Notice) -> JoinHandle<bool> {
        let _ = self.events.send(notice.clone());
        let notifier = self.notifier.clone();
        let max_attempts = self.max_attempts;
        let backoff = self.backoff;
        tokio::spawn(async move { deliver_with_retry(notifier.as_ref(), &notice, max_attempts, backoff).await })
    }
}

/// Returns whether delivery eventually succeeded. Sleeps `backoff * 2^n` between attempts.
async fn deliver_with_retry(
    notifier: &dyn Notifier,
    notice: &Notice,
    max_attempts: u32,
    backoff: Duration,
) -> bool {
    let mut delay = backoff;
    for attempt in 1..=max_attempts {
        match notifier.deliver(notice).await {
            Ok(()) => return true,
            Err(e) if attempt < max_attempts => {
                tracing::warn!(
                    kind = notice.kind.as_str(),
                    reservation_id = %notice.reservation.id,
                    attempt,
                    "notification failed, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(e) => {
                tracing::error!(
                    kind = notice.kind.as_str(),
                    reservation_id = %notice.reservation.id,
                    attempts = max_attempts,
                    "notification dropped: {e}"
                );
            }
        }
    }
    metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL, "kind" => notice.kind.as_str())
        .increment(1);
    false
}
