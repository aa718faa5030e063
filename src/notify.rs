use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// One user-facing notification. Best-effort: a delivery failure must not
/// roll back the settlement it describes.
#[derive(Debug, Clone)]
pub struct Notification {
    pub user_id: Uuid,
    pub kind: &'static str,
    pub title: String,
    pub message: String,
    pub data: Value,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Default sink: logs the notification instead of delivering it.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) {
        tracing::info!(
            user_id = %notification.user_id,
            kind = notification.kind,
            title = %notification.title,
            "notification"
        );
    }
}
