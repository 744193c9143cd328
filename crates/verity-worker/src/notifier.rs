//! A [`Notifier`] that writes notifications to the log. Delivery channels
//! (email, push) plug in behind the same trait.

use tracing::info;
use verity_core::notify::{Notification, Notifier, NotifyError};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
    info!(
      target: "verity::notify",
      user_id = %notification.user_id,
      kind = %notification.kind,
      related_id = %notification.related_id,
      title = %notification.title,
      "{}",
      notification.message
    );
    Ok(())
  }
}
