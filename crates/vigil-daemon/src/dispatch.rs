//! Kind-dispatched delivery to destinations.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use vigil_core::config::{Destination, DestinationKind};
use vigil_core::envelope::SendOutcome;
use vigil_telegram::ChatSender;
use vigil_webhook::WebhookSender;

/// Anything that can deliver a wire-ready payload to a destination. The
/// retry queue dispatches through this so tests can script outcomes.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(
        &self,
        destination: &Destination,
        payload: &str,
        media_path: Option<&Path>,
    ) -> SendOutcome;
}

/// The real senders, selected by destination kind.
///
/// The chat sender is optional: a config with only webhook destinations
/// never connects a chat session. A chat destination without a sender is a
/// startup misconfiguration surfaced as a failed send.
pub struct Senders {
    pub webhook: WebhookSender,
    pub chat: Option<Arc<ChatSender>>,
}

#[async_trait]
impl Dispatch for Senders {
    async fn dispatch(
        &self,
        destination: &Destination,
        payload: &str,
        media_path: Option<&Path>,
    ) -> SendOutcome {
        match destination.kind {
            DestinationKind::Webhook => {
                self.webhook
                    .send(&destination.endpoint, payload, media_path)
                    .await
            }
            DestinationKind::Chat => match &self.chat {
                Some(sender) => sender.send(&destination.endpoint, payload, media_path).await,
                None => {
                    warn!(
                        destination = %destination.name,
                        "chat destination configured but no chat session available"
                    );
                    SendOutcome::Failed
                }
            },
        }
    }
}
