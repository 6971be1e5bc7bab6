//! Webhook destination adapter: markdown formatting and chunked delivery.

pub mod format;
pub mod send;

pub use format::format_message;
pub use send::WebhookSender;
