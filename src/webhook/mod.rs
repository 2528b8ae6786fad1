// Webhook delivery: envelopes and the retrying sink.

pub mod payload;
pub mod sink;

pub use payload::{MentionEnvelope, TestEnvelope};
pub use sink::{DeliveryResult, WebhookConfig, WebhookInfo, WebhookSink, WebhookTransport};
