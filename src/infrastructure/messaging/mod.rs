pub mod webhook;

pub use webhook::{HttpWebhookClient, WebhookClientConfig};
