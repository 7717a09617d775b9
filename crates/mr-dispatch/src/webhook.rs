//! Shared secret for the campaign service's webhook callbacks.
//!
//! The HTTP endpoint lives outside this crate; it passes the key segment of
//! the request path to [`WebhookKey::verify`].

use rand::Rng;
use subtle::ConstantTimeEq;
use tracing::warn;

use mr_config::WebhookConfig;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub const GENERATED_KEY_LEN: usize = 50;

fn generate_random_string(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

#[derive(Clone)]
pub struct WebhookKey {
    key: String,
    generated: bool,
}

impl WebhookKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            generated: false,
        }
    }

    /// Use the configured key, or generate one for this process.
    ///
    /// A generated key changes on every restart, so callbacks registered
    /// with the service stop authenticating after a restart.
    pub fn from_config(config: &WebhookConfig) -> Self {
        if !config.key.is_empty() {
            return Self::new(config.key.clone());
        }

        warn!(
            "No webhook key configured; generated a random key for this process. \
             Set webhook.key or MAILROOM_WEBHOOK_KEY to keep it stable"
        );
        Self {
            key: generate_random_string(GENERATED_KEY_LEN),
            generated: true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    /// Constant-time comparison against the key presented by a caller
    pub fn verify(&self, presented: &str) -> bool {
        if presented.is_empty() {
            return false;
        }
        self.key.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

impl std::fmt::Debug for WebhookKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookKey")
            .field("key", &"<redacted>")
            .field("generated", &self.generated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_key_is_used() {
        let key = WebhookKey::from_config(&WebhookConfig {
            key: "s3cret".to_string(),
        });
        assert!(!key.is_generated());
        assert!(key.verify("s3cret"));
        assert!(!key.verify("s3cre"));
        assert!(!key.verify("s3cret!"));
        assert!(!key.verify(""));
    }

    #[test]
    fn test_generated_key_shape() {
        let key = WebhookKey::from_config(&WebhookConfig::default());
        assert!(key.is_generated());
        assert_eq!(key.as_str().len(), GENERATED_KEY_LEN);
        assert!(key.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(key.verify(&key.as_str().to_string()));

        let other = WebhookKey::from_config(&WebhookConfig::default());
        assert_ne!(key.as_str(), other.as_str());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = WebhookKey::new("s3cret");
        assert!(!format!("{:?}", key).contains("s3cret"));
    }
}
