//! Webhook signature verification (HMAC-SHA256)
//!
//! Each delivery carries `x-zm-request-timestamp` and `x-zm-signature`
//! headers. The signature is `v0=` followed by the hex HMAC of
//! `v0:{timestamp}:{body}` keyed with the webhook secret token.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_VERSION: &str = "v0";

#[derive(Clone)]
pub struct WebhookSigner {
    secret: Vec<u8>,
}

impl WebhookSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length")
    }

    /// Hex HMAC of `message`. Also used to answer URL validation challenges.
    pub fn sign(&self, message: &str) -> String {
        let mut mac = self.mac();
        mac.update(message.as_bytes());
        to_hex(&mac.finalize().into_bytes())
    }

    /// Signature header value expected for a delivery.
    pub fn expected_signature(&self, timestamp: &str, body: &str) -> String {
        let message = format!("{}:{}:{}", SIGNATURE_VERSION, timestamp, body);
        format!("{}={}", SIGNATURE_VERSION, self.sign(&message))
    }

    /// Constant-time check of a delivery's signature header.
    pub fn verify(&self, timestamp: &str, body: &str, signature: &str) -> bool {
        let Some(provided) = signature
            .strip_prefix(SIGNATURE_VERSION)
            .and_then(|s| s.strip_prefix('='))
            .and_then(from_hex)
        else {
            return false;
        };

        let mut mac = self.mac();
        mac.update(format!("{}:{}:{}", SIGNATURE_VERSION, timestamp, body).as_bytes());
        mac.verify_slice(&provided).is_ok()
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}
