//! Token-based request authentication.
//!
//! Disabled by default. When enabled, every signaling request must carry a
//! valid token. Two modes, mirroring the admin-managed token table and the
//! self-contained signed tokens:
//!
//! * **stored mode** (no secret configured): tokens are opaque strings added
//!   and removed through the admin surface;
//! * **signed mode** (a secret is configured): tokens are
//!   `"<expiry>,<realm>[,<descriptor>...]:<base64 hmac-sha1>"`, validated
//!   statelessly against the shared secret.
//!
//! In both modes a token can be restricted to a set of plugin packages.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha1 = Hmac<Sha1>;

pub struct TokenAuth {
    enabled: bool,
    secret: Option<String>,
    /// token -> plugin packages it may attach to (empty set = all).
    tokens: Mutex<HashMap<String, HashSet<String>>>,
}

impl TokenAuth {
    pub fn new(enabled: bool, secret: Option<String>) -> Self {
        Self {
            enabled,
            secret,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Stored-token mode is active when no signing secret is configured.
    pub fn is_stored_mode(&self) -> bool {
        self.secret.is_none()
    }

    /// Add a token to the stored table.
    pub fn add_token(&self, token: &str) -> bool {
        if !self.enabled {
            return false;
        }
        self.tokens
            .lock()
            .unwrap()
            .entry(token.to_string())
            .or_default();
        true
    }

    pub fn remove_token(&self, token: &str) -> bool {
        self.tokens.lock().unwrap().remove(token).is_some()
    }

    pub fn list_tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().keys().cloned().collect()
    }

    /// Validate a token: signature mode first, then the stored table.
    pub fn check_token(&self, token: &str) -> bool {
        if !self.enabled {
            return true;
        }
        if self.secret.is_some() {
            return self.check_signature(token, "janus");
        }
        self.tokens.lock().unwrap().contains_key(token)
    }

    /// Validate a signed token against a realm.
    pub fn check_signature(&self, token: &str, realm: &str) -> bool {
        self.parse_signed(token, realm).is_some()
    }

    /// Validate a signed token and check it grants a descriptor.
    pub fn check_signature_contains(&self, token: &str, realm: &str, descriptor: &str) -> bool {
        self.parse_signed(token, realm)
            .is_some_and(|descriptors| descriptors.iter().any(|d| d == descriptor))
    }

    fn parse_signed(&self, token: &str, realm: &str) -> Option<Vec<String>> {
        let secret = self.secret.as_ref()?;
        let (data, signature) = token.rsplit_once(':')?;

        let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(data.as_bytes());
        let digest = mac.finalize().into_bytes();
        let expected = BASE64.encode(digest);
        if expected != signature {
            return None;
        }

        let mut fields = data.split(',');
        let expiry: u64 = fields.next()?.parse().ok()?;
        let token_realm = fields.next()?;
        if token_realm != realm {
            return None;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if expiry <= now {
            return None;
        }
        Some(fields.map(String::from).collect())
    }

    /// Allow a stored token to attach to a plugin.
    pub fn allow_plugin(&self, token: &str, package: &str) -> bool {
        let mut tokens = self.tokens.lock().unwrap();
        match tokens.get_mut(token) {
            Some(set) => {
                set.insert(package.to_string());
                true
            }
            None => false,
        }
    }

    pub fn disallow_plugin(&self, token: &str, package: &str) -> bool {
        let mut tokens = self.tokens.lock().unwrap();
        tokens
            .get_mut(token)
            .map(|set| set.remove(package))
            .unwrap_or(false)
    }

    /// May this token attach to this plugin?
    pub fn check_plugin(&self, token: &str, package: &str) -> bool {
        if !self.enabled {
            return true;
        }
        if self.secret.is_some() {
            // Signed mode: the descriptor list gates plugin access.
            return self.check_signature_contains(token, "janus", package)
                || self.check_signature(token, package);
        }
        let tokens = self.tokens.lock().unwrap();
        match tokens.get(token) {
            Some(set) => set.is_empty() || set.contains(package),
            None => false,
        }
    }

    pub fn list_plugins(&self, token: &str) -> Vec<String> {
        self.tokens
            .lock()
            .unwrap()
            .get(token)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Build a signed token (used by tests and provisioning tools).
pub fn sign_token(secret: &str, expiry: u64, realm: &str, descriptors: &[&str]) -> String {
    let mut data = format!("{expiry},{realm}");
    for d in descriptors {
        data.push(',');
        data.push_str(d);
    }
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(data.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());
    format!("{data}:{signature}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn far_future() -> u64 {
        4_000_000_000 // year 2096
    }

    #[test]
    fn disabled_auth_accepts_everything() {
        let auth = TokenAuth::new(false, None);
        assert!(auth.check_token("anything"));
        assert!(auth.check_plugin("anything", "gate.plugin.echotest"));
    }

    #[test]
    fn stored_tokens_must_exist() {
        let auth = TokenAuth::new(true, None);
        assert!(!auth.check_token("nope"));
        assert!(auth.add_token("abc"));
        assert!(auth.check_token("abc"));
        assert!(auth.remove_token("abc"));
        assert!(!auth.check_token("abc"));
    }

    #[test]
    fn stored_token_plugin_acl() {
        let auth = TokenAuth::new(true, None);
        auth.add_token("abc");
        // empty ACL means every plugin
        assert!(auth.check_plugin("abc", "gate.plugin.echotest"));
        auth.allow_plugin("abc", "gate.plugin.videoroom");
        assert!(auth.check_plugin("abc", "gate.plugin.videoroom"));
        assert!(!auth.check_plugin("abc", "gate.plugin.echotest"));
    }

    #[test]
    fn signed_tokens_validate_and_expire() {
        let auth = TokenAuth::new(true, Some("s3cret".into()));
        let good = sign_token("s3cret", far_future(), "janus", &[]);
        assert!(auth.check_token(&good));

        let expired = sign_token("s3cret", 1, "janus", &[]);
        assert!(!auth.check_token(&expired));

        let wrong_secret = sign_token("other", far_future(), "janus", &[]);
        assert!(!auth.check_token(&wrong_secret));

        let wrong_realm = sign_token("s3cret", far_future(), "other", &[]);
        assert!(!auth.check_token(&wrong_realm));
    }

    #[test]
    fn signed_tokens_carry_descriptors() {
        let auth = TokenAuth::new(true, Some("s3cret".into()));
        let token = sign_token(
            "s3cret",
            far_future(),
            "janus",
            &["gate.plugin.echotest"],
        );
        assert!(auth.check_signature_contains(&token, "janus", "gate.plugin.echotest"));
        assert!(!auth.check_signature_contains(&token, "janus", "gate.plugin.videoroom"));
        assert!(auth.check_plugin(&token, "gate.plugin.echotest"));
    }
}
