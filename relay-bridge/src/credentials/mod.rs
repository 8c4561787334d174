//! Placeholder templating for integration secrets.
//!
//! Request records on the ledger never carry secrets; they carry placeholder
//! tokens that the bridge swaps for the real value right before dispatch
//! ([`CredentialTemplate::substitute`]) and swaps back before anything leaves
//! the bridge ([`CredentialTemplate::redact`]).

use serde_json::Value;
use tracing::warn;

/// One placeholder/secret pair.
#[derive(Clone)]
pub struct SecretBinding {
    pub name: String,
    pub placeholder: String,
    pub secret: Option<String>,
}

impl SecretBinding {
    pub fn new(
        name: impl Into<String>,
        placeholder: impl Into<String>,
        secret: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            placeholder: placeholder.into(),
            secret: secret.filter(|s| !s.is_empty()),
        }
    }
}

impl std::fmt::Debug for SecretBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBinding")
            .field("name", &self.name)
            .field("placeholder", &self.placeholder)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CredentialTemplate {
    bindings: Vec<SecretBinding>,
}

impl CredentialTemplate {
    pub fn new(bindings: Vec<SecretBinding>) -> Self {
        Self {
            bindings: bindings
                .into_iter()
                .filter(|b| !b.placeholder.is_empty())
                .collect(),
        }
    }

    pub fn bindings(&self) -> &[SecretBinding] {
        &self.bindings
    }

    /// Replace every known placeholder in `text` with its secret.
    ///
    /// A placeholder whose secret is not configured is left in place.
    pub fn substitute(&self, text: &str) -> String {
        let mut out = text.to_string();
        for binding in &self.bindings {
            if !out.contains(&binding.placeholder) {
                continue;
            }
            match &binding.secret {
                Some(secret) => out = out.replace(&binding.placeholder, secret),
                None => warn!(
                    secret = %binding.name,
                    "placeholder present but secret is not configured, leaving it untouched"
                ),
            }
        }
        out
    }

    /// Replace every configured secret value in `text` with its placeholder.
    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for binding in &self.bindings {
            if let Some(secret) = &binding.secret {
                if out.contains(secret.as_str()) {
                    out = out.replace(secret.as_str(), &binding.placeholder);
                }
            }
        }
        out
    }

    /// Redact every string (keys included) inside a JSON value.
    pub fn redact_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.redact(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.redact_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (self.redact(k), self.redact_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}
