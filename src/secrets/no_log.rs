//! No-log enforcement for sensitive inputs.

use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Placeholder written wherever a secret would otherwise appear.
pub const REDACTED: &str = "[REDACTED]";

/// A string wrapper that prevents the value from being logged.
///
/// `Display`, `Debug` and `Serialize` all yield `[REDACTED]`. Use
/// [`expose`](Self::expose) only at the point where the value is handed to a
/// cloud API.
#[derive(Clone)]
pub struct SensitiveString {
    value: String,
}

impl SensitiveString {
    /// Create a new sensitive string.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Expose the underlying value.
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Check if the value is empty.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Argon2id hash of the value with a fresh random salt, as a PHC string.
    ///
    /// Stored in place of the secret. Two hashes of the same value differ, so
    /// compare with [`verify`](Self::verify), never with `==`.
    pub fn salted_hash(&self) -> Result<String, password_hash::Error> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default().hash_password(self.value.as_bytes(), &salt)?;
        Ok(hash.to_string())
    }

    /// Whether `phc` is a hash of this value. Malformed hashes never match.
    pub fn verify(&self, phc: &str) -> bool {
        PasswordHash::new(phc)
            .map(|hash| {
                Argon2::default()
                    .verify_password(self.value.as_bytes(), &hash)
                    .is_ok()
            })
            .unwrap_or(false)
    }
}

impl fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveString({REDACTED})")
    }
}

// No Deref to str: callers must go through expose().

impl From<String> for SensitiveString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SensitiveString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl PartialEq for SensitiveString {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for SensitiveString {}

impl serde::Serialize for SensitiveString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> serde::Deserialize<'de> for SensitiveString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

/// Registry of exposed secret values that must be scrubbed from output.
pub struct NoLogRegistry {
    values: RwLock<HashSet<String>>,
}

impl NoLogRegistry {
    /// Create a new registry.
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashSet::new()),
        }
    }

    /// Register a sensitive value. Empty strings are ignored.
    pub fn register(&self, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.values.write().insert(value);
    }

    /// Unregister a sensitive value.
    pub fn unregister(&self, value: &str) {
        self.values.write().remove(value);
    }

    /// Check if a text contains any registered sensitive values.
    pub fn contains_sensitive(&self, text: &str) -> bool {
        self.values.read().iter().any(|v| text.contains(v.as_str()))
    }

    /// Replace every registered value in `text` with `[REDACTED]`.
    pub fn redact(&self, text: &str) -> String {
        let values = self.values.read();
        // Longest first, so a secret that contains another is not half-redacted.
        let mut ordered: Vec<&String> = values.iter().collect();
        ordered.sort_by_key(|v| std::cmp::Reverse(v.len()));

        let mut result = text.to_string();
        for value in ordered {
            if result.contains(value.as_str()) {
                result = result.replace(value.as_str(), REDACTED);
            }
        }
        result
    }

    /// Get the number of registered values.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl Default for NoLogRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NoLogRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoLogRegistry")
            .field("registered_values", &self.len())
            .finish()
    }
}

/// Registers values for the lifetime of a run and unregisters them on drop.
pub struct NoLogGuard {
    registry: Arc<NoLogRegistry>,
    values: Vec<String>,
}

impl NoLogGuard {
    /// Create a new guard with the given registry.
    pub fn new(registry: Arc<NoLogRegistry>) -> Self {
        Self {
            registry,
            values: Vec::new(),
        }
    }

    /// Register a value to be redacted.
    pub fn protect(&mut self, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.registry.register(value.clone());
        self.values.push(value);
    }
}

impl Drop for NoLogGuard {
    fn drop(&mut self) {
        for value in &self.values {
            self.registry.unregister(value);
        }
    }
}

/// Whether an attribute or variable name suggests sensitive data.
pub fn is_sensitive_field_name(name: &str) -> bool {
    const PATTERNS: [&str; 6] = ["password", "passwd", "secret", "token", "private_key", "credential"];

    let lower = name.to_lowercase();
    PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_string_display_and_debug() {
        let secret = SensitiveString::new("alloy-pass");
        assert_eq!(format!("{}", secret), REDACTED);
        assert!(!format!("{:?}", secret).contains("alloy-pass"));
        assert_eq!(secret.expose(), "alloy-pass");
    }

    #[test]
    fn test_sensitive_string_serialization() {
        let secret = SensitiveString::new("alloy-pass");
        let json = serde_json::to_string(&secret).unwrap();
        assert!(json.contains("REDACTED"));
        assert!(!json.contains("alloy-pass"));
    }

    #[test]
    fn test_salted_hash_differs_but_verifies() {
        let secret = SensitiveString::new("alloy-pass");
        let first = secret.salted_hash().unwrap();
        let second = secret.salted_hash().unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("$argon2id$"));
        assert!(!first.contains("alloy-pass"));

        assert!(secret.verify(&first));
        assert!(secret.verify(&second));
        assert!(!SensitiveString::new("other-pass").verify(&first));
        assert!(!secret.verify("not a phc string"));
    }

    #[test]
    fn test_registry_redacts_longest_first() {
        let registry = NoLogRegistry::new();
        registry.register("pass");
        registry.register("password123");

        let redacted = registry.redact("got password123 and pass");
        assert_eq!(redacted, "got [REDACTED] and [REDACTED]");
    }

    #[test]
    fn test_guard_unregisters_on_drop() {
        let registry = Arc::new(NoLogRegistry::new());
        {
            let mut guard = NoLogGuard::new(registry.clone());
            guard.protect("temp_secret");
            guard.protect("");
            assert!(registry.contains_sensitive("contains temp_secret"));
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sensitive_field_names() {
        assert!(is_sensitive_field_name("db_password"));
        assert!(is_sensitive_field_name("ACCESS_TOKEN"));
        assert!(!is_sensitive_field_name("project_id"));
        assert!(!is_sensitive_field_name("region"));
    }
}
