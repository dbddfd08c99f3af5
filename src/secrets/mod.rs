//! Secret handling for declaration inputs.
//!
//! The database password is the only secret this tool handles. It is held in
//! a [`SensitiveString`] from the moment it is read, and while a run is in
//! progress the exposed value is registered with a [`NoLogRegistry`] through
//! a scoped [`NoLogGuard`] so that any cloud error message echoing it back is
//! scrubbed before it reaches logs or the terminal.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vulnstack::secrets::{NoLogGuard, NoLogRegistry, SensitiveString};
//!
//! let registry = Arc::new(NoLogRegistry::new());
//! let password = SensitiveString::new("hunter2");
//! {
//!     let mut guard = NoLogGuard::new(registry.clone());
//!     guard.protect(password.expose());
//!     assert_eq!(registry.redact("bad password hunter2"), "bad password [REDACTED]");
//! }
//! ```

mod no_log;

pub use no_log::{is_sensitive_field_name, NoLogGuard, NoLogRegistry, SensitiveString, REDACTED};
