//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Service identifier as declared under `services:` in the Director file.
    ServiceId
);

string_newtype!(
    /// Name of the jail backing a service.
    JailName
);

string_newtype!(
    /// Blake3 digest of a resolved service configuration.
    ConfigDigest
);

/// Service and project names: `^[a-zA-Z0-9._-]+$`.
pub fn validate_service_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Jail names: `^[a-zA-Z0-9_][a-zA-Z0-9_-]*$`.
pub fn validate_jail_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(first) if first.is_ascii_alphanumeric() || first == b'_' => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_id_display_and_as_ref() {
        let id = ServiceId::new("web");
        assert_eq!(id.to_string(), "web");
        assert_eq!(id.as_str(), "web");
        assert_eq!(AsRef::<str>::as_ref(&id), "web");
    }

    #[test]
    fn jail_name_serde_is_transparent() {
        let name = JailName::new("a1b2c3d4e5");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"a1b2c3d4e5\"");
        let back: JailName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }

    #[test]
    fn service_names() {
        assert!(validate_service_name("web"));
        assert!(validate_service_name("db.primary-1_x"));
        assert!(!validate_service_name(""));
        assert!(!validate_service_name("has space"));
        assert!(!validate_service_name("slash/name"));
    }

    #[test]
    fn jail_names() {
        assert!(validate_jail_name("nginx"));
        assert!(validate_jail_name("_private-1"));
        assert!(!validate_jail_name("-leading"));
        assert!(!validate_jail_name("dot.name"));
        assert!(!validate_jail_name(""));
    }
}
