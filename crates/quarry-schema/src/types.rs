//! Newtype wrappers for tool identity strings, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings so manifests and reports
//! stay plain JSON.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
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
    /// Stable tool identifier as declared in a manifest (e.g. `godot`).
    ToolId
);

string_newtype!(
    /// Opaque tool version label (e.g. `4.3`). Never parsed or ordered semantically.
    ToolVersion
);

/// One `(id, version)` pair a caller asks to have hydrated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: ToolId,
    pub version: ToolVersion,
}

impl ToolRequest {
    pub fn new(id: impl Into<ToolId>, version: impl Into<ToolVersion>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ToolRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

/// Parses the `id@version` form used on the command line.
impl FromStr for ToolRequest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, version) = s
            .split_once('@')
            .ok_or_else(|| format!("invalid tool request '{s}', expected '<id>@<version>'"))?;
        let (id, version) = (id.trim(), version.trim());
        if id.is_empty() || version.is_empty() {
            return Err(format!(
                "invalid tool request '{s}', id and version must not be empty"
            ));
        }
        Ok(Self::new(id, version))
    }
}
