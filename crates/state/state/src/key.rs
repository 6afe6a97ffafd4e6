use serde::{Deserialize, Serialize};

/// The kind of state being stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// Canonical file metadata row, keyed by resource id.
    File,
    /// Monotonic counters (views, downloads).
    Counter,
    /// Per-user rate limit window counters.
    RateLimit,
    /// Issued link analytics record.
    Link,
    /// Append-only access log.
    AccessLog,
    Custom(String),
}

impl KeyKind {
    /// Return a string representation of the key kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::File => "file",
            Self::Counter => "counter",
            Self::RateLimit => "rate_limit",
            Self::Link => "link",
            Self::AccessLog => "access_log",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key used to address state entries in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub namespace: String,
    pub kind: KeyKind,
    pub id: String,
}

impl StateKey {
    /// Create a new state key.
    #[must_use]
    pub fn new(namespace: impl Into<String>, kind: KeyKind, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            id: id.into(),
        }
    }

    /// Return a canonical string representation: `namespace:kind:id`
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", self.namespace, self.kind, self.id)
    }

    /// Prefix shared by every key of `kind` in `namespace`.
    #[must_use]
    pub fn kind_prefix(namespace: &str, kind: &KeyKind) -> String {
        format!("{namespace}:{kind}:")
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}
