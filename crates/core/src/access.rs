use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest client address kept before anonymization.
pub const MAX_CLIENT_ADDRESS_LEN: usize = 250;

/// Longest user agent kept in an access log entry.
pub const MAX_USER_AGENT_LEN: usize = 500;

/// How a resource was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// Rendered inline by the client (video, audio, HTML).
    View,
    /// Delivered as an attachment.
    Download,
}

impl AccessType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Download => "download",
        }
    }
}

impl std::fmt::Display for AccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of one served request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// Persisted link record, when the link was issued by this deployment.
    #[serde(default)]
    pub link_id: Option<Uuid>,
    /// File that was served.
    pub resource_id: String,
    pub accessed_at: DateTime<Utc>,
    /// Anonymized client address.
    pub client_address: String,
    /// Truncated user agent.
    #[serde(default)]
    pub user_agent: Option<String>,
    pub access_type: AccessType,
}

impl AccessLogEntry {
    /// Build an entry, anonymizing the address and truncating the user agent.
    #[must_use]
    pub fn new(
        link_id: Option<Uuid>,
        resource_id: impl Into<String>,
        client_address: &str,
        user_agent: Option<&str>,
        access_type: AccessType,
        accessed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            link_id,
            resource_id: resource_id.into(),
            accessed_at,
            client_address: anonymize_client_address(client_address),
            user_agent: user_agent.map(truncate_user_agent),
            access_type,
        }
    }
}

/// Drop the host part of a client address.
///
/// IPv4 keeps the first three octets (`10.1.2.xxx`), IPv6 keeps the first
/// three groups (`2001:db8:1:xxx`). Other formats are kept as given. An empty
/// address becomes `unknown`.
#[must_use]
pub fn anonymize_client_address(address: &str) -> String {
    let address = address.trim();
    if address.is_empty() {
        return "unknown".to_owned();
    }
    let address = truncate_chars(address, MAX_CLIENT_ADDRESS_LEN);

    let octets: Vec<&str> = address.split('.').collect();
    if octets.len() == 4 {
        return format!("{}.{}.{}.xxx", octets[0], octets[1], octets[2]);
    }
    if address.contains(':') {
        let groups: Vec<&str> = address.split(':').collect();
        if groups.len() >= 3 {
            return format!("{}:{}:{}:xxx", groups[0], groups[1], groups[2]);
        }
    }
    address.to_owned()
}

/// Limit a user agent string to [`MAX_USER_AGENT_LEN`] characters.
#[must_use]
pub fn truncate_user_agent(user_agent: &str) -> String {
    truncate_chars(user_agent, MAX_USER_AGENT_LEN).to_owned()
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
