//! Signed, expiring resource links.
//!
//! A link is the tuple `(resource_id, expiry, tag)` carried in the URL path.
//! The tag is the first [`TAG_LEN`] lowercase hex characters of
//! `SHA-256(resource_id | expiry | secret)`, so a link can be authorized
//! without any server-side lookup. Changing the secret, the concatenation
//! order or the truncation length invalidates every link ever issued.
//!
//! The signing secret is held as a [`SecretString`] to prevent accidental
//! logging.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

// Re-export for consumers so they don't need a direct `secrecy` dependency.
pub use secrecy::{ExposeSecret, SecretString};

/// Number of hex characters kept from the digest.
pub const TAG_LEN: usize = 16;

/// Errors produced when issuing or verifying links.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The link's expiry is in the past.
    #[error("link expired at {expiry}")]
    Expired {
        /// Expiry carried by the link, in epoch seconds.
        expiry: i64,
    },

    /// The tag does not match the resource and expiry, or the link is malformed.
    #[error("link integrity check failed")]
    Invalid,

    /// The codec was built with an empty secret.
    #[error("link signing secret must not be empty")]
    EmptySecret,

    /// `now + ttl` does not fit in an epoch timestamp.
    #[error("link lifetime of {ttl_seconds}s overflows the expiry timestamp")]
    ExpiryOverflow {
        /// Requested lifetime.
        ttl_seconds: u64,
    },
}

/// An issued link: everything needed to build the URL path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedLink {
    pub resource_id: String,
    /// Expiry as Unix epoch seconds.
    pub expiry: i64,
    /// Truncated integrity tag.
    pub tag: String,
}

impl SignedLink {
    /// URL path of the link: `/{resource_id}/{expiry}/{tag}`.
    #[must_use]
    pub fn path(&self) -> String {
        format!("/{}/{}/{}", self.resource_id, self.expiry, self.tag)
    }
}

/// Issues and verifies signed links with a single server secret.
#[derive(Clone)]
pub struct LinkCodec {
    secret: Arc<SecretString>,
}

impl fmt::Debug for LinkCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LinkCodec([REDACTED])")
    }
}

impl LinkCodec {
    /// Create a codec. The secret must not be empty.
    pub fn new(secret: SecretString) -> Result<Self, LinkError> {
        if secret.expose_secret().is_empty() {
            return Err(LinkError::EmptySecret);
        }
        Ok(Self {
            secret: Arc::new(secret),
        })
    }

    /// Compute the integrity tag for `(resource_id, expiry)`.
    #[must_use]
    pub fn compute_tag(&self, resource_id: &str, expiry: i64) -> String {
        compute_tag(resource_id, expiry, self.secret.expose_secret())
    }

    /// Issue a link for `resource_id` that expires `ttl_seconds` after `now`.
    pub fn issue(
        &self,
        resource_id: &str,
        ttl_seconds: u64,
        now: i64,
    ) -> Result<SignedLink, LinkError> {
        let expiry = i64::try_from(ttl_seconds)
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or(LinkError::ExpiryOverflow { ttl_seconds })?;
        Ok(SignedLink {
            resource_id: resource_id.to_owned(),
            expiry,
            tag: self.compute_tag(resource_id, expiry),
        })
    }

    /// Verify a link at time `now`.
    ///
    /// Expiry is checked first: a link is valid while `now <= expiry`. The
    /// tag comparison runs in constant time.
    pub fn verify(
        &self,
        resource_id: &str,
        expiry: i64,
        tag: &str,
        now: i64,
    ) -> Result<(), LinkError> {
        if now > expiry {
            return Err(LinkError::Expired { expiry });
        }
        let expected = self.compute_tag(resource_id, expiry);
        if bool::from(expected.as_bytes().ct_eq(tag.as_bytes())) {
            Ok(())
        } else {
            Err(LinkError::Invalid)
        }
    }

    /// Verify a link whose expiry is still the raw URL segment.
    ///
    /// A non-numeric expiry is [`LinkError::Invalid`]. Returns the parsed expiry.
    pub fn verify_segments(
        &self,
        resource_id: &str,
        expiry: &str,
        tag: &str,
        now: i64,
    ) -> Result<i64, LinkError> {
        let expiry: i64 = expiry.parse().map_err(|_| LinkError::Invalid)?;
        self.verify(resource_id, expiry, tag, now)?;
        Ok(expiry)
    }

    /// Boolean form of [`verify`](Self::verify).
    #[must_use]
    pub fn is_valid(&self, resource_id: &str, expiry: i64, tag: &str, now: i64) -> bool {
        self.verify(resource_id, expiry, tag, now).is_ok()
    }
}

/// Compute the integrity tag for `(resource_id, expiry)` under `secret`.
#[must_use]
pub fn compute_tag(resource_id: &str, expiry: i64, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resource_id.as_bytes());
    hasher.update(b"|");
    hasher.update(expiry.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(secret.as_bytes());
    let mut tag = hex::encode(hasher.finalize());
    tag.truncate(TAG_LEN);
    tag
}

/// Issue `(expiry, tag)` for a resource without building a codec.
pub fn issue(
    resource_id: &str,
    ttl_seconds: u64,
    secret: &str,
    now: i64,
) -> Result<(i64, String), LinkError> {
    let codec = LinkCodec::new(SecretString::new(secret.to_owned()))?;
    let link = codec.issue(resource_id, ttl_seconds, now)?;
    Ok((link.expiry, link.tag))
}

/// Check a link without building a codec. An empty secret never verifies.
#[must_use]
pub fn verify(resource_id: &str, expiry: i64, tag: &str, secret: &str, now: i64) -> bool {
    LinkCodec::new(SecretString::new(secret.to_owned()))
        .is_ok_and(|codec| codec.is_valid(resource_id, expiry, tag, now))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn codec() -> LinkCodec {
        LinkCodec::new(SecretString::new("s3cr3t".to_owned())).unwrap()
    }

    #[test]
    fn tag_matches_known_vector() {
        assert_eq!(
            compute_tag("AgADBQADq6cxG", 1_700_000_000, "s3cr3t"),
            "c1d740b213793dbe"
        );
    }

    #[test]
    fn issued_link_verifies() {
        let link = codec().issue("AgADBQADq6cxG", 3600, NOW).unwrap();
        assert_eq!(link.expiry, NOW + 3600);
        assert_eq!(link.tag.len(), TAG_LEN);
        assert_eq!(codec().verify("AgADBQADq6cxG", link.expiry, &link.tag, NOW), Ok(()));
        assert_eq!(link.path(), format!("/AgADBQADq6cxG/{}/{}", NOW + 3600, link.tag));
    }

    #[test]
    fn valid_up_to_and_including_expiry() {
        let link = codec().issue("res", 10, NOW).unwrap();
        assert!(codec().is_valid("res", link.expiry, &link.tag, link.expiry));
        assert_eq!(
            codec().verify("res", link.expiry, &link.tag, link.expiry + 1),
            Err(LinkError::Expired { expiry: link.expiry })
        );
    }

    #[test]
    fn tampering_any_resource_byte_invalidates() {
        let c = codec();
        let link = c.issue("AgADBQADq6cxG", 600, NOW).unwrap();
        let original = link.resource_id.as_bytes();
        for i in 0..original.len() {
            let mut tampered = original.to_vec();
            tampered[i] = if tampered[i] == b'x' { b'y' } else { b'x' };
            let tampered = String::from_utf8(tampered).unwrap();
            assert_eq!(
                c.verify(&tampered, link.expiry, &link.tag, NOW),
                Err(LinkError::Invalid),
                "byte {i} of resource id"
            );
        }
    }

    #[test]
    fn tampering_any_expiry_digit_invalidates() {
        let c = codec();
        let link = c.issue("res", 600, NOW).unwrap();
        let digits = link.expiry.to_string().into_bytes();
        for i in 0..digits.len() {
            let mut tampered = digits.clone();
            tampered[i] = if tampered[i] == b'9' { b'8' } else { tampered[i] + 1 };
            let tampered: i64 = String::from_utf8(tampered).unwrap().parse().unwrap();
            // Stay within the validity window so only the tag can fail.
            let now = tampered.min(link.expiry) - 1;
            assert_eq!(
                c.verify("res", tampered, &link.tag, now),
                Err(LinkError::Invalid),
                "digit {i} of expiry"
            );
        }
    }

    #[test]
    fn tampered_tag_invalidates() {
        let c = codec();
        let link = c.issue("res", 600, NOW).unwrap();
        let mut tag = link.tag.clone();
        tag.replace_range(0..1, if tag.starts_with('0') { "1" } else { "0" });
        assert_eq!(c.verify("res", link.expiry, &tag, NOW), Err(LinkError::Invalid));
        assert_eq!(
            c.verify("res", link.expiry, &link.tag[..8], NOW),
            Err(LinkError::Invalid)
        );
    }

    #[test]
    fn expired_link_stays_expired() {
        let c = codec();
        let link = c.issue("res", 5, NOW).unwrap();
        for offset in [6, 60, 3600, 86_400 * 365] {
            assert_eq!(
                c.verify("res", link.expiry, &link.tag, NOW + offset),
                Err(LinkError::Expired { expiry: link.expiry })
            );
        }
    }

    #[test]
    fn expiry_is_checked_before_integrity() {
        assert_eq!(
            codec().verify("res", NOW - 1, "not-a-tag", NOW),
            Err(LinkError::Expired { expiry: NOW - 1 })
        );
    }

    #[test]
    fn segment_parsing() {
        let c = codec();
        let link = c.issue("res", 60, NOW).unwrap();
        assert_eq!(
            c.verify_segments("res", &link.expiry.to_string(), &link.tag, NOW),
            Ok(link.expiry)
        );
        assert_eq!(
            c.verify_segments("res", "soon", &link.tag, NOW),
            Err(LinkError::Invalid)
        );
    }

    #[test]
    fn different_secret_rejects() {
        let link = codec().issue("res", 60, NOW).unwrap();
        let other = LinkCodec::new(SecretString::new("other".to_owned())).unwrap();
        assert_eq!(
            other.verify("res", link.expiry, &link.tag, NOW),
            Err(LinkError::Invalid)
        );
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert_eq!(
            LinkCodec::new(SecretString::new(String::new())).unwrap_err(),
            LinkError::EmptySecret
        );
        assert!(!verify("res", NOW, "tag", "", NOW));
    }

    #[test]
    fn overflowing_ttl_is_rejected() {
        assert_eq!(
            codec().issue("res", u64::MAX, NOW).unwrap_err(),
            LinkError::ExpiryOverflow { ttl_seconds: u64::MAX }
        );
    }

    #[test]
    fn free_functions_roundtrip() {
        let (expiry, tag) = issue("res", 120, "k", NOW).unwrap();
        assert!(verify("res", expiry, &tag, "k", NOW));
        assert!(!verify("res", expiry, &tag, "k", expiry + 1));
        assert!(!verify("rez", expiry, &tag, "k", NOW));
    }

    #[test]
    fn debug_is_redacted() {
        assert_eq!(format!("{:?}", codec()), "LinkCodec([REDACTED])");
    }
}
