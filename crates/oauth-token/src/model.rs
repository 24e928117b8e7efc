//! OAuth2 token data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fully materialized OAuth2 token, as held transiently during a single
/// operation (refresh, validation, handoff to the API client).
///
/// Never stored in this plaintext form for longer than one call — the
/// manager keeps only the AES-GCM encrypted form between calls.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuth2Token {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub scope: String,
}

impl std::fmt::Debug for OAuth2Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Token")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("issued_at", &self.issued_at)
            .field("scope", &self.scope)
            .finish()
    }
}

impl OAuth2Token {
    /// Whether the token is usable: both opaque strings are non-empty and
    /// `expires_at` postdates `issued_at`.
    pub fn is_well_formed(&self) -> bool {
        !self.access_token.is_empty()
            && !self.refresh_token.is_empty()
            && self.expires_at > self.issued_at
    }

    /// A token is expired once `now + clock_skew >= expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>, clock_skew: chrono::Duration) -> bool {
        now + clock_skew >= self.expires_at
    }

    /// A token needs refresh once `now + refresh_buffer >= expires_at`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, refresh_buffer: chrono::Duration) -> bool {
        now + refresh_buffer >= self.expires_at
    }
}

/// Non-blocking snapshot of the token manager's current state.
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub needs_refresh: bool,
    pub is_refreshing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn token(access: &str, refresh: &str, expires_in_secs: i64) -> OAuth2Token {
        let now = Utc::now();
        OAuth2Token {
            access_token: access.into(),
            refresh_token: refresh.into(),
            token_type: "Bearer".into(),
            expires_at: now + ChronoDuration::seconds(expires_in_secs),
            issued_at: now,
            scope: "read".into(),
        }
    }

    #[test]
    fn well_formed_requires_both_tokens_nonempty() {
        assert!(token("at", "rt", 3600).is_well_formed());
        assert!(!token("", "rt", 3600).is_well_formed());
        assert!(!token("at", "", 3600).is_well_formed());
    }

    #[test]
    fn well_formed_requires_expiry_after_issued() {
        let mut t = token("at", "rt", 3600);
        t.expires_at = t.issued_at - ChronoDuration::seconds(1);
        assert!(!t.is_well_formed());
    }

    #[test]
    fn expired_uses_clock_skew() {
        let t = token("at", "rt", 5);
        assert!(!t.is_expired(Utc::now(), ChronoDuration::seconds(0)));
        assert!(t.is_expired(Utc::now(), ChronoDuration::seconds(10)));
    }

    #[test]
    fn needs_refresh_uses_refresh_buffer() {
        let t = token("at", "rt", 100);
        assert!(!t.needs_refresh(Utc::now(), ChronoDuration::seconds(10)));
        assert!(t.needs_refresh(Utc::now(), ChronoDuration::seconds(200)));
    }

    #[test]
    fn debug_redacts_tokens() {
        let t = token("super-secret-access", "super-secret-refresh", 3600);
        let debug = format!("{t:?}");
        assert!(!debug.contains("super-secret-access"));
        assert!(!debug.contains("super-secret-refresh"));
        assert!(debug.contains("[REDACTED]"));
    }
}
