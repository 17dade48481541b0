//! Challenge sessions and one-shot bearer tokens.
//!
//! A session is keyed by `(serial_number, challenge)` and can be verified at
//! most once; verification is the only producer of bearer tokens, and a
//! token is removed from the live set the moment it is consumed. All
//! transitions are single compare-and-swap style operations under one lock,
//! so no partial state is ever observable.

use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use parking_lot::Mutex;
use snafu::Snafu;
use tracing::debug;

use crate::crypto;

/// Authorization scheme prefix, including the trailing space.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Serial numbers are 10 decimal digits.
pub const SERIAL_LEN: usize = 10;

/// Random bytes behind the token suffix (20 base64url chars).
const TOKEN_SUFFIX_BYTES: usize = 15;

/// Shortest well-formed auth header the server will look at.
const MIN_TOKEN_LEN: usize = 32;

/// Default challenge lifetime.
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(5 * 60);

/// Errors from token consumption.
#[derive(Debug, Snafu)]
pub enum SessionError {
    /// The auth header is malformed, unknown, or already consumed.
    ///
    /// One variant covers every failure mode; callers must not be able to
    /// tell "never minted" apart from "already spent".
    #[snafu(display("missing or invalid authorization header"))]
    InvalidAuthHeader,
}

/// Capability trait for the challenge/verify/token lifecycle.
///
/// Handlers depend on this rather than on [`SessionManager`] so tests can
/// inject mocks.
pub trait SessionGate: Send + Sync {
    /// Issue a fresh challenge for `serial_number`, returning it together
    /// with its absolute expiry instant.
    fn issue(&self, serial_number: &str) -> (String, DateTime<Utc>);

    /// Whether `(serial_number, challenge)` names a live, unexpired session.
    fn is_valid(&self, serial_number: &str, challenge: &str) -> bool;

    /// Atomically flip the session to verified.
    ///
    /// Returns `true` exactly once per session; re-attempts, unknown keys
    /// and expired sessions all return `false`.
    fn mark_verified(&self, serial_number: &str, challenge: &str) -> bool;

    /// Mint a one-shot bearer token bound to `serial_number`.
    fn mint_token(&self, serial_number: &str) -> String;

    /// Consume a bearer token, returning its embedded serial number.
    ///
    /// The token is removed from the live set; a second call with the same
    /// header fails.
    fn consume_token(&self, auth_header: &str) -> Result<String, SessionError>;
}

#[derive(Debug, Clone)]
struct Session {
    expires_at: DateTime<Utc>,
    is_verified: bool,
}

#[derive(Debug, Default)]
struct SessionState {
    sessions: HashMap<(String, String), Session>,
    tokens: HashSet<String>,
}

/// In-memory session store.
///
/// Contention is bounded by request arrival rate, so a single mutex over
/// both maps is enough; expired sessions are garbage-collected lazily on
/// lookup.
#[derive(Debug)]
pub struct SessionManager {
    ttl: Duration,
    state: Mutex<SessionState>,
}

impl SessionManager {
    /// Create a manager whose challenges live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(SessionState::default()),
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_CHALLENGE_TTL)
    }
}

impl SessionGate for SessionManager {
    fn issue(&self, serial_number: &str) -> (String, DateTime<Utc>) {
        let challenge = crypto::generate_challenge();
        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::zero());

        let mut state = self.state.lock();
        // Insert-if-absent: on the astronomically unlikely key collision the
        // existing session wins.
        state
            .sessions
            .entry((serial_number.to_string(), challenge.clone()))
            .or_insert(Session {
                expires_at,
                is_verified: false,
            });
        (challenge, expires_at)
    }

    fn is_valid(&self, serial_number: &str, challenge: &str) -> bool {
        let key = (serial_number.to_string(), challenge.to_string());
        let mut state = self.state.lock();
        match state.sessions.get(&key) {
            Some(session) if Utc::now() > session.expires_at => {
                state.sessions.remove(&key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn mark_verified(&self, serial_number: &str, challenge: &str) -> bool {
        let key = (serial_number.to_string(), challenge.to_string());
        let mut state = self.state.lock();
        match state.sessions.get_mut(&key) {
            Some(session) if Utc::now() > session.expires_at => {
                state.sessions.remove(&key);
                false
            }
            Some(session) if session.is_verified => false,
            Some(session) => {
                session.is_verified = true;
                true
            }
            None => false,
        }
    }

    fn mint_token(&self, serial_number: &str) -> String {
        let token = format!(
            "{BEARER_PREFIX}{serial_number}{}",
            crypto::random_base64url(TOKEN_SUFFIX_BYTES)
        );
        self.state.lock().tokens.insert(token.clone());
        token
    }

    fn consume_token(&self, auth_header: &str) -> Result<String, SessionError> {
        if !auth_header.starts_with(BEARER_PREFIX) || auth_header.len() < MIN_TOKEN_LEN {
            return Err(SessionError::InvalidAuthHeader);
        }
        // Byte-wise slice: a crafted multi-byte header must not panic.
        let suffix = &auth_header.as_bytes()[BEARER_PREFIX.len()..BEARER_PREFIX.len() + SERIAL_LEN];
        let serial_number =
            std::str::from_utf8(suffix).map_err(|_| SessionError::InvalidAuthHeader)?;

        let mut state = self.state.lock();
        if !state.tokens.remove(auth_header) {
            debug!(serial_number, "rejected unknown or already-consumed token");
            return Err(SessionError::InvalidAuthHeader);
        }
        Ok(serial_number.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(Duration::from_secs(300))
    }

    #[test]
    fn test_issue_then_valid() {
        let mgr = manager();
        let (challenge, expires_at) = mgr.issue("0000000001");
        assert_eq!(challenge.len(), 64);
        assert!(expires_at > Utc::now());
        assert!(mgr.is_valid("0000000001", &challenge));
    }

    #[test]
    fn test_unknown_session_is_invalid() {
        let mgr = manager();
        assert!(!mgr.is_valid("0000000001", "no-such-challenge"));
    }

    #[test]
    fn test_mark_verified_is_one_shot() {
        let mgr = manager();
        let (challenge, _) = mgr.issue("0000000001");
        assert!(mgr.mark_verified("0000000001", &challenge));
        assert!(!mgr.mark_verified("0000000001", &challenge));
    }

    #[test]
    fn test_mark_verified_unknown_fails() {
        let mgr = manager();
        assert!(!mgr.mark_verified("0000000001", "bogus"));
    }

    #[test]
    fn test_expired_session_is_collected() {
        let mgr = SessionManager::new(Duration::from_secs(0));
        let (challenge, _) = mgr.issue("0000000001");
        std::thread::sleep(Duration::from_millis(5));
        assert!(!mgr.is_valid("0000000001", &challenge));
        assert!(!mgr.mark_verified("0000000001", &challenge));
    }

    #[test]
    fn test_token_shape() {
        let mgr = manager();
        let token = mgr.mint_token("0000000001");
        // "Bearer " + 10-digit serial + 20-char base64url suffix
        assert_eq!(token.len(), 7 + 10 + 20);
        assert!(token.starts_with("Bearer 0000000001"));
    }

    #[test]
    fn test_token_is_one_shot() {
        let mgr = manager();
        let token = mgr.mint_token("0000000001");
        assert_eq!(mgr.consume_token(&token).unwrap(), "0000000001");
        assert!(mgr.consume_token(&token).is_err());
    }

    #[test]
    fn test_consume_rejects_malformed_headers() {
        let mgr = manager();
        assert!(mgr.consume_token("").is_err());
        assert!(mgr.consume_token("Bearer short").is_err());
        assert!(mgr.consume_token("Basic 0000000001aaaaaaaaaaaaaaaaaaaa").is_err());
    }

    #[test]
    fn test_consume_rejects_multibyte_header() {
        let mgr = manager();
        // Long enough and correctly prefixed, but not ASCII where the
        // serial number should be.
        assert!(mgr.consume_token("Bearer ααααααααααααααααααααααααα").is_err());
    }

    #[test]
    fn test_consume_rejects_never_minted() {
        let mgr = manager();
        assert!(mgr.consume_token("Bearer 0000000001aaaaaaaaaaaaaaaaaaaa").is_err());
    }
}
