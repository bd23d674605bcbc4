//! Signed, time-limited download tokens.
//!
//! A token is `"{job_id}.{expiry}.{signature}"` where the signature is an
//! HMAC-SHA256 over `"{job_id}.{expiry}"` with the service's shared
//! secret. Tokens are never stored; redemption recomputes the signature.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::job::JobId;

type HmacSha256 = Hmac<Sha256>;

/// Reasons a presented token is rejected.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Not exactly three dot-separated parts, or unparseable fields.
    #[error("malformed download token")]
    Malformed,

    /// The embedded expiry is in the past.
    #[error("download token expired")]
    Expired,

    /// The token was issued for a different job.
    #[error("download token does not match this job")]
    JobMismatch,

    /// Recomputed signature differs from the presented one.
    #[error("download token signature mismatch")]
    BadSignature,
}

/// Issue a token for `job_id` valid for `ttl_secs` from `now`.
pub fn issue(secret: &str, job_id: JobId, ttl_secs: i64, now: DateTime<Utc>) -> String {
    let expiry = now.timestamp() + ttl_secs;
    let payload = format!("{job_id}.{expiry}");
    format!("{payload}.{}", sign(secret, &payload))
}

/// Verify `token` against `expected_job_id` at time `now`.
///
/// The signature check is constant-time ([`Mac::verify_slice`]), so
/// forged tokens cannot be distinguished by timing.
pub fn verify(
    secret: &str,
    token: &str,
    expected_job_id: JobId,
    now: DateTime<Utc>,
) -> Result<(), TokenError> {
    let mut parts = token.split('.');
    let (job_part, expiry_part, sig_part) = match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), Some(c)) if parts.next().is_none() => (a, b, c),
        _ => return Err(TokenError::Malformed),
    };

    let job_id: JobId = job_part.parse().map_err(|_| TokenError::Malformed)?;
    let expiry: i64 = expiry_part.parse().map_err(|_| TokenError::Malformed)?;
    let sig = hex::decode(sig_part).map_err(|_| TokenError::Malformed)?;

    if expiry < now.timestamp() {
        return Err(TokenError::Expired);
    }
    if job_id != expected_job_id {
        return Err(TokenError::JobMismatch);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("{job_part}.{expiry_part}").as_bytes());
    mac.verify_slice(&sig).map_err(|_| TokenError::BadSignature)
}

fn sign(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use uuid::Uuid;

    const SECRET: &str = "test-secret";

    #[test]
    fn issued_token_verifies_immediately() {
        let job = Uuid::new_v4();
        let now = Utc::now();
        let token = issue(SECRET, job, 60, now);
        assert_eq!(verify(SECRET, &token, job, now), Ok(()));
    }

    #[test]
    fn token_rejected_after_ttl() {
        let job = Uuid::new_v4();
        let now = Utc::now();
        let token = issue(SECRET, job, 60, now);
        let later = now + chrono::Duration::seconds(61);
        assert_matches!(verify(SECRET, &token, job, later), Err(TokenError::Expired));
    }

    #[test]
    fn token_for_other_job_is_rejected() {
        let now = Utc::now();
        let token = issue(SECRET, Uuid::new_v4(), 60, now);
        assert_matches!(
            verify(SECRET, &token, Uuid::new_v4(), now),
            Err(TokenError::JobMismatch)
        );
    }

    #[test]
    fn tampered_expiry_breaks_the_signature() {
        let job = Uuid::new_v4();
        let now = Utc::now();
        let token = issue(SECRET, job, 60, now);
        let (payload, sig) = token.rsplit_once('.').unwrap();
        let (job_part, expiry) = payload.rsplit_once('.').unwrap();
        let expiry: i64 = expiry.parse().unwrap();
        let forged = format!("{job_part}.{}.{sig}", expiry + 3600);
        assert_matches!(
            verify(SECRET, &forged, job, now),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let job = Uuid::new_v4();
        let now = Utc::now();
        let token = issue(SECRET, job, 60, now);
        assert_matches!(
            verify("other-secret", &token, job, now),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let job = Uuid::new_v4();
        let now = Utc::now();
        for bad in ["", "a.b", "a.b.c.d", "not-a-uuid.123.ff", "x", ".."] {
            assert_matches!(verify(SECRET, bad, job, now), Err(TokenError::Malformed));
        }
    }
}
