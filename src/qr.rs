use std::collections::HashSet;

use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::QrSession;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq)]
pub enum QrError {
    #[error("a session is already {0}")]
    InvalidTransition(&'static str),
    #[error("no active session")]
    NotActive,
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token belongs to another session")]
    WrongSession,
    #[error("token expired at {0}")]
    Expired(DateTime<Utc>),
    #[error("student {0} is not enrolled in this unit")]
    NotEnrolled(String),
    #[error("student {0} already scanned this code")]
    AlreadyScanned(String),
    #[error("signing secret is empty")]
    EmptySecret,
    #[error("session length is out of range")]
    TtlOutOfRange,
}

/// Signed payload carried inside the QR code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sid: String,
    pub unit: String,
    pub nonce: String,
    pub exp: i64,
}

fn mac(secret: &[u8], payload: &[u8]) -> Result<HmacSha256, QrError> {
    if secret.is_empty() {
        return Err(QrError::EmptySecret);
    }
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| QrError::EmptySecret)?;
    mac.update(payload);
    Ok(mac)
}

/// `base64url(claims json) "." base64url(hmac-sha256)`.
pub fn mint_token(secret: &[u8], claims: &TokenClaims) -> Result<String, QrError> {
    let payload = serde_json::to_vec(claims).map_err(|_| QrError::Malformed)?;
    let tag = mac(secret, &payload)?.finalize().into_bytes();
    Ok(format!("{}.{}", B64.encode(&payload), B64.encode(tag)))
}

/// Checks the signature and expiry; enrollment and replay are the console's job.
pub fn verify_token(
    secret: &[u8],
    token: &str,
    now: DateTime<Utc>,
) -> Result<TokenClaims, QrError> {
    let (payload, tag) = token.trim().split_once('.').ok_or(QrError::Malformed)?;
    let payload = B64.decode(payload).map_err(|_| QrError::Malformed)?;
    let tag = B64.decode(tag).map_err(|_| QrError::Malformed)?;

    mac(secret, &payload)?
        .verify_slice(&tag)
        .map_err(|_| QrError::BadSignature)?;

    let claims: TokenClaims = serde_json::from_slice(&payload).map_err(|_| QrError::Malformed)?;
    let expires_at = DateTime::from_timestamp(claims.exp, 0).ok_or(QrError::Malformed)?;
    if now >= expires_at {
        return Err(QrError::Expired(expires_at));
    }
    Ok(claims)
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub unit_id: String,
    pub class_id: String,
    pub teacher_id: String,
    pub enrolled: Vec<String>,
}

#[derive(Debug)]
pub struct ActiveSession {
    pub session: QrSession,
    pub expires_at: DateTime<Utc>,
    enrolled: HashSet<String>,
    scanned: HashSet<String>,
}

#[derive(Debug)]
pub enum QrState {
    Inactive,
    Active(ActiveSession),
    Closed(QrSession),
}

/// Lecturer-side attendance console: `Inactive -> Active -> Closed`.
#[derive(Debug)]
pub struct QrConsole {
    secret: Vec<u8>,
    state: QrState,
}

impl QrConsole {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, QrError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(QrError::EmptySecret);
        }
        Ok(Self {
            secret,
            state: QrState::Inactive,
        })
    }

    pub fn active(&self) -> Option<&ActiveSession> {
        match &self.state {
            QrState::Active(active) => Some(active),
            _ => None,
        }
    }

    pub fn start(
        &mut self,
        request: StartRequest,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<&QrSession, QrError> {
        match self.state {
            QrState::Inactive => {}
            QrState::Active(_) => return Err(QrError::InvalidTransition("active")),
            QrState::Closed(_) => return Err(QrError::InvalidTransition("closed")),
        }

        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let expires_at = now.checked_add_signed(ttl).ok_or(QrError::TtlOutOfRange)?;
        let claims = TokenClaims {
            sid: Uuid::new_v4().to_string(),
            unit: request.unit_id.clone(),
            nonce: B64.encode(nonce),
            exp: expires_at.timestamp(),
        };
        let token = mint_token(&self.secret, &claims)?;

        let session = QrSession {
            id: claims.sid,
            qr_code: token,
            class_id: request.class_id,
            unit_id: request.unit_id,
            teacher_id: request.teacher_id,
            date: now.date_naive(),
            time: now.format("%H:%M").to_string(),
            end_time: expires_at.format("%H:%M").to_string(),
            active: true,
            scan_count: 0,
        };
        info!(
            session = %session.id,
            unit = %session.unit_id,
            until = %expires_at,
            "attendance session started"
        );

        self.state = QrState::Active(ActiveSession {
            session,
            expires_at,
            enrolled: request.enrolled.into_iter().collect(),
            scanned: HashSet::new(),
        });
        match &self.state {
            QrState::Active(active) => Ok(&active.session),
            _ => Err(QrError::NotActive),
        }
    }

    /// Accepts one scan per enrolled student while the session is live.
    /// Returns the updated scan count.
    pub fn verify(
        &mut self,
        token: &str,
        student_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, QrError> {
        let active = match &mut self.state {
            QrState::Active(active) => active,
            _ => return Err(QrError::NotActive),
        };

        let claims = verify_token(&self.secret, token, now)?;
        if claims.sid != active.session.id {
            return Err(QrError::WrongSession);
        }
        if !active.enrolled.contains(student_id) {
            warn!(
                student = student_id,
                session = %active.session.id,
                "scan from non-enrolled student"
            );
            return Err(QrError::NotEnrolled(student_id.to_string()));
        }
        if !active.scanned.insert(student_id.to_string()) {
            return Err(QrError::AlreadyScanned(student_id.to_string()));
        }

        active.session.scan_count += 1;
        Ok(active.session.scan_count)
    }

    pub fn close(&mut self) -> Result<&QrSession, QrError> {
        let previous = std::mem::replace(&mut self.state, QrState::Inactive);
        match previous {
            QrState::Active(active) => {
                let mut session = active.session;
                session.active = false;
                info!(
                    session = %session.id,
                    scans = session.scan_count,
                    "attendance session closed"
                );
                self.state = QrState::Closed(session);
            }
            other => {
                self.state = other;
                return Err(QrError::NotActive);
            }
        }
        match &self.state {
            QrState::Closed(session) => Ok(session),
            _ => Err(QrError::NotActive),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &[u8] = b"lecturer-console-secret";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
    }

    fn request() -> StartRequest {
        StartRequest {
            unit_id: "u1".into(),
            class_id: "c1".into(),
            teacher_id: "t1".into(),
            enrolled: vec!["s1".into(), "s2".into()],
        }
    }

    fn started() -> (QrConsole, String) {
        let mut console = QrConsole::new(SECRET).unwrap();
        let token = console
            .start(request(), now(), Duration::minutes(10))
            .unwrap()
            .qr_code
            .clone();
        (console, token)
    }

    #[test]
    fn start_builds_an_active_session() {
        let (console, token) = started();
        let active = console.active().unwrap();
        assert!(active.session.active);
        assert_eq!(active.session.time, "08:00");
        assert_eq!(active.session.end_time, "08:10");
        assert_eq!(active.session.qr_code, token);
        assert_eq!(active.expires_at, now() + Duration::minutes(10));
        assert_eq!(token.matches('.').count(), 1);
    }

    #[test]
    fn enrolled_students_scan_once() {
        let (mut console, token) = started();
        let later = now() + Duration::minutes(2);

        assert_eq!(console.verify(&token, "s1", later), Ok(1));
        assert_eq!(console.verify(&token, "s2", later), Ok(2));
        assert_eq!(
            console.verify(&token, "s1", later),
            Err(QrError::AlreadyScanned("s1".into()))
        );
        assert_eq!(
            console.verify(&token, "s9", later),
            Err(QrError::NotEnrolled("s9".into()))
        );
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let (mut console, token) = started();
        let result = console.verify(&token, "s1", now() + Duration::minutes(10));
        assert!(matches!(result, Err(QrError::Expired(_))));
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let (mut console, token) = started();
        let (payload, _) = token.split_once('.').unwrap();
        let forged = format!("{payload}.{}", B64.encode([0u8; 32]));
        assert_eq!(console.verify(&forged, "s1", now()), Err(QrError::BadSignature));
        assert_eq!(console.verify("garbage", "s1", now()), Err(QrError::Malformed));
    }

    #[test]
    fn tokens_from_another_session_are_rejected() {
        let (mut console, _) = started();
        let other = mint_token(
            SECRET,
            &TokenClaims {
                sid: "other".into(),
                unit: "u1".into(),
                nonce: "n".into(),
                exp: (now() + Duration::hours(1)).timestamp(),
            },
        )
        .unwrap();
        assert_eq!(console.verify(&other, "s1", now()), Err(QrError::WrongSession));
    }

    #[test]
    fn lifecycle_transitions() {
        let (mut console, token) = started();
        assert_eq!(
            console.start(request(), now(), Duration::minutes(10)).unwrap_err(),
            QrError::InvalidTransition("active")
        );

        let closed = console.close().unwrap();
        assert!(!closed.active);
        assert!(matches!(console.state, QrState::Closed(_)));
        assert_eq!(console.verify(&token, "s1", now()), Err(QrError::NotActive));
        assert_eq!(console.close().unwrap_err(), QrError::NotActive);
        assert!(console.start(request(), now(), Duration::minutes(5)).is_err());
    }

    #[test]
    fn unrepresentable_expiry_is_refused() {
        let mut console = QrConsole::new(SECRET).unwrap();
        let forever = Duration::try_days(100_000_000).unwrap();
        assert_eq!(
            console.start(request(), now(), forever).unwrap_err(),
            QrError::TtlOutOfRange
        );
        assert!(console.active().is_none());
    }

    #[test]
    fn empty_secret_is_refused() {
        assert_eq!(QrConsole::new(Vec::new()).unwrap_err(), QrError::EmptySecret);
    }
}
