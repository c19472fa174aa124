//! Pending digest challenges keyed by Call-ID

use super::auth::{generate_nonce, DigestCredentials, DigestPolicy};
use super::identity::SipIdentity;
use crate::domain::shared::Result;
use crate::domain::user::AccountRepository;
use crate::infrastructure::metrics;
use crate::infrastructure::task::Sweep;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// An outstanding challenge waiting for the client's credentials
#[derive(Debug, Clone)]
pub struct ChallengeSession {
    pub nonce: String,
    pub identity: SipIdentity,
    pub peer: SocketAddr,
    pub created_at: Instant,
}

/// Why a set of credentials was turned down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoSession,
    UsernameMismatch,
    NonceMismatch,
    UnknownAccount,
    ResponseMismatch,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RejectReason::NoSession => "no pending challenge for Call-ID",
            RejectReason::UsernameMismatch => "username does not match From header",
            RejectReason::NonceMismatch => "nonce does not match challenge",
            RejectReason::UnknownAccount => "unknown account",
            RejectReason::ResponseMismatch => "digest response mismatch",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(RejectReason),
}

/// Challenge sessions, one per Call-ID.
///
/// A session is unusable once older than the TTL even before the janitor
/// removes it. Verification does not consume the session, so the same
/// nonce may be answered again until it expires.
pub struct ChallengeStore {
    sessions: RwLock<HashMap<String, ChallengeSession>>,
    ttl: Duration,
}

impl ChallengeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create or replace the session for `call_id` and return its fresh nonce
    pub async fn issue_challenge(
        &self,
        call_id: &str,
        identity: SipIdentity,
        peer: SocketAddr,
    ) -> String {
        let nonce = generate_nonce();
        let session = ChallengeSession {
            nonce: nonce.clone(),
            identity,
            peer,
            created_at: Instant::now(),
        };

        let mut sessions = self.sessions.write().await;
        if sessions.insert(call_id.to_string(), session).is_some() {
            debug!("Replaced challenge for Call-ID {}", call_id);
        }
        metrics::record_challenge_issued();
        metrics::update_pending_challenges(sessions.len());

        nonce
    }

    /// Live session for `call_id`; expired sessions read as absent
    pub async fn get(&self, call_id: &str) -> Option<ChallengeSession> {
        let sessions = self.sessions.read().await;
        sessions
            .get(call_id)
            .filter(|session| session.created_at.elapsed() <= self.ttl)
            .cloned()
    }

    /// Check `credentials` against the session for `call_id`.
    ///
    /// Only a repository failure is an error; every other failure is a
    /// [`Verdict::Rejected`].
    pub async fn verify(
        &self,
        call_id: &str,
        credentials: &DigestCredentials,
        identity: &SipIdentity,
        peer: SocketAddr,
        accounts: &dyn AccountRepository,
        policy: &DigestPolicy,
    ) -> Result<Verdict> {
        let Some(session) = self.get(call_id).await else {
            return Ok(Verdict::Rejected(RejectReason::NoSession));
        };

        if session.peer != peer {
            warn!(
                "Call-ID {} challenged for {} but answered from {}",
                call_id, session.peer, peer
            );
        }

        if credentials.username() != identity.username {
            return Ok(Verdict::Rejected(RejectReason::UsernameMismatch));
        }

        if credentials.nonce() != session.nonce {
            return Ok(Verdict::Rejected(RejectReason::NonceMismatch));
        }

        let Some(account) = accounts.find_by_username(credentials.username()).await? else {
            return Ok(Verdict::Rejected(RejectReason::UnknownAccount));
        };

        if !policy.verify(&session.nonce, credentials, &account.password) {
            return Ok(Verdict::Rejected(RejectReason::ResponseMismatch));
        }

        Ok(Verdict::Accepted)
    }

    /// Drop sessions older than `window`, returning how many were removed
    pub async fn evict_older_than(&self, window: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.created_at.elapsed() <= window);
        let removed = before - sessions.len();
        metrics::update_pending_challenges(sessions.len());
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl Sweep for ChallengeStore {
    async fn sweep(&self) -> usize {
        let removed = self.evict_older_than(self.ttl).await;
        if removed > 0 {
            info!("Expired {} challenge sessions", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::DomainError;
    use crate::domain::user::{Account, InMemoryAccountRepository, MockAccountRepository};
    use crate::infrastructure::protocols::sip::auth::DigestAlgorithm;
    use crate::infrastructure::protocols::sip::message::SipRequest;

    fn alice() -> SipIdentity {
        let req = SipRequest::parse(
            b"REGISTER sip:localhost SIP/2.0\r\n\
              Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK1\r\n\
              From: <sip:alice@localhost>;tag=abc\r\n\
              To: <sip:alice@localhost>\r\n\
              Call-ID: c1\r\n\
              CSeq: 1 REGISTER\r\n\
              Content-Length: 0\r\n\r\n",
        )
        .unwrap();
        SipIdentity::from_from_header(req.from_header().unwrap()).unwrap()
    }

    fn peer() -> SocketAddr {
        "10.0.0.1:5060".parse().unwrap()
    }

    fn policy() -> DigestPolicy {
        DigestPolicy::new("localhost", DigestAlgorithm::Md5)
    }

    fn accounts() -> InMemoryAccountRepository {
        InMemoryAccountRepository::with_accounts([Account::new("alice", "secret")])
    }

    fn credentials(username: &str, nonce: &str, password: &str) -> DigestCredentials {
        let response = policy().expected_response(
            username,
            password,
            nonce,
            "sip:localhost",
            "00000001",
            "cn",
        );
        DigestCredentials::parse(&format!(
            r#"Digest username="{}", realm="localhost", nonce="{}", uri="sip:localhost", qop=auth, nc=00000001, cnonce="cn", response="{}""#,
            username, nonce, response
        ))
        .unwrap()
    }

    async fn verify_as_alice(
        store: &ChallengeStore,
        call_id: &str,
        credentials: &DigestCredentials,
        accounts: &dyn AccountRepository,
    ) -> Result<Verdict> {
        store
            .verify(call_id, credentials, &alice(), peer(), accounts, &policy())
            .await
    }

    #[tokio::test]
    async fn test_issue_and_verify() {
        let store = ChallengeStore::new(Duration::from_secs(30));
        let nonce = store.issue_challenge("c1", alice(), peer()).await;
        assert_eq!(nonce.len(), 64);
        assert_eq!(store.get("c1").await.unwrap().nonce, nonce);

        let creds = credentials("alice", &nonce, "secret");
        let verdict = verify_as_alice(&store, "c1", &creds, &accounts()).await.unwrap();
        assert_eq!(verdict, Verdict::Accepted);

        // The session survives verification until it expires
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_reissue_replaces_nonce() {
        let store = ChallengeStore::new(Duration::from_secs(30));
        let first = store.issue_challenge("c1", alice(), peer()).await;
        let second = store.issue_challenge("c1", alice(), peer()).await;
        assert_ne!(first, second);
        assert_eq!(store.len().await, 1);

        let creds = credentials("alice", &first, "secret");
        let verdict = verify_as_alice(&store, "c1", &creds, &accounts()).await.unwrap();
        assert_eq!(verdict, Verdict::Rejected(RejectReason::NonceMismatch));
    }

    #[tokio::test]
    async fn test_rejections() {
        let store = ChallengeStore::new(Duration::from_secs(30));
        let repo = accounts();

        let creds = credentials("alice", "n", "secret");
        let verdict = verify_as_alice(&store, "missing", &creds, &repo).await.unwrap();
        assert_eq!(verdict, Verdict::Rejected(RejectReason::NoSession));

        let nonce = store.issue_challenge("c1", alice(), peer()).await;

        let creds = credentials("mallory", &nonce, "secret");
        let verdict = verify_as_alice(&store, "c1", &creds, &repo).await.unwrap();
        assert_eq!(verdict, Verdict::Rejected(RejectReason::UsernameMismatch));

        let creds = credentials("alice", &nonce, "wrong");
        let verdict = verify_as_alice(&store, "c1", &creds, &repo).await.unwrap();
        assert_eq!(verdict, Verdict::Rejected(RejectReason::ResponseMismatch));

        let empty = InMemoryAccountRepository::new();
        let creds = credentials("alice", &nonce, "secret");
        let verdict = verify_as_alice(&store, "c1", &creds, &empty).await.unwrap();
        assert_eq!(verdict, Verdict::Rejected(RejectReason::UnknownAccount));
    }

    #[tokio::test]
    async fn test_repository_failure_propagates() {
        let store = ChallengeStore::new(Duration::from_secs(30));
        let nonce = store.issue_challenge("c1", alice(), peer()).await;

        let mut repo = MockAccountRepository::new();
        repo.expect_find_by_username()
            .returning(|_| Err(DomainError::Unavailable("down".to_string())));

        let creds = credentials("alice", &nonce, "secret");
        let result = verify_as_alice(&store, "c1", &creds, &repo).await;
        assert!(matches!(result, Err(DomainError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_expired_session_is_unusable_and_swept() {
        let store = ChallengeStore::new(Duration::from_millis(20));
        let nonce = store.issue_challenge("c1", alice(), peer()).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.get("c1").await.is_none());

        let creds = credentials("alice", &nonce, "secret");
        let verdict = verify_as_alice(&store, "c1", &creds, &accounts()).await.unwrap();
        assert_eq!(verdict, Verdict::Rejected(RejectReason::NoSession));

        assert_eq!(store.sweep().await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_sessions() {
        let store = ChallengeStore::new(Duration::from_secs(30));
        store.issue_challenge("c1", alice(), peer()).await;
        store.issue_challenge("c2", alice(), peer()).await;

        assert_eq!(store.sweep().await, 0);
        assert_eq!(store.len().await, 2);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.evict_older_than(Duration::from_millis(1)).await, 2);
    }
}
