//! SIP Registrar - authenticates REGISTER requests and records registered users

use super::auth::{DigestCredentials, DigestPolicy};
use super::builder::ResponseBuilder;
use super::challenge::{ChallengeStore, Verdict};
use super::handler::SipHandler;
use super::identity::SipIdentity;
use super::message::{SipError, SipRequest, SipResponse};
use crate::config::RegistrarConfig;
use crate::domain::registration::{RegisteredUser, RegisteredUserStore};
use crate::domain::user::AccountRepository;
use crate::infrastructure::metrics;
use async_trait::async_trait;
use rand::Rng;
use rsip::Header;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const MISSING_CALL_ID: &str = "Missing required Call-ID header.";
pub const BAD_FROM_TO: &str = "Failed to parse From or To header.";
pub const FROM_TO_MISMATCH: &str = "User in To and From fields do not match.";
pub const BAD_AUTHORIZATION: &str = "Failed to parse Authorization header.";

/// REGISTER handler driving the digest challenge/response exchange
pub struct RegistrationHandler {
    policy: DigestPolicy,
    challenges: Arc<ChallengeStore>,
    accounts: Arc<dyn AccountRepository>,
    users: Arc<dyn RegisteredUserStore>,
    default_expires: u32,
    min_expires: u32,
    max_expires: u32,
}

impl RegistrationHandler {
    pub fn new(
        policy: DigestPolicy,
        challenges: Arc<ChallengeStore>,
        accounts: Arc<dyn AccountRepository>,
        users: Arc<dyn RegisteredUserStore>,
        config: &RegistrarConfig,
    ) -> Self {
        Self {
            policy,
            challenges,
            accounts,
            users,
            default_expires: config.default_expires,
            min_expires: config.min_expires,
            max_expires: config.max_expires,
        }
    }

    /// Effective registration lifetime for a non-zero Expires value
    fn get_expires(&self, requested: Option<&str>) -> u32 {
        match requested.and_then(|value| value.parse::<u32>().ok()) {
            Some(expires) if expires < self.min_expires => self.min_expires,
            Some(expires) if expires > self.max_expires => self.max_expires,
            Some(expires) => expires,
            None => self.default_expires,
        }
    }

    /// Caller identity from From and To, which must name the same user@domain
    fn identify(request: &SipRequest) -> Result<SipIdentity, &'static str> {
        let from = request
            .from_header()
            .ok_or(BAD_FROM_TO)
            .and_then(|h| SipIdentity::from_from_header(h).map_err(|_| BAD_FROM_TO))?;
        let to = request
            .to_header()
            .ok_or(BAD_FROM_TO)
            .and_then(|h| SipIdentity::from_to_header(h).map_err(|_| BAD_FROM_TO))?;

        if from.user_domain() != to.user_domain() {
            return Err(FROM_TO_MISMATCH);
        }
        Ok(from)
    }

    /// Issue a new challenge and answer 401
    async fn challenge(
        &self,
        request: &SipRequest,
        identity: SipIdentity,
        peer: SocketAddr,
    ) -> SipResponse {
        let Some(call_id) = request.call_id() else {
            warn!("REGISTER from {} has no Call-ID", peer);
            metrics::record_registration("rejected");
            return ResponseBuilder::bad_request(MISSING_CALL_ID)
                .build_for_request(request);
        };

        let from = identity.as_from_header();
        let to = identity.as_to_header(None);
        let nonce = self.challenges.issue_challenge(&call_id, identity, peer).await;
        let challenge = self.policy.challenge(nonce);
        debug!("Challenging {} for Call-ID {}", peer, call_id);
        metrics::record_registration("challenged");

        ResponseBuilder::unauthorized()
            .with_from(from)
            .with_to(to)
            .header(Header::WwwAuthenticate(challenge.to_header_value().into()))
            .build_for_request(request)
    }

    /// Apply a verified REGISTER to the user store
    async fn register(
        &self,
        request: &SipRequest,
        identity: &SipIdentity,
        peer: SocketAddr,
    ) -> Result<SipResponse, SipError> {
        let requested = request.expires();
        let mut response = ResponseBuilder::ok();

        if requested.as_deref() == Some("0") {
            if self.users.remove(&identity.username).await?.is_some() {
                info!("Unregistered {}", identity.user_domain());
            } else {
                debug!(
                    "Unregister for {} with no registration",
                    identity.user_domain()
                );
            }
            metrics::record_registration("unregistered");
            response = response.header(Header::Expires("0".to_string().into()));
        } else {
            let expires = self.get_expires(requested.as_deref());
            let user = RegisteredUser::new(
                identity.username.clone(),
                identity.uri().to_string(),
                peer,
                expires,
            )
            .with_display_name(identity.display_name.clone())
            .with_contact(request.contact())
            .with_user_agent(request.user_agent());

            self.users.upsert(user).await?;
            info!(
                "Registered {} at {} (expires in {}s)",
                identity.user_domain(),
                peer,
                expires
            );
            metrics::record_registration("registered");
            if let Some(contact) = request.contact() {
                response = response.header(Header::Contact(contact.into()));
            }
            response = response.header(Header::Expires(expires.to_string().into()));
        }

        // The store change is already committed; the gauge is best-effort
        match self.users.count().await {
            Ok(count) => metrics::update_registered_users(count),
            Err(e) => warn!("Could not count registered users: {}", e),
        }

        let tag = hex::encode(rand::thread_rng().gen::<[u8; 5]>());
        Ok(response
            .with_from(identity.as_from_header())
            .with_to(identity.as_to_header(Some(&tag)))
            .build_for_request(request))
    }
}

#[async_trait]
impl SipHandler for RegistrationHandler {
    async fn handle_request(
        &self,
        request: SipRequest,
        source: SocketAddr,
    ) -> Result<SipResponse, SipError> {
        debug!("Handling REGISTER from {}", source);

        let identity = match Self::identify(&request) {
            Ok(identity) => identity,
            Err(reason) => {
                warn!("Rejecting REGISTER from {}: {}", source, reason);
                metrics::record_registration("rejected");
                return Ok(
                    ResponseBuilder::bad_request(reason).build_for_request(&request)
                );
            }
        };

        let Some(authorization) = request.authorization() else {
            return Ok(self.challenge(&request, identity, source).await);
        };

        let credentials = match DigestCredentials::parse(&authorization) {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!("Bad Authorization header from {}: {}", source, e);
                metrics::record_registration("rejected");
                return Ok(
                    ResponseBuilder::bad_request(BAD_AUTHORIZATION).build_for_request(&request)
                );
            }
        };

        let Some(call_id) = request.call_id() else {
            return Ok(self.challenge(&request, identity, source).await);
        };

        let verdict = self
            .challenges
            .verify(
                &call_id,
                &credentials,
                &identity,
                source,
                self.accounts.as_ref(),
                &self.policy,
            )
            .await;

        match verdict {
            Ok(Verdict::Accepted) => self.register(&request, &identity, source).await,
            Ok(Verdict::Rejected(reason)) => {
                warn!(
                    "Authentication failed for {} from {}: {}",
                    identity.user_domain(),
                    source,
                    reason
                );
                Ok(self.challenge(&request, identity, source).await)
            }
            Err(e) => {
                error!("Account lookup failed for {}: {}", identity.username, e);
                metrics::record_registration("rejected");
                Ok(ResponseBuilder::server_internal_error()
                    .reason("Failed to look up account.")
                    .build_for_request(&request))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::DomainError;
    use crate::domain::registration::{InMemoryRegisteredUserStore, MockRegisteredUserStore};
    use crate::domain::user::{Account, InMemoryAccountRepository, MockAccountRepository};
    use crate::infrastructure::protocols::sip::auth::DigestAlgorithm;
    use std::time::Duration;

    const CALL_ID: &str = "reg-call-1";

    struct Fixture {
        handler: RegistrationHandler,
        challenges: Arc<ChallengeStore>,
        users: Arc<InMemoryRegisteredUserStore>,
    }

    fn fixture_with(accounts: Arc<dyn AccountRepository>, ttl: Duration) -> Fixture {
        let challenges = Arc::new(ChallengeStore::new(ttl));
        let users = Arc::new(InMemoryRegisteredUserStore::new());
        let handler = RegistrationHandler::new(
            DigestPolicy::new("localhost", DigestAlgorithm::Md5),
            challenges.clone(),
            accounts,
            users.clone(),
            &RegistrarConfig::default(),
        );
        Fixture {
            handler,
            challenges,
            users,
        }
    }

    fn fixture() -> Fixture {
        let accounts = InMemoryAccountRepository::with_accounts([Account::new("alice", "secret")]);
        fixture_with(Arc::new(accounts), Duration::from_secs(30))
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:5070".parse().unwrap()
    }

    fn build_register(
        from: &str,
        to: &str,
        call_id: Option<&str>,
        authorization: Option<&str>,
        expires: Option<&str>,
    ) -> SipRequest {
        let mut raw = String::from(
            "REGISTER sip:localhost SIP/2.0\r\n\
             Via: SIP/2.0/UDP 127.0.0.1:5070;branch=z9hG4bKreg\r\n",
        );
        raw.push_str(&format!("From: {}\r\n", from));
        raw.push_str(&format!("To: {}\r\n", to));
        if let Some(call_id) = call_id {
            raw.push_str(&format!("Call-ID: {}\r\n", call_id));
        }
        raw.push_str("CSeq: 1 REGISTER\r\n");
        raw.push_str("Contact: <sip:alice@127.0.0.1:5070>\r\n");
        if let Some(expires) = expires {
            raw.push_str(&format!("Expires: {}\r\n", expires));
        }
        if let Some(authorization) = authorization {
            raw.push_str(&format!("Authorization: {}\r\n", authorization));
        }
        raw.push_str("Content-Length: 0\r\n\r\n");
        SipRequest::parse(raw.as_bytes()).unwrap()
    }

    fn alice_register(authorization: Option<&str>, expires: Option<&str>) -> SipRequest {
        build_register(
            "<sip:alice@localhost>;tag=a1",
            "<sip:alice@localhost>",
            Some(CALL_ID),
            authorization,
            expires,
        )
    }

    fn authorization_for(nonce: &str, password: &str) -> String {
        let policy = DigestPolicy::new("localhost", DigestAlgorithm::Md5);
        let response = policy.expected_response(
            "alice",
            password,
            nonce,
            "sip:localhost",
            "00000001",
            "deadbeef",
        );
        format!(
            r#"Digest username="alice", realm="localhost", nonce="{}", uri="sip:localhost", response="{}", qop=auth, nc=00000001, cnonce="deadbeef""#,
            nonce, response
        )
    }

    fn nonce_from(response: &SipResponse) -> String {
        let header = response.header("WWW-Authenticate").unwrap();
        let start = header.find("nonce=\"").unwrap() + "nonce=\"".len();
        header[start..start + 64].to_string()
    }

    #[tokio::test]
    async fn test_register_without_credentials_is_challenged() {
        let f = fixture();
        let response = f
            .handler
            .handle_request(alice_register(None, None), peer())
            .await
            .unwrap();

        assert_eq!(response.status_code(), 401);
        let header = response.header("WWW-Authenticate").unwrap();
        assert!(header.starts_with(r#"Digest realm="localhost", qop="auth", nonce=""#));
        assert!(header.ends_with(r#"opaque="", stale=FALSE, algorithm=MD5"#));
        assert!(response.header("From").unwrap().contains("tag=a1"));
        assert!(!response.header("To").unwrap().contains("tag="));

        let nonce = nonce_from(&response);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(f.challenges.get(CALL_ID).await.unwrap().nonce, nonce);
    }

    #[tokio::test]
    async fn test_full_registration_and_unregistration() {
        let f = fixture();
        let challenge = f
            .handler
            .handle_request(alice_register(None, None), peer())
            .await
            .unwrap();
        let nonce = nonce_from(&challenge);

        let auth = authorization_for(&nonce, "secret");
        let response = f
            .handler
            .handle_request(alice_register(Some(&auth), Some("120")), peer())
            .await
            .unwrap();
        assert_eq!(response.status_code(), 200);
        let to = response.header("To").unwrap();
        let tag = to.split("tag=").nth(1).unwrap();
        assert_eq!(tag.len(), 10);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));

        let user = f.users.get("alice").await.unwrap().unwrap();
        assert_eq!(user.peer, peer());
        assert_eq!(user.contact.as_deref(), Some("<sip:alice@127.0.0.1:5070>"));
        assert!(!user.is_expired());

        let response = f
            .handler
            .handle_request(alice_register(Some(&auth), Some("0")), peer())
            .await
            .unwrap();
        assert_eq!(response.status_code(), 200);
        assert!(f.users.get("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_password_is_rechallenged() {
        let f = fixture();
        let challenge = f
            .handler
            .handle_request(alice_register(None, None), peer())
            .await
            .unwrap();
        let nonce = nonce_from(&challenge);

        let response = f
            .handler
            .handle_request(
                alice_register(Some(&authorization_for(&nonce, "wrong")), None),
                peer(),
            )
            .await
            .unwrap();
        assert_eq!(response.status_code(), 401);
        assert_ne!(nonce_from(&response), nonce);
        assert_eq!(f.users.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_credentials_without_session_are_rechallenged() {
        let f = fixture();
        let response = f
            .handler
            .handle_request(
                alice_register(Some(&authorization_for(&"0".repeat(64), "secret")), None),
                peer(),
            )
            .await
            .unwrap();
        assert_eq!(response.status_code(), 401);
        assert!(f.challenges.get(CALL_ID).await.is_some());
    }

    #[tokio::test]
    async fn test_mismatched_from_and_to() {
        let f = fixture();
        let request = build_register(
            "<sip:alice@localhost>;tag=a1",
            "<sip:bob@localhost>",
            Some(CALL_ID),
            None,
            None,
        );
        let response = f.handler.handle_request(request, peer()).await.unwrap();

        assert_eq!(response.status_code(), 400);
        assert_eq!(
            response.header("Reason-Phrase").as_deref(),
            Some(FROM_TO_MISMATCH),
        );
        assert!(f.challenges.is_empty().await);
    }

    #[tokio::test]
    async fn test_from_without_user_part() {
        let f = fixture();
        let request = build_register(
            "<sip:localhost>;tag=a1",
            "<sip:alice@localhost>",
            Some(CALL_ID),
            None,
            None,
        );
        let response = f.handler.handle_request(request, peer()).await.unwrap();

        assert_eq!(response.status_code(), 400);
        assert_eq!(
            response.header("Reason-Phrase").as_deref(),
            Some(BAD_FROM_TO),
        );
    }

    #[tokio::test]
    async fn test_missing_call_id() {
        let f = fixture();
        let request = build_register(
            "<sip:alice@localhost>;tag=a1",
            "<sip:alice@localhost>",
            None,
            None,
            None,
        );
        let response = f.handler.handle_request(request, peer()).await.unwrap();

        assert_eq!(response.status_code(), 400);
        assert_eq!(
            response.header("Reason-Phrase").as_deref(),
            Some(MISSING_CALL_ID),
        );
        assert!(f.challenges.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_authorization() {
        let f = fixture();
        let response = f
            .handler
            .handle_request(alice_register(Some("Basic YWxpY2U6c2VjcmV0"), None), peer())
            .await
            .unwrap();

        assert_eq!(response.status_code(), 400);
        assert_eq!(
            response.header("Reason-Phrase").as_deref(),
            Some(BAD_AUTHORIZATION),
        );
    }

    #[tokio::test]
    async fn test_expired_challenge_is_rechallenged() {
        let accounts = InMemoryAccountRepository::with_accounts([Account::new("alice", "secret")]);
        let f = fixture_with(Arc::new(accounts), Duration::from_millis(20));
        let challenge = f
            .handler
            .handle_request(alice_register(None, None), peer())
            .await
            .unwrap();
        let nonce = nonce_from(&challenge);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let response = f
            .handler
            .handle_request(
                alice_register(Some(&authorization_for(&nonce, "secret")), None),
                peer(),
            )
            .await
            .unwrap();
        assert_eq!(response.status_code(), 401);
        assert_eq!(f.users.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_account_lookup_failure_is_server_error() {
        let mut accounts = MockAccountRepository::new();
        accounts
            .expect_find_by_username()
            .returning(|_| Err(DomainError::Unavailable("offline".to_string())));
        let f = fixture_with(Arc::new(accounts), Duration::from_secs(30));

        let challenge = f
            .handler
            .handle_request(alice_register(None, None), peer())
            .await
            .unwrap();
        let nonce = nonce_from(&challenge);

        let response = f
            .handler
            .handle_request(
                alice_register(Some(&authorization_for(&nonce, "secret")), None),
                peer(),
            )
            .await
            .unwrap();
        assert_eq!(response.status_code(), 500);
        assert_eq!(f.users.count().await.unwrap(), 0);
    }

    #[test]
    fn test_expires_clamping() {
        let f = fixture();
        assert_eq!(f.handler.get_expires(None), 3600);
        assert_eq!(f.handler.get_expires(Some("junk")), 3600);
        assert_eq!(f.handler.get_expires(Some("10")), 60);
        assert_eq!(f.handler.get_expires(Some("100000")), 7200);
        assert_eq!(f.handler.get_expires(Some("1800")), 1800);
    }

    #[tokio::test]
    async fn test_committed_registration_survives_count_failure() {
        let mut users = MockRegisteredUserStore::new();
        users.expect_upsert().times(1).returning(|_| Ok(()));
        users
            .expect_count()
            .returning(|| Err(DomainError::Unavailable("offline".to_string())));

        let challenges = Arc::new(ChallengeStore::new(Duration::from_secs(30)));
        let accounts = InMemoryAccountRepository::with_accounts([Account::new("alice", "secret")]);
        let handler = RegistrationHandler::new(
            DigestPolicy::new("localhost", DigestAlgorithm::Md5),
            challenges,
            Arc::new(accounts),
            Arc::new(users),
            &RegistrarConfig::default(),
        );

        let challenge = handler
            .handle_request(alice_register(None, None), peer())
            .await
            .unwrap();
        let nonce = nonce_from(&challenge);

        let response = handler
            .handle_request(
                alice_register(Some(&authorization_for(&nonce, "secret")), Some("300")),
                peer(),
            )
            .await
            .unwrap();
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.header("Expires").as_deref(), Some("300"));
    }
}
