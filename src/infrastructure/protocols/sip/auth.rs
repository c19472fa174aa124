//! SIP Digest Authentication (RFC 2617, RFC 3261)

use super::message::{SipError, SipMethod};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Random bytes per nonce; hex-encoded to twice this many characters
pub const NONCE_BYTES: usize = 32;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha256 => "SHA-256",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "MD5" => Some(DigestAlgorithm::Md5),
            "SHA-256" => Some(DigestAlgorithm::Sha256),
            _ => None,
        }
    }

    /// Lowercase hex digest of `data`
    pub fn hash_hex(&self, data: &str) -> String {
        match self {
            DigestAlgorithm::Md5 => format!("{:x}", md5::compute(data)),
            DigestAlgorithm::Sha256 => {
                use sha2::{Digest, Sha256};
                let mut hasher = Sha256::new();
                hasher.update(data.as_bytes());
                format!("{:x}", hasher.finalize())
            }
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generate a nonce from the operating system CSPRNG
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Fixed parameters of the digest exchange for one realm
#[derive(Debug, Clone)]
pub struct DigestPolicy {
    pub realm: String,
    pub algorithm: DigestAlgorithm,
    pub method: SipMethod,
    pub qop: &'static str,
}

impl DigestPolicy {
    pub fn new(realm: impl Into<String>, algorithm: DigestAlgorithm) -> Self {
        Self {
            realm: realm.into(),
            algorithm,
            method: SipMethod::Register,
            qop: "auth",
        }
    }

    /// Build the challenge for a freshly issued nonce
    pub fn challenge(&self, nonce: impl Into<String>) -> AuthChallenge {
        AuthChallenge {
            realm: self.realm.clone(),
            nonce: nonce.into(),
            algorithm: self.algorithm,
            qop: self.qop,
        }
    }

    /// Compute the response a client holding `password` should send.
    ///
    /// HA1 = H(username:realm:password), HA2 = H(method:uri),
    /// response = H(HA1:nonce:nc:cnonce:qop:HA2).
    pub fn expected_response(
        &self,
        username: &str,
        password: &str,
        nonce: &str,
        uri: &str,
        nc: &str,
        cnonce: &str,
    ) -> String {
        let ha1 = self
            .algorithm
            .hash_hex(&format!("{}:{}:{}", username, self.realm, password));
        let ha2 = self
            .algorithm
            .hash_hex(&format!("{}:{}", self.method.as_str(), uri));

        self.algorithm.hash_hex(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, nonce, nc, cnonce, self.qop, ha2
        ))
    }

    /// Check the client's response against the stored `nonce` and `password`.
    ///
    /// Uses the stored nonce, never the one echoed by the client.
    pub fn verify(&self, nonce: &str, credentials: &DigestCredentials, password: &str) -> bool {
        let expected = self.expected_response(
            credentials.username(),
            password,
            nonce,
            credentials.uri(),
            credentials.nc(),
            credentials.cnonce(),
        );
        constant_time_eq(expected.as_bytes(), credentials.response().as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Authentication challenge
#[derive(Debug, Clone)]
pub struct AuthChallenge {
    pub realm: String,
    pub nonce: String,
    pub algorithm: DigestAlgorithm,
    pub qop: &'static str,
}

impl AuthChallenge {
    /// Format as WWW-Authenticate header value
    pub fn to_header_value(&self) -> String {
        format!(
            r#"Digest realm="{}", qop="{}", nonce="{}", opaque="", stale=FALSE, algorithm={}"#,
            self.realm, self.qop, self.nonce, self.algorithm
        )
    }
}

/// Parsed `Authorization: Digest ...` header.
///
/// Keys are lowercased; absent fields read as empty strings so that a
/// sparse header fails verification rather than parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestCredentials {
    params: HashMap<String, String>,
}

impl DigestCredentials {
    pub fn parse(header_value: &str) -> Result<Self, SipError> {
        let value = header_value.trim();
        let scheme_len = "Digest ".len();
        if value.len() < scheme_len + 1
            || !value.is_char_boundary(scheme_len)
            || !value[..scheme_len].eq_ignore_ascii_case("Digest ")
        {
            return Err(SipError::Authentication(
                "Authorization header is not a Digest credential".to_string(),
            ));
        }

        let params = parse_params(&value[scheme_len..]);
        if params.is_empty() {
            return Err(SipError::Authentication(
                "Authorization header has no parameters".to_string(),
            ));
        }

        debug!(
            "Parsed digest credentials for {:?}",
            params.get("username")
        );
        Ok(Self { params })
    }

    fn field(&self, key: &str) -> &str {
        self.params.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn username(&self) -> &str {
        self.field("username")
    }

    pub fn nonce(&self) -> &str {
        self.field("nonce")
    }

    pub fn uri(&self) -> &str {
        self.field("uri")
    }

    pub fn response(&self) -> &str {
        self.field("response")
    }

    pub fn nc(&self) -> &str {
        self.field("nc")
    }

    pub fn cnonce(&self) -> &str {
        self.field("cnonce")
    }
}

/// Split `k1="v, 1", k2=v2` on commas outside quotes
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in input.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);

    parts
        .into_iter()
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((key, value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_names() {
        assert_eq!(DigestAlgorithm::parse("md5"), Some(DigestAlgorithm::Md5));
        assert_eq!(
            DigestAlgorithm::parse("SHA-256"),
            Some(DigestAlgorithm::Sha256),
        );
        assert_eq!(DigestAlgorithm::parse("SHA-512"), None);
        assert_eq!(DigestAlgorithm::Sha256.to_string(), "SHA-256");
    }

    #[test]
    fn test_hash_hex() {
        assert_eq!(
            DigestAlgorithm::Md5.hash_hex(""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            DigestAlgorithm::Sha256.hash_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_nonce_is_64_hex_chars_and_unique() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_eq!(a.len(), NONCE_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_challenge_header_value() {
        let policy = DigestPolicy::new("localhost", DigestAlgorithm::Md5);
        let challenge = policy.challenge("abc123");
        assert_eq!(
            challenge.to_header_value(),
            r#"Digest realm="localhost", qop="auth", nonce="abc123", opaque="", stale=FALSE, algorithm=MD5"#
        );
    }

    #[test]
    fn test_expected_response_matches_rfc_construction() {
        let policy = DigestPolicy::new("localhost", DigestAlgorithm::Md5);
        let ha1 = format!("{:x}", md5::compute("alice:localhost:secret"));
        let ha2 = format!("{:x}", md5::compute("REGISTER:sip:localhost"));
        let expected = format!(
            "{:x}",
            md5::compute(format!("{}:n1:00000001:c1:auth:{}", ha1, ha2))
        );

        assert_eq!(
            policy.expected_response(
                "alice",
                "secret",
                "n1",
                "sip:localhost",
                "00000001",
                "c1"
            ),
            expected
        );
    }

    #[test]
    fn test_parse_credentials() {
        let creds = DigestCredentials::parse(
            r#"digest USERNAME="alice", realm="localhost", nonce="n1", uri="sip:localhost", response="abc", qop=auth, nc=00000001, cnonce="x,y""#,
        )
        .unwrap();

        assert_eq!(creds.username(), "alice");
        assert_eq!(creds.field("realm"), "localhost");
        assert_eq!(creds.nonce(), "n1");
        assert_eq!(creds.uri(), "sip:localhost");
        assert_eq!(creds.nc(), "00000001");
        assert_eq!(creds.cnonce(), "x,y");
        assert_eq!(creds.field("qop"), "auth");
        assert_eq!(creds.field("opaque"), "");
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        assert!(DigestCredentials::parse("Basic YWxpY2U6c2VjcmV0").is_err());
        assert!(DigestCredentials::parse("Digest").is_err());
        assert!(DigestCredentials::parse("Digest garbage").is_err());
        assert!(DigestCredentials::parse("").is_err());
    }

    #[test]
    fn test_verify_uses_stored_nonce() {
        let policy = DigestPolicy::new("localhost", DigestAlgorithm::Sha256);
        let response = policy.expected_response(
            "alice",
            "secret",
            "stored",
            "sip:localhost",
            "00000001",
            "c1",
        );
        let creds = DigestCredentials::parse(&format!(
            r#"Digest username="alice", nonce="stored", uri="sip:localhost", nc=00000001, cnonce="c1", response="{}""#,
            response
        ))
        .unwrap();

        assert!(policy.verify("stored", &creds, "secret"));
        assert!(!policy.verify("other", &creds, "secret"));
        assert!(!policy.verify("stored", &creds, "wrong"));
    }
}
