//! SIP message types and parsing

use crate::domain::shared::DomainError;
use crate::infrastructure::transport::TransportError;
use bytes::Bytes;
use rsip::headers::UntypedHeader;
use rsip::{Header, Headers, Method, Request, Response};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SipError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Repository error: {0}")]
    Repository(#[from] DomainError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rsip::Error> for SipError {
    fn from(err: rsip::Error) -> Self {
        SipError::ParseError(err.to_string())
    }
}

/// SIP methods this server can route to a handler.
///
/// Anything else parses fine but is answered with 501.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SipMethod {
    Register,
}

impl SipMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SipMethod::Register => "REGISTER",
        }
    }

    pub fn from_rsip(method: &Method) -> Option<Self> {
        match method {
            Method::Register => Some(SipMethod::Register),
            _ => None,
        }
    }
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Look up a header value by name, case-insensitively.
///
/// rsip renders every header as `Name: value`, with compact forms already
/// expanded to their canonical names.
fn find_header(headers: &Headers, name: &str) -> Option<String> {
    headers.iter().find_map(|header| {
        let rendered = header.to_string();
        let (header_name, value) = rendered.split_once(':')?;
        header_name
            .trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}

/// SIP Request wrapper
#[derive(Debug, Clone)]
pub struct SipRequest {
    pub inner: Request,
}

impl SipRequest {
    pub fn new(inner: Request) -> Self {
        Self { inner }
    }

    pub fn parse(data: &[u8]) -> Result<Self, SipError> {
        let request = rsip::Request::try_from(data)?;
        Ok(Self::new(request))
    }

    pub fn method(&self) -> Option<SipMethod> {
        SipMethod::from_rsip(&self.inner.method)
    }

    pub fn headers(&self) -> &Headers {
        &self.inner.headers
    }

    pub fn header(&self, name: &str) -> Option<String> {
        find_header(&self.inner.headers, name)
    }

    pub fn call_id(&self) -> Option<String> {
        self.inner
            .headers
            .iter()
            .find_map(|h| match h {
                Header::CallId(cid) => Some(cid.value().trim().to_string()),
                _ => None,
            })
            .filter(|cid| !cid.is_empty())
    }

    pub fn from_header(&self) -> Option<&rsip::headers::From> {
        self.inner.headers.iter().find_map(|h| match h {
            Header::From(from) => Some(from),
            _ => None,
        })
    }

    pub fn to_header(&self) -> Option<&rsip::headers::To> {
        self.inner.headers.iter().find_map(|h| match h {
            Header::To(to) => Some(to),
            _ => None,
        })
    }

    /// Raw `Authorization` header value
    pub fn authorization(&self) -> Option<String> {
        self.inner
            .headers
            .iter()
            .find_map(|h| match h {
                Header::Authorization(auth) => Some(auth.value().trim().to_string()),
                _ => None,
            })
            .filter(|value| !value.is_empty())
    }

    /// Raw `Expires` header value
    pub fn expires(&self) -> Option<String> {
        self.inner.headers.iter().find_map(|h| match h {
            Header::Expires(expires) => Some(expires.value().trim().to_string()),
            _ => None,
        })
    }

    pub fn contact(&self) -> Option<String> {
        self.inner.headers.iter().find_map(|h| match h {
            Header::Contact(contact) => Some(contact.value().trim().to_string()),
            _ => None,
        })
    }

    pub fn user_agent(&self) -> Option<String> {
        self.inner.headers.iter().find_map(|h| match h {
            Header::UserAgent(ua) => Some(ua.value().trim().to_string()),
            _ => None,
        })
    }
}

/// SIP Response wrapper
#[derive(Debug, Clone)]
pub struct SipResponse {
    pub inner: Response,
}

impl SipResponse {
    pub fn new(inner: Response) -> Self {
        Self { inner }
    }

    pub fn parse(data: &[u8]) -> Result<Self, SipError> {
        let response = rsip::Response::try_from(data)?;
        Ok(Self::new(response))
    }

    pub fn status_code(&self) -> u16 {
        self.inner.status_code.clone().into()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        find_header(&self.inner.headers, name)
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.inner.to_string())
    }
}

/// SIP Message (either request or response)
#[derive(Debug, Clone)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

impl SipMessage {
    pub fn parse(data: &[u8]) -> Result<Self, SipError> {
        if let Ok(request) = SipRequest::parse(data) {
            return Ok(SipMessage::Request(request));
        }

        if let Ok(response) = SipResponse::parse(data) {
            return Ok(SipMessage::Response(response));
        }

        Err(SipError::ParseError(
            "Could not parse as SIP request or response".to_string(),
        ))
    }
}
