//! SIP response builder

use super::message::{SipRequest, SipResponse};
use rsip::{Header, Headers, Response, StatusCode, Version};

/// Build a SIP response to a request.
///
/// Via, Call-ID and CSeq are always copied from the request. From and To are
/// copied unless overridden with [`with_from`](Self::with_from) or
/// [`with_to`](Self::with_to). Registrar responses never carry a body.
pub struct ResponseBuilder {
    status_code: u16,
    from: Option<Header>,
    to: Option<Header>,
    headers: Vec<Header>,
}

impl ResponseBuilder {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            from: None,
            to: None,
            headers: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(400).reason(reason)
    }

    pub fn unauthorized() -> Self {
        Self::new(401)
    }

    pub fn server_internal_error() -> Self {
        Self::new(500)
    }

    pub fn not_implemented() -> Self {
        Self::new(501)
    }

    /// Attach a `Reason-Phrase` header explaining the status
    pub fn reason(self, phrase: impl Into<String>) -> Self {
        self.header(Header::Other("Reason-Phrase".to_string(), phrase.into()))
    }

    pub fn with_from(mut self, header: Header) -> Self {
        self.from = Some(header);
        self
    }

    pub fn with_to(mut self, header: Header) -> Self {
        self.to = Some(header);
        self
    }

    pub fn header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    pub fn build_for_request(self, request: &SipRequest) -> SipResponse {
        let ResponseBuilder {
            status_code,
            mut from,
            mut to,
            headers: extra,
        } = self;

        let mut headers = Vec::with_capacity(extra.len() + 6);
        for header in request.headers().iter() {
            match header {
                Header::Via(_) | Header::CallId(_) | Header::CSeq(_) => {
                    headers.push(header.clone());
                }
                Header::From(_) => headers.push(from.take().unwrap_or_else(|| header.clone())),
                Header::To(_) => headers.push(to.take().unwrap_or_else(|| header.clone())),
                _ => {}
            }
        }
        headers.extend(from);
        headers.extend(to);
        headers.extend(extra);
        headers.push(Header::ContentLength("0".to_string().into()));

        SipResponse::new(Response {
            status_code: StatusCode::from(status_code),
            headers: Headers::from(headers),
            body: Vec::new(),
            version: Version::V2,
        })
    }
}
