//! Caller identity extracted from From/To headers

use super::message::SipError;
use rsip::common::uri::param::Tag;
use rsip::headers::ToTypedHeader;
use rsip::{typed, Header, Param, Uri};

/// The (display name, user, domain) named by a From or To header.
///
/// Keeps the header's URI and params so a response can echo them back with
/// the tag changed.
#[derive(Debug, Clone, PartialEq)]
pub struct SipIdentity {
    pub display_name: Option<String>,
    pub username: String,
    pub domain: String,
    uri: Uri,
    params: Vec<Param>,
}

impl SipIdentity {
    pub fn from_from_header(header: &rsip::headers::From) -> Result<Self, SipError> {
        let typed: typed::From = header.typed()?;
        Self::from_parts(typed.display_name, typed.uri, typed.params)
    }

    pub fn from_to_header(header: &rsip::headers::To) -> Result<Self, SipError> {
        let typed: typed::To = header.typed()?;
        Self::from_parts(typed.display_name, typed.uri, typed.params)
    }

    fn from_parts(
        display_name: Option<String>,
        uri: Uri,
        params: Vec<Param>,
    ) -> Result<Self, SipError> {
        let username = uri
            .auth
            .as_ref()
            .map(|auth| auth.user.clone())
            .filter(|user| !user.is_empty())
            .ok_or_else(|| SipError::InvalidMessage(format!("URI {} has no user part", uri)))?;
        let domain = uri.host_with_port.host.to_string();

        Ok(Self {
            display_name: display_name
                .map(|name| name.trim().trim_matches('"').to_string())
                .filter(|name| !name.is_empty()),
            username,
            domain,
            uri,
            params,
        })
    }

    /// `user@domain`, the key for identity comparisons
    pub fn user_domain(&self) -> String {
        format!("{}@{}", self.username, self.domain)
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// From header carrying this identity, params untouched
    pub fn as_from_header(&self) -> Header {
        Header::From(
            typed::From {
                display_name: self.display_name.clone(),
                uri: self.uri.clone(),
                params: self.params.clone(),
            }
            .into(),
        )
    }

    /// To header carrying this identity with any tag removed, or replaced by `tag`
    pub fn as_to_header(&self, tag: Option<&str>) -> Header {
        let mut params: Vec<Param> = self
            .params
            .iter()
            .filter(|param| !matches!(param, Param::Tag(_)))
            .cloned()
            .collect();
        if let Some(tag) = tag {
            params.push(Param::Tag(Tag::new(tag)));
        }

        Header::To(
            typed::To {
                display_name: self.display_name.clone(),
                uri: self.uri.clone(),
                params,
            }
            .into(),
        )
    }
}
