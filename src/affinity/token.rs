//! Decoding of affinity cookie values.
//!
//! Two cookie formats coexist on the wire: the current hashed token and the
//! older raw backend address. Values are classified once here so resolution
//! logic never sniffs formats itself.

use url::Url;

use super::identity::token_for;

/// A decoded affinity cookie value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AffinityToken {
    /// Raw backend address issued by older cookie generations.
    LegacyAddress(Url),
    /// Hex FNV-1a digest of the backend identity.
    Hashed(String),
}

impl AffinityToken {
    /// Classifies a raw cookie value.
    ///
    /// Returns `None` for a value that looks like an address (contains
    /// `://`) but does not parse as one.
    pub fn decode(value: &str) -> Option<Self> {
        if value.contains("://") {
            return Url::parse(value).ok().map(AffinityToken::LegacyAddress);
        }
        Some(AffinityToken::Hashed(value.to_string()))
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, AffinityToken::LegacyAddress(_))
    }

    /// Returns true when `candidate` is the backend this token points at.
    ///
    /// Legacy addresses compare user-info literally since they carry it.
    /// Hashed tokens compare against the credential-stripped identity.
    pub fn matches(&self, candidate: &Url) -> bool {
        match self {
            AffinityToken::LegacyAddress(needle) => {
                needle.scheme() == candidate.scheme()
                    && needle.host_str() == candidate.host_str()
                    && needle.port() == candidate.port()
                    && needle.path() == candidate.path()
                    && needle.username() == candidate.username()
                    && needle.password() == candidate.password()
            }
            AffinityToken::Hashed(token) => *token == token_for(candidate),
        }
    }
}
