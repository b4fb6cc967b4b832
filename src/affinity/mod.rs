//! Cookie-based session affinity ("sticky sessions").
//!
//! Maps a request's affinity cookie to a backend in the current pool, and
//! stamps responses with a token that reproducibly identifies the backend
//! that served them. The token is an FNV-1a fingerprint of the backend's
//! credential-stripped address, so it survives restarts and pool reordering.

mod cookies;
mod error;
mod identity;
mod options;
mod sticky;
mod token;

use url::Url;

pub use cookies::{find_cookie, CookieSink, CookieSource};
pub use error::AffinityError;
pub use identity::{digest, normalize, same_identity, token_for};
pub use options::{CookieOptions, SameSite};
pub use sticky::{Resolution, StickySession};
pub use token::AffinityToken;

/// A pool member that can be addressed by URL.
pub trait BackendAddress {
    fn address(&self) -> &Url;
}

impl BackendAddress for Url {
    fn address(&self) -> &Url {
        self
    }
}

impl<T: BackendAddress + ?Sized> BackendAddress for &T {
    fn address(&self) -> &Url {
        (**self).address()
    }
}
