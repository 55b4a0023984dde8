//! AT-URI helpers.
//!
//! Records reference each other by `at://<did>/<collection>/<rkey>` URIs.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::tid::TID_LEN;

fn at_uri_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^at://([^/\s]+)(?:/([A-Za-z0-9.\-]+)(?:/([A-Za-z0-9._~:\-]+))?)?/?$")
            .unwrap_or_else(|e| unreachable!("static AT-URI pattern is valid: {e}"))
    })
}

/// A parsed AT-URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AtUri {
    /// The repository DID (or handle).
    pub authority: String,
    /// The record collection NSID, e.g. `app.bsky.feed.post`.
    pub collection: Option<String>,
    /// The record key.
    pub rkey: Option<String>,
}

impl AtUri {
    /// Parse an AT-URI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUri`] if `uri` is not of the form
    /// `at://<authority>[/<collection>[/<rkey>]]`.
    pub fn parse(uri: &str) -> Result<Self> {
        let caps = at_uri_regex()
            .captures(uri)
            .ok_or_else(|| Error::invalid_uri(uri))?;
        Ok(Self {
            authority: caps[1].to_string(),
            collection: caps.get(2).map(|m| m.as_str().to_string()),
            rkey: caps.get(3).map(|m| m.as_str().to_string()),
        })
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}", self.authority)?;
        if let Some(collection) = &self.collection {
            write!(f, "/{collection}")?;
            if let Some(rkey) = &self.rkey {
                write!(f, "/{rkey}")?;
            }
        }
        Ok(())
    }
}

/// Extract the repository DID from a record URI.
///
/// # Errors
///
/// Returns [`Error::InvalidUri`] for empty or malformed URIs.
pub fn did_from_uri(uri: &str) -> Result<String> {
    AtUri::parse(uri).map(|parsed| parsed.authority)
}

/// The last path segment of `uri`, if it looks like a TID record key.
///
/// Valid keys are exactly 13 ASCII alphanumeric characters. Whether they
/// decode is checked separately by [`crate::tid::parse_rkey`].
#[must_use]
pub fn rkey_from_uri(uri: &str) -> Option<&str> {
    let rkey = uri.rsplit('/').next()?;
    (rkey.len() == TID_LEN && rkey.bytes().all(|b| b.is_ascii_alphanumeric())).then_some(rkey)
}

/// Sort key used for chronological feeds: the raw last path segment.
#[must_use]
pub fn sort_key(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}
