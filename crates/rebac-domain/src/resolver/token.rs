//! Opaque consistency and pagination tokens.
//!
//! Both are URL-safe base64 over a small JSON payload. Callers must treat
//! them as opaque; only this module reads their contents.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Snapshot a call was (or must be) evaluated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyToken {
    /// Tuple store transaction id.
    pub txid: u64,
    /// Model version.
    pub model_version: u64,
}

impl ConsistencyToken {
    pub fn new(txid: u64, model_version: u64) -> Self {
        Self {
            txid,
            model_version,
        }
    }

    pub fn encode(&self) -> DomainResult<String> {
        encode(self, |message| DomainError::InvalidConsistencyToken { message })
    }

    pub fn decode(encoded: &str) -> DomainResult<Self> {
        decode(encoded, |message| DomainError::InvalidConsistencyToken { message })
    }
}

/// Cursor into a sorted list result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
    /// Last item returned on the previous page.
    pub after: String,
    /// Model version the listing was computed against.
    pub model_version: u64,
}

impl PageToken {
    pub fn new(after: impl Into<String>, model_version: u64) -> Self {
        Self {
            after: after.into(),
            model_version,
        }
    }

    pub fn encode(&self) -> DomainResult<String> {
        encode(self, |message| DomainError::InvalidPageToken { message })
    }

    pub fn decode(encoded: &str) -> DomainResult<Self> {
        decode(encoded, |message| DomainError::InvalidPageToken { message })
    }
}

fn encode<T: Serialize>(value: &T, err: impl Fn(String) -> DomainError) -> DomainResult<String> {
    let json = serde_json::to_vec(value).map_err(|e| err(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode<T: DeserializeOwned>(encoded: &str, err: impl Fn(String) -> DomainError) -> DomainResult<T> {
    let json = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| err(format!("not base64: {e}")))?;
    serde_json::from_slice(&json).map_err(|e| err(format!("malformed payload: {e}")))
}

/// Sorts and deduplicates `items`, then returns the page after `page_token`.
///
/// Returns the page and the token for the next one, if more items remain.
pub(crate) fn paginate<T, K>(
    mut items: Vec<T>,
    key: K,
    page_size: usize,
    page_token: Option<&str>,
    model_version: u64,
) -> DomainResult<(Vec<T>, Option<String>)>
where
    K: Fn(&T) -> String,
{
    items.sort_by_key(|item| key(item));
    items.dedup_by(|a, b| key(a) == key(b));

    let after = match page_token {
        Some(encoded) => {
            let token = PageToken::decode(encoded)?;
            if token.model_version != model_version {
                return Err(DomainError::InvalidPageToken {
                    message: format!(
                        "token was issued for model version {}, request uses {}",
                        token.model_version, model_version
                    ),
                });
            }
            Some(token.after)
        }
        None => None,
    };

    let mut remaining = items
        .into_iter()
        .filter(|item| after.as_deref().map_or(true, |a| key(item).as_str() > a))
        .peekable();

    let page: Vec<T> = remaining.by_ref().take(page_size).collect();
    let next = match (remaining.peek(), page.last()) {
        (Some(_), Some(last)) => Some(PageToken::new(key(last), model_version).encode()?),
        _ => None,
    };
    Ok((page, next))
}
