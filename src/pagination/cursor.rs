//! Signed pagination cursors.
//!
//! Token layout: `base64url(payload) "." base64url(HMAC-SHA256(secret, payload))`.
//! The payload is JSON `{"v": values, "k": sort-key descriptors, "f": fingerprint,
//! "n": rows returned so far}` where the fingerprint is the hex SHA-256 of the
//! object and user the cursor was issued for. Callers treat the token as opaque.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::PaginationInfo;
use crate::access::QueryContext;
use crate::error::{CursorError, QueryError, QueryResult};
use crate::soql::compiler::ParamValue;

type HmacSha256 = Hmac<Sha256>;

/// Source of the cursor signing key.
pub trait SecretProvider: Send + Sync {
    fn secret(&self) -> QueryResult<Vec<u8>>;
}

/// A fixed signing key.
#[derive(Clone)]
pub struct StaticSecret(Vec<u8>);

impl StaticSecret {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(secret.into())
    }
}

impl fmt::Debug for StaticSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticSecret(..)")
    }
}

impl SecretProvider for StaticSecret {
    fn secret(&self) -> QueryResult<Vec<u8>> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    v: Vec<ParamValue>,
    k: Vec<String>,
    f: String,
    n: usize,
}

/// Sort-key values recovered from a trusted cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorState {
    pub values: Vec<ParamValue>,
    /// Rows delivered by every page up to and including the cursor's
    pub returned: usize,
}

/// Encodes and verifies cursors.
#[derive(Clone)]
pub struct CursorCodec {
    secret: Arc<dyn SecretProvider>,
}

impl fmt::Debug for CursorCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorCodec").finish_non_exhaustive()
    }
}

impl CursorCodec {
    pub fn new(secret: Arc<dyn SecretProvider>) -> Self {
        Self { secret }
    }

    /// Mint a cursor positioned after the row whose sort-key values are
    /// `values`, once `returned` rows have been delivered in total.
    pub fn encode(
        &self,
        info: &PaginationInfo,
        ctx: &QueryContext,
        values: &[ParamValue],
        returned: usize,
    ) -> QueryResult<String> {
        if values.len() != info.sort_keys.len() {
            return Err(QueryError::Internal(format!(
                "cursor needs {} sort values, got {}",
                info.sort_keys.len(),
                values.len()
            )));
        }

        let payload = Payload {
            v: values.to_vec(),
            k: info.descriptors(),
            f: fingerprint(&info.object, &ctx.user_id),
            n: returned,
        };
        let json = serde_json::to_vec(&payload)
            .map_err(|e| QueryError::Internal(format!("cursor encode failed: {}", e)))?;
        let body = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json);
        let signature = self.sign(body.as_bytes())?;

        Ok(format!(
            "{}.{}",
            body,
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Verify a cursor against the current query and requester.
    ///
    /// Checks run in order: signature, object/user fingerprint, sort-key set,
    /// value count, row budget. Any failure rejects the cursor.
    pub fn decode(&self, token: &str, info: &PaginationInfo, ctx: &QueryContext) -> QueryResult<CursorState> {
        let (body, signature) = token
            .split_once('.')
            .ok_or_else(|| malformed("missing signature"))?;
        let signature = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| malformed("signature is not base64url"))?;

        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        if mac.verify_slice(&signature).is_err() {
            tracing::debug!("[SOQL cursor] Rejected cursor for {}: bad signature", info.object);
            return Err(CursorError::InvalidSignature.into());
        }

        let json = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| malformed("payload is not base64url"))?;
        let payload: Payload =
            serde_json::from_slice(&json).map_err(|_| malformed("payload is not valid JSON"))?;

        if payload.f != fingerprint(&info.object, &ctx.user_id) {
            tracing::debug!(
                "[SOQL cursor] Rejected cursor for {}: issued for another object or user",
                info.object
            );
            return Err(CursorError::ContextMismatch.into());
        }
        if payload.k != info.descriptors() {
            tracing::debug!("[SOQL cursor] Rejected cursor for {}: sort keys changed", info.object);
            return Err(CursorError::SortKeyMismatch.into());
        }
        if payload.v.len() != payload.k.len() {
            return Err(malformed("value count does not match sort keys"));
        }
        if info.row_limit.is_some_and(|limit| payload.n >= limit) {
            return Err(malformed("row limit already reached"));
        }

        Ok(CursorState {
            values: payload.v,
            returned: payload.n,
        })
    }

    fn mac(&self) -> QueryResult<HmacSha256> {
        let secret = self.secret.secret()?;
        HmacSha256::new_from_slice(&secret)
            .map_err(|e| QueryError::Provider(format!("invalid cursor secret: {}", e)))
    }

    fn sign(&self, data: &[u8]) -> QueryResult<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn fingerprint(object: &str, user_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(object.to_lowercase().as_bytes());
    hasher.update([0u8]);
    hasher.update(user_id.as_bytes());
    hex::encode(hasher.finalize())
}

fn malformed(reason: &str) -> QueryError {
    CursorError::Malformed(reason.to_string()).into()
}
