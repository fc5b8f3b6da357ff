// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Obtain audience-scoped OIDC identity tokens from a service account key.
//!
//! Identity tokens verify the identity of a principal and are commonly used
//! for service to service authentication, for example when the target
//! service sits behind an identity-aware proxy. Each token is bound to a
//! single target audience: the OAuth client id of the resource it is
//! intended for.
//!
//! The transport in this crate builds its token source through this module,
//! but [Builder] is also usable directly when the service account key is
//! obtained from a secret manager or a similar service:
//!
//! ```
//! # use iap_transport::credentials::id_token;
//! # tokio_test::block_on(async {
//! let service_account_key = serde_json::json!({
//!     "type": "service_account",
//!     "client_email": "test-client-email",
//!     "private_key": "<YOUR_PKCS8_PEM_KEY_HERE>",
//!     "token_uri": "https://oauth2.googleapis.com/token",
//! });
//! let audience = "1234567890-abc123.apps.googleusercontent.com";
//! let credentials = id_token::Builder::new(audience, service_account_key).build()?;
//! let token = credentials.token().await?;
//! # Ok::<(), anyhow::Error>(())
//! # });
//! ```

use crate::Result;
use crate::constants::{JWT_BEARER_GRANT_TYPE, OAUTH2_TOKEN_ENDPOINT};
use crate::credentials::ServiceAccountKey;
use crate::credentials::jws::{CLOCK_SKEW_FUDGE, DEFAULT_TOKEN_TIMEOUT, JwsClaims, JwsHeader};
use crate::errors::{self, Error};
use crate::token::{Token, TokenProvider};
use crate::token_cache::TokenCache;
use base64::prelude::{BASE64_URL_SAFE_NO_PAD, Engine as _};
use rustls::crypto::CryptoProvider;
use rustls::sign::SigningKey;
use rustls_pemfile::Item;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use time::OffsetDateTime;
use tokio::time::Instant;

/// Creates [IdTokenCredentials] instances from a service account key.
pub struct Builder {
    target_audience: String,
    service_account_key: serde_json::Value,
}

impl Builder {
    /// The `target_audience` is the intended audience of the identity
    /// tokens, typically the OAuth client id of the proxy protecting the
    /// service that will receive them. `service_account_key` is the JSON
    /// contents of a service account key.
    pub fn new<S: Into<String>>(target_audience: S, service_account_key: serde_json::Value) -> Self {
        Self {
            target_audience: target_audience.into(),
            service_account_key,
        }
    }

    /// Returns an [IdTokenCredentials] instance with the configured settings.
    ///
    /// Fails with a format error when the key is not a signing-capable
    /// service identity: wrong `type` tag, missing fields, or a private key
    /// that is not PEM-encoded PKCS#8. All of these surface here, never at
    /// token fetch time.
    pub fn build(self) -> Result<IdTokenCredentials> {
        let key = ServiceAccountKey::from_json(self.service_account_key)?;
        let signing_key = signing_key(&key.private_key)?;
        let token_uri = key
            .token_uri
            .clone()
            .unwrap_or_else(|| OAUTH2_TOKEN_ENDPOINT.to_string());
        let provider = IdTokenProvider {
            key,
            signing_key,
            target_audience: self.target_audience,
            token_uri,
            client: reqwest::Client::new(),
        };
        Ok(IdTokenCredentials {
            inner: Arc::new(TokenCache::new(provider)),
        })
    }
}

/// A renewable supplier of identity tokens for a single target audience.
///
/// Tokens are cached and reused until shortly before their expiry; the
/// exchange round trip is only paid when no valid cached token exists.
/// Cheap to clone, and clones share the same cache.
#[derive(Clone, Debug)]
pub struct IdTokenCredentials {
    inner: Arc<TokenCache<IdTokenProvider>>,
}

impl IdTokenCredentials {
    /// Returns the cached token while it is valid, otherwise signs a fresh
    /// assertion and exchanges it for a new one.
    pub async fn token(&self) -> Result<Token> {
        self.inner.token().await
    }
}

#[derive(Debug)]
struct IdTokenProvider {
    key: ServiceAccountKey,
    signing_key: Arc<dyn SigningKey>,
    target_audience: String,
    token_uri: String,
    client: reqwest::Client,
}

#[async_trait::async_trait]
impl TokenProvider for IdTokenProvider {
    async fn token(&self) -> Result<Token> {
        let assertion = self.assertion()?;
        let response = self
            .client
            .post(&self.token_uri)
            .form(&TokenRequest {
                grant_type: JWT_BEARER_GRANT_TYPE,
                assertion: &assertion,
            })
            .send()
            .await
            .map_err(|e| Error::exchange(true, e))?;
        if !response.status().is_success() {
            let status = response.status();
            let transient = errors::is_retryable(status);
            let body = response.text().await.unwrap_or_default();
            return Err(Error::exchange(
                transient,
                format!("the exchange endpoint returned status {status}, {body}"),
            ));
        }
        let response = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::exchange(false, e))?;
        let expires_at = response
            .expires_in
            .map(|secs| Instant::now() + Duration::from_secs(secs))
            .or_else(|| expiry_from_token(&response.id_token));
        Ok(Token {
            token: response.id_token,
            token_type: "Bearer".to_string(),
            expires_at,
        })
    }
}

impl IdTokenProvider {
    /// Mints a fresh assertion bound to the configured target audience.
    fn assertion(&self) -> Result<String> {
        let signer = self
            .signing_key
            .choose_scheme(&[rustls::SignatureScheme::RSA_PKCS1_SHA256])
            .ok_or_else(|| {
                Error::format("the signing key does not support the RSA_PKCS1_SHA256 scheme")
            })?;

        // Backdate the issue time; see CLOCK_SKEW_FUDGE.
        let now = OffsetDateTime::now_utc() - CLOCK_SKEW_FUDGE;
        let claims = JwsClaims {
            iss: self.key.client_email.clone(),
            aud: self.token_uri.clone(),
            target_audience: self.target_audience.clone(),
            exp: now + DEFAULT_TOKEN_TIMEOUT,
            iat: now,
            sub: Some(self.key.client_email.clone()),
        };
        let header = JwsHeader {
            alg: "RS256",
            typ: "JWT",
            kid: self.key.private_key_id.clone(),
        };
        let encoded_header_claims = format!("{}.{}", header.encode()?, claims.encode()?);
        let sig = signer
            .sign(encoded_header_claims.as_bytes())
            .map_err(Error::format)?;
        Ok(format!(
            "{encoded_header_claims}.{}",
            BASE64_URL_SAFE_NO_PAD.encode(sig)
        ))
    }
}

// Loads the signing key embedded in the service account key.
fn signing_key(private_key: &str) -> Result<Arc<dyn SigningKey>> {
    let key_provider = CryptoProvider::get_default().map_or_else(
        || rustls::crypto::ring::default_provider().key_provider,
        |p| p.key_provider,
    );

    let item = rustls_pemfile::read_one(&mut private_key.as_bytes())
        .map_err(Error::format)?
        .ok_or_else(|| Error::format("missing PEM section in the service account key"))?;
    match item {
        Item::Pkcs8Key(item) => key_provider.load_private_key(item.into()).map_err(Error::format),
        other => Err(Error::format(format!(
            "expected key to be in form of PKCS8, found {other:?}"
        ))),
    }
}

/// The form body of a JWT-bearer exchange.
#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    assertion: &'a str,
}

/// The response of the exchange endpoint.
#[derive(Deserialize)]
struct TokenResponse {
    id_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

// Extracts the expiry from the identity token's own `exp` claim. Used when
// the exchange response does not carry `expires_in`.
fn expiry_from_token(token: &str) -> Option<Instant> {
    let parts = token.split('.').collect::<Vec<_>>();
    if parts.len() != 3 {
        return None;
    }
    let payload = BASE64_URL_SAFE_NO_PAD.decode(parts[1]).ok()?;
    let claims = serde_json::from_slice::<serde_json::Value>(&payload).ok()?;
    let exp = claims.get("exp")?.as_u64()?;
    instant_from_epoch_seconds(exp)
}

fn instant_from_epoch_seconds(secs: u64) -> Option<Instant> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let remaining = Duration::from_secs(secs).saturating_sub(now);
    Some(Instant::now() + remaining)
}
