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

//! The authenticating transport.
//!
//! [Transport] decorates a [reqwest::Client]: every request forwarded
//! through [execute][Transport::execute] carries an identity token for the
//! transport's target audience, minted and cached by
//! [IdTokenCredentials][crate::credentials::id_token::IdTokenCredentials].
//!
//! A transport is built for exactly one target audience, fixed at
//! construction. Two initialization policies are available:
//!
//! * **Eager** ([Builder::build]): the signing credential is resolved and
//!   the token source is built at construction. Discovery and format
//!   problems surface before any request is made.
//! * **Lazy** ([Builder::build_lazy]): construction always succeeds; the
//!   first forwarded request resolves the credential and builds the token
//!   source. Concurrent first requests coordinate on a single build.
//!
//! Neither policy performs a token exchange at construction; the exchange
//! happens on the first request in both cases.
//!
//! ```
//! # use iap_transport::transport::Transport;
//! # use iap_transport::credentials::StaticResolver;
//! # tokio_test::block_on(async {
//! # // The transport is built with the `rustls-no-provider` feature, so the
//! # // process must install a crypto provider before constructing a client.
//! # let _ = rustls::crypto::ring::default_provider().install_default();
//! let service_account_key = serde_json::json!({
//!     "type": "service_account",
//!     "client_email": "test-client-email",
//!     "private_key": "<YOUR_PKCS8_PEM_KEY_HERE>",
//!     "token_uri": "https://oauth2.googleapis.com/token",
//! });
//! let transport = Transport::builder("1234567890-abc123.apps.googleusercontent.com")
//!     .resolver(StaticResolver::new(service_account_key))
//!     .build_lazy();
//! let request = reqwest::Request::new(
//!     reqwest::Method::GET,
//!     "https://service.example.com/".parse()?,
//! );
//! let response = transport.execute(request).await?;
//! # Ok::<(), anyhow::Error>(())
//! # });
//! ```

use crate::Result;
use crate::credentials::id_token::{self, IdTokenCredentials};
use crate::credentials::{CredentialsResolver, DefaultResolver, StaticResolver};
use crate::errors::Error;
use crate::headers_util;
use http::header::AUTHORIZATION;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Authenticates requests to services behind an identity-aware proxy.
///
/// Cheap to clone; clones share the same token source and cache, so any
/// number of concurrent requests may go through one transport.
///
/// The [Default] value has no target audience and fails every request with
/// an uninitialized error. It becomes usable once
/// [with_target_audience][Transport::with_target_audience] is applied,
/// which must happen before the transport is shared or used.
#[derive(Clone, Debug, Default)]
pub struct Transport {
    inner: reqwest::Client,
    target_audience: Option<String>,
    resolver: Option<Arc<dyn CredentialsResolver>>,
    credentials: Arc<OnceCell<IdTokenCredentials>>,
}

impl Transport {
    /// Returns a builder for a transport with the given target audience,
    /// typically the OAuth client id of the proxy protecting the service.
    pub fn builder<S: Into<String>>(target_audience: S) -> Builder {
        Builder::new(target_audience)
    }

    /// Sets the target audience on a default-constructed transport.
    pub fn with_target_audience<S: Into<String>>(mut self, target_audience: S) -> Self {
        self.target_audience = Some(target_audience.into());
        self
    }

    /// Forwards `request` with a bearer identity token attached.
    ///
    /// Ensures the token source is built (resolving the signing credential
    /// on first use for lazy transports), fetches a current token, attaches
    /// it as an `Authorization: Bearer` header, and delegates to the
    /// underlying client. The response is returned untouched: an auth
    /// rejection from the target service (401 or 403) is a successful
    /// forward, not an error.
    ///
    /// A timeout set on `request` bounds both the token fetch and the
    /// delegated call; a lapse in either surfaces as a cancelled error.
    pub async fn execute(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
        let credentials = self.credentials().await?;
        let token = match request.timeout().copied() {
            Some(limit) => tokio::time::timeout(limit, credentials.token())
                .await
                .map_err(|_| {
                    Error::cancelled("the token fetch did not complete within the request deadline")
                })??,
            None => credentials.token().await?,
        };
        let value = headers_util::bearer_header_value(&token)?;
        request.headers_mut().insert(AUTHORIZATION, value);
        self.inner.execute(request).await.map_err(|e| {
            if e.is_timeout() {
                Error::cancelled(e)
            } else {
                Error::transport(e)
            }
        })
    }

    /// Returns the token source, building it on first use.
    ///
    /// A transport without a target audience fails here, before any network
    /// activity. Failed builds leave the cell empty, so a later call starts
    /// a fresh resolution.
    async fn credentials(&self) -> Result<&IdTokenCredentials> {
        let target_audience = self
            .target_audience
            .clone()
            .ok_or_else(Error::uninitialized)?;
        self.credentials
            .get_or_try_init(|| async move {
                let resolver: Arc<dyn CredentialsResolver> = self
                    .resolver
                    .clone()
                    .unwrap_or_else(|| Arc::new(DefaultResolver));
                let key = resolver.resolve().await?;
                id_token::Builder::new(target_audience, key).build()
            })
            .await
    }
}

/// Creates [Transport] instances.
pub struct Builder {
    target_audience: String,
    client: Option<reqwest::Client>,
    resolver: Option<Arc<dyn CredentialsResolver>>,
}

impl Builder {
    /// `target_audience` is the intended audience of the identity tokens
    /// attached to forwarded requests.
    pub fn new<S: Into<String>>(target_audience: S) -> Self {
        Self {
            target_audience: target_audience.into(),
            client: None,
            resolver: None,
        }
    }

    /// Sets the client used to perform the delegated requests.
    ///
    /// Defaults to `reqwest::Client::new()`.
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Replaces the ambient credential discovery with `resolver`.
    ///
    /// Defaults to [DefaultResolver].
    pub fn resolver<R>(mut self, resolver: R) -> Self
    where
        R: CredentialsResolver + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Uses `key` as the signing credential, bypassing discovery.
    pub fn service_account_key(self, key: serde_json::Value) -> Self {
        self.resolver(StaticResolver::new(key))
    }

    /// Returns a [Transport], resolving the signing credential and building
    /// the token source now.
    ///
    /// Discovery and format errors surface here, before any request is
    /// made. No token exchange is performed.
    pub async fn build(self) -> Result<Transport> {
        let transport = self.build_lazy();
        transport.credentials().await?;
        Ok(transport)
    }

    /// Returns a [Transport] that defers credential resolution to the first
    /// forwarded request.
    ///
    /// Construction always succeeds; discovery and format errors surface
    /// from [execute][Transport::execute] instead.
    pub fn build_lazy(self) -> Transport {
        Transport {
            inner: self.client.unwrap_or_default(),
            target_audience: Some(self.target_audience),
            resolver: self.resolver,
            credentials: Arc::new(OnceCell::new()),
        }
    }
}
