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

//! Authenticate HTTP requests to services behind an identity-aware proxy.
//!
//! Endpoints protected by an identity-aware proxy require every request to
//! carry an OIDC identity token minted for the proxy's OAuth client id. This
//! crate provides [Transport][transport::Transport], a decorator around
//! [reqwest::Client] that obtains such tokens through the two-legged
//! JWT-bearer exchange and attaches them as `Authorization: Bearer` headers.
//!
//! The signing credential (a service account key) is located with ambient
//! environment discovery by default, and the resulting identity token is
//! cached until shortly before it expires, so the exchange round trip is paid
//! only when a fresh token is actually needed.
//!
//! # Example
//! ```
//! # use iap_transport::transport::Transport;
//! # tokio_test::block_on(async {
//! // The OAuth client id of the proxy protecting the service.
//! let client_id = "1234567890-abc123.apps.googleusercontent.com";
//!
//! // Resolves the signing credential with ambient environment discovery;
//! // discovery or format problems surface here.
//! let transport = Transport::builder(client_id)
//! #   .service_account_key(serde_json::json!({
//! #       "type": "service_account",
//! #       "client_email": "test-client-email",
//! #       "private_key": "<YOUR_PKCS8_PEM_KEY_HERE>",
//! #   }))
//!     .build().await?;
//!
//! // Requests forwarded through the transport carry a bearer identity
//! // token for `client_id`.
//! let request = reqwest::Request::new(
//!     reqwest::Method::GET,
//!     "https://service.example.com/".parse()?,
//! );
//! let response = transport.execute(request).await?;
//! # Ok::<(), anyhow::Error>(())
//! # });
//! ```

/// The error type returned by this crate.
pub mod errors;

/// Types and functions to work with signing credentials.
pub mod credentials;

/// Types and functions to work with identity tokens.
pub mod token;

/// The authenticating transport.
pub mod transport;

pub(crate) mod constants;
pub(crate) mod headers_util;
pub(crate) mod token_cache;

/// A `Result` alias where the `Err` case is `iap_transport::errors::Error`.
pub type Result<T> = std::result::Result<T, crate::errors::Error>;
