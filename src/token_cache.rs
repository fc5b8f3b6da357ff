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

use crate::Result;
use crate::token::{Token, TokenProvider};
use std::time::Duration;
use tokio::sync::Mutex;
// Using tokio's wrapper makes the cache testable without relying on clock times.
use tokio::time::Instant;

/// A cached token is not served once it is this close to its expiry. A token
/// handed out at the very edge of its lifetime could expire while the request
/// carrying it is still in flight.
pub(crate) const EXPIRY_MARGIN: Duration = Duration::from_secs(10);

/// Wraps a [TokenProvider] and keeps returning the same [Token] as long as it
/// is valid.
///
/// The lock on the cached token is held for the full duration of a refresh.
/// Callers that arrive while a refresh is in flight queue on the lock and
/// find a fresh token when they acquire it, so a burst of concurrent requests
/// performs a single exchange.
#[derive(Debug)]
pub(crate) struct TokenCache<T>
where
    T: TokenProvider,
{
    current: Mutex<Option<Token>>,
    inner: T,
}

// Returns true if the token has expired or is about to.
fn expired(token: &Token) -> bool {
    token
        .expires_at
        .is_some_and(|e| e <= Instant::now() + EXPIRY_MARGIN)
}

impl<T: TokenProvider> TokenCache<T> {
    pub(crate) fn new(inner: T) -> TokenCache<T> {
        TokenCache {
            current: Mutex::new(None),
            inner,
        }
    }
}

#[async_trait::async_trait]
impl<T: TokenProvider> TokenProvider for TokenCache<T> {
    async fn token(&self) -> Result<Token> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref() {
            if !expired(token) {
                return Ok(token.clone());
            }
        }
        // Errors are not cached: the caller that triggered the refresh sees
        // the failure, and the next call starts a new exchange.
        let token = self.inner.token().await?;
        *current = Some(token.clone());
        Ok(token)
    }
}
