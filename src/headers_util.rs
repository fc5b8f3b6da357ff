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
use crate::errors::Error;
use crate::token::Token;
use http::header::HeaderValue;

/// Formats `token` as a bearer `Authorization` header value.
///
/// The value is marked sensitive so it stays out of debug output and logs.
pub(crate) fn bearer_header_value(token: &Token) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("{} {}", token.token_type, token.token))
        .map_err(|e| Error::exchange(false, e))?;
    value.set_sensitive(true);
    Ok(value)
}
