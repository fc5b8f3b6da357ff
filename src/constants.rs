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

/// JWT Bearer OAuth Grant Type
pub(crate) const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Exchange endpoint used when the key does not declare one.
pub(crate) const OAUTH2_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
/// The `type` tag of a signing-capable service identity.
pub(crate) const SERVICE_ACCOUNT_KEY_TYPE: &str = "service_account";
