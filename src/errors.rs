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

//! Errors created while resolving credentials, exchanging tokens, or
//! forwarding requests.

use http::StatusCode;
use std::sync::Arc;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
type SharedSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The error type for the authenticating transport and its token source.
///
/// Each error identifies the phase that failed. Use the `is_*` predicates to
/// distinguish them:
///
/// * [is_discovery][Error::is_discovery] - no signing credential was found.
/// * [is_format][Error::is_format] - a credential was found, but it is not a
///   signing-capable service identity or it is missing required fields.
/// * [is_exchange][Error::is_exchange] - the token exchange endpoint rejected
///   the assertion or was unreachable.
/// * [is_cancelled][Error::is_cancelled] - a caller-supplied deadline elapsed
///   before the operation completed.
/// * [is_uninitialized][Error::is_uninitialized] - the transport was used
///   without a target audience. This signals a bug in the calling code, not
///   a problem with the environment.
/// * [is_transport][Error::is_transport] - the request failed in the
///   underlying transport after it was decorated; the cause is preserved
///   unmodified.
///
/// No failure is retried internally. [is_transient][Error::is_transient]
/// reports whether a retry by the application may succeed.
#[derive(Clone, Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    /// No signing credential could be found in the environment.
    pub fn is_discovery(&self) -> bool {
        matches!(self.0, ErrorKind::Discovery(_))
    }

    /// A credential was found but has the wrong kind or shape for signing.
    pub fn is_format(&self) -> bool {
        matches!(self.0, ErrorKind::Format(_))
    }

    /// The token exchange endpoint rejected the assertion or was unreachable.
    pub fn is_exchange(&self) -> bool {
        matches!(self.0, ErrorKind::Exchange { .. })
    }

    /// A caller-supplied deadline elapsed before the operation completed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.0, ErrorKind::Cancelled(_))
    }

    /// The transport was used without a configured target audience.
    pub fn is_uninitialized(&self) -> bool {
        matches!(self.0, ErrorKind::Uninitialized)
    }

    /// The delegated request failed in the underlying transport.
    pub fn is_transport(&self) -> bool {
        matches!(self.0, ErrorKind::Transport(_))
    }

    /// Returns `true` if retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.0,
            ErrorKind::Exchange {
                transient: true,
                ..
            }
        )
    }

    pub(crate) fn discovery<T: Into<BoxError>>(source: T) -> Self {
        Error(ErrorKind::Discovery(shared(source)))
    }

    pub(crate) fn format<T: Into<BoxError>>(source: T) -> Self {
        Error(ErrorKind::Format(shared(source)))
    }

    pub(crate) fn exchange<T: Into<BoxError>>(transient: bool, source: T) -> Self {
        Error(ErrorKind::Exchange {
            transient,
            source: shared(source),
        })
    }

    pub(crate) fn cancelled<T: Into<BoxError>>(source: T) -> Self {
        Error(ErrorKind::Cancelled(shared(source)))
    }

    pub(crate) fn uninitialized() -> Self {
        Error(ErrorKind::Uninitialized)
    }

    pub(crate) fn transport<T: Into<BoxError>>(source: T) -> Self {
        Error(ErrorKind::Transport(shared(source)))
    }
}

fn shared<T: Into<BoxError>>(source: T) -> SharedSource {
    source.into().into()
}

#[derive(Clone, Debug, thiserror::Error)]
enum ErrorKind {
    #[error("could not find a signing credential, {0}")]
    Discovery(#[source] SharedSource),
    #[error("the credential cannot be used for signing, {0}")]
    Format(#[source] SharedSource),
    #[error("the token exchange failed, {source}")]
    Exchange {
        transient: bool,
        #[source]
        source: SharedSource,
    },
    #[error("the operation was cancelled, {0}")]
    Cancelled(#[source] SharedSource),
    #[error("the transport was used before initialization, no target audience is configured")]
    Uninitialized,
    #[error("the request failed in the underlying transport, {0}")]
    Transport(#[source] SharedSource),
}

pub(crate) fn is_retryable(c: StatusCode) -> bool {
    match c {
        // Internal server errors do not indicate that there is anything wrong
        // with our request, so we retry them.
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use test_case::test_case;

    #[test_case(StatusCode::INTERNAL_SERVER_ERROR)]
    #[test_case(StatusCode::SERVICE_UNAVAILABLE)]
    #[test_case(StatusCode::REQUEST_TIMEOUT)]
    #[test_case(StatusCode::TOO_MANY_REQUESTS)]
    fn retryable(c: StatusCode) {
        assert!(is_retryable(c));
    }

    #[test_case(StatusCode::NOT_FOUND)]
    #[test_case(StatusCode::UNAUTHORIZED)]
    #[test_case(StatusCode::BAD_REQUEST)]
    #[test_case(StatusCode::BAD_GATEWAY)]
    #[test_case(StatusCode::PRECONDITION_FAILED)]
    fn non_retryable(c: StatusCode) {
        assert!(!is_retryable(c));
    }

    #[test]
    fn constructors() {
        let error = Error::discovery("test-only-msg");
        assert!(error.is_discovery(), "{error:?}");
        assert!(!error.is_transient(), "{error:?}");
        assert!(error.source().is_some(), "{error:?}");
        assert!(error.to_string().contains("test-only-msg"), "{error}");

        let error = Error::format("test-only-msg");
        assert!(error.is_format(), "{error:?}");
        assert!(!error.is_transient(), "{error:?}");
        assert!(error.to_string().contains("test-only-msg"), "{error}");

        let error = Error::cancelled("test-only-msg");
        assert!(error.is_cancelled(), "{error:?}");
        assert!(!error.is_transient(), "{error:?}");
        assert!(error.to_string().contains("test-only-msg"), "{error}");

        let error = Error::transport("test-only-msg");
        assert!(error.is_transport(), "{error:?}");
        assert!(!error.is_transient(), "{error:?}");
        assert!(error.to_string().contains("test-only-msg"), "{error}");
    }

    #[test]
    fn exchange_transient_flag() {
        let error = Error::exchange(true, "test-only-msg");
        assert!(error.is_exchange(), "{error:?}");
        assert!(error.is_transient(), "{error:?}");

        let error = Error::exchange(false, "test-only-msg");
        assert!(error.is_exchange(), "{error:?}");
        assert!(!error.is_transient(), "{error:?}");
    }

    #[test]
    fn uninitialized() {
        let error = Error::uninitialized();
        assert!(error.is_uninitialized(), "{error:?}");
        assert!(!error.is_transient(), "{error:?}");
        assert!(error.source().is_none(), "{error:?}");
        assert!(error.to_string().contains("no target audience"), "{error}");
    }

    #[test]
    fn source_chain_preserved() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "test-only-io");
        let error = Error::discovery(inner);
        let source = error
            .source()
            .and_then(|e| e.downcast_ref::<std::io::Error>());
        assert!(source.is_some(), "{error:?}");
    }
}
