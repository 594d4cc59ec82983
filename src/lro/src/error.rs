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

//! The error types returned by the long-running operation engine.

use crate::polling_state::OperationStatus;
use crate::transport::Request;
use http::HeaderMap;
use std::error::Error as StdError;

type BoxError = Box<dyn StdError + Send + Sync>;

/// The core error returned by the long-running operation engine.
///
/// The engine reports errors from multiple sources. The service may violate
/// the polling protocol, a response body may not be valid JSON, the operation
/// may complete with a `Failed` or `Canceled` status, the transport may be
/// unable to send a status request, or the caller may cancel the loop.
///
/// Most applications will just return the error or log it. Applications that
/// need more details can use the predicates to determine the error kind, and
/// the accessors to query the last request and response observed by the
/// engine.
///
/// # Example
/// ```
/// use azure_rest_lro::error::Error;
/// fn handle(e: Error) {
///     if let Some(cloud) = e.cloud_error() {
///         println!("the operation failed with {}: {}", cloud.code, cloud.message);
///     } else if e.is_protocol() {
///         println!("the service misbehaved: {e}");
///     } else {
///         println!("some other error {e}");
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<BoxError>,
}

impl Error {
    /// Creates an error representing a polling protocol violation.
    ///
    /// # Example
    /// ```
    /// use azure_rest_lro::error::{Error, ProtocolError};
    /// let error = Error::protocol(ProtocolError::UnexpectedStatusCode(409));
    /// assert!(error.is_protocol());
    /// assert!(error.to_string().contains("409"));
    /// ```
    pub fn protocol(e: ProtocolError) -> Self {
        Self {
            kind: ErrorKind::Protocol,
            source: Some(e.into()),
        }
    }

    /// The service response did not follow the long-running operation
    /// protocol.
    ///
    /// # Troubleshooting
    ///
    /// The initial response may have an unexpected status code, a polled
    /// response may be missing a required body, or a POST or DELETE operation
    /// may have returned neither an `Azure-AsyncOperation` nor a `Location`
    /// header. These errors are never transient, polling again would not help.
    pub fn is_protocol(&self) -> bool {
        matches!(self.kind, ErrorKind::Protocol)
    }

    /// The protocol violation details, if this is a protocol error.
    pub fn protocol_error(&self) -> Option<&ProtocolError> {
        match self.kind {
            ErrorKind::Protocol => self
                .source
                .as_ref()
                .and_then(|e| e.downcast_ref::<ProtocolError>()),
            _ => None,
        }
    }

    /// Creates an error representing a body that could not be parsed.
    ///
    /// The raw body is retained for troubleshooting, see
    /// [http_payload][Error::http_payload].
    ///
    /// # Example
    /// ```
    /// use std::error::Error as _;
    /// use azure_rest_lro::error::Error;
    /// let payload = bytes::Bytes::from_static(b"not-json");
    /// let source = serde_json::from_slice::<serde_json::Value>(&payload).unwrap_err();
    /// let error = Error::deser(payload.clone(), source);
    /// assert!(error.is_deserialization());
    /// assert_eq!(error.http_payload(), Some(&payload));
    /// assert!(error.source().is_some());
    /// ```
    pub fn deser<T: Into<BoxError>>(payload: bytes::Bytes, source: T) -> Self {
        Self {
            kind: ErrorKind::Deserialization(payload),
            source: Some(source.into()),
        }
    }

    /// The response body could not be deserialized.
    ///
    /// # Troubleshooting
    ///
    /// The service returned a non-empty body that is not valid JSON. Examine
    /// the [payload][Error::http_payload] to find the problem. Proxies and
    /// load balancers sometimes return HTML pages instead of the service
    /// response.
    pub fn is_deserialization(&self) -> bool {
        matches!(self.kind, ErrorKind::Deserialization(_))
    }

    /// Creates an error representing a timeout in the transport.
    pub fn timeout<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            source: Some(source.into()),
        }
    }

    /// The status request could not be completed before its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Creates an error representing a full HTTP response with a status code
    /// the engine cannot handle.
    pub fn http(status_code: u16, headers: HeaderMap, payload: bytes::Bytes) -> Self {
        let details = TransportDetails {
            status_code: Some(status_code),
            headers: Some(headers),
            payload: Some(payload),
        };
        Self {
            kind: ErrorKind::Transport(Box::new(details)),
            source: None,
        }
    }

    /// Creates an error representing a transport problem without a full HTTP
    /// response.
    ///
    /// Examples include: a broken connection after the request is sent, or a
    /// failure to resolve the host name in a polling link.
    pub fn io<T: Into<BoxError>>(source: T) -> Self {
        let details = TransportDetails {
            status_code: None,
            headers: None,
            payload: None,
        };
        Self {
            kind: ErrorKind::Transport(Box::new(details)),
            source: Some(source.into()),
        }
    }

    /// A problem in the transport layer without a full HTTP response.
    pub fn is_io(&self) -> bool {
        matches!(
        &self.kind,
        ErrorKind::Transport(d) if matches!(**d, TransportDetails {
            status_code: None,
            headers: None,
            payload: None,
        }))
    }

    /// A problem reported by the transport layer.
    ///
    /// # Troubleshooting
    ///
    /// The engine does not retry status requests. A single transport error
    /// aborts the polling loop. Applications that want to tolerate transient
    /// network problems should retry the whole operation, or use the
    /// [Poller][crate::Poller] interface and decide on each error.
    pub fn is_transport(&self) -> bool {
        matches!(&self.kind, ErrorKind::Transport(_))
    }

    /// Creates an error representing a cancellation requested by the caller.
    ///
    /// # Example
    /// ```
    /// use azure_rest_lro::error::Error;
    /// let error = Error::cancelled();
    /// assert!(error.is_cancelled());
    /// ```
    pub fn cancelled() -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            source: Some(Cancelled.into()),
        }
    }

    /// The caller cancelled the polling loop before it reached a terminal
    /// state.
    ///
    /// This is true for the bare cancellation error, and for the
    /// [aborted][Error::is_aborted] errors wrapping it.
    pub fn is_cancelled(&self) -> bool {
        match &self.kind {
            ErrorKind::Cancelled => true,
            ErrorKind::Aborted(_) => self
                .source
                .as_ref()
                .and_then(|e| e.downcast_ref::<Error>())
                .is_some_and(|e| e.is_cancelled()),
            _ => false,
        }
    }

    pub(crate) fn operation_failed(details: OperationDetails) -> Self {
        Self {
            kind: ErrorKind::OperationFailed(Box::new(details)),
            source: None,
        }
    }

    /// The long-running operation completed with a `Failed` or `Canceled`
    /// status.
    ///
    /// # Troubleshooting
    ///
    /// The service accepted the request, but could not complete it. The
    /// [cloud_error][Error::cloud_error] contains the code and message
    /// reported by the service. Consult the service documentation for the
    /// meaning of the code.
    pub fn is_operation_failed(&self) -> bool {
        matches!(self.kind, ErrorKind::OperationFailed(_))
    }

    pub(crate) fn aborted(details: OperationDetails, cause: Error) -> Self {
        Self {
            kind: ErrorKind::Aborted(Box::new(details)),
            source: Some(cause.into()),
        }
    }

    /// The polling loop was interrupted by a lower-level error before the
    /// operation reached a terminal status.
    ///
    /// The [source][std::error::Error::source] is the interrupting error.
    pub fn is_aborted(&self) -> bool {
        matches!(self.kind, ErrorKind::Aborted(_))
    }

    /// The last status observed for the operation, if known.
    pub fn operation_status(&self) -> Option<OperationStatus> {
        self.operation_details().map(|d| d.status)
    }

    /// The error reported by the service for a failed operation.
    ///
    /// Only operations that completed with a `Failed` or `Canceled` status
    /// have this information. If the service did not include an `error`
    /// object in the response, the engine synthesizes one from the status.
    pub fn cloud_error(&self) -> Option<&CloudError> {
        self.operation_details().and_then(|d| d.cloud_error.as_ref())
    }

    /// The last status request sent by the engine, if any.
    pub fn request(&self) -> Option<&Request> {
        self.operation_details().map(|d| &d.request)
    }

    /// The parsed body of the last response, if any.
    pub fn response_body(&self) -> Option<&serde_json::Value> {
        self.operation_details().and_then(|d| d.body.as_ref())
    }

    /// The HTTP status code, if any, associated with this error.
    pub fn http_status_code(&self) -> Option<u16> {
        match &self.kind {
            ErrorKind::Transport(d) => d.status_code,
            ErrorKind::OperationFailed(d) | ErrorKind::Aborted(d) => Some(d.status_code),
            _ => None,
        }
    }

    /// The headers, if any, associated with this error.
    pub fn http_headers(&self) -> Option<&HeaderMap> {
        match &self.kind {
            ErrorKind::Transport(d) => d.headers.as_ref(),
            ErrorKind::OperationFailed(d) | ErrorKind::Aborted(d) => Some(&d.headers),
            _ => None,
        }
    }

    /// The raw payload, if any, associated with this error.
    pub fn http_payload(&self) -> Option<&bytes::Bytes> {
        match &self.kind {
            ErrorKind::Transport(d) => d.payload.as_ref(),
            ErrorKind::Deserialization(p) => Some(p),
            ErrorKind::OperationFailed(d) | ErrorKind::Aborted(d) => Some(&d.payload),
            _ => None,
        }
    }

    fn operation_details(&self) -> Option<&OperationDetails> {
        match &self.kind {
            ErrorKind::OperationFailed(d) | ErrorKind::Aborted(d) => Some(d.as_ref()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.source) {
            (ErrorKind::Protocol, Some(e)) => write!(f, "{e}"),
            (ErrorKind::Deserialization(_), Some(e)) => {
                write!(f, "cannot deserialize the response body {e}")
            }
            (ErrorKind::Timeout, Some(e)) => {
                write!(f, "the status request exceeded its deadline {e}")
            }
            (ErrorKind::Cancelled, Some(e)) => write!(f, "{e}"),
            (ErrorKind::Transport(details), _) => details.display(self.source(), f),
            (ErrorKind::OperationFailed(d), _) => match &d.cloud_error {
                Some(e) => write!(
                    f,
                    "the long running operation completed with status {}, code {}: {}",
                    d.status, e.code, e.message
                ),
                None => write!(
                    f,
                    "the long running operation completed with status {}",
                    d.status
                ),
            },
            (ErrorKind::Aborted(_), Some(e)) => {
                write!(f, "the long running operation was aborted: {e}")
            }
            (_, None) => unreachable!("no constructor allows this"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error))
    }
}

/// The ways in which a service response can violate the long-running
/// operation protocol.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The initial response status code is not valid for the operation.
    #[error("Unexpected polling status code from long running operation '{0}'")]
    UnexpectedStatusCode(u16),
    /// A polled response required a body, but none was received.
    #[error("The response from long running operation does not contain a body.")]
    MissingBody,
    /// An async-operation response did not include a `status` field.
    #[error("The response from long running operation does not contain a body with a status field.")]
    MissingStatus,
    /// A POST or DELETE operation returned no polling links.
    #[error("Location header is missing from long running operation.")]
    MissingLocation,
    /// The initiating request uses a method without long-running semantics.
    #[error("The HTTP method {0} does not start a long running operation.")]
    UnexpectedMethod(http::Method),
}

/// The cancellation requested by the caller, found in the error
/// [source][std::error::Error::source] chain.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("the long running operation was cancelled before reaching a terminal state")]
pub struct Cancelled;

/// The error details reported by the service for a failed operation.
///
/// Services report these details in the `error` object of the terminal
/// response body, for example:
///
/// ```json
/// { "status": "Failed", "error": { "code": "Conflict", "message": "..." } }
/// ```
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct CloudError {
    /// The service-specific error code.
    pub code: String,
    /// A human-readable description of the error.
    pub message: String,
}

impl CloudError {
    /// Sets the value of [code][CloudError::code].
    pub fn set_code<T: Into<String>>(mut self, v: T) -> Self {
        self.code = v.into();
        self
    }

    /// Sets the value of [message][CloudError::message].
    pub fn set_message<T: Into<String>>(mut self, v: T) -> Self {
        self.message = v.into();
        self
    }

    /// The error synthesized when the service does not report one.
    pub(crate) fn for_status(status: OperationStatus) -> Self {
        Self::default()
            .set_code(status.name())
            .set_message(format!(
                "Long running operation failed with status: '{status}'."
            ))
    }

    /// Extracts the error from a terminal response body.
    pub(crate) fn from_body(body: Option<&serde_json::Value>, status: OperationStatus) -> Self {
        body.and_then(|b| b.get("error"))
            .and_then(|e| serde_json::from_value::<CloudError>(e.clone()).ok())
            .filter(|e| !e.code.is_empty() || !e.message.is_empty())
            .unwrap_or_else(|| Self::for_status(status))
    }
}

/// The type of error held by an [Error] instance.
#[derive(Debug)]
enum ErrorKind {
    Protocol,
    Deserialization(bytes::Bytes),
    Timeout,
    Cancelled,
    Transport(Box<TransportDetails>),
    OperationFailed(Box<OperationDetails>),
    Aborted(Box<OperationDetails>),
}

#[derive(Debug)]
struct TransportDetails {
    status_code: Option<u16>,
    headers: Option<HeaderMap>,
    payload: Option<bytes::Bytes>,
}

impl TransportDetails {
    fn display(
        &self,
        source: Option<&(dyn StdError + 'static)>,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match (source, &self) {
            (
                _,
                TransportDetails {
                    status_code: Some(code),
                    payload: Some(p),
                    ..
                },
            ) => {
                if let Ok(message) = std::str::from_utf8(p.as_ref()) {
                    write!(f, "the HTTP transport reports a [{code}] error: {message}")
                } else {
                    write!(f, "the HTTP transport reports a [{code}] error: {p:?}")
                }
            }
            (Some(source), _) => {
                write!(f, "the transport reports an error: {source}")
            }
            (None, _) => unreachable!("no Error constructor allows this"),
        }
    }
}

/// The last request and response observed by the polling loop.
#[derive(Debug)]
pub(crate) struct OperationDetails {
    pub(crate) status: OperationStatus,
    pub(crate) cloud_error: Option<CloudError>,
    pub(crate) request: Request,
    pub(crate) status_code: u16,
    pub(crate) headers: HeaderMap,
    pub(crate) payload: bytes::Bytes,
    pub(crate) body: Option<serde_json::Value>,
}
