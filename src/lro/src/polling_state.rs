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

//! The state of one in-flight long-running operation.
//!
//! A [PollingState] is created from the response to the initiating request,
//! and updated with each status response. It records the status, the polling
//! links returned by the service, the last known representation of the
//! resource, and the timing hints used to schedule the next status request.

use crate::Result;
use crate::error::{CloudError, Error, OperationDetails, ProtocolError};
use crate::options::PollingOptions;
use crate::strategy::Observation;
use crate::transport::{Request, Response};
use http::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// The header containing the async-operation polling link.
pub const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";
/// The header containing the location polling link.
pub const LOCATION: &str = "location";
/// The header containing the delay, in seconds, before the next status request.
pub const RETRY_AFTER: &str = "retry-after";

/// The status of a long-running operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationStatus {
    /// The operation has not completed. This includes any custom intermediate
    /// state reported by the service, such as `Creating` or `Updating`.
    InProgress,
    /// The operation completed successfully.
    Succeeded,
    /// The operation completed with an error.
    Failed,
    /// The operation was canceled by the service or another client.
    Canceled,
}

impl OperationStatus {
    /// Maps a status string reported by the service.
    ///
    /// The match is case-sensitive. Only `Succeeded`, `Failed`, and `Canceled`
    /// are terminal, any other value is treated as in progress.
    pub fn from_service(value: &str) -> Self {
        match value {
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Canceled" => Self::Canceled,
            _ => Self::InProgress,
        }
    }

    /// Derives the status from the status code of a response without a
    /// provisioning state.
    pub fn from_status_code(code: StatusCode) -> Self {
        match code.as_u16() {
            202 => Self::InProgress,
            200 | 201 | 204 => Self::Succeeded,
            _ => Self::Failed,
        }
    }

    /// Returns true if the polling loop stops at this status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }

    /// Returns true if the operation completed unsuccessfully.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Canceled)
    }

    /// The name used by the service for this status.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InProgress => "InProgress",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The polling semantics of an operation.
///
/// The semantics are determined by the method of the initiating request. They
/// control which initial status codes are valid, how the resource is
/// extracted from status responses, and whether the original resource URL
/// can be polled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Semantics {
    /// `PUT` and `PATCH` requests create or update a resource at the request
    /// URL.
    PutOrPatch,
    /// `POST` and `DELETE` requests have no resource to fall back to.
    PostOrDelete,
}

impl Semantics {
    /// Determines the semantics from the method of the initiating request.
    pub fn from_method(method: &Method) -> Result<Self> {
        if *method == Method::PUT || *method == Method::PATCH {
            return Ok(Self::PutOrPatch);
        }
        if *method == Method::POST || *method == Method::DELETE {
            return Ok(Self::PostOrDelete);
        }
        Err(Error::protocol(ProtocolError::UnexpectedMethod(
            method.clone(),
        )))
    }

    /// Returns true if `code` is a valid status code for the initiating
    /// response.
    pub fn accepts_initial(&self, code: StatusCode) -> bool {
        match self {
            Self::PutOrPatch => matches!(code.as_u16(), 200 | 201 | 202),
            Self::PostOrDelete => matches!(code.as_u16(), 200 | 202 | 204),
        }
    }
}

impl std::fmt::Display for Semantics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PutOrPatch => f.write_str("PUT/PATCH"),
            Self::PostOrDelete => f.write_str("POST/DELETE"),
        }
    }
}

/// The result of a successful long-running operation.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationResult {
    request: Request,
    response: Response,
    body: Option<Value>,
}

impl OperationResult {
    /// The last request sent while polling the operation.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The last response received while polling the operation.
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// The final representation of the resource, if the service returned
    /// one.
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Consumes the result, returning the final resource.
    pub fn into_body(self) -> Option<Value> {
        self.body
    }
}

/// Tracks one in-flight long-running operation.
#[derive(Clone, Debug)]
pub struct PollingState {
    status: OperationStatus,
    resource: Option<Value>,
    error: Option<CloudError>,
    async_operation_link: Option<String>,
    location_link: Option<String>,
    retry_after: Option<u64>,
    polling_interval: Option<Duration>,
    default_interval: Duration,
    resource_url: String,
    last_request: Request,
    last_response: Response,
}

impl PollingState {
    /// Creates the state from the initiating request and its response.
    ///
    /// Fails if the response status code is not valid for the `semantics`, or
    /// if the response body is not valid JSON.
    pub fn new(
        semantics: Semantics,
        request: Request,
        response: Response,
        options: &PollingOptions,
    ) -> Result<Self> {
        if !semantics.accepts_initial(response.status) {
            return Err(Error::protocol(ProtocolError::UnexpectedStatusCode(
                response.status.as_u16(),
            )));
        }
        let body = parse_body(&response)?;
        let status = match body.as_ref().and_then(provisioning_state) {
            Some(s) => OperationStatus::from_service(s),
            None => OperationStatus::from_status_code(response.status),
        };
        let error = status
            .is_failure()
            .then(|| CloudError::from_body(body.as_ref(), status));
        let mut state = Self {
            status,
            resource: body,
            error,
            async_operation_link: None,
            location_link: None,
            retry_after: None,
            polling_interval: options.polling_interval(),
            default_interval: options.default_interval(),
            resource_url: request.url.clone(),
            last_request: request.clone(),
            last_response: response.clone(),
        };
        state.update_from_response(request, response);
        Ok(state)
    }

    /// Records a new status request and its response.
    ///
    /// This only performs the bookkeeping common to all polling strategies.
    /// Polling links are replaced only when the response includes a new value
    /// for the same header. The `Retry-After` hint always reflects the most
    /// recent response.
    pub fn update_from_response(&mut self, request: Request, response: Response) {
        if let Some(link) = response.header_str(AZURE_ASYNC_OPERATION) {
            self.async_operation_link = Some(link.to_string());
        }
        if let Some(link) = response.header_str(LOCATION) {
            self.location_link = Some(link.to_string());
        }
        self.retry_after = response
            .header_str(RETRY_AFTER)
            .and_then(|v| v.trim().parse::<u64>().ok());
        self.last_request = request;
        self.last_response = response;
    }

    /// Applies the classification of the last status response.
    ///
    /// Terminal states are final: once the operation succeeded, failed, or was
    /// canceled only the resource can change.
    pub fn apply(&mut self, observation: Observation) {
        if observation.replaces_resource {
            self.resource = observation.resource;
        } else if let Some(resource) = observation.resource {
            self.resource = Some(resource);
        }
        if self.status.is_terminal() {
            return;
        }
        self.status = observation.status;
        if self.status.is_failure() {
            self.error = Some(
                observation
                    .error
                    .unwrap_or_else(|| CloudError::for_status(self.status)),
            );
        }
    }

    /// The current status.
    pub fn status(&self) -> OperationStatus {
        self.status
    }

    /// The last known representation of the resource.
    pub fn resource(&self) -> Option<&Value> {
        self.resource.as_ref()
    }

    /// The error reported for a `Failed` or `Canceled` operation.
    pub fn error(&self) -> Option<&CloudError> {
        self.error.as_ref()
    }

    /// The link from the most recent `Azure-AsyncOperation` header.
    pub fn async_operation_link(&self) -> Option<&str> {
        self.async_operation_link.as_deref()
    }

    /// The link from the most recent `Location` header.
    pub fn location_link(&self) -> Option<&str> {
        self.location_link.as_deref()
    }

    /// The URL of the initiating request.
    pub fn resource_url(&self) -> &str {
        &self.resource_url
    }

    /// The `Retry-After` value, in seconds, of the most recent response.
    pub fn retry_after(&self) -> Option<u64> {
        self.retry_after
    }

    /// The most recent request.
    pub fn last_request(&self) -> &Request {
        &self.last_request
    }

    /// The most recent response.
    pub fn last_response(&self) -> &Response {
        &self.last_response
    }

    /// Returns true if the resource must be fetched before the operation
    /// can be reported as successful.
    ///
    /// This happens when no resource body was captured, or when the captured
    /// body still reports a non-terminal provisioning state.
    pub fn needs_resource(&self) -> bool {
        match &self.resource {
            None => true,
            Some(r) => provisioning_state(r)
                .is_some_and(|s| !OperationStatus::from_service(s).is_terminal()),
        }
    }

    /// The time to wait before the next status request.
    ///
    /// In order of priority this is the fixed interval configured by the
    /// caller, the `Retry-After` value of the last response, or the default
    /// interval (30 seconds unless configured otherwise).
    pub fn timeout(&self) -> Duration {
        self.polling_interval
            .or_else(|| self.retry_after.map(Duration::from_secs))
            .unwrap_or(self.default_interval)
    }

    /// The time to wait before the next status request, in milliseconds.
    pub fn timeout_millis(&self) -> u64 {
        u64::try_from(self.timeout().as_millis()).unwrap_or(u64::MAX)
    }

    /// Consumes the state, returning the final result or the error.
    ///
    /// Only `Succeeded` operations produce a result. Any other status produces
    /// the same error as [to_error(None)][PollingState::to_error].
    pub fn into_result(self) -> Result<OperationResult> {
        match self.status {
            OperationStatus::Succeeded => Ok(OperationResult {
                request: self.last_request,
                response: self.last_response,
                body: self.resource,
            }),
            _ => Err(self.to_error(None)),
        }
    }

    /// Creates the error for this state.
    ///
    /// Without a `cause` the error names the terminal status and includes the
    /// error reported by the service. With a `cause` the loop was interrupted
    /// before reaching a terminal status, and the error wraps the cause.
    pub fn to_error(&self, cause: Option<Error>) -> Error {
        let details = OperationDetails {
            status: self.status,
            cloud_error: self.error.clone(),
            request: self.last_request.clone(),
            status_code: self.last_response.status.as_u16(),
            headers: self.last_response.headers.clone(),
            payload: self.last_response.body.clone(),
            body: parse_body(&self.last_response).ok().flatten(),
        };
        match cause {
            None => Error::operation_failed(details),
            Some(c) => Error::aborted(details, c),
        }
    }
}

/// Parses a response body as JSON.
///
/// Empty bodies, including bodies with only whitespace, produce `None`.
pub(crate) fn parse_body(response: &Response) -> Result<Option<Value>> {
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice::<Value>(&response.body)
        .map(Some)
        .map_err(|e| Error::deser(response.body.clone(), e))
}

/// Extracts `properties.provisioningState` from a resource body.
pub(crate) fn provisioning_state(body: &Value) -> Option<&str> {
    body.get("properties")?.get("provisioningState")?.as_str()
}
