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

//! The polling strategies.
//!
//! Azure services use three different conventions to report the progress of
//! a long-running operation. The engine selects one of them before each
//! status request, based on the links captured so far:
//!
//! - If the service returned an `Azure-AsyncOperation` header, poll that URL.
//!   Each response has a JSON body with a `status` field.
//! - Otherwise, if the service returned a `Location` header, poll that URL.
//!   The status code of each response reports the progress.
//! - Otherwise, for `PUT` and `PATCH` operations, poll the resource itself
//!   and examine its `properties.provisioningState` field.
//!
//! Selecting and classifying are pure functions, the driver performs the I/O.

use crate::Result;
use crate::error::{CloudError, Error, ProtocolError};
use crate::polling_state::{
    OperationStatus, PollingState, Semantics, parse_body, provisioning_state,
};
use crate::transport::{Request, Response};
use serde_json::Value;

/// The strategy used for the next status request, with its target URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollingStrategy {
    /// Poll the `Azure-AsyncOperation` link.
    AsyncOperation(String),
    /// Poll the `Location` link.
    Location(String),
    /// Poll the original resource URL.
    ResourceGet(String),
}

/// The information extracted from one status response.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    /// The status reported by the response.
    pub status: OperationStatus,
    /// The new representation of the resource, if the response includes one.
    pub resource: Option<Value>,
    /// If true, `resource` replaces the last known resource, even when it is
    /// `None`.
    ///
    /// Final `Location` responses without a body complete the operation with
    /// no result. Any body captured from earlier responses is stale.
    pub replaces_resource: bool,
    /// The error reported for a `Failed` or `Canceled` status.
    pub error: Option<CloudError>,
}

impl Observation {
    fn new(status: OperationStatus, resource: Option<Value>) -> Self {
        Self {
            status,
            resource,
            replaces_resource: false,
            error: None,
        }
    }

    fn with_resource(mut self, resource: Option<Value>) -> Self {
        self.resource = resource;
        self.replaces_resource = true;
        self
    }

    fn with_error_from(mut self, body: Option<&Value>) -> Self {
        if self.status.is_failure() {
            self.error = Some(CloudError::from_body(body, self.status));
        }
        self
    }
}

impl PollingStrategy {
    /// Selects the strategy for the next status request.
    ///
    /// The async-operation link takes priority over the location link. Without
    /// any links `PUT` and `PATCH` operations poll the original resource, while
    /// `POST` and `DELETE` operations have nothing to poll and fail.
    pub fn select(state: &PollingState, semantics: Semantics) -> Result<Self> {
        if let Some(link) = state.async_operation_link() {
            return Ok(Self::AsyncOperation(link.to_string()));
        }
        if let Some(link) = state.location_link() {
            return Ok(Self::Location(link.to_string()));
        }
        match semantics {
            Semantics::PutOrPatch => Ok(Self::ResourceGet(state.resource_url().to_string())),
            Semantics::PostOrDelete => Err(Error::protocol(ProtocolError::MissingLocation)),
        }
    }

    /// The URL polled by this strategy.
    pub fn url(&self) -> &str {
        match self {
            Self::AsyncOperation(u) | Self::Location(u) | Self::ResourceGet(u) => u,
        }
    }

    /// The name of the strategy, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AsyncOperation(_) => "async-operation",
            Self::Location(_) => "location",
            Self::ResourceGet(_) => "resource-get",
        }
    }

    /// The status request for this strategy.
    pub fn request(&self) -> Request {
        Request::get(self.url())
    }

    /// Classifies a status response.
    ///
    /// Responses with a status code outside of 200, 201, 202 and 204 are
    /// returned as [http][Error::http] errors. Responses missing a required
    /// body or status field are protocol errors.
    pub fn classify(&self, semantics: Semantics, response: &Response) -> Result<Observation> {
        if !matches!(response.status.as_u16(), 200 | 201 | 202 | 204) {
            return Err(Error::http(
                response.status.as_u16(),
                response.headers.clone(),
                response.body.clone(),
            ));
        }
        let body = parse_body(response)?;
        match self {
            Self::AsyncOperation(_) => classify_async_operation(semantics, body),
            Self::Location(_) => Ok(classify_location(semantics, response, body)),
            Self::ResourceGet(_) => classify_resource(body),
        }
    }
}

fn classify_async_operation(semantics: Semantics, body: Option<Value>) -> Result<Observation> {
    let body = body.ok_or_else(|| Error::protocol(ProtocolError::MissingBody))?;
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .map(OperationStatus::from_service)
        .ok_or_else(|| Error::protocol(ProtocolError::MissingStatus))?;
    let observation = Observation::new(status, None).with_error_from(Some(&body));
    Ok(match semantics {
        Semantics::PostOrDelete => observation.with_resource(Some(body)),
        Semantics::PutOrPatch => observation,
    })
}

fn classify_location(semantics: Semantics, response: &Response, body: Option<Value>) -> Observation {
    if response.status.as_u16() == 202 {
        return Observation::new(OperationStatus::InProgress, None);
    }
    let status = match semantics {
        Semantics::PutOrPatch => body
            .as_ref()
            .and_then(provisioning_state)
            .map(OperationStatus::from_service)
            .unwrap_or(OperationStatus::Succeeded),
        Semantics::PostOrDelete => OperationStatus::Succeeded,
    };
    Observation::new(status, None)
        .with_error_from(body.as_ref())
        .with_resource(body)
}

fn classify_resource(body: Option<Value>) -> Result<Observation> {
    let body = body.ok_or_else(|| Error::protocol(ProtocolError::MissingBody))?;
    let status = provisioning_state(&body)
        .map(OperationStatus::from_service)
        .unwrap_or(OperationStatus::Succeeded);
    Ok(Observation::new(status, None)
        .with_error_from(Some(&body))
        .with_resource(Some(body)))
}
