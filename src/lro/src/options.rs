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

//! Configuration for the polling loop.
//!
//! Applications rarely need to change these options. The service controls the
//! polling frequency via the `Retry-After` header, and the engine waits for 30
//! seconds when the service provides no hint. Tests and latency-sensitive
//! applications may want to set a fixed interval.
//!
//! # Example
//! ```
//! # use azure_rest_lro::options::PollingOptions;
//! # use std::time::Duration;
//! let options = PollingOptions::default()
//!     .with_polling_interval(Duration::from_millis(500));
//! assert_eq!(options.polling_interval(), Some(Duration::from_millis(500)));
//! ```

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The interval used when neither the caller nor the service provide one.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(30);

/// Options controlling the polling loop.
#[derive(Clone, Debug)]
pub struct PollingOptions {
    polling_interval: Option<Duration>,
    default_interval: Duration,
    cancellation: CancellationToken,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            polling_interval: None,
            default_interval: DEFAULT_POLLING_INTERVAL,
            cancellation: CancellationToken::new(),
        }
    }
}

impl PollingOptions {
    /// Sets a fixed interval between status requests.
    ///
    /// A fixed interval takes priority over the `Retry-After` header returned
    /// by the service.
    pub fn set_polling_interval(&mut self, v: Duration) {
        self.polling_interval = Some(v);
    }

    /// Sets a fixed interval between status requests, in seconds.
    pub fn set_polling_interval_secs(&mut self, v: u64) {
        self.set_polling_interval(Duration::from_secs(v));
    }

    /// Sets the interval used when the service does not return a
    /// `Retry-After` header.
    pub fn set_default_interval(&mut self, v: Duration) {
        self.default_interval = v;
    }

    /// Sets the token used to cancel the polling loop.
    ///
    /// Cancelling the token interrupts any pending wait or status request.
    /// The loop then returns an error wrapping
    /// [Cancelled][crate::error::Cancelled].
    pub fn set_cancellation_token(&mut self, v: CancellationToken) {
        self.cancellation = v;
    }

    /// Returns a copy of the options with a fixed polling interval.
    pub fn with_polling_interval(mut self, v: Duration) -> Self {
        self.set_polling_interval(v);
        self
    }

    /// Returns a copy of the options with a fixed polling interval, in
    /// seconds.
    pub fn with_polling_interval_secs(mut self, v: u64) -> Self {
        self.set_polling_interval_secs(v);
        self
    }

    /// Returns a copy of the options with a new default interval.
    pub fn with_default_interval(mut self, v: Duration) -> Self {
        self.set_default_interval(v);
        self
    }

    /// Returns a copy of the options with a new cancellation token.
    pub fn with_cancellation_token(mut self, v: CancellationToken) -> Self {
        self.set_cancellation_token(v);
        self
    }

    /// The fixed interval between status requests, if any.
    pub fn polling_interval(&self) -> Option<Duration> {
        self.polling_interval
    }

    /// The interval used when the service does not return a hint.
    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }

    /// The token used to cancel the polling loop.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}
