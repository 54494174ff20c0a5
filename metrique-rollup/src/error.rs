// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error types surfaced at construction and lifecycle boundaries.
//!
//! Nothing on the emit path returns these. Emitting is infallible from the caller's point of view: values that
//! can't be recorded are dropped and a rate-limited [`tracing`] event is logged instead.

use std::{borrow::Cow, error::Error, fmt};

/// A configuration value was rejected while building a table, strategy, bucket provider or reporter.
#[derive(Clone, PartialEq, Eq)]
pub struct ConfigError {
    reason: Cow<'static, str>,
}

impl ConfigError {
    /// Record a configuration failure with a reason string.
    pub fn invalid(reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Add the `name` of the offending setting as context.
    pub fn for_setting(self, name: &str) -> Self {
        Self::invalid(format!("for `{name}`: {}", self.reason))
    }

    /// The human readable reason.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConfigError").field(&self.reason).finish()
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration: {}", self.reason)
    }
}

impl Error for ConfigError {}

/// Returned when a [`TimeWindowReporter`](crate::window::TimeWindowReporter) is started or stopped out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// `start()` was called on a reporter that is already running.
    AlreadyStarted,
    /// `stop()` was called on a reporter that isn't running.
    NotStarted,
    /// The scheduler thread could not be spawned.
    SpawnFailed(std::io::ErrorKind),
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyStarted => f.write_str("reporter is already started"),
            Self::NotStarted => f.write_str("reporter is not started"),
            Self::SpawnFailed(kind) => write!(f, "failed to spawn reporter thread: {kind}"),
        }
    }
}

impl Error for LifecycleError {}

/// Returned by [`MetricRegistry`](crate::registry::MetricRegistry) when a name is reused for a different metric type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryError {
    pub(crate) name: String,
    pub(crate) registered: String,
    pub(crate) requested: String,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "metric `{}` is already registered as `{}`, cannot register it as `{}`",
            self.name, self.registered, self.requested
        )
    }
}

impl Error for RegistryError {}

/// An error returned by a [`ReportSink`](crate::report::ReportSink) while flushing a report cycle.
///
/// These are logged by the reporter and never propagate into the aggregation tables.
pub struct SinkError(Box<dyn Error + Send + Sync + 'static>);

impl SinkError {
    /// Wrap an arbitrary error.
    pub fn new(err: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        Self(err.into())
    }
}

impl fmt::Debug for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "report sink failed: {}", self.0)
    }
}

impl Error for SinkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&*self.0)
    }
}

impl From<std::io::Error> for SinkError {
    fn from(value: std::io::Error) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_context() {
        let err = ConfigError::invalid("must be positive").for_setting("max_capacity");
        assert_eq!(
            err.to_string(),
            "invalid configuration: for `max_capacity`: must be positive"
        );
    }

    #[test]
    fn sink_error_keeps_source() {
        let err = SinkError::from(std::io::Error::other("connection reset"));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("connection reset"));
    }
}
