//! Error handling for lapsync.
//!
//! This module provides:
//! - A single error type carrying a machine-readable [`ErrorCode`]
//! - Severity classification that drives logging level
//! - Structured details for log output
//! - Metrics integration for error tracking
//!
//! Most errors in this crate are local: a malformed inbound delta is dropped
//! and logged, a caller that breaks the merge algebra's preconditions gets an
//! `Err` back before any work is done. Nothing here ever causes a replica to
//! diverge permanently; the worst handled outcome is a replica that lags.
//!
//! # Usage
//!
//! ```rust,ignore
//! use lapsync_core::error::{SyncError, Result, ErrorContext};
//!
//! fn load(bytes: &[u8]) -> Result<serde_json::Value> {
//!     serde_json::from_slice(bytes).with_error_code(ErrorCode::DecodeError)
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for lapsync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Algebra Errors (1000-1099)
    EmptyInput,
    OrderingViolation,

    // Codec Errors (1100-1199)
    DecodeError,
    EncodeError,
    SerializationError,

    // Transport Errors (1200-1299)
    UnknownChannel,
    DuplicateChannel,
    TransportError,
    StaleCatchUp,

    // Model Errors (1300-1399)
    InvalidWatchIndex,

    // Persistence Errors (2000-2099)
    PersistenceError,

    // Configuration Errors (5000-5099)
    ConfigurationError,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::EmptyInput => 1000,
            Self::OrderingViolation => 1001,

            Self::DecodeError => 1100,
            Self::EncodeError => 1101,
            Self::SerializationError => 1102,

            Self::UnknownChannel => 1200,
            Self::DuplicateChannel => 1201,
            Self::TransportError => 1202,
            Self::StaleCatchUp => 1203,

            Self::InvalidWatchIndex => 1300,

            Self::PersistenceError => 2000,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Whether the condition clears up on its own as more messages arrive.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StaleCatchUp | Self::TransportError | Self::UnknownChannel
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "algebra",
            1100..=1199 => "codec",
            1200..=1299 => "transport",
            1300..=1399 => "model",
            2000..=2099 => "persistence",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected noise on an unreliable network (stale catch-up, unknown channel)
    Low,
    /// Bad input from a peer or the caller; dropped without touching state
    Medium,
    /// Local I/O or configuration failure
    High,
    /// Broken programming contract
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::StaleCatchUp | ErrorCode::UnknownChannel => Self::Low,

            ErrorCode::DecodeError
            | ErrorCode::EncodeError
            | ErrorCode::SerializationError
            | ErrorCode::InvalidWatchIndex
            | ErrorCode::DuplicateChannel => Self::Medium,

            ErrorCode::TransportError
            | ErrorCode::PersistenceError
            | ErrorCode::ConfigurationError => Self::High,

            ErrorCode::EmptyInput
            | ErrorCode::OrderingViolation
            | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Channel the error relates to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for lapsync.
#[derive(Error, Debug)]
pub struct SyncError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Human-readable message
    message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl SyncError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both public and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// An inbound value could not be decoded into the container's native type.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DecodeError, format!("Failed to decode value: {}", message.into()))
    }

    /// A local value could not be encoded for the wire.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EncodeError, format!("Failed to encode value: {}", message.into()))
    }

    /// An algebra operation was called on an empty sequence.
    pub fn empty_input(operation: &'static str) -> Self {
        Self::new(
            ErrorCode::EmptyInput,
            format!("{} requires a non-empty sequence", operation),
        )
        .with_context("operation", operation)
    }

    /// A sequence handed to the merge algebra is not in ascending order.
    pub fn ordering_violation(operation: &'static str, position: usize) -> Self {
        Self::new(
            ErrorCode::OrderingViolation,
            format!(
                "{} received a sequence out of order at position {}",
                operation, position
            ),
        )
        .with_context("operation", operation)
        .with_context("position", position)
    }

    /// A catch-up request got no answer before the deadline.
    pub fn stale_catch_up(channels: usize, timeout: std::time::Duration) -> Self {
        Self::new(
            ErrorCode::StaleCatchUp,
            format!(
                "No peer answered catch-up for {} channel(s) within {:?}",
                channels, timeout
            ),
        )
        .with_details(
            ErrorDetails::new()
                .with_context("channels", channels)
                .with_suggestion("Continuing from identity state; later deltas will converge"),
        )
    }

    /// No container is registered for the channel.
    pub fn unknown_channel(channel: impl Into<String>) -> Self {
        let channel = channel.into();
        Self::new(
            ErrorCode::UnknownChannel,
            format!("No container registered for channel {}", channel),
        )
        .with_details(ErrorDetails::new().with_channel(channel))
    }

    /// A live container already owns the channel name.
    pub fn duplicate_channel(channel: impl Into<String>) -> Self {
        let channel = channel.into();
        Self::new(ErrorCode::DuplicateChannel, format!("Channel {} is already registered", channel))
            .with_details(ErrorDetails::new().with_channel(channel))
    }

    /// The broadcast transport refused a message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransportError, format!("Transport failure: {}", message.into()))
    }

    /// A watch index outside the board.
    pub fn invalid_watch_index(index: usize, count: usize) -> Self {
        Self::new(
            ErrorCode::InvalidWatchIndex,
            format!("Watch index {} out of range (board has {})", index, count),
        )
        .with_context("index", index)
        .with_context("count", count)
    }

    /// Checkpoint load/save failure.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PersistenceError, format!("Persistence failure: {}", message.into()))
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, format!("Configuration error: {}", message.into()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        let context = std::mem::take(&mut self.details.context);
        self.details = details;
        for (k, v) in context {
            self.details.context.entry(k).or_insert(v);
        }
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    /// Attach the channel the error relates to.
    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.details.channel = Some(channel.into());
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Check if the condition is transient.
    pub fn is_transient(&self) -> bool {
        self.code.is_transient()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let channel = self.details.channel.as_deref().unwrap_or("-");

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    channel = channel,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    channel = channel,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    channel = channel,
                    message = %self.message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    channel = channel,
                    message = %self.message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "lapsync_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| SyncError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| SyncError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| SyncError::internal(message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| SyncError::new(code, "Value missing"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_data() || error.is_syntax() || error.is_eof() {
            ErrorCode::DecodeError
        } else {
            ErrorCode::SerializationError
        };
        Self::with_internal(code, "JSON processing failed", error.to_string()).with_source(error)
    }
}

impl From<std::io::Error> for SyncError {
    fn from(error: std::io::Error) -> Self {
        Self::with_internal(ErrorCode::PersistenceError, "I/O operation failed", error.to_string())
            .with_source(error)
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration could not be loaded",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(format!("{:#}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_categories() {
        assert_eq!(ErrorCode::EmptyInput.category(), "algebra");
        assert_eq!(ErrorCode::DecodeError.category(), "codec");
        assert_eq!(ErrorCode::StaleCatchUp.category(), "transport");
        assert_eq!(ErrorCode::PersistenceError.category(), "persistence");
        assert_eq!(ErrorCode::InternalError.category(), "internal");
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::StaleCatchUp), ErrorSeverity::Low);
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::DecodeError), ErrorSeverity::Medium);
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::OrderingViolation),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_transient_codes() {
        assert!(ErrorCode::StaleCatchUp.is_transient());
        assert!(!ErrorCode::DecodeError.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::empty_input("remove_adjacent_duplicates");
        assert_eq!(err.code(), ErrorCode::EmptyInput);
        assert!(err.to_string().contains("EmptyInput"));
        assert!(err.to_string().contains("non-empty"));
    }

    #[test]
    fn test_with_details_keeps_context() {
        let err = SyncError::ordering_violation("union", 3)
            .with_details(ErrorDetails::new().with_channel("watch0"));
        assert_eq!(err.details().channel.as_deref(), Some("watch0"));
        assert_eq!(err.details().context["position"], serde_json::json!(3));
    }

    #[test]
    fn test_from_serde_json_error_is_decode() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: SyncError = parse.unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::DecodeError);
    }

    #[test]
    fn test_option_context() {
        let missing: Option<u8> = None;
        let err = missing.with_error_code(ErrorCode::UnknownChannel).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownChannel);
    }
}
