use std::time::{ Duration, SystemTime, UNIX_EPOCH };

use serde::Serialize;
use thiserror::Error;

/// Status code recorded when no response was received at all.
pub const NO_RESPONSE: u16 = 0;

/// The only status counted as a successful request.
pub const SUCCESS_STATUS: u16 = 200;

/// Why a request attempt produced no usable response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No completion within the configured timeout
    #[error("Timeout")]
    Timeout,

    /// Connection refused/reset, DNS or TLS failure
    #[error("TransportError: {0}")]
    Transport(String),

    #[error("UnclassifiedError: {0}")]
    Unclassified(String),
}

/// Immutable record of one request attempt.
///
/// `success` holds iff `error_message` is empty. A received response with a
/// status other than 200 is a failure that still carries its status code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub success: bool,
    pub status_code: u16, // NO_RESPONSE when nothing came back
    pub response_time_secs: f64,
    pub start_timestamp: f64, // epoch seconds at request start, only used for bucketing
    pub error_message: String,
    pub response_size_bytes: u64, // 0 for failed attempts
}

impl Outcome {
    /// Outcome for a request that got a full response back
    pub fn received(status: u16, elapsed: Duration, started_at: f64, size: u64) -> Self {
        if status == SUCCESS_STATUS {
            Self {
                success: true,
                status_code: status,
                response_time_secs: elapsed.as_secs_f64(),
                start_timestamp: started_at,
                error_message: String::new(),
                response_size_bytes: size,
            }
        } else {
            Self {
                success: false,
                status_code: status,
                response_time_secs: elapsed.as_secs_f64(),
                start_timestamp: started_at,
                error_message: format!("HTTP {}", status),
                response_size_bytes: 0,
            }
        }
    }

    /// Outcome for a request that never produced a response
    pub fn failed(error: DispatchError, elapsed: Duration, started_at: f64) -> Self {
        Self {
            success: false,
            status_code: NO_RESPONSE,
            response_time_secs: elapsed.as_secs_f64(),
            start_timestamp: started_at,
            error_message: error.to_string(),
            response_size_bytes: 0,
        }
    }

    pub fn response_time_ms(&self) -> f64 {
        self.response_time_secs * 1000.0
    }
}

/// Wall-clock epoch seconds, used for request start timestamps.
pub fn epoch_seconds(at: SystemTime) -> f64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
