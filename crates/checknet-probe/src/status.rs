// PROBE FAILURE CLASSES
// Fixed status-code table written into every failed sample, so consumers of
// the audit trail can tell failure classes apart without parsing messages.
//
//   701  timeout                  801  invalid CAR
//   702  connection refused       802  invalid block
//   703  host not found           803  invalid CID
//   604  configuration mismatch   600  anything else
//
// A non-2xx health response records the HTTP status itself.

use std::error::Error as StdError;
use std::io;
use thiserror::Error;

pub const STATUS_UNKNOWN: u16 = 600;
pub const STATUS_CONFIG_MISMATCH: u16 = 604;
pub const STATUS_TIMEOUT: u16 = 701;
pub const STATUS_CONNECTION_REFUSED: u16 = 702;
pub const STATUS_HOST_NOT_FOUND: u16 = 703;
pub const STATUS_INVALID_CAR: u16 = 801;
pub const STATUS_INVALID_BLOCK: u16 = 802;
pub const STATUS_INVALID_CID: u16 = 803;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Device has no reachable endpoint")]
    NoEndpoint,

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Host not found: {0}")]
    HostNotFound(String),

    #[error("Health check failed with status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Health check returned unsuccessful status")]
    Unsuccessful,

    #[error("No character URL returned from health check")]
    MissingCharacterUrl,

    #[error("Failed to fetch character file: {0}")]
    CharacterFetch(u16),

    #[error("Character configuration mismatch: {0}")]
    ConfigMismatch(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Request failed: {0}")]
    Request(String),
}

impl ProbeError {
    /// Status code recorded for a sample that failed with this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ProbeError::Timeout(_) => STATUS_TIMEOUT,
            ProbeError::ConnectionRefused(_) => STATUS_CONNECTION_REFUSED,
            ProbeError::HostNotFound(_) => STATUS_HOST_NOT_FOUND,
            ProbeError::HttpStatus { status, .. } => *status,
            ProbeError::ConfigMismatch(_) => STATUS_CONFIG_MISMATCH,
            ProbeError::Malformed(msg) | ProbeError::Request(msg) => classify_message(msg),
            ProbeError::NoEndpoint
            | ProbeError::Unsuccessful
            | ProbeError::MissingCharacterUrl
            | ProbeError::CharacterFetch(_) => STATUS_UNKNOWN,
        }
    }
}

/// Status code for a free-text failure message.
pub fn classify_message(message: &str) -> u16 {
    let message = message.to_lowercase();
    if message.contains("etimedout") || message.contains("timeout") || message.contains("timed out") {
        STATUS_TIMEOUT
    } else if message.contains("econnrefused") || message.contains("connection refused") {
        STATUS_CONNECTION_REFUSED
    } else if message.contains("enotfound") || is_dns_failure(&message) {
        STATUS_HOST_NOT_FOUND
    } else if message.contains("invalid car") {
        STATUS_INVALID_CAR
    } else if message.contains("invalid block") {
        STATUS_INVALID_BLOCK
    } else if message.contains("invalid cid") {
        STATUS_INVALID_CID
    } else {
        STATUS_UNKNOWN
    }
}

fn is_dns_failure(message: &str) -> bool {
    message.contains("dns error")
        || message.contains("failed to lookup address")
        || message.contains("name or service not known")
        || message.contains("no such host")
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        let chain = error_chain(&err);
        if err.is_timeout() {
            return ProbeError::Timeout(chain);
        }
        if err.is_decode() {
            return ProbeError::Malformed(chain);
        }

        let mut source: Option<&(dyn StdError + 'static)> = err.source();
        while let Some(cause) = source {
            if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                match io_err.kind() {
                    io::ErrorKind::ConnectionRefused => return ProbeError::ConnectionRefused(chain),
                    io::ErrorKind::TimedOut => return ProbeError::Timeout(chain),
                    _ => {}
                }
            }
            source = cause.source();
        }

        match classify_message(&chain) {
            STATUS_TIMEOUT => ProbeError::Timeout(chain),
            STATUS_CONNECTION_REFUSED => ProbeError::ConnectionRefused(chain),
            STATUS_HOST_NOT_FOUND => ProbeError::HostNotFound(chain),
            _ => ProbeError::Request(chain),
        }
    }
}

// reqwest's Display hides the cause; the audit trail wants all of it.
fn error_chain(err: &dyn StdError) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_table() {
        assert_eq!(classify_message("connect ETIMEDOUT 10.0.0.1:443"), 701);
        assert_eq!(classify_message("operation timed out"), 701);
        assert_eq!(classify_message("connect ECONNREFUSED 127.0.0.1:80"), 702);
        assert_eq!(classify_message("getaddrinfo ENOTFOUND device.invalid"), 703);
        assert_eq!(classify_message("dns error: failed to lookup address information"), 703);
        assert_eq!(classify_message("Invalid CAR header"), 801);
        assert_eq!(classify_message("invalid block in stream"), 802);
        assert_eq!(classify_message("Invalid CID"), 803);
        assert_eq!(classify_message("something else"), 600);
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ProbeError::HttpStatus {
                status: 503,
                body: "down".to_string()
            }
            .status_code(),
            503
        );
        assert_eq!(ProbeError::ConfigMismatch("differs".to_string()).status_code(), 604);
        assert_eq!(ProbeError::Unsuccessful.status_code(), 600);
        assert_eq!(ProbeError::MissingCharacterUrl.status_code(), 600);
        assert_eq!(ProbeError::Malformed("invalid cid in body".to_string()).status_code(), 803);
    }
}
