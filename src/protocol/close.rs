//! Close codes and close-frame parameters.
//!
//! # Codes
//!
//! | Code | Variant |
//! |------|---------|
//! | 1000 | [`CloseCode::Normal`] |
//! | 1001 | [`CloseCode::GoingAway`] |
//! | 1002 | [`CloseCode::ProtocolError`] |
//! | 1003 | [`CloseCode::UnsupportedData`] |
//! | 1005 | [`CloseCode::NoStatus`] (reserved) |
//! | 1006 | [`CloseCode::Abnormal`] (reserved) |
//! | 1007 | [`CloseCode::InvalidPayload`] |
//! | 1008 | [`CloseCode::PolicyViolation`] |
//! | 1009 | [`CloseCode::TooBig`] |
//! | 1010 | [`CloseCode::MandatoryExtension`] |
//! | 1011 | [`CloseCode::InternalError`] |
//! | 1015 | [`CloseCode::TlsHandshake`] (reserved) |
//! | 3000-4999 | [`CloseCode::Application`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;

use crate::error::{Error, Result};

use super::ping::MAX_CONTROL_PAYLOAD;

// ============================================================================
// Constants
// ============================================================================

/// Maximum UTF-8 length of a close reason (control payload minus the code).
pub const MAX_CLOSE_REASON: usize = MAX_CONTROL_PAYLOAD - 2;

/// First code of the application-assigned range.
const APPLICATION_MIN: u16 = 3000;

/// Last code of the application-assigned range.
const APPLICATION_MAX: u16 = 4999;

// ============================================================================
// CloseCode
// ============================================================================

/// Close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CloseCode {
    /// 1000: normal closure.
    #[default]
    Normal,
    /// 1001: endpoint going away.
    GoingAway,
    /// 1002: protocol error.
    ProtocolError,
    /// 1003: unsupported data type.
    UnsupportedData,
    /// 1005: no status code was present.
    NoStatus,
    /// 1006: connection dropped without a close frame.
    Abnormal,
    /// 1007: payload inconsistent with message type.
    InvalidPayload,
    /// 1008: policy violation.
    PolicyViolation,
    /// 1009: message too big.
    TooBig,
    /// 1010: client expected an extension the server did not negotiate.
    MandatoryExtension,
    /// 1011: unexpected server condition.
    InternalError,
    /// 1015: TLS handshake failure.
    TlsHandshake,
    /// 3000-4999: application-assigned.
    Application(u16),
}

impl CloseCode {
    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::ProtocolError => 1002,
            Self::UnsupportedData => 1003,
            Self::NoStatus => 1005,
            Self::Abnormal => 1006,
            Self::InvalidPayload => 1007,
            Self::PolicyViolation => 1008,
            Self::TooBig => 1009,
            Self::MandatoryExtension => 1010,
            Self::InternalError => 1011,
            Self::TlsHandshake => 1015,
            Self::Application(code) => *code,
        }
    }

    /// Maps a numeric code to a close code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for codes outside the standard set
    /// and the application range.
    pub fn from_u16(code: u16) -> Result<Self> {
        Ok(match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::ProtocolError,
            1003 => Self::UnsupportedData,
            1005 => Self::NoStatus,
            1006 => Self::Abnormal,
            1007 => Self::InvalidPayload,
            1008 => Self::PolicyViolation,
            1009 => Self::TooBig,
            1010 => Self::MandatoryExtension,
            1011 => Self::InternalError,
            1015 => Self::TlsHandshake,
            APPLICATION_MIN..=APPLICATION_MAX => Self::Application(code),
            _ => {
                return Err(Error::invalid_argument(format!(
                    "close code {code} is neither standard nor in {APPLICATION_MIN}-{APPLICATION_MAX}"
                )));
            }
        })
    }

    /// Creates an application-assigned close code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `code` is outside 3000-4999.
    pub fn application(code: u16) -> Result<Self> {
        if (APPLICATION_MIN..=APPLICATION_MAX).contains(&code) {
            Ok(Self::Application(code))
        } else {
            Err(Error::invalid_argument(format!(
                "application close code {code} outside {APPLICATION_MIN}-{APPLICATION_MAX}"
            )))
        }
    }

    /// Returns `true` for codes that must never appear in a close frame.
    ///
    /// 1005, 1006 and 1015 only describe a closure locally.
    #[inline]
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        matches!(self, Self::NoStatus | Self::Abnormal | Self::TlsHandshake)
    }

    /// Returns `true` if the code may be put in a close frame.
    ///
    /// An [`Application`](Self::Application) value built directly must
    /// still fall in 3000-4999.
    #[inline]
    #[must_use]
    pub const fn is_sendable(&self) -> bool {
        match self {
            Self::Application(code) => *code >= APPLICATION_MIN && *code <= APPLICATION_MAX,
            other => !other.is_reserved(),
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

impl From<WsCloseCode> for CloseCode {
    fn from(code: WsCloseCode) -> Self {
        let raw = u16::from(code);
        Self::from_u16(raw).unwrap_or(Self::ProtocolError)
    }
}

// ============================================================================
// CloseRequest
// ============================================================================

/// Validated parameters of a local close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    /// Close code to report.
    pub code: CloseCode,
    /// UTF-8 reason, at most [`MAX_CLOSE_REASON`] bytes.
    pub reason: String,
}

impl CloseRequest {
    /// Validates a close code and reason.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if an application code is outside
    /// 3000-4999 or the reason does not fit in a control frame.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Result<Self> {
        if let CloseCode::Application(raw) = code {
            CloseCode::application(raw)?;
        }

        let reason = reason.into();
        if reason.len() > MAX_CLOSE_REASON {
            return Err(Error::invalid_argument(format!(
                "close reason is {} bytes, limit is {MAX_CLOSE_REASON}",
                reason.len()
            )));
        }
        Ok(Self { code, reason })
    }

    /// Normal closure with an empty reason.
    #[must_use]
    pub fn normal() -> Self {
        Self {
            code: CloseCode::Normal,
            reason: String::new(),
        }
    }

    /// Builds the wire close frame.
    ///
    /// Codes that are not [sendable](CloseCode::is_sendable) go out as
    /// normal closure.
    #[must_use]
    pub fn to_frame(&self) -> CloseFrame {
        let code = if self.code.is_sendable() {
            self.code
        } else {
            CloseCode::Normal
        };
        CloseFrame {
            code: WsCloseCode::from(code.as_u16()),
            reason: self.reason.clone().into(),
        }
    }
}

// ============================================================================
// CloseInfo
// ============================================================================

/// How a session ended, as reported to `on_disconnect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code from the close frame, or [`CloseCode::Abnormal`] when the
    /// connection dropped without one.
    pub code: CloseCode,
    /// Close reason (empty if none).
    pub reason: String,
    /// `true` if the peer initiated the close.
    pub by_peer: bool,
}

impl CloseInfo {
    /// Close info for a connection that dropped without a close frame.
    #[must_use]
    pub fn abnormal() -> Self {
        Self {
            code: CloseCode::Abnormal,
            reason: String::new(),
            by_peer: true,
        }
    }

    /// Close info parsed from a received close frame.
    #[must_use]
    pub fn from_frame(frame: Option<&CloseFrame>, by_peer: bool) -> Self {
        match frame {
            Some(frame) => Self {
                code: CloseCode::from(frame.code),
                reason: frame.reason.as_str().to_owned(),
                by_peer,
            },
            None => Self {
                code: CloseCode::NoStatus,
                reason: String::new(),
                by_peer,
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_codes_round_trip() {
        for raw in [
            1000, 1001, 1002, 1003, 1005, 1006, 1007, 1008, 1009, 1010, 1011, 1015,
        ] {
            let code = CloseCode::from_u16(raw).unwrap();
            assert_eq!(code.as_u16(), raw);
            assert!(!matches!(code, CloseCode::Application(_)));
        }
    }

    #[test]
    fn test_application_range() {
        assert_eq!(CloseCode::from_u16(4000).unwrap(), CloseCode::Application(4000));
        assert!(CloseCode::application(2999).is_err());
        assert!(CloseCode::application(5000).is_err());
        assert!(CloseCode::from_u16(1004).is_err());
    }

    #[test]
    fn test_default_is_normal() {
        assert_eq!(CloseCode::default().as_u16(), 1000);
    }

    #[test]
    fn test_reason_length_limit() {
        assert!(CloseRequest::new(CloseCode::Normal, "x".repeat(MAX_CLOSE_REASON)).is_ok());
        assert!(CloseRequest::new(CloseCode::Normal, "x".repeat(MAX_CLOSE_REASON + 1)).is_err());
    }

    #[test]
    fn test_reserved_codes_sent_as_normal() {
        let request = CloseRequest::new(CloseCode::Abnormal, "gone").unwrap();
        let frame = request.to_frame();
        assert_eq!(u16::from(frame.code), 1000);
        assert_eq!(frame.reason.as_str(), "gone");
    }

    #[test]
    fn test_out_of_range_application_code_rejected() {
        for raw in [5, 2999, 5000] {
            let err = CloseRequest::new(CloseCode::Application(raw), "").unwrap_err();
            assert!(matches!(err, Error::InvalidArgument { .. }));
        }
        assert!(CloseRequest::new(CloseCode::Application(4000), "").is_ok());
    }

    #[test]
    fn test_unsendable_code_in_literal_sent_as_normal() {
        let request = CloseRequest {
            code: CloseCode::Application(5),
            reason: String::new(),
        };
        assert!(!request.code.is_sendable());
        assert_eq!(u16::from(request.to_frame().code), 1000);

        let request = CloseRequest::new(CloseCode::Application(4321), "").unwrap();
        assert_eq!(u16::from(request.to_frame().code), 4321);
    }

    #[test]
    fn test_close_info_from_missing_frame() {
        let info = CloseInfo::from_frame(None, true);
        assert_eq!(info.code, CloseCode::NoStatus);
        assert!(info.by_peer);
    }
}
