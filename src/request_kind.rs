//! Request kinds and methods understood by the signal channel.
//!
//! The pair `(RequestKind, Method)` selects the target resource path and the
//! shape used to decode the reply.

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::message::Code;

/// Signal-channel resource addressed by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Mitigation requests (`mitigation_request`).
    Mitigation,
    /// Session configuration (`session_configuration`).
    SessionConfiguration,
}

impl RequestKind {
    /// Resource path without query parameters.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Mitigation => "/.well-known/dots/mitigate",
            Self::SessionConfiguration => "/.well-known/dots/config",
        }
    }

    /// Name used on the command line and in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mitigation => "mitigation_request",
            Self::SessionConfiguration => "session_configuration",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

/// Error returned when a request kind or method name is not recognised.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseRequestError {
    /// Unknown request kind.
    #[error("unknown request kind '{0}'")]
    Kind(String),
    /// Unknown method.
    #[error("invalid request method '{0}'")]
    Method(String),
}

impl FromStr for RequestKind {
    type Err = ParseRequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mitigation_request" => Ok(Self::Mitigation),
            "session_configuration" => Ok(Self::SessionConfiguration),
            other => Err(ParseRequestError::Kind(other.to_owned())),
        }
    }
}

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Create or replace.
    Put,
    /// Remove.
    Delete,
}

impl From<Method> for Code {
    fn from(m: Method) -> Self {
        match m {
            Method::Get => Self::GET,
            Method::Post => Self::POST,
            Method::Put => Self::PUT,
            Method::Delete => Self::DELETE,
        }
    }
}

impl FromStr for Method {
    type Err = ParseRequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            _ => Err(ParseRequestError::Method(s.to_owned())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
            Self::Put => f.write_str("PUT"),
            Self::Delete => f.write_str("DELETE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("get", Method::Get)]
    #[case("Put", Method::Put)]
    #[case("DELETE", Method::Delete)]
    fn methods_parse_case_insensitively(#[case] raw: &str, #[case] expected: Method) {
        assert_eq!(raw.parse::<Method>(), Ok(expected));
    }

    #[rstest]
    fn unknown_method_is_rejected() {
        assert_eq!(
            "PATCH".parse::<Method>(),
            Err(ParseRequestError::Method("PATCH".to_owned()))
        );
    }

    #[rstest]
    fn kinds_round_trip_through_names() {
        for kind in [RequestKind::Mitigation, RequestKind::SessionConfiguration] {
            assert_eq!(kind.name().parse::<RequestKind>(), Ok(kind));
        }
    }
}
