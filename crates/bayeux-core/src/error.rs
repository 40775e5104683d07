//! Bayeux advisory errors.
//!
//! Errors never cross the engine boundary as faults. They are rendered into
//! the `error` field of a response as `"<code>:<args>:<message>"`.

use thiserror::Error;

/// A protocol error attached to a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// None of the client's connection types are supported.
    #[error("301:{}:Connection types not supported", .0.join(","))]
    ConntypeMismatch(Vec<String>),

    /// The message could not be decoded.
    #[error("303:{0}:Bad request")]
    BadRequest(String),

    /// The referenced client id has no live connection.
    #[error("401:{0}:Unknown client")]
    ClientUnknown(String),

    /// A required message field is absent.
    #[error("402:{0}:Missing required parameter")]
    ParameterMissing(&'static str),

    /// The channel lives in a reserved namespace.
    #[error("403:{0}:Forbidden channel")]
    ChannelForbidden(String),

    /// No handler exists for the meta channel.
    #[error("404:{0}:Unknown channel")]
    ChannelUnknown(String),

    /// The channel name fails the grammar.
    #[error("405:{0}:Invalid channel")]
    ChannelInvalid(String),
}

impl ProtocolError {
    /// Numeric Bayeux error code.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::ConntypeMismatch(_) => 301,
            Self::BadRequest(_) => 303,
            Self::ClientUnknown(_) => 401,
            Self::ParameterMissing(_) => 402,
            Self::ChannelForbidden(_) => 403,
            Self::ChannelUnknown(_) => 404,
            Self::ChannelInvalid(_) => 405,
        }
    }
}
