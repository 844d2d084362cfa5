use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors that can occur during the use of parley.
#[derive(Debug, Error)]
pub enum Error {
    /// Any IO error.
    #[error("IO err: {0}")]
    Io(#[from] io::Error),
    /// The connection ended.
    ///
    /// On the server this is the clean end of a connection's request cycle;
    /// on the client every call still pending on the connection is failed
    /// with this error.
    #[error("connection closed")]
    ConnectionClosed,
    /// A message header arrived but did not decode.
    ///
    /// The stream position can no longer be trusted, so the connection is
    /// torn down.
    #[error("decoding a message header err: {0}")]
    MalformedHeader(String),
    /// Error in serializing a client request.
    ///
    /// Typically this indicates a faulty implementation of `serde::Serialize`.
    #[error("serializing a client request err: {0}")]
    ClientSerialize(String),
    /// Error in deserializing a server response.
    ///
    /// Typically this indicates a faulty implementation of `serde::Serialize` or
    /// `serde::Deserialize`.
    #[error("deserializing a server response err: {0}")]
    ClientDeserialize(String),
    /// The server answered the call with an in-band error.
    #[error(transparent)]
    Server(#[from] WireError),
}

/// A serializable, server-supplied error.
///
/// Travels inside the response header. Per-request failures are reported to
/// the remote caller through this type and never terminate the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum WireError {
    /// The requested call target is not of the `"Service.Method"` form.
    #[error("invalid service method format: {0}")]
    InvalidServiceMethod(String),
    /// No service is registered under the requested name.
    #[error("service not found: {0}")]
    UnknownService(String),
    /// The service exists but has no method of the requested name.
    #[error("method not found: {0}")]
    UnknownMethod(String),
    /// Error in deserializing a client request.
    #[error("deserializing a client request err: {0}")]
    ServerDeserialize(String),
    /// Error in serializing a server response.
    #[error("serializing a server response err: {0}")]
    ServerSerialize(String),
    /// The invoked method itself returned an error; its text is carried back
    /// verbatim.
    #[error("{0}")]
    Method(String),
}
