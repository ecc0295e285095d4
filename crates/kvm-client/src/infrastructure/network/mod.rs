//! Network infrastructure for the client: the outbound connection.
//!
//! The reactor completes the non-blocking connect; success arrives as
//! `NetEvent::Connected` and failure as `NetEvent::Closed` on the returned
//! token.

use std::net::SocketAddr;

use kvm_core::net::reactor::{ConnectJob, Reactor};
use kvm_core::Token;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur in the client network layer.
#[derive(Debug, Error)]
pub enum ClientNetworkError {
    /// The connect could not even be started.
    #[error("failed to connect to server at {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Starts connecting to the server at `addr`.
///
/// # Errors
///
/// [`ClientNetworkError::ConnectFailed`] when the socket cannot be created
/// or the address is refused immediately.
pub fn connect_to_server(
    reactor: &mut Reactor,
    addr: SocketAddr,
) -> Result<Token, ClientNetworkError> {
    let token = reactor
        .connect(addr, Box::new(ConnectJob))
        .map_err(|source| ClientNetworkError::ConnectFailed { addr, source })?;
    debug!(%addr, %token, "connect started");
    Ok(token)
}
