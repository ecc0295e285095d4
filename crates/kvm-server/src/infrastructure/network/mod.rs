//! Network infrastructure for the server: the listening socket.
//!
//! The reactor does the actual accepting; this module only opens the
//! listener and reports a bind failure with the address that failed.

use std::net::SocketAddr;

use kvm_core::net::reactor::{AcceptJob, Reactor};
use kvm_core::Token;
use thiserror::Error;
use tracing::info;

/// Errors raised while setting up the server socket.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to bind TCP listener on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Opens a listening socket on `addr` and registers it with `reactor`.
///
/// Returns the listener's token and the address actually bound (port 0
/// resolves to an ephemeral port).
///
/// # Errors
///
/// [`NetworkError::BindFailed`] if the address is in use or not local.
pub fn start_listener(
    reactor: &mut Reactor,
    addr: SocketAddr,
) -> Result<(Token, SocketAddr), NetworkError> {
    let token = reactor
        .listen(addr, Box::new(AcceptJob))
        .map_err(|source| NetworkError::BindFailed { addr, source })?;
    let bound = reactor.local_addr(token).unwrap_or(addr);
    info!(%bound, "listening for clients");
    Ok((token, bound))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_on_port_zero_reports_ephemeral_port() {
        // Arrange
        let mut reactor = Reactor::new().expect("poller");
        let addr: SocketAddr = "127.0.0.1:0".parse().expect("addr");

        // Act
        let (token, bound) = start_listener(&mut reactor, addr).expect("bind");

        // Assert
        assert_ne!(bound.port(), 0);
        assert!(reactor.contains(token));
    }

    #[test]
    fn test_second_listener_on_same_port_fails_with_address() {
        // Arrange
        let mut reactor = Reactor::new().expect("poller");
        let (_, bound) =
            start_listener(&mut reactor, "127.0.0.1:0".parse().expect("addr")).expect("bind");

        // Act
        let result = start_listener(&mut reactor, bound);

        // Assert
        match result {
            Err(NetworkError::BindFailed { addr, .. }) => assert_eq!(addr, bound),
            Ok(_) => panic!("binding the same port twice must fail"),
        }
    }
}
