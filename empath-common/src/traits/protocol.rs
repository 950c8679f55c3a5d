use std::{collections::HashMap, fmt::Debug, net::SocketAddr};

use serde::Deserialize;
use tokio::{net::TcpStream, sync::broadcast::Receiver};

use crate::{Signal, error::ProtocolError};

/// A running session accepted from a [`Protocol`] listener.
pub trait SessionHandler {
    fn run(
        self,
        shutdown: Receiver<Signal>,
    ) -> impl std::future::Future<Output = Result<(), crate::error::SessionError>> + Send;
}

/// A wire protocol a [`crate::controller::Controller`] can listen for.
///
/// Implementors own per-connection behaviour (`handle`) and whatever
/// per-listener configuration validation is needed before the first
/// connection is accepted (`validate`).
pub trait Protocol: Default + Send + Sync {
    type Session: SessionHandler + Send + Sync + 'static;
    /// Per-listener configuration. Shared runtime handles (spool, submission
    /// path, ...) are injected post-deserialization via `Controller::map_args`.
    type Args: Default + Clone + Debug + Send + Sync + for<'a> Deserialize<'a>;

    fn ty() -> &'static str;

    fn handle(
        &self,
        stream: TcpStream,
        address: SocketAddr,
        init_context: HashMap<String, String>,
        args: Self::Args,
    ) -> Self::Session;

    /// Validate (and, if needed, normalise) this listener's configuration
    /// before the controller binds any sockets.
    fn validate(&mut self, args: &mut Self::Args) -> Result<(), ProtocolError> {
        let _ = args;
        Ok(())
    }
}
