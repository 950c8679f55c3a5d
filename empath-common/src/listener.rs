//! Generic per-socket listener shared by every [`Protocol`] implementation.
//!
//! A `Listener<Proto>` owns one bound socket and the protocol-specific
//! configuration (`Proto::Args`) for it. On each accepted connection it asks
//! the protocol to build a session and spawns it, tracking the join handles
//! so a shutdown signal can be waited on before the listener returns.

use std::{collections::HashMap, net::SocketAddr};

use empath_tracing::traced;
use futures_util::future::join_all;
use serde::Deserialize;
use tokio::{net::TcpListener, sync::broadcast::Receiver};

use crate::{
    Signal, internal,
    traits::protocol::{Protocol, SessionHandler},
};

#[derive(Deserialize)]
pub struct Listener<Proto: Protocol> {
    #[serde(skip)]
    handler: Proto,
    socket: SocketAddr,
    #[serde(default)]
    init_context: HashMap<String, String>,
    #[serde(flatten)]
    args: Proto::Args,
}

impl<Proto: Protocol> Listener<Proto> {
    /// Validate this listener's configuration before any socket is bound.
    pub fn init(&mut self) -> anyhow::Result<()> {
        Proto::validate(&mut self.args).map_err(anyhow::Error::from)
    }

    /// Replace this listener's args with `f` applied to the current value,
    /// used to inject shared runtime handles (spool, submission path, ...)
    /// after deserialization.
    pub fn map_args(&mut self, f: &impl Fn(Proto::Args) -> Proto::Args) {
        self.args = f(std::mem::take(&mut self.args));
    }

    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err))]
    pub async fn serve(&self, mut shutdown: Receiver<Signal>) -> anyhow::Result<()> {
        internal!("Serving {} on {:?}", Proto::ty(), self.socket);

        let listener = TcpListener::bind(self.socket).await?;
        let mut sessions = Vec::new();

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown)) {
                        internal!(level = INFO, "Listener {:?} received shutdown, finishing sessions", self.socket);
                        join_all(sessions).await;
                        break;
                    }
                }

                connection = listener.accept() => {
                    let (stream, peer) = connection?;
                    let session = self
                        .handler
                        .handle(stream, peer, self.init_context.clone(), self.args.clone());
                    let session_shutdown = shutdown.resubscribe();

                    sessions.push(tokio::spawn(async move {
                        if let Err(err) = session.run(session_shutdown).await {
                            internal!(level = ERROR, "Session error: {err}");
                        }
                    }));
                }
            }
        }

        Ok(())
    }
}
