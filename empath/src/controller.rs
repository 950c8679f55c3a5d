use std::sync::{Arc, LazyLock};

use empath_api::{ApiConfig, ApiServer};
use empath_common::{Signal, controller::Controller, internal, logging, tracing};
use empath_delivery::DeliveryQueryService;
use empath_ffi::modules::{self, Module};
use empath_health::{HealthChecker, HealthConfig, HealthServer};
use empath_smtp::Smtp;
use empath_submission::SubmissionConfig;
use empath_tracing::traced;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::control_handler::EmpathControlHandler;

fn default_control_socket() -> String {
    empath_control::DEFAULT_CONTROL_SOCKET.to_string()
}

#[allow(
    clippy::unsafe_derive_deserialize,
    reason = "The unsafe aspects have nothing to do with the struct"
)]
#[derive(Default, Deserialize)]
pub struct Empath {
    #[serde(alias = "smtp")]
    smtp_controller: Controller<Smtp>,
    #[serde(alias = "module", default)]
    modules: Vec<Module>,
    #[serde(alias = "spool")]
    spool: empath_spool::Controller,
    #[serde(alias = "delivery", default)]
    delivery: empath_delivery::DeliveryProcessor,
    /// Path to the Unix control socket used by `empathctl`
    #[serde(alias = "control_socket", default = "default_control_socket")]
    control_socket: String,
    /// Health check HTTP server configuration
    #[serde(alias = "health", default)]
    health: HealthConfig,
    /// Shared submission path: domain modes, sandbox capture, admission rate limits
    #[serde(alias = "submission", default)]
    submission: SubmissionConfig,
    /// HTTP submission API configuration
    #[serde(alias = "api", default)]
    api: ApiConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[traced(instrument(level = tracing::Level::TRACE))]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Empath {
    /// Run this controller, and everything it controls
    ///
    /// # Errors
    ///
    /// This function will return an error if any of the configured modules fail
    /// to initialise.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
    pub async fn run(mut self) -> anyhow::Result<()> {
        logging::init();
        self.spool.init()?;

        internal!("Controller running");

        modules::init(self.modules)?;

        // Inject the spool into all SMTP listeners before initialization
        // We need both: the concrete Arc<Controller> for serve() and Arc<dyn Spool> for sessions
        let spool_controller = Arc::new(self.spool);

        // The submission path sits in front of the spool: both SMTP and the
        // HTTP API funnel accepted messages through it.
        let submission = Arc::new(self.submission.build(spool_controller.clone()));

        self.smtp_controller.map_args(|args| {
            args.with_spool(spool_controller.clone())
                .with_submission(submission.clone())
        });

        self.smtp_controller.init()?;

        // Initialize delivery controller with the same spool controller
        self.delivery.init(spool_controller.clone(), None)?;
        let delivery = Arc::new(self.delivery);

        let health_checker = Arc::new(HealthChecker::new(self.health.max_queue_size));
        health_checker.set_spool_ready(true);
        health_checker.set_delivery_ready(true);
        health_checker.set_smtp_ready(true);
        health_checker.set_dns_ready(delivery.dns_resolver().is_some());
        health_checker.set_queue_size(delivery.queue_len() as u64);

        let control_handler = Arc::new(EmpathControlHandler::new(delivery.clone()));
        let control_server =
            empath_control::ControlServer::new(self.control_socket.clone(), control_handler)?;

        let health_server = if self.health.enabled {
            Some(HealthServer::new(self.health.clone(), health_checker).await?)
        } else {
            None
        };

        let api_server = if self.api.enabled {
            Some(ApiServer::new(self.api.clone(), submission.clone()).await?)
        } else {
            None
        };

        let ret = tokio::select! {
            r = self.smtp_controller.control(vec![SHUTDOWN_BROADCAST.subscribe()]) => {
                r
            }
            r = spool_controller.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r
            }
            r = delivery.clone().serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(anyhow::Error::from)
            }
            r = control_server.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(anyhow::Error::from)
            }
            r = async {
                if let Some(server) = api_server {
                    server.serve(SHUTDOWN_BROADCAST.subscribe()).await.map_err(anyhow::Error::from)
                } else {
                    std::future::pending().await
                }
            } => {
                r
            }
            r = async {
                if let Some(server) = health_server {
                    server.serve(SHUTDOWN_BROADCAST.subscribe()).await.map_err(anyhow::Error::from)
                } else {
                    std::future::pending().await
                }
            } => {
                r
            }
            r = shutdown() => {
                r
            }
        };

        internal!("Shutting down...");

        ret
    }
}
