//! HTTP submission API server

use std::{sync::Arc, time::Duration};

use axum::{routing::post, Router};
use empath_common::Signal;
use empath_submission::SubmissionService;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::{
    error::ApiError,
    handler::{send, ApiState},
    ApiConfig,
};

/// The HTTP submission API: a thin, authenticated intake feeding the shared
/// submission path, independent of the SMTP listeners.
pub struct ApiServer {
    listener: TcpListener,
    router: Router,
}

impl ApiServer {
    /// Bind the submission API to `config.listen_address`.
    ///
    /// # Errors
    /// Returns [`ApiError::BindError`] if the address cannot be bound.
    pub async fn new(
        config: ApiConfig,
        submission: Arc<SubmissionService>,
    ) -> Result<Self, ApiError> {
        let listener =
            TcpListener::bind(&config.listen_address)
                .await
                .map_err(|e| ApiError::BindError {
                    address: config.listen_address.clone(),
                    source: e,
                })?;

        tracing::info!(address = %config.listen_address, "Submission API bound successfully");

        let state = Arc::new(ApiState { config, submission });

        let router = Router::new()
            .route("/api/v1/send", post(send))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(30)));

        Ok(Self { listener, router })
    }

    /// Run the submission API until a shutdown signal is received.
    ///
    /// # Errors
    /// Returns [`ApiError::ServerError`] if the server encounters a runtime error.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), ApiError> {
        tracing::info!("Submission API server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Submission API received shutdown signal");
            })
            .await
            .map_err(|e| ApiError::ServerError(e.to_string()))?;

        tracing::info!("Submission API server stopped");
        Ok(())
    }
}
