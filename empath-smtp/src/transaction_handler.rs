//! Business logic handler for SMTP sessions.
//!
//! This module provides the `BusinessHandler` trait that separates business
//! logic (validation, spooling, module dispatch) from protocol state management
//! (FSM) and I/O orchestration.

use std::{borrow::Cow, collections::HashMap, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use empath_common::{context::Context, status::Status};
use empath_ffi::modules;
use empath_spool::BackingStore;
use empath_submission::{Source, SubmissionError, SubmissionService};

use crate::{State, auth_gate::AuthGate};

/// SMTP transaction handler for business logic.
///
/// This trait separates business concerns (validation, spooling, auditing)
/// from protocol concerns (state transitions) and I/O concerns (send/receive).
///
/// # Design Rationale
///
/// By separating business logic into a trait, we achieve:
/// - **Testability**: Business logic can be tested without I/O or networking
/// - **Flexibility**: Different implementations for production vs testing
/// - **Single Responsibility**: Each layer has a clear, focused purpose
/// - **Dependency Injection**: Easily swap implementations
///
/// # Responsibilities
///
/// The transaction handler is responsible for:
/// - Module-based validation dispatch
/// - Message spooling
/// - Response generation (success/failure messages)
/// - Audit logging
/// - Event notification
///
/// # Lifecycle
///
/// The handler is called after FSM state transitions:
/// 1. FSM transitions to new state (pure protocol logic)
/// 2. `SmtpTransactionHandler` validates the transition (business rules)
/// 3. `SmtpTransactionHandler` performs work (spooling, auditing, etc.)
/// 4. `Response` is generated and sent to client
#[async_trait]
pub trait SmtpTransactionHandler: Send + Sync {
    /// Validate a Connect event (new connection established)
    ///
    /// Called when a new client connects, before sending the greeting.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Business context for validation and response
    ///
    /// # Returns
    ///
    /// `true` if the connection should be accepted, `false` to reject
    async fn validate_connect(&mut self, ctx: &mut Context) -> bool;

    /// Validate an EHLO/HELO command
    ///
    /// Called after the client sends EHLO or HELO.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Business context for validation and response
    ///
    /// # Returns
    ///
    /// `true` if the EHLO/HELO should be accepted, `false` to reject
    async fn validate_ehlo(&mut self, ctx: &mut Context) -> bool;

    /// Validate a MAIL FROM command
    ///
    /// Called after the client sends MAIL FROM.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Business context for validation and response
    ///
    /// # Returns
    ///
    /// `true` if the MAIL FROM should be accepted, `false` to reject
    async fn validate_mail_from(&mut self, ctx: &mut Context) -> bool;

    /// Validate an RCPT TO command
    ///
    /// Called after the client sends RCPT TO.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Business context for validation and response
    ///
    /// # Returns
    ///
    /// `true` if the RCPT TO should be accepted, `false` to reject
    async fn validate_rcpt_to(&mut self, ctx: &mut Context) -> bool;

    /// Validate and process a complete message (after DATA)
    ///
    /// Called after the client sends the complete message (after ".").
    /// This method both validates the message and performs the spooling
    /// work if validation passes.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Business context for validation, spooling, and response
    ///
    /// # Returns
    ///
    /// `true` if the message was accepted and spooled, `false` if rejected
    async fn handle_message(&mut self, ctx: &mut Context) -> bool;

    /// Validate an `AUTH` exchange once credentials have been decoded.
    ///
    /// Called once a SASL exchange (PLAIN or LOGIN, with or without an
    /// inline initial response) has produced a username/password pair.
    /// Unlike the other `validate_*` methods, the outcome never tears down
    /// the connection -- the FSM returns to the greeting state regardless of
    /// whether authentication succeeded, so the client can retry or proceed.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Business context; implementations should set `ctx.response`
    ///   and, on success, `ctx.authenticated = true`
    /// * `username` - Decoded username
    /// * `password` - Decoded password
    ///
    /// # Returns
    ///
    /// `true` if the credentials were accepted
    async fn validate_auth(&mut self, ctx: &mut Context, username: &str, password: &str) -> bool;
}

/// Default SMTP transaction handler that uses the module system for validation.
///
/// This implementation delegates all validation to the FFI module system,
/// which allows external plugins to implement business rules.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use empath_smtp::transaction_handler::DefaultSmtpTransactionHandler;
/// use empath_spool::BackingStore;
///
/// # fn example(spool: Arc<dyn BackingStore>, peer: std::net::SocketAddr) {
/// let handler = DefaultSmtpTransactionHandler::new(Some(spool), peer);
/// // Use handler with session orchestrator
/// # }
/// ```
pub struct DefaultSmtpTransactionHandler {
    /// Optional spool for message persistence, used directly when no
    /// submission service is configured (e.g. in tests).
    spool: Option<Arc<dyn BackingStore>>,
    /// Shared submission path: domain-mode dispatch, admission rate
    /// limiting, and sandbox capture. When set, this is used instead of
    /// writing straight to `spool`.
    submission: Option<Arc<SubmissionService>>,
    /// Client peer address for audit logging
    peer: SocketAddr,
    /// Brute-force protection shared across connections on this listener
    auth_gate: Option<Arc<AuthGate>>,
    /// Configured `{user: pass}` table checked by `AUTH`
    users: Option<Arc<HashMap<String, String>>>,
    /// Whether `AUTH` must succeed before `RCPT TO` is accepted on this listener
    auth_required: bool,
    /// Maximum recipients accepted per message on this listener
    max_recipients: Option<usize>,
}

impl DefaultSmtpTransactionHandler {
    /// Creates a new default SMTP transaction handler.
    ///
    /// # Arguments
    ///
    /// * `spool` - Optional message spool for persistence
    /// * `peer` - Client peer address for audit logging
    #[must_use]
    pub const fn new(spool: Option<Arc<dyn BackingStore>>, peer: SocketAddr) -> Self {
        Self {
            spool,
            submission: None,
            peer,
            auth_gate: None,
            users: None,
            auth_required: false,
            max_recipients: None,
        }
    }

    /// Route accepted messages through the shared submission path instead
    /// of writing straight to the spool.
    ///
    /// When set, this takes priority over the raw `spool` handle: domain
    /// mode dispatch (sandbox/redirect/bcc), admission rate limiting, and
    /// sandbox capture all happen here before anything reaches the queue.
    #[must_use]
    pub fn with_submission(mut self, submission: Option<Arc<SubmissionService>>) -> Self {
        self.submission = submission;
        self
    }

    /// Attach AUTH policy: the brute-force gate, the credential table, and
    /// whether unauthenticated submission is rejected on this listener.
    #[must_use]
    pub fn with_auth(
        mut self,
        auth_gate: Option<Arc<AuthGate>>,
        users: Option<Arc<HashMap<String, String>>>,
        auth_required: bool,
    ) -> Self {
        self.auth_gate = auth_gate;
        self.users = users;
        self.auth_required = auth_required;
        self
    }

    /// Attach a recipient cap enforced in `RCPT TO`.
    #[must_use]
    pub const fn with_max_recipients(mut self, max_recipients: Option<usize>) -> Self {
        self.max_recipients = max_recipients;
        self
    }

    /// Spool a message after validation passes.
    ///
    /// This is an internal helper that handles:
    /// - Writing the message to the spool
    /// - Setting success/failure responses
    /// - Clearing transaction metadata
    /// - Audit logging
    /// - Event dispatching
    ///
    /// # Arguments
    ///
    /// * `ctx` - Business context containing the message data
    async fn spool_message(&self, ctx: &mut Context) {
        if ctx.data.is_none() {
            return;
        }

        let tracking_id = if let Some(submission) = &self.submission {
            let client_ip = self.peer.ip().to_string();
            match submission
                .submit(ctx.clone(), Some(&client_ip), None, Source::Smtp)
                .await
            {
                Ok(outcome) => Some(outcome.id().to_string()),
                Err(SubmissionError::InvalidEnvelope(reason)) => {
                    ctx.response = Some((Status::Error, Cow::Owned(reason)));
                    return;
                }
                Err(SubmissionError::RateLimited { retry_after, .. }) => {
                    ctx.response = Some((
                        Status::RateLimited,
                        Cow::Owned(format!(
                            "rate limited, retry after {}s",
                            retry_after.as_secs()
                        )),
                    ));
                    return;
                }
                Err(SubmissionError::Storage(e)) => {
                    tracing::error!("Failed to submit message: {e}");
                    ctx.response = Some((
                        Status::ActionUnavailable,
                        Cow::Borrowed("Please try again later"),
                    ));
                    return;
                }
            }
        } else if let Some(spool) = &self.spool {
            match spool.write(ctx).await {
                Ok(id) => Some(id.to_string()),
                Err(e) => {
                    tracing::error!("Failed to spool message: {e}");
                    ctx.response = Some((
                        Status::ActionUnavailable,
                        Cow::Borrowed("Please try again later"),
                    ));
                    return;
                }
            }
        } else {
            None
        };

        // Clear transaction state after successful acceptance
        ctx.metadata.remove("declared_size");

        // Set success response with tracking ID
        ctx.response = Some((
            Status::Ok,
            tracking_id.as_ref().map_or_else(
                || Cow::Borrowed("Ok: queued"),
                |id| Cow::Owned(format!("Ok: queued as {id}")),
            ),
        ));

        // Audit log: Message received and spooled
        if let Some(id) = &tracking_id {
            let sender = ctx.sender();
            let recipients = ctx.recipients();
            let size = ctx.data.as_ref().map_or(0, |d| d.len());
            let from_ip = self.peer.to_string();

            empath_common::audit::log_message_received(
                &id.to_string(),
                &sender,
                &recipients,
                size,
                &from_ip,
            );
        }

        // Dispatch message received event
        modules::dispatch(modules::Event::Event(modules::Ev::SmtpMessageReceived), ctx);
    }
}

#[async_trait]
impl SmtpTransactionHandler for DefaultSmtpTransactionHandler {
    async fn validate_connect(&mut self, ctx: &mut Context) -> bool {
        // Dispatch connection opened event first
        modules::dispatch(modules::Event::Event(modules::Ev::ConnectionOpened), ctx);

        // Then validate
        modules::dispatch(
            modules::Event::Validate(modules::validate::Event::Connect),
            ctx,
        )
    }

    async fn validate_ehlo(&mut self, ctx: &mut Context) -> bool {
        modules::dispatch(
            modules::Event::Validate(modules::validate::Event::Ehlo),
            ctx,
        )
    }

    async fn validate_mail_from(&mut self, ctx: &mut Context) -> bool {
        modules::dispatch(
            modules::Event::Validate(modules::validate::Event::MailFrom),
            ctx,
        )
    }

    async fn validate_rcpt_to(&mut self, ctx: &mut Context) -> bool {
        if self.auth_required && !ctx.authenticated {
            ctx.response = Some((
                Status::AuthRequired,
                Cow::Borrowed("Authentication required"),
            ));
            return false;
        }

        if let Some(max_recipients) = self.max_recipients
            && ctx
                .envelope
                .recipients()
                .is_some_and(|rcpts| rcpts.len() > max_recipients)
        {
            ctx.response = Some((Status::RateLimited, Cow::Borrowed("Too many recipients")));
            return false;
        }

        modules::dispatch(
            modules::Event::Validate(modules::validate::Event::RcptTo),
            ctx,
        )
    }

    async fn handle_message(&mut self, ctx: &mut Context) -> bool {
        // Dispatch validation
        let valid = modules::dispatch(
            modules::Event::Validate(modules::validate::Event::Data),
            ctx,
        );

        // If validation passed, do the work (spooling)
        if valid {
            // Check if any module set a rejection response
            // Positive responses are < 400 (2xx and 3xx codes)
            let should_spool = ctx
                .response
                .as_ref()
                .is_none_or(|(status, _)| !status.is_temporary() && !status.is_permanent());

            if should_spool {
                self.spool_message(ctx).await;
            }
        }

        valid
    }

    async fn validate_auth(&mut self, ctx: &mut Context, username: &str, password: &str) -> bool {
        let ip = self.peer.ip();

        if let Some(gate) = &self.auth_gate
            && gate.is_blocked(ip)
        {
            ctx.response = Some((
                Status::AuthCredentialsInvalid,
                Cow::Borrowed("Authentication failed"),
            ));
            return false;
        }

        let valid = self
            .users
            .as_ref()
            .is_some_and(|users| users.get(username).is_some_and(|expected| expected == password));

        if valid {
            if let Some(gate) = &self.auth_gate {
                gate.record_success(ip);
            }
            ctx.authenticated = true;
            ctx.response = Some((
                Status::AuthSuccessful,
                Cow::Borrowed("Authentication successful"),
            ));
        } else {
            if let Some(gate) = &self.auth_gate {
                gate.record_failure(ip);
            }
            ctx.authenticated = false;
            ctx.response = Some((
                Status::AuthCredentialsInvalid,
                Cow::Borrowed("Authentication credentials invalid"),
            ));
        }

        valid
    }
}

/// Helper function to determine if state requires validation.
///
/// This is used by the session orchestrator to decide whether to call
/// the business handler after an FSM transition.
///
/// # Arguments
///
/// * `state` - The current protocol state
///
/// # Returns
///
/// `true` if the state requires business logic validation
#[must_use]
pub const fn requires_validation(state: &State) -> bool {
    matches!(
        state,
        State::Connect(_)
            | State::Ehlo(_)
            | State::Helo(_)
            | State::MailFrom(_)
            | State::RcptTo(_)
            | State::PostDot(_)
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::MailParameters;

    #[test]
    fn test_default_handler_creation() {
        let handler = DefaultSmtpTransactionHandler::new(None, "127.0.0.1:1234".parse().unwrap());
        assert!(handler.spool.is_none());
        assert_eq!(handler.peer.to_string(), "127.0.0.1:1234");
    }

    #[test]
    fn test_default_handler_with_spool() {
        use empath_spool::MemoryBackingStore;

        let spool = Arc::new(MemoryBackingStore::default());
        let handler =
            DefaultSmtpTransactionHandler::new(Some(spool), "127.0.0.1:1234".parse().unwrap());
        assert!(handler.spool.is_some());
    }

    #[tokio::test]
    async fn spool_message_prefers_submission_service_over_raw_spool() {
        use empath_common::{address::Address, envelope::Envelope};
        use empath_spool::MemoryBackingStore;
        use empath_submission::{DomainModeRegistry, SubmissionRateLimitConfig, SubmissionRateLimiter};
        use std::sync::Arc as StdArc;

        let raw_spool = StdArc::new(MemoryBackingStore::default());
        let submission_primary = StdArc::new(MemoryBackingStore::default());
        let submission = StdArc::new(SubmissionService::new(
            submission_primary.clone(),
            None,
            StdArc::new(DomainModeRegistry::new()),
            StdArc::new(SubmissionRateLimiter::new(SubmissionRateLimitConfig::default())),
        ));

        let handler = DefaultSmtpTransactionHandler::new(
            Some(raw_spool.clone()),
            "127.0.0.1:1234".parse().unwrap(),
        )
        .with_submission(Some(submission));

        let mut envelope = Envelope::default();
        *envelope.sender_mut() = Some(Address(mailparse::addrparse("a@ex.com").unwrap().remove(0)));
        *envelope.recipients_mut() = Some(
            vec![Address(
                mailparse::addrparse("u@dest.com").unwrap().remove(0),
            )]
            .into(),
        );

        let mut ctx = Context {
            envelope,
            data: Some(std::sync::Arc::from(b"hi".as_slice())),
            ..Default::default()
        };

        handler.spool_message(&mut ctx).await;

        assert_eq!(raw_spool.list().await.unwrap().len(), 0);
        assert_eq!(submission_primary.list().await.unwrap().len(), 1);
        assert!(matches!(ctx.response, Some((Status::Ok, _))));
    }

    #[test]
    fn test_requires_validation() {
        use crate::state::*;

        // States that require validation
        assert!(requires_validation(&State::Connect(Connect)));
        assert!(requires_validation(&State::Ehlo(Ehlo {
            id: "test".to_string()
        })));
        assert!(requires_validation(&State::Helo(Helo {
            id: "test".to_string()
        })));
        assert!(requires_validation(&State::MailFrom(MailFrom {
            sender: None,
            params: MailParameters::default()
        })));

        // States that don't require validation
        assert!(!requires_validation(&State::Data(Data)));
        assert!(!requires_validation(&State::Quit(Quit)));
        assert!(!requires_validation(&State::Invalid(Invalid {
            reason: String::new()
        })));
    }
}
