//! The shared submission path: the single entry point SMTP and HTTP intake
//! both funnel through before a message reaches the delivery queue.
//!
//! Implements the dispatch described in the spec: validate the envelope,
//! check rate limits across every applicable axis, then branch on the
//! sender domain's submission mode (production/sandbox/redirect/bcc).

use std::sync::Arc;

use empath_common::{context::Context, tracing};
use empath_spool::{BackingStore, SpooledMessageId};

use crate::{
    domain_mode::{DomainModeRegistry, Mode},
    error::SubmissionError,
    rate_limiter::{Axis, SubmissionRateLimiter},
    sandbox::{self, SandboxMeta},
};

/// Where a submission originated, carried through for audit logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Smtp,
    Http,
}

/// The queue/sandbox identifier(s) produced by a successful submission.
#[derive(Debug, Clone)]
pub enum SubmissionOutcome {
    /// Enqueued for delivery under the given id.
    Enqueued(SpooledMessageId),
    /// Captured to the sandbox under the given id; nothing was enqueued.
    Sandboxed(SpooledMessageId),
}

impl SubmissionOutcome {
    /// The id to report back to the submitter, regardless of which branch produced it.
    #[must_use]
    pub const fn id(&self) -> &SpooledMessageId {
        match self {
            Self::Enqueued(id) | Self::Sandboxed(id) => id,
        }
    }
}

/// Shared submission path, constructed once and handed to both the SMTP
/// transaction handler and the HTTP submission API.
pub struct SubmissionService {
    primary: Arc<dyn BackingStore>,
    sandbox: Option<Arc<dyn BackingStore>>,
    domain_modes: Arc<DomainModeRegistry>,
    rate_limiter: Arc<SubmissionRateLimiter>,
}

impl SubmissionService {
    /// Construct a submission service over the given storage and policy handles.
    #[must_use]
    pub fn new(
        primary: Arc<dyn BackingStore>,
        sandbox: Option<Arc<dyn BackingStore>>,
        domain_modes: Arc<DomainModeRegistry>,
        rate_limiter: Arc<SubmissionRateLimiter>,
    ) -> Self {
        Self {
            primary,
            sandbox,
            domain_modes,
            rate_limiter,
        }
    }

    /// Submit `context` (envelope + body already populated) for delivery.
    ///
    /// `client_ip` and `api_key` feed the `ip:` and `apikey:` rate-limit
    /// axes; either may be absent (e.g. HTTP submissions behind a proxy
    /// that strips the real IP, or SMTP submissions which have no API key).
    ///
    /// # Errors
    /// Returns [`SubmissionError::InvalidEnvelope`] if the sender or
    /// recipient list is missing, [`SubmissionError::RateLimited`] if any
    /// admission axis is exceeded, or [`SubmissionError::Storage`] if the
    /// write to the queue or sandbox fails.
    pub async fn submit(
        &self,
        mut context: Context,
        client_ip: Option<&str>,
        api_key: Option<&str>,
        _source: Source,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let sender = context
            .envelope
            .sender()
            .ok_or_else(|| SubmissionError::InvalidEnvelope("missing MAIL FROM sender".into()))?;
        let sender_domain = sender
            .domain()
            .ok_or_else(|| SubmissionError::InvalidEnvelope("sender has no domain".into()))?
            .to_string();
        let sender_mailbox = sender.mailbox().unwrap_or_default().to_string();

        let recipients: Vec<String> = context
            .envelope
            .recipients()
            .map(|list| {
                list.iter()
                    .filter_map(|a| a.mailbox().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        if recipients.is_empty() {
            return Err(SubmissionError::InvalidEnvelope(
                "at least one recipient is required".into(),
            ));
        }

        let recipient_domains: Vec<String> = {
            let mut domains: Vec<String> = recipients
                .iter()
                .filter_map(|r| r.rsplit_once('@').map(|(_, d)| d.to_string()))
                .collect();
            domains.sort_unstable();
            domains.dedup();
            domains
        };

        let mut axes = vec![Axis::Global, Axis::Domain(sender_domain.clone())];
        if !sender_mailbox.is_empty() {
            axes.push(Axis::Sender(sender_mailbox));
        }
        if let Some(ip) = client_ip {
            axes.push(Axis::Ip(ip.to_string()));
        }
        if let Some(key) = api_key {
            axes.push(Axis::ApiKey(hash_api_key(key)));
        }
        axes.extend(recipient_domains.into_iter().map(Axis::RecipientDomain));

        self.rate_limiter
            .check_and_admit(&axes)
            .map_err(|exceeded| SubmissionError::RateLimited {
                axis: exceeded.axis,
                retry_after: exceeded.retry_after,
            })?;

        let policy = self.domain_modes.resolve(&sender_domain);

        match policy.mode {
            Mode::Production => {
                let id = self.primary.write(&mut context).await?;
                tracing::debug!(message_id = %id, "submission enqueued in production mode");
                Ok(SubmissionOutcome::Enqueued(id))
            }

            Mode::Sandbox => {
                let id = self.snapshot_sandbox(policy.mode, &recipients, policy.simulated_err.as_deref(), context.clone()).await?;
                tracing::debug!(message_id = %id, domain = %sender_domain, "submission captured in sandbox mode");
                Ok(SubmissionOutcome::Sandboxed(id))
            }

            Mode::Redirect => {
                self.snapshot_sandbox(policy.mode, &recipients, policy.simulated_err.as_deref(), context.clone()).await?;

                *context.envelope.recipients_mut() = Some(parse_address_list(&policy.redirect_to));

                let id = self.primary.write(&mut context).await?;
                tracing::debug!(message_id = %id, domain = %sender_domain, "submission redirected and enqueued");
                Ok(SubmissionOutcome::Enqueued(id))
            }

            Mode::Bcc => {
                let id = self.primary.write(&mut context).await?;

                let mut clone = context.clone();
                clone.tracking_id = None;
                *clone.envelope.recipients_mut() = Some(parse_address_list(&policy.bcc_to));
                let bcc_id = self.primary.write(&mut clone).await?;

                tracing::debug!(message_id = %id, bcc_message_id = %bcc_id, domain = %sender_domain, "submission enqueued with bcc clone");
                Ok(SubmissionOutcome::Enqueued(id))
            }
        }
    }

    async fn snapshot_sandbox(
        &self,
        mode: Mode,
        original_to: &[String],
        simulated_err: Option<&str>,
        context: Context,
    ) -> Result<SpooledMessageId, SubmissionError> {
        let Some(sandbox) = &self.sandbox else {
            // Sandbox capture disabled: still need an id for the caller.
            return Ok(SpooledMessageId::generate());
        };

        let meta = SandboxMeta {
            mode,
            original_to,
            simulated_err,
        };

        sandbox::capture(sandbox.as_ref(), meta, context)
            .await
            .map_err(SubmissionError::from)
    }
}

fn hash_api_key(key: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn parse_address_list(addrs: &[String]) -> empath_common::address::AddressList {
    addrs
        .iter()
        .filter_map(|a| mailparse::addrparse(a).ok().map(|mut list| list.remove(0)))
        .map(empath_common::address::Address::from)
        .collect::<Vec<_>>()
        .into()
}

#[cfg(test)]
mod tests {
    use ahash::AHashMap;
    use empath_common::{address::Address, envelope::Envelope};
    use empath_spool::MemoryBackingStore;

    use super::*;
    use crate::{domain_mode::DomainModeConfig, rate_limiter::SubmissionRateLimitConfig};

    fn ctx(from: &str, to: &[&str]) -> Context {
        let mut envelope = Envelope::default();
        *envelope.sender_mut() = Some(Address(mailparse::addrparse(from).unwrap().remove(0)));
        *envelope.recipients_mut() = Some(
            to.iter()
                .map(|a| Address(mailparse::addrparse(a).unwrap().remove(0)))
                .collect::<Vec<_>>()
                .into(),
        );

        Context {
            envelope,
            data: Some(std::sync::Arc::from(b"hi".as_slice())),
            metadata: AHashMap::new(),
            ..Default::default()
        }
    }

    fn service(modes: DomainModeRegistry) -> SubmissionService {
        SubmissionService::new(
            Arc::new(MemoryBackingStore::default()),
            Some(Arc::new(MemoryBackingStore::default())),
            Arc::new(modes),
            Arc::new(SubmissionRateLimiter::new(SubmissionRateLimitConfig::default())),
        )
    }

    #[tokio::test]
    async fn production_mode_enqueues_normally() {
        let svc = service(DomainModeRegistry::new());
        let outcome = svc
            .submit(ctx("a@ex.com", &["u@dest.com"]), None, None, Source::Smtp)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmissionOutcome::Enqueued(_)));
    }

    #[tokio::test]
    async fn sandbox_mode_never_enqueues() {
        let mut modes = DomainModeRegistry::new();
        modes.insert(
            "foo.com",
            DomainModeConfig {
                mode: Mode::Sandbox,
                ..Default::default()
            },
        );
        let svc = service(modes);

        let outcome = svc
            .submit(ctx("a@foo.com", &["u@dest.com"]), None, None, Source::Smtp)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmissionOutcome::Sandboxed(_)));
        assert_eq!(svc.primary.list().await.unwrap().len(), 0);
        assert_eq!(svc.sandbox.as_ref().unwrap().list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn redirect_mode_rewrites_recipients_and_snapshots() {
        let mut modes = DomainModeRegistry::new();
        modes.insert(
            "foo.com",
            DomainModeConfig {
                mode: Mode::Redirect,
                redirect_to: vec!["catch@local".to_string()],
                ..Default::default()
            },
        );
        let svc = service(modes);

        let outcome = svc
            .submit(ctx("a@foo.com", &["u@dest.com"]), None, None, Source::Smtp)
            .await
            .unwrap();
        let SubmissionOutcome::Enqueued(id) = outcome else {
            panic!("expected enqueued outcome");
        };

        let stored = svc.primary.read(&id).await.unwrap();
        let recipients = stored.envelope.recipients().unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].mailbox(), Some("catch@local"));

        assert_eq!(svc.sandbox.as_ref().unwrap().list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bcc_mode_enqueues_original_and_a_clone() {
        let mut modes = DomainModeRegistry::new();
        modes.insert(
            "foo.com",
            DomainModeConfig {
                mode: Mode::Bcc,
                bcc_to: vec!["audit@local".to_string()],
                ..Default::default()
            },
        );
        let svc = service(modes);

        let outcome = svc
            .submit(ctx("a@foo.com", &["u@dest.com"]), None, None, Source::Smtp)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmissionOutcome::Enqueued(_)));
        assert_eq!(svc.primary.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_recipients_is_rejected() {
        let svc = service(DomainModeRegistry::new());
        let result = svc
            .submit(ctx("a@ex.com", &[]), None, None, Source::Smtp)
            .await;
        assert!(matches!(result, Err(SubmissionError::InvalidEnvelope(_))));
    }

    #[tokio::test]
    async fn rate_limited_sender_is_rejected_with_retry_after() {
        let modes = DomainModeRegistry::new();
        let svc = SubmissionService::new(
            Arc::new(MemoryBackingStore::default()),
            None,
            Arc::new(modes),
            Arc::new(SubmissionRateLimiter::new(SubmissionRateLimitConfig {
                per_sender: crate::rate_limiter::AxisLimit {
                    per_hour: Some(1),
                    per_day: None,
                },
                ..Default::default()
            })),
        );

        svc.submit(ctx("a@ex.com", &["u@dest.com"]), None, None, Source::Smtp)
            .await
            .unwrap();

        let result = svc
            .submit(ctx("a@ex.com", &["u@dest.com"]), None, None, Source::Smtp)
            .await;
        assert!(matches!(result, Err(SubmissionError::RateLimited { .. })));
    }
}
