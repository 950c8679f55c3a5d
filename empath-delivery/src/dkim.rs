//! DKIM signing for outbound mail.
//!
//! One key pair per sending domain, loaded from a PEM file on first use and
//! cached for the life of the process. Signing happens once, in
//! [`sign_message`], right before the message is handed to
//! [`crate::smtp_transaction::SmtpTransaction`] for delivery.

use std::{path::PathBuf, sync::Arc};

use dashmap::DashMap;
use mail_auth::{
    common::{
        crypto::{RsaKey, Sha256},
        headers::HeaderWriter,
    },
    dkim::DkimSigner,
};
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, SystemError};

fn default_headers() -> Vec<String> {
    [
        "From",
        "Subject",
        "Date",
        "Message-ID",
        "To",
        "Cc",
        "MIME-Version",
        "Content-Type",
        "Content-Transfer-Encoding",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Per-domain DKIM signing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkimConfig {
    /// Whether to sign outbound mail from this domain.
    #[serde(default)]
    pub enabled: bool,

    /// DKIM selector (the `s=` tag), e.g. `"default"`.
    pub selector: String,

    /// Path to a PEM-encoded PKCS#8 RSA private key.
    pub key_file: PathBuf,

    /// Headers to include in the signature.
    #[serde(default = "default_headers")]
    pub signed_headers: Vec<String>,
}

/// Caches parsed private keys per domain so repeat deliveries don't re-read
/// and re-parse the PEM file on every message.
#[derive(Debug, Default)]
pub struct DkimKeyCache {
    keys: DashMap<String, Arc<RsaKey<Sha256>>>,
}

impl DkimKeyCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn load(&self, domain: &str, key_file: &PathBuf) -> Result<Arc<RsaKey<Sha256>>, DeliveryError> {
        if let Some(key) = self.keys.get(domain) {
            return Ok(Arc::clone(&key));
        }

        let pem = std::fs::read_to_string(key_file).map_err(|e| {
            SystemError::Configuration(format!(
                "failed to read DKIM key file {}: {e}",
                key_file.display()
            ))
        })?;

        let key = RsaKey::<Sha256>::from_pkcs8_pem(&pem).map_err(|e| {
            SystemError::Configuration(format!("invalid DKIM key for {domain}: {e}"))
        })?;

        let key = Arc::new(key);
        self.keys.insert(domain.to_string(), Arc::clone(&key));
        Ok(key)
    }
}

/// Sign a raw RFC 5322 message with the given domain's DKIM key, returning
/// the `DKIM-Signature` header line to prepend.
///
/// # Errors
/// Returns an error if the key file cannot be read/parsed or the message
/// cannot be signed.
pub fn sign_message(
    cache: &DkimKeyCache,
    domain: &str,
    config: &DkimConfig,
    raw_message: &[u8],
) -> Result<String, DeliveryError> {
    let key = cache.load(domain, &config.key_file)?;

    let headers: Vec<&str> = config.signed_headers.iter().map(String::as_str).collect();

    let signer = DkimSigner::from_key((*key).clone())
        .domain(domain)
        .selector(&config.selector)
        .headers(headers);

    let signature = signer
        .sign(raw_message)
        .map_err(|e| SystemError::Internal(format!("DKIM signing failed: {e}")))?;

    Ok(signature.to_header())
}

/// Prepend a DKIM-Signature header to a raw message body.
#[must_use]
pub fn prepend_signature(header: &str, raw_message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(header.len() + raw_message.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(raw_message);
    out
}
