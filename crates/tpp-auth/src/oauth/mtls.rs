//! HTTP clients with the mutual-TLS client certificate.

use std::time::Duration;

use pkcs8::der::zeroize::Zeroizing;
use pkcs8::{EncodePrivateKey, EncryptedPrivateKeyInfo, LineEnding, SecretDocument};
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;

use crate::config::{AuthConfig, MtlsConfig};
use crate::error::AuthError;

/// Builds a client that presents the configured client certificate.
///
/// Without an `[mtls]` section the client uses plain TLS.
///
/// # Errors
///
/// Returns `AuthError::Configuration` if the certificate or key cannot be
/// read or decrypted.
pub fn build_http_client(config: &AuthConfig, timeout: Duration) -> Result<reqwest::Client, AuthError> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(mtls) = &config.mtls {
        builder = builder.identity(load_identity(mtls)?);
        tracing::debug!(certificate = %mtls.certificate_path.display(), "client certificate loaded");
    }
    builder
        .build()
        .map_err(|e| AuthError::configuration(format!("http client: {e}")))
}

fn load_identity(mtls: &MtlsConfig) -> Result<reqwest::Identity, AuthError> {
    let certificate = std::fs::read_to_string(&mtls.certificate_path).map_err(|e| {
        AuthError::configuration(format!("{}: {e}", mtls.certificate_path.display()))
    })?;
    let key = std::fs::read_to_string(&mtls.private_key_path).map_err(|e| {
        AuthError::configuration(format!("{}: {e}", mtls.private_key_path.display()))
    })?;
    let key = pkcs8_pem(&key, mtls.passphrase.as_deref())?;
    reqwest::Identity::from_pkcs8_pem(certificate.as_bytes(), key.as_bytes())
        .map_err(|e| AuthError::configuration(format!("client identity: {e}")))
}

/// Normalizes a private key PEM to unencrypted PKCS#8, which is the only
/// form the TLS backend accepts.
pub(crate) fn pkcs8_pem(pem: &str, passphrase: Option<&str>) -> Result<Zeroizing<String>, AuthError> {
    let invalid = |e: &dyn std::fmt::Display| AuthError::configuration(format!("client key: {e}"));

    let (label, document) = SecretDocument::from_pem(pem).map_err(|e| invalid(&e))?;
    match (label, passphrase) {
        ("ENCRYPTED PRIVATE KEY", Some(passphrase)) => {
            let encrypted =
                EncryptedPrivateKeyInfo::try_from(document.as_bytes()).map_err(|e| invalid(&e))?;
            let decrypted = encrypted.decrypt(passphrase).map_err(|e| invalid(&e))?;
            decrypted
                .to_pem("PRIVATE KEY", LineEnding::LF)
                .map_err(|e| invalid(&e))
        }
        ("ENCRYPTED PRIVATE KEY", None) => Err(AuthError::configuration(
            "client key is encrypted but no passphrase is configured",
        )),
        ("PRIVATE KEY", _) => Ok(Zeroizing::new(pem.to_string())),
        ("RSA PRIVATE KEY", _) => RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| invalid(&e))?
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| invalid(&e)),
        ("EC PRIVATE KEY", _) => p256::SecretKey::from_sec1_pem(pem)
            .map_err(|e| invalid(&e))?
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| invalid(&e)),
        (other, _) => Err(AuthError::configuration(format!(
            "unsupported client key type: {other}"
        ))),
    }
}

/// Strips the PEM armor and line breaks from a certificate, as the sandbox
/// expects it in the `x-client-certificate` header.
#[must_use]
pub fn certificate_header_value(certificate_pem: &str) -> String {
    certificate_pem
        .replace("-----BEGIN CERTIFICATE-----", "")
        .replace("-----END CERTIFICATE-----", "")
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n'))
        .collect::<String>()
        .trim()
        .to_string()
}
