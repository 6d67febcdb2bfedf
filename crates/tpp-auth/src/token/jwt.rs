//! Request signing.
//!
//! [`KeySigner`] holds the relying party's private key and produces compact
//! JWS (signed request objects) and detached JWS (`header..signature`) over
//! request bodies.
//!
//! ## Supported Algorithms
//!
//! - **ES256**: ECDSA P-256 with SHA-256 (sandbox profile)
//! - **RS256**: RSA PKCS#1 v1.5 with SHA-256 (production profile)
//! - **PS256**: RSA-PSS with SHA-256
//!
//! The same list is the verification allow-list for inbound ID tokens and
//! response signatures.
//!
//! ## Example
//!
//! ```ignore
//! use tpp_auth::token::jwt::{KeySigner, SigningAlgorithm, SigningKey};
//!
//! let key = SigningKey::from_pem_file("kid-1", SigningAlgorithm::ES256, "signing.pem", None)?;
//! let signer = KeySigner::new(key);
//! let request_object = signer.sign(&claims)?;
//! let (body, signature) = signer.sign_json_detached(&payment)?;
//! ```

use std::fmt;
use std::path::Path;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use p256::SecretKey as EcSecretKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::token::detached::DetachedJws;

// ============================================================================
// Error Types
// ============================================================================

/// Errors from key loading and signing.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The key material could not be read or parsed.
    #[error("Failed to load signing key: {0}")]
    KeyLoad(String),

    /// The key does not fit the configured algorithm.
    #[error("Key does not match algorithm {0}")]
    AlgorithmMismatch(SigningAlgorithm),

    /// The claims could not be serialized.
    #[error("Failed to serialize claims: {0}")]
    Serialization(String),

    /// The signing primitive failed.
    #[error("Signing failed: {0}")]
    Sign(String),
}

impl SigningError {
    /// Creates a new `KeyLoad` error.
    #[must_use]
    pub fn key_load(message: impl Into<String>) -> Self {
        Self::KeyLoad(message.into())
    }

    /// Creates a new `Sign` error.
    #[must_use]
    pub fn sign(message: impl Into<String>) -> Self {
        Self::Sign(message.into())
    }
}

// ============================================================================
// Algorithms
// ============================================================================

/// Algorithms accepted for signing and verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// ECDSA P-256 with SHA-256.
    ES256,
    /// RSA PKCS#1 v1.5 with SHA-256.
    RS256,
    /// RSA-PSS with SHA-256.
    PS256,
}

impl SigningAlgorithm {
    /// Every accepted algorithm.
    pub const ALLOWED: [SigningAlgorithm; 3] = [Self::ES256, Self::RS256, Self::PS256];

    /// Converts to the `jsonwebtoken` algorithm.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::ES256 => Algorithm::ES256,
            Self::RS256 => Algorithm::RS256,
            Self::PS256 => Algorithm::PS256,
        }
    }

    /// Maps a header algorithm onto the allow-list.
    ///
    /// Returns `None` for anything outside it.
    #[must_use]
    pub fn from_jwt_algorithm(alg: Algorithm) -> Option<Self> {
        match alg {
            Algorithm::ES256 => Some(Self::ES256),
            Algorithm::RS256 => Some(Self::RS256),
            Algorithm::PS256 => Some(Self::PS256),
            _ => None,
        }
    }

    /// Returns the JOSE name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ES256 => "ES256",
            Self::RS256 => "RS256",
            Self::PS256 => "PS256",
        }
    }

    /// Returns `true` for RSA-based algorithms.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::PS256)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Keys
// ============================================================================

/// Public half of the signing key in JWK form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    /// Key type ("RSA" or "EC").
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Key use, always "sig".
    #[serde(rename = "use")]
    pub use_: String,

    /// Algorithm.
    pub alg: String,

    /// RSA modulus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// JSON Web Key Set holding public signing keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublicJwks {
    /// Keys in the set.
    pub keys: Vec<PublicJwk>,
}

/// A private signing key with its id and algorithm.
///
/// Immutable once loaded.
pub struct SigningKey {
    kid: String,
    algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_jwk: PublicJwk,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Loads a private key from PEM.
    ///
    /// EC keys may be PKCS#8 or SEC1, RSA keys PKCS#8 or PKCS#1. With a
    /// passphrase the PEM must be an encrypted PKCS#8 document.
    ///
    /// # Errors
    ///
    /// Returns `SigningError::KeyLoad` if the PEM cannot be parsed as a key
    /// of the algorithm's family.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        pem: &str,
        passphrase: Option<&str>,
    ) -> Result<Self, SigningError> {
        let kid = kid.into();
        if algorithm.is_rsa() {
            let private_key = match passphrase {
                Some(pass) => RsaPrivateKey::from_pkcs8_encrypted_pem(pem, pass.as_bytes())
                    .map_err(|e| SigningError::key_load(e.to_string()))?,
                None => RsaPrivateKey::from_pkcs8_pem(pem)
                    .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
                    .map_err(|e| SigningError::key_load(e.to_string()))?,
            };
            Self::from_rsa(kid, algorithm, &private_key)
        } else {
            let secret_key = match passphrase {
                Some(pass) => EcSecretKey::from_pkcs8_encrypted_pem(pem, pass.as_bytes())
                    .map_err(|e| SigningError::key_load(e.to_string()))?,
                None => EcSecretKey::from_pkcs8_pem(pem)
                    .or_else(|_| EcSecretKey::from_sec1_pem(pem))
                    .map_err(|e| SigningError::key_load(e.to_string()))?,
            };
            Self::from_ec(kid, &secret_key)
        }
    }

    /// Reads and loads a private key PEM file.
    ///
    /// # Errors
    ///
    /// Returns `SigningError::KeyLoad` if the file cannot be read or parsed.
    pub fn from_pem_file(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        path: impl AsRef<Path>,
        passphrase: Option<&str>,
    ) -> Result<Self, SigningError> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path)
            .map_err(|e| SigningError::key_load(format!("{}: {e}", path.display())))?;
        Self::from_pem(kid, algorithm, &pem, passphrase)
    }

    /// Generates a fresh P-256 key for ES256.
    ///
    /// # Errors
    ///
    /// Returns `SigningError::KeyLoad` if the key cannot be encoded.
    pub fn generate_ec(kid: impl Into<String>) -> Result<Self, SigningError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        Self::from_ec(kid.into(), &secret_key)
    }

    /// Generates a fresh 2048-bit RSA key for RS256 or PS256.
    ///
    /// # Errors
    ///
    /// Returns `SigningError::AlgorithmMismatch` for ES256 and
    /// `SigningError::KeyLoad` if generation fails.
    pub fn generate_rsa(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
    ) -> Result<Self, SigningError> {
        if !algorithm.is_rsa() {
            return Err(SigningError::AlgorithmMismatch(algorithm));
        }
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| SigningError::key_load(e.to_string()))?;
        Self::from_rsa(kid.into(), algorithm, &private_key)
    }

    fn from_ec(kid: String, secret_key: &EcSecretKey) -> Result<Self, SigningError> {
        // jsonwebtoken only reads unencrypted PKCS#8
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| SigningError::key_load(e.to_string()))?;
        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| SigningError::key_load(e.to_string()))?;

        let point = secret_key.public_key().to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| SigningError::key_load("Missing x coordinate"))?;
        let y = point
            .y()
            .ok_or_else(|| SigningError::key_load("Missing y coordinate"))?;
        let x_b64 = URL_SAFE_NO_PAD.encode(x.as_slice());
        let y_b64 = URL_SAFE_NO_PAD.encode(y.as_slice());
        let decoding_key = DecodingKey::from_ec_components(&x_b64, &y_b64)
            .map_err(|e| SigningError::key_load(e.to_string()))?;

        let public_jwk = PublicJwk {
            kty: "EC".to_string(),
            kid: kid.clone(),
            use_: "sig".to_string(),
            alg: SigningAlgorithm::ES256.as_str().to_string(),
            n: None,
            e: None,
            crv: Some("P-256".to_string()),
            x: Some(x_b64),
            y: Some(y_b64),
        };

        Ok(Self {
            kid,
            algorithm: SigningAlgorithm::ES256,
            encoding_key,
            decoding_key,
            public_jwk,
        })
    }

    fn from_rsa(
        kid: String,
        algorithm: SigningAlgorithm,
        private_key: &RsaPrivateKey,
    ) -> Result<Self, SigningError> {
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| SigningError::key_load(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| SigningError::key_load(e.to_string()))?;

        let n_b64 = URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be());
        let e_b64 = URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be());
        let decoding_key = DecodingKey::from_rsa_components(&n_b64, &e_b64)
            .map_err(|e| SigningError::key_load(e.to_string()))?;

        let public_jwk = PublicJwk {
            kty: "RSA".to_string(),
            kid: kid.clone(),
            use_: "sig".to_string(),
            alg: algorithm.as_str().to_string(),
            n: Some(n_b64),
            e: Some(e_b64),
            crv: None,
            x: None,
            y: None,
        };

        Ok(Self {
            kid,
            algorithm,
            encoding_key,
            decoding_key,
            public_jwk,
        })
    }

    /// Returns the key id.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Returns the algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Returns a key that verifies this key's signatures.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Returns the public key as a JWK.
    #[must_use]
    pub fn public_jwk(&self) -> &PublicJwk {
        &self.public_jwk
    }
}

// ============================================================================
// Signer
// ============================================================================

/// Signs request objects and request bodies.
///
/// `Send + Sync`; one instance is shared for the process lifetime.
#[derive(Debug)]
pub struct KeySigner {
    key: SigningKey,
}

impl KeySigner {
    /// Creates a signer around a loaded key.
    #[must_use]
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Loads the key named by the configuration.
    ///
    /// Key-load failures are meant to abort startup.
    ///
    /// # Errors
    ///
    /// Returns `SigningError::KeyLoad` if no key source is configured or the
    /// key cannot be loaded.
    pub fn from_config(config: &AuthConfig) -> Result<Self, SigningError> {
        let algorithm = config.signing_algorithm();
        let signing = &config.signing;
        let passphrase = signing.passphrase.as_deref();
        let key = match (&signing.key_path, &signing.key_pem) {
            (Some(path), _) => {
                SigningKey::from_pem_file(&signing.kid, algorithm, path, passphrase)?
            }
            (None, Some(pem)) => SigningKey::from_pem(&signing.kid, algorithm, pem, passphrase)?,
            (None, None) => return Err(SigningError::key_load("no signing key configured")),
        };
        tracing::info!(kid = %key.kid(), algorithm = %algorithm, "signing key loaded");
        Ok(Self::new(key))
    }

    /// Returns the signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.key.algorithm()
    }

    /// Returns the key id written into headers.
    #[must_use]
    pub fn kid(&self) -> &str {
        self.key.kid()
    }

    /// Returns the underlying key.
    #[must_use]
    pub fn key(&self) -> &SigningKey {
        &self.key
    }

    /// Returns the public key set to publish for this signer.
    #[must_use]
    pub fn jwks(&self) -> PublicJwks {
        PublicJwks {
            keys: vec![self.key.public_jwk().clone()],
        }
    }

    fn header(&self) -> Header {
        let mut header = Header::new(self.key.algorithm().to_jwt_algorithm());
        header.kid = Some(self.key.kid().to_string());
        header
    }

    /// Signs a claim set as a compact JWS with header `{alg, typ, kid}`.
    ///
    /// # Errors
    ///
    /// Returns `SigningError::Sign` if the claims cannot be encoded.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, SigningError> {
        jsonwebtoken::encode(&self.header(), claims, &self.key.encoding_key)
            .map_err(|e| SigningError::sign(e.to_string()))
    }

    /// Signs raw bytes and drops the payload segment, yielding
    /// `header..signature`.
    ///
    /// The receiver rebuilds the payload from the body, so `payload` must be
    /// exactly the bytes that are sent.
    ///
    /// # Errors
    ///
    /// Returns `SigningError::Sign` if the signing primitive fails.
    pub fn sign_detached(&self, payload: &[u8]) -> Result<DetachedJws, SigningError> {
        let header_json = serde_json::to_vec(&self.header())
            .map_err(|e| SigningError::Serialization(e.to_string()))?;
        let header = URL_SAFE_NO_PAD.encode(header_json);
        let signing_input = format!("{header}.{}", URL_SAFE_NO_PAD.encode(payload));
        let signature = jsonwebtoken::crypto::sign(
            signing_input.as_bytes(),
            &self.key.encoding_key,
            self.key.algorithm().to_jwt_algorithm(),
        )
        .map_err(|e| SigningError::sign(e.to_string()))?;
        Ok(DetachedJws::from_parts(&header, &signature))
    }

    /// Serializes `body` once and signs exactly those bytes.
    ///
    /// Returns the body to send together with its detached signature.
    ///
    /// # Errors
    ///
    /// Returns `SigningError::Serialization` or `SigningError::Sign`.
    pub fn sign_json_detached<T: Serialize>(
        &self,
        body: &T,
    ) -> Result<(String, DetachedJws), SigningError> {
        let body =
            serde_json::to_string(body).map_err(|e| SigningError::Serialization(e.to_string()))?;
        let signature = self.sign_detached(body.as_bytes())?;
        Ok((body, signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{Validation, decode, decode_header};
    use serde_json::{Value, json};

    fn ec_signer() -> KeySigner {
        KeySigner::new(SigningKey::generate_ec("test-kid").unwrap())
    }

    fn verify_compact(token: &str, key: &DecodingKey, alg: Algorithm) -> bool {
        let mut validation = Validation::new(alg);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;
        decode::<Value>(token, key, &validation).is_ok()
    }

    #[test]
    fn test_sign_round_trip_es256() {
        let signer = ec_signer();
        let claims = json!({"scope": "openid accounts", "state": "abc"});
        let token = signer.sign(&claims).unwrap();

        let header = decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::ES256);
        assert_eq!(header.kid.as_deref(), Some("test-kid"));
        assert_eq!(header.typ.as_deref(), Some("JWT"));

        assert!(verify_compact(
            &token,
            signer.key().decoding_key(),
            Algorithm::ES256
        ));
    }

    #[test]
    fn test_tampered_payload_or_signature_fails() {
        let signer = ec_signer();
        let token = signer.sign(&json!({"amount": "10.00"})).unwrap();
        let parts: Vec<&str> = token.split('.').collect();

        let other_payload = URL_SAFE_NO_PAD.encode(br#"{"amount":"99.00"}"#);
        let tampered = format!("{}.{}.{}", parts[0], other_payload, parts[2]);
        assert!(!verify_compact(
            &tampered,
            signer.key().decoding_key(),
            Algorithm::ES256
        ));

        let mut signature = URL_SAFE_NO_PAD.decode(parts[2]).unwrap();
        signature[0] ^= 0x01;
        let tampered = format!(
            "{}.{}.{}",
            parts[0],
            parts[1],
            URL_SAFE_NO_PAD.encode(signature)
        );
        assert!(!verify_compact(
            &tampered,
            signer.key().decoding_key(),
            Algorithm::ES256
        ));
    }

    #[test]
    fn test_sign_detached_shape_and_verification() {
        let signer = ec_signer();
        let body = br#"{"amountEUR":"12.00"}"#;
        let detached = signer.sign_detached(body).unwrap();

        let (header, signature) = detached.parts().unwrap();
        assert!(detached.as_str().contains(".."));

        let signing_input = format!("{header}.{}", URL_SAFE_NO_PAD.encode(body));
        let valid = jsonwebtoken::crypto::verify(
            signature,
            signing_input.as_bytes(),
            signer.key().decoding_key(),
            Algorithm::ES256,
        )
        .unwrap();
        assert!(valid);

        let tampered_input = format!("{header}.{}", URL_SAFE_NO_PAD.encode(b"{}"));
        let valid = jsonwebtoken::crypto::verify(
            signature,
            tampered_input.as_bytes(),
            signer.key().decoding_key(),
            Algorithm::ES256,
        )
        .unwrap_or(false);
        assert!(!valid);
    }

    #[test]
    fn test_sign_json_detached_signs_returned_body() {
        let signer = ec_signer();
        let (body, detached) = signer
            .sign_json_detached(&json!({"message": "rent"}))
            .unwrap();
        assert_eq!(body, r#"{"message":"rent"}"#);

        let (header, signature) = detached.parts().unwrap();
        let signing_input = format!("{header}.{}", URL_SAFE_NO_PAD.encode(body.as_bytes()));
        assert!(
            jsonwebtoken::crypto::verify(
                signature,
                signing_input.as_bytes(),
                signer.key().decoding_key(),
                Algorithm::ES256,
            )
            .unwrap()
        );
    }

    #[test]
    fn test_from_pem_pkcs8_sec1_and_encrypted() {
        let secret = EcSecretKey::random(&mut OsRng);

        let pkcs8 = secret.to_pkcs8_pem(LineEnding::LF).unwrap();
        let key = SigningKey::from_pem("k", SigningAlgorithm::ES256, &pkcs8, None).unwrap();
        assert_eq!(key.algorithm(), SigningAlgorithm::ES256);

        let sec1 = secret.to_sec1_pem(LineEnding::LF).unwrap();
        let from_sec1 = SigningKey::from_pem("k", SigningAlgorithm::ES256, &sec1, None).unwrap();
        assert_eq!(from_sec1.public_jwk(), key.public_jwk());

        let encrypted = secret
            .to_pkcs8_encrypted_pem(&mut OsRng, b"hunter2", LineEnding::LF)
            .unwrap();
        let from_encrypted =
            SigningKey::from_pem("k", SigningAlgorithm::ES256, &encrypted, Some("hunter2"))
                .unwrap();
        assert_eq!(from_encrypted.public_jwk(), key.public_jwk());

        let wrong = SigningKey::from_pem("k", SigningAlgorithm::ES256, &encrypted, Some("nope"));
        assert!(matches!(wrong, Err(SigningError::KeyLoad(_))));
    }

    #[test]
    fn test_from_pem_rejects_garbage() {
        let err = SigningKey::from_pem("k", SigningAlgorithm::RS256, "not a pem", None);
        assert!(matches!(err, Err(SigningError::KeyLoad(_))));
    }

    #[test]
    fn test_rs256_round_trip_and_jwk() {
        let key = SigningKey::generate_rsa("rsa-kid", SigningAlgorithm::RS256).unwrap();
        let jwk = key.public_jwk().clone();
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.alg, "RS256");
        assert!(jwk.n.is_some() && jwk.e.is_some());

        let signer = KeySigner::new(key);
        let token = signer.sign(&json!({"iss": "tpp"})).unwrap();
        assert!(verify_compact(
            &token,
            signer.key().decoding_key(),
            Algorithm::RS256
        ));
    }

    #[test]
    fn test_generate_rsa_rejects_ec_algorithm() {
        let err = SigningKey::generate_rsa("k", SigningAlgorithm::ES256).unwrap_err();
        assert!(matches!(
            err,
            SigningError::AlgorithmMismatch(SigningAlgorithm::ES256)
        ));
    }

    #[test]
    fn test_jwks_export() {
        let signer = ec_signer();
        let jwks = serde_json::to_value(signer.jwks()).unwrap();
        let key = &jwks["keys"][0];
        assert_eq!(key["kty"], "EC");
        assert_eq!(key["crv"], "P-256");
        assert_eq!(key["use"], "sig");
        assert_eq!(key["kid"], "test-kid");
        assert!(key.get("n").is_none());
    }

    #[test]
    fn test_algorithm_allow_list() {
        assert_eq!(
            SigningAlgorithm::from_jwt_algorithm(Algorithm::PS256),
            Some(SigningAlgorithm::PS256)
        );
        assert_eq!(SigningAlgorithm::from_jwt_algorithm(Algorithm::HS256), None);
        assert_eq!(SigningAlgorithm::from_jwt_algorithm(Algorithm::ES384), None);
        assert_eq!(SigningAlgorithm::RS256.to_string(), "RS256");
    }
}
