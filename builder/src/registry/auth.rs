//! Registry-scoped bearer tokens minted from a local RSA key pair.
//!
//! The registry trusts tokens signed by our private key, matched via
//! the `kid` header: the canonical fingerprint of the public key
//! (SHA-256 of the SPKI DER, truncated to 30 bytes, base32-grouped).
//! The derivation must be bit-exact or the registry rejects every
//! token. Minting is pure given the key material; no network call is
//! involved.

use std::path::Path;
use std::time::Duration;

use der::{DecodePem, Encode};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use spki::SubjectPublicKeyInfoOwned;
use uuid::Uuid;
use x509_cert::Certificate;

use wharf_core::config::RegistryConfig;
use wharf_core::error::{Result, WharfError};

const KID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Access token lifetime: 1 hour.
const TOKEN_TTL: Duration = Duration::from_secs(3600);

/// An action a token grants on a registry resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryAction {
    #[serde(rename = "push")]
    Push,
    #[serde(rename = "pull")]
    Pull,
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "*")]
    Wildcard,
}

/// One scope entry of an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    pub actions: Vec<RegistryAction>,
}

impl Access {
    /// Scope over one repository.
    pub fn repository(name: impl Into<String>, actions: &[RegistryAction]) -> Self {
        Self {
            resource_type: "repository".to_string(),
            name: name.into(),
            class: None,
            actions: actions.to_vec(),
        }
    }
}

/// Identity a token is minted for.
#[derive(Debug, Clone)]
pub struct RegistryUser {
    /// External user id (`sub` claim)
    pub id: String,
    /// Internal record id (`user` claim)
    pub internal_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    user: String,
    access: Vec<Access>,
    jti: String,
    aud: String,
    iss: String,
    iat: u64,
    exp: u64,
}

/// Read a bit (MSB first) out of a byte buffer.
fn bit_at(buf: &[u8], index: usize) -> u32 {
    ((buf[index / 8] >> (7 - index % 8)) & 1) as u32
}

/// Encode a byte buffer in the registry's key-fingerprint format:
/// 5 bits per symbol, MSB first, into the `A-Z2-7` alphabet, grouped
/// into 4-character blocks joined by colons.
///
/// The buffer length must be a non-zero multiple of 5 bytes; anything
/// else is a programming error and is rejected rather than silently
/// truncated.
pub fn format_kid(buf: &[u8]) -> Result<String> {
    let bit_len = buf.len() * 8;
    if buf.is_empty() || bit_len % 40 != 0 {
        return Err(WharfError::KeyError(format!(
            "Invalid kid input of {} bits, expected non-zero multiple of 40",
            bit_len
        )));
    }

    let mut symbols = String::with_capacity(bit_len / 5);
    for i in (0..bit_len).step_by(5) {
        let mut idx = 0u32;
        for j in 0..5 {
            idx = (idx << 1) | bit_at(buf, i + j);
        }
        symbols.push(KID_ALPHABET[idx as usize] as char);
    }

    let grouped: Vec<&str> = symbols
        .as_bytes()
        .chunks(4)
        .map(|chunk| std::str::from_utf8(chunk).expect("alphabet is ASCII"))
        .collect();
    Ok(grouped.join(":"))
}

/// Derive the key identifier for a public key given its SPKI DER form.
pub fn derive_kid(spki_der: &[u8]) -> Result<String> {
    let hash = Sha256::digest(spki_der);
    format_kid(&hash[..30])
}

/// Extract the SPKI DER bytes from a public key PEM.
///
/// Accepts either a bare SPKI public key or an X.509 certificate (the
/// registry deployment historically shipped a certificate).
pub fn public_key_der(pem: &str) -> Result<Vec<u8>> {
    let spki = if pem.contains("BEGIN CERTIFICATE") {
        let cert = Certificate::from_pem(pem.as_bytes())
            .map_err(|e| WharfError::KeyError(format!("Corrupt certificate: {e}")))?;
        cert.tbs_certificate.subject_public_key_info
    } else {
        SubjectPublicKeyInfoOwned::from_pem(pem.as_bytes())
            .map_err(|e| WharfError::KeyError(format!("Corrupt public key: {e}")))?
    };

    spki.to_der()
        .map_err(|e| WharfError::KeyError(format!("Failed to encode SPKI: {e}")))
}

/// Deterministic service identity derived from the private key: the
/// SHA-256 of the key material truncated to 16 bytes with the RFC 4122
/// version/variant bits forced, rendered as a UUID.
fn service_uuid(private_pem: &[u8]) -> String {
    let hash = Sha256::digest(private_pem);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes).to_string()
}

/// Mints short-lived, scope-limited registry tokens.
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    kid: String,
    admin_id: String,
    service: String,
    issuer: String,
}

impl TokenIssuer {
    /// Build an issuer from in-memory PEM key material.
    pub fn new(
        private_pem: &[u8],
        public_pem: &str,
        service: impl Into<String>,
        issuer: impl Into<String>,
    ) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_pem)
            .map_err(|e| WharfError::KeyError(format!("Corrupt private key: {e}")))?;
        let kid = derive_kid(&public_key_der(public_pem)?)?;
        let admin_id = service_uuid(private_pem);

        Ok(Self {
            encoding_key,
            kid,
            admin_id,
            service: service.into(),
            issuer: issuer.into(),
        })
    }

    /// Load the key pair from disk. Missing or corrupt key files are
    /// fatal: the builder cannot start without them.
    pub fn from_files(private_key: &Path, public_key: &Path, config: &RegistryConfig) -> Result<Self> {
        let private_pem = std::fs::read(private_key).map_err(|e| {
            WharfError::KeyError(format!(
                "Cannot read private key {}: {e}",
                private_key.display()
            ))
        })?;
        let public_pem = std::fs::read_to_string(public_key).map_err(|e| {
            WharfError::KeyError(format!(
                "Cannot read public key {}: {e}",
                public_key.display()
            ))
        })?;

        let issuer = Self::new(&private_pem, &public_pem, &config.service, &config.issuer)?;
        tracing::info!(kid = %issuer.kid, "Registry signing key loaded");
        Ok(issuer)
    }

    /// The key identifier carried in every token header.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Stable internal service identity, derived from the private key.
    pub fn admin_id(&self) -> &str {
        &self.admin_id
    }

    /// Mint a signed token granting `access` to `user`, valid for one
    /// hour.
    pub fn access_token(&self, user: &RegistryUser, access: &[Access]) -> Result<String> {
        let now = chrono::Utc::now().timestamp() as u64;
        let claims = Claims {
            sub: user.id.clone(),
            user: user.internal_id.clone(),
            access: access.to_vec(),
            jti: Uuid::new_v4().to_string(),
            aud: self.service.clone(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + TOKEN_TTL.as_secs(),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());

        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| WharfError::KeyError(format!("Token signing failed: {e}")))
    }
}
