//! RS256 ID token verification against a JSON Web Key Set.

use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey, errors::Error as RsaError};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

/// Tolerated clock difference with the identity provider.
pub const CLOCK_SKEW_SECONDS: i64 = 60;

/// Why an ID token was refused.
///
/// [`IdTokenError::KeysUnavailable`] is the only variant that says nothing
/// about the token itself: the provider's key set could not be fetched.
#[derive(Debug, Error)]
pub enum IdTokenError {
    #[error("id token is not a compact JWS")]
    Malformed,
    #[error("id token segment is not base64url")]
    Encoding,
    #[error("id token segment is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("id token algorithm {0} is not RS256")]
    Algorithm(String),
    #[error("no provider key matches kid {0:?}")]
    UnknownKid(String),
    #[error("signing key is not an RSA private key")]
    SigningKey,
    #[error("provider key is not a usable RSA public key")]
    PublicKey(#[from] RsaError),
    #[error("id token signature does not verify")]
    Signature,
    #[error("id token expired")]
    Expired,
    #[error("id token issued in the future")]
    IssuedInFuture,
    #[error("id token issuer does not match the provider")]
    WrongIssuer,
    #[error("id token audience does not include the client id")]
    WrongAudience,
    #[error("provider keys unavailable: {0}")]
    KeysUnavailable(String),
}

impl IdTokenError {
    /// Whether the failure comes from reaching the provider rather than from
    /// the token.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::KeysUnavailable(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Find the RSA key for a token.
    ///
    /// Tokens without a `kid` are accepted only when the set holds exactly one
    /// RSA key.
    #[must_use]
    pub fn find(&self, kid: Option<&str>) -> Option<&Jwk> {
        let mut rsa_keys = self.keys.iter().filter(|key| key.kty == "RSA");
        match kid {
            Some(kid) => rsa_keys.find(|key| key.kid.as_deref() == Some(kid)),
            None => {
                let key = rsa_keys.next()?;
                rsa_keys.next().is_none().then_some(key)
            }
        }
    }

    /// Build a JWKS from an RSA private key (PEM or DER). Used for fixtures.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be parsed.
    pub fn from_rsa_private_key_pem_or_der(
        private_key_pem_or_der: &[u8],
        kid: impl Into<String>,
    ) -> Result<Self, IdTokenError> {
        let private_key = rsa_private_key(private_key_pem_or_der)?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            keys: vec![Jwk::from_rsa_public_key(&public_key, kid)],
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default)]
    pub n: String,
    #[serde(default)]
    pub e: String,
}

impl Jwk {
    #[must_use]
    pub fn from_rsa_public_key(public_key: &RsaPublicKey, kid: impl Into<String>) -> Self {
        Self {
            kty: "RSA".to_string(),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            kid: Some(kid.into()),
            n: Base64UrlUnpadded::encode_string(&public_key.n().to_bytes_be()),
            e: Base64UrlUnpadded::encode_string(&public_key.e().to_bytes_be()),
        }
    }

    /// Convert this JWK to an `RsaPublicKey`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base64url values cannot be decoded or the RSA key is invalid.
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, IdTokenError> {
        let n_bytes = Base64UrlUnpadded::decode_vec(&self.n).map_err(|_| IdTokenError::Encoding)?;
        let e_bytes = Base64UrlUnpadded::decode_vec(&self.e).map_err(|_| IdTokenError::Encoding)?;
        let n = BigUint::from_bytes_be(&n_bytes);
        let e = BigUint::from_bytes_be(&e_bytes);
        Ok(RsaPublicKey::new(n, e)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

/// `aud` may be a single string or an array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    #[must_use]
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Self::One(one) => one == audience,
            Self::Many(many) => many.iter().any(|aud| aud == audience),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Read the header of a token without verifying it.
///
/// # Errors
///
/// Returns an error if the token is malformed.
pub fn peek_header(token: &str) -> Result<TokenHeader, IdTokenError> {
    let header_b64 = token.split('.').next().ok_or(IdTokenError::Malformed)?;
    b64d_json(header_b64)
}

/// Verify an RS256 ID token and return its decoded claims.
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - the `kid` is unknown for the provided JWKS,
/// - the signature is invalid,
/// - the claims fail validation (`iss`, `aud`, `exp`, or an `iat` more than
///   [`CLOCK_SKEW_SECONDS`] ahead).
pub fn verify_rs256(
    token: &str,
    jwks: &Jwks,
    expected_issuer: &str,
    expected_audience: &str,
    now_unix_seconds: i64,
) -> Result<IdTokenClaims, IdTokenError> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(IdTokenError::Malformed)?;
    let claims_b64 = parts.next().ok_or(IdTokenError::Malformed)?;
    let sig_b64 = parts.next().ok_or(IdTokenError::Malformed)?;
    if parts.next().is_some() {
        return Err(IdTokenError::Malformed);
    }

    let header: TokenHeader = b64d_json(header_b64)?;
    if header.alg != "RS256" {
        return Err(IdTokenError::Algorithm(header.alg));
    }

    let jwk = jwks
        .find(header.kid.as_deref())
        .ok_or_else(|| IdTokenError::UnknownKid(header.kid.clone().unwrap_or_default()))?;

    let verifying_key = VerifyingKey::<Sha256>::new(jwk.to_rsa_public_key()?);
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature_bytes = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| IdTokenError::Encoding)?;
    let signature = Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| IdTokenError::Signature)?;
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| IdTokenError::Signature)?;

    let claims: IdTokenClaims = b64d_json(claims_b64)?;
    if claims.iss.trim_end_matches('/') != expected_issuer.trim_end_matches('/') {
        return Err(IdTokenError::WrongIssuer);
    }
    if !claims.aud.contains(expected_audience) {
        return Err(IdTokenError::WrongAudience);
    }
    if claims.exp <= now_unix_seconds {
        return Err(IdTokenError::Expired);
    }
    if claims.iat > now_unix_seconds.saturating_add(CLOCK_SKEW_SECONDS) {
        return Err(IdTokenError::IssuedInFuture);
    }

    Ok(claims)
}

/// Create an RS256 signed token. Used to build fixtures.
///
/// # Errors
///
/// Returns an error if the private key cannot be parsed or the JSON cannot be encoded.
pub fn sign_rs256<T: Serialize>(
    private_key_pem_or_der: &[u8],
    kid: impl Into<String>,
    claims: &T,
) -> Result<String, IdTokenError> {
    let header = TokenHeader {
        alg: "RS256".to_string(),
        typ: Some("JWT".to_string()),
        kid: Some(kid.into()),
    };
    let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(claims)?);

    let signing_key = SigningKey::<Sha256>::new(rsa_private_key(private_key_pem_or_der)?);
    let signature: Signature = signing_key.sign(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_vec());

    Ok(format!("{signing_input}.{signature_b64}"))
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, IdTokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, IdTokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| IdTokenError::Encoding)?;
    Ok(serde_json::from_slice(&bytes)?)
}

// PKCS#8 or PKCS#1, PEM or DER.
fn rsa_private_key(pem_or_der: &[u8]) -> Result<RsaPrivateKey, IdTokenError> {
    let parsed = match std::str::from_utf8(pem_or_der) {
        Ok(pem) if pem.trim_start().starts_with("-----BEGIN") => RsaPrivateKey::from_pkcs8_pem(pem)
            .ok()
            .or_else(|| RsaPrivateKey::from_pkcs1_pem(pem).ok()),
        _ => RsaPrivateKey::from_pkcs8_der(pem_or_der)
            .ok()
            .or_else(|| RsaPrivateKey::from_pkcs1_der(pem_or_der).ok()),
    };
    parsed.ok_or(IdTokenError::SigningKey)
}

#[cfg(test)]
pub(crate) const TEST_PRIVATE_KEY_PEM: &str =
    include_str!("../../tests/fixtures/idp-signing-key.pem");
