//! JWT token validation and issuance
//!
//! Tokens are verified against the single configured algorithm/secret pair.
//! The algorithm named in the token header is never trusted: it is read as a
//! raw string and compared before any signature check, so `none` or an
//! algorithm the library does not know is still a signing-algorithm failure.

use crate::{config::SecurityConfig, error::AppError, models::user::ExternalIdentity};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// JWT claims handed out after an identity-provider login
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Issuer (identity provider)
    pub iss: String,

    /// Subject (external user id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// JWT ID (external user id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Issued at
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<i64>,

    /// Not before
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub nbf: Option<i64>,

    /// Expiration
    #[serde(default, deserialize_with = "numeric_date")]
    pub exp: Option<i64>,
}

/// NumericDate may carry a fractional part
fn numeric_date<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.map(|n| n.floor() as i64))
}

impl Claims {
    /// Identity used for principal lookup; `jti` wins over `sub`
    pub fn identity(&self) -> Result<ExternalIdentity, AppError> {
        let external_id = self
            .jti
            .as_deref()
            .or(self.sub.as_deref())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::InvalidCredential("token has no subject".to_string()))?;

        if self.iss.is_empty() {
            return Err(AppError::InvalidCredential("token has no issuer".to_string()));
        }

        let email = self
            .email
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::InvalidCredential("token has no email".to_string()))?;

        Ok(ExternalIdentity {
            email: email.to_string(),
            provider: self.iss.clone(),
            external_user_id: external_id.to_string(),
        })
    }
}

/// Header `alg` spelling of a supported algorithm
fn algorithm_name(algorithm: Algorithm) -> &'static str {
    match algorithm {
        Algorithm::HS256 => "HS256",
        Algorithm::HS384 => "HS384",
        Algorithm::HS512 => "HS512",
        Algorithm::ES256 => "ES256",
        Algorithm::ES384 => "ES384",
        Algorithm::RS256 => "RS256",
        Algorithm::RS384 => "RS384",
        Algorithm::RS512 => "RS512",
        Algorithm::PS256 => "PS256",
        Algorithm::PS384 => "PS384",
        Algorithm::PS512 => "PS512",
        Algorithm::EdDSA => "EdDSA",
    }
}

fn malformed() -> AppError {
    AppError::InvalidCredential("malformed token".to_string())
}

/// Decode one base64url JSON segment of a compact token
fn decode_segment(segment: &str) -> Result<Value, AppError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!("Token segment is not base64url: {}", e);
        malformed()
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!("Token segment is not JSON: {}", e);
        malformed()
    })
}

/// JWT service
pub struct JwtService {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    /// Create JWT service from config
    pub fn from_config(config: &SecurityConfig) -> Result<Self, AppError> {
        let secret = config.jwt_secret.expose_secret();

        if secret.len() < 32 {
            return Err(AppError::Config("JWT secret too short (min 32 chars)".to_string()));
        }

        Ok(Self::new(config.algorithm()?, secret.as_bytes()))
    }

    pub fn new(algorithm: Algorithm, secret: &[u8]) -> Self {
        Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Sign a token for an externally authenticated identity
    pub fn issue_token(
        &self,
        identity: &ExternalIdentity,
        expires_at: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let now = Utc::now().timestamp();

        let claims = Claims {
            iss: identity.provider.clone(),
            sub: Some(identity.external_user_id.clone()),
            jti: Some(identity.external_user_id.clone()),
            email: Some(identity.email.clone()),
            iat: Some(now),
            nbf: Some(now),
            exp: Some(expires_at.timestamp()),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode token: {:?}", e);
            AppError::Internal(format!("Failed to encode token: {}", e))
        })
    }

    /// Validate and decode token
    ///
    /// Checks run in order: header algorithm, signature, `exp` presence,
    /// expiry, `nbf`, then the claim shape.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AppError> {
        let header_segment = token.split('.').next().unwrap_or_default();
        let header = decode_segment(header_segment)?;

        let alg = header.get("alg").and_then(Value::as_str).ok_or_else(malformed)?;
        if alg != algorithm_name(self.algorithm) {
            tracing::debug!(
                expected = algorithm_name(self.algorithm),
                got = alg,
                "Token signing algorithm mismatch"
            );
            return Err(AppError::InvalidSigningAlgorithm);
        }

        // Signature only; time claims are checked below in a fixed order
        let mut validation = Validation::new(self.algorithm);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        let payload = decode::<Value>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Token validation failed: {:?}", e);
                match e.kind() {
                    ErrorKind::InvalidAlgorithm => AppError::InvalidSigningAlgorithm,
                    ErrorKind::InvalidSignature => {
                        AppError::InvalidCredential("bad signature".to_string())
                    }
                    _ => malformed(),
                }
            })?;

        let now = Utc::now().timestamp() as f64;

        let exp = match payload.get("exp") {
            None | Some(Value::Null) => return Err(AppError::MissingExpiryClaim),
            Some(exp) => exp
                .as_f64()
                .ok_or_else(|| AppError::InvalidCredential("exp is not a number".to_string()))?,
        };
        if exp < now {
            return Err(AppError::ExpiredCredential);
        }

        if let Some(nbf) = payload.get("nbf").and_then(Value::as_f64) {
            if nbf > now {
                return Err(AppError::InvalidCredential("token not yet valid".to_string()));
            }
        }

        serde_json::from_value(payload).map_err(|e| {
            tracing::debug!("Token claims rejected: {}", e);
            AppError::InvalidCredential("unexpected claims".to_string())
        })
    }
}
