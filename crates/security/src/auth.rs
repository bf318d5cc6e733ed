//! C1 Identity & Token Service.
//!
//! Verifies the bearer token carried either as a `?token=` query parameter
//! or inside the WebSocket handshake's `auth` object, and produces the
//! [`SessionAuth`] that seeds a [`voice_agent_core::VoiceSession`]. In
//! development, a connection with no token is assigned a configured
//! bypass tenant instead of being rejected — this never applies in
//! staging or production, enforced both here and in `Settings::validate`.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use voice_agent_config::{RuntimeEnvironment, SecurityConfig};
use voice_agent_core::SessionAuth;

use crate::error::{Result, SecurityError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub tenant_id: String,
    pub site_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    pub iss: String,
    pub exp: usize,
}

pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    environment: RuntimeEnvironment,
    dev_bypass_tenant_id: Option<String>,
}

impl TokenVerifier {
    /// Builds a verifier from `config`, reading the HMAC secret out of the
    /// env var it names (`jwt_secret_env`) rather than from the config file.
    pub fn new(config: &SecurityConfig, environment: RuntimeEnvironment) -> Result<Self> {
        let secret = std::env::var(&config.jwt_secret_env).map_err(|_| {
            SecurityError::Other(format!(
                "env var {} is not set; refusing to start with no JWT secret",
                config.jwt_secret_env
            ))
        })?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.jwt_issuer.clone()]);
        validation.leeway = config.jwt_clock_skew_secs.max(0) as u64;

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            environment,
            dev_bypass_tenant_id: config.dev_bypass_tenant_id.clone(),
        })
    }

    /// Authenticates a connection attempt. `token` is the value pulled from
    /// `?token=` or the handshake `auth` object, whichever the gateway saw.
    pub fn authenticate(&self, token: Option<&str>) -> Result<SessionAuth> {
        match token {
            Some(raw) => self.verify(raw),
            None => self.dev_bypass(),
        }
    }

    fn verify(&self, raw: &str) -> Result<SessionAuth> {
        let data = decode::<Claims>(raw, &self.decoding_key, &self.validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => SecurityError::Expired,
                other => SecurityError::InvalidToken(other.to_string()),
            }
        })?;
        let claims = data.claims;
        if claims.tenant_id.is_empty() {
            return Err(SecurityError::MissingClaim("tenant_id".to_string()));
        }
        if claims.site_id.is_empty() {
            return Err(SecurityError::MissingClaim("site_id".to_string()));
        }
        Ok(SessionAuth {
            tenant_id: claims.tenant_id,
            site_id: claims.site_id,
            user_id: claims.user_id,
            locale: claims.locale,
        })
    }

    fn dev_bypass(&self) -> Result<SessionAuth> {
        if self.environment.is_strict() {
            return Err(SecurityError::MissingToken);
        }
        let tenant_id = self
            .dev_bypass_tenant_id
            .clone()
            .ok_or(SecurityError::MissingToken)?;
        Ok(SessionAuth {
            tenant_id,
            site_id: "dev".to_string(),
            user_id: None,
            locale: Some("en-US".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn config_with_secret(env_var: &str) -> SecurityConfig {
        let mut cfg = SecurityConfig::default();
        cfg.jwt_secret_env = env_var.to_string();
        cfg.jwt_issuer = "voice-agent".to_string();
        cfg
    }

    #[test]
    fn verifies_well_formed_token() {
        std::env::set_var("TEST_JWT_SECRET_1", "top-secret");
        let cfg = config_with_secret("TEST_JWT_SECRET_1");
        let verifier = TokenVerifier::new(&cfg, RuntimeEnvironment::Production).unwrap();

        let claims = Claims {
            sub: "user-1".to_string(),
            tenant_id: "tenant-a".to_string(),
            site_id: "site-1".to_string(),
            user_id: Some("user-1".to_string()),
            locale: Some("en-US".to_string()),
            iss: "voice-agent".to_string(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"top-secret")).unwrap();

        let auth = verifier.authenticate(Some(&token)).unwrap();
        assert_eq!(auth.tenant_id, "tenant-a");
        assert_eq!(auth.site_id, "site-1");
    }

    #[test]
    fn rejects_expired_token() {
        std::env::set_var("TEST_JWT_SECRET_2", "top-secret");
        let cfg = config_with_secret("TEST_JWT_SECRET_2");
        let verifier = TokenVerifier::new(&cfg, RuntimeEnvironment::Production).unwrap();

        let claims = Claims {
            sub: "user-1".to_string(),
            tenant_id: "tenant-a".to_string(),
            site_id: "site-1".to_string(),
            user_id: None,
            locale: None,
            iss: "voice-agent".to_string(),
            exp: (chrono::Utc::now().timestamp() - 3600) as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"top-secret")).unwrap();

        assert!(matches!(verifier.authenticate(Some(&token)), Err(SecurityError::Expired)));
    }

    #[test]
    fn production_rejects_missing_token() {
        std::env::set_var("TEST_JWT_SECRET_3", "top-secret");
        let cfg = config_with_secret("TEST_JWT_SECRET_3");
        let verifier = TokenVerifier::new(&cfg, RuntimeEnvironment::Production).unwrap();
        assert!(matches!(verifier.authenticate(None), Err(SecurityError::MissingToken)));
    }

    #[test]
    fn development_bypass_assigns_configured_tenant() {
        std::env::set_var("TEST_JWT_SECRET_4", "top-secret");
        let mut cfg = config_with_secret("TEST_JWT_SECRET_4");
        cfg.dev_bypass_tenant_id = Some("dev-tenant".to_string());
        let verifier = TokenVerifier::new(&cfg, RuntimeEnvironment::Development).unwrap();
        let auth = verifier.authenticate(None).unwrap();
        assert_eq!(auth.tenant_id, "dev-tenant");
    }
}
