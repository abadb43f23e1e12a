//! Credentials for the realtime database REST API.
//!
//! A service-account bundle is exchanged for a short-lived OAuth access token
//! (RS256-signed JWT bearer assertion). The token is cached and refreshed a
//! minute before it expires. A legacy database secret is passed through as-is.

use std::fmt;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use reqwest::Client;
use ring::rand::SystemRandom;
use ring::signature::{RSA_PKCS1_SHA256, RsaKeyPair};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::store::StoreError;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SCOPES: &str =
    "https://www.googleapis.com/auth/firebase.database https://www.googleapis.com/auth/userinfo.email";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Service-account bundle as issued by the cloud console.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(default)]
    pub project_id: Option<String>,
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

// Never print the key material.
impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Parse a bundle and normalise its private key.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Credentials` if the JSON is malformed or the key is
    /// not a PEM block.
    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        let mut key: Self = serde_json::from_str(raw)
            .map_err(|e| StoreError::Credentials(format!("malformed bundle: {e}")))?;
        key.private_key = normalize_private_key(&key.private_key);
        pem_to_der(&key.private_key)?;
        Ok(key)
    }
}

#[derive(Debug, Clone)]
pub enum StoreCredentials {
    ServiceAccount(ServiceAccountKey),
    DatabaseSecret(String),
    /// No auth parameter at all (local emulator, open rules).
    Anonymous,
}

/// Secret stores frequently hand the key back with literal `\n` sequences and
/// stray surrounding whitespace; both break PEM parsing.
#[must_use]
pub fn normalize_private_key(raw: &str) -> String {
    raw.replace("\\n", "\n").trim().to_string()
}

/// Decode the body of a PEM block into DER bytes.
///
/// # Errors
///
/// Returns `StoreError::Credentials` if there is no PEM body or it is not base64.
pub fn pem_to_der(pem: &str) -> Result<Vec<u8>, StoreError> {
    let body: String = pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect();

    if body.is_empty() {
        return Err(StoreError::Credentials("private key has no PEM body".to_string()));
    }

    STANDARD
        .decode(body.as_bytes())
        .map_err(|e| StoreError::Credentials(format!("private key is not valid base64: {e}")))
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Issues OAuth access tokens for a service account.
pub struct AccessTokenProvider {
    http_client: Client,
    key_pair: RsaKeyPair,
    client_email: String,
    token_uri: String,
    rng: SystemRandom,
    cached: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

impl AccessTokenProvider {
    /// # Errors
    ///
    /// Returns `StoreError::Credentials` if the private key is rejected.
    pub fn new(key: &ServiceAccountKey, http_client: Client) -> Result<Self, StoreError> {
        let der = pem_to_der(&key.private_key)?;
        let key_pair = RsaKeyPair::from_pkcs8(&der)
            .map_err(|e| StoreError::Credentials(format!("private key rejected: {e}")))?;

        Ok(Self {
            http_client,
            key_pair,
            client_email: key.client_email.clone(),
            token_uri: key.token_uri.clone(),
            rng: SystemRandom::new(),
            cached: Mutex::new(None),
        })
    }

    /// Return a valid access token, exchanging a fresh assertion when needed.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if signing or the token exchange fails.
    pub async fn token(&self) -> Result<String, StoreError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let assertion = self.signed_assertion(chrono::Utc::now().timestamp())?;
        let response = self
            .http_client
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| StoreError::Request(format!("token exchange failed: {e}")))?;

        if !response.status().is_success() {
            return Err(StoreError::Credentials(format!(
                "token exchange returned HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("token response: {e}")))?;

        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(REFRESH_MARGIN);
        tracing::debug!(
            client_email = %self.client_email,
            expires_in = body.expires_in,
            "Obtained store access token"
        );

        *cached = Some(CachedToken {
            value: body.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(body.access_token)
    }

    fn signed_assertion(&self, now: i64) -> Result<String, StoreError> {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let claims = serde_json::json!({
            "iss": self.client_email,
            "scope": SCOPES,
            "aud": self.token_uri,
            "iat": now,
            "exp": now + ASSERTION_LIFETIME_SECS,
        });
        let claims = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
        let signing_input = format!("{header}.{claims}");

        let mut signature = vec![0u8; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(
                &RSA_PKCS1_SHA256,
                &self.rng,
                signing_input.as_bytes(),
                &mut signature,
            )
            .map_err(|_| StoreError::Credentials("failed to sign token assertion".to_string()))?;

        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(&signature)
        ))
    }
}

/// How each REST request is authorised.
pub enum StoreAuth {
    AccessToken(AccessTokenProvider),
    Secret(String),
    None,
}

impl StoreAuth {
    /// # Errors
    ///
    /// Returns `StoreError::Credentials` if a service-account key is rejected.
    pub fn from_credentials(
        credentials: &StoreCredentials,
        http_client: &Client,
    ) -> Result<Self, StoreError> {
        Ok(match credentials {
            StoreCredentials::ServiceAccount(key) => {
                Self::AccessToken(AccessTokenProvider::new(key, http_client.clone())?)
            }
            StoreCredentials::DatabaseSecret(secret) => Self::Secret(secret.clone()),
            StoreCredentials::Anonymous => Self::None,
        })
    }

    /// Query parameter to attach to a request, if any.
    pub(crate) async fn query_param(&self) -> Result<Option<(&'static str, String)>, StoreError> {
        match self {
            Self::AccessToken(provider) => Ok(Some(("access_token", provider.token().await?))),
            Self::Secret(secret) => Ok(Some(("auth", secret.clone()))),
            Self::None => Ok(None),
        }
    }
}
