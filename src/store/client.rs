use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::store::auth::StoreAuth;
use crate::store::{
    ACTIVITY_LOGS_PATH, ActivityLogEntry, StateStore, StoreError, USERS_PATH, UserRecord,
    VALVE_SYSTEM_PATH, is_valid_key,
};

/// REST client for a Firebase Realtime Database (`<base>/<path>.json`).
pub struct FirebaseClient {
    http_client: Client,
    base_url: String,
    auth: StoreAuth,
}

#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

impl FirebaseClient {
    /// # Errors
    ///
    /// Returns `StoreError::Request` if the HTTP client cannot be built, or
    /// `StoreError::Credentials` if the configured key is rejected.
    pub fn new(config: &Config) -> Result<Self, StoreError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.store_timeout_seconds))
            .build()
            .map_err(|e| StoreError::Request(format!("Failed to create HTTP client: {e}")))?;

        let auth = StoreAuth::from_credentials(&config.store_credentials, &http_client)?;

        Ok(Self {
            http_client,
            base_url: config.database_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    /// Client with explicit auth, used against emulators and mock servers.
    #[must_use]
    pub fn with_base_url(base_url: &str, auth: StoreAuth) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}.json", self.base_url)
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, StoreError> {
        let builder = self.http_client.request(method, self.url(path));
        Ok(match self.auth.query_param().await? {
            Some((name, value)) => builder.query(&[(name, value)]),
            None => builder,
        })
    }

    async fn send(builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = builder
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, StoreError> {
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Request(format!("Failed to get response text: {e}")))?;

        serde_json::from_str(&text).map_err(|e| {
            tracing::error!(
                error = %e,
                body_preview = %text.chars().take(200).collect::<String>(),
                "Failed to parse {what} response"
            );
            StoreError::Decode(format!("{what}: {e}"))
        })
    }

    fn user_path(username: &str) -> Result<String, StoreError> {
        if !is_valid_key(username) {
            return Err(StoreError::Request(format!("invalid username key '{username}'")));
        }
        Ok(format!("{USERS_PATH}/{username}"))
    }
}

#[async_trait]
impl StateStore for FirebaseClient {
    async fn read_live_state(&self) -> Result<Value, StoreError> {
        let response = Self::send(self.request(Method::GET, VALVE_SYSTEM_PATH).await?).await?;
        Self::decode(response, "valve_system").await
    }

    async fn update_live_state(&self, fields: Map<String, Value>) -> Result<(), StoreError> {
        let builder = self
            .request(Method::PATCH, VALVE_SYSTEM_PATH)
            .await?
            .json(&fields);
        Self::send(builder).await?;
        Ok(())
    }

    async fn push_activity(&self, entry: &ActivityLogEntry) -> Result<String, StoreError> {
        let builder = self
            .request(Method::POST, ACTIVITY_LOGS_PATH)
            .await?
            .json(entry);
        let pushed: PushResponse = Self::decode(Self::send(builder).await?, "push").await?;
        Ok(pushed.name)
    }

    async fn recent_activity(
        &self,
        limit: usize,
    ) -> Result<Vec<(String, ActivityLogEntry)>, StoreError> {
        // orderBy must be a JSON string literal, quotes included.
        let limit_param = limit.to_string();
        let builder = self
            .request(Method::GET, ACTIVITY_LOGS_PATH)
            .await?
            .query(&[("orderBy", "\"$key\""), ("limitToLast", limit_param.as_str())]);

        // Object key order in the body is not guaranteed; BTreeMap restores key order.
        let entries: Option<BTreeMap<String, Value>> =
            Self::decode(Self::send(builder).await?, "activity_logs").await?;

        Ok(entries
            .unwrap_or_default()
            .into_iter()
            .rev()
            .take(limit)
            .filter_map(|(key, value)| match serde_json::from_value(value) {
                Ok(entry) => Some((key, entry)),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping malformed activity entry");
                    None
                }
            })
            .collect())
    }

    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let path = Self::user_path(username)?;
        let response = Self::send(self.request(Method::GET, &path).await?).await?;
        Self::decode(response, "user").await
    }

    async fn has_users(&self) -> Result<bool, StoreError> {
        let builder = self
            .request(Method::GET, USERS_PATH)
            .await?
            .query(&[("shallow", "true")]);
        let keys: Value = Self::decode(Self::send(builder).await?, "users").await?;
        Ok(keys.as_object().is_some_and(|m| !m.is_empty()))
    }

    async fn put_user(&self, username: &str, record: &UserRecord) -> Result<(), StoreError> {
        let path = Self::user_path(username)?;
        let builder = self.request(Method::PUT, &path).await?.json(record);
        Self::send(builder).await?;
        Ok(())
    }

    async fn update_user(
        &self,
        username: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let path = Self::user_path(username)?;
        let builder = self.request(Method::PATCH, &path).await?.json(&fields);
        Self::send(builder).await?;
        Ok(())
    }
}
