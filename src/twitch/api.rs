use std::sync::Arc;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use urlencoding::encode;

use super::{
    auth::{self, AuthError, Token},
    Endpoints,
};

const MAX_QUERY_PARAMS: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct HelixDataResponse<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: String,
    pub login: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Stream {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_login: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub game_name: String,
}

#[derive(Debug, Error)]
pub enum HelixError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("helix returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("could not refresh the access token: {0}")]
    Refresh(#[from] AuthError),
}

#[derive(Debug)]
struct Renewal {
    endpoints: Endpoints,
    client_secret: String,
}

#[derive(Debug)]
struct UserAuth {
    token: RwLock<Token>,
    renewal: Option<Renewal>,
}

/// Minimal Helix client authenticated with a user access token. Clones share the token, so a
/// refresh made by one is seen by all.
#[derive(Debug, Clone)]
pub struct Helix {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    auth: Arc<UserAuth>,
}

impl Helix {
    /// Fixed token, a 401 is returned as is.
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        client_id: String,
        access_token: String,
    ) -> Self {
        Helix {
            client,
            base_url,
            client_id,
            auth: Arc::new(UserAuth {
                token: RwLock::new(Token {
                    access_token,
                    ..Default::default()
                }),
                renewal: None,
            }),
        }
    }

    /// Refreshes `token` through the id service when helix answers 401.
    pub fn authenticated(
        client: reqwest::Client,
        endpoints: &Endpoints,
        client_id: String,
        client_secret: String,
        token: Token,
    ) -> Self {
        Helix {
            client,
            base_url: endpoints.helix.clone(),
            client_id,
            auth: Arc::new(UserAuth {
                token: RwLock::new(token),
                renewal: Some(Renewal {
                    endpoints: endpoints.clone(),
                    client_secret,
                }),
            }),
        }
    }

    fn authorized(&self, builder: RequestBuilder, access_token: &str) -> RequestBuilder {
        builder
            .bearer_auth(access_token)
            .header("Client-Id", &self.client_id)
    }

    async fn send(
        &self,
        request: impl Fn(&reqwest::Client) -> RequestBuilder,
    ) -> Result<Response, HelixError> {
        let access_token = self.auth.token.read().await.access_token.clone();
        let res = self
            .authorized(request(&self.client), &access_token)
            .send()
            .await?;

        let Some(renewal) = &self.auth.renewal else {
            return checked(res).await;
        };
        if res.status() != StatusCode::UNAUTHORIZED {
            return checked(res).await;
        }

        let access_token = self.refresh(renewal, &access_token).await?;
        let res = self
            .authorized(request(&self.client), &access_token)
            .send()
            .await?;
        checked(res).await
    }

    async fn refresh(&self, renewal: &Renewal, rejected: &str) -> Result<String, HelixError> {
        let mut token = self.auth.token.write().await;
        // already renewed by a concurrent request
        if token.access_token != rejected {
            return Ok(token.access_token.clone());
        }

        warn!("Twitch access token rejected, refreshing");
        *token = auth::refresh(
            &self.client,
            &renewal.endpoints,
            &self.client_id,
            &renewal.client_secret,
            &token.refresh_token,
        )
        .await?;
        Ok(token.access_token.clone())
    }

    async fn get<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T, HelixError> {
        let url = format!("{}{path_and_query}", self.base_url);
        Ok(self.send(|client| client.get(&url)).await?.json().await?)
    }

    /// Resolves logins to users. Logins helix does not know are simply absent from the result.
    pub async fn users_by_login(&self, logins: &[String]) -> Result<Vec<User>, HelixError> {
        let mut users = Vec::new();
        for (chunk, params) in logins
            .chunks(MAX_QUERY_PARAMS)
            .zip(build_query_params("login", logins))
        {
            match self
                .get::<HelixDataResponse<User>>(&format!("/users{params}"))
                .await
            {
                Ok(res) => users.extend(res.data),
                // one malformed login fails the whole chunk, retry it one by one
                Err(HelixError::Status {
                    status: StatusCode::BAD_REQUEST,
                    body,
                }) => {
                    warn!(chunk_length = chunk.len(), "Bad user chunk, refetching: {body}");
                    users.extend(self.refetch(chunk).await);
                }
                Err(err) => return Err(err),
            }
        }

        debug!(requested = logins.len(), found = users.len(), "Resolved users");
        Ok(users)
    }

    async fn refetch(&self, logins: &[String]) -> Vec<User> {
        let mut users = Vec::new();
        for login in logins {
            match self
                .get::<HelixDataResponse<User>>(&format!("/users?login={}", encode(login)))
                .await
            {
                Ok(res) => users.extend(res.data),
                Err(err) => warn!(%login, "Could not fetch user: {err}"),
            }
        }
        users
    }

    /// Current stream of `login`, `None` when offline.
    pub async fn stream(&self, login: &str) -> Result<Option<Stream>, HelixError> {
        Ok(self
            .get::<HelixDataResponse<Stream>>(&format!("/streams?user_login={}", encode(login)))
            .await?
            .data
            .into_iter()
            .next())
    }

    pub async fn subscribe_stream_online(
        &self,
        broadcaster_id: &str,
        session_id: &str,
    ) -> Result<(), HelixError> {
        let url = format!("{}/eventsub/subscriptions", self.base_url);
        let body = json!({
            "type": "stream.online",
            "version": "1",
            "condition": { "broadcaster_user_id": broadcaster_id },
            "transport": { "method": "websocket", "session_id": session_id }
        });
        self.send(|client| client.post(&url).json(&body)).await?;
        Ok(())
    }
}

async fn checked(res: Response) -> Result<Response, HelixError> {
    if !res.status().is_success() {
        return Err(HelixError::Status {
            status: res.status(),
            body: res.text().await.unwrap_or_default(),
        });
    }
    Ok(res)
}

fn build_query_params(key: &str, values: &[String]) -> Vec<String> {
    values
        .chunks(MAX_QUERY_PARAMS)
        .map(|chunk| {
            let params = chunk
                .iter()
                .map(|v| format!("{key}={}", encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            format!("?{params}")
        })
        .collect()
}
