use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::{
    select,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Endpoints;

const SCOPES: &str = "user:read:email";
const DEVICE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

#[derive(Default, Debug, Clone, PartialEq, Deserialize)]
pub struct LoginFlowStart {
    pub device_code: String,
    pub expires_in: u64,
    pub interval: u64,
    pub user_code: String,
    pub verification_uri: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: String,
}

#[derive(Debug, Default, Deserialize)]
struct TokenRejection {
    message: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login cancelled")]
    Cancelled,
    #[error("device code expired before the login was approved")]
    Expired,
    #[error("twitch rejected the login: {0}")]
    Rejected(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Device code login. Prints the activation url and code, then polls until the user approves,
/// the code expires or `cancel` fires.
pub async fn login(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    client_id: &str,
    client_secret: &str,
    cancel: &CancellationToken,
) -> Result<Token, AuthError> {
    select! {
        _ = cancel.cancelled() => Err(AuthError::Cancelled),
        res = device_flow(client, endpoints, client_id, client_secret) => res,
    }
}

async fn device_flow(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    client_id: &str,
    client_secret: &str,
) -> Result<Token, AuthError> {
    let flow: LoginFlowStart = client
        .post(format!("{}/oauth2/device", endpoints.id))
        .form(&[("client_id", client_id), ("scopes", SCOPES)])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    info!(
        "Open {} and enter this code: {}",
        flow.verification_uri, flow.user_code
    );

    timeout(
        Duration::from_secs(flow.expires_in),
        poll_token(client, endpoints, client_id, client_secret, &flow),
    )
    .await
    .map_err(|_| AuthError::Expired)?
}

async fn poll_token(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    client_id: &str,
    client_secret: &str,
    flow: &LoginFlowStart,
) -> Result<Token, AuthError> {
    let mut wait = Duration::from_secs(flow.interval.max(1));
    loop {
        sleep(wait).await;

        let res = client
            .post(format!("{}/oauth2/token", endpoints.id))
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("device_code", flow.device_code.as_str()),
                ("scopes", SCOPES),
                ("grant_type", DEVICE_GRANT),
            ])
            .send()
            .await?;

        if res.status().is_success() {
            let token: Token = res.json().await?;
            info!(expires_in = token.expires_in, "Twitch login successful");
            return Ok(token);
        }

        let reason = rejection_reason(res).await;
        match reason.as_str() {
            "authorization_pending" => debug!("Waiting for login approval"),
            "slow_down" => wait += Duration::from_secs(5),
            _ => return Err(AuthError::Rejected(reason)),
        }
    }
}

/// Trades `refresh_token` for a new token pair.
pub async fn refresh(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<Token, AuthError> {
    let res = client
        .post(format!("{}/oauth2/token", endpoints.id))
        .form(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .send()
        .await?;

    if !res.status().is_success() {
        return Err(AuthError::Rejected(rejection_reason(res).await));
    }
    let token: Token = res.json().await?;
    info!(expires_in = token.expires_in, "Twitch token refreshed");
    Ok(token)
}

async fn rejection_reason(res: reqwest::Response) -> String {
    let rejection = res.json::<TokenRejection>().await.unwrap_or_default();
    rejection.message.or(rejection.error).unwrap_or_default()
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    async fn server(expires_in: u64) -> (MockServer, Endpoints) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/device"))
            .and(body_string_contains("scopes=user%3Aread%3Aemail"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "device_code": "dev",
                "expires_in": expires_in,
                "interval": 1,
                "user_code": "ABCDEFGH",
                "verification_uri": "https://www.twitch.tv/activate?device-code=ABCDEFGH"
            })))
            .mount(&server)
            .await;
        let endpoints = Endpoints {
            id: server.uri(),
            ..Default::default()
        };
        (server, endpoints)
    }

    fn pending() -> ResponseTemplate {
        ResponseTemplate::new(400)
            .set_body_json(json!({ "status": 400, "message": "authorization_pending" }))
    }

    #[tokio::test]
    async fn pending_then_approved() {
        let (server, endpoints) = server(60).await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(pending())
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("device_code=dev"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "refresh_token": "rt",
                "scope": ["user:read:email"],
                "expires_in": 14400,
                "token_type": "bearer"
            })))
            .mount(&server)
            .await;

        let token = login(
            &reqwest::Client::new(),
            &endpoints,
            "id",
            "secret",
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(token.access_token, "at");
        assert_eq!(token.expires_in, 14400);
    }

    #[tokio::test]
    async fn refresh_exchanges_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at2",
                "refresh_token": "rt2",
                "scope": ["user:read:email"],
                "token_type": "bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;
        let endpoints = Endpoints {
            id: server.uri(),
            ..Default::default()
        };

        let token = refresh(&reqwest::Client::new(), &endpoints, "id", "secret", "rt")
            .await
            .unwrap();
        assert_eq!(token.access_token, "at2");
        assert_eq!(token.refresh_token, "rt2");
    }

    #[tokio::test]
    async fn revoked_refresh_token_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({ "status": 400, "message": "Invalid refresh token" })),
            )
            .mount(&server)
            .await;
        let endpoints = Endpoints {
            id: server.uri(),
            ..Default::default()
        };

        let res = refresh(&reqwest::Client::new(), &endpoints, "id", "secret", "rt").await;
        assert!(matches!(res, Err(AuthError::Rejected(reason)) if reason == "Invalid refresh token"));
    }

    #[tokio::test]
    async fn denied() {
        let (server, endpoints) = server(60).await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({ "status": 400, "message": "access_denied" })),
            )
            .mount(&server)
            .await;

        let res = login(
            &reqwest::Client::new(),
            &endpoints,
            "id",
            "secret",
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(res, Err(AuthError::Rejected(reason)) if reason == "access_denied"));
    }

    #[tokio::test]
    async fn expires() {
        let (server, endpoints) = server(1).await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(pending())
            .mount(&server)
            .await;

        let res = login(
            &reqwest::Client::new(),
            &endpoints,
            "id",
            "secret",
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(res, Err(AuthError::Expired)));
    }

    #[tokio::test]
    async fn cancel_unblocks_polling() {
        let (server, endpoints) = server(600).await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(pending())
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let res = timeout(
            Duration::from_secs(5),
            login(&reqwest::Client::new(), &endpoints, "id", "secret", &cancel),
        )
        .await
        .expect("login did not observe cancellation");
        assert!(matches!(res, Err(AuthError::Cancelled)));
    }
}
