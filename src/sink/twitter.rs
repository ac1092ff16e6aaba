use std::fmt;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::distributions::{Alphanumeric, DistString};
use reqwest::StatusCode;
use ring::hmac;
use serde::Deserialize;
use serde_json::json;
use urlencoding::encode;

use super::{error_body, PostId, PostSink, SinkError};

pub const CHAR_LIMIT: usize = 280;
const BASE_URL: &str = "https://api.twitter.com";

#[derive(Clone, PartialEq, Eq)]
pub struct OAuth1Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

#[derive(Clone, PartialEq, Eq)]
pub enum TwitterAuth {
    OAuth1(OAuth1Credentials),
    /// OAuth 2.0 user context token.
    Bearer(String),
}

impl fmt::Debug for TwitterAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TwitterAuth::OAuth1(c) => f
                .debug_struct("OAuth1")
                .field("consumer_key", &c.consumer_key)
                .finish_non_exhaustive(),
            TwitterAuth::Bearer(_) => f.write_str("Bearer(..)"),
        }
    }
}

impl OAuth1Credentials {
    fn authorization(&self, method: &str, url: &str) -> String {
        self.authorization_with(
            method,
            url,
            &Alphanumeric.sample_string(&mut rand::thread_rng(), 32),
            chrono::Utc::now().timestamp(),
        )
    }

    fn authorization_with(&self, method: &str, url: &str, nonce: &str, timestamp: i64) -> String {
        let timestamp = timestamp.to_string();
        let mut params = vec![
            ("oauth_consumer_key", self.consumer_key.as_str()),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", timestamp.as_str()),
            ("oauth_token", self.access_token.as_str()),
            ("oauth_version", "1.0"),
        ];
        let signature = sign(
            &signature_base(method, url, &params),
            &self.consumer_secret,
            &self.access_token_secret,
        );
        params.push(("oauth_signature", signature.as_str()));
        params.sort();

        let header = params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("OAuth {header}")
    }
}

fn signature_base(method: &str, url: &str, params: &[(&str, &str)]) -> String {
    let mut encoded = params
        .iter()
        .map(|(k, v)| (encode(k).into_owned(), encode(v).into_owned()))
        .collect::<Vec<_>>();
    encoded.sort();
    let param_string = encoded
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        encode(url),
        encode(&param_string)
    )
}

fn sign(base: &str, consumer_secret: &str, token_secret: &str) -> String {
    let key = hmac::Key::new(
        hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
        format!("{}&{}", encode(consumer_secret), encode(token_secret)).as_bytes(),
    );
    STANDARD.encode(hmac::sign(&key, base.as_bytes()).as_ref())
}

#[derive(Debug, Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
}

/// Posts through the v2 `POST /2/tweets` endpoint.
pub struct TwitterSink {
    client: reqwest::Client,
    auth: TwitterAuth,
    base_url: String,
}

impl TwitterSink {
    pub fn new(client: reqwest::Client, auth: TwitterAuth) -> Self {
        Self::with_base_url(client, auth, BASE_URL.to_owned())
    }

    pub fn with_base_url(client: reqwest::Client, auth: TwitterAuth, base_url: String) -> Self {
        TwitterSink {
            client,
            auth,
            base_url,
        }
    }
}

#[async_trait]
impl PostSink for TwitterSink {
    fn name(&self) -> &'static str {
        "twitter"
    }

    async fn post(&self, message: &str) -> Result<PostId, SinkError> {
        let url = format!("{}/2/tweets", self.base_url);
        let authorization = match &self.auth {
            TwitterAuth::OAuth1(creds) => creds.authorization("POST", &url),
            TwitterAuth::Bearer(token) => format!("Bearer {token}"),
        };

        let res = self
            .client
            .post(&url)
            .header("Authorization", authorization)
            .json(&json!({ "text": message }))
            .send()
            .await?;

        match res.status() {
            s if s.is_success() => Ok(PostId(res.json::<TweetResponse>().await?.data.id)),
            StatusCode::FORBIDDEN => Err(SinkError::Permission),
            StatusCode::UNAUTHORIZED => Err(SinkError::Authentication),
            status => Err(SinkError::Api {
                status,
                body: error_body(res).await,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use wiremock::{
        matchers::{body_json, header, header_regex, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    const CONSUMER_SECRET: &str = "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw";
    const TOKEN_SECRET: &str = "LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE";

    fn creds() -> OAuth1Credentials {
        OAuth1Credentials {
            consumer_key: "xvz1evFS4wEEPTGEFPHBog".to_owned(),
            consumer_secret: CONSUMER_SECRET.to_owned(),
            access_token: "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb".to_owned(),
            access_token_secret: TOKEN_SECRET.to_owned(),
        }
    }

    #[test]
    fn signature_matches_published_example() {
        let params = [
            ("status", "Hello Ladies + Gentlemen, a signed OAuth request!"),
            ("include_entities", "true"),
            ("oauth_consumer_key", "xvz1evFS4wEEPTGEFPHBog"),
            ("oauth_nonce", "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg"),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", "1318622958"),
            (
                "oauth_token",
                "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb",
            ),
            ("oauth_version", "1.0"),
        ];
        let base = signature_base(
            "post",
            "https://api.twitter.com/1.1/statuses/update.json",
            &params,
        );
        assert!(base.starts_with(
            "POST&https%3A%2F%2Fapi.twitter.com%2F1.1%2Fstatuses%2Fupdate.json&include_entities%3Dtrue%26oauth_consumer_key"
        ));
        assert_eq!(
            sign(&base, CONSUMER_SECRET, TOKEN_SECRET),
            "hCtSmYh+iHYCEqBWrE7C7hYmtUk="
        );
    }

    #[test]
    fn authorization_header_layout() {
        let header = creds().authorization_with(
            "POST",
            "https://api.twitter.com/2/tweets",
            "abc",
            1318622958,
        );
        assert!(header.starts_with("OAuth oauth_consumer_key=\"xvz1evFS4wEEPTGEFPHBog\", oauth_nonce=\"abc\", oauth_signature=\""));
        assert!(header.ends_with("oauth_timestamp=\"1318622958\", oauth_token=\"370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb\", oauth_version=\"1.0\""));
        assert!(!header.contains(TOKEN_SECRET));
    }

    #[test]
    fn debug_hides_secrets() {
        let debug = format!("{:?}", TwitterAuth::OAuth1(creds()));
        assert!(!debug.contains(CONSUMER_SECRET));
        assert_eq!(
            format!("{:?}", TwitterAuth::Bearer("tok".to_owned())),
            "Bearer(..)"
        );
    }

    #[tokio::test]
    async fn bearer_post() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(json!({ "text": "line 1\nline 2" })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({ "data": { "id": "1445880548472328192", "text": "x" } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let sink = TwitterSink::with_base_url(
            reqwest::Client::new(),
            TwitterAuth::Bearer("tok".to_owned()),
            server.uri(),
        );
        assert_eq!(
            sink.post("line 1\nline 2").await.unwrap(),
            PostId("1445880548472328192".to_owned())
        );
    }

    #[tokio::test]
    async fn oauth1_post_is_signed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .and(header_regex(
                "authorization",
                r#"^OAuth oauth_consumer_key="xvz1evFS4wEEPTGEFPHBog", oauth_nonce="[A-Za-z0-9]{32}", oauth_signature="[^"]+", oauth_signature_method="HMAC-SHA1""#,
            ))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "data": { "id": "7" } })))
            .expect(1)
            .mount(&server)
            .await;

        let sink = TwitterSink::with_base_url(
            reqwest::Client::new(),
            TwitterAuth::OAuth1(creds()),
            server.uri(),
        );
        assert_eq!(sink.post("hi").await.unwrap(), PostId("7".to_owned()));
    }

    #[rstest]
    #[case(403, "permission")]
    #[case(401, "authentication")]
    #[case(429, "api")]
    #[case(500, "api")]
    #[tokio::test]
    async fn error_statuses(#[case] status: u16, #[case] category: &str) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let sink = TwitterSink::with_base_url(
            reqwest::Client::new(),
            TwitterAuth::Bearer("tok".to_owned()),
            server.uri(),
        );
        let err = sink.post("hi").await.unwrap_err();
        assert_eq!(err.category(), category);
        if let SinkError::Api { status: s, body } = err {
            assert_eq!(s.as_u16(), status);
            assert_eq!(body, "nope");
        }
    }

    #[tokio::test]
    async fn malformed_success_body_is_unexpected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "errors": [] })))
            .mount(&server)
            .await;

        let sink = TwitterSink::with_base_url(
            reqwest::Client::new(),
            TwitterAuth::Bearer("tok".to_owned()),
            server.uri(),
        );
        assert!(matches!(
            sink.post("hi").await,
            Err(SinkError::Unexpected(_))
        ));
    }
}
