use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{error_body, PostId, PostSink, SinkError};

pub const CHAR_LIMIT: usize = 500;
const BASE_URL: &str = "https://graph.threads.net";

#[derive(Debug, Deserialize)]
struct GraphId {
    #[serde(default)]
    id: Option<String>,
}

/// Posts through the Threads Graph API: a text container is created, then published.
pub struct ThreadsSink {
    client: reqwest::Client,
    user_id: String,
    access_token: String,
    base_url: String,
}

impl ThreadsSink {
    pub fn new(client: reqwest::Client, user_id: String, access_token: String) -> Self {
        Self::with_base_url(client, user_id, access_token, BASE_URL.to_owned())
    }

    pub fn with_base_url(
        client: reqwest::Client,
        user_id: String,
        access_token: String,
        base_url: String,
    ) -> Self {
        ThreadsSink {
            client,
            user_id,
            access_token,
            base_url,
        }
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/v1.0/{}/{action}", self.base_url, self.user_id)
    }

    async fn create_container(&self, message: &str) -> Result<String, SinkError> {
        let res = self
            .client
            .post(self.endpoint("threads"))
            .query(&[
                ("media_type", "TEXT"),
                ("text", message),
                ("access_token", self.access_token.as_str()),
            ])
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(SinkError::ContainerCreate {
                status: res.status(),
                body: error_body(res).await,
            });
        }

        res.json::<GraphId>()
            .await?
            .id
            .ok_or(SinkError::MissingCreationId)
    }

    async fn publish(&self, creation_id: &str) -> Result<PostId, SinkError> {
        let res = self
            .client
            .post(self.endpoint("threads_publish"))
            .query(&[
                ("creation_id", creation_id),
                ("access_token", self.access_token.as_str()),
            ])
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(SinkError::Publish {
                status: res.status(),
                body: error_body(res).await,
            });
        }

        // a publish response without an id still means the post is live
        let id = res.json::<GraphId>().await.ok().and_then(|x| x.id);
        Ok(PostId(id.unwrap_or_else(|| creation_id.to_owned())))
    }
}

#[async_trait]
impl PostSink for ThreadsSink {
    fn name(&self) -> &'static str {
        "threads"
    }

    async fn post(&self, message: &str) -> Result<PostId, SinkError> {
        let creation_id = self.create_container(message).await?;
        debug!(%creation_id, "Created threads container");
        self.publish(&creation_id).await
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn sink(server: &MockServer) -> ThreadsSink {
        ThreadsSink::with_base_url(
            reqwest::Client::new(),
            "42".to_owned(),
            "secret".to_owned(),
            server.uri(),
        )
    }

    #[tokio::test]
    async fn create_then_publish() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1.0/42/threads"))
            .and(query_param("media_type", "TEXT"))
            .and(query_param("text", "live now\nhttps://twitch.tv/alice"))
            .and(query_param("access_token", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "c1" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1.0/42/threads_publish"))
            .and(query_param("creation_id", "c1"))
            .and(query_param("access_token", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p1" })))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(
            sink(&server)
                .post("live now\nhttps://twitch.tv/alice")
                .await
                .unwrap(),
            PostId("p1".to_owned())
        );
    }

    #[tokio::test]
    async fn failed_create_skips_publish() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1.0/42/threads"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad token"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1.0/42/threads_publish"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        match sink(&server).post("hi").await {
            Err(SinkError::ContainerCreate { status, body }) => {
                assert_eq!(status.as_u16(), 400);
                assert_eq!(body, "bad token");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_creation_id_skips_publish() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1.0/42/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1.0/42/threads_publish"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        assert!(matches!(
            sink(&server).post("hi").await,
            Err(SinkError::MissingCreationId)
        ));
    }

    #[tokio::test]
    async fn publish_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1.0/42/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "c1" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1.0/42/threads_publish"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let err = sink(&server).post("hi").await.unwrap_err();
        assert_eq!(err.category(), "publish");
    }
}
