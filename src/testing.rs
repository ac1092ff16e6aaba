use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::{
    notify::{registry::Profile, NotificationEvent, Source},
    sink::{PostId, PostSink, SinkError},
};

/// In-memory sink that records every message it is asked to post.
pub struct RecordingSink {
    name: &'static str,
    failure: Option<fn() -> SinkError>,
    delay: Option<Duration>,
    posts: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new(name: &'static str) -> Self {
        RecordingSink {
            name,
            failure: None,
            delay: None,
            posts: Default::default(),
        }
    }

    pub fn failing(name: &'static str) -> Self {
        RecordingSink {
            failure: Some(|| SinkError::Api {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "down".to_owned(),
            }),
            ..Self::new(name)
        }
    }

    pub fn rejecting(name: &'static str) -> Self {
        RecordingSink {
            failure: Some(|| SinkError::Permission),
            ..Self::new(name)
        }
    }

    pub fn delayed(name: &'static str, delay: Duration) -> Self {
        RecordingSink {
            delay: Some(delay),
            ..Self::new(name)
        }
    }

    pub fn posts(&self) -> Vec<String> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PostSink for RecordingSink {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn post(&self, message: &str) -> Result<PostId, SinkError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let count = {
            let mut posts = self.posts.lock().unwrap();
            posts.push(message.to_owned());
            posts.len()
        };
        if let Some(failure) = self.failure {
            return Err(failure());
        }
        Ok(PostId(format!("{}-{count}", self.name)))
    }
}

pub fn sample_event(source: Source) -> NotificationEvent {
    NotificationEvent {
        source,
        channel: "alice".to_owned(),
        title: "Speedrun".to_owned(),
        topic: match source {
            Source::Twitch => "Celeste".to_owned(),
            Source::YouTube => "abc12345678".to_owned(),
        },
        profile: Profile {
            display_name: "Alice".to_owned(),
            fan_label: "otters".to_owned(),
        },
    }
}
