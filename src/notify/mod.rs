use std::{sync::Arc, time::Duration};

use strum_macros::Display;
use tokio::time::timeout;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::sink::{PostId, PostSink};

pub mod registry;
pub mod template;

use registry::Profile;
use template::{render, Fields, TemplateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Source {
    Twitch,
    YouTube,
}

impl Source {
    /// Name of the source specific placeholder.
    pub fn topic_field(&self) -> &'static str {
        match self {
            Source::Twitch => "game",
            Source::YouTube => "video_id",
        }
    }

    /// Every placeholder a template for this source may reference.
    pub fn field_names(&self) -> [&'static str; 5] {
        ["channel", "display_name", "fanname", "title", self.topic_field()]
    }
}

/// A channel that just went live, with its profile already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub source: Source,
    pub channel: String,
    pub title: String,
    /// Game name for Twitch, video id for YouTube.
    pub topic: String,
    pub profile: Profile,
}

impl NotificationEvent {
    pub fn fields(&self) -> Fields<'_> {
        Fields::from([
            ("channel", self.channel.as_str()),
            ("display_name", self.profile.display_name.as_str()),
            ("fanname", self.profile.fan_label.as_str()),
            ("title", self.title.as_str()),
            (self.source.topic_field(), self.topic.as_str()),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Templates {
    pub primary: String,
    /// `None` opts this source out of the secondary sink.
    pub secondary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTemplates {
    pub twitch: Templates,
    pub youtube: Templates,
}

impl SourceTemplates {
    pub fn get(&self, source: Source) -> &Templates {
        match source {
            Source::Twitch => &self.twitch,
            Source::YouTube => &self.youtube,
        }
    }
}

/// Fans a [`NotificationEvent`] out to the configured sinks.
///
/// The primary post is always started before the secondary one. The secondary post is detached
/// and only awaited by [`Notifier::shutdown`].
#[derive(Clone)]
pub struct Notifier {
    primary: Arc<dyn PostSink>,
    secondary: Option<Arc<dyn PostSink>>,
    templates: Arc<SourceTemplates>,
    tasks: TaskTracker,
}

impl Notifier {
    pub fn new(
        primary: Arc<dyn PostSink>,
        secondary: Option<Arc<dyn PostSink>>,
        templates: SourceTemplates,
    ) -> Self {
        Notifier {
            primary,
            secondary,
            templates: Arc::new(templates),
            tasks: TaskTracker::new(),
        }
    }

    /// Returns the primary post id, `None` if it failed. Failures are logged, never returned.
    pub async fn dispatch(&self, event: &NotificationEvent) -> Option<PostId> {
        let templates = self.templates.get(event.source);
        let fields = event.fields();
        info!(
            source = %event.source,
            channel = %event.channel,
            title = %event.title,
            "Dispatching live notification"
        );

        let primary = match render(&templates.primary, &fields) {
            Ok(message) => Some(self.spawn_post(self.primary.clone(), message)),
            Err(err) => {
                log_template_error(self.primary.name(), event.source, &err);
                None
            }
        };

        if let (Some(sink), Some(template)) = (&self.secondary, &templates.secondary) {
            match render(template, &fields) {
                Ok(message) => {
                    // detached, drained on shutdown
                    _ = self.spawn_post(sink.clone(), message);
                }
                Err(err) => log_template_error(sink.name(), event.source, &err),
            }
        }

        match primary?.await {
            Ok(id) => id,
            Err(err) => {
                error!("Primary post task failed: {err}");
                None
            }
        }
    }

    fn spawn_post(
        &self,
        sink: Arc<dyn PostSink>,
        message: String,
    ) -> tokio::task::JoinHandle<Option<PostId>> {
        self.tasks.spawn(async move {
            match sink.post(&message).await {
                Ok(id) => {
                    info!(sink = sink.name(), %id, "Posted notification");
                    Some(id)
                }
                Err(err) => {
                    error!(
                        sink = sink.name(),
                        category = err.category(),
                        "Failed to post notification: {err}"
                    );
                    None
                }
            }
        })
    }

    /// Stops accepting posts and waits up to `grace` for the in-flight ones.
    pub async fn shutdown(&self, grace: Duration) {
        self.tasks.close();
        if timeout(grace, self.tasks.wait()).await.is_err() {
            warn!(
                pending = self.tasks.len(),
                "Gave up waiting for pending posts"
            );
        }
    }
}

fn log_template_error(sink: &str, source: Source, err: &TemplateError) {
    error!(sink, %source, "Could not render template: {err}");
}
