use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    config::YoutubeConfig,
    notify::{registry::ChannelRegistry, NotificationEvent, Notifier, Source},
    youtube::{PageStatus, Prober},
};

/// Polls youtube live pages and announces every video id it has not seen yet.
pub struct LiveMonitor {
    channels: Vec<String>,
    known: HashSet<String>,
    prober: Prober,
    registry: Arc<ChannelRegistry>,
    notifier: Notifier,
    interval: Duration,
}

impl LiveMonitor {
    pub fn new(
        config: &YoutubeConfig,
        prober: Prober,
        registry: Arc<ChannelRegistry>,
        notifier: Notifier,
    ) -> Self {
        LiveMonitor {
            channels: config.channels.clone(),
            known: config.scheduled_streams.iter().cloned().collect(),
            prober,
            registry,
            notifier,
            interval: Duration::from_secs(config.check_interval),
        }
    }

    /// One pass over every channel. Fetch failures only skip that channel.
    pub async fn check_all(&mut self) {
        for channel_id in &self.channels {
            let video = match self.prober.probe(channel_id).await {
                Ok(PageStatus::Live(video)) => video,
                Ok(_) => continue,
                Err(err) => {
                    error!(%channel_id, "{err}");
                    continue;
                }
            };

            // marked before dispatch so a slow post can never announce it twice
            if !self.known.insert(video.video_id.clone()) {
                continue;
            }
            info!(
                channel = %video.channel_name,
                video_id = %video.video_id,
                title = %video.title,
                "YouTube live detected"
            );

            let event = NotificationEvent {
                source: Source::YouTube,
                profile: self.registry.lookup(channel_id),
                channel: video.channel_name,
                title: video.title,
                topic: video.video_id,
            };
            self.notifier.dispatch(&event).await;
        }
    }

    /// Checks immediately, then every interval. A cycle in progress finishes before `cancel` is
    /// observed.
    pub async fn run(mut self, cancel: CancellationToken) {
        if self.channels.is_empty() {
            info!("No YouTube channels configured, skipping YouTube monitoring");
            return;
        }
        info!(
            channels = %self.channels.join(", "),
            scheduled = self.known.len(),
            interval = ?self.interval,
            "Starting YouTube monitor"
        );

        while !cancel.is_cancelled() {
            self.check_all().await;
            select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.interval) => {}
            }
        }
        info!("YouTube monitor stopped");
    }
}
