use std::sync::Arc;

use color_eyre::eyre::{eyre, Context, Result};
use tracing::{error, info};

use crate::{
    notify::{
        registry::Profile,
        template::{render, TemplateError},
        NotificationEvent, Source, SourceTemplates,
    },
    sink::{threads, twitter, PostSink},
};

pub const TEST_MESSAGE: &str =
    "🧪 Test message from bot!\n\nLine 2 here\nLine 3 here\n\n✅ If you see proper line breaks, it works!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub name: &'static str,
    pub limit: usize,
    pub message: String,
}

impl Preview {
    /// Counted in chars, the way both networks count.
    pub fn chars(&self) -> usize {
        self.message.chars().count()
    }

    pub fn newlines(&self) -> usize {
        self.message.matches('\n').count()
    }

    pub fn over_limit(&self) -> bool {
        self.chars() > self.limit
    }
}

pub fn sample_event(source: Source) -> NotificationEvent {
    NotificationEvent {
        source,
        channel: "TestChannel".to_owned(),
        title: "Test Stream Title".to_owned(),
        topic: match source {
            Source::Twitch => "Test Game".to_owned(),
            Source::YouTube => "dQw4w9WgXcQ".to_owned(),
        },
        profile: Profile {
            display_name: "TestStreamer".to_owned(),
            fan_label: "TestFans".to_owned(),
        },
    }
}

/// Every configured template rendered with sample data. Opted out secondary templates are
/// skipped.
pub fn previews(templates: &SourceTemplates) -> Result<Vec<Preview>, TemplateError> {
    let mut out = Vec::new();
    for (source, primary_name, secondary_name) in [
        (
            Source::Twitch,
            "TWITCH_NOTIFICATION_TEMPLATE",
            "TWITCH_THREADS_TEMPLATE",
        ),
        (
            Source::YouTube,
            "YOUTUBE_NOTIFICATION_TEMPLATE",
            "YOUTUBE_THREADS_TEMPLATE",
        ),
    ] {
        let event = sample_event(source);
        let fields = event.fields();
        let set = templates.get(source);
        out.push(Preview {
            name: primary_name,
            limit: twitter::CHAR_LIMIT,
            message: render(&set.primary, &fields)?,
        });
        if let Some(secondary) = &set.secondary {
            out.push(Preview {
                name: secondary_name,
                limit: threads::CHAR_LIMIT,
                message: render(secondary, &fields)?,
            });
        }
    }
    Ok(out)
}

pub fn print(previews: &[Preview]) {
    let rule = "=".repeat(50);
    for preview in previews {
        println!("{rule}\n{}\n{rule}", preview.name);
        println!("{}", preview.message);
        println!("{rule}");
        println!(
            "Character count: {}/{}{}",
            preview.chars(),
            preview.limit,
            if preview.over_limit() { " (too long!)" } else { "" }
        );
        println!("Newlines detected: {}\n", preview.newlines());
    }
}

/// Sends [`TEST_MESSAGE`] through `sink`, asking first unless `yes`.
pub async fn test_post(sink: Arc<dyn PostSink>, yes: bool) -> Result<()> {
    println!("{TEST_MESSAGE}\n");
    if !yes {
        let prompt = format!("Send this test message to {}?", sink.name());
        let confirmed = tokio::task::spawn_blocking(move || {
            dialoguer::Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
        })
        .await
        .context("Prompt task")?
        .context("Reading confirmation")?;
        if !confirmed {
            info!("Preview only, nothing sent");
            return Ok(());
        }
    }

    match sink.post(TEST_MESSAGE).await {
        Ok(id) => {
            info!(sink = sink.name(), %id, "Test message posted");
            Ok(())
        }
        Err(err) => {
            error!(sink = sink.name(), category = err.category(), "{err}");
            Err(eyre!("Test post to {} failed", sink.name()))
        }
    }
}
