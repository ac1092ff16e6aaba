use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

pub const BASE_URL: &str = "https://www.youtube.com";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const PLAYABLE_MARKER: &str = r#""playabilityStatus":{"status":"OK""#;
const FALLBACK_TITLE: &str = "Live Stream";

static WATCH_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"watch\?v=([a-zA-Z0-9_-]{11})").unwrap());
static VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""videoId":"([a-zA-Z0-9_-]{11})""#).unwrap());
static OWNER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""ownerChannelName":"([^"]+)""#).unwrap());
static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""title":"([^"]+)""#).unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveVideo {
    pub video_id: String,
    /// Scraped owner name, the channel id when the page does not carry one.
    pub channel_name: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageStatus {
    Live(LiveVideo),
    NotLive,
    /// A video id was found but the player is not playable (scheduled premieres, ended streams).
    NotPlayable(LiveVideo),
}

#[derive(Debug, Error)]
#[error("could not fetch live page: {0}")]
pub struct ProbeError(#[from] reqwest::Error);

fn capture(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
}

/// Classifies a fetched `/channel/{id}/live` page. `final_url` is the url after redirects.
pub fn parse_live_page(channel_id: &str, final_url: &str, body: &str) -> PageStatus {
    let Some(video_id) = capture(&WATCH_URL, final_url).or_else(|| capture(&VIDEO_ID, body))
    else {
        return PageStatus::NotLive;
    };

    let video = LiveVideo {
        video_id,
        channel_name: capture(&OWNER_NAME, body).unwrap_or_else(|| channel_id.to_owned()),
        title: capture(&TITLE, body).unwrap_or_else(|| FALLBACK_TITLE.to_owned()),
    };
    if body.contains(PLAYABLE_MARKER) {
        PageStatus::Live(video)
    } else {
        PageStatus::NotPlayable(video)
    }
}

/// Fetches channel live pages with a browser user agent.
#[derive(Debug, Clone)]
pub struct Prober {
    client: reqwest::Client,
    base_url: String,
}

impl Prober {
    pub fn new() -> Result<Self, ProbeError> {
        Self::with_base_url(BASE_URL.to_owned())
    }

    pub fn with_base_url(base_url: String) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Prober { client, base_url })
    }

    pub async fn probe(&self, channel_id: &str) -> Result<PageStatus, ProbeError> {
        let res = self
            .client
            .get(format!("{}/channel/{channel_id}/live", self.base_url))
            .send()
            .await?;

        if !res.status().is_success() {
            debug!(%channel_id, status = %res.status(), "Live page not available");
            return Ok(PageStatus::NotLive);
        }

        let final_url = res.url().to_string();
        let body = res.text().await?;
        let status = parse_live_page(channel_id, &final_url, &body);
        if let PageStatus::NotPlayable(video) = &status {
            warn!(
                %channel_id,
                channel = %video.channel_name,
                title = %video.title,
                "Non-live stream detected"
            );
        }
        Ok(status)
    }
}
