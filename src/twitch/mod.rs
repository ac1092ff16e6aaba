pub mod api;
pub mod auth;
pub mod ws;

/// Base urls of the twitch services in use, overridable for tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub id: String,
    pub helix: String,
    pub eventsub: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            id: "https://id.twitch.tv".to_owned(),
            helix: "https://api.twitch.tv/helix".to_owned(),
            eventsub: "wss://eventsub.wss.twitch.tv/ws".to_owned(),
        }
    }
}
