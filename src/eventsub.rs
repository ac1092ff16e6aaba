use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};

use futures::StreamExt;
use strum_macros::Display;
use thiserror::Error;
use tokio::{
    select,
    sync::watch,
    time::{sleep, timeout},
};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, trace, warn};

use crate::{
    config::TwitchConfig,
    notify::{registry::ChannelRegistry, NotificationEvent, Notifier, Source},
    twitch::{
        api::{Helix, HelixError, Stream, User},
        auth::{self, AuthError},
        ws::{self, EventSubMessage, Session, StreamOnline, WsStream},
        Endpoints,
    },
};

const FALLBACK_TITLE: &str = "Live now!";
const FALLBACK_GAME: &str = "Unknown";
const WELCOME_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_KEEPALIVE: u64 = 10;
const KEEPALIVE_GRACE: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const HANDOVER_DRAIN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum State {
    Uninitialized,
    Authenticating,
    Resolving,
    Subscribed,
    Listening,
    Stopped,
}

#[derive(Debug, Error)]
pub enum EventSubError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("none of the configured twitch channels exist")]
    NoChannels,
    #[error("could not subscribe to any twitch channel")]
    NoSubscriptions,
    #[error("websocket closed before the session welcome")]
    NoWelcome,
    #[error("startup cancelled")]
    Cancelled,
    #[error(transparent)]
    Helix(#[from] HelixError),
    #[error(transparent)]
    WebSocket(#[from] tungstenite::Error),
    #[error("malformed eventsub message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl EventSubError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            EventSubError::Cancelled | EventSubError::Auth(AuthError::Cancelled)
        )
    }
}

/// Watches twitch channels through an EventSub websocket session and dispatches a notification
/// for every `stream.online` event.
pub struct EventSubMonitor {
    client: reqwest::Client,
    endpoints: Endpoints,
    config: TwitchConfig,
    registry: Arc<ChannelRegistry>,
    notifier: Notifier,
    reconnect_delay: Duration,
    state: watch::Sender<State>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl EventSubMonitor {
    pub fn new(
        client: reqwest::Client,
        endpoints: Endpoints,
        config: TwitchConfig,
        registry: Arc<ChannelRegistry>,
        notifier: Notifier,
        parent: &CancellationToken,
    ) -> Self {
        EventSubMonitor {
            client,
            endpoints,
            config,
            registry,
            notifier,
            reconnect_delay: RECONNECT_DELAY,
            state: watch::Sender::new(State::Uninitialized),
            cancel: parent.child_token(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn state(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    fn set_state(&self, next: State) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            info!(state = %next, "EventSub state changed");
        }
    }

    async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output, EventSubError> {
        select! {
            _ = self.cancel.cancelled() => Err(EventSubError::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// Logs in, then subscribes and starts listening. Returns once events are flowing.
    pub async fn start(&self) -> Result<(), EventSubError> {
        self.set_state(State::Authenticating);
        let token = auth::login(
            &self.client,
            &self.endpoints,
            &self.config.client_id,
            &self.config.client_secret,
            &self.cancel,
        )
        .await?;

        let helix = Helix::authenticated(
            self.client.clone(),
            &self.endpoints,
            self.config.client_id.clone(),
            self.config.client_secret.clone(),
            token,
        );
        self.listen(helix).await
    }

    /// Everything after authentication: resolve channels, open the session, subscribe and spawn
    /// the reader and consumer tasks.
    pub async fn listen(&self, helix: Helix) -> Result<(), EventSubError> {
        self.set_state(State::Resolving);
        let users = self
            .cancellable(helix.users_by_login(&self.config.channels))
            .await??;
        for login in &self.config.channels {
            if !users.iter().any(|u| u.login.eq_ignore_ascii_case(login)) {
                warn!(%login, "Twitch channel not found");
            }
        }
        if users.is_empty() {
            return Err(EventSubError::NoChannels);
        }
        for user in &users {
            info!(login = %user.login, id = %user.id, "Found twitch channel");
        }

        let link = Link {
            helix: helix.clone(),
            users,
            url: self.endpoints.eventsub.clone(),
        };
        let (socket, session) = self.cancellable(link.open()).await??;
        self.set_state(State::Subscribed);

        let (events_tx, events_rx) = flume::unbounded();
        let channels = link.users.len();
        let reader = Reader {
            link,
            events: events_tx,
            cancel: self.cancel.clone(),
            reconnect_delay: self.reconnect_delay,
        };
        self.tasks.spawn(reader.run(socket, session));

        let consumer = Consumer {
            helix,
            registry: self.registry.clone(),
            notifier: self.notifier.clone(),
            seen: HashSet::new(),
        };
        self.tasks
            .spawn(consumer.run(events_rx, self.cancel.clone()));

        self.set_state(State::Listening);
        info!(channels, "Listening for twitch streams going live");
        Ok(())
    }

    /// Closes the session and waits for both tasks. Safe to call more than once, or without a
    /// prior start.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.set_state(State::Stopped);
    }
}

struct Link {
    helix: Helix,
    users: Vec<User>,
    url: String,
}

impl Link {
    async fn open(&self) -> Result<(WsStream, Session), EventSubError> {
        let (socket, session) = self.connect(&self.url).await?;

        let mut subscribed = 0;
        for user in &self.users {
            match self
                .helix
                .subscribe_stream_online(&user.id, &session.id)
                .await
            {
                Ok(()) => {
                    debug!(login = %user.login, "Subscribed to stream.online");
                    subscribed += 1;
                }
                Err(err) => error!(login = %user.login, "Could not subscribe: {err}"),
            }
        }
        if subscribed == 0 {
            return Err(EventSubError::NoSubscriptions);
        }
        info!(subscribed, session_id = %session.id, "EventSub session ready");
        Ok((socket, session))
    }

    async fn connect(&self, url: &str) -> Result<(WsStream, Session), EventSubError> {
        let mut socket = ws::connect(url).await?;
        let session = timeout(WELCOME_TIMEOUT, welcome(&mut socket))
            .await
            .map_err(|_| EventSubError::NoWelcome)??;
        debug!(session_id = %session.id, status = %session.status, "EventSub welcome");
        Ok((socket, session))
    }
}

async fn welcome(socket: &mut WsStream) -> Result<Session, EventSubError> {
    while let Some(frame) = socket.next().await {
        if let Message::Text(text) = frame? {
            if let EventSubMessage::Welcome(session) = ws::parse(&text)? {
                return Ok(session);
            }
        }
    }
    Err(EventSubError::NoWelcome)
}

struct Reader {
    link: Link,
    events: flume::Sender<StreamOnline>,
    cancel: CancellationToken,
    reconnect_delay: Duration,
}

impl Reader {
    async fn run(self, mut socket: WsStream, mut session: Session) {
        loop {
            let keepalive = Duration::from_secs(
                session
                    .keepalive_timeout_seconds
                    .unwrap_or(DEFAULT_KEEPALIVE),
            ) + KEEPALIVE_GRACE;

            let frame = select! {
                _ = self.cancel.cancelled() => None,
                frame = timeout(keepalive, socket.next()) => Some(frame),
            };
            let Some(frame) = frame else {
                close(socket).await;
                return;
            };

            let text = match frame {
                Ok(Some(Ok(Message::Text(text)))) => Some(text),
                Ok(Some(Ok(Message::Close(frame)))) => {
                    warn!(?frame, "EventSub closed the session");
                    None
                }
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(err))) => {
                    warn!("EventSub socket error: {err}");
                    None
                }
                Ok(None) => {
                    warn!("EventSub socket ended");
                    None
                }
                Err(_) => {
                    warn!("No EventSub message within {keepalive:?}");
                    None
                }
            };

            let Some(text) = text else {
                match self.reopen().await {
                    Some(next) => (socket, session) = next,
                    None => return,
                }
                continue;
            };

            match ws::parse(&text) {
                Ok(EventSubMessage::Notification(event)) => {
                    if self.events.send_async(event).await.is_err() {
                        close(socket).await;
                        return;
                    }
                }
                Ok(EventSubMessage::Keepalive) => trace!("EventSub keepalive"),
                Ok(EventSubMessage::Reconnect(next)) => {
                    let moved = match next.reconnect_url {
                        Some(url) => self.follow(&mut socket, &url).await,
                        None => Some(Err(EventSubError::NoWelcome)),
                    };
                    match moved {
                        Some(Ok((new_socket, new_session))) => {
                            info!(session_id = %new_session.id, "Moved to new EventSub session");
                            close(std::mem::replace(&mut socket, new_socket)).await;
                            session = new_session;
                        }
                        Some(Err(err)) => {
                            warn!("Could not follow EventSub reconnect: {err}");
                            match self.reopen().await {
                                Some(next) => (socket, session) = next,
                                None => return,
                            }
                        }
                        None => {
                            close(socket).await;
                            return;
                        }
                    }
                }
                Ok(EventSubMessage::Revocation(sub)) => warn!(
                    subscription = %sub.id,
                    kind = %sub.kind,
                    status = %sub.status,
                    "EventSub subscription revoked"
                ),
                Ok(EventSubMessage::Welcome(_)) => {}
                Ok(EventSubMessage::Other(kind)) => debug!(%kind, "Ignoring EventSub message"),
                Err(err) => warn!("Malformed EventSub frame: {err}"),
            }
        }
    }

    /// Connects to `url` while `old` keeps delivering, then drains `old` until the server closes
    /// it. `None` once cancelled.
    async fn follow(
        &self,
        old: &mut WsStream,
        url: &str,
    ) -> Option<Result<(WsStream, Session), EventSubError>> {
        let connect = self.link.connect(url);
        tokio::pin!(connect);
        let mut open = true;
        let moved = loop {
            select! {
                _ = self.cancel.cancelled() => return None,
                res = &mut connect => break res,
                frame = old.next(), if open => open = self.forward(frame).await,
            }
        };
        let next = match moved {
            Ok(next) => next,
            Err(err) => return Some(Err(err)),
        };

        let drain = timeout(HANDOVER_DRAIN, async {
            while open {
                open = self.forward(old.next().await).await;
            }
        });
        let drained = select! {
            _ = self.cancel.cancelled() => false,
            _ = drain => true,
        };
        if !drained {
            close(next.0).await;
            return None;
        }
        Some(Ok(next))
    }

    async fn forward(&self, frame: Option<Result<Message, tungstenite::Error>>) -> bool {
        match frame {
            Some(Ok(Message::Text(text))) => {
                if let Ok(EventSubMessage::Notification(event)) = ws::parse(&text) {
                    _ = self.events.send_async(event).await;
                }
                true
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => false,
            Some(Ok(_)) => true,
        }
    }

    async fn reopen(&self) -> Option<(WsStream, Session)> {
        loop {
            select! {
                _ = self.cancel.cancelled() => return None,
                _ = sleep(self.reconnect_delay) => {}
            }
            let attempt = select! {
                _ = self.cancel.cancelled() => return None,
                res = self.link.open() => res,
            };
            match attempt {
                Ok(next) => return Some(next),
                Err(err) => error!("Could not reopen EventSub session: {err}"),
            }
        }
    }
}

async fn close(mut socket: WsStream) {
    if let Err(err) = socket.close(Some(ws::normal_close())).await {
        debug!("Closing EventSub socket: {err}");
    }
}

struct Consumer {
    helix: Helix,
    registry: Arc<ChannelRegistry>,
    notifier: Notifier,
    seen: HashSet<(String, String)>,
}

impl Consumer {
    async fn run(mut self, events: flume::Receiver<StreamOnline>, cancel: CancellationToken) {
        loop {
            let event = select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv_async() => match event {
                    Ok(event) => event,
                    Err(_) => break,
                },
            };
            self.handle(event).await;
        }
    }

    async fn handle(&mut self, event: StreamOnline) {
        if !self
            .seen
            .insert((event.broadcaster_user_id.clone(), event.id.clone()))
        {
            debug!(login = %event.broadcaster_user_login, stream = %event.id, "Duplicate stream.online");
            return;
        }
        info!(
            login = %event.broadcaster_user_login,
            name = %event.broadcaster_user_name,
            started_at = ?event.started_at,
            "Twitch stream started"
        );

        let login = event.broadcaster_user_login;
        let (title, game) = stream_details(self.helix.stream(&login).await);
        let notification = NotificationEvent {
            source: Source::Twitch,
            profile: self.registry.lookup(&login),
            channel: login,
            title,
            topic: game,
        };
        self.notifier.dispatch(&notification).await;
    }
}

fn stream_details(res: Result<Option<Stream>, HelixError>) -> (String, String) {
    match res {
        Ok(Some(stream)) => {
            let game = if stream.game_name.is_empty() {
                FALLBACK_GAME.to_owned()
            } else {
                stream.game_name
            };
            (stream.title, game)
        }
        Ok(None) => (FALLBACK_TITLE.to_owned(), FALLBACK_GAME.to_owned()),
        Err(err) => {
            warn!("Could not fetch stream info: {err}");
            (FALLBACK_TITLE.to_owned(), FALLBACK_GAME.to_owned())
        }
    }
}
