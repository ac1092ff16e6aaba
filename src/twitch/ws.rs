use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        protocol::{frame::coding::CloseCode, CloseFrame},
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::trace;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn connect(url: &str) -> Result<WsStream, tungstenite::Error> {
    let (socket, _) = connect_async(url).await?;
    Ok(socket)
}

/// Close frame sent when we shut the session down ourselves.
pub fn normal_close() -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    pub message_id: String,
    pub message_type: String,
    #[serde(default)]
    pub message_timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub keepalive_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub reconnect_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// `stream.online` event body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamOnline {
    /// Id of the stream, stable across duplicate deliveries.
    pub id: String,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    #[serde(default)]
    pub broadcaster_user_name: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    metadata: Metadata,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    session: Session,
}

#[derive(Debug, Deserialize)]
struct SubscriptionPayload {
    subscription: Subscription,
    #[serde(default)]
    event: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSubMessage {
    Welcome(Session),
    Keepalive,
    Reconnect(Session),
    Notification(StreamOnline),
    Revocation(Subscription),
    /// Any message type or notification we do not handle, by type.
    Other(String),
}

fn payload<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}

pub fn parse(text: &str) -> Result<EventSubMessage, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;
    trace!(
        id = %envelope.metadata.message_id,
        kind = %envelope.metadata.message_type,
        timestamp = %envelope.metadata.message_timestamp,
        "EventSub frame"
    );
    Ok(match envelope.metadata.message_type.as_str() {
        "session_welcome" => {
            EventSubMessage::Welcome(payload::<SessionPayload>(envelope.payload)?.session)
        }
        "session_keepalive" => EventSubMessage::Keepalive,
        "session_reconnect" => {
            EventSubMessage::Reconnect(payload::<SessionPayload>(envelope.payload)?.session)
        }
        "notification" => {
            let body: SubscriptionPayload = payload(envelope.payload)?;
            if body.subscription.kind == "stream.online" {
                EventSubMessage::Notification(payload(body.event)?)
            } else {
                EventSubMessage::Other(body.subscription.kind)
            }
        }
        "revocation" => {
            EventSubMessage::Revocation(payload::<SubscriptionPayload>(envelope.payload)?.subscription)
        }
        other => EventSubMessage::Other(other.to_owned()),
    })
}


#[cfg(test)]
mod test {
    use chrono::TimeZone;
    use serde_json::json;

    use super::{fixtures, *};

    #[test]
    fn welcome_session() {
        match parse(&fixtures::welcome("sess-1")).unwrap() {
            EventSubMessage::Welcome(session) => {
                assert_eq!(session.id, "sess-1");
                assert_eq!(session.keepalive_timeout_seconds, Some(10));
                assert_eq!(session.reconnect_url, None);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn stream_online_event() {
        let msg = parse(&fixtures::stream_online("9001", "1337", "cool_user")).unwrap();
        let EventSubMessage::Notification(event) = msg else {
            panic!("unexpected message {msg:?}");
        };
        assert_eq!(event.id, "9001");
        assert_eq!(event.broadcaster_user_login, "cool_user");
        assert_eq!(
            event.started_at,
            Some(Utc.with_ymd_and_hms(2023, 7, 19, 10, 11, 12).unwrap()
                + chrono::Duration::milliseconds(123))
        );
    }

    #[test]
    fn reconnect_and_keepalive() {
        assert_eq!(parse(&fixtures::keepalive()).unwrap(), EventSubMessage::Keepalive);
        match parse(&fixtures::reconnect("s", "wss://x/ws?id=1")).unwrap() {
            EventSubMessage::Reconnect(session) => {
                assert_eq!(session.reconnect_url.as_deref(), Some("wss://x/ws?id=1"))
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn revocation_and_unknown() {
        let revocation = json!({
            "metadata": { "message_id": "1", "message_type": "revocation" },
            "payload": { "subscription": { "id": "sub", "status": "authorization_revoked", "type": "stream.online" } }
        });
        assert_eq!(
            parse(&revocation.to_string()).unwrap(),
            EventSubMessage::Revocation(Subscription {
                id: "sub".to_owned(),
                status: "authorization_revoked".to_owned(),
                kind: "stream.online".to_owned()
            })
        );

        let other = json!({
            "metadata": { "message_id": "2", "message_type": "notification" },
            "payload": { "subscription": { "id": "sub", "type": "channel.follow" }, "event": {} }
        });
        assert_eq!(
            parse(&other.to_string()).unwrap(),
            EventSubMessage::Other("channel.follow".to_owned())
        );
    }

    #[test]
    fn malformed_frame() {
        assert!(parse("not json").is_err());
        assert!(parse(r#"{"metadata":{"message_id":"1","message_type":"session_welcome"},"payload":{}}"#).is_err());
    }
}
