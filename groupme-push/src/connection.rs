//! Connection management: socket open, session state, and the dispatch loop.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite;

use crate::Error;
use crate::dispatch::{Inbound, classify};
use crate::protocol::{
    Envelope, Ext, build_connect_msg, build_ping_response, build_subscribe_msg, channel,
    decode_frame, encode_frame,
};
use crate::router::Callbacks;
use crate::sequence::IdSequencer;
use crate::types::Category;

pub(crate) const COMMAND_CHANNEL_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Type aliases for WebSocket split halves
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub(crate) type WsRead = futures_util::stream::SplitStream<WsStream>;
pub(crate) type WsWrite = futures_util::stream::SplitSink<WsStream, tungstenite::Message>;

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Per-connection protocol state. Owned by the dispatch loop once running.
#[derive(Debug)]
pub(crate) struct Session {
    access_token: String,
    user_id: String,
    client_id: String,
    ids: IdSequencer,
    subscriptions: BTreeSet<String>,
    disregard_self: bool,
}

impl Session {
    pub(crate) fn new(
        access_token: String,
        user_id: String,
        client_id: String,
        disregard_self: bool,
    ) -> Self {
        Self {
            access_token,
            user_id,
            client_id,
            ids: IdSequencer::new(),
            subscriptions: BTreeSet::new(),
            disregard_self,
        }
    }

    fn ext(&self) -> Ext {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        Ext {
            access_token: Some(self.access_token.clone()),
            timestamp: Some(timestamp),
        }
    }

    fn subscribe_request(&mut self, subscription: &str) -> Envelope {
        if !self.subscriptions.insert(subscription.to_string()) {
            tracing::debug!(subscription, "Re-subscribing to known channel");
        }
        let id = self.ids.next_id();
        build_subscribe_msg(&self.client_id, subscription, id, self.ext())
    }

    fn connect_request(&mut self) -> Envelope {
        let id = self.ids.next_id();
        build_connect_msg(&self.client_id, id)
    }

    fn ping_response(&mut self, channel: &str) -> Envelope {
        let id = self.ids.next_id();
        build_ping_response(channel, &self.client_id, id, self.ext())
    }

    fn observe_id(&mut self, env: &Envelope) {
        let result = match &env.id {
            None => return,
            Some(serde_json::Value::String(raw)) => self.ids.observe(raw),
            Some(other) => Err(Error::MalformedId(other.to_string())),
        };
        if let Err(e) = result {
            tracing::warn!(channel = %env.channel, "Ignoring inbound id: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Socket helpers
// ---------------------------------------------------------------------------

async fn send_envelope(ws_write: &mut WsWrite, env: &Envelope) -> Result<(), Error> {
    let text = encode_frame(env)?;
    ws_write.send(tungstenite::Message::Text(text.into())).await?;
    Ok(())
}

/// Subscribe to `subscription` and re-arm the connect loop.
async fn subscribe_and_connect(
    ws_write: &mut WsWrite,
    session: &mut Session,
    subscription: &str,
) -> Result<(), Error> {
    tracing::debug!(subscription, "Sending subscribe request");
    let subscribe = session.subscribe_request(subscription);
    send_envelope(ws_write, &subscribe).await?;
    tracing::debug!("Sending connect request");
    let connect = session.connect_request();
    send_envelope(ws_write, &connect).await
}

/// Open the websocket and subscribe to the user's personal channel.
pub(crate) async fn connect_and_subscribe(
    push_url: &str,
    session: &mut Session,
) -> Result<(WsWrite, WsRead), Error> {
    let (ws, _resp) = tokio_tungstenite::connect_async(push_url).await?;
    let (mut ws_write, ws_read) = ws.split();
    tracing::debug!(push_url, "Socket open");
    let personal = channel::user(&session.user_id);
    subscribe_and_connect(&mut ws_write, session, &personal).await?;
    Ok((ws_write, ws_read))
}

// ---------------------------------------------------------------------------
// Background dispatch loop
// ---------------------------------------------------------------------------

/// Requests from the [`PushClient`](crate::PushClient) handle.
pub(crate) enum Command {
    Subscribe {
        subscription: String,
        reply: oneshot::Sender<bool>,
    },
}

pub(crate) struct EventLoopState {
    pub ws_read: WsRead,
    pub ws_write: WsWrite,
    pub session: Session,
    pub callbacks: Callbacks,
    pub cmd_rx: mpsc::Receiver<Command>,
}

enum LoopAction {
    Continue,
    Stop,
}

pub(crate) async fn run_event_loop(mut p: EventLoopState, mut close_rx: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            frame = p.ws_read.next() => {
                let action = match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        handle_frame(&mut p, text.as_str()).await
                    }
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        match std::str::from_utf8(&data) {
                            Ok(text) => handle_frame(&mut p, text).await,
                            Err(e) => {
                                tracing::warn!("Dropping non-UTF-8 binary frame: {e}");
                                LoopAction::Continue
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        tracing::info!(?frame, "Server closed the connection");
                        fail(&p, Error::Closed)
                    }
                    Some(Ok(_)) => {
                        // Ignore ping, pong, raw frames
                        LoopAction::Continue
                    }
                    Some(Err(e)) => fail(&p, e.into()),
                    None => {
                        tracing::info!("WebSocket stream ended");
                        fail(&p, Error::Closed)
                    }
                };
                if let LoopAction::Stop = action {
                    return;
                }
            }

            Some(cmd) = p.cmd_rx.recv() => {
                if let LoopAction::Stop = handle_command(&mut p, cmd).await {
                    return;
                }
            }

            _ = &mut close_rx => {
                tracing::debug!("Closing websocket. Bye!");
                let _ = p.ws_write.close().await;
                return;
            }
        }
    }
}

fn fail(p: &EventLoopState, err: Error) -> LoopAction {
    tracing::error!("Websocket error: {err}");
    p.callbacks.report_error(&err);
    LoopAction::Stop
}

async fn handle_command(p: &mut EventLoopState, cmd: Command) -> LoopAction {
    match cmd {
        Command::Subscribe {
            subscription,
            reply,
        } => {
            let result = subscribe_and_connect(&mut p.ws_write, &mut p.session, &subscription).await;
            let _ = reply.send(result.is_ok());
            match result {
                Ok(()) => LoopAction::Continue,
                Err(e) => fail(p, e),
            }
        }
    }
}

async fn handle_frame(p: &mut EventLoopState, text: &str) -> LoopAction {
    let envelopes = match decode_frame(text) {
        Ok(envelopes) => envelopes,
        Err(e) => {
            tracing::warn!("Dropping frame: {e}");
            return LoopAction::Continue;
        }
    };
    for env in envelopes {
        if let LoopAction::Stop = handle_envelope(p, env).await {
            return LoopAction::Stop;
        }
    }
    LoopAction::Continue
}

/// What the loop writes back for one classified envelope.
#[derive(Debug)]
enum Reply {
    Nothing,
    Send(Envelope),
    /// Re-arm the connect loop after the advised interval.
    ConnectAfter(Duration),
}

async fn handle_envelope(p: &mut EventLoopState, env: Envelope) -> LoopAction {
    p.session.observe_id(&env);
    tracing::trace!(counter = p.session.ids.current(), channel = %env.channel, "Envelope received");

    let inbound = classify(env, &p.session.user_id, p.session.disregard_self);
    let reply = match respond(&mut p.session, &p.callbacks, inbound) {
        Reply::Nothing => return LoopAction::Continue,
        Reply::Send(env) => env,
        Reply::ConnectAfter(interval) => {
            // Blocks the loop; the server's advised interval is normally zero.
            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
            tracing::debug!("Sending connect request");
            p.session.connect_request()
        }
    };

    match send_envelope(&mut p.ws_write, &reply).await {
        Ok(()) => LoopAction::Continue,
        Err(e) => fail(p, e),
    }
}

fn respond(session: &mut Session, callbacks: &Callbacks, inbound: Inbound) -> Reply {
    match inbound {
        Inbound::Ping { channel } => {
            tracing::debug!(channel, "Sending ping response");
            Reply::Send(session.ping_response(&channel))
        }
        Inbound::ConnectAck { interval } => Reply::ConnectAfter(interval),
        Inbound::SubscribeEcho | Inbound::IdleAck => Reply::Nothing,
        Inbound::SelfMessage => {
            tracing::debug!("Discarding self message");
            Reply::Nothing
        }
        Inbound::Event { category, payload } => {
            tracing::debug!(?category, "Received event");
            callbacks.dispatch(category, payload);
            Reply::Nothing
        }
        Inbound::Unknown { kind, data } => {
            tracing::debug!(kind = kind.as_deref().unwrap_or("-"), "Unknown message type");
            callbacks.dispatch(Category::Other, data);
            Reply::Nothing
        }
        Inbound::SubscribeAck { subscription } => {
            match subscription {
                Some(s) if session.subscriptions.contains(&s) => {
                    tracing::debug!(subscription = %s, "Subscription confirmed");
                }
                other => {
                    tracing::debug!(subscription = ?other, "Subscription confirmed for unrequested channel");
                }
            }
            Reply::Nothing
        }
        Inbound::Unhandled(env) => {
            tracing::warn!(envelope = ?env, "Unhandled envelope");
            Reply::Nothing
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::sequence::decode_base36;

    fn session() -> Session {
        Session::new("tok".into(), "42".into(), "client-1".into(), false)
    }

    #[test]
    fn subscribe_request_stamps_id_and_ext() {
        let mut s = session();
        let env = s.subscribe_request("/group/7");
        assert_eq!(env.channel, "/meta/subscribe");
        assert_eq!(env.subscription.as_deref(), Some("/group/7"));
        assert_eq!(env.client_id.as_deref(), Some("client-1"));
        assert_eq!(env.id, Some("2".into()));
        let ext = env.ext.unwrap();
        assert_eq!(ext.access_token.as_deref(), Some("tok"));
        assert!(ext.timestamp.unwrap() > 1_600_000_000);
        assert!(s.subscriptions.contains("/group/7"));
    }

    #[test]
    fn requests_share_one_counter() {
        let mut s = session();
        let a = s.subscribe_request("/user/42");
        let b = s.connect_request();
        let c = s.ping_response("/user/42");
        let ids: Vec<u64> = [a, b, c]
            .iter()
            .map(|e| decode_base36(e.id.as_ref().and_then(|v| v.as_str()).unwrap()).unwrap())
            .collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn connect_request_shape() {
        let mut s = session();
        let env = s.connect_request();
        assert_eq!(env.channel, "/meta/connect");
        assert_eq!(env.connection_type.as_deref(), Some("websocket"));
        assert!(env.ext.is_none());
    }

    #[test]
    fn ping_response_echoes_channel() {
        let mut s = session();
        let env = s.ping_response("/foo");
        assert_eq!(env.channel, "/foo");
        assert_eq!(env.successful, Some(true));
        assert!(env.ext.is_some());
    }

    #[test]
    fn observed_ids_advance_counter() {
        let mut s = session();
        s.observe_id(&Envelope {
            channel: "/meta/connect".into(),
            id: Some("zz".into()),
            ..Default::default()
        });
        s.observe_id(&Envelope {
            channel: "/meta/connect".into(),
            id: Some("!bad!".into()),
            ..Default::default()
        });
        assert_eq!(s.connect_request().id, Some("100".into()));
    }

    #[test]
    fn non_string_id_is_ignored() {
        let mut s = session();
        s.observe_id(&Envelope {
            channel: "/meta/connect".into(),
            id: Some(serde_json::json!(7)),
            ..Default::default()
        });
        assert_eq!(s.ids.current(), 1);
        assert_eq!(s.connect_request().id, Some("2".into()));
    }

    #[test]
    fn connect_ack_rearms_after_interval() {
        let mut s = session();
        let reply = respond(
            &mut s,
            &Callbacks::new(),
            Inbound::ConnectAck {
                interval: Duration::from_secs(2),
            },
        );
        assert!(matches!(reply, Reply::ConnectAfter(d) if d == Duration::from_secs(2)));
    }

    #[test]
    fn ping_reply_uses_next_id() {
        let mut s = session();
        let reply = respond(
            &mut s,
            &Callbacks::new(),
            Inbound::Ping {
                channel: "/user/42".into(),
            },
        );
        let env = match reply {
            Reply::Send(env) => env,
            other => panic!("expected a ping response, got {other:?}"),
        };
        assert_eq!(env.channel, "/user/42");
        assert_eq!(env.id, Some("2".into()));
    }

    /// Log lines written while `f` runs, without ANSI colouring.
    fn capture_logs(f: impl FnOnce()) -> String {
        #[derive(Clone, Default)]
        struct Buffer(Arc<Mutex<Vec<u8>>>);

        impl std::io::Write for Buffer {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    fn counting_callbacks() -> (Callbacks, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callbacks = Callbacks::new().on_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (callbacks, calls)
    }

    #[tokio::test]
    async fn unknown_type_without_catch_all_logs_once() {
        for data in [
            serde_json::json!({"type": "membership.create", "subject": {}}),
            serde_json::json!({"type": 5}),
            serde_json::json!({"subject": {"text": "hi"}}),
        ] {
            let mut s = session();
            let (callbacks, calls) = counting_callbacks();
            let env = Envelope {
                channel: "/user/42".into(),
                data: Some(data.clone()),
                ..Default::default()
            };
            let logs = capture_logs(|| {
                let inbound = classify(env, "42", false);
                assert!(matches!(respond(&mut s, &callbacks, inbound), Reply::Nothing));
            });
            assert_eq!(
                logs.matches("Unknown message type").count(),
                1,
                "data {data}: {logs}"
            );
            assert!(!logs.contains("calling handler"), "data {data}: {logs}");
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(calls.load(Ordering::SeqCst), 0, "data {data}");
        }
    }

    #[tokio::test]
    async fn unknown_type_reaches_catch_all() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let callbacks = Callbacks::new().on_other(move |data| {
            let _ = tx.send(data);
        });
        let mut s = session();
        let data = serde_json::json!({"type": 5, "x": 1});
        let inbound = Inbound::Unknown {
            kind: None,
            data: data.clone(),
        };
        assert!(matches!(respond(&mut s, &callbacks, inbound), Reply::Nothing));
        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(data));
    }
}
