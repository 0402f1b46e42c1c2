//! Public entry point: [`PushClient`].

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::connection::{
    COMMAND_CHANNEL_CAPACITY, Command, EventLoopState, Session, connect_and_subscribe,
    run_event_loop,
};
use crate::handshake::{handshake, resolve_identity};
use crate::protocol::channel;
use crate::router::Callbacks;
use crate::types::{Error, PushConfig};

/// A GroupMe push client.
///
/// [`start`](PushClient::start) resolves the user, performs the handshake,
/// opens the websocket and spawns the dispatch loop. Events are delivered to
/// the registered [`Callbacks`]. A dropped connection is reported to the
/// error hook and is not re-established; call `start` again to reconnect.
pub struct PushClient {
    config: PushConfig,
    callbacks: Callbacks,
    active: Option<ActiveSession>,
}

struct ActiveSession {
    user_id: String,
    client_id: String,
    cmd_tx: mpsc::Sender<Command>,
    close_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ActiveSession {
    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }

    async fn join(&mut self) {
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!("Dispatch loop ended abnormally: {e}");
        }
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl PushClient {
    pub fn new(config: PushConfig, callbacks: Callbacks) -> Self {
        Self {
            config,
            callbacks,
            active: None,
        }
    }

    /// Connect and start dispatching events.
    ///
    /// Returns once the socket is open and the personal channel subscription
    /// has been sent. Failures are logged and returned; the client stays
    /// stopped. Calling `start` on a running client does nothing.
    pub async fn start(&mut self) -> Result<(), Error> {
        if self.is_connected() {
            tracing::debug!("Push client already running");
            return Ok(());
        }
        self.active = None;
        match self.open().await {
            Ok(active) => {
                self.active = Some(active);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to start push client: {e}");
                Err(e)
            }
        }
    }

    async fn open(&self) -> Result<ActiveSession, Error> {
        let http = reqwest::Client::builder()
            .timeout(self.config.request_timeout)
            .build()?;

        let user_id =
            resolve_identity(&http, &self.config.api_url, &self.config.access_token).await?;
        tracing::debug!(user_id, "Resolved user");
        let client_id = handshake(&http, &self.config.handshake_url).await?;
        tracing::debug!(client_id, "Got faye connection id");

        let mut session = Session::new(
            self.config.access_token.clone(),
            user_id.clone(),
            client_id.clone(),
            self.config.disregard_self,
        );
        let (ws_write, ws_read) = tokio::time::timeout(
            self.config.connect_timeout,
            connect_and_subscribe(&self.config.push_url, &mut session),
        )
        .await
        .map_err(|_| Error::Timeout("websocket connect"))??;

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(run_event_loop(
            EventLoopState {
                ws_read,
                ws_write,
                session,
                callbacks: self.callbacks.clone(),
                cmd_rx,
            },
            close_rx,
        ));

        Ok(ActiveSession {
            user_id,
            client_id,
            cmd_tx,
            close_tx: Some(close_tx),
            task: Some(task),
        })
    }

    /// Close the websocket. Does nothing if the client is not running.
    ///
    /// Handlers already dispatched keep running; they are not awaited.
    pub async fn stop(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        active.close();
        active.join().await;
    }

    /// Subscribe to a group's channel.
    ///
    /// Returns `false` if the connection is not open. `true` means the
    /// subscribe and connect requests were written, not that the server
    /// accepted the subscription.
    pub async fn subscribe_to_group(&self, group_id: &str) -> bool {
        let Some(active) = self.active.as_ref().filter(|a| a.is_running()) else {
            tracing::debug!(group_id, "Cannot subscribe: not connected");
            return false;
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = Command::Subscribe {
            subscription: channel::group(group_id),
            reply: reply_tx,
        };
        if active.cmd_tx.send(cmd).await.is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Whether the dispatch loop is running.
    pub fn is_connected(&self) -> bool {
        self.active.as_ref().is_some_and(ActiveSession::is_running)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.user_id.as_str())
    }

    pub fn client_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.client_id.as_str())
    }

    /// Wait until the dispatch loop ends (server close, transport error, or `stop`).
    pub async fn closed(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.join().await;
        }
    }
}
