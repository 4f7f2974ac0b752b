// Live channel: the persistent push connection of a session
//
// State machine: Disconnected -> Connecting -> Connected -> Disconnected.
// One channel is opened per session; only `message` frames are delivered.

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

pub mod frames;
pub mod reconnect;

pub use frames::{parse_frame, InboundFrame};
pub use reconnect::ReconnectPolicy;

use crate::models::LiveMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events dispatched by the channel to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    StateChanged(ChannelState),
    Message(LiveMessage),
    /// The connection could not be established or was lost
    Failure(String),
}

#[derive(Debug, Clone)]
pub struct LiveOptions {
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Interval of `ping` frames; `None` sends no heartbeat
    pub heartbeat: Option<Duration>,
}

impl Default for LiveOptions {
    fn default() -> Self {
        LiveOptions {
            connect_timeout: crate::config::DEFAULT_TIMEOUT,
            reconnect: ReconnectPolicy::disabled(),
            heartbeat: None,
        }
    }
}

/// Shared between the handle and the connection task
struct Shared {
    closed: AtomicBool,
    state: watch::Sender<ChannelState>,
    sink: mpsc::UnboundedSender<LiveEvent>,
}

impl Shared {
    // Nothing is dispatched after close, including frames already read
    fn dispatch(&self, event: LiveEvent) {
        if self.closed.load(Ordering::SeqCst) {
            debug!("Live channel closed, dropping {:?}", event);
            return;
        }
        if self.sink.send(event).is_err() {
            debug!("Live channel owner is gone");
        }
    }

    fn set_state(&self, state: ChannelState) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Live channel {:?} -> {:?}", previous, state);
            self.dispatch(LiveEvent::StateChanged(state));
        }
    }
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

/// Handle to a running live channel. Dropping it closes the channel.
pub struct LiveChannel {
    url: Url,
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl LiveChannel {
    /// Start connecting to `url`; events are sent to `sink`.
    pub fn open(url: Url, options: LiveOptions, sink: mpsc::UnboundedSender<LiveEvent>) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            state,
            sink,
        });
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!("Opening live channel to {}", url);
        let task = tokio::spawn(run_channel(url.clone(), options, shared.clone(), shutdown_rx));

        LiveChannel {
            url,
            shared,
            shutdown,
            task: Some(task),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Tear the channel down. No event is dispatched after this returns and
    /// the state reads `Disconnected` immediately.
    pub fn close(&mut self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing live channel to {}", self.url);
        self.shared.state.send_replace(ChannelState::Disconnected);
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            // Give the task a moment to send a close frame, then make sure it is gone
            tokio::spawn(async move {
                let abort = task.abort_handle();
                if timeout(Duration::from_secs(2), task).await.is_err() {
                    warn!("Live channel task did not stop in time, aborting");
                    abort.abort();
                }
            });
        }
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.shared.closed.store(true, Ordering::SeqCst);
            self.shared.state.send_replace(ChannelState::Disconnected);
            let _ = self.shutdown.send(true);
        }
    }
}

async fn run_channel(url: Url, options: LiveOptions, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut attempt: u32 = 0;
    loop {
        shared.set_state(ChannelState::Connecting);

        let connect = tokio::select! {
            _ = shutdown.changed() => break,
            result = timeout(options.connect_timeout, tokio_tungstenite::connect_async(url.as_str())) => result,
        };

        let end = match connect {
            Ok(Ok((stream, _response))) => {
                info!("Live channel connected to {}", url);
                attempt = 0;
                shared.set_state(ChannelState::Connected);
                run_session(stream, &options, &shared, &mut shutdown).await
            }
            Ok(Err(e)) => SessionEnd::Lost(format!("connect failed: {}", e)),
            Err(_) => SessionEnd::Lost(format!("connect timed out after {:?}", options.connect_timeout)),
        };

        match end {
            SessionEnd::Shutdown => break,
            SessionEnd::Lost(reason) => {
                error!("Live channel to {} lost: {}", url, reason);
                shared.set_state(ChannelState::Disconnected);
                shared.dispatch(LiveEvent::Failure(reason));
            }
        }

        let Some(delay) = options.reconnect.delay(attempt) else {
            debug!("Live channel will not reconnect");
            break;
        };
        attempt += 1;
        info!("Reconnecting live channel in {:?} (attempt {}/{})", delay, attempt, options.reconnect.max_attempts);
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    shared.set_state(ChannelState::Disconnected);
}

async fn run_session<S>(
    stream: tokio_tungstenite::WebSocketStream<S>,
    options: &LiveOptions,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut source) = stream.split();
    let mut heartbeat = options
        .heartbeat
        .map(|every| tokio::time::interval_at(Instant::now() + every, every));

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if let Err(e) = sink.send(WsMessage::Close(None)).await {
                    debug!("Failed to send close frame: {}", e);
                }
                return SessionEnd::Shutdown;
            }
            _ = tick(&mut heartbeat) => {
                if let Err(e) = sink.send(WsMessage::Text(frames::ping_frame())).await {
                    return SessionEnd::Lost(format!("heartbeat failed: {}", e));
                }
            }
            frame = source.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Some(InboundFrame::Message(message)) = parse_frame(&text) {
                        debug!("Live message from {} to {}", message.sender_id, message.receiver_id);
                        shared.dispatch(LiveEvent::Message(message));
                    }
                }
                Some(Ok(WsMessage::Close(reason))) => {
                    let reason = reason
                        .map(|frame| frame.reason.to_string())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    return SessionEnd::Lost(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                None => return SessionEnd::Lost("stream ended".to_string()),
            }
        }
    }
}

async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
