// Chat client: the session context wiring the session store, the REST
// clients, the live channel and the conversation view together.
//
// Network work runs on spawned tasks which report back as AppEvents over a
// single channel. All state changes happen in handle_event, called by the
// owner's loop, so effects are applied in the order the loop sees them.

use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::conversation::{Conversation, FetchTicket, HistoryOutcome, PushOutcome};
use crate::directory::Directory;
use crate::error::{ChatError, Result};
use crate::live::{ChannelState, LiveChannel, LiveEvent, LiveOptions};
use crate::models::{AuthResponse, Contact, Identity, Message};
use crate::session::{Session, SessionStorage, SessionStore};

/// Completed background work, applied by [`ChatClient::handle_event`]
#[derive(Debug)]
pub enum AppEvent {
    ContactsLoaded {
        epoch: u64,
        result: Result<Vec<Contact>>,
    },
    HistoryLoaded {
        ticket: FetchTicket,
        result: Result<Vec<Message>>,
    },
    MessageSent {
        epoch: u64,
        receiver_id: String,
        result: Result<Message>,
    },
    Live {
        epoch: u64,
        event: LiveEvent,
    },
}

/// What changed after handling an event, for the UI to react to
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    ContactsRefreshed(usize),
    History(HistoryOutcome),
    Push(PushOutcome),
    Sent { appended: bool },
    SendFailed(String),
    ChannelState(ChannelState),
    ChannelFailed(String),
    Ignored,
}

pub struct ChatClient {
    config: Arc<ClientConfig>,
    api: ApiClient,
    sessions: SessionStore,
    conversation: Conversation,
    directory: Directory,
    channel: Option<LiveChannel>,
    channel_state: ChannelState,
    // Bumped per session; events tagged with an older epoch are ignored
    epoch: u64,
    events_tx: mpsc::UnboundedSender<AppEvent>,
}

impl ChatClient {
    pub fn new(
        config: ClientConfig,
        storage: Box<dyn SessionStorage>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<AppEvent>)> {
        let config = Arc::new(config);
        let api = ApiClient::new(config.clone())?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok((
            ChatClient {
                config,
                api,
                sessions: SessionStore::new(storage),
                conversation: Conversation::new(),
                directory: Directory::new(),
                channel: None,
                channel_state: ChannelState::Disconnected,
                epoch: 0,
                events_tx,
            },
            events_rx,
        ))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn session(&self) -> Option<Session> {
        self.sessions.current()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.sessions.current().map(|s| s.identity)
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn selected_contact(&self) -> Option<&Contact> {
        self.conversation.selected().and_then(|id| self.directory.get(id))
    }

    pub fn channel_state(&self) -> ChannelState {
        match &self.channel {
            Some(channel) if !channel.is_closed() => self.channel_state,
            _ => ChannelState::Disconnected,
        }
    }

    /// Url of the open live channel, if any
    pub fn channel_url(&self) -> Option<&url::Url> {
        self.channel.as_ref().map(|c| c.url())
    }

    /// Resume a persisted session, if there is one
    pub fn restore(&mut self) -> Result<bool> {
        match self.sessions.restore() {
            Some(session) => {
                self.activate(session)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Check a restored credential against `/me`, ending the session if the
    /// backend rejects it
    pub async fn verify_session(&mut self) -> Result<Identity> {
        match self.api.me().await {
            Ok(identity) => Ok(identity),
            Err(ChatError::Unauthorized) => {
                warn!("Persisted session was rejected, logging out");
                self.logout()?;
                Err(ChatError::Unauthorized)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<Identity> {
        let auth = self.api.login(email, password).await?;
        self.begin(auth)
    }

    pub async fn register(&mut self, username: &str, email: &str, password: &str) -> Result<Identity> {
        let auth = self.api.register(username, email, password).await?;
        self.begin(auth)
    }

    fn begin(&mut self, auth: AuthResponse) -> Result<Identity> {
        if self.sessions.is_authenticated() {
            self.teardown();
        }
        let session = self.sessions.login(auth.user, auth.access_token)?;
        let identity = session.identity.clone();
        self.activate(session)?;
        Ok(identity)
    }

    // Everything a fresh session needs: credential, view, channel, contacts
    fn activate(&mut self, session: Session) -> Result<()> {
        self.epoch += 1;
        self.api.set_credential(Some(session.credential.clone()));
        self.conversation.start(&session.identity.id);
        self.directory.clear();
        self.open_channel(&session.identity)?;
        self.refresh_contacts();
        Ok(())
    }

    fn open_channel(&mut self, identity: &Identity) -> Result<()> {
        let url = self.config.live_url(&identity.id)?;
        let options = LiveOptions {
            connect_timeout: self.config.request_timeout,
            reconnect: self.config.reconnect.clone(),
            heartbeat: self.config.heartbeat,
        };

        // Tag every channel event with the session it belongs to
        let (live_tx, mut live_rx) = mpsc::unbounded_channel();
        let events_tx = self.events_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            while let Some(event) = live_rx.recv().await {
                if events_tx.send(AppEvent::Live { epoch, event }).is_err() {
                    break;
                }
            }
        });

        self.channel_state = ChannelState::Disconnected;
        self.channel = Some(LiveChannel::open(url, options, live_tx));
        Ok(())
    }

    /// End the session: close the channel, clear the persisted credential
    /// and drop all per-session state
    pub fn logout(&mut self) -> Result<()> {
        self.teardown();
        self.sessions.logout()
    }

    fn teardown(&mut self) {
        self.epoch += 1;
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.channel_state = ChannelState::Disconnected;
        self.api.set_credential(None);
        self.conversation.reset();
        self.directory.clear();
    }

    /// Re-fetch the contact list in the background
    pub fn refresh_contacts(&self) {
        let api = self.api.clone();
        let tx = self.events_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = api.contacts().await;
            let _ = tx.send(AppEvent::ContactsLoaded { epoch, result });
        });
    }

    /// Select a contact and fetch its history in the background
    pub fn select_contact(&mut self, contact_id: &str) -> Option<FetchTicket> {
        if !self.sessions.is_authenticated() {
            return None;
        }
        let ticket = self.conversation.select(contact_id);
        self.directory.clear_unread(contact_id);

        let api = self.api.clone();
        let tx = self.events_tx.clone();
        let spawned = ticket.clone();
        tokio::spawn(async move {
            let result = api.history(&spawned.contact_id).await;
            let _ = tx.send(AppEvent::HistoryLoaded { ticket: spawned, result });
        });
        Some(ticket)
    }

    /// Submit a message to the selected contact. Nothing is shown until the
    /// server's echo arrives. Returns whether a request was issued.
    pub fn send(&self, content: &str) -> bool {
        let content = content.trim();
        if content.is_empty() {
            return false;
        }
        let Some(receiver_id) = self.conversation.selected().map(str::to_string) else {
            debug!("No contact selected, not sending");
            return false;
        };

        let api = self.api.clone();
        let tx = self.events_tx.clone();
        let epoch = self.epoch;
        let content = content.to_string();
        tokio::spawn(async move {
            let result = api.send_message(&receiver_id, &content).await;
            let _ = tx.send(AppEvent::MessageSent { epoch, receiver_id, result });
        });
        true
    }

    /// Apply a completed background event to the client state
    pub fn handle_event(&mut self, event: AppEvent) -> Update {
        match event {
            AppEvent::ContactsLoaded { epoch, result } => {
                if epoch != self.epoch {
                    return Update::Ignored;
                }
                match result {
                    Ok(contacts) => {
                        let count = contacts.len();
                        self.directory.replace(contacts);
                        Update::ContactsRefreshed(count)
                    }
                    Err(e) => {
                        error!("Failed to refresh contacts, keeping {} known: {}", self.directory.contacts().len(), e);
                        Update::Ignored
                    }
                }
            }
            AppEvent::HistoryLoaded { ticket, result } => {
                Update::History(self.conversation.apply_history(&ticket, result))
            }
            AppEvent::MessageSent { epoch, receiver_id, result } => {
                if epoch != self.epoch {
                    return Update::Ignored;
                }
                match result {
                    Ok(echo) => Update::Sent {
                        appended: self.conversation.apply_sent(echo),
                    },
                    Err(e) => {
                        error!("Failed to send message to {}: {}", receiver_id, e);
                        Update::SendFailed(e.to_string())
                    }
                }
            }
            AppEvent::Live { epoch, event } => {
                if epoch != self.epoch || self.channel.is_none() {
                    debug!("Ignoring live event from a previous session");
                    return Update::Ignored;
                }
                self.handle_live(event)
            }
        }
    }

    fn handle_live(&mut self, event: LiveEvent) -> Update {
        match event {
            LiveEvent::StateChanged(state) => {
                self.channel_state = state;
                Update::ChannelState(state)
            }
            LiveEvent::Message(push) => {
                let outcome = self.conversation.push(push);
                if let PushOutcome::Elsewhere { contact_id } = &outcome {
                    info!("New message from {} while another contact is selected", contact_id);
                    self.directory.mark_unread(contact_id);
                }
                Update::Push(outcome)
            }
            LiveEvent::Failure(reason) => {
                warn!("Live channel failure: {}", reason);
                Update::ChannelFailed(reason)
            }
        }
    }
}
