// Conversation view state: the timeline of the selected contact
//
// The timeline is append-only for the active selection and keeps arrival
// order. Selecting a contact discards it; the history fetch issued for the
// selection replaces it when it completes, unless the selection has moved on.

use log::{debug, info, warn};

use crate::error::ChatError;
use crate::models::{LiveMessage, Message};

/// Identifies the history fetch issued for one selection.
///
/// Switching A -> B -> A issues three tickets; only the last one is current,
/// so a slow response for the first selection of A is still discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub contact_id: String,
    generation: u64,
}

impl FetchTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// The timeline now holds exactly the fetched messages
    Applied(usize),
    /// The selection changed since the fetch was issued
    Stale,
    /// The fetch failed; the timeline is left empty
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Appended,
    /// Already in the timeline
    Duplicate,
    /// For a contact other than the selected one
    Elsewhere { contact_id: String },
    /// Not addressed to or from this session
    Foreign,
}

#[derive(Debug, Default)]
pub struct Conversation {
    me: Option<String>,
    selected: Option<String>,
    generation: u64,
    loading: bool,
    timeline: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the view to the identity of a new session, dropping all state
    pub fn start(&mut self, me: &str) {
        self.reset();
        self.me = Some(me.to_string());
    }

    /// Forget everything, e.g. on logout. Outstanding tickets become stale.
    pub fn reset(&mut self) {
        self.me = None;
        self.selected = None;
        self.loading = false;
        self.timeline.clear();
        self.generation += 1;
    }

    pub fn me(&self) -> Option<&str> {
        self.me.as_deref()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn timeline(&self) -> &[Message] {
        &self.timeline
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Select a contact: the timeline is cleared and a ticket for the
    /// history fetch is returned.
    pub fn select(&mut self, contact_id: &str) -> FetchTicket {
        self.generation += 1;
        self.selected = Some(contact_id.to_string());
        self.timeline.clear();
        self.loading = true;
        debug!("Selected {} (generation {})", contact_id, self.generation);
        FetchTicket {
            contact_id: contact_id.to_string(),
            generation: self.generation,
        }
    }

    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        ticket.generation == self.generation && self.selected.as_deref() == Some(ticket.contact_id.as_str())
    }

    /// Apply a completed history fetch
    pub fn apply_history(
        &mut self,
        ticket: &FetchTicket,
        result: Result<Vec<Message>, ChatError>,
    ) -> HistoryOutcome {
        if !self.is_current(ticket) {
            info!("Discarding stale history for {}", ticket.contact_id);
            return HistoryOutcome::Stale;
        }
        self.loading = false;
        match result {
            Ok(messages) => {
                let count = messages.len();
                self.timeline = messages;
                HistoryOutcome::Applied(count)
            }
            Err(e) => {
                warn!("Failed to load history for {}: {}", ticket.contact_id, e);
                self.timeline.clear();
                HistoryOutcome::Failed
            }
        }
    }

    /// Route a live push. Only pushes between this session and the selected
    /// contact are appended.
    pub fn push(&mut self, push: LiveMessage) -> PushOutcome {
        let Some(me) = self.me.as_deref() else {
            return PushOutcome::Foreign;
        };
        if push.receiver_id != me && push.sender_id != me {
            debug!("Ignoring push between {} and {}", push.sender_id, push.receiver_id);
            return PushOutcome::Foreign;
        }

        let message = push.into_message();
        let counterpart = message.counterpart(me).to_string();
        if self.selected.as_deref() != Some(counterpart.as_str()) {
            return PushOutcome::Elsewhere { contact_id: counterpart };
        }
        if self.append(message) {
            PushOutcome::Appended
        } else {
            PushOutcome::Duplicate
        }
    }

    /// Append the server's echo of a sent message. Returns whether it was
    /// appended; echoes for a contact that is no longer selected are dropped.
    pub fn apply_sent(&mut self, echo: Message) -> bool {
        if self.selected.as_deref() != Some(echo.receiver_id.as_str()) {
            debug!("Dropping echo {} for unselected contact {}", echo.id, echo.receiver_id);
            return false;
        }
        self.append(echo)
    }

    fn append(&mut self, message: Message) -> bool {
        if self.timeline.iter().any(|m| m.id == message.id) {
            debug!("Message {} already in timeline", message.id);
            return false;
        }
        self.timeline.push(message);
        true
    }
}
