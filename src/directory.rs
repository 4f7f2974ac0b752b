// Contact directory state, replaced wholesale on every refresh

use std::collections::HashMap;

use crate::models::Contact;

#[derive(Debug, Default)]
pub struct Directory {
    contacts: Vec<Contact>,
    unread: HashMap<String, usize>,
    loaded: bool,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contact set. Unread counters of contacts that are gone
    /// are dropped.
    pub fn replace(&mut self, contacts: Vec<Contact>) {
        self.unread.retain(|id, _| contacts.iter().any(|c| &c.id == id));
        self.contacts = contacts;
        self.loaded = true;
    }

    pub fn clear(&mut self) {
        self.contacts.clear();
        self.unread.clear();
        self.loaded = false;
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn get(&self, id: &str) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.contacts.iter().position(|c| c.id == id)
    }

    pub fn mark_unread(&mut self, id: &str) {
        *self.unread.entry(id.to_string()).or_insert(0) += 1;
    }

    pub fn clear_unread(&mut self, id: &str) {
        self.unread.remove(id);
    }

    pub fn unread(&self, id: &str) -> usize {
        self.unread.get(id).copied().unwrap_or(0)
    }
}
