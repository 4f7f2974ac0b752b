// History endpoint: persisted messages exchanged with one contact

use log::{debug, info};
use url::Url;

use super::{decode, ApiClient};
use crate::error::{ChatError, Result};
use crate::models::Message;

impl ApiClient {
    /// `GET /messages/{contact_id} -> [Message]`, oldest first
    pub async fn history(&self, contact_id: &str) -> Result<Vec<Message>> {
        let base = self.config.api_url("/messages");
        let mut url = Url::parse(&base)?;
        url.path_segments_mut()
            .map_err(|_| ChatError::InvalidUrl(base.clone()))?
            .push(contact_id);
        debug!("GET {}", url);
        let response = self.authorize(self.http.get(url))?.send().await?;
        let messages: Vec<Message> = decode(response).await?;
        info!("Fetched {} messages with {}", messages.len(), contact_id);
        Ok(messages)
    }
}
