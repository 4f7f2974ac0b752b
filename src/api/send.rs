// Send endpoint: submit a message and receive the stored copy

use log::info;

use super::{decode, ApiClient};
use crate::error::Result;
use crate::models::{Message, SendMessageRequest};

impl ApiClient {
    /// `POST /messages {receiver_id, content} -> Message`
    ///
    /// The returned message is the backend's canonical echo with a durable id
    /// and the server timestamp.
    pub async fn send_message(&self, receiver_id: &str, content: &str) -> Result<Message> {
        let request = SendMessageRequest {
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
        };
        let response = self.authorize(self.post("/messages"))?.json(&request).send().await?;
        let message: Message = decode(response).await?;
        info!("Message {} delivered to server for {}", message.id, receiver_id);
        Ok(message)
    }
}
