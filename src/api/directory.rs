// Directory endpoint: the contacts visible to the current session

use log::info;

use super::{decode, ApiClient};
use crate::error::Result;
use crate::models::Contact;

impl ApiClient {
    /// `GET /users -> [Contact]`
    pub async fn contacts(&self) -> Result<Vec<Contact>> {
        let response = self.get("/users")?.send().await?;
        let contacts: Vec<Contact> = decode(response).await?;
        info!("Fetched {} contacts", contacts.len());
        Ok(contacts)
    }
}
