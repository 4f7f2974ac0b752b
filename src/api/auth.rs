// Authentication endpoints: /login, /register and /me

use log::{error, info};

use super::{decode, error_detail, ApiClient};
use crate::error::{ChatError, Result};
use crate::models::{AuthResponse, Identity, LoginRequest, RegisterRequest};

impl ApiClient {
    /// `POST /login {email, password} -> {access_token, user}`
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        info!("Logging in as {}", email);
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self.post("/login").json(&request).send().await?;
        self.auth_response(response).await
    }

    /// `POST /register {username, email, password} -> {access_token, user}`
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<AuthResponse> {
        info!("Registering {} <{}>", username, email);
        let request = RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self.post("/register").json(&request).send().await?;
        self.auth_response(response).await
    }

    /// `GET /me` - profile of the identity the credential belongs to
    pub async fn me(&self) -> Result<Identity> {
        let response = self.get("/me")?.send().await?;
        decode(response).await
    }

    // Any rejection on the auth endpoints is an AuthFailure carrying the
    // backend's detail, so the form can show it inline
    async fn auth_response(&self, response: reqwest::Response) -> Result<AuthResponse> {
        let status = response.status();
        if status.is_success() {
            let auth: AuthResponse = response.json().await?;
            info!("Authenticated as {} ({})", auth.user.username, auth.user.id);
            return Ok(auth);
        }

        let detail = error_detail(response).await;
        error!("Authentication rejected with {}: {}", status, detail);
        if status.is_client_error() {
            Err(ChatError::Auth(detail))
        } else {
            Err(ChatError::Http { status: status.as_u16(), detail })
        }
    }
}
