//! Gmail profile lookup, used to prove a token actually works

use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AuthError, Result};
use crate::manager::AccessToken;

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub email_address: String,
    #[serde(default)]
    pub messages_total: u64,
    #[serde(default)]
    pub threads_total: u64,
    #[serde(default)]
    pub history_id: Option<String>,
}

/// Fetch `users/me/profile` from the Gmail API at `base_url`
pub async fn fetch_profile(
    http: &reqwest::Client,
    base_url: &str,
    token: &AccessToken,
) -> Result<Profile> {
    let url = format!("{}/users/me/profile", base_url.trim_end_matches('/'));
    let response = http
        .get(&url)
        .header(AUTHORIZATION, token.authorization_header())
        .send()
        .await?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(AuthError::NotAuthenticated(
            "Gmail rejected the access token".to_string(),
        ));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::NetworkError(format!(
            "Gmail API returned HTTP {}: {}",
            status.as_u16(),
            body.trim()
        )));
    }

    let profile: Profile = response.json().await?;
    debug!("Fetched profile for {}", profile.email_address);
    Ok(profile)
}
