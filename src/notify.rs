use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use serde::Serialize;
use tracing::error;

use crate::config::SlackSettings;

#[derive(Debug, Serialize)]
struct SlackMessage<'a> {
    text: &'a str,
    username: &'a str,
    channel: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_emoji: Option<&'a str>,
}

/// Best-effort operator notifications over a Slack-compatible webhook.
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    settings: SlackSettings,
}

impl Notifier {
    pub fn new(settings: SlackSettings, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, settings })
    }

    pub async fn post(&self, text: &str) -> bool {
        self.post_with_icon(text, None).await
    }

    /// Never fails the caller: problems are logged and reported as `false`.
    pub async fn post_with_icon(&self, text: &str, icon_emoji: Option<&str>) -> bool {
        let Some(url) = self
            .settings
            .webhook_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
        else {
            error!("can't send notification, no slack.webhook_url configured: {}", text);
            return false;
        };

        let msg = SlackMessage {
            text,
            username: &self.settings.username,
            channel: &self.settings.channel,
            icon_emoji,
        };
        match self.client.post(url).json(&msg).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                error!("can't send notification, webhook status {}", resp.status());
                false
            }
            Err(err) => {
                error!("can't send notification: {err}");
                false
            }
        }
    }
}
