//! Notification dispatch: actually sends notifications to configured webhooks.
//! Supports: Slack incoming webhook, Discord webhook, generic HTTP webhook.

use std::time::Duration;

use meetbridge_core::config::NotificationsConfig;

use crate::notify::Notification;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

const SLACK_ALERT: &str = "#dc3545";
const SLACK_OK: &str = "#28a745";
const DISCORD_ALERT: u32 = 0xDC3545;
const DISCORD_OK: u32 = 0x28A745;

/// Notification target configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyTarget {
    /// Slack incoming webhook (attachment with a status color).
    Slack { webhook_url: String },
    /// Discord webhook (one embed).
    Discord { webhook_url: String },
    /// Generic HTTP webhook: POST with a JSON body.
    Webhook {
        url: String,
        headers: Vec<(String, String)>,
    },
}

/// Dispatch a notification to a target.
/// Returns Ok(()) on success, Err(reason) on failure.
pub async fn dispatch(
    client: &reqwest::Client,
    notification: &Notification,
    target: &NotifyTarget,
) -> Result<(), String> {
    match target {
        NotifyTarget::Slack { webhook_url } => send_slack(client, webhook_url, notification).await,
        NotifyTarget::Discord { webhook_url } => send_discord(client, webhook_url, notification).await,
        NotifyTarget::Webhook { url, headers } => send_webhook(client, url, headers, notification).await,
    }
}

async fn send_slack(client: &reqwest::Client, webhook_url: &str, notification: &Notification) -> Result<(), String> {
    let color = if notification.priority.is_alert() { SLACK_ALERT } else { SLACK_OK };
    let resp = client
        .post(webhook_url)
        .json(&serde_json::json!({
            "attachments": [{
                "color": color,
                "title": notification.title,
                "text": notification.body,
                "ts": notification.timestamp.timestamp(),
            }]
        }))
        .timeout(SEND_TIMEOUT)
        .send()
        .await
        .map_err(|e| format!("Slack send failed: {e}"))?;

    if resp.status().is_success() {
        tracing::info!("✅ Slack notification sent: {}", notification.title);
        Ok(())
    } else {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(format!("Slack webhook error {status}: {body}"))
    }
}

async fn send_discord(client: &reqwest::Client, webhook_url: &str, notification: &Notification) -> Result<(), String> {
    let color = if notification.priority.is_alert() { DISCORD_ALERT } else { DISCORD_OK };
    let resp = client
        .post(webhook_url)
        .json(&serde_json::json!({
            "embeds": [{
                "title": notification.title,
                "description": notification.body,
                "color": color,
                "timestamp": notification.timestamp.to_rfc3339(),
                "footer": { "text": format!("MeetBridge • {}", notification.source) }
            }]
        }))
        .timeout(SEND_TIMEOUT)
        .send()
        .await
        .map_err(|e| format!("Discord send failed: {e}"))?;

    // Discord answers 204 No Content
    if resp.status().is_success() {
        tracing::info!("✅ Discord notification sent: {}", notification.title);
        Ok(())
    } else {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(format!("Discord webhook error {status}: {body}"))
    }
}

async fn send_webhook(
    client: &reqwest::Client,
    url: &str,
    headers: &[(String, String)],
    notification: &Notification,
) -> Result<(), String> {
    let mut req = client
        .post(url)
        .json(&serde_json::json!({
            "title": notification.title,
            "body": notification.body,
            "priority": notification.priority,
            "source": notification.source,
            "timestamp": notification.timestamp.to_rfc3339(),
        }))
        .timeout(SEND_TIMEOUT);

    for (key, value) in headers {
        req = req.header(key.as_str(), value.as_str());
    }

    let resp = req
        .send()
        .await
        .map_err(|e| format!("Webhook send failed: {e}"))?;

    if resp.status().is_success() {
        tracing::info!("✅ Webhook notification sent to {}: {}", url, notification.title);
        Ok(())
    } else {
        let status = resp.status();
        Err(format!("Webhook error {status}"))
    }
}

/// Dispatch to every target concurrently.
/// Returns a Vec of (target_name, Result).
pub async fn dispatch_all(
    client: &reqwest::Client,
    notification: &Notification,
    targets: &[(String, NotifyTarget)],
) -> Vec<(String, Result<(), String>)> {
    let sends = targets.iter().map(|(name, target)| async move {
        (name.clone(), dispatch(client, notification, target).await)
    });
    futures::future::join_all(sends).await
}

/// Build targets from the `[notifications]` section. Blank URLs are skipped.
pub fn targets_from_config(config: &NotificationsConfig) -> Vec<(String, NotifyTarget)> {
    let configured = |url: &Option<String>| {
        url.as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
    };

    let mut targets = Vec::new();
    if let Some(webhook_url) = configured(&config.slack_webhook_url) {
        targets.push(("slack".to_string(), NotifyTarget::Slack { webhook_url }));
    }
    if let Some(webhook_url) = configured(&config.discord_webhook_url) {
        targets.push(("discord".to_string(), NotifyTarget::Discord { webhook_url }));
    }
    if let Some(url) = configured(&config.webhook_url) {
        targets.push((
            "webhook".to_string(),
            NotifyTarget::Webhook {
                url,
                headers: vec![],
            },
        ));
    }
    targets
}
