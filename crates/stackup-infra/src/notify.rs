//! Slack and Telegram senders exposed to workflow expressions.
//!
//! `'deploy finished'|notifySlack` and `'deploy finished'|notifyTelegram`
//! spawn the HTTP request on the current runtime and return immediately:
//! `true` when a send was dispatched, `false` when the channel is not
//! configured. Delivery failures are only logged.

use serde_json::{Value, json};
use stackup_core::workflow::capability::{ScriptCapability, TransformFn, transform};
use stackup_types::workflow::{NotificationSettings, SlackSettings, TelegramSettings};

const TELEGRAM_API: &str = "https://api.telegram.org";

pub struct NotifyCapability {
    client: reqwest::Client,
    slack: Option<SlackSettings>,
    telegram: Option<TelegramSettings>,
}

impl NotifyCapability {
    pub fn new(client: reqwest::Client, settings: &NotificationSettings) -> Self {
        Self {
            client,
            slack: settings.slack.clone().filter(|s| !s.webhook_url.trim().is_empty()),
            telegram: settings.telegram.clone().filter(|t| !t.api_key.trim().is_empty()),
        }
    }
}

fn message_arg(args: &[Value]) -> anyhow::Result<String> {
    match args.first() {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => anyhow::bail!("notify needs a message"),
    }
}

/// Spawn `body` as a JSON POST to `url` on the current runtime.
fn dispatch(client: &reqwest::Client, channel: &'static str, url: String, body: Value) -> anyhow::Result<()> {
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|_| anyhow::anyhow!("{channel} notifications need a running runtime"))?;
    let client = client.clone();
    handle.spawn(async move {
        match client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(channel, "notification delivered");
            }
            Ok(response) => {
                tracing::warn!(channel, status = response.status().as_u16(), "notification rejected");
            }
            Err(e) => tracing::warn!(channel, error = %e, "notification failed"),
        }
    });
    Ok(())
}

impl ScriptCapability for NotifyCapability {
    fn name(&self) -> &'static str {
        "notify"
    }

    fn transforms(&self) -> Vec<(&'static str, TransformFn)> {
        let slack_client = self.client.clone();
        let slack = self.slack.clone();
        let telegram_client = self.client.clone();
        let telegram = self.telegram.clone();

        vec![
            transform("notifySlack", move |args: &[Value]| {
                let Some(slack) = &slack else {
                    tracing::debug!("slack notification skipped, no webhook configured");
                    return Ok(json!(false));
                };
                let message = message_arg(args)?;
                if slack.channels.is_empty() {
                    dispatch(&slack_client, "slack", slack.webhook_url.clone(), json!({ "text": message }))?;
                }
                for channel in &slack.channels {
                    dispatch(
                        &slack_client,
                        "slack",
                        slack.webhook_url.clone(),
                        json!({ "text": message, "channel": channel }),
                    )?;
                }
                Ok(json!(true))
            }),
            transform("notifyTelegram", move |args: &[Value]| {
                let Some(telegram) = &telegram else {
                    tracing::debug!("telegram notification skipped, no api key configured");
                    return Ok(json!(false));
                };
                if telegram.chat_ids.is_empty() {
                    return Ok(json!(false));
                }
                let message = message_arg(args)?;
                let url = format!("{TELEGRAM_API}/bot{}/sendMessage", telegram.api_key);
                for chat_id in &telegram.chat_ids {
                    dispatch(
                        &telegram_client,
                        "telegram",
                        url.clone(),
                        json!({ "chat_id": chat_id, "text": message }),
                    )?;
                }
                Ok(json!(true))
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(capability: &NotifyCapability, name: &str, args: &[Value]) -> anyhow::Result<Value> {
        let transforms = capability.transforms();
        let (_, f) = transforms.iter().find(|(n, _)| *n == name).unwrap();
        f(args)
    }

    #[test]
    fn test_unconfigured_channels_return_false() {
        let capability = NotifyCapability::new(reqwest::Client::new(), &NotificationSettings::default());
        assert_eq!(call(&capability, "notifySlack", &[json!("hi")]).unwrap(), json!(false));
        assert_eq!(call(&capability, "notifyTelegram", &[json!("hi")]).unwrap(), json!(false));
    }

    #[test]
    fn test_blank_webhook_counts_as_unconfigured() {
        let settings = NotificationSettings {
            slack: Some(SlackSettings {
                webhook_url: "  ".to_string(),
                channels: Vec::new(),
            }),
            telegram: None,
        };
        let capability = NotifyCapability::new(reqwest::Client::new(), &settings);
        assert_eq!(call(&capability, "notifySlack", &[json!("hi")]).unwrap(), json!(false));
    }

    #[tokio::test]
    async fn test_configured_slack_dispatches_without_waiting() {
        let settings = NotificationSettings {
            slack: Some(SlackSettings {
                webhook_url: "http://127.0.0.1:9/hook".to_string(),
                channels: vec!["#dev".to_string()],
            }),
            telegram: None,
        };
        let capability = NotifyCapability::new(reqwest::Client::new(), &settings);
        assert_eq!(call(&capability, "notifySlack", &[json!("deployed")]).unwrap(), json!(true));
    }

    #[test]
    fn test_dispatch_outside_runtime_is_an_error() {
        let settings = NotificationSettings {
            slack: Some(SlackSettings {
                webhook_url: "http://127.0.0.1:9/hook".to_string(),
                channels: Vec::new(),
            }),
            telegram: None,
        };
        let capability = NotifyCapability::new(reqwest::Client::new(), &settings);
        assert!(call(&capability, "notifySlack", &[json!("x")]).is_err());
    }
}
