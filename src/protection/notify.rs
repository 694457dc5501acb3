//! Violation notifications
//!
//! Builds a structured record per processed violation and delivers it to the
//! configured log channel as a single embed. Delivery failures are logged and
//! dropped; the notification sink is never allowed to fail event processing.

use crate::PROTECTION_TARGET;
use chrono::{DateTime, Utc};
use serenity::builder::{CreateEmbed, CreateMessage};
use serenity::http::Http;
use serenity::model::Timestamp;
use serenity::model::id::ChannelId;
use tracing::warn;

/// Structured outcome record handed to the notification channel
#[derive(Debug, Clone)]
pub struct NotificationRecord {
    pub title: String,
    pub actor: Option<u64>,
    pub target: Option<u64>,
    pub detail_lines: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl NotificationRecord {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            actor: None,
            target: None,
            detail_lines: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn actor(mut self, actor: Option<u64>) -> Self {
        self.actor = actor;
        self
    }

    #[must_use]
    pub fn target(mut self, target: Option<u64>) -> Self {
        self.target = target;
        self
    }

    #[must_use]
    pub fn details(mut self, lines: Vec<String>) -> Self {
        self.detail_lines = lines;
        self
    }
}

/// Send a record to a guild's log channel, best effort
pub async fn deliver(http: &Http, channel_id: u64, record: &NotificationRecord) {
    let mut embed = CreateEmbed::new()
        .title(record.title.clone())
        .description(record.detail_lines.join("\n"));
    if let Some(actor) = record.actor {
        embed = embed.field("Responsible", format!("<@{actor}>"), true);
    }
    if let Some(target) = record.target {
        embed = embed.field("Target", format!("{target}"), true);
    }
    if let Ok(ts) = Timestamp::from_unix_timestamp(record.timestamp.timestamp()) {
        embed = embed.timestamp(ts);
    }

    if let Err(e) = ChannelId::new(channel_id)
        .send_message(http, CreateMessage::new().embed(embed))
        .await
    {
        warn!(
            target: PROTECTION_TARGET,
            channel_id = %channel_id,
            error = %e,
            "Failed to deliver violation notification"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builder() {
        let record = NotificationRecord::new("Mass ban detected")
            .actor(Some(7))
            .target(Some(9))
            .details(vec!["line one".to_string(), "line two".to_string()]);

        assert_eq!(record.title, "Mass ban detected");
        assert_eq!(record.actor, Some(7));
        assert_eq!(record.target, Some(9));
        assert_eq!(record.detail_lines.len(), 2);
    }
}
