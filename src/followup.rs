//! Follow-up scheduler: finds contacts idle past the configured windows and
//! injects the silence stimulus into the conversation engine.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::config::EngineConfig;
use crate::database::{Contact, SalesDatabase};
use crate::engine::ConversationEngine;

/// Synthetic stimulus that selects the follow-up-stage rule.
pub const SILENCE_STIMULUS: &str = "silêncio";

pub struct FollowUpScheduler {
    db: Arc<SalesDatabase>,
    idle: Duration,
    grace: Duration,
}

impl FollowUpScheduler {
    pub fn new(db: Arc<SalesDatabase>, config: &EngineConfig) -> Self {
        Self {
            db,
            idle: config.follow_up_idle(),
            grace: config.follow_up_grace(),
        }
    }

    /// Contacts due for a nudge: no follow-up inside the idle window AND no
    /// interaction inside the grace window.
    pub fn due_follow_ups(&self, now: DateTime<Utc>) -> Result<Vec<Contact>> {
        self.db
            .contacts_due_follow_up(now - self.idle, now - self.grace)
    }

    /// Send a follow-up to every due contact. `last_follow_up` is stamped
    /// regardless of the send outcome so a flaky surface cannot cause a
    /// tight retry loop; failures are logged by the channel layer.
    pub async fn process_due(
        &self,
        engine: &ConversationEngine,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let due = self.due_follow_ups(now)?;
        let mut sent = 0;

        for contact in due {
            tracing::info!(contact = %contact.name, "sending follow-up");
            if engine.send_follow_up(&contact).await? {
                sent += 1;
            }
            self.db.stamp_follow_up(&contact.id, now)?;
        }
        Ok(sent)
    }
}
