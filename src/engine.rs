//! Conversation engine: one contact-turn at a time, to completion.
//!
//! Ingest inbound text → dedupe → classify → update contact/stage/score →
//! select + render response → request send → log outbound. The engine holds
//! no private copies of persisted state beyond the working set of a turn;
//! every mutation goes through the store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;

use crate::analytics;
use crate::channel::MessageChannel;
use crate::classifier;
use crate::config::EngineConfig;
use crate::database::{fingerprint, Contact, MessageSender, SalesDatabase};
use crate::followup::FollowUpScheduler;
use crate::funnel::{self, Stage};
use crate::scripts::{self, RenderContext};

/// Synthetic stimulus used to pick the opening-stage rule.
const OUTREACH_STIMULUS: &str = "oi";

/// One contact registered for the automated loop.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub name: String,
    pub industry: Option<String>,
    pub pain_point: Option<String>,
}

impl RosterEntry {
    /// Parse the `name;industry;pain_point` registration line. Industry and
    /// pain point are optional.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split(';').map(str::trim);
        let name = parts.next().filter(|n| !n.is_empty())?.to_string();
        let industry = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        let pain_point = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        Some(Self {
            name,
            industry,
            pain_point,
        })
    }
}

pub struct ConversationEngine {
    db: Arc<SalesDatabase>,
    channel: Arc<dyn MessageChannel>,
    config: EngineConfig,
    product: String,
    scheduler: FollowUpScheduler,
}

impl ConversationEngine {
    pub fn new(
        db: Arc<SalesDatabase>,
        channel: Arc<dyn MessageChannel>,
        config: EngineConfig,
        product: impl Into<String>,
    ) -> Self {
        let scheduler = FollowUpScheduler::new(Arc::clone(&db), &config);
        Self {
            db,
            channel,
            config,
            product: product.into(),
            scheduler,
        }
    }

    /// Handle one inbound turn. Returns whether new content was processed
    /// (false for duplicates, empty text and opted-out contacts).
    pub async fn handle_inbound(&self, contact_id: &str, raw_text: &str) -> Result<bool> {
        let contact = self
            .db
            .get_contact(contact_id)?
            .with_context(|| format!("unknown contact id '{}'", contact_id))?;

        // Terminal stage: no automated response, ever.
        if contact.current_stage == Stage::OptOut {
            return Ok(false);
        }

        let text = raw_text.trim();
        if text.is_empty() {
            return Ok(false);
        }
        if self.db.message_logged(&contact.id, &fingerprint(text))? {
            return Ok(false);
        }

        let classification = classifier::classify(text);
        let sentiment = classification.sentiment;
        self.db
            .log_message(&contact.id, text, MessageSender::User, sentiment)?;
        tracing::info!(
            contact = %contact.name,
            sentiment = sentiment.as_db_str(),
            tone = classification.tone.as_db_str(),
            "new inbound message"
        );

        // Explicit refusal short-circuits the turn: respectful farewell,
        // terminal transition, nothing else.
        if funnel::matches_opt_out(text) {
            let farewell = format!(
                "Entendido, {}. Respeito sua decisão. Caso queira conversar no futuro, \
                 é só me chamar! 😊",
                contact.name
            );
            self.send_and_log(&contact, &farewell).await?;
            self.db.opt_out(&contact.id)?;
            tracing::info!(contact = %contact.name, "contact opted out");
            return Ok(true);
        }

        // Stage and engagement are persisted before the rulebook reads the
        // stage.
        let stage = funnel::route_stage(sentiment, text);
        let engagement = funnel::engagement_for_sentiment(sentiment);
        self.db
            .apply_turn_update(&contact.id, engagement, stage, Utc::now())?;

        let ctx = RenderContext {
            contact_name: &contact.name,
            product: &self.product,
            pain_point: contact.pain_point.as_deref(),
            industry: contact.industry.as_deref(),
        };
        let selected = scripts::select_response(&self.db, stage, text, &ctx)?;

        if self.send_and_log(&contact, &selected.text).await? {
            if sentiment.is_warm() {
                if let Some(rule_id) = selected.rule_id {
                    self.db.record_script_success(rule_id)?;
                }
            }
            let delta = funnel::score_delta(sentiment);
            if delta != 0 {
                self.db.adjust_lead_score(&contact.id, delta)?;
            }
        }

        Ok(true)
    }

    /// First touch for a contact that has never been messaged: the opening
    /// prospecting script.
    pub async fn handle_initial_outreach(&self, contact: &Contact) -> Result<bool> {
        if contact.initial_message_sent || contact.current_stage == Stage::OptOut {
            return Ok(false);
        }

        let ctx = RenderContext {
            contact_name: &contact.name,
            product: &self.product,
            pain_point: contact.pain_point.as_deref(),
            industry: contact.industry.as_deref(),
        };
        let selected =
            scripts::select_response(&self.db, Stage::Prospecting, OUTREACH_STIMULUS, &ctx)?;

        let sent = self.send_and_log(contact, &selected.text).await?;
        if sent {
            self.db.mark_initial_sent(&contact.id, Utc::now())?;
            tracing::info!(contact = %contact.name, "initial outreach sent");
        }
        Ok(sent)
    }

    /// Follow-up nudge for an idle contact (invoked by the scheduler).
    pub(crate) async fn send_follow_up(&self, contact: &Contact) -> Result<bool> {
        let ctx = RenderContext {
            contact_name: &contact.name,
            product: &self.product,
            pain_point: contact.pain_point.as_deref(),
            industry: contact.industry.as_deref(),
        };
        let selected = scripts::select_response(
            &self.db,
            Stage::FollowUp,
            crate::followup::SILENCE_STIMULUS,
            &ctx,
        )?;
        self.send_and_log(contact, &selected.text).await
    }

    /// Request a send; on success log the outbound turn (classified the same
    /// way inbound turns are). A failed send leaves persisted state as-is.
    async fn send_and_log(&self, contact: &Contact, text: &str) -> Result<bool> {
        match self.channel.send(&contact.name, text).await {
            crate::channel::SendOutcome::Sent => {
                let classification = classifier::classify(text);
                self.db.log_message(
                    &contact.id,
                    text,
                    MessageSender::Bot,
                    classification.sentiment,
                )?;
                Ok(true)
            }
            crate::channel::SendOutcome::Failed { reason } => {
                tracing::error!(
                    contact = %contact.name,
                    %reason,
                    "send failed; turn left as not sent"
                );
                Ok(false)
            }
        }
    }

    /// One pass over the roster: outreach, inbound handling, follow-ups,
    /// then the cycle report.
    pub async fn run_cycle(&self, roster: &[RosterEntry]) -> Result<()> {
        for entry in roster {
            let contact = self.db.upsert_contact(
                &entry.name,
                entry.industry.as_deref(),
                entry.pain_point.as_deref(),
            )?;

            if contact.current_stage == Stage::OptOut {
                tracing::debug!(contact = %contact.name, "skipping opted-out contact");
                continue;
            }

            if !contact.initial_message_sent {
                self.handle_initial_outreach(&contact).await?;
            }

            let fragments = self
                .channel
                .receive_latest(&contact.name, self.config.receive_window())
                .await?;

            let mut processed = false;
            for fragment in fragments {
                tokio::time::sleep(self.humanized_delay()).await;
                if self.handle_inbound(&contact.id, &fragment).await? {
                    processed = true;
                }
            }
            if processed {
                tokio::time::sleep(Duration::from_secs(self.config.post_reply_pause_secs)).await;
            }

            self.scheduler.process_due(self, Utc::now()).await?;

            tokio::time::sleep(Duration::from_secs(self.config.contact_pause_secs)).await;
        }

        let report = analytics::render_report(&self.db)?;
        println!("{report}");
        Ok(())
    }

    /// Run cycles until the process is terminated. A failed cycle is logged
    /// and the loop resumes after a pause; the process is the cancellation
    /// unit.
    pub async fn run_forever(&self, roster: Vec<RosterEntry>) -> Result<()> {
        tracing::info!(
            contacts = roster.len(),
            product = %self.product,
            "conversation loop starting"
        );
        loop {
            if let Err(e) = self.run_cycle(&roster).await {
                tracing::error!("cycle failed: {e:#}; resuming after pause");
                tokio::time::sleep(Duration::from_secs(self.config.error_pause_secs)).await;
                continue;
            }
            tokio::time::sleep(Duration::from_secs(self.config.cycle_pause_secs)).await;
        }
    }

    fn humanized_delay(&self) -> Duration {
        let (lo, hi) = self.config.reply_delay_range();
        let ms = rand::thread_rng().gen_range(lo..=hi);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::ScriptedChannel;
    use crate::funnel::Engagement;
    use tempfile::tempdir;

    fn test_config() -> EngineConfig {
        EngineConfig {
            reply_delay_min_ms: 0,
            reply_delay_max_ms: 0,
            contact_pause_secs: 0,
            post_reply_pause_secs: 0,
            cycle_pause_secs: 0,
            error_pause_secs: 0,
            ..EngineConfig::default()
        }
    }

    fn build_engine(
        channel: Arc<ScriptedChannel>,
    ) -> (tempfile::TempDir, ConversationEngine, Arc<SalesDatabase>) {
        let dir = tempdir().expect("tempdir");
        let db = Arc::new(SalesDatabase::new(dir.path().join("leadloop.db")).expect("open db"));
        let engine = ConversationEngine::new(
            Arc::clone(&db),
            channel,
            test_config(),
            "Growth Kit",
        );
        (dir, engine, db)
    }

    fn ana(db: &SalesDatabase) -> Contact {
        db.upsert_contact("Ana", Some("Retail"), Some("low foot traffic"))
            .unwrap()
    }

    #[tokio::test]
    async fn test_initial_outreach_scenario() {
        let channel = Arc::new(ScriptedChannel::new());
        let (_dir, engine, db) = build_engine(Arc::clone(&channel));
        let contact = ana(&db);

        let sent = engine.handle_initial_outreach(&contact).await.unwrap();
        assert!(sent);

        let texts = channel.sent_texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("Ana"));
        assert!(texts[0].contains("Retail"));
        assert!(texts[0].contains("low foot traffic"));
        assert!(texts[0].contains("Growth Kit"));

        let contact = db.get_contact(&contact.id).unwrap().unwrap();
        assert!(contact.initial_message_sent);
        assert_eq!(contact.current_stage, Stage::Prospecting);
        assert_eq!(contact.lead_score, 50);
    }

    #[tokio::test]
    async fn test_outreach_skipped_once_sent() {
        let channel = Arc::new(ScriptedChannel::new());
        let (_dir, engine, db) = build_engine(Arc::clone(&channel));
        let contact = ana(&db);

        assert!(engine.handle_initial_outreach(&contact).await.unwrap());
        let contact = db.get_contact(&contact.id).unwrap().unwrap();
        assert!(!engine.handle_initial_outreach(&contact).await.unwrap());
        assert_eq!(channel.sent_texts().len(), 1);
    }

    #[tokio::test]
    async fn test_purchase_intent_routes_to_closing_and_scores() {
        let channel = Arc::new(ScriptedChannel::new());
        let (_dir, engine, db) = build_engine(Arc::clone(&channel));
        let contact = ana(&db);

        let processed = engine.handle_inbound(&contact.id, "quero comprar").await.unwrap();
        assert!(processed);

        let contact = db.get_contact(&contact.id).unwrap().unwrap();
        assert_eq!(contact.lead_score, 65);
        assert_eq!(contact.current_stage, Stage::Closing);
        assert_eq!(contact.engagement_level, Engagement::Positive);

        let texts = channel.sent_texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("20% de desconto"));

        // Warm sentiment on a fired rule counts as a success.
        let used = db.scripts_with_uses().unwrap();
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].use_count, 1);
        assert_eq!(used[0].success_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_inbound_is_idempotent() {
        let channel = Arc::new(ScriptedChannel::new());
        let (_dir, engine, db) = build_engine(Arc::clone(&channel));
        let contact = ana(&db);

        assert!(engine.handle_inbound(&contact.id, "quero comprar").await.unwrap());
        assert!(!engine.handle_inbound(&contact.id, "quero comprar").await.unwrap());

        // One inbound + one outbound, score mutated exactly once.
        let messages = db.messages_for_contact(&contact.id).unwrap();
        assert_eq!(messages.len(), 2);
        let contact = db.get_contact(&contact.id).unwrap().unwrap();
        assert_eq!(contact.lead_score, 65);
        assert_eq!(channel.sent_texts().len(), 1);
    }

    #[tokio::test]
    async fn test_warm_turns_accumulate_fifteen_each() {
        let channel = Arc::new(ScriptedChannel::new());
        let (_dir, engine, db) = build_engine(Arc::clone(&channel));
        let contact = ana(&db);

        engine.handle_inbound(&contact.id, "quero comprar").await.unwrap();
        engine
            .handle_inbound(&contact.id, "me explique os detalhes")
            .await
            .unwrap();

        let contact = db.get_contact(&contact.id).unwrap().unwrap();
        assert_eq!(contact.lead_score, 80);
        // Curious without purchase intent lands on nurturing.
        assert_eq!(contact.current_stage, Stage::Nurturing);
    }

    #[tokio::test]
    async fn test_negative_turns_drive_score_down() {
        let channel = Arc::new(ScriptedChannel::new());
        let (_dir, engine, db) = build_engine(Arc::clone(&channel));
        let contact = ana(&db);

        // Distinct cost objections; "caro" is a negative keyword but not an
        // opt-out keyword.
        engine.handle_inbound(&contact.id, "achei caro").await.unwrap();
        engine.handle_inbound(&contact.id, "muito caro isso").await.unwrap();

        let contact = db.get_contact(&contact.id).unwrap().unwrap();
        assert_eq!(contact.lead_score, 30);
        assert_eq!(contact.current_stage, Stage::Objection);
        assert_eq!(contact.engagement_level, Engagement::Negative);
    }

    #[tokio::test]
    async fn test_opt_out_is_terminal() {
        let channel = Arc::new(ScriptedChannel::new());
        let (_dir, engine, db) = build_engine(Arc::clone(&channel));
        let contact = ana(&db);

        assert!(engine.handle_inbound(&contact.id, "pare").await.unwrap());

        let after = db.get_contact(&contact.id).unwrap().unwrap();
        assert_eq!(after.current_stage, Stage::OptOut);
        assert_eq!(after.lead_score, 0);
        assert_eq!(after.engagement_level, Engagement::Negative);

        // Respectful farewell was the only send.
        let texts = channel.sent_texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("Respeito sua decisão"));

        // No automated send ever again, not even for purchase intent.
        assert!(!engine.handle_inbound(&contact.id, "quero comprar").await.unwrap());
        assert!(!engine.handle_initial_outreach(&after).await.unwrap());
        assert_eq!(channel.sent_texts().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_leaves_state_unscored() {
        let channel = Arc::new(ScriptedChannel::failing());
        let (_dir, engine, db) = build_engine(Arc::clone(&channel));
        let contact = ana(&db);

        assert!(engine.handle_inbound(&contact.id, "quero comprar").await.unwrap());

        let contact = db.get_contact(&contact.id).unwrap().unwrap();
        // Stage update happened, but no score delta and no success mark.
        assert_eq!(contact.current_stage, Stage::Closing);
        assert_eq!(contact.lead_score, 50);
        let messages = db.messages_for_contact(&contact.id).unwrap();
        assert_eq!(messages.len(), 1); // inbound only
        let used = db.scripts_with_uses().unwrap();
        assert_eq!(used[0].success_count, 0);
    }

    #[tokio::test]
    async fn test_run_cycle_processes_roster() {
        let channel = Arc::new(ScriptedChannel::new());
        channel
            .inbound
            .lock()
            .unwrap()
            .push_back(vec!["quero saber mais".to_string()]);
        let (_dir, engine, db) = build_engine(Arc::clone(&channel));

        let roster = vec![RosterEntry::parse("Ana;Retail;low foot traffic").unwrap()];
        engine.run_cycle(&roster).await.unwrap();

        let contact = db.get_contact_by_name("Ana").unwrap().unwrap();
        assert!(contact.initial_message_sent);
        // "quero" carries purchase intent, so the turn routed to closing.
        assert_eq!(contact.current_stage, Stage::Closing);
        // Outreach + one reply.
        assert_eq!(channel.sent_texts().len(), 2);
    }

    #[test]
    fn test_roster_entry_parsing() {
        let full = RosterEntry::parse("João Silva;Varejo;Falta de clientes").unwrap();
        assert_eq!(full.name, "João Silva");
        assert_eq!(full.industry.as_deref(), Some("Varejo"));
        assert_eq!(full.pain_point.as_deref(), Some("Falta de clientes"));

        let bare = RosterEntry::parse("Ana").unwrap();
        assert_eq!(bare.name, "Ana");
        assert!(bare.industry.is_none());

        assert!(RosterEntry::parse("  ;Varejo").is_none());
    }
}
