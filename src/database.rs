//! Durable store for contacts, messages and the script rulebook.
//!
//! The store is the only place allowed to mutate persisted entities; every
//! component receives an explicit handle instead of sharing an ambient
//! connection. Timestamps are RFC 3339 strings, compared lexicographically
//! (all values are UTC).

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use crate::classifier::{Sentiment, Tone};
use crate::funnel::{Engagement, Stage};

/// Stable fingerprint of message text, used to deduplicate repeated content
/// per contact.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSender {
    User,
    Bot,
}

impl MessageSender {
    pub fn as_db_str(self) -> &'static str {
        match self {
            MessageSender::User => "user",
            MessageSender::Bot => "bot",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bot" => MessageSender::Bot,
            _ => MessageSender::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub last_interaction: DateTime<Utc>,
    pub lead_score: i64,
    pub initial_message_sent: bool,
    pub industry: Option<String>,
    pub pain_point: Option<String>,
    pub last_follow_up: Option<DateTime<Utc>>,
    pub engagement_level: Engagement,
    pub current_stage: Stage,
}

/// Immutable record of one conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub contact_id: String,
    pub body: String,
    pub sender: MessageSender,
    pub timestamp: DateTime<Utc>,
    pub sentiment: Sentiment,
    pub message_hash: String,
    pub context_summary: String,
}

/// One row in the rulebook. `id` is an autoincrement integer because
/// insertion order is the precedence tie-break.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRule {
    pub id: i64,
    pub stage: Stage,
    pub keyword: String,
    pub response: String,
    pub tone: Tone,
    pub success_count: i64,
    pub use_count: i64,
}

/// Seed rulebook, installed when the table is empty (or on an explicit
/// reseed). Templates are rendered with {contact_name}, {product},
/// {benefit}, {pain_point} and {industry}.
const SEED_SCRIPTS: [(Stage, &str, &str, Tone); 8] = [
    (
        Stage::Prospecting,
        "oi|olá|ola",
        "Olá, {contact_name}! Tudo bem? Percebi que você atua no setor de {industry} e enfrenta {pain_point}. Nosso {product} pode ajudar a resolver isso de forma prática e eficiente. Posso te contar como? 😊",
        Tone::Professional,
    ),
    (
        Stage::Prospecting,
        "oi|olá|ola",
        "Oi, {contact_name}! Como tá indo? Soube que você trabalha com {industry} e talvez lide com {pain_point}. Nosso {product} tem soluções legais pra isso! Quer saber mais? 🚀",
        Tone::Casual,
    ),
    (
        Stage::Nurturing,
        "saber|explicar|interessado|claro|ok|clr|como|adoraria|mostrar|me explique",
        "Que ótimo, {contact_name}! Nosso {product} ensina estratégias comprovadas para atrair mais clientes no setor de {industry}. Por exemplo, ele mostra como criar campanhas que resolvem {pain_point}. Quer um trecho grátis? 📖",
        Tone::Professional,
    ),
    (
        Stage::Nurturing,
        "saber|explicar|interessado|claro|ok|clr|como|adoraria|mostrar|me explique",
        "Demais, {contact_name}! O {product} tem dicas práticas pra resolver {pain_point} no {industry}. Te mando um pedacinho grátis pra você ver como é? 😄",
        Tone::Casual,
    ),
    (
        Stage::Objection,
        "caro",
        "Entendo, {contact_name}. O custo pode parecer alto, mas o {product} entrega {benefit}, com retorno rápido. Temos clientes no {industry} com resultados incríveis! Quer um caso de sucesso? 📈",
        Tone::Professional,
    ),
    (
        Stage::Objection,
        "tempo",
        "Sei que tempo é corrido, {contact_name}! O {product} é simples e resolve {pain_point} rapidinho. Posso te mostrar como em 5 minutos? ⏱️",
        Tone::Professional,
    ),
    (
        Stage::Closing,
        "quero|comprar",
        "Show, {contact_name}! 🚀 Vamos garantir seu {product} agora? Temos uma oferta especial hoje: 20% de desconto! Qual o melhor jeito de te enviar o link? 💼",
        Tone::Professional,
    ),
    (
        Stage::FollowUp,
        "silêncio",
        "Oi, {contact_name}! Tudo certo? Lembrei de você porque nosso {product} é ideal para {pain_point}. Outros no {industry} estão vendo resultados. Quer conversar? 🌟",
        Tone::Professional,
    ),
];

const CONTACT_COLUMNS: &str = "id, name, phone, last_interaction, lead_score, \
     initial_message_sent, industry, pain_point, last_follow_up, \
     engagement_level, current_stage";

const SCRIPT_COLUMNS: &str = "id, stage, keyword, response, tone, success_count, use_count";

/// Rolling context keeps the last N turns, truncated to a fixed cap.
const CONTEXT_TURNS: usize = 10;
const CONTEXT_MAX_CHARS: usize = 200;
const CONTEXT_SNIPPET_CHARS: usize = 50;

pub struct SalesDatabase {
    conn: Mutex<Connection>,
}

impl SalesDatabase {
    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Create or open the database. Seeds the rulebook when it is empty.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_schema()?;
        db.seed_scripts_if_empty()?;
        Ok(db)
    }

    fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(columns.iter().any(|name| name == column))
    }

    /// Create the database schema
    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                phone TEXT,
                last_interaction TEXT NOT NULL,
                lead_score INTEGER NOT NULL DEFAULT 50,
                initial_message_sent INTEGER NOT NULL DEFAULT 0,
                industry TEXT,
                pain_point TEXT,
                last_follow_up TEXT,
                engagement_level TEXT NOT NULL DEFAULT 'neutral',
                current_stage TEXT NOT NULL DEFAULT 'prospecting'
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                contact_id TEXT NOT NULL,
                message TEXT NOT NULL,
                sender TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                sentiment TEXT,
                message_hash TEXT NOT NULL,
                context_summary TEXT,
                FOREIGN KEY (contact_id) REFERENCES contacts(id)
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS sales_scripts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stage TEXT NOT NULL,
                keyword TEXT NOT NULL,
                response TEXT NOT NULL,
                success_count INTEGER NOT NULL DEFAULT 0,
                use_count INTEGER NOT NULL DEFAULT 0,
                tone TEXT NOT NULL DEFAULT 'professional'
            )"#,
            [],
        )?;

        // Columns added after the first release; backfill older stores.
        for (table, column, column_def) in [
            ("contacts", "engagement_level", "TEXT NOT NULL DEFAULT 'neutral'"),
            ("contacts", "current_stage", "TEXT NOT NULL DEFAULT 'prospecting'"),
            ("messages", "context_summary", "TEXT"),
            ("sales_scripts", "tone", "TEXT NOT NULL DEFAULT 'professional'"),
        ] {
            if !Self::table_has_column(&conn, table, column)? {
                conn.execute(
                    &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_def),
                    [],
                )?;
            }
        }

        // Duplicate inbound text for the same contact is never re-logged.
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_contact_hash
             ON messages(contact_id, message_hash)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_contact_timestamp
             ON messages(contact_id, timestamp DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_contacts_lead_score
             ON contacts(lead_score DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sales_scripts_stage ON sales_scripts(stage)",
            [],
        )?;

        Ok(())
    }

    // ========================================================================
    // Contacts
    // ========================================================================

    /// Find or create a contact by name. An existing contact gets its
    /// `last_interaction` refreshed; industry/pain point are only overwritten
    /// when a new value is provided.
    pub fn upsert_contact(
        &self,
        name: &str,
        industry: Option<&str>,
        pain_point: Option<&str>,
    ) -> Result<Contact> {
        let now = Utc::now().to_rfc3339();
        {
            let conn = self.lock_conn()?;
            let existing: Option<String> = match conn.query_row(
                "SELECT id FROM contacts WHERE name = ?1",
                [name],
                |row| row.get(0),
            ) {
                Ok(id) => Some(id),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            };

            match existing {
                Some(id) => {
                    conn.execute(
                        "UPDATE contacts
                         SET last_interaction = ?1,
                             industry = COALESCE(?2, industry),
                             pain_point = COALESCE(?3, pain_point)
                         WHERE id = ?4",
                        params![now, industry, pain_point, id],
                    )?;
                }
                None => {
                    conn.execute(
                        "INSERT INTO contacts
                         (id, name, last_interaction, lead_score, initial_message_sent,
                          industry, pain_point, engagement_level, current_stage)
                         VALUES (?1, ?2, ?3, 50, 0, ?4, ?5, ?6, ?7)",
                        params![
                            Uuid::new_v4().to_string(),
                            name,
                            now,
                            industry,
                            pain_point,
                            Engagement::Neutral.as_db_str(),
                            Stage::Prospecting.as_db_str(),
                        ],
                    )?;
                }
            }
        }

        self.get_contact_by_name(name)?
            .ok_or_else(|| anyhow::anyhow!("contact '{}' vanished after upsert", name))
    }

    pub fn get_contact_by_name(&self, name: &str) -> Result<Option<Contact>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            &format!("SELECT {} FROM contacts WHERE name = ?1", CONTACT_COLUMNS),
            [name],
            row_to_contact,
        );
        match result {
            Ok(contact) => Ok(Some(contact)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_contact(&self, id: &str) -> Result<Option<Contact>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            &format!("SELECT {} FROM contacts WHERE id = ?1", CONTACT_COLUMNS),
            [id],
            row_to_contact,
        );
        match result {
            Ok(contact) => Ok(Some(contact)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the outcome of one inbound turn onto the contact.
    pub fn apply_turn_update(
        &self,
        contact_id: &str,
        engagement: Engagement,
        stage: Stage,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE contacts
             SET engagement_level = ?1, current_stage = ?2,
                 last_interaction = ?3, initial_message_sent = 1
             WHERE id = ?4",
            params![
                engagement.as_db_str(),
                stage.as_db_str(),
                now.to_rfc3339(),
                contact_id
            ],
        )?;
        Ok(())
    }

    pub fn mark_initial_sent(&self, contact_id: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE contacts SET initial_message_sent = 1, last_interaction = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), contact_id],
        )?;
        Ok(())
    }

    pub fn adjust_lead_score(&self, contact_id: &str, delta: i64) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE contacts SET lead_score = lead_score + ?1 WHERE id = ?2",
            params![delta, contact_id],
        )?;
        Ok(())
    }

    /// Terminal transition: score reset, engagement negative, stage opt-out.
    pub fn opt_out(&self, contact_id: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE contacts
             SET lead_score = 0, engagement_level = ?1, current_stage = ?2
             WHERE id = ?3",
            params![
                Engagement::Negative.as_db_str(),
                Stage::OptOut.as_db_str(),
                contact_id
            ],
        )?;
        Ok(())
    }

    pub fn stamp_follow_up(&self, contact_id: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE contacts SET last_follow_up = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), contact_id],
        )?;
        Ok(())
    }

    /// Contacts idle past both cutoffs. Opted-out contacts are never due.
    pub fn contacts_due_follow_up(
        &self,
        follow_up_cutoff: DateTime<Utc>,
        interaction_cutoff: DateTime<Utc>,
    ) -> Result<Vec<Contact>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM contacts
             WHERE current_stage != ?1
               AND (last_follow_up IS NULL OR last_follow_up < ?2)
               AND last_interaction < ?3
             ORDER BY last_interaction ASC",
            CONTACT_COLUMNS
        ))?;

        let contacts = stmt
            .query_map(
                params![
                    Stage::OptOut.as_db_str(),
                    follow_up_cutoff.to_rfc3339(),
                    interaction_cutoff.to_rfc3339()
                ],
                row_to_contact,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(contacts)
    }

    /// All contacts ordered by descending lead score.
    pub fn contacts_by_score(&self) -> Result<Vec<Contact>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM contacts ORDER BY lead_score DESC",
            CONTACT_COLUMNS
        ))?;
        let contacts = stmt
            .query_map([], row_to_contact)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(contacts)
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Whether (contact, fingerprint) is already logged.
    pub fn message_logged(&self, contact_id: &str, message_hash: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let result: rusqlite::Result<i64> = conn.query_row(
            "SELECT 1 FROM messages WHERE contact_id = ?1 AND message_hash = ?2",
            params![contact_id, message_hash],
            |row| row.get(0),
        );
        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Log one turn. Returns false when the (contact, fingerprint) pair was
    /// already present; the uniqueness constraint keeps this idempotent even
    /// if a caller races its own existence check.
    pub fn log_message(
        &self,
        contact_id: &str,
        body: &str,
        sender: MessageSender,
        sentiment: Sentiment,
    ) -> Result<bool> {
        let conn = self.lock_conn()?;
        let summary = context_summary_with(&conn, contact_id)?;
        conn.execute(
            "INSERT OR IGNORE INTO messages
             (id, contact_id, message, sender, timestamp, sentiment, message_hash, context_summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Uuid::new_v4().to_string(),
                contact_id,
                body,
                sender.as_db_str(),
                Utc::now().to_rfc3339(),
                sentiment.as_db_str(),
                fingerprint(body),
                summary,
            ],
        )?;
        Ok(conn.changes() > 0)
    }

    pub fn messages_for_contact(&self, contact_id: &str) -> Result<Vec<Message>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, contact_id, message, sender, timestamp, sentiment, message_hash, context_summary
             FROM messages
             WHERE contact_id = ?1
             ORDER BY timestamp ASC",
        )?;

        let messages = stmt
            .query_map([contact_id], |row| {
                Ok(Message {
                    id: row.get(0)?,
                    contact_id: row.get(1)?,
                    body: row.get(2)?,
                    sender: MessageSender::from_db(&row.get::<_, String>(3)?),
                    timestamp: parse_timestamp(row.get::<_, String>(4)?, 4)?,
                    sentiment: Sentiment::from_db(
                        row.get::<_, Option<String>>(5)?.as_deref().unwrap_or(""),
                    ),
                    message_hash: row.get(6)?,
                    context_summary: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    // ========================================================================
    // Script rulebook
    // ========================================================================

    fn seed_scripts_if_empty(&self) -> Result<()> {
        let count: i64 = {
            let conn = self.lock_conn()?;
            conn.query_row("SELECT COUNT(*) FROM sales_scripts", [], |row| row.get(0))?
        };
        if count == 0 {
            self.reseed_scripts()?;
        }
        Ok(())
    }

    /// Full rulebook reseed: drops every rule (trained ones included) and
    /// reinstalls the seed set.
    pub fn reseed_scripts(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM sales_scripts", [])?;
        for (stage, keyword, response, tone) in SEED_SCRIPTS {
            conn.execute(
                "INSERT INTO sales_scripts (stage, keyword, response, tone) VALUES (?1, ?2, ?3, ?4)",
                params![stage.as_db_str(), keyword, response, tone.as_db_str()],
            )?;
        }
        tracing::info!("rulebook reseeded with {} scripts", SEED_SCRIPTS.len());
        Ok(())
    }

    /// Append a rule. Templates are not validated here; a bad placeholder
    /// surfaces at render time.
    pub fn add_script(
        &self,
        stage: Stage,
        keyword: &str,
        response: &str,
        tone: Tone,
    ) -> Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO sales_scripts (stage, keyword, response, tone) VALUES (?1, ?2, ?3, ?4)",
            params![stage.as_db_str(), keyword, response, tone.as_db_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Rules for one stage in insertion order (the precedence order).
    pub fn scripts_for_stage(&self, stage: Stage) -> Result<Vec<ScriptRule>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sales_scripts WHERE stage = ?1 ORDER BY id ASC",
            SCRIPT_COLUMNS
        ))?;
        let rules = stmt
            .query_map([stage.as_db_str()], row_to_script)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    pub fn record_script_use(&self, script_id: i64) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE sales_scripts SET use_count = use_count + 1 WHERE id = ?1",
            [script_id],
        )?;
        Ok(())
    }

    pub fn record_script_success(&self, script_id: i64) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE sales_scripts SET success_count = success_count + 1 WHERE id = ?1",
            [script_id],
        )?;
        Ok(())
    }

    /// Test support: run a closure against the raw connection (fixtures
    /// backdate timestamps this way).
    #[cfg(test)]
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let conn = self.lock_conn()?;
        f(&conn)
    }

    /// Rules that have fired at least once, in insertion order.
    pub fn scripts_with_uses(&self) -> Result<Vec<ScriptRule>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sales_scripts WHERE use_count > 0 ORDER BY id ASC",
            SCRIPT_COLUMNS
        ))?;
        let rules = stmt
            .query_map([], row_to_script)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }
}

/// Rolling summary of the most recent turns: each turn contributes a 50-char
/// snippet and the whole summary caps at 200 chars.
fn context_summary_with(conn: &Connection, contact_id: &str) -> Result<String> {
    let mut stmt = conn.prepare(
        "SELECT message, sender FROM messages
         WHERE contact_id = ?1
         ORDER BY timestamp DESC
         LIMIT ?2",
    )?;
    let turns = stmt
        .query_map(params![contact_id, CONTEXT_TURNS as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut summary = String::from("Conversa recente: ");
    for (body, sender) in turns {
        summary.push_str(&format!(
            "{}: {}... ",
            sender,
            truncate_chars(&body, CONTEXT_SNIPPET_CHARS)
        ));
    }
    Ok(truncate_chars(&summary, CONTEXT_MAX_CHARS))
}

/// Char-boundary-safe prefix (byte slicing would split UTF-8 sequences).
fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn parse_timestamp(raw: String, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        last_interaction: parse_timestamp(row.get::<_, String>(3)?, 3)?,
        lead_score: row.get(4)?,
        initial_message_sent: row.get::<_, i64>(5)? != 0,
        industry: row.get(6)?,
        pain_point: row.get(7)?,
        last_follow_up: row
            .get::<_, Option<String>>(8)?
            .map(|raw| parse_timestamp(raw, 8))
            .transpose()?,
        engagement_level: Engagement::from_db(&row.get::<_, String>(9)?),
        current_stage: Stage::from_db(&row.get::<_, String>(10)?),
    })
}

fn row_to_script(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScriptRule> {
    Ok(ScriptRule {
        id: row.get(0)?,
        stage: Stage::from_db(&row.get::<_, String>(1)?),
        keyword: row.get(2)?,
        response: row.get(3)?,
        tone: Tone::from_db(&row.get::<_, String>(4)?),
        success_count: row.get(5)?,
        use_count: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn open_db() -> (tempfile::TempDir, SalesDatabase) {
        let dir = tempdir().expect("tempdir");
        let db = SalesDatabase::new(dir.path().join("leadloop.db")).expect("open db");
        (dir, db)
    }

    #[test]
    fn test_new_contact_defaults() {
        let (_dir, db) = open_db();
        let contact = db
            .upsert_contact("Ana", Some("Retail"), Some("low foot traffic"))
            .unwrap();
        assert_eq!(contact.lead_score, 50);
        assert_eq!(contact.current_stage, Stage::Prospecting);
        assert_eq!(contact.engagement_level, Engagement::Neutral);
        assert!(!contact.initial_message_sent);
        assert!(contact.last_follow_up.is_none());
    }

    #[test]
    fn test_upsert_is_unique_per_name() {
        let (_dir, db) = open_db();
        let first = db.upsert_contact("Ana", Some("Retail"), None).unwrap();
        let second = db.upsert_contact("Ana", None, Some("churn")).unwrap();
        assert_eq!(first.id, second.id);
        // None must not erase a previously known attribute.
        assert_eq!(second.industry.as_deref(), Some("Retail"));
        assert_eq!(second.pain_point.as_deref(), Some("churn"));
    }

    #[test]
    fn test_duplicate_message_not_relogged() {
        let (_dir, db) = open_db();
        let contact = db.upsert_contact("Ana", None, None).unwrap();
        let first = db
            .log_message(&contact.id, "oi", MessageSender::User, Sentiment::Neutral)
            .unwrap();
        let second = db
            .log_message(&contact.id, "oi", MessageSender::User, Sentiment::Neutral)
            .unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(db.messages_for_contact(&contact.id).unwrap().len(), 1);
    }

    #[test]
    fn test_same_text_allowed_across_contacts() {
        let (_dir, db) = open_db();
        let ana = db.upsert_contact("Ana", None, None).unwrap();
        let bia = db.upsert_contact("Bia", None, None).unwrap();
        assert!(db
            .log_message(&ana.id, "oi", MessageSender::User, Sentiment::Neutral)
            .unwrap());
        assert!(db
            .log_message(&bia.id, "oi", MessageSender::User, Sentiment::Neutral)
            .unwrap());
    }

    #[test]
    fn test_context_summary_capped() {
        let (_dir, db) = open_db();
        let contact = db.upsert_contact("Ana", None, None).unwrap();
        for i in 0..12 {
            db.log_message(
                &contact.id,
                &format!("mensagem número {} com algum texto a mais para ocupar espaço", i),
                MessageSender::User,
                Sentiment::Neutral,
            )
            .unwrap();
        }
        let messages = db.messages_for_contact(&contact.id).unwrap();
        let last = messages.last().unwrap();
        assert!(last.context_summary.starts_with("Conversa recente: "));
        assert!(last.context_summary.chars().count() <= 200);
    }

    #[test]
    fn test_seed_scripts_installed_once() {
        let (_dir, db) = open_db();
        let prospecting = db.scripts_for_stage(Stage::Prospecting).unwrap();
        assert_eq!(prospecting.len(), 2);
        let closing = db.scripts_for_stage(Stage::Closing).unwrap();
        assert_eq!(closing.len(), 1);
        assert_eq!(closing[0].keyword, "quero|comprar");
    }

    #[test]
    fn test_reseed_drops_trained_rules() {
        let (_dir, db) = open_db();
        db.add_script(Stage::Closing, "pix", "Manda o {product}!", Tone::Casual)
            .unwrap();
        assert_eq!(db.scripts_for_stage(Stage::Closing).unwrap().len(), 2);
        db.reseed_scripts().unwrap();
        assert_eq!(db.scripts_for_stage(Stage::Closing).unwrap().len(), 1);
    }

    #[test]
    fn test_use_and_success_counters() {
        let (_dir, db) = open_db();
        let rule_id = db.scripts_for_stage(Stage::Closing).unwrap()[0].id;
        db.record_script_use(rule_id).unwrap();
        db.record_script_use(rule_id).unwrap();
        db.record_script_success(rule_id).unwrap();
        let with_uses = db.scripts_with_uses().unwrap();
        assert_eq!(with_uses.len(), 1);
        assert_eq!(with_uses[0].use_count, 2);
        assert_eq!(with_uses[0].success_count, 1);
    }

    #[test]
    fn test_due_follow_ups_filters() {
        let (_dir, db) = open_db();
        let idle = db.upsert_contact("Idle", None, None).unwrap();
        let _fresh = db.upsert_contact("Fresh", None, None).unwrap();
        let gone = db.upsert_contact("Gone", None, None).unwrap();
        db.opt_out(&gone.id).unwrap();

        let now = Utc::now();
        // Backdate the idle and opted-out contacts 3 days.
        let past = (now - Duration::days(3)).to_rfc3339();
        {
            let conn = db.lock_conn().unwrap();
            conn.execute(
                "UPDATE contacts SET last_interaction = ?1 WHERE id IN (?2, ?3)",
                params![past, idle.id, gone.id],
            )
            .unwrap();
        }

        let due = db
            .contacts_due_follow_up(now - Duration::days(2), now - Duration::hours(48))
            .unwrap();
        let names: Vec<_> = due.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Idle"]);
    }

    #[test]
    fn test_follow_up_stamp_excludes_contact() {
        let (_dir, db) = open_db();
        let idle = db.upsert_contact("Idle", None, None).unwrap();
        let now = Utc::now();
        {
            let conn = db.lock_conn().unwrap();
            conn.execute(
                "UPDATE contacts SET last_interaction = ?1 WHERE id = ?2",
                params![(now - Duration::days(3)).to_rfc3339(), idle.id],
            )
            .unwrap();
        }
        db.stamp_follow_up(&idle.id, now).unwrap();
        let due = db
            .contacts_due_follow_up(now - Duration::days(2), now - Duration::hours(48))
            .unwrap();
        assert!(due.is_empty());
    }

    #[test]
    fn test_lead_score_unclamped_below_zero() {
        let (_dir, db) = open_db();
        let contact = db.upsert_contact("Ana", None, None).unwrap();
        for _ in 0..6 {
            db.adjust_lead_score(&contact.id, -10).unwrap();
        }
        let contact = db.get_contact(&contact.id).unwrap().unwrap();
        assert_eq!(contact.lead_score, -10);
    }
}
