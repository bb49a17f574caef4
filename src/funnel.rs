//! Funnel stages and the sentiment-driven transition rules.
//!
//! The engine never auto-advances to closing or follow-up from sentiment
//! alone: closing is reached through explicit purchase-intent keywords and
//! follow-up only through the scheduler. Opt-out is terminal.

use serde::{Deserialize, Serialize};

use crate::classifier::{matches_word_pattern, Sentiment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Prospecting,
    Nurturing,
    Objection,
    Closing,
    FollowUp,
    OptOut,
}

impl Stage {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Stage::Prospecting => "prospecting",
            Stage::Nurturing => "nurturing",
            Stage::Objection => "objection",
            Stage::Closing => "closing",
            Stage::FollowUp => "follow_up",
            Stage::OptOut => "opt_out",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "nurturing" => Stage::Nurturing,
            "objection" => Stage::Objection,
            "closing" => Stage::Closing,
            "follow_up" | "follow-up" => Stage::FollowUp,
            "opt_out" | "opt-out" => Stage::OptOut,
            _ => Stage::Prospecting,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engagement {
    Positive,
    Negative,
    Neutral,
}

impl Engagement {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Engagement::Positive => "positive",
            Engagement::Negative => "negative",
            Engagement::Neutral => "neutral",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "positive" => Engagement::Positive,
            "negative" => Engagement::Negative,
            _ => Engagement::Neutral,
        }
    }
}

/// Refusal keywords that force the terminal opt-out transition.
const OPT_OUT_WORDS: &str = "não|pare|stop|desinteressado";

/// Purchase-intent keywords that route a turn to the closing rulebook.
const PURCHASE_INTENT_WORDS: &str = "quero|comprar";

pub fn stage_for_sentiment(sentiment: Sentiment) -> Stage {
    match sentiment {
        Sentiment::Positive | Sentiment::Curious => Stage::Nurturing,
        Sentiment::Negative => Stage::Objection,
        _ => Stage::Prospecting,
    }
}

pub fn engagement_for_sentiment(sentiment: Sentiment) -> Engagement {
    match sentiment {
        Sentiment::Positive | Sentiment::Curious => Engagement::Positive,
        Sentiment::Negative => Engagement::Negative,
        _ => Engagement::Neutral,
    }
}

/// Lead-score delta for one turn. Unclamped on purpose: the score has no
/// documented floor or ceiling.
pub fn score_delta(sentiment: Sentiment) -> i64 {
    match sentiment {
        Sentiment::Positive | Sentiment::Curious => 15,
        Sentiment::Negative => -10,
        _ => 0,
    }
}

pub fn matches_opt_out(text: &str) -> bool {
    matches_word_pattern(OPT_OUT_WORDS, text)
}

pub fn matches_purchase_intent(text: &str) -> bool {
    matches_word_pattern(PURCHASE_INTENT_WORDS, text)
}

/// Stage a turn routes to: the sentiment-derived stage, overridden to
/// `Closing` when the text carries explicit purchase intent. This is also
/// the stage persisted for the turn.
pub fn route_stage(sentiment: Sentiment, text: &str) -> Stage {
    if matches_purchase_intent(text) {
        return Stage::Closing;
    }
    stage_for_sentiment(sentiment)
}
