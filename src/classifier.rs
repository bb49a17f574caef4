//! Tone and sentiment classification for inbound and outbound text.
//!
//! Rule-based and deterministic: lexical keyword checks take precedence, a
//! small valence lexicon stands in for a general polarity model. Neither
//! classifier ever fails toward the caller: sentiment degrades to `Neutral`
//! and tone to `Professional` on anything unexpected.

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Register of a message, independent of sentiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Casual,
    Professional,
    Formal,
}

impl Tone {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Tone::Casual => "casual",
            Tone::Professional => "professional",
            Tone::Formal => "formal",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "casual" => Tone::Casual,
            "formal" => Tone::Formal,
            _ => Tone::Professional,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    Curious,
    Hesitant,
    Neutral,
}

impl Sentiment {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Curious => "curious",
            Sentiment::Hesitant => "hesitant",
            Sentiment::Neutral => "neutral",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            "curious" => Sentiment::Curious,
            "hesitant" => Sentiment::Hesitant,
            _ => Sentiment::Neutral,
        }
    }

    pub fn is_warm(self) -> bool {
        matches!(self, Sentiment::Positive | Sentiment::Curious)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub sentiment: Sentiment,
    pub tone: Tone,
}

/// Classify a message in one pass. Never fails.
pub fn classify(text: &str) -> Classification {
    Classification {
        sentiment: analyze_sentiment(text),
        tone: detect_tone(text),
    }
}

const INFORMAL_MARKERS: [&str; 5] = ["😊", "😄", "🚀", "haha", "lol"];
const FORMAL_WORDS: &str = "prezado|atenciosamente|obrigado";

const POSITIVE_WORDS: &str = "quero|comprar|interessado|show|legal|ótimo|valeu|adoraria";
const NEGATIVE_WORDS: &str = "não|caro|pare|stop|desinteressado";
const INQUIRY_WORDS: &str = "saber|explicar|como|qual|detalhes|mostrar|me explique";

/// Detect the register of a message.
///
/// Short or emoji-laden text reads as casual; long text or formal address
/// terms read as formal; everything else is professional.
pub fn detect_tone(text: &str) -> Tone {
    let lower = text.to_lowercase();
    let char_len = text.chars().count();

    if char_len < 20 || INFORMAL_MARKERS.iter().any(|m| lower.contains(m)) {
        return Tone::Casual;
    }
    if char_len > 100 || matches_word_pattern(FORMAL_WORDS, text) {
        return Tone::Formal;
    }
    Tone::Professional
}

/// Detect the sentiment of a message.
///
/// Lexical rules win over the polarity score; any internal failure is logged
/// and degrades to `Neutral`.
pub fn analyze_sentiment(text: &str) -> Sentiment {
    match sentiment_of(text) {
        Ok(sentiment) => sentiment,
        Err(e) => {
            tracing::error!("sentiment analysis failed: {e}");
            Sentiment::Neutral
        }
    }
}

fn sentiment_of(text: &str) -> Result<Sentiment> {
    if word_pattern(POSITIVE_WORDS)?.is_match(text) {
        return Ok(Sentiment::Positive);
    }
    if word_pattern(NEGATIVE_WORDS)?.is_match(text) {
        return Ok(Sentiment::Negative);
    }
    if word_pattern(INQUIRY_WORDS)?.is_match(text) {
        return Ok(Sentiment::Curious);
    }

    let polarity = polarity_score(text);
    Ok(if polarity > 0.3 {
        Sentiment::Positive
    } else if polarity < -0.3 {
        Sentiment::Negative
    } else if polarity > 0.1 {
        Sentiment::Curious
    } else if polarity < -0.1 {
        Sentiment::Hesitant
    } else {
        Sentiment::Neutral
    })
}

/// Valence lexicon for the polarity fallback. Scores in [-1, 1].
const VALENCE_LEXICON: [(&str, f32); 34] = [
    ("excelente", 1.0),
    ("perfeito", 1.0),
    ("maravilhoso", 1.0),
    ("incrível", 0.9),
    ("amei", 0.9),
    ("gostei", 0.8),
    ("feliz", 0.8),
    ("bom", 0.7),
    ("boa", 0.7),
    ("top", 0.6),
    ("awesome", 0.9),
    ("love", 0.9),
    ("great", 0.8),
    ("good", 0.7),
    ("nice", 0.6),
    ("interessante", 0.25),
    ("interesting", 0.25),
    ("curioso", 0.2),
    ("talvez", -0.15),
    ("maybe", -0.15),
    ("dúvida", -0.15),
    ("difícil", -0.2),
    ("complicado", -0.25),
    ("confuso", -0.2),
    ("problema", -0.3),
    ("nunca", -0.4),
    ("ruim", -0.7),
    ("bad", -0.7),
    ("péssimo", -1.0),
    ("horrível", -0.9),
    ("odeio", -0.9),
    ("hate", -0.9),
    ("terrible", -0.9),
    ("awful", -0.9),
];

/// Mean valence of recognized words, clamped to [-1, 1]. Zero when no word
/// in the text carries a valence.
fn polarity_score(text: &str) -> f32 {
    let lower = text.to_lowercase();
    let mut total = 0.0_f32;
    let mut hits = 0_u32;

    for token in lower.split(|c: char| !c.is_alphanumeric()) {
        if token.is_empty() {
            continue;
        }
        if let Some((_, valence)) = VALENCE_LEXICON.iter().find(|(word, _)| *word == token) {
            total += valence;
            hits += 1;
        }
    }

    if hits == 0 {
        return 0.0;
    }
    (total / hits as f32).clamp(-1.0, 1.0)
}

fn word_pattern(alternation: &str) -> Result<Regex> {
    Ok(Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))?)
}

/// Whole-word, case-insensitive alternation match. A pattern that fails to
/// compile (e.g. a malformed operator-trained keyword) matches nothing.
pub(crate) fn matches_word_pattern(alternation: &str, text: &str) -> bool {
    match word_pattern(alternation) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            tracing::debug!("unusable keyword pattern {alternation:?}: {e}");
            false
        }
    }
}
