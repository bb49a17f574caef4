//! Script rulebook: selection, template rendering and operator training.
//!
//! Rules are evaluated in insertion order as an ordered dispatch table:
//! (stage, keyword alternation, tone). The first rule whose keyword matches
//! as a whole word and whose tone is eligible wins. `Professional` is the
//! universal fallback tone.

use anyhow::{bail, Result};
use regex::Regex;

use crate::classifier::{self, Tone};
use crate::database::{SalesDatabase, ScriptRule};
use crate::funnel::Stage;

/// Contact/product context a template is rendered against.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub contact_name: &'a str,
    pub product: &'a str,
    pub pain_point: Option<&'a str>,
    pub industry: Option<&'a str>,
}

/// The generic phrases substituted when contact attributes are unknown.
pub const GENERIC_PAIN_POINT: &str = "seus desafios";
pub const GENERIC_INDUSTRY: &str = "seu setor";
pub const GENERIC_BENEFIT: &str = "resultados rápidos";

#[derive(Debug, Clone)]
pub struct SelectedResponse {
    pub text: String,
    /// None when no rule fired (generic fallback); excluded from
    /// use/success accounting.
    pub rule_id: Option<i64>,
}

/// Select and render a response for one turn.
///
/// The detected tone of `text` gates which rules are eligible; the fired
/// rule's use counter is incremented. A rule whose template fails to render
/// is reported and replaced by the generic fallback so a single bad
/// operator rule cannot halt the engine.
pub fn select_response(
    db: &SalesDatabase,
    stage: Stage,
    text: &str,
    ctx: &RenderContext<'_>,
) -> Result<SelectedResponse> {
    let user_tone = classifier::detect_tone(text);

    for rule in db.scripts_for_stage(stage)? {
        if !rule_matches(&rule, text, user_tone) {
            continue;
        }
        match render_template(&rule.response, ctx) {
            Ok(rendered) => {
                db.record_script_use(rule.id)?;
                tracing::debug!(rule_id = rule.id, stage = stage.as_db_str(), "rule fired");
                return Ok(SelectedResponse {
                    text: rendered,
                    rule_id: Some(rule.id),
                });
            }
            Err(e) => {
                tracing::error!(
                    rule_id = rule.id,
                    "template render failed ({e}); using fallback response"
                );
                return Ok(fallback_response(ctx));
            }
        }
    }

    Ok(fallback_response(ctx))
}

fn rule_matches(rule: &ScriptRule, text: &str, user_tone: Tone) -> bool {
    if rule.tone != user_tone && rule.tone != Tone::Professional {
        return false;
    }
    classifier::matches_word_pattern(&rule.keyword, text)
}

/// Substitute the five named placeholders. Unknown placeholders left in the
/// template are a render error.
pub fn render_template(template: &str, ctx: &RenderContext<'_>) -> Result<String> {
    let benefit = match ctx.pain_point {
        Some(pain) => format!("técnicas para superar {}", pain),
        None => GENERIC_BENEFIT.to_string(),
    };
    let pain_point = ctx.pain_point.unwrap_or(GENERIC_PAIN_POINT);
    let industry = ctx.industry.unwrap_or(GENERIC_INDUSTRY);

    let rendered = template
        .replace("{contact_name}", ctx.contact_name)
        .replace("{product}", ctx.product)
        .replace("{benefit}", &benefit)
        .replace("{pain_point}", pain_point)
        .replace("{industry}", industry);

    // A placeholder that survived substitution means the operator's
    // template references something we cannot fill.
    if let Some(found) = leftover_placeholder(&rendered)? {
        bail!("unsupported placeholder '{}' in template", found);
    }
    Ok(rendered)
}

fn leftover_placeholder(rendered: &str) -> Result<Option<String>> {
    let re = Regex::new(r"\{[A-Za-z_]+\}")?;
    Ok(re.find(rendered).map(|m| m.as_str().to_string()))
}

/// No rule fired: the generic pitch referencing whatever we know about the
/// contact.
fn fallback_response(ctx: &RenderContext<'_>) -> SelectedResponse {
    let pain_point = ctx.pain_point.unwrap_or(GENERIC_PAIN_POINT);
    let industry = ctx.industry.unwrap_or(GENERIC_INDUSTRY);
    let text = format!(
        "Entendi, {}! Parece que você está interessado em resolver {} no {}. \
         Nosso {} tem estratégias específicas para isso. Quer que eu explique \
         mais ou envie um trecho grátis? 😊",
        ctx.contact_name, pain_point, industry, ctx.product
    );
    SelectedResponse {
        text,
        rule_id: None,
    }
}

/// Operator training: append a rule to the rulebook. The template is taken
/// as-is; a bad placeholder only surfaces when the rule is selected.
pub fn train_rule(
    db: &SalesDatabase,
    stage: Stage,
    keyword: &str,
    response: &str,
    tone: Tone,
) -> Result<i64> {
    let id = db.add_script(stage, keyword, response, tone)?;
    tracing::info!(
        rule_id = id,
        stage = stage.as_db_str(),
        keyword,
        "trained new script rule"
    );
    Ok(id)
}
