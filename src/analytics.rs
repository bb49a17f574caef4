//! Read-only aggregation over contacts and script performance.
//!
//! No mutation; storage read errors propagate to the caller.

use anyhow::Result;

use crate::database::SalesDatabase;
use crate::funnel::{Engagement, Stage};

#[derive(Debug, Clone)]
pub struct ContactReportRow {
    pub name: String,
    pub lead_score: i64,
    pub engagement: Engagement,
    pub stage: Stage,
}

#[derive(Debug, Clone)]
pub struct ScriptReportRow {
    pub stage: Stage,
    pub keyword: String,
    pub success_count: i64,
    pub use_count: i64,
    /// success_count / use_count × 100.
    pub success_rate: f64,
}

/// Contacts ordered by descending lead score.
pub fn contact_report(db: &SalesDatabase) -> Result<Vec<ContactReportRow>> {
    let rows = db
        .contacts_by_score()?
        .into_iter()
        .map(|c| ContactReportRow {
            name: c.name,
            lead_score: c.lead_score,
            engagement: c.engagement_level,
            stage: c.current_stage,
        })
        .collect();
    Ok(rows)
}

/// Rules that fired at least once, with their success rate.
pub fn script_report(db: &SalesDatabase) -> Result<Vec<ScriptReportRow>> {
    let rows = db
        .scripts_with_uses()?
        .into_iter()
        .map(|rule| {
            let success_rate = if rule.use_count > 0 {
                rule.success_count as f64 / rule.use_count as f64 * 100.0
            } else {
                0.0
            };
            ScriptReportRow {
                stage: rule.stage,
                keyword: rule.keyword,
                success_count: rule.success_count,
                use_count: rule.use_count,
                success_rate,
            }
        })
        .collect();
    Ok(rows)
}

/// The printable cycle report.
pub fn render_report(db: &SalesDatabase) -> Result<String> {
    let mut out = String::from("\n📊 Relatório de Contatos:\n");
    for row in contact_report(db)? {
        out.push_str(&format!(
            "{}: Score={}, Engajamento={}, Estágio={}\n",
            row.name,
            row.lead_score,
            row.engagement.as_db_str(),
            row.stage.as_db_str()
        ));
    }

    out.push_str("\n📈 Desempenho dos Scripts:\n");
    for row in script_report(db)? {
        out.push_str(&format!(
            "{} ({}): {:.1}% de sucesso ({}/{})\n",
            row.stage.as_db_str(),
            row.keyword,
            row.success_rate,
            row.success_count,
            row.use_count
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Tone;
    use tempfile::tempdir;

    fn open_db() -> (tempfile::TempDir, SalesDatabase) {
        let dir = tempdir().expect("tempdir");
        let db = SalesDatabase::new(dir.path().join("leadloop.db")).expect("open db");
        (dir, db)
    }

    #[test]
    fn test_contacts_ordered_by_score() {
        let (_dir, db) = open_db();
        let hot = db.upsert_contact("Hot", None, None).unwrap();
        db.upsert_contact("Cold", None, None).unwrap();
        db.adjust_lead_score(&hot.id, 30).unwrap();

        let rows = contact_report(&db).unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Hot", "Cold"]);
        assert_eq!(rows[0].lead_score, 80);
    }

    #[test]
    fn test_unused_rules_excluded() {
        let (_dir, db) = open_db();
        assert!(script_report(&db).unwrap().is_empty());
    }

    #[test]
    fn test_success_rate_one_decimal() {
        let (_dir, db) = open_db();
        db.add_script(Stage::Closing, "pix", "{product} via pix", Tone::Professional)
            .unwrap();
        let rule_id = db.scripts_for_stage(Stage::Closing).unwrap()[1].id;
        for _ in 0..3 {
            db.record_script_use(rule_id).unwrap();
        }
        db.record_script_success(rule_id).unwrap();

        let rows = script_report(&db).unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].success_rate - 33.333).abs() < 0.01);

        let rendered = render_report(&db).unwrap();
        assert!(rendered.contains("closing (pix): 33.3% de sucesso (1/3)"));
    }
}
