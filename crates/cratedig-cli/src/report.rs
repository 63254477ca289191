//! Run reporting: a JSON summary for machines, a CSV move plan for
//! spreadsheets, and a directory-tree preview for humans.

use chrono::{SecondsFormat, Utc};
use cratedig_core::model::{CacheStats, CallStats};
use cratedig_core::{BatchResult, BatchStage};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub generated_at: String,
    pub total: usize,
    pub cached: usize,
    pub processed: usize,
    pub failed: usize,
    pub calls: CallStats,
    pub cache: CacheStats,
    pub results: &'a [BatchResult],
}

impl<'a> RunReport<'a> {
    pub fn new(results: &'a [BatchResult], calls: CallStats, cache: CacheStats) -> Self {
        let count = |stage: BatchStage| results.iter().filter(|r| r.stage == stage).count();
        Self {
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            total: results.len(),
            cached: count(BatchStage::Cached),
            processed: count(BatchStage::Processed),
            failed: count(BatchStage::Error),
            calls,
            cache,
            results,
        }
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!(path = %path.display(), "wrote json report");
        Ok(())
    }
}

/// CSV plan: one row per successful classification, `source_path` to
/// `suggested_path` with the fields in between.
pub fn write_csv_plan(results: &[BatchResult], path: &Path) -> anyhow::Result<()> {
    let mut out = String::from("source_path,artist,title,year,category,subcategory,confidence,suggested_path\n");
    for r in results.iter().filter(|r| r.success) {
        let Some(p) = r.payload.as_ref() else { continue };
        let field = |key: &str| {
            p.get(key)
                .and_then(|v| v.as_str())
                .map(ToString::to_string)
                .unwrap_or_default()
        };
        let year = p
            .get("year")
            .and_then(|v| v.as_i64())
            .map(|y| y.to_string())
            .unwrap_or_default();
        let confidence = p
            .get("confidence")
            .and_then(|v| v.as_f64())
            .map(|c| format!("{c:.2}"))
            .unwrap_or_default();
        let row = [
            r.path.to_string_lossy().into_owned(),
            field("artist"),
            field("title"),
            year,
            field("category"),
            field("subcategory"),
            confidence,
            field("suggested_path"),
        ];
        let _ = writeln!(
            out,
            "{}",
            row.iter().map(|f| csv_escape(f)).collect::<Vec<_>>().join(",")
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, out)?;
    tracing::info!(path = %path.display(), "wrote csv plan");
    Ok(())
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Indented preview of the planned library layout, grouped by target path.
pub fn render_tree(results: &[BatchResult]) -> String {
    // category -> subcategory ("" for none) -> album leaves
    let mut tree: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
    for r in results.iter().filter(|r| r.success) {
        let Some(suggested) = r
            .payload
            .as_ref()
            .and_then(|p| p.get("suggested_path"))
            .and_then(|v| v.as_str())
        else {
            continue;
        };
        let parts: Vec<&str> = suggested.splitn(3, '/').collect();
        let (category, sub, leaf) = match parts.as_slice() {
            [c, s, l] => (*c, *s, *l),
            [c, l] => (*c, "", *l),
            _ => continue,
        };
        tree.entry(category.to_string())
            .or_default()
            .entry(sub.to_string())
            .or_default()
            .push(leaf.to_string());
    }

    let mut out = String::new();
    for (category, subs) in &tree {
        let count: usize = subs.values().map(Vec::len).sum();
        let _ = writeln!(out, "{category}/ ({count})");
        for (sub, leaves) in subs {
            let indent = if sub.is_empty() {
                "  "
            } else {
                let _ = writeln!(out, "  {sub}/");
                "    "
            };
            let mut leaves = leaves.clone();
            leaves.sort();
            for leaf in leaves {
                let _ = writeln!(out, "{indent}{leaf}");
            }
        }
    }
    out
}

/// One-paragraph console summary after a run.
pub fn render_summary(report: &RunReport<'_>) -> String {
    format!(
        "{} albums: {} classified, {} from cache, {} failed | \
         api calls: {} total, {} retried, {:.1}% success | \
         cache hits: {} record / {} response",
        report.total,
        report.processed,
        report.cached,
        report.failed,
        report.calls.total_calls,
        report.calls.retried_calls,
        report.calls.success_rate_percent,
        report.cache.l1_hits,
        report.cache.l2_hits,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;

    fn ok_result(source: &str, payload: serde_json::Value) -> BatchResult {
        BatchResult {
            path: PathBuf::from(source),
            success: true,
            payload: Some(payload),
            error: None,
            stage: BatchStage::Processed,
            elapsed: Duration::from_millis(120),
        }
    }

    fn failed_result(source: &str) -> BatchResult {
        BatchResult {
            path: PathBuf::from(source),
            success: false,
            payload: None,
            error: Some("api rate limit exceeded".into()),
            stage: BatchStage::Error,
            elapsed: Duration::from_millis(5),
        }
    }

    fn stats() -> (CallStats, CacheStats) {
        (
            CallStats {
                total_calls: 3,
                successful_calls: 2,
                failed_calls: 1,
                retried_calls: 4,
                success_rate_percent: 66.67,
            },
            CacheStats {
                l1_hits: 1,
                l1_lookups: 2,
                l2_hits: 0,
                l2_lookups: 2,
                total_lookups: 4,
                l1_hit_rate_percent: 50.0,
                l2_hit_rate_percent: 0.0,
            },
        )
    }

    #[test]
    fn report_counts_stages() {
        let results = vec![
            ok_result("/m/a", json!({"suggested_path": "Jazz/A - B (1960)"})),
            failed_result("/m/b"),
        ];
        let (calls, cache) = stats();
        let report = RunReport::new(&results, calls, cache);
        assert_eq!(report.total, 2);
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.cached, 0);
        assert!(render_summary(&report).contains("2 albums"));
    }

    #[test]
    fn json_report_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("report.json");
        let results = vec![failed_result("/m/b")];
        let (calls, cache) = stats();
        RunReport::new(&results, calls, cache).write_json(&out).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(parsed["total"], 1);
        assert_eq!(parsed["results"][0]["stage"], "error");
        assert_eq!(parsed["results"][0]["error"], "api rate limit exceeded");
    }

    #[test]
    fn csv_quotes_embedded_commas_and_quotes() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("plan.csv");
        let results = vec![ok_result(
            "/m/crosby",
            json!({
                "artist": "Crosby, Stills & Nash",
                "title": "So Far \"Live\"",
                "year": 1974,
                "category": "Misc",
                "confidence": 0.8,
                "suggested_path": "Misc/Crosby, Stills & Nash - So Far (1974)"
            }),
        )];
        write_csv_plan(&results, &out).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.starts_with("source_path,artist,title"));
        assert!(text.contains("\"Crosby, Stills & Nash\""));
        assert!(text.contains("\"So Far \"\"Live\"\"\""));
        assert!(text.contains("0.80"));
    }

    #[test]
    fn csv_skips_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("plan.csv");
        write_csv_plan(&[failed_result("/m/b")], &out).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert_eq!(text.lines().count(), 1); // header only
    }

    #[test]
    fn tree_groups_by_category_and_subcategory() {
        let results = vec![
            ok_result("/m/a", json!({"suggested_path": "Soundtracks/Film/Vangelis - Blade Runner (1994)"})),
            ok_result("/m/b", json!({"suggested_path": "Jazz/Mingus - Ah Um (1959)"})),
            ok_result("/m/c", json!({"suggested_path": "Jazz/Coltrane - Giant Steps (1960)"})),
        ];
        let tree = render_tree(&results);
        assert!(tree.contains("Jazz/ (2)"));
        assert!(tree.contains("  Coltrane - Giant Steps (1960)"));
        assert!(tree.contains("Soundtracks/ (1)"));
        assert!(tree.contains("  Film/"));
        assert!(tree.contains("    Vangelis - Blade Runner (1994)"));
    }
}
