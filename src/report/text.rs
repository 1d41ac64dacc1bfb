//! Plain-text rendering of a report.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde_json::Value;

use super::{AspectBreakdown, Summary};

/// Renders the summary as sorted, indented `key = value` lines followed by one block
/// per aspect. Percentage columns are: of all samples, of active samples,
/// and (with a filter) of filtered samples.
pub fn render(summary: &Summary, aspects: &[AspectBreakdown]) -> String {
    let mut out = String::new();

    out.push_str("== Stats ==\n");
    if let Ok(Value::Object(fields)) = serde_json::to_value(summary) {
        // The map may keep insertion order depending on enabled features.
        let sorted: BTreeMap<String, Value> = fields.into_iter().collect();
        for (key, value) in sorted {
            if let Some(rendered) = render_scalar(&value) {
                let _ = writeln!(out, "  {key} = {rendered}");
            }
        }
    }

    for breakdown in aspects {
        out.push('\n');
        let _ = writeln!(out, "== {} ==", breakdown.aspect);
        for share in &breakdown.values {
            let _ = write!(out, "{:>7.2}% {:>7.2}%", share.pct_of_all, share.pct_of_active);
            if let Some(filtered) = share.pct_of_filtered {
                let _ = write!(out, " {filtered:>7.2}%");
            }
            let _ = writeln!(out, "  {}", share.value);
        }
        if breakdown.truncated {
            let _ = writeln!(
                out,
                "(showing {} of {})",
                breakdown.values.len(),
                breakdown.total_values
            );
        }
    }
    out
}

fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Number(n) if n.is_f64() => n.as_f64().map(|f| format!("{f:.2}")),
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ValueShare;

    fn summary() -> Summary {
        Summary {
            num_samples: 10,
            num_ops: 4,
            earliest: Some(0.0),
            latest: Some(9.0),
            earliest_utc: None,
            latest_utc: None,
            samples_per_sec: Some(10.0 / 9.0),
            perc_active: 40.0,
            perc_filtered: None,
            num_filter_errors: 0,
        }
    }

    #[test]
    fn test_stats_block_is_sorted_and_skips_absent() {
        let text = render(&summary(), &[]);
        assert_eq!(
            text,
            concat!(
                "== Stats ==\n",
                "  earliest = 0.00\n",
                "  latest = 9.00\n",
                "  num_filter_errors = 0\n",
                "  num_ops = 4\n",
                "  num_samples = 10\n",
                "  perc_active = 40.00\n",
                "  samples_per_sec = 1.11\n",
            )
        );
    }

    #[test]
    fn test_aspect_block_and_truncation_line() {
        let breakdown = AspectBreakdown {
            aspect: "db".into(),
            total_values: 3,
            truncated: true,
            values: vec![ValueShare {
                value: "shop".into(),
                count: 4,
                pct_of_all: 40.0,
                pct_of_active: 100.0,
                pct_of_filtered: Some(100.0),
            }],
        };
        let text = render(&summary(), &[breakdown]);
        assert!(text.ends_with("\n== db ==\n  40.00%  100.00%  100.00%  shop\n(showing 1 of 3)\n"));
    }
}
