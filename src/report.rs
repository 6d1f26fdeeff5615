use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{ChannelReviewRow, CriterionSummary};

const EVIDENCE_PER_CRITERION: usize = 3;

/// Mean score per criterion name across all channels, highest first.
pub fn summarize_criteria(rows: &[ChannelReviewRow]) -> Vec<CriterionSummary> {
    let mut order: Vec<String> = Vec::new();
    let mut map: std::collections::HashMap<String, (usize, u32, usize)> =
        std::collections::HashMap::new();

    for row in rows {
        for entry in &row.breakdown {
            let slot = map.entry(entry.criterion_name.clone()).or_insert_with(|| {
                order.push(entry.criterion_name.clone());
                (0, 0, 0)
            });
            slot.0 += 1;
            slot.1 += u32::from(entry.score);
            slot.2 += entry.evidence.len();
        }
    }

    let mut summaries: Vec<CriterionSummary> = order
        .into_iter()
        .filter_map(|name| {
            let (channel_count, total, evidence_count) = map.remove(&name)?;
            Some(CriterionSummary {
                criterion_name: name,
                channel_count,
                avg_score: if channel_count == 0 {
                    0.0
                } else {
                    f64::from(total) / channel_count as f64
                },
                evidence_count,
            })
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.avg_score
            .partial_cmp(&a.avg_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    summaries
}

pub fn build_report(scope: Option<&str>, generated_at: DateTime<Utc>, rows: &[ChannelReviewRow]) -> String {
    let summaries = summarize_criteria(rows);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all channels");

    let _ = writeln!(output, "# Channel Review Report");
    let _ = writeln!(
        output,
        "Generated for {} at {}",
        scope_label,
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Channels");

    if rows.is_empty() {
        let _ = writeln!(output, "No messages found for this scope.");
    } else {
        let _ = writeln!(output, "| Channel | Messages | First | Last | Score |");
        let _ = writeln!(output, "|---|---|---|---|---|");
        for row in rows {
            let _ = writeln!(
                output,
                "| #{} | {} | {} | {} | {} |",
                row.channel_name,
                row.message_count,
                row.created_at.as_deref().unwrap_or("-"),
                row.updated_at.as_deref().unwrap_or("-"),
                score_label(row.aggregate_score)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Criteria Overview");

    if summaries.is_empty() {
        let _ = writeln!(output, "No criterion observations recorded.");
    } else {
        for summary in &summaries {
            let _ = writeln!(
                output,
                "- {}: avg {:.1} across {} channels ({} evidence)",
                summary.criterion_name,
                summary.avg_score,
                summary.channel_count,
                summary.evidence_count
            );
        }
    }

    for row in rows {
        let _ = writeln!(output);
        let _ = writeln!(output, "## #{}", row.channel_name);
        let _ = writeln!(output, "{}", row.summary_text);

        if row.breakdown.is_empty() {
            let _ = writeln!(output, "No criteria evaluated.");
            continue;
        }

        for entry in &row.breakdown {
            let _ = writeln!(output, "- {}: {}", entry.criterion_name, entry.score);
            for evidence in entry.evidence.iter().take(EVIDENCE_PER_CRITERION) {
                let _ = writeln!(
                    output,
                    "  - {} ({}): {}",
                    evidence.username.as_deref().unwrap_or("unknown"),
                    evidence.sent_at.as_deref().unwrap_or("-"),
                    evidence.content.as_deref().unwrap_or("")
                );
            }
            if entry.evidence.len() > EVIDENCE_PER_CRITERION {
                let _ = writeln!(
                    output,
                    "  - ... {} more",
                    entry.evidence.len() - EVIDENCE_PER_CRITERION
                );
            }
        }
    }

    output
}

pub fn score_label(score: Option<u8>) -> String {
    score.map_or_else(|| "n/a".to_string(), |score| score.to_string())
}
