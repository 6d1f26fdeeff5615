use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::mapping::FieldMapping;
use crate::models::{ChannelReviewRow, CriterionBreakdown, Evidence, ReviewStatus};
use crate::record::{self, Record, RecordKey};

#[derive(Debug, Clone)]
pub struct ReviewOptions {
    pub mapping: FieldMapping,
    /// Score any non-zero count as a full match (100) instead of summing raw counts.
    pub normalize_counts: bool,
}

impl Default for ReviewOptions {
    fn default() -> Self {
        Self {
            mapping: FieldMapping::default(),
            normalize_counts: true,
        }
    }
}

struct CriterionBucket {
    criterion_id: Value,
    criterion_name: String,
    score_raw: f64,
    evidence: Vec<Evidence>,
}

/// Insertion-ordered grouping: keys keep the order they were first seen in.
struct OrderedGroups<'a> {
    index: HashMap<RecordKey, usize>,
    groups: Vec<(Value, Vec<&'a Record>)>,
}

impl<'a> OrderedGroups<'a> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            groups: Vec::new(),
        }
    }

    fn push(&mut self, key: Option<&Value>, record: &'a Record) {
        let slot = *self.index.entry(RecordKey::of(key)).or_insert_with(|| {
            self.groups
                .push((key.cloned().unwrap_or(Value::Null), Vec::new()));
            self.groups.len() - 1
        });
        self.groups[slot].1.push(record);
    }

    fn get(&self, key: Option<&Value>) -> &[&'a Record] {
        self.index
            .get(&RecordKey::of(key))
            .map(|slot| self.groups[*slot].1.as_slice())
            .unwrap_or(&[])
    }
}

/// Builds one review row per channel, in the order channels first appear in `messages`.
pub fn build_channel_reviews(
    messages: &[Record],
    observations: &[Record],
    criteria: &[Record],
    options: &ReviewOptions,
    users: &[Record],
) -> Vec<ChannelReviewRow> {
    let cfg = &options.mapping;

    let user_names: HashMap<RecordKey, Option<String>> = users
        .iter()
        .map(|user| {
            (
                RecordKey::of(user.get(&cfg.user_id)),
                record::text(user.get(&cfg.user_name)),
            )
        })
        .collect();
    let criterion_by_id: HashMap<RecordKey, &Record> = criteria
        .iter()
        .map(|criterion| (RecordKey::of(criterion.get(&cfg.crit_id)), criterion))
        .collect();

    let mut by_channel = OrderedGroups::new();
    for message in messages {
        by_channel.push(message.get(&cfg.msg_channel), message);
    }

    let mut by_message = OrderedGroups::new();
    for observation in observations {
        by_message.push(observation.get(&cfg.mc_msg_id), observation);
    }

    let mut rows = Vec::with_capacity(by_channel.groups.len());
    for (channel_id, channel_messages) in &by_channel.groups {
        let mut buckets: Vec<CriterionBucket> = Vec::new();
        let mut bucket_index: HashMap<RecordKey, usize> = HashMap::new();

        for message in channel_messages {
            let author = message.get(&cfg.msg_user);
            let username = user_names
                .get(&RecordKey::of(author))
                .cloned()
                .flatten();

            for observation in by_message.get(message.get(&cfg.msg_id)) {
                let criterion_id = observation.get(&cfg.mc_crit_id);
                let slot = *bucket_index
                    .entry(RecordKey::of(criterion_id))
                    .or_insert_with(|| {
                        let criterion_name = criterion_by_id
                            .get(&RecordKey::of(criterion_id))
                            .and_then(|criterion| record::text(criterion.get(&cfg.crit_name)))
                            .unwrap_or_else(|| {
                                criterion_id.map_or_else(|| "undefined".to_owned(), record::display)
                            });
                        buckets.push(CriterionBucket {
                            criterion_id: criterion_id.cloned().unwrap_or(Value::Null),
                            criterion_name,
                            score_raw: 0.0,
                            evidence: Vec::new(),
                        });
                        buckets.len() - 1
                    });
                let bucket = &mut buckets[slot];

                let count = observation.get(&cfg.mc_count);
                let fulfilled = observation.get(&cfg.mc_bool);
                let text = observation.get(&cfg.mc_text);

                if is_positive(count, fulfilled, text) {
                    bucket.evidence.push(Evidence {
                        message_id: message.get(&cfg.msg_id).cloned().unwrap_or(Value::Null),
                        content: record::text(message.get(&cfg.msg_content)),
                        username: username.clone(),
                        user_id: author.cloned().unwrap_or(Value::Null),
                        sent_at: record::text(message.get(&cfg.msg_created)),
                        count_value: count.cloned().unwrap_or(Value::Null),
                        is_fulfilled: fulfilled.cloned().unwrap_or(Value::Null),
                        text_value: text.cloned().unwrap_or(Value::Null),
                    });
                }

                // Scoring is independent of positivity: a text-only observation
                // is evidence but contributes nothing under normalization.
                let count = record::to_number(count);
                bucket.score_raw += if options.normalize_counts {
                    if count != 0.0 {
                        100.0
                    } else {
                        0.0
                    }
                } else {
                    count
                };
            }
        }

        let message_count = channel_messages.len();
        let breakdown: Vec<CriterionBreakdown> = buckets
            .into_iter()
            .map(|bucket| CriterionBreakdown {
                criterion_id: bucket.criterion_id,
                criterion_name: bucket.criterion_name,
                score: clamp_score(bucket.score_raw / message_count.max(1) as f64),
                evidence: bucket.evidence,
            })
            .collect();

        let aggregate_score = aggregate(&breakdown);
        let first = channel_messages.first();
        let last = channel_messages.last();
        let channel_name = first
            .and_then(|message| record::text(message.get(&cfg.msg_channel_name)))
            .unwrap_or_else(|| record::display(channel_id));

        debug!(
            channel = %channel_name,
            messages = message_count,
            criteria = breakdown.len(),
            "aggregated channel"
        );

        rows.push(ChannelReviewRow {
            id: channel_id.clone(),
            channel_id: channel_id.clone(),
            summary_text: format!("Aggregated feedback for #{channel_name}"),
            channel_name,
            created_at: first.and_then(|message| record::text(message.get(&cfg.msg_created))),
            updated_at: last.and_then(|message| record::text(message.get(&cfg.msg_created))),
            status: ReviewStatus::Done,
            approved: true,
            aggregate_score,
            breakdown,
            message_count,
            dirty: false,
        });
    }

    rows
}

/// An observation is evidence when it has a positive count, an explicit
/// `true`, or non-blank text. Arrays and objects never count as text.
pub fn is_positive(count: Option<&Value>, fulfilled: Option<&Value>, text: Option<&Value>) -> bool {
    let counted = record::is_truthy(count) && record::to_number(count) > 0.0;
    let fulfilled = matches!(fulfilled, Some(Value::Bool(true)));
    let written = match text {
        Some(Value::Array(_) | Value::Object(_)) => false,
        text => {
            record::is_truthy(text)
                && text
                    .map(record::display)
                    .is_some_and(|text| !text.trim().is_empty())
        }
    };
    counted || fulfilled || written
}

fn clamp_score(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

fn aggregate(breakdown: &[CriterionBreakdown]) -> Option<u8> {
    if breakdown.is_empty() {
        return None;
    }
    let total: f64 = breakdown.iter().map(|entry| f64::from(entry.score)).sum();
    Some(clamp_score(total / breakdown.len() as f64))
}
