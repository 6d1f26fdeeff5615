use anyhow::Context;
use serde_json::{json, Value};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::record::Record;
use crate::source::ReviewInputs;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

const SEED_USERS: [(&str, &str); 5] = [
    ("alice", "alice@example.com"),
    ("bob", "bob@example.com"),
    ("carol", "carol@example.com"),
    ("dave", "dave@example.com"),
    ("eve", "eve@example.com"),
];

const SEED_CRITERIA: [&str; 20] = [
    "Response time",
    "Frequency",
    "Subject depth",
    "Result orientation",
    "Form and wording",
    "Audience fit",
    "Self-disclosure",
    "Quantity",
    "Quality",
    "Understanding 1",
    "Identification 1",
    "Understanding 2",
    "Identification 2",
    "Team goals",
    "Valence",
    "Instrumentality",
    "Self-efficacy",
    "Trust",
    "Team spirit",
    "Small talk",
];

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    for (username, email) in SEED_USERS {
        sqlx::query(
            r#"
            INSERT INTO channel_review.users (username, email)
            VALUES ($1, $2)
            ON CONFLICT (username) DO UPDATE SET email = EXCLUDED.email
            "#,
        )
        .bind(username)
        .bind(email)
        .execute(pool)
        .await?;
    }

    for name in SEED_CRITERIA {
        upsert_criterion(pool, name, "countable").await?;
    }

    let messages = [
        ("ci-msg-123", "alice", "Test message from CI", "2025-10-27T12:34:56Z"),
        ("ci-msg-1234", "alice", "Test message from CI", "2025-10-27T12:35:10Z"),
        ("ci-msg-12345", "bob", "Looks green on my side.", "2025-10-27T12:36:02Z"),
        ("ci-msg-123456", "carol", "Can we rerun the flaky job?", "2025-10-27T12:40:41Z"),
        ("ci-msg-1234567", "alice", "Rerun passed, merging.", "2025-10-27T12:42:22Z"),
    ];

    for (message_key, username, content, sent_at) in messages {
        let user_id = upsert_user(pool, username).await?;
        upsert_message(
            pool,
            &MessageInput {
                message_key,
                user_id,
                content,
                channel: Some("ci-test"),
                channel_id: Some("ci-chan-1"),
                sent_at: Some(sent_at),
            },
        )
        .await?;
    }

    let observations: [(&str, &str, Option<i32>, Option<&str>); 8] = [
        ("ci-msg-123", "Response time", Some(0), None),
        ("ci-msg-123", "Frequency", Some(1), None),
        ("ci-msg-1234", "Response time", Some(0), None),
        ("ci-msg-1234", "Frequency", Some(1), None),
        ("ci-msg-12345", "Response time", Some(1), None),
        ("ci-msg-123456", "Team spirit", None, Some("offers to help")),
        ("ci-msg-1234567", "Result orientation", Some(1), None),
        ("ci-msg-1234567", "Frequency", Some(1), None),
    ];

    for (message_key, criterion, count_value, text_value) in observations {
        let message_id: i32 =
            sqlx::query("SELECT id FROM channel_review.messages WHERE message_key = $1")
                .bind(message_key)
                .fetch_one(pool)
                .await?
                .get("id");
        let criterion_id = upsert_criterion(pool, criterion, "countable").await?;
        upsert_observation(pool, message_id, criterion_id, count_value, None, text_value).await?;
    }

    Ok(())
}

struct MessageInput<'a> {
    message_key: &'a str,
    user_id: i32,
    content: &'a str,
    channel: Option<&'a str>,
    channel_id: Option<&'a str>,
    sent_at: Option<&'a str>,
}

async fn upsert_user(pool: &PgPool, username: &str) -> anyhow::Result<i32> {
    let id = sqlx::query(
        r#"
        INSERT INTO channel_review.users (username)
        VALUES ($1)
        ON CONFLICT (username) DO UPDATE SET username = EXCLUDED.username
        RETURNING id
        "#,
    )
    .bind(username)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_criterion(pool: &PgPool, name: &str, criterion_type: &str) -> anyhow::Result<i32> {
    let id = sqlx::query(
        r#"
        INSERT INTO channel_review.criteria (name, type)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(criterion_type)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to store criterion {name}"))?
    .get("id");
    Ok(id)
}

async fn upsert_message(pool: &PgPool, message: &MessageInput<'_>) -> anyhow::Result<i32> {
    let id = sqlx::query(
        r#"
        INSERT INTO channel_review.messages
        (content, user_id, channel, message_key, channel_id, sent_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (message_key) DO UPDATE
        SET content = EXCLUDED.content, channel = EXCLUDED.channel,
            channel_id = EXCLUDED.channel_id, sent_at = EXCLUDED.sent_at
        RETURNING id
        "#,
    )
    .bind(message.content)
    .bind(message.user_id)
    .bind(message.channel)
    .bind(message.message_key)
    .bind(message.channel_id)
    .bind(message.sent_at)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

/// Returns whether a new row was written; existing observations are left alone.
async fn upsert_observation(
    pool: &PgPool,
    message_id: i32,
    criterion_id: i32,
    count_value: Option<i32>,
    is_fulfilled: Option<bool>,
    text_value: Option<&str>,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO channel_review.message_criteria
        (message_id, criterion_id, count_value, is_fulfilled, text_value)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (message_id, criterion_id) DO NOTHING
        "#,
    )
    .bind(message_id)
    .bind(criterion_id)
    .bind(count_value)
    .bind(is_fulfilled)
    .bind(text_value)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        username: String,
        channel_id: String,
        channel: Option<String>,
        message_key: Option<String>,
        content: String,
        sent_at: Option<String>,
        criterion: String,
        criterion_type: Option<String>,
        count_value: Option<i32>,
        is_fulfilled: Option<bool>,
        text_value: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid row {}", line + 2))?;
        let user_id = upsert_user(pool, &row.username).await?;
        let message_key = row
            .message_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
        let message_id = upsert_message(
            pool,
            &MessageInput {
                message_key: &message_key,
                user_id,
                content: &row.content,
                channel: row.channel.as_deref(),
                channel_id: Some(&row.channel_id),
                sent_at: row.sent_at.as_deref(),
            },
        )
        .await?;
        let criterion_id = upsert_criterion(
            pool,
            &row.criterion,
            row.criterion_type.as_deref().unwrap_or("countable"),
        )
        .await?;

        if upsert_observation(
            pool,
            message_id,
            criterion_id,
            row.count_value,
            row.is_fulfilled,
            row.text_value.as_deref(),
        )
        .await?
        {
            inserted += 1;
        } else {
            debug!(message = %message_key, criterion = %row.criterion, "observation already stored");
        }
    }

    Ok(inserted)
}

fn into_record(value: Value) -> Record {
    match value {
        Value::Object(record) => record,
        _ => Record::new(),
    }
}

/// Loads messages, observations, criteria and users in the shape of the
/// default field mapping, optionally restricted to one channel.
pub async fn fetch_inputs(pool: &PgPool, channel: Option<&str>) -> anyhow::Result<ReviewInputs> {
    let mut message_query = String::from(
        "SELECT id, content, user_id, channel, message_key, channel_id, sent_at \
         FROM channel_review.messages",
    );
    let mut observation_query = String::from(
        "SELECT mc.id, mc.message_id, mc.criterion_id, mc.reviewed, \
         mc.count_value, mc.is_fulfilled, mc.text_value \
         FROM channel_review.message_criteria mc \
         JOIN channel_review.messages m ON m.id = mc.message_id",
    );

    if channel.is_some() {
        message_query.push_str(" WHERE channel_id = $1");
        observation_query.push_str(" WHERE m.channel_id = $1");
    }
    message_query.push_str(" ORDER BY id");
    observation_query.push_str(" ORDER BY mc.id");

    let mut messages = sqlx::query(&message_query);
    let mut observations = sqlx::query(&observation_query);
    if let Some(value) = channel {
        messages = messages.bind(value);
        observations = observations.bind(value);
    }

    let messages = messages
        .fetch_all(pool)
        .await
        .context("failed to load messages")?
        .into_iter()
        .map(|row| {
            into_record(json!({
                "id": row.get::<i32, _>("id"),
                "content": row.get::<String, _>("content"),
                "user_id": row.get::<i32, _>("user_id"),
                "channel": row.get::<Option<String>, _>("channel"),
                "message_key": row.get::<Option<String>, _>("message_key"),
                "channel_id": row.get::<Option<String>, _>("channel_id"),
                "sent_at": row.get::<Option<String>, _>("sent_at"),
            }))
        })
        .collect::<Vec<_>>();

    let observations = observations
        .fetch_all(pool)
        .await
        .context("failed to load message criteria")?
        .into_iter()
        .map(|row| {
            into_record(json!({
                "id": row.get::<i32, _>("id"),
                "message_id": row.get::<i32, _>("message_id"),
                "criterion_id": row.get::<i32, _>("criterion_id"),
                "reviewed": row.get::<bool, _>("reviewed"),
                "count_value": row.get::<Option<i32>, _>("count_value"),
                "is_fulfilled": row.get::<Option<bool>, _>("is_fulfilled"),
                "text_value": row.get::<Option<String>, _>("text_value"),
            }))
        })
        .collect::<Vec<_>>();

    let criteria = sqlx::query("SELECT id, name, type FROM channel_review.criteria ORDER BY id")
        .fetch_all(pool)
        .await
        .context("failed to load criteria")?
        .into_iter()
        .map(|row| {
            into_record(json!({
                "id": row.get::<i32, _>("id"),
                "name": row.get::<String, _>("name"),
                "type": row.get::<String, _>("type"),
            }))
        })
        .collect::<Vec<_>>();

    let users = sqlx::query("SELECT id, username, email FROM channel_review.users ORDER BY id")
        .fetch_all(pool)
        .await
        .context("failed to load users")?
        .into_iter()
        .map(|row| {
            into_record(json!({
                "id": row.get::<i32, _>("id"),
                "username": row.get::<String, _>("username"),
                "email": row.get::<Option<String>, _>("email"),
            }))
        })
        .collect::<Vec<_>>();

    info!(
        messages = messages.len(),
        observations = observations.len(),
        criteria = criteria.len(),
        users = users.len(),
        "loaded review inputs"
    );

    Ok(ReviewInputs {
        messages,
        observations,
        criteria,
        users,
    })
}
