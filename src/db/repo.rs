use super::model::{Job, JobRecord, ListSummary};
use super::StoreError;
use crate::model::{MediaKind, MediaRef, SourceMessage};
use chrono::NaiveDateTime;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use teloxide::types::MessageEntity;
use tracing::instrument;

pub type Pool = SqlitePool;
type Result<T> = std::result::Result<T, StoreError>;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = crate::config::expand_home(path_part);
    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // Prefer the sqlite:// form; create the file on first use.
    let mut rebuilt = format!("sqlite://{expanded_path}");
    match query_part {
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---- lists ----

#[instrument(skip_all)]
pub async fn create_list(pool: &Pool, name: &str) -> Result<i64> {
    let rec = sqlx::query("INSERT INTO lists (name) VALUES (?) RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await
        .map_err(|e| StoreError::from_insert(e, format!("list {name}")))?;
    Ok(rec.get("id"))
}

/// Delete a list and its destinations. Jobs naming the list are left alone.
/// Returns whether the list existed.
#[instrument(skip_all)]
pub async fn delete_list(pool: &Pool, name: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let list_id = sqlx::query_scalar::<_, i64>("SELECT id FROM lists WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(list_id) = list_id else {
        return Ok(false);
    };
    sqlx::query("DELETE FROM list_targets WHERE list_id = ?")
        .bind(list_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM lists WHERE id = ?")
        .bind(list_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(true)
}

#[instrument(skip_all)]
pub async fn list_names(pool: &Pool) -> Result<Vec<String>> {
    let names = sqlx::query_scalar::<_, String>("SELECT name FROM lists ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(names)
}

#[instrument(skip_all)]
pub async fn list_exists(pool: &Pool, name: &str) -> Result<bool> {
    let found = sqlx::query_scalar::<_, i64>("SELECT id FROM lists WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

#[instrument(skip_all)]
pub async fn list_summaries(pool: &Pool) -> Result<Vec<ListSummary>> {
    let rows = sqlx::query(
        "SELECT l.name AS name, COUNT(t.id) AS destinations \
         FROM lists l LEFT JOIN list_targets t ON t.list_id = l.id \
         GROUP BY l.id ORDER BY l.name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| ListSummary {
            name: row.get("name"),
            destinations: row.get("destinations"),
        })
        .collect())
}

/// Append a destination to a list. Duplicates within a list are accepted.
#[instrument(skip_all)]
pub async fn add_destination(pool: &Pool, list_name: &str, identifier: &str) -> Result<()> {
    let list_id = sqlx::query_scalar::<_, i64>("SELECT id FROM lists WHERE name = ?")
        .bind(list_name)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::MissingList(list_name.to_string()))?;
    sqlx::query("INSERT INTO list_targets (list_id, peer) VALUES (?, ?)")
        .bind(list_id)
        .bind(identifier)
        .execute(pool)
        .await?;
    Ok(())
}

/// Destinations of a list in insertion order; empty when the list is unknown.
#[instrument(skip_all)]
pub async fn destinations_of(pool: &Pool, list_name: &str) -> Result<Vec<String>> {
    let peers = sqlx::query_scalar::<_, String>(
        "SELECT t.peer FROM list_targets t JOIN lists l ON l.id = t.list_id \
         WHERE l.name = ? ORDER BY t.id",
    )
    .bind(list_name)
    .fetch_all(pool)
    .await?;
    Ok(peers)
}

/// Destinations of every list, grouped by list name order.
#[instrument(skip_all)]
pub async fn all_destinations(pool: &Pool) -> Result<Vec<String>> {
    let peers = sqlx::query_scalar::<_, String>(
        "SELECT t.peer FROM list_targets t JOIN lists l ON l.id = t.list_id \
         ORDER BY l.name, t.id",
    )
    .fetch_all(pool)
    .await?;
    Ok(peers)
}

// ---- config ----

#[instrument(skip_all)]
pub async fn get_config(pool: &Pool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

#[instrument(skip_all)]
pub async fn set_config(pool: &Pool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO config (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

// ---- jobs ----

#[instrument(skip_all)]
pub async fn create_job(pool: &Pool, job: &Job) -> Result<()> {
    sqlx::query("INSERT INTO jobs (job_name, list_name, seconds) VALUES (?, ?, ?)")
        .bind(&job.name)
        .bind(&job.list_name)
        .bind(job.interval_secs)
        .execute(pool)
        .await
        .map_err(|e| StoreError::from_insert(e, format!("job {}", job.name)))?;
    Ok(())
}

/// Returns whether a row was removed.
#[instrument(skip_all)]
pub async fn delete_job(pool: &Pool, name: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM jobs WHERE job_name = ?")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn all_jobs(pool: &Pool) -> Result<Vec<Job>> {
    Ok(job_records(pool).await?.into_iter().map(|r| r.job).collect())
}

#[instrument(skip_all)]
pub async fn job_records(pool: &Pool) -> Result<Vec<JobRecord>> {
    let rows = sqlx::query(
        "SELECT job_name, list_name, seconds, created_at FROM jobs ORDER BY job_name",
    )
    .fetch_all(pool)
    .await?;
    let records = rows
        .into_iter()
        .map(|row| {
            let created: NaiveDateTime = row.get("created_at");
            JobRecord {
                job: Job {
                    name: row.get("job_name"),
                    list_name: row.get("list_name"),
                    interval_secs: row.get("seconds"),
                },
                created_at: created.and_utc(),
            }
        })
        .collect();
    Ok(records)
}

// ---- source history ----

/// Store (or refresh) a message seen in `chat_id`, keeping at most
/// `history_limit` newest messages for that chat.
#[instrument(skip_all, fields(chat_id = chat_id, message_id = msg.id))]
pub async fn record_source_message(
    pool: &Pool,
    chat_id: i64,
    msg: &SourceMessage,
    history_limit: i64,
) -> Result<()> {
    let entities = serde_json::to_string(&msg.entities)
        .map_err(|e| StoreError::Corrupt(format!("entities: {e}")))?;
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO source_messages (chat_id, message_id, album_id, text, entities, media_kind, file_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(chat_id, message_id) DO UPDATE SET \
            album_id = excluded.album_id, text = excluded.text, entities = excluded.entities, \
            media_kind = excluded.media_kind, file_id = excluded.file_id",
    )
    .bind(chat_id)
    .bind(msg.id)
    .bind(msg.album_id.as_deref())
    .bind(&msg.text)
    .bind(entities)
    .bind(msg.media.as_ref().map(|m| m.kind.as_str()))
    .bind(msg.media.as_ref().map(|m| m.file_id.as_str()))
    .execute(&mut *tx)
    .await?;
    if history_limit > 0 {
        sqlx::query(
            "DELETE FROM source_messages WHERE chat_id = ? AND message_id NOT IN \
             (SELECT message_id FROM source_messages WHERE chat_id = ? ORDER BY message_id DESC LIMIT ?)",
        )
        .bind(chat_id)
        .bind(chat_id)
        .bind(history_limit)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn latest_source_message(pool: &Pool, chat_id: i64) -> Result<Option<SourceMessage>> {
    let row = sqlx::query(
        "SELECT message_id, album_id, text, entities, media_kind, file_id FROM source_messages \
         WHERE chat_id = ? ORDER BY message_id DESC LIMIT 1",
    )
    .bind(chat_id)
    .fetch_optional(pool)
    .await?;
    row.map(|r| source_message_from_row(&r)).transpose()
}

/// Messages of `chat_id` with ids in `[min_id, max_id]`, ascending.
#[instrument(skip_all)]
pub async fn source_messages_between(
    pool: &Pool,
    chat_id: i64,
    min_id: i32,
    max_id: i32,
) -> Result<Vec<SourceMessage>> {
    let rows = sqlx::query(
        "SELECT message_id, album_id, text, entities, media_kind, file_id FROM source_messages \
         WHERE chat_id = ? AND message_id BETWEEN ? AND ? ORDER BY message_id",
    )
    .bind(chat_id)
    .bind(min_id)
    .bind(max_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(source_message_from_row).collect()
}

fn source_message_from_row(row: &SqliteRow) -> Result<SourceMessage> {
    let id: i32 = row.get("message_id");
    let entities_json: String = row.get("entities");
    let entities: Vec<MessageEntity> = serde_json::from_str(&entities_json)
        .map_err(|e| StoreError::Corrupt(format!("entities of message {id}: {e}")))?;
    let media_kind: Option<String> = row.get("media_kind");
    let file_id: Option<String> = row.get("file_id");
    let media = match (media_kind, file_id) {
        (Some(kind), Some(file_id)) => {
            let kind = MediaKind::parse_kind(&kind)
                .ok_or_else(|| StoreError::Corrupt(format!("media kind {kind}")))?;
            Some(MediaRef { kind, file_id })
        }
        _ => None,
    };
    Ok(SourceMessage {
        id,
        album_id: row.get("album_id"),
        text: row.get("text"),
        entities,
        media,
    })
}
