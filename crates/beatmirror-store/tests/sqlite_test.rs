//! Integration tests for SqliteStore against an in-memory database.

use beatmirror_store::{Ledger, MetadataStore, SqliteStore};
use beatmirror_types::ArchiveId;
use sqlx::sqlite::SqlitePoolOptions;

async fn create_store() -> SqliteStore {
  // A single connection keeps every query on the same in-memory database.
  let pool = SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("failed to open in-memory database");

  sqlx::query(
    r#"
        CREATE TABLE beatmap_sets (
            set_id INTEGER PRIMARY KEY NOT NULL,
            artist TEXT NOT NULL,
            title TEXT NOT NULL,
            disabled INTEGER NOT NULL DEFAULT 0
        )
        "#,
  )
  .execute(&pool)
  .await
  .expect("failed to create beatmap_sets");

  let store = SqliteStore::new(pool);
  store.migrate().await.expect("failed to migrate");
  store
}

async fn insert_set(store: &SqliteStore, set_id: i64, disabled: bool) {
  sqlx::query("INSERT INTO beatmap_sets (set_id, artist, title, disabled) VALUES (?, ?, ?, ?)")
    .bind(set_id)
    .bind("Artist")
    .bind("Title")
    .bind(disabled)
    .execute(store.pool())
    .await
    .expect("failed to insert set");
}

#[tokio::test]
async fn test_find_archive() {
  let store = create_store().await;
  insert_set(&store, 123, false).await;
  insert_set(&store, 124, true).await;

  let meta = store.find_archive(ArchiveId(123)).await.unwrap().unwrap();
  assert_eq!(meta.archive_id, ArchiveId(123));
  assert_eq!(meta.artist, "Artist");
  assert_eq!(meta.title, "Title");
  assert!(!meta.disabled);

  let disabled = store.find_archive(ArchiveId(124)).await.unwrap().unwrap();
  assert!(disabled.disabled);

  assert!(store.find_archive(ArchiveId(999)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_record_download_counts_every_call() {
  let store = create_store().await;
  let id = ArchiveId(123);

  assert!(store.ledger_entry(id).await.unwrap().is_none());

  let mut previous = None;
  for expected in 1..=5 {
    let entry = store.record_download(id).await.unwrap();
    assert_eq!(entry.archive_id, id);
    assert_eq!(entry.download_count, expected);
    if let Some(previous) = previous {
      assert!(entry.last_download_at >= previous);
    }
    previous = Some(entry.last_download_at);
  }

  let stored = store.ledger_entry(id).await.unwrap().unwrap();
  assert_eq!(stored.download_count, 5);
}

#[tokio::test]
async fn test_record_download_continues_from_existing_row() {
  let store = create_store().await;

  sqlx::query(
    "INSERT INTO cache_ledger (archive_id, download_count, last_download_at) VALUES (?, ?, ?)",
  )
  .bind(7_i64)
  .bind(40_i64)
  .bind(chrono::Utc::now())
  .execute(store.pool())
  .await
  .unwrap();

  for _ in 0..3 {
    store.record_download(ArchiveId(7)).await.unwrap();
  }

  let entry = store.ledger_entry(ArchiveId(7)).await.unwrap().unwrap();
  assert_eq!(entry.download_count, 43);
}

#[tokio::test]
async fn test_ledger_rows_are_per_archive() {
  let store = create_store().await;

  store.record_download(ArchiveId(1)).await.unwrap();
  store.record_download(ArchiveId(1)).await.unwrap();
  store.record_download(ArchiveId(2)).await.unwrap();

  assert_eq!(store.ledger_entry(ArchiveId(1)).await.unwrap().unwrap().download_count, 2);
  assert_eq!(store.ledger_entry(ArchiveId(2)).await.unwrap().unwrap().download_count, 1);
}
