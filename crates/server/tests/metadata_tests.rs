//! Metadata store behavior shared by the SQLite and PostgreSQL backends.

mod common;

use common::run_metadata_test_both;
use std::sync::Arc;
use stowage_core::{IdempotencyKey, IdempotencyStatus, OwnerId};
use stowage_metadata::{FileRepo, IdempotencyRepo, MetadataError, MetadataStore, NewFileRow};
use time::{Duration, OffsetDateTime};

fn owner(id: i64) -> OwnerId {
    OwnerId::new(id).unwrap()
}

fn file_for(user_id: i64, stored: &str, uploaded_at: OffsetDateTime) -> NewFileRow {
    NewFileRow {
        user_id,
        original_filename: "report.pdf".to_string(),
        stored_filename: stored.to_string(),
        content_type: "application/pdf".to_string(),
        file_size: 1234,
        storage_url: format!("http://minio:9000/uploads/{stored}"),
        bucket_name: "uploads".to_string(),
        uploaded_at,
    }
}

#[tokio::test]
async fn test_duplicate_insert_is_already_exists() {
    run_metadata_test_both(|store: Arc<dyn MetadataStore>| async move {
        let key = IdempotencyKey::new();
        let now = OffsetDateTime::now_utc();

        let first = store
            .insert_in_progress(owner(1), key, None, now)
            .await
            .unwrap();
        assert_eq!(first.status().unwrap(), IdempotencyStatus::InProgress);

        let err = store
            .insert_in_progress(owner(1), key, None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::AlreadyExists(_)), "{err}");

        // Same key, different owner is a separate record.
        store
            .insert_in_progress(owner(2), key, None, now)
            .await
            .unwrap();
    })
    .await;
}

#[tokio::test]
async fn test_transitions_are_guarded() {
    run_metadata_test_both(|store: Arc<dyn MetadataStore>| async move {
        let now = OffsetDateTime::now_utc();
        let row = store
            .insert_in_progress(owner(1), IdempotencyKey::new(), None, now)
            .await
            .unwrap();

        // Only a failed record can be reset.
        assert!(!store.reset_for_retry(row.id, now).await.unwrap());
        assert!(store.mark_failed(row.id, "boom", now).await.unwrap());
        assert!(!store.mark_failed(row.id, "again", now).await.unwrap());
        assert!(store.reset_for_retry(row.id, now).await.unwrap());
        assert!(!store.reset_for_retry(row.id, now).await.unwrap());

        // Completion requires the attempt's file to be attached.
        assert!(!store.mark_completed(row.id, 7, "{}", now).await.unwrap());
        assert!(store.attach_file(row.id, 7, now).await.unwrap());
        assert!(store.mark_completed(row.id, 7, "{\"x\":1}", now).await.unwrap());
        assert!(!store.mark_completed(row.id, 8, "{}", now).await.unwrap());
        assert!(!store.mark_failed(row.id, "late", now).await.unwrap());

        let stored = store
            .find_by_owner_and_key(owner(1), row.key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status().unwrap(), IdempotencyStatus::Completed);
        assert_eq!(stored.file_id, Some(7));
        assert_eq!(stored.response_json.as_deref(), Some("{\"x\":1}"));
        assert!(stored.error_message.is_none());
    })
    .await;
}

#[tokio::test]
async fn test_file_pointer_guards_retry_and_completion() {
    run_metadata_test_both(|store: Arc<dyn MetadataStore>| async move {
        let now = OffsetDateTime::now_utc();
        let earlier = now - Duration::minutes(1);
        let row = store
            .insert_in_progress(owner(1), IdempotencyKey::new(), None, earlier)
            .await
            .unwrap();

        assert!(store.attach_file(row.id, 11, earlier).await.unwrap());
        assert!(!store.attach_file(row.id, 12, earlier).await.unwrap());
        assert!(store.mark_failed(row.id, "timeout", earlier).await.unwrap());

        // The failed attempt's file blocks the retry until it is detached.
        assert!(!store.reset_for_retry(row.id, now).await.unwrap());
        let leftovers = store.find_failed_with_file(10).await.unwrap();
        assert_eq!(leftovers.len(), 1);
        assert_eq!(leftovers[0].file_id, Some(11));

        assert!(!store.detach_file(row.id, 12, now).await.unwrap());
        assert!(store.detach_file(row.id, 11, now).await.unwrap());
        assert!(store.find_failed_with_file(10).await.unwrap().is_empty());
        assert!(store.reset_for_retry(row.id, now).await.unwrap());

        // The old attempt's file cannot complete the retried record.
        assert!(!store.mark_completed(row.id, 11, "{}", now).await.unwrap());
        assert!(!store.detach_file(row.id, 11, now).await.unwrap());
        assert!(store.attach_file(row.id, 13, now).await.unwrap());
        assert!(store.mark_completed(row.id, 13, "{}", now).await.unwrap());
    })
    .await;
}

#[tokio::test]
async fn test_stale_queries_use_both_timestamps() {
    run_metadata_test_both(|store: Arc<dyn MetadataStore>| async move {
        let now = OffsetDateTime::now_utc();
        let old = now - Duration::minutes(10);
        let threshold = now - Duration::minutes(5);

        let stale = store
            .insert_in_progress(owner(1), IdempotencyKey::new(), None, old)
            .await
            .unwrap();
        let retried = store
            .insert_in_progress(owner(1), IdempotencyKey::new(), None, old)
            .await
            .unwrap();
        store.mark_failed(retried.id, "boom", old).await.unwrap();
        store.reset_for_retry(retried.id, now).await.unwrap();
        store
            .insert_in_progress(owner(1), IdempotencyKey::new(), None, now)
            .await
            .unwrap();

        let found = store
            .find_stale(IdempotencyStatus::InProgress, threshold, 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stale.id);
        assert_eq!(
            store
                .count_stale(IdempotencyStatus::InProgress, threshold)
                .await
                .unwrap(),
            1
        );
    })
    .await;
}

#[tokio::test]
async fn test_retention_delete_skips_in_progress() {
    run_metadata_test_both(|store: Arc<dyn MetadataStore>| async move {
        let long_ago = OffsetDateTime::now_utc() - Duration::days(40);
        let cutoff = OffsetDateTime::now_utc() - Duration::days(30);

        let done = store
            .insert_in_progress(owner(1), IdempotencyKey::new(), None, long_ago)
            .await
            .unwrap();
        store.attach_file(done.id, 1, long_ago).await.unwrap();
        assert!(
            store
                .mark_completed(done.id, 1, "{}", long_ago)
                .await
                .unwrap()
        );
        let running = store
            .insert_in_progress(owner(1), IdempotencyKey::new(), None, long_ago)
            .await
            .unwrap();

        let deleted = store
            .delete_older_than(
                &[IdempotencyStatus::Completed, IdempotencyStatus::Failed],
                cutoff,
            )
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(
            store
                .find_by_owner_and_key(owner(1), running.key())
                .await
                .unwrap()
                .is_some()
        );
    })
    .await;
}

#[tokio::test]
async fn test_files_are_listed_newest_first_per_owner() {
    run_metadata_test_both(|store: Arc<dyn MetadataStore>| async move {
        let base = OffsetDateTime::now_utc() - Duration::hours(1);
        let mut ids = Vec::new();
        for i in 0..3 {
            let row = store
                .insert_file(&file_for(
                    1,
                    &format!("user-1/{i}.pdf"),
                    base + Duration::minutes(i),
                ))
                .await
                .unwrap();
            ids.push(row.id);
        }
        store
            .insert_file(&file_for(2, "user-2/x.pdf", base))
            .await
            .unwrap();

        let page = store.list_files_for_owner(owner(1), 2, 0).await.unwrap();
        assert_eq!(
            page.iter().map(|f| f.id).collect::<Vec<_>>(),
            vec![ids[2], ids[1]]
        );
        let rest = store.list_files_for_owner(owner(1), 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, ids[0]);
        assert_eq!(store.count_files_for_owner(owner(1)).await.unwrap(), 3);

        assert!(store.get_file_for_owner(ids[0], owner(2)).await.unwrap().is_none());
        assert!(store.delete_file(ids[0]).await.unwrap());
        assert!(!store.delete_file(ids[0]).await.unwrap());
    })
    .await;
}
