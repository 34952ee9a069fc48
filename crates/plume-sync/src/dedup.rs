use std::collections::HashSet;

use plume_core::ContentRecord;
use plume_storage::ArticleStore;
use tracing::debug;

/// Keeps the records whose permalink is not stored yet, in input order. All
/// permalinks go to the store in one lookup; repeats within the batch keep only
/// their first occurrence.
pub async fn filter_new(records: Vec<ContentRecord>, store: &dyn ArticleStore) -> anyhow::Result<Vec<ContentRecord>> {
    if records.is_empty() {
        return Ok(records);
    }
    let permalinks: Vec<String> = records.iter().map(|r| r.permalink.clone()).collect();
    let mut seen: HashSet<String> = store.existing_permalinks(&permalinks).await?;
    let known = seen.len();

    let fresh: Vec<ContentRecord> = records
        .into_iter()
        .filter(|record| seen.insert(record.permalink.clone()))
        .collect();
    debug!(candidates = permalinks.len(), known, fresh = fresh.len(), "deduplicated batch");
    Ok(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use plume_core::{Article, Summary};
    use plume_storage::MemoryArticleStore;

    fn record(permalink: &str) -> ContentRecord {
        ContentRecord {
            identity: "rustlang".into(),
            permalink: permalink.into(),
            text: format!("text of {permalink}"),
            published_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap(),
            media: Vec::new(),
        }
    }

    #[tokio::test]
    async fn known_and_repeated_permalinks_are_dropped_in_order() {
        let store = MemoryArticleStore::new();
        let stored = Article::from_record(
            &record("https://x.com/a/status/2"),
            Summary {
                title: "t".into(),
                summary: "s".into(),
            },
            Utc::now(),
        );
        assert!(store.insert_if_absent(&stored).await.unwrap());

        let fresh = filter_new(
            vec![
                record("https://x.com/a/status/3"),
                record("https://x.com/a/status/2"),
                record("https://x.com/a/status/1"),
                record("https://x.com/a/status/3"),
            ],
            &store,
        )
        .await
        .unwrap();

        let links: Vec<_> = fresh.iter().map(|r| r.permalink.as_str()).collect();
        assert_eq!(links, ["https://x.com/a/status/3", "https://x.com/a/status/1"]);
        assert_eq!(store.lookup_calls(), 1);
    }

    #[tokio::test]
    async fn empty_batch_skips_lookup() {
        let store = MemoryArticleStore::new();
        assert!(filter_new(Vec::new(), &store).await.unwrap().is_empty());
        assert_eq!(store.lookup_calls(), 0);
    }
}
