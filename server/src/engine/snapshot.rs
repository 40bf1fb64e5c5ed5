use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Everything the widget shows, as of one successful refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub total_members: u64,
    pub online_members: u64,
    pub sample_members: Vec<MemberSample>,
    pub photos: Vec<MediaItem>,
    pub videos: Vec<MediaItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberSample {
    pub id: String,
    pub name: String,
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaItem {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSnapshot {
    pub updated_at: DateTime<Utc>,
    pub snapshot: Snapshot,
}

/// Single-writer cell holding the latest snapshot.
///
/// `None` until the first refresh succeeds. Writers publish a complete
/// `CachedSnapshot`; readers get an `Arc` to whichever value was current.
#[derive(Default)]
pub struct StatusCache {
    current: RwLock<Option<Arc<CachedSnapshot>>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<CachedSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_some()
    }

    /// Replace the cached value in one step.
    pub fn publish(&self, snapshot: Snapshot, updated_at: DateTime<Utc>) -> Arc<CachedSnapshot> {
        let cached = Arc::new(CachedSnapshot {
            updated_at,
            snapshot,
        });
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(cached.clone());
        cached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_starts_not_ready() {
        let cache = StatusCache::new();
        assert!(!cache.is_ready());
        assert!(cache.current().is_none());
    }

    #[test]
    fn test_publish_replaces_whole_snapshot() {
        let cache = StatusCache::new();
        let first = Snapshot {
            total_members: 10,
            online_members: 4,
            ..Default::default()
        };
        cache.publish(first, Utc::now());

        let held = cache.current().unwrap();

        let second = Snapshot {
            total_members: 11,
            online_members: 5,
            ..Default::default()
        };
        let at = Utc::now();
        cache.publish(second.clone(), at);

        // Earlier readers keep the value they were handed.
        assert_eq!(held.snapshot.total_members, 10);
        let now = cache.current().unwrap();
        assert_eq!(now.snapshot, second);
        assert_eq!(now.updated_at, at);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let snapshot = Snapshot {
            total_members: 3,
            online_members: 1,
            sample_members: vec![MemberSample {
                id: "1".into(),
                name: "Alice".into(),
                avatar: "https://cdn.example/a.png".into(),
            }],
            photos: vec![MediaItem {
                title: "cat.png".into(),
                url: "https://cdn.example/cat.png".into(),
            }],
            videos: vec![],
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["totalMembers"], 3);
        assert_eq!(json["onlineMembers"], 1);
        assert_eq!(json["sampleMembers"][0]["name"], "Alice");
        assert_eq!(json["photos"][0]["title"], "cat.png");
        assert!(json["videos"].as_array().unwrap().is_empty());
    }
}
