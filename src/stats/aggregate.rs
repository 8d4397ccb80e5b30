//! Read-side aggregation of counter groups into the stats report shape.
//!
//! The fold is a point-in-time snapshot: each counter is read independently
//! and no cross-counter consistency is implied.

use serde_json::{json, Map, Value};

use crate::stats::bucket::{BucketStats, StatKind, StatsSet};

/// Fold one group into a JSON object: overall values per declared kind plus
/// per-bucket children keyed by bucket name. Zero values are omitted.
pub fn group_to_json(group: &BucketStats) -> Value {
    let mut body = Map::new();
    let bucket_count = group.bucket_count();

    for decl in group.decls() {
        let overall = match decl.kind {
            StatKind::Worker => None,
            StatKind::Sum => Some(
                (0..bucket_count)
                    .map(|b| group.get(b, &decl.name))
                    .fold(0u64, u64::saturating_add),
            ),
            StatKind::Min { zero_missing } => {
                let values = (0..bucket_count)
                    .map(|b| group.get(b, &decl.name))
                    .filter(|v| !zero_missing || *v != 0);
                values.min()
            }
            StatKind::Max => (0..bucket_count).map(|b| group.get(b, &decl.name)).max(),
        };
        // The overall start time is parent-owned so that it reflects the
        // first worker ever started, not the latest restart.
        let overall = if decl.name == "start_time" {
            Some(group.overall_start_time())
        } else {
            overall
        };
        if let Some(value) = overall {
            if value != 0 {
                body.insert(decl.name.clone(), json!(value));
            }
        }
        for bucket in 0..bucket_count {
            let value = group.get(bucket, &decl.name);
            if value != 0 {
                let key = group.bucket_names()[bucket].clone();
                let child = body
                    .entry(key)
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(child) = child {
                    child.insert(decl.name.clone(), json!(value));
                }
            }
        }
    }

    Value::Object(body)
}

/// Fold every group into the full stats report: one object per sub-instance
/// keyed by its section name, plus the server's own start time.
pub fn snapshot(set: &StatsSet) -> Value {
    let mut body = Map::new();
    for group in set.groups() {
        body.insert(group.name().to_string(), group_to_json(&group));
    }
    body.insert("start_time".to_string(), json!(set.server_start_time()));
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::bucket::{GroupSpec, StatDecl};

    fn set_with(decls: Vec<StatDecl>) -> StatsSet {
        StatsSet::create(vec![GroupSpec {
            name: "wsgi".to_string(),
            bucket_names: vec!["0".to_string(), "1".to_string()],
            decls,
        }])
        .unwrap()
    }

    #[test]
    fn test_sum_folds_every_bucket() {
        let set = set_with(vec![StatDecl::new("requests", StatKind::Sum)]);
        let group = set.group(0);
        group.set(0, "requests", 2);
        group.set(1, "requests", 1);
        let body = group_to_json(&group);
        assert_eq!(body["requests"], 3);
        assert_eq!(body["0"]["requests"], 2);
        assert_eq!(body["1"]["requests"], 1);
    }

    #[test]
    fn test_max_fold() {
        let set = set_with(vec![StatDecl::new("last_called", StatKind::Max)]);
        let group = set.group(0);
        group.set(0, "last_called", 50);
        group.set(1, "last_called", 90);
        assert_eq!(group_to_json(&group)["last_called"], 90);
    }

    #[test]
    fn test_timestamp_min_ignores_zero_buckets() {
        let set = set_with(vec![StatDecl::new("first_seen", StatKind::timestamp_min())]);
        let group = set.group(0);
        group.set(1, "first_seen", 400);
        // Bucket 0 was never set; it must not drag the minimum to zero.
        assert_eq!(group_to_json(&group)["first_seen"], 400);
    }

    #[test]
    fn test_plain_min_lets_zero_participate() {
        let set = set_with(vec![StatDecl::new(
            "queue_low",
            StatKind::Min {
                zero_missing: false,
            },
        )]);
        let group = set.group(0);
        group.set(1, "queue_low", 12);
        // Overall minimum is zero, and zero values are omitted from output.
        let body = group_to_json(&group);
        assert!(body.get("queue_low").is_none());
        assert_eq!(body["1"]["queue_low"], 12);
    }

    #[test]
    fn test_worker_only_has_no_overall() {
        let set = set_with(vec![StatDecl::new("scratch", StatKind::Worker)]);
        let group = set.group(0);
        group.set(0, "scratch", 5);
        let body = group_to_json(&group);
        assert!(body.get("scratch").is_none());
        assert_eq!(body["0"]["scratch"], 5);
    }

    #[test]
    fn test_overall_start_time_comes_from_parent_slot() {
        let set = set_with(vec![StatDecl::new("start_time", StatKind::timestamp_min())]);
        let group = set.group(0);
        group.mark_started(100);
        // A restarted worker records a later personal start time.
        group.set(0, "start_time", 500);
        group.set(1, "start_time", 600);
        let body = group_to_json(&group);
        assert_eq!(body["start_time"], 100);
        assert_eq!(body["0"]["start_time"], 500);
    }

    #[test]
    fn test_snapshot_includes_server_start_time() {
        let set = set_with(vec![StatDecl::new("requests", StatKind::Sum)]);
        set.set_server_start_time(42);
        let body = snapshot(&set);
        assert_eq!(body["start_time"], 42);
        assert!(body["wsgi"].is_object());
    }
}
