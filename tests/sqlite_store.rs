use runtrack_lib::db::models::{NewRun, SortKey};
use runtrack_lib::db::Database;
use runtrack_lib::store::{RunStore, SqliteRunStore};
use tempfile::TempDir;

fn run(captured_at_ms: i64, distance: i32, duration_ms: i64, speed: f64, kcal: i32) -> NewRun {
    NewRun {
        captured_at_ms,
        avg_speed_kmh: speed,
        distance_meters: distance,
        duration_ms,
        calories_burned: kcal,
        thumbnail: vec![distance as u8],
    }
}

async fn open(dir: &TempDir) -> SqliteRunStore {
    let db = Database::new(dir.path().join("runs.sqlite3")).unwrap();
    SqliteRunStore::open(db).await.unwrap()
}

#[tokio::test]
async fn every_ordering_is_published_after_inserts() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;

    let feeds: Vec<_> = SortKey::ALL
        .into_iter()
        .map(|key| (key, store.subscribe(key)))
        .collect();
    for (_, feed) in &feeds {
        assert!(feed.borrow().is_empty());
    }

    store.insert(run(1_000, 3_000, 900_000, 12.0, 240)).await.unwrap();
    store.insert(run(2_000, 3_000, 1_500_000, 7.2, 240)).await.unwrap();
    store.insert(run(1_500, 10_000, 3_000_000, 12.0, 800)).await.unwrap();

    for (key, feed) in &feeds {
        let runs = feed.borrow().clone();
        assert_eq!(runs.len(), 3, "{key}");
        assert!(key.is_sorted(&runs), "{key} out of order");
    }

    // Equal distances fall back to the newest id first.
    let by_distance = store.subscribe(SortKey::Distance).borrow().clone();
    let ids: Vec<i64> = by_distance.iter().map(|run| run.id).collect();
    assert_eq!(ids, vec![3, 2, 1]);
}

#[tokio::test]
async fn rejects_impossible_runs_without_publishing() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let feed = store.subscribe(SortKey::Date);

    assert!(store.insert(run(1, -5, 1, 1.0, 1)).await.is_err());
    assert!(store.insert(run(1, 5, 1, f64::NAN, 1)).await.is_err());
    assert!(feed.borrow().is_empty());
    assert!(!feed.has_changed().unwrap());
}

#[tokio::test]
async fn totals_and_lookups() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;

    let empty = store.totals().await.unwrap();
    assert_eq!(empty.run_count, 0);
    assert_eq!(empty.mean_avg_speed_kmh, 0.0);

    let first = store.insert(run(1_000, 2_000, 600_000, 12.0, 160)).await.unwrap();
    store.insert(run(2_000, 4_000, 1_800_000, 8.0, 320)).await.unwrap();

    let totals = store.totals().await.unwrap();
    assert_eq!(totals.run_count, 2);
    assert_eq!(totals.total_distance_meters, 6_000);
    assert_eq!(totals.total_duration_ms, 2_400_000);
    assert_eq!(totals.total_calories_burned, 480);
    assert!((totals.mean_avg_speed_kmh - 10.0).abs() < 1e-9);

    let fetched = store.database().get_run(first.id).await.unwrap();
    assert_eq!(fetched, Some(first.clone()));

    store.delete(first.id).await.unwrap();
    assert_eq!(store.database().get_run(first.id).await.unwrap(), None);
    assert!(store.delete(first.id).await.is_err());
    assert_eq!(store.subscribe(SortKey::Date).borrow().len(), 1);
}
