mod support;

use std::sync::Arc;

use chrono::{Duration, Utc};
use hmv_core::{AchievementRecord, Difficulty, WriteupRecord};
use hmv_sync::{
    HmvConfig, ListingLevel, MachineQuery, SyncError, SyncOrchestrator, WriteupRefresh,
};
use support::{authenticated, fixture, FakeSite};

const HEADER: &str = "id,nickname,date,vm_title,difficulty,rank";

fn achievement(id: u64) -> AchievementRecord {
    AchievementRecord {
        id,
        nickname: format!("user{id}"),
        date: "2021-03-01".into(),
        vm_title: "Gift".into(),
        difficulty: "easy".into(),
        rank: "5".into(),
    }
}

fn dataset(ids: &[u64]) -> String {
    let mut text = format!("{HEADER}\n");
    for id in ids {
        text.push_str(&format!("{id},user{id},2021-03-01,Gift,easy,5\n"));
    }
    text
}

#[tokio::test]
async fn achievement_sync_appends_only_newer_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = HmvConfig::with_home(dir.path());
    let cache = config.achievement_cache();
    let seeded: Vec<_> = (1..=5).map(achievement).collect();
    cache.append(&seeded).await.unwrap();
    let before = std::fs::read_to_string(cache.path()).unwrap();

    let site = Arc::new(FakeSite::new());
    site.on_get(&config.endpoints().achievements, dataset(&[1, 2, 3, 4, 5, 6, 7, 8]));
    let orchestrator = SyncOrchestrator::from_config(&config);

    let report = orchestrator.sync_achievements(&site, None).await.unwrap();
    assert_eq!(report.start_id, 5);
    assert_eq!(report.fetched, 3);
    assert_eq!(report.appended, 3);

    let after = std::fs::read_to_string(cache.path()).unwrap();
    assert!(after.starts_with(&before));
    assert_eq!(after.lines().next(), Some(HEADER));
    assert_eq!(after.matches(HEADER).count(), 1);
    let ids: Vec<u64> = orchestrator
        .read_achievements()
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(cache.last_id().await, 8);
}

#[tokio::test]
async fn repeated_sync_without_new_rows_leaves_cache_identical() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = HmvConfig::with_home(dir.path());
    let site = Arc::new(FakeSite::new());
    site.on_get(&config.endpoints().achievements, fixture("achievements/achievements.csv"));
    let orchestrator = SyncOrchestrator::from_config(&config);

    let first = orchestrator.sync_achievements(&site, None).await.unwrap();
    assert_eq!(first.appended, 7);
    assert_eq!(first.skipped_rows, 2);
    let snapshot = std::fs::read(config.achievements_path()).unwrap();

    let second = orchestrator.sync_achievements(&site, None).await.unwrap();
    assert_eq!(second.start_id, 8);
    assert_eq!(second.appended, 0);
    assert_eq!(std::fs::read(config.achievements_path()).unwrap(), snapshot);
}

#[tokio::test]
async fn start_override_below_cache_does_not_duplicate_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = HmvConfig::with_home(dir.path());
    config
        .achievement_cache()
        .append(&(1..=5).map(achievement).collect::<Vec<_>>())
        .await
        .unwrap();
    let site = Arc::new(FakeSite::new());
    site.on_get(&config.endpoints().achievements, dataset(&[3, 4, 5, 6, 7]));
    let orchestrator = SyncOrchestrator::from_config(&config);

    let report = orchestrator.sync_achievements(&site, Some(2)).await.unwrap();
    assert_eq!(report.start_id, 2);
    assert_eq!(report.fetched, 5);
    assert_eq!(report.appended, 2);
    assert_eq!(orchestrator.read_achievements().await.unwrap().len(), 7);
}

#[tokio::test]
async fn failed_dataset_fetch_leaves_no_cache_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = HmvConfig::with_home(dir.path());
    let site = Arc::new(FakeSite::new());
    site.on_get_status(&config.endpoints().achievements, 500);
    let orchestrator = SyncOrchestrator::from_config(&config);

    let err = orchestrator.sync_achievements(&site, None).await.unwrap_err();
    assert!(matches!(err, SyncError::Fetch(_)));
    assert!(!orchestrator.has_achievements().await);
}

#[tokio::test]
async fn writeups_refresh_when_missing_then_stay_fresh() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = HmvConfig::with_home(dir.path());
    let site = Arc::new(FakeSite::new());
    let session = authenticated(&site, &config).await;
    site.on_get(&config.endpoints().writeups, fixture("writeups/writeupz.html"));
    let orchestrator = SyncOrchestrator::from_config(&config);
    assert!(!orchestrator.has_writeups().await);

    let outcome = orchestrator.refresh_writeups(&session, Utc::now()).await;
    assert_eq!(outcome, WriteupRefresh::Refreshed(3));
    assert!(orchestrator.has_writeups().await);
    let text = std::fs::read_to_string(config.writeups_path()).unwrap();
    assert_eq!(text.lines().next(), Some("vmname,author,language,writeup"));

    let gets_before = site.gets().len();
    assert_eq!(
        orchestrator.refresh_writeups(&session, Utc::now()).await,
        WriteupRefresh::Fresh
    );
    assert_eq!(site.gets().len(), gets_before);

    let gift = orchestrator.search_writeups("gIfT").await.unwrap();
    assert_eq!(gift.len(), 2);
    assert!(orchestrator.search_writeups("nothing").await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_or_failed_writeup_fetch_keeps_stale_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = HmvConfig::with_home(dir.path());
    let site = Arc::new(FakeSite::new());
    let session = authenticated(&site, &config).await;
    let cached = vec![WriteupRecord {
        vm_title: "Gift".into(),
        author: "zoe".into(),
        language: "English".into(),
        writeup_url: "https://hackmyvm.eu/w/1".into(),
    }];
    config.writeup_cache().replace_all(&cached).await.unwrap();
    let snapshot = std::fs::read(config.writeups_path()).unwrap();
    let later = Utc::now() + Duration::hours(48);
    let orchestrator = SyncOrchestrator::from_config(&config);

    site.on_get(
        &config.endpoints().writeups,
        "<html><body><table><tr><th>VM</th></tr></table></body></html>",
    );
    assert_eq!(
        orchestrator.refresh_writeups(&session, later).await,
        WriteupRefresh::EmptyFetch
    );
    assert_eq!(std::fs::read(config.writeups_path()).unwrap(), snapshot);

    site.on_get_status(&config.endpoints().writeups, 502);
    assert!(matches!(
        orchestrator.refresh_writeups(&session, later).await,
        WriteupRefresh::Failed(_)
    ));
    assert_eq!(std::fs::read(config.writeups_path()).unwrap(), snapshot);
    assert_eq!(orchestrator.read_writeups().await.unwrap(), cached);
}

#[tokio::test]
async fn listing_resolves_pages_and_rejects_out_of_range() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = HmvConfig::with_home(dir.path());
    let site = Arc::new(FakeSite::new());
    let session = authenticated(&site, &config).await;
    let orchestrator = SyncOrchestrator::from_config(&config);
    let probe_gets = site.gets().len();

    let page = orchestrator
        .list_machines(&session, &MachineQuery::default())
        .await
        .unwrap();
    assert_eq!(page.total_pages, 12);
    assert_eq!(page.machines.len(), 3);
    assert_eq!(page.skipped_rows, 2);
    assert_eq!(site.gets().len(), probe_gets + 1);

    let query = MachineQuery {
        page: 4,
        name: Some("door".into()),
        difficulty: Some(Difficulty::Medium),
        ..MachineQuery::default()
    };
    let page = orchestrator.list_machines(&session, &query).await.unwrap();
    assert_eq!(page.page, 4);
    assert_eq!(page.machines.len(), 1);
    assert_eq!(page.machines[0].name, "Hidden Door");
    let last = site.gets().pop().unwrap();
    assert_eq!(
        last.params,
        vec![
            ("p".to_string(), "4".to_string()),
            ("v".to_string(), "door".to_string()),
        ]
    );

    let err = orchestrator
        .list_machines(&session, &MachineQuery { page: 13, ..MachineQuery::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidPage { page: 13, total: 12 }));
}

#[tokio::test]
async fn level_filter_is_a_single_page() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = HmvConfig::with_home(dir.path());
    let site = Arc::new(FakeSite::new());
    let session = authenticated(&site, &config).await;
    let orchestrator = SyncOrchestrator::from_config(&config);
    let probe_gets = site.gets().len();

    let query = MachineQuery {
        level: Some(ListingLevel::Hacked),
        ..MachineQuery::default()
    };
    let page = orchestrator.list_machines(&session, &query).await.unwrap();
    assert_eq!(page.total_pages, 1);
    assert_eq!(site.gets().len(), probe_gets + 1);

    let err = orchestrator
        .list_machines(&session, &MachineQuery { page: 2, ..query })
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidPage { page: 2, total: 1 }));
    assert_eq!(site.gets().len(), probe_gets + 1);
}

#[tokio::test]
async fn export_numbers_full_listing_newest_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = HmvConfig::with_home(dir.path());
    let site = Arc::new(FakeSite::new());
    let session = authenticated(&site, &config).await;
    let orchestrator = SyncOrchestrator::from_config(&config);

    let machines = orchestrator.export_machines(&session).await.unwrap();
    let ids: Vec<u64> = machines.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![3, 2, 1]);
    assert_eq!(machines[0].download_url, "https://downloads.hackmyvm.eu/gift.zip");
    let last = site.gets().pop().unwrap();
    assert_eq!(last.params, vec![("l".to_string(), "all".to_string())]);
}

#[tokio::test]
async fn flag_submission_posts_flag_and_vm() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = HmvConfig::with_home(dir.path());
    let site = Arc::new(FakeSite::new());
    let session = authenticated(&site, &config).await;
    let check_flag = config.endpoints().check_flag;
    site.on_post(&check_flag, "Correct flag, well done", None);
    let orchestrator = SyncOrchestrator::from_config(&config);

    let verdict = orchestrator
        .submit_flag(&session, "Gift", "HMV{gift}")
        .await
        .unwrap();
    assert_eq!(verdict, hmv_sync::FlagVerdict::Correct);
    let post = site.posts().pop().unwrap();
    assert_eq!(post.url, check_flag);
    assert_eq!(
        post.params,
        vec![
            ("flag".to_string(), "HMV{gift}".to_string()),
            ("vm".to_string(), "Gift".to_string()),
        ]
    );
}
