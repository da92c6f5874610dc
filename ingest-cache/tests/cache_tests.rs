use ingest_cache::{IdentityCache, clean_destination};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

const TARGET: &str = "http://localhost:1080";
const PROJECT: &str = "SD_ME0WME0W";

// ── Naming ───────────────────────────────────────────────────────

#[test]
fn clean_destination_uses_netloc() {
    assert_eq!(clean_destination("http://localhost:1080"), "localhost_1080");
    assert_eq!(clean_destination("https://kf-api-dataservice.org/"), "kf-api-dataservice.org");
    assert_eq!(clean_destination("https://host:8080/path?q=1"), "host_8080");
}

#[test]
fn clean_destination_without_scheme_keeps_path() {
    assert_eq!(clean_destination("some/local:target"), "some_local_target");
}

#[test]
fn cache_path_is_scoped_by_destination_and_project() {
    let dir = TempDir::new().unwrap();
    let path = IdentityCache::cache_path(dir.path(), TARGET, PROJECT);
    assert_eq!(
        path.file_name().unwrap().to_str().unwrap(),
        "localhost_1080_SD_ME0WME0W_uid_cache.db"
    );
}

#[test]
fn cache_path_stays_inside_cache_dir() {
    let dir = TempDir::new().unwrap();
    for project in ["../../etc/passwd", "SD/ME0W", "C:\\temp", ".."] {
        let path = IdentityCache::cache_path(dir.path(), TARGET, project);
        assert_eq!(path.parent(), Some(dir.path()), "project id {project:?}");
    }
    let path = IdentityCache::cache_path(dir.path(), TARGET, "../SD");
    assert_eq!(
        path.file_name().unwrap().to_str().unwrap(),
        "localhost_1080_.._SD_uid_cache.db"
    );
}

// ── Get / put ────────────────────────────────────────────────────

#[test]
fn miss_then_hit() {
    let cache = IdentityCache::open_in_memory().unwrap();
    assert_eq!(cache.get("participant", "P7").unwrap(), None);

    assert!(cache.put("participant", "P7", "PT_00001", true).unwrap());
    assert_eq!(cache.get("participant", "P7").unwrap().as_deref(), Some("PT_00001"));
}

#[test]
fn rewriting_same_value_is_noop() {
    let cache = IdentityCache::open_in_memory().unwrap();
    assert!(cache.put("participant", "P7", "PT_00001", true).unwrap());
    assert!(!cache.put("participant", "P7", "PT_00001", true).unwrap());
    assert!(cache.put("participant", "P7", "PT_00002", true).unwrap());
    assert_eq!(cache.len("participant").unwrap(), 1);
}

#[test]
fn entity_types_are_separate_tables() {
    let cache = IdentityCache::open_in_memory().unwrap();
    cache.put("participant", "K", "PT_1", true).unwrap();
    assert_eq!(cache.get("biospecimen", "K").unwrap(), None);
}

#[test]
fn awkward_table_names_are_quoted() {
    let cache = IdentityCache::open_in_memory().unwrap();
    cache.put("weird \"type\"", "k", "v", true).unwrap();
    assert_eq!(cache.get("weird \"type\"", "k").unwrap().as_deref(), Some("v"));
}

// ── Persistence ──────────────────────────────────────────────────

#[test]
fn persisted_entries_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let cache = IdentityCache::open(dir.path(), TARGET, PROJECT).unwrap();
        cache.put("participant", "P7", "PT_00001", true).unwrap();
    }
    let cache = IdentityCache::open(dir.path(), TARGET, PROJECT).unwrap();
    assert_eq!(cache.get("participant", "P7").unwrap().as_deref(), Some("PT_00001"));
}

#[test]
fn dry_run_entries_stay_in_ram() {
    let dir = TempDir::new().unwrap();
    {
        let cache = IdentityCache::open(dir.path(), TARGET, PROJECT).unwrap();
        cache.put("participant", "P7", "DRY_participant_1", false).unwrap();
        assert_eq!(
            cache.get("participant", "P7").unwrap().as_deref(),
            Some("DRY_participant_1")
        );
        assert_eq!(cache.len("participant").unwrap(), 1);
        assert_eq!(cache.persisted_len("participant").unwrap(), 0);
    }
    let cache = IdentityCache::open(dir.path(), TARGET, PROJECT).unwrap();
    assert_eq!(cache.get("participant", "P7").unwrap(), None);
}

#[test]
fn priming_loads_existing_rows() {
    let dir = TempDir::new().unwrap();
    {
        let cache = IdentityCache::open(dir.path(), TARGET, PROJECT).unwrap();
        for i in 0..5 {
            cache
                .put("biospecimen", &format!("S{i}"), &format!("BS_{i}"), true)
                .unwrap();
        }
    }
    let cache = IdentityCache::open(dir.path(), TARGET, PROJECT).unwrap();
    assert_eq!(cache.len("biospecimen").unwrap(), 5);
    assert_eq!(cache.persisted_len("biospecimen").unwrap(), 5);
}

// ── Partitioning ─────────────────────────────────────────────────

#[test]
fn different_destinations_never_share_entries() {
    let dir = TempDir::new().unwrap();
    let a = IdentityCache::open(dir.path(), "http://alpha:5000", PROJECT).unwrap();
    a.put("participant", "P7", "PT_00001", true).unwrap();
    drop(a);

    let b = IdentityCache::open(dir.path(), "http://beta:5000", PROJECT).unwrap();
    assert_eq!(b.get("participant", "P7").unwrap(), None);
}

#[test]
fn different_projects_never_share_entries() {
    let dir = TempDir::new().unwrap();
    let a = IdentityCache::open(dir.path(), TARGET, "SD_AAAAAAAA").unwrap();
    a.put("participant", "P7", "PT_00001", true).unwrap();
    drop(a);

    let b = IdentityCache::open(dir.path(), TARGET, "SD_BBBBBBBB").unwrap();
    assert_eq!(b.get("participant", "P7").unwrap(), None);
}

// ── Clearing ─────────────────────────────────────────────────────

#[test]
fn clear_removes_the_file() {
    let dir = TempDir::new().unwrap();
    {
        let cache = IdentityCache::open(dir.path(), TARGET, PROJECT).unwrap();
        cache.put("participant", "P7", "PT_00001", true).unwrap();
    }
    assert!(IdentityCache::clear(dir.path(), TARGET, PROJECT).unwrap());
    assert!(!IdentityCache::clear(dir.path(), TARGET, PROJECT).unwrap());

    let cache = IdentityCache::open(dir.path(), TARGET, PROJECT).unwrap();
    assert_eq!(cache.get("participant", "P7").unwrap(), None);
}

// ── Concurrency ──────────────────────────────────────────────────

#[test]
fn concurrent_puts_of_same_key_change_once() {
    let cache = Arc::new(IdentityCache::open_in_memory().unwrap());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || cache.put("participant", "P1", "PT_1", true).unwrap())
        })
        .collect();
    let changed = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|changed| *changed)
        .count();
    assert_eq!(changed, 1);
    assert_eq!(cache.len("participant").unwrap(), 1);
}
