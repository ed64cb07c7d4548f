use emote_control_core::{
    binding::default_rules, BindingCache, ClipLibrary, ControlConfig, ControlEngine, ControlEvent,
    RawParameter,
};

fn aria_params() -> Vec<RawParameter> {
    emote_test_fixtures::models::load("aria").expect("load aria params")
}

fn mk_config(dir: &std::path::Path) -> ControlConfig {
    let mut cfg = ControlConfig::default();
    cfg.binding.cache_dir = dir.to_path_buf();
    cfg
}

/// it should produce identical tables and records for the same raw list
#[test]
fn repeated_loads_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let raw = aria_params();
    let rules = default_rules();

    let first = {
        let cache = BindingCache::new(dir.path()).unwrap();
        let table = cache.load("aria", &raw, &rules).unwrap();
        cache.flush();
        let rec = cache.read_record(table.content_hash()).unwrap().expect("record written");
        (table, rec)
    };
    let second = {
        let cache = BindingCache::new(dir.path()).unwrap();
        let table = cache.load("aria", &raw, &rules).unwrap();
        cache.flush();
        let rec = cache.read_record(table.content_hash()).unwrap().expect("record written");
        (table, rec)
    };

    assert_eq!(first.0, second.0);
    let (mut a, b) = (first.1, second.1);
    a.saved_at = b.saved_at;
    assert_eq!(a, b);
    assert!(dir
        .path()
        .join(format!("{}.bindings.json", first.0.content_hash()))
        .exists());
}

/// it should bring user edits back on the next load of the same model
#[test]
fn engine_edits_survive_reload() {
    let dir = tempfile::tempdir().unwrap();
    let raw = aria_params();
    {
        let mut engine =
            ControlEngine::load_cached("aria", &raw, ClipLibrary::new(), mk_config(dir.path()))
                .unwrap();
        let mut d = engine.bindings().get("brow_L").unwrap().clone();
        d.max = 0.5;
        d.default = 0.25;
        engine.edit_binding("brow_L", d).unwrap();
        engine.flush_cache();
    }

    let mut engine =
        ControlEngine::load_cached("aria", &raw, ClipLibrary::new(), mk_config(dir.path()))
            .unwrap();
    let d = engine.bindings().get("brow_L").unwrap();
    assert_eq!((d.min, d.max, d.default), (-1.0, 0.5, 0.25));
    assert_eq!(engine.tick(0.0).unwrap().get("brow_L"), Some(0.25));
}

/// it should rebind from scratch when the raw list changes
#[test]
fn changed_raw_list_misses_cache() {
    let dir = tempfile::tempdir().unwrap();
    let mut raw = aria_params();
    let cache = BindingCache::new(dir.path()).unwrap();
    let before = cache.load("aria", &raw, &default_rules()).unwrap();
    let edited = before
        .edit("brow_L", {
            let mut d = before.get("brow_L").unwrap().clone();
            d.default = 0.5;
            d
        })
        .unwrap();
    cache.persist(&edited);
    cache.flush();

    raw.push(RawParameter::new("ribbon_sway", 0.0, -1.0, 1.0));
    let after = cache.load("aria", &raw, &default_rules()).unwrap();
    assert_ne!(after.content_hash(), before.content_hash());
    assert_eq!(after.get("brow_L").unwrap().default, 0.0);
    assert!(after.contains("ribbon_sway"));
}

/// it should report a failed background write as an event and keep ticking
#[test]
fn persist_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"occupied").unwrap();

    let mut engine =
        ControlEngine::load_cached("aria", &aria_params(), ClipLibrary::new(), mk_config(&blocker))
            .unwrap();
    engine.flush_cache();
    let frame = engine.tick(0.0).unwrap();
    assert!(frame
        .events
        .iter()
        .any(|e| matches!(e, ControlEvent::CachePersistFailed { .. })));
    assert!(engine.tick(0.016).is_ok());
}
