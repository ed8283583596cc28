//! 公开 API 的端到端实例化

use yaoxiang_mono::mono::{InstantiationManager, TypeSubstitution};
use yaoxiang_mono::tree::Ty;
use yaoxiang_mono::util::config::MonoConfig;
use yaoxiang_mono::{load_package, save_package};

use super::demo_package;

#[test]
fn test_instantiate_demo_package() {
    let demo = demo_package();
    let mut manager = InstantiationManager::new(demo.pkg, MonoConfig::default());
    let summary = manager.instantiate_package().unwrap();
    assert!(summary.broken.is_empty());

    let names: Vec<String> = manager.instances().into_iter().map(|(n, _)| n).collect();
    assert!(names.contains(&"Box<Int64>".to_string()));
    assert!(names.contains(&"Box<Int64>::get".to_string()));
    assert_eq!(manager.all_instantiations_of(demo.get).len(), 1);
}

#[test]
fn test_explicit_request_matches_package_run() {
    let demo = demo_package();
    let params = demo.pkg.decl(demo.boxed).own_param_ids();
    let subst = TypeSubstitution::from_args(&params, &[Ty::int64()]).unwrap();

    let mut manager = InstantiationManager::new(demo.pkg, MonoConfig::default());
    let inst = manager.get_or_instantiate(demo.boxed, subst).unwrap();
    manager.instantiate_package().unwrap();
    assert_eq!(manager.all_instantiations_of(demo.boxed), vec![inst]);
}

#[test]
fn test_package_files_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let demo = demo_package();

    for name in ["demo.json", "demo.ron"] {
        let path = dir.path().join(name);
        save_package(&demo.pkg, &path).unwrap();
        let loaded = load_package(&path).unwrap();
        assert_eq!(loaded.name, "demo");
        assert_eq!(loaded.stable_path(demo.get), "demo::Box::get");
    }
}

#[test]
fn test_unreadable_package_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    let err = load_package(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("broken.json"));
}
