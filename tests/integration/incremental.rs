//! 跨进程的增量恢复：缓存文件经磁盘往返

use yaoxiang_mono::mono::{CacheFile, IncrementalInput, InstantiationManager};
use yaoxiang_mono::util::config::MonoConfig;

use super::demo_package;

#[test]
fn test_restore_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("mono-cache.json");

    let mut first = InstantiationManager::new(demo_package().pkg, MonoConfig::default());
    first.instantiate_package().unwrap();
    first.persist().save(&cache_path).unwrap();
    let first_names: Vec<String> = first.instances().into_iter().map(|(n, _)| n).collect();

    let demo = demo_package();
    let mut input = IncrementalInput::new(Some(CacheFile::load(&cache_path).unwrap()));
    input.mark_unchanged("demo::Box");
    let mut second = InstantiationManager::new(demo.pkg, MonoConfig::default());
    let report = second.restore(input).unwrap();
    assert_eq!(report.restored.len(), 1);
    second.instantiate_package().unwrap();

    let second_names: Vec<String> = second.instances().into_iter().map(|(n, _)| n).collect();
    assert_eq!(first_names, second_names);
    assert_eq!(second.cache().stats().misses, 0);
}

#[test]
fn test_without_unchanged_templates_nothing_is_restored() {
    let mut first = InstantiationManager::new(demo_package().pkg, MonoConfig::default());
    first.instantiate_package().unwrap();
    let file = first.persist();

    let mut second = InstantiationManager::new(demo_package().pkg, MonoConfig::default());
    let report = second.restore(IncrementalInput::new(Some(file))).unwrap();
    assert!(report.restored.is_empty());
    assert_eq!(report.skipped, 1);
}
