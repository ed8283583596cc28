//! 命令行测试

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use yaoxiang_mono::save_package;

use super::demo_package;

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_yaoxiang-mono"))
}

fn run_in(
    dir: &Path,
    args: &[&str],
) -> Output {
    Command::new(binary())
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to spawn yaoxiang-mono")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write_demo(dir: &Path) {
    save_package(&demo_package().pkg, &dir.join("demo.json")).unwrap();
}

#[test]
fn test_version() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_in(dir.path(), &["version"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_instantiate_lists_instances() {
    let dir = tempfile::tempdir().unwrap();
    write_demo(dir.path());
    let output = run_in(dir.path(), &["instantiate", "demo.json", "-o", "out.json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let text = stdout(&output);
    assert!(text.contains("Box<Int64>"));
    assert!(text.contains("Box<Int64>::get"));
    let written = yaoxiang_mono::load_package(&dir.path().join("out.json")).unwrap();
    assert!(written.decl_count() > demo_package().pkg.decl_count());
}

#[test]
fn test_cache_roundtrip_through_cli() {
    let dir = tempfile::tempdir().unwrap();
    write_demo(dir.path());
    let first = run_in(
        dir.path(),
        &["instantiate", "demo.json", "--save-cache", "cache.json"],
    );
    assert!(first.status.success());

    let inspect = run_in(dir.path(), &["inspect-cache", "cache.json"]);
    assert!(inspect.status.success());
    let text = stdout(&inspect);
    assert!(text.contains("package: demo"));
    assert!(text.contains("Box<Int64>"));

    let second = run_in(
        dir.path(),
        &[
            "instantiate",
            "demo.json",
            "--cache",
            "cache.json",
            "--unchanged",
            "demo::Box",
        ],
    );
    assert!(second.status.success());
    assert!(stdout(&second).contains("restored 1 instance(s)"));
}

#[test]
fn test_mock_of_field_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_demo(dir.path());
    let output = run_in(
        dir.path(),
        &["instantiate", "demo.json", "--mock", "demo::Box::value"],
    );
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("E4101"));
}

#[test]
fn test_project_config_is_read() {
    let dir = tempfile::tempdir().unwrap();
    write_demo(dir.path());
    std::fs::write(dir.path().join("yaoxiang.toml"), "[mono]\nmax_instantiation_depth = \"deep\"\n").unwrap();
    let output = run_in(dir.path(), &["instantiate", "demo.json"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("yaoxiang.toml"));
}

#[test]
fn test_missing_package() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_in(dir.path(), &["instantiate", "absent.json"]);
    assert_eq!(output.status.code(), Some(1));
}
