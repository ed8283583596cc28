//! 测试桩插桩测试

use super::{box_fixture, manager};
use crate::mono::mock::MOCK_ANNOTATION;
use crate::util::diagnostic::codes::{MOCK_ALREADY_INSTRUMENTED, MOCK_UNSUPPORTED_TARGET};
use crate::util::diagnostic::{DiagnosticEngine, Severity};

#[test]
fn test_mock_template_and_instances() {
    let fx = box_fixture();
    let mut m = manager(fx.pkg);
    m.instantiate_package().unwrap();
    let get_inst = m.all_instantiations_of(fx.get)[0];

    let mut diagnostics = DiagnosticEngine::new();
    let report = m.instrument_mocks(&[fx.get], &mut diagnostics).unwrap();
    assert_eq!(report.instrumented, vec![fx.get, get_inst]);
    assert!(report.rejected.is_empty());
    assert!(diagnostics.diagnostics().is_empty());

    assert!(m.package().decl(fx.get).has_annotation(MOCK_ANNOTATION));
    assert!(m.package().decl(get_inst).has_annotation(MOCK_ANNOTATION));
}

#[test]
fn test_mock_through_instance() {
    let fx = box_fixture();
    let mut m = manager(fx.pkg);
    m.instantiate_package().unwrap();
    let get_inst = m.all_instantiations_of(fx.get)[0];

    // 以实例为目标时同样作用到原型
    let mut diagnostics = DiagnosticEngine::new();
    let report = m.instrument_mocks(&[get_inst], &mut diagnostics).unwrap();
    assert_eq!(report.instrumented, vec![fx.get, get_inst]);
}

#[test]
fn test_mock_twice_warns() {
    let fx = box_fixture();
    let mut m = manager(fx.pkg);
    let mut diagnostics = DiagnosticEngine::new();
    m.instrument_mocks(&[fx.main], &mut diagnostics).unwrap();
    let report = m.instrument_mocks(&[fx.main], &mut diagnostics).unwrap();

    assert!(report.instrumented.is_empty());
    assert!(!diagnostics.has_errors());
    let warning = &diagnostics.diagnostics()[0];
    assert_eq!(warning.code, MOCK_ALREADY_INSTRUMENTED);
    assert_eq!(warning.severity, Severity::Warning);
}

#[test]
fn test_mock_rejects_non_functions() {
    let fx = box_fixture();
    let mut m = manager(fx.pkg);
    let mut diagnostics = DiagnosticEngine::new();
    let report = m
        .instrument_mocks(&[fx.value, fx.main], &mut diagnostics)
        .unwrap();

    // 报错后继续处理其他目标
    assert_eq!(report.rejected, vec![fx.value]);
    assert_eq!(report.instrumented, vec![fx.main]);
    assert_eq!(diagnostics.error_count(), 1);
    let error = &diagnostics.diagnostics()[0];
    assert_eq!(error.code, MOCK_UNSUPPORTED_TARGET);
    assert!(error.help.is_some());
    assert!(diagnostics.render().contains("E4101"));
}

#[test]
fn test_mock_rejects_compiler_added() {
    let mut fx = box_fixture();
    fx.pkg.decl_mut(fx.main).attrs.compiler_added = true;
    let mut m = manager(fx.pkg);
    let mut diagnostics = DiagnosticEngine::new();
    let report = m.instrument_mocks(&[fx.main], &mut diagnostics).unwrap();
    assert_eq!(report.rejected, vec![fx.main]);
    assert!(diagnostics.has_errors());
}
