//! 测试替身插桩
//!
//! 给目标函数及其全部实例加上 `mock` 注解，并重新运行重排。
//! 不支持的目标通过诊断引擎报告，跳过后继续处理其他目标。

use tracing::debug;

use super::error::MonoResult;
use super::InstantiationManager;
use crate::tree::{Annotation, DeclId};
use crate::util::diagnostic::codes::{MOCK_ALREADY_INSTRUMENTED, MOCK_UNSUPPORTED_TARGET};
use crate::util::diagnostic::error::Diagnostic;
use crate::util::diagnostic::DiagnosticEngine;

/// 插桩注解名
pub const MOCK_ANNOTATION: &str = "mock";

/// 插桩结果
#[derive(Debug, Clone, Default)]
pub struct MockReport {
    /// 被加上注解的声明（原型与实例）
    pub instrumented: Vec<DeclId>,
    /// 被拒绝的目标
    pub rejected: Vec<DeclId>,
}

impl InstantiationManager {
    /// 对目标及其全部实例插桩
    pub fn instrument_mocks(
        &mut self,
        targets: &[DeclId],
        diagnostics: &mut DiagnosticEngine,
    ) -> MonoResult<MockReport> {
        let mut report = MockReport::default();
        for &target in targets {
            let decl = self.pkg.decl(target);
            if !decl.is_func() || decl.attrs.compiler_added {
                diagnostics.emit(
                    Diagnostic::error(
                        MOCK_UNSUPPORTED_TARGET,
                        format!(
                            "cannot mock `{}`: only user-declared functions can be mocked",
                            self.pkg.display_name(target)
                        ),
                        decl.span,
                    )
                    .with_help("mock the function that uses this declaration instead"),
                );
                report.rejected.push(target);
                continue;
            }

            let template = self.template_of(target);
            let mut touched = vec![template];
            touched.extend(self.all_instantiations_of(template));

            for decl in touched {
                if self.pkg.decl(decl).has_annotation(MOCK_ANNOTATION) {
                    if decl == target {
                        diagnostics.emit(Diagnostic::warning(
                            MOCK_ALREADY_INSTRUMENTED,
                            format!("`{}` is already mocked", self.pkg.display_name(decl)),
                            self.pkg.decl(decl).span,
                        ));
                    }
                    continue;
                }
                self.pkg
                    .add_annotation(decl, Annotation::new(MOCK_ANNOTATION));
                report.instrumented.push(decl);
                if self.cache.is_instance(decl) {
                    let root = self.cache.owner_of(decl).unwrap_or(decl);
                    self.rearrange(root)?;
                }
            }
            debug!(
                "mocked {} ({} declaration(s))",
                self.pkg.display_name(target),
                report.instrumented.len()
            );
        }
        Ok(report)
    }
}
