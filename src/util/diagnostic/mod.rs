//! 统一诊断系统
//!
//! 实例化相关的遍（测试桩插桩等）通过 [`DiagnosticEngine`] 报告面向用户的错误。
//! 内部一致性错误不走这里，见 `mono::error`。
//!
//! # 模块结构
//!
//! - [`error`] - 诊断数据结构 (Diagnostic, Severity)
//! - [`codes`] - 错误码
//! - [`emitter`] - 文本渲染

pub mod codes;
pub mod emitter;
pub mod error;

pub use codes::ErrorCategory;
pub use emitter::TextEmitter;
pub use error::{Diagnostic, Severity};

use crate::util::span::Span;

/// 诊断收集器
///
/// 一次编译会话共用一个；报告错误不会中断其他声明的处理。
#[derive(Debug, Default, Clone)]
pub struct DiagnosticEngine {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticEngine {
    /// 创建空收集器
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一条诊断
    pub fn emit(
        &mut self,
        diagnostic: Diagnostic,
    ) {
        tracing::debug!("diagnostic {}: {}", diagnostic.code, diagnostic.message);
        self.diagnostics.push(diagnostic);
    }

    /// 记录一条错误
    pub fn error(
        &mut self,
        code: &str,
        message: impl Into<String>,
        span: Span,
    ) {
        self.emit(Diagnostic::error(code, message, span));
    }

    /// 是否存在错误级别诊断
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity.is_error())
    }

    /// 错误数量
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity.is_error())
            .count()
    }

    /// 所有诊断
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// 取出所有诊断并清空
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// 渲染全部诊断
    pub fn render(&self) -> String {
        let emitter = TextEmitter::new();
        self.diagnostics
            .iter()
            .map(|d| emitter.render(d))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
