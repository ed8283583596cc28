//! 文本诊断渲染器

use crate::util::diagnostic::{Diagnostic, ErrorCategory};

/// 渲染器配置
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// 是否显示帮助信息
    pub show_help: bool,
    /// 是否显示错误类别
    pub show_category: bool,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            show_help: true,
            show_category: false,
        }
    }
}

/// 文本诊断渲染器
#[derive(Debug, Clone, Default)]
pub struct TextEmitter {
    config: EmitterConfig,
}

impl TextEmitter {
    /// 创建新的文本渲染器
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用自定义配置创建渲染器
    pub fn with_config(config: EmitterConfig) -> Self {
        Self { config }
    }

    /// 渲染单个诊断
    ///
    /// ```text
    /// error[E4101]: cannot mock `Box`
    ///   --> [3:1 - 3:9]
    ///   = help: ...
    /// ```
    pub fn render(
        &self,
        diagnostic: &Diagnostic,
    ) -> String {
        let mut out = format!(
            "{}[{}]: {}",
            diagnostic.severity, diagnostic.code, diagnostic.message
        );
        if self.config.show_category {
            if let Some(category) = ErrorCategory::of(&diagnostic.code) {
                out.push_str(&format!(" ({})", category));
            }
        }
        if !diagnostic.span.is_dummy() {
            out.push_str(&format!("\n  --> {}", diagnostic.span));
        }
        if self.config.show_help {
            if let Some(help) = &diagnostic.help {
                out.push_str(&format!("\n  = help: {}", help));
            }
        }
        out
    }
}
