//! 错误码
//!
//! 实例化阶段只会产生 E4xxx（泛型）类诊断；内部编译器错误（E8xxx）
//! 不经过诊断引擎，直接中止编译。

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Generic,  // E4xxx: 泛型与特质
    Internal, // E8xxx: 内部编译器错误
}

impl ErrorCategory {
    /// 根据错误码前缀判断类别
    pub fn of(code: &str) -> Option<Self> {
        match code.get(..2) {
            Some("E4") => Some(ErrorCategory::Generic),
            Some("E8") => Some(ErrorCategory::Internal),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            ErrorCategory::Generic => write!(f, "Generic"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

/// 无法为该声明生成测试桩
pub const MOCK_UNSUPPORTED_TARGET: &str = "E4101";
/// 测试桩目标已插桩
pub const MOCK_ALREADY_INSTRUMENTED: &str = "E4102";
/// 内部编译器错误
pub const INTERNAL_COMPILER_ERROR: &str = "E8001";
