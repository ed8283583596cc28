//! 实例化错误
//!
//! 两类失败：
//! - `Broken`：先前阶段已报错的声明，静默传播，不产生新的诊断
//! - `Internal`：类型检查器与实例化引擎对良型性的看法不一致，属于编译器缺陷

use thiserror::Error;

use crate::tree::{CloneError, DeclId};

/// 内部一致性错误（编译器缺陷）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InternalError {
    #[error("同一实例化键注册了两个不同的声明: {key} -> {existing} / {incoming}")]
    DuplicateRegistration {
        key: String,
        existing: DeclId,
        incoming: DeclId,
    },

    #[error("缺少预期存在的映射: {0}")]
    MissingMapping(String),

    #[error("类型实参数量不匹配: {decl} 需要 {expected} 个, 实际 {found} 个")]
    ArityMismatch {
        decl: String,
        expected: usize,
        found: usize,
    },

    #[error("非法的实例化状态转换: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("抽象方法 {method} 在类型 {ty} 中没有实现")]
    UnresolvedDispatch { ty: String, method: String },

    #[error("抽象方法 {method} 在类型 {ty} 中有多个不兼容的实现: {candidates:?}")]
    AmbiguousDispatch {
        ty: String,
        method: String,
        candidates: Vec<String>,
    },

    #[error("实例化深度超过上限 {limit}（疑似循环替换）: {key}")]
    RecursionLimit { limit: usize, key: String },

    #[error("实例 {instance} 中存在指向泛型原型 {target} 的悬空引用")]
    DanglingReference { instance: String, target: String },

    #[error("未知声明: {0}")]
    UnknownDecl(DeclId),
}

/// 实例化结果错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonoError {
    /// 目标或其依赖已损坏
    #[error("声明 {0} 已损坏, 跳过实例化")]
    Broken(DeclId),

    #[error("内部编译器错误: {0}")]
    Internal(#[from] InternalError),
}

impl MonoError {
    pub fn is_internal(&self) -> bool {
        matches!(self, MonoError::Internal(_))
    }
}

impl From<CloneError> for MonoError {
    fn from(err: CloneError) -> Self {
        match err {
            CloneError::Broken(id) => MonoError::Broken(id),
        }
    }
}

pub type MonoResult<T> = Result<T, MonoError>;

/// 构造内部错误并记录日志
#[macro_export]
macro_rules! ice {
    ($err:expr) => {{
        let err: $crate::mono::error::InternalError = $err;
        tracing::error!("internal compiler error: {}", err);
        $crate::mono::error::MonoError::Internal(err)
    }};
}
