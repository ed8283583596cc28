//! 实例化键与实例状态
//!
//! 键由泛型原型与规范化后的替换组成，按结构比较。

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ice;
use crate::mono::error::{InternalError, MonoResult};
use crate::mono::substitution::TypeSubstitution;
use crate::tree::{DeclId, Package};

/// 实例化缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstantiationKey {
    /// 泛型原型（永远不是实例）
    pub generic: DeclId,
    /// 限制在原型作用域参数上的替换
    pub subst: TypeSubstitution,
}

impl InstantiationKey {
    pub fn new(
        generic: DeclId,
        subst: TypeSubstitution,
    ) -> Self {
        Self { generic, subst }
    }

    /// 修饰名，如 `Box<Int64>`、`Pair<Int64, Bool>::swap<String>`
    ///
    /// 外层声明的参数挂在外层名字上，自身参数挂在自己名字上；
    /// 未被替换的参数保留参数名。
    pub fn mangle(
        &self,
        pkg: &Package,
    ) -> String {
        let mut chain = Vec::new();
        let mut cursor = Some(self.generic);
        while let Some(id) = cursor {
            chain.push(id);
            cursor = pkg.decl(id).parent;
        }
        chain.reverse();

        let mut out = String::new();
        for (i, id) in chain.iter().enumerate() {
            let decl = pkg.decl(*id);
            if i > 0 {
                out.push_str("::");
            }
            out.push_str(&decl.name);
            if decl.type_params.is_empty() {
                continue;
            }
            let args: Vec<String> = decl
                .type_params
                .iter()
                .map(|p| match self.subst.get(p.id) {
                    Some(ty) => ty.display(pkg).to_string(),
                    None => p.name.clone(),
                })
                .collect();
            out.push('<');
            out.push_str(&args.join(", "));
            out.push('>');
        }
        out
    }
}

impl fmt::Display for InstantiationKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}{:?}", self.generic, self.subst.iter().collect::<Vec<_>>())
    }
}

/// 每个实例化键的生命周期状态
///
/// - 正常路径: `NotInstantiated -> Instantiating -> Instantiated`
/// - 增量路径: `NotInstantiated -> Restored`
/// - 强制重建: `Instantiated | Restored -> Invalidated -> Instantiating`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstantiationState {
    NotInstantiated,
    /// 唯一允许重入查找返回占位句柄的状态
    Instantiating,
    Instantiated,
    Restored,
    Invalidated,
}

impl InstantiationState {
    pub fn can_transition_to(
        self,
        next: InstantiationState,
    ) -> bool {
        use InstantiationState::*;
        matches!(
            (self, next),
            (NotInstantiated, Instantiating)
                | (Instantiating, Instantiated)
                | (NotInstantiated, Restored)
                | (Instantiated, Invalidated)
                | (Restored, Invalidated)
                | (Invalidated, Instantiating)
        )
    }

    /// 校验并返回新状态
    pub fn transition(
        self,
        next: InstantiationState,
    ) -> MonoResult<InstantiationState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ice!(InternalError::IllegalTransition {
                from: self.to_string(),
                to: next.to_string(),
            }))
        }
    }

    /// 可作为查找结果返回
    pub fn is_complete(self) -> bool {
        matches!(
            self,
            InstantiationState::Instantiated | InstantiationState::Restored
        )
    }
}

impl fmt::Display for InstantiationState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            InstantiationState::NotInstantiated => "NotInstantiated",
            InstantiationState::Instantiating => "Instantiating",
            InstantiationState::Instantiated => "Instantiated",
            InstantiationState::Restored => "Restored",
            InstantiationState::Invalidated => "Invalidated",
        };
        write!(f, "{}", name)
    }
}
