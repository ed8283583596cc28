//! 类型替换
//!
//! 从类型参数到具体类型的有序映射。相等性与哈希都是结构性的：
//! 不同调用点各自构造的两个替换，只要映射相同就命中同一个缓存项。
//! 映射中没有的参数视为恒等（部分实例化依赖这一点）。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::ice;
use crate::mono::error::{InternalError, MonoResult};
use crate::tree::{IdMapper, Package, Ty, TypeParamId};

/// 类型替换
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<(TypeParamId, Ty)>", into = "Vec<(TypeParamId, Ty)>")]
pub struct TypeSubstitution {
    map: BTreeMap<TypeParamId, Ty>,
}

impl From<Vec<(TypeParamId, Ty)>> for TypeSubstitution {
    fn from(pairs: Vec<(TypeParamId, Ty)>) -> Self {
        Self {
            map: pairs.into_iter().collect(),
        }
    }
}

impl From<TypeSubstitution> for Vec<(TypeParamId, Ty)> {
    fn from(subst: TypeSubstitution) -> Self {
        subst.map.into_iter().collect()
    }
}

impl FromIterator<(TypeParamId, Ty)> for TypeSubstitution {
    fn from_iter<I: IntoIterator<Item = (TypeParamId, Ty)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

impl TypeSubstitution {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按位置把形参与实参配对
    pub fn from_args(
        params: &[TypeParamId],
        args: &[Ty],
    ) -> MonoResult<Self> {
        if params.len() != args.len() {
            let decl = params
                .first()
                .map(|p| p.owner.to_string())
                .unwrap_or_else(|| "<none>".to_string());
            return Err(ice!(InternalError::ArityMismatch {
                decl,
                expected: params.len(),
                found: args.len(),
            }));
        }
        Ok(params.iter().copied().zip(args.iter().cloned()).collect())
    }

    pub fn insert(
        &mut self,
        param: TypeParamId,
        ty: Ty,
    ) -> Option<Ty> {
        self.map.insert(param, ty)
    }

    pub fn get(
        &self,
        param: TypeParamId,
    ) -> Option<&Ty> {
        self.map.get(&param)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TypeParamId, &Ty)> {
        self.map.iter()
    }

    pub fn params(&self) -> impl Iterator<Item = TypeParamId> + '_ {
        self.map.keys().copied()
    }

    /// 替换类型中出现的全部参数
    pub fn apply(
        &self,
        ty: &Ty,
    ) -> Ty {
        if self.map.is_empty() {
            return ty.clone();
        }
        match ty {
            Ty::Param(p) => self.map.get(p).cloned().unwrap_or_else(|| ty.clone()),
            Ty::Prim(_) | Ty::Invalid => ty.clone(),
            Ty::Tuple(items) => Ty::Tuple(items.iter().map(|t| self.apply(t)).collect()),
            Ty::Func { params, ret } => Ty::Func {
                params: params.iter().map(|t| self.apply(t)).collect(),
                ret: Box::new(self.apply(ret)),
            },
            Ty::Named { decl, args } => Ty::Named {
                decl: *decl,
                args: args.iter().map(|t| self.apply(t)).collect(),
            },
        }
    }

    /// 复合：先 `inner` 后 `self`
    ///
    /// `inner` 的每个值再经 `self` 替换；`self` 中 `inner` 未涉及的参数并入结果。
    pub fn compose(
        &self,
        inner: &TypeSubstitution,
    ) -> TypeSubstitution {
        let mut map: BTreeMap<TypeParamId, Ty> = inner
            .map
            .iter()
            .map(|(p, t)| (*p, self.apply(t)))
            .collect();
        for (p, t) in &self.map {
            map.entry(*p).or_insert_with(|| t.clone());
        }
        TypeSubstitution { map }
    }

    /// 只保留给定参数
    pub fn restrict(
        &self,
        params: &[TypeParamId],
    ) -> TypeSubstitution {
        self.map
            .iter()
            .filter(|(p, _)| params.contains(p))
            .map(|(p, t)| (*p, t.clone()))
            .collect()
    }

    /// 是否覆盖全部给定参数
    pub fn covers(
        &self,
        params: &[TypeParamId],
    ) -> bool {
        params.iter().all(|p| self.map.contains_key(p))
    }

    /// 所有值都是具体类型
    pub fn is_concrete(&self) -> bool {
        self.map.values().all(Ty::is_concrete)
    }

    /// 每个参数都映射到自身（或为空）
    pub fn is_identity(&self) -> bool {
        self.map.iter().all(|(p, t)| *t == Ty::Param(*p))
    }

    /// 对每个值应用变换
    pub fn map_values(
        &self,
        f: &mut dyn FnMut(&Ty) -> Ty,
    ) -> TypeSubstitution {
        self.map.iter().map(|(p, t)| (*p, f(t))).collect()
    }

    /// 改写参数主人与值中的句柄
    pub fn map_ids(
        &self,
        mapper: &mut dyn IdMapper,
    ) -> TypeSubstitution {
        self.map
            .iter()
            .map(|(p, t)| {
                let mut ty = t.clone();
                ty.map_ids(mapper);
                (mapper.param(*p), ty)
            })
            .collect()
    }

    /// 以 `[T = Int64, U = Bool]` 的形式显示
    pub fn display(
        &self,
        pkg: &Package,
    ) -> String {
        let mut out = String::from("[");
        for (i, (p, t)) in self.map.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{} = {}", pkg.type_param_name(*p), t.display(pkg));
        }
        out.push(']');
        out
    }
}
