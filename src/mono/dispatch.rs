//! 抽象方法分派表
//!
//! 单态化之后，继承与实现关系要按具体类型重新推导：同一个泛型类型的
//! 不同实例，实现同一个抽象方法的是各自（重新实例化的）成员。
//!
//! 对具体类型 `T` 与它必须实现的每个抽象方法 `M`（来自接口或抽象父类，
//! 包括经由扩展附加的接口），按以下优先级找到唯一实现：
//! 自身成员 → 扩展成员 → 继承成员 → 接口默认实现。
//! 找不到或有多个兼容候选都是内部错误：类型检查阶段应当已经拒绝。

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use super::error::{InternalError, MonoResult};
use super::InstantiationManager;
use crate::ice;
use crate::tree::{DeclId, DeclKind, Ty};

/// 分派表项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchEntry {
    /// 具体类型
    pub ty: DeclId,
    /// 声明抽象方法的接口或抽象父类（已实例化）
    pub interface: DeclId,
    pub abstract_method: DeclId,
    pub implementation: DeclId,
    /// 在该接口分派表中的位置
    pub slot: usize,
}

/// 分派表
#[derive(Debug, Default)]
pub struct DispatchMap {
    entries: IndexMap<(DeclId, DeclId), DispatchEntry>,
    built: HashSet<DeclId>,
}

impl DispatchMap {
    pub fn is_built(
        &self,
        ty: DeclId,
    ) -> bool {
        self.built.contains(&ty)
    }

    /// 某类型的全部表项（按插入顺序）
    pub fn table(
        &self,
        ty: DeclId,
    ) -> Vec<DispatchEntry> {
        self.entries
            .values()
            .filter(|e| e.ty == ty)
            .cloned()
            .collect()
    }

    /// 丢弃某类型的表项（类型被重新实例化时）
    pub fn forget(
        &mut self,
        ty: DeclId,
    ) {
        self.entries.retain(|(t, _), _| *t != ty);
        self.built.remove(&ty);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 方法签名（规范类型）
#[derive(Debug, Clone, PartialEq, Eq)]
struct Signature {
    params: Vec<Ty>,
    ret: Ty,
}

impl InstantiationManager {
    /// 构建具体类型的分派表
    pub fn build_dispatch(
        &mut self,
        ty: DeclId,
    ) -> MonoResult<Vec<DispatchEntry>> {
        if !self.pkg.contains_decl(ty) {
            return Err(ice!(InternalError::UnknownDecl(ty)));
        }
        if self.dispatch.is_built(ty) {
            return Ok(self.dispatch.table(ty));
        }
        let ty_ty = Ty::named(ty, Vec::new());

        let mut providers: Vec<Ty> = Vec::new();
        for sup in self.super_types(&ty_ty)? {
            if !providers.contains(&sup) {
                providers.push(sup);
            }
        }
        for iface in self.implemented_interfaces(&ty_ty)? {
            if !providers.contains(&iface) {
                providers.push(iface);
            }
        }

        for provider in providers {
            let Some(provider_decl) = self.resolve_type_decl(&provider)? else {
                continue;
            };
            let is_interface = matches!(self.pkg.decl(provider_decl).kind, DeclKind::Interface(_));
            let methods: Vec<DeclId> = self
                .pkg
                .decl(provider_decl)
                .kind
                .members()
                .iter()
                .copied()
                .filter(|m| {
                    let decl = self.pkg.decl(*m);
                    decl.is_func()
                        && decl.type_params.is_empty()
                        && (is_interface || decl.is_abstract_func())
                })
                .collect();
            for (slot, method) in methods.into_iter().enumerate() {
                if self.dispatch.entries.contains_key(&(ty, method)) {
                    continue;
                }
                let implementation = self.resolve_implementation(ty, method)?;
                self.dispatch.entries.insert(
                    (ty, method),
                    DispatchEntry {
                        ty,
                        interface: provider_decl,
                        abstract_method: method,
                        implementation,
                        slot,
                    },
                );
            }
        }
        self.dispatch.built.insert(ty);

        let table = self.dispatch.table(ty);
        debug!(
            "dispatch table for {}: {} entr{}",
            self.pkg.display_name(ty),
            table.len(),
            if table.len() == 1 { "y" } else { "ies" }
        );
        Ok(table)
    }

    /// 分派表（必要时构建）
    pub fn dispatch_table(
        &mut self,
        ty: DeclId,
    ) -> MonoResult<Vec<DispatchEntry>> {
        self.build_dispatch(ty)
    }

    /// 查找实现某抽象方法的表项；`method` 可以是原型方法或其实例
    pub fn dispatch_entry(
        &mut self,
        ty: DeclId,
        method: DeclId,
    ) -> MonoResult<Option<DispatchEntry>> {
        let table = self.build_dispatch(ty)?;
        Ok(table
            .into_iter()
            .find(|e| e.abstract_method == method || self.template_of(e.abstract_method) == method))
    }

    fn resolve_implementation(
        &mut self,
        ty: DeclId,
        method: DeclId,
    ) -> MonoResult<DeclId> {
        let name = self.pkg.decl(method).name.clone();
        let wanted = self.signature(method);
        let ty_ty = Ty::named(ty, Vec::new());

        // 自身成员
        let own = self.pkg.decl(ty).kind.members().to_vec();
        if let Some(found) = self.pick_candidate(ty, method, &name, &wanted, &own)? {
            return Ok(found);
        }

        // 扩展成员
        let mut from_extensions = Vec::new();
        for inst in self.ensure_extensions(&ty_ty)? {
            from_extensions.extend(self.pkg.decl(inst).kind.members().iter().copied());
        }
        if let Some(found) = self.pick_candidate(ty, method, &name, &wanted, &from_extensions)? {
            return Ok(found);
        }

        // 继承成员：最近的父类优先
        for sup in self.super_types(&ty_ty)? {
            if self.is_interface_ty(&sup) {
                continue;
            }
            let Some(sup_decl) = self.resolve_type_decl(&sup)? else {
                continue;
            };
            let inherited = self.pkg.decl(sup_decl).kind.members().to_vec();
            if let Some(found) = self.pick_candidate(ty, method, &name, &wanted, &inherited)? {
                return Ok(found);
            }
        }

        // 接口默认实现
        if let DeclKind::Func(func) = &self.pkg.decl(method).kind {
            if func.body.is_some() {
                return Ok(method);
            }
        }

        Err(ice!(InternalError::UnresolvedDispatch {
            ty: self.pkg.display_name(ty),
            method: name,
        }))
    }

    /// 在一层候选中选出唯一兼容的实现
    fn pick_candidate(
        &self,
        ty: DeclId,
        method: DeclId,
        name: &str,
        wanted: &Signature,
        members: &[DeclId],
    ) -> MonoResult<Option<DeclId>> {
        let compatible: Vec<DeclId> = members
            .iter()
            .copied()
            .filter(|m| *m != method)
            .filter(|m| {
                let decl = self.pkg.decl(*m);
                decl.name == name
                    && decl.is_func()
                    && decl.type_params.is_empty()
                    && !decl.is_abstract_func()
            })
            .filter(|m| self.signature(*m) == *wanted)
            .collect();
        match compatible.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some(*one)),
            many => Err(ice!(InternalError::AmbiguousDispatch {
                ty: self.pkg.display_name(ty),
                method: name.to_string(),
                candidates: many.iter().map(|m| self.pkg.display_name(*m)).collect(),
            })),
        }
    }

    fn signature(
        &self,
        func: DeclId,
    ) -> Signature {
        match &self.pkg.decl(func).kind {
            DeclKind::Func(f) => Signature {
                params: f
                    .params
                    .iter()
                    .map(|p| match &self.pkg.decl(*p).kind {
                        DeclKind::Var(v) => self.canonical_ty(&v.ty),
                        _ => Ty::Invalid,
                    })
                    .collect(),
                ret: self.canonical_ty(&f.ret),
            },
            _ => Signature {
                params: Vec::new(),
                ret: Ty::Invalid,
            },
        }
    }
}
