//! 扩展实例化记录
//!
//! 具体类型产生时记录可能匹配的扩展原型；第一次需要时（成员查找、
//! 约束检查、分派表构建）才按匹配得到的替换实例化扩展并附加到该类型。
//! (扩展原型, 具体类型) 只附加一次。
//!
//! 记录以规范类型为键，所以 `Box<Int64>` 的实例句柄与 `Box` + `[Int64]`
//! 落在同一条记录上。

use indexmap::{IndexMap, IndexSet};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

use super::error::{MonoError, MonoResult};
use super::substitution::TypeSubstitution;
use super::InstantiationManager;
use crate::tree::{DeclId, DeclKind, Ty, TypeParamId};

/// 扩展记录
#[derive(Debug, Default)]
pub struct ExtensionRecorder {
    /// 规范类型 → 头部匹配的扩展原型
    candidates: IndexMap<Ty, Vec<DeclId>>,
    /// (扩展原型, 规范类型) → 扩展实例
    attached: IndexMap<(DeclId, Ty), DeclId>,
    /// 模式或约束不满足的组合
    rejected: IndexSet<(DeclId, Ty)>,
    /// 约束检查的递归保护
    checking: HashSet<(Ty, Ty)>,
}

impl ExtensionRecorder {
    /// 已附加到类型上的扩展实例
    pub fn attached_to(
        &self,
        ty: &Ty,
    ) -> Vec<DeclId> {
        self.attached
            .iter()
            .filter(|((_, t), _)| t == ty)
            .map(|(_, inst)| *inst)
            .collect()
    }

    pub fn attached_count(&self) -> usize {
        self.attached.len()
    }

    /// 扩展实例失效时移除其附加记录
    pub fn forget(
        &mut self,
        inst: DeclId,
    ) {
        self.attached.retain(|_, attached| *attached != inst);
    }
}

/// 模式匹配：`pattern` 中属于 `params` 的参数可绑定，其余部分需结构相同
pub(crate) fn match_pattern(
    pattern: &Ty,
    ty: &Ty,
    params: &[TypeParamId],
    binding: &mut TypeSubstitution,
) -> bool {
    match (pattern, ty) {
        (Ty::Param(p), _) if params.contains(p) => match binding.get(*p) {
            Some(bound) => bound == ty,
            None => {
                binding.insert(*p, ty.clone());
                true
            }
        },
        (Ty::Prim(a), Ty::Prim(b)) => a == b,
        (Ty::Param(a), Ty::Param(b)) => a == b,
        (Ty::Tuple(xs), Ty::Tuple(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|(x, y)| match_pattern(x, y, params, binding))
        }
        (
            Ty::Func {
                params: xs,
                ret: xr,
            },
            Ty::Func {
                params: ys,
                ret: yr,
            },
        ) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|(x, y)| match_pattern(x, y, params, binding))
                && match_pattern(xr, yr, params, binding)
        }
        (Ty::Named { decl: a, args: xs }, Ty::Named { decl: b, args: ys }) => {
            a == b
                && xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|(x, y)| match_pattern(x, y, params, binding))
        }
        _ => false,
    }
}

impl InstantiationManager {
    /// 记录头部与 `ty` 匹配的扩展原型
    pub fn record_extension_candidates(
        &mut self,
        ty: &Ty,
    ) {
        let canon = self.canonical_ty(ty);
        if self.extensions.candidates.contains_key(&canon) {
            return;
        }
        let head = |t: &Ty| match t {
            Ty::Named { decl, .. } => Some(*decl),
            _ => None,
        };
        let candidates: Vec<DeclId> = self
            .pkg
            .extensions()
            .into_iter()
            .filter(|ext| !self.pkg.decl(*ext).broken)
            .filter(|ext| match &self.pkg.decl(*ext).kind {
                DeclKind::Extend(e) => match (self.canonical_ty(&e.extended), &canon) {
                    (Ty::Prim(a), Ty::Prim(b)) => a == *b,
                    (extended, _) => head(&extended).is_some() && head(&extended) == head(&canon),
                },
                _ => false,
            })
            .collect();
        if !candidates.is_empty() {
            debug!(
                "{} extension candidate(s) recorded for {}",
                candidates.len(),
                canon.display(&self.pkg)
            );
        }
        self.extensions.candidates.insert(canon, candidates);
    }

    /// 实例化并附加 `ty` 的全部适用扩展，返回扩展实例
    pub fn ensure_extensions(
        &mut self,
        ty: &Ty,
    ) -> MonoResult<Vec<DeclId>> {
        let canon = self.canonical_ty(ty);
        if !canon.is_concrete() {
            return Ok(Vec::new());
        }
        self.record_extension_candidates(&canon);
        let exts = self
            .extensions
            .candidates
            .get(&canon)
            .cloned()
            .unwrap_or_default();

        let mut out = Vec::new();
        for ext in exts {
            let pair = (ext, canon.clone());
            if let Some(inst) = self.extensions.attached.get(&pair) {
                out.push(*inst);
                continue;
            }
            if self.extensions.rejected.contains(&pair) {
                continue;
            }
            match self.try_attach(ext, &canon)? {
                Some(inst) => {
                    let inst = *self.extensions.attached.entry(pair).or_insert(inst);
                    debug!(
                        "extension {} attached to {}",
                        self.pkg.display_name(inst),
                        canon.display(&self.pkg)
                    );
                    out.push(inst);
                }
                None => {
                    self.extensions.rejected.insert(pair);
                }
            }
        }
        Ok(out)
    }

    /// 扩展模式与约束都满足时实例化扩展
    fn try_attach(
        &mut self,
        ext: DeclId,
        canon: &Ty,
    ) -> MonoResult<Option<DeclId>> {
        let Some(binding) = self.bind_extension(ext, canon)? else {
            return Ok(None);
        };
        match self.get_or_instantiate(ext, binding) {
            Ok(inst) => Ok(Some(inst)),
            Err(MonoError::Broken(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// 匹配扩展模式并检查 `where` 约束，得到扩展参数的替换
    ///
    /// 扩展可以有被扩展类型之外的参数（如 `extend<K, V> Box<Pair<K, V>>`），
    /// 它们都必须由模式绑定。
    fn bind_extension(
        &mut self,
        ext: DeclId,
        canon: &Ty,
    ) -> MonoResult<Option<TypeSubstitution>> {
        let decl = self.pkg.decl(ext);
        let DeclKind::Extend(e) = &decl.kind else {
            return Ok(None);
        };
        let params = decl.own_param_ids();
        let pattern = self.canonical_ty(&e.extended);
        let bounds = e.bounds.clone();

        let mut binding = TypeSubstitution::new();
        if !match_pattern(&pattern, canon, &params, &mut binding) || !binding.covers(&params) {
            return Ok(None);
        }
        for bound in &bounds {
            let ty = binding.apply(&Ty::Param(bound.param));
            let interface = binding.apply(&bound.interface);
            if !self.satisfies(&ty, &interface)? {
                debug!(
                    "extension bound not satisfied: {} does not implement {}",
                    ty.display(&self.pkg),
                    interface.display(&self.pkg)
                );
                return Ok(None);
            }
        }
        Ok(Some(binding))
    }

    /// 具体类型是否实现接口（父类型、内建实现或带接口的扩展）
    pub fn satisfies(
        &mut self,
        ty: &Ty,
        interface: &Ty,
    ) -> MonoResult<bool> {
        let ty = self.canonical_ty(ty);
        let interface = self.canonical_ty(interface);
        let Some(iface_decl) = interface.named_decl() else {
            return Ok(false);
        };
        match &ty {
            Ty::Prim(p) => Ok(self.pkg.prim_implements(*p, iface_decl)),
            Ty::Named { .. } => {
                let guard = (ty.clone(), interface.clone());
                if !self.extensions.checking.insert(guard.clone()) {
                    return Ok(false);
                }
                let result = self.satisfies_named(&ty, &interface);
                self.extensions.checking.remove(&guard);
                result
            }
            _ => Ok(false),
        }
    }

    fn satisfies_named(
        &mut self,
        ty: &Ty,
        interface: &Ty,
    ) -> MonoResult<bool> {
        if self.super_types(ty)?.iter().any(|s| s == interface) {
            return Ok(true);
        }
        self.record_extension_candidates(ty);
        let exts = self
            .extensions
            .candidates
            .get(ty)
            .cloned()
            .unwrap_or_default();
        for ext in exts {
            let DeclKind::Extend(e) = &self.pkg.decl(ext).kind else {
                continue;
            };
            let declared = e.interfaces.clone();
            if declared.is_empty() {
                continue;
            }
            let Some(binding) = self.bind_extension(ext, ty)? else {
                continue;
            };
            for iface in &declared {
                let applied = self.canonical_ty(&binding.apply(iface));
                if applied == *interface || self.super_types(&applied)?.contains(interface) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// 规范类型的全部父类型（传递闭包，规范形式）
    pub fn super_types(
        &mut self,
        ty: &Ty,
    ) -> MonoResult<Vec<Ty>> {
        let mut out: Vec<Ty> = Vec::new();
        let mut queue = VecDeque::from([self.canonical_ty(ty)]);
        while let Some(current) = queue.pop_front() {
            let Ty::Named { decl, args } = &current else {
                continue;
            };
            let template = self.template_of(*decl);
            let own = self.pkg.decl(template).own_param_ids();
            let local = if own.len() == args.len() {
                TypeSubstitution::from_args(&own, args)?
            } else {
                TypeSubstitution::new()
            };
            let supers = match &self.pkg.decl(template).kind {
                DeclKind::Type(t) => t.supers.clone(),
                DeclKind::Interface(i) => i.supers.clone(),
                _ => Vec::new(),
            };
            for sup in supers {
                let sup = self.canonical_ty(&local.apply(&sup));
                if !out.contains(&sup) {
                    out.push(sup.clone());
                    queue.push_back(sup);
                }
            }
        }
        Ok(out)
    }

    /// 类型实现的全部接口：父类型中的接口加上已附加扩展声明的接口
    pub fn implemented_interfaces(
        &mut self,
        ty: &Ty,
    ) -> MonoResult<Vec<Ty>> {
        let mut out: Vec<Ty> = Vec::new();
        for sup in self.super_types(ty)? {
            if self.is_interface_ty(&sup) && !out.contains(&sup) {
                out.push(sup);
            }
        }
        for inst in self.ensure_extensions(ty)? {
            let declared = match &self.pkg.decl(inst).kind {
                DeclKind::Extend(e) => e.interfaces.clone(),
                _ => Vec::new(),
            };
            for iface in declared {
                let iface = self.canonical_ty(&iface);
                let mut all = vec![iface.clone()];
                all.extend(self.super_types(&iface)?);
                for t in all {
                    if self.is_interface_ty(&t) && !out.contains(&t) {
                        out.push(t);
                    }
                }
            }
        }
        Ok(out)
    }

    pub(crate) fn is_interface_ty(
        &self,
        ty: &Ty,
    ) -> bool {
        ty.named_decl()
            .map(|d| matches!(self.pkg.decl(d).kind, DeclKind::Interface(_)))
            .unwrap_or(false)
    }

    /// 类型自身成员加上已附加扩展的成员
    pub fn members_of(
        &mut self,
        ty: &Ty,
    ) -> MonoResult<Vec<DeclId>> {
        let Some(decl) = self.resolve_type_decl(ty)? else {
            return Ok(Vec::new());
        };
        let mut out = self.pkg.decl(decl).kind.members().to_vec();
        for inst in self.ensure_extensions(ty)? {
            out.extend(self.pkg.decl(inst).kind.members().iter().copied());
        }
        Ok(out)
    }

    /// 按名字查找成员：自身 → 扩展 → 继承
    pub fn lookup_member(
        &mut self,
        ty: &Ty,
        name: &str,
    ) -> MonoResult<Option<DeclId>> {
        if let Some(decl) = self.resolve_type_decl(ty)? {
            if let Some(found) = self.pkg.find_member(decl, name) {
                return Ok(Some(found));
            }
        }
        for inst in self.ensure_extensions(ty)? {
            if let Some(found) = self.pkg.find_member(inst, name) {
                return Ok(Some(found));
            }
        }
        for sup in self.super_types(ty)? {
            if let Some(decl) = self.resolve_type_decl(&sup)? {
                if let Some(found) = self.pkg.find_member(decl, name) {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }

    /// 通过具体接收者类型解析扩展成员
    pub(crate) fn resolve_extension_member(
        &mut self,
        owner: &Ty,
        member: DeclId,
        type_args: &[Ty],
    ) -> MonoResult<Option<DeclId>> {
        let Some(ext) = self.pkg.decl(member).parent else {
            return Ok(None);
        };
        let canon = self.canonical_ty(owner);
        self.ensure_extensions(&canon)?;
        let Some(inst) = self.extensions.attached.get(&(ext, canon)).copied() else {
            return Ok(None);
        };

        let generic_member = !self.pkg.decl(member).type_params.is_empty();
        if generic_member {
            if type_args.is_empty() || type_args.iter().any(|t| !t.is_concrete()) {
                return Ok(None);
            }
            return self
                .instantiate_member(inst, member, type_args.to_vec())
                .map(Some);
        }
        if inst == ext {
            return Ok(Some(member));
        }
        Ok(self
            .pkg
            .decl(inst)
            .kind
            .members()
            .iter()
            .copied()
            .find(|m| self.pkg.decl(*m).generic_origin == Some(member)))
    }
}
