//! 克隆并替换
//!
//! 缓存未命中时的实例化驱动：预留槽位 → 克隆（访问器应用替换）→
//! 登记成员 → 修正回指 → 重排 → 完成。

use tracing::{debug, trace};

use super::cache::CacheLookup;
use super::error::{InternalError, MonoError, MonoResult};
use super::instance::InstantiationKey;
use super::substitution::TypeSubstitution;
use super::InstantiationManager;
use crate::ice;
use crate::tree::{CloneError, CloneOptions, DeclId, DeclKind, NodePair, Ty};

/// 规范化后的请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    /// 无需实例化（非泛型或恒等替换）
    Itself(DeclId),
    Key(InstantiationKey),
}

impl InstantiationManager {
    /// 取得 (泛型, 替换) 的实例，必要时实例化
    ///
    /// 对同一个规范化键多次调用返回同一个句柄。
    pub fn get_or_instantiate(
        &mut self,
        generic: DeclId,
        subst: TypeSubstitution,
    ) -> MonoResult<DeclId> {
        if !self.pkg.contains_decl(generic) {
            return Err(ice!(InternalError::UnknownDecl(generic)));
        }
        let key = match self.normalize(generic, &subst) {
            Target::Itself(decl) => {
                if self.pkg.decl(decl).broken {
                    return Err(MonoError::Broken(decl));
                }
                return Ok(decl);
            }
            Target::Key(key) => key,
        };
        if self.pkg.decl(key.generic).broken {
            return Err(MonoError::Broken(key.generic));
        }

        match self.cache.probe(&key) {
            CacheLookup::Done(decl) => {
                if self.pkg.decl(decl).broken {
                    return Err(MonoError::Broken(decl));
                }
                return Ok(decl);
            }
            CacheLookup::InProgress(decl) => {
                trace!("re-entrant request for {}, forward handle {}", key, decl);
                return Ok(decl);
            }
            CacheLookup::Empty => {}
        }

        // 非泛型成员跟随所属类型一起实例化
        let template = self.pkg.decl(key.generic);
        if template.type_params.is_empty() {
            if let Some(owner) = template.parent {
                return self.instantiate_through_owner(owner, key);
            }
        }

        self.instantiate_fresh(key)
    }

    /// 在已有（或部分）实例上实例化嵌套泛型成员
    pub fn instantiate_member(
        &mut self,
        owner_inst: DeclId,
        member: DeclId,
        member_args: Vec<Ty>,
    ) -> MonoResult<DeclId> {
        for id in [owner_inst, member] {
            if !self.pkg.contains_decl(id) {
                return Err(ice!(InternalError::UnknownDecl(id)));
            }
        }
        let owner_subst = self
            .cache
            .key_of(owner_inst)
            .map(|key| key.subst.clone())
            .unwrap_or_default();
        let own = self.pkg.decl(member).own_param_ids();
        let member_subst = TypeSubstitution::from_args(&own, &member_args)?;
        self.get_or_instantiate(member, member_subst.compose(&owner_subst))
    }

    /// 具体类型对应的类型声明：实例句柄原样返回，带实参的原型先实例化
    pub fn resolve_type_decl(
        &mut self,
        ty: &Ty,
    ) -> MonoResult<Option<DeclId>> {
        match ty {
            Ty::Named { decl, args } if args.is_empty() => Ok(Some(*decl)),
            Ty::Named { decl, args } => {
                let own = self.pkg.decl(*decl).own_param_ids();
                let subst = TypeSubstitution::from_args(&own, args)?;
                self.get_or_instantiate(*decl, subst).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// 规范化请求
    ///
    /// - 部分实例：用它记录的替换复合回原型键
    /// - 替换限制在原型作用域内的参数，去掉恒等映射
    /// - 值中的实例句柄改写为 原型 + 实参
    pub(crate) fn normalize(
        &self,
        generic: DeclId,
        subst: &TypeSubstitution,
    ) -> Target {
        let (template, subst) = match self.cache.key_of(generic) {
            Some(key) => (key.generic, subst.compose(&key.subst)),
            None => (generic, subst.clone()),
        };
        let scope = self.pkg.scope_type_params(template);
        if scope.is_empty() {
            return Target::Itself(generic);
        }
        let restricted: TypeSubstitution = subst
            .restrict(&scope)
            .map_values(&mut |ty| self.canonical_ty(ty))
            .iter()
            .filter(|(p, ty)| **ty != Ty::Param(**p))
            .map(|(p, ty)| (*p, ty.clone()))
            .collect();
        if restricted.is_empty() {
            return Target::Itself(template);
        }
        Target::Key(InstantiationKey::new(template, restricted))
    }

    /// 类型的规范形式：顶层类型的实例句柄展开为 原型 + 实参
    pub fn canonical_ty(
        &self,
        ty: &Ty,
    ) -> Ty {
        match ty {
            Ty::Named { decl, args } if args.is_empty() => {
                let Some(key) = self.cache.key_of(*decl) else {
                    return ty.clone();
                };
                let template = self.pkg.decl(key.generic);
                if template.parent.is_some() || !template.is_type_like() {
                    return ty.clone();
                }
                let args = template
                    .type_params
                    .iter()
                    .map(|p| match key.subst.get(p.id) {
                        Some(arg) => self.canonical_ty(arg),
                        None => Ty::Param(p.id),
                    })
                    .collect();
                Ty::Named {
                    decl: key.generic,
                    args,
                }
            }
            Ty::Named { decl, args } => Ty::Named {
                decl: *decl,
                args: args.iter().map(|t| self.canonical_ty(t)).collect(),
            },
            Ty::Tuple(items) => Ty::Tuple(items.iter().map(|t| self.canonical_ty(t)).collect()),
            Ty::Func { params, ret } => Ty::Func {
                params: params.iter().map(|t| self.canonical_ty(t)).collect(),
                ret: Box::new(self.canonical_ty(ret)),
            },
            Ty::Prim(_) | Ty::Param(_) | Ty::Invalid => ty.clone(),
        }
    }

    fn instantiate_through_owner(
        &mut self,
        owner: DeclId,
        key: InstantiationKey,
    ) -> MonoResult<DeclId> {
        self.get_or_instantiate(owner, key.subst.clone())?;
        match self.cache.probe(&key) {
            CacheLookup::Done(decl) | CacheLookup::InProgress(decl) => {
                if self.pkg.decl(decl).broken {
                    return Err(MonoError::Broken(decl));
                }
                Ok(decl)
            }
            CacheLookup::Empty => Err(ice!(InternalError::MissingMapping(format!(
                "member {} was not registered by its owner's instantiation",
                key.mangle(&self.pkg)
            )))),
        }
    }

    fn instantiate_fresh(
        &mut self,
        key: InstantiationKey,
    ) -> MonoResult<DeclId> {
        if self.depth >= self.config.max_instantiation_depth {
            return Err(ice!(InternalError::RecursionLimit {
                limit: self.config.max_instantiation_depth,
                key: key.mangle(&self.pkg),
            }));
        }
        self.depth += 1;
        let result = self.instantiate_fresh_inner(key);
        self.depth -= 1;
        result
    }

    fn instantiate_fresh_inner(
        &mut self,
        key: InstantiationKey,
    ) -> MonoResult<DeclId> {
        let generic = key.generic;
        let mangled = key.mangle(&self.pkg);
        let root = match self.cache.tombstone(&key) {
            Some(handle) => handle,
            None => self.pkg.reserve_decl(),
        };
        self.cache.reserve(key.clone(), root)?;
        debug!("instantiating {} as {}", mangled, root);

        let subst = key.subst.clone();
        let options = CloneOptions {
            reserved_root: Some(root),
            skip_nested_generics: true,
        };
        let mut pairs: Vec<(DeclId, DeclId)> = Vec::new();
        let mut skipped: Vec<DeclId> = Vec::new();
        let cloned = self.cloner.clone_decl(
            &mut self.pkg,
            generic,
            &options,
            &mut |pkg, pair| match pair {
                NodePair::Decl { source, clone } => {
                    pkg.decl_mut(clone).kind.map_types(&mut |ty| subst.apply(ty));
                    pairs.push((source, clone));
                }
                NodePair::Expr { clone, .. } => {
                    pkg.expr_mut(clone).map_types(&mut |ty| subst.apply(ty));
                }
                NodePair::Skipped(decl) => skipped.push(decl),
            },
        );
        match cloned {
            Ok(handle) if handle == root => {}
            Ok(handle) => {
                return Err(ice!(InternalError::MissingMapping(format!(
                    "cloner ignored reserved slot {} (wrote {})",
                    root, handle
                ))));
            }
            Err(CloneError::Broken(broken)) => {
                debug!("{} depends on broken {}, skipping", mangled, broken);
                let decl = self.pkg.decl_mut(root);
                decl.name = mangled.clone();
                decl.mangled = Some(mangled);
                decl.generic_origin = Some(generic);
                decl.broken = true;
                self.cache.complete(&key)?;
                return Err(MonoError::Broken(broken));
            }
        }

        // 根：回指、修饰名、剩余类型参数
        {
            let decl = self.pkg.decl_mut(root);
            decl.generic_origin = Some(generic);
            decl.mangled = Some(mangled);
            decl.type_params.retain(|p| subst.get(p.id).is_none());
        }

        // 成员各自登记
        let mut member_keys = Vec::new();
        for (source, clone) in pairs.iter().skip(1) {
            let Some(parent) = self.pkg.decl(*source).parent else {
                continue;
            };
            if !self.pkg.decl(parent).kind.members().contains(source) {
                continue;
            }
            let scope = self.pkg.scope_type_params(*source);
            let member_key = InstantiationKey::new(*source, subst.restrict(&scope));
            if member_key.subst.is_empty() {
                continue;
            }
            let member_mangled = member_key.mangle(&self.pkg);
            let decl = self.pkg.decl_mut(*clone);
            decl.generic_origin = Some(*source);
            decl.mangled = Some(member_mangled);
            self.cache.reserve_member(member_key.clone(), *clone, root)?;
            member_keys.push(member_key);
        }

        // 成员根：所属声明换成外层替换下的实例
        if let Some(parent) = self.pkg.decl(generic).parent {
            let owner_scope = self.pkg.scope_type_params(parent);
            let owner = self.get_or_instantiate(parent, subst.restrict(&owner_scope));
            match owner {
                Ok(owner) => self.pkg.decl_mut(root).parent = Some(owner),
                Err(MonoError::Broken(_)) => self.pkg.decl_mut(root).broken = true,
                Err(err) => return Err(err),
            }
        }

        if !skipped.is_empty() {
            self.lazy_members.insert(root, skipped);
        }

        self.rearrange(root)?;

        self.cache.complete(&key)?;
        for member_key in &member_keys {
            self.cache.complete(member_key)?;
        }

        if matches!(self.pkg.decl(root).kind, DeclKind::Type(_))
            && !self.pkg.is_generic(root)
            && !self.pkg.decl(root).broken
        {
            self.dispatch.forget(root);
            self.on_concrete_type(root)?;
        }

        if self.config.verify_instances {
            self.check_instance(root)?;
        }

        if self.pkg.decl(root).broken {
            return Err(MonoError::Broken(root));
        }
        Ok(root)
    }
}
