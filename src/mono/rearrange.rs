//! 引用重排
//!
//! 克隆之后，子树内部的句柄已经指向副本；但指向子树外泛型兄弟的引用
//! （返回类型 `Other<T>`、调用 `f<T>`、访问 `Box<T>::get`）仍然指向原型。
//! 这一遍把它们改写为对应替换下的实例，必要时递归实例化。
//!
//! 重排是幂等的：已改写的引用指向实例，不再满足改写条件。

use std::collections::{HashSet, VecDeque};
use tracing::trace;

use super::error::{MonoError, MonoResult};
use super::substitution::TypeSubstitution;
use super::InstantiationManager;
use crate::tree::walk::collect_subtree;
use crate::tree::{DeclId, DeclKind, Expr, ExprKind, Ty};

/// 一次重排的上下文
struct RearrangeCtx {
    root: DeclId,
    /// 根实例的替换（非实例为空）
    subst: TypeSubstitution,
    /// 根所在的包
    package: String,
    broken: bool,
    changed: bool,
}

impl InstantiationManager {
    /// 重排以 `root` 为根的子树（跳过仍是模板的嵌套泛型声明）
    ///
    /// 返回是否有引用被改写。引用损坏声明的位置变为 `Ty::Invalid`，
    /// 并把 `root` 标记为损坏；不会产生新的诊断。
    pub fn rearrange(
        &mut self,
        root: DeclId,
    ) -> MonoResult<bool> {
        let subtree = collect_subtree(&self.pkg, root, &|pkg, id| {
            !pkg.decl(id).type_params.is_empty()
        });
        let mut ctx = RearrangeCtx {
            root,
            subst: self
                .cache
                .key_of(root)
                .map(|key| key.subst.clone())
                .unwrap_or_default(),
            package: self.pkg.decl(root).package.clone(),
            broken: false,
            changed: false,
        };

        for decl in &subtree.decls {
            let mut kind = self.pkg.decl(*decl).kind.clone();
            kind.try_map_types(&mut |ty| self.rearrange_ty(ty, &mut ctx))?;
            self.pkg.decl_mut(*decl).kind = kind;
        }
        for expr_id in &subtree.exprs {
            let mut expr = self.pkg.expr(*expr_id).clone();
            expr.try_map_types(&mut |ty| self.rearrange_ty(ty, &mut ctx))?;
            self.rearrange_expr(&mut expr, &mut ctx)?;
            *self.pkg.expr_mut(*expr_id) = expr;
        }

        if ctx.broken {
            self.pkg.decl_mut(root).broken = true;
        }
        if ctx.changed {
            trace!("rearranged {}", self.pkg.display_name(root));
        }
        Ok(ctx.changed)
    }

    /// 带具体实参的命名类型 → 实例句柄
    fn rearrange_ty(
        &mut self,
        ty: &Ty,
        ctx: &mut RearrangeCtx,
    ) -> MonoResult<Ty> {
        match ty {
            Ty::Named { decl, args } => {
                let mut new_args = Vec::with_capacity(args.len());
                for arg in args {
                    new_args.push(self.rearrange_ty(arg, ctx)?);
                }
                if new_args.is_empty()
                    || new_args.iter().any(|a| !a.is_concrete())
                    || !self.accessible(*decl, ctx)
                {
                    return Ok(Ty::Named {
                        decl: *decl,
                        args: new_args,
                    });
                }
                // 部分实例上的实参只对应它剩下的参数
                let own = self.pkg.decl(*decl).own_param_ids();
                let mut subst = TypeSubstitution::from_args(&own, &new_args)?;
                if let Some(key) = self.cache.key_of(*decl) {
                    subst = subst.compose(&key.subst);
                }
                match self.get_or_instantiate(self.template_of(*decl), subst) {
                    Ok(inst) => {
                        ctx.changed = true;
                        Ok(Ty::named(inst, Vec::new()))
                    }
                    Err(MonoError::Broken(_)) => {
                        ctx.broken = true;
                        Ok(Ty::Invalid)
                    }
                    Err(err) => Err(err),
                }
            }
            Ty::Tuple(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.rearrange_ty(item, ctx)?);
                }
                Ok(Ty::Tuple(out))
            }
            Ty::Func { params, ret } => {
                let mut out = Vec::with_capacity(params.len());
                for param in params {
                    out.push(self.rearrange_ty(param, ctx)?);
                }
                Ok(Ty::func(out, self.rearrange_ty(ret, ctx)?))
            }
            Ty::Prim(_) | Ty::Param(_) | Ty::Invalid => Ok(ty.clone()),
        }
    }

    fn rearrange_expr(
        &mut self,
        expr: &mut Expr,
        ctx: &mut RearrangeCtx,
    ) -> MonoResult<()> {
        match &mut expr.kind {
            ExprKind::Ref { target, type_args } => {
                // 已解析的实例只在显式实参下重新解析
                let template = self.template_of(*target);
                if !self.pkg.is_generic(template)
                    || (template != *target && type_args.is_empty())
                    || !self.accessible(template, ctx)
                {
                    return Ok(());
                }
                let mut subst = match self.cache.key_of(*target) {
                    Some(key) => key.subst.clone(),
                    None => ctx.subst.restrict(&self.pkg.scope_type_params(template)),
                };
                let own = self.pkg.decl(template).own_param_ids();
                if !type_args.is_empty() && type_args.len() == own.len() {
                    for (param, arg) in own.iter().zip(type_args.iter()) {
                        subst.insert(*param, arg.clone());
                    }
                }
                if !subst.is_concrete() {
                    return Ok(());
                }
                match self.get_or_instantiate(template, subst) {
                    Ok(inst) => {
                        if inst != *target {
                            *target = inst;
                            ctx.changed = true;
                        }
                    }
                    Err(MonoError::Broken(_)) => {
                        expr.ty = Ty::Invalid;
                        ctx.broken = true;
                    }
                    Err(err) => return Err(err),
                }
            }
            ExprKind::Member {
                owner,
                member,
                type_args,
                ..
            } => {
                let template = self.template_of(*member);
                let in_extension = self
                    .pkg
                    .decl(template)
                    .parent
                    .map(|p| matches!(self.pkg.decl(p).kind, DeclKind::Extend(_)))
                    .unwrap_or(false);
                let resolved = if in_extension && owner.is_concrete() {
                    self.resolve_extension_member(owner, template, type_args)
                } else if self.pkg.is_generic(template) && self.accessible(template, ctx) {
                    self.resolve_member(owner, *member, type_args, ctx)
                } else {
                    return Ok(());
                };
                match resolved {
                    Ok(Some(inst)) => {
                        if inst != *member {
                            *member = inst;
                            ctx.changed = true;
                        }
                    }
                    Ok(None) => {}
                    Err(MonoError::Broken(_)) => {
                        expr.ty = Ty::Invalid;
                        ctx.broken = true;
                    }
                    Err(err) => return Err(err),
                }
            }
            ExprKind::Lit(_)
            | ExprKind::Call { .. }
            | ExprKind::Let { .. }
            | ExprKind::Block(_)
            | ExprKind::Return(_)
            | ExprKind::Binary { .. }
            | ExprKind::If { .. } => {}
        }
        Ok(())
    }

    /// 按接收者类型的替换（加上成员自己的实参）实例化成员
    fn resolve_member(
        &mut self,
        owner: &Ty,
        member: DeclId,
        type_args: &[Ty],
        ctx: &RearrangeCtx,
    ) -> MonoResult<Option<DeclId>> {
        let template = self.template_of(member);
        let Some(member_parent) = self.pkg.decl(template).parent else {
            return Ok(None);
        };
        let fallback = match self.cache.key_of(member) {
            Some(key) => key.subst.clone(),
            None => ctx.subst.clone(),
        };
        let mut subst = self
            .receiver_subst(owner, member_parent)?
            .unwrap_or(fallback);
        let own = self.pkg.decl(template).own_param_ids();
        if !type_args.is_empty() && type_args.len() == own.len() {
            for (param, arg) in own.iter().zip(type_args.iter()) {
                subst.insert(*param, arg.clone());
            }
        }
        if !subst.is_concrete() {
            return Ok(None);
        }
        self.get_or_instantiate(template, subst).map(Some)
    }

    /// 从接收者类型出发，沿父类型找到声明 `member_parent` 的那一层，取其替换
    pub(crate) fn receiver_subst(
        &mut self,
        owner: &Ty,
        member_parent: DeclId,
    ) -> MonoResult<Option<TypeSubstitution>> {
        let mut queue = VecDeque::from([owner.clone()]);
        let mut seen = HashSet::new();
        while let Some(ty) = queue.pop_front() {
            let Ty::Named { decl, args } = &ty else {
                continue;
            };
            if !seen.insert(ty.clone()) {
                continue;
            }
            let template = self.template_of(*decl);
            if template == member_parent {
                let subst = match self.cache.key_of(*decl) {
                    Some(key) => key.subst.clone(),
                    None => {
                        let own = self.pkg.decl(*decl).own_param_ids();
                        if own.len() == args.len() {
                            TypeSubstitution::from_args(&own, args)?
                        } else {
                            TypeSubstitution::new()
                        }
                    }
                };
                return Ok(Some(subst));
            }
            let supers = match &self.pkg.decl(*decl).kind {
                DeclKind::Type(t) => t.supers.clone(),
                DeclKind::Interface(i) => i.supers.clone(),
                _ => Vec::new(),
            };
            // 原型的父类型仍以原型参数表示
            let local = match self.cache.key_of(*decl) {
                Some(_) => TypeSubstitution::new(),
                None => {
                    let own = self.pkg.decl(*decl).own_param_ids();
                    if own.len() == args.len() {
                        TypeSubstitution::from_args(&own, args)?
                    } else {
                        TypeSubstitution::new()
                    }
                }
            };
            queue.extend(supers.iter().map(|s| local.apply(s)));
        }
        Ok(None)
    }

    /// 跨包且不可访问的目标不在这里实例化
    fn accessible(
        &self,
        target: DeclId,
        ctx: &RearrangeCtx,
    ) -> bool {
        let target_pkg = &self.pkg.decl(target).package;
        if *target_pkg == ctx.package {
            return true;
        }
        let ok = self
            .relations
            .is_accessible(&self.pkg, &ctx.package, self.template_of(target));
        if !ok {
            trace!(
                "skipping inaccessible {} referenced from {}",
                self.pkg.display_name(target),
                ctx.root
            );
        }
        ok
    }
}
