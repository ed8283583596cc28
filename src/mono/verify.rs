//! 实例检查
//!
//! - 悬空引用：具体实例中仍指向泛型原型子树的句柄
//! - 形状指纹：修饰名加成员签名的规范文本，用于增量恢复时的比对

use super::error::{InternalError, MonoResult};
use super::substitution::TypeSubstitution;
use super::InstantiationManager;
use crate::ice;
use crate::tree::walk::full_subtree;
use crate::tree::{DeclId, DeclKind, ExprId, IdMapper, Ty};

/// 记录遇到的声明句柄，不做改写
#[derive(Default)]
struct RefCollector {
    decls: Vec<DeclId>,
}

impl IdMapper for RefCollector {
    fn decl(
        &mut self,
        id: DeclId,
    ) -> DeclId {
        self.decls.push(id);
        id
    }

    fn expr(
        &mut self,
        id: ExprId,
    ) -> ExprId {
        id
    }
}

impl InstantiationManager {
    /// 具体实例中指向泛型原型子树的引用
    ///
    /// 部分实例允许引用原型，返回空。类型参数的主人与 `generic_origin`
    /// 回指不算引用。
    pub fn find_dangling_refs(
        &self,
        inst: DeclId,
    ) -> Vec<DeclId> {
        if self.pkg.is_generic(inst) {
            return Vec::new();
        }
        let subtree = full_subtree(&self.pkg, inst);
        let mut collector = RefCollector::default();
        for id in &subtree.decls {
            let decl = self.pkg.decl(*id);
            let mut kind = decl.kind.clone();
            kind.map_ids(&mut collector);
            if *id != inst {
                if let Some(parent) = decl.parent {
                    collector.decl(parent);
                }
            }
        }
        for id in &subtree.exprs {
            let mut expr = self.pkg.expr(*id).clone();
            expr.map_ids(&mut collector);
        }

        let mut dangling: Vec<DeclId> = collector
            .decls
            .into_iter()
            .filter(|d| !subtree.contains_decl(*d))
            .filter(|d| !self.cache.is_instance(*d))
            .filter(|d| self.pkg.in_generic_template(*d))
            .collect();
        dangling.sort();
        dangling.dedup();
        dangling
    }

    /// 有悬空引用即为内部错误
    pub fn check_instance(
        &self,
        inst: DeclId,
    ) -> MonoResult<()> {
        match self.find_dangling_refs(inst).first() {
            None => Ok(()),
            Some(target) => Err(ice!(InternalError::DanglingReference {
                instance: self.pkg.display_name(inst),
                target: self.pkg.display_name(*target),
            })),
        }
    }

    /// 实例的形状指纹
    pub fn shape_fingerprint(
        &self,
        inst: DeclId,
    ) -> String {
        let mut parts = vec![self.pkg.display_name(inst)];
        for member in self.pkg.decl(inst).kind.members() {
            parts.push(self.member_shape(*member, &TypeSubstitution::new()));
        }
        parts.join("; ")
    }

    /// 由当前原型推出的形状指纹（与全新实例化的结果一致）
    pub fn expected_fingerprint(
        &self,
        generic: DeclId,
        subst: &TypeSubstitution,
    ) -> String {
        let key = super::instance::InstantiationKey::new(generic, subst.clone());
        let mut parts = vec![key.mangle(&self.pkg)];
        for member in self.pkg.decl(generic).kind.members() {
            if !self.pkg.decl(*member).type_params.is_empty() {
                continue;
            }
            parts.push(self.member_shape(*member, subst));
        }
        parts.join("; ")
    }

    fn member_shape(
        &self,
        member: DeclId,
        subst: &TypeSubstitution,
    ) -> String {
        let decl = self.pkg.decl(member);
        let show = |ty: &Ty| {
            self.canonical_ty(&subst.apply(ty))
                .display(&self.pkg)
                .to_string()
        };
        match &decl.kind {
            DeclKind::Func(func) => {
                let params: Vec<String> = func
                    .params
                    .iter()
                    .map(|p| match &self.pkg.decl(*p).kind {
                        DeclKind::Var(v) => show(&v.ty),
                        _ => String::new(),
                    })
                    .collect();
                format!("func {}({}) -> {}", decl.name, params.join(", "), show(&func.ret))
            }
            DeclKind::Var(var) => format!("var {}: {}", decl.name, show(&var.ty)),
            other => format!("{} {}", other.kind_name(), decl.name),
        }
    }
}
