//! 声明深拷贝
//!
//! 克隆本身不知道替换：它只负责复制子树、把子树内部的句柄改写到副本，
//! 然后对每一对 (源节点, 副本) 调用访问器。类型替换由访问器完成。

use std::collections::HashSet;
use thiserror::Error;
use tracing::trace;

use super::walk::collect_subtree;
use super::{DeclId, ExprId, IdRemap, Package};

/// 克隆错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CloneError {
    /// 子树中有先前阶段已报错的声明
    #[error("declaration {0} is broken")]
    Broken(DeclId),
}

/// 克隆选项
#[derive(Debug, Clone, Copy, Default)]
pub struct CloneOptions {
    /// 根副本写入这个已预留的槽位
    pub reserved_root: Option<DeclId>,
    /// 跳过自带类型参数的嵌套声明（泛型成员按需实例化）
    pub skip_nested_generics: bool,
}

/// 访问器收到的节点对
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePair {
    Decl { source: DeclId, clone: DeclId },
    Expr { source: ExprId, clone: ExprId },
    /// 未被复制的嵌套泛型声明
    Skipped(DeclId),
}

/// 深拷贝能力
pub trait DeclCloner: Send {
    /// 复制 `root` 的子树，返回根副本
    ///
    /// 访问器在整棵子树复制完成后按前序收到每个节点对，此时副本内部的句柄
    /// 已经指向副本。
    fn clone_decl(
        &mut self,
        pkg: &mut Package,
        root: DeclId,
        options: &CloneOptions,
        on_pair: &mut dyn FnMut(&mut Package, NodePair),
    ) -> Result<DeclId, CloneError>;
}

/// 基于竞技场的克隆实现
#[derive(Debug, Default)]
pub struct TreeCloner {
    cloned_decls: usize,
}

impl TreeCloner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 累计复制的声明数
    pub fn cloned_decls(&self) -> usize {
        self.cloned_decls
    }
}

impl DeclCloner for TreeCloner {
    fn clone_decl(
        &mut self,
        pkg: &mut Package,
        root: DeclId,
        options: &CloneOptions,
        on_pair: &mut dyn FnMut(&mut Package, NodePair),
    ) -> Result<DeclId, CloneError> {
        let skip_generics = options.skip_nested_generics;
        let subtree = collect_subtree(pkg, root, &|pkg, id| {
            skip_generics && !pkg.decl(id).type_params.is_empty()
        });
        if let Some(broken) = subtree.decls.iter().find(|d| pkg.decl(**d).broken) {
            return Err(CloneError::Broken(*broken));
        }

        // 模板内对根自身的引用（`List<T>`、递归调用）交给重排按实参解析
        let mut remap = IdRemap::default();
        remap.pinned.insert(root);
        for (i, source) in subtree.decls.iter().enumerate() {
            let clone = match (i, options.reserved_root) {
                (0, Some(reserved)) => reserved,
                _ => pkg.reserve_decl(),
            };
            remap.decls.insert(*source, clone);
        }
        for source in &subtree.exprs {
            let clone = pkg.reserve_expr();
            remap.exprs.insert(*source, clone);
        }

        let skipped: HashSet<DeclId> = subtree.skipped.iter().copied().collect();
        for source in &subtree.decls {
            let mut decl = pkg.decl(*source).clone();
            decl.map_ids(&mut remap);
            if let Some(members) = decl.kind.members_mut() {
                members.retain(|m| !skipped.contains(m));
            }
            *pkg.decl_mut(remap.decls[source]) = decl;
        }
        for source in &subtree.exprs {
            let mut expr = pkg.expr(*source).clone();
            expr.map_ids(&mut remap);
            *pkg.expr_mut(remap.exprs[source]) = expr;
        }

        for source in &subtree.decls {
            on_pair(
                pkg,
                NodePair::Decl {
                    source: *source,
                    clone: remap.decls[source],
                },
            );
        }
        for source in &subtree.exprs {
            on_pair(
                pkg,
                NodePair::Expr {
                    source: *source,
                    clone: remap.exprs[source],
                },
            );
        }
        for skipped in &subtree.skipped {
            on_pair(pkg, NodePair::Skipped(*skipped));
        }

        self.cloned_decls += subtree.decls.len();
        trace!(
            "cloned {} ({} decls, {} exprs, {} skipped)",
            pkg.decl(root).name,
            subtree.decls.len(),
            subtree.exprs.len(),
            subtree.skipped.len()
        );
        Ok(remap.decls[&root])
    }
}
