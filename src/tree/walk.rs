//! 声明子树遍历

use super::{DeclId, DeclKind, ExprId, ExprKind, Package};

/// 声明的直接子声明：成员、参数以及函数体/初始化式中 `let` 引入的局部变量
pub fn children_decls(
    pkg: &Package,
    id: DeclId,
) -> Vec<DeclId> {
    let decl = pkg.decl(id);
    let mut out: Vec<DeclId> = decl.kind.members().to_vec();
    let root_expr = match &decl.kind {
        DeclKind::Func(func) => {
            out.extend(func.params.iter().copied());
            func.body
        }
        DeclKind::Var(var) => var.init,
        _ => None,
    };
    if let Some(expr) = root_expr {
        let mut exprs = Vec::new();
        collect_exprs(pkg, expr, &mut exprs);
        for e in exprs {
            if let ExprKind::Let { var } = pkg.expr(e).kind {
                out.push(var);
            }
        }
    }
    out
}

/// 表达式的直接子表达式
pub fn children_exprs(
    pkg: &Package,
    id: ExprId,
) -> Vec<ExprId> {
    match &pkg.expr(id).kind {
        ExprKind::Lit(_) | ExprKind::Ref { .. } | ExprKind::Let { .. } => Vec::new(),
        ExprKind::Member { base, .. } => base.iter().copied().collect(),
        ExprKind::Call { callee, args } => {
            let mut out = vec![*callee];
            out.extend(args.iter().copied());
            out
        }
        ExprKind::Block(items) => items.clone(),
        ExprKind::Return(value) => value.iter().copied().collect(),
        ExprKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
        ExprKind::If { cond, then, els } => {
            let mut out = vec![*cond, *then];
            out.extend(els.iter().copied());
            out
        }
    }
}

/// 前序收集表达式树（不进入 `let` 引入的变量）
fn collect_exprs(
    pkg: &Package,
    root: ExprId,
    out: &mut Vec<ExprId>,
) {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        out.push(id);
        let children = children_exprs(pkg, id);
        stack.extend(children.into_iter().rev());
    }
}

/// 一棵声明子树拥有的全部节点
#[derive(Debug, Default, Clone)]
pub struct Subtree {
    /// 前序；第一个是根
    pub decls: Vec<DeclId>,
    pub exprs: Vec<ExprId>,
    /// 被 `skip` 排除的子声明（不含它们的后代）
    pub skipped: Vec<DeclId>,
}

impl Subtree {
    pub fn contains_decl(
        &self,
        id: DeclId,
    ) -> bool {
        self.decls.contains(&id)
    }
}

/// 收集以 `root` 为根的子树；`skip` 为真的非根声明连同后代一起排除
pub fn collect_subtree(
    pkg: &Package,
    root: DeclId,
    skip: &dyn Fn(&Package, DeclId) -> bool,
) -> Subtree {
    let mut subtree = Subtree::default();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if id != root && skip(pkg, id) {
            subtree.skipped.push(id);
            continue;
        }
        subtree.decls.push(id);
        let decl = pkg.decl(id);
        let root_expr = match &decl.kind {
            DeclKind::Func(func) => func.body,
            DeclKind::Var(var) => var.init,
            _ => None,
        };
        if let Some(expr) = root_expr {
            collect_exprs(pkg, expr, &mut subtree.exprs);
        }
        let children = children_decls(pkg, id);
        stack.extend(children.into_iter().rev());
    }
    subtree
}

/// 不跳过任何声明的完整子树
pub fn full_subtree(
    pkg: &Package,
    root: DeclId,
) -> Subtree {
    collect_subtree(pkg, root, &|_, _| false)
}
