//! 声明树构建辅助
//!
//! 类型检查器的输出在本 crate 中由这些方法直接构造；测试、基准和 CLI
//! 夹具都走这里。

use super::{
    Annotation, Bound, Decl, DeclId, DeclKind, Expr, ExprId, ExprKind, ExtendDecl, FuncDecl,
    InterfaceDecl, Literal, Package, TypeDecl, TypeKind, VarDecl, VarKind,
};
use super::{BinOp, PrimTy, Ty, TypeParam, TypeParamId};

impl Package {
    /// 加入声明：有父声明时挂到父声明的成员表，否则作为顶层声明
    fn attach(
        &mut self,
        mut decl: Decl,
        parent: Option<DeclId>,
        type_params: &[&str],
    ) -> DeclId {
        decl.package = self.name.clone();
        decl.parent = parent;
        let id = self.add_decl(decl);
        self.decl_mut(id).type_params = type_params
            .iter()
            .enumerate()
            .map(|(i, name)| TypeParam {
                id: TypeParamId::new(id, i as u32),
                name: name.to_string(),
            })
            .collect();
        match parent {
            Some(owner) => {
                if let Some(members) = self.decl_mut(owner).kind.members_mut() {
                    members.push(id);
                }
            }
            None => self.top_level.push(id),
        }
        id
    }

    /// 声明类/结构体
    pub fn declare_type(
        &mut self,
        parent: Option<DeclId>,
        name: &str,
        kind: TypeKind,
        type_params: &[&str],
    ) -> DeclId {
        let decl = Decl::new(
            name,
            DeclKind::Type(TypeDecl {
                kind,
                supers: Vec::new(),
                members: Vec::new(),
            }),
            "",
        );
        self.attach(decl, parent, type_params)
    }

    /// 声明接口
    pub fn declare_interface(
        &mut self,
        name: &str,
        type_params: &[&str],
    ) -> DeclId {
        let decl = Decl::new(
            name,
            DeclKind::Interface(InterfaceDecl {
                supers: Vec::new(),
                members: Vec::new(),
            }),
            "",
        );
        self.attach(decl, None, type_params)
    }

    /// 声明扩展；被扩展类型通常引用扩展自己的参数，需随后 `set_extended`
    pub fn declare_extend(
        &mut self,
        type_params: &[&str],
    ) -> DeclId {
        let decl = Decl::new(
            "extend",
            DeclKind::Extend(ExtendDecl {
                extended: Ty::unit(),
                interfaces: Vec::new(),
                bounds: Vec::new(),
                members: Vec::new(),
            }),
            "",
        );
        self.attach(decl, None, type_params)
    }

    pub fn set_extended(
        &mut self,
        ext: DeclId,
        extended: Ty,
    ) {
        if let DeclKind::Extend(e) = &mut self.decl_mut(ext).kind {
            e.extended = extended;
        }
    }

    /// 扩展附加实现的接口
    pub fn add_extend_interface(
        &mut self,
        ext: DeclId,
        interface: Ty,
    ) {
        if let DeclKind::Extend(e) = &mut self.decl_mut(ext).kind {
            e.interfaces.push(interface);
        }
    }

    /// 约束 `where <param>: <interface>`
    pub fn add_bound(
        &mut self,
        ext: DeclId,
        param_index: u32,
        interface: Ty,
    ) {
        if let DeclKind::Extend(e) = &mut self.decl_mut(ext).kind {
            e.bounds.push(Bound {
                param: TypeParamId::new(ext, param_index),
                interface,
            });
        }
    }

    /// 声明函数（返回 Unit，无函数体）
    pub fn declare_func(
        &mut self,
        parent: Option<DeclId>,
        name: &str,
        type_params: &[&str],
    ) -> DeclId {
        let decl = Decl::new(
            name,
            DeclKind::Func(FuncDecl {
                params: Vec::new(),
                ret: Ty::unit(),
                body: None,
            }),
            "",
        );
        self.attach(decl, parent, type_params)
    }

    pub fn add_param(
        &mut self,
        func: DeclId,
        name: &str,
        ty: Ty,
    ) -> DeclId {
        let mut decl = Decl::new(
            name,
            DeclKind::Var(VarDecl {
                kind: VarKind::Param,
                ty,
                init: None,
            }),
            &self.name,
        );
        decl.parent = Some(func);
        let id = self.add_decl(decl);
        if let DeclKind::Func(f) = &mut self.decl_mut(func).kind {
            f.params.push(id);
        }
        id
    }

    pub fn set_return(
        &mut self,
        func: DeclId,
        ret: Ty,
    ) {
        if let DeclKind::Func(f) = &mut self.decl_mut(func).kind {
            f.ret = ret;
        }
    }

    pub fn set_body(
        &mut self,
        func: DeclId,
        body: ExprId,
    ) {
        if let DeclKind::Func(f) = &mut self.decl_mut(func).kind {
            f.body = Some(body);
        }
    }

    /// 声明字段
    pub fn declare_field(
        &mut self,
        owner: DeclId,
        name: &str,
        ty: Ty,
    ) -> DeclId {
        let decl = Decl::new(
            name,
            DeclKind::Var(VarDecl {
                kind: VarKind::Field,
                ty,
                init: None,
            }),
            "",
        );
        self.attach(decl, Some(owner), &[])
    }

    /// 声明局部变量，返回 (变量, `let` 表达式)
    pub fn declare_local(
        &mut self,
        func: DeclId,
        name: &str,
        ty: Ty,
        init: Option<ExprId>,
    ) -> (DeclId, ExprId) {
        let mut decl = Decl::new(
            name,
            DeclKind::Var(VarDecl {
                kind: VarKind::Local,
                ty,
                init,
            }),
            &self.name,
        );
        decl.parent = Some(func);
        let var = self.add_decl(decl);
        let let_expr = self.add_expr(Expr::new(ExprKind::Let { var }, Ty::unit()));
        (var, let_expr)
    }

    /// 第 `index` 个类型参数
    pub fn type_param(
        &self,
        owner: DeclId,
        index: u32,
    ) -> Ty {
        Ty::Param(TypeParamId::new(owner, index))
    }

    /// 父类或实现的接口
    pub fn add_super(
        &mut self,
        decl: DeclId,
        sup: Ty,
    ) {
        match &mut self.decl_mut(decl).kind {
            DeclKind::Type(t) => t.supers.push(sup),
            DeclKind::Interface(i) => i.supers.push(sup),
            _ => {}
        }
    }

    pub fn add_builtin_impl(
        &mut self,
        prim: PrimTy,
        interface: DeclId,
    ) {
        self.builtin_impls.push((prim, interface));
    }

    pub fn add_annotation(
        &mut self,
        decl: DeclId,
        annotation: Annotation,
    ) {
        self.decl_mut(decl).annotations.push(annotation);
    }

    /// 标记为先前阶段已报错
    pub fn mark_broken(
        &mut self,
        decl: DeclId,
    ) {
        self.decl_mut(decl).broken = true;
    }

    /// 把声明移到另一个包（模拟导入的声明）
    pub fn set_package(
        &mut self,
        decl: DeclId,
        package: &str,
    ) {
        self.decl_mut(decl).package = package.to_string();
    }

    pub fn set_public(
        &mut self,
        decl: DeclId,
        public: bool,
    ) {
        self.decl_mut(decl).attrs.public = public;
    }

    pub fn int_lit(
        &mut self,
        value: i64,
    ) -> ExprId {
        self.add_expr(Expr::new(ExprKind::Lit(Literal::Int(value)), Ty::int64()))
    }

    pub fn float_lit(
        &mut self,
        value: f64,
    ) -> ExprId {
        self.add_expr(Expr::new(ExprKind::Lit(Literal::Float(value)), Ty::float64()))
    }

    pub fn bool_lit(
        &mut self,
        value: bool,
    ) -> ExprId {
        self.add_expr(Expr::new(ExprKind::Lit(Literal::Bool(value)), Ty::bool()))
    }

    pub fn str_lit(
        &mut self,
        value: &str,
    ) -> ExprId {
        self.add_expr(Expr::new(
            ExprKind::Lit(Literal::Str(value.to_string())),
            Ty::string(),
        ))
    }

    /// 对声明的引用
    pub fn ref_expr(
        &mut self,
        target: DeclId,
        type_args: Vec<Ty>,
        ty: Ty,
    ) -> ExprId {
        self.add_expr(Expr::new(ExprKind::Ref { target, type_args }, ty))
    }

    pub fn call_expr(
        &mut self,
        callee: ExprId,
        args: Vec<ExprId>,
        ty: Ty,
    ) -> ExprId {
        self.add_expr(Expr::new(ExprKind::Call { callee, args }, ty))
    }

    /// 成员访问；`owner` 为接收者类型
    pub fn member_expr(
        &mut self,
        base: Option<ExprId>,
        owner: Ty,
        member: DeclId,
        type_args: Vec<Ty>,
        ty: Ty,
    ) -> ExprId {
        self.add_expr(Expr::new(
            ExprKind::Member {
                base,
                owner,
                member,
                type_args,
            },
            ty,
        ))
    }

    pub fn binary_expr(
        &mut self,
        op: BinOp,
        lhs: ExprId,
        rhs: ExprId,
        ty: Ty,
    ) -> ExprId {
        self.add_expr(Expr::new(ExprKind::Binary { op, lhs, rhs }, ty))
    }

    pub fn block_expr(
        &mut self,
        items: Vec<ExprId>,
        ty: Ty,
    ) -> ExprId {
        self.add_expr(Expr::new(ExprKind::Block(items), ty))
    }

    pub fn return_expr(
        &mut self,
        value: Option<ExprId>,
    ) -> ExprId {
        self.add_expr(Expr::new(ExprKind::Return(value), Ty::unit()))
    }

    pub fn if_expr(
        &mut self,
        cond: ExprId,
        then: ExprId,
        els: Option<ExprId>,
        ty: Ty,
    ) -> ExprId {
        self.add_expr(Expr::new(ExprKind::If { cond, then, els }, ty))
    }
}
