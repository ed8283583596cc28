//! 声明树
//!
//! 类型检查后的声明与表达式，存放在以稳定句柄索引的竞技场 [`Package`] 中。
//! 实例与原型之间、成员与所属类型之间的回指都是句柄而不是指针，
//! 所以克隆后的改写只是“在映射表里查句柄”。
//!
//! 解析器和类型检查器不在本 crate 内；它们产出的就是这里的 [`Package`]。

pub mod builder;
pub mod clone;
pub mod types;
pub mod walk;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::util::span::Span;

pub use self::clone::{CloneError, CloneOptions, DeclCloner, NodePair, TreeCloner};
pub use self::types::{PrimTy, Ty, TypeParam, TypeParamId};

/// 声明句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeclId(pub u32);

/// 表达式句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExprId(pub u32);

impl fmt::Display for DeclId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

impl fmt::Display for ExprId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// 句柄改写器
///
/// 克隆、持久化恢复和引用收集共用同一套遍历，区别只在映射器。
pub trait IdMapper {
    fn decl(
        &mut self,
        id: DeclId,
    ) -> DeclId;

    fn expr(
        &mut self,
        id: ExprId,
    ) -> ExprId;

    fn param(
        &mut self,
        param: TypeParamId,
    ) -> TypeParamId {
        param
    }

    /// 引用位置（命名类型、`Ref` 目标、成员目标）上的声明
    fn reference(
        &mut self,
        id: DeclId,
    ) -> DeclId {
        self.decl(id)
    }
}

/// 基于表的句柄映射；表中没有的句柄保持不变
#[derive(Debug, Default, Clone)]
pub struct IdRemap {
    pub decls: HashMap<DeclId, DeclId>,
    pub exprs: HashMap<ExprId, ExprId>,
    /// 是否同时改写类型参数的主人（只在跨构建恢复时需要）
    pub remap_param_owners: bool,
    /// 只在结构位置改写的声明；引用位置保持原句柄
    pub pinned: HashSet<DeclId>,
}

impl IdMapper for IdRemap {
    fn decl(
        &mut self,
        id: DeclId,
    ) -> DeclId {
        self.decls.get(&id).copied().unwrap_or(id)
    }

    fn expr(
        &mut self,
        id: ExprId,
    ) -> ExprId {
        self.exprs.get(&id).copied().unwrap_or(id)
    }

    fn param(
        &mut self,
        param: TypeParamId,
    ) -> TypeParamId {
        if self.remap_param_owners {
            TypeParamId::new(self.decl(param.owner), param.index)
        } else {
            param
        }
    }

    fn reference(
        &mut self,
        id: DeclId,
    ) -> DeclId {
        if self.pinned.contains(&id) {
            id
        } else {
            self.decl(id)
        }
    }
}

/// 修饰符；克隆时原样复制
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub public: bool,
    pub mutable: bool,
    pub is_abstract: bool,
    /// 由编译器生成
    pub compiler_added: bool,
}

/// 注解
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    pub args: Vec<String>,
}

impl Annotation {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Vec::new(),
        }
    }
}

/// 类型种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeKind {
    Class,
    Struct,
    Enum,
}

/// 变量种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarKind {
    Field,
    Param,
    Local,
    Global,
}

/// 泛型约束 `where T: Interface`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bound {
    pub param: TypeParamId,
    pub interface: Ty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncDecl {
    /// 参数（`VarKind::Param` 的变量声明）
    pub params: Vec<DeclId>,
    pub ret: Ty,
    /// 没有函数体即抽象方法
    pub body: Option<ExprId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub kind: TypeKind,
    /// 父类与实现的接口
    pub supers: Vec<Ty>,
    pub members: Vec<DeclId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDecl {
    pub supers: Vec<Ty>,
    pub members: Vec<DeclId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendDecl {
    /// 被扩展的类型模式，可以含扩展自己的类型参数
    pub extended: Ty,
    /// 扩展附加实现的接口
    pub interfaces: Vec<Ty>,
    pub bounds: Vec<Bound>,
    pub members: Vec<DeclId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub kind: VarKind,
    pub ty: Ty,
    pub init: Option<ExprId>,
}

/// 声明种类（封闭集合）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeclKind {
    Func(FuncDecl),
    Type(TypeDecl),
    Interface(InterfaceDecl),
    Extend(ExtendDecl),
    Var(VarDecl),
    /// 已预留、尚未填充的槽位
    Placeholder,
}

impl DeclKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            DeclKind::Func(_) => "func",
            DeclKind::Type(_) => "type",
            DeclKind::Interface(_) => "interface",
            DeclKind::Extend(_) => "extend",
            DeclKind::Var(_) => "var",
            DeclKind::Placeholder => "placeholder",
        }
    }

    /// 成员列表（类型、接口、扩展）
    pub fn members(&self) -> &[DeclId] {
        match self {
            DeclKind::Type(t) => &t.members,
            DeclKind::Interface(i) => &i.members,
            DeclKind::Extend(e) => &e.members,
            _ => &[],
        }
    }

    pub fn members_mut(&mut self) -> Option<&mut Vec<DeclId>> {
        match self {
            DeclKind::Type(t) => Some(&mut t.members),
            DeclKind::Interface(i) => Some(&mut i.members),
            DeclKind::Extend(e) => Some(&mut e.members),
            _ => None,
        }
    }

    /// 对每个类型槽位应用可失败的变换
    pub fn try_map_types<E>(
        &mut self,
        f: &mut dyn FnMut(&Ty) -> Result<Ty, E>,
    ) -> Result<(), E> {
        match self {
            DeclKind::Func(func) => {
                func.ret = f(&func.ret)?;
            }
            DeclKind::Type(ty) => {
                for sup in ty.supers.iter_mut() {
                    *sup = f(sup)?;
                }
            }
            DeclKind::Interface(iface) => {
                for sup in iface.supers.iter_mut() {
                    *sup = f(sup)?;
                }
            }
            DeclKind::Extend(ext) => {
                ext.extended = f(&ext.extended)?;
                for iface in ext.interfaces.iter_mut() {
                    *iface = f(iface)?;
                }
                for bound in ext.bounds.iter_mut() {
                    bound.interface = f(&bound.interface)?;
                }
            }
            DeclKind::Var(var) => {
                var.ty = f(&var.ty)?;
            }
            DeclKind::Placeholder => {}
        }
        Ok(())
    }

    /// 对每个类型槽位应用变换
    pub fn map_types(
        &mut self,
        f: &mut dyn FnMut(&Ty) -> Ty,
    ) {
        let _ = self.try_map_types::<std::convert::Infallible>(&mut |ty| Ok(f(ty)));
    }

    /// 改写所有句柄字段
    pub fn map_ids(
        &mut self,
        mapper: &mut dyn IdMapper,
    ) {
        match self {
            DeclKind::Func(func) => {
                map_list(&mut func.params, &mut *mapper);
                func.ret.map_ids(mapper);
                func.body = func.body.map(|b| mapper.expr(b));
            }
            DeclKind::Type(ty) => {
                ty.supers.iter_mut().for_each(|t| t.map_ids(mapper));
                map_list(&mut ty.members, &mut *mapper);
            }
            DeclKind::Interface(iface) => {
                iface.supers.iter_mut().for_each(|t| t.map_ids(mapper));
                map_list(&mut iface.members, &mut *mapper);
            }
            DeclKind::Extend(ext) => {
                ext.extended.map_ids(mapper);
                ext.interfaces.iter_mut().for_each(|t| t.map_ids(mapper));
                for bound in ext.bounds.iter_mut() {
                    bound.param = mapper.param(bound.param);
                    bound.interface.map_ids(mapper);
                }
                map_list(&mut ext.members, &mut *mapper);
            }
            DeclKind::Var(var) => {
                var.ty.map_ids(mapper);
                var.init = var.init.map(|e| mapper.expr(e));
            }
            DeclKind::Placeholder => {}
        }
    }
}

fn map_list(
    list: &mut [DeclId],
    mapper: &mut dyn IdMapper,
) {
    for id in list.iter_mut() {
        *id = mapper.decl(*id);
    }
}

/// 声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decl {
    pub name: String,
    pub kind: DeclKind,
    pub attrs: Attributes,
    pub annotations: Vec<Annotation>,
    /// 自身引入的类型参数（部分实例只保留尚未替换的那些）
    pub type_params: Vec<TypeParam>,
    /// 所属声明（成员 → 类型，参数/局部变量 → 函数）
    pub parent: Option<DeclId>,
    /// 所属包
    pub package: String,
    /// 实例回指的泛型原型
    pub generic_origin: Option<DeclId>,
    /// 实例的修饰名，如 `Box<Int64>`
    pub mangled: Option<String>,
    pub span: Span,
    /// 先前阶段已报错的声明
    pub broken: bool,
}

impl Decl {
    pub fn new(
        name: &str,
        kind: DeclKind,
        package: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            attrs: Attributes::default(),
            annotations: Vec::new(),
            type_params: Vec::new(),
            parent: None,
            package: package.to_string(),
            generic_origin: None,
            mangled: None,
            span: Span::dummy(),
            broken: false,
        }
    }

    pub fn placeholder() -> Self {
        Self::new("", DeclKind::Placeholder, "")
    }

    pub fn is_func(&self) -> bool {
        matches!(self.kind, DeclKind::Func(_))
    }

    /// 类或接口
    pub fn is_type_like(&self) -> bool {
        matches!(self.kind, DeclKind::Type(_) | DeclKind::Interface(_))
    }

    /// 抽象方法：显式标记或没有函数体
    pub fn is_abstract_func(&self) -> bool {
        match &self.kind {
            DeclKind::Func(func) => self.attrs.is_abstract || func.body.is_none(),
            _ => false,
        }
    }

    pub fn has_annotation(
        &self,
        name: &str,
    ) -> bool {
        self.annotations.iter().any(|a| a.name == name)
    }

    pub fn own_param_ids(&self) -> Vec<TypeParamId> {
        self.type_params.iter().map(|p| p.id).collect()
    }

    /// 改写所有句柄字段
    pub fn map_ids(
        &mut self,
        mapper: &mut dyn IdMapper,
    ) {
        self.kind.map_ids(mapper);
        self.parent = self.parent.map(|p| mapper.decl(p));
        self.generic_origin = self.generic_origin.map(|g| mapper.decl(g));
        for param in self.type_params.iter_mut() {
            param.id = mapper.param(param.id);
        }
    }
}

/// 字面量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// 二元运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Lt,
    Gt,
    And,
    Or,
}

/// 表达式种类（封闭集合）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Lit(Literal),
    /// 对声明的引用，附带显式类型实参
    Ref { target: DeclId, type_args: Vec<Ty> },
    /// 成员访问；`base` 为空表示静态访问，`owner` 是检查器解析出的接收者类型
    Member {
        base: Option<ExprId>,
        owner: Ty,
        member: DeclId,
        type_args: Vec<Ty>,
    },
    Call { callee: ExprId, args: Vec<ExprId> },
    /// 局部变量定义
    Let { var: DeclId },
    Block(Vec<ExprId>),
    Return(Option<ExprId>),
    Binary { op: BinOp, lhs: ExprId, rhs: ExprId },
    If {
        cond: ExprId,
        then: ExprId,
        els: Option<ExprId>,
    },
}

/// 表达式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Ty,
    pub span: Span,
}

impl Expr {
    pub fn new(
        kind: ExprKind,
        ty: Ty,
    ) -> Self {
        Self {
            kind,
            ty,
            span: Span::dummy(),
        }
    }

    pub fn placeholder() -> Self {
        Self::new(ExprKind::Lit(Literal::Unit), Ty::unit())
    }

    /// 对每个类型槽位应用可失败的变换
    pub fn try_map_types<E>(
        &mut self,
        f: &mut dyn FnMut(&Ty) -> Result<Ty, E>,
    ) -> Result<(), E> {
        self.ty = f(&self.ty)?;
        match &mut self.kind {
            ExprKind::Ref { type_args, .. } => {
                for arg in type_args.iter_mut() {
                    *arg = f(arg)?;
                }
            }
            ExprKind::Member {
                owner, type_args, ..
            } => {
                *owner = f(owner)?;
                for arg in type_args.iter_mut() {
                    *arg = f(arg)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn map_types(
        &mut self,
        f: &mut dyn FnMut(&Ty) -> Ty,
    ) {
        let _ = self.try_map_types::<std::convert::Infallible>(&mut |ty| Ok(f(ty)));
    }

    /// 改写所有句柄字段
    pub fn map_ids(
        &mut self,
        mapper: &mut dyn IdMapper,
    ) {
        self.ty.map_ids(mapper);
        match &mut self.kind {
            ExprKind::Lit(_) => {}
            ExprKind::Ref { target, type_args } => {
                *target = mapper.reference(*target);
                type_args.iter_mut().for_each(|t| t.map_ids(mapper));
            }
            ExprKind::Member {
                base,
                owner,
                member,
                type_args,
            } => {
                *base = base.map(|b| mapper.expr(b));
                owner.map_ids(mapper);
                *member = mapper.reference(*member);
                type_args.iter_mut().for_each(|t| t.map_ids(mapper));
            }
            ExprKind::Call { callee, args } => {
                *callee = mapper.expr(*callee);
                args.iter_mut().for_each(|a| *a = mapper.expr(*a));
            }
            ExprKind::Let { var } => *var = mapper.decl(*var),
            ExprKind::Block(items) => items.iter_mut().for_each(|e| *e = mapper.expr(*e)),
            ExprKind::Return(value) => *value = value.map(|v| mapper.expr(v)),
            ExprKind::Binary { lhs, rhs, .. } => {
                *lhs = mapper.expr(*lhs);
                *rhs = mapper.expr(*rhs);
            }
            ExprKind::If { cond, then, els } => {
                *cond = mapper.expr(*cond);
                *then = mapper.expr(*then);
                *els = els.map(|e| mapper.expr(e));
            }
        }
    }
}

/// 编译单元：声明与表达式的竞技场
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    decls: Vec<Decl>,
    exprs: Vec<Expr>,
    /// 源码中的顶层声明
    pub top_level: Vec<DeclId>,
    /// 基本类型对接口的内建实现
    pub builtin_impls: Vec<(PrimTy, DeclId)>,
}

impl Package {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            decls: Vec::new(),
            exprs: Vec::new(),
            top_level: Vec::new(),
            builtin_impls: Vec::new(),
        }
    }

    pub fn decl(
        &self,
        id: DeclId,
    ) -> &Decl {
        &self.decls[id.0 as usize]
    }

    pub fn decl_mut(
        &mut self,
        id: DeclId,
    ) -> &mut Decl {
        &mut self.decls[id.0 as usize]
    }

    pub fn expr(
        &self,
        id: ExprId,
    ) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub fn expr_mut(
        &mut self,
        id: ExprId,
    ) -> &mut Expr {
        &mut self.exprs[id.0 as usize]
    }

    pub fn contains_decl(
        &self,
        id: DeclId,
    ) -> bool {
        (id.0 as usize) < self.decls.len()
    }

    pub fn decl_count(&self) -> usize {
        self.decls.len()
    }

    pub fn expr_count(&self) -> usize {
        self.exprs.len()
    }

    pub fn decl_ids(&self) -> impl Iterator<Item = DeclId> {
        (0..self.decls.len() as u32).map(DeclId)
    }

    pub fn add_decl(
        &mut self,
        decl: Decl,
    ) -> DeclId {
        let id = DeclId(self.decls.len() as u32);
        self.decls.push(decl);
        id
    }

    pub fn add_expr(
        &mut self,
        expr: Expr,
    ) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(expr);
        id
    }

    /// 预留一个声明槽位
    pub fn reserve_decl(&mut self) -> DeclId {
        self.add_decl(Decl::placeholder())
    }

    /// 预留一个表达式槽位
    pub fn reserve_expr(&mut self) -> ExprId {
        self.add_expr(Expr::placeholder())
    }

    /// 作用域内的全部类型参数：外层在前，自身在后
    pub fn scope_type_params(
        &self,
        id: DeclId,
    ) -> Vec<TypeParamId> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            chain.push(current);
            cursor = self.decl(current).parent;
        }
        chain
            .iter()
            .rev()
            .flat_map(|d| self.decl(*d).own_param_ids())
            .collect()
    }

    /// 作用域内是否还有未替换的类型参数
    pub fn is_generic(
        &self,
        id: DeclId,
    ) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let decl = self.decl(current);
            if !decl.type_params.is_empty() {
                return true;
            }
            cursor = decl.parent;
        }
        false
    }

    /// 是否属于某个泛型原型的子树（而不是实例或普通代码）
    pub fn in_generic_template(
        &self,
        id: DeclId,
    ) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let decl = self.decl(current);
            if decl.generic_origin.is_some() {
                return false;
            }
            if !decl.type_params.is_empty() {
                return true;
            }
            cursor = decl.parent;
        }
        false
    }

    /// 类型参数的显示名
    pub fn type_param_name(
        &self,
        param: TypeParamId,
    ) -> String {
        if !self.contains_decl(param.owner) {
            return format!("?{}", param.index);
        }
        self.decl(param.owner)
            .type_params
            .iter()
            .find(|p| p.id == param)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| format!("?{}", param.index))
    }

    /// 显示名：实例用修饰名
    pub fn display_name(
        &self,
        id: DeclId,
    ) -> String {
        let decl = self.decl(id);
        decl.mangled.clone().unwrap_or_else(|| decl.name.clone())
    }

    /// 跨构建稳定的路径，如 `demo::Box::get`；同名兄弟从第二个起加 `#n`
    pub fn stable_path(
        &self,
        id: DeclId,
    ) -> String {
        let decl = self.decl(id);
        let siblings: Vec<DeclId> = match decl.parent {
            Some(parent) => walk::children_decls(self, parent),
            None => self.top_level.clone(),
        };
        let ordinal = siblings
            .iter()
            .filter(|s| self.decl(**s).name == decl.name)
            .position(|s| *s == id)
            .unwrap_or(0);
        let own = if ordinal == 0 {
            decl.name.clone()
        } else {
            format!("{}#{}", decl.name, ordinal)
        };
        match decl.parent {
            Some(parent) => format!("{}::{}", self.stable_path(parent), own),
            None => format!("{}::{}", decl.package, own),
        }
    }

    /// 所有原型声明的稳定路径索引
    pub fn stable_path_index(&self) -> HashMap<String, DeclId> {
        let mut index = HashMap::new();
        let mut stack: Vec<DeclId> = self.top_level.clone();
        while let Some(id) = stack.pop() {
            index.insert(self.stable_path(id), id);
            stack.extend(walk::children_decls(self, id));
        }
        index
    }

    /// 按名字查找成员
    pub fn find_member(
        &self,
        owner: DeclId,
        name: &str,
    ) -> Option<DeclId> {
        self.decl(owner)
            .kind
            .members()
            .iter()
            .copied()
            .find(|m| self.decl(*m).name == name)
    }

    /// 所有扩展声明
    pub fn extensions(&self) -> Vec<DeclId> {
        self.top_level
            .iter()
            .copied()
            .filter(|d| matches!(self.decl(*d).kind, DeclKind::Extend(_)))
            .collect()
    }

    /// 基本类型是否内建实现某接口
    pub fn prim_implements(
        &self,
        prim: PrimTy,
        interface: DeclId,
    ) -> bool {
        self.builtin_impls
            .iter()
            .any(|(p, i)| *p == prim && *i == interface)
    }
}
