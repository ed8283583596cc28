//! 语义类型
//!
//! 类型检查之后的类型表示。`Named` 中的 `DeclId` 是指针形状的引用：
//! 克隆后可能仍指向泛型原型，由重排遍改写为实例句柄。

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{DeclId, IdMapper, Package};

/// 类型参数标识
///
/// 以声明它的泛型原型为主人。克隆不会改写主人，因此替换映射总是以原型的
/// 参数标识为键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeParamId {
    /// 声明该参数的原型
    pub owner: DeclId,
    /// 在原型参数列表中的位置
    pub index: u32,
}

impl TypeParamId {
    pub fn new(
        owner: DeclId,
        index: u32,
    ) -> Self {
        Self { owner, index }
    }
}

/// 类型参数（名字只用于显示）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeParam {
    pub id: TypeParamId,
    pub name: String,
}

/// 基本类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimTy {
    Unit,
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    Char,
    String,
}

impl PrimTy {
    pub fn name(&self) -> &'static str {
        match self {
            PrimTy::Unit => "Unit",
            PrimTy::Bool => "Bool",
            PrimTy::Int32 => "Int32",
            PrimTy::Int64 => "Int64",
            PrimTy::Float32 => "Float32",
            PrimTy::Float64 => "Float64",
            PrimTy::Char => "Char",
            PrimTy::String => "String",
        }
    }
}

/// 语义类型
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    /// 基本类型
    Prim(PrimTy),
    /// 类型参数
    Param(TypeParamId),
    /// 元组
    Tuple(Vec<Ty>),
    /// 函数类型
    Func { params: Vec<Ty>, ret: Box<Ty> },
    /// 用户类型（类、结构体、接口）；实例句柄的 `args` 为空
    Named { decl: DeclId, args: Vec<Ty> },
    /// 引用了损坏声明
    Invalid,
}

impl Ty {
    pub fn unit() -> Ty {
        Ty::Prim(PrimTy::Unit)
    }

    pub fn bool() -> Ty {
        Ty::Prim(PrimTy::Bool)
    }

    pub fn int64() -> Ty {
        Ty::Prim(PrimTy::Int64)
    }

    pub fn float64() -> Ty {
        Ty::Prim(PrimTy::Float64)
    }

    pub fn string() -> Ty {
        Ty::Prim(PrimTy::String)
    }

    pub fn named(
        decl: DeclId,
        args: Vec<Ty>,
    ) -> Ty {
        Ty::Named { decl, args }
    }

    pub fn func(
        params: Vec<Ty>,
        ret: Ty,
    ) -> Ty {
        Ty::Func {
            params,
            ret: Box::new(ret),
        }
    }

    /// 是否包含类型参数
    pub fn contains_param(&self) -> bool {
        match self {
            Ty::Param(_) => true,
            Ty::Prim(_) | Ty::Invalid => false,
            Ty::Tuple(items) => items.iter().any(Ty::contains_param),
            Ty::Func { params, ret } => params.iter().any(Ty::contains_param) || ret.contains_param(),
            Ty::Named { args, .. } => args.iter().any(Ty::contains_param),
        }
    }

    /// 是否包含损坏类型
    pub fn contains_invalid(&self) -> bool {
        match self {
            Ty::Invalid => true,
            Ty::Prim(_) | Ty::Param(_) => false,
            Ty::Tuple(items) => items.iter().any(Ty::contains_invalid),
            Ty::Func { params, ret } => {
                params.iter().any(Ty::contains_invalid) || ret.contains_invalid()
            }
            Ty::Named { args, .. } => args.iter().any(Ty::contains_invalid),
        }
    }

    /// 既无类型参数也无损坏部分
    pub fn is_concrete(&self) -> bool {
        !self.contains_param() && !self.contains_invalid()
    }

    /// 收集出现的类型参数（按首次出现顺序，去重）
    pub fn collect_params(
        &self,
        out: &mut Vec<TypeParamId>,
    ) {
        match self {
            Ty::Param(p) => {
                if !out.contains(p) {
                    out.push(*p);
                }
            }
            Ty::Prim(_) | Ty::Invalid => {}
            Ty::Tuple(items) => items.iter().for_each(|t| t.collect_params(out)),
            Ty::Func { params, ret } => {
                params.iter().for_each(|t| t.collect_params(out));
                ret.collect_params(out);
            }
            Ty::Named { args, .. } => args.iter().for_each(|t| t.collect_params(out)),
        }
    }

    /// 顶层命名类型的声明
    pub fn named_decl(&self) -> Option<DeclId> {
        match self {
            Ty::Named { decl, .. } => Some(*decl),
            _ => None,
        }
    }

    /// 改写类型中的声明句柄（以及按映射器的设置改写参数主人）
    pub fn map_ids(
        &mut self,
        mapper: &mut dyn IdMapper,
    ) {
        match self {
            Ty::Param(p) => *p = mapper.param(*p),
            Ty::Prim(_) | Ty::Invalid => {}
            Ty::Tuple(items) => items.iter_mut().for_each(|t| t.map_ids(mapper)),
            Ty::Func { params, ret } => {
                params.iter_mut().for_each(|t| t.map_ids(mapper));
                ret.map_ids(mapper);
            }
            Ty::Named { decl, args } => {
                *decl = mapper.reference(*decl);
                args.iter_mut().for_each(|t| t.map_ids(mapper));
            }
        }
    }

    /// 用包信息显示类型
    pub fn display<'a>(
        &'a self,
        pkg: &'a Package,
    ) -> TyDisplay<'a> {
        TyDisplay { ty: self, pkg }
    }
}

/// 类型显示辅助
pub struct TyDisplay<'a> {
    ty: &'a Ty,
    pkg: &'a Package,
}

impl fmt::Display for TyDisplay<'_> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let pkg = self.pkg;
        match self.ty {
            Ty::Prim(p) => write!(f, "{}", p.name()),
            Ty::Param(p) => write!(f, "{}", pkg.type_param_name(*p)),
            Ty::Tuple(items) => {
                write!(f, "(")?;
                write_list(f, items, pkg)?;
                write!(f, ")")
            }
            Ty::Func { params, ret } => {
                write!(f, "(")?;
                write_list(f, params, pkg)?;
                write!(f, ") -> {}", ret.display(pkg))
            }
            Ty::Named { decl, args } => {
                write!(f, "{}", pkg.display_name(*decl))?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    write_list(f, args, pkg)?;
                    write!(f, ">")?;
                }
                Ok(())
            }
            Ty::Invalid => write!(f, "<invalid>"),
        }
    }
}

fn write_list(
    f: &mut fmt::Formatter<'_>,
    items: &[Ty],
    pkg: &Package,
) -> fmt::Result {
    for (i, ty) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", ty.display(pkg))?;
    }
    Ok(())
}
