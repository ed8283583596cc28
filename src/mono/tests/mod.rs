//! 实例化引擎测试
//!
//! 夹具直接用构建器拼出类型检查后的声明树。

mod dispatch_tests;
mod mock_tests;

use crate::mono::{InstantiationManager, TypeSubstitution};
use crate::tree::{DeclId, Package, Ty, TypeKind};
use crate::util::config::MonoConfig;

pub(super) fn manager(pkg: Package) -> InstantiationManager {
    InstantiationManager::new(pkg, MonoConfig::default())
}

/// 以声明自身的类型参数建立替换
pub(super) fn subst_of(
    pkg: &Package,
    generic: DeclId,
    args: &[Ty],
) -> TypeSubstitution {
    TypeSubstitution::from_args(&pkg.decl(generic).own_param_ids(), args).unwrap()
}

/// ```text
/// class Box<T> {
///     value: T
///     get() -> T = value
///     with<U>(u: U) -> U = u
/// }
/// main() = { let b: Box<Int64>; b.get() }
/// ```
pub(super) struct BoxFixture {
    pub pkg: Package,
    pub boxed: DeclId,
    pub value: DeclId,
    pub get: DeclId,
    pub with: DeclId,
    pub main: DeclId,
}

pub(super) fn box_fixture() -> BoxFixture {
    let mut pkg = Package::new("demo");
    let boxed = declare_box(&mut pkg);
    let value = pkg.find_member(boxed, "value").unwrap();
    let get = pkg.find_member(boxed, "get").unwrap();
    let with = pkg.find_member(boxed, "with").unwrap();

    let main = pkg.declare_func(None, "main", &[]);
    let box_int = Ty::named(boxed, vec![Ty::int64()]);
    let (b, let_b) = pkg.declare_local(main, "b", box_int.clone(), None);
    let b_ref = pkg.ref_expr(b, vec![], box_int.clone());
    let call = pkg.member_expr(Some(b_ref), box_int, get, vec![], Ty::int64());
    let body = pkg.block_expr(vec![let_b, call], Ty::int64());
    pkg.set_body(main, body);

    BoxFixture {
        pkg,
        boxed,
        value,
        get,
        with,
        main,
    }
}

/// 只声明 `Box<T>`
pub(super) fn declare_box(pkg: &mut Package) -> DeclId {
    let boxed = pkg.declare_type(None, "Box", TypeKind::Class, &["T"]);
    let t = pkg.type_param(boxed, 0);
    let value = pkg.declare_field(boxed, "value", t.clone());

    let get = pkg.declare_func(Some(boxed), "get", &[]);
    pkg.set_return(get, t.clone());
    let body = pkg.ref_expr(value, vec![], t);
    pkg.set_body(get, body);

    let with = pkg.declare_func(Some(boxed), "with", &["U"]);
    let u = pkg.type_param(with, 0);
    let param = pkg.add_param(with, "u", u.clone());
    pkg.set_return(with, u.clone());
    let body = pkg.ref_expr(param, vec![], u);
    pkg.set_body(with, body);
    boxed
}

/// 在 `main` 中引用 `ty` 的一个局部变量，使重排实例化它
pub(super) fn use_type_in_main(
    pkg: &mut Package,
    name: &str,
    ty: Ty,
) -> DeclId {
    let main = pkg.declare_func(None, name, &[]);
    let (_, let_x) = pkg.declare_local(main, "x", ty, None);
    let body = pkg.block_expr(vec![let_x], Ty::unit());
    pkg.set_body(main, body);
    main
}

/// 变量声明的类型
pub(super) fn var_ty(
    pkg: &Package,
    var: DeclId,
) -> Ty {
    match &pkg.decl(var).kind {
        crate::tree::DeclKind::Var(v) => v.ty.clone(),
        other => panic!("expected a variable, found {}", other.kind_name()),
    }
}

/// 函数的返回类型
pub(super) fn ret_ty(
    pkg: &Package,
    func: DeclId,
) -> Ty {
    match &pkg.decl(func).kind {
        crate::tree::DeclKind::Func(f) => f.ret.clone(),
        other => panic!("expected a function, found {}", other.kind_name()),
    }
}
