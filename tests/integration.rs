//! 集成测试：通过公开 API 与命令行驱动实例化引擎

use yaoxiang_mono::tree::{DeclId, Package, Ty, TypeKind};

#[path = "integration/cli.rs"]
mod cli;
#[path = "integration/incremental.rs"]
mod incremental;
#[path = "integration/instantiation.rs"]
mod instantiation;

/// ```text
/// class Box<T> {
///     value: T
///     get() -> T = value
/// }
/// main() = { let b: Box<Int64>; b.get() }
/// ```
pub struct Demo {
    pub pkg: Package,
    pub boxed: DeclId,
    pub get: DeclId,
}

pub fn demo_package() -> Demo {
    let mut pkg = Package::new("demo");
    let boxed = pkg.declare_type(None, "Box", TypeKind::Class, &["T"]);
    let t = pkg.type_param(boxed, 0);
    let value = pkg.declare_field(boxed, "value", t.clone());
    let get = pkg.declare_func(Some(boxed), "get", &[]);
    pkg.set_return(get, t.clone());
    let body = pkg.ref_expr(value, vec![], t);
    pkg.set_body(get, body);

    let main = pkg.declare_func(None, "main", &[]);
    let box_int = Ty::named(boxed, vec![Ty::int64()]);
    let (b, let_b) = pkg.declare_local(main, "b", box_int.clone(), None);
    let b_ref = pkg.ref_expr(b, vec![], box_int.clone());
    let call = pkg.member_expr(Some(b_ref), box_int, get, vec![], Ty::int64());
    let block = pkg.block_expr(vec![let_b, call], Ty::int64());
    pkg.set_body(main, block);

    Demo { pkg, boxed, get }
}
