//! 声明树测试

use crate::tree::walk::{children_decls, collect_subtree, full_subtree};
use crate::tree::{
    CloneError, CloneOptions, DeclCloner, DeclId, DeclKind, ExprKind, NodePair, Package, Ty,
    TreeCloner, TypeKind, TypeParamId,
};

/// Box<T> { value: T; get() -> T = value; with<U>(u: U) -> U = u }
struct BoxTree {
    pkg: Package,
    boxed: DeclId,
    value: DeclId,
    get: DeclId,
    with: DeclId,
}

fn box_tree() -> BoxTree {
    let mut pkg = Package::new("demo");
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

    BoxTree {
        pkg,
        boxed,
        value,
        get,
        with,
    }
}

#[test]
fn test_builder_attaches_members() {
    let tree = box_tree();
    let pkg = &tree.pkg;

    assert_eq!(pkg.top_level, vec![tree.boxed]);
    assert_eq!(
        pkg.decl(tree.boxed).kind.members(),
        &[tree.value, tree.get, tree.with]
    );
    assert_eq!(pkg.decl(tree.value).parent, Some(tree.boxed));
    assert_eq!(pkg.decl(tree.value).package, "demo");
    assert_eq!(
        pkg.decl(tree.boxed).type_params[0].id,
        TypeParamId::new(tree.boxed, 0)
    );
}

#[test]
fn test_scope_type_params_outer_first() {
    let tree = box_tree();
    let pkg = &tree.pkg;

    assert_eq!(
        pkg.scope_type_params(tree.with),
        vec![TypeParamId::new(tree.boxed, 0), TypeParamId::new(tree.with, 0)]
    );
    // 非泛型成员也在外层参数的作用域内
    assert_eq!(
        pkg.scope_type_params(tree.get),
        vec![TypeParamId::new(tree.boxed, 0)]
    );
    assert!(pkg.is_generic(tree.get));
    assert!(pkg.in_generic_template(tree.get));
}

#[test]
fn test_children_decls_include_params_and_locals() {
    let mut pkg = Package::new("demo");
    let f = pkg.declare_func(None, "f", &[]);
    let x = pkg.add_param(f, "x", Ty::int64());
    let one = pkg.int_lit(1);
    let (y, let_y) = pkg.declare_local(f, "y", Ty::int64(), Some(one));
    let body = pkg.block_expr(vec![let_y], Ty::unit());
    pkg.set_body(f, body);

    assert_eq!(children_decls(&pkg, f), vec![x, y]);
}

#[test]
fn test_collect_subtree_skips_nested_generics() {
    let tree = box_tree();
    let pkg = &tree.pkg;

    let subtree = collect_subtree(pkg, tree.boxed, &|pkg, id| {
        !pkg.decl(id).type_params.is_empty()
    });
    assert_eq!(subtree.decls, vec![tree.boxed, tree.value, tree.get]);
    assert_eq!(subtree.skipped, vec![tree.with]);
    // get 的函数体
    assert_eq!(subtree.exprs.len(), 1);

    let full = full_subtree(pkg, tree.boxed);
    assert_eq!(full.decls.len(), 5);
    assert!(full.skipped.is_empty());
}

#[test]
fn test_root_is_never_skipped() {
    let tree = box_tree();
    let subtree = collect_subtree(&tree.pkg, tree.with, &|_, _| true);
    assert_eq!(subtree.decls, vec![tree.with]);
}

#[test]
fn test_clone_remaps_internal_refs() {
    let mut tree = box_tree();
    let mut cloner = TreeCloner::new();
    let mut pairs = Vec::new();
    let root = cloner
        .clone_decl(
            &mut tree.pkg,
            tree.boxed,
            &CloneOptions {
                reserved_root: None,
                skip_nested_generics: true,
            },
            &mut |_, pair| pairs.push(pair),
        )
        .unwrap();
    let pkg = &tree.pkg;

    assert_ne!(root, tree.boxed);
    assert_eq!(cloner.cloned_decls(), 3);
    assert!(pairs.contains(&NodePair::Skipped(tree.with)));

    // 嵌套泛型被移出成员表
    let members = pkg.decl(root).kind.members().to_vec();
    assert_eq!(members.len(), 2);
    let value_clone = members[0];
    let get_clone = members[1];
    assert_eq!(pkg.decl(value_clone).parent, Some(root));

    // 函数体内对字段的引用指向副本
    let DeclKind::Func(func) = &pkg.decl(get_clone).kind else {
        panic!("get should stay a function");
    };
    let body = func.body.unwrap();
    assert!(matches!(
        pkg.expr(body).kind,
        ExprKind::Ref { target, .. } if target == value_clone
    ));

    // 类型参数的主人不改写
    assert_eq!(
        pkg.decl(root).type_params[0].id,
        TypeParamId::new(tree.boxed, 0)
    );
}

#[test]
fn test_clone_into_reserved_slot() {
    let mut tree = box_tree();
    let reserved = tree.pkg.reserve_decl();
    let root = TreeCloner::new()
        .clone_decl(
            &mut tree.pkg,
            tree.get,
            &CloneOptions {
                reserved_root: Some(reserved),
                skip_nested_generics: false,
            },
            &mut |_, _| {},
        )
        .unwrap();
    assert_eq!(root, reserved);
    assert_eq!(tree.pkg.decl(reserved).name, "get");
}

#[test]
fn test_clone_keeps_root_self_reference() {
    // List<T> { next: List<T> }
    let mut pkg = Package::new("demo");
    let list = pkg.declare_type(None, "List", TypeKind::Class, &["T"]);
    let t = pkg.type_param(list, 0);
    pkg.declare_field(list, "next", Ty::named(list, vec![t.clone()]));

    let root = TreeCloner::new()
        .clone_decl(&mut pkg, list, &CloneOptions::default(), &mut |_, _| {})
        .unwrap();
    let next = pkg.find_member(root, "next").unwrap();
    assert_ne!(next, pkg.find_member(list, "next").unwrap());

    // 自引用仍指向模板，由实参决定最终实例
    let DeclKind::Var(var) = &pkg.decl(next).kind else {
        panic!("next should stay a field");
    };
    assert_eq!(var.ty, Ty::named(list, vec![t]));
}

#[test]
fn test_clone_broken_subtree() {
    let mut tree = box_tree();
    tree.pkg.mark_broken(tree.value);
    let before = tree.pkg.decl_count();

    let err = TreeCloner::new()
        .clone_decl(
            &mut tree.pkg,
            tree.boxed,
            &CloneOptions::default(),
            &mut |_, _| {},
        )
        .unwrap_err();
    assert_eq!(err, CloneError::Broken(tree.value));
    // 失败时不分配任何槽位
    assert_eq!(tree.pkg.decl_count(), before);
}

#[test]
fn test_stable_path_ordinals() {
    let mut pkg = Package::new("demo");
    let first = pkg.declare_extend(&[]);
    let second = pkg.declare_extend(&[]);
    let boxed = pkg.declare_type(None, "Box", TypeKind::Struct, &["T"]);
    let get = pkg.declare_func(Some(boxed), "get", &[]);

    assert_eq!(pkg.stable_path(first), "demo::extend");
    assert_eq!(pkg.stable_path(second), "demo::extend#1");
    assert_eq!(pkg.stable_path(get), "demo::Box::get");

    let index = pkg.stable_path_index();
    assert_eq!(index.get("demo::extend#1"), Some(&second));
    assert_eq!(index.get("demo::Box::get"), Some(&get));
}

#[test]
fn test_ty_display() {
    let tree = box_tree();
    let pkg = &tree.pkg;

    let boxed = Ty::named(tree.boxed, vec![Ty::int64()]);
    assert_eq!(boxed.display(pkg).to_string(), "Box<Int64>");

    let func = Ty::func(vec![Ty::int64(), Ty::bool()], Ty::string());
    assert_eq!(func.display(pkg).to_string(), "(Int64, Bool) -> String");

    let param = pkg.type_param(tree.boxed, 0);
    assert_eq!(param.display(pkg).to_string(), "T");
    assert!(!param.is_concrete());
    assert!(boxed.is_concrete());
}

#[test]
fn test_package_serde_roundtrip() {
    let tree = box_tree();
    let json = serde_json::to_string(&tree.pkg).unwrap();
    let back: Package = serde_json::from_str(&json).unwrap();
    assert_eq!(back.decl_count(), tree.pkg.decl_count());
    assert_eq!(back.decl(tree.get), tree.pkg.decl(tree.get));
}
