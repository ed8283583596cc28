//! 分派表测试

use super::{manager, subst_of};
use crate::mono::{InstantiationManager, InternalError, MonoError};
use crate::tree::{DeclId, Package, Ty, TypeKind};
use crate::util::config::MonoConfig;

/// 声明返回 `ret` 的方法；`body` 为真时给出函数体
fn method(
    pkg: &mut Package,
    owner: DeclId,
    name: &str,
    ret: Ty,
    body: bool,
) -> DeclId {
    let func = pkg.declare_func(Some(owner), name, &[]);
    pkg.set_return(func, ret);
    if body {
        let lit = pkg.str_lit(name);
        pkg.set_body(func, lit);
    }
    func
}

/// ```text
/// interface Animal { speak() -> String; name() -> String = "animal" }
/// ```
fn animal(pkg: &mut Package) -> (DeclId, DeclId, DeclId) {
    let animal = pkg.declare_interface("Animal", &[]);
    let speak = method(pkg, animal, "speak", Ty::string(), false);
    let name = method(pkg, animal, "name", Ty::string(), true);
    (animal, speak, name)
}

#[test]
fn test_own_method_and_default_body() {
    let mut pkg = Package::new("demo");
    let (animal, speak, name) = animal(&mut pkg);
    let dog = pkg.declare_type(None, "Dog", TypeKind::Class, &[]);
    pkg.add_super(dog, Ty::named(animal, vec![]));
    let dog_speak = method(&mut pkg, dog, "speak", Ty::string(), true);

    let mut m = manager(pkg);
    let table = m.dispatch_table(dog).unwrap();
    assert_eq!(table.len(), 2);

    assert_eq!(table[0].abstract_method, speak);
    assert_eq!(table[0].implementation, dog_speak);
    assert_eq!(table[0].interface, animal);
    assert_eq!(table[0].slot, 0);

    // 没有覆盖时用接口的默认实现
    assert_eq!(table[1].abstract_method, name);
    assert_eq!(table[1].implementation, name);
    assert_eq!(table[1].slot, 1);

    let entry = m.dispatch_entry(dog, speak).unwrap().unwrap();
    assert_eq!(entry.implementation, dog_speak);
}

#[test]
fn test_inherited_implementation() {
    let mut pkg = Package::new("demo");
    let (animal, speak, _) = animal(&mut pkg);
    let base = pkg.declare_type(None, "Base", TypeKind::Class, &[]);
    pkg.add_super(base, Ty::named(animal, vec![]));
    let base_speak = method(&mut pkg, base, "speak", Ty::string(), true);
    let puppy = pkg.declare_type(None, "Puppy", TypeKind::Class, &[]);
    pkg.add_super(puppy, Ty::named(base, vec![]));

    let mut m = manager(pkg);
    let entry = m.dispatch_entry(puppy, speak).unwrap().unwrap();
    assert_eq!(entry.implementation, base_speak);
}

#[test]
fn test_abstract_class_method() {
    let mut pkg = Package::new("demo");
    let shape = pkg.declare_type(None, "Shape", TypeKind::Class, &[]);
    let area = method(&mut pkg, shape, "area", Ty::float64(), false);
    // 有函数体的方法不进入分派表
    method(&mut pkg, shape, "describe", Ty::string(), true);
    let square = pkg.declare_type(None, "Square", TypeKind::Class, &[]);
    pkg.add_super(square, Ty::named(shape, vec![]));
    let square_area = method(&mut pkg, square, "area", Ty::float64(), true);

    let mut m = manager(pkg);
    let table = m.dispatch_table(square).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table[0].abstract_method, area);
    assert_eq!(table[0].implementation, square_area);
}

#[test]
fn test_signature_must_match() {
    let mut pkg = Package::new("demo");
    let (animal, _, _) = animal(&mut pkg);
    let cat = pkg.declare_type(None, "Cat", TypeKind::Class, &[]);
    pkg.add_super(cat, Ty::named(animal, vec![]));
    // 返回类型不同，不算实现
    method(&mut pkg, cat, "speak", Ty::int64(), true);

    let mut m = manager(pkg);
    let err = m.dispatch_table(cat).unwrap_err();
    assert!(matches!(
        err,
        MonoError::Internal(InternalError::UnresolvedDispatch { .. })
    ));
}

#[test]
fn test_ambiguous_implementation() {
    let mut pkg = Package::new("demo");
    let (animal, _, _) = animal(&mut pkg);
    let dog = pkg.declare_type(None, "Dog", TypeKind::Class, &[]);
    pkg.add_super(dog, Ty::named(animal, vec![]));
    method(&mut pkg, dog, "speak", Ty::string(), true);
    method(&mut pkg, dog, "speak", Ty::string(), true);

    let mut m = manager(pkg);
    match m.dispatch_table(dog).unwrap_err() {
        MonoError::Internal(InternalError::AmbiguousDispatch { candidates, .. }) => {
            assert_eq!(candidates.len(), 2);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_extension_provides_interface_and_method() {
    let mut pkg = Package::new("demo");
    let greet = pkg.declare_interface("Greet", &[]);
    let hello = method(&mut pkg, greet, "hello", Ty::string(), false);
    let robot = pkg.declare_type(None, "Robot", TypeKind::Class, &[]);

    // extend Robot: Greet { hello() -> String }
    let ext = pkg.declare_extend(&[]);
    pkg.set_extended(ext, Ty::named(robot, vec![]));
    pkg.add_extend_interface(ext, Ty::named(greet, vec![]));
    let ext_hello = method(&mut pkg, ext, "hello", Ty::string(), true);

    let mut m = manager(pkg);
    let entry = m.dispatch_entry(robot, hello).unwrap().unwrap();
    assert_eq!(entry.interface, greet);
    assert_eq!(entry.implementation, ext_hello);
}

/// ```text
/// interface Getter<T> { get() -> T }
/// class Cell<T>: Getter<T> { get() -> T = "..." }
/// ```
fn cell_package() -> (Package, DeclId, DeclId, DeclId) {
    let mut pkg = Package::new("demo");
    let getter = pkg.declare_interface("Getter", &["T"]);
    let gt = pkg.type_param(getter, 0);
    let getter_get = method(&mut pkg, getter, "get", gt, false);

    let cell = pkg.declare_type(None, "Cell", TypeKind::Class, &["T"]);
    let ct = pkg.type_param(cell, 0);
    pkg.add_super(cell, Ty::named(getter, vec![ct.clone()]));
    method(&mut pkg, cell, "get", ct, true);
    (pkg, getter, getter_get, cell)
}

#[test]
fn test_generic_instances_get_their_own_tables() {
    let (pkg, getter, getter_get, cell) = cell_package();
    let mut m = manager(pkg);
    let ints = subst_of(m.package(), cell, &[Ty::int64()]);
    let bools = subst_of(m.package(), cell, &[Ty::bool()]);
    let cell_int = m.get_or_instantiate(cell, ints).unwrap();
    let cell_bool = m.get_or_instantiate(cell, bools).unwrap();

    let int_entry = m.dispatch_entry(cell_int, getter_get).unwrap().unwrap();
    let bool_entry = m.dispatch_entry(cell_bool, getter_get).unwrap().unwrap();

    // 实现是各自实例的成员，接口也按实参实例化
    assert_eq!(m.template_of(int_entry.implementation), m.template_of(bool_entry.implementation));
    assert_ne!(int_entry.implementation, bool_entry.implementation);
    assert_eq!(m.package().decl(int_entry.implementation).parent, Some(cell_int));
    assert_eq!(m.package().display_name(int_entry.interface), "Getter<Int64>");
    assert_eq!(m.template_of(int_entry.interface), getter);
    assert_eq!(m.template_of(int_entry.abstract_method), getter_get);
}

#[test]
fn test_eager_dispatch_builds_tables() {
    let (mut pkg, _, _, cell) = cell_package();
    super::use_type_in_main(&mut pkg, "main", Ty::named(cell, vec![Ty::int64()]));
    let config = MonoConfig {
        eager_dispatch: true,
        ..Default::default()
    };
    let mut m = InstantiationManager::new(pkg, config);
    m.instantiate_package().unwrap();

    let cell_int = m.all_instantiations_of(cell)[0];
    assert!(m.dispatch.is_built(cell_int));
    assert_eq!(m.dispatch.len(), 1);
}

#[test]
fn test_table_is_cached_until_invalidated() {
    let (pkg, _, _, cell) = cell_package();
    let mut m = manager(pkg);
    let cell_int = m
        .get_or_instantiate(cell, subst_of(m.package(), cell, &[Ty::int64()]))
        .unwrap();
    let first = m.dispatch_table(cell_int).unwrap();
    assert_eq!(m.dispatch_table(cell_int).unwrap(), first);

    m.invalidate(cell_int).unwrap();
    assert!(!m.dispatch.is_built(cell_int));
}

#[test]
fn test_unknown_type_dispatch() {
    let mut m = manager(Package::new("demo"));
    let err = m.dispatch_table(DeclId(9_999)).unwrap_err();
    assert!(err.is_internal());
    assert_eq!(err, MonoError::Internal(InternalError::UnknownDecl(DeclId(9_999))));
}
