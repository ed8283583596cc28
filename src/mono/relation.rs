//! 包关系查询
//!
//! 导入解析不在本 crate 内；这里只消费它回答的一个问题：
//! 从某个包能否（以及是否应当）实例化另一个包的声明。

use crate::tree::{DeclId, Package};

/// 包关系查询
pub trait PackageRelations: Send {
    /// 从包 `from` 能否访问 `target`
    fn is_accessible(
        &self,
        pkg: &Package,
        from: &str,
        target: DeclId,
    ) -> bool;
}

/// 同包或公开声明可访问
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRelations;

impl PackageRelations for DefaultRelations {
    fn is_accessible(
        &self,
        pkg: &Package,
        from: &str,
        target: DeclId,
    ) -> bool {
        let decl = pkg.decl(target);
        if decl.package == from || decl.attrs.public {
            return true;
        }
        // 成员跟随所属类型的可见性
        match decl.parent {
            Some(parent) => {
                let owner = pkg.decl(parent);
                owner.package == from || (owner.attrs.public && decl.attrs.public)
            }
            None => false,
        }
    }
}
