//! 并发边界
//!
//! 实例化本身是单线程的。并行流水线有两种接入方式：
//! - 实例化阶段结束后交出不可变的包（`InstantiationManager::into_package`）
//! - 用 [`SharedInstantiationManager`] 在整个 `get_or_instantiate` 外加一把粗粒度锁
//!
//! 下游的类型驻留表 [`TypeInterner`] 可被多个代码生成线程同时访问。

use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use super::dispatch::DispatchEntry;
use super::error::MonoResult;
use super::substitution::TypeSubstitution;
use super::InstantiationManager;
use crate::tree::{DeclId, Ty};

/// 加锁共享的实例化管理器
#[derive(Clone)]
pub struct SharedInstantiationManager {
    inner: Arc<Mutex<InstantiationManager>>,
}

impl SharedInstantiationManager {
    pub fn new(manager: InstantiationManager) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    pub fn get_or_instantiate(
        &self,
        generic: DeclId,
        subst: TypeSubstitution,
    ) -> MonoResult<DeclId> {
        self.inner.lock().get_or_instantiate(generic, subst)
    }

    pub fn all_instantiations_of(
        &self,
        generic: DeclId,
    ) -> Vec<DeclId> {
        self.inner.lock().all_instantiations_of(generic)
    }

    pub fn dispatch_table(
        &self,
        ty: DeclId,
    ) -> MonoResult<Vec<DispatchEntry>> {
        self.inner.lock().dispatch_table(ty)
    }

    /// 在锁内执行任意操作
    pub fn with<R>(
        &self,
        f: impl FnOnce(&mut InstantiationManager) -> R,
    ) -> R {
        f(&mut *self.inner.lock())
    }

    /// 最后一个持有者取回管理器
    pub fn try_into_inner(self) -> Result<InstantiationManager, Self> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| Self { inner })
    }
}

/// 驻留类型的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeHandle(pub u32);

/// 类型驻留表
#[derive(Debug, Default)]
pub struct TypeInterner {
    table: RwLock<IndexSet<Ty>>,
}

impl TypeInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 相同类型总是得到相同句柄
    pub fn intern(
        &self,
        ty: &Ty,
    ) -> TypeHandle {
        if let Some(index) = self.table.read().get_index_of(ty) {
            return TypeHandle(index as u32);
        }
        let (index, _) = self.table.write().insert_full(ty.clone());
        TypeHandle(index as u32)
    }

    pub fn resolve(
        &self,
        handle: TypeHandle,
    ) -> Option<Ty> {
        self.table.read().get_index(handle.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }
}
