//! 泛型实例化引擎
//!
//! 把泛型声明（函数、类型、扩展）与一个具体的类型替换变成完全具体的声明。
//! 核心约束：
//! 1. 同一个 (泛型原型, 替换) 在一个编译单元内只产生一个实例
//! 2. 克隆后子树内的句柄指向副本，子树外对泛型兄弟的引用由重排遍改写为实例
//! 3. 扩展对每个具体类型只附加一次；分派表按具体类型重新推导
//! 4. 增量构建时从缓存文件恢复未变化原型的实例
//!
//! 所有状态都由 [`InstantiationManager`] 持有：编译开始时 `new`，
//! 结束时 `into_package` 交给下游阶段。

pub mod cache;
pub mod dispatch;
pub mod error;
pub mod extension;
pub mod incremental;
pub mod instance;
pub mod instantiate;
pub mod mock;
pub mod rearrange;
pub mod relation;
pub mod shared;
pub mod substitution;
pub mod verify;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use tracing::{debug, info};

use crate::tree::{DeclCloner, DeclId, DeclKind, Package, TreeCloner, Ty};
use crate::util::config::MonoConfig;

use self::cache::InstantiationCache;
use self::dispatch::DispatchMap;
use self::extension::ExtensionRecorder;
use self::relation::{DefaultRelations, PackageRelations};

pub use self::cache::{CacheLookup, CacheStats};
pub use self::dispatch::DispatchEntry;
pub use self::error::{InternalError, MonoError, MonoResult};
pub use self::incremental::{CacheFile, IncrementalInput, RestoreReport};
pub use self::instance::{InstantiationKey, InstantiationState};
pub use self::substitution::TypeSubstitution;

/// `instantiate_package` 的结果
#[derive(Debug, Clone, Default)]
pub struct InstantiationSummary {
    /// 被重排的非泛型顶层声明
    pub rearranged: usize,
    /// 缓存中的实例数
    pub instances: usize,
    /// 因引用损坏声明而被标记的声明
    pub broken: Vec<DeclId>,
}

/// 实例化管理器（每个编译单元一个）
pub struct InstantiationManager {
    pkg: Package,
    cache: InstantiationCache,
    extensions: ExtensionRecorder,
    dispatch: DispatchMap,
    cloner: Box<dyn DeclCloner>,
    relations: Box<dyn PackageRelations>,
    config: MonoConfig,
    /// 当前递归实例化深度
    depth: usize,
    /// 实例 → 克隆时跳过的嵌套泛型成员（按需实例化）
    lazy_members: HashMap<DeclId, Vec<DeclId>>,
}

impl InstantiationManager {
    pub fn new(
        pkg: Package,
        config: MonoConfig,
    ) -> Self {
        Self {
            pkg,
            cache: InstantiationCache::new(),
            extensions: ExtensionRecorder::default(),
            dispatch: DispatchMap::default(),
            cloner: Box::new(TreeCloner::new()),
            relations: Box::new(DefaultRelations),
            config,
            depth: 0,
            lazy_members: HashMap::new(),
        }
    }

    /// 替换克隆能力
    pub fn with_cloner(
        mut self,
        cloner: Box<dyn DeclCloner>,
    ) -> Self {
        self.cloner = cloner;
        self
    }

    /// 替换包关系查询
    pub fn with_relations(
        mut self,
        relations: Box<dyn PackageRelations>,
    ) -> Self {
        self.relations = relations;
        self
    }

    pub fn package(&self) -> &Package {
        &self.pkg
    }

    pub fn config(&self) -> &MonoConfig {
        &self.config
    }

    pub fn cache(&self) -> &InstantiationCache {
        &self.cache
    }

    /// 结束实例化阶段，交出包
    pub fn into_package(self) -> Package {
        info!(
            "instantiation finished: {} instance(s), hit rate {:.1}%",
            self.cache.len(),
            self.cache.stats().hit_rate()
        );
        self.pkg
    }

    /// 实例回指的原型；非实例返回自身
    pub fn template_of(
        &self,
        decl: DeclId,
    ) -> DeclId {
        self.cache
            .key_of(decl)
            .map(|key| key.generic)
            .unwrap_or(decl)
    }

    /// 实例跳过的嵌套泛型成员
    pub fn lazy_members_of(
        &self,
        inst: DeclId,
    ) -> &[DeclId] {
        self.lazy_members
            .get(&inst)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 纯查找
    pub fn lookup(
        &self,
        key: &InstantiationKey,
    ) -> Option<DeclId> {
        self.cache.lookup(key)
    }

    /// 某原型的全部实例
    pub fn all_instantiations_of(
        &self,
        generic: DeclId,
    ) -> Vec<DeclId> {
        self.cache.all_instantiations_of(generic)
    }

    /// 使实例失效；下次请求同一键时复用句柄重新实例化
    pub fn invalidate(
        &mut self,
        inst: DeclId,
    ) -> MonoResult<Vec<InstantiationKey>> {
        let keys = self.cache.invalidate(inst)?;
        self.dispatch.forget(inst);
        self.extensions.forget(inst);
        self.lazy_members.remove(&inst);
        Ok(keys)
    }

    /// 已完成的实例：(修饰名, 句柄)，按登记顺序
    pub fn instances(&self) -> Vec<(String, DeclId)> {
        self.cache
            .entries()
            .filter(|(_, _, state)| state.is_complete())
            .map(|(_, decl, _)| (self.pkg.display_name(decl), decl))
            .collect()
    }

    /// 对包内所有非泛型顶层声明运行重排，驱动它们引用的全部实例化
    pub fn instantiate_package(&mut self) -> MonoResult<InstantiationSummary> {
        let roots: Vec<DeclId> = self
            .pkg
            .top_level
            .iter()
            .copied()
            .filter(|d| !self.pkg.is_generic(*d) && !self.pkg.decl(*d).broken)
            .collect();

        let mut summary = InstantiationSummary::default();
        for root in &roots {
            self.rearrange(*root)?;
            summary.rearranged += 1;
            if self.pkg.decl(*root).broken {
                summary.broken.push(*root);
            }
        }

        if self.config.eager_dispatch {
            let types: Vec<DeclId> = self
                .concrete_types()
                .into_iter()
                .filter(|d| !self.pkg.decl(*d).broken)
                .collect();
            for ty in types {
                self.build_dispatch(ty)?;
            }
        }

        summary.instances = self.cache.len();
        debug!(
            "instantiate_package: {} root(s), {} instance(s)",
            summary.rearranged, summary.instances
        );
        Ok(summary)
    }

    /// 包内全部具体的类/结构体（原有声明与实例）
    pub fn concrete_types(&self) -> Vec<DeclId> {
        let mut out: Vec<DeclId> = self
            .pkg
            .top_level
            .iter()
            .copied()
            .filter(|d| matches!(self.pkg.decl(*d).kind, DeclKind::Type(_)))
            .filter(|d| !self.pkg.is_generic(*d))
            .collect();
        out.extend(
            self.cache
                .entries()
                .filter(|(_, decl, state)| {
                    state.is_complete()
                        && matches!(self.pkg.decl(*decl).kind, DeclKind::Type(_))
                        && !self.pkg.is_generic(*decl)
                })
                .map(|(_, decl, _)| decl),
        );
        out
    }

    /// 具体类型产生后的登记：扩展候选、可选的急切扩展
    fn on_concrete_type(
        &mut self,
        ty_decl: DeclId,
    ) -> MonoResult<()> {
        let ty = Ty::named(ty_decl, Vec::new());
        self.record_extension_candidates(&ty);
        if self.config.eager_extensions {
            self.ensure_extensions(&ty)?;
        }
        Ok(())
    }
}
