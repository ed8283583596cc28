//! 实例化缓存
//!
//! (泛型原型, 替换) → 实例声明 的正向索引，加上 原型 → 全部实例 的反向索引。
//!
//! 每个键的槽位都带有显式状态（见 [`InstantiationState`]）。
//! 克隆开始前先预留槽位，所以互相递归的泛型在重入时看到的是 `InProgress`，
//! 得到的是已预留的前向句柄，而不是再实例化一遍。

use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::ice;
use crate::mono::error::{InternalError, MonoResult};
use crate::mono::instance::{InstantiationKey, InstantiationState};
use crate::tree::DeclId;

/// 三态查找结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Empty,
    /// 正在实例化；返回的是预留的前向句柄
    InProgress(DeclId),
    Done(DeclId),
}

/// 缓存统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    /// 重入时命中 `InProgress` 的次数
    pub reentrant_hits: usize,
    pub invalidations: usize,
    pub restored: usize,
}

impl CacheStats {
    /// 命中率（百分比）
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    decl: DeclId,
    state: InstantiationState,
    /// 成员实例所在的根实例
    owner: Option<DeclId>,
}

/// 实例化缓存
#[derive(Debug, Default)]
pub struct InstantiationCache {
    entries: IndexMap<InstantiationKey, Slot>,
    by_decl: HashMap<DeclId, InstantiationKey>,
    by_generic: IndexMap<DeclId, IndexSet<DeclId>>,
    /// 失效键保留的句柄，强制重建时复用
    tombstones: HashMap<InstantiationKey, DeclId>,
    stats: CacheStats,
}

impl InstantiationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 纯查找：只返回已完成或已恢复的实例
    pub fn lookup(
        &self,
        key: &InstantiationKey,
    ) -> Option<DeclId> {
        self.entries
            .get(key)
            .filter(|slot| slot.state.is_complete())
            .map(|slot| slot.decl)
    }

    /// 三态查找，计入统计
    pub fn probe(
        &mut self,
        key: &InstantiationKey,
    ) -> CacheLookup {
        match self.entries.get(key) {
            Some(slot) if slot.state == InstantiationState::Instantiating => {
                self.stats.reentrant_hits += 1;
                CacheLookup::InProgress(slot.decl)
            }
            Some(slot) => {
                self.stats.hits += 1;
                CacheLookup::Done(slot.decl)
            }
            None => {
                self.stats.misses += 1;
                CacheLookup::Empty
            }
        }
    }

    /// 键的当前状态
    pub fn state(
        &self,
        key: &InstantiationKey,
    ) -> InstantiationState {
        match self.entries.get(key) {
            Some(slot) => slot.state,
            None if self.tombstones.contains_key(key) => InstantiationState::Invalidated,
            None => InstantiationState::NotInstantiated,
        }
    }

    /// 失效键留下的句柄
    pub fn tombstone(
        &self,
        key: &InstantiationKey,
    ) -> Option<DeclId> {
        self.tombstones.get(key).copied()
    }

    /// 预留根实例槽位（状态 `Instantiating`）
    pub fn reserve(
        &mut self,
        key: InstantiationKey,
        decl: DeclId,
    ) -> MonoResult<()> {
        self.insert_slot(key, decl, None, InstantiationState::Instantiating)
    }

    /// 预留成员实例槽位，随根实例一起完成
    pub fn reserve_member(
        &mut self,
        key: InstantiationKey,
        decl: DeclId,
        owner: DeclId,
    ) -> MonoResult<()> {
        self.insert_slot(key, decl, Some(owner), InstantiationState::Instantiating)
    }

    /// 登记从上次构建恢复的实例
    pub fn restore(
        &mut self,
        key: InstantiationKey,
        decl: DeclId,
        owner: Option<DeclId>,
    ) -> MonoResult<()> {
        self.insert_slot(key, decl, owner, InstantiationState::Restored)?;
        self.stats.restored += 1;
        Ok(())
    }

    fn insert_slot(
        &mut self,
        key: InstantiationKey,
        decl: DeclId,
        owner: Option<DeclId>,
        next: InstantiationState,
    ) -> MonoResult<()> {
        if let Some(existing) = self.entries.get(&key) {
            if existing.decl != decl {
                return Err(ice!(InternalError::DuplicateRegistration {
                    key: key.to_string(),
                    existing: existing.decl,
                    incoming: decl,
                }));
            }
            existing.state.transition(next)?;
            return Ok(());
        }
        let state = self.state(&key).transition(next)?;
        self.tombstones.remove(&key);
        trace!("cache slot {} -> {} ({})", key, decl, state);
        self.by_decl.insert(decl, key.clone());
        self.by_generic
            .entry(key.generic)
            .or_default()
            .insert(decl);
        self.entries.insert(key, Slot { decl, state, owner });
        Ok(())
    }

    /// `Instantiating -> Instantiated`
    pub fn complete(
        &mut self,
        key: &InstantiationKey,
    ) -> MonoResult<()> {
        let Some(slot) = self.entries.get_mut(key) else {
            return Err(ice!(InternalError::MissingMapping(format!(
                "completing unreserved key {}",
                key
            ))));
        };
        slot.state = slot.state.transition(InstantiationState::Instantiated)?;
        Ok(())
    }

    /// 某原型的全部实例（按登记顺序）
    pub fn all_instantiations_of(
        &self,
        generic: DeclId,
    ) -> Vec<DeclId> {
        self.by_generic
            .get(&generic)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// 使实例失效：从正向与反向索引中移除，留下可复用的句柄
    ///
    /// 根实例失效时其成员实例一并失效。返回被移除的全部键。
    pub fn invalidate(
        &mut self,
        decl: DeclId,
    ) -> MonoResult<Vec<InstantiationKey>> {
        let Some(key) = self.by_decl.get(&decl).cloned() else {
            return Err(ice!(InternalError::MissingMapping(format!(
                "invalidating unknown instance {}",
                decl
            ))));
        };
        let mut keys = vec![key];
        keys.extend(
            self.entries
                .iter()
                .filter(|(_, slot)| slot.owner == Some(decl))
                .map(|(k, _)| k.clone()),
        );

        for key in &keys {
            let Some(slot) = self.entries.get(key) else {
                continue;
            };
            slot.state.transition(InstantiationState::Invalidated)?;
            let inst = slot.decl;
            self.entries.shift_remove(key);
            self.by_decl.remove(&inst);
            if let Some(set) = self.by_generic.get_mut(&key.generic) {
                set.shift_remove(&inst);
            }
            self.tombstones.insert(key.clone(), inst);
            self.stats.invalidations += 1;
        }
        debug!("invalidated {} instantiation(s) rooted at {}", keys.len(), decl);
        Ok(keys)
    }

    /// 实例对应的键
    pub fn key_of(
        &self,
        decl: DeclId,
    ) -> Option<&InstantiationKey> {
        self.by_decl.get(&decl)
    }

    pub fn is_instance(
        &self,
        decl: DeclId,
    ) -> bool {
        self.by_decl.contains_key(&decl)
    }

    /// 成员实例所在的根实例
    pub fn owner_of(
        &self,
        decl: DeclId,
    ) -> Option<DeclId> {
        self.by_decl
            .get(&decl)
            .and_then(|key| self.entries.get(key))
            .and_then(|slot| slot.owner)
    }

    /// 全部条目：(键, 实例, 状态)
    pub fn entries(&self) -> impl Iterator<Item = (&InstantiationKey, DeclId, InstantiationState)> {
        self.entries
            .iter()
            .map(|(key, slot)| (key, slot.decl, slot.state))
    }

    /// 根实例（不属于其他实例子树的实例）
    pub fn roots(&self) -> Vec<DeclId> {
        self.entries
            .values()
            .filter(|slot| slot.owner.is_none())
            .map(|slot| slot.decl)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
