//! 增量编译
//!
//! 上一次构建的实例连同子树一起写入缓存文件。子树外的句柄翻译成符号：
//! 原有声明用稳定路径（`Original`），其他实例用 (原型路径, 替换)（`Instance`）。
//!
//! 恢复时只处理被判定为“未变化”的原型的实例：重新分配句柄、
//! 以 `Restored` 状态登记，再解析跨实例引用。是否真的等价于重新实例化
//! 由形状指纹比对（`MonoConfig::verify_restored`），不一致则失效并重新实例化。

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::cache::InstantiationCache;
use super::error::{MonoError, MonoResult};
use super::instance::{InstantiationKey, InstantiationState};
use super::instantiate::Target;
use super::substitution::TypeSubstitution;
use super::InstantiationManager;
use crate::tree::walk::full_subtree;
use crate::tree::{Decl, DeclId, DeclKind, Expr, ExprId, IdMapper, IdRemap, Package, TypeParamId};

/// 缓存文件格式版本
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// 编码后不小于此值的声明句柄是符号表下标
const SYMBOL_BASE: u32 = 1 << 31;

/// 子树外的声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SymbolRef {
    /// 原有声明的稳定路径
    Original(String),
    /// 其他实例；替换中的句柄同样经过编码
    Instance {
        generic: String,
        subst: TypeSubstitution,
    },
}

/// 一个持久化的根实例
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedInstance {
    /// 原型的稳定路径
    pub generic: String,
    pub subst: TypeSubstitution,
    pub mangled: String,
    /// 子树声明，下标 0 是根
    pub decls: Vec<Decl>,
    pub exprs: Vec<Expr>,
    /// 跳过的嵌套泛型成员（稳定路径）
    pub lazy_members: Vec<String>,
    pub fingerprint: String,
}

/// 缓存文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheFile {
    pub version: u32,
    pub package: String,
    pub symbols: Vec<SymbolRef>,
    pub instances: Vec<PersistedInstance>,
}

/// 缓存文件错误
#[derive(Debug, Error)]
pub enum CacheFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported cache format version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
}

impl CacheFile {
    pub fn to_json(&self) -> Result<String, CacheFileError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self, CacheFileError> {
        let file: CacheFile = serde_json::from_str(content)?;
        if file.version != CACHE_FORMAT_VERSION {
            return Err(CacheFileError::Version {
                found: file.version,
                expected: CACHE_FORMAT_VERSION,
            });
        }
        Ok(file)
    }

    pub fn save(
        &self,
        path: &Path,
    ) -> Result<(), CacheFileError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, CacheFileError> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

/// 增量构建驱动给出的输入
#[derive(Debug, Clone, Default)]
pub struct IncrementalInput {
    /// 判定为未变化的原型（稳定路径）
    pub unchanged: HashSet<String>,
    /// 上一次构建的缓存
    pub cache: Option<CacheFile>,
}

impl IncrementalInput {
    pub fn new(cache: Option<CacheFile>) -> Self {
        Self {
            unchanged: HashSet::new(),
            cache,
        }
    }

    pub fn mark_unchanged(
        &mut self,
        path: impl Into<String>,
    ) {
        self.unchanged.insert(path.into());
    }
}

/// 恢复结果
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    /// 恢复的根实例
    pub restored: Vec<DeclId>,
    /// 指纹不一致、已重新实例化的实例（修饰名）
    pub reinstantiated: Vec<String>,
    /// 未恢复的条目数
    pub skipped: usize,
}

/// 持久化时的句柄编码
struct Encoder<'a> {
    pkg: &'a Package,
    cache: &'a InstantiationCache,
    symbols: &'a mut Vec<SymbolRef>,
    index: &'a mut HashMap<DeclId, u32>,
    locals: HashMap<DeclId, u32>,
    local_exprs: HashMap<ExprId, u32>,
}

impl Encoder<'_> {
    fn symbol(
        &mut self,
        id: DeclId,
    ) -> u32 {
        if let Some(sym) = self.index.get(&id) {
            return *sym;
        }
        let symbol = match self.cache.key_of(id).cloned() {
            Some(key) => {
                let mut nested = Encoder {
                    pkg: self.pkg,
                    cache: self.cache,
                    symbols: &mut *self.symbols,
                    index: &mut *self.index,
                    locals: HashMap::new(),
                    local_exprs: HashMap::new(),
                };
                let subst = key.subst.map_ids(&mut nested);
                SymbolRef::Instance {
                    generic: self.pkg.stable_path(key.generic),
                    subst,
                }
            }
            None => SymbolRef::Original(self.pkg.stable_path(id)),
        };
        let sym = self.symbols.len() as u32;
        self.symbols.push(symbol);
        self.index.insert(id, sym);
        sym
    }
}

impl IdMapper for Encoder<'_> {
    fn decl(
        &mut self,
        id: DeclId,
    ) -> DeclId {
        match self.locals.get(&id) {
            Some(local) => DeclId(*local),
            None => DeclId(SYMBOL_BASE + self.symbol(id)),
        }
    }

    fn expr(
        &mut self,
        id: ExprId,
    ) -> ExprId {
        self.local_exprs
            .get(&id)
            .map(|local| ExprId(*local))
            .unwrap_or(id)
    }

    fn param(
        &mut self,
        param: TypeParamId,
    ) -> TypeParamId {
        TypeParamId::new(self.decl(param.owner), param.index)
    }
}

/// 恢复时的句柄解码；遇到无法解码的句柄置 `missing`
struct Decoder<'a> {
    locals: &'a [DeclId],
    local_exprs: &'a [ExprId],
    symbols: &'a [Option<DeclId>],
    missing: bool,
}

impl IdMapper for Decoder<'_> {
    fn decl(
        &mut self,
        id: DeclId,
    ) -> DeclId {
        let resolved = if id.0 >= SYMBOL_BASE {
            self.symbols
                .get((id.0 - SYMBOL_BASE) as usize)
                .copied()
                .flatten()
        } else {
            self.locals.get(id.0 as usize).copied()
        };
        resolved.unwrap_or_else(|| {
            self.missing = true;
            id
        })
    }

    fn expr(
        &mut self,
        id: ExprId,
    ) -> ExprId {
        self.local_exprs.get(id.0 as usize).copied().unwrap_or_else(|| {
            self.missing = true;
            id
        })
    }

    fn param(
        &mut self,
        param: TypeParamId,
    ) -> TypeParamId {
        TypeParamId::new(self.decl(param.owner), param.index)
    }
}

/// 收集编码句柄中引用的符号下标
#[derive(Default)]
struct SymbolCollector {
    symbols: Vec<usize>,
}

impl IdMapper for SymbolCollector {
    fn decl(
        &mut self,
        id: DeclId,
    ) -> DeclId {
        if id.0 >= SYMBOL_BASE {
            self.symbols.push((id.0 - SYMBOL_BASE) as usize);
        }
        id
    }

    fn expr(
        &mut self,
        id: ExprId,
    ) -> ExprId {
        id
    }

    fn param(
        &mut self,
        param: TypeParamId,
    ) -> TypeParamId {
        self.decl(param.owner);
        param
    }
}

fn subst_symbols(subst: &TypeSubstitution) -> Vec<usize> {
    let mut collector = SymbolCollector::default();
    subst.map_ids(&mut collector);
    collector.symbols
}

fn entry_symbols(entry: &PersistedInstance) -> Vec<usize> {
    let mut collector = SymbolCollector::default();
    for decl in &entry.decls {
        decl.clone().map_ids(&mut collector);
    }
    for expr in &entry.exprs {
        expr.clone().map_ids(&mut collector);
    }
    entry.subst.map_ids(&mut collector);
    collector.symbols
}

/// 待恢复的实例
struct Plan {
    entry: usize,
    key: InstantiationKey,
    member_keys: Vec<(usize, InstantiationKey)>,
    decls: Vec<DeclId>,
    exprs: Vec<ExprId>,
}

impl InstantiationManager {
    /// 把全部已完成的根实例写成缓存文件
    pub fn persist(&self) -> CacheFile {
        let mut symbols = Vec::new();
        let mut index = HashMap::new();
        let mut instances = Vec::new();

        for root in self.cache.roots() {
            let Some(key) = self.cache.key_of(root).cloned() else {
                continue;
            };
            if !self.cache.state(&key).is_complete() || self.pkg.decl(root).broken {
                continue;
            }
            let subtree = full_subtree(&self.pkg, root);
            let mut encoder = Encoder {
                pkg: &self.pkg,
                cache: &self.cache,
                symbols: &mut symbols,
                index: &mut index,
                locals: subtree
                    .decls
                    .iter()
                    .enumerate()
                    .map(|(i, d)| (*d, i as u32))
                    .collect(),
                local_exprs: subtree
                    .exprs
                    .iter()
                    .enumerate()
                    .map(|(i, e)| (*e, i as u32))
                    .collect(),
            };
            let decls = subtree
                .decls
                .iter()
                .map(|d| {
                    let mut decl = self.pkg.decl(*d).clone();
                    decl.map_ids(&mut encoder);
                    decl
                })
                .collect();
            let exprs = subtree
                .exprs
                .iter()
                .map(|e| {
                    let mut expr = self.pkg.expr(*e).clone();
                    expr.map_ids(&mut encoder);
                    expr
                })
                .collect();
            let subst = key.subst.map_ids(&mut encoder);

            instances.push(PersistedInstance {
                generic: self.pkg.stable_path(key.generic),
                subst,
                mangled: self.pkg.display_name(root),
                decls,
                exprs,
                lazy_members: self
                    .lazy_members_of(root)
                    .iter()
                    .map(|m| self.pkg.stable_path(*m))
                    .collect(),
                fingerprint: self.shape_fingerprint(root),
            });
        }

        info!(
            "persisted {} instance(s), {} symbol(s)",
            instances.len(),
            symbols.len()
        );
        CacheFile {
            version: CACHE_FORMAT_VERSION,
            package: self.pkg.name.clone(),
            symbols,
            instances,
        }
    }

    /// 从上一次构建恢复未变化原型的实例
    pub fn restore(
        &mut self,
        input: IncrementalInput,
    ) -> MonoResult<RestoreReport> {
        let mut report = RestoreReport::default();
        let Some(file) = input.cache else {
            return Ok(report);
        };
        if file.version != CACHE_FORMAT_VERSION || file.package != self.pkg.name {
            warn!(
                "ignoring cache for package `{}` (version {})",
                file.package, file.version
            );
            report.skipped = file.instances.len();
            return Ok(report);
        }

        let paths = self.pkg.stable_path_index();
        let resolvable = resolvable_symbols(&file.symbols, &paths);
        let mut resolved: Vec<Option<DeclId>> = file
            .symbols
            .iter()
            .map(|s| match s {
                SymbolRef::Original(path) => paths.get(path).copied(),
                SymbolRef::Instance { .. } => None,
            })
            .collect();

        // 选出可恢复的条目并分配句柄
        let mut plans: Vec<Plan> = Vec::new();
        let mut planned_keys: HashMap<InstantiationKey, DeclId> = HashMap::new();
        for (i, entry) in file.instances.iter().enumerate() {
            match self.plan_entry(i, entry, &paths, &resolvable, &resolved, &input.unchanged) {
                Some(mut plan) => {
                    if plan.member_keys.iter().any(|(_, k)| planned_keys.contains_key(k))
                        || planned_keys.contains_key(&plan.key)
                    {
                        report.skipped += 1;
                        continue;
                    }
                    plan.decls = (0..entry.decls.len()).map(|_| self.pkg.reserve_decl()).collect();
                    plan.exprs = (0..entry.exprs.len()).map(|_| self.pkg.reserve_expr()).collect();
                    planned_keys.insert(plan.key.clone(), plan.decls[0]);
                    for (local, key) in &plan.member_keys {
                        planned_keys.insert(key.clone(), plan.decls[*local]);
                    }
                    plans.push(plan);
                }
                None => report.skipped += 1,
            }
        }

        // 实例符号：已计划的键、缓存中已有的实例，或稍后实例化的占位
        let mut deferred: Vec<(DeclId, InstantiationKey)> = Vec::new();
        loop {
            let mut progress = false;
            for (sym, symbol) in file.symbols.iter().enumerate() {
                let SymbolRef::Instance { generic, subst } = symbol else {
                    continue;
                };
                if resolved[sym].is_some() || !resolvable[sym] {
                    continue;
                }
                if subst_symbols(subst).iter().any(|s| resolved[*s].is_none()) {
                    continue;
                }
                let Some(generic) = paths.get(generic).copied() else {
                    continue;
                };
                let mut decoder = Decoder {
                    locals: &[],
                    local_exprs: &[],
                    symbols: &resolved,
                    missing: false,
                };
                let subst = subst.map_ids(&mut decoder);
                let handle = match self.normalize(generic, &subst) {
                    Target::Itself(decl) => decl,
                    Target::Key(key) => match planned_keys.get(&key) {
                        Some(handle) => *handle,
                        None => match self.cache.lookup(&key) {
                            Some(handle) => handle,
                            None => {
                                let placeholder = self.pkg.reserve_decl();
                                deferred.push((placeholder, key));
                                placeholder
                            }
                        },
                    },
                };
                resolved[sym] = Some(handle);
                progress = true;
            }
            if !progress {
                break;
            }
        }

        // 写入子树并登记
        for plan in &plans {
            let entry = &file.instances[plan.entry];
            let mut decoder = Decoder {
                locals: &plan.decls,
                local_exprs: &plan.exprs,
                symbols: &resolved,
                missing: false,
            };
            for (local, decl) in entry.decls.iter().enumerate() {
                let mut decl = decl.clone();
                decl.map_ids(&mut decoder);
                *self.pkg.decl_mut(plan.decls[local]) = decl;
            }
            for (local, expr) in entry.exprs.iter().enumerate() {
                let mut expr = expr.clone();
                expr.map_ids(&mut decoder);
                *self.pkg.expr_mut(plan.exprs[local]) = expr;
            }
            let root = plan.decls[0];
            self.cache.restore(plan.key.clone(), root, None)?;
            for (local, key) in &plan.member_keys {
                self.cache
                    .restore(key.clone(), plan.decls[*local], Some(root))?;
            }
            let lazy: Vec<DeclId> = entry
                .lazy_members
                .iter()
                .filter_map(|path| paths.get(path).copied())
                .collect();
            if !lazy.is_empty() {
                self.lazy_members.insert(root, lazy);
            }
            report.restored.push(root);
        }

        // 占位换成真正的实例
        if !deferred.is_empty() {
            let mut remap = IdRemap::default();
            for (placeholder, key) in &deferred {
                match self.get_or_instantiate(key.generic, key.subst.clone()) {
                    Ok(real) => {
                        remap.decls.insert(*placeholder, real);
                    }
                    Err(MonoError::Broken(_)) => {
                        self.pkg.decl_mut(*placeholder).broken = true;
                    }
                    Err(err) => return Err(err),
                }
            }
            for plan in &plans {
                for decl in &plan.decls {
                    let mut restored = self.pkg.decl(*decl).clone();
                    restored.map_ids(&mut remap);
                    *self.pkg.decl_mut(*decl) = restored;
                }
                for expr in &plan.exprs {
                    let mut restored = self.pkg.expr(*expr).clone();
                    restored.map_ids(&mut remap);
                    *self.pkg.expr_mut(*expr) = restored;
                }
            }
        }

        // 具体类型登记扩展候选；指纹比对
        for plan in &plans {
            let root = plan.decls[0];
            if matches!(self.pkg.decl(root).kind, DeclKind::Type(_)) && !self.pkg.is_generic(root) {
                self.on_concrete_type(root)?;
            }
            if !self.config.verify_restored {
                continue;
            }
            let expected = self.expected_fingerprint(plan.key.generic, &plan.key.subst);
            let actual = self.shape_fingerprint(root);
            if expected != actual {
                let mangled = self.pkg.display_name(root);
                warn!(
                    "restored instance {} does not match its template, re-instantiating",
                    mangled
                );
                debug!("expected `{}`, restored `{}`", expected, actual);
                self.invalidate(root)?;
                self.get_or_instantiate(plan.key.generic, plan.key.subst.clone())?;
                report.reinstantiated.push(mangled);
            }
        }

        info!(
            "restored {} instance(s), {} re-instantiated, {} skipped",
            report.restored.len(),
            report.reinstantiated.len(),
            report.skipped
        );
        Ok(report)
    }

    /// 检查条目能否恢复并算出它的键
    fn plan_entry(
        &self,
        entry_index: usize,
        entry: &PersistedInstance,
        paths: &HashMap<String, DeclId>,
        resolvable: &[bool],
        resolved: &[Option<DeclId>],
        unchanged: &HashSet<String>,
    ) -> Option<Plan> {
        if !unchanged.contains(&entry.generic) || entry.decls.is_empty() {
            return None;
        }
        let generic = paths.get(&entry.generic).copied()?;
        if entry_symbols(entry)
            .iter()
            .any(|s| !resolvable.get(*s).copied().unwrap_or(false))
        {
            return None;
        }

        // 键中的替换只允许引用原有声明
        let mut decoder = Decoder {
            locals: &[],
            local_exprs: &[],
            symbols: resolved,
            missing: false,
        };
        let subst = entry.subst.map_ids(&mut decoder);
        if decoder.missing {
            return None;
        }
        let Target::Key(key) = self.normalize(generic, &subst) else {
            return None;
        };
        if self.cache.state(&key) != InstantiationState::NotInstantiated {
            return None;
        }

        let mut member_keys = Vec::new();
        for (local, decl) in entry.decls.iter().enumerate().skip(1) {
            let Some(origin) = decl.generic_origin else {
                continue;
            };
            let template = match origin.0.checked_sub(SYMBOL_BASE) {
                Some(sym) => resolved.get(sym as usize).copied().flatten()?,
                None => return None,
            };
            let scope = self.pkg.scope_type_params(template);
            let member_key = InstantiationKey::new(template, key.subst.restrict(&scope));
            if self.cache.state(&member_key)
                != InstantiationState::NotInstantiated
            {
                return None;
            }
            member_keys.push((local, member_key));
        }

        Some(Plan {
            entry: entry_index,
            key,
            member_keys,
            decls: Vec::new(),
            exprs: Vec::new(),
        })
    }
}

/// 哪些符号能在当前包中找到
fn resolvable_symbols(
    symbols: &[SymbolRef],
    paths: &HashMap<String, DeclId>,
) -> Vec<bool> {
    let mut ok: Vec<bool> = symbols
        .iter()
        .map(|s| match s {
            SymbolRef::Original(path) => paths.contains_key(path),
            SymbolRef::Instance { .. } => false,
        })
        .collect();
    loop {
        let mut progress = false;
        for (i, symbol) in symbols.iter().enumerate() {
            let SymbolRef::Instance { generic, subst } = symbol else {
                continue;
            };
            if ok[i] || !paths.contains_key(generic) {
                continue;
            }
            if subst_symbols(subst)
                .iter()
                .all(|s| ok.get(*s).copied().unwrap_or(false))
            {
                ok[i] = true;
                progress = true;
            }
        }
        if !progress {
            return ok;
        }
    }
}
