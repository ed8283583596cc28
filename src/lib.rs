//! YaoXiang generic instantiation engine
//!
//! Turns generic declarations of a resolved, type-checked package into concrete
//! instances: one instance per (template, substitution), references rewritten to
//! the instances, extensions attached once per concrete type, and a dispatch map
//! derived per concrete type. Instances survive across builds through a cache file.
//!
//! # Example
//!
//! ```rust
//! use yaoxiang_mono::mono::{InstantiationManager, TypeSubstitution};
//! use yaoxiang_mono::tree::{Package, Ty, TypeKind};
//! use yaoxiang_mono::util::config::MonoConfig;
//!
//! let mut pkg = Package::new("demo");
//! let boxed = pkg.declare_type(None, "Box", TypeKind::Class, &["T"]);
//! let t = pkg.type_param(boxed, 0);
//! pkg.declare_field(boxed, "value", t);
//!
//! let mut manager = InstantiationManager::new(pkg, MonoConfig::default());
//! let subst = TypeSubstitution::from_args(
//!     &manager.package().decl(boxed).own_param_ids(),
//!     &[Ty::int64()],
//! )
//! .unwrap();
//! let inst = manager.get_or_instantiate(boxed, subst).unwrap();
//! assert_eq!(manager.package().display_name(inst), "Box<Int64>");
//! ```

#![doc(html_root_url = "https://docs.rs/yaoxiang-mono")]
#![warn(rust_2018_idioms)]

pub mod mono;
pub mod tree;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use thiserror::Error;

use std::fs;
use std::path::Path;
use tracing::debug;

use crate::tree::Package;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name
pub const NAME: &str = "YaoXiang (爻象) instantiation engine";

/// Read a resolved package from a `.json` or `.ron` file
pub fn load_package(path: &Path) -> Result<Package> {
    debug!("loading package from {}", path.display());
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read package: {}", path.display()))?;
    let package = match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => ron::from_str(&content)
            .with_context(|| format!("Failed to parse RON package: {}", path.display()))?,
        _ => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON package: {}", path.display()))?,
    };
    Ok(package)
}

/// Write a package as `.json` or `.ron`, chosen by extension
pub fn save_package(
    package: &Package,
    path: &Path,
) -> Result<()> {
    let content = match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => ron::ser::to_string_pretty(package, ron::ser::PrettyConfig::default())
            .context("Failed to serialize package")?,
        _ => serde_json::to_string_pretty(package).context("Failed to serialize package")?,
    };
    fs::write(path, content)
        .with_context(|| format!("Failed to write package: {}", path.display()))?;
    Ok(())
}
