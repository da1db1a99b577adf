//! # Apkclone
//!
//! A library for renaming the package of an Android app decoded by apktool, so it can be
//! installed alongside the original.
//!
//! The package name is updated in three places that must agree afterwards: resource files,
//! `AndroidManifest.xml`, and the smali trees, where both type descriptors (`Lcom/example/app/Foo;`)
//! and the directory layout follow the package path.
//!
use crate::cloner::{ApkCloner, CancelToken};
use crate::types::RewriteResult;
use std::path::Path;

pub mod bytecode;
pub mod cloner;
pub mod error;
pub mod manifest;
pub mod options;
pub mod resources;
pub mod rewrite;
#[cfg(test)]
mod tests;
pub mod types;

/// Renames package `from` to `to` throughout a decoded APK directory, on the current thread
///
/// # Examples
///
/// ```no_run
///  use apkclone::clone_package;
///
///  let result = clone_package("out", "com.example.app", "com.example.clone");
///  assert!(result.success, "{}", result);
/// ```
pub fn clone_package(root: impl AsRef<Path>, from: &str, to: &str) -> RewriteResult {
    ApkCloner::new(root.as_ref(), from, to).run(&CancelToken::new(), |_| {})
}
