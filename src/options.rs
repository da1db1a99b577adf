use serde::{Deserialize, Serialize};

/// How a changed file is written back to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WriteStrategy {
    /// Write a temporary file next to the original and rename it over the original
    #[default]
    Atomic,
    /// Truncate the original and write the new contents into it
    InPlace,
}

/// Layout of a decoded package and how files are written
///
/// The defaults match the layout apktool produces.
///
/// # Examples
///
/// ```
///  use apkclone::options::{CloneOptions, WriteStrategy};
///
///  let o = CloneOptions::default();
///  assert_eq!(o.resource_dir, "res");
///  assert_eq!(o.write_strategy, WriteStrategy::Atomic);
///  assert!(o.is_bytecode_root("smali_classes2"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneOptions {
    pub resource_dir: String,
    pub manifest_file: String,
    /// Directories directly under the package root starting with this are smali roots
    pub bytecode_prefix: String,
    pub write_strategy: WriteStrategy,
}

impl Default for CloneOptions {
    fn default() -> Self {
        CloneOptions {
            resource_dir: "res".to_string(),
            manifest_file: "AndroidManifest.xml".to_string(),
            bytecode_prefix: "smali".to_string(),
            write_strategy: WriteStrategy::Atomic,
        }
    }
}

impl CloneOptions {
    pub fn is_bytecode_root(&self, dir_name: &str) -> bool {
        dir_name.starts_with(&self.bytecode_prefix)
    }
}
