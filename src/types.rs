/* Value types shared by every stage of a package rename */
/* Identifiers are kept in both forms: dotted (com.example.app) and path (com/example/app) */

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Prefix character of an object type descriptor, e.g. `Lcom/example/app/Foo;`
pub const DESCRIPTOR_SIGIL: char = 'L';

/// Represents an Android package identifier
///
/// The path form is derived from the dotted name when the identifier is built and
/// cannot be set on its own, so the two never diverge. No validation or case
/// normalisation is done: identifiers compare by their exact string form.
///
/// # Examples
///
/// ```
///  use apkclone::types::PackageIdentifier;
///
///  let p = PackageIdentifier::new("com.example.app");
///  assert_eq!(p.name(), "com.example.app");
///  assert_eq!(p.path(), "com/example/app");
///  assert_eq!(p.descriptor_prefix(), "Lcom/example/app");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PackageIdentifier {
    name: String,
    path: String,
}

impl PackageIdentifier {
    pub fn new(name: &str) -> PackageIdentifier {
        PackageIdentifier {
            name: name.to_string(),
            path: name.replace('.', "/"),
        }
    }

    /// Dotted form, as used by resources and the manifest
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slash separated form, as used by smali directories and descriptors
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// The path form behind the descriptor sigil, without the trailing class name or `;`
    pub fn descriptor_prefix(&self) -> String {
        let mut s = DESCRIPTOR_SIGIL.to_string();
        s.push_str(&self.path);
        s
    }

    /// True if `other` names a package nested inside this one (`com.app` contains `com.app.clone`)
    pub fn is_ancestor_of(&self, other: &PackageIdentifier) -> bool {
        other.path.len() > self.path.len()
            && other.path.starts_with(&self.path)
            && other.path.as_bytes()[self.path.len()] == b'/'
    }

    /// Builds the literal substitutions needed to turn `self` into `to` for the given forms.
    /// The descriptor form is listed first so it is applied before the dotted form.
    pub fn substitutions(&self, to: &PackageIdentifier, forms: RewriteForms) -> Vec<Substitution> {
        let mut subs = vec![];
        if forms.contains(RewriteForms::DESCRIPTOR) {
            subs.push(Substitution::new(&self.descriptor_prefix(), &to.descriptor_prefix()));
        }
        if forms.contains(RewriteForms::DOTTED) {
            subs.push(Substitution::new(&self.name, &to.name));
        }
        subs
    }
}

impl fmt::Display for PackageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl FromStr for PackageIdentifier {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PackageIdentifier::new(s))
    }
}

impl From<String> for PackageIdentifier {
    fn from(value: String) -> Self {
        PackageIdentifier::new(&value)
    }
}

impl From<PackageIdentifier> for String {
    fn from(value: PackageIdentifier) -> Self {
        value.name
    }
}

// Which occurrence forms of a package identifier a stage substitutes.
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RewriteForms: u8 {
        const DOTTED = 0x1;
        const DESCRIPTOR = 0x2;
    }
}

/// A single literal (non-regex) find and replace pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub from: String,
    pub to: String,
}

impl Substitution {
    pub fn new(from: &str, to: &str) -> Substitution {
        Substitution {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// The stage of a clone job that produced a progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Resources,
    Manifest,
    Bytecode,
    DirectoryStructure,
}

impl Stage {
    pub fn description(&self) -> &'static str {
        match self {
            Stage::Resources => "Updating resource references...",
            Stage::Manifest => "Updating AndroidManifest.xml...",
            Stage::Bytecode => "Updating Smali references...",
            Stage::DirectoryStructure => "Updating directory structure...",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Emitted once for each file or directory a job is about to process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub description: String,
    /// Relative to the package root
    pub path: PathBuf,
}

impl ProgressEvent {
    pub fn new(stage: Stage, path: PathBuf) -> ProgressEvent {
        ProgressEvent {
            stage,
            description: stage.description().to_string(),
            path,
        }
    }
}

/// Whether rewriting a single file changed its contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewriteOutcome {
    Changed { replacements: usize },
    Unchanged,
}

impl RewriteOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, RewriteOutcome::Changed { .. })
    }
}

/// A best-effort failure that did not fail the job (resource files only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteWarning {
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for RewriteWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteStats {
    pub files_visited: usize,
    pub files_changed: usize,
    pub replacements: usize,
    pub directories_moved: usize,
}

impl RewriteStats {
    pub(crate) fn record(&mut self, outcome: RewriteOutcome) {
        if let RewriteOutcome::Changed { replacements } = outcome {
            self.files_changed += 1;
            self.replacements += replacements;
        }
    }
}

/// Why a clone job failed. Paths are relative to the package root where possible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    InvalidJob(String),
    Busy(PathBuf),
    PackageRoot { path: PathBuf, message: String },
    Manifest { path: PathBuf, message: String },
    BytecodeFile { path: PathBuf, message: String },
    DirectoryMove { from: PathBuf, to: PathBuf, message: String },
    /// The background worker could not be started or stopped without a result
    Worker(String),
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FailureReason::InvalidJob(msg) => write!(f, "invalid clone job: {msg}"),
            FailureReason::Busy(path) => {
                write!(f, "a clone job is already running on {}", path.display())
            }
            FailureReason::PackageRoot { path, message } => {
                write!(f, "unable to read package root {}: {message}", path.display())
            }
            FailureReason::Manifest { path, message } => {
                write!(f, "unable to update manifest {}: {message}", path.display())
            }
            FailureReason::BytecodeFile { path, message } => {
                write!(f, "unable to update smali file {}: {message}", path.display())
            }
            FailureReason::DirectoryMove { from, to, message } => write!(
                f,
                "unable to move {} to {}: {message}",
                from.display(),
                to.display()
            ),
            FailureReason::Worker(msg) => write!(f, "clone worker failed: {msg}"),
            FailureReason::Cancelled => write!(f, "clone job was cancelled"),
        }
    }
}

/// The terminal value of a clone job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteResult {
    pub success: bool,
    pub failure: Option<FailureReason>,
    pub warnings: Vec<RewriteWarning>,
    pub stats: RewriteStats,
}

impl RewriteResult {
    pub fn succeeded(warnings: Vec<RewriteWarning>, stats: RewriteStats) -> RewriteResult {
        RewriteResult {
            success: true,
            failure: None,
            warnings,
            stats,
        }
    }

    pub fn failed(
        reason: FailureReason,
        warnings: Vec<RewriteWarning>,
        stats: RewriteStats,
    ) -> RewriteResult {
        RewriteResult {
            success: false,
            failure: Some(reason),
            warnings,
            stats,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.failure, Some(FailureReason::Cancelled))
    }
}

impl fmt::Display for RewriteResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.failure {
            None => write!(
                f,
                "clone succeeded: {} of {} files changed, {} directories moved, {} warnings",
                self.stats.files_changed,
                self.stats.files_visited,
                self.stats.directories_moved,
                self.warnings.len()
            ),
            Some(reason) => write!(f, "clone failed: {reason}"),
        }
    }
}
