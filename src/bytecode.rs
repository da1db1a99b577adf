use crate::cloner::JobContext;
use crate::error::{RewriteError, RewriteFileResult};
use crate::options::CloneOptions;
use crate::rewrite::rewrite_file;
use crate::types::{FailureReason, PackageIdentifier, RewriteForms, Stage, Substitution};
use log::{debug, error, info};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Package directories are parked here while moving a package into or out of its own subtree
const STAGING_DIR: &str = ".apkclone-staging";

/// Lists the smali root directories (`smali`, `smali_classes2`, ...) directly under a package root,
/// sorted by name.
///
/// # Examples
///
/// ```no_run
///  use apkclone::bytecode::find_bytecode_roots;
///  use apkclone::options::CloneOptions;
///  use std::path::Path;
///
///  let roots = find_bytecode_roots(Path::new("out"), &CloneOptions::default()).unwrap();
///  println!("{:} smali roots found.", roots.len());
/// ```
pub fn find_bytecode_roots(package_root: &Path, options: &CloneOptions) -> io::Result<Vec<String>> {
    let mut roots = vec![];
    for entry in fs::read_dir(package_root)? {
        let entry = entry?;
        // Follows symlinks, so a linked smali_classesN directory is still a root
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if options.is_bytecode_root(name) {
                roots.push(name.to_string());
            }
        }
    }
    roots.sort();
    Ok(roots)
}

/// Moves `bytecode_root/from.path` to `bytecode_root/to.path`.
///
/// Returns `Ok(false)` if the old package directory does not exist under this root. Ancestors of
/// the old directory left empty by the move are removed, stopping at the bytecode root.
pub fn move_package_dir(
    bytecode_root: &Path,
    from: &PackageIdentifier,
    to: &PackageIdentifier,
) -> RewriteFileResult<bool> {
    let old = bytecode_root.join(from.path());
    let new = bytecode_root.join(to.path());
    if !old.is_dir() {
        return Ok(false);
    }

    if from.is_ancestor_of(to) || to.is_ancestor_of(from) {
        // A directory can't be renamed into its own subtree, go via a sibling
        let staging = bytecode_root.join(STAGING_DIR);
        if staging.exists() {
            return Err(RewriteError::moving(
                &old,
                &staging,
                io::Error::new(io::ErrorKind::AlreadyExists, "staging directory already exists"),
            ));
        }
        fs::rename(&old, &staging).map_err(|e| RewriteError::moving(&old, &staging, e))?;
        prune_empty_ancestors(bytecode_root, &old);

        if let Err(e) = place_dir(&staging, &new) {
            let restored = old
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|_| fs::rename(&staging, &old));
            if let Err(restore) = restored {
                error!(
                    "Unable to restore {} from {}: {restore}",
                    old.display(),
                    staging.display()
                );
            }
            return Err(RewriteError::moving(&old, &new, e));
        }
    } else {
        place_dir(&old, &new).map_err(|e| RewriteError::moving(&old, &new, e))?;
        prune_empty_ancestors(bytecode_root, &old);
    }
    Ok(true)
}

fn place_dir(src: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(src, dest)
}

fn prune_empty_ancestors(stop: &Path, moved: &Path) {
    let mut dir = moved.parent();
    while let Some(d) = dir {
        if d == stop || !d.starts_with(stop) {
            break;
        }
        // Fails on the first non-empty directory
        if fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}

/// Updates descriptors and dotted references in every smali file, then moves the package directory.
///
/// Every failure in this stage is fatal: a smali tree whose contents and layout disagree is unusable.
pub struct BytecodeTreeRewriter {
    from: PackageIdentifier,
    to: PackageIdentifier,
    subs: Vec<Substitution>,
}

impl BytecodeTreeRewriter {
    pub fn new(from: &PackageIdentifier, to: &PackageIdentifier) -> BytecodeTreeRewriter {
        BytecodeTreeRewriter {
            from: from.clone(),
            to: to.clone(),
            subs: from.substitutions(to, RewriteForms::DESCRIPTOR | RewriteForms::DOTTED),
        }
    }

    /// Processes each root in order. `roots` are directory names under the job's package root.
    pub fn rewrite(&self, ctx: &mut JobContext, roots: &[String]) -> Result<(), FailureReason> {
        for name in roots {
            let root = ctx.root.join(name);
            // Contents first: the move changes the paths being walked
            self.rewrite_contents(ctx, &root)?;
            self.relocate(ctx, name, &root)?;
        }
        Ok(())
    }

    fn rewrite_contents(&self, ctx: &mut JobContext, root: &Path) -> Result<(), FailureReason> {
        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            ctx.check_cancelled()?;
            let entry = entry.map_err(|e| self.file_failure(ctx, RewriteError::from(e)))?;
            if !entry.file_type().is_file() {
                continue;
            }

            ctx.emit(Stage::Bytecode, entry.path());
            ctx.stats.files_visited += 1;
            let outcome = rewrite_file(entry.path(), &self.subs, ctx.options.write_strategy)
                .map_err(|e| self.file_failure(ctx, e))?;
            ctx.stats.record(outcome);
        }
        Ok(())
    }

    fn relocate(&self, ctx: &mut JobContext, name: &str, root: &Path) -> Result<(), FailureReason> {
        ctx.check_cancelled()?;
        ctx.emit(Stage::DirectoryStructure, root);

        match move_package_dir(root, &self.from, &self.to) {
            Ok(true) => {
                info!("{name}: moved {} to {}", self.from.path(), self.to.path());
                ctx.stats.directories_moved += 1;
                Ok(())
            }
            Ok(false) => {
                debug!("{name}: no {} directory, nothing to move", self.from.path());
                Ok(())
            }
            Err(e) => {
                error!("{e}");
                Err(FailureReason::DirectoryMove {
                    from: PathBuf::from(name).join(self.from.path()),
                    to: PathBuf::from(name).join(self.to.path()),
                    message: e.message(),
                })
            }
        }
    }

    fn file_failure(&self, ctx: &JobContext, e: RewriteError) -> FailureReason {
        error!("{e}");
        let path = match &e {
            RewriteError::Io { path, .. } | RewriteError::Decode { path } => ctx.relative(path),
            RewriteError::Move { from, .. } => ctx.relative(from),
        };
        FailureReason::BytecodeFile {
            path,
            message: e.message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, ".class public LFoo;").unwrap();
    }

    #[test]
    fn discovers_smali_roots_only() {
        let dir = TempDir::new().unwrap();
        for d in ["smali_classes2", "res", "smali", "original"] {
            fs::create_dir(dir.path().join(d)).unwrap();
        }
        fs::write(dir.path().join("smali.txt"), "").unwrap();
        let roots = find_bytecode_roots(dir.path(), &CloneOptions::default()).unwrap();
        assert_eq!(roots, vec!["smali", "smali_classes2"]);
    }

    #[cfg(unix)]
    #[test]
    fn discovers_symlinked_roots() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("smali")).unwrap();
        fs::create_dir(dir.path().join("shared")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("shared"), dir.path().join("smali_classes2"))
            .unwrap();
        let roots = find_bytecode_roots(dir.path(), &CloneOptions::default()).unwrap();
        assert_eq!(roots, vec!["smali", "smali_classes2"]);
    }

    #[test]
    fn moves_and_prunes() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("com/example/app/Main.smali"));
        touch(&root.join("com/other/Keep.smali"));

        let from = PackageIdentifier::new("com.example.app");
        let to = PackageIdentifier::new("org.sample.clone");
        assert!(move_package_dir(root, &from, &to).unwrap());

        assert!(root.join("org/sample/clone/Main.smali").is_file());
        assert!(!root.join("com/example").exists());
        assert!(root.join("com/other/Keep.smali").is_file());
    }

    #[test]
    fn missing_package_is_nothing_to_move() {
        let dir = TempDir::new().unwrap();
        let from = PackageIdentifier::new("com.example.app");
        let to = PackageIdentifier::new("com.example.clone");
        assert!(!move_package_dir(dir.path(), &from, &to).unwrap());
    }

    #[test]
    fn moves_into_own_subtree_and_back() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("com/app/Main.smali"));

        let outer = PackageIdentifier::new("com.app");
        let inner = PackageIdentifier::new("com.app.clone");
        assert!(move_package_dir(root, &outer, &inner).unwrap());
        assert!(root.join("com/app/clone/Main.smali").is_file());
        assert!(!root.join(STAGING_DIR).exists());

        assert!(move_package_dir(root, &inner, &outer).unwrap());
        assert!(root.join("com/app/Main.smali").is_file());
        assert!(!root.join("com/app/clone").exists());
    }

    #[test]
    fn occupied_destination_fails() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("com/example/app/Main.smali"));
        touch(&root.join("com/example/clone/Other.smali"));

        let from = PackageIdentifier::new("com.example.app");
        let to = PackageIdentifier::new("com.example.clone");
        let err = move_package_dir(root, &from, &to).unwrap_err();
        assert!(matches!(err, RewriteError::Move { .. }));
        assert!(root.join("com/example/app/Main.smali").is_file());
    }
}
