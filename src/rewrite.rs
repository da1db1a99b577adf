//! Literal find-and-replace over a single file.
//!
//! A file is read fully, every substitution is applied in order to the same in-memory buffer
//! and the file is only written if the buffer changed.

use crate::error::{RewriteError, RewriteFileResult};
use crate::options::WriteStrategy;
use crate::types::{RewriteOutcome, Substitution};
use log::debug;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Applies each substitution in turn to `text`, returning the new text and the number of
/// replacements made. Substitutions with an empty search string are ignored.
///
/// # Examples
///
/// ```
///  use apkclone::rewrite::apply_substitutions;
///  use apkclone::types::Substitution;
///
///  let (out, n) = apply_substitutions("package=\"com.a\"", &[Substitution::new("com.a", "com.b")]);
///  assert_eq!(out, "package=\"com.b\"");
///  assert_eq!(n, 1);
/// ```
pub fn apply_substitutions(text: &str, subs: &[Substitution]) -> (String, usize) {
    let mut out = text.to_string();
    let mut count = 0;
    for s in subs {
        if s.from.is_empty() {
            continue;
        }
        let found = out.matches(s.from.as_str()).count();
        if found > 0 {
            out = out.replace(s.from.as_str(), &s.to);
            count += found;
        }
    }
    (out, count)
}

/// Rewrites one file in place, substituting every literal occurrence of each `from` with its `to`.
///
/// Returns [`RewriteOutcome::Unchanged`] without touching the file when nothing matched.
/// A file that is not UTF-8 is only an error if it actually contains one of the search strings.
pub fn rewrite_file(
    path: &Path,
    subs: &[Substitution],
    strategy: WriteStrategy,
) -> RewriteFileResult<RewriteOutcome> {
    let bytes = fs::read(path).map_err(|e| RewriteError::io(path, e))?;

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            let raw = e.into_bytes();
            if subs.iter().any(|s| contains_bytes(&raw, s.from.as_bytes())) {
                return Err(RewriteError::Decode {
                    path: path.to_path_buf(),
                });
            }
            return Ok(RewriteOutcome::Unchanged);
        }
    };

    let (new_text, replacements) = apply_substitutions(&text, subs);
    if replacements == 0 || new_text == text {
        return Ok(RewriteOutcome::Unchanged);
    }

    write_contents(path, new_text.as_bytes(), strategy).map_err(|e| RewriteError::io(path, e))?;
    debug!("{}: {} replacements", path.display(), replacements);
    Ok(RewriteOutcome::Changed { replacements })
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

fn write_contents(path: &Path, data: &[u8], strategy: WriteStrategy) -> io::Result<()> {
    let permissions = fs::metadata(path)?.permissions();
    if permissions.readonly() {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "file is read-only",
        ));
    }

    match strategy {
        WriteStrategy::InPlace => {
            let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
            file.write_all(data)?;
            file.flush()
        }
        WriteStrategy::Atomic => {
            // A symlinked file is replaced at its target, leaving the link in place
            let target = fs::canonicalize(path)?;
            let dir = match target.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            let mut tmp = NamedTempFile::new_in(dir)?;
            tmp.write_all(data)?;
            tmp.as_file().sync_all()?;
            fs::set_permissions(tmp.path(), permissions)?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        }
    }
}
