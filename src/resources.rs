use crate::cloner::JobContext;
use crate::error::RewriteError;
use crate::rewrite::rewrite_file;
use crate::types::{FailureReason, PackageIdentifier, RewriteForms, Stage, Substitution};
use log::{debug, warn};
use std::path::Path;
use walkdir::WalkDir;

/// Updates dotted package references in every file under the resource directory.
///
/// This stage is best effort: a file that cannot be read, decoded or written is recorded as a
/// warning and the walk carries on. Only cancellation stops it early.
pub struct ResourceTreeRewriter {
    subs: Vec<Substitution>,
}

impl ResourceTreeRewriter {
    pub fn new(from: &PackageIdentifier, to: &PackageIdentifier) -> ResourceTreeRewriter {
        ResourceTreeRewriter {
            subs: from.substitutions(to, RewriteForms::DOTTED),
        }
    }

    pub fn rewrite(&self, ctx: &mut JobContext, resource_root: &Path) -> Result<(), FailureReason> {
        if !resource_root.is_dir() {
            debug!("No resource directory at {}, skipping", resource_root.display());
            return Ok(());
        }

        let walk = WalkDir::new(resource_root).follow_links(true).sort_by_file_name();
        for entry in walk {
            ctx.check_cancelled()?;
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let e = RewriteError::from(e);
                    self.record_failure(ctx, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            ctx.emit(Stage::Resources, entry.path());
            ctx.stats.files_visited += 1;
            match rewrite_file(entry.path(), &self.subs, ctx.options.write_strategy) {
                Ok(outcome) => ctx.stats.record(outcome),
                Err(e) => self.record_failure(ctx, e),
            }
        }
        Ok(())
    }

    fn record_failure(&self, ctx: &mut JobContext, e: RewriteError) {
        warn!("Skipping resource: {e}");
        let path = match &e {
            RewriteError::Io { path, .. } | RewriteError::Decode { path } => ctx.relative(path),
            RewriteError::Move { from, .. } => ctx.relative(from),
        };
        ctx.warn(path, e.message());
    }
}
