use crate::cloner::JobContext;
use crate::error::{RewriteError, RewriteFileResult};
use crate::rewrite::rewrite_file;
use crate::types::{
    FailureReason, PackageIdentifier, RewriteForms, RewriteOutcome, Stage, Substitution,
};
use log::{error, info};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_until, take_while1};
use nom::character::complete::{char, multispace0, multispace1};
use nom::multi::many0;
use nom::sequence::{delimited, preceded, separated_pair};
use nom::IResult;
use std::fs;
use std::path::Path;

fn attribute_name(i: &str) -> IResult<&str, &str>
{
    take_while1(|c: char| c.is_alphanumeric() || c == ':' || c == '_' || c == '-' || c == '.')(i)
}

fn attribute_value(i: &str) -> IResult<&str, &str>
{
    alt((
        delimited(char('"'), take_until("\""), char('"')),
        delimited(char('\''), take_until("'"), char('\'')),
    ))(i)
}

fn attribute(i: &str) -> IResult<&str, (&str, &str)>
{
    preceded(
        multispace1,
        separated_pair(attribute_name, delimited(multispace0, char('='), multispace0), attribute_value),
    )(i)
}

fn manifest_attributes(i: &str) -> IResult<&str, Vec<(&str, &str)>>
{
    let (i, _) = take_until("<manifest")(i)?;
    let (i, _) = tag("<manifest")(i)?;
    many0(attribute)(i)
}

/// Returns the `package` attribute of the `<manifest>` element in a decoded AndroidManifest.xml
///
/// # Examples
///
/// ```
///  use apkclone::manifest::declared_package;
///
///  let xml = r#"<?xml version="1.0" encoding="utf-8"?>
///  <manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example.app">
///  </manifest>"#;
///  assert_eq!(declared_package(xml), Some("com.example.app"));
/// ```
pub fn declared_package(xml: &str) -> Option<&str>
{
    let (_, attributes) = manifest_attributes(xml).ok()?;
    attributes
        .into_iter()
        .find(|(name, _)| *name == "package")
        .map(|(_, value)| value)
}

/// Updates the package declaration and every other dotted reference in the manifest.
///
/// Unlike resources, any failure here fails the whole job.
pub struct ManifestRewriter {
    subs: Vec<Substitution>,
}

impl ManifestRewriter {
    pub fn new(from: &PackageIdentifier, to: &PackageIdentifier) -> ManifestRewriter {
        ManifestRewriter {
            subs: from.substitutions(to, RewriteForms::DOTTED),
        }
    }

    pub fn rewrite(&self, ctx: &mut JobContext, manifest_path: &Path) -> Result<RewriteOutcome, FailureReason> {
        ctx.check_cancelled()?;
        ctx.emit(Stage::Manifest, manifest_path);
        ctx.stats.files_visited += 1;

        match rewrite_file(manifest_path, &self.subs, ctx.options.write_strategy) {
            Ok(outcome) => {
                ctx.stats.record(outcome);
                if !outcome.is_changed() {
                    info!("{} has no references to update", manifest_path.display());
                }
                Ok(outcome)
            }
            Err(e) => {
                error!("{e}");
                Err(FailureReason::Manifest {
                    path: ctx.relative(manifest_path),
                    message: e.message(),
                })
            }
        }
    }

    /// Reads the package a manifest file currently declares
    pub fn read_package(manifest_path: &Path) -> RewriteFileResult<Option<PackageIdentifier>> {
        let xml = fs::read_to_string(manifest_path).map_err(|e| RewriteError::io(manifest_path, e))?;
        Ok(declared_package(&xml).map(PackageIdentifier::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8" standalone="no"?><manifest xmlns:android="http://schemas.android.com/apk/res/android" android:compileSdkVersion="33" package="com.example.app" platformBuildVersionCode="33">
    <application android:name="com.example.app.App"/>
</manifest>"#;

    #[test]
    fn finds_package_among_attributes() {
        assert_eq!(declared_package(MANIFEST), Some("com.example.app"));
    }

    #[test]
    fn single_quoted_and_spaced() {
        let xml = "<manifest\n    package = 'org.sample'\n>";
        assert_eq!(declared_package(xml), Some("org.sample"));
    }

    #[test]
    fn no_package_attribute() {
        assert_eq!(declared_package("<manifest xmlns:android=\"x\"></manifest>"), None);
        assert_eq!(declared_package("<resources/>"), None);
    }

    #[test]
    fn read_package_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("AndroidManifest.xml");
        fs::write(&path, MANIFEST).unwrap();
        let p = ManifestRewriter::read_package(&path).unwrap().unwrap();
        assert_eq!(p.path(), "com/example/app");
        assert!(ManifestRewriter::read_package(&dir.path().join("missing.xml")).is_err());
    }
}
