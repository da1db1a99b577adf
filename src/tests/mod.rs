
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

pub(crate) const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8" standalone="no"?><manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example.app">
    <application android:name="com.example.app.App" android:label="@string/app_name">
        <activity android:name="com.example.app.MainActivity" android:exported="true"/>
        <provider android:authorities="com.example.app.provider" android:name="androidx.core.content.FileProvider"/>
    </application>
</manifest>
"#;

pub(crate) const MAIN_ACTIVITY: &str = r#".class public Lcom/example/app/MainActivity;
.super Landroid/app/Activity;
.source "MainActivity.java"

.method protected onCreate(Landroid/os/Bundle;)V
    .registers 3
    invoke-super {p0, p1}, Landroid/app/Activity;->onCreate(Landroid/os/Bundle;)V
    const-string v0, "com.example.app"
    new-instance v1, Lcom/example/app/ui/Screen;
    return-void
.end method
"#;

pub(crate) const SCREEN: &str = r#".class public Lcom/example/app/ui/Screen;
.super Ljava/lang/Object;

.field private owner:Lcom/example/app/MainActivity;
"#;

pub(crate) const LIBRARY_UTIL: &str = r#".class public Landroidx/core/Util;
.super Ljava/lang/Object;

.method public static open(Lcom/example/app/MainActivity;)V
    .registers 1
    return-void
.end method
"#;

pub(crate) const UNRELATED: &str = r#".class public Lokhttp3/Client;
.super Ljava/lang/Object;
"#;

/// A small decoded APK laid out the way apktool writes it
pub(crate) struct PackageFixture {
    pub dir: TempDir,
}

impl PackageFixture {
    pub fn new() -> PackageFixture {
        let fixture = PackageFixture {
            dir: TempDir::new().expect("create fixture dir"),
        };
        fixture.write("AndroidManifest.xml", MANIFEST.as_bytes());
        fixture.write(
            "res/values/strings.xml",
            b"<resources>\n    <string name=\"authority\">com.example.app.provider</string>\n</resources>\n",
        );
        fixture.write("res/xml/paths.xml", b"package=\"com.example.app\"");
        fixture.write("res/drawable/icon.png", &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0xff, 0x00]);
        fixture.write("smali/com/example/app/MainActivity.smali", MAIN_ACTIVITY.as_bytes());
        fixture.write("smali/com/example/app/ui/Screen.smali", SCREEN.as_bytes());
        fixture.write("smali/androidx/core/Util.smali", LIBRARY_UTIL.as_bytes());
        fixture.write(
            "smali_classes2/com/example/app/Extra.smali",
            b".class public Lcom/example/app/Extra;\n.super Ljava/lang/Object;\n",
        );
        fixture.write("smali_classes3/okhttp3/Client.smali", UNRELATED.as_bytes());
        fixture
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn write(&self, rel: &str, data: &[u8]) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().expect("fixture path has a parent")).expect("create dirs");
        fs::write(path, data).expect("write fixture file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).expect("read fixture file")
    }

    /// Every file's bytes and every directory, relative to the root
    pub fn snapshot(&self) -> (BTreeMap<PathBuf, Vec<u8>>, BTreeSet<PathBuf>) {
        let mut files = BTreeMap::new();
        let mut dirs = BTreeSet::new();
        for entry in WalkDir::new(self.root()).min_depth(1) {
            let entry = entry.expect("walk fixture");
            let rel = entry.path().strip_prefix(self.root()).unwrap().to_path_buf();
            if entry.file_type().is_dir() {
                dirs.insert(rel);
            } else {
                files.insert(rel, fs::read(entry.path()).expect("read fixture file"));
            }
        }
        (files, dirs)
    }

    /// Total occurrences of `needle` across every text file
    pub fn count(&self, needle: &str) -> usize {
        self.snapshot()
            .0
            .values()
            .filter_map(|data| std::str::from_utf8(data).ok())
            .map(|text| text.matches(needle).count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_layout() {
        let f = PackageFixture::new();
        assert!(f.path("smali/com/example/app/MainActivity.smali").is_file());
        assert_eq!(f.count("com.example.app"), 7);
        assert_eq!(f.count("Lcom/example/app"), 6);
    }
}
