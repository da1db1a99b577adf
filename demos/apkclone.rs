use apkclone::cloner::{ApkCloner, CloneEvent};
use apkclone::options::CloneOptions;
use std::env;
use std::error::Error;

// This demo renames the package of an APK already decoded with apktool, e.g.
//   apktool decode -f app.apk -o out
//   cargo run --example apkclone -- out com.example.clone
//   apktool build out -o clone.apk
// The source package is read from out/AndroidManifest.xml unless given as a third argument.

//Usage: apkclone <decoded-dir> <new-package> [old-package]
fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <decoded-dir> <new-package> [old-package]", args[0]);
        std::process::exit(1);
    }

    match process_dir(&args[1], &args[2], args.get(3).map(String::as_str)) {
        Ok(true) => println!("All done: package renamed in {}", args[1]),
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Aborted due to error: {e}");
            std::process::exit(1);
        }
    }
}

fn process_dir(dir: &str, new_package: &str, old_package: Option<&str>) -> Result<bool, Box<dyn Error>> {
    let cloner = match old_package {
        Some(old) => ApkCloner::new(dir, old, new_package),
        None => ApkCloner::from_manifest(dir, new_package, CloneOptions::default())?,
    };
    println!(
        "Renaming {} to {}",
        cloner.source_package(),
        cloner.target_package()
    );

    let handle = cloner.start();
    let mut success = false;
    for event in handle.events().iter() {
        match event {
            CloneEvent::Started => {}
            CloneEvent::Progress(p) => println!("{} {}", p.description, p.path.display()),
            CloneEvent::Finished(result) => {
                for w in &result.warnings {
                    println!("warning: {w}");
                }
                println!("{result}");
                success = result.success;
            }
        }
    }
    Ok(success)
}
