use std::path::Path;

use anyhow::Result;
use finch_engine::EngineSettings;

/// Execute the `transforms` command: list built-in transformations and
/// executable modules installed in the module directories.
pub fn execute(settings: &EngineSettings) -> Result<()> {
    let registry = finch_transforms::builtins();
    println!("Built-in:");
    for name in registry.names() {
        println!("  {name}");
    }

    let mut installed = Vec::new();
    for dir in &settings.module_dirs {
        if !dir.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if is_executable(&path) {
                installed.push(path);
            }
        }
    }

    if !installed.is_empty() {
        installed.sort();
        println!("Installed:");
        for path in installed {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            println!("  {name}  ({})", path.display());
        }
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
