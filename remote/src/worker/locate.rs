use std::path::{Path, PathBuf};

fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
}

/// Find the worker binary for a local worker.
///
/// A `program` containing a `/` is used as given. Otherwise we look next to the
/// current executable (and one level up, where test binaries live), then on `PATH`.
pub fn find_local_binary(program: &str) -> anyhow::Result<PathBuf> {
    if program.contains('/') {
        return Ok(PathBuf::from(program));
    }
    let mut searched = Vec::new();
    if let Ok(current_exe) = std::env::current_exe() {
        for dir in current_exe.ancestors().skip(1).take(2) {
            let path = dir.join(program);
            if is_executable_file(&path) {
                tracing::debug!("found {} at {}", program, path.display());
                return Ok(path);
            }
            searched.push(path);
        }
    }
    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let path = dir.join(program);
            if is_executable_file(&path) {
                tracing::debug!("found {} in PATH at {}", program, path.display());
                return Ok(path);
            }
        }
        searched.push(PathBuf::from("$PATH"));
    }
    anyhow::bail!(
        "no {} binary found, searched: {}",
        program,
        searched
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )
}
