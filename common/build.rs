use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").current_dir("..").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn main() {
    // best effort, builds from a source tarball have no git metadata
    if let Some(describe) = git(&["describe", "--tags", "--long", "--always", "--dirty"]) {
        println!("cargo:rustc-env=RBAK_GIT_DESCRIBE={describe}");
    }
    if let Some(hash) = git(&["rev-parse", "HEAD"]) {
        println!("cargo:rustc-env=RBAK_GIT_HASH={hash}");
    }
    let git_dir = std::path::Path::new("..").join(".git");
    if git_dir.exists() {
        println!("cargo:rerun-if-changed=../.git/HEAD");
        println!("cargo:rerun-if-changed=../.git/refs");
    }
}
