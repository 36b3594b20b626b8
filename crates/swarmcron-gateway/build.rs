use std::process::Command;

fn main() {
    // Image builds have no .git; they pass the revision in instead.
    println!("cargo:rerun-if-env-changed=SWARMCRON_GIT_SHA");
    let sha = std::env::var("SWARMCRON_GIT_SHA")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(git_describe)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=SWARMCRON_GIT_SHA={}", sha.trim());
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/index");
}

/// Short commit hash, suffixed with `-dirty` for uncommitted changes.
fn git_describe() -> Option<String> {
    let out = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=8"])
        .output()
        .ok()?;
    out.status
        .success()
        .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())
}
