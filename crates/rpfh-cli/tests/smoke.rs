use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn resolve_cli_exe(repo_root: &Path) -> PathBuf {
    // Avoid relying on `CARGO_BIN_EXE_*`; look in the workspace `target/` dir instead.
    let target_dir = std::env::var_os("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| repo_root.join("target"));
    let exe_name = format!("rpfh{}", std::env::consts::EXE_SUFFIX);
    let debug_exe = target_dir.join("debug").join(&exe_name);
    let release_exe = target_dir.join("release").join(&exe_name);
    if debug_exe.exists() {
        debug_exe
    } else if release_exe.exists() {
        release_exe
    } else {
        panic!(
            "expected rpfh binary at {} or {}",
            debug_exe.display(),
            release_exe.display()
        );
    }
}

fn run(args: &[&str]) -> Output {
    let repo_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..");
    Command::new(resolve_cli_exe(&repo_root))
        .args(args)
        .env_remove("RUST_LOG")
        .env("RPFH_LOG", "warn")
        .output()
        .expect("failed to run rpfh CLI")
}

#[test]
fn runs_rounds_and_prints_summary() {
    let output = run(&["--ram", "4", "--pages", "16", "--rounds", "3"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "rpfh failed.\nstdout:\n{stdout}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("pages verified:      48"), "{stdout}");
    assert!(stdout.contains("fetches:             48"), "{stdout}");
    assert!(stdout.contains("free frames left:    16"), "{stdout}");
    assert!(stdout.contains("evicted pages left:  0"), "{stdout}");
}

#[test]
fn starved_pool_exits_with_error() {
    let output = run(&["--ram", "4", "--pages", "8", "--extra-frames", "2"]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success(), "rpfh unexpectedly succeeded");
    assert!(stderr.contains("empty free-frame pool"), "{stderr}");
}
