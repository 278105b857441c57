use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

const TLS_HEADER: &str = "#if defined(ABSL_HAVE_TLS)\n\
                          #define ABSL_PER_THREAD_TLS_KEYWORD __thread\n\
                          #define ABSL_PER_THREAD_TLS 1\n\
                          #elif defined(_MSC_VER)\n\
                          #define ABSL_PER_THREAD_TLS_KEYWORD __declspec(thread)\n\
                          #define ABSL_PER_THREAD_TLS 1\n\
                          #endif\n";

fn hdrpatch(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_hdrpatch"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env_remove("HDRPATCH_CONFIG")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn vendored_header(root: &Path, content: &str) -> PathBuf {
    let path = root.join("subprojects/abseil-cpp-20240722.0/absl/base/internal/per_thread_tls.h");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_apply_builtin_then_rerun() {
    let root = TempDir::new().unwrap();
    let header = vendored_header(root.path(), TLS_HEADER);

    let out = hdrpatch(root.path(), &["apply"]);
    assert_eq!(out.status.code(), Some(0));
    let patched = fs::read_to_string(&header).unwrap();
    assert!(patched.contains(
        "#elif defined(__INTEL_LLVM_COMPILER)\n\
         #define ABSL_PER_THREAD_TLS_KEYWORD __thread\n\
         #define ABSL_PER_THREAD_TLS 1\n\
         \n\
         #elif defined(_MSC_VER)\n"
    ));

    let out = hdrpatch(root.path(), &["apply", "intel-llvm-tls"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("already applied"));
    assert_eq!(fs::read_to_string(&header).unwrap(), patched);
}

#[test]
fn test_missing_header_exit_code() {
    let root = TempDir::new().unwrap();
    let out = hdrpatch(root.path(), &["apply"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(!root.path().join("subprojects").exists());
}

#[test]
fn test_missing_marker_exit_code() {
    let root = TempDir::new().unwrap();
    let content = "#if defined(ABSL_HAVE_TLS)\n#endif\n";
    let header = vendored_header(root.path(), content);

    let out = hdrpatch(root.path(), &["apply"]);
    assert_eq!(out.status.code(), Some(3));
    assert_eq!(fs::read_to_string(&header).unwrap(), content);
}

#[test]
fn test_check_never_writes() {
    let root = TempDir::new().unwrap();
    let header = vendored_header(root.path(), TLS_HEADER);

    let out = hdrpatch(root.path(), &["check"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("pending"));
    assert_eq!(fs::read_to_string(&header).unwrap(), TLS_HEADER);
}

#[test]
fn test_project_config_and_target_override() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("hdrpatch.toml"),
        r##"
[[patch]]
name = "demo"
target = "demo.h"
marker = "#else"
sentinel = "DEMO_ON"
block = "#elif defined(DEMO_ON)"
"##,
    )
    .unwrap();
    let other = root.path().join("other.h");
    fs::write(&other, "#if A\n#else\n#endif\n").unwrap();

    let out = hdrpatch(
        root.path(),
        &["apply", "--target", other.to_str().unwrap(), "demo"],
    );
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(
        fs::read_to_string(&other).unwrap(),
        "#if A\n#elif defined(DEMO_ON)\n\n#else\n#endif\n"
    );
    assert!(!root.path().join("demo.h").exists());
}

#[test]
fn test_unknown_patch_name() {
    let root = TempDir::new().unwrap();
    let out = hdrpatch(root.path(), &["apply", "nope"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Unknown patch"));
}

#[test]
fn test_list_shows_builtin() {
    let root = TempDir::new().unwrap();
    let out = hdrpatch(root.path(), &["list"]);
    assert_eq!(out.status.code(), Some(0));

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("intel-llvm-tls"));
    assert!(stdout.contains("per_thread_tls.h (missing)"));
    assert!(stdout.contains("Sentinel: __INTEL_LLVM_COMPILER"));

    vendored_header(root.path(), TLS_HEADER);
    let out = hdrpatch(root.path(), &["list"]);
    assert!(!String::from_utf8_lossy(&out.stdout).contains("(missing)"));
}

#[test]
fn test_check_with_target_override() {
    let root = TempDir::new().unwrap();
    let other = root.path().join("copy.h");
    fs::write(&other, TLS_HEADER).unwrap();

    let out = hdrpatch(
        root.path(),
        &["check", "--target", other.to_str().unwrap()],
    );
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("pending (insert before line 4)"));
    assert_eq!(fs::read_to_string(&other).unwrap(), TLS_HEADER);

    let missing = root.path().join("nope.h");
    let out = hdrpatch(
        root.path(),
        &["check", "--target", missing.to_str().unwrap()],
    );
    assert_eq!(out.status.code(), Some(2));
}

/// A directory the tool can read from but not create files in.
#[cfg(unix)]
#[test]
fn test_write_failure_exit_code() {
    use std::os::unix::fs::PermissionsExt;

    let root = TempDir::new().unwrap();
    let header = vendored_header(root.path(), TLS_HEADER);
    let dir = header.parent().unwrap().to_path_buf();

    fs::set_permissions(&dir, fs::Permissions::from_mode(0o555)).unwrap();
    let canary = dir.join(".canary");
    if fs::write(&canary, b"").is_ok() {
        // Permission bits are not enforced for root
        fs::remove_file(&canary).unwrap();
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();
        eprintln!("skipping: directory permissions not enforced for this user");
        return;
    }

    let out = hdrpatch(root.path(), &["apply"]);
    fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(out.status.code(), Some(4));
    assert_eq!(fs::read_to_string(&header).unwrap(), TLS_HEADER);
}
