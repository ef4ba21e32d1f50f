//! Shared fixtures for runner integration tests

use quirk_core::{CodeRunner, OverloadPolicy, RunnerConfig};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::{tempdir, TempDir};

/// Understands a tiny line-oriented subset of Quirk:
/// `print X` echoes X, `sleep N` sleeps, `raise MSG` writes MSG to stderr and
/// exits non-zero. Anything else is ignored.
pub const FAKE_QUIRK: &str = r#"
while IFS= read -r line || [ -n "$line" ]; do
  case "$line" in
    "print "*) echo "${line#print }" ;;
    "sleep "*) sleep "${line#sleep }" ;;
    "raise "*) echo "${line#raise }" >&2; exit 1 ;;
    *) ;;
  esac
done < "$1"
"#;

pub fn create_fake_executable(path: &Path, content: &str) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut file = fs::File::create(path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    writeln!(file, "{}", content).unwrap();
    drop(file);
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

pub struct TestRunner {
    pub runner: CodeRunner,
    pub scratch: PathBuf,
    _root: TempDir,
}

impl TestRunner {
    pub fn scratch_entries(&self) -> usize {
        match fs::read_dir(&self.scratch) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

pub fn build_runner(configure: impl FnOnce(RunnerConfig) -> RunnerConfig) -> TestRunner {
    let _ = env_logger::builder().is_test(true).try_init();

    let root = tempdir().unwrap();
    let interpreter = root.path().join("bin").join("quirk");
    create_fake_executable(&interpreter, FAKE_QUIRK);
    let scratch = root.path().join("scratch");

    let config = RunnerConfig::default()
        .with_interpreter(interpreter.to_string_lossy(), vec![])
        .with_working_dir(root.path())
        .with_scratch_dir(&scratch)
        .with_deadline(Duration::from_secs(5))
        .with_max_concurrent(8)
        .with_overload_policy(OverloadPolicy::Queue, 64);

    let runner = CodeRunner::new(&configure(config)).unwrap();
    TestRunner {
        runner,
        scratch,
        _root: root,
    }
}
