use anyhow::{anyhow, Context, Result};
use once_cell::sync::OnceCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use tempfile::TempDir;

static RUST_CLI_PATH: OnceCell<PathBuf> = OnceCell::new();

/// Root of the workspace (two levels up from this crate).
pub fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root is two directories above the integration-tests crate")
        .to_path_buf()
}

/// Build (once) and return the path to the rulegraph CLI binary.
pub fn rust_cli_path() -> Result<PathBuf> {
    RUST_CLI_PATH.get_or_try_init(build_rust_cli).cloned()
}

fn build_rust_cli() -> Result<PathBuf> {
    let root = workspace_root();
    let status = StdCommand::new(env!("CARGO"))
        .args(["build", "-p", "rulegraph-cli", "--bin", "rulegraph"])
        .current_dir(&root)
        .status()
        .context("failed to start cargo build for rulegraph")?;

    if !status.success() {
        return Err(anyhow!("cargo build for rulegraph failed with {status:?}"));
    }

    let mut path = root.join("target/debug/rulegraph");
    if cfg!(windows) {
        path.set_extension("exe");
    }
    Ok(path)
}

const FAKE_BAZEL: &str = r#"#!/bin/sh
dir="$(dirname "$0")"
for arg in "$@"; do
  if [ "$arg" = "--version" ]; then
    echo "bazel 7.4.1"
    exit 0
  fi
done

query_file=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "--query_file" ]; then
    query_file="$arg"
  fi
  prev="$arg"
done
echo "$*" >> "$dir/invocations.log"

for expr in "$dir"/responses/*.expr; do
  [ -e "$expr" ] || continue
  if cmp -s "$expr" "$query_file"; then
    base="${expr%.expr}"
    cat "$base.jsonl"
    if [ -e "$base.status" ]; then
      exit "$(cat "$base.status")"
    fi
    exit 0
  fi
done

echo "ERROR: Evaluation of query failed: no such package" >&2
exit 7
"#;

/// A stand-in `bazel` binary answering canned `streamed_jsonproto` output
/// for exact query expressions, next to an empty workspace directory.
pub struct FakeBazel {
    root: TempDir,
    responses: usize,
}

impl FakeBazel {
    pub fn new() -> Result<Self> {
        let root = tempfile::tempdir().context("failed to create fake bazel root")?;
        fs::create_dir_all(root.path().join("bin/responses"))?;
        fs::create_dir_all(root.path().join("workspace"))?;

        let script = root.path().join("bin/bazel");
        fs::write(&script, FAKE_BAZEL)?;
        make_executable(&script)?;

        Ok(Self { root, responses: 0 })
    }

    /// Answers `expression` with `targets`, one JSON `Target` per entry.
    pub fn respond(&mut self, expression: &str, targets: &[&str]) -> Result<&mut Self> {
        self.respond_with_status(expression, targets, 0)
    }

    /// Like [`Self::respond`], exiting with `status` after printing.
    pub fn respond_with_status(
        &mut self,
        expression: &str,
        targets: &[&str],
        status: i32,
    ) -> Result<&mut Self> {
        let base = self
            .root
            .path()
            .join("bin/responses")
            .join(format!("{:03}", self.responses));
        self.responses += 1;

        fs::write(base.with_extension("expr"), expression)?;
        let mut body = targets.join("\n");
        body.push('\n');
        fs::write(base.with_extension("jsonl"), body)?;
        if status != 0 {
            fs::write(base.with_extension("status"), status.to_string())?;
        }
        Ok(self)
    }

    pub fn bazel_path(&self) -> PathBuf {
        self.root.path().join("bin/bazel")
    }

    pub fn workspace(&self) -> PathBuf {
        self.root.path().join("workspace")
    }

    /// Argument lists of every query the fake answered (or refused).
    pub fn invocations(&self) -> Vec<String> {
        fs::read_to_string(self.root.path().join("bin/invocations.log"))
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// JSON `Target` for a rule, in `streamed_jsonproto` form. A `test_suite`
/// also lists `inputs` under its `tests` attribute.
pub fn rule_json(name: &str, rule_class: &str, inputs: &[&str], xctest_app: Option<&str>) -> String {
    let inputs = inputs
        .iter()
        .map(|input| format!("\"{input}\""))
        .collect::<Vec<_>>()
        .join(",");
    let mut attributes = Vec::new();
    if let Some(app) = xctest_app {
        attributes.push(format!(
            r#"{{"name":"xctest_app","type":"LABEL","stringValue":"{app}","explicitlySpecified":true}}"#
        ));
    }
    if rule_class == "test_suite" {
        attributes.push(format!(
            r#"{{"name":"tests","type":"LABEL_LIST","stringListValue":[{inputs}]}}"#
        ));
    }
    format!(
        r#"{{"type":"RULE","rule":{{"name":"{name}","ruleClass":"{rule_class}","attribute":[{}],"ruleInput":[{inputs}]}}}}"#,
        attributes.join(",")
    )
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Err(anyhow!("the fake bazel script needs a unix shell"))
}
