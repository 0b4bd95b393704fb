use crate::models::{RawRuleRecord, TEST_SUITE_RULE_TYPE};
use crate::query::QueryExecutor;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, warn};

/// Attributes whose label values name the target a rule runs against rather
/// than something it depends on.
const LINKED_TARGET_ATTRIBUTES: &[&str] = &["xctest_app", "test_host"];

/// A `test_suite`'s explicit members. Its `ruleInput` also carries common
/// label attributes such as `target_compatible_with`.
const SUITE_TESTS_ATTRIBUTE: &str = "tests";

#[derive(Debug, Clone)]
pub struct BazelOptions {
    pub workspace: PathBuf,
    pub bazel_path: PathBuf,
    pub startup_options: Vec<String>,
    pub command_options: Vec<String>,
    pub keep_going: bool,
}

impl Default for BazelOptions {
    fn default() -> Self {
        Self {
            workspace: PathBuf::new(),
            bazel_path: PathBuf::new(),
            startup_options: Vec::new(),
            command_options: Vec::new(),
            keep_going: true,
        }
    }
}

impl BazelOptions {
    pub fn bazel_binary(&self) -> &Path {
        if self.bazel_path.as_os_str().is_empty() {
            Path::new("bazel")
        } else {
            &self.bazel_path
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BazelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl BazelVersion {
    /// First release with `--output=streamed_jsonproto`.
    pub const STREAMED_JSONPROTO: BazelVersion = BazelVersion::new(7, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn at_least(&self, other: BazelVersion) -> bool {
        *self >= other
    }

    /// Parses `bazel X.Y.Z[-suffix]`; development builds report
    /// `bazel no_version` and yield `None`.
    pub fn parse(output: &str) -> Option<Self> {
        let line = output.lines().next().unwrap_or_default().trim();
        let version_str = line.strip_prefix("bazel ").unwrap_or(line);
        let base = version_str
            .split(|c: char| c == '-' || c == ' ')
            .next()
            .unwrap_or(version_str);
        let mut parts = base.split('.').map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse::<u32>().ok()
        });
        let major = parts.next().flatten()?;
        let minor = parts.next().flatten().unwrap_or(0);
        let patch = parts.next().flatten().unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }
}

pub async fn bazel_version(opts: &BazelOptions) -> Result<Option<BazelVersion>> {
    let mut cmd = Command::new(opts.bazel_binary());
    cmd.arg("--version");
    cmd.current_dir(&opts.workspace);
    cmd.kill_on_drop(true);

    let output = cmd
        .output()
        .await
        .context("failed to run bazel --version")?;
    if !output.status.success() {
        bail!("bazel --version failed with {}", output.status);
    }

    Ok(BazelVersion::parse(&String::from_utf8_lossy(&output.stdout)))
}

/// [`QueryExecutor`] that shells out to `bazel query`.
#[derive(Debug, Clone)]
pub struct BazelQueryExecutor {
    opts: BazelOptions,
}

impl BazelQueryExecutor {
    /// Checks the Bazel binary supports the output format this executor reads.
    pub async fn connect(opts: BazelOptions) -> Result<Self> {
        match bazel_version(&opts).await? {
            Some(version) if !version.at_least(BazelVersion::STREAMED_JSONPROTO) => {
                bail!(
                    "bazel {}.{}.{} is too old; streamed_jsonproto output needs 7.0.0 or newer",
                    version.major,
                    version.minor,
                    version.patch
                );
            }
            Some(version) => debug!(?version, "detected bazel version"),
            None => warn!("could not determine the bazel version; assuming a development build"),
        }
        Ok(Self { opts })
    }

    pub fn options(&self) -> &BazelOptions {
        &self.opts
    }
}

/// `execute` never passes `--keep_going`; `execute_keep_going` honours
/// [`BazelOptions::keep_going`].
impl QueryExecutor for BazelQueryExecutor {
    async fn execute(&self, expression: &str) -> Result<Vec<RawRuleRecord>> {
        let stdout = execute_bazel_query(&self.opts, expression, false).await?;
        decode_streamed_json(&stdout)
    }

    async fn execute_keep_going(&self, expression: &str) -> Result<Vec<RawRuleRecord>> {
        let stdout = execute_bazel_query(&self.opts, expression, self.opts.keep_going).await?;
        decode_streamed_json(&stdout)
    }
}

async fn execute_bazel_query(
    opts: &BazelOptions,
    expression: &str,
    keep_going: bool,
) -> Result<Vec<u8>> {
    let query_file =
        NamedTempFile::new_in(&opts.workspace).context("failed to create temporary query file")?;
    fs::write(query_file.path(), expression).context("failed to write query expression")?;

    let mut cmd = Command::new(opts.bazel_binary());
    cmd.args(&opts.startup_options);
    cmd.arg("query");
    cmd.arg("--output=streamed_jsonproto");
    cmd.arg("--noimplicit_deps");
    cmd.arg("--order_output=no");
    if keep_going {
        cmd.arg("--keep_going");
    }
    cmd.args(&opts.command_options);
    cmd.arg("--query_file");
    cmd.arg(query_file.path());
    cmd.current_dir(&opts.workspace);
    cmd.kill_on_drop(true);

    debug!(%expression, "running bazel query");
    let output = cmd.output().await.with_context(|| {
        format!(
            "failed to run bazel query with query file {}",
            query_file.path().display()
        )
    })?;

    if !is_allowed_status(&output.status, keep_going) {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("bazel query failed with {}: {stderr}", output.status);
    }
    if !output.status.success() {
        warn!(%expression, "bazel query skipped missing packages; using the rest");
    }

    Ok(output.stdout)
}

fn is_allowed_status(status: &std::process::ExitStatus, keep_going: bool) -> bool {
    status.success() || (keep_going && matches!(status.code(), Some(3)))
}

#[derive(Debug, Deserialize)]
struct StreamedTarget {
    #[serde(rename = "type")]
    kind: String,
    rule: Option<StreamedRule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamedRule {
    name: String,
    rule_class: String,
    #[serde(default)]
    attribute: Vec<StreamedAttribute>,
    #[serde(default)]
    rule_input: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamedAttribute {
    name: String,
    #[serde(default)]
    string_value: Option<String>,
    #[serde(default)]
    string_list_value: Vec<String>,
}

/// Decodes `--output=streamed_jsonproto`: one JSON `Target` per line.
/// Source files, generated files and package groups are skipped.
pub fn decode_streamed_json(bytes: &[u8]) -> Result<Vec<RawRuleRecord>> {
    let mut records = Vec::new();
    for target in serde_json::Deserializer::from_slice(bytes).into_iter::<StreamedTarget>() {
        let target = target.context("failed to decode streamed query output")?;
        let Some(rule) = target.rule else {
            continue;
        };
        if target.kind != "RULE" {
            continue;
        }
        records.push(record_from_rule(rule));
    }
    Ok(records)
}

fn record_from_rule(rule: StreamedRule) -> RawRuleRecord {
    if rule.rule_class == TEST_SUITE_RULE_TYPE {
        let tests = rule
            .attribute
            .into_iter()
            .filter(|attr| attr.name == SUITE_TESTS_ATTRIBUTE)
            .flat_map(|attr| attr.string_list_value)
            .collect();
        return RawRuleRecord {
            label: rule.name,
            rule_type: rule.rule_class,
            dependencies: tests,
            linked_targets: Vec::new(),
        };
    }

    let linked_targets: Vec<String> = rule
        .attribute
        .into_iter()
        .filter(|attr| LINKED_TARGET_ATTRIBUTES.contains(&attr.name.as_str()))
        .flat_map(|attr| attr.string_value.into_iter().chain(attr.string_list_value))
        .filter(|value| !value.is_empty())
        .collect();

    let dependencies = rule
        .rule_input
        .into_iter()
        .filter(|input| !linked_targets.contains(input))
        .collect();

    RawRuleRecord {
        label: rule.name,
        rule_type: rule.rule_class,
        dependencies,
        linked_targets,
    }
}
