use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use rulegraph_core as core;
use std::env;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "rulegraph",
    about = "Extract Bazel rule graphs and resolve test_suite membership",
    version,
    author,
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(short = 'v', long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every rule declared directly in the given packages.
    Packages(PackagesArgs),
    /// Resolve test_suite rules into their member tests.
    TestSuites(TestSuitesArgs),
}

#[derive(Args, Debug)]
struct BazelArgs {
    /// Path to the Bazel workspace to inspect.
    #[arg(
        short = 'w',
        long = "workspacePath",
        alias = "workspace-path",
        value_name = "DIR",
        required = true
    )]
    workspace_path: PathBuf,
    /// Optional Bazel binary to invoke.
    #[arg(short = 'b', long = "bazelPath", alias = "bazel-path")]
    bazel_path: Option<PathBuf>,
    /// Additional Bazel startup options (before command).
    #[arg(
        long = "bazelStartupOptions",
        alias = "bazel-startup-options",
        value_delimiter = ' ',
        num_args = 0..
    )]
    bazel_startup_options: Vec<String>,
    /// Additional Bazel query options.
    #[arg(
        long = "bazelCommandOptions",
        alias = "bazel-command-options",
        value_delimiter = ' ',
        num_args = 0..
    )]
    bazel_command_options: Vec<String>,
    /// Keep going past missing packages (bazel exit code 3 is accepted).
    #[arg(short = 'k', long = "keep_going", default_value_t = true, action = ArgAction::Set)]
    keep_going: bool,
    /// Output JSON path (STDOUT if omitted).
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,
}

impl BazelArgs {
    fn options(&self) -> core::BazelOptions {
        core::BazelOptions {
            workspace: self.workspace_path.clone(),
            bazel_path: self.bazel_path.clone().unwrap_or_default(),
            startup_options: self.bazel_startup_options.clone(),
            command_options: self.bazel_command_options.clone(),
            keep_going: self.keep_going,
        }
    }

    fn writer(&self) -> Result<Box<dyn Write>> {
        Ok(match &self.output {
            Some(path) => Box::new(BufWriter::new(File::create(path).with_context(|| {
                format!("failed to create output file {}", path.display())
            })?)),
            None => Box::new(BufWriter::new(std::io::stdout())),
        })
    }
}

#[derive(Args, Debug)]
struct PackagesArgs {
    #[command(flatten)]
    bazel: BazelArgs,
    /// Include each rule's direct dependencies in the output.
    #[arg(
        long = "withDependencies",
        alias = "with-dependencies",
        action = ArgAction::SetTrue
    )]
    with_dependencies: bool,
    /// Packages to list, e.g. `app/ios` or `//app/ios`.
    #[arg(value_name = "PACKAGE", required = true)]
    packages: Vec<String>,
}

#[derive(Args, Debug)]
struct TestSuitesArgs {
    #[command(flatten)]
    bazel: BazelArgs,
    /// Print the transitive test labels, one per line, instead of the suite graph.
    #[arg(long, action = ArgAction::SetTrue)]
    flatten: bool,
    /// test_suite labels to resolve.
    #[arg(value_name = "LABEL", required = true)]
    labels: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse_from(normalize_args(env::args_os()));
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        error!(error = %err, "command failed");
        eprintln!("{err:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Packages(args) => handle_packages(args).await,
        Commands::TestSuites(args) => handle_test_suites(args).await,
    }
}

async fn handle_packages(args: PackagesArgs) -> Result<()> {
    let executor = core::BazelQueryExecutor::connect(args.bazel.options()).await?;
    let extractor = core::GraphExtractor::new(&executor);

    let entries: Vec<core::RuleEntry> = if args.with_dependencies {
        let graph = extractor
            .extract_rule_graph_from_packages(&args.packages)
            .await?;
        core::rule_entries(&graph)
    } else {
        extractor
            .extract_target_rules_from_packages(&args.packages)
            .await?
            .iter()
            .map(|rule| core::RuleEntry::new(rule, None))
            .collect()
    };

    let mut writer = args.bazel.writer()?;
    serde_json::to_writer_pretty(&mut writer, &entries).context("failed to write rules JSON")?;
    writeln!(writer).context("failed to write rules JSON")?;
    writer.flush().context("failed to flush output")?;

    info!(count = entries.len(), "finished extracting package rules");
    Ok(())
}

async fn handle_test_suites(args: TestSuitesArgs) -> Result<()> {
    let labels = args
        .labels
        .iter()
        .map(|raw| core::Label::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let executor = core::BazelQueryExecutor::connect(args.bazel.options()).await?;
    let graph = core::TestSuiteResolver::new(&executor)
        .resolve(labels.iter().cloned())
        .await?;

    let mut writer = args.bazel.writer()?;
    if args.flatten {
        let tests = core::flatten_tests(&graph, &labels);
        for label in &tests {
            writeln!(writer, "{label}").context("failed to write test label")?;
        }
        info!(count = tests.len(), "finished flattening test suites");
    } else {
        let entries = core::rule_entries(&graph);
        serde_json::to_writer_pretty(&mut writer, &entries)
            .context("failed to write test suite JSON")?;
        writeln!(writer).context("failed to write test suite JSON")?;
        info!(count = entries.len(), "finished resolving test suites");
    }

    writer.flush().context("failed to flush output")?;
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let s = arg.to_string_lossy();

            normalize_flag(&s, "-so", "--bazelStartupOptions")
                .or_else(|| normalize_flag(&s, "-co", "--bazelCommandOptions"))
                .unwrap_or_else(|| OsString::from(s.into_owned()))
        })
        .collect()
}

fn normalize_flag(input: &str, short: &str, long: &str) -> Option<OsString> {
    input.strip_prefix(short).and_then(|rest| {
        if rest.is_empty() || rest.starts_with('=') {
            Some(OsString::from(format!("{long}{rest}")))
        } else {
            None
        }
    })
}
