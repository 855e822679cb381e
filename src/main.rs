use std::io::{IsTerminal, Read};
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, NaiveDate};
use clap::{Args, CommandFactory, Parser, Subcommand};
use miette::{IntoDiagnostic, Result, WrapErr};
use tracing_subscriber::EnvFilter;

use strata_core::{DiffAlgorithm, MiningConfig, Order, OutputFormat, StrataConfig, CONFIG_FILE};
use strata_gitpulse::backend::VcsBackend;
use strata_gitpulse::process::{MetricsRange, ProcessMetrics};
use strata_gitpulse::provenance::{ProvenanceOptions, ProvenanceTracker};
use strata_gitpulse::scratch::open_location;

mod render;

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Mine git repositories for commits, line provenance and process metrics",
    long_about = "Strata walks the history of one or more git repositories and turns it into\n\
                   structured data: commits with per-file line records, the commits that\n\
                   introduced the lines a fix removes (SZZ), and per-file process metrics.\n\n\
                   Examples:\n  \
                     strata commits --repo . --no-merges        List non-merge commits\n  \
                     strata commits --since 2024-01-01 --format json\n  \
                     strata metrics --from v1.0 --to v2.0       Process metrics between two commits\n  \
                     strata provenance 3f2a9c1                  Commits that introduced fixed lines\n  \
                     git show | strata diff                     Parse a unified diff"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .strata.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable tables and summaries (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List the commits selected by the range and filter flags
    #[command(long_about = "List the commits selected by the range and filter flags.\n\n\
        Flags override the [mining] table of the configuration file. Commits are\n\
        listed oldest first unless --order says otherwise.\n\n\
        Examples:\n  strata commits --repo . --author alice\n  strata commits --from-tag v1.0 --to-tag v2.0 --order reverse\n  strata commits --filepath src/lib.rs --format json")]
    Commits {
        #[command(flatten)]
        select: SelectArgs,

        /// Stop after this many commits
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Compute per-file process metrics over a commit range
    #[command(long_about = "Compute per-file process metrics over a commit range.\n\n\
        Give either two commits (--from/--to) or two dates (--since/--until).\n\
        Reports commit count, churn, added and removed lines, contributors,\n\
        contributor experience and the median hunk count for every file.\n\n\
        Examples:\n  strata metrics --from 1a2b3c --to 4d5e6f\n  strata metrics --since 2024-01-01 --until 2024-06-30")]
    Metrics {
        /// Repository path or URL (default: current directory)
        #[arg(long, default_value = ".")]
        repo: String,

        /// First commit of the range
        #[arg(long, requires = "to")]
        from: Option<String>,

        /// Last commit of the range
        #[arg(long, requires = "from")]
        to: Option<String>,

        /// First committer date of the range (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_date, requires = "until", conflicts_with = "from")]
        since: Option<DateTime<FixedOffset>>,

        /// Last committer date of the range (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_date, requires = "since")]
        until: Option<DateTime<FixedOffset>>,
    },
    /// Find the commits that last touched the lines a commit removes
    #[command(long_about = "Find the commits that last touched the lines a commit removes.\n\n\
        Every deleted or changed line of every file in the commit is blamed at the\n\
        commit's first parent. Blank and comment lines are ignored unless\n\
        --keep-noise is given. Commits passed with --transparent (reformatting,\n\
        license headers) are looked through.\n\n\
        Examples:\n  strata provenance 3f2a9c1\n  strata provenance 3f2a9c1 --transparent 77aa01e --format json")]
    Provenance {
        /// The commit to analyse
        hash: String,

        /// Repository path or URL (default: current directory)
        #[arg(long, default_value = ".")]
        repo: String,

        /// Commits to look through
        #[arg(long)]
        transparent: Vec<String>,

        /// Also blame blank and comment lines
        #[arg(long)]
        keep_noise: bool,
    },
    /// Parse a unified diff into per-file line records
    #[command(long_about = "Parse a unified diff into per-file line records.\n\n\
        Reads a patch from stdin or --file, or takes the diff of --commit from the\n\
        repository, optionally restricted to --path.\n\n\
        Examples:\n  git diff | strata diff\n  strata diff --file changes.patch --format json\n  strata diff --commit HEAD --path src/main.rs")]
    Diff {
        /// Read diff from file instead of stdin
        #[arg(long, conflicts_with = "commit")]
        file: Option<PathBuf>,

        /// Diff this commit against its first parent
        #[arg(long)]
        commit: Option<String>,

        /// Only this file of --commit
        #[arg(long, requires = "commit")]
        path: Option<String>,

        /// Repository holding --commit (default: current directory)
        #[arg(long, default_value = ".")]
        repo: String,
    },
    /// Create a default .strata.toml configuration file
    #[command(long_about = "Create a default .strata.toml configuration file.\n\n\
        Generates a commented-out template with every mining option.\n\
        Fails if .strata.toml already exists.")]
    Init,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Range, filter and traversal flags shared with the `[mining]` table.
#[derive(Args)]
struct SelectArgs {
    /// Repository path or URL; repeat for several (default: current directory)
    #[arg(long = "repo")]
    repos: Vec<String>,

    /// Only this commit
    #[arg(long)]
    single: Option<String>,

    /// Commits on or after this committer date (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    since: Option<DateTime<FixedOffset>>,

    /// Commits on or before this committer date (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    to: Option<DateTime<FixedOffset>>,

    /// Start from this commit
    #[arg(long)]
    from_commit: Option<String>,

    /// Stop at this commit
    #[arg(long)]
    to_commit: Option<String>,

    /// Start from this tag
    #[arg(long)]
    from_tag: Option<String>,

    /// Stop at this tag
    #[arg(long)]
    to_tag: Option<String>,

    /// Walk this branch instead of HEAD
    #[arg(long)]
    branch: Option<String>,

    /// Skip merge commits
    #[arg(long)]
    no_merges: bool,

    /// Only commits by this author name; repeatable
    #[arg(long = "author")]
    authors: Vec<String>,

    /// Only this commit hash or prefix; repeatable
    #[arg(long = "only-commit")]
    only_commits: Vec<String>,

    /// Only tagged commits
    #[arg(long)]
    releases: bool,

    /// Only commits that touched this path
    #[arg(long)]
    filepath: Option<String>,

    /// With --filepath, accept a path deleted from HEAD
    #[arg(long)]
    include_deleted: bool,

    /// Only commits modifying a file with this suffix; repeatable
    #[arg(long = "file-type")]
    file_types: Vec<String>,

    /// Ordering: date-order, author-date-order, topo-order or reverse
    #[arg(long)]
    order: Option<Order>,

    /// Worker threads materializing commits
    #[arg(long)]
    workers: Option<usize>,

    /// Ignore whitespace when diffing
    #[arg(long)]
    skip_whitespaces: bool,

    /// Diff algorithm: myers, minimal or patience
    #[arg(long)]
    diff_algorithm: Option<DiffAlgorithm>,

    /// Keep remote clones in this directory
    #[arg(long)]
    clone_to: Option<PathBuf>,

    /// Walk from every local reference
    #[arg(long)]
    include_refs: bool,

    /// Walk from remote-tracking references too
    #[arg(long)]
    include_remotes: bool,

    /// Map identities through .mailmap
    #[arg(long)]
    mailmap: bool,
}

impl SelectArgs {
    /// Override `config` with every flag that was given.
    fn apply(self, config: &mut MiningConfig) {
        if !self.repos.is_empty() {
            config.repos = self.repos;
        }
        if config.repos.is_empty() {
            config.repos.push(".".into());
        }
        macro_rules! set_some {
            ($($flag:ident => $field:ident),* $(,)?) => {
                $(if self.$flag.is_some() {
                    config.$field = self.$flag;
                })*
            };
        }
        set_some!(
            single => single,
            since => since,
            to => to,
            from_commit => from_commit,
            to_commit => to_commit,
            from_tag => from_tag,
            to_tag => to_tag,
            branch => only_in_branch,
            filepath => filepath,
            order => order,
            clone_to => clone_repo_to,
        );
        if let Some(workers) = self.workers {
            config.num_workers = workers;
        }
        if let Some(algorithm) = self.diff_algorithm {
            config.diff_algorithm = algorithm;
        }
        if !self.authors.is_empty() {
            config.only_authors = self.authors;
        }
        if !self.only_commits.is_empty() {
            config.only_commits = self.only_commits;
        }
        if !self.file_types.is_empty() {
            config.only_modifications_with_file_types = self.file_types;
        }
        config.only_no_merge |= self.no_merges;
        config.only_releases |= self.releases;
        config.include_deleted_files |= self.include_deleted;
        config.skip_whitespaces |= self.skip_whitespaces;
        config.include_refs |= self.include_refs;
        config.include_remotes |= self.include_remotes;
        config.use_mailmap |= self.mailmap;
    }
}

/// Parse an RFC 3339 timestamp or a plain date (midnight UTC).
fn parse_date(s: &str) -> std::result::Result<DateTime<FixedOffset>, String> {
    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Ok(date);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().fixed_offset())
        .ok_or_else(|| format!("invalid date '{s}': expected RFC 3339 or YYYY-MM-DD"))
}

const DEFAULT_CONFIG: &str = r#"# strata configuration
# Command-line flags override these values.

[mining]
# repos = ["."]

# Range: at most one lower and one upper bound.
# since = "2024-01-01T00:00:00Z"
# to = "2024-12-31T23:59:59Z"
# from_commit = ""
# to_commit = ""
# from_tag = ""
# to_tag = ""

# Filters
# only_in_branch = "main"
# only_no_merge = false
# only_authors = []
# only_releases = false
# filepath = "src/lib.rs"
# only_modifications_with_file_types = [".rs"]

# Traversal
# order = "reverse"        # date-order, author-date-order, topo-order, reverse
# num_workers = 1
# skip_whitespaces = false
# diff_algorithm = "myers" # myers, minimal, patience
# clone_repo_to = "/tmp/strata-clones"
# use_mailmap = false
"#;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<StrataConfig> {
    let config = match path {
        Some(path) => StrataConfig::from_file(path)?,
        None => {
            let default_path = std::path::Path::new(CONFIG_FILE);
            if default_path.exists() {
                StrataConfig::from_file(default_path)?
            } else {
                StrataConfig::default()
            }
        }
    };
    Ok(config)
}

fn spinner(message: &'static str) -> Option<indicatif::ProgressBar> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    Some(pb)
}

fn read_diff_input(file: &Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read {}", path.display())),
        None => {
            if std::io::stdin().is_terminal() {
                miette::bail!(miette::miette!(
                    help = "Pipe a diff in, e.g. `git diff | strata diff`, or pass --file",
                    "No diff on stdin"
                ));
            }
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .into_diagnostic()
                .wrap_err("failed to read diff from stdin")?;
            Ok(input)
        }
    }
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_ref())?;
    tracing::debug!(format = %cli.format, repos = ?config.mining.repos, "loaded configuration");

    match cli.command {
        None => {
            Cli::command().print_help().into_diagnostic()?;
        }
        Some(Command::Commits { select, limit }) => {
            let mut mining = config.mining;
            select.apply(&mut mining);

            let stream = strata_gitpulse::traverse(&mining)?;
            let mut commits = Vec::new();
            for commit in stream.take(limit.unwrap_or(usize::MAX)) {
                commits.push(commit?);
            }
            print!("{}", render::commits(&commits, cli.format)?);
        }
        Some(Command::Metrics {
            repo,
            from,
            to,
            since,
            until,
        }) => {
            let range = match (from, to, since, until) {
                (Some(from), Some(to), None, None) => MetricsRange::Commits { from, to },
                (None, None, Some(since), Some(to)) => MetricsRange::Dates { since, to },
                _ => miette::bail!(miette::miette!(
                    help = "Pass --from and --to, or --since and --until",
                    "No commit range given"
                )),
            };
            let opened = open_location(&repo, &config.mining)?;
            let _scratch = opened.scratch;

            let pb = spinner("Computing process metrics...");
            let metrics = ProcessMetrics::compute(opened.backend, &range).inspect_err(|_e| {
                if let Some(pb) = &pb {
                    pb.finish_with_message("Failed");
                }
            })?;
            if let Some(pb) = pb {
                pb.finish_and_clear();
            }
            print!("{}", render::metrics(&metrics, cli.format)?);
        }
        Some(Command::Provenance {
            hash,
            repo,
            transparent,
            keep_noise,
        }) => {
            let opened = open_location(&repo, &config.mining)?;
            let commit = opened.backend.commit(&hash)?;
            let options = ProvenanceOptions {
                skip_noise: !keep_noise,
                ..ProvenanceOptions::transparent(transparent)
            };

            let pb = spinner("Blaming deleted lines...");
            let found = ProvenanceTracker::new(&opened.backend, options).for_commit(&commit);
            if let Some(pb) = pb {
                pb.finish_and_clear();
            }
            print!("{}", render::provenance(&commit.hash, &found, cli.format)?);
        }
        Some(Command::Diff {
            file,
            commit,
            path,
            repo,
        }) => {
            let modifications = match commit {
                Some(hash) => {
                    let opened = open_location(&repo, &config.mining)?;
                    let commit = opened.backend.commit(&hash)?;
                    commit
                        .modifications
                        .into_iter()
                        .filter(|m| {
                            path.as_deref().map_or(true, |p| {
                                m.new_path.as_deref() == Some(p) || m.old_path.as_deref() == Some(p)
                            })
                        })
                        .collect()
                }
                None => {
                    let input = read_diff_input(&file)?;
                    strata_difflens::parser::parse_unified_diff(&input)
                }
            };
            print!("{}", render::modifications(&modifications, cli.format)?);
        }
        Some(Command::Init) => {
            let path = std::path::Path::new(CONFIG_FILE);
            if path.exists() {
                miette::bail!("{CONFIG_FILE} already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {CONFIG_FILE} with default configuration");
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "strata", &mut std::io::stdout());
        }
    }

    Ok(())
}
