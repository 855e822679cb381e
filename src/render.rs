//! Text, JSON and Markdown rendering of command results.

use std::collections::{BTreeMap, BTreeSet};

use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use strata_core::{Commit, Modification, OutputFormat};
use strata_gitpulse::process::ProcessMetrics;

const SHORT_HASH: usize = 10;

fn short(hash: &str) -> &str {
    hash.get(..SHORT_HASH).unwrap_or(hash)
}

fn subject(message: &str) -> &str {
    message.lines().next().unwrap_or_default()
}

fn json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut out = serde_json::to_string_pretty(value).into_diagnostic()?;
    out.push('\n');
    Ok(out)
}

pub fn commits(commits: &[Commit], format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return json(commits);
    }
    let mut out = String::new();
    if format == OutputFormat::Markdown {
        out.push_str("| Commit | Date | Author | Files | + | - | Subject |\n");
        out.push_str("|--------|------|--------|-------|---|---|---------|\n");
    }
    for commit in commits {
        let date = commit.committer_date.format("%Y-%m-%d");
        match format {
            OutputFormat::Markdown => out.push_str(&format!(
                "| `{}` | {} | {} | {} | {} | {} | {} |\n",
                short(&commit.hash),
                date,
                commit.author.name,
                commit.files(),
                commit.insertions(),
                commit.deletions(),
                subject(&commit.message).replace('|', "\\|"),
            )),
            _ => out.push_str(&format!(
                "{} {} {:<20} {:>3} files +{:<5} -{:<5} {}\n",
                short(&commit.hash),
                date,
                commit.author.name,
                commit.files(),
                commit.insertions(),
                commit.deletions(),
                subject(&commit.message),
            )),
        }
    }
    if format == OutputFormat::Text {
        out.push_str(&format!("\n{} commits\n", commits.len()));
    }
    Ok(out)
}

pub fn metrics(metrics: &ProcessMetrics, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return json(metrics);
    }
    let mut out = String::new();
    let summary = format!(
        "{} commits, {} files, change set max {} avg {}, developer experience {:.2}",
        metrics.commits,
        metrics.files.len(),
        metrics.change_set_max,
        metrics.change_set_avg,
        metrics.developer_experience
    );

    if format == OutputFormat::Markdown {
        out.push_str(&format!("## Process metrics\n\n{summary}\n\n"));
        out.push_str("| File | Commits | Churn | Added | Removed | Contributors | Minor | Experience | Hunks | Devs | Owner |\n");
        out.push_str("|------|---------|-------|-------|---------|--------------|-------|------------|-------|------|-------|\n");
    } else {
        out.push_str(&format!("{summary}\n\n"));
        out.push_str(&format!(
            "{:<40} {:>7} {:>7} {:>7} {:>7} {:>6} {:>6} {:>8} {:>6} {:>9} {:>6}\n",
            "file", "commits", "churn", "added", "removed", "contr", "minor", "exp%", "hunks", "devs",
            "own"
        ));
    }

    for (path, file) in &metrics.files {
        let (contributors, minor, experience) = match &file.contributors {
            Some(c) => (
                c.count.to_string(),
                c.minor.to_string(),
                format!("{:.2}", c.experience),
            ),
            None => ("-".into(), "-".into(), "-".into()),
        };
        // distinct/active/new
        let devs = format!(
            "{}/{}/{}",
            file.developers.distinct, file.developers.active, file.developers.new
        );
        let owner = file
            .owner
            .as_ref()
            .map_or_else(|| "-".to_string(), |o| format!("{:.2}", o.lines_share));
        if format == OutputFormat::Markdown {
            out.push_str(&format!(
                "| `{path}` | {} | {} | {} | {} | {contributors} | {minor} | {experience} | {} | {devs} | {owner} |\n",
                file.commit_count,
                file.churn.count,
                file.lines_added.count,
                file.lines_removed.count,
                file.hunks_median,
            ));
        } else {
            out.push_str(&format!(
                "{:<40} {:>7} {:>7} {:>7} {:>7} {:>6} {:>6} {:>8} {:>6} {:>9} {:>6}\n",
                path,
                file.commit_count,
                file.churn.count,
                file.lines_added.count,
                file.lines_removed.count,
                contributors,
                minor,
                experience,
                file.hunks_median,
                devs,
                owner,
            ));
        }
    }
    Ok(out)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProvenanceReport<'a> {
    commit: &'a str,
    files: &'a BTreeMap<String, BTreeSet<String>>,
}

pub fn provenance(
    hash: &str,
    found: &BTreeMap<String, BTreeSet<String>>,
    format: OutputFormat,
) -> Result<String> {
    if format == OutputFormat::Json {
        return json(&ProvenanceReport {
            commit: hash,
            files: found,
        });
    }
    let mut out = String::new();
    if format == OutputFormat::Markdown {
        out.push_str(&format!("## Provenance of `{}`\n\n", short(hash)));
    }
    if found.is_empty() {
        out.push_str("No earlier commits touched the removed lines.\n");
        return Ok(out);
    }
    for (path, commits) in found {
        if format == OutputFormat::Markdown {
            out.push_str(&format!("- `{path}`\n"));
            for commit in commits {
                out.push_str(&format!("  - `{commit}`\n"));
            }
        } else {
            out.push_str(&format!("{path}\n"));
            for commit in commits {
                out.push_str(&format!("  {commit}\n"));
            }
        }
    }
    Ok(out)
}

pub fn modifications(modifications: &[Modification], format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return json(modifications);
    }
    let mut out = String::new();
    for m in modifications {
        let header = match (&m.old_path, &m.new_path) {
            (Some(old), Some(new)) if old != new => format!("{old} -> {new}"),
            _ => m.path().to_string(),
        };
        if format == OutputFormat::Markdown {
            out.push_str(&format!(
                "### `{header}` ({}, +{} -{}, {} hunks)\n\n",
                m.change_kind,
                m.added_lines(),
                m.deleted_lines(),
                m.hunk_count()
            ));
            out.push_str("```diff\n");
            for line in &m.diff_parsed.deleted {
                out.push_str(&format!("-{:>5} {}\n", line.line_number, line.content));
            }
            for line in &m.diff_parsed.added {
                out.push_str(&format!("+{:>5} {}\n", line.line_number, line.content));
            }
            out.push_str("```\n\n");
        } else {
            out.push_str(&format!(
                "{header} [{}] +{} -{} in {} hunks\n",
                m.change_kind,
                m.added_lines(),
                m.deleted_lines(),
                m.hunk_count()
            ));
            for line in &m.diff_parsed.deleted {
                out.push_str(&format!("  - {:>5} {}\n", line.line_number, line.content));
            }
            for line in &m.diff_parsed.added {
                out.push_str(&format!("  + {:>5} {}\n", line.line_number, line.content));
            }
        }
    }
    if modifications.is_empty() && format == OutputFormat::Text {
        out.push_str("No file changes.\n");
    }
    Ok(out)
}
