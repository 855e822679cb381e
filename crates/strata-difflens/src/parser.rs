use strata_core::{ChangeBlock, ChangeKind, HunkHeader, LineRecord, Modification, ParsedDiff};
use tracing::debug;

/// Parse one file's unified diff text into added and deleted line records.
///
/// Two cursors (old, new) are reset at every hunk header. A `+` line is
/// recorded at the new cursor, a `-` line at the old cursor, and a context
/// line advances both. Consecutive `+`/`-` lines form one [`ChangeBlock`];
/// a `\ No newline at end of file` marker does not end a block. Anything
/// before the first hunk header is ignored, and a malformed header causes
/// the lines up to the next valid header to be skipped. Parsing never fails.
///
/// # Examples
///
/// ```
/// use strata_core::LineRecord;
/// use strata_difflens::parser::parse_diff;
///
/// let diff = "@@ -2,6 +2,7 @@ aa\n bb\n-cc\n \n+dd\n \n \n";
/// let parsed = parse_diff(diff);
/// assert_eq!(parsed.deleted, vec![LineRecord::new(3, "cc")]);
/// assert_eq!(parsed.added, vec![LineRecord::new(4, "dd")]);
/// assert_eq!(parsed.blocks.len(), 2);
/// ```
pub fn parse_diff(text: &str) -> ParsedDiff {
    let mut parsed = ParsedDiff::default();
    // (old, new) cursors; `None` outside a well-formed hunk.
    let mut cursors: Option<(u32, u32)> = None;
    let mut in_block = false;

    for line in text.lines() {
        if line.starts_with("@@") {
            in_block = false;
            cursors = match parse_hunk_header(line) {
                Some(header) => {
                    parsed.hunks.push(header);
                    Some((header.old_start, header.new_start))
                }
                None => {
                    debug!(header = line, "skipping malformed hunk header");
                    None
                }
            };
            continue;
        }

        let Some((old, new)) = cursors.as_mut() else {
            continue;
        };

        let added = line.strip_prefix('+');
        let deleted = line.strip_prefix('-');
        if added.is_none() && deleted.is_none() {
            if !line.starts_with('\\') {
                *old = old.saturating_add(1);
                *new = new.saturating_add(1);
                in_block = false;
            }
            continue;
        }

        if !in_block {
            in_block = true;
            parsed.blocks.push(ChangeBlock {
                old_start: *old,
                new_start: *new,
                ..ChangeBlock::default()
            });
        }
        let Some(block) = parsed.blocks.last_mut() else {
            continue;
        };
        if let Some(content) = added {
            parsed.added.push(LineRecord::new(*new, content.trim_end()));
            *new = new.saturating_add(1);
            block.added = block.added.saturating_add(1);
        } else if let Some(content) = deleted {
            parsed.deleted.push(LineRecord::new(*old, content.trim_end()));
            *old = old.saturating_add(1);
            block.deleted = block.deleted.saturating_add(1);
        }
    }

    parsed
}

/// Parse `@@ -a[,b] +c[,d] @@[ context]`. A missing length means 1.
///
/// # Examples
///
/// ```
/// use strata_difflens::parser::parse_hunk_header;
///
/// let h = parse_hunk_header("@@ -10 +12,0 @@ fn main()").unwrap();
/// assert_eq!((h.old_start, h.old_lines, h.new_start, h.new_lines), (10, 1, 12, 0));
/// assert!(parse_hunk_header("@@ garbage @@").is_none());
/// ```
pub fn parse_hunk_header(line: &str) -> Option<HunkHeader> {
    let rest = line.strip_prefix("@@ ")?;
    let end = rest.find(" @@")?;
    let mut ranges = rest[..end].split_whitespace();

    let old = ranges.next()?.strip_prefix('-')?;
    let new = ranges.next()?.strip_prefix('+')?;
    if ranges.next().is_some() {
        return None;
    }

    let (old_start, old_lines) = parse_range(old)?;
    let (new_start, new_lines) = parse_range(new)?;
    Some(HunkHeader {
        old_start,
        old_lines,
        new_start,
        new_lines,
    })
}

fn parse_range(range: &str) -> Option<(u32, u32)> {
    match range.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

/// Split a multi-file patch (as produced by `git diff`) into modifications.
///
/// Each modification carries its own hunk text in `diff` and the parsed line
/// records in `diff_parsed`. Binary files are skipped.
///
/// # Examples
///
/// ```
/// use strata_core::ChangeKind;
/// use strata_difflens::parser::parse_unified_diff;
///
/// let patch = "diff --git a/hello.rs b/hello.rs\n\
///              new file mode 100644\n\
///              --- /dev/null\n\
///              +++ b/hello.rs\n\
///              @@ -0,0 +1,2 @@\n\
///              +fn main() {\n\
///              +}\n";
/// let files = parse_unified_diff(patch);
/// assert_eq!(files.len(), 1);
/// assert_eq!(files[0].change_kind, ChangeKind::Added);
/// assert_eq!(files[0].added_lines(), 2);
/// ```
pub fn parse_unified_diff(input: &str) -> Vec<Modification> {
    let mut files = Vec::new();
    let mut current: Option<PatchFile> = None;

    for line in input.lines() {
        if line.starts_with("diff --git ") {
            if let Some(file) = current.take() {
                file.finish_into(&mut files);
            }
            current = Some(PatchFile::from_git_header(line));
            continue;
        }

        // Plain patches without a `diff --git` line start at `---`.
        let starts_plain_header = line.starts_with("--- ")
            && current
                .as_ref()
                .map_or(true, |f| !f.git_header && f.has_hunks());
        if starts_plain_header {
            if let Some(file) = current.take() {
                file.finish_into(&mut files);
            }
            current = Some(PatchFile::default());
        }

        let Some(file) = current.as_mut() else {
            continue;
        };

        if file.has_hunks() {
            file.body.push_str(line);
            file.body.push('\n');
            continue;
        }

        if line.starts_with("@@") {
            file.body.push_str(line);
            file.body.push('\n');
        } else if line.starts_with("Binary files ") && line.ends_with(" differ") {
            file.binary = true;
        } else if line.starts_with("new file mode") {
            file.kind = Some(ChangeKind::Added);
        } else if line.starts_with("deleted file mode") {
            file.kind = Some(ChangeKind::Deleted);
        } else if let Some(path) = line.strip_prefix("rename from ") {
            file.kind = Some(ChangeKind::Renamed);
            file.old_path = Some(path.to_string());
        } else if let Some(path) = line.strip_prefix("rename to ") {
            file.kind = Some(ChangeKind::Renamed);
            file.new_path = Some(path.to_string());
        } else if let Some(path) = line.strip_prefix("copy from ") {
            file.kind = Some(ChangeKind::Copied);
            file.old_path = Some(path.to_string());
        } else if let Some(path) = line.strip_prefix("copy to ") {
            file.kind = Some(ChangeKind::Copied);
            file.new_path = Some(path.to_string());
        } else if let Some(path) = line.strip_prefix("--- ") {
            file.old_path = parse_path(path);
        } else if let Some(path) = line.strip_prefix("+++ ") {
            file.new_path = parse_path(path);
        }
    }

    if let Some(file) = current.take() {
        file.finish_into(&mut files);
    }
    files
}

#[derive(Debug, Default)]
struct PatchFile {
    old_path: Option<String>,
    new_path: Option<String>,
    kind: Option<ChangeKind>,
    git_header: bool,
    binary: bool,
    body: String,
}

impl PatchFile {
    fn from_git_header(line: &str) -> Self {
        let mut file = Self {
            git_header: true,
            ..Self::default()
        };
        if let Some((old, new)) = line
            .strip_prefix("diff --git ")
            .and_then(|rest| rest.split_once(" b/"))
        {
            file.old_path = parse_path(old);
            file.new_path = Some(new.trim_matches('"').to_string());
        }
        file
    }

    fn has_hunks(&self) -> bool {
        !self.body.is_empty()
    }

    fn finish_into(self, files: &mut Vec<Modification>) {
        if self.binary {
            debug!(path = ?self.new_path, "skipping binary file");
            return;
        }
        let kind = match self.kind {
            Some(kind) => kind,
            None => match (&self.old_path, &self.new_path) {
                (None, Some(_)) => ChangeKind::Added,
                (Some(_), None) => ChangeKind::Deleted,
                (Some(old), Some(new)) if old != new => ChangeKind::Renamed,
                _ => ChangeKind::Modified,
            },
        };
        let (old_path, new_path) = match kind {
            ChangeKind::Added => (None, self.new_path),
            ChangeKind::Deleted => (self.old_path, None),
            _ => (self.old_path, self.new_path),
        };
        if old_path.is_none() && new_path.is_none() {
            return;
        }
        let mut modification = Modification::new(old_path, new_path, kind, self.body);
        modification.diff_parsed = parse_diff(&modification.diff);
        files.push(modification);
    }
}

fn parse_path(raw: &str) -> Option<String> {
    let normalized = raw.trim_matches('"');
    // `--- a/file\t2024-01-01 ...` style timestamps
    let normalized = normalized.split('\t').next().unwrap_or(normalized);
    if normalized == "/dev/null" {
        return None;
    }
    let stripped = normalized
        .strip_prefix("a/")
        .or_else(|| normalized.strip_prefix("b/"))
        .unwrap_or(normalized);
    Some(stripped.to_string())
}
