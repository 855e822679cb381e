use strata_core::{ChangeKind, LineRecord};
use strata_difflens::parser::{parse_diff, parse_unified_diff};

#[test]
fn parse_patch_without_git_header() {
    let diff = "\
--- /dev/null
+++ b/demo/bad_code.rs
@@ -0,0 +1,3 @@
+fn main() {
+    println!(\"hello\");
+}
";
    let files = parse_unified_diff(diff);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path(), "demo/bad_code.rs");
    assert_eq!(files[0].change_kind, ChangeKind::Added);
    assert_eq!(files[0].added_lines(), 3);
}

#[test]
fn real_world_fixture() {
    let patch = include_str!("fixtures/simple.diff");
    let files = parse_unified_diff(patch);
    assert_eq!(files.len(), 3, "binary file must be skipped");

    let lexer = &files[0];
    assert_eq!(lexer.change_kind, ChangeKind::Modified);
    assert_eq!(lexer.diff_parsed.hunks.len(), 2);
    let deleted: Vec<(u32, &str)> = lexer
        .diff_parsed
        .deleted
        .iter()
        .map(|l| (l.line_number, l.content.trim()))
        .collect();
    assert_eq!(
        deleted,
        vec![
            (14, "match self.peek() {"),
            (15, "None => Token::Eof,"),
            (41, "// TODO: multi-char operators"),
            (42, "self.bump();"),
        ]
    );
    let added: Vec<u32> = lexer.diff_parsed.added.iter().map(|l| l.line_number).collect();
    assert_eq!(added, vec![14, 15, 16]);
    assert_eq!(lexer.hunk_count(), 2);

    let guide = &files[1];
    assert_eq!(guide.change_kind, ChangeKind::Renamed);
    assert_eq!(guide.old_path.as_deref(), Some("docs/old.md"));
    assert_eq!(guide.new_path.as_deref(), Some("docs/guide.md"));
    assert_eq!(guide.diff_parsed.added, vec![LineRecord::new(1, "# Guide")]);

    let unused = &files[2];
    assert_eq!(unused.change_kind, ChangeKind::Deleted);
    assert_eq!(unused.new_path, None);
    assert_eq!(unused.deleted_lines(), 2);
}

#[test]
fn per_file_diff_matches_split_patch() {
    let patch = include_str!("fixtures/simple.diff");
    for file in parse_unified_diff(patch) {
        assert_eq!(parse_diff(&file.diff), file.diff_parsed);
    }
}
