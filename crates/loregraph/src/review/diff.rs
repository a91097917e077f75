//! Line-oriented text diff used by review sessions

use serde::{Deserialize, Serialize};

/// Above this many LCS cells the middle section is reported as a full
/// replacement instead of being aligned line by line.
const MAX_LCS_CELLS: usize = 4_000_000;

/// Context lines around each change in the unified rendering
const CONTEXT_LINES: usize = 3;

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffOp {
    Equal,
    Insert,
    Delete,
}

/// A run of consecutive lines sharing one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHunk {
    pub op: DiffOp,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDiff {
    pub has_changes: bool,
    pub diff_summary: String,
    pub diff_unified: String,
    pub hunks: Vec<DiffHunk>,
    pub inserted_chars: usize,
    pub deleted_chars: usize,
}

/// Diff `old` against `new`.
///
/// Lines keep their terminator while being compared, so a change to the
/// final newline alone still shows up as a replaced last line.
pub fn diff_texts(old: &str, new: &str) -> TextDiff {
    let old_lines: Vec<&str> = old.split_inclusive('\n').collect();
    let new_lines: Vec<&str> = new.split_inclusive('\n').collect();
    let ops = line_ops(&old_lines, &new_lines);

    let mut inserted_chars = 0;
    let mut deleted_chars = 0;
    for (op, line) in &ops {
        match op {
            DiffOp::Insert => inserted_chars += strip_eol(line).chars().count(),
            DiffOp::Delete => deleted_chars += strip_eol(line).chars().count(),
            DiffOp::Equal => {}
        }
    }

    let has_changes = ops.iter().any(|(op, _)| *op != DiffOp::Equal);
    let mark_missing_eol = old.ends_with('\n') != new.ends_with('\n');
    TextDiff {
        has_changes,
        diff_summary: summarize(old, new, inserted_chars, deleted_chars),
        diff_unified: if has_changes {
            unified(&ops, mark_missing_eol)
        } else {
            String::new()
        },
        hunks: group(&ops),
        inserted_chars,
        deleted_chars,
    }
}

fn strip_eol(line: &str) -> &str {
    line.strip_suffix('\n').unwrap_or(line)
}

fn line_ops<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<(DiffOp, &'a str)> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut ops: Vec<(DiffOp, &'a str)> = Vec::with_capacity(old.len().max(new.len()));
    ops.extend(old[..prefix].iter().map(|l| (DiffOp::Equal, *l)));

    let n = old_mid.len();
    let m = new_mid.len();
    if n.saturating_mul(m) > MAX_LCS_CELLS {
        ops.extend(old_mid.iter().map(|l| (DiffOp::Delete, *l)));
        ops.extend(new_mid.iter().map(|l| (DiffOp::Insert, *l)));
    } else {
        // lcs[i * (m + 1) + j] = LCS length of old_mid[i..] and new_mid[j..]
        let width = m + 1;
        let mut lcs = vec![0u32; (n + 1) * width];
        for i in (0..n).rev() {
            for j in (0..m).rev() {
                lcs[i * width + j] = if old_mid[i] == new_mid[j] {
                    lcs[(i + 1) * width + j + 1] + 1
                } else {
                    lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
                };
            }
        }

        let (mut i, mut j) = (0, 0);
        while i < n && j < m {
            if old_mid[i] == new_mid[j] {
                ops.push((DiffOp::Equal, old_mid[i]));
                i += 1;
                j += 1;
            } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
                ops.push((DiffOp::Delete, old_mid[i]));
                i += 1;
            } else {
                ops.push((DiffOp::Insert, new_mid[j]));
                j += 1;
            }
        }
        ops.extend(old_mid[i..].iter().map(|l| (DiffOp::Delete, *l)));
        ops.extend(new_mid[j..].iter().map(|l| (DiffOp::Insert, *l)));
    }

    ops.extend(old[old.len() - suffix..].iter().map(|l| (DiffOp::Equal, *l)));
    ops
}

fn group(ops: &[(DiffOp, &str)]) -> Vec<DiffHunk> {
    let mut hunks: Vec<DiffHunk> = Vec::new();
    for (op, line) in ops {
        match hunks.last_mut() {
            Some(hunk) if hunk.op == *op => hunk.lines.push(strip_eol(line).to_string()),
            _ => hunks.push(DiffHunk {
                op: *op,
                lines: vec![strip_eol(line).to_string()],
            }),
        }
    }
    hunks
}

fn summarize(old: &str, new: &str, inserted: usize, deleted: usize) -> String {
    if old == new {
        return "No changes".to_string();
    }
    let total_old = old.chars().count();
    let total_new = new.chars().count();
    if total_old == 0 {
        return format!("New content, {total_new} characters");
    }
    if total_new == 0 {
        return format!("All content removed, {total_old} characters before");
    }

    let ratio = (inserted + deleted) as f64 / (total_old + total_new) as f64 * 100.0;
    if ratio < 5.0 {
        format!("Minor change: +{inserted} / -{deleted} characters")
    } else if ratio < 20.0 {
        format!("Moderate change: +{inserted} / -{deleted} characters")
    } else {
        format!("Major change: +{inserted} / -{deleted} characters, {ratio:.1}% changed")
    }
}

fn format_range(start: usize, len: usize) -> String {
    match len {
        0 => format!("{},0", start.saturating_sub(1)),
        1 => format!("{start}"),
        _ => format!("{start},{len}"),
    }
}

fn unified(ops: &[(DiffOp, &str)], mark_missing_eol: bool) -> String {
    let changed: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, (op, _))| *op != DiffOp::Equal)
        .map(|(i, _)| i)
        .collect();

    // Merge change windows whose context overlaps
    let mut groups: Vec<(usize, usize)> = Vec::new();
    for idx in changed {
        let start = idx.saturating_sub(CONTEXT_LINES);
        let end = (idx + CONTEXT_LINES + 1).min(ops.len());
        match groups.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => groups.push((start, end)),
        }
    }

    // 1-based line numbers at each op index
    let mut old_line = Vec::with_capacity(ops.len());
    let mut new_line = Vec::with_capacity(ops.len());
    let (mut o, mut n) = (1, 1);
    for (op, _) in ops {
        old_line.push(o);
        new_line.push(n);
        match op {
            DiffOp::Equal => {
                o += 1;
                n += 1;
            }
            DiffOp::Delete => o += 1,
            DiffOp::Insert => n += 1,
        }
    }

    let mut out = String::from("--- snapshot\n+++ current\n");
    for (start, end) in groups {
        let slice = &ops[start..end];
        let old_len = slice.iter().filter(|(op, _)| *op != DiffOp::Insert).count();
        let new_len = slice.iter().filter(|(op, _)| *op != DiffOp::Delete).count();
        out.push_str(&format!(
            "@@ -{} +{} @@\n",
            format_range(old_line[start], old_len),
            format_range(new_line[start], new_len)
        ));
        for (op, line) in slice {
            let marker = match op {
                DiffOp::Equal => ' ',
                DiffOp::Delete => '-',
                DiffOp::Insert => '+',
            };
            out.push(marker);
            out.push_str(strip_eol(line));
            out.push('\n');
            if mark_missing_eol && !line.ends_with('\n') {
                out.push_str(NO_NEWLINE_MARKER);
            }
        }
    }
    out
}
