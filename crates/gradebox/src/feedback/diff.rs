//! Line-oriented diff of expected against actual output.
//!
//! Each returned line carries a two-character prefix: `"  "` for lines in
//! both, `"- "` for lines only in the expected output and `"+ "` for lines
//! only in the actual output. Line endings are kept.

/// Above this many cells in the LCS table the changed region is reported
/// as a block removal followed by a block insertion.
const MAX_TABLE_CELLS: usize = 4_000_000;

pub fn line_diff(expected: &str, actual: &str) -> Vec<String> {
    let expected: Vec<&str> = expected.split_inclusive('\n').collect();
    let actual: Vec<&str> = actual.split_inclusive('\n').collect();

    let prefix = expected
        .iter()
        .zip(&actual)
        .take_while(|(e, a)| e == a)
        .count();
    let suffix = expected[prefix..]
        .iter()
        .rev()
        .zip(actual[prefix..].iter().rev())
        .take_while(|(e, a)| e == a)
        .count();

    let mut out = Vec::with_capacity(expected.len().max(actual.len()));
    out.extend(expected[..prefix].iter().map(|line| same(line)));

    let old = &expected[prefix..expected.len() - suffix];
    let new = &actual[prefix..actual.len() - suffix];
    if old.len().saturating_mul(new.len()) > MAX_TABLE_CELLS {
        out.extend(old.iter().map(|line| removed(line)));
        out.extend(new.iter().map(|line| added(line)));
    } else {
        diff_middle(old, new, &mut out);
    }

    out.extend(expected[expected.len() - suffix..].iter().map(|line| same(line)));
    out
}

fn diff_middle(old: &[&str], new: &[&str], out: &mut Vec<String>) {
    let (n, m) = (old.len(), new.len());
    // lcs[i][j] = length of the LCS of old[i..] and new[j..]
    let mut lcs = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            out.push(same(old[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(removed(old[i]));
            i += 1;
        } else {
            out.push(added(new[j]));
            j += 1;
        }
    }
    out.extend(old[i..].iter().map(|line| removed(line)));
    out.extend(new[j..].iter().map(|line| added(line)));
}

fn same(line: &str) -> String {
    format!("  {line}")
}

fn removed(line: &str) -> String {
    format!("- {line}")
}

fn added(line: &str) -> String {
    format!("+ {line}")
}
