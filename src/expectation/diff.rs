//! Line diff for report sections.

/// Diff two texts line by line.
///
/// Unchanged lines are prefixed with two spaces, lines only in `expected`
/// with `- ` and lines only in `actual` with `+ `. Uses the longest common
/// subsequence of lines, preferring removals before additions.
pub fn line_diff(expected: &str, actual: &str) -> Vec<String> {
    let a: Vec<&str> = expected.lines().collect();
    let b: Vec<&str> = actual.lines().collect();

    // lcs[i][j] = length of the LCS of a[i..] and b[j..]
    let mut lcs = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = Vec::with_capacity(a.len().max(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            out.push(format!("  {}", a[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(format!("- {}", a[i]));
            i += 1;
        } else {
            out.push(format!("+ {}", b[j]));
            j += 1;
        }
    }
    out.extend(a[i..].iter().map(|line| format!("- {line}")));
    out.extend(b[j..].iter().map(|line| format!("+ {line}")));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical() {
        assert_eq!(line_diff("a\nb", "a\nb"), vec!["  a", "  b"]);
    }

    #[test]
    fn test_changed_line() {
        let expected = "Placed {\n    id: \"o1\",\n}";
        let actual = "Placed {\n    id: \"o2\",\n}";
        assert_eq!(
            line_diff(expected, actual),
            vec!["  Placed {", "-     id: \"o1\",", "+     id: \"o2\",", "  }"]
        );
    }

    #[test]
    fn test_insertions_and_removals_at_edges() {
        assert_eq!(line_diff("", "x"), vec!["+ x"]);
        assert_eq!(line_diff("x\ny", "y"), vec!["- x", "  y"]);
    }
}
