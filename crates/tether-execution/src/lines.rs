//! Logical-line splitting for streamed execution
//!
//! A logical line is a top-level statement together with everything that
//! belongs to it: indented body lines, lines following a trailing `:` or
//! `\`, and dedented `else`/`elif`/`except`/`finally` clauses. Blank lines
//! and top-level comment lines are dropped.

const CONTINUATION_KEYWORDS: [&str; 4] = ["else", "elif", "except", "finally"];

fn continues_previous(line: &str) -> bool {
    if line.starts_with(char::is_whitespace) {
        return true;
    }
    CONTINUATION_KEYWORDS.iter().any(|kw| {
        line.strip_prefix(kw)
            .is_some_and(|rest| rest.starts_with([':', ' ', '(']))
    })
}

fn opens_block(line: &str) -> bool {
    let trimmed = line.trim_end();
    trimmed.ends_with(':') || trimmed.ends_with('\\')
}

/// Split source into logical lines, in order
pub fn split_logical_lines(code: &str) -> Vec<String> {
    let mut logical: Vec<String> = Vec::new();
    let mut current: Option<String> = None;
    let mut expects_body = false;

    for line in code.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let joins = current.is_some() && (expects_body || continues_previous(line));
        if joins {
            if let Some(group) = current.as_mut() {
                group.push('\n');
                group.push_str(line);
            }
        } else {
            if line.trim_start().starts_with('#') {
                continue;
            }
            if let Some(done) = current.take() {
                logical.push(done);
            }
            current = Some(line.to_string());
        }
        expects_body = opens_block(line);
    }

    if let Some(done) = current {
        logical.push(done);
    }
    logical
}

/// Non-blank source lines
pub(crate) fn count_source_lines(code: &str) -> usize {
    code.lines().filter(|l| !l.trim().is_empty()).count()
}

pub(crate) fn count_output_lines(output: &str) -> usize {
    output.lines().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_statements() {
        let lines = split_logical_lines("x = 1\ny = 2\n\nprint(x + y)\n");
        assert_eq!(lines, vec!["x = 1", "y = 2", "print(x + y)"]);
    }

    #[test]
    fn test_block_grouping() {
        let code = "for i in range(3):\n    print(i)\n    total += i\nprint('done')";
        let lines = split_logical_lines(code);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "for i in range(3):\n    print(i)\n    total += i");
        assert_eq!(lines[1], "print('done')");
    }

    #[test]
    fn test_else_clause_stays_with_if() {
        let code = "if ready:\n    go()\nelse:\n    wait()\nafter()";
        let lines = split_logical_lines(code);
        assert_eq!(lines, vec!["if ready:\n    go()\nelse:\n    wait()", "after()"]);
    }

    #[test]
    fn test_backslash_continuation() {
        let lines = split_logical_lines("total = 1 + \\\n2\nprint(total)");
        assert_eq!(lines, vec!["total = 1 + \\\n2", "print(total)"]);
    }

    #[test]
    fn test_top_level_comments_dropped() {
        let lines = split_logical_lines("# setup\nimport board\n# blink\nled = 1");
        assert_eq!(lines, vec!["import board", "led = 1"]);
    }

    #[test]
    fn test_identifier_prefixed_by_keyword_is_not_continuation() {
        let lines = split_logical_lines("if x:\n    y()\nelsewhere = 1");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_counts() {
        assert_eq!(count_source_lines("a\n\n  \nb\n"), 2);
        assert_eq!(count_output_lines("one\ntwo\n"), 2);
        assert_eq!(count_output_lines(""), 0);
    }
}
