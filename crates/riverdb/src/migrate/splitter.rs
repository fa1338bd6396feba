//! Dialect-agnostic statement splitting: splits a
//! migration file's content into individual statements on `;`, respecting
//! quoted strings, line comments (`-- ...`), and block comments
//! (`/* ... */`).

#[derive(Copy, Clone, PartialEq)]
enum Mode {
    Normal,
    SingleQuote,
    DoubleQuote,
    LineComment,
    BlockComment,
}

/// Splits `sql` into non-empty, trimmed statements.
pub(crate) fn split_statements(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let len = chars.len();
    let mut i = 0usize;
    let mut mode = Mode::Normal;
    let mut current = String::new();
    let mut statements = Vec::new();

    while i < len {
        let c = chars[i];
        match mode {
            Mode::Normal => match c {
                '\'' => {
                    mode = Mode::SingleQuote;
                    current.push(c);
                    i += 1;
                }
                '"' => {
                    mode = Mode::DoubleQuote;
                    current.push(c);
                    i += 1;
                }
                '-' if i + 1 < len && chars[i + 1] == '-' => {
                    mode = Mode::LineComment;
                    current.push(c);
                    current.push(chars[i + 1]);
                    i += 2;
                }
                '/' if i + 1 < len && chars[i + 1] == '*' => {
                    mode = Mode::BlockComment;
                    current.push(c);
                    current.push(chars[i + 1]);
                    i += 2;
                }
                ';' => {
                    push_statement(&mut statements, &mut current);
                    i += 1;
                }
                _ => {
                    current.push(c);
                    i += 1;
                }
            },
            Mode::SingleQuote => {
                current.push(c);
                if c == '\'' {
                    if i + 1 < len && chars[i + 1] == '\'' {
                        current.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    mode = Mode::Normal;
                }
                i += 1;
            }
            Mode::DoubleQuote => {
                current.push(c);
                if c == '"' {
                    if i + 1 < len && chars[i + 1] == '"' {
                        current.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    mode = Mode::Normal;
                }
                i += 1;
            }
            Mode::LineComment => {
                current.push(c);
                if c == '\n' {
                    mode = Mode::Normal;
                }
                i += 1;
            }
            Mode::BlockComment => {
                current.push(c);
                if c == '*' && i + 1 < len && chars[i + 1] == '/' {
                    current.push('/');
                    i += 2;
                    mode = Mode::Normal;
                    continue;
                }
                i += 1;
            }
        }
    }
    push_statement(&mut statements, &mut current);

    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_semicolons() {
        let stmts = split_statements("CREATE TABLE t(id INT); INSERT INTO t VALUES (1);");
        assert_eq!(stmts, vec!["CREATE TABLE t(id INT)", "INSERT INTO t VALUES (1)"]);
    }

    #[test]
    fn semicolon_inside_string_literal_is_not_a_split_point() {
        let stmts = split_statements("INSERT INTO t(msg) VALUES ('a;b');");
        assert_eq!(stmts, vec!["INSERT INTO t(msg) VALUES ('a;b')"]);
    }

    #[test]
    fn line_comment_is_not_a_split_point() {
        let stmts = split_statements("-- comment; with semicolon\nSELECT 1;");
        assert_eq!(stmts, vec!["-- comment; with semicolon\nSELECT 1"]);
    }

    #[test]
    fn block_comment_is_not_a_split_point() {
        let stmts = split_statements("/* a; b */ SELECT 1;");
        assert_eq!(stmts, vec!["/* a; b */ SELECT 1"]);
    }

    #[test]
    fn trailing_whitespace_only_statement_is_dropped() {
        let stmts = split_statements("SELECT 1;   \n\t  ");
        assert_eq!(stmts, vec!["SELECT 1"]);
    }

    #[test]
    fn empty_content_yields_no_statements() {
        assert!(split_statements("").is_empty());
        assert!(split_statements("   \n\t").is_empty());
    }
}
