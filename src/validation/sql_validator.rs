use sqlparser::ast::{Expr, Statement};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, TokenWithSpan, Tokenizer};

use crate::api::middleware::AppError;

/// SQL validation for caller-supplied fragments and compiled statements
pub struct SqlValidator;

impl SqlValidator {
    /// Ensure compiled SQL is exactly one SELECT statement
    pub fn validate_select_only(sql: &str) -> Result<(), AppError> {
        let dialect = MySqlDialect {};
        let mut parser = Parser::new(&dialect)
            .try_with_sql(sql)
            .map_err(|e| AppError::Validation(format!("SQL parsing error: {}", e)))?;

        let ast = parser
            .parse_statements()
            .map_err(|e| AppError::Validation(format!("SQL parsing error: {}", e)))?;

        match ast.as_slice() {
            [Statement::Query(_)] => Ok(()),
            [] => Err(AppError::Validation("Empty SQL query".to_string())),
            [_] => Err(AppError::Validation(
                "Only SELECT queries are permitted".to_string(),
            )),
            _ => Err(AppError::Validation(format!(
                "Expected a single statement, found {}",
                ast.len()
            ))),
        }
    }

    /// Parse a fragment that must be exactly one SQL expression
    pub fn parse_expression(fragment: &str) -> Result<Expr, AppError> {
        let dialect = MySqlDialect {};
        let mut parser = Parser::new(&dialect)
            .try_with_sql(fragment)
            .map_err(|e| AppError::Parse(format!("invalid expression '{}': {}", fragment, e)))?;

        let expr = parser
            .parse_expr()
            .map_err(|e| AppError::Parse(format!("invalid expression '{}': {}", fragment, e)))?;

        let next = parser.peek_token();
        if next.token != Token::EOF {
            return Err(AppError::Parse(format!(
                "expression '{}' has trailing input starting at '{}'",
                fragment, next.token
            )));
        }
        Ok(expr)
    }

    /// Number of `?` placeholders in a fragment
    pub fn count_placeholders(fragment: &str) -> Result<usize, AppError> {
        let dialect = MySqlDialect {};
        let tokens = Tokenizer::new(&dialect, fragment)
            .tokenize()
            .map_err(|e| AppError::Parse(format!("invalid expression '{}': {}", fragment, e)))?;

        Ok(tokens
            .iter()
            .filter(|t| matches!(t, Token::Placeholder(p) if p.starts_with('?')))
            .count())
    }

    /// Unquoted words of a fragment; callers filter them against known columns
    pub fn words(fragment: &str) -> Result<Vec<String>, AppError> {
        let dialect = MySqlDialect {};
        let tokens = Tokenizer::new(&dialect, fragment)
            .tokenize()
            .map_err(|e| AppError::Parse(format!("invalid expression '{}': {}", fragment, e)))?;

        Ok(tokens
            .into_iter()
            .filter_map(|t| match t {
                Token::Word(w) if w.quote_style.is_none() => Some(w.value),
                _ => None,
            })
            .collect())
    }

    /// Replace the bare unquoted words of a fragment with whatever `rename` returns,
    /// leaving every other byte as written. Words next to a `.` or in front of
    /// `(` are qualifiers, qualified names or function names and are skipped.
    pub fn rewrite_words<F>(fragment: &str, mut rename: F) -> Result<String, AppError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let dialect = MySqlDialect {};
        let tokens = Tokenizer::new(&dialect, fragment)
            .tokenize_with_location()
            .map_err(|e| AppError::Parse(format!("invalid expression '{}': {}", fragment, e)))?;

        let line_starts: Vec<usize> = std::iter::once(0)
            .chain(fragment.match_indices('\n').map(|(i, _)| i + 1))
            .collect();

        let mut out = String::with_capacity(fragment.len());
        let mut copied = 0;
        for (pos, token) in tokens.iter().enumerate() {
            let Token::Word(word) = &token.token else {
                continue;
            };
            if word.quote_style.is_some() {
                continue;
            }
            let before = significant(tokens[..pos].iter().rev());
            let after = significant(tokens[pos + 1..].iter());
            if matches!(before, Some(Token::Period))
                || matches!(after, Some(Token::Period | Token::LParen))
            {
                continue;
            }
            let Some(replacement) = rename(word.value.as_str()) else {
                continue;
            };

            let start = byte_offset(fragment, &line_starts, token)?;
            let end = start + word.value.len();
            if fragment.get(start..end) != Some(word.value.as_str()) {
                return Err(AppError::Parse(format!(
                    "cannot locate '{}' in expression '{}'",
                    word.value, fragment
                )));
            }
            out.push_str(&fragment[copied..start]);
            out.push_str(&replacement);
            copied = end;
        }
        out.push_str(&fragment[copied..]);
        Ok(out)
    }

    /// Validate a raw `expr` where fragment against its argument list
    pub fn validate_expr_fragment(fragment: &str, arg_count: usize) -> Result<(), AppError> {
        Self::parse_expression(fragment)?;
        let placeholders = Self::count_placeholders(fragment)?;
        if placeholders != arg_count {
            return Err(AppError::Parse(format!(
                "expression '{}' has {} placeholders but {} args",
                fragment, placeholders, arg_count
            )));
        }
        Ok(())
    }

    /// Whether `name` can be emitted unquoted as a column or alias
    pub fn is_plain_identifier(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

/// First token that is not whitespace
fn significant<'a>(mut tokens: impl Iterator<Item = &'a TokenWithSpan>) -> Option<&'a Token> {
    tokens
        .find(|t| !matches!(t.token, Token::Whitespace(_)))
        .map(|t| &t.token)
}

/// Byte offset of a token's start; span locations are 1-based lines and characters
fn byte_offset(fragment: &str, line_starts: &[usize], token: &TokenWithSpan) -> Result<usize, AppError> {
    let start = token.span.start;
    let line_start = usize::try_from(start.line)
        .ok()
        .and_then(|line| line.checked_sub(1))
        .and_then(|idx| line_starts.get(idx).copied());
    let column = usize::try_from(start.column)
        .ok()
        .and_then(|col| col.checked_sub(1));

    line_start
        .zip(column)
        .and_then(|(line_start, column)| {
            fragment[line_start..]
                .char_indices()
                .nth(column)
                .map(|(i, _)| line_start + i)
        })
        .ok_or_else(|| AppError::Parse(format!("bad token position in expression '{}'", fragment)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_select_only() {
        assert!(SqlValidator::validate_select_only("SELECT name FROM user WHERE a=?").is_ok());
        assert!(SqlValidator::validate_select_only("INSERT INTO user VALUES (1)").is_err());
        assert!(SqlValidator::validate_select_only("SELECT 1; DROP TABLE user").is_err());
        assert!(SqlValidator::validate_select_only("").is_err());
    }

    #[test]
    fn test_parse_expression() {
        assert!(SqlValidator::parse_expression("sum(c1)").is_ok());
        assert!(SqlValidator::parse_expression("age > ? AND name LIKE ?").is_ok());
        assert!(SqlValidator::parse_expression("count(*)").is_ok());

        assert!(SqlValidator::parse_expression("").is_err());
        assert!(SqlValidator::parse_expression("a = 1; DROP TABLE user").is_err());
        assert!(SqlValidator::parse_expression("sum(c1) AS total FROM x").is_err());
    }

    #[test]
    fn test_placeholders_must_match_args() {
        assert_eq!(SqlValidator::count_placeholders("a = ? OR b IN (?, ?)").unwrap(), 3);
        assert_eq!(SqlValidator::count_placeholders("a = '?'").unwrap(), 0);

        assert!(SqlValidator::validate_expr_fragment("a = ? OR b = ?", 2).is_ok());
        let err = SqlValidator::validate_expr_fragment("a = ?", 2).unwrap_err();
        assert!(err.to_string().contains("1 placeholders but 2 args"));
    }

    #[test]
    fn test_words() {
        let words = SqlValidator::words("sum(age) + `bio` > ? AND name = 'x'").unwrap();
        assert_eq!(words, vec!["sum", "age", "AND", "name"]);
    }

    #[test]
    fn test_rewrite_words() {
        let qualify = |w: &str| matches!(w, "age" | "name").then(|| format!("t.{}", w));

        let rewritten =
            SqlValidator::rewrite_words("sum(age) + u.age > ? AND name = 'age'", qualify).unwrap();
        assert_eq!(rewritten, "sum(t.age) + u.age > ? AND t.name = 'age'");

        let multiline = SqlValidator::rewrite_words("age >\n  ? OR `name` = ?", qualify).unwrap();
        assert_eq!(multiline, "t.age >\n  ? OR `name` = ?");

        let untouched = SqlValidator::rewrite_words("count(*)", qualify).unwrap();
        assert_eq!(untouched, "count(*)");
    }

    #[test]
    fn test_plain_identifier() {
        assert!(SqlValidator::is_plain_identifier("dept_name"));
        assert!(SqlValidator::is_plain_identifier("_x1"));
        assert!(!SqlValidator::is_plain_identifier("1x"));
        assert!(!SqlValidator::is_plain_identifier("a b"));
        assert!(!SqlValidator::is_plain_identifier("x; DROP"));
        assert!(!SqlValidator::is_plain_identifier(""));
    }
}
