// Raw fragment translation
//
// Fragments arrive as plain SQL text. Two portable constructs need rewriting
// before SQL Server can run them: the REGEXP infix operator and CONCAT_WS.
//
// Known limitations: CONCAT_WS arguments containing commas and separators
// containing a single quote are not supported.

use crate::error::{ShimError, ShimResult};
use crate::models::{Arguments, ConditionNode, ConditionValue, Operator, SqlValue};

const CONCAT_WS: &str = "CONCAT_WS";

/// Translate a raw fragment into a condition node
pub fn translate_fragment(snippet: &str, args: Arguments) -> ShimResult<ConditionNode> {
    let mut sql = snippet.to_string();
    let mut operator = None;

    if let Some((negated, left, right)) = split_regexp(snippet) {
        // `field REGEXP 'literal'` is turned into a structured node so the
        // pattern gets its own placeholder instead of being inlined
        if args.is_empty() && is_plain_identifier(left.trim()) {
            if let Some(pattern) = unquote_literal(right.trim()) {
                let op = if negated { Operator::NotRegexp } else { Operator::Regexp };
                return Ok(ConditionNode::new(
                    left.trim(),
                    ConditionValue::Scalar(SqlValue::Text(pattern)),
                    Some(op),
                ));
            }
        }

        let comparison = if negated { 0 } else { 1 };
        sql = format!("REGEXP({}, {}) = {}", right, left, comparison);
        operator = Some(Operator::PrefixSchema);
    }

    let mut from = 0;
    while let Some(start) = find_concat_ws(&sql, from) {
        let (rewritten, end) = rewrite_concat_ws(&sql, start)?;
        sql = rewritten;
        from = end;
    }

    Ok(ConditionNode::new(sql, ConditionValue::Named(args), operator))
}

/// Split around the first ` NOT REGEXP ` or, failing that, ` REGEXP `
fn split_regexp(snippet: &str) -> Option<(bool, &str, &str)> {
    for (infix, negated) in [(" NOT REGEXP ", true), (" REGEXP ", false)] {
        if let Some(pos) = snippet.find(infix) {
            return Some((negated, &snippet[..pos], &snippet[pos + infix.len()..]));
        }
    }
    None
}

fn is_plain_identifier(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'))
}

/// Content of a single-quoted literal with `''` unescaped, or `None` if
/// `text` is anything else
fn unquote_literal(text: &str) -> Option<String> {
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    if inner.replace("''", "").contains('\'') {
        return None;
    }
    Some(inner.replace("''", "'"))
}

/// Start of the next `CONCAT_WS(` call at or after `from`
///
/// `from` must sit outside any literal. Mentions inside single-quoted
/// literals and names merely ending in `concat_ws` are skipped.
fn find_concat_ws(sql: &str, from: usize) -> Option<usize> {
    // ASCII uppercasing keeps byte offsets intact
    let upper = sql.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let mut in_literal = false;

    for (offset, c) in upper[from..].char_indices() {
        let at = from + offset;
        match c {
            '\'' => in_literal = !in_literal,
            'C' if !in_literal && upper[at..].starts_with("CONCAT_WS(") => {
                let preceded_by_word = at > 0 && (bytes[at - 1].is_ascii_alphanumeric() || bytes[at - 1] == b'_');
                if !preceded_by_word {
                    return Some(at);
                }
            }
            _ => {}
        }
    }
    None
}

/// Position of the parenthesis closing the one at `open`
///
/// Parentheses inside single-quoted literals are ignored.
fn find_paren_match(sql: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_literal = false;

    for (offset, c) in sql[open..].char_indices() {
        match c {
            '\'' => in_literal = !in_literal,
            '(' if !in_literal => depth += 1,
            ')' if !in_literal => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Replace the CONCAT_WS call starting at `start` with STUFF/COALESCE
///
/// `CONCAT_WS('-', a, b)` becomes
/// `STUFF(COALESCE('-' + a, '') + COALESCE('-' + b, ''), 1, 1, '')`, which
/// skips NULL arguments the same way. Returns the new text and the offset
/// just past the replacement.
fn rewrite_concat_ws(sql: &str, start: usize) -> ShimResult<(String, usize)> {
    let open = start + CONCAT_WS.len();
    let close = find_paren_match(sql, open)
        .ok_or_else(|| ShimError::malformed(format!("unbalanced parentheses in CONCAT_WS call: {}", sql)))?;

    let argument_list = sql[open + 1..close].trim();
    let quoted = argument_list
        .strip_prefix('\'')
        .ok_or_else(|| ShimError::malformed("CONCAT_WS separator must be a quoted literal"))?;
    let closing_quote = quoted
        .find('\'')
        .ok_or_else(|| ShimError::malformed("unterminated CONCAT_WS separator"))?;

    let separator = &quoted[..closing_quote];
    let rest = quoted[closing_quote + 1..]
        .trim_start()
        .strip_prefix(',')
        .ok_or_else(|| ShimError::malformed("CONCAT_WS needs at least one argument after the separator"))?;

    let arguments: Vec<&str> = rest.split(',').map(str::trim).collect();
    if arguments.iter().any(|a| a.is_empty()) {
        return Err(ShimError::malformed("empty CONCAT_WS argument"));
    }

    let coalesced = arguments
        .iter()
        .map(|argument| format!("COALESCE('{}' + {}, '')", separator, argument))
        .collect::<Vec<_>>()
        .join(" + ");
    let replacement = format!("STUFF({}, 1, {}, '')", coalesced, separator.chars().count());

    let end = start + replacement.len();
    Ok((format!("{}{}{}", &sql[..start], replacement, &sql[close + 1..]), end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> Arguments {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), SqlValue::from(*v)))
            .collect()
    }

    #[test]
    fn test_regexp_literal_becomes_structured_node() {
        let node = translate_fragment("name REGEXP '^A'", Arguments::new()).unwrap();
        assert_eq!(node.field, "name");
        assert_eq!(node.operator, Some(Operator::Regexp));
        assert_eq!(node.value, ConditionValue::from("^A"));

        let node = translate_fragment("n.[title] NOT REGEXP 'it''s'", Arguments::new()).unwrap();
        assert_eq!(node.field, "n.[title]");
        assert_eq!(node.operator, Some(Operator::NotRegexp));
        assert_eq!(node.value, ConditionValue::from("it's"));
    }

    #[test]
    fn test_regexp_expression_gets_prefix_marker() {
        let bound = args(&[(":pattern", "x")]);
        let node = translate_fragment("LOWER(name) REGEXP :pattern", bound.clone()).unwrap();
        assert_eq!(node.field, "REGEXP(:pattern, LOWER(name)) = 1");
        assert_eq!(node.operator, Some(Operator::PrefixSchema));
        assert_eq!(node.value, ConditionValue::Named(bound));

        let node = translate_fragment("a NOT REGEXP :p", args(&[(":p", "y")])).unwrap();
        assert_eq!(node.field, "REGEXP(:p, a) = 0");
    }

    #[test]
    fn test_regexp_literal_with_arguments_is_not_restructured() {
        let node = translate_fragment("name REGEXP '^A'", args(&[(":unused", "z")])).unwrap();
        assert_eq!(node.field, "REGEXP('^A', name) = 1");
        assert_eq!(node.operator, Some(Operator::PrefixSchema));
    }

    #[test]
    fn test_concat_ws() {
        let node = translate_fragment("CONCAT_WS(', ', UPPER(a), b) = :v", args(&[(":v", "A, b")])).unwrap();
        assert_eq!(
            node.field,
            "STUFF(COALESCE(', ' + UPPER(a), '') + COALESCE(', ' + b, ''), 1, 2, '') = :v"
        );
        assert_eq!(node.operator, None);
    }

    #[test]
    fn test_every_concat_ws_is_rewritten() {
        let node = translate_fragment(
            "concat_ws('-', a, b) = concat_ws('-', c, d)",
            Arguments::new(),
        )
        .unwrap();
        assert_eq!(
            node.field,
            "STUFF(COALESCE('-' + a, '') + COALESCE('-' + b, ''), 1, 1, '') = \
             STUFF(COALESCE('-' + c, '') + COALESCE('-' + d, ''), 1, 1, '')"
        );
    }

    #[test]
    fn test_concat_ws_inside_regexp_keeps_prefix_marker() {
        let node = translate_fragment("CONCAT_WS(' ', a, b) REGEXP :p", args(&[(":p", "x")])).unwrap();
        assert_eq!(
            node.field,
            "REGEXP(:p, STUFF(COALESCE(' ' + a, '') + COALESCE(' ' + b, ''), 1, 1, '')) = 1"
        );
        assert_eq!(node.operator, Some(Operator::PrefixSchema));
    }

    #[test]
    fn test_concat_ws_mentioned_in_literal_is_left_alone() {
        let node = translate_fragment("title = 'see CONCAT_WS(docs)'", Arguments::new()).unwrap();
        assert_eq!(node.field, "title = 'see CONCAT_WS(docs)'");

        let node = translate_fragment("my_concat_ws(a) = 1", Arguments::new()).unwrap();
        assert_eq!(node.field, "my_concat_ws(a) = 1");
    }

    #[test]
    fn test_concat_ws_separator_naming_the_function() {
        let node = translate_fragment("CONCAT_WS('CONCAT_WS(', a, b) = :v", args(&[(":v", "x")])).unwrap();
        assert_eq!(
            node.field,
            "STUFF(COALESCE('CONCAT_WS(' + a, '') + COALESCE('CONCAT_WS(' + b, ''), 1, 10, '') = :v"
        );
    }

    #[test]
    fn test_malformed_concat_ws() {
        for snippet in [
            "CONCAT_WS('-', a, b",
            "CONCAT_WS(sep, a, b)",
            "CONCAT_WS('-')",
            "CONCAT_WS('-', a, )",
            "CONCAT_WS('-, a, b)",
        ] {
            assert!(
                matches!(
                    translate_fragment(snippet, Arguments::new()),
                    Err(ShimError::MalformedFragment(_))
                ),
                "{} should be rejected",
                snippet
            );
        }
    }

    #[test]
    fn test_plain_fragment() {
        let bound = args(&[(":a", "1")]);
        let node = translate_fragment("a = :a OR b IS NULL", bound.clone()).unwrap();
        assert_eq!(node.field, "a = :a OR b IS NULL");
        assert_eq!(node.operator, None);
        assert_eq!(node.value, ConditionValue::Named(bound));
    }

    #[test]
    fn test_paren_match_skips_literals() {
        assert_eq!(find_paren_match("f(a, ')', b) x", 1), Some(11));
        assert_eq!(find_paren_match("f((a)", 1), None);
    }
}
