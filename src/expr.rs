//! Boolean expression evaluation for the `!eval` command.
//!
//! A two-stage evaluator: tokenize, rewrite infix to postfix with a
//! shunting-yard pass, then fold the postfix stream over a truth set.
//!
//! The grammar is deliberately small: identifiers (`[A-Za-z_]+`), `&`, `|`,
//! unary `~`, and parentheses. `&` and `|` share a precedence level and are
//! non-associative with each other — `a & b | c` is a syntax error rather
//! than a silent left-to-right reduction, so users have to parenthesize.

use std::collections::HashSet;
use thiserror::Error;

const BOOL_AND: char = '&';
const BOOL_OR: char = '|';
const BOOL_NOT: char = '~';
const LEFT_PAREN: char = '(';
const RIGHT_PAREN: char = ')';
const WHITESPACE: &str = " \t\r\n";

/// The single failure mode of the evaluator, reported back to the user as a
/// chat reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid token {lexeme} at position {position}")]
pub struct EvalError {
    pub position: usize,
    pub lexeme: String,
}

impl EvalError {
    fn at(position: usize, lexeme: impl Into<String>) -> Self {
        Self {
            position,
            lexeme: lexeme.into(),
        }
    }
}

/// A lexeme with the character position it started at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub position: usize,
    pub text: String,
}

impl Token {
    fn new(position: usize, text: impl Into<String>) -> Self {
        Self {
            position,
            text: text.into(),
        }
    }

    /// Operator precedence; parens are 0 so they never win a pop contest.
    fn precedence(&self) -> u8 {
        match self.text.as_str() {
            "~" => 2,
            "&" | "|" => 1,
            _ => 0,
        }
    }

    fn is_binary(&self) -> bool {
        matches!(self.text.as_str(), "&" | "|")
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_punctuation(c: char) -> bool {
    matches!(c, BOOL_AND | BOOL_OR | BOOL_NOT | LEFT_PAREN | RIGHT_PAREN)
}

/// Split `input` into `(position, lexeme)` tokens.
///
/// Identifier characters accumulate; punctuation flushes the pending
/// identifier and then emits itself. Whitespace only separates. Anything
/// else fails with the offending character and position.
pub fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut buf = String::new();
    let mut buf_start = 0;
    for (i, c) in input.chars().enumerate() {
        if WHITESPACE.contains(c) {
            if !buf.is_empty() {
                tokens.push(Token::new(buf_start, std::mem::take(&mut buf)));
            }
        } else if is_punctuation(c) {
            if !buf.is_empty() {
                tokens.push(Token::new(buf_start, std::mem::take(&mut buf)));
            }
            tokens.push(Token::new(i, c.to_string()));
        } else if !is_identifier_char(c) {
            return Err(EvalError::at(i, c.to_string()));
        } else {
            if buf.is_empty() {
                buf_start = i;
            }
            buf.push(c);
        }
    }
    if !buf.is_empty() {
        tokens.push(Token::new(buf_start, buf));
    }
    Ok(tokens)
}

/// Rewrite an infix token stream into postfix order.
///
/// Standard shunting-yard with one deviation: a binary operator that would
/// pop an equal-precedence operator fails instead of reducing left-to-right.
/// Unmatched parentheses fail at the offending position.
pub fn infix_to_postfix(tokens: Vec<Token>) -> Result<Vec<Token>, EvalError> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut stack: Vec<Token> = Vec::new();
    for token in tokens {
        match token.text.as_str() {
            "(" => stack.push(token),
            ")" => loop {
                match stack.pop() {
                    Some(top) if top.text == "(" => break,
                    Some(top) => output.push(top),
                    None => return Err(EvalError::at(token.position, token.text)),
                }
            },
            "&" | "|" | "~" => {
                let yield_top = match stack.last() {
                    Some(top) if top.precedence() > token.precedence() => true,
                    Some(top) if top.precedence() == token.precedence() && token.is_binary() => {
                        return Err(EvalError::at(token.position, token.text));
                    }
                    _ => false,
                };
                if yield_top {
                    if let Some(top) = stack.pop() {
                        output.push(top);
                    }
                }
                stack.push(token);
            }
            _ => output.push(token),
        }
    }
    while let Some(top) = stack.pop() {
        if top.text == "(" {
            return Err(EvalError::at(top.position, top.text));
        }
        output.push(top);
    }
    Ok(output)
}

/// Evaluate `input` against `truths`: identifiers are true iff they are
/// members of the truth set.
pub fn eval_bool(input: &str, truths: &HashSet<String>) -> Result<bool, EvalError> {
    let postfix = infix_to_postfix(tokenize(input)?)?;
    let mut stack: Vec<bool> = Vec::new();
    let mut last = None;
    for token in postfix {
        match token.text.as_str() {
            "~" => {
                let value = stack
                    .pop()
                    .ok_or_else(|| EvalError::at(token.position, token.text.clone()))?;
                stack.push(!value);
            }
            "&" | "|" => {
                let (b, a) = match (stack.pop(), stack.pop()) {
                    (Some(b), Some(a)) => (b, a),
                    _ => return Err(EvalError::at(token.position, token.text.clone())),
                };
                stack.push(if token.text == "&" { a && b } else { a | b });
            }
            _ => stack.push(truths.contains(&token.text)),
        }
        last = Some(token);
    }
    match (stack.pop(), stack.is_empty(), last) {
        (Some(value), true, _) => Ok(value),
        // Leftover values or an empty stream — blame the last token seen.
        (_, _, Some(token)) => Err(EvalError::at(token.position, token.text)),
        (_, _, None) => Err(EvalError::at(0, "")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn truths(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn lexemes(input: &str) -> Vec<(usize, String)> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| (t.position, t.text))
            .collect()
    }

    #[test]
    fn tokenize_identifier() {
        assert_eq!(lexemes("foo"), vec![(0, "foo".into())]);
    }

    #[test]
    fn tokenize_and() {
        assert_eq!(
            lexemes("foo & bar"),
            vec![(0, "foo".into()), (4, "&".into()), (6, "bar".into())]
        );
    }

    #[test]
    fn tokenize_or() {
        assert_eq!(
            lexemes("foo | bar"),
            vec![(0, "foo".into()), (4, "|".into()), (6, "bar".into())]
        );
    }

    #[test]
    fn tokenize_negation() {
        assert_eq!(lexemes("~foo"), vec![(0, "~".into()), (1, "foo".into())]);
    }

    #[test]
    fn tokenize_parens() {
        assert_eq!(
            lexemes("(a)"),
            vec![(0, "(".into()), (1, "a".into()), (2, ")".into())]
        );
    }

    #[test]
    fn tokenize_complex() {
        assert_eq!(
            lexemes("~(x&y)|(~x&~y)"),
            vec![
                (0, "~".into()),
                (1, "(".into()),
                (2, "x".into()),
                (3, "&".into()),
                (4, "y".into()),
                (5, ")".into()),
                (6, "|".into()),
                (7, "(".into()),
                (8, "~".into()),
                (9, "x".into()),
                (10, "&".into()),
                (11, "~".into()),
                (12, "y".into()),
                (13, ")".into()),
            ]
        );
    }

    #[test]
    fn tokenize_rejects_foreign_characters() {
        let err = tokenize("aef&//&||").unwrap_err();
        assert_eq!(err.to_string(), "Invalid token / at position 4");
    }

    #[test]
    fn simple_membership() {
        assert!(eval_bool("foo", &truths(&["foo"])).unwrap());
        assert!(!eval_bool("foo", &truths(&["bar"])).unwrap());
    }

    #[test]
    fn conjunction_table() {
        assert!(eval_bool("foo&bar", &truths(&["foo", "bar"])).unwrap());
        assert!(!eval_bool("foo&bar", &truths(&["foo"])).unwrap());
        assert!(!eval_bool("foo&bar", &truths(&["bar"])).unwrap());
        assert!(!eval_bool("foo&bar", &truths(&[])).unwrap());
    }

    #[test]
    fn disjunction_table() {
        assert!(eval_bool("foo|bar", &truths(&["foo", "bar"])).unwrap());
        assert!(eval_bool("foo|bar", &truths(&["foo"])).unwrap());
        assert!(eval_bool("foo|bar", &truths(&["bar"])).unwrap());
        assert!(!eval_bool("foo|bar", &truths(&[])).unwrap());
    }

    #[test]
    fn negation() {
        assert!(!eval_bool("~foo", &truths(&["foo"])).unwrap());
        assert!(eval_bool("~foo", &truths(&[])).unwrap());
    }

    #[test]
    fn de_morgan_is_always_false() {
        // ~(a&b) & ~(~a|~b) contradicts itself for every truth assignment.
        for t in [
            truths(&[]),
            truths(&["foo"]),
            truths(&["bar"]),
            truths(&["foo", "bar"]),
        ] {
            assert!(!eval_bool("~(foo&bar)&~(~foo|~bar)", &t).unwrap());
        }
    }

    #[test]
    fn adjacent_same_precedence_is_an_error() {
        let err = eval_bool("a&&b", &truths(&[])).unwrap_err();
        assert_eq!(err.to_string(), "Invalid token & at position 2");
    }

    #[test]
    fn mixed_and_or_requires_parens() {
        assert!(eval_bool("a&b|c", &truths(&["c"])).is_err());
        assert!(eval_bool("(a&b)|c", &truths(&["c"])).unwrap());
        assert!(eval_bool("a&(b|c)", &truths(&["a", "c"])).unwrap());
    }

    #[test]
    fn double_negation() {
        assert!(eval_bool("~~foo", &truths(&["foo"])).unwrap());
        assert!(!eval_bool("~~foo", &truths(&[])).unwrap());
    }

    #[test]
    fn unmatched_parens_fail() {
        let err = eval_bool("(a", &truths(&[])).unwrap_err();
        assert_eq!(err.position, 0);
        assert_eq!(err.lexeme, "(");
        let err = eval_bool("a)", &truths(&[])).unwrap_err();
        assert_eq!(err.position, 1);
        assert_eq!(err.lexeme, ")");
    }

    #[test]
    fn dangling_operator_fails() {
        assert!(eval_bool("&", &truths(&[])).is_err());
        assert!(eval_bool("a&", &truths(&[])).is_err());
    }

    #[test]
    fn surplus_values_fail() {
        assert!(eval_bool("a(b)", &truths(&[])).is_err());
    }

    #[test]
    fn empty_input_fails() {
        assert!(eval_bool("", &truths(&[])).is_err());
        assert!(eval_bool("   ", &truths(&[])).is_err());
    }
}
