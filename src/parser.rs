//! Program text to clauses.
//!
//! ```text
//! program  := clause*
//! clause   := expr "." | expr ":-" literals "." | literals "?"
//! literals := literal ("," literal)*
//! literal  := "not" expr | "\+" expr | term op term | expr
//! expr     := ident [ "(" [term ("," term)*] ")" ]
//! term     := Variable | ident | number | "string"
//! op       := "=" | "<>" | "!=" | "<" | "<=" | ">" | ">="
//! ```
//!
//! `%` starts a comment running to end of line.

use bstr::ByteSlice;
use log::debug;
use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag, take_while};
use nom::character::complete::{char, digit1, multispace1, not_line_ending, satisfy};
use nom::combinator::{cut, map, opt, recognize, value};
use nom::multi::{many0, separated_list0, separated_list1};
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::IResult;

use crate::error::{Error, Result};
use crate::program::{check_body, Program};
use crate::term::{Comparison, Expr, Literal, Query, Rule, Term};

/// One parsed clause, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    /// `parent(alice, bob).`
    Fact(Expr),
    /// `ancestor(X, Y) :- parent(X, Y).`
    Rule(Rule),
    /// `ancestor(alice, Who)?`
    Query(Query),
}

/// Parses and validates a whole program.
///
/// # Errors
///
/// [`Error::Syntax`] for malformed text, [`Error::UnsafeRule`] and
/// [`Error::NotStratifiable`] for well-formed but invalid programs.
pub fn parse_program(source: &str) -> Result<Program> {
    let clauses = parse_clauses(source)?;
    Program::from_clauses(clauses)
}

/// Parses program text into clauses, in source order, without validating them.
///
/// # Errors
///
/// [`Error::Syntax`] with the 1-based position of the first malformed clause.
pub fn parse_clauses(source: &str) -> Result<Vec<Clause>> {
    let mut clauses = Vec::new();
    let mut rest = skip_blank(source);

    while !rest.is_empty() {
        let start = rest;
        let (after, literals) = literal_list(rest)
            .map_err(|e| syntax_error(source, error_input(&e, rest), "expected a fact, rule or query"))?;
        let after = skip_blank(after);

        if let Some(after) = after.strip_prefix(":-") {
            let head = single_expr(literals)
                .ok_or_else(|| syntax_error(source, start, "a rule head must be a single expression"))?;
            let body_start = skip_blank(after);
            let (after, body) = literal_list(body_start)
                .map_err(|e| syntax_error(source, error_input(&e, body_start), "expected a rule body"))?;
            let after = skip_blank(after);
            let after = after
                .strip_prefix('.')
                .ok_or_else(|| syntax_error(source, after, "expected `.` after rule body"))?;
            clauses.push(Clause::Rule(Rule::new(head, body)));
            rest = skip_blank(after);
        } else if let Some(after) = after.strip_prefix('?') {
            clauses.push(Clause::Query(Query { body: literals }));
            rest = skip_blank(after);
        } else if let Some(after) = after.strip_prefix('.') {
            let fact = single_expr(literals)
                .ok_or_else(|| syntax_error(source, start, "a fact must be a single expression"))?;
            clauses.push(Clause::Fact(fact));
            rest = skip_blank(after);
        } else {
            return Err(syntax_error(source, after, "expected `.`, `?` or `:-`"));
        }
    }

    debug!("parsed {} clauses", clauses.len());
    Ok(clauses)
}

/// Parses a single query, with or without its trailing `?`.
///
/// # Errors
///
/// [`Error::Syntax`] if the text is not a literal list,
/// [`Error::UnsafeRule`] if a negated literal or comparison uses a variable
/// no positive literal binds.
pub fn parse_query(text: &str) -> Result<Query> {
    let start = skip_blank(text);
    let (rest, body) =
        literal_list(start).map_err(|e| syntax_error(text, error_input(&e, start), "expected a query"))?;
    let rest = skip_blank(rest);
    let rest = skip_blank(rest.strip_prefix('?').unwrap_or(rest));
    if !rest.is_empty() {
        return Err(syntax_error(text, rest, "unexpected input after query"));
    }
    let query = Query { body };
    check_body(&query.body, &query)?;
    Ok(query)
}

fn single_expr(mut literals: Vec<Literal>) -> Option<Expr> {
    match (literals.len(), literals.pop()) {
        (1, Some(Literal::Positive(expr))) => Some(expr),
        _ => None,
    }
}

fn error_input<'a>(err: &nom::Err<nom::error::Error<&'a str>>, fallback: &'a str) -> &'a str {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => e.input,
        nom::Err::Incomplete(_) => fallback,
    }
}

fn syntax_error(source: &str, at: &str, message: &str) -> Error {
    let (line, column) = position(source, at);
    Error::Syntax {
        message: message.to_string(),
        line,
        column,
    }
}

/// 1-based line and column of `rest` within `source`.
fn position(source: &str, rest: &str) -> (usize, usize) {
    let offset = source.len().saturating_sub(rest.len());
    let consumed = &source.as_bytes()[..offset];
    let line = consumed.find_iter("\n").count() + 1;
    let line_start = consumed.rfind_byte(b'\n').map_or(0, |i| i + 1);
    let column = consumed[line_start..].chars().count() + 1;
    (line, column)
}

fn comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(char('%'), not_line_ending))(input)
}

fn blank(input: &str) -> IResult<&str, ()> {
    value((), many0(alt((multispace1, comment))))(input)
}

fn skip_blank(input: &str) -> &str {
    blank(input).map_or(input, |(rest, ())| rest)
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(blank, inner, blank)
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_lowercase()),
        take_while(is_ident_continue),
    ))(input)
}

fn variable(input: &str) -> IResult<&str, Term> {
    map(
        recognize(pair(
            satisfy(|c| c.is_ascii_uppercase() || c == '_'),
            take_while(is_ident_continue),
        )),
        Term::var,
    )(input)
}

fn number(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)
}

fn string(input: &str) -> IResult<&str, String> {
    alt((
        value(String::new(), tag("\"\"")),
        delimited(
            char('"'),
            escaped_transform(
                is_not("\"\\"),
                '\\',
                alt((
                    value("\\", char('\\')),
                    value("\"", char('"')),
                    value("\n", char('n')),
                    value("\t", char('t')),
                )),
            ),
            char('"'),
        ),
    ))(input)
}

fn term(input: &str) -> IResult<&str, Term> {
    alt((
        variable,
        map(string, Term::Constant),
        map(number, Term::constant),
        map(identifier, Term::constant),
    ))(input)
}

fn expr(input: &str) -> IResult<&str, Expr> {
    let (input, name) = identifier(input)?;
    let (input, args) = opt(preceded(
        pair(blank, char('(')),
        cut(terminated(
            separated_list0(char(','), ws(term)),
            pair(blank, char(')')),
        )),
    ))(input)?;
    Ok((input, Expr::new(name, args.unwrap_or_default())))
}

fn comparison_op(input: &str) -> IResult<&str, Comparison> {
    alt((
        value(Comparison::Ne, tag("<>")),
        value(Comparison::Ne, tag("!=")),
        value(Comparison::Le, tag("<=")),
        value(Comparison::Ge, tag(">=")),
        value(Comparison::Lt, tag("<")),
        value(Comparison::Gt, tag(">")),
        value(Comparison::Eq, tag("=")),
    ))(input)
}

fn comparison(input: &str) -> IResult<&str, Literal> {
    map(
        tuple((term, ws(comparison_op), term)),
        |(left, op, right)| Literal::Compare { op, left, right },
    )(input)
}

fn negation(input: &str) -> IResult<&str, Literal> {
    map(
        preceded(
            alt((terminated(tag("not"), multispace1), tag("\\+"))),
            preceded(blank, expr),
        ),
        Literal::Negative,
    )(input)
}

fn literal(input: &str) -> IResult<&str, Literal> {
    alt((negation, comparison, map(expr, Literal::Positive)))(input)
}

fn literal_list(input: &str) -> IResult<&str, Vec<Literal>> {
    separated_list1(ws(char(',')), literal)(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::ANONYMOUS;

    fn v(name: &str) -> Term {
        Term::var(name)
    }

    fn c(value: &str) -> Term {
        Term::constant(value)
    }

    #[test]
    fn test_parse_facts_rules_and_queries() {
        let source = "
            parent(alice, bob).
            ancestor(X, Y) :- parent(X, Y).
            sibling(X, Y) :- parent(A, X), parent(A, Y), X <> Y.
            sibling(A,B)?
        ";
        let clauses = parse_clauses(source).unwrap();
        assert_eq!(clauses.len(), 4);

        assert_eq!(clauses[0], Clause::Fact(Expr::fact("parent", ["alice", "bob"])));
        assert_eq!(
            clauses[1],
            Clause::Rule(Rule::new(
                Expr::new("ancestor", [v("X"), v("Y")]),
                vec![Literal::Positive(Expr::new("parent", [v("X"), v("Y")]))],
            ))
        );
        let Clause::Rule(sibling) = &clauses[2] else {
            panic!("expected a rule, got {:?}", clauses[2]);
        };
        assert_eq!(sibling.body[2], Literal::ne(v("X"), v("Y")));
        assert_eq!(
            clauses[3],
            Clause::Query(Query::expr(Expr::new("sibling", [v("A"), v("B")])))
        );
    }

    #[test]
    fn test_comments_and_layout_are_ignored() {
        let source = "% family\nparent( alice ,bob ) . % trailing\n\n\n   parent(alice,\n bart).";
        let clauses = parse_clauses(source).unwrap();
        assert_eq!(
            clauses,
            vec![
                Clause::Fact(Expr::fact("parent", ["alice", "bob"])),
                Clause::Fact(Expr::fact("parent", ["alice", "bart"])),
            ]
        );
    }

    #[test]
    fn test_constants_numbers_and_strings() {
        let clauses = parse_clauses(r#"city("New York", 8.3, -2, nyc, "say \"hi\"", "")."#).unwrap();
        assert_eq!(
            clauses,
            vec![Clause::Fact(Expr::new(
                "city",
                [c("New York"), c("8.3"), c("-2"), c("nyc"), c("say \"hi\""), c("")]
            ))]
        );
    }

    #[test]
    fn test_number_before_clause_terminator() {
        let clauses = parse_clauses("big(X) :- size(X, N), N > 10.").unwrap();
        let Clause::Rule(rule) = &clauses[0] else {
            panic!("expected a rule");
        };
        assert_eq!(
            rule.body[1],
            Literal::Compare {
                op: Comparison::Gt,
                left: v("N"),
                right: c("10"),
            }
        );
    }

    #[test]
    fn test_negation_and_comparison_operators() {
        let clauses =
            parse_clauses("p(X) :- q(X), not r(X), \\+ s(X), X != a, X <= b, X >= c, X = X, X < d.")
                .unwrap();
        let Clause::Rule(rule) = &clauses[0] else {
            panic!("expected a rule");
        };
        assert_eq!(rule.body[1], Literal::Negative(Expr::new("r", [v("X")])));
        assert_eq!(rule.body[2], Literal::Negative(Expr::new("s", [v("X")])));
        let ops: Vec<Comparison> = rule.body[3..]
            .iter()
            .map(|l| match l {
                Literal::Compare { op, .. } => *op,
                other => panic!("expected comparison, got {other}"),
            })
            .collect();
        assert_eq!(
            ops,
            vec![
                Comparison::Ne,
                Comparison::Le,
                Comparison::Ge,
                Comparison::Eq,
                Comparison::Lt
            ]
        );
    }

    #[test]
    fn test_predicates_that_start_with_not() {
        let clauses = parse_clauses("p(X) :- nothing(X), not(X).").unwrap();
        let Clause::Rule(rule) = &clauses[0] else {
            panic!("expected a rule");
        };
        assert_eq!(rule.body[0], Literal::Positive(Expr::new("nothing", [v("X")])));
        assert_eq!(rule.body[1], Literal::Positive(Expr::new("not", [v("X")])));
    }

    #[test]
    fn test_zero_arity_and_anonymous_variables() {
        let clauses = parse_clauses("rainy. wet :- rainy. p(_, X)?").unwrap();
        assert_eq!(clauses[0], Clause::Fact(Expr::new("rainy", [])));
        assert_eq!(
            clauses[2],
            Clause::Query(Query::expr(Expr::new("p", [v(ANONYMOUS), v("X")])))
        );
    }

    #[test]
    fn test_conjunctive_query() {
        let clauses = parse_clauses("parent(A, X), parent(A, Y), X <> Y?").unwrap();
        let Clause::Query(query) = &clauses[0] else {
            panic!("expected a query");
        };
        assert_eq!(query.body.len(), 3);
        assert_eq!(query.to_string(), "parent(A, X), parent(A, Y), X <> Y?");
    }

    #[test]
    fn test_syntax_error_reports_position() {
        let err = parse_clauses("parent(alice, bob).\nparent(alice bob).").unwrap_err();
        match err {
            Error::Syntax { line, column, .. } => {
                assert_eq!(line, 2);
                assert_eq!(column, 14);
            }
            other => panic!("expected syntax error, got {other:?}"),
        }

        let err = parse_clauses("parent(alice, bob)").unwrap_err();
        assert!(
            matches!(err, Error::Syntax { line: 1, column: 19, .. }),
            "missing terminator should point past the expression: {err:?}"
        );
    }

    #[test]
    fn test_malformed_clause_shapes() {
        assert!(matches!(
            parse_clauses("p(X), q(X)."),
            Err(Error::Syntax { .. })
        ));
        assert!(matches!(
            parse_clauses("X <> Y :- p(X, Y)."),
            Err(Error::Syntax { .. })
        ));
        assert!(matches!(parse_clauses("p(a) :- ."), Err(Error::Syntax { .. })));
        assert!(matches!(parse_clauses("Parent(a)."), Err(Error::Syntax { .. })));
    }

    #[test]
    fn test_parse_query_accepts_optional_terminator() {
        let with = parse_query("sibling(bob, B)?").unwrap();
        let without = parse_query("  sibling(bob, B) ").unwrap();
        assert_eq!(with, without);
        assert!(parse_query("sibling(bob, B)? extra").is_err());
    }

    #[test]
    fn test_parse_query_rejects_unbound_constraint_variables() {
        for (text, unbound) in [
            ("p(X), X <> Y?", "Y"),
            ("p(X), not q(Y)?", "Y"),
            ("p(X), X < _?", ANONYMOUS),
        ] {
            match parse_query(text) {
                Err(Error::UnsafeRule { clause, variable }) => {
                    assert_eq!(clause, text);
                    assert_eq!(variable, unbound, "{text}");
                }
                other => panic!("{text}: expected an unsafe query error, got {other:?}"),
            }
        }
        assert!(parse_query("p(X), q(Y), X <> Y, not r(Y)?").is_ok());
    }

    #[test]
    fn test_canonical_text_reparses() {
        let source = "p(X, \"Hello World\", 3) :- q(X), not r(X, _), X <> \"two words\".";
        let clauses = parse_clauses(source).unwrap();
        let Clause::Rule(rule) = &clauses[0] else {
            panic!("expected a rule");
        };
        let again = parse_clauses(&rule.to_string()).unwrap();
        assert_eq!(again, clauses);
    }

    #[test]
    fn test_position_counts_characters() {
        let source = "é(a).\n  ü";
        let rest = &source[source.len() - "ü".len()..];
        assert_eq!(position(source, rest), (2, 3));
    }
}
