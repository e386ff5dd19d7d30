use std::cmp::Ordering;
use std::fmt;

use smallvec::SmallVec;

/// Name of the anonymous variable. Every occurrence matches anything and
/// binds nothing.
pub const ANONYMOUS: &str = "_";

/// Represents a Datalog term
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Term {
    /// A variable that can be unified with constants (e.g., `X`, `Who`)
    Variable(String),
    /// A concrete symbol, number or string (e.g., `alice`, `42`, `"New York"`)
    Constant(String),
}

impl Term {
    /// Builds a variable term.
    pub fn var(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// Builds a constant term.
    pub fn constant(value: impl Into<String>) -> Self {
        Self::Constant(value.into())
    }

    /// Returns the variable name, if this is a variable.
    #[must_use]
    pub fn as_variable(&self) -> Option<&str> {
        match self {
            Self::Variable(name) => Some(name),
            Self::Constant(_) => None,
        }
    }

    /// Returns the constant value, if this is a constant.
    #[must_use]
    pub fn as_constant(&self) -> Option<&str> {
        match self {
            Self::Constant(value) => Some(value),
            Self::Variable(_) => None,
        }
    }

    /// True for `_`.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Variable(name) if name == ANONYMOUS)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variable(name) => f.write_str(name),
            Self::Constant(value) => write_constant(f, value),
        }
    }
}

/// Writes a constant as it would be written in a program: bare when it can
/// be, otherwise double-quoted with escapes.
pub(crate) fn write_constant(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    if is_bare_constant(value) {
        return f.write_str(value);
    }
    f.write_str("\"")?;
    for c in value.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

/// True when `value` re-lexes as the same unquoted constant.
pub(crate) fn is_bare_constant(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => chars.all(|c| c.is_alphanumeric() || c == '_'),
        Some(_) => is_number(value),
        None => false,
    }
}

/// Matches `-?[0-9]+(\.[0-9]+)?`.
pub(crate) fn is_number(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    let (int, frac) = match digits.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (digits, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    all_digits(int) && frac.map_or(true, all_digits)
}

/// Orders two constants: numerically when both are numbers, lexically otherwise.
#[must_use]
pub fn compare_constants(left: &str, right: &str) -> Ordering {
    if is_number(left) && is_number(right) {
        if let (Ok(l), Ok(r)) = (left.parse::<f64>(), right.parse::<f64>()) {
            if let Some(ordering) = l.partial_cmp(&r) {
                return ordering;
            }
        }
    }
    left.cmp(right)
}

/// `name/arity`, the grouping key for facts and rules.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PredicateKey {
    /// Predicate name
    pub name: String,
    /// Number of arguments
    pub arity: usize,
}

impl PredicateKey {
    /// Builds a key from a name and an arity.
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }
}

impl fmt::Display for PredicateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// A predicate applied to arguments (e.g., `parent(alice, X)`)
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Expr {
    /// The name of the predicate (e.g., `"parent"`)
    pub predicate: String,
    /// The arguments of the predicate
    pub terms: SmallVec<[Term; 4]>,
}

impl Expr {
    /// Builds an expression.
    pub fn new(predicate: impl Into<String>, terms: impl IntoIterator<Item = Term>) -> Self {
        Self {
            predicate: predicate.into(),
            terms: terms.into_iter().collect(),
        }
    }

    /// Builds a ground expression from constant values.
    pub fn fact<S: Into<String>>(predicate: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        Self::new(predicate, values.into_iter().map(Term::constant))
    }

    /// Number of arguments.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.terms.len()
    }

    /// Grouping key of this expression.
    #[must_use]
    pub fn key(&self) -> PredicateKey {
        PredicateKey::new(self.predicate.clone(), self.arity())
    }

    /// True if no argument is a variable.
    #[must_use]
    pub fn is_ground(&self) -> bool {
        self.terms.iter().all(|t| matches!(t, Term::Constant(_)))
    }

    /// Named variables in argument order, repeats included, `_` skipped.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.terms
            .iter()
            .filter(|t| !t.is_anonymous())
            .filter_map(Term::as_variable)
    }

    /// The constants of a ground expression.
    #[must_use]
    pub fn ground_values(&self) -> Option<Vec<String>> {
        self.terms
            .iter()
            .map(|t| t.as_constant().map(str::to_string))
            .collect()
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.predicate)?;
        if self.terms.is_empty() {
            return Ok(());
        }
        f.write_str("(")?;
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{term}")?;
        }
        f.write_str(")")
    }
}

/// Built-in comparison operators.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Comparison {
    /// `=`
    Eq,
    /// `<>` or `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Comparison {
    /// Canonical operator text.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// Applies the operator to two constants.
    #[must_use]
    pub fn holds(self, left: &str, right: &str) -> bool {
        let ordering = compare_constants(left, right);
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

/// One element of a rule body or query.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Literal {
    /// Must match a known fact
    Positive(Expr),
    /// Must not match any known fact (`not p(X)`)
    Negative(Expr),
    /// Built-in comparison (`X <> Y`)
    Compare {
        /// Operator
        op: Comparison,
        /// Left operand
        left: Term,
        /// Right operand
        right: Term,
    },
}

impl Literal {
    /// Shorthand for `left <> right`.
    #[must_use]
    pub fn ne(left: Term, right: Term) -> Self {
        Self::Compare {
            op: Comparison::Ne,
            left,
            right,
        }
    }

    /// Named variables of the literal, `_` skipped.
    #[must_use]
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Self::Positive(expr) | Self::Negative(expr) => expr.variables().collect(),
            Self::Compare { left, right, .. } => [left, right]
                .into_iter()
                .filter(|t| !t.is_anonymous())
                .filter_map(Term::as_variable)
                .collect(),
        }
    }

    /// The expression of a positive literal.
    #[must_use]
    pub fn as_positive(&self) -> Option<&Expr> {
        match self {
            Self::Positive(expr) => Some(expr),
            _ => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positive(expr) => write!(f, "{expr}"),
            Self::Negative(expr) => write!(f, "not {expr}"),
            Self::Compare { op, left, right } => write!(f, "{left} {} {right}", op.symbol()),
        }
    }
}

fn write_body(f: &mut fmt::Formatter<'_>, body: &[Literal]) -> fmt::Result {
    for (i, literal) in body.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{literal}")?;
    }
    Ok(())
}

/// A Datalog rule (e.g., `ancestor(X, Y) :- parent(X, Y).`)
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rule {
    /// The conclusion of the rule
    pub head: Expr,
    /// The conditions that must be satisfied, in source order
    pub body: Vec<Literal>,
}

impl Rule {
    /// Builds a rule.
    #[must_use]
    pub fn new(head: Expr, body: Vec<Literal>) -> Self {
        Self { head, body }
    }

    /// Positive body expressions in order.
    pub fn positive_body(&self) -> impl Iterator<Item = &Expr> {
        self.body.iter().filter_map(Literal::as_positive)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.head)?;
        if !self.body.is_empty() {
            f.write_str(" :- ")?;
            write_body(f, &self.body)?;
        }
        f.write_str(".")
    }
}

/// A Datalog query (e.g., `sibling(bob, B)?` or `p(X), X <> a?`)
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Query {
    /// The literals to satisfy
    pub body: Vec<Literal>,
}

impl Query {
    /// Builds a single-expression query.
    #[must_use]
    pub fn expr(expr: Expr) -> Self {
        Self {
            body: vec![Literal::Positive(expr)],
        }
    }

    /// Named variables in first-occurrence order; these are the keys of
    /// every binding returned for this query.
    #[must_use]
    pub fn variables(&self) -> Vec<&str> {
        let mut seen = indexmap::IndexSet::new();
        for literal in &self.body {
            for var in literal.variables() {
                seen.insert(var);
            }
        }
        seen.into_iter().collect()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_body(f, &self.body)?;
        f.write_str("?")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_text() {
        let rule = Rule::new(
            Expr::new("sibling", [Term::var("X"), Term::var("Y")]),
            vec![
                Literal::Positive(Expr::new("parent", [Term::var("A"), Term::var("X")])),
                Literal::Positive(Expr::new("parent", [Term::var("A"), Term::var("Y")])),
                Literal::ne(Term::var("X"), Term::var("Y")),
            ],
        );
        assert_eq!(
            rule.to_string(),
            "sibling(X, Y) :- parent(A, X), parent(A, Y), X <> Y."
        );

        let query = Query::expr(Expr::new("sibling", [Term::constant("bob"), Term::var("B")]));
        assert_eq!(query.to_string(), "sibling(bob, B)?");
        assert_eq!(Expr::new("rainy", []).to_string(), "rainy");
    }

    #[test]
    fn test_constants_are_quoted_only_when_needed() {
        assert_eq!(Term::constant("alice").to_string(), "alice");
        assert_eq!(Term::constant("-3.5").to_string(), "-3.5");
        assert_eq!(Term::constant("Alice").to_string(), "\"Alice\"");
        assert_eq!(Term::constant("New York").to_string(), "\"New York\"");
        assert_eq!(Term::constant("say \"hi\"").to_string(), "\"say \\\"hi\\\"\"");
        assert_eq!(Term::constant("").to_string(), "\"\"");
    }

    #[test]
    fn test_predicate_key() {
        let expr = Expr::fact("parent", ["alice", "bob"]);
        assert_eq!(expr.key().to_string(), "parent/2");
        assert!(expr.is_ground());
        assert_eq!(
            expr.ground_values(),
            Some(vec!["alice".to_string(), "bob".to_string()])
        );
    }

    #[test]
    fn test_comparisons_are_numeric_when_possible() {
        assert!(Comparison::Lt.holds("9", "10"));
        assert!(!Comparison::Lt.holds("b", "a"));
        assert!(Comparison::Lt.holds("10", "9a"));
        assert!(Comparison::Eq.holds("1", "1.0"));
        assert!(Comparison::Ne.holds("bob", "bart"));
        assert!(Comparison::Ge.holds("-1", "-2"));
        assert!(!Comparison::Lt.holds("nan", "inf"));
    }

    #[test]
    fn test_query_variables_skip_anonymous() {
        let query = Query {
            body: vec![
                Literal::Positive(Expr::new(
                    "p",
                    [Term::var("Y"), Term::var(ANONYMOUS), Term::var("X")],
                )),
                Literal::ne(Term::var("X"), Term::var("Y")),
            ],
        };
        assert_eq!(query.variables(), vec!["Y", "X"]);
    }
}
