//! Answering queries against a computed fixpoint.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use log::trace;

use crate::engine::{Deadline, Expired, Fixpoint, JoinPlan};
use crate::error::Result;
use crate::program::check_body;
use crate::term::{write_constant, Query};

/// One answer to a query: a value for each of its named variables.
///
/// Keys follow the order the variables first appear in the query. A query
/// without variables that holds has a single empty binding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Binding {
    values: IndexMap<String, String>,
}

impl Binding {
    /// Value bound to `var`.
    #[must_use]
    pub fn get(&self, var: &str) -> Option<&str> {
        self.values.get(var).map(String::as_str)
    }

    /// Variable/value pairs in query order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of variables bound.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True for the answer to a query without variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Binding {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// `A: bob, B: "New York"`, or `Yes.` for the empty binding. Values are
/// written as program constants.
impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.values.is_empty() {
            return f.write_str("Yes.");
        }
        for (i, (var, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{var}: ")?;
            write_constant(f, value)?;
        }
        Ok(())
    }
}

/// Every distinct binding of the query's named variables, in the order the
/// join finds them. Empty means the query has no solution.
///
/// # Errors
///
/// [`Error::UnsafeRule`](crate::Error::UnsafeRule) if a negated literal or
/// comparison uses a variable no positive literal binds.
pub fn answer(query: &Query, fixpoint: &Fixpoint) -> Result<Vec<Binding>> {
    check_body(&query.body, query)?;
    answer_within(query, fixpoint, &Deadline::unbounded())
}

/// Answers a validated query, failing once `deadline` passes.
pub(crate) fn answer_within(query: &Query, fixpoint: &Fixpoint, deadline: &Deadline) -> Result<Vec<Binding>> {
    let variables = query.variables();
    let plan = JoinPlan::new(&query.body);

    let mut seen: IndexSet<Vec<String>> = IndexSet::new();
    let mut solutions = 0usize;
    plan.solve(fixpoint.store(), None, deadline, &mut |subst| {
        solutions += 1;
        // Validated queries bind every named variable.
        let values: Option<Vec<String>> = variables
            .iter()
            .map(|var| subst.constant(var).map(str::to_string))
            .collect();
        if let Some(values) = values {
            seen.insert(values);
        }
    })
    .map_err(|Expired| deadline.exceeded(fixpoint.iterations()))?;
    trace!("`{query}`: {solutions} solutions, {} distinct", seen.len());

    Ok(seen
        .into_iter()
        .map(|values| variables.iter().copied().zip(values).collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EvalOptions;
    use crate::parser::{parse_program, parse_query};
    use crate::term::{Expr, Literal, Term};

    const FAMILY: &str = "
        parent(alice, bob). parent(alice, bart). parent(alice, betty).
        parent(bob, carol).
        ancestor(X, Y) :- parent(X, Y).
        ancestor(X, Y) :- ancestor(X, Z), parent(Z, Y).
        sibling(X, Y) :- parent(A, X), parent(A, Y), X <> Y.
    ";

    fn family() -> Fixpoint {
        let program = parse_program(FAMILY).unwrap();
        Fixpoint::compute(&program, &EvalOptions::default()).unwrap()
    }

    fn ask(fixpoint: &Fixpoint, text: &str) -> Vec<String> {
        answer(&parse_query(text).unwrap(), fixpoint)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn test_bindings_follow_query_variable_order() {
        let fixpoint = family();
        let answers = ask(&fixpoint, "sibling(bob, B)?");
        assert_eq!(answers, vec!["B: bart", "B: betty"]);

        let answers = ask(&fixpoint, "ancestor(Y, carol)?");
        assert_eq!(answers, vec!["Y: bob", "Y: alice"]);
    }

    #[test]
    fn test_ground_query_yields_one_empty_binding_or_none() {
        let fixpoint = family();
        let holds = answer(&parse_query("ancestor(alice, carol)?").unwrap(), &fixpoint).unwrap();
        assert_eq!(holds, vec![Binding::default()]);
        assert!(holds[0].is_empty());
        assert_eq!(holds[0].to_string(), "Yes.");

        let fails = answer(&parse_query("ancestor(carol, alice)?").unwrap(), &fixpoint).unwrap();
        assert!(fails.is_empty());
    }

    #[test]
    fn test_projection_removes_duplicate_bindings() {
        // alice is parent of three children but should be listed once.
        let fixpoint = family();
        assert_eq!(ask(&fixpoint, "parent(P, _)?"), vec!["P: alice", "P: bob"]);
    }

    #[test]
    fn test_conjunctive_query_with_constraints() {
        let fixpoint = family();
        let answers = ask(&fixpoint, "parent(alice, X), not parent(X, _), X <> bart?");
        assert_eq!(answers, vec!["X: betty"]);
    }

    #[test]
    fn test_unknown_predicate_has_no_answers() {
        let fixpoint = family();
        assert!(ask(&fixpoint, "cousin(X, Y)?").is_empty());
        // Known name but wrong arity is a different predicate.
        assert!(ask(&fixpoint, "parent(X)?").is_empty());
    }

    #[test]
    fn test_repeated_query_variable() {
        let program = parse_program("likes(a, a). likes(a, b). likes(c, c).").unwrap();
        let fixpoint = Fixpoint::compute(&program, &EvalOptions::default()).unwrap();
        assert_eq!(ask(&fixpoint, "likes(X, X)?"), vec!["X: a", "X: c"]);
    }

    #[test]
    fn test_binding_accessors() {
        let binding: Binding = [("A", "bob"), ("B", "bart")].into_iter().collect();
        assert_eq!(binding.get("B"), Some("bart"));
        assert_eq!(binding.get("C"), None);
        assert_eq!(binding.len(), 2);
        assert_eq!(binding.iter().map(|(k, _)| k).collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(binding.to_string(), "A: bob, B: bart");
    }

    #[test]
    fn test_binding_quotes_values_that_need_it() {
        let binding: Binding = [("C", "New York"), ("P", "8336817"), ("N", "Alice")]
            .into_iter()
            .collect();
        assert_eq!(binding.to_string(), r#"C: "New York", P: 8336817, N: "Alice""#);

        let program = parse_program(r#"person("Alice"). person(bob). person("say \"hi\"")."#).unwrap();
        let fixpoint = Fixpoint::compute(&program, &EvalOptions::default()).unwrap();
        assert_eq!(
            ask(&fixpoint, "person(N)?"),
            vec![r#"N: "Alice""#, "N: bob", r#"N: "say \"hi\"""#]
        );
    }

    #[test]
    fn test_hand_built_unsafe_query_is_rejected() {
        let fixpoint = family();
        let query = Query {
            body: vec![
                Literal::Positive(Expr::new("parent", [Term::var("X"), Term::var("_")])),
                Literal::Negative(Expr::new("parent", [Term::var("Y"), Term::var("X")])),
            ],
        };
        match answer(&query, &fixpoint) {
            Err(crate::Error::UnsafeRule { variable, .. }) => assert_eq!(variable, "Y"),
            other => panic!("expected an unsafe query error, got {other:?}"),
        }
    }
}
