//! One execution request: parse, compute the fixpoint, answer every query.

use std::fmt;

use indexmap::IndexMap;
use log::{debug, info};

use crate::engine::{Deadline, EvalOptions, Fixpoint};
use crate::error::Result;
use crate::parser::parse_program;
use crate::program::{Inspection, Program};
use crate::query::{answer_within, Binding};
use crate::term::Query;

/// Runs programs under fixed evaluation options.
///
/// A session holds no state between requests, so one value can run any
/// number of programs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Session {
    options: EvalOptions,
}

/// The bindings found for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Answer {
    /// The query as submitted
    pub query: Query,
    /// Every distinct solution, in the order found
    pub bindings: Vec<Binding>,
}

/// Everything one request produced.
#[derive(Debug, Clone)]
pub struct Execution {
    program: Program,
    fixpoint: Fixpoint,
    answers: Vec<Answer>,
}

impl Session {
    /// Session with unbounded evaluation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Session with the given evaluation budget.
    #[must_use]
    pub fn with_options(options: EvalOptions) -> Self {
        Self { options }
    }

    /// The options every run uses.
    #[must_use]
    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    /// Parses and runs program text.
    ///
    /// # Errors
    ///
    /// Any parse, validation or budget failure; there is no partial result.
    pub fn execute(&self, source: &str) -> Result<Execution> {
        let program = parse_program(source)?;
        self.run(program)
    }

    /// Computes the fixpoint of a validated program and answers its queries
    /// in submission order.
    ///
    /// # Errors
    ///
    /// [`Error::EvaluationBudgetExceeded`](crate::Error::EvaluationBudgetExceeded)
    /// when the session's budget runs out.
    pub fn run(&self, program: Program) -> Result<Execution> {
        let deadline = Deadline::start(&self.options);
        let fixpoint = Fixpoint::compute_until(&program, &self.options, deadline)?;

        let mut by_text: IndexMap<String, Answer> = IndexMap::new();
        for query in program.queries() {
            let text = query.to_string();
            if by_text.contains_key(&text) {
                debug!("skipping repeated query `{text}`");
                continue;
            }
            let bindings = answer_within(query, &fixpoint, &deadline)?;
            debug!("`{text}`: {} bindings", bindings.len());
            by_text.insert(
                text,
                Answer {
                    query: query.clone(),
                    bindings,
                },
            );
        }

        info!(
            "executed {} queries over {} facts",
            by_text.len(),
            fixpoint.len()
        );
        Ok(Execution {
            program,
            fixpoint,
            answers: by_text.into_values().collect(),
        })
    }
}

/// Parses and runs program text with unbounded evaluation.
///
/// # Errors
///
/// See [`Session::execute`].
pub fn execute(source: &str) -> Result<Execution> {
    Session::new().execute(source)
}

impl Execution {
    /// One answer per distinct query, in submission order.
    #[must_use]
    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    /// Bindings of the query whose canonical text is `query` (with or
    /// without the trailing `?`).
    #[must_use]
    pub fn bindings_for(&self, query: &str) -> Option<&[Binding]> {
        let wanted = query.trim();
        let wanted = wanted.strip_suffix('?').unwrap_or(wanted).trim_end();
        self.answers
            .iter()
            .find(|a| {
                let text = a.query.to_string();
                text.strip_suffix('?').unwrap_or(&text) == wanted
            })
            .map(|a| a.bindings.as_slice())
    }

    /// The validated program.
    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Every fact the program entails.
    #[must_use]
    pub fn fixpoint(&self) -> &Fixpoint {
        &self.fixpoint
    }

    /// EDB and IDB grouped by `name/arity`.
    #[must_use]
    pub fn inspect(&self) -> Inspection {
        self.program.inspect()
    }

    /// Each query followed by its bindings, one per line, then a blank line.
    ///
    /// A query with no solution prints `No.`; a holding query without
    /// variables prints `Yes.`.
    #[must_use]
    pub fn transcript(&self) -> String {
        Transcript(&self.answers).to_string()
    }

    /// Answers, inspection and fact count as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Only if serialization itself fails.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(serde::Serialize)]
        struct Report<'a> {
            answers: Vec<AnswerReport<'a>>,
            program: Inspection,
            facts: usize,
        }

        #[derive(serde::Serialize)]
        struct AnswerReport<'a> {
            query: String,
            bindings: &'a [Binding],
        }

        let report = Report {
            answers: self
                .answers
                .iter()
                .map(|a| AnswerReport {
                    query: a.query.to_string(),
                    bindings: &a.bindings,
                })
                .collect(),
            program: self.inspect(),
            facts: self.fixpoint.len(),
        };
        serde_json::to_string_pretty(&report)
    }
}

/// Transcript text of a list of answers.
struct Transcript<'a>(&'a [Answer]);

impl fmt::Display for Transcript<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for answer in self.0 {
            writeln!(f, "{}", answer.query)?;
            if answer.bindings.is_empty() {
                f.write_str("No.\n")?;
            }
            for binding in &answer.bindings {
                writeln!(f, "{binding}")?;
            }
            f.write_str("\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};

    const DEFAULT_PROGRAM: &str = "
        % The example shown on startup
        parent(alice, bob).
        parent(alice, bart).
        parent(alice, betty).
        parent(bob, carol).

        ancestor(X, Y) :- parent(X, Y).
        ancestor(X, Y) :- ancestor(X, Z), parent(Z, Y).
        child(X, Y) :- parent(Y, X).
        sibling(A, B) :- parent(P, A), parent(P, B), A <> B.

        sibling(A, B)?
        sibling(bob, B)?
    ";

    #[test]
    fn test_execute_answers_queries_in_order() {
        let execution = execute(DEFAULT_PROGRAM).unwrap();
        let queries: Vec<String> = execution
            .answers()
            .iter()
            .map(|a| a.query.to_string())
            .collect();
        assert_eq!(queries, vec!["sibling(A, B)?", "sibling(bob, B)?"]);

        let all = &execution.answers()[0].bindings;
        assert_eq!(all.len(), 6, "three children give six ordered sibling pairs");
        assert!(all.iter().all(|b| b.get("A") != b.get("B")));

        let bobs: Vec<&str> = execution.answers()[1]
            .bindings
            .iter()
            .filter_map(|b| b.get("B"))
            .collect();
        assert_eq!(bobs, vec!["bart", "betty"]);
    }

    #[test]
    fn test_repeated_query_is_answered_once() {
        let execution = execute("p(a). p(X)? q(Y) :- p(Y). p(X)? q(Z)?").unwrap();
        let queries: Vec<String> = execution
            .answers()
            .iter()
            .map(|a| a.query.to_string())
            .collect();
        assert_eq!(queries, vec!["p(X)?", "q(Z)?"]);
    }

    #[test]
    fn test_bindings_for_canonical_text() {
        let execution = execute(DEFAULT_PROGRAM).unwrap();
        let found = execution.bindings_for("sibling(bob, B)").unwrap();
        assert_eq!(found.len(), 2);
        assert!(execution.bindings_for("sibling(bob, B)?").is_some());
        assert!(execution.bindings_for("sibling(carol, B)?").is_none());
    }

    #[test]
    fn test_transcript_format() {
        let execution = execute("
            likes(ann, tea). likes(bob, tea).
            likes(X, tea)?
            likes(ann, tea)?
            likes(ann, coffee)?
        ")
        .unwrap();
        assert_eq!(
            execution.transcript(),
            "likes(X, tea)?\nX: ann\nX: bob\n\n\
             likes(ann, tea)?\nYes.\n\n\
             likes(ann, coffee)?\nNo.\n\n"
        );
    }

    #[test]
    fn test_failures_leave_no_partial_result() {
        let err = execute("parent(alice, bob). bad(X, Y) :- parent(X, Z). parent(X, Y)?").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Safety);

        let err = execute("parent(alice bob).").unwrap_err();
        assert!(matches!(err, Error::Syntax { line: 1, .. }), "unexpected error: {err:?}");
    }

    #[test]
    fn test_budget_is_applied_per_session() {
        let source = "
            edge(a, b). edge(b, c). edge(c, d).
            path(X, Y) :- edge(X, Y).
            path(X, Z) :- path(X, Y), edge(Y, Z).
            path(a, X)?
        ";
        let strict = Session::with_options(EvalOptions::new().with_max_iterations(1));
        assert_eq!(strict.execute(source).unwrap_err().kind(), ErrorKind::Budget);

        let relaxed = Session::with_options(EvalOptions::new().with_max_iterations(50));
        let execution = relaxed.execute(source).unwrap();
        assert_eq!(execution.answers()[0].bindings.len(), 3);
    }

    #[test]
    fn test_time_budget_covers_query_answering() {
        let mut source: String = (0..40).map(|i| format!("n(c{i}). ")).collect();
        source.push_str("n(A), n(B), n(C), n(D)?");

        let started = std::time::Instant::now();
        let session = Session::with_options(
            EvalOptions::new().with_time_budget(std::time::Duration::from_millis(10)),
        );
        let err = session.execute(&source).unwrap_err();
        assert!(
            matches!(err, Error::EvaluationBudgetExceeded { iterations: 0, .. }),
            "unexpected error: {err:?}"
        );
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_transcript_quotes_constants() {
        let execution = execute(r#"city("New York"). city(boston). city(X)?"#).unwrap();
        assert_eq!(execution.transcript(), "city(X)?\nX: \"New York\"\nX: boston\n\n");
    }

    #[test]
    fn test_inspect_and_fixpoint_views() {
        let execution = execute(DEFAULT_PROGRAM).unwrap();
        let inspection = execution.inspect();
        assert_eq!(inspection.facts.len(), 1);
        assert_eq!(inspection.facts[0].key, "parent/2");
        let rule_keys: Vec<&str> = inspection.rules.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(rule_keys, vec!["ancestor/2", "child/2", "sibling/2"]);

        let fixpoint = execution.fixpoint();
        assert!(fixpoint.contains(&crate::term::Expr::fact("ancestor", ["alice", "carol"])));
        assert!(!fixpoint.contains(&crate::term::Expr::fact("ancestor", ["carol", "alice"])));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_json_report() {
        let execution = execute("p(a). p(b). p(X)? p(c)?").unwrap();
        let json: serde_json::Value = serde_json::from_str(&execution.to_json().unwrap()).unwrap();

        assert_eq!(json["answers"][0]["query"], "p(X)?");
        assert_eq!(json["answers"][0]["bindings"][1]["X"], "b");
        assert_eq!(json["answers"][1]["bindings"].as_array().map(Vec::len), Some(0));
        assert_eq!(json["program"]["facts"][0]["key"], "p/1");
        assert_eq!(json["facts"], 2);
    }
}
