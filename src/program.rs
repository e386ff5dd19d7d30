//! The validated, immutable parse result.
//!
//! Building a [`Program`] is where range restriction and stratification are
//! enforced, so nothing downstream ever sees an unsafe rule.

use indexmap::{IndexMap, IndexSet};
use log::debug;

use crate::error::{Error, Result};
use crate::parser::Clause;
use crate::term::{Expr, Literal, PredicateKey, Query, Rule, Term, ANONYMOUS};

/// Facts (EDB), rules grouped by head (IDB), and queries of one program.
#[derive(Debug, Clone, Default)]
pub struct Program {
    facts: IndexSet<Expr>,
    idb: IndexMap<PredicateKey, Vec<Rule>>,
    queries: Vec<Query>,
    strata: Vec<Vec<PredicateKey>>,
}

/// One `name/arity` group of the inspector view.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PredicateGroup {
    /// `name/arity`
    pub key: String,
    /// Canonical text of each member, in source order
    pub entries: Vec<String>,
}

/// Read-only projection of a program for display.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Inspection {
    /// EDB facts grouped and sorted by `name/arity`
    pub facts: Vec<PredicateGroup>,
    /// IDB rules grouped and sorted by head `name/arity`
    pub rules: Vec<PredicateGroup>,
}

impl Program {
    /// Classifies and validates parsed clauses.
    ///
    /// # Errors
    ///
    /// [`Error::UnsafeRule`] or [`Error::NotStratifiable`].
    pub fn from_clauses(clauses: Vec<Clause>) -> Result<Self> {
        let mut facts = Vec::new();
        let mut rules = Vec::new();
        let mut queries = Vec::new();
        for clause in clauses {
            match clause {
                Clause::Fact(expr) => facts.push(expr),
                Clause::Rule(rule) => rules.push(rule),
                Clause::Query(query) => queries.push(query),
            }
        }
        Self::from_parts(facts, rules, queries)
    }

    /// Builds a program from already separated facts, rules and queries.
    ///
    /// # Errors
    ///
    /// [`Error::UnsafeRule`] or [`Error::NotStratifiable`].
    pub fn from_parts(facts: Vec<Expr>, rules: Vec<Rule>, queries: Vec<Query>) -> Result<Self> {
        for fact in &facts {
            if let Some(var) = fact.terms.iter().find_map(Term::as_variable) {
                return Err(Error::unsafe_rule(format!("{fact}."), var));
            }
        }
        for rule in &rules {
            check_rule(rule)?;
        }
        for query in &queries {
            check_body(&query.body, query)?;
        }

        let mut idb: IndexMap<PredicateKey, Vec<Rule>> = IndexMap::new();
        for rule in rules {
            idb.entry(rule.head.key()).or_default().push(rule);
        }
        let strata = stratify(&idb)?;

        let program = Self {
            facts: facts.into_iter().collect(),
            idb,
            queries,
            strata,
        };
        debug!(
            "program: {} facts, {} rules over {} predicates, {} queries, {} strata",
            program.facts.len(),
            program.rule_count(),
            program.idb.len(),
            program.queries.len(),
            program.strata.len()
        );
        Ok(program)
    }

    /// Explicit facts, in source order, duplicates removed.
    pub fn facts(&self) -> impl Iterator<Item = &Expr> {
        self.facts.iter()
    }

    /// Rules grouped by head predicate, groups in first-appearance order.
    #[must_use]
    pub fn idb(&self) -> &IndexMap<PredicateKey, Vec<Rule>> {
        &self.idb
    }

    /// Rules whose head is `key`.
    #[must_use]
    pub fn rules_for(&self, key: &PredicateKey) -> &[Rule] {
        self.idb.get(key).map_or(&[], Vec::as_slice)
    }

    /// All rules.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.idb.values().flatten()
    }

    /// Total number of rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.idb.values().map(Vec::len).sum()
    }

    /// Queries in submission order.
    #[must_use]
    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    /// IDB predicates grouped into evaluation strata, lowest first.
    ///
    /// Every predicate a stratum negates is complete before that stratum runs.
    #[must_use]
    pub fn strata(&self) -> &[Vec<PredicateKey>] {
        &self.strata
    }

    /// Groups facts and rules by `name/arity` for display.
    #[must_use]
    pub fn inspect(&self) -> Inspection {
        let mut facts: IndexMap<String, Vec<String>> = IndexMap::new();
        for fact in &self.facts {
            facts
                .entry(fact.key().to_string())
                .or_default()
                .push(fact.to_string());
        }
        let rules = self
            .idb
            .iter()
            .map(|(key, rules)| (key.to_string(), rules.iter().map(ToString::to_string).collect()))
            .collect();

        Inspection {
            facts: sorted_groups(facts),
            rules: sorted_groups(rules),
        }
    }
}

fn sorted_groups(groups: IndexMap<String, Vec<String>>) -> Vec<PredicateGroup> {
    let mut groups: Vec<PredicateGroup> = groups
        .into_iter()
        .map(|(key, entries)| PredicateGroup { key, entries })
        .collect();
    groups.sort_by(|a, b| a.key.cmp(&b.key));
    groups
}

fn check_rule(rule: &Rule) -> Result<()> {
    let bound = check_body(&rule.body, rule)?;
    for term in &rule.head.terms {
        if let Some(var) = term.as_variable() {
            if var == ANONYMOUS || !bound.contains(var) {
                return Err(Error::unsafe_rule(rule, var));
            }
        }
    }
    Ok(())
}

/// Checks that negated and compared variables are bound by a positive
/// literal, returning the bound variables.
pub(crate) fn check_body<'a>(body: &'a [Literal], clause: &dyn std::fmt::Display) -> Result<IndexSet<&'a str>> {
    let bound: IndexSet<&str> = body
        .iter()
        .filter_map(Literal::as_positive)
        .flat_map(Expr::variables)
        .collect();

    for literal in body {
        match literal {
            Literal::Positive(_) => {}
            Literal::Negative(expr) => {
                if let Some(var) = expr.variables().find(|v| !bound.contains(v)) {
                    return Err(Error::unsafe_rule(clause, var));
                }
            }
            Literal::Compare { left, right, .. } => {
                for term in [left, right] {
                    if let Some(var) = term.as_variable() {
                        if var == ANONYMOUS || !bound.contains(var) {
                            return Err(Error::unsafe_rule(clause, var));
                        }
                    }
                }
            }
        }
    }
    Ok(bound)
}

/// Assigns each IDB predicate the lowest stratum above everything it
/// negates and at or above everything it uses.
fn stratify(idb: &IndexMap<PredicateKey, Vec<Rule>>) -> Result<Vec<Vec<PredicateKey>>> {
    let mut level: IndexMap<&PredicateKey, usize> = idb.keys().map(|k| (k, 0)).collect();
    let limit = idb.len();

    let mut changed = true;
    while changed {
        changed = false;
        for (head, rules) in idb {
            for literal in rules.iter().flat_map(|r| &r.body) {
                let (expr, step) = match literal {
                    Literal::Positive(expr) => (expr, 0),
                    Literal::Negative(expr) => (expr, 1),
                    Literal::Compare { .. } => continue,
                };
                let Some(&dependency) = level.get(&expr.key()) else {
                    continue;
                };
                let required = dependency + step;
                if required > level[head] {
                    if required > limit {
                        return Err(Error::NotStratifiable {
                            predicate: head.to_string(),
                        });
                    }
                    level.insert(head, required);
                    changed = true;
                }
            }
        }
    }

    let height = level.values().copied().max().map_or(0, |max| max + 1);
    let mut strata = vec![Vec::new(); height];
    for (key, stratum) in level {
        strata[stratum].push(key.clone());
    }
    strata.retain(|s: &Vec<PredicateKey>| !s.is_empty());
    Ok(strata)
}
