use std::time::{Duration, Instant};

use indexmap::{IndexMap, IndexSet};
use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::program::{PredicateGroup, Program};
use crate::term::{Comparison, Expr, Literal, PredicateKey, Rule, Term};
use crate::unify::Substitution;

/// A ground fact as stored: the argument values of one predicate.
pub type Tuple = Vec<String>;

/// Limits on a single fixpoint computation. The default is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EvalOptions {
    /// Maximum number of fixpoint rounds, summed over all strata
    pub max_iterations: Option<usize>,
    /// Maximum wall time spent evaluating
    pub time_budget: Option<Duration>,
}

impl EvalOptions {
    /// Unbounded evaluation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of fixpoint rounds.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Caps the wall time spent evaluating.
    #[must_use]
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }
}

/// Wall-clock limit of one request, shared by evaluation and query answering.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

/// A join stopped because its deadline passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Expired;

impl Deadline {
    /// Starts the clock for `options.time_budget`.
    pub(crate) fn start(options: &EvalOptions) -> Self {
        Self {
            started: Instant::now(),
            budget: options.time_budget,
        }
    }

    pub(crate) fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            budget: None,
        }
    }

    pub(crate) fn check(&self) -> std::result::Result<(), Expired> {
        match self.budget {
            Some(budget) if self.started.elapsed() > budget => Err(Expired),
            _ => Ok(()),
        }
    }

    /// The budget failure reported after `iterations` rounds.
    pub(crate) fn exceeded(&self, iterations: usize) -> Error {
        let elapsed = self.started.elapsed();
        warn!("evaluation budget exceeded after {iterations} iterations ({elapsed:?})");
        Error::EvaluationBudgetExceeded { iterations, elapsed }
    }
}

/// Index for fast fact lookup by argument position and value
#[derive(Debug, Clone, Default)]
struct PredicateIndex {
    /// For each argument position, maps values to the ids of the tuples
    /// holding that value there.
    /// For `edge(a,b), edge(a,c), edge(b,c)` stored as ids 0, 1, 2:
    /// - Position 0 index: `{"a" -> [0, 1], "b" -> [2]}`
    /// - Position 1 index: `{"b" -> [0], "c" -> [1, 2]}`
    by_position: Vec<IndexMap<String, Vec<usize>>>,
}

impl PredicateIndex {
    fn new(arity: usize) -> Self {
        Self {
            by_position: (0..arity).map(|_| IndexMap::new()).collect(),
        }
    }

    fn add_fact(&mut self, id: usize, fact: &[String]) {
        for (pos, value) in fact.iter().enumerate() {
            self.by_position[pos]
                .entry(value.clone())
                .or_default()
                .push(id);
        }
    }

    /// Ids of tuples with `value` at `position`
    fn get_facts_by_position(&self, position: usize, value: &str) -> &[usize] {
        self.by_position
            .get(position)
            .and_then(|pos_map| pos_map.get(value))
            .map_or(&[], Vec::as_slice)
    }
}

/// All tuples of one `name/arity`, with their index.
#[derive(Debug, Clone)]
struct Relation {
    tuples: IndexSet<Tuple>,
    index: PredicateIndex,
}

impl Relation {
    fn new(arity: usize) -> Self {
        Self {
            tuples: IndexSet::new(),
            index: PredicateIndex::new(arity),
        }
    }

    fn insert(&mut self, tuple: Tuple) -> bool {
        let (id, inserted) = self.tuples.insert_full(tuple);
        if inserted {
            self.index.add_fact(id, &self.tuples[id]);
        }
        inserted
    }
}

/// Tuples that may match a pattern, in insertion order.
#[derive(Debug)]
pub(crate) enum Candidates<'a> {
    All(indexmap::set::Iter<'a, Tuple>),
    Indexed {
        tuples: &'a IndexSet<Tuple>,
        ids: std::slice::Iter<'a, usize>,
    },
    Empty,
}

impl<'a> Iterator for Candidates<'a> {
    type Item = &'a Tuple;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::All(iter) => iter.next(),
            Self::Indexed { tuples, ids } => ids.next().and_then(|&id| tuples.get_index(id)),
            Self::Empty => None,
        }
    }
}

/// Monotone set of ground facts, keyed by `name/arity`.
#[derive(Debug, Clone, Default)]
pub(crate) struct FactStore {
    relations: IndexMap<PredicateKey, Relation>,
    len: usize,
}

impl FactStore {
    /// Adds a fact, returning true if it was not already present.
    pub(crate) fn insert(&mut self, key: &PredicateKey, tuple: Tuple) -> bool {
        let inserted = match self.relations.get_mut(key) {
            Some(relation) => relation.insert(tuple),
            None => {
                let mut relation = Relation::new(key.arity);
                relation.insert(tuple);
                self.relations.insert(key.clone(), relation);
                true
            }
        };
        self.len += usize::from(inserted);
        inserted
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn contains_key(&self, key: &PredicateKey) -> bool {
        self.relations.contains_key(key)
    }

    pub(crate) fn contains(&self, key: &PredicateKey, tuple: &[String]) -> bool {
        self.relations
            .get(key)
            .is_some_and(|r| r.tuples.contains(tuple))
    }

    pub(crate) fn tuples(&self, key: &PredicateKey) -> impl Iterator<Item = &Tuple> {
        self.relations.get(key).into_iter().flat_map(|r| r.tuples.iter())
    }

    pub(crate) fn relations(&self) -> impl Iterator<Item = (&PredicateKey, &IndexSet<Tuple>)> {
        self.relations.iter().map(|(k, r)| (k, &r.tuples))
    }

    /// Narrows the tuples of `key` using the most selective index:
    /// - Collects the argument positions whose value is known (a constant,
    ///   or a variable bound by `subst`)
    /// - Picks the smallest index bucket among them
    /// - Falls back to every tuple when no position is known
    pub(crate) fn candidates(
        &self,
        key: &PredicateKey,
        expr: &Expr,
        subst: &Substitution,
    ) -> Candidates<'_> {
        let Some(relation) = self.relations.get(key) else {
            return Candidates::Empty;
        };

        let mut best: Option<&[usize]> = None;
        for (pos, term) in expr.terms.iter().enumerate() {
            let value = match term {
                Term::Constant(value) => Some(value.as_str()),
                Term::Variable(var) => subst.constant(var),
            };
            if let Some(value) = value {
                let ids = relation.index.get_facts_by_position(pos, value);
                if ids.is_empty() {
                    return Candidates::Empty;
                }
                if best.map_or(true, |b| ids.len() < b.len()) {
                    best = Some(ids);
                }
            }
        }

        match best {
            Some(ids) => Candidates::Indexed {
                tuples: &relation.tuples,
                ids: ids.iter(),
            },
            None => Candidates::All(relation.tuples.iter()),
        }
    }
}

/// One step of a conjunctive join.
#[derive(Debug, Clone)]
enum Step {
    /// Join with the tuples of a positive literal; `ordinal` counts scans.
    Scan {
        ordinal: usize,
        key: PredicateKey,
        expr: Expr,
    },
    /// Drop substitutions under which the expression is a known fact.
    Exclude { key: PredicateKey, expr: Expr },
    /// Drop substitutions under which the comparison fails.
    Filter {
        op: Comparison,
        left: Term,
        right: Term,
    },
}

/// Body literals in evaluation order.
///
/// Positive literals bind variables left to right. Each negation or
/// comparison runs right after the shortest prefix of positive literals
/// that binds all of its variables.
#[derive(Debug, Clone)]
pub(crate) struct JoinPlan {
    steps: Vec<Step>,
    scanned: Vec<PredicateKey>,
}

impl JoinPlan {
    pub(crate) fn new(body: &[Literal]) -> Self {
        let mut steps = Vec::with_capacity(body.len());
        let mut scanned = Vec::new();
        let mut bound: IndexSet<&str> = IndexSet::new();
        let mut pending: Vec<&Literal> = body
            .iter()
            .filter(|l| l.as_positive().is_none())
            .collect();

        schedule(&mut pending, &bound, &mut steps);
        for expr in body.iter().filter_map(Literal::as_positive) {
            let key = expr.key();
            steps.push(Step::Scan {
                ordinal: scanned.len(),
                key: key.clone(),
                expr: expr.clone(),
            });
            scanned.push(key);
            bound.extend(expr.variables());
            schedule(&mut pending, &bound, &mut steps);
        }
        // Only reachable for programs that skipped validation.
        steps.extend(pending.into_iter().filter_map(Step::constraint));

        Self { steps, scanned }
    }

    /// Keys of the positive literals, in scan order.
    pub(crate) fn scanned(&self) -> &[PredicateKey] {
        &self.scanned
    }

    /// Runs the join depth first, handing each satisfying substitution to
    /// `emit`. When `delta` is `Some((ordinal, store))` that scan reads only
    /// from `store`; every other step reads from `facts`.
    ///
    /// The deadline is checked every `CHECK_INTERVAL` candidate tuples.
    pub(crate) fn solve(
        &self,
        facts: &FactStore,
        delta: Option<(usize, &FactStore)>,
        deadline: &Deadline,
        emit: &mut dyn FnMut(&Substitution),
    ) -> std::result::Result<(), Expired> {
        let mut join = Join {
            plan: self,
            facts,
            delta,
            deadline,
            emit,
            visited: 0,
        };
        join.descend(0, &Substitution::new())
    }
}

/// Candidate tuples visited between two deadline checks.
const CHECK_INTERVAL: usize = 1024;

/// One running join; holds a single substitution per step.
struct Join<'a, 'e> {
    plan: &'a JoinPlan,
    facts: &'a FactStore,
    delta: Option<(usize, &'a FactStore)>,
    deadline: &'a Deadline,
    emit: &'e mut dyn FnMut(&Substitution),
    visited: usize,
}

impl Join<'_, '_> {
    fn descend(&mut self, depth: usize, subst: &Substitution) -> std::result::Result<(), Expired> {
        let plan = self.plan;
        let Some(step) = plan.steps.get(depth) else {
            (self.emit)(subst);
            return Ok(());
        };
        match step {
            Step::Scan { ordinal, key, expr } => {
                let store = match self.delta {
                    Some((target, store)) if target == *ordinal => store,
                    _ => self.facts,
                };
                for tuple in store.candidates(key, expr, subst) {
                    self.visited += 1;
                    if self.visited % CHECK_INTERVAL == 0 {
                        self.deadline.check()?;
                    }
                    if let Some(next) = subst.match_tuple(expr, tuple) {
                        self.descend(depth + 1, &next)?;
                    }
                }
                Ok(())
            }
            Step::Exclude { key, expr } => {
                let known = self
                    .facts
                    .candidates(key, expr, subst)
                    .any(|tuple| subst.match_tuple(expr, tuple).is_some());
                if known {
                    Ok(())
                } else {
                    self.descend(depth + 1, subst)
                }
            }
            Step::Filter { op, left, right } => match (resolve(subst, left), resolve(subst, right)) {
                (Some(l), Some(r)) if op.holds(l, r) => self.descend(depth + 1, subst),
                _ => Ok(()),
            },
        }
    }
}

impl Step {
    /// The filter step for a negation or comparison; positive literals are
    /// scans and have none.
    fn constraint(literal: &Literal) -> Option<Self> {
        match literal {
            Literal::Positive(_) => None,
            Literal::Negative(expr) => Some(Self::Exclude {
                key: expr.key(),
                expr: expr.clone(),
            }),
            Literal::Compare { op, left, right } => Some(Self::Filter {
                op: *op,
                left: left.clone(),
                right: right.clone(),
            }),
        }
    }
}

/// Moves every pending constraint whose variables are all bound into `steps`.
fn schedule<'a>(pending: &mut Vec<&'a Literal>, bound: &IndexSet<&'a str>, steps: &mut Vec<Step>) {
    pending.retain(|literal| {
        if literal.variables().iter().all(|v| bound.contains(*v)) {
            steps.extend(Step::constraint(literal));
            false
        } else {
            true
        }
    });
}

fn resolve<'a>(subst: &'a Substitution, term: &'a Term) -> Option<&'a str> {
    match term {
        Term::Constant(value) => Some(value.as_str()),
        Term::Variable(var) => subst.constant(var),
    }
}

/// A rule ready for evaluation.
#[derive(Debug, Clone)]
struct CompiledRule {
    head: Expr,
    head_key: PredicateKey,
    plan: JoinPlan,
}

impl CompiledRule {
    fn new(rule: &Rule) -> Self {
        Self {
            head: rule.head.clone(),
            head_key: rule.head.key(),
            plan: JoinPlan::new(&rule.body),
        }
    }

    /// Head instances for every satisfying substitution.
    fn derive(
        &self,
        facts: &FactStore,
        delta: Option<(usize, &FactStore)>,
        deadline: &Deadline,
    ) -> std::result::Result<Vec<Tuple>, Expired> {
        let mut derived = Vec::new();
        self.plan.solve(facts, delta, deadline, &mut |subst| {
            if let Some(tuple) = subst.ground(&self.head) {
                derived.push(tuple);
            }
        })?;
        Ok(derived)
    }
}

/// The least fixpoint of a program: its facts plus everything its rules derive.
#[derive(Debug, Clone, Default)]
pub struct Fixpoint {
    facts: FactStore,
    explicit: usize,
    iterations: usize,
    round_sizes: Vec<usize>,
}

impl Fixpoint {
    /// Runs stratified semi-naive evaluation to fixed point.
    ///
    /// - Strata run lowest first, so every negated predicate is complete
    ///   before it is read
    /// - First round of a stratum: every rule over all known facts (naive)
    /// - Later rounds: a rule runs once per body literal whose predicate
    ///   gained facts in the previous round, with that literal reading only
    ///   the new facts
    /// - A stratum ends when a round derives nothing new
    ///
    /// ## Example
    ///
    /// For `ancestor(X, Y) :- ancestor(X, Z), parent(Z, Y)`:
    /// - Round 1: derive `ancestor(a, b)` from `parent(a, b)` via the base rule
    /// - Round 2: only joins where the `ancestor` literal uses a fact new in
    ///   round 1 are considered
    ///
    /// # Errors
    ///
    /// [`Error::EvaluationBudgetExceeded`] if `options` sets a budget that
    /// runs out first.
    pub fn compute(program: &Program, options: &EvalOptions) -> Result<Self> {
        Self::compute_until(program, options, Deadline::start(options))
    }

    pub(crate) fn compute_until(program: &Program, options: &EvalOptions, deadline: Deadline) -> Result<Self> {
        let mut run = Run::new(options, deadline);
        for fact in program.facts() {
            if let Some(values) = fact.ground_values() {
                run.facts.insert(&fact.key(), values);
            }
        }
        let explicit = run.facts.len();

        for (level, stratum) in program.strata().iter().enumerate() {
            let rules = compile(program, stratum);
            debug!("stratum {level}: {} rules", rules.len());
            run.stratum(&rules)?;
        }

        debug!(
            "fixpoint reached after {} iterations: {} facts ({} derived)",
            run.iterations,
            run.facts.len(),
            run.facts.len() - explicit
        );
        Ok(Self {
            facts: run.facts,
            explicit,
            iterations: run.iterations,
            round_sizes: run.round_sizes,
        })
    }

    /// Total number of facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// True if there are no facts at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Number of facts derived by rules (excludes the explicit ones).
    #[must_use]
    pub fn derived_count(&self) -> usize {
        self.facts.len() - self.explicit
    }

    /// Rounds run across all strata.
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Total fact count at the end of each round, one entry per iteration.
    #[must_use]
    pub fn round_sizes(&self) -> &[usize] {
        &self.round_sizes
    }

    /// True if the ground expression is a known fact.
    #[must_use]
    pub fn contains(&self, fact: &Expr) -> bool {
        fact.ground_values()
            .is_some_and(|values| self.facts.contains(&fact.key(), &values))
    }

    /// Get all facts for a predicate, in derivation order
    pub fn facts_for(&self, key: &PredicateKey) -> impl Iterator<Item = &[String]> {
        self.facts.tuples(key).map(Vec::as_slice)
    }

    /// Every fact as an expression.
    pub fn exprs(&self) -> impl Iterator<Item = Expr> + '_ {
        self.facts.relations().flat_map(|(key, tuples)| {
            tuples
                .iter()
                .map(move |tuple| Expr::fact(key.name.clone(), tuple.iter().cloned()))
        })
    }

    /// Every fact grouped and sorted by `name/arity`, in derivation order
    /// within a group.
    #[must_use]
    pub fn groups(&self) -> Vec<PredicateGroup> {
        let mut groups: Vec<PredicateGroup> = self
            .facts
            .relations()
            .map(|(key, tuples)| PredicateGroup {
                key: key.to_string(),
                entries: tuples
                    .iter()
                    .map(|t| Expr::fact(key.name.clone(), t.iter().cloned()).to_string())
                    .collect(),
            })
            .collect();
        groups.sort_by(|a, b| a.key.cmp(&b.key));
        groups
    }

    pub(crate) fn store(&self) -> &FactStore {
        &self.facts
    }
}

fn compile(program: &Program, stratum: &[PredicateKey]) -> Vec<CompiledRule> {
    stratum
        .iter()
        .flat_map(|key| program.rules_for(key))
        .map(CompiledRule::new)
        .collect()
}

/// Mutable state of one evaluation; never visible to callers.
struct Run<'o> {
    facts: FactStore,
    options: &'o EvalOptions,
    deadline: Deadline,
    iterations: usize,
    round_sizes: Vec<usize>,
}

impl<'o> Run<'o> {
    fn new(options: &'o EvalOptions, deadline: Deadline) -> Self {
        Self {
            facts: FactStore::default(),
            options,
            deadline,
            iterations: 0,
            round_sizes: Vec::new(),
        }
    }

    fn stratum(&mut self, rules: &[CompiledRule]) -> Result<()> {
        let mut delta = self.round(rules, None)?;
        while !delta.is_empty() {
            delta = self.round(rules, Some(&delta))?;
        }
        Ok(())
    }

    /// One round; returns the facts it added. Without `previous` every rule
    /// reads all known facts, otherwise one scan at a time reads `previous`.
    fn round(&mut self, rules: &[CompiledRule], previous: Option<&FactStore>) -> Result<FactStore> {
        let mut delta = FactStore::default();
        for rule in rules {
            match previous {
                None => {
                    let derived = self.derive(rule, None)?;
                    self.absorb(rule, derived, &mut delta);
                }
                Some(current) => {
                    for (ordinal, key) in rule.plan.scanned().iter().enumerate() {
                        if !current.contains_key(key) {
                            continue;
                        }
                        trace!("re-evaluating `{}` on new `{key}` facts", rule.head);
                        let derived = self.derive(rule, Some((ordinal, current)))?;
                        self.absorb(rule, derived, &mut delta);
                    }
                }
            }
            self.check_time()?;
        }
        self.finish_round(&delta)?;
        Ok(delta)
    }

    fn derive(&self, rule: &CompiledRule, delta: Option<(usize, &FactStore)>) -> Result<Vec<Tuple>> {
        rule.derive(&self.facts, delta, &self.deadline)
            .map_err(|Expired| self.exceeded())
    }

    fn absorb(&mut self, rule: &CompiledRule, derived: Vec<Tuple>, delta: &mut FactStore) {
        for tuple in derived {
            if self.facts.insert(&rule.head_key, tuple.clone()) {
                delta.insert(&rule.head_key, tuple);
            }
        }
    }

    fn finish_round(&mut self, delta: &FactStore) -> Result<()> {
        self.iterations += 1;
        self.round_sizes.push(self.facts.len());
        debug!("iteration {}: {} new facts", self.iterations, delta.len());
        match self.options.max_iterations {
            Some(max) if !delta.is_empty() && self.iterations >= max => Err(self.exceeded()),
            _ => Ok(()),
        }
    }

    fn check_time(&self) -> Result<()> {
        self.deadline.check().map_err(|Expired| self.exceeded())
    }

    fn exceeded(&self) -> Error {
        self.deadline.exceeded(self.iterations)
    }
}
