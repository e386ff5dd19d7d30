//! Most-general unifiers over flat expressions.
//!
//! A [`Substitution`] built by [`unify`] is kept in solved form: no bound
//! value mentions a variable of its own domain, so applying it once fully
//! resolves an expression and applying it again changes nothing.

use std::fmt;

use indexmap::IndexMap;

use crate::term::{Expr, Term, ANONYMOUS};

/// Variable-to-term bindings, in binding order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitution {
    bindings: IndexMap<String, Term>,
}

impl Substitution {
    /// The empty substitution.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bound variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// True if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// What `var` is bound to.
    #[must_use]
    pub fn get(&self, var: &str) -> Option<&Term> {
        self.bindings.get(var)
    }

    /// The constant `var` is bound to, if any.
    #[must_use]
    pub fn constant(&self, var: &str) -> Option<&str> {
        self.get(var).and_then(Term::as_constant)
    }

    /// Iterates bindings in the order they were made.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Binds a variable to a term, keeping the substitution in solved form.
    ///
    /// `term` must already be resolved under `self`.
    fn bind(&mut self, var: &str, term: Term) {
        if term.as_variable() == Some(var) {
            return;
        }
        for value in self.bindings.values_mut() {
            if value.as_variable() == Some(var) {
                *value = term.clone();
            }
        }
        self.bindings.insert(var.to_string(), term);
    }

    /// Replaces a bound variable by its value, leaving anything else as-is.
    #[must_use]
    pub fn apply_term(&self, term: &Term) -> Term {
        match term {
            Term::Variable(var) => self.get(var).cloned().unwrap_or_else(|| term.clone()),
            Term::Constant(_) => term.clone(),
        }
    }

    /// Replaces every bound variable of `expr` by its value.
    #[must_use]
    pub fn apply(&self, expr: &Expr) -> Expr {
        Expr {
            predicate: expr.predicate.clone(),
            terms: expr.terms.iter().map(|t| self.apply_term(t)).collect(),
        }
    }

    /// Instantiates `expr` into a fact tuple; `None` if any argument stays unbound.
    #[must_use]
    pub fn ground(&self, expr: &Expr) -> Option<Vec<String>> {
        expr.terms
            .iter()
            .map(|term| match term {
                Term::Constant(value) => Some(value.clone()),
                Term::Variable(var) => self.constant(var).map(str::to_string),
            })
            .collect()
    }

    /// `self` followed by `other`: applying the result equals applying
    /// `self` and then `other`.
    #[must_use]
    pub fn compose(&self, other: &Substitution) -> Substitution {
        let mut bindings = IndexMap::with_capacity(self.len() + other.len());
        for (var, term) in &self.bindings {
            let term = other.apply_term(term);
            if term.as_variable() != Some(var.as_str()) {
                bindings.insert(var.clone(), term);
            }
        }
        for (var, term) in &other.bindings {
            if !self.bindings.contains_key(var) {
                bindings.insert(var.clone(), term.clone());
            }
        }
        Substitution { bindings }
    }

    /// Unifies two terms under `self`, extending it; false on a clash.
    fn unify_term(&mut self, left: &Term, right: &Term) -> bool {
        if left.is_anonymous() || right.is_anonymous() {
            return true;
        }
        match (self.apply_term(left), self.apply_term(right)) {
            (Term::Constant(l), Term::Constant(r)) => l == r,
            (Term::Variable(l), Term::Variable(r)) if l == r => true,
            (Term::Variable(var), term) | (term, Term::Variable(var)) => {
                self.bind(&var, term);
                true
            }
        }
    }

    /// Matches `expr` against a ground tuple under `self`.
    ///
    /// This is the join step of rule evaluation: the tuple is assumed to
    /// belong to `expr`'s predicate.
    #[must_use]
    pub fn match_tuple(&self, expr: &Expr, tuple: &[String]) -> Option<Substitution> {
        if expr.terms.len() != tuple.len() {
            return None;
        }
        let mut extended = self.clone();
        for (term, value) in expr.terms.iter().zip(tuple) {
            match term {
                Term::Constant(c) => {
                    if c != value {
                        return None;
                    }
                }
                Term::Variable(var) if var == ANONYMOUS => {}
                Term::Variable(var) => match extended.get(var) {
                    Some(Term::Constant(bound)) => {
                        if bound != value {
                            return None;
                        }
                    }
                    _ => {
                        if !extended.unify_term(term, &Term::Constant(value.clone())) {
                            return None;
                        }
                    }
                },
            }
        }
        Some(extended)
    }
}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (var, term)) in self.bindings.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{var} -> {term}")?;
        }
        f.write_str("}")
    }
}

/// Most-general unifier of two expressions, if they unify.
///
/// Expressions unify only when predicate name and arity agree.
#[must_use]
pub fn unify(left: &Expr, right: &Expr) -> Option<Substitution> {
    unify_with(left, right, &Substitution::new())
}

/// Like [`unify`], extending an existing substitution.
#[must_use]
pub fn unify_with(left: &Expr, right: &Expr, subst: &Substitution) -> Option<Substitution> {
    if left.predicate != right.predicate || left.arity() != right.arity() {
        return None;
    }
    let mut subst = subst.clone();
    left.terms
        .iter()
        .zip(&right.terms)
        .all(|(l, r)| subst.unify_term(l, r))
        .then_some(subst)
}
