//! Running executions off the async executor.
//!
//! Evaluation is CPU-bound and never yields, so these helpers move it to
//! tokio's blocking pool.

use futures::future::join_all;
use log::warn;

use crate::error::{Error, Result};
use crate::session::{Execution, Session};

impl Session {
    /// Like [`Session::execute`], on the blocking pool.
    ///
    /// # Errors
    ///
    /// Anything [`Session::execute`] returns, or [`Error::Cancelled`] if the
    /// task panicked or was aborted.
    pub async fn execute_async(&self, source: impl Into<String>) -> Result<Execution> {
        let session = *self;
        let source = source.into();
        tokio::task::spawn_blocking(move || session.execute(&source))
            .await
            .map_err(|err| {
                warn!("execution task failed: {err}");
                Error::Cancelled {
                    reason: err.to_string(),
                }
            })?
    }

    /// Runs independent programs concurrently; results keep input order.
    pub async fn execute_all<I, S>(&self, sources: I) -> Vec<Result<Execution>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        join_all(sources.into_iter().map(|source| self.execute_async(source))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EvalOptions;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_execute_async_matches_sync() {
        let source = "edge(a, b). edge(b, c). path(X, Y) :- edge(X, Y). path(X, Z) :- path(X, Y), edge(Y, Z). path(a, X)?";
        let session = Session::new();
        let sync = session.execute(source).unwrap();
        let spawned = session.execute_async(source).await.unwrap();
        assert_eq!(sync.answers(), spawned.answers());
    }

    #[tokio::test]
    async fn test_execute_all_keeps_order_and_errors() {
        let session = Session::with_options(EvalOptions::new().with_max_iterations(10));
        let results = session
            .execute_all(["p(a). p(X)?", "p(X) :- q(Y).", "q(b). q(X)?"])
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().answers()[0].bindings[0].get("X"), Some("a"));
        assert_eq!(results[1].as_ref().unwrap_err().kind(), ErrorKind::Safety);
        assert_eq!(results[2].as_ref().unwrap().answers()[0].bindings[0].get("X"), Some("b"));
    }
}
