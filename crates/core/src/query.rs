use crate::label::Label;
use crate::models::RawRuleRecord;
use std::future::Future;

/// Runs a query expression against the build tool.
///
/// The returned futures are `Send` so callers can drive them from a
/// multi-threaded runtime.
pub trait QueryExecutor {
    /// Every rule record the expression produced, in one piece. Any error
    /// reported by the build tool, including a package that does not exist,
    /// fails the call.
    fn execute(
        &self,
        expression: &str,
    ) -> impl Future<Output = anyhow::Result<Vec<RawRuleRecord>>> + Send;

    /// Package listing variant of [`Self::execute`]. Patterns naming a
    /// package that does not exist contribute nothing (Bazel `--keep_going`,
    /// exit code 3) and the rules of every other package are returned. Any
    /// other failure is still an error.
    fn execute_keep_going(
        &self,
        expression: &str,
    ) -> impl Future<Output = anyhow::Result<Vec<RawRuleRecord>>> + Send {
        self.execute(expression)
    }
}

impl<T> QueryExecutor for &T
where
    T: QueryExecutor + Sync,
{
    fn execute(
        &self,
        expression: &str,
    ) -> impl Future<Output = anyhow::Result<Vec<RawRuleRecord>>> + Send {
        (**self).execute(expression)
    }

    fn execute_keep_going(
        &self,
        expression: &str,
    ) -> impl Future<Output = anyhow::Result<Vec<RawRuleRecord>>> + Send {
        (**self).execute_keep_going(expression)
    }
}

pub fn join_query_expressions<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts
        .into_iter()
        .map(|p| p.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(" + ")
}

/// Every rule declared directly in one of `packages` (`[@repo]//pkg` form).
pub fn package_rules_expression<I, S>(packages: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    join_query_expressions(
        packages
            .into_iter()
            .map(|pkg| format!("kind(rule, {}:all)", pkg.as_ref())),
    )
}

/// The suite itself plus every rule named in its `tests` attribute.
pub fn suite_members_expression(suite: &Label) -> String {
    format!("kind(rule, {suite} + labels(tests, {suite}))")
}

/// Every `*_test` rule sharing the suite's package, regardless of tags.
pub fn package_tests_expression(suite: &Label) -> String {
    format!("kind(\".*_test rule\", {})", suite.package_wildcard())
}
