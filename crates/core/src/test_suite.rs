//! Expansion of `test_suite` rules into the tests they aggregate.
//!
//! A suite with an explicit `tests` list contains exactly those labels. A
//! suite without one selects tests by tag, which cannot be evaluated here;
//! instead every `*_test` rule in the suite's package is treated as a
//! member. This over-counts on purpose and matches what the build tool
//! reports for such suites.

use crate::error::{Error, Result};
use crate::label::Label;
use crate::models::{RuleGraph, RuleInfo, TEST_SUITE_RULE_TYPE};
use crate::parser::parse_query_records;
use crate::query::{package_tests_expression, suite_members_expression, QueryExecutor};
use std::collections::{BTreeSet, HashSet, VecDeque};
use tracing::{debug, info};

#[derive(Debug)]
pub struct TestSuiteResolver<'a, E> {
    executor: &'a E,
}

#[derive(Debug, Default)]
struct SuiteMembers {
    labels: BTreeSet<Label>,
    nested_suites: Vec<Label>,
}

impl<'a, E> TestSuiteResolver<'a, E>
where
    E: QueryExecutor,
{
    pub fn new(executor: &'a E) -> Self {
        Self { executor }
    }

    /// Resolves `suites` and every suite nested inside them.
    ///
    /// The result holds one entry per suite reached, mapped to its direct
    /// members only; nested suites are not flattened into their parents
    /// (see [`flatten_tests`]). Any failure discards the work done so far.
    pub async fn resolve<I>(&self, suites: I) -> Result<RuleGraph>
    where
        I: IntoIterator<Item = Label>,
    {
        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();
        for suite in suites {
            if visited.insert(suite.clone()) {
                queue.push_back(suite);
            }
        }

        let mut graph = RuleGraph::new();
        while let Some(suite) = queue.pop_front() {
            let members = self.members_of(&suite).await?;
            for nested in members.nested_suites {
                if visited.insert(nested.clone()) {
                    debug!(parent = %suite, suite = %nested, "queueing nested test_suite");
                    queue.push_back(nested);
                }
            }
            graph.insert(
                RuleInfo::new(suite, TEST_SUITE_RULE_TYPE, BTreeSet::new()),
                members.labels,
            );
        }

        info!(suites = graph.len(), "resolved test suites");
        Ok(graph)
    }

    async fn members_of(&self, suite: &Label) -> Result<SuiteMembers> {
        let expression = suite_members_expression(suite);
        let mut rules = self.query(&expression).await?;

        let (info, explicit) = rules.remove_entry(suite).ok_or_else(|| {
            Error::query_parse(format!("`{suite}` did not resolve to a rule"))
        })?;
        if !info.is_test_suite() {
            return Err(Error::query_parse(format!(
                "`{suite}` is a {} rule, expected {TEST_SUITE_RULE_TYPE}",
                info.rule_type()
            )));
        }

        if !explicit.is_empty() {
            let nested_suites = explicit
                .iter()
                .filter(|member| {
                    rules
                        .get_key_value(*member)
                        .is_some_and(|(rule, _)| rule.is_test_suite())
                })
                .cloned()
                .collect();
            debug!(%suite, members = explicit.len(), "test_suite lists explicit tests");
            return Ok(SuiteMembers {
                labels: explicit,
                nested_suites,
            });
        }

        info!(
            %suite,
            "test_suite has no explicit tests; using every *_test rule in its package"
        );
        let expression = package_tests_expression(suite);
        let scanned = self.query(&expression).await?;
        let labels = scanned
            .into_keys()
            .filter(|rule| {
                rule.is_test_rule()
                    && rule.label().package() == suite.package()
                    && rule.label().repository() == suite.repository()
            })
            .map(|rule| rule.label().clone())
            .collect();

        Ok(SuiteMembers {
            labels,
            nested_suites: Vec::new(),
        })
    }

    async fn query(&self, expression: &str) -> Result<RuleGraph> {
        debug!(%expression, "querying test_suite members");
        let records = self
            .executor
            .execute(expression)
            .await
            .map_err(|err| Error::query_execution(expression, err))?;
        parse_query_records(records)
    }
}

/// Walks a resolved suite graph from `roots` and returns every member that
/// is not itself a suite in the graph.
pub fn flatten_tests<'g, I>(graph: &'g RuleGraph, roots: I) -> BTreeSet<Label>
where
    I: IntoIterator<Item = &'g Label>,
{
    let mut tests = BTreeSet::new();
    let mut seen: HashSet<&Label> = HashSet::new();
    let mut stack: Vec<&Label> = roots.into_iter().collect();

    while let Some(label) = stack.pop() {
        if !seen.insert(label) {
            continue;
        }
        match graph.get(label) {
            Some(members) => stack.extend(members.iter()),
            None => {
                tests.insert(label.clone());
            }
        }
    }
    tests
}
