use crate::error::{Error, Result};
use crate::label::{Label, LabelError};
use crate::models::{RuleGraph, RuleInfo};
use crate::parser::parse_query_records;
use crate::query::{package_rules_expression, QueryExecutor};
use crate::test_suite::TestSuiteResolver;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Package-scoped extraction over a [`QueryExecutor`].
#[derive(Debug)]
pub struct GraphExtractor<'a, E> {
    executor: &'a E,
}

impl<'a, E> GraphExtractor<'a, E>
where
    E: QueryExecutor,
{
    pub fn new(executor: &'a E) -> Self {
        Self { executor }
    }

    /// Every rule declared directly inside `packages`, sorted by label.
    pub async fn extract_target_rules_from_packages<I, S>(&self, packages: I) -> Result<Vec<RuleInfo>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let graph = self.extract_rule_graph_from_packages(packages).await?;
        let mut rules: Vec<RuleInfo> = graph.into_keys().collect();
        rules.sort();
        Ok(rules)
    }

    /// Like [`Self::extract_target_rules_from_packages`], keeping each rule's
    /// direct dependencies.
    pub async fn extract_rule_graph_from_packages<I, S>(&self, packages: I) -> Result<RuleGraph>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let packages = packages
            .into_iter()
            .map(|pkg| normalize_package(pkg.as_ref()))
            .collect::<Result<BTreeSet<String>, LabelError>>()?;
        if packages.is_empty() {
            return Ok(RuleGraph::new());
        }

        let expression = package_rules_expression(&packages);
        debug!(%expression, "querying package rules");
        let records = self
            .executor
            .execute_keep_going(&expression)
            .await
            .map_err(|err| Error::query_execution(&expression, err))?;

        let mut graph = parse_query_records(records)?;
        let reported = graph.len();
        graph.retain(|rule, _| {
            let inside = packages.contains(&package_key(rule.label()));
            if !inside {
                debug!(label = %rule.label(), "dropping rule outside the requested packages");
            }
            inside
        });
        if reported > 0 && graph.is_empty() {
            // Usually a repository spelled differently from Bazel's own
            // report, e.g. `@ext` requested and `@@ext+` returned.
            warn!(
                reported,
                packages = ?packages,
                "every rule the query returned lies outside the requested packages"
            );
        }

        info!(
            packages = packages.len(),
            rules = graph.len(),
            "extracted package rules"
        );
        Ok(graph)
    }

    /// Expands `suites` through [`TestSuiteResolver`].
    pub async fn extract_test_suite_rules<I>(&self, suites: I) -> Result<RuleGraph>
    where
        I: IntoIterator<Item = Label>,
    {
        TestSuiteResolver::new(self.executor).resolve(suites).await
    }
}

/// Accepts `pkg/path`, `//pkg/path` or `@repo//pkg/path` and returns the
/// `//`-prefixed form.
fn normalize_package(raw: &str) -> Result<String, LabelError> {
    let reject = |reason| LabelError::Malformed {
        input: raw.to_string(),
        reason,
    };

    if raw.contains(':') {
        return Err(reject("package path must not name a target"));
    }
    let qualified = if raw.starts_with("//") || raw.starts_with('@') {
        raw.to_string()
    } else {
        format!("//{raw}")
    };

    let probe = Label::parse(&format!("{qualified}:all")).map_err(|err| match err {
        LabelError::Malformed { reason, .. } => reject(reason),
    })?;
    Ok(package_key(&probe))
}

fn package_key(label: &Label) -> String {
    format!("{}//{}", label.repository(), label.package())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawRuleRecord;
    use crate::testing::{capture_logs, ScriptedExecutor};
    use tracing::instrument::WithSubscriber;

    fn label(raw: &str) -> Label {
        Label::parse(raw).unwrap()
    }

    fn simple_package_records() -> Vec<RawRuleRecord> {
        vec![
            RawRuleRecord::new("//tulsi_test:Application", "ios_application"),
            RawRuleRecord::new("//tulsi_test:Binary", "objc_binary"),
            RawRuleRecord::new("//tulsi_test:Library", "objc_library"),
            RawRuleRecord::new("//tulsi_test:XCTest", "ios_test")
                .with_linked_targets(["//tulsi_test:Application"]),
            RawRuleRecord::new("//tulsi_test:XCTestWithDefaultHost", "ios_test"),
            // The query tool may repeat rules reachable through several paths.
            RawRuleRecord::new("//tulsi_test:Library", "objc_library"),
            RawRuleRecord::new("//tulsi_test:XCTest", "ios_test")
                .with_linked_targets(["//tulsi_test:Application"]),
        ]
    }

    #[tokio::test]
    async fn simple_package_yields_one_rule_per_label() {
        let executor = ScriptedExecutor::new()
            .respond("kind(rule, //tulsi_test:all)", simple_package_records());
        let extractor = GraphExtractor::new(&executor);

        let rules = extractor
            .extract_target_rules_from_packages(["tulsi_test"])
            .await
            .unwrap();
        assert_eq!(rules.len(), 5);

        let xctest = rules
            .iter()
            .find(|r| r.label() == &label("//tulsi_test:XCTest"))
            .unwrap();
        assert_eq!(xctest.rule_type(), "ios_test");
        assert_eq!(
            xctest.linked_target_labels(),
            &BTreeSet::from([label("//tulsi_test:Application")])
        );

        let default_host = rules
            .iter()
            .find(|r| r.label() == &label("//tulsi_test:XCTestWithDefaultHost"))
            .unwrap();
        assert!(default_host.linked_target_labels().is_empty());

        let app = rules
            .iter()
            .find(|r| r.label() == &label("//tulsi_test:Application"))
            .unwrap();
        assert_eq!(app.rule_type(), "ios_application");
        assert!(app.linked_target_labels().is_empty());
    }

    #[tokio::test]
    async fn dependency_aware_form_keeps_edges() {
        let executor = ScriptedExecutor::new().respond(
            "kind(rule, //pkg:all)",
            vec![
                RawRuleRecord::new("//pkg:App", "ios_application").with_dependencies(["//pkg:Lib"]),
                RawRuleRecord::new("//pkg:Lib", "objc_library"),
                RawRuleRecord::new("//pkg:XCTest", "ios_test").with_linked_targets(["//pkg:App"]),
            ],
        );

        let graph = GraphExtractor::new(&executor)
            .extract_rule_graph_from_packages(["//pkg"])
            .await
            .unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph[&label("//pkg:App")], BTreeSet::from([label("//pkg:Lib")]));
        assert!(graph[&label("//pkg:XCTest")].is_empty());
    }

    #[tokio::test]
    async fn packages_are_batched_into_a_single_query() {
        let executor = ScriptedExecutor::new().respond(
            "kind(rule, //a:all) + kind(rule, //b:all) + kind(rule, //missing:all)",
            vec![
                RawRuleRecord::new("//a:one", "objc_library"),
                RawRuleRecord::new("//b:two", "objc_library"),
            ],
        );

        let rules = GraphExtractor::new(&executor)
            .extract_target_rules_from_packages(["b", "//a", "missing", "a"])
            .await
            .unwrap();

        let labels: Vec<&str> = rules.iter().map(|r| r.label().as_str()).collect();
        assert_eq!(labels, ["//a:one", "//b:two"]);
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn rules_outside_requested_packages_are_dropped() {
        let executor = ScriptedExecutor::new().respond(
            "kind(rule, //a:all)",
            vec![
                RawRuleRecord::new("//a:one", "objc_library"),
                RawRuleRecord::new("//a/sub:nested", "objc_library"),
            ],
        );

        let rules = GraphExtractor::new(&executor)
            .extract_target_rules_from_packages(["a"])
            .await
            .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].label(), &label("//a:one"));
    }

    #[tokio::test]
    async fn filtering_every_rule_away_is_reported() {
        let executor = ScriptedExecutor::new().respond(
            "kind(rule, @ext//lib:all)",
            vec![RawRuleRecord::new("@@ext+//lib:x", "objc_library")],
        );
        let (subscriber, logs) = capture_logs();

        let rules = GraphExtractor::new(&executor)
            .extract_target_rules_from_packages(["@ext//lib"])
            .with_subscriber(subscriber)
            .await
            .unwrap();

        assert!(rules.is_empty());
        let output = logs.contents();
        assert!(output.contains("WARN"), "{output}");
        assert!(output.contains("outside the requested packages"), "{output}");
    }

    #[tokio::test]
    async fn missing_packages_are_tolerated() {
        let executor = ScriptedExecutor::new().partial(
            "kind(rule, //a:all) + kind(rule, //missing:all)",
            vec![RawRuleRecord::new("//a:lib", "objc_library")],
        );

        let rules = GraphExtractor::new(&executor)
            .extract_target_rules_from_packages(["a", "missing"])
            .await
            .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(
            executor.calls(),
            ["keep_going: kind(rule, //a:all) + kind(rule, //missing:all)"]
        );
    }

    #[tokio::test]
    async fn empty_package_set_issues_no_query() {
        let executor = ScriptedExecutor::new();
        let rules = GraphExtractor::new(&executor)
            .extract_target_rules_from_packages(Vec::<String>::new())
            .await
            .unwrap();
        assert!(rules.is_empty());
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_package_is_rejected_before_querying() {
        let executor = ScriptedExecutor::new();
        let err = GraphExtractor::new(&executor)
            .extract_target_rules_from_packages(["pkg:target"])
            .await
            .unwrap_err();
        assert!(err.is_malformed_label());

        let err = GraphExtractor::new(&executor)
            .extract_target_rules_from_packages(["pkg//nested"])
            .await
            .unwrap_err();
        assert!(err.is_malformed_label());
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn executor_failure_propagates() {
        let executor = ScriptedExecutor::new().fail("kind(rule, //pkg:all)");
        let err = GraphExtractor::new(&executor)
            .extract_rule_graph_from_packages(["pkg"])
            .await
            .unwrap_err();
        assert!(err.is_query_execution());
        assert!(err.to_string().contains("kind(rule, //pkg:all)"));
    }

    #[tokio::test]
    async fn suite_extraction_goes_through_the_resolver() {
        let executor = ScriptedExecutor::new().respond(
            "kind(rule, //t:explicit + labels(tests, //t:explicit))",
            vec![
                RawRuleRecord::new("//t:explicit", "test_suite")
                    .with_dependencies(["//t/A:Test", "//t/B:Test"]),
                RawRuleRecord::new("//t/A:Test", "ios_test"),
                RawRuleRecord::new("//t/B:Test", "ios_test"),
            ],
        );

        let graph = GraphExtractor::new(&executor)
            .extract_test_suite_rules([label("//t:explicit")])
            .await
            .unwrap();
        assert_eq!(
            graph[&label("//t:explicit")],
            BTreeSet::from([label("//t/A:Test"), label("//t/B:Test")])
        );
        assert_eq!(executor.calls().len(), 1);
    }

    #[test]
    fn normalizes_package_spellings() {
        assert_eq!(normalize_package("tulsi_test").unwrap(), "//tulsi_test");
        assert_eq!(normalize_package("//a/b").unwrap(), "//a/b");
        assert_eq!(normalize_package("@ext//lib").unwrap(), "@ext//lib");
        assert_eq!(normalize_package("").unwrap(), "//");
        assert!(normalize_package("a/").is_err());
    }
}
