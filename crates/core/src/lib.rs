pub mod bazel;
pub mod error;
pub mod extractor;
pub mod label;
pub mod models;
pub mod parser;
pub mod query;
pub mod test_suite;

#[cfg(test)]
mod testing;

pub use bazel::{BazelOptions, BazelQueryExecutor, BazelVersion};
pub use error::{Error, Result};
pub use extractor::GraphExtractor;
pub use label::{Label, LabelError};
pub use models::{rule_entries, RawRuleRecord, RuleEntry, RuleGraph, RuleInfo};
pub use parser::{parse_query_records, QueryResultParser};
pub use query::QueryExecutor;
pub use test_suite::{flatten_tests, TestSuiteResolver};
