use crate::error::{Error, Result};
use crate::label::Label;
use crate::models::{RawRuleRecord, RuleGraph, RuleInfo};
use std::collections::hash_map::Entry;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Turns executor records into a [`RuleGraph`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryResultParser;

impl QueryResultParser {
    pub fn parse<I>(&self, records: I) -> Result<RuleGraph>
    where
        I: IntoIterator<Item = RawRuleRecord>,
    {
        parse_query_records(records)
    }
}

/// Parses every record, merging repeated emissions of the same label.
///
/// The first record seen for a label provides its [`RuleInfo`]; later ones
/// only contribute dependencies. Any malformed label fails the whole call.
pub fn parse_query_records<I>(records: I) -> Result<RuleGraph>
where
    I: IntoIterator<Item = RawRuleRecord>,
{
    let mut graph = RuleGraph::new();
    let mut records_seen = 0usize;

    for record in records {
        records_seen += 1;
        let label = parse_label(&record.label, "rule", &record.label)?;
        let dependencies = parse_labels(&record.dependencies, "dependency", &label)?;
        let linked = parse_labels(&record.linked_targets, "linked target", &label)?;
        let info = RuleInfo::new(label, record.rule_type.as_str(), linked);

        match graph.entry(info) {
            Entry::Occupied(mut existing) => {
                // `entry` keeps the stored key, so the first-seen RuleInfo wins.
                if existing.key().rule_type() != record.rule_type {
                    warn!(
                        label = %existing.key().label(),
                        kept = existing.key().rule_type(),
                        ignored = %record.rule_type,
                        "query emitted conflicting rule types for one label"
                    );
                }
                debug!(label = %existing.key().label(), "merging duplicate query record");
                existing.get_mut().extend(dependencies);
            }
            Entry::Vacant(slot) => {
                slot.insert(dependencies);
            }
        }
    }

    debug!(records = records_seen, rules = graph.len(), "parsed query records");
    Ok(graph)
}

fn parse_labels(raw: &[String], what: &str, owner: &Label) -> Result<BTreeSet<Label>> {
    raw.iter()
        .map(|value| parse_label(value, what, owner.as_str()))
        .collect()
}

fn parse_label(raw: &str, what: &str, owner: &str) -> Result<Label> {
    Label::parse(raw).map_err(|err| Error::QueryParse {
        message: format!("{what} label `{raw}` reported for `{owner}` is malformed"),
        source: Some(err),
    })
}
