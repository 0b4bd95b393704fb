use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("malformed label `{input}`: {reason}")]
    Malformed { input: String, reason: &'static str },
}

/// Canonical build target identifier, `[@repo]//package:target`.
///
/// Shorthand is expanded the way Bazel does: `//a/b` names `//a/b:b`,
/// `@repo` names `@repo//:repo`, and `@//a` or `@@//a` name the main
/// repository's `//a:a`. Two labels are equal iff their canonical strings
/// are byte-equal.
///
/// Labels containing whitespace are rejected even though Bazel accepts
/// spaces in file targets; query expressions are joined on spaces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label {
    canonical: String,
}

impl Label {
    pub fn parse(raw: &str) -> Result<Self, LabelError> {
        let malformed = |reason| LabelError::Malformed {
            input: raw.to_string(),
            reason,
        };

        if raw.is_empty() {
            return Err(malformed("label is empty"));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(malformed("label contains whitespace"));
        }

        let (repository, rest) = split_repository(raw).map_err(malformed)?;

        let rest: &str = &rest;
        let (package, target) = match rest.split_once(':') {
            Some((package, target)) => {
                if target.is_empty() {
                    return Err(malformed("target name after `:` is empty"));
                }
                if target.contains(':') {
                    return Err(malformed("label contains more than one `:`"));
                }
                (package, target)
            }
            None => {
                if rest.is_empty() {
                    return Err(malformed("label names neither a package nor a target"));
                }
                // `//a/b` is shorthand for `//a/b:b`.
                let last = rest.rsplit('/').next().unwrap_or(rest);
                (rest, last)
            }
        };

        if !package.is_empty() && package.split('/').any(str::is_empty) {
            return Err(malformed("package path has an empty segment"));
        }

        Ok(Self {
            canonical: format!("{repository}//{package}:{target}"),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Repository prefix including its `@`/`@@` sigil; empty for the main repository.
    pub fn repository(&self) -> &str {
        let sep = self.separator();
        &self.canonical[..sep]
    }

    pub fn package(&self) -> &str {
        let start = self.separator() + 2;
        let colon = self.colon();
        &self.canonical[start..colon]
    }

    pub fn target_name(&self) -> &str {
        &self.canonical[self.colon() + 1..]
    }

    /// `[@repo]//package:all`, the pattern naming every rule in this label's package.
    pub fn package_wildcard(&self) -> String {
        format!("{}//{}:all", self.repository(), self.package())
    }

    fn separator(&self) -> usize {
        // Repository names never contain `/`, so the first `//` is the separator.
        self.canonical.find("//").unwrap_or(0)
    }

    fn colon(&self) -> usize {
        let start = self.separator() + 2;
        self.canonical[start..]
            .find(':')
            .map(|idx| start + idx)
            .unwrap_or(self.canonical.len())
    }
}

/// Splits `[@repo]//rest` into the canonical repository prefix (empty for
/// the main repository) and the part after `//`.
fn split_repository(raw: &str) -> Result<(&str, Cow<'_, str>), &'static str> {
    if let Some(rest) = raw.strip_prefix("//") {
        return Ok(("", Cow::Borrowed(rest)));
    }
    if !raw.starts_with('@') {
        return Err("missing leading `//`");
    }

    let sep = raw.find("//");
    let repository = &raw[..sep.unwrap_or(raw.len())];
    let name = repository.trim_start_matches('@');
    if repository.len() - name.len() > 2 {
        return Err("repository prefix has too many `@`");
    }
    if name.contains(|c: char| c == '/' || c == ':' || c == '@') {
        return Err("repository name contains an invalid character");
    }

    match sep {
        Some(_) if name.is_empty() => Ok(("", Cow::Borrowed(&raw[repository.len() + 2..]))),
        Some(sep) => Ok((repository, Cow::Borrowed(&raw[sep + 2..]))),
        None if name.is_empty() => Err("repository prefix must be followed by `//`"),
        None => Ok((repository, Cow::Owned(format!(":{name}")))),
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl FromStr for Label {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Label {
    type Error = LabelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.canonical
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.canonical
    }
}
