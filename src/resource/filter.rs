//! Ignore policies
//!
//! A [`Filter`] decides which resource types are not enumerated and which
//! individual resources are never read from a provider.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Ignore policy over resource types and `(type, id)` pairs.
pub trait Filter: Send + Sync {
    fn is_type_ignored(&self, resource_type: &str) -> bool;
    fn is_resource_ignored(&self, resource_type: &str, id: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    Wildcard,
}

/// One segment of an ignore rule, e.g. `aws_s3_bucket` or `logs-*`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pattern(Vec<Token>);

impl Pattern {
    fn is_match_all(&self) -> bool {
        self.0 == [Token::Wildcard]
    }

    fn has_wildcard(&self) -> bool {
        self.0.contains(&Token::Wildcard)
    }

    fn as_literal(&self) -> Option<String> {
        self.0
            .iter()
            .map(|token| match token {
                Token::Literal(c) => Some(*c),
                Token::Wildcard => None,
            })
            .collect()
    }

    fn matches(&self, input: &str) -> bool {
        let chars: Vec<char> = input.chars().collect();
        let tokens = &self.0;

        // matched[j]: tokens[..i] match chars[..j]
        let mut matched = vec![false; chars.len() + 1];
        matched[0] = true;
        for token in tokens {
            let mut next = vec![false; chars.len() + 1];
            match token {
                Token::Wildcard => {
                    let mut reachable = false;
                    for j in 0..=chars.len() {
                        reachable |= matched[j];
                        next[j] = reachable;
                    }
                }
                Token::Literal(c) => {
                    for j in 1..=chars.len() {
                        next[j] = matched[j - 1] && chars[j - 1] == *c;
                    }
                }
            }
            matched = next;
        }
        matched[chars.len()]
    }
}

/// Split an ignore line on unescaped dots.
///
/// `\` escapes the next character, so `\.` is a literal dot and `\*` a
/// literal star. Runs of unescaped stars collapse into one wildcard.
fn parse_line(line: &str) -> Vec<Pattern> {
    let mut segments = Vec::new();
    let mut current = Vec::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => current.push(Token::Literal(chars.next().unwrap_or('\\'))),
            '.' => segments.push(Pattern(std::mem::take(&mut current))),
            '*' => {
                if current.last() != Some(&Token::Wildcard) {
                    current.push(Token::Wildcard);
                }
            }
            other => current.push(Token::Literal(other)),
        }
    }
    segments.push(Pattern(current));
    segments
}

#[derive(Debug, Clone)]
struct ResourceRule {
    resource_type: Pattern,
    id: Pattern,
}

/// Resource exclusions read from a `.driftignore` file.
///
/// Each line is `type.id`, where either part may use `*` wildcards. Lines
/// with more segments name individual fields and only matter when
/// comparing resources, so they are accepted and not used here.
#[derive(Debug, Clone, Default)]
pub struct DriftIgnore {
    exact: HashSet<(String, String)>,
    wildcards: Vec<ResourceRule>,
    field_rules: usize,
}

impl DriftIgnore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from `path`. A missing file yields an empty policy.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No ignore file at {:?}", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ignore file {:?}", path))?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut ignore = Self::default();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut segments = parse_line(line);
            if segments.len() < 2 {
                tracing::warn!(
                    line = index + 1,
                    content = %line,
                    "Unable to parse ignore line, invalid length, got {} expected >= 2",
                    segments.len()
                );
                continue;
            }
            if segments.len() > 2 {
                tracing::debug!(content = %line, "Found field ignore rule");
                ignore.field_rules += 1;
                continue;
            }

            let id = segments.pop().unwrap_or(Pattern(Vec::new()));
            let resource_type = segments.pop().unwrap_or(Pattern(Vec::new()));
            tracing::debug!(content = %line, "Found ignore resource rule");

            match (resource_type.as_literal(), id.as_literal()) {
                (Some(ty), Some(id)) => {
                    ignore.exact.insert((ty, id));
                }
                _ => ignore.wildcards.push(ResourceRule { resource_type, id }),
            }
        }

        ignore
    }

    /// Number of resource rules (exact and wildcard).
    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Filter for DriftIgnore {
    fn is_type_ignored(&self, resource_type: &str) -> bool {
        self.wildcards.iter().any(|rule| {
            rule.id.is_match_all()
                && !rule.resource_type.has_wildcard()
                && rule.resource_type.matches(resource_type)
        })
    }

    fn is_resource_ignored(&self, resource_type: &str, id: &str) -> bool {
        if self.exact.contains(&(resource_type.to_string(), id.to_string())) {
            return true;
        }
        self.wildcards
            .iter()
            .any(|rule| rule.resource_type.matches(resource_type) && rule.id.matches(id))
    }
}

/// Keeps only an explicit set of resource types.
#[derive(Debug, Clone, Default)]
pub struct TypeFilter {
    types: HashSet<String>,
}

impl TypeFilter {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
        }
    }
}

impl Filter for TypeFilter {
    fn is_type_ignored(&self, resource_type: &str) -> bool {
        !self.types.contains(resource_type)
    }

    fn is_resource_ignored(&self, resource_type: &str, _id: &str) -> bool {
        self.is_type_ignored(resource_type)
    }
}

/// Ignores what any of its filters ignores.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }
}

impl Filter for FilterChain {
    fn is_type_ignored(&self, resource_type: &str) -> bool {
        self.filters.iter().any(|f| f.is_type_ignored(resource_type))
    }

    fn is_resource_ignored(&self, resource_type: &str, id: &str) -> bool {
        self.filters
            .iter()
            .any(|f| f.is_resource_ignored(resource_type, id))
    }
}
