//! Tag matching for sources.
//!
//! A source carries a set of values per tag category. A tag query is built
//! from `category:value` tokens and matches a source when, for every
//! category in the query, all requested values appear in that source's
//! values for the category.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::config::SourceConfig;

/// Tag category to the set of values for that category.
pub type Tags = BTreeMap<String, BTreeSet<String>>;

const SEPARATOR: char = ':';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("{0:?} has to be in 'tagCategory:tagValue' format")]
    MalformedTagToken(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TagQuery {
    tags: Tags,
}

impl TagQuery {
    /// Build a query from `category:value` tokens. Tokens sharing a category
    /// accumulate into one value set.
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Result<Self, TagError> {
        let mut tags = Tags::new();

        for token in tokens {
            let token = token.as_ref();
            let parts: Vec<&str> = token.split(SEPARATOR).collect();
            let &[category, value] = parts.as_slice() else {
                return Err(TagError::MalformedTagToken(token.to_string()));
            };

            tags.entry(category.to_string())
                .or_default()
                .insert(value.to_string());
        }

        Ok(Self { tags })
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn matches(&self, source_tags: &Tags) -> bool {
        self.tags.iter().all(|(category, wanted)| {
            source_tags
                .get(category)
                .is_some_and(|values| wanted.is_subset(values))
        })
    }
}

/// Names of the sources matched by the given tag tokens.
///
/// Fails without partial results if any token is malformed.
pub fn resolve<S: AsRef<str>>(
    tokens: &[S],
    sources: &[SourceConfig],
) -> Result<BTreeSet<String>, TagError> {
    let query = TagQuery::parse(tokens)?;

    Ok(sources
        .iter()
        .filter(|source| query.matches(&source.tags))
        .map(|source| source.name.clone())
        .collect())
}

/// All distinct values per category across every source.
pub fn all_tags(sources: &[SourceConfig]) -> Tags {
    let mut tags = Tags::new();

    for source in sources {
        for (category, values) in &source.tags {
            tags.entry(category.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tags(pairs: &[(&str, &[&str])]) -> Tags {
        pairs
            .iter()
            .map(|(category, values)| {
                (
                    category.to_string(),
                    values.iter().map(|v| v.to_string()).collect(),
                )
            })
            .collect()
    }

    fn source(name: &str, source_tags: Tags) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            url: format!("https://{}.example/rss", name),
            timeout: Duration::from_secs(10),
            update: Duration::from_secs(60),
            tags: source_tags,
        }
    }

    fn sources() -> Vec<SourceConfig> {
        vec![
            source(
                "site1",
                tags(&[
                    ("country", &["USA"]),
                    ("topic", &["sports", "politics"]),
                    ("language", &["en"]),
                ]),
            ),
            source(
                "site2",
                tags(&[
                    ("country", &["UK"]),
                    ("topic", &["tech", "IT", "sports"]),
                    ("language", &["en", "ge"]),
                ]),
            ),
            source("untagged", Tags::new()),
        ]
    }

    mod parse_tests {
        use super::*;

        #[test]
        fn test_tokens_accumulate_per_category() {
            let query = TagQuery::parse(&["key1:val1", "key2:val2", "key1:val3"]).unwrap();
            assert_eq!(
                query.tags,
                tags(&[("key1", &["val1", "val3"]), ("key2", &["val2"])])
            );
        }

        #[test]
        fn test_duplicate_tokens_are_allowed() {
            let query = TagQuery::parse(&["topic:tech", "topic:tech"]).unwrap();
            assert_eq!(query.tags, tags(&[("topic", &["tech"])]));
        }

        #[test]
        fn test_missing_separator_is_malformed() {
            let err = TagQuery::parse(&["key1:val1", "abc"]).unwrap_err();
            assert_eq!(err, TagError::MalformedTagToken("abc".to_string()));
            assert!(err
                .to_string()
                .contains("has to be in 'tagCategory:tagValue' format"));
        }

        #[test]
        fn test_extra_separator_is_malformed() {
            let err = TagQuery::parse(&["key1:val3:"]).unwrap_err();
            assert_eq!(err, TagError::MalformedTagToken("key1:val3:".to_string()));
        }

        #[test]
        fn test_empty_token_list() {
            let query = TagQuery::parse::<&str>(&[]).unwrap();
            assert!(query.is_empty());
        }
    }

    mod matches_tests {
        use super::*;

        #[test]
        fn test_subset_matching() {
            let superset = tags(&[("k1", &["v1", "v2", "v3"]), ("k2", &["v4", "v5"])]);
            let partial = tags(&[("k1", &["v1"]), ("k2", &["v5"])]);

            assert!(TagQuery::parse(&["k1:v2"]).unwrap().matches(&superset));
            assert!(TagQuery::parse(&["k1:v1", "k2:v5"]).unwrap().matches(&superset));
            assert!(!TagQuery::parse(&["k3:v6"]).unwrap().matches(&superset));
            assert!(!TagQuery::parse(&["k1:v2"]).unwrap().matches(&partial));
        }

        #[test]
        fn test_every_requested_value_must_be_present() {
            let source_tags = tags(&[
                ("country", &["UK"]),
                ("language", &["en", "ge"]),
                ("topic", &["tech", "IT", "sports"]),
            ]);
            let query =
                TagQuery::parse(&["language:en", "topic:sports", "topic:politics"]).unwrap();
            assert!(!query.matches(&source_tags));
        }

        #[test]
        fn test_empty_query_matches_everything() {
            let query = TagQuery::default();
            assert!(query.matches(&Tags::new()));
            assert!(query.matches(&tags(&[("topic", &["tech"])])));
        }
    }

    mod resolve_tests {
        use super::*;

        fn names(set: BTreeSet<String>) -> Vec<String> {
            set.into_iter().collect()
        }

        #[test]
        fn test_resolve_single_tag() {
            let resolved = resolve(&["topic:sports"], &sources()).unwrap();
            assert_eq!(names(resolved), vec!["site1", "site2"]);

            let resolved = resolve(&["topic:politics"], &sources()).unwrap();
            assert_eq!(names(resolved), vec!["site1"]);
        }

        #[test]
        fn test_resolve_empty_query_returns_all_sources() {
            let resolved = resolve::<&str>(&[], &sources()).unwrap();
            assert_eq!(names(resolved), vec!["site1", "site2", "untagged"]);
        }

        #[test]
        fn test_resolve_unknown_category_matches_nothing() {
            let resolved = resolve(&["mood:happy"], &sources()).unwrap();
            assert!(resolved.is_empty());
        }

        #[test]
        fn test_resolve_malformed_token_has_no_partial_result() {
            let result = resolve(&["topic:sports", "abc"], &sources());
            assert_eq!(
                result,
                Err(TagError::MalformedTagToken("abc".to_string()))
            );
        }

        #[test]
        fn test_resolve_groups_share_a_name() {
            let mut all = sources();
            all.push(source("site1", tags(&[("topic", &["weather"])])));

            let resolved = resolve(&["topic:weather"], &all).unwrap();
            assert_eq!(names(resolved), vec!["site1"]);
        }
    }

    #[test]
    fn test_all_tags_aggregates_distinct_values() {
        let aggregated = all_tags(&sources());

        assert_eq!(aggregated.len(), 3);
        assert_eq!(
            aggregated["topic"].iter().collect::<Vec<_>>(),
            vec!["IT", "politics", "sports", "tech"]
        );
        assert_eq!(
            aggregated["language"].iter().collect::<Vec<_>>(),
            vec!["en", "ge"]
        );
    }

    #[test]
    fn test_all_tags_no_sources() {
        assert!(all_tags(&[]).is_empty());
    }
}
