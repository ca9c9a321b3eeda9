use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::db::Article;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to parse feed: {0}")]
    Parse(#[from] parser::ParseFeedError),
    #[error("failed to serialize feed item: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// The client has no timeout of its own; every fetch passes the
    /// source's timeout explicitly.
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("allnews/", env!("CARGO_PKG_VERSION"), " (RSS Aggregator)"))
            .build()?;

        Ok(Self { client })
    }

    /// Download and parse a feed. The request, body and parse all have to
    /// finish within `timeout`.
    pub async fn fetch(&self, url: &str, timeout: Duration) -> Result<Feed, FetchError> {
        tokio::time::timeout(timeout, self.fetch_and_parse(url))
            .await
            .map_err(|_| FetchError::Timeout(timeout))?
    }

    async fn fetch_and_parse(&self, url: &str) -> Result<Feed, FetchError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        Ok(parser::parse(&bytes[..])?)
    }
}

/// Serialized form of a feed entry kept alongside each article.
#[derive(Serialize)]
struct RawItem<'a> {
    id: &'a str,
    title: Option<&'a str>,
    summary: Option<&'a str>,
    content: Option<&'a str>,
    links: Vec<RawLink<'a>>,
    authors: Vec<&'a str>,
    categories: Vec<&'a str>,
    published: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
    source: Option<&'a str>,
}

#[derive(Serialize)]
struct RawLink<'a> {
    href: &'a str,
    rel: Option<&'a str>,
    media_type: Option<&'a str>,
}

impl<'a> From<&'a Entry> for RawItem<'a> {
    fn from(entry: &'a Entry) -> Self {
        Self {
            id: &entry.id,
            title: entry.title.as_ref().map(|t| t.content.as_str()),
            summary: entry.summary.as_ref().map(|t| t.content.as_str()),
            content: entry.content.as_ref().and_then(|c| c.body.as_deref()),
            links: entry
                .links
                .iter()
                .map(|l| RawLink {
                    href: &l.href,
                    rel: l.rel.as_deref(),
                    media_type: l.media_type.as_deref(),
                })
                .collect(),
            authors: entry.authors.iter().map(|p| p.name.as_str()).collect(),
            categories: entry.categories.iter().map(|c| c.term.as_str()).collect(),
            published: entry.published,
            updated: entry.updated,
            source: entry.source.as_deref(),
        }
    }
}

/// Turn feed entries into articles owned by `resource`.
///
/// Entries without a publish (or update) date are skipped. Missing title,
/// description or link become empty strings.
pub fn extract(feed: &Feed, resource: &str) -> Result<Vec<Article>, FetchError> {
    let mut articles = Vec::with_capacity(feed.entries.len());

    for entry in &feed.entries {
        let Some(published) = entry.published.or(entry.updated) else {
            continue;
        };

        let raw_item = serde_json::to_string(&RawItem::from(entry))?;

        let description = entry
            .summary
            .as_ref()
            .map(|s| s.content.clone())
            .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
            .unwrap_or_default();

        articles.push(Article {
            resource: resource.to_string(),
            url: entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default(),
            title: entry
                .title
                .as_ref()
                .map(|t| t.content.clone())
                .unwrap_or_default(),
            description,
            published,
            raw_item,
        });
    }

    Ok(articles)
}
