use std::fmt;

use anyhow::anyhow;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, QueryBuilder, Sqlite, SqlitePool};

use crate::config::DefaultRange;

pub const DEFAULT_LIMIT: u32 = 50;

/// Rows per INSERT statement; 7 binds each keeps us under SQLite's 999 parameter limit.
const INSERT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    pub resource: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub published: DateTime<Utc>,
    /// JSON of the original feed entry
    #[serde(skip_serializing)]
    pub raw_item: String,
}

impl fmt::Display for Article {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {} {}",
            self.resource,
            self.url,
            self.published.to_rfc3339(),
            self.title
        )
    }
}

#[derive(Debug, FromRow)]
struct ArticleRow {
    resource_name: String,
    url: String,
    title: String,
    description: String,
    published: i64,
    feed_item: String,
}

impl TryFrom<ArticleRow> for Article {
    type Error = anyhow::Error;

    fn try_from(row: ArticleRow) -> anyhow::Result<Self> {
        Ok(Self {
            published: from_millis(row.published)?,
            resource: row.resource_name,
            url: row.url,
            title: row.title,
            description: row.description,
            raw_item: row.feed_item,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceStat {
    pub resource: String,
    pub total_articles: i64,
    pub first_published: DateTime<Utc>,
    pub last_published: DateTime<Utc>,
}

fn from_millis(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| anyhow!("stored timestamp {} is out of range", ms))
}

/// Case folding applied to titles on insert and to filters on search.
/// SQLite's `lower()` only folds ASCII, so both sides are folded here.
fn fold_case(s: &str) -> String {
    s.to_lowercase()
}

/// Search parameters for [`Database::get_articles`].
///
/// Defaults: the date range covers the reference day in UTC (or everything
/// since the Unix epoch for [`DefaultRange::All`]) with both bounds
/// inclusive, no title filter, `limit` 50, `offset` 0 and no resource
/// restriction.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleQuery {
    pub date_start: DateTime<Utc>,
    pub date_end: DateTime<Utc>,
    /// Case-insensitive substring of the title; empty means no filter
    pub filter: String,
    pub limit: u32,
    pub offset: u32,
    /// Only articles from these resources when set
    pub resource_names: Option<Vec<String>>,
}

impl ArticleQuery {
    pub fn new(now: DateTime<Utc>, range: DefaultRange) -> Self {
        let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let date_start = match range {
            DefaultRange::Day => day_start,
            // Default DateTime<Utc> is the Unix epoch
            DefaultRange::All => DateTime::<Utc>::default(),
        };

        Self {
            date_start,
            date_end: day_start + Duration::days(1) - Duration::milliseconds(1),
            filter: String::new(),
            limit: DEFAULT_LIMIT,
            offset: 0,
            resource_names: None,
        }
    }

    pub fn today(range: DefaultRange) -> Self {
        Self::new(Utc::now(), range)
    }

    pub fn with_date_start(mut self, date_start: DateTime<Utc>) -> Self {
        self.date_start = date_start;
        self
    }

    pub fn with_date_end(mut self, date_end: DateTime<Utc>) -> Self {
        self.date_end = date_end;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_resource_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_names = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

impl Default for ArticleQuery {
    fn default() -> Self {
        Self::today(DefaultRange::Day)
    }
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create the schema. Safe to run repeatedly.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                resource_name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                title_lower TEXT NOT NULL,
                description TEXT NOT NULL,
                published INTEGER NOT NULL,
                feed_item TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_articles_published
            ON articles(published DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_articles_resource_published
            ON articles(resource_name, published)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Insert articles, skipping any whose url is already stored.
    ///
    /// The batch runs in one transaction. Returns the number of new rows.
    pub async fn save_articles(&self, articles: &[Article]) -> anyhow::Result<u64> {
        if articles.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for chunk in articles.chunks(INSERT_BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO articles (resource_name, url, title, title_lower, description, published, feed_item) ",
            );

            builder.push_values(chunk, |mut b, article| {
                b.push_bind(&article.resource)
                    .push_bind(&article.url)
                    .push_bind(&article.title)
                    .push_bind(fold_case(&article.title))
                    .push_bind(&article.description)
                    .push_bind(article.published.timestamp_millis())
                    .push_bind(&article.raw_item);
            });
            builder.push(" ON CONFLICT(url) DO NOTHING");

            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn get_articles(&self, query: &ArticleQuery) -> anyhow::Result<Vec<Article>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT resource_name, url, title, description, published, feed_item \
             FROM articles WHERE published >= ",
        );
        builder.push_bind(query.date_start.timestamp_millis());
        builder
            .push(" AND published <= ")
            .push_bind(query.date_end.timestamp_millis());

        if !query.filter.is_empty() {
            builder
                .push(" AND instr(title_lower, ")
                .push_bind(fold_case(&query.filter))
                .push(") > 0");
        }

        if let Some(names) = &query.resource_names {
            if names.is_empty() {
                return Ok(Vec::new());
            }

            builder.push(" AND resource_name IN (");
            let mut separated = builder.separated(", ");
            for name in names {
                separated.push_bind(name.clone());
            }
            separated.push_unseparated(")");
        }

        builder
            .push(" ORDER BY published DESC, id DESC LIMIT ")
            .push_bind(i64::from(query.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(query.offset));

        let rows = builder
            .build_query_as::<ArticleRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Article::try_from).collect()
    }

    pub async fn get_article_stats(&self) -> anyhow::Result<Vec<ResourceStat>> {
        let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT resource_name, COUNT(*), MIN(published), MAX(published)
            FROM articles
            GROUP BY resource_name
            ORDER BY resource_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(resource, total_articles, first, last)| {
                Ok(ResourceStat {
                    resource,
                    total_articles,
                    first_published: from_millis(first)?,
                    last_published: from_millis(last)?,
                })
            })
            .collect()
    }

    pub async fn get_article_count(&self) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}
