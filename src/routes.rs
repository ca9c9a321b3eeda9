use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::config::Config;
use crate::db::{Article, ArticleQuery, Database, ResourceStat};

pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<Config>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/articles", get(get_articles))
        .route("/tags", get(get_tags));

    Router::new()
        .route("/", get(index))
        .route("/search", get(search_page))
        .route("/stats", get(stats_page))
        .route("/about", get(about_page))
        .route("/health", get(health))
        .nest("/api/v1", api)
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Template structs
pub struct TagGroup {
    pub category: String,
    pub values: Vec<TagOption>,
}

pub struct TagOption {
    pub value: String,
    pub token: String,
    pub checked: bool,
}

fn tag_groups(config: &Config, selected: &[String]) -> Vec<TagGroup> {
    config
        .all_tags()
        .into_iter()
        .map(|(category, values)| TagGroup {
            values: values
                .into_iter()
                .map(|value| {
                    let token = format!("{}:{}", category, value);
                    TagOption {
                        checked: selected.contains(&token),
                        value,
                        token,
                    }
                })
                .collect(),
            category,
        })
        .collect()
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub title: &'static str,
    pub articles: Vec<Article>,
}

#[derive(Template)]
#[template(path = "search.html")]
pub struct SearchTemplate {
    pub title: &'static str,
    pub filter: String,
    pub date_start: String,
    pub date_end: String,
    pub tags: Vec<TagGroup>,
    pub searched: bool,
    pub articles: Vec<Article>,
}

#[derive(Template)]
#[template(path = "stats.html")]
pub struct StatsTemplate {
    pub title: &'static str,
    pub resources: Vec<ResourceStat>,
    pub tags: Vec<TagGroup>,
}

#[derive(Template)]
#[template(path = "about.html")]
pub struct AboutTemplate {
    pub title: &'static str,
    pub version: &'static str,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub title: &'static str,
    pub error: String,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

fn error_page(title: &'static str, err: AppError) -> Response {
    let status = err.status();
    let page = HtmlTemplate(ErrorTemplate {
        title,
        error: format!("Error happened: {}", err.message()),
    });
    (status, page).into_response()
}

// Custom error type
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Internal(err) => format!("{:#}", err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(err) = &self {
            tracing::error!("Request failed: {:#}", err);
        }
        (self.status(), Json(json!({ "error": self.message() }))).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError::Internal(err.into())
    }
}

/// Article search parameters as sent by the API and the search form.
///
/// Repeated `tags[]` (or `tags`) keys carry `category:value` tokens. Empty
/// values are treated as absent and a zero limit means the default.
#[derive(Debug, Default, PartialEq)]
pub struct SearchParams {
    pub date_start: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
    pub filter: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub tags: Vec<String>,
}

impl SearchParams {
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, AppError> {
        let mut params = SearchParams::default();

        for (key, value) in pairs {
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "date_start" => params.date_start = Some(parse_date(key, value)?),
                "date_end" => params.date_end = Some(parse_date(key, value)?),
                "filter" => params.filter = Some(value.clone()),
                "limit" => params.limit = Some(parse_number(key, value)?).filter(|l| *l > 0),
                "offset" => params.offset = Some(parse_number(key, value)?),
                "tags[]" | "tags" => params.tags.push(value.clone()),
                _ => {}
            }
        }

        Ok(params)
    }
}

fn parse_date(key: &str, value: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::BadRequest(format!("invalid {} {:?}: {}", key, value, e)))
}

fn parse_number(key: &str, value: &str) -> Result<u32, AppError> {
    value
        .parse()
        .map_err(|e| AppError::BadRequest(format!("invalid {} {:?}: {}", key, value, e)))
}

async fn search(state: &AppState, params: &SearchParams) -> Result<Vec<Article>, AppError> {
    let mut query = ArticleQuery::today(state.config.default_range);

    if let Some(date_start) = params.date_start {
        query = query.with_date_start(date_start);
    }
    if let Some(date_end) = params.date_end {
        query = query.with_date_end(date_end);
    }
    if let Some(filter) = &params.filter {
        query = query.with_filter(filter.as_str());
    }
    if let Some(limit) = params.limit {
        query = query.with_limit(limit);
    }
    if let Some(offset) = params.offset {
        query = query.with_offset(offset);
    }

    if !params.tags.is_empty() {
        let names = state
            .config
            .resources_with_tags(&params.tags)
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        // No source carries these tags, so there is nothing to look up
        if names.is_empty() {
            return Ok(Vec::new());
        }
        query = query.with_resource_names(names);
    }

    Ok(state.db.get_articles(&query).await?)
}

// Route handlers
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.db.ping().await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

pub async fn get_articles(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, AppError> {
    let params = SearchParams::from_pairs(&pairs)?;
    let articles = search(&state, &params).await?;

    // An empty result is reported as 404 with an empty list, not as an error
    let status = if articles.is_empty() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({ "articles": articles }))).into_response())
}

pub async fn get_tags(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "tags": state.config.all_tags() }))
}

pub async fn index(State(state): State<Arc<AppState>>) -> Response {
    let query = ArticleQuery::today(state.config.default_range);
    match state.db.get_articles(&query).await {
        Ok(articles) => HtmlTemplate(IndexTemplate {
            title: "Main page",
            articles,
        })
        .into_response(),
        Err(e) => error_page("Main page", e.into()),
    }
}

pub async fn search_page(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let params = match SearchParams::from_pairs(&pairs) {
        Ok(params) => params,
        Err(e) => return error_page("Search", e),
    };
    let searched = !pairs.is_empty();

    let articles = if searched {
        match search(&state, &params).await {
            Ok(articles) => articles,
            Err(e) => return error_page("Search", e),
        }
    } else {
        Vec::new()
    };

    let format_date = |dt: Option<DateTime<Utc>>| dt.map(|d| d.to_rfc3339()).unwrap_or_default();

    HtmlTemplate(SearchTemplate {
        title: "Search",
        filter: params.filter.clone().unwrap_or_default(),
        date_start: format_date(params.date_start),
        date_end: format_date(params.date_end),
        tags: tag_groups(&state.config, &params.tags),
        searched,
        articles,
    })
    .into_response()
}

pub async fn stats_page(State(state): State<Arc<AppState>>) -> Response {
    match state.db.get_article_stats().await {
        Ok(resources) => HtmlTemplate(StatsTemplate {
            title: "Stats",
            resources,
            tags: tag_groups(&state.config, &[]),
        })
        .into_response(),
        Err(e) => error_page("Stats", e.into()),
    }
}

pub async fn about_page() -> impl IntoResponse {
    HtmlTemplate(AboutTemplate {
        title: "About",
        version: env!("CARGO_PKG_VERSION"),
    })
}
