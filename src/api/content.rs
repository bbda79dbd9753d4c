//! Category listing and paginated content retrieval
//!
//! Built on an authenticated `SessionManager`. Pages beyond the first are
//! fetched concurrently (bounded by `page_concurrency`) and reassembled in
//! page order before being returned.

use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::debug;

use super::error::{PortalError, PortalResult};
use super::session::SessionManager;
use super::wire::{ListJs, ListScope, RawCategory};
use crate::models::{Category, ContentItem, ContentKind, ItemType};

/// Category names that mark a VOD category as series
const SERIES_KEYWORDS: &[&str] = &["tv", "series", "show"];

/// Whether a VOD category name looks like a series bucket
pub fn is_series_category(name: &str) -> bool {
    let name = name.to_lowercase();
    SERIES_KEYWORDS.iter().any(|k| name.contains(k))
}

/// Number of pages needed for `total` items at `page_size` per page
pub fn total_pages(total: u64, page_size: usize) -> u32 {
    if page_size == 0 || total == 0 {
        return 1;
    }
    total.div_ceil(page_size as u64) as u32
}

/// One `get_ordered_list` answer
struct Page {
    items: Vec<ContentItem>,
    total: u64,
    /// Rows the portal sent, before id-less rows are dropped
    rows: usize,
}

/// Listing operations over an authenticated session
pub struct ContentResolver<'a> {
    session: &'a SessionManager,
}

impl<'a> ContentResolver<'a> {
    pub fn new(session: &'a SessionManager) -> Self {
        Self { session }
    }

    /// Categories of one content kind, in portal order
    pub async fn list_categories(&self, kind: ContentKind) -> PortalResult<Vec<Category>> {
        let action = match kind {
            ContentKind::Live => "get_genres",
            ContentKind::Movie | ContentKind::Series => "get_categories",
        };
        let params = [
            ("type", kind.portal_type().to_string()),
            ("action", action.to_string()),
            ("JsHttpRequest", "1-xml".to_string()),
        ];

        let js: Value = self.session.authed_get(&params).await?;
        let raw: Vec<RawCategory> = match js {
            Value::Array(_) => serde_json::from_value(js)
                .map_err(|e| PortalError::InvalidResponse(format!("categories: {}", e)))?,
            _ => Vec::new(),
        };

        let categories = raw
            .into_iter()
            .filter_map(|c| c.into_category(kind))
            .filter(|c| match kind {
                ContentKind::Live => true,
                ContentKind::Series => is_series_category(&c.name),
                ContentKind::Movie => !is_series_category(&c.name),
            })
            .collect();
        Ok(categories)
    }

    /// One page of a category listing plus the portal's total item count
    pub async fn list_items_page(
        &self,
        kind: ContentKind,
        category_id: &str,
        page: u32,
    ) -> PortalResult<(Vec<ContentItem>, u64)> {
        let scope = ListScope::Category {
            kind,
            category_id: category_id.to_string(),
        };
        let page = self.fetch_page(&scope, page).await?;
        Ok((page.items, page.total))
    }

    /// Every item of a category, in source order
    pub async fn fetch_all_pages(
        &self,
        kind: ContentKind,
        category_id: &str,
    ) -> PortalResult<Vec<ContentItem>> {
        let scope = ListScope::Category {
            kind,
            category_id: category_id.to_string(),
        };
        self.fetch_all(&scope).await
    }

    /// Seasons of a series
    pub async fn list_seasons(&self, series_id: &str) -> PortalResult<Vec<ContentItem>> {
        let scope = ListScope::Series {
            series_id: series_id.to_string(),
            season_id: None,
        };
        let items = self.fetch_all(&scope).await?;
        Ok(items
            .into_iter()
            .filter(|i| i.item_type == ItemType::Season)
            .collect())
    }

    /// Episodes of one season of a series
    pub async fn list_episodes(
        &self,
        series_id: &str,
        season_id: &str,
    ) -> PortalResult<Vec<ContentItem>> {
        let scope = ListScope::Series {
            series_id: series_id.to_string(),
            season_id: Some(season_id.to_string()),
        };
        let items = self.fetch_all(&scope).await?;
        Ok(items
            .into_iter()
            .filter(|i| {
                i.item_type == ItemType::Episode
                    && i.parent_series_id.as_deref() == Some(series_id)
                    && i.parent_season_id.as_deref() == Some(season_id)
            })
            .collect())
    }

    /// Page 1 decides the page size; the rest run under bounded concurrency
    async fn fetch_all(&self, scope: &ListScope) -> PortalResult<Vec<ContentItem>> {
        let first = self.fetch_page(scope, 1).await?;
        // Rows without an id are dropped, but they still count towards the page size
        let pages = total_pages(first.total, first.rows);
        if pages <= 1 {
            return Ok(first.items);
        }
        debug!(total = first.total, page_size = first.rows, pages, "fetching remaining pages");

        let concurrency = self.session.settings().page_concurrency.max(1);
        let mut rest: Vec<(u32, Vec<ContentItem>)> = stream::iter(2..=pages)
            .map(|page| async move {
                let fetched = self.fetch_page(scope, page).await?;
                Ok::<_, PortalError>((page, fetched.items))
            })
            .buffer_unordered(concurrency)
            .try_collect()
            .await?;
        rest.sort_by_key(|(page, _)| *page);

        let mut all = first.items;
        for (_, items) in rest {
            all.extend(items);
        }
        Ok(all)
    }

    async fn fetch_page(&self, scope: &ListScope, page: u32) -> PortalResult<Page> {
        let mut params = vec![("action", "get_ordered_list".to_string())];
        match scope {
            ListScope::Category { kind, category_id } => {
                params.push(("type", kind.portal_type().to_string()));
                let category = if category_id == "*" { "0" } else { category_id.as_str() };
                params.push((kind.category_param(), category.to_string()));
            }
            ListScope::Series {
                series_id,
                season_id,
            } => {
                params.push(("type", "vod".to_string()));
                params.push(("movie_id", series_id.clone()));
                params.push((
                    "season_id",
                    season_id.clone().unwrap_or_else(|| "0".to_string()),
                ));
                params.push(("episode_id", "0".to_string()));
            }
        }
        params.push(("p", page.to_string()));
        params.push(("JsHttpRequest", "1-xml".to_string()));

        let list: ListJs = self.session.authed_get(&params).await?;
        let rows = list.data.len();
        let items = list
            .data
            .into_iter()
            .filter_map(|raw| raw.into_item(scope))
            .collect();
        Ok(Page {
            items,
            total: list.total_items,
            rows,
        })
    }
}
