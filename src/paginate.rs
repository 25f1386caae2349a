use crate::scalar::{ScalarDest, ScalarQuery};
use crate::selector::Selector;
use serde::Serialize;

/// Pagination metadata attached to a paginated search response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaginateResponse {
    pub from: i64,
    pub to: i64,
    pub total: i64,
    pub current_page: i64,
    pub last_page: i64,
    pub per_page: i64,
}

/// The count side of a paginated search: a COUNT selector snapshot
/// plus the sanitized page and limit.
#[derive(Debug, Clone)]
pub struct PaginateInfo {
    pub count_selector: Selector,
    pub page: i64,
    pub limit: i64,
}

impl PaginateInfo {
    /// Turn the count selector into a scalar query keyed like its
    /// search, scanning into a nullable integer.
    pub fn to_scalar_query(&self, key: &str) -> ScalarQuery {
        ScalarQuery {
            selector: self.count_selector.clone(),
            key: key.to_string(),
            dest: ScalarDest::Int,
        }
    }

    /// Compute the pagination window from the counted total and the
    /// number of rows actually returned.
    pub fn calculate(&self, total: i64, length: i64) -> PaginateResponse {
        let per = self.limit.max(1);
        let last_page = if total > 0 { (total + per - 1) / per } else { 0 };
        let page = self.page.max(1);

        if total == 0 || (last_page > 0 && page > last_page) {
            return PaginateResponse {
                from: 0,
                to: 0,
                total,
                current_page: page,
                last_page,
                per_page: per,
            };
        }

        let mut from = (page - 1) * per + 1;
        let mut to = (from + length - 1).min(total);
        if length == 0 {
            from = 0;
            to = 0;
        }
        PaginateResponse {
            from,
            to,
            total,
            current_page: page,
            last_page,
            per_page: per,
        }
    }
}
