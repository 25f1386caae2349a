use crate::config::PageableConfig;
use crate::selector::{Predicate, Selector};
use serde::Deserialize;

/// A bare row cap, used inside includes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Limit {
    pub limit: i64,
}

impl Limit {
    pub fn sanitize(&mut self, cfg: &PageableConfig) {
        if self.limit <= 0 {
            self.limit = cfg.default_limit;
        }
        if self.limit > cfg.max_limit {
            self.limit = cfg.max_limit;
        }
    }

    pub fn predicate(&self) -> Predicate {
        let limit = self.limit;
        Box::new(move |s: &mut Selector| {
            s.set_limit(limit);
        })
    }
}

/// Request-level pagination: page plus per-page limit.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Pageable {
    pub page: i64,
    #[serde(flatten)]
    pub limit: Limit,
}

impl Pageable {
    pub fn sanitize(&mut self, cfg: &PageableConfig) {
        self.limit.sanitize(cfg);
        if self.page < 1 {
            self.page = 1;
        }
    }

    /// Always emits LIMIT; emits OFFSET only when `use_offset` is
    /// set and the page is past the first.
    pub fn predicate(&self, use_offset: bool) -> Predicate {
        let (page, limit) = (self.page, self.limit.limit);
        Box::new(move |s: &mut Selector| {
            s.set_limit(limit);
            if use_offset && page > 1 {
                s.set_offset((page - 1) * limit);
            }
        })
    }
}
