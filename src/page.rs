//! Canonical page shape and wire-format normalization.
//!
//! The panel backend grew three response shapes over time: a bare item array,
//! a flat page object, and an envelope with the page under `data`. All
//! shape-sniffing lives here in [`RawPage`]; past this boundary the engine
//! only ever sees [`Page`].

use serde::{Deserialize, Serialize};

/// A materialized page of a filtered list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    /// An empty first page, used as the pre-fetch state of a session.
    pub fn empty(page_size: u32) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            page: 1,
            page_size: page_size.max(1),
            total_pages: 1,
        }
    }

    /// Recompute `total_pages` after a local patch to `total`.
    pub fn recompute_total_pages(&mut self) {
        self.total_pages = pages_for(self.total, self.page_size);
    }
}

/// `ceil(total / page_size)`, never below 1.
pub(crate) fn pages_for(total: u64, page_size: u32) -> u32 {
    let size = u64::from(page_size.max(1));
    let pages = total.div_ceil(size);
    u32::try_from(pages.max(1)).unwrap_or(u32::MAX)
}

/// Flat page body as served by the list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBody<T> {
    pub items: Vec<T>,
    pub total: Option<u64>,
    pub page: Option<u32>,
    #[serde(alias = "per_page", alias = "pageSize")]
    pub page_size: Option<u32>,
    #[serde(alias = "totalPages")]
    pub total_pages: Option<u32>,
}

/// Response shapes the backend is known to serve.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawPage<T> {
    /// `{ "data": { "items": [...], ... } }`
    Envelope { data: RawBody<T> },
    /// `{ "items": [...], "total": ..., ... }`
    Body(RawBody<T>),
    /// `[ ... ]` — legacy endpoints returning the full result set.
    Items(Vec<T>),
}

impl<T> RawPage<T> {
    /// Normalize into the canonical [`Page`] shape.
    ///
    /// Missing counts fall back to what the request implies; a
    /// server-provided `total_pages` wins over the client computation.
    pub fn normalize(self, requested_page: u32, requested_size: u32) -> Page<T> {
        let requested_size = requested_size.max(1);
        let body = match self {
            RawPage::Envelope { data } => data,
            RawPage::Body(body) => body,
            RawPage::Items(items) => {
                let total = items.len() as u64;
                return finish(items, total, requested_page, requested_size, None);
            }
        };
        let total = body.total.unwrap_or(body.items.len() as u64);
        let page = body.page.unwrap_or(requested_page).max(1);
        let size = body.page_size.unwrap_or(requested_size).max(1);
        finish(body.items, total, page, size, body.total_pages)
    }
}

fn finish<T>(
    mut items: Vec<T>,
    total: u64,
    page: u32,
    page_size: u32,
    server_total_pages: Option<u32>,
) -> Page<T> {
    items.truncate(page_size as usize);
    Page {
        items,
        total,
        page,
        page_size,
        total_pages: server_total_pages
            .unwrap_or_else(|| pages_for(total, page_size))
            .max(1),
    }
}
