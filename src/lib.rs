//! Comanda Sync Engine
//!
//! Client-side data synchronization for the Comanda administration panel.
//! Every filtered, paginated list view (order dashboard, product manager,
//! movement list) drives the same pipeline:
//!
//! 1. A filter edit is debounced, then keyed deterministically.
//! 2. The [`PagedFetcher`] serves the page from cache, joins an identical
//!    in-flight request, or calls the injected fetch adapter.
//! 3. The [`SyncSession`] adopts the page — unless a newer fetch superseded
//!    it — and invokes the render callback.
//! 4. Push events merge into the rendered page immediately and invalidate
//!    the affected cache entries.
//! 5. A [`VisibilityScheduler`] re-runs the pipeline periodically while the
//!    view is visible.
//!
//! ## Configuration
//!
//! Engine tuning is controlled via `comanda-sync.toml`:
//!
//! ```toml
//! [sync]
//! ttl_ms = 45000
//! max_cache_entries = 50
//! page_size = 20
//! # ... see config.rs for all options
//! ```

pub mod config;
pub mod debounce;
pub mod error;
pub mod events;
pub mod fetch;
pub mod filter;
mod lock;
pub mod page;
pub mod records;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod telemetry;

pub use config::{LogFormat, LoggingSettings, PanelSettings, SyncConfig};
pub use debounce::Debouncer;
pub use error::SyncError;
pub use events::{ChangeEvent, EventAdapter, EventHandler, InMemoryEvents, Subscription, SyncRecord};
pub use fetch::{FetchAdapter, PagedFetcher};
pub use filter::{FilterState, FilterValue, KeyBuilder};
pub use page::{Page, RawBody, RawPage};
pub use scheduler::VisibilityScheduler;
pub use session::{InsertPosition, RenderFn, SyncSession, SyncStatus};
pub use store::CacheStore;
