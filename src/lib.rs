//! Commission lifecycle and payout settlement engine.
//!
//! Tracks revenue from referred sales, computes the commission owed to the
//! referring marketer, gates it behind a refund-safety window, unlocks
//! milestone rewards, and settles accumulated commissions into batched
//! payouts. Every dollar is either unpaid-and-tracked or paid exactly once.

pub mod api;
pub mod audit;
pub mod config;
pub mod contract;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod notify;
pub mod payout;
pub mod pg;
pub mod responses;
pub mod rewards;
pub mod status;
pub mod store;
pub mod types;

pub use api::{AppState, init_router};
pub use config::Config;
pub use contract::{DEFAULT_REFUND_WINDOW_DAYS, resolve_terms};
pub use error::EngineError;
pub use memory::MemStore;
pub use payout::run_payouts;
pub use pg::{PgAccountResolver, PgStore};
pub use rewards::{advance_grant, evaluate_rewards};
pub use status::{apply_refund, ingest_sale, reevaluate_refund_window};
pub use store::Store;
