//! Storage layer
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  Session (per-open state)           │
//! │  - cursor, access mode              │
//! │  - notifies the registry on growth  │
//! └─────────────────────────────────────┘
//!          │
//!          │ read() / write() guards
//!          ▼
//! ┌─────────────────────────────────────┐
//! │  SharedStore (concurrency guard)    │
//! │  - Arc<RwLock<BufferStore>>         │
//! │  - readers share, writers exclusive │
//! └─────────────────────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────────────────────┐
//! │  BufferStore (plain data)           │
//! │  - size / capacity / ceiling        │
//! │  - doubling growth, all-or-nothing  │
//! └─────────────────────────────────────┘
//! ```

pub mod shared;
pub mod store;

pub use shared::{SharedStore, StoreReadGuard, StoreWriteGuard};
pub use store::{BufferStore, WriteReport};
