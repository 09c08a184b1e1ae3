//! Durable record table and identity index.
//!
//! The table is a CSV file ordered by timestamp and rewritten whole on every
//! flush or merge. The index is the in-memory set of identities used to
//! enforce at-most-once persistence.

mod index;
mod table;

pub use index::IdentityIndex;
pub(crate) use index::dedup_keep_first;
pub use table::{read_table, write_table, TABLE_COLUMNS};
