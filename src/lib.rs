//! Append-mostly, time-ordered storage for financial market events.
//!
//! Records are variable-width (1, 2 or 4 eight-byte slots) and carry a
//! packed header whose raw u64 value is also the global sort key.
//! Appends land in a write-behind page cache and materialize into
//! fixed-capacity memory-mapped pages; a file whose pages interleave
//! in time is repaired wholesale at close by an external merge sort
//! (local page sort, interval-tree merge planning, k-way merge).
//! Instrument names map to small header indices through a trie-backed
//! symbol table serialized into the file's trailer.
//!
//! ```no_run
//! use tickstore::{Record, RecordKind, SubSecond, TickStore};
//!
//! # fn main() -> tickstore::Result<()> {
//! let mut store = TickStore::create("eurusd.tick")?;
//! let symbol = store.resolve_symbol("EUR.USD")?;
//! store.add_record(&Record::tick(
//!     RecordKind::Trade,
//!     1_700_000_000,
//!     SubSecond::Millis(250),
//!     symbol,
//!     1.0731,
//!     500_000,
//! )?)?;
//! store.close()?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod endian;
pub mod error;
pub mod record;
pub mod sort;
pub mod store;
pub mod symtab;

pub use cache::{AddOutcome, PageCache, PageStats};
pub use endian::Endianness;
pub use error::{Result, StoreError};
pub use record::{Payload, Record, RecordHeader, RecordKind, SubSecond};
pub use store::{OpenOptions, StoreInfo, TickStore};
pub use symtab::SymbolTable;
