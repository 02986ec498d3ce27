pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod store;
pub mod tree;
pub mod types;

pub use memory::MemoryArchiveStore;
pub use schema::SchemaPolicy;
pub use sqlite::SqliteArchiveStore;
pub use store::{ArchiveStore, SharedArchiveStore, StoreError, StoreResult};
pub use tree::{KeywordCall, KeywordTree, load_keyword_tree};
pub use types::{Record, RowId, SqlValue, StoredRow, decode_list, encode_list};
