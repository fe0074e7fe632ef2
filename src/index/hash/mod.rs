pub mod error;
pub mod page;
pub mod table;

pub use error::HashTableError;
pub use page::{BucketPage, DirectoryPage};
pub use table::{ExtendibleHashTable, KeyHasher, Xxh3KeyHasher};
