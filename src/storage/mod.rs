pub mod handle;
pub mod index;
pub mod keyspace;
pub mod store;

pub use handle::{Collection, QueryHandle, TableSnapshot, WhereClause};
pub use store::{Connection, Store, TableTx, UpgradeTx};
