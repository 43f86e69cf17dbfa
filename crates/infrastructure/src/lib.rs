pub mod database;
pub mod error_handling;

pub use database::{DatabaseManager, PostgresJobStore, SqliteJobStore};
pub use error_handling::{classify_sqlx_error, mask_database_url};
