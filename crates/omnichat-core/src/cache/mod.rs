pub mod collections;
pub mod db;

pub use collections::EntityCache;
pub use db::Database;
