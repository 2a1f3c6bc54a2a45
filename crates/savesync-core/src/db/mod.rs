//! Local write-ahead store for save records

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use repository::{SaveRecordRepository, SqliteSaveRecordRepository, StoredSaveRecord};
