// src/storage/mod.rs — Target database adapters
//
// Implementations of `QueryStore` for the databases questions are asked
// against. Only SQLite ships today.

pub mod sqlite;

pub use sqlite::SqliteDatabase;
