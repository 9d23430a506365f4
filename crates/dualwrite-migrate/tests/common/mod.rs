//! Shared fixtures: an in-memory SQLite `users` table and its entity.

#![allow(dead_code)]

use std::sync::Arc;

use dualwrite_migrate::core::Conn;
use dualwrite_migrate::drivers::SqlitePool;
use dualwrite_migrate::{Entity, Result, Row, SqlValue, TableSpec};
use tokio_util::sync::CancellationToken;

pub const CREATE_USERS: &str =
    "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT, utime INTEGER NOT NULL DEFAULT 0)";

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
}

impl Entity for User {
    fn id(&self) -> i64 {
        self.id
    }

    fn compare_to(&self, other: &Self) -> bool {
        self == other
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            name: row.get_string("name")?,
            email: row.get_opt_string("email")?,
        })
    }
}

pub fn users_spec() -> TableSpec {
    TableSpec::new("users")
        .with_utime_column("utime")
        .with_columns(["id", "name", "email"])
}

/// A fresh in-memory store with an empty `users` table.
pub async fn users_store(label: &str) -> Arc<SqlitePool> {
    let pool = SqlitePool::in_memory(label).await.unwrap();
    pool.exec(&CancellationToken::new(), CREATE_USERS, &[])
        .await
        .unwrap();
    Arc::new(pool)
}

pub async fn insert_user(store: &SqlitePool, id: i64, name: &str, email: Option<&str>, utime: i64) {
    store
        .exec(
            &CancellationToken::new(),
            "INSERT INTO users (id, name, email, utime) VALUES (?, ?, ?, ?)",
            &[
                SqlValue::I64(id),
                SqlValue::from(name),
                SqlValue::from(email),
                SqlValue::I64(utime),
            ],
        )
        .await
        .unwrap();
}

/// All users ordered by id.
pub async fn users(store: &SqlitePool) -> Vec<User> {
    store
        .query(
            &CancellationToken::new(),
            "SELECT id, name, email FROM users ORDER BY id",
            &[],
        )
        .await
        .unwrap()
        .iter()
        .map(|row| User::from_row(row).unwrap())
        .collect()
}
