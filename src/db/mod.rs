use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};

pub mod grants;
pub mod repository;
pub mod row_parsers;

pub async fn init() -> anyhow::Result<SqlitePool> {
	let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;

	let pool = SqlitePoolOptions::new()
		.max_connections(10)
		.min_connections(1)
		.acquire_timeout(Duration::from_secs(10))
		.connect(&database_url)
		.await
		.context("failed to connect to database")?;

	sqlx::migrate!()
		.run(&pool)
		.await
		.context("failed to run migrations")?;

	Ok(pool)
}

/// Serialises write transactions within the process.
///
/// A deferred SQLite transaction that reads before it writes fails with
/// `SQLITE_BUSY` once another writer holds the lock. Every write transaction
/// keeps this guard until it commits or is dropped.
#[derive(Clone, Default)]
pub struct WriteLock(Arc<Mutex<()>>);

impl WriteLock {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn begin(&self, pool: &SqlitePool) -> Result<WriteTx, sqlx::Error> {
		let guard = self.0.clone().lock_owned().await;
		let tx = pool.begin().await?;
		Ok(WriteTx { tx, _guard: guard })
	}
}

/// A transaction that keeps the [`WriteLock`] until it is committed or dropped.
pub struct WriteTx {
	tx: Transaction<'static, Sqlite>,
	_guard: OwnedMutexGuard<()>,
}

impl WriteTx {
	pub async fn commit(self) -> Result<(), sqlx::Error> {
		self.tx.commit().await
	}
}

impl Deref for WriteTx {
	type Target = SqliteConnection;

	fn deref(&self) -> &Self::Target {
		&self.tx
	}
}

impl DerefMut for WriteTx {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.tx
	}
}
