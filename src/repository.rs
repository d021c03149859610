use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, Transaction};

use crate::authentication::AccountGetter;
use crate::entities::{Account, AccountId, TodoItem, TodoItemId, TodoList, TodoListId};
use crate::error::{Error, Result};
use crate::logic::{
    AccountSaver, TodoItemSaver, TodoItemSelecter, TodoItemsCompletedDeleter,
    TodoItemsCompletedUpdater, TodoListDeleter, TodoListGetter, TodoListSaver, TodoListUpdater,
    TodoListsByAccountGetter,
};

/// SQLite persistence. Account lookups run on the pool; everything touching
/// lists and items goes through a [`UnitOfWork`].
#[derive(Debug, Clone)]
pub struct Repository {
    sqlite_pool: SqlitePool,
}

impl Repository {
    pub fn new(sqlite_pool: SqlitePool) -> Self {
        Self { sqlite_pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let sqlite_pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self::new(sqlite_pool))
    }

    /// Private in-memory database. The pool keeps its single connection open
    /// for its whole life, since the database dies with the connection.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let sqlite_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self::new(sqlite_pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!().run(&self.sqlite_pool).await?;
        Ok(())
    }

    /// Takes the write lock up front. A deferred transaction that reads and
    /// then writes fails with SQLITE_BUSY when another writer got there first.
    pub async fn begin(&self) -> Result<UnitOfWork> {
        Ok(UnitOfWork {
            tx: self.sqlite_pool.begin_with("BEGIN IMMEDIATE").await?,
        })
    }
}

fn unique_violation_as_already_exists(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Error::AlreadyExists,
        _ => Error::Sqlx(err),
    }
}

#[async_trait]
impl AccountGetter for Repository {
    async fn get_account(&mut self, username: &str) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, username, password_hash FROM account WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.sqlite_pool)
        .await?;

        Ok(account)
    }
}

#[async_trait]
impl AccountSaver for Repository {
    async fn save_account(&mut self, username: &str, password_hash: &str) -> Result<()> {
        sqlx::query("INSERT INTO account (username, password_hash) VALUES (?, ?)")
            .bind(username)
            .bind(password_hash)
            .execute(&self.sqlite_pool)
            .await
            .map_err(unique_violation_as_already_exists)?;

        Ok(())
    }
}

/// One transaction. An ownership check and the mutation it guards run inside
/// the same unit so a concurrent delete cannot slip in between.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork {
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Commits when `result` is `Ok`, rolls back otherwise.
    pub async fn finish<T>(self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.tx.rollback().await {
                    tracing::error!(error = %rollback_err, cause = %err, "rollback failed");
                    return Err(rollback_err.into());
                }
                Err(err)
            }
        }
    }

    async fn set_completed(&mut self, ids: &[TodoItemId], completed: bool) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE todo_item SET completed = ");
        query.push_bind(completed).push(" WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        query.build().execute(&mut *self.tx).await?;
        Ok(())
    }
}

#[async_trait]
impl TodoListSaver for UnitOfWork {
    async fn save_todo_list(
        &mut self,
        account_id: AccountId,
        name: &str,
    ) -> Result<(TodoListId, DateTime<Utc>)> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO todo_list (name, account_id, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(account_id)
        .bind(now)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok((result.last_insert_rowid(), now))
    }
}

#[async_trait]
impl TodoListGetter for UnitOfWork {
    async fn get_todo_list(&mut self, id: TodoListId) -> Result<TodoList> {
        sqlx::query_as::<_, TodoList>(
            "SELECT id, account_id, name, created_at, updated_at FROM todo_list WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(Error::NotFound)
    }
}

#[async_trait]
impl TodoListUpdater for UnitOfWork {
    async fn update_todo_list(&mut self, id: TodoListId, name: &str) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        let result = sqlx::query("UPDATE todo_list SET name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(now)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(now)
    }
}

#[async_trait]
impl TodoListsByAccountGetter for UnitOfWork {
    async fn get_todo_lists_by_account(&mut self, account_id: AccountId) -> Result<Vec<TodoList>> {
        let lists = sqlx::query_as::<_, TodoList>(
            "SELECT id, account_id, name, created_at, updated_at FROM todo_list \
             WHERE account_id = ? ORDER BY id",
        )
        .bind(account_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(lists)
    }
}

#[async_trait]
impl TodoListDeleter for UnitOfWork {
    async fn delete_todo_list(&mut self, id: TodoListId) -> Result<()> {
        sqlx::query("DELETE FROM todo_list WHERE id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TodoItemSaver for UnitOfWork {
    async fn save_todo_item(
        &mut self,
        todo_list_id: TodoListId,
        description: &str,
    ) -> Result<(TodoItemId, DateTime<Utc>)> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO todo_item (todo_list_id, description, completed, created_at) \
             VALUES (?, ?, FALSE, ?)",
        )
        .bind(todo_list_id)
        .bind(description)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok((result.last_insert_rowid(), now))
    }
}

#[async_trait]
impl TodoItemSelecter for UnitOfWork {
    async fn select_todo_items(&mut self, todo_list_id: TodoListId) -> Result<Vec<TodoItem>> {
        let items = sqlx::query_as::<_, TodoItem>(
            "SELECT id, todo_list_id, description, completed, created_at FROM todo_item \
             WHERE todo_list_id = ? ORDER BY id",
        )
        .bind(todo_list_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(items)
    }
}

#[async_trait]
impl TodoItemsCompletedUpdater for UnitOfWork {
    async fn update_todo_items_completed(
        &mut self,
        completed: &[TodoItemId],
        active: &[TodoItemId],
    ) -> Result<()> {
        self.set_completed(completed, true).await?;
        self.set_completed(active, false).await
    }
}

#[async_trait]
impl TodoItemsCompletedDeleter for UnitOfWork {
    async fn delete_todo_items_completed(&mut self, todo_list_id: TodoListId) -> Result<()> {
        sqlx::query("DELETE FROM todo_item WHERE todo_list_id = ? AND completed = TRUE")
            .bind(todo_list_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}
