use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub type AccountId = i64;
pub type TodoListId = i64;
pub type TodoItemId = i64;

#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct TodoList {
    pub id: TodoListId,
    pub account_id: AccountId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: TodoItemId,
    pub todo_list_id: TodoListId,
    pub description: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccountRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTodoListRequest {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTodoListRequest {
    pub id: TodoListId,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTodoItemRequest {
    pub todo_list_id: TodoListId,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTodoItemsCompletedRequest {
    pub todo_list_id: TodoListId,
    #[serde(default)]
    pub completed_ids: Vec<TodoItemId>,
    #[serde(default)]
    pub active_ids: Vec<TodoItemId>,
}
