use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::authentication::CurrentAccount;
use crate::entities::{
    CreateAccountRequest, CreateTodoItemRequest, CreateTodoListRequest, TodoItem, TodoList,
    TodoListId, UpdateTodoItemsCompletedRequest, UpdateTodoListRequest,
};
use crate::error::Result;
use crate::{logic, AppState};

pub async fn create_account(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<StatusCode> {
    let mut repository = state.repository.clone();
    logic::create_account(&mut repository, &request.username, &request.password).await?;

    tracing::info!(username = %request.username, "account created");
    Ok(StatusCode::CREATED)
}

/// Reaching this handler means the credentials were accepted; the token
/// travels back in the `X-Auth-Token` header.
pub async fn login(CurrentAccount(account_id): CurrentAccount) -> impl IntoResponse {
    tracing::debug!(account_id, "login");
    Json(json!({ "status": "ok" }))
}

pub async fn create_todo_list(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Json(request): Json<CreateTodoListRequest>,
) -> Result<(StatusCode, Json<TodoList>)> {
    let mut uow = state.repository.begin().await?;
    let result = logic::create_todo_list(&mut uow, account_id, &request.name).await;
    let list = uow.finish(result).await?;

    Ok((StatusCode::CREATED, Json(list)))
}

pub async fn update_todo_list(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Json(request): Json<UpdateTodoListRequest>,
) -> Result<Json<TodoList>> {
    let mut uow = state.repository.begin().await?;
    let result = logic::update_todo_list(&mut uow, request.id, account_id, &request.name).await;
    let list = uow.finish(result).await?;

    Ok(Json(list))
}

pub async fn get_todo_lists(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
) -> Result<Json<Vec<TodoList>>> {
    let mut uow = state.repository.begin().await?;
    let result = logic::list_todo_lists(&mut uow, account_id).await;
    let lists = uow.finish(result).await?;

    Ok(Json(lists))
}

pub async fn delete_todo_list(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Path(id): Path<TodoListId>,
) -> Result<StatusCode> {
    let mut uow = state.repository.begin().await?;
    let result = logic::delete_todo_list(&mut uow, id, account_id).await;
    uow.finish(result).await?;

    Ok(StatusCode::OK)
}

pub async fn create_todo_item(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Json(request): Json<CreateTodoItemRequest>,
) -> Result<(StatusCode, Json<TodoItem>)> {
    let mut uow = state.repository.begin().await?;
    let result = logic::create_todo_item(
        &mut uow,
        account_id,
        request.todo_list_id,
        &request.description,
    )
    .await;
    let item = uow.finish(result).await?;

    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn get_todo_items(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Path(todo_list_id): Path<TodoListId>,
) -> Result<Json<Vec<TodoItem>>> {
    let mut uow = state.repository.begin().await?;
    let result = logic::select_todo_items(&mut uow, account_id, todo_list_id).await;
    let items = uow.finish(result).await?;

    Ok(Json(items))
}

pub async fn update_todo_items_completed(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Json(request): Json<UpdateTodoItemsCompletedRequest>,
) -> Result<StatusCode> {
    let mut uow = state.repository.begin().await?;
    let result = logic::update_todo_items_completed(
        &mut uow,
        account_id,
        request.todo_list_id,
        &request.completed_ids,
        &request.active_ids,
    )
    .await;
    uow.finish(result).await?;

    Ok(StatusCode::OK)
}

pub async fn delete_todo_items_completed(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Path(todo_list_id): Path<TodoListId>,
) -> Result<StatusCode> {
    let mut uow = state.repository.begin().await?;
    let result = logic::delete_todo_items_completed(&mut uow, account_id, todo_list_id).await;
    uow.finish(result).await?;

    Ok(StatusCode::OK)
}
