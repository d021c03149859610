//! Multi-tenant todo backend: accounts, todo lists and todo items behind
//! token-based authentication.
//!
//! A request carrying HTTP basic credentials receives a fresh session token
//! in `X-Auth-Token`; later requests present that token instead, and each use
//! pushes its expiry back. Handlers only ever see the account id resolved
//! by [`authentication::authenticated`], and every operation in [`logic`]
//! checks it against the owner of the list it touches.

pub mod authentication;
pub mod config;
pub mod crud_ops;
pub mod entities;
pub mod error;
pub mod logic;
pub mod repository;
pub mod session_store;

use std::sync::Arc;

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use authentication::{SessionStore, Verifier, AUTH_TOKEN_HEADER};
use repository::Repository;

pub use error::{Error, Result};

#[derive(Clone)]
pub struct AppState {
    pub repository: Repository,
    pub sessions: Arc<dyn SessionStore>,
    pub verifier: Verifier,
}

impl AppState {
    pub fn new(repository: Repository, sessions: Arc<dyn SessionStore>, verifier: Verifier) -> Self {
        Self {
            repository,
            sessions,
            verifier,
        }
    }
}

pub fn app(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/login", post(crud_ops::login))
        .route(
            "/todos",
            post(crud_ops::create_todo_list)
                .put(crud_ops::update_todo_list)
                .get(crud_ops::get_todo_lists),
        )
        .route("/todos/{id}", delete(crud_ops::delete_todo_list))
        .route("/todo-items", post(crud_ops::create_todo_item))
        .route("/todo-items/{todo_list_id}", get(crud_ops::get_todo_items))
        .route(
            "/todo-items/completed",
            put(crud_ops::update_todo_items_completed),
        )
        .route(
            "/todo-items/completed/{todo_list_id}",
            delete(crud_ops::delete_todo_items_completed),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            authentication::authenticated,
        ));

    Router::new()
        .route("/accounts", post(crud_ops::create_account))
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn cors_layer(origin: HeaderValue) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origin)
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, AUTH_TOKEN_HEADER])
        .expose_headers([AUTH_TOKEN_HEADER])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
            Method::PUT,
            Method::DELETE,
        ])
}
