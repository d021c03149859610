//! Validation and ownership-checked operations over accounts, todo lists and todo items.
//!
//! Every operation takes the caller's account id as resolved by the
//! authentication layer and re-checks it against the persisted owner before
//! reading or mutating. Storage is reached only through the narrow capability
//! traits below, so a transaction or a test fake can stand in for it.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::entities::{AccountId, TodoItem, TodoItemId, TodoList, TodoListId};
use crate::error::{Error, Result};

#[async_trait]
pub trait AccountSaver: Send {
    /// Fails with [`Error::AlreadyExists`] when the username is taken.
    async fn save_account(&mut self, username: &str, password_hash: &str) -> Result<()>;
}

#[async_trait]
pub trait TodoListSaver: Send {
    async fn save_todo_list(
        &mut self,
        account_id: AccountId,
        name: &str,
    ) -> Result<(TodoListId, DateTime<Utc>)>;
}

#[async_trait]
pub trait TodoListGetter: Send {
    /// Fails with [`Error::NotFound`] when no list has this id.
    async fn get_todo_list(&mut self, id: TodoListId) -> Result<TodoList>;
}

#[async_trait]
pub trait TodoListUpdater: Send {
    async fn update_todo_list(&mut self, id: TodoListId, name: &str) -> Result<DateTime<Utc>>;
}

#[async_trait]
pub trait TodoListsByAccountGetter: Send {
    async fn get_todo_lists_by_account(&mut self, account_id: AccountId) -> Result<Vec<TodoList>>;
}

#[async_trait]
pub trait TodoListDeleter: Send {
    async fn delete_todo_list(&mut self, id: TodoListId) -> Result<()>;
}

#[async_trait]
pub trait TodoItemSaver: Send {
    async fn save_todo_item(
        &mut self,
        todo_list_id: TodoListId,
        description: &str,
    ) -> Result<(TodoItemId, DateTime<Utc>)>;
}

#[async_trait]
pub trait TodoItemSelecter: Send {
    async fn select_todo_items(&mut self, todo_list_id: TodoListId) -> Result<Vec<TodoItem>>;
}

#[async_trait]
pub trait TodoItemsCompletedUpdater: Send {
    /// Marks `completed` as done, then `active` as not done.
    async fn update_todo_items_completed(
        &mut self,
        completed: &[TodoItemId],
        active: &[TodoItemId],
    ) -> Result<()>;
}

#[async_trait]
pub trait TodoItemsCompletedDeleter: Send {
    async fn delete_todo_items_completed(&mut self, todo_list_id: TodoListId) -> Result<()>;
}

static USERNAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-zA-Z][a-zA-Z0-9]+$").expect("username pattern is valid"));

fn length_between(value: &str, min: usize, max: usize) -> bool {
    (min..=max).contains(&value.chars().count())
}

pub fn validate_username(username: &str) -> bool {
    length_between(username, 5, 30) && USERNAME_PATTERN.is_match(username)
}

pub fn validate_password(password: &str) -> bool {
    password.chars().count() >= 5
}

pub fn validate_todo_list_name(name: &str) -> bool {
    length_between(name, 5, 30)
}

pub fn validate_todo_item_description(description: &str) -> bool {
    length_between(description, 4, 100)
}

pub async fn create_account<S>(saver: &mut S, username: &str, password: &str) -> Result<()>
where
    S: AccountSaver + ?Sized,
{
    if !(validate_username(username) && validate_password(password)) {
        return Err(Error::InvalidInput);
    }

    // argon2 hashing is blocking
    let password = password.to_owned();
    let hash = tokio::task::spawn_blocking(move || password_auth::generate_hash(password)).await?;

    saver.save_account(username, &hash).await
}

fn ensure_owner(list: &TodoList, account_id: AccountId) -> Result<()> {
    if list.account_id != account_id {
        tracing::warn!(
            todo_list_id = list.id,
            owner = list.account_id,
            caller = account_id,
            "permission denied"
        );
        return Err(Error::PermissionDenied);
    }
    Ok(())
}

pub async fn create_todo_list<S>(saver: &mut S, account_id: AccountId, name: &str) -> Result<TodoList>
where
    S: TodoListSaver + ?Sized,
{
    if !validate_todo_list_name(name) {
        return Err(Error::InvalidInput);
    }

    let (id, created_at) = saver.save_todo_list(account_id, name).await?;
    Ok(TodoList {
        id,
        account_id,
        name: name.to_owned(),
        created_at,
        updated_at: created_at,
    })
}

pub async fn update_todo_list<R>(
    repo: &mut R,
    id: TodoListId,
    account_id: AccountId,
    name: &str,
) -> Result<TodoList>
where
    R: TodoListGetter + TodoListUpdater + ?Sized,
{
    if !validate_todo_list_name(name) {
        return Err(Error::InvalidInput);
    }

    let mut list = repo.get_todo_list(id).await?;
    ensure_owner(&list, account_id)?;

    list.updated_at = repo.update_todo_list(id, name).await?;
    list.name = name.to_owned();
    Ok(list)
}

pub async fn list_todo_lists<G>(getter: &mut G, account_id: AccountId) -> Result<Vec<TodoList>>
where
    G: TodoListsByAccountGetter + ?Sized,
{
    getter.get_todo_lists_by_account(account_id).await
}

pub async fn delete_todo_list<R>(repo: &mut R, id: TodoListId, account_id: AccountId) -> Result<()>
where
    R: TodoListGetter + TodoListDeleter + ?Sized,
{
    let list = repo.get_todo_list(id).await?;
    ensure_owner(&list, account_id)?;

    repo.delete_todo_list(id).await
}

pub async fn create_todo_item<R>(
    repo: &mut R,
    account_id: AccountId,
    todo_list_id: TodoListId,
    description: &str,
) -> Result<TodoItem>
where
    R: TodoListGetter + TodoItemSaver + ?Sized,
{
    if !validate_todo_item_description(description) {
        return Err(Error::InvalidInput);
    }

    let list = repo.get_todo_list(todo_list_id).await?;
    ensure_owner(&list, account_id)?;

    let (id, created_at) = repo.save_todo_item(todo_list_id, description).await?;
    Ok(TodoItem {
        id,
        todo_list_id,
        description: description.to_owned(),
        completed: false,
        created_at,
    })
}

pub async fn select_todo_items<R>(
    repo: &mut R,
    account_id: AccountId,
    todo_list_id: TodoListId,
) -> Result<Vec<TodoItem>>
where
    R: TodoListGetter + TodoItemSelecter + ?Sized,
{
    let list = repo.get_todo_list(todo_list_id).await?;
    ensure_owner(&list, account_id)?;

    repo.select_todo_items(todo_list_id).await
}

/// True when every id in `ids` names one of `items`.
pub fn todo_items_contain(items: &[TodoItem], ids: &[TodoItemId]) -> bool {
    let known: HashSet<TodoItemId> = items.iter().map(|item| item.id).collect();
    ids.iter().all(|id| known.contains(id))
}

/// An id present in both sets is accepted; the updater applies `active` last.
pub async fn update_todo_items_completed<R>(
    repo: &mut R,
    account_id: AccountId,
    todo_list_id: TodoListId,
    completed: &[TodoItemId],
    active: &[TodoItemId],
) -> Result<()>
where
    R: TodoListGetter + TodoItemSelecter + TodoItemsCompletedUpdater + ?Sized,
{
    let list = repo.get_todo_list(todo_list_id).await?;
    ensure_owner(&list, account_id)?;

    let items = repo.select_todo_items(todo_list_id).await?;
    if !(todo_items_contain(&items, completed) && todo_items_contain(&items, active)) {
        tracing::warn!(todo_list_id, caller = account_id, "batch references foreign todo items");
        return Err(Error::PermissionDenied);
    }

    repo.update_todo_items_completed(completed, active).await
}

pub async fn delete_todo_items_completed<R>(
    repo: &mut R,
    account_id: AccountId,
    todo_list_id: TodoListId,
) -> Result<()>
where
    R: TodoListGetter + TodoItemsCompletedDeleter + ?Sized,
{
    let list = repo.get_todo_list(todo_list_id).await?;
    ensure_owner(&list, account_id)?;

    repo.delete_todo_items_completed(todo_list_id).await
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{Duration, TimeZone};

    use super::*;

    struct FakeRepo {
        clock: DateTime<Utc>,
        next_id: i64,
        lists: HashMap<TodoListId, TodoList>,
        items: Vec<TodoItem>,
        saved_accounts: Vec<(String, String)>,
        mutations: usize,
    }

    impl FakeRepo {
        fn new() -> Self {
            Self {
                clock: Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
                next_id: 1,
                lists: HashMap::new(),
                items: Vec::new(),
                saved_accounts: Vec::new(),
                mutations: 0,
            }
        }

        fn tick(&mut self) -> (i64, DateTime<Utc>) {
            let id = self.next_id;
            self.next_id += 1;
            self.clock += Duration::seconds(1);
            (id, self.clock)
        }

        fn with_item(mut self, todo_list_id: TodoListId, description: &str) -> Self {
            let (id, created_at) = self.tick();
            self.items.push(TodoItem {
                id,
                todo_list_id,
                description: description.into(),
                completed: false,
                created_at,
            });
            self
        }
    }

    #[async_trait]
    impl AccountSaver for FakeRepo {
        async fn save_account(&mut self, username: &str, password_hash: &str) -> Result<()> {
            self.saved_accounts.push((username.into(), password_hash.into()));
            Ok(())
        }
    }

    #[async_trait]
    impl TodoListSaver for FakeRepo {
        async fn save_todo_list(
            &mut self,
            account_id: AccountId,
            name: &str,
        ) -> Result<(TodoListId, DateTime<Utc>)> {
            let (id, now) = self.tick();
            self.lists.insert(
                id,
                TodoList {
                    id,
                    account_id,
                    name: name.into(),
                    created_at: now,
                    updated_at: now,
                },
            );
            self.mutations += 1;
            Ok((id, now))
        }
    }

    #[async_trait]
    impl TodoListGetter for FakeRepo {
        async fn get_todo_list(&mut self, id: TodoListId) -> Result<TodoList> {
            self.lists.get(&id).cloned().ok_or(Error::NotFound)
        }
    }

    #[async_trait]
    impl TodoListUpdater for FakeRepo {
        async fn update_todo_list(&mut self, id: TodoListId, name: &str) -> Result<DateTime<Utc>> {
            let (_, now) = self.tick();
            let list = self.lists.get_mut(&id).ok_or(Error::NotFound)?;
            list.name = name.into();
            list.updated_at = now;
            self.mutations += 1;
            Ok(now)
        }
    }

    #[async_trait]
    impl TodoListsByAccountGetter for FakeRepo {
        async fn get_todo_lists_by_account(&mut self, account_id: AccountId) -> Result<Vec<TodoList>> {
            Ok(self
                .lists
                .values()
                .filter(|list| list.account_id == account_id)
                .cloned()
                .collect())
        }
    }

    #[async_trait]
    impl TodoListDeleter for FakeRepo {
        async fn delete_todo_list(&mut self, id: TodoListId) -> Result<()> {
            self.lists.remove(&id);
            self.mutations += 1;
            Ok(())
        }
    }

    #[async_trait]
    impl TodoItemSaver for FakeRepo {
        async fn save_todo_item(
            &mut self,
            todo_list_id: TodoListId,
            description: &str,
        ) -> Result<(TodoItemId, DateTime<Utc>)> {
            let (id, now) = self.tick();
            self.items.push(TodoItem {
                id,
                todo_list_id,
                description: description.into(),
                completed: false,
                created_at: now,
            });
            self.mutations += 1;
            Ok((id, now))
        }
    }

    #[async_trait]
    impl TodoItemSelecter for FakeRepo {
        async fn select_todo_items(&mut self, todo_list_id: TodoListId) -> Result<Vec<TodoItem>> {
            Ok(self
                .items
                .iter()
                .filter(|item| item.todo_list_id == todo_list_id)
                .cloned()
                .collect())
        }
    }

    #[async_trait]
    impl TodoItemsCompletedUpdater for FakeRepo {
        async fn update_todo_items_completed(
            &mut self,
            completed: &[TodoItemId],
            active: &[TodoItemId],
        ) -> Result<()> {
            for item in self.items.iter_mut() {
                if completed.contains(&item.id) {
                    item.completed = true;
                }
            }
            for item in self.items.iter_mut() {
                if active.contains(&item.id) {
                    item.completed = false;
                }
            }
            self.mutations += 1;
            Ok(())
        }
    }

    #[async_trait]
    impl TodoItemsCompletedDeleter for FakeRepo {
        async fn delete_todo_items_completed(&mut self, todo_list_id: TodoListId) -> Result<()> {
            self.items
                .retain(|item| !(item.todo_list_id == todo_list_id && item.completed));
            self.mutations += 1;
            Ok(())
        }
    }

    const ALICE: AccountId = 1;
    const BOB: AccountId = 2;

    #[test]
    fn test_validate_username() {
        assert!(!validate_username(""), "empty string should be rejected");
        assert!(!validate_username("tung"), "len should not be less than 5");
        assert!(
            !validate_username("abcdefdfkfjkafjdkafdftttttfddddd"),
            "len should not be bigger than 30"
        );
        assert!(!validate_username("1234567"), "should not start with a number");
        assert!(!validate_username("ab defg"), "should not contain spaces");
        assert!(!validate_username("abdd^&efg"), "should not contain symbols");
        assert!(validate_username("quangtung"));
        assert!(validate_username("user2024"));
    }

    #[test]
    fn test_validate_lengths() {
        assert!(!validate_password("abcd"));
        assert!(validate_password("abcde"));
        assert!(!validate_todo_list_name("Shop"));
        assert!(validate_todo_list_name("Groceries"));
        assert!(!validate_todo_list_name(&"x".repeat(31)));
        assert!(!validate_todo_item_description("egg"));
        assert!(validate_todo_item_description("eggs"));
        assert!(validate_todo_item_description(&"y".repeat(100)));
        assert!(!validate_todo_item_description(&"y".repeat(101)));
    }

    #[tokio::test]
    async fn test_create_account() {
        let mut repo = FakeRepo::new();

        let result = create_account(&mut repo, "tungquang", "abfd").await;
        assert!(matches!(result, Err(Error::InvalidInput)));
        assert!(repo.saved_accounts.is_empty());

        let result = create_account(&mut repo, "1tungquang", "abcdef").await;
        assert!(matches!(result, Err(Error::InvalidInput)));
        assert!(repo.saved_accounts.is_empty());

        create_account(&mut repo, "tungquang", "abcde").await.unwrap();
        create_account(&mut repo, "otheruser", "a much longer password").await.unwrap();
        assert_eq!(repo.saved_accounts.len(), 2);

        let (username, hash) = &repo.saved_accounts[0];
        assert_eq!(username, "tungquang");
        assert_ne!(hash, "abcde");
        assert!(password_auth::verify_password("abcde", hash).is_ok());
        // fixed-size encoding regardless of password length
        assert_eq!(hash.len(), repo.saved_accounts[1].1.len());
    }

    #[test]
    fn test_todo_items_contain() {
        let repo = FakeRepo::new()
            .with_item(1, "milk")
            .with_item(1, "bread")
            .with_item(1, "eggs");
        let ids: Vec<_> = repo.items.iter().map(|item| item.id).collect();

        assert!(todo_items_contain(&repo.items, &ids[..2]));
        assert!(todo_items_contain(&repo.items, &[]));
        assert!(!todo_items_contain(&repo.items, &[ids[0], ids[1], 42]));
    }

    #[tokio::test]
    async fn test_create_todo_list_rejects_short_name() {
        let mut repo = FakeRepo::new();
        let result = create_todo_list(&mut repo, ALICE, "Shop").await;
        assert!(matches!(result, Err(Error::InvalidInput)));
        assert_eq!(repo.mutations, 0);
    }

    #[tokio::test]
    async fn test_update_todo_list_checks_owner() {
        let mut repo = FakeRepo::new();
        let list = create_todo_list(&mut repo, ALICE, "Groceries").await.unwrap();
        assert_eq!(list.created_at, list.updated_at);
        let mutations = repo.mutations;

        let denied = update_todo_list(&mut repo, list.id, BOB, "New Name").await;
        assert!(matches!(denied, Err(Error::PermissionDenied)));
        assert_eq!(repo.mutations, mutations);
        assert_eq!(repo.lists[&list.id].name, "Groceries");

        let updated = update_todo_list(&mut repo, list.id, ALICE, "New Name").await.unwrap();
        assert_eq!(updated.name, "New Name");
        assert_eq!(updated.account_id, ALICE);
        assert!(updated.updated_at > list.updated_at);
        assert_eq!(updated.created_at, list.created_at);
    }

    #[tokio::test]
    async fn test_update_missing_todo_list() {
        let mut repo = FakeRepo::new();
        let result = update_todo_list(&mut repo, 99, ALICE, "New Name").await;
        assert!(matches!(result, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn test_delete_todo_list_checks_owner() {
        let mut repo = FakeRepo::new();
        let list = create_todo_list(&mut repo, ALICE, "Groceries").await.unwrap();

        let denied = delete_todo_list(&mut repo, list.id, BOB).await;
        assert!(matches!(denied, Err(Error::PermissionDenied)));
        assert!(repo.lists.contains_key(&list.id));

        delete_todo_list(&mut repo, list.id, ALICE).await.unwrap();
        assert!(!repo.lists.contains_key(&list.id));
    }

    #[tokio::test]
    async fn test_list_todo_lists_only_returns_own() {
        let mut repo = FakeRepo::new();
        create_todo_list(&mut repo, ALICE, "Groceries").await.unwrap();
        create_todo_list(&mut repo, BOB, "Homework").await.unwrap();

        let lists = list_todo_lists(&mut repo, ALICE).await.unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].name, "Groceries");
    }

    #[tokio::test]
    async fn test_todo_items_check_list_owner() {
        let mut repo = FakeRepo::new();
        let list = create_todo_list(&mut repo, ALICE, "Groceries").await.unwrap();

        let denied = create_todo_item(&mut repo, BOB, list.id, "buy milk").await;
        assert!(matches!(denied, Err(Error::PermissionDenied)));
        assert!(repo.items.is_empty());

        let invalid = create_todo_item(&mut repo, ALICE, list.id, "eg").await;
        assert!(matches!(invalid, Err(Error::InvalidInput)));

        let item = create_todo_item(&mut repo, ALICE, list.id, "buy milk").await.unwrap();
        assert!(!item.completed);
        assert_eq!(item.todo_list_id, list.id);

        let denied = select_todo_items(&mut repo, BOB, list.id).await;
        assert!(matches!(denied, Err(Error::PermissionDenied)));

        let items = select_todo_items(&mut repo, ALICE, list.id).await.unwrap();
        assert_eq!(items, vec![item]);
    }

    #[tokio::test]
    async fn test_update_completed_rejects_foreign_ids() {
        let mut repo = FakeRepo::new();
        let mine = create_todo_list(&mut repo, ALICE, "Groceries").await.unwrap();
        let theirs = create_todo_list(&mut repo, BOB, "Homework").await.unwrap();
        let milk = create_todo_item(&mut repo, ALICE, mine.id, "buy milk").await.unwrap();
        let essay = create_todo_item(&mut repo, BOB, theirs.id, "write essay").await.unwrap();
        let mutations = repo.mutations;

        let result =
            update_todo_items_completed(&mut repo, ALICE, mine.id, &[milk.id, essay.id], &[]).await;
        assert!(matches!(result, Err(Error::PermissionDenied)));

        let result = update_todo_items_completed(&mut repo, ALICE, mine.id, &[], &[404]).await;
        assert!(matches!(result, Err(Error::PermissionDenied)));

        let result = update_todo_items_completed(&mut repo, BOB, mine.id, &[milk.id], &[]).await;
        assert!(matches!(result, Err(Error::PermissionDenied)));

        assert_eq!(repo.mutations, mutations);
        assert!(repo.items.iter().all(|item| !item.completed));
    }

    #[tokio::test]
    async fn test_update_and_delete_completed() {
        let mut repo = FakeRepo::new();
        let list = create_todo_list(&mut repo, ALICE, "Groceries").await.unwrap();
        let milk = create_todo_item(&mut repo, ALICE, list.id, "buy milk").await.unwrap();
        let eggs = create_todo_item(&mut repo, ALICE, list.id, "buy eggs").await.unwrap();

        update_todo_items_completed(&mut repo, ALICE, list.id, &[milk.id, eggs.id], &[eggs.id])
            .await
            .unwrap();
        let items = select_todo_items(&mut repo, ALICE, list.id).await.unwrap();
        assert!(items.iter().find(|i| i.id == milk.id).unwrap().completed);
        assert!(!items.iter().find(|i| i.id == eggs.id).unwrap().completed);

        let denied = delete_todo_items_completed(&mut repo, BOB, list.id).await;
        assert!(matches!(denied, Err(Error::PermissionDenied)));
        assert_eq!(repo.items.len(), 2);

        delete_todo_items_completed(&mut repo, ALICE, list.id).await.unwrap();
        let remaining = select_todo_items(&mut repo, ALICE, list.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, eggs.id);
    }
}
