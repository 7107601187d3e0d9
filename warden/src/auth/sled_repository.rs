use super::error::AuthError;
use super::models::{RefreshTokenRecord, User};
use super::repository::{RefreshTokenRepository, UserRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sled::Db;
use std::path::Path;

const USERS_TREE: &str = "users";
const USERS_BY_EMAIL_TREE: &str = "users_by_email";
const USERS_BY_USERNAME_TREE: &str = "users_by_username";
const TOKENS_TREE: &str = "refresh_tokens";
const TOKENS_BY_HASH_TREE: &str = "refresh_tokens_by_hash";
const TOKENS_BY_USER_TREE: &str = "refresh_tokens_by_user";

fn index_key(value: &str) -> Vec<u8> {
    value.trim().to_lowercase().into_bytes()
}

/// Claim `key` for `id` in a unique index. Returns false if another id already holds it.
fn claim(tree: &sled::Tree, key: &[u8], id: &str) -> Result<bool, AuthError> {
    match tree.compare_and_swap(key, None::<&[u8]>, Some(id.as_bytes()))? {
        Ok(()) => Ok(true),
        Err(existing) => Ok(existing.current.as_deref() == Some(id.as_bytes())),
    }
}

#[derive(Clone)]
pub struct SledUserRepository {
    db: Db,
}

impl SledUserRepository {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, AuthError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn users_tree(&self) -> Result<sled::Tree, AuthError> {
        Ok(self.db.open_tree(USERS_TREE)?)
    }

    fn users_by_email_tree(&self) -> Result<sled::Tree, AuthError> {
        Ok(self.db.open_tree(USERS_BY_EMAIL_TREE)?)
    }

    fn users_by_username_tree(&self) -> Result<sled::Tree, AuthError> {
        Ok(self.db.open_tree(USERS_BY_USERNAME_TREE)?)
    }

    fn find_via_index(&self, index: &sled::Tree, key: &str) -> Result<Option<User>, AuthError> {
        let users_tree = self.users_tree()?;

        // First, get the user ID from the index
        if let Some(user_id) = index.get(index_key(key))? {
            // Then get the user by ID
            if let Some(user_data) = users_tree.get(&user_id)? {
                let user: User = serde_json::from_slice(&user_data)?;
                return Ok(Some(user));
            }
        }

        Ok(None)
    }

    /// Claim the index entry for `new` when it differs from `old`. Returns the claimed key.
    fn claim_rename(
        index: &sled::Tree,
        old: &str,
        new: &str,
        id: &str,
        what: &str,
    ) -> Result<Option<Vec<u8>>, AuthError> {
        let (old_key, new_key) = (index_key(old), index_key(new));
        if old_key == new_key {
            return Ok(None);
        }
        if !claim(index, &new_key, id)? {
            return Err(AuthError::Conflict(format!("{what} already taken")));
        }
        Ok(Some(new_key))
    }
}

/// Drop an index entry, but only while `id` still holds it.
fn release(tree: &sled::Tree, key: Option<&[u8]>, id: &str) -> Result<(), AuthError> {
    if let Some(key) = key {
        let _ = tree.compare_and_swap(key, Some(id.as_bytes()), None::<&[u8]>)?;
    }
    Ok(())
}

#[async_trait]
impl UserRepository for SledUserRepository {
    async fn create(&self, user: User) -> Result<User, AuthError> {
        let users_tree = self.users_tree()?;
        let email_tree = self.users_by_email_tree()?;
        let username_tree = self.users_by_username_tree()?;

        let email_key = index_key(&user.email);
        if !claim(&email_tree, &email_key, &user.id)? {
            return Err(AuthError::Conflict("Email already registered".to_string()));
        }

        let username_key = index_key(&user.username);
        if !claim(&username_tree, &username_key, &user.id)? {
            release(&email_tree, Some(&email_key), &user.id)?;
            return Err(AuthError::Conflict("Username already taken".to_string()));
        }

        let stored = serde_json::to_vec(&user)
            .map_err(AuthError::from)
            .and_then(|json| Ok(users_tree.insert(user.id.as_bytes(), json)?));
        if let Err(e) = stored {
            release(&email_tree, Some(&email_key), &user.id)?;
            release(&username_tree, Some(&username_key), &user.id)?;
            return Err(e);
        }

        Ok(user)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, AuthError> {
        let users_tree = self.users_tree()?;

        if let Some(user_data) = users_tree.get(id.as_bytes())? {
            let user: User = serde_json::from_slice(&user_data)?;
            return Ok(Some(user));
        }

        Ok(None)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        self.find_via_index(&self.users_by_email_tree()?, email)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        self.find_via_index(&self.users_by_username_tree()?, username)
    }

    async fn update_with(
        &self,
        id: &str,
        change: &(dyn for<'u> Fn(&'u mut User) -> Result<(), AuthError> + Send + Sync),
    ) -> Result<User, AuthError> {
        let users_tree = self.users_tree()?;
        let email_tree = self.users_by_email_tree()?;
        let username_tree = self.users_by_username_tree()?;

        loop {
            let Some(current_data) = users_tree.get(id.as_bytes())? else {
                return Err(AuthError::UserNotFound);
            };
            let current: User = serde_json::from_slice(&current_data)?;
            let mut user = current.clone();
            change(&mut user)?;

            let email_claim =
                Self::claim_rename(&email_tree, &current.email, &user.email, id, "Email")?;
            let username_claim = match Self::claim_rename(
                &username_tree,
                &current.username,
                &user.username,
                id,
                "Username",
            ) {
                Ok(claimed) => claimed,
                Err(e) => {
                    release(&email_tree, email_claim.as_deref(), id)?;
                    return Err(e);
                }
            };

            let swapped = serde_json::to_vec(&user)
                .map_err(AuthError::from)
                .and_then(|json| {
                    Ok(users_tree
                        .compare_and_swap(id.as_bytes(), Some(&current_data), Some(json))?
                        .is_ok())
                });

            match swapped {
                Ok(true) => {
                    if email_claim.is_some() {
                        release(&email_tree, Some(&index_key(&current.email)), id)?;
                    }
                    if username_claim.is_some() {
                        release(&username_tree, Some(&index_key(&current.username)), id)?;
                    }
                    return Ok(user);
                }
                outcome => {
                    release(&email_tree, email_claim.as_deref(), id)?;
                    release(&username_tree, username_claim.as_deref(), id)?;
                    outcome?;
                    // Lost the swap to another writer, retry on the fresh record
                }
            }
        }
    }

    async fn email_exists(&self, email: &str) -> Result<bool, AuthError> {
        Ok(self.users_by_email_tree()?.contains_key(index_key(email))?)
    }

    async fn username_exists(&self, username: &str) -> Result<bool, AuthError> {
        Ok(self
            .users_by_username_tree()?
            .contains_key(index_key(username))?)
    }
}

#[derive(Clone)]
pub struct SledRefreshTokenRepository {
    db: Db,
}

impl SledRefreshTokenRepository {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, AuthError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn tokens_tree(&self) -> Result<sled::Tree, AuthError> {
        Ok(self.db.open_tree(TOKENS_TREE)?)
    }

    fn tokens_by_hash_tree(&self) -> Result<sled::Tree, AuthError> {
        Ok(self.db.open_tree(TOKENS_BY_HASH_TREE)?)
    }

    fn tokens_by_user_tree(&self) -> Result<sled::Tree, AuthError> {
        Ok(self.db.open_tree(TOKENS_BY_USER_TREE)?)
    }

    fn user_key(user_id: &str, id: &str) -> Vec<u8> {
        format!("{user_id}/{id}").into_bytes()
    }

    fn records_for_user(&self, user_id: &str) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        let tokens_tree = self.tokens_tree()?;
        let by_user = self.tokens_by_user_tree()?;
        let mut records = Vec::new();

        for item in by_user.scan_prefix(format!("{user_id}/").as_bytes()) {
            let (key, _) = item?;
            let Some(id) = key.rsplit(|b| *b == b'/').next() else {
                continue;
            };
            if let Some(data) = tokens_tree.get(id)? {
                records.push(serde_json::from_slice(&data)?);
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl RefreshTokenRepository for SledRefreshTokenRepository {
    async fn create(&self, record: RefreshTokenRecord) -> Result<RefreshTokenRecord, AuthError> {
        let tokens_tree = self.tokens_tree()?;
        let by_hash = self.tokens_by_hash_tree()?;
        let by_user = self.tokens_by_user_tree()?;

        if !claim(&by_hash, record.token_hash.as_bytes(), &record.id)? {
            return Err(AuthError::Conflict(
                "Refresh token already recorded".to_string(),
            ));
        }

        let record_json = serde_json::to_vec(&record)?;
        tokens_tree.insert(record.id.as_bytes(), record_json)?;
        by_user.insert(Self::user_key(&record.user_id, &record.id), Vec::new())?;

        Ok(record)
    }

    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let by_hash = self.tokens_by_hash_tree()?;
        let tokens_tree = self.tokens_tree()?;

        if let Some(id) = by_hash.get(token_hash.as_bytes())? {
            if let Some(data) = tokens_tree.get(&id)? {
                return Ok(Some(serde_json::from_slice(&data)?));
            }
        }

        Ok(None)
    }

    async fn revoke_if_active(&self, id: &str) -> Result<bool, AuthError> {
        let tokens_tree = self.tokens_tree()?;

        loop {
            let Some(current) = tokens_tree.get(id.as_bytes())? else {
                return Ok(false);
            };
            let mut record: RefreshTokenRecord = serde_json::from_slice(&current)?;
            if record.is_revoked() {
                return Ok(false);
            }

            record.revoked_at = Some(Utc::now());
            let updated = serde_json::to_vec(&record)?;

            match tokens_tree.compare_and_swap(id.as_bytes(), Some(&current), Some(updated))? {
                Ok(()) => return Ok(true),
                // Lost the swap; re-read and decide again
                Err(_) => continue,
            }
        }
    }

    async fn revoke_by_hash(&self, token_hash: &str) -> Result<bool, AuthError> {
        match self.tokens_by_hash_tree()?.get(token_hash.as_bytes())? {
            Some(id) => {
                let id = String::from_utf8_lossy(&id).into_owned();
                self.revoke_if_active(&id).await
            }
            None => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: &str) -> Result<usize, AuthError> {
        let mut revoked = 0;
        for record in self.records_for_user(user_id)? {
            if !record.is_revoked() && self.revoke_if_active(&record.id).await? {
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn find_active_by_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        let mut records: Vec<RefreshTokenRecord> = self
            .records_for_user(user_id)?
            .into_iter()
            .filter(|r| r.is_active_at(now))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        let tokens_tree = self.tokens_tree()?;
        let by_hash = self.tokens_by_hash_tree()?;
        let by_user = self.tokens_by_user_tree()?;
        let mut deleted = 0;

        for item in tokens_tree.iter() {
            let (key, data) = item?;
            let record: RefreshTokenRecord = serde_json::from_slice(&data)?;
            if !record.is_expired_at(now) {
                continue;
            }

            let _ = by_hash.compare_and_swap(
                record.token_hash.as_bytes(),
                Some(record.id.as_bytes()),
                None::<&[u8]>,
            )?;
            by_user.remove(Self::user_key(&record.user_id, &record.id))?;
            tokens_tree.remove(&key)?;
            deleted += 1;
        }

        Ok(deleted)
    }
}
