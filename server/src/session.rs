//! User and auth-token registry for the arena server
//!
//! This module owns the set of active users and the tokens that authenticate
//! their key-state updates:
//! - Token generation with uniqueness among active users
//! - Lookup by token for incoming updates
//! - Removal when a connection goes away
//!
//! The registry is not synchronized on its own. It lives inside the game
//! state and is only touched while the shared game mutex is held.

use log::{debug, info};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::Rng;
use shared::{KeyState, UserState, KEY_COUNT};
use std::fmt;

/// Server-assigned identifier of a user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub u64);

/// Secret token a client presents with every update.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

// Tokens are secrets; keep them out of debug logs.
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken({} chars)", self.0.len())
    }
}

/// A connected user
///
/// The user record is created by the server on connect; nothing the client
/// proposes for `auth` is ever trusted.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    /// Display name, as last reported by the client
    pub name: String,
    pub auth: AuthToken,
    pub state: UserState,
    /// Last key snapshot received from the client
    pub keys: KeyState,
}

/// Registry of active users
///
/// Tokens are unique among the users currently registered. Generation uses
/// the injected random source so tests can run with a fixed seed.
pub struct UserManager {
    users: Vec<User>,
    next_user_id: u64,
    auth_length: usize,
    rng: StdRng,
}

impl UserManager {
    pub fn new(auth_length: usize, rng: StdRng) -> Self {
        Self {
            users: Vec::new(),
            next_user_id: 1,
            auth_length,
            rng,
        }
    }

    pub fn auth_length(&self) -> usize {
        self.auth_length
    }

    /// Registers a new playing user and returns it
    ///
    /// A fresh token is drawn until it does not collide with any active
    /// token. There is no retry bound.
    pub fn register(&mut self, name: &str) -> &User {
        let auth = self.generate_auth();
        let id = UserId(self.next_user_id);
        self.next_user_id += 1;

        info!("User {} '{}' registered", id.0, name);
        self.users.push(User {
            id,
            name: name.to_string(),
            auth,
            state: UserState::Playing,
            keys: [false; KEY_COUNT],
        });
        &self.users[self.users.len() - 1]
    }

    fn generate_auth(&mut self) -> AuthToken {
        loop {
            let candidate: String = (&mut self.rng)
                .sample_iter(&Alphanumeric)
                .take(self.auth_length)
                .map(char::from)
                .collect();

            if self.find_by_auth(&candidate).is_none() {
                return AuthToken(candidate);
            }
            debug!("Auth token collision, drawing again");
        }
    }

    pub fn find_by_auth(&self, auth: &str) -> Option<&User> {
        self.users.iter().find(|user| user.auth.as_str() == auth)
    }

    pub fn find_by_auth_mut(&mut self, auth: &str) -> Option<&mut User> {
        self.users.iter_mut().find(|user| user.auth.as_str() == auth)
    }

    pub fn get(&self, id: UserId) -> Option<&User> {
        self.users.iter().find(|user| user.id == id)
    }

    pub fn get_mut(&mut self, id: UserId) -> Option<&mut User> {
        self.users.iter_mut().find(|user| user.id == id)
    }

    /// Removes a user, returning the record if it was still registered.
    pub fn remove(&mut self, id: UserId) -> Option<User> {
        let index = self.users.iter().position(|user| user.id == id)?;
        let user = self.users.remove(index);
        info!("User {} '{}' removed", user.id.0, user.name);
        Some(user)
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.iter()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
