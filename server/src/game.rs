//! Shared game state and the connection-facing game handler
//!
//! The world and the user registry live behind one mutex. Connection tasks
//! decode outside the lock and only take it to apply the decoded message;
//! the tick task takes it to step the world and build the snapshot, and
//! releases it before anything is written to the network.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{ClientMessage, ClientUpdate, GameConfig, ServerMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::ServerError;
use crate::network::{Connection, ConnectionHandler, ConnectionId};
use crate::session::{AuthToken, UserId, UserManager};
use crate::world::WorldServer;

pub struct GameState {
    pub world: WorldServer,
    pub users: UserManager,
    /// User created by each connection that completed its handshake
    pub sessions: HashMap<ConnectionId, UserId>,
    /// Set once on shutdown. Connects fail and updates are dropped after.
    pub stopped: bool,
}

pub struct Game {
    config: Arc<GameConfig>,
    state: Mutex<GameState>,
}

impl Game {
    /// Creates a game on a freshly generated world.
    ///
    /// With `config.seed` set, world generation, enemy behavior and auth
    /// tokens are reproducible.
    pub fn new(config: Arc<GameConfig>) -> Self {
        let mut seeder = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let world = WorldServer::generate(
            Arc::clone(&config),
            StdRng::seed_from_u64(seeder.gen()),
        );
        let users = UserManager::new(config.auth_length, StdRng::seed_from_u64(seeder.gen()));
        Self::from_parts(config, world, users)
    }

    pub fn from_parts(config: Arc<GameConfig>, world: WorldServer, users: UserManager) -> Self {
        Self {
            config,
            state: Mutex::new(GameState {
                world,
                users,
                sessions: HashMap::new(),
                stopped: false,
            }),
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Registers a user named `name` for `connection` and spawns their
    /// player.
    pub async fn connect(
        &self,
        connection: ConnectionId,
        name: &str,
    ) -> Result<(UserId, AuthToken), ServerError> {
        let mut state = self.state.lock().await;
        if state.stopped {
            return Err(ServerError::Stopped);
        }
        let GameState {
            world,
            users,
            sessions,
            ..
        } = &mut *state;

        let Some(spawn) = world.spawn_position() else {
            warn!("No spawn position left for '{}'", name);
            return Err(ServerError::NoSpawnPosition);
        };
        let user = users.register(name);
        let (id, auth) = (user.id, user.auth.clone());
        world.add_player(id, spawn);
        sessions.insert(connection, id);

        Ok((id, auth))
    }

    /// Applies a client's key snapshot to their character.
    ///
    /// Updates with a token of the wrong length, an unknown token, or for a
    /// user whose character is gone are dropped silently.
    pub async fn apply_update(&self, update: ClientUpdate) {
        let mut state = self.state.lock().await;
        if state.stopped {
            return;
        }
        let GameState { world, users, .. } = &mut *state;

        if update.auth.len() != users.auth_length() {
            debug!("Dropping update with malformed auth token");
            return;
        }
        let Some(user) = users.find_by_auth_mut(&update.auth) else {
            debug!("Dropping update with unknown auth token");
            return;
        };
        let Some(character) = world.character_of_mut(user.id) else {
            return;
        };

        character.keys = update.keys;
        user.keys = update.keys;
        if user.name != update.name {
            info!("User {} renamed '{}' -> '{}'", user.id.0, user.name, update.name);
            user.name = update.name;
        }
    }

    /// Ends the session of `connection`, removing its user and their
    /// character. Does nothing once stopped.
    pub async fn end_session(&self, connection: ConnectionId) {
        let mut state = self.state.lock().await;
        if state.stopped {
            return;
        }
        let Some(user) = state.sessions.remove(&connection) else {
            return;
        };
        if state.users.remove(user).is_some() {
            state.world.remove_characters_of(user);
        }
    }

    /// Advances the world one tick and returns the snapshot to broadcast.
    pub async fn tick(&self) -> Vec<ServerMessage> {
        let mut state = self.state.lock().await;
        if state.stopped {
            return Vec::new();
        }
        let GameState { world, users, .. } = &mut *state;

        world.step(users);
        world.snapshot(users)
    }

    pub async fn stop(&self) {
        self.state.lock().await.stopped = true;
        info!("Game stopped");
    }

    /// Runs `inspect` with the game state locked.
    pub async fn with_state<R>(&self, inspect: impl FnOnce(&mut GameState) -> R) -> R {
        inspect(&mut *self.state.lock().await)
    }

    async fn reject(connection: &Connection, reason: String) {
        if let Err(e) = connection.send(&ServerMessage::Rejected { reason }).await {
            debug!("Could not send rejection to {}: {}", connection.peer(), e);
        }
    }
}

impl ConnectionHandler for Game {
    type Message = ClientMessage;

    async fn handshake(&self, connection: &Connection) -> bool {
        let name = match connection.recv::<ClientMessage>().await {
            Ok(ClientMessage::Connect { name }) => name,
            Ok(ClientMessage::Update(_)) => {
                warn!("Connection {} sent an update before connecting", connection.id().0);
                Self::reject(connection, "expected a connect message".to_string()).await;
                return false;
            }
            Err(e) => {
                debug!("Connection {} dropped during handshake: {}", connection.id().0, e);
                return false;
            }
        };

        match self.connect(connection.id(), &name).await {
            Ok((_, auth)) => {
                let welcome = ServerMessage::Welcome {
                    auth: auth.into_string(),
                };
                match connection.send(&welcome).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Could not welcome connection {}: {}", connection.id().0, e);
                        false
                    }
                }
            }
            Err(e) => {
                Self::reject(connection, e.to_string()).await;
                false
            }
        }
    }

    async fn receive(&self, connection: &Connection, message: ClientMessage) {
        match message {
            ClientMessage::Update(update) => self.apply_update(update).await,
            ClientMessage::Connect { .. } => {
                debug!("Ignoring repeated connect on connection {}", connection.id().0);
            }
        }
    }

    async fn disconnect(&self, connection: &Connection) {
        self.end_session(connection.id()).await;
    }
}
