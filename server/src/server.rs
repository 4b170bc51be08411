//! Server assembly: game, listener and tick scheduler

use log::info;
use shared::GameConfig;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::ServerError;
use crate::game::Game;
use crate::network::Listener;
use crate::tick::TickScheduler;

/// A running arena server
pub struct Server {
    game: Arc<Game>,
    listener: Listener<Game>,
    scheduler: TickScheduler,
}

impl Server {
    /// Generates the world, binds `addr` and starts ticking.
    pub async fn start(config: GameConfig, addr: &str) -> Result<Self, ServerError> {
        let config = Arc::new(config);
        Self::start_with(Arc::new(Game::new(Arc::clone(&config))), addr).await
    }

    /// Starts serving an already constructed game.
    pub async fn start_with(game: Arc<Game>, addr: &str) -> Result<Self, ServerError> {
        let listener = Listener::bind(addr, Arc::clone(&game)).await?;
        let period = game.config().tick_period();

        let scheduler = {
            let game = Arc::clone(&game);
            let listener = listener.clone();
            TickScheduler::start(period, move || {
                let game = Arc::clone(&game);
                let listener = listener.clone();
                async move {
                    let snapshot = game.tick().await;
                    if !snapshot.is_empty() {
                        listener.broadcast(&snapshot).await;
                    }
                }
            })
        };

        info!(
            "Server started on {} ({} ms ticks)",
            listener.local_addr(),
            period.as_millis()
        );
        Ok(Self {
            game,
            listener,
            scheduler,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn game(&self) -> &Arc<Game> {
        &self.game
    }

    pub fn active_tasks(&self) -> usize {
        self.listener.active_tasks()
    }

    pub async fn connection_count(&self) -> usize {
        self.listener.connection_count().await
    }

    /// Stops ticking, freezes the game, then closes every connection and
    /// waits for their tasks.
    pub async fn stop(&mut self) {
        info!("Stopping tick scheduler");
        self.scheduler.stop().await;
        info!("Stopping game");
        self.game.stop().await;
        info!("Closing listener");
        self.listener.close().await;
        info!("Server stopped");
    }
}
