//! The application container: every process-wide collaborator as an explicit
//! service handle, built once in main and shared by the API, the websocket
//! consumers and the job executors.

use crate::ask::clients::{ChatClient, EmbeddingClient};
use crate::collab::Rooms;
use crate::config::Settings;
use crate::jobs::JobQueue;
use crate::rate_limit::RateLimiter;
use crate::storage::Storages;
use std::sync::{Arc, Mutex};

pub struct App {
    pub pool: sqlx::PgPool,
    pub settings: Settings,
    pub rooms: Rooms,
    pub jobs: Arc<dyn JobQueue>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub storages: Storages,
    pub chat: Arc<dyn ChatClient>,
    pub embeddings: Arc<dyn EmbeddingClient>,
    id_generator: Mutex<models::IdGenerator>,
}

impl App {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: sqlx::PgPool,
        settings: Settings,
        rooms: Rooms,
        jobs: Arc<dyn JobQueue>,
        rate_limiter: Arc<dyn RateLimiter>,
        storages: Storages,
        chat: Arc<dyn ChatClient>,
        embeddings: Arc<dyn EmbeddingClient>,
        id_generator: models::IdGenerator,
    ) -> Self {
        Self {
            pool,
            settings,
            rooms,
            jobs,
            rate_limiter,
            storages,
            chat,
            embeddings,
            id_generator: Mutex::new(id_generator),
        }
    }

    pub fn next_id(&self) -> models::Id {
        self.id_generator.lock().unwrap().next()
    }
}
