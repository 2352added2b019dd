use std::sync::Arc;

use anyhow::Context;

use crate::config::{Config, StoreBackend, StoreConfig};
use crate::middlewares::auth::JwtService;
use crate::store::{MemoryStore, RestStore, SharedStore};

use self::auth_service::AuthService;
use self::exam_service::ExamService;
use self::practice_service::{PracticeRegistry, PracticeService};
use self::profile_service::ProfileService;
use self::question_bank::QuestionBank;
use self::schedule_service::ScheduleService;

pub mod auth_service;
pub mod exam_service;
pub mod practice_service;
pub mod profile_service;
pub mod question_bank;
pub mod schedule_service;
pub mod selection;

pub struct AppState {
    pub config: Config,
    pub store: SharedStore,
    pub questions: QuestionBank,
    pub practice: PracticeRegistry,
    pub jwt: JwtService,
}

impl AppState {
    /// Checks the row store, fills the question cache and starts the
    /// change listener. Must run inside a tokio runtime.
    pub async fn new(config: Config, store: SharedStore) -> anyhow::Result<Self> {
        tracing::info!("Checking row store connectivity...");
        tokio::time::timeout(std::time::Duration::from_secs(10), store.ping())
            .await
            .context("Row store ping timed out after 10s")?
            .context("Row store is unreachable")?;

        let questions = QuestionBank::new(
            store.clone(),
            config.store.page_size,
            config.questions.cache_ttl_seconds,
        );
        questions.spawn_change_listener();
        let count = questions
            .sync()
            .await
            .context("Initial question sync failed")?;
        tracing::info!("Question bank ready with {} active questions", count);

        Ok(Self {
            jwt: JwtService::new(&config.auth.jwt_secret),
            practice: PracticeRegistry::new(),
            questions,
            store,
            config,
        })
    }

    pub fn profile_service(&self) -> ProfileService {
        ProfileService::new(self.store.clone(), self.config.practice.history_limit)
    }

    pub fn auth_service(&self) -> AuthService {
        AuthService::new(self.store.clone(), self.jwt.clone(), self.config.auth.clone())
    }

    pub fn practice_service(&self) -> PracticeService {
        PracticeService::new(
            self.practice.clone(),
            self.questions.clone(),
            self.profile_service(),
            self.config.practice.clone(),
        )
    }

    pub fn exam_service(&self) -> ExamService {
        ExamService::new(self.store.clone(), self.questions.clone(), self.profile_service())
    }

    pub fn schedule_service(&self) -> ScheduleService {
        ScheduleService::new(self.store.clone(), self.config.store.page_size)
    }
}

/// Builds the row store selected by `store.backend`.
pub fn build_store(config: &StoreConfig) -> anyhow::Result<SharedStore> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory row store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Rest => {
            tracing::info!("Using REST row store at {}", config.url);
            let store = RestStore::new(&config.url, &config.api_key)
                .with_context(|| format!("Invalid row store URL {}", config.url))?;
            Ok(Arc::new(store))
        }
    }
}
