//! Service assembly: store, queue, orchestrator, agent and router.

use std::sync::Arc;

use axum::Router;

use crate::api::{self, AppState};
use crate::config::AppConfig;
use crate::error::Result;
use crate::eval::{ArithmeticEvaluator, Evaluator};
use crate::orchestrator::Orchestrator;
use crate::store::{LibSqlBackend, Store};
use crate::worker::{Agent, WorkQueue};

/// A fully wired service, ready to be served.
pub struct Service {
    pub orchestrator: Arc<Orchestrator>,
    pub agent: Agent,
    pub router: Router,
}

impl Service {
    /// Open the on-disk database named by `config` and wire everything.
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let store: Arc<dyn Store> = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);
        Ok(Self::assemble(store, config))
    }

    /// Wire the service around an existing store.
    ///
    /// The queue's sender goes to the orchestrator and its receiver to the
    /// agent. The agent reports back through the orchestrator and so keeps
    /// a sender alive itself; stop it with the token passed to `Agent::run`.
    pub fn assemble(store: Arc<dyn Store>, config: &AppConfig) -> Self {
        let evaluator: Arc<dyn Evaluator> = Arc::new(ArithmeticEvaluator::new());
        let (sender, receiver) = WorkQueue::bounded(config.queue_capacity);

        let orchestrator = Arc::new(Orchestrator::new(store, Arc::new(sender)));
        let agent = Agent::new(
            config.agent.clone(),
            receiver,
            orchestrator.clone(),
            Arc::clone(&evaluator),
        );
        let router = api::router(AppState {
            orchestrator: Arc::clone(&orchestrator),
            evaluator,
        });

        Self {
            orchestrator,
            agent,
            router,
        }
    }
}
