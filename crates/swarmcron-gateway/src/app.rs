use axum::{routing::get, Router};
use std::sync::Arc;
use swarmcron_core::config::SwarmcronConfig;
use swarmcron_jobs::TriggerService;
use swarmcron_scheduler::ScheduleRegistry;
use tokio_util::sync::CancellationToken;

/// State shared by the HTTP handlers.
pub struct AppState {
    pub config: SwarmcronConfig,
    pub registry: Arc<ScheduleRegistry>,
    pub trigger: Arc<TriggerService>,
    /// Cancelled on shutdown; every triggered wait runs on a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: SwarmcronConfig,
        registry: Arc<ScheduleRegistry>,
        trigger: Arc<TriggerService>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            trigger,
            shutdown,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/event/{service}/{key}",
            get(crate::http::event::event_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use std::time::Duration;
    use swarmcron_core::{
        labels::{ENABLE, EVENT_ENABLE, EVENT_KEY, SCHEDULE},
        TaskSnapshot, TaskState,
    };
    use swarmcron_docker::FakeOrchestrator;
    use swarmcron_jobs::{JobRunner, Reconciler};
    use swarmcron_scheduler::SchedulerEngine;
    use tower::ServiceExt;

    async fn router_with(fake: &Arc<FakeOrchestrator>) -> Router {
        let shutdown = CancellationToken::new();
        let registry = Arc::new(ScheduleRegistry::new(Arc::new(SchedulerEngine::new())));
        let runner = Arc::new(JobRunner::new(
            fake.clone(),
            Duration::from_millis(10),
            Duration::from_secs(5),
            shutdown.clone(),
        ));
        Reconciler::new(fake.clone(), registry.clone(), runner.clone())
            .reconcile_all()
            .await
            .unwrap();
        let trigger = Arc::new(TriggerService::new(registry.clone(), runner));
        let state = AppState::new(SwarmcronConfig::default(), registry, trigger, shutdown);
        build_router(Arc::new(state))
    }

    fn event_job(fake: &FakeOrchestrator) {
        fake.add_service(
            "export",
            &[
                (ENABLE, "true"),
                (SCHEDULE, "@daily"),
                (EVENT_ENABLE, "true"),
                (EVENT_KEY, "k3y"),
            ],
        );
    }

    async fn get_text(router: Router, uri: &str) -> (StatusCode, String) {
        let resp = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_reports_job_count() {
        let fake = Arc::new(FakeOrchestrator::new());
        event_job(&fake);
        let (status, body) = get_text(router_with(&fake).await, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["jobs"], 1);
    }

    #[tokio::test]
    async fn event_returns_task_logs() {
        let fake = Arc::new(FakeOrchestrator::new());
        event_job(&fake);
        fake.script_tasks(
            "export",
            vec![vec![], vec![TaskSnapshot::new("t1", TaskState::Complete)]],
        );
        fake.set_logs("t1", "exported 12 files\n");

        let (status, body) = get_text(router_with(&fake).await, "/event/export/k3y").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "exported 12 files\n");
    }

    #[tokio::test]
    async fn wrong_key_is_rejected_without_running() {
        let fake = Arc::new(FakeOrchestrator::new());
        event_job(&fake);

        let (status, body) = get_text(router_with(&fake).await, "/event/export/nope").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Job rejected");
        assert_eq!(fake.task_calls("export"), 0);
        assert_eq!(fake.update_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_service_is_an_error() {
        let fake = Arc::new(FakeOrchestrator::new());
        let (status, body) = get_text(router_with(&fake).await, "/event/ghost/k").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("ghost"));
    }

    #[tokio::test]
    async fn failed_task_is_an_error() {
        let fake = Arc::new(FakeOrchestrator::new());
        event_job(&fake);
        let mut failed = TaskSnapshot::new("t1", TaskState::Failed);
        failed.error = Some("OOM killed".to_string());
        fake.script_tasks("export", vec![vec![], vec![failed]]);

        let (status, body) = get_text(router_with(&fake).await, "/event/export/k3y").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Job failed: OOM killed");
    }

    #[tokio::test]
    async fn only_get_is_routed() {
        let fake = Arc::new(FakeOrchestrator::new());
        let resp = router_with(&fake)
            .await
            .oneshot(
                Request::post("/event/export/k3y")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
