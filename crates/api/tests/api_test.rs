use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use testfarm_api::create_app;
use testfarm_api::routes::{create_routes, AppState};
use testfarm_core::config::ServerConfig;
use testfarm_core::models::{EventKind, TestNode};
use testfarm_core::{CampaignConfig, SchedulerConfig};
use testfarm_dispatcher::{CampaignHandle, Scheduler, SchedulerHandle, StaticTestType};

fn app(scheduler: &SchedulerHandle) -> Router {
    create_routes(AppState {
        scheduler: scheduler.clone(),
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn initialized_campaign(scheduler: &SchedulerHandle) -> CampaignHandle {
    let mut config = CampaignConfig::default();
    config.coverage.enabled = true;
    let mut campaign = scheduler
        .add_campaign(
            config,
            Arc::new(StaticTestType::new(vec![TestNode::leaf("a", "/a.html")])),
            None,
        )
        .await
        .unwrap();
    let first = campaign.events.recv().await.unwrap();
    assert_eq!(first.kind(), EventKind::TasksList);
    campaign
}

#[tokio::test]
async fn test_health_check() {
    let (scheduler, _join) = Scheduler::spawn(SchedulerConfig::default());
    let response = app(&scheduler)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["frozen"], false);
    assert_eq!(json["slaves"], 0);
    assert_eq!(json["activeCampaigns"], 0);
}

#[tokio::test]
async fn test_health_reports_active_campaigns() {
    let (scheduler, _join) = Scheduler::spawn(SchedulerConfig::default());
    let _campaign = initialized_campaign(&scheduler).await;
    let app = create_app(scheduler.clone(), &ServerConfig::default());

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["activeCampaigns"], 1);
    assert_eq!(json["busySlaves"], 0);
}

#[tokio::test]
async fn test_health_unavailable_after_shutdown() {
    let (scheduler, join) = Scheduler::spawn(SchedulerConfig::default());
    scheduler.shutdown().await.unwrap();
    join.await.unwrap().unwrap();

    let response = app(&scheduler)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["status"], "unavailable");
}

#[tokio::test]
async fn test_status_reports_campaigns() {
    let (scheduler, _join) = Scheduler::spawn(SchedulerConfig::default());
    let campaign = initialized_campaign(&scheduler).await;

    let response = app(&scheduler)
        .oneshot(
            Request::get("/__testfarm__/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["frozen"], false);
    assert_eq!(json["data"]["slaves"].as_array().unwrap().len(), 0);
    assert_eq!(json["data"]["campaigns"][0]["id"], campaign.id.as_str());
    assert_eq!(json["data"]["campaigns"][0]["remainingTasks"], 1);
}

#[tokio::test]
async fn test_campaign_results_by_number() {
    let (scheduler, _join) = Scheduler::spawn(SchedulerConfig::default());
    let campaign = initialized_campaign(&scheduler).await;

    let response = app(&scheduler)
        .oneshot(
            Request::get(format!(
                "/__testfarm__/campaigns/{}/results",
                campaign.number
            ))
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"][0]["event"], "tasksList");
    assert_eq!(json["data"][0]["tasks"][0]["taskId"], 0);
}

#[tokio::test]
async fn test_coverage_submission() {
    let (scheduler, _join) = Scheduler::spawn(SchedulerConfig::default());
    let campaign = initialized_campaign(&scheduler).await;

    let response = app(&scheduler)
        .oneshot(
            Request::post(format!("/__testfarm__/coverage/{}/0", campaign.id))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"files":{"src/app.js":{"lines":{"1":2}}}}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app(&scheduler)
        .oneshot(
            Request::post(format!("/__testfarm__/coverage/{}/9", campaign.id))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"files":{}}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"]["type"], "TASK_NOT_FOUND");
}

#[tokio::test]
async fn test_unknown_campaign_is_not_found() {
    let (scheduler, _join) = Scheduler::spawn(SchedulerConfig::default());

    let response = app(&scheduler)
        .oneshot(
            Request::get("/__testfarm__/campaigns/missing/results")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"]["type"], "CAMPAIGN_NOT_FOUND");
}

#[tokio::test]
async fn test_stopped_scheduler_is_unavailable() {
    let (scheduler, join) = Scheduler::spawn(SchedulerConfig::default());
    scheduler.shutdown().await.unwrap();
    join.await.unwrap().unwrap();

    let response = app(&scheduler)
        .oneshot(
            Request::get("/__testfarm__/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
