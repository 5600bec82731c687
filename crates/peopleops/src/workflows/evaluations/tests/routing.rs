use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;

use crate::workflows::evaluations::domain::EvaluationType;
use crate::workflows::evaluations::gateway::UNAVAILABLE_MESSAGE;
use crate::workflows::evaluations::questions::QuestionSet;
use crate::workflows::evaluations::router::{evaluation_router, SESSION_HEADER};

async fn read_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", "198.51.100.20, 10.0.0.1")
        .header(SESSION_HEADER, "browser-42")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("x-forwarded-for", "198.51.100.20")
        .header(SESSION_HEADER, "browser-42")
        .body(Body::empty())
        .expect("request")
}

fn answers_json(kind: EvaluationType) -> Value {
    let answers: serde_json::Map<String, Value> = QuestionSet::for_type(kind)
        .questions
        .iter()
        .enumerate()
        .map(|(index, question)| {
            let label = if index % 2 == 0 { "Excelente" } else { "Bom" };
            (question.key.to_string(), json!(label))
        })
        .collect();
    Value::Object(answers)
}

async fn issue_over_http(app: &Router, subject: &str, kind: &str) -> Response {
    app.clone()
        .oneshot(post_json(
            "/api/v1/evaluation-links",
            json!({
                "subject_id": subject,
                "evaluation_type": kind,
                "issuer_name": "Helena HR",
            }),
        ))
        .await
        .expect("response")
}

#[tokio::test]
async fn link_round_trip_over_http() {
    let harness = harness();
    let app = evaluation_router(harness.service.clone());

    let issued = issue_over_http(&app, "emp-1", "peer").await;
    assert_eq!(issued.status(), StatusCode::CREATED);
    let issued = read_json(issued).await;
    let token = issued["token"].as_str().expect("token").to_string();
    assert!(issued["url"]
        .as_str()
        .expect("url")
        .ends_with(&format!("/external-evaluation/{token}")));

    let form = app
        .clone()
        .oneshot(get(&format!("/api/v1/external-evaluations/{token}")))
        .await
        .expect("response");
    assert_eq!(form.status(), StatusCode::OK);
    let form = read_json(form).await;
    assert_eq!(form["session_id"], "browser-42");
    assert_eq!(form["form"]["link"]["subject_name"], "Ana Souza");
    assert_eq!(
        form["form"]["questions"]["questions"]
            .as_array()
            .expect("questions")
            .len(),
        10
    );
    let csrf = form["form"]["form_token"].as_str().expect("csrf").to_string();

    harness.clock.advance(chrono::Duration::minutes(5));
    let payload = json!({
        "csrf_token": csrf,
        "evaluator_name": "Marcos Pereira",
        "answers": answers_json(EvaluationType::Peer),
    });
    let submitted = app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/external-evaluations/{token}"),
            payload.clone(),
        ))
        .await
        .expect("response");
    assert_eq!(submitted.status(), StatusCode::CREATED);
    let submitted = read_json(submitted).await;
    assert!(submitted["evaluation_id"]
        .as_str()
        .expect("id")
        .starts_with("eval-"));

    let replay = app
        .oneshot(post_json(
            &format!("/api/v1/external-evaluations/{token}"),
            payload,
        ))
        .await
        .expect("response");
    assert_eq!(replay.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json(replay).await["error"], UNAVAILABLE_MESSAGE);
}

#[tokio::test]
async fn cooldown_violation_returns_conflict() {
    let harness = harness();
    harness.complete("emp-1", EvaluationType::Sponsor).await;
    let app = evaluation_router(harness.service.clone());

    let response = issue_over_http(&app, "emp-1", "supervisor").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = read_json(response).await;
    assert_eq!(body["evaluation_type"], "sponsor");
    assert!(body["next_eligible_at"].is_string());
}

#[tokio::test]
async fn unknown_subject_is_unprocessable() {
    let harness = harness();
    let app = evaluation_router(harness.service.clone());
    let response = issue_over_http(&app, "emp-999", "manager").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn incomplete_submission_names_missing_question() {
    let harness = harness();
    let issued = harness.issue("emp-2", EvaluationType::Manager).await;
    let app = evaluation_router(harness.service.clone());
    let token = issued.link.token.as_str();

    let form = read_json(
        app.clone()
            .oneshot(get(&format!("/api/v1/external-evaluations/{token}")))
            .await
            .expect("response"),
    )
    .await;
    let mut answers = answers_json(EvaluationType::Manager);
    answers
        .as_object_mut()
        .expect("object")
        .remove("goal_delivery");

    let response = app
        .oneshot(post_json(
            &format!("/api/v1/external-evaluations/{token}"),
            json!({
                "csrf_token": form["form"]["form_token"],
                "evaluator_name": "Rita Alves",
                "answers": answers,
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await;
    assert_eq!(body["field"], "goal_delivery");
    assert!(harness.evaluations.all().is_empty());
}

#[tokio::test]
async fn every_access_failure_looks_the_same() {
    let harness = harness();
    let app = evaluation_router(harness.service.clone());

    for uri in [
        "/api/v1/external-evaluations/short".to_string(),
        format!("/api/v1/external-evaluations/{}", "Z".repeat(32)),
    ] {
        let response = app.clone().oneshot(get(&uri)).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(read_json(response).await["error"], UNAVAILABLE_MESSAGE);
    }
}

#[tokio::test]
async fn repeated_probing_is_rate_limited() {
    let harness = harness();
    let issued = harness.issue("emp-1", EvaluationType::Peer).await;
    let app = evaluation_router(harness.service.clone());
    let uri = format!("/api/v1/external-evaluations/{}", issued.link.token.as_str());

    for _ in 0..config().rate_limit_max_attempts {
        let response = app.clone().oneshot(get(&uri)).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app.oneshot(get(&uri)).await.expect("response");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn subject_picker_defaults_to_active_like_statuses() {
    let harness = harness();
    let app = evaluation_router(harness.service.clone());

    let response = app
        .clone()
        .oneshot(get("/api/v1/evaluation-subjects"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let names: Vec<String> = read_json(response)
        .await
        .as_array()
        .expect("array")
        .iter()
        .map(|subject| subject["name"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(names, vec!["Ana Souza", "Bruno Lima"]);

    let response = app
        .oneshot(get("/api/v1/evaluation-subjects?status=terminated"))
        .await
        .expect("response");
    let body = read_json(response).await;
    assert_eq!(body[0]["id"], "emp-3");
}

#[tokio::test]
async fn eligibility_route_accepts_type_aliases() {
    let harness = harness();
    let app = evaluation_router(harness.service.clone());

    let response = app
        .oneshot(get("/api/v1/evaluation-eligibility/emp-1/colleague"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["can_issue"], true);
    assert_eq!(body["evaluation_type"], "peer");
    assert_eq!(body["eligibility"]["status"], "eligible");
}

#[tokio::test]
async fn inspection_scoring_uses_banded_average() {
    let harness = harness();
    let app = evaluation_router(harness.service.clone());

    let response = app
        .oneshot(post_json(
            "/api/v1/inspections/score",
            json!({
                "answers": {
                    "floors": "Excelente",
                    "restrooms": "Excellent",
                    "signage": "Muito Bom",
                    "storage": "Bom",
                }
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["band"], "very_good");
    assert_eq!(body["score"], 17);
    assert_eq!(body["average"], 4.25);
}
