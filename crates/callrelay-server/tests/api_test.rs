mod common;

use axum::{
    body::Body,
    extract::Request as AxumRequest,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use callrelay_server::app;
use callrelay_server::config::TelephonyConfig;
use callrelay_store::{ArtifactKind, ArtifactStore};
use common::{FakeResponder, FakeSynthesizer, FakeTranscriber, Harness};
use serde_json::Value;
use tokio::net::TcpListener;
use tower::ServiceExt;

const BOUNDARY: &str = "callrelay-test-boundary";

fn telephony() -> TelephonyConfig {
    TelephonyConfig {
        greeting: Some("Thanks for calling. How can I help?".to_string()),
        ..TelephonyConfig::default()
    }
}

fn form_post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn recording_upload(call_sid: &str, audio: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"CallSid\"\r\n\r\n{sid}\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"Recording\"; filename=\"rec.wav\"\r\n\
             Content-Type: audio/wav\r\n\r\n",
            b = BOUNDARY,
            sid = call_sid
        )
        .as_bytes(),
    );
    body.extend_from_slice(audio);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/process-recording")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Pulls the artifact name out of a `<Play>` URL.
fn played_artifact(twiml: &str) -> Option<String> {
    let start = twiml.find("<Play>")? + "<Play>".len();
    let end = twiml[start..].find("</Play>")? + start;
    let url = &twiml[start..end];
    url.strip_prefix("https://relay.example/artifacts/")
        .map(str::to_string)
}

#[tokio::test]
async fn test_health_reports_sessions() {
    let harness = Harness::echoing().await;
    let state = harness.app_state(telephony());
    state.registry.get_or_create("CA1");
    let app = app(state);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["sessions"], 1);
}

#[tokio::test]
async fn test_first_voice_prompt_greets_and_records() {
    let harness = Harness::echoing().await;
    let app = app(harness.app_state(telephony()));

    let response = app
        .clone()
        .oneshot(form_post("/voice", "CallSid=CA1&From=%2B15550100"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/xml"
    );

    let twiml = body_text(response).await;
    assert!(twiml.contains("<Say>Thanks for calling. How can I help?</Say>"));
    assert!(twiml.contains(
        r#"<Record action="/process-recording" method="POST" maxLength="10" playBeep="true"/>"#
    ));

    // The greeting is only spoken once.
    let again = body_text(
        app.oneshot(form_post("/voice", "CallSid=CA1"))
            .await
            .unwrap(),
    )
    .await;
    assert!(!again.contains("<Say>"));
    assert!(again.contains("<Record"));
}

#[tokio::test]
async fn test_recording_round_trip_plays_reply_once() {
    let harness = Harness::echoing().await;
    let app = app(harness.app_state(TelephonyConfig::default()));

    app.clone()
        .oneshot(form_post("/voice", "CallSid=CA1"))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(recording_upload("CA1", b"table for two"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/voice?CallSid=CA1"
    );

    // The provider follows the redirect with a GET.
    let twiml = body_text(
        app.clone()
            .oneshot(get("/voice?CallSid=CA1"))
            .await
            .unwrap(),
    )
    .await;
    let name = played_artifact(&twiml).expect("reply should be played");
    assert!(twiml.find("<Play>").unwrap() < twiml.find("<Record").unwrap());

    let response = app
        .clone()
        .oneshot(get(&format!("/artifacts/{}", name)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "audio/mpeg"
    );
    assert_eq!(
        body_text(response).await,
        "AUDIO:reply to: table for two"
    );

    // Played once; the next prompt only records.
    let twiml = body_text(app.oneshot(get("/voice?CallSid=CA1")).await.unwrap()).await;
    assert!(played_artifact(&twiml).is_none());

    assert!(harness
        .store
        .list(Some(ArtifactKind::UploadedClip))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_failed_recording_speaks_fallback() {
    let harness = Harness::new(
        FakeTranscriber::returning("."),
        FakeResponder::echo(),
        FakeSynthesizer::echo(),
    )
    .await;
    let app = app(harness.app_state(TelephonyConfig::default()));

    app.clone()
        .oneshot(form_post("/voice", "CallSid=CA1"))
        .await
        .unwrap();
    let response = app
        .clone()
        .oneshot(recording_upload("CA1", b"mumble"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let twiml = body_text(app.oneshot(get("/voice?CallSid=CA1")).await.unwrap()).await;
    assert!(twiml.contains(
        "<Say>Sorry, I didn&apos;t catch that. Please try again after the beep.</Say>"
    ));
    assert!(twiml.contains("<Record"));
}

#[tokio::test]
async fn test_recording_for_unknown_call_hangs_up() {
    let harness = Harness::echoing().await;
    let app = app(harness.app_state(TelephonyConfig::default()));

    let response = app
        .oneshot(recording_upload("CA-gone", b"hello there"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("<Hangup/>"));
    assert_eq!(harness.stage_calls(), 0);
}

#[tokio::test]
async fn test_recording_without_audio_is_bad_request() {
    let harness = Harness::echoing().await;
    let app = app(harness.app_state(TelephonyConfig::default()));

    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"CallSid\"\r\n\r\nCA1\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    let request = Request::builder()
        .method("POST")
        .uri("/process-recording")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert!(json["error"].as_str().unwrap().contains("Recording"));
}

async fn serve_recording(request: AxumRequest) -> Result<Vec<u8>, StatusCode> {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.starts_with("Basic "));
    if !authorized {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(b"fetched audio".to_vec())
}

#[tokio::test]
async fn test_recording_fetched_by_url() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let recordings = Router::new().route(
            "/Recordings/RE1.wav",
            axum::routing::get(serve_recording),
        );
        axum::serve(listener, recordings).await.unwrap();
    });

    let harness = Harness::echoing().await;
    let telephony = TelephonyConfig {
        account_sid: "AC1".to_string(),
        auth_token: "token".to_string(),
        ..TelephonyConfig::default()
    };
    let app = app(harness.app_state(telephony));

    app.clone()
        .oneshot(form_post("/voice", "CallSid=CA1"))
        .await
        .unwrap();

    let body = format!(
        "CallSid=CA1&RecordingUrl=http%3A%2F%2F{}%2FRecordings%2FRE1",
        addr
    );
    let response = app
        .clone()
        .oneshot(form_post("/process-recording", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let twiml = body_text(app.oneshot(get("/voice?CallSid=CA1")).await.unwrap()).await;
    let name = played_artifact(&twiml).expect("reply should be played");
    assert_eq!(
        harness.store.read(&name).await.unwrap(),
        b"AUDIO:reply to: fetched audio"
    );
}

#[tokio::test]
async fn test_unreachable_recording_prompts_again() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let harness = Harness::echoing().await;
    let app = app(harness.app_state(TelephonyConfig::default()));
    app.clone()
        .oneshot(form_post("/voice", "CallSid=CA1"))
        .await
        .unwrap();

    let body = format!("CallSid=CA1&RecordingUrl=http%3A%2F%2F{}%2FRE1", addr);
    let response = app
        .oneshot(form_post("/process-recording", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let twiml = body_text(response).await;
    assert!(twiml.contains("<Say>Sorry"));
    assert!(twiml.contains("<Record"));
    assert_eq!(harness.stage_calls(), 0);
}

#[tokio::test]
async fn test_stream_prompt_connects_media_stream() {
    let harness = Harness::echoing().await;
    let app = app(harness.app_state(TelephonyConfig::default()));

    let twiml = body_text(
        app.oneshot(form_post("/voice/stream", "CallSid=CA1"))
            .await
            .unwrap(),
    )
    .await;

    assert!(twiml.contains(
        r#"<Connect><Stream url="wss://relay.example/media-stream"/></Connect>"#
    ));
}

#[tokio::test]
async fn test_terminal_call_status_ends_session() {
    let harness = Harness::echoing().await;
    let state = harness.app_state(TelephonyConfig::default());
    let registry = state.registry.clone();
    let app = app(state);

    let session = registry.get_or_create("CA1");

    let response = app
        .clone()
        .oneshot(form_post("/call-status", "CallSid=CA1&CallStatus=in-progress"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(registry.len(), 1);

    let response = app
        .clone()
        .oneshot(form_post("/call-status", "CallSid=CA1&CallStatus=completed"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(registry.is_empty());
    assert!(session.is_closed());

    // A repeated status for a finished call is harmless.
    let response = app
        .oneshot(form_post("/call-status", "CallSid=CA1&CallStatus=completed"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_prompt_for_ended_call_hangs_up_without_recreating() {
    let harness = Harness::echoing().await;
    let state = harness.app_state(TelephonyConfig::default());
    let registry = state.registry.clone();
    let app = app(state);

    app.clone()
        .oneshot(form_post("/voice", "CallSid=CA1"))
        .await
        .unwrap();
    app.clone()
        .oneshot(form_post("/call-status", "CallSid=CA1&CallStatus=completed"))
        .await
        .unwrap();
    assert!(registry.is_empty());

    // A late redirect follow-up for the ended call.
    let response = app.oneshot(get("/voice?CallSid=CA1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let twiml = body_text(response).await;
    assert!(twiml.contains("<Hangup/>"));
    assert!(!twiml.contains("<Record"));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_artifact_lookup_misses_are_not_found() {
    let harness = Harness::echoing().await;
    let clip = harness
        .store
        .write(ArtifactKind::UploadedClip, b"caller audio")
        .await
        .unwrap();
    let app = app(harness.app_state(TelephonyConfig::default()));

    for uri in [
        "/artifacts/reply-0000000000000001-deadbeef.mp3".to_string(),
        "/artifacts/not-an-artifact".to_string(),
        format!("/artifacts/{}", clip.name),
    ] {
        let response = app.clone().oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }
}

#[tokio::test]
async fn test_sweep_makes_reply_unavailable() {
    let harness = Harness::echoing().await;
    let reply = harness
        .store
        .write(ArtifactKind::SynthesizedReply, b"old reply")
        .await
        .unwrap();
    let app = app(harness.app_state(TelephonyConfig::default()));

    let uri = format!("/artifacts/{}", reply.name);
    let response = app.clone().oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    harness.clock.advance(std::time::Duration::from_secs(601));
    let store: &ArtifactStore = &harness.store;
    assert_eq!(
        store
            .sweep(std::time::Duration::from_secs(600))
            .await
            .unwrap(),
        1
    );

    let response = app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
