//! Telephony webhooks for the record-and-reply call flow.
//!
//! A call alternates between `/voice`, which plays whatever is pending and
//! records the caller's next utterance, and `/process-recording`, which runs
//! that utterance through the session and redirects back to `/voice`.

use crate::api::{artifact_url, public_base_url, websocket_url, ApiError};
use crate::media::AudioFormat;
use crate::registry::RegistryError;
use crate::session::{CallSession, Playback, SessionError, TurnOutcome};
use crate::twiml::Twiml;
use crate::AppState;
use axum::{
    extract::{Extension, Form, FromRequest, Multipart, Request},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use std::sync::Arc;

/// Call statuses after which no further webhooks arrive for a call.
const TERMINAL_CALL_STATUSES: &[&str] = &["completed", "busy", "failed", "no-answer", "canceled"];

/// Form fields common to every call webhook.
#[derive(Debug, Deserialize)]
pub struct CallForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
}

/// Form fields of a recording callback that references the audio by URL.
#[derive(Debug, Deserialize)]
pub struct RecordingForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "RecordingUrl")]
    pub recording_url: String,
}

#[derive(Debug, Deserialize)]
pub struct CallStatusForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
}

/// One recorded utterance, however it was delivered.
struct Recording {
    call_sid: String,
    audio: Vec<u8>,
}

enum Delivery {
    Received(Recording),
    /// The callback referenced a recording that could not be downloaded.
    Unavailable { call_sid: String },
}

/// Handler for `POST /voice`, the provider's first webhook for a call.
///
/// Plays the pending reply (or the fallback, or the greeting on first
/// contact) and then records the caller.
pub async fn voice_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<CallForm>,
) -> Twiml {
    let session = state.registry.get_or_create(&form.call_sid);
    record_prompt(&state, &headers, &session)
}

/// Handler for `GET /voice`, reached only by following the redirect from
/// `/process-recording`.
///
/// The call must still be live; an ended call is hung up rather than
/// recreated.
pub async fn voice_followup_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<CallForm>,
) -> Twiml {
    match state.registry.get(&form.call_sid) {
        Ok(session) => record_prompt(&state, &headers, &session),
        Err(RegistryError::NotFound(id)) => {
            tracing::info!(call_id = %id, "prompt requested for a call that is no longer active");
            Twiml::new().hangup()
        }
    }
}

fn record_prompt(state: &AppState, headers: &HeaderMap, session: &CallSession) -> Twiml {
    let twiml = match session.take_playback() {
        Ok(playback) => prompt(state, headers, Twiml::new(), playback),
        Err(SessionError::SessionClosed(_)) => return Twiml::new().hangup(),
    };
    twiml.record("/process-recording", state.telephony.record_max_length)
}

/// Handler for `POST /voice/stream`.
///
/// Bridges the call to the media-stream WebSocket instead of recording.
pub async fn voice_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<CallForm>,
) -> Twiml {
    let session = state.registry.get_or_create(&form.call_sid);
    let twiml = match session.take_playback() {
        Ok(playback) => prompt(&state, &headers, Twiml::new(), playback),
        Err(SessionError::SessionClosed(_)) => return Twiml::new().hangup(),
    };
    let base = public_base_url(state.public_url.as_deref(), &headers);
    twiml.connect_stream(&websocket_url(&base, "/media-stream"))
}

/// Handler for `POST /process-recording`.
///
/// Accepts the recording either as a multipart upload (`Recording` file
/// field) or as a `RecordingUrl` to fetch.
pub async fn process_recording_handler(
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
) -> Result<Response, ApiError> {
    let recording = match read_recording(&state, request).await? {
        Delivery::Received(recording) => recording,
        Delivery::Unavailable { call_sid } => {
            // The audio could not be fetched; apologise and record again.
            tracing::warn!(call_id = %call_sid, "recording unavailable, prompting caller to repeat");
            return Ok(Twiml::new()
                .say(&state.telephony.fallback_message)
                .record("/process-recording", state.telephony.record_max_length)
                .into_response());
        }
    };

    let session = match state.registry.get(&recording.call_sid) {
        Ok(session) => session,
        Err(RegistryError::NotFound(id)) => {
            tracing::info!(call_id = %id, "recording for a call that is no longer active");
            return Ok(Twiml::new().hangup().into_response());
        }
    };

    let outcome = session
        .submit_utterance(&state.pipeline, recording.audio, AudioFormat::Container)
        .await;

    match outcome {
        Ok(outcome) => {
            match &outcome {
                TurnOutcome::Reply(artifact) => {
                    tracing::debug!(call_id = %recording.call_sid, artifact = %artifact.name, "reply queued")
                }
                TurnOutcome::Fallback => {
                    tracing::debug!(call_id = %recording.call_sid, "fallback queued")
                }
                TurnOutcome::NoUtterance => {
                    tracing::debug!(call_id = %recording.call_sid, "empty recording")
                }
            }
            Ok(Redirect::to(&voice_redirect(&recording.call_sid)).into_response())
        }
        Err(SessionError::SessionClosed(id)) => {
            tracing::info!(call_id = %id, "call ended while its recording was processed");
            Ok(Twiml::new().hangup().into_response())
        }
    }
}

/// Handler for `POST /call-status`.
///
/// Ends the session once the provider reports a terminal call status.
pub async fn call_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<CallStatusForm>,
) -> StatusCode {
    let status = form.call_status.to_ascii_lowercase();
    if !TERMINAL_CALL_STATUSES.contains(&status.as_str()) {
        tracing::debug!(call_id = %form.call_sid, status = %status, "call status update");
        return StatusCode::NO_CONTENT;
    }

    match state.registry.close(&form.call_sid) {
        Ok(()) => tracing::info!(call_id = %form.call_sid, status = %status, "call ended"),
        Err(RegistryError::NotFound(_)) => {
            tracing::debug!(call_id = %form.call_sid, status = %status, "call ended with no session")
        }
    }
    StatusCode::NO_CONTENT
}

/// Adds the verb for `playback` to `twiml`.
fn prompt(state: &AppState, headers: &HeaderMap, twiml: Twiml, playback: Option<Playback>) -> Twiml {
    match playback {
        Some(Playback::Reply(name)) => {
            let base = public_base_url(state.public_url.as_deref(), headers);
            twiml.play(&artifact_url(&base, &name))
        }
        Some(Playback::Fallback) => twiml.say(&state.telephony.fallback_message),
        Some(Playback::Greeting) => match &state.telephony.greeting {
            Some(greeting) => twiml.say(greeting),
            None => twiml,
        },
        None => twiml,
    }
}

/// `/voice` with the call identifier in the query, so the provider's follow-up
/// request still names the call after the redirect.
fn voice_redirect(call_sid: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("CallSid", call_sid)
        .finish();
    format!("/voice?{}", query)
}

/// Extracts the recording from the request.
async fn read_recording(state: &AppState, request: Request) -> Result<Delivery, ApiError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |ct| ct.starts_with("multipart/form-data"));

    if is_multipart {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;

        let mut call_sid = None;
        let mut audio = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?
        {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("CallSid") => {
                    call_sid = Some(
                        field
                            .text()
                            .await
                            .map_err(|e| ApiError::BadRequest(e.body_text()))?,
                    );
                }
                Some("Recording") => {
                    audio = Some(
                        field
                            .bytes()
                            .await
                            .map_err(|e| ApiError::BadRequest(e.body_text()))?
                            .to_vec(),
                    );
                }
                _ => {}
            }
        }

        let call_sid = call_sid
            .filter(|sid| !sid.is_empty())
            .ok_or_else(|| ApiError::BadRequest("missing CallSid field".to_string()))?;
        let audio =
            audio.ok_or_else(|| ApiError::BadRequest("missing Recording file".to_string()))?;
        return Ok(Delivery::Received(Recording { call_sid, audio }));
    }

    let Form(form) = Form::<RecordingForm>::from_request(request, &())
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?;

    match fetch_recording(state, &form.recording_url).await {
        Ok(audio) => Ok(Delivery::Received(Recording {
            call_sid: form.call_sid,
            audio,
        })),
        Err(e) => {
            tracing::warn!(
                call_id = %form.call_sid,
                url = %form.recording_url,
                error = %e,
                "failed to fetch recording"
            );
            Ok(Delivery::Unavailable {
                call_sid: form.call_sid,
            })
        }
    }
}

/// Downloads a recording as WAV.
async fn fetch_recording(state: &AppState, recording_url: &str) -> Result<Vec<u8>, String> {
    let url = if recording_url.ends_with(".wav") {
        recording_url.to_string()
    } else {
        format!("{}.wav", recording_url)
    };

    let mut request = state.http.get(&url);
    if let Some((sid, token)) = state.telephony.credentials() {
        request = request.basic_auth(sid, Some(token));
    }

    let response = request.send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("recording server returned HTTP {}", status));
    }
    let bytes = response.bytes().await.map_err(|e| e.to_string())?;
    Ok(bytes.to_vec())
}
