//! Voice Gateway (C4) connection loop: authenticates the upgrade (C1),
//! frames and jitters inbound audio (C2), brokers it to a realtime provider
//! (C3), and drives the universal agent orchestrator (C7) on every finished
//! utterance, text turn, or barge-in.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use voice_agent_agent::{Orchestrator, TurnContext, TurnInput, POLICY_ERROR_CODES};
use voice_agent_core::{SessionAuth, SessionState, TurnOutcome, VoiceSession};
use voice_agent_llm::{MockRealtimeProvider, ProviderEvent, RealtimeProvider, ReconnectingProvider, TranscriptionKind};
use voice_agent_persistence::OutboxStore;

use crate::codec::FrameCodec;
use crate::metrics::{
    record_auth_failure, record_first_audio_token_latency_ms, record_frame_dropped,
    record_ws_connection_closed, record_ws_connection_opened,
};
use crate::session::PendingTurn;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct WsUpgradeQuery {
    pub token: Option<String>,
    /// Client-requested PCM16 sample rate in Hz; see `codec::negotiate_sample_rate`.
    pub sample_rate: Option<u32>,
}

/// Wire messages accepted from the client once the connection is open.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Auth { token: String },
    VoiceStart,
    VoiceEnd,
    TextInput { text: String, #[serde(default)] language: Option<String> },
    Control { action: String, #[serde(default)] params: serde_json::Value },
    VoiceCommand { command: String, #[serde(default)] params: serde_json::Value },
}

pub async fn ws_handler<S: OutboxStore + 'static>(
    State(state): State<AppState<S>>,
    Query(query): Query<WsUpgradeQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok()).map(str::to_string);
    ws.on_upgrade(move |socket| {
        handle_socket(socket, state, query.token, query.sample_rate, addr.ip().to_string(), origin)
    })
}

async fn handle_socket<S: OutboxStore + 'static>(
    socket: WebSocket,
    state: AppState<S>,
    query_token: Option<String>,
    query_sample_rate: Option<u32>,
    ip: String,
    origin: Option<String>,
) {
    record_ws_connection_opened();
    let (mut sender, mut receiver) = socket.split();

    let token = match query_token {
        Some(token) => Some(token),
        None => await_auth_handshake(&mut receiver, state.config.ws.ready_deadline_ms).await,
    };

    let auth = match state.token_verifier.authenticate(token.as_deref()) {
        Ok(auth) => auth,
        Err(e) => {
            record_auth_failure();
            tracing::warn!(error = %e, "websocket auth failed");
            let _ = sender.send(close_message(1008, "AUTH_FAILED")).await;
            record_ws_connection_closed("auth_failed");
            return;
        }
    };

    let session_id = Uuid::new_v4().to_string();
    let session = state.sessions.create(session_id.clone(), auth.clone());
    session.write().transition(SessionState::Listening);
    tracing::info!(
        session_id = %session_id,
        tenant_id = %auth.tenant_id,
        site_id = %auth.site_id,
        %ip,
        "voice session established"
    );

    // Opus is not decoded anywhere in this gateway (see `FrameCodec::decode`);
    // advertising it here would let a client send frames we'd silently
    // mis-decode as raw PCM16 instead of rejecting.
    let ready = json!({
        "type": "ready",
        "sessionId": session_id,
        "supportedFormats": ["pcm16"],
        "maxFrameSize": state.config.audio.max_frame_bytes,
        "sampleRates": [48000, 44100, 16000],
    });
    if sender.send(Message::Text(ready.to_string())).await.is_err() {
        state.sessions.remove(&session_id);
        record_ws_connection_closed("send_failed");
        return;
    }

    // No concrete realtime speech model is wired up in this deployment; the
    // mock provider stands in behind the same `RealtimeProvider` trait a real
    // adapter would implement, so turns still flow end to end in development.
    let provider = Arc::new(MockRealtimeProvider::new(Vec::new()));
    let reconnecting = ReconnectingProvider::new(Arc::clone(&provider));
    let provider_rx = match reconnecting.connect_with_retry().await {
        Ok(rx) => rx,
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "realtime provider unavailable");
            let _ = sender.send(close_message(1011, "PROVIDER_UNAVAILABLE")).await;
            state.sessions.remove(&session_id);
            record_ws_connection_closed("provider_unavailable");
            return;
        }
    };

    let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);

    let provider_task = tokio::spawn(forward_provider_events(
        provider_rx,
        out_tx.clone(),
        state.clone(),
        Arc::clone(&session),
        session_id.clone(),
        auth.clone(),
    ));

    let mut codec = FrameCodec::new(state.config.audio, crate::codec::negotiate_sample_rate(query_sample_rate));
    let ping_interval_ms = state.config.ws.ping_interval_ms;
    let mut ping_ticker = tokio::time::interval(Duration::from_millis(ping_interval_ms));
    ping_ticker.tick().await;
    let mut awaiting_pong = false;
    let close_reason;

    loop {
        if session.read().is_idle(chrono::Duration::milliseconds(state.config.ws.idle_close_ms as i64)) {
            close_reason = "idle_timeout";
            let _ = sender.send(close_message(1000, "IDLE_TIMEOUT")).await;
            break;
        }

        tokio::select! {
            biased;

            Some(message) = out_rx.recv() => {
                if sender.send(message).await.is_err() {
                    close_reason = "send_failed";
                    break;
                }
            }

            _ = ping_ticker.tick() => {
                if awaiting_pong {
                    let missed = {
                        let mut guard = session.write();
                        guard.missed_pongs += 1;
                        guard.missed_pongs
                    };
                    if missed > state.config.ws.max_missed_pongs {
                        close_reason = "ping_timeout";
                        let _ = sender.send(close_message(1011, "PING_TIMEOUT")).await;
                        break;
                    }
                }
                let payload = json!({"ts": Utc::now().timestamp_millis(), "sessionId": session_id});
                if sender.send(Message::Ping(payload.to_string().into_bytes())).await.is_err() {
                    close_reason = "send_failed";
                    break;
                }
                awaiting_pong = true;
            }

            incoming = receiver.next() => {
                let Some(incoming) = incoming else { close_reason = "client_disconnected"; break };
                let incoming = match incoming {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "websocket read error");
                        close_reason = "protocol_error";
                        break;
                    }
                };
                match incoming {
                    Message::Binary(bytes) => {
                        awaiting_pong = false;
                        handle_audio_frame(&bytes, &mut codec, &provider, &session, &session_id).await;
                    }
                    Message::Text(text) => {
                        awaiting_pong = false;
                        if !handle_text_message(
                            &text, &provider, &state, &session, &session_id, &auth, &origin, &ip, &out_tx,
                        ).await {
                            close_reason = "client_closed";
                            break;
                        }
                    }
                    Message::Pong(_) => {
                        awaiting_pong = false;
                        let mut guard = session.write();
                        guard.missed_pongs = 0;
                        guard.touch();
                    }
                    Message::Close(_) => { close_reason = "client_closed"; break; }
                    Message::Ping(_) => {}
                }
            }
        }
    }

    provider_task.abort();
    let _ = provider.close().await;
    state.sessions.remove(&session_id);
    record_ws_connection_closed(close_reason);
    tracing::info!(session_id = %session_id, reason = close_reason, "voice session ended");
}

/// Waits up to `deadline_ms` for a `{type:"auth", token}` handshake message
/// when no `?token=` query parameter was supplied on the upgrade URL.
async fn await_auth_handshake(
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    deadline_ms: u64,
) -> Option<String> {
    let wait = async {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Text(text) = message {
                if let Ok(ClientMessage::Auth { token }) = serde_json::from_str::<ClientMessage>(&text) {
                    return Some(token);
                }
            }
        }
        None
    };
    timeout(Duration::from_millis(deadline_ms), wait).await.ok().flatten()
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame { code, reason: reason.into() }))
}

async fn handle_audio_frame(
    bytes: &[u8],
    codec: &mut FrameCodec,
    provider: &Arc<MockRealtimeProvider>,
    session: &Arc<RwLock<VoiceSession>>,
    session_id: &str,
) {
    let dropped_before = codec.dropped_frames();
    let Some((frame, hint)) = codec.decode(bytes) else {
        record_frame_dropped("codec");
        return;
    };
    if codec.dropped_frames() > dropped_before {
        record_frame_dropped("jitter_buffer");
    }
    {
        let mut guard = session.write();
        guard.total_frames_in += 1;
        guard.touch();
    }
    tracing::trace!(session_id, active = hint.active, level = hint.level, "decoded inbound audio frame");
    if let Err(e) = provider.send_audio(frame).await {
        tracing::warn!(session_id, error = %e, "failed to forward audio frame to provider");
        record_frame_dropped("provider");
    }
}

/// Handles one inbound JSON control/text message. Returns `false` when the
/// connection should close.
#[allow(clippy::too_many_arguments)]
async fn handle_text_message<S: OutboxStore + 'static>(
    text: &str,
    provider: &Arc<MockRealtimeProvider>,
    state: &AppState<S>,
    session: &Arc<RwLock<VoiceSession>>,
    session_id: &str,
    auth: &SessionAuth,
    origin: &Option<String>,
    ip: &str,
    out_tx: &mpsc::Sender<Message>,
) -> bool {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(session_id, error = %e, "dropping unparseable client message");
            let _ = out_tx
                .send(Message::Text(json!({"type":"error","code":"VALIDATION_ERROR","message": e.to_string()}).to_string()))
                .await;
            return true;
        }
    };

    match message {
        ClientMessage::Auth { .. } => {}
        ClientMessage::VoiceStart => {
            let mut guard = session.write();
            guard.is_recording = true;
            guard.touch();
        }
        ClientMessage::VoiceEnd => {
            let mut guard = session.write();
            guard.is_recording = false;
            guard.touch();
        }
        ClientMessage::TextInput { text, language } => {
            let pending = state.sessions.pending(session_id);
            let input = match pending {
                PendingTurn::Clarification => TurnInput::ClarificationAnswer { text },
                _ => TurnInput::Utterance { text, language },
            };
            state.sessions.clear_pending(session_id);
            run_turn_and_reply(state, session, session_id, auth, origin, ip, out_tx, input).await;
        }
        ClientMessage::VoiceCommand { command, .. } => {
            if command == "confirm" && state.sessions.pending(session_id) == PendingTurn::Confirmation {
                state.sessions.clear_pending(session_id);
                run_turn_and_reply(state, session, session_id, auth, origin, ip, out_tx, TurnInput::ConfirmationReceived).await;
            } else {
                state.sessions.clear_pending(session_id);
                run_turn_and_reply(
                    state, session, session_id, auth, origin, ip, out_tx,
                    TurnInput::Utterance { text: command, language: None },
                ).await;
            }
        }
        ClientMessage::Control { action, .. } => match action.as_str() {
            "start_recording" => {
                session.write().is_recording = true;
            }
            "stop_recording" => {
                session.write().is_recording = false;
            }
            "interrupt_tts" => {
                let deadline = Duration::from_millis(50);
                if timeout(deadline, provider.cancel()).await.is_err() {
                    tracing::warn!(session_id, "provider cancel exceeded the 50ms barge-in budget");
                }
                session.write().transition(SessionState::Listening);
                let _ = out_tx.send(Message::Text(json!({"type": "barge_in"}).to_string())).await;
            }
            other => {
                tracing::debug!(session_id, action = other, "ignoring unknown control action");
            }
        },
    }
    true
}

/// Drives one orchestrator turn and translates its `TurnOutcome` into the
/// documented wire events.
#[allow(clippy::too_many_arguments)]
async fn run_turn_and_reply<S: OutboxStore + 'static>(
    state: &AppState<S>,
    session: &Arc<RwLock<VoiceSession>>,
    session_id: &str,
    auth: &SessionAuth,
    origin: &Option<String>,
    ip: &str,
    out_tx: &mpsc::Sender<Message>,
    input: TurnInput,
) {
    session.write().transition(SessionState::Processing);
    let locale = auth.locale.clone().unwrap_or_else(|| "en-US".to_string());
    let ctx = TurnContext {
        tenant_id: &auth.tenant_id,
        site_id: &auth.site_id,
        user_id: auth.user_id.as_deref(),
        ip,
        session_id,
        origin: origin.as_deref(),
        locale,
        user_location: None,
    };

    match state.orchestrator.run_turn(&ctx, input).await {
        Ok(outcome) => emit_turn_outcome(state, session, session_id, out_tx, outcome).await,
        Err(e) => {
            tracing::error!(session_id, error = %e, "orchestrator turn failed");
            let _ = out_tx
                .send(Message::Text(
                    json!({
                        "type": "agent_final",
                        "text": "Sorry, something went wrong handling that. Could you try again?",
                        "citations": [],
                        "uiHints": {},
                        "metadata": {"error": e.to_string()},
                    })
                    .to_string(),
                ))
                .await;
        }
    }

    let mut guard = session.write();
    if guard.state == SessionState::Processing {
        guard.transition(SessionState::Listening);
    }
}

async fn emit_turn_outcome<S: OutboxStore + 'static>(
    state: &AppState<S>,
    session: &Arc<RwLock<VoiceSession>>,
    session_id: &str,
    out_tx: &mpsc::Sender<Message>,
    outcome: TurnOutcome,
) {
    if let TurnOutcome::Final { text, ui_hints, .. } = &outcome {
        if let Some(code) = ui_hints.get("error_code").and_then(|v| v.as_str()) {
            if POLICY_ERROR_CODES.contains(&code) {
                let mut payload = json!({"type": "error", "code": code, "message": text});
                if let Some(reset_at) = ui_hints.get("reset_at") {
                    payload["resetAt"] = reset_at.clone();
                }
                let _ = out_tx.send(Message::Text(payload.to_string())).await;
                return;
            }
        }
    }

    let payload = match outcome {
        TurnOutcome::AskClarification { question, suggested_values } => {
            state.sessions.set_pending(session_id, PendingTurn::Clarification);
            json!({
                "type": "agent_final",
                "text": question,
                "citations": [],
                "uiHints": {"kind": "clarification", "suggestedValues": suggested_values},
                "metadata": {"clarificationRequired": true},
            })
        }
        TurnOutcome::AskConfirmation { prompt, plan } => {
            state.sessions.set_pending(session_id, PendingTurn::Confirmation);
            json!({
                "type": "agent_final",
                "text": prompt,
                "citations": [],
                "uiHints": {"kind": "confirmation", "plan": plan},
                "metadata": {"confirmationRequired": true},
            })
        }
        TurnOutcome::Final { text, citations, ui_hints, clarification_rounds, tools_executed } => {
            if session.read().first_token_at.is_none() {
                let now = Utc::now();
                let started = session.read().last_activity_at;
                record_first_audio_token_latency_ms((now - started).num_milliseconds().max(0) as f64);
                session.write().first_token_at = Some(now);
            }
            json!({
                "type": "agent_final",
                "text": text,
                "citations": citations,
                "uiHints": ui_hints,
                "metadata": {"clarificationRounds": clarification_rounds, "toolsExecuted": tools_executed},
            })
        }
    };
    let _ = out_tx.send(Message::Text(payload.to_string())).await;
}

/// Forwards every `ProviderEvent` emitted by the realtime provider to the
/// client as its documented wire message, driving an orchestrator turn on
/// the provider's final transcription.
async fn forward_provider_events<S: OutboxStore + 'static>(
    mut rx: mpsc::Receiver<ProviderEvent>,
    out_tx: mpsc::Sender<Message>,
    state: AppState<S>,
    session: Arc<RwLock<VoiceSession>>,
    session_id: String,
    auth: SessionAuth,
) {
    while let Some(event) = rx.recv().await {
        match event {
            ProviderEvent::SessionReady => {
                let _ = out_tx.send(Message::Text(json!({"type": "mic_opened"}).to_string())).await;
            }
            ProviderEvent::SpeechStarted { audio_start_ms } => {
                let _ = out_tx
                    .send(Message::Text(json!({"type": "vad", "active": true, "level": audio_start_ms}).to_string()))
                    .await;
            }
            ProviderEvent::SpeechStopped { .. } => {
                let _ = out_tx.send(Message::Text(json!({"type": "vad", "active": false, "level": 0}).to_string())).await;
            }
            ProviderEvent::Transcription(t) => {
                let kind = match t.kind {
                    TranscriptionKind::Partial => "partial_asr",
                    TranscriptionKind::Final => "final_asr",
                };
                let _ = out_tx
                    .send(Message::Text(
                        json!({"type": kind, "text": t.text, "lang": t.lang, "confidence": t.confidence}).to_string(),
                    ))
                    .await;
                if t.kind == TranscriptionKind::Final && !t.text.trim().is_empty() {
                    run_turn_and_reply(
                        &state,
                        &session,
                        &session_id,
                        &auth,
                        &None,
                        "0.0.0.0",
                        &out_tx,
                        TurnInput::Utterance { text: t.text, language: Some(t.lang) },
                    )
                    .await;
                }
            }
            ProviderEvent::AgentDelta(delta) => {
                let payload = match delta {
                    voice_agent_llm::AgentDelta::Text(text) => json!({"type": "agent_delta", "text": text}),
                    voice_agent_llm::AgentDelta::Audio(frame) => {
                        let bytes = frame.to_pcm16();
                        json!({
                            "type": "audio_chunk",
                            "data": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes),
                            "format": "pcm",
                            "timestamp": frame.timestamp.timestamp_millis(),
                        })
                    }
                };
                let _ = out_tx.send(Message::Text(payload.to_string())).await;
            }
            ProviderEvent::FunctionCall(call) => {
                let _ = out_tx
                    .send(Message::Text(json!({"type": "agent_tool", "name": call.name, "callId": call.call_id, "args": call.args}).to_string()))
                    .await;
            }
            ProviderEvent::FunctionCallComplete(complete) => {
                let _ = out_tx
                    .send(Message::Text(json!({"type": "agent_tool", "callId": complete.call_id, "args": complete.args, "complete": true}).to_string()))
                    .await;
            }
            ProviderEvent::ConversationInterrupted => {
                let _ = out_tx.send(Message::Text(json!({"type": "barge_in"}).to_string())).await;
            }
            ProviderEvent::Error { code, message } => {
                let _ = out_tx.send(Message::Text(json!({"type": "error", "code": code, "message": message}).to_string())).await;
            }
        }
    }
}
