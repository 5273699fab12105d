//! Integration tests for the gateway: accept-time validation, capacity,
//! session issuance failure modes, and a full conversation through the
//! relay core.

use aria_core::error::CoreError;
use aria_core::protocol::{ClientEvent, Role, ServerEvent};
use aria_core::session::Session;
use aria_core::turn::TurnState;
use aria_core::RelayConfig;
use aria_gateway::relay::{validate_accept, AcceptError, RelayCore, RelayOutput, WsParams};
use aria_gateway::session::SessionIssuer;
use aria_gateway::{AppState, InMemoryStore, KeywordGuard, PlaceholderGuard};
use std::sync::Arc;

fn test_state(max_connections: usize) -> Arc<AppState> {
    let config = RelayConfig {
        max_connections,
        ..RelayConfig::default()
    };
    Arc::new(AppState::new(
        config,
        Arc::new(PlaceholderGuard),
        Arc::new(InMemoryStore::new()),
    ))
}

fn issued_session(state: &AppState) -> Session {
    let session = Session::new("ek_token".into(), "model".into(), "voice".into(), 300);
    state.sessions.insert(session.session_id, session.clone());
    session
}

fn params_for(session: &Session) -> WsParams {
    WsParams {
        session_id: session.session_id,
        token: session.upstream_token.clone(),
    }
}

#[test]
fn expired_session_is_rejected_at_accept() {
    let state = test_state(4);
    let mut session = issued_session(&state);
    session.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
    state.sessions.insert(session.session_id, session.clone());

    let err = validate_accept(&state, &params_for(&session)).unwrap_err();
    assert_eq!(err, AcceptError::Expired);
    // The slot was released; the upstream leg was never in play.
    assert_eq!(state.active_connections(), 0);
}

#[test]
fn tokens_are_single_use() {
    let state = test_state(4);
    let session = issued_session(&state);

    assert!(validate_accept(&state, &params_for(&session)).is_ok());
    let err = validate_accept(&state, &params_for(&session)).unwrap_err();
    assert_eq!(err, AcceptError::InvalidSession);
}

#[test]
fn wrong_token_does_not_claim_the_session() {
    let state = test_state(4);
    let session = issued_session(&state);

    let bad = WsParams {
        session_id: session.session_id,
        token: "ek_wrong".into(),
    };
    assert_eq!(
        validate_accept(&state, &bad).unwrap_err(),
        AcceptError::InvalidSession
    );
    // The real claim still works afterwards.
    assert!(validate_accept(&state, &params_for(&session)).is_ok());
}

#[test]
fn connections_beyond_capacity_are_rejected_explicitly() {
    let state = test_state(2);
    for _ in 0..2 {
        let session = issued_session(&state);
        assert!(validate_accept(&state, &params_for(&session)).is_ok());
    }

    let session = issued_session(&state);
    assert_eq!(
        validate_accept(&state, &params_for(&session)).unwrap_err(),
        AcceptError::AtCapacity
    );
}

#[tokio::test]
async fn missing_credential_never_creates_a_session() {
    let issuer = SessionIssuer::new(RelayConfig {
        upstream_api_key: None,
        ..RelayConfig::default()
    });

    let err = issuer.create_session(None, None).await.unwrap_err();
    assert!(matches!(err, CoreError::Configuration(_)));
}

#[test]
fn full_conversation_through_the_relay_core() {
    let guard = Arc::new(KeywordGuard::new(vec!["rude".into()]));
    let mut core = RelayCore::new(guard);
    let mut upstream_bound = Vec::new();
    let mut client_bound = Vec::new();
    let mut saved = Vec::new();

    let mut record = |outputs: Vec<RelayOutput>| {
        for out in outputs {
            match out {
                RelayOutput::ToUpstream(e) => upstream_bound.push(e),
                RelayOutput::ToClient(e) => client_bound.push(e),
                RelayOutput::Save { role, text } => saved.push((role, text)),
            }
        }
    };

    // User speaks two frames, stops.
    record(core.on_client_event(ClientEvent::SpeechStarted));
    record(core.on_client_event(ClientEvent::InputAudioAppend { audio: vec![1; 8] }));
    record(core.on_client_event(ClientEvent::InputAudioAppend { audio: vec![2; 8] }));
    record(core.on_client_event(ClientEvent::SpeechStopped));
    record(core.on_client_event(ClientEvent::InputAudioCommit));

    // Upstream transcribes, replies with audio and text, completes.
    record(core.on_upstream_event(ServerEvent::TranscriptionCompleted {
        transcript: "don't be rude".into(),
    }));
    record(core.on_upstream_event(ServerEvent::ResponseCreated));
    record(core.on_upstream_event(ServerEvent::AudioDelta { delta: vec![9; 8] }));
    record(core.on_upstream_event(ServerEvent::OutputTextDelta { delta: "ok".into() }));
    record(core.on_upstream_event(ServerEvent::ResponseCompleted {
        output_text: "ok".into(),
    }));

    // Exactly one reply request went upstream, frames in order.
    let creates = upstream_bound
        .iter()
        .filter(|e| **e == ClientEvent::ResponseCreate)
        .count();
    assert_eq!(creates, 1);
    let frames: Vec<u8> = upstream_bound
        .iter()
        .filter_map(|e| match e {
            ClientEvent::InputAudioAppend { audio } => Some(audio[0]),
            _ => None,
        })
        .collect();
    assert_eq!(frames, vec![1, 2]);

    // The flagged transcript produced the side channel without losing the reply.
    assert!(client_bound
        .iter()
        .any(|e| matches!(e, ServerEvent::ModerationFlagged { .. })));
    assert!(client_bound
        .iter()
        .any(|e| matches!(e, ServerEvent::AudioDelta { .. })));

    // Both utterances were saved, user first.
    assert_eq!(saved.len(), 2);
    assert_eq!(saved[0].0, Role::User);
    assert_eq!(saved[1], (Role::Assistant, "ok".to_string()));

    // Back to rest.
    assert_eq!(core.turn_state(), TurnState::Idle);
    assert!(!core.reply_pending());
    assert_eq!(core.stats().frames_in, 2);
    assert_eq!(core.stats().frames_out, 1);
}
