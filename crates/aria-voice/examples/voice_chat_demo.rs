//! Voice chat demo — full loop against a running gateway.
//!
//! Requests a session over HTTP, opens the duplex transport, then runs the
//! voice loop: speak, hear the reply, talk over it to barge in. Requires a
//! microphone and speakers; point `ARIA_GATEWAY_URL` at the gateway
//! (default http://127.0.0.1:8020) and press Ctrl+C to stop.

use aria_core::session::Session;
use aria_voice::{
    run_voice_loop, AudioConfig, ClientNotice, MicCapture, PlaybackQueue, TransportConfig,
    TransportSession, VoiceLoopConfig,
};
use chrono::{DateTime, Utc};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let gateway =
        std::env::var("ARIA_GATEWAY_URL").unwrap_or_else(|_| "http://127.0.0.1:8020".to_string());

    info!("requesting session from {}", gateway);
    let issued: serde_json::Value = reqwest::Client::new()
        .post(format!("{}/session", gateway))
        .json(&serde_json::json!({}))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let token = issued["token"].as_str().unwrap_or_default().to_string();
    let expires_at: DateTime<Utc> = issued["expires_at"].as_str().unwrap_or_default().parse()?;
    let session = Session {
        session_id: issued["session_id"].as_str().unwrap_or_default().parse()?,
        upstream_token: token.clone(),
        model: issued["model"].as_str().unwrap_or_default().to_string(),
        voice: issued["voice"].as_str().unwrap_or_default().to_string(),
        created_at: Utc::now(),
        expires_at,
        max_duration_seconds: (expires_at - Utc::now()).num_seconds().max(0) as u64,
    };

    let ws_base = gateway.replacen("http", "ws", 1);
    let url = format!(
        "{}/session/ws?session_id={}&token={}",
        ws_base, session.session_id, token
    );
    let transport = TransportSession::connect(TransportConfig::new(url), session).await?;

    let (chunk_tx, chunk_rx) = tokio::sync::mpsc::unbounded_channel();
    let mic = MicCapture::new(AudioConfig::default())?.start(chunk_tx)?;
    let mut playback = PlaybackQueue::with_default_output()?;

    info!("connected — start talking (Ctrl+C to stop)");
    run_voice_loop(
        transport,
        chunk_rx,
        mic,
        &mut playback,
        VoiceLoopConfig::default(),
        |notice| match notice {
            ClientNotice::Transcript(t) if t.partial => {}
            ClientNotice::Transcript(t) => info!("{}: {}", t.role.as_str(), t.text),
            ClientNotice::Flagged(flags) => info!("flagged: {:?}", flags),
        },
        Some(std::sync::Arc::new(|| {
            info!("[interrupted — listening]");
        })),
    )
    .await?;

    Ok(())
}
