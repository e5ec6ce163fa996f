//! `get_capabilities` (spec §6) and the advertisement record the
//! Capability/Register Boundary publishes to LAN discovery and the
//! coordinator — this crate only owns its contents (spec §6), not the
//! advertisement transport itself.

use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct AdvertisementRecord {
    pub version: String,
    pub api_version: &'static str,
    pub hw_families: Vec<String>,
    pub video_codecs: Vec<String>,
    pub audio_codecs: Vec<String>,
    pub concurrency: usize,
    pub platform: String,
}

pub async fn get_capabilities(State(state): State<AppState>) -> Json<ghoststream_core::capability::CapabilitySnapshot> {
    Json(state.jobs.capabilities().clone())
}

pub async fn get_advertisement(State(state): State<AppState>) -> Json<AdvertisementRecord> {
    let snapshot = state.jobs.capabilities();
    Json(AdvertisementRecord {
        version: env!("CARGO_PKG_VERSION").to_string(),
        api_version: "v1",
        hw_families: snapshot.available_families().iter().map(|f| f.as_str().to_string()).collect(),
        video_codecs: snapshot.video_codecs.clone(),
        audio_codecs: snapshot.audio_codecs.clone(),
        concurrency: state.config.service.concurrency,
        platform: snapshot.platform.clone(),
    })
}
