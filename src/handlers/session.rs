//! # Session Rendering Handlers
//!
//! HTTP entry points for the synthesis pipeline:
//! - `POST /api/v1/session` — resolve the multipart form, launch the
//!   renderer, stream the WAV body back.
//! - `POST /api/v1/session/plan` — same resolution, no renderer: returns the
//!   resolved parameters, labeling and filter program as JSON for inspection.
//!
//! The music upload is wrapped in a `TempUpload` the moment it reaches disk,
//! so every early return below — multipart errors, oversized uploads,
//! renderer failures — releases the file on the way out.

use crate::error::{AppError, AppResult};
use crate::session::duration::DurationResolver;
use crate::session::graph::{
    build_render_plan, OUTPUT_BIT_DEPTH, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE,
};
use crate::session::naming::ResponseMeta;
use crate::session::params::RawSessionRequest;
use crate::session::render::{RenderOrchestrator, TempUpload};
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Upload cap for music beds (200 MB).
const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

/// Walk the multipart form: text fields into the raw request, the `music`
/// file field streamed to a uniquely-named file in the upload directory.
async fn collect_request(
    payload: &mut Multipart,
    upload_dir: &Path,
) -> AppResult<(RawSessionRequest, Option<TempUpload>)> {
    let mut raw = RawSessionRequest::new();
    let mut upload: Option<TempUpload> = None;

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let content_disposition = field
            .content_disposition()
            .ok_or_else(|| AppError::BadRequest("Missing content disposition".to_string()))?;

        let Some(name) = content_disposition.get_name().map(str::to_string) else {
            continue;
        };

        if name == "music" {
            let suffix = upload_suffix(content_disposition.get_filename());
            let path = upload_dir.join(format!("music-{}{}", Uuid::new_v4(), suffix));

            let mut file = tokio::fs::File::create(&path).await?;
            let mut saved = TempUpload::new(path);
            let mut written: usize = 0;

            while let Some(chunk) = field.next().await {
                let chunk =
                    chunk.map_err(|e| AppError::BadRequest(format!("Upload error: {}", e)))?;
                written += chunk.len();
                if written > MAX_UPLOAD_BYTES {
                    // `saved` drops here and removes the partial file.
                    return Err(AppError::ValidationError(format!(
                        "Music upload too large (max {} bytes)",
                        MAX_UPLOAD_BYTES
                    )));
                }
                file.write_all(&chunk).await?;
            }
            file.flush().await?;

            if written == 0 {
                // A file input submitted with no selection: treat as absent.
                saved.remove();
            } else {
                raw.set_music(saved.path().to_path_buf());
                upload = Some(saved);
            }
        } else {
            let mut value = Vec::new();
            while let Some(chunk) = field.next().await {
                let chunk =
                    chunk.map_err(|e| AppError::BadRequest(format!("Field error: {}", e)))?;
                value.extend_from_slice(&chunk);
            }
            raw.set_field(&name, String::from_utf8_lossy(&value).into_owned());
        }
    }

    Ok((raw, upload))
}

/// Keep the original extension (sanitized) so the probe and renderer get a
/// format hint; anything suspicious is dropped.
fn upload_suffix(filename: Option<&str>) -> String {
    filename
        .and_then(|f| Path::new(f).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Resolve the form into a spec: clamp/default the parameters, then settle
/// the duration (probing the upload when the caller left it open).
async fn resolve_spec(
    raw: &RawSessionRequest,
    ffprobe_path: &str,
) -> crate::session::params::SessionSpec {
    let resolver = DurationResolver::new(ffprobe_path);
    let duration = resolver.resolve(raw.requested_duration(), raw.music()).await;
    raw.resolve(duration)
}

/// Render a session and stream it back as an attachment.
///
/// ## Endpoint: `POST /api/v1/session`
pub async fn create_session(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let upload_dir = PathBuf::from(&config.renderer.upload_dir);

    let (raw, upload) = collect_request(&mut payload, &upload_dir).await?;
    let spec = resolve_spec(&raw, &config.renderer.ffprobe_path).await;
    let plan = build_render_plan(&spec);
    let meta = ResponseMeta::for_spec(&spec);

    tracing::info!(
        carrier_hz = spec.carrier_hz,
        beat_start_hz = spec.beat_start_hz,
        beat_end_hz = spec.beat_end_hz,
        duration_sec = spec.duration_sec,
        has_music = spec.has_music(),
        label = meta.label,
        filename = %meta.filename,
        "starting render session"
    );

    let orchestrator = RenderOrchestrator::new(&config.renderer);
    let body = orchestrator
        .start(plan, upload, state.get_ref().clone())
        .await?;

    // Metadata headers go on before the first body byte; they are immutable
    // once the stream starts.
    let mut response = HttpResponse::Ok();
    meta.apply(&mut response);
    Ok(response.streaming(body))
}

/// Dry-run a session: full resolution, no renderer.
///
/// ## Endpoint: `POST /api/v1/session/plan`
pub async fn preview_session(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let upload_dir = PathBuf::from(&config.renderer.upload_dir);

    let (raw, upload) = collect_request(&mut payload, &upload_dir).await?;
    let spec = resolve_spec(&raw, &config.renderer.ffprobe_path).await;
    let plan = build_render_plan(&spec);
    let meta = ResponseMeta::for_spec(&spec);

    // The upload only existed for probing; nothing will render it.
    drop(upload);

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "session": {
            "carrier_hz": spec.carrier_hz,
            "beat_start_hz": spec.beat_start_hz,
            "beat_end_hz": spec.beat_end_hz,
            "duration_sec": spec.duration_sec,
            "tone_gain": spec.tone_gain,
            "music_gain": spec.music_gain,
            "fade_sec": spec.fade_sec,
            "has_music": spec.has_music(),
            "label": meta.label,
            "beat_descriptor": meta.descriptor,
            "filename": meta.filename
        },
        "plan": {
            "tone_source": plan.tone_source,
            "filter_graph": plan.filter_graph,
            "loop_music": plan.loop_music,
            "output": {
                "sample_rate": OUTPUT_SAMPLE_RATE,
                "channels": OUTPUT_CHANNELS,
                "bit_depth": OUTPUT_BIT_DEPTH,
                "container": "wav"
            }
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    #[::core::prelude::v1::test]
    fn upload_suffix_keeps_only_clean_extensions() {
        assert_eq!(upload_suffix(Some("ambient.mp3")), ".mp3");
        assert_eq!(upload_suffix(Some("TRACK.FLAC")), ".flac");
        assert_eq!(upload_suffix(Some("noext")), "");
        assert_eq!(upload_suffix(Some("weird.../../x")), "");
        assert_eq!(upload_suffix(None), "");
    }

    fn multipart_body(fields: &[(&str, &str)]) -> (String, Vec<u8>) {
        let boundary = "sessiontestboundary";
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        (
            format!("multipart/form-data; boundary={boundary}"),
            body,
        )
    }

    #[actix_web::test]
    async fn plan_endpoint_resolves_defaults_without_rendering() {
        let state = AppState::new(AppConfig::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/session/plan", web::post().to(preview_session)),
        )
        .await;

        // One empty field keeps the multipart body well-formed; an empty
        // hint sanitizes away to nothing.
        let (content_type, body) = multipart_body(&[("filenameHint", "")]);
        let req = test::TestRequest::post()
            .uri("/api/v1/session/plan")
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        let json: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(json["session"]["carrier_hz"], 420.0);
        assert_eq!(json["session"]["duration_sec"], 1800.0);
        // Default beats 12/14 average to 13: Beta band
        assert_eq!(json["session"]["label"], "Beta");
        assert_eq!(json["session"]["has_music"], false);
        assert_eq!(json["plan"]["loop_music"], false);
        assert!(json["plan"]["filter_graph"]
            .as_str()
            .unwrap()
            .contains("alimiter=limit=0.95"));
        assert_eq!(json["plan"]["output"]["sample_rate"], 48000);
    }

    #[actix_web::test]
    async fn plan_endpoint_applies_supplied_fields() {
        let state = AppState::new(AppConfig::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/session/plan", web::post().to(preview_session)),
        )
        .await;

        let (content_type, body) = multipart_body(&[
            ("carrier", "420"),
            ("beatStart", "8"),
            ("beatEnd", "12"),
            ("durationSec", "600"),
        ]);
        let req = test::TestRequest::post()
            .uri("/api/v1/session/plan")
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        let json: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(json["session"]["duration_sec"], 600.0);
        // avg beat = 10 -> Alpha
        assert_eq!(json["session"]["label"], "Alpha");
        assert!(json["session"]["filename"]
            .as_str()
            .unwrap()
            .starts_with("Alpha_8p00-12p00Hz_10min_"));
    }
}
