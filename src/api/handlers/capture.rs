use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use crate::api::envelope::ApiResponse;
use crate::api::live::LiveCaptureService;
use crate::models::interface::collect_interface_details;
use crate::utils::error::{AppError, AppResult};

/// Maximum accepted pcap upload size (100 MiB)
const MAX_PCAP_UPLOAD: usize = 100 * 1024 * 1024;

/// Coordinator process start time, used for uptime reporting
#[derive(Clone, Copy)]
pub struct StartTime(pub DateTime<Utc>);

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime: String,
    components: HashMap<String, String>,
}

#[derive(Deserialize)]
pub struct LiveCaptureRequest {
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub filter: Option<String>,
}

/// GET /api/health
pub async fn health(start: web::Data<StartTime>) -> HttpResponse {
    let uptime = Utc::now() - start.0;
    let mut components = HashMap::new();
    components.insert("server".to_string(), "healthy".to_string());
    components.insert("capture".to_string(), "healthy".to_string());

    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: format!("{}s", uptime.num_seconds()),
        components,
    })
}

/// GET /api/interfaces
pub async fn list_interfaces() -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::with_data(collect_interface_details()))
}

/// POST /api/analyze: multipart upload of a pcap file, field "pcap"
pub async fn analyze_pcap(
    mut payload: Multipart,
    service: web::Data<Arc<LiveCaptureService>>,
) -> AppResult<HttpResponse> {
    let temp_path = std::env::temp_dir().join(format!(
        "gatewatch-upload-{}.pcap",
        Utc::now().format("%Y%m%d-%H%M%S%.6f")
    ));

    let mut filename = String::new();
    let mut written = 0usize;
    let mut found = false;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|err| AppError::InvalidRequest(format!("invalid multipart body: {}", err)))?
    {
        if field.name() != Some("pcap") {
            continue;
        }
        found = true;
        filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or("upload.pcap")
            .to_string();

        let mut file = std::fs::File::create(&temp_path)?;
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|err| AppError::InvalidRequest(format!("upload aborted: {}", err)))?
        {
            written += chunk.len();
            if written > MAX_PCAP_UPLOAD {
                drop(file);
                let _ = std::fs::remove_file(&temp_path);
                return Err(AppError::InvalidRequest(
                    "File exceeds the 100 MiB upload limit".to_string(),
                ));
            }
            file.write_all(&chunk)?;
        }
    }

    if !found {
        return Err(AppError::InvalidRequest(
            "No pcap file found in the request".to_string(),
        ));
    }

    let result = service.analyze_file(&temp_path).await;
    let _ = std::fs::remove_file(&temp_path);
    let report = result?;

    info!(
        "Analyzed '{}': {} packets, {} gateway-relevant",
        filename, report.total_packets, report.gateway_packets
    );

    Ok(HttpResponse::Ok().json(ApiResponse::with_message_and_data(
        format!("PCAP file '{}' analyzed successfully", filename),
        report,
    )))
}

/// POST /api/live/start
pub async fn start_live_capture(
    service: web::Data<Arc<LiveCaptureService>>,
    request: web::Json<LiveCaptureRequest>,
) -> AppResult<HttpResponse> {
    service.start(&request.interface, request.filter.as_deref())?;

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(format!(
        "Live capture started on interface {}",
        request.interface
    ))))
}

/// POST /api/live/stop
pub async fn stop_live_capture(
    service: web::Data<Arc<LiveCaptureService>>,
) -> AppResult<HttpResponse> {
    service.stop()?;
    Ok(HttpResponse::Ok().json(ApiResponse::with_message("Live capture stopped")))
}
