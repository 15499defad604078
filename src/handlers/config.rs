use crate::{error::AppError, error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "engine": {
                "model_path": config.engine.model_path
            },
            "performance": {
                "max_concurrent_transcriptions": config.performance.max_concurrent_transcriptions,
                "max_payload_bytes": config.performance.max_payload_bytes
            }
        }
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> AppResult<HttpResponse> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|err| AppError::ConfigRejected(err.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ConfigRejected)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "server": {
                "host": current_config.server.host,
                "port": current_config.server.port
            },
            "engine": {
                "model_path": current_config.engine.model_path
            },
            "performance": {
                "max_concurrent_transcriptions": current_config.performance.max_concurrent_transcriptions,
                "max_payload_bytes": current_config.performance.max_payload_bytes
            }
        }
    })))
}
