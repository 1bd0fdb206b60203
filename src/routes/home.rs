use axum::{response::IntoResponse, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct Liveness {
    message: String,
}

pub async fn home() -> impl IntoResponse {
    Json(Liveness {
        message: "Helmet detection API is running. Send images to /detect".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn home_returns_static_liveness_payload() {
        let response = home().await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(
            json["message"],
            "Helmet detection API is running. Send images to /detect"
        );
    }
}
