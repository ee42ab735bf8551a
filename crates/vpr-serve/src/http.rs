use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use vpr_core::{CameraModel, Failure};
use vpr_pipeline::{Pipeline, ResponseBody};

/// Intrinsics sent alongside the image body.
#[derive(Debug, Deserialize)]
pub struct CameraQuery {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
}

/// HTTP status for a session outcome.
pub fn status_of(outcome: Result<(), &Failure>) -> StatusCode {
    match outcome {
        Ok(()) => StatusCode::OK,
        Err(Failure::DecodeFailure(_) | Failure::InvalidQuery(_)) => StatusCode::BAD_REQUEST,
        Err(f) if f.is_no_match() => StatusCode::UNPROCESSABLE_ENTITY,
        Err(Failure::Overloaded) => StatusCode::SERVICE_UNAVAILABLE,
        Err(Failure::PendingRequestTimeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        Err(Failure::RemoteCallFailure(_)) => StatusCode::BAD_GATEWAY,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `POST /api/v0/locate?fx=..&fy=..&cx=..&cy=..` with the encoded image as body.
pub async fn locate(
    State(pipeline): State<Arc<Pipeline>>,
    Query(query): Query<CameraQuery>,
    body: Bytes,
) -> impl IntoResponse {
    let camera = match CameraModel::new(query.fx, query.fy, query.cx, query.cy) {
        Ok(camera) => camera,
        Err(e) => {
            let failure = Failure::InvalidQuery(e.to_string());
            let body = ResponseBody {
                session: 0,
                status: failure.kind().to_string(),
                message: Some(failure.to_string()),
                localization: None,
                timings_ms: Default::default(),
            };
            return (status_of(Err(&failure)), Json(body));
        }
    };

    let response = pipeline.locate(body.to_vec(), camera).await;
    (
        status_of(response.outcome.as_ref().map(|_| ())),
        Json(response.to_body()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_of_failures() {
        assert_eq!(status_of(Ok(())), StatusCode::OK);
        assert_eq!(
            status_of(Err(&Failure::DecodeFailure("png".into()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(Err(&Failure::AllCandidatesExhausted { tried: 5 })),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(Err(&Failure::NoWordMatches)),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(Err(&Failure::RemoteCallFailure("refused".into()))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(Err(&Failure::stage_fault("words", "panic"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
