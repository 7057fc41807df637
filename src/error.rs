use axum::{http::StatusCode, response::{IntoResponse, Response}};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("gateway error: {0}")]
    Gateway(#[from] reqwest::Error),
    #[error("이미 처리된 거래입니다.")]
    DuplicateTransaction,
    #[error("필수 파라미터가 누락되었습니다: {0}")]
    MissingParameters(&'static str),
    #[error("주문에 해당하는 사용자를 찾을 수 없습니다.")]
    UserResolutionFailure,
    #[error("결제 승인에 실패했습니다: {0}")]
    GatewayVerification(String),
    #[error("잘못된 결제 금액입니다.")]
    InvalidAmount,
    #[error("일일 사용 한도를 초과했습니다.")]
    QuotaExceeded,
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("bad gateway: {0}")]
    BadGateway(String),
    #[error("{0}")]
    Message(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::DuplicateTransaction => StatusCode::CONFLICT,
            AppError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            AppError::MissingParameters(_)
            | AppError::UserResolutionFailure
            | AppError::InvalidAmount
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Gateway(_) | AppError::GatewayVerification(_) | AppError::BadGateway(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Db(_) | AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(?self);
        (self.status_code(), self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
