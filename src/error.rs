use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use thiserror::Error;
use tracing::{error, warn};

pub const LOGIN_PAGE: &str = "/login.html";

/// Errors surfaced by the stores, the upload pipeline and the handlers.
///
/// Storage and persistence failures keep their source for the server log;
/// clients only ever see a generic message for those.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing partyname query param.")]
    MissingParty,

    #[error("Invalid party name.")]
    InvalidParty,

    #[error("Invalid file name.")]
    InvalidFileName,

    #[error("{0}")]
    Validation(String),

    #[error("No photo sent.")]
    NoFiles,

    #[error("Too many files, at most {max} per upload.")]
    TooManyFiles { max: usize },

    #[error("Unsupported file type! Only images are allowed.")]
    UnsupportedType,

    #[error("File too large, the limit is {limit} bytes.")]
    PayloadTooLarge { limit: u64 },

    #[error("Authentication required.")]
    Unauthorized,

    #[error("Incorrect current password.")]
    IncorrectOldPassword,

    #[error("Username already taken.")]
    DuplicateUsername,

    #[error("{0} not found.")]
    NotFound(&'static str),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingParty
            | AppError::InvalidParty
            | AppError::InvalidFileName
            | AppError::Validation(_)
            | AppError::NoFiles
            | AppError::TooManyFiles { .. }
            | AppError::IncorrectOldPassword => StatusCode::BAD_REQUEST,
            AppError::UnsupportedType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Unauthorized => StatusCode::SEE_OTHER,
            AppError::DuplicateUsername => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Storage(_) | AppError::Persistence(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Unauthorized => return Redirect::to(LOGIN_PAGE).into_response(),
            AppError::Storage(_) | AppError::Persistence(_) | AppError::Internal(_) => {
                error!(error = %self, "request failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
                    .into_response();
            }
            _ => warn!(error = %self, "request rejected"),
        }
        (self.status(), self.to_string()).into_response()
    }
}
