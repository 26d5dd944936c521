#![forbid(unsafe_code)]

use murmur_domain::DomainError;
use murmur_protocol::{ErrorKind, ServerEvent};
use thiserror::Error;
use tracing::error;

use crate::server::store::StoreError;

/// Why a request was refused. Scoped to the requesting connection.
#[derive(Debug, Error)]
pub enum RequestError {
	#[error("{0}")]
	Validation(String),

	#[error("{0}")]
	Conflict(String),

	#[error("{0}")]
	NotFound(String),

	#[error("{0}")]
	Unauthorized(String),

	#[error("store failure: {0}")]
	Store(StoreError),
}

pub type RequestResult<T> = Result<T, RequestError>;

impl RequestError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			RequestError::Validation(_) => ErrorKind::Validation,
			RequestError::Conflict(_) => ErrorKind::Conflict,
			RequestError::NotFound(_) => ErrorKind::NotFound,
			RequestError::Unauthorized(_) => ErrorKind::Unauthorized,
			RequestError::Store(_) => ErrorKind::Internal,
		}
	}

	/// Wire form answering the request labelled `request`. Store details stay in the server log.
	pub fn to_event(&self, request: &str) -> ServerEvent {
		match self {
			RequestError::Store(e) => {
				error!(request, error = %e, "request failed on store");
				ServerEvent::rejected(request, ErrorKind::Internal, "internal error")
			}
			other => ServerEvent::rejected(request, other.kind(), other.to_string()),
		}
	}
}

impl From<StoreError> for RequestError {
	fn from(e: StoreError) -> Self {
		match e {
			StoreError::MissingRecipient(r) => RequestError::NotFound(format!("no such recipient: {r}")),
			other => RequestError::Store(other),
		}
	}
}

impl From<DomainError> for RequestError {
	fn from(e: DomainError) -> Self {
		RequestError::Validation(e.to_string())
	}
}
