pub mod error;
pub mod geo;
pub mod idempotency;
pub mod ingest;
pub mod jobs;
pub mod locations;
pub mod ports;
pub mod proximity;
pub mod recording;
pub mod replay;
pub mod travel;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
