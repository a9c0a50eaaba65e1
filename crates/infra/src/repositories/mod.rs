mod locations;
mod positions;

pub use locations::SurrealLocationStore;
pub use positions::SurrealProximityRepository;

fn map_surreal_error(err: surrealdb::Error) -> geotrail_domain::ports::locations::StorageError {
    geotrail_domain::ports::locations::StorageError::Unavailable(format!(
        "surreal query failed: {err}"
    ))
}
