use super::BoxFuture;
use super::locations::StorageError;
use crate::geo::BoundingBox;
use crate::proximity::UserPosition;

pub trait ProximityRepository: Send + Sync {
    /// Records the latest position of a user. Older positions never overwrite newer ones.
    fn upsert_position(&self, position: &UserPosition) -> BoxFuture<'_, Result<(), StorageError>>;

    /// Coarse stage: positions inside `bbox`, ordered by username, paged by limit/offset.
    fn candidates(
        &self,
        bbox: &BoundingBox,
        limit: usize,
        offset: usize,
    ) -> BoxFuture<'_, Result<Vec<UserPosition>, StorageError>>;
}
