use crate::error::StoreError;

/// Maps a raw [`sqlx::Error`] onto [`StoreError`], distinguishing the handful of
/// Postgres error classes the engine cares about from everything else.
pub(crate) trait DBErrorHandler
where
    Self: ToString + Sized,
{
    fn into_store_error(self, message: impl Into<String>) -> StoreError;
}

impl DBErrorHandler for sqlx::Error {
    fn into_store_error(self, message: impl Into<String>) -> StoreError {
        let message = message.into();
        match &self {
            Self::Database(db) => {
                if db.is_unique_violation() {
                    return StoreError::backend("uri already exists", self);
                }
                match db.code().as_deref() {
                    // https://www.postgresql.org/docs/current/errcodes-appendix.html
                    Some(
                        "40001" | "40P01" | "25P02" | "55P03",
                    ) => StoreError::backend("concurrent modification, retry the request", self),
                    _ => StoreError::backend(message, self),
                }
            }
            _ => StoreError::backend(message, self),
        }
    }
}
