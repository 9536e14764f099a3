//! Metadata catalogue gateways
//!
//! The catalogue is polymorphic over its backing: the primary Postgres
//! catalogue and an on-disk staging folder both implement
//! [`crate::storage::MetadataStorage`] and tag their datasets with a
//! provenance marker.

mod file;
mod postgres;

pub use file::FileMetadataStorage;
pub use postgres::{init_tables as init_catalogue_tables, PostgresMetadataStorage};

use std::sync::Arc;

use distil_common::{Error, Result};

use crate::storage::{DataStorage, MetadataStorage, SolutionStorage};

/// Flips a variable's semantic type in both the catalogue and the data
/// store's inference hint. Refused while any request referencing the
/// dataset is still active.
pub async fn set_variable_type(
    metadata: &Arc<dyn MetadataStorage>,
    data: &Arc<dyn DataStorage>,
    solutions: &Arc<dyn SolutionStorage>,
    dataset: &str,
    storage_name: &str,
    variable_key: &str,
    ty: &str,
) -> Result<()> {
    if solutions.has_active_request(dataset).await? {
        return Err(Error::TypeChangeLocked(format!(
            "variable `{variable_key}` participates in an active request on `{dataset}`"
        )));
    }
    metadata.set_data_type(dataset, variable_key, ty).await?;
    data.set_data_type(dataset, storage_name, variable_key, ty)
        .await?;
    Ok(())
}
