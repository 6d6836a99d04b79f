//! Service boundary for sample IP addresses.
//!
//! Repository errors are re-wrapped into [`ServiceError`] with a message naming
//! the failed operation; the underlying [`DbError`](crate::error::DbError) stays
//! reachable as the cause.

use crate::db::context::DatabaseContext;
use crate::error::{DbError, ServiceError};
use crate::repository::{IpAddressRecord, IpAddressRepository, NewIpAddress};
use tracing::error;

const ADD_FAILED: &str = "Error occurred while adding Sample IP data.";
const ADD_BATCH_FAILED: &str = "Error occurred while adding Sample IP data in batch.";
const LIST_FAILED: &str = "Error occurred while fetching Sample IP data.";
const COUNT_FAILED: &str = "Error occurred while counting active Sample IP data.";

fn wrap(message: &'static str) -> impl FnOnce(DbError) -> ServiceError {
    move |source| {
        error!(error = %source, "{message}");
        ServiceError::new(message, source)
    }
}

pub struct IpAddressService<'c> {
    context: &'c DatabaseContext,
    repository: IpAddressRepository<'c>,
}

impl<'c> IpAddressService<'c> {
    pub fn new(context: &'c DatabaseContext) -> Self {
        Self {
            context,
            repository: IpAddressRepository::new(context),
        }
    }

    pub async fn add(&self, ip: &NewIpAddress) -> Result<u64, ServiceError> {
        self.repository.add(ip).await.map_err(wrap(ADD_FAILED))
    }

    /// Insert every address in one unit of work; nothing is kept on failure.
    pub async fn add_many(&self, ips: &[NewIpAddress]) -> Result<u64, ServiceError> {
        let mut unit_of_work = self
            .context
            .create_unit_of_work()
            .await
            .map_err(wrap(ADD_BATCH_FAILED))?;

        let mut inserted = 0;
        for ip in ips {
            match self.repository.add_in(&unit_of_work, ip).await {
                Ok(count) => inserted += count,
                Err(e) => {
                    unit_of_work.release().await;
                    return Err(wrap(ADD_BATCH_FAILED)(e));
                }
            }
        }

        if let Err(e) = unit_of_work.save_changes().await {
            unit_of_work.release().await;
            return Err(wrap(ADD_BATCH_FAILED)(e));
        }
        Ok(inserted)
    }

    pub async fn list_all(&self) -> Result<Vec<IpAddressRecord>, ServiceError> {
        self.repository.list_all().await.map_err(wrap(LIST_FAILED))
    }

    pub async fn count_active(&self) -> Result<i64, ServiceError> {
        self.repository
            .count_active()
            .await
            .map_err(wrap(COUNT_FAILED))
    }
}
