use async_trait::async_trait;
use harvester_common::{error::Error, state::BaseDbTrait};

use crate::{db::PostgresStateDb, mapping::db_error_to_domain};

#[async_trait]
impl BaseDbTrait for PostgresStateDb {
    async fn ping(&self) -> Result<(), Error> {
        self.conn.ping().await.map_err(db_error_to_domain)
    }
}
