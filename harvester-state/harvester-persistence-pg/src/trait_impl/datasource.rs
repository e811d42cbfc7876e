use async_trait::async_trait;
use chrono::Utc;
use harvester_common::{
    common::{Page, Pagination},
    datasource::{DataSource, DataSourceDraft},
    error::Error,
    state::{DataSourceDbTrait, DataSourceFilter},
    task::TaskStatus,
};
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ActiveValue::Set, ColumnTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};

use crate::{
    db::PostgresStateDb,
    entities::{collection_tasks, data_sources},
    mapping::{datasource_to_domain, db_error_to_domain, to_db_time},
};

#[async_trait]
impl DataSourceDbTrait for PostgresStateDb {
    async fn get_datasource(&self, id: i64) -> Result<Option<DataSource>, Error> {
        data_sources::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .map_err(db_error_to_domain)?
            .map(datasource_to_domain)
            .transpose()
    }

    async fn list_datasources(
        &self,
        filter: DataSourceFilter,
        pagination: Pagination,
    ) -> Result<Page<DataSource>, Error> {
        let mut query = data_sources::Entity::find();
        if let Some(source_type) = filter.source_type {
            query = query.filter(data_sources::Column::SourceType.eq(source_type.to_string()));
        }
        if let Some(status) = filter.status {
            query = query.filter(data_sources::Column::Status.eq(status.to_string()));
        }

        let total = query
            .clone()
            .count(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        let models = query
            .order_by_desc(data_sources::Column::Id)
            .limit(pagination.limit)
            .offset(pagination.offset)
            .all(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        let items = models
            .into_iter()
            .map(datasource_to_domain)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, total))
    }

    async fn create_datasource(&self, draft: DataSourceDraft) -> Result<DataSource, Error> {
        let now = to_db_time(Utc::now());

        let model = data_sources::ActiveModel {
            id: NotSet,
            name: Set(draft.name),
            source_type: Set(draft.source_type.to_string()),
            status: Set(draft.status.to_string()),
            config: Set(draft.config),
            description: Set(draft.description),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.conn)
        .await
        .map_err(db_error_to_domain)?;

        datasource_to_domain(model)
    }

    async fn update_datasource(&self, id: i64, draft: DataSourceDraft) -> Result<DataSource, Error> {
        let existing = data_sources::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .map_err(db_error_to_domain)?
            .ok_or_else(|| Error::not_found("DataSource", id))?;

        let mut active: data_sources::ActiveModel = existing.into();
        active.name = Set(draft.name);
        active.source_type = Set(draft.source_type.to_string());
        active.status = Set(draft.status.to_string());
        active.config = Set(draft.config);
        active.description = Set(draft.description);
        active.updated_at = Set(to_db_time(Utc::now()));

        let model = active.update(&self.conn).await.map_err(db_error_to_domain)?;

        datasource_to_domain(model)
    }

    async fn delete_datasource(&self, id: i64) -> Result<(), Error> {
        if data_sources::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .map_err(db_error_to_domain)?
            .is_none()
        {
            return Err(Error::not_found("DataSource", id));
        }

        let referencing = collection_tasks::Entity::find()
            .filter(collection_tasks::Column::DataSourceId.eq(id))
            .filter(collection_tasks::Column::Status.eq(TaskStatus::Enabled.to_string()))
            .one(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        if let Some(task) = referencing {
            return Err(Error::Conflict(format!(
                "data source {id} is referenced by enabled task {}",
                task.id
            )));
        }

        data_sources::Entity::delete_by_id(id)
            .exec(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        Ok(())
    }
}
