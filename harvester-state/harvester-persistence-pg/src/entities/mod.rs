//! `SeaORM` entities for the collection schema created by `harvester-migration`

pub mod collected_records;
pub mod collection_tasks;
pub mod data_sources;
pub mod task_executions;
