use sea_orm_migration::prelude::*;

#[derive(Iden)]
#[iden = "data_sources"]
pub enum DataSource {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "type"]
    SourceType,
    #[iden = "status"]
    Status,
    #[iden = "config"]
    Config,
    #[iden = "description"]
    Description,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}
