pub mod m20250301_000001_create_collection_tables;
