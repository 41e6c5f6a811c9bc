pub mod arguments;
pub mod bulk_load;
pub mod client;
pub mod query_builder;
pub mod record;
pub mod statement;
pub mod statement_cache;
pub mod upsert;
