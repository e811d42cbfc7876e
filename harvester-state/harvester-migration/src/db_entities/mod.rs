mod datasource;
mod execution;
mod record;
mod task;

pub use datasource::*;
pub use execution::*;
pub use record::*;
pub use task::*;
