mod base;
mod datasource;
mod execution;
mod record;
mod stats;
mod task;

#[cfg(test)]
pub(crate) mod test_support;
