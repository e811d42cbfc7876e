pub(crate) mod coordinator;
pub(crate) mod datasources;
pub(crate) mod executions;
pub(crate) mod health;
pub(crate) mod stats;
pub(crate) mod tasks;

#[cfg(test)]
pub(crate) mod test_support;
