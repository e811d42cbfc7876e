use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::task::{JoinError, JoinHandle};

use crate::engine::RunSummary;

pub mod default;

pub struct CoordinatorConfig {
    /// Period of the scheduler clock
    pub tick_interval: Duration,

    /// How long in-flight runs may take to finish once shutdown began
    pub shutdown_grace: Duration,
}

pub struct MonitoredRun {
    task_id: i64,
    handle: JoinHandle<RunSummary>,
}

impl MonitoredRun {
    pub fn new(task_id: i64, handle: JoinHandle<RunSummary>) -> Self {
        Self { task_id, handle }
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Future for MonitoredRun {
    type Output = (i64, Result<RunSummary, JoinError>);

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(join_result) => Poll::Ready((self.task_id, join_result)),
            Poll::Pending => Poll::Pending,
        }
    }
}
