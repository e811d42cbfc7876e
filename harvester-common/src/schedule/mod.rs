mod cron;

pub use cron::*;
