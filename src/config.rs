use crate::{QuarryError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarryConfig {
    pub dispatcher: DispatcherConfig,
    pub runners: RunnerPoolConfig,
}

impl QuarryConfig {
    pub fn validate(&self) -> Result<()> {
        self.dispatcher.validate()?;
        self.runners.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of worker tasks executing jobs.
    ///
    /// _Default:_ `4`.
    pub workers: usize,
    /// Capacity of the job queue. `enqueue` waits while it is full.
    ///
    /// _Default:_ `1024`.
    pub queue_size: usize,
    /// Number of seconds a finished job stays fetchable.
    ///
    /// _Default:_ `3600`.
    pub job_ttl_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 1024,
            job_ttl_secs: 3600,
        }
    }
}

impl DispatcherConfig {
    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(QuarryError::Config("dispatcher.workers must be at least 1".into()));
        }
        if self.queue_size == 0 {
            return Err(QuarryError::Config("dispatcher.queue_size must be at least 1".into()));
        }
        if self.job_ttl_secs == 0 {
            return Err(QuarryError::Config("dispatcher.job_ttl_secs must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerPoolConfig {
    /// Maximum number of runner instances kept alive.
    ///
    /// _Default:_ `128`.
    pub max_runners: u64,
    /// Number of seconds an unused runner is kept before being dropped.
    ///
    /// _Default:_ `600`.
    pub idle_secs: u64,
}

impl Default for RunnerPoolConfig {
    fn default() -> Self {
        Self {
            max_runners: 128,
            idle_secs: 600,
        }
    }
}

impl RunnerPoolConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_runners == 0 {
            return Err(QuarryError::Config("runners.max_runners must be at least 1".into()));
        }
        Ok(())
    }
}
