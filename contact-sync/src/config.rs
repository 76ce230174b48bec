use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use crate::pipeline::{BatchingConfig, PipelineConfig};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(default = "true")]
    pub export_metrics: bool,

    #[envconfig(default = "contacts.csv")]
    pub csv_path: String,

    pub directory_url: String,

    pub api_key: NonEmptyString,

    #[envconfig(default = "15000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(default = "1000")]
    pub lookup_interval: EnvMsDuration,

    #[envconfig(default = "2")]
    pub batch_size: NonZeroUsize,

    #[envconfig(default = "60000")]
    pub flush_timeout: EnvMsDuration,

    pub classifier_workers: Option<NonZeroUsize>,

    #[envconfig(default = "100")]
    pub intake_capacity: NonZeroUsize,

    #[envconfig(default = "500")]
    pub create_queue_capacity: NonZeroUsize,

    #[envconfig(default = "500")]
    pub update_queue_capacity: NonZeroUsize,

    pub run_deadline: Option<EnvMsDuration>,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pipeline(&self) -> PipelineConfig {
        let classifier_workers = self
            .classifier_workers
            .or_else(|| std::thread::available_parallelism().ok())
            .unwrap_or(NonZeroUsize::MIN);

        PipelineConfig {
            classifier_workers,
            lookup_interval: self.lookup_interval.0,
            intake_capacity: self.intake_capacity,
            create_batching: BatchingConfig {
                batch_size: self.batch_size,
                flush_timeout: self.flush_timeout.0,
                queue_capacity: self.create_queue_capacity,
            },
            update_batching: BatchingConfig {
                batch_size: self.batch_size,
                flush_timeout: self.flush_timeout.0,
                queue_capacity: self.update_queue_capacity,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
