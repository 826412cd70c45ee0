//! Launch-time configuration of a recording or replaying child process.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ReplayError, Result};
use crate::Protocol::ROOT_FORK_ID;

/// Command line option carrying the middleman's pid.
pub const MIDDLEMAN_PID_OPTION: &str = "-middlemanPid";
/// Command line option carrying the record/replay channel id.
pub const CHANNEL_ID_OPTION: &str = "-recordReplayChannelID";

pub const SOCKET_DIR_ENV: &str = "REPLAY_IPC_SOCKET_DIR";
pub const OFFLINE_DIR_ENV: &str = "WEBREPLAY_OFFLINE";
pub const RECORDING_ENV: &str = "REPLAY_IPC_RECORDING";
pub const RECORDING_MODE_ENV: &str = "REPLAY_IPC_RECORDING_MODE";
pub const LOG_ENV: &str = "REPLAY_IPC_LOG";

pub const DEFAULT_LOG_FILTER: &str = "replay_ipc=info";

/// How long a new fork waits for its root to connect before exiting.
pub const DEFAULT_FORK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProcessRole {
    Recording,
    Replaying,
}

impl ProcessRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "record" | "recording" => Some(ProcessRole::Recording),
            "replay" | "replaying" => Some(ProcessRole::Replaying),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessConfig {
    pub role: ProcessRole,
    pub channel_id: u32,
    pub middleman_pid: u32,
    pub fork_id: u32,
    pub socket_dir: PathBuf,
    pub offline_dir: Option<PathBuf>,
    pub recording_name: Option<String>,
    pub fork_timeout: Duration,
    pub log_filter: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            role: ProcessRole::Replaying,
            channel_id: 0,
            middleman_pid: 0,
            fork_id: ROOT_FORK_ID,
            socket_dir: std::env::temp_dir(),
            offline_dir: None,
            recording_name: None,
            fork_timeout: DEFAULT_FORK_TIMEOUT,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl ProcessConfig {
    pub fn new(role: ProcessRole) -> Self {
        Self {
            role,
            ..Self::default()
        }
    }

    pub fn with_channel_id(mut self, channel_id: u32) -> Self {
        self.channel_id = channel_id;
        self
    }

    pub fn with_middleman_pid(mut self, pid: u32) -> Self {
        self.middleman_pid = pid;
        self
    }

    pub fn with_fork_id(mut self, fork_id: u32) -> Self {
        self.fork_id = fork_id;
        self
    }

    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    pub fn with_offline_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.offline_dir = Some(dir.into());
        self
    }

    pub fn with_recording_name(mut self, name: impl Into<String>) -> Self {
        self.recording_name = Some(name.into());
        self
    }

    pub fn with_fork_timeout(mut self, timeout: Duration) -> Self {
        self.fork_timeout = timeout;
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    pub fn is_recording(&self) -> bool {
        self.role == ProcessRole::Recording
    }

    pub fn is_replaying(&self) -> bool {
        self.role == ProcessRole::Replaying
    }

    /// Read the channel id and middleman pid from launch arguments.
    ///
    /// The channel id is required. Other fields keep their defaults.
    pub fn from_args<I, S>(role: ProcessRole, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let mut config = Self::new(role);
        let mut channel_id = None;

        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_ref();
            if arg == MIDDLEMAN_PID_OPTION || arg == CHANNEL_ID_OPTION {
                let value = args
                    .get(i + 1)
                    .map(|v| v.as_ref())
                    .ok_or(ReplayError::MissingArgument(if arg == CHANNEL_ID_OPTION {
                        CHANNEL_ID_OPTION
                    } else {
                        MIDDLEMAN_PID_OPTION
                    }))?;
                if arg == CHANNEL_ID_OPTION {
                    channel_id = Some(parse_u32(CHANNEL_ID_OPTION, value)?);
                } else {
                    config.middleman_pid = parse_u32(MIDDLEMAN_PID_OPTION, value)?;
                }
                i += 2;
                continue;
            }
            i += 1;
        }

        config.channel_id = channel_id.ok_or(ReplayError::MissingArgument(CHANNEL_ID_OPTION))?;
        Ok(config)
    }

    /// Overlay settings taken from the process environment.
    pub fn from_env(self) -> Result<Self> {
        self.with_env_lookup(|name| std::env::var(name).ok())
    }

    /// Overlay settings from `lookup`, which maps variable names to values.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(SOCKET_DIR_ENV) {
            self.socket_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(OFFLINE_DIR_ENV) {
            self.offline_dir = Some(PathBuf::from(dir));
        }
        if let Some(name) = lookup(RECORDING_ENV) {
            self.recording_name = Some(name);
        }
        if let Some(mode) = lookup(RECORDING_MODE_ENV) {
            self.role = ProcessRole::parse(&mode).ok_or(ReplayError::InvalidArgument {
                name: RECORDING_MODE_ENV,
                value: mode,
            })?;
        }
        if let Some(filter) = lookup(LOG_ENV) {
            self.log_filter = filter;
        }
        Ok(self)
    }
}

fn parse_u32(name: &'static str, value: &str) -> Result<u32> {
    value.parse().map_err(|_| ReplayError::InvalidArgument {
        name,
        value: value.to_string(),
    })
}
