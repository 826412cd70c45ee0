// Launch arguments and environment overrides
// Run with: cargo test --test config

use replay_ipc::config::{
    CHANNEL_ID_OPTION, DEFAULT_FORK_TIMEOUT, DEFAULT_LOG_FILTER, LOG_ENV, MIDDLEMAN_PID_OPTION,
    OFFLINE_DIR_ENV, RECORDING_ENV, RECORDING_MODE_ENV, SOCKET_DIR_ENV,
};
use replay_ipc::{ProcessConfig, ProcessRole, ReplayError};
use std::collections::HashMap;
use std::path::PathBuf;

#[test]
fn test_defaults() {
    let config = ProcessConfig::new(ProcessRole::Recording);
    assert!(config.is_recording());
    assert!(!config.is_replaying());
    assert_eq!(config.fork_id, 0);
    assert_eq!(config.fork_timeout, DEFAULT_FORK_TIMEOUT);
    assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    assert!(config.offline_dir.is_none());
}

#[test]
fn test_from_args() {
    let args = [
        "browser",
        "--headless",
        MIDDLEMAN_PID_OPTION,
        "4242",
        CHANNEL_ID_OPTION,
        "7",
        "about:blank",
    ];
    let config = ProcessConfig::from_args(ProcessRole::Replaying, args).unwrap();
    assert_eq!(config.middleman_pid, 4242);
    assert_eq!(config.channel_id, 7);
    assert!(config.is_replaying());
}

#[test]
fn test_channel_id_is_required() {
    let result = ProcessConfig::from_args(ProcessRole::Recording, [MIDDLEMAN_PID_OPTION, "1"]);
    assert!(matches!(
        result,
        Err(ReplayError::MissingArgument(option)) if option == CHANNEL_ID_OPTION
    ));

    let result = ProcessConfig::from_args(ProcessRole::Recording, ["x", CHANNEL_ID_OPTION]);
    assert!(matches!(result, Err(ReplayError::MissingArgument(_))));
}

#[test]
fn test_bad_number_is_rejected() {
    let result = ProcessConfig::from_args(ProcessRole::Recording, [CHANNEL_ID_OPTION, "seven"]);
    match result {
        Err(ReplayError::InvalidArgument { name, value }) => {
            assert_eq!(name, CHANNEL_ID_OPTION);
            assert_eq!(value, "seven");
        }
        other => panic!("expected invalid argument, got {:?}", other),
    }
}

#[test]
fn test_env_overrides() {
    let env: HashMap<&str, &str> = [
        (SOCKET_DIR_ENV, "/run/replay"),
        (OFFLINE_DIR_ENV, "/data/recordings"),
        (RECORDING_ENV, "session-9"),
        (RECORDING_MODE_ENV, "record"),
        (LOG_ENV, "replay_ipc=trace"),
    ]
    .into_iter()
    .collect();

    let config = ProcessConfig::new(ProcessRole::Replaying)
        .with_env_lookup(|name| env.get(name).map(|v| v.to_string()))
        .unwrap();
    assert_eq!(config.socket_dir, PathBuf::from("/run/replay"));
    assert_eq!(config.offline_dir, Some(PathBuf::from("/data/recordings")));
    assert_eq!(config.recording_name.as_deref(), Some("session-9"));
    assert_eq!(config.role, ProcessRole::Recording);
    assert_eq!(config.log_filter, "replay_ipc=trace");
}

#[test]
fn test_unset_env_keeps_values() {
    let config = ProcessConfig::new(ProcessRole::Replaying)
        .with_socket_dir("/tmp/sockets")
        .with_env_lookup(|_| None)
        .unwrap();
    assert_eq!(config.socket_dir, PathBuf::from("/tmp/sockets"));
    assert!(config.is_replaying());
}

#[test]
fn test_bad_recording_mode_is_rejected() {
    let result =
        ProcessConfig::new(ProcessRole::Replaying).with_env_lookup(|name| {
            (name == RECORDING_MODE_ENV).then(|| "sideways".to_string())
        });
    assert!(matches!(
        result,
        Err(ReplayError::InvalidArgument { name, .. }) if name == RECORDING_MODE_ENV
    ));
}

#[test]
fn test_role_names() {
    assert_eq!(ProcessRole::parse("replaying"), Some(ProcessRole::Replaying));
    assert_eq!(ProcessRole::parse("recording"), Some(ProcessRole::Recording));
    assert_eq!(ProcessRole::parse("paused"), None);
}
