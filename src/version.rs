use chrono::{DateTime, Local};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
    pub git_commit: &'static str,
    pub git_dirty: bool,
    pub build_time: String,
}

pub fn get_version_info() -> VersionInfo {
    let build_timestamp: i64 = env!("BUILD_TIME").parse().unwrap_or(0);
    let build_datetime: DateTime<Local> = DateTime::from_timestamp(build_timestamp, 0)
        .map(|utc| utc.with_timezone(&Local))
        .unwrap_or_else(Local::now);

    VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
        git_commit: env!("GIT_COMMIT_HASH"),
        git_dirty: env!("GIT_DIRTY") == "dirty",
        build_time: build_datetime.format("%Y-%m-%d %H:%M:%S %Z").to_string(),
    }
}

pub fn get_short_version() -> &'static str {
    let version = env!("CARGO_PKG_VERSION");
    let git_commit = env!("GIT_COMMIT_HASH");
    if env!("GIT_DIRTY") == "dirty" {
        concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_COMMIT_HASH"), "-dirty")
    } else if git_commit == "unknown" {
        version
    } else {
        concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_COMMIT_HASH"))
    }
}
