//! Command-line arguments and progress rendering for the `uppy` binary

use clap::Parser;
use multipart_ul::{
    PartStatus, RegistryOptions, SiblingFailurePolicy, UploadConfig, UploadSession, UploadStatus,
};
use std::path::PathBuf;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;
// S3 caps a single part at 5 GiB
const MAX_CHUNK_MIB: u64 = 5 * 1024;

// Progress lines per session: at most one every 500ms
pub const PRINT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(
    name = "uppy",
    version,
    about = "Upload large files to S3-compatible storage with concurrent multipart uploads",
    long_about = "Store credentials come from AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_REGION and \
AWS_BUCKET; AWS_ENDPOINT_URL, AWS_FORCE_PATH_STYLE and UPPY_PUBLIC_READ are optional."
)]
pub struct Args {
    /// Files to upload, each as its own multipart upload
    #[arg(required = true, value_name = "FILES")]
    pub files: Vec<PathBuf>,

    /// Part size in MiB (1 to 5120, the S3 part size limit)
    #[arg(
        long,
        value_name = "MIB",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..=MAX_CHUNK_MIB)
    )]
    pub chunk_size: u64,

    /// Maximum parts in flight per file (default: all at once)
    #[arg(long, value_name = "N")]
    pub max_parts: Option<usize>,

    /// Maximum files uploading at once (default: unbounded)
    #[arg(long, value_name = "N")]
    pub max_files: Option<usize>,

    /// Cancel in-flight sibling parts as soon as one part fails
    #[arg(long)]
    pub cancel_siblings: bool,

    /// Content type sent with every file
    #[arg(long, value_name = "MIME")]
    pub content_type: Option<String>,

    /// Print session snapshots as JSON lines
    #[arg(long)]
    pub json: bool,
}

impl Args {
    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            chunk_size: self.chunk_size * MIB,
            max_concurrent_parts: self.max_parts,
            sibling_failure: if self.cancel_siblings {
                SiblingFailurePolicy::Cancel
            } else {
                SiblingFailurePolicy::LetFinish
            },
            ..UploadConfig::default()
        }
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            max_active_sessions: self.max_files,
            ..RegistryOptions::default()
        }
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// One human-readable status line for a session.
pub fn progress_line(session: &UploadSession) -> String {
    let name = &session.file.name;
    match session.status {
        UploadStatus::Succeeded => format!(
            "{}: done in {:.1}s -> {}",
            name,
            session.elapsed.as_secs_f64(),
            session.public_reference.as_deref().unwrap_or("")
        ),
        UploadStatus::Errored => format!(
            "{}: failed: {}",
            name,
            session
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string())
        ),
        UploadStatus::Aborted => format!(
            "{}: cancelled after {}",
            name,
            format_bytes(session.bytes_sent)
        ),
        status => {
            let done = session
                .parts
                .iter()
                .filter(|p| p.status == PartStatus::Completed)
                .count();
            format!(
                "{}: {} {}% {}/{} parts {}/{} {}/s eta {}s",
                name,
                status,
                session.percent(),
                done,
                session.parts.len(),
                format_bytes(session.bytes_sent),
                format_bytes(session.total_bytes),
                format_bytes(session.speed as u64),
                session.remaining.as_secs()
            )
        }
    }
}
