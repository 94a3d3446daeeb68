use clap::Parser;
use log::{error, info, warn};
use multipart_ul::{UploadHandle, UploadSession, UploadSource, UploadStatus};
use std::process::ExitCode;
use tokio::task::JoinSet;
use tokio::time::Instant;
use uppy_lib::cli::{progress_line, Args, PRINT_INTERVAL};
use uppy_lib::config::AwsConfig;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(2)
        }
    }
}

/// Returns whether every file was uploaded.
async fn run(args: Args) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let aws = AwsConfig::from_env()?;
    let registry = uppy_lib::create_registry(aws, args.upload_config(), args.registry_options())?;

    let mut all_ok = true;
    let mut reporters = JoinSet::new();

    for path in &args.files {
        let source = match UploadSource::from_path(path).await {
            Ok(source) => source,
            Err(e) => {
                error!("upload_skipped: {} error={}", path.display(), e);
                all_ok = false;
                continue;
            }
        };
        let source = match &args.content_type {
            Some(content_type) => source.with_content_type(content_type.clone()),
            None => source,
        };

        match registry.start(source) {
            Ok(handle) => {
                info!("upload_queued: {} file={}", handle.id(), path.display());
                reporters.spawn(report(handle, args.json));
            }
            Err(e) => {
                error!("upload_rejected: {} error={}", path.display(), e);
                all_ok = false;
            }
        }
    }

    let interrupt = registry.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt: cancelling {} upload(s)", interrupt.len());
            interrupt.cancel_all();
        }
    });

    while let Some(joined) = reporters.join_next().await {
        match joined {
            Ok(session) => all_ok &= session.status == UploadStatus::Succeeded,
            Err(e) => {
                error!("reporter_failed: {}", e);
                all_ok = false;
            }
        }
    }

    Ok(all_ok)
}

/// Print a session's progress until it is terminal; returns the terminal snapshot.
async fn report(handle: UploadHandle, json: bool) -> UploadSession {
    let mut state = handle.subscribe();
    let mut last_print: Option<Instant> = None;

    loop {
        let session = state.borrow_and_update().clone();
        let due = last_print.map_or(true, |at| at.elapsed() >= PRINT_INTERVAL);
        if session.is_terminal() || due {
            print_session(&session, json);
            last_print = Some(Instant::now());
        }
        if session.is_terminal() {
            return session;
        }
        if state.changed().await.is_err() {
            return handle.snapshot();
        }
    }
}

fn print_session(session: &UploadSession, json: bool) {
    if json {
        match serde_json::to_string(session) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("snapshot_serialize_failed: {} error={}", session.id, e),
        }
    } else {
        println!("{}", progress_line(session));
    }
}
