use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};

use crate::api::HttpCourseApi;
use crate::config::Config;
use crate::error::ErrorType;
use crate::link_check::ScanPhase;
use crate::model::{BatchStatus, InputSource, RawInput, ResourceKind};
use crate::session::CourseSession;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Course id every command operates on.
    #[arg(long, global = true)]
    pub course: Option<String>,

    /// Debug logging for this crate (ignored when RUST_LOG is set).
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load the course's assets and print the session snapshot.
    List,
    Upload(UploadArgs),
    Delete {
        id: String,
    },
    Lock {
        id: String,
        #[arg(long, action = clap::ArgAction::Set)]
        locked: bool,
    },
    Usage {
        id: String,
    },
    Reorder {
        #[arg(long)]
        sort_key: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Resample an image and set it as a video's thumbnail.
    Thumbnail {
        video_id: String,
        image: PathBuf,
    },
    /// Save the selected resources into a directory.
    Download {
        #[arg(long)]
        out: PathBuf,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Run a link check and wait for it to finish.
    LinkCheck,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    #[arg(long, value_enum, default_value_t = ResourceKind::File)]
    pub kind: ResourceKind,

    /// Replace resources with the same name instead of stopping at the conflict.
    #[arg(long)]
    pub overwrite: bool,

    /// Image used to derive the thumbnail of uploaded videos.
    #[arg(long)]
    pub poster: Option<PathBuf>,

    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

/// Run one command. `Ok(false)` means the command ran but its outcome failed.
pub async fn run(cli: Cli, config: Config) -> anyhow::Result<bool> {
    let course = cli.course.context("--course is required")?;
    let api_url = config
        .api_url
        .clone()
        .context("COURSEOPS_API_URL is required")?;
    let api = Arc::new(HttpCourseApi::new(api_url, config.api_token.clone()));
    let session = CourseSession::new(course, api, config);

    let ok = match cli.command {
        Command::List => {
            session.fetch_assets().await.context("load assets")?;
            print_json(&session.snapshot())?;
            true
        }
        Command::Upload(args) => upload(&session, args).await?,
        Command::Delete { id } => {
            session.delete_asset(&id).await.context("delete asset")?;
            print_json(&session.snapshot())?;
            true
        }
        Command::Lock { id, locked } => {
            session.fetch_assets().await.context("load assets")?;
            session.set_lock(&id, locked).await.context("update lock")?;
            print_json(&session.snapshot())?;
            true
        }
        Command::Usage { id } => {
            let usage = session.usage_paths(&id).await.context("fetch usage")?;
            print_json(&usage)?;
            true
        }
        Command::Reorder { sort_key, ids } => {
            session.fetch_assets().await.context("load assets")?;
            session.reorder(&ids, &sort_key).await.context("reorder")?;
            print_json(&session.snapshot())?;
            true
        }
        Command::Thumbnail { video_id, image } => {
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("read image: {}", image.display()))?;
            session
                .add_thumbnail(&video_id, bytes)
                .await
                .context("add thumbnail")?;
            print_json(&session.snapshot())?;
            true
        }
        Command::Download { out, ids } => download(&session, &out, &ids).await?,
        Command::LinkCheck => {
            let scan = session.run_link_check().await;
            print_json(&scan)?;
            scan.phase == ScanPhase::Succeeded
        }
    };
    Ok(ok)
}

async fn upload(session: &CourseSession, args: UploadArgs) -> anyhow::Result<bool> {
    let kind = args.kind;
    let poster: Option<Arc<[u8]>> = match &args.poster {
        Some(path) => Some(
            tokio::fs::read(path)
                .await
                .with_context(|| format!("read poster: {}", path.display()))?
                .into(),
        ),
        None => None,
    };

    let mut inputs = Vec::with_capacity(args.paths.len());
    for path in &args.paths {
        let mut input = input_from_path(path, kind).await?;
        input.poster = poster.clone();
        inputs.push(input);
    }

    session.fetch_assets().await.context("load assets")?;
    if args.overwrite {
        for input in inputs {
            if let Err(err) = session.uploads().upload_one(input, true) {
                tracing::warn!(%err, "input rejected");
            }
        }
    } else {
        session.submit_batch(inputs);
    }

    let guard = session.unload_guard();
    let status = tokio::select! {
        status = session.wait_uploads() => {
            session.uploads().wait_idle().await;
            status
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("listen for ctrl-c")?;
            if guard.on_unload() {
                tracing::warn!("interrupted; in-flight uploads marked failed");
            }
            session.uploads().batch_status()
        }
    };

    let conflicts = session.uploads().pending_conflicts();
    if !conflicts.is_empty() {
        tracing::warn!(?conflicts, "names already exist; rerun with --overwrite to replace them");
    }
    print_json(&session.snapshot())?;
    Ok(status != BatchStatus::Failed && conflicts.is_empty())
}

#[derive(Debug, serde::Serialize)]
struct SavedFile {
    id: String,
    path: PathBuf,
    bytes: usize,
}

async fn download(session: &CourseSession, out: &Path, ids: &[String]) -> anyhow::Result<bool> {
    session.fetch_assets().await.context("load assets")?;
    let files = session.download_assets(ids).await;

    tokio::fs::create_dir_all(out)
        .await
        .with_context(|| format!("create {}", out.display()))?;
    let mut saved = Vec::with_capacity(files.len());
    for file in files {
        // Display names come from the server; keep only the final component.
        let name = Path::new(&file.name)
            .file_name()
            .map(|n| n.to_owned())
            .unwrap_or_else(|| file.id.clone().into());
        let path = out.join(name);
        tokio::fs::write(&path, &file.bytes)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        saved.push(SavedFile {
            id: file.id,
            path,
            bytes: file.bytes.len(),
        });
    }

    for record in session.status().errors(ErrorType::Download) {
        tracing::warn!(error = %record.message, "download failed");
    }
    print_json(&saved)?;
    Ok(saved.len() == ids.len())
}

async fn input_from_path(path: &Path, kind: ResourceKind) -> anyhow::Result<RawInput> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("stat {}", path.display()))?;
    if !meta.is_file() {
        anyhow::bail!("not a file: {}", path.display());
    }
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("file name is not utf-8: {}", path.display()))?
        .to_owned();
    Ok(RawInput {
        content_type: content_type_for(&name).map(str::to_owned),
        name,
        kind,
        size: meta.len(),
        source: InputSource::Path(path.to_path_buf()),
        poster: None,
    })
}

fn content_type_for(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    Some(match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "srt" => "application/x-subrip",
        "vtt" => "text/vtt",
        _ => return None,
    })
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{text}");
    Ok(())
}
