use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use generation::{media, GenerationError, HttpConnector, PollConfig, DEFAULT_API_BASE};
use history::Collection;
use models::{EditSession, GeneratedImage, GeneratedVideo, WorkMode};
use studio::{Studio, StudioConfig, StudioError, StudioEvent};

#[derive(Parser)]
#[command(name = "studio")]
#[command(about = "Generate and edit images and videos with the Ark API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding history and preferences
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// API base URL, e.g. http://127.0.0.1:3001 to go through the proxy
    #[arg(long, global = true)]
    api_base: Option<String>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change saved settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate an image from a prompt
    Image {
        prompt: String,

        /// Image size for this run, e.g. 1024x1024
        #[arg(long)]
        size: Option<String>,

        /// Guidance scale for this run
        #[arg(long)]
        guidance: Option<f32>,

        /// Save the image to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply one or more edit instructions in sequence
    Edit {
        /// Image URL, proxy URL or local file
        #[arg(long)]
        image: String,

        /// Edit instruction, repeat for a chain of edits
        #[arg(short = 'i', long = "instruction", required = true)]
        instructions: Vec<String>,

        /// Save the final version to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a video from a prompt or an image
    Video {
        prompt: Option<String>,

        /// Animate this image (URL, proxy URL or local file)
        #[arg(long)]
        image: Option<String>,

        #[command(flatten)]
        poll: PollArgs,

        /// Save the video to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check on a video task until it finishes
    Poll {
        task_id: String,

        #[command(flatten)]
        poll: PollArgs,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Browse and prune generation history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print current settings
    Show,
    SetKey { key: String },
    SetSize { size: String },
    SetGuidance { scale: f32 },
    /// Select an image model, or list them
    Model { id: Option<String> },
    /// Select a video model, or list them
    VideoModel { id: Option<String> },
    /// Switch work mode (text-to-image, image-to-image, text-to-video, image-to-video)
    Mode { mode: Option<String> },
}

#[derive(Subcommand)]
enum HistoryAction {
    Images {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    Videos {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Delete history records
    Clear {
        #[arg(value_enum, default_value = "all")]
        target: Target,
    },
    /// Keep only the newest records
    Cleanup {
        keep: usize,

        #[arg(long, value_enum, default_value = "all")]
        collection: Target,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    Images,
    Videos,
    All,
}

impl Target {
    fn collections(self) -> &'static [Collection] {
        match self {
            Target::Images => &[Collection::Images],
            Target::Videos => &[Collection::Videos],
            Target::All => &[Collection::Images, Collection::Videos],
        }
    }
}

#[derive(clap::Args, Clone, Copy)]
struct PollArgs {
    /// Seconds between status checks
    #[arg(long, default_value = "5")]
    interval: u64,

    /// Status checks before giving up
    #[arg(long, default_value = "60")]
    max_attempts: u32,
}

impl From<PollArgs> for PollConfig {
    fn from(args: PollArgs) -> Self {
        PollConfig::default()
            .with_interval(Duration::from_secs(args.interval))
            .with_max_attempts(args.max_attempts)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let poll = match &cli.command {
        Commands::Video { poll, .. } | Commands::Poll { poll, .. } => PollConfig::from(*poll),
        _ => PollConfig::default(),
    };
    let mut config = StudioConfig::default().with_poll(poll);
    if let Some(dir) = &cli.data_dir {
        config = config.with_data_dir(dir);
    }
    let api_base = cli
        .api_base
        .clone()
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
    let (studio, events) = Studio::open(config, Arc::new(HttpConnector::new(api_base)));

    std::thread::spawn(move || {
        for event in events.iter() {
            match event {
                StudioEvent::OpenSettings => {
                    eprintln!("set an API key with `studio config set-key <KEY>`")
                }
                StudioEvent::VideoProgress { task_id, progress } => {
                    eprintln!("{task_id}: {progress}%")
                }
                StudioEvent::VideoFinished { task_id, status } => {
                    info!("task {task_id} finished: {status}")
                }
                StudioEvent::SyncFailed { what, reason } => {
                    warn!("{what} was not saved to history: {reason}")
                }
            }
        }
    });

    let result = match cli.command {
        Commands::Config { action } => config_command(&studio, action),
        Commands::Image {
            prompt,
            size,
            guidance,
            output,
        } => image_command(&studio, &prompt, size.as_deref(), guidance, output.as_deref()).await,
        Commands::Edit {
            image,
            instructions,
            output,
        } => edit_command(&studio, image, &instructions, output.as_deref()).await,
        Commands::Video {
            prompt,
            image,
            output,
            ..
        } => video_command(&studio, prompt, image, output.as_deref()).await,
        Commands::Poll {
            task_id,
            poll,
            output,
        } => poll_command(&studio, &task_id, poll.into(), output.as_deref()).await,
        Commands::History { action } => history_command(&studio, action),
    };
    studio.flush().await;
    result
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

fn config_command(studio: &Studio, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let mut prefs = studio.snapshot().preferences();
            prefs.api_key = mask_key(&prefs.api_key);
            println!("{}", serde_json::to_string_pretty(&prefs)?);
        }
        ConfigAction::SetKey { key } => {
            studio.set_api_key(&key);
            info!("API key saved");
        }
        ConfigAction::SetSize { size } => studio.set_image_size(&size),
        ConfigAction::SetGuidance { scale } => studio.set_guidance_scale(scale),
        ConfigAction::Model { id: Some(id) } => studio.select_image_model(&id)?,
        ConfigAction::Model { id: None } => {
            let state = studio.snapshot();
            for model in &state.image_models {
                let marker = if model.id == state.selected_model.id { "*" } else { " " };
                println!("{marker} {:<36} {:<16} {}", model.id, model.kind.as_str(), model.name);
            }
        }
        ConfigAction::VideoModel { id: Some(id) } => studio.select_video_model(&id)?,
        ConfigAction::VideoModel { id: None } => {
            let state = studio.snapshot();
            for model in &state.video_models {
                let marker = if model.id == state.selected_video_model.id { "*" } else { " " };
                println!("{marker} {:<36} {:<16} {}", model.id, model.kind.as_str(), model.name);
            }
        }
        ConfigAction::Mode { mode: Some(mode) } => {
            let mode: WorkMode = mode.parse()?;
            studio.set_work_mode(mode);
            info!("work mode set to {mode}");
        }
        ConfigAction::Mode { mode: None } => println!("{}", studio.read(|s| s.work_mode)),
    }
    Ok(())
}

async fn image_command(
    studio: &Studio,
    prompt: &str,
    size: Option<&str>,
    guidance: Option<f32>,
    output: Option<&Path>,
) -> Result<()> {
    studio.override_image_settings(size, guidance);
    studio.set_prompt(prompt);
    let image = studio.generate_image().await?;
    print_image(&image);
    if let Some(path) = output {
        save_image(&image, path).await?;
    }
    Ok(())
}

async fn edit_command(
    studio: &Studio,
    image: String,
    instructions: &[String],
    output: Option<&Path>,
) -> Result<()> {
    let mut session = EditSession::new(GeneratedImage {
        url: Some(image),
        ..Default::default()
    });
    for instruction in instructions {
        let edited = studio
            .edit_image(&mut session, instruction)
            .await
            .with_context(|| format!("edit \"{instruction}\" failed"))?;
        print_image(&edited);
    }
    if let (Some(path), Some(last)) = (output, session.current()) {
        save_image(last, path).await?;
    }
    Ok(())
}

async fn video_command(
    studio: &Studio,
    prompt: Option<String>,
    image: Option<String>,
    output: Option<&Path>,
) -> Result<()> {
    match image {
        Some(image) => {
            studio.set_work_mode(WorkMode::ImageToVideo);
            studio.select_image_for_video(Some(image));
        }
        None => studio.set_work_mode(WorkMode::TextToVideo),
    }
    studio.set_prompt(prompt.as_deref().unwrap_or_default());

    match studio.generate_video().await {
        Ok(video) => finish_video(&video, output).await,
        Err(StudioError::Generation(GenerationError::PollTimeout { attempts })) => {
            let task_id = studio
                .read(|s| s.videos.first().map(|e| e.item.task_id.clone()))
                .unwrap_or_default();
            bail!(
                "task {task_id} still running after {attempts} checks; \
                 try again later with `studio poll {task_id}`"
            )
        }
        Err(err) => Err(err.into()),
    }
}

async fn poll_command(
    studio: &Studio,
    task_id: &str,
    poll: PollConfig,
    output: Option<&Path>,
) -> Result<()> {
    let video = studio.resume_video(task_id, &poll).await?;
    match video.error_message.as_deref() {
        Some(message) if video.status == models::VideoStatus::Failed => {
            bail!("task {task_id} failed: {message}")
        }
        _ => finish_video(&video, output).await,
    }
}

async fn finish_video(video: &GeneratedVideo, output: Option<&Path>) -> Result<()> {
    println!("{}\t{}", video.task_id, video.status);
    if let Some(url) = &video.video_url {
        println!("{url}");
        if let Some(path) = output {
            let bytes = media::download(&reqwest::Client::new(), url, path).await?;
            info!("saved {bytes} bytes to {}", path.display());
        }
    }
    Ok(())
}

fn print_image(image: &GeneratedImage) {
    match (&image.url, &image.base64_data) {
        (Some(url), _) => println!("{url}"),
        (None, Some(_)) => println!("<inline image data>"),
        (None, None) => println!("<no image data>"),
    }
    if let Some(prompt) = &image.original_prompt {
        println!("  prompt: {prompt}");
    }
    if let Some(revised) = &image.revised_prompt {
        println!("  revised: {revised}");
    }
}

async fn save_image(image: &GeneratedImage, path: &Path) -> Result<()> {
    if let Some(b64) = &image.base64_data {
        let bytes = media::decode_base64(b64)?;
        tokio::fs::write(path, &bytes).await?;
    } else if let Some(url) = &image.url {
        media::download(&reqwest::Client::new(), url, path).await?;
    } else {
        bail!("image has no data to save");
    }
    info!("saved image to {}", path.display());
    Ok(())
}

fn format_time(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn history_command(studio: &Studio, action: HistoryAction) -> Result<()> {
    let store = studio
        .store()
        .context("history database is not available")?;
    match action {
        HistoryAction::Images { limit } => {
            for record in store.lock().list_images()?.into_iter().take(limit) {
                println!(
                    "{}  {}  {}",
                    record.id,
                    format_time(record.created_at),
                    record.image.url.as_deref().unwrap_or("<inline>")
                );
                if let Some(prompt) = &record.image.original_prompt {
                    println!("    {prompt}");
                }
            }
        }
        HistoryAction::Videos { limit } => {
            for record in store.lock().list_videos()?.into_iter().take(limit) {
                let video = &record.video;
                println!(
                    "{}  {}  {:<10}  {}",
                    video.task_id,
                    format_time(record.created_at),
                    video.status.as_str(),
                    video.video_url.as_deref().unwrap_or("-")
                );
            }
        }
        HistoryAction::Clear { target } => {
            for collection in target.collections() {
                match collection {
                    Collection::Images => studio.clear_images(),
                    Collection::Videos => studio.clear_videos(),
                }
            }
            info!("history cleared");
        }
        HistoryAction::Cleanup { keep, collection } => {
            for collection in collection.collections() {
                let removed = store.lock().cleanup_oldest(*collection, keep)?;
                info!("removed {removed} {collection:?} records");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_masked() {
        assert_eq!(mask_key(""), "");
        assert_eq!(mask_key("short"), "*****");
        assert_eq!(mask_key("sk-1234567890abcd"), "sk-1...abcd");
    }

    #[test]
    fn edit_accepts_repeated_instructions() {
        let cli = Cli::try_parse_from([
            "studio", "edit", "--image", "a.png", "-i", "add a hat", "-i", "make it blue",
        ])
        .unwrap();
        match cli.command {
            Commands::Edit { instructions, .. } => {
                assert_eq!(instructions, vec!["add a hat", "make it blue"])
            }
            _ => panic!("expected edit"),
        }
    }

    #[test]
    fn poll_args_convert_to_config() {
        let cli = Cli::try_parse_from(["studio", "poll", "cgt-1", "--interval", "2"]).unwrap();
        match cli.command {
            Commands::Poll { poll, .. } => {
                let config = PollConfig::from(poll);
                assert_eq!(config.interval, Duration::from_secs(2));
                assert_eq!(config.max_attempts, 60);
            }
            _ => panic!("expected poll"),
        }
    }
}
