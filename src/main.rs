use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reelscribe::audio::extract::AudioExtractor;
use reelscribe::backend::BackendFactory;
use reelscribe::cli::{Cli, Commands, OutputFormat};
use reelscribe::config::Config;
use reelscribe::output;
use reelscribe::pipeline::{PipelineEvent, PipelineOrchestrator, ProgressSink, SourceMedia};
use reelscribe::probe::MediaProber;
use reelscribe::source::FetcherRegistry;
use reelscribe::utils;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; logs go to stderr so transcripts pipe cleanly
    let default_filter = if cli.verbose {
        "reelscribe=debug"
    } else {
        "reelscribe=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load().await?;

    match cli.command {
        Commands::Transcribe {
            input,
            output,
            format,
            language,
            backend,
            model,
            normalize,
            denoise,
            max_duration,
            max_size,
            workers,
            keep_media,
        } => {
            let mut config = config;
            if let Some(provider) = backend {
                config.backend.provider = provider;
            }
            if let Some(model) = model {
                config.backend.model = model;
            }
            if let Some(lang) = language {
                config.limits.language = Some(utils::normalize_language_hint(&lang));
            }
            if let Some(secs) = max_duration {
                config.limits.max_duration_secs = secs;
            }
            if let Some(mb) = max_size {
                config.limits.max_file_size_mb = mb;
            }
            if let Some(count) = workers {
                config.pipeline.segment_workers = count.max(1);
            }
            if normalize {
                config.enhance.normalize = true;
            }
            if denoise {
                config.enhance.denoise = true;
            }
            if keep_media {
                config.pipeline.keep_media = true;
            }

            run_transcription(&config, &input, output, format, cli.quiet).await?;
        }
        Commands::Config { show } => {
            config.display();
            if !show {
                println!();
                println!("Config file: {}", Config::config_path()?.display());
            }
        }
        Commands::Backends => {
            println!("Transcription backends:");
            println!("  • local  - on-device whisper models (default)");
            println!("  • remote - HTTP speech recognition service");
            println!();
            println!("Supported sources:");
            for platform in FetcherRegistry::new().list_platforms() {
                println!("  • {}", platform);
            }
            println!("  • Local audio/video files");
        }
    }

    Ok(())
}

async fn run_transcription(
    config: &Config,
    input: &str,
    output_path: Option<PathBuf>,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let tools = &config.pipeline;

    // Check for required external dependencies (non-fatal)
    let missing = utils::check_dependencies(
        tools.ffmpeg_path.as_deref().unwrap_or("ffmpeg"),
        tools.ffprobe_path.as_deref().unwrap_or("ffprobe"),
        tools.yt_dlp_path.as_deref().unwrap_or("yt-dlp"),
    )
    .await;
    if !missing.is_empty() {
        eprintln!(
            "{} missing external tools:",
            style("warning:").yellow().bold()
        );
        for dep in &missing {
            eprintln!("   • {}", dep);
        }
    }

    let registry = match &tools.yt_dlp_path {
        Some(path) => FetcherRegistry::with_yt_dlp_path(path.clone()),
        None => FetcherRegistry::new(),
    };

    // Resolve the input before any model gets loaded.
    enum Input {
        Local(PathBuf),
        Url(String),
    }
    let input = if registry.is_local_file(input) {
        let path = PathBuf::from(input);
        utils::check_file_accessible(&path)?;
        Input::Local(path)
    } else {
        if registry.find_fetcher(input).is_none() {
            anyhow::bail!("Unsupported URL format: {}", input);
        }
        Input::Url(input.to_string())
    };

    let backend = BackendFactory::create(&config.backend)?;

    let (events, progress) = if quiet {
        (ProgressSink::disabled(), None)
    } else {
        let (sink, mut rx) = ProgressSink::channel();
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        let handle = bar.clone();
        tokio::spawn(async move {
            let mut done = 0usize;
            while let Some(event) = rx.recv().await {
                match event {
                    PipelineEvent::StageStarted { stage } => handle.set_message(stage.label()),
                    PipelineEvent::StageFinished { .. } => {}
                    PipelineEvent::SegmentTranscribed { total, .. } => {
                        done += 1;
                        handle.set_message(format!("transcribing {}/{}", done, total));
                    }
                    PipelineEvent::SegmentFailed { index, error } => {
                        handle.println(format!(
                            "{} segment {}: {}",
                            style("warning:").yellow(),
                            index,
                            error
                        ));
                    }
                    PipelineEvent::Warning { message } => {
                        handle.println(format!("{} {}", style("warning:").yellow(), message));
                    }
                }
            }
        });
        (sink, Some(bar))
    };

    let mut orchestrator =
        PipelineOrchestrator::new(config.to_limits(), config.enhance, backend, events)?;
    if let Some(path) = &tools.ffprobe_path {
        orchestrator = orchestrator.with_prober(MediaProber::new().with_ffprobe_path(path.clone()));
    }
    if let Some(path) = &tools.ffmpeg_path {
        orchestrator =
            orchestrator.with_extractor(AudioExtractor::new().with_ffmpeg_path(path.clone()));
    }

    let media = match input {
        Input::Local(path) => SourceMedia::borrowed(path),
        Input::Url(url) => {
            if let Some(bar) = &progress {
                bar.set_message("fetching media");
            }
            let max_bytes = config.limits.max_file_size_mb * 1024 * 1024;
            // With keep_media the download lands in the current directory,
            // outside the workdir sweep.
            let dest_dir = if tools.keep_media {
                std::env::current_dir().context("Could not resolve current directory")?
            } else {
                orchestrator.workdir().to_path_buf()
            };
            let fetched = registry.fetch(&url, &dest_dir, max_bytes).await?;
            if tools.keep_media {
                println!("Media saved to: {}", fetched.path.display());
                SourceMedia::borrowed(fetched.path)
            } else {
                SourceMedia::owned(fetched.path)
            }
        }
    };

    let result = orchestrator.run(media).await;
    drop(orchestrator);
    if let Some(bar) = &progress {
        bar.finish_and_clear();
    }
    let result = result?;

    match output_path {
        Some(path) => {
            output::save_to_file(&result, &path, format).await?;
            println!("Transcription saved to: {}", path.display());
        }
        None => {
            output::print_to_console(&result, format)?;
        }
    }

    if !result.failures.is_empty() {
        eprintln!(
            "{} {} of {} segments failed; the transcript is partial",
            style("warning:").yellow().bold(),
            result.failures.len(),
            result.metadata.segment_count
        );
    }
    if !quiet {
        eprintln!(
            "Processed {} of audio ({}) in {}",
            utils::format_duration(result.metadata.media_duration),
            utils::format_file_size(result.metadata.media_size),
            utils::format_duration(result.metadata.processing_duration)
        );
    }

    Ok(())
}
