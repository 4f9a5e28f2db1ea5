use std::io::Write;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use mediagrab::core::{config, maintenance};
use mediagrab::{
    CollectorEvent, DownloadEvent, Downloader, FormatId, MetadataCollector, StreamInfo,
};

#[derive(Parser)]
#[command(name = "mediagrab")]
#[command(about = "Probe and download media streams through an external extractor", long_about = None)]
struct Cli {
    /// User agent passed to every probe and download
    #[arg(long, global = true)]
    user_agent: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe a URL and list its streams and formats
    Probe { url: String },

    /// Download one stream of a URL
    Download {
        url: String,

        /// Composite format to fetch, e.g. "137+251"
        #[arg(short, long)]
        format: Option<String>,

        /// Output file path; derived from the stream title when omitted
        #[arg(short, long)]
        output: Option<String>,

        /// Referring page passed to the extractor
        #[arg(long)]
        referer: Option<String>,
    },

    /// Print the extractor version
    Version,

    /// Update the extractor to its latest release
    Upgrade,

    /// Remove the extractor cache directory
    CleanCache,

    /// List the supported extractors with their descriptions
    Extractors,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    if let Some(user_agent) = &cli.user_agent {
        config::set_user_agent(user_agent);
    }

    match cli.command {
        Commands::Probe { url } => probe(&url).await,
        Commands::Download {
            url,
            format,
            output,
            referer,
        } => download(&url, format.as_deref(), output.as_deref(), referer.as_deref()).await,
        Commands::Version => {
            println!("{}", maintenance::version_async().await);
            println!("{}", maintenance::website());
            Ok(())
        }
        Commands::Upgrade => {
            maintenance::upgrade().await;
            Ok(())
        }
        Commands::CleanCache => {
            let cleaner = mediagrab::CacheCleaner::new();
            cleaner.run().await;
            println!(
                "Cache directory: {}",
                mediagrab::CacheCleaner::cache_dir().display()
            );
            Ok(())
        }
        Commands::Extractors => {
            let (extractors, descriptions) = maintenance::list_extractors()
                .await
                .map_err(|message| anyhow::anyhow!(message))?;
            for (extractor, description) in extractors.iter().zip(descriptions.iter()) {
                if description.is_empty() {
                    println!("{extractor}");
                } else {
                    println!("{extractor}: {description}");
                }
            }
            Ok(())
        }
    }
}

async fn collect(url: &str) -> Result<Vec<StreamInfo>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut collector = MetadataCollector::new(tx);
    collector.run_async(url);
    match rx.recv().await {
        Some(CollectorEvent::Collected(streams)) => Ok(streams),
        Some(CollectorEvent::Error(message)) => bail!(message),
        None => bail!("the collector stopped without a result"),
    }
}

async fn probe(url: &str) -> Result<()> {
    let streams = collect(url).await?;
    for info in &streams {
        println!("#{} {}", info.playlist_index, info.title());
        if !info.is_available() {
            println!("    (unavailable)");
            continue;
        }
        println!("    file:     {}", info.full_file_name());
        println!("    selected: {}", info.format_id());
        for format in info.default_formats() {
            println!("    {:>10}  {}", format.format_id.to_string(), format);
        }
        for format in info.video_formats() {
            println!("    {:>10}  {}", format.format_id.to_string(), format);
        }
        for format in info.audio_formats() {
            println!("    {:>10}  {}", format.format_id.to_string(), format);
        }
    }
    Ok(())
}

async fn download(
    url: &str,
    format: Option<&str>,
    output: Option<&str>,
    referer: Option<&str>,
) -> Result<()> {
    let streams = collect(url).await?;
    let mut info = streams
        .into_iter()
        .find(StreamInfo::is_available)
        .context("no available stream at this URL")?;
    if let Some(format) = format {
        info.set_format_id(FormatId::new(format));
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut downloader = Downloader::new(tx);
    downloader.initialize_with_stream_info(&info);
    downloader.set_url(if info.webpage_url.is_empty() {
        url
    } else {
        &info.webpage_url
    });
    if let Some(referer) = referer {
        downloader.set_referring_page(referer);
    }
    let output_path = output
        .map(str::to_string)
        .unwrap_or_else(|| info.full_file_name());
    downloader.set_local_full_output_path(&output_path);

    println!("Downloading {} -> {}", info.title(), downloader.file_name());
    downloader.start();
    while let Some(event) = rx.recv().await {
        match event {
            DownloadEvent::Progress { received, total } => {
                if total > 0 {
                    let percent = 100.0 * received as f64 / total as f64;
                    print!("\r{received} / {total} bytes ({percent:.1}%)");
                } else {
                    print!("\r{received} bytes");
                }
                std::io::stdout().flush().ok();
            }
            DownloadEvent::MetadataChanged => {
                println!("\nreformatted into {}", downloader.file_name());
            }
            DownloadEvent::Finished => {
                println!("\ndone");
                return Ok(());
            }
            DownloadEvent::Error(message) => {
                println!();
                bail!(message);
            }
        }
    }
    bail!("the downloader stopped without a result")
}
