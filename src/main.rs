use anyhow::Result;
use autoshorts::core::config::Config;
use autoshorts::core::io::{NativeStorage, Storage};
use autoshorts::core::state::Metadata;
use autoshorts::services::brief::create_brief_source;
use autoshorts::services::image::{ImageGenerator, OpenAIImageClient};
use autoshorts::services::llm::create_llm;
use autoshorts::services::moderation::create_sanitizer;
use autoshorts::services::tts::create_tts_client;
use autoshorts::services::video::ffmpeg::FfmpegRunner;
use autoshorts::services::video::VideoAssembler;
use autoshorts::services::workflow::{load_metadata, WorkflowManager};
use clap::{Parser, Subcommand};
use inquire::Confirm;
use log::{error, info};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "autoshorts")]
#[command(about = "Turns a content brief into a narrated, captioned short video", long_about = None)]
struct Cli {
    /// Path to the YAML configuration
    #[arg(short, long, global = true, default_value = "config.yml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read the brief, write the script, narration, images and metadata
    Generate,
    /// Render the video from an existing metadata file
    Assemble {
        /// Metadata file to use instead of the configured one
        #[arg(short, long)]
        metadata: Option<String>,
    },
    /// Generate, then assemble
    Run,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    config.ensure_directories()?;
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());

    match cli.command {
        Commands::Generate => {
            generate(&config, storage).await?;
        }
        Commands::Assemble { metadata } => {
            let path = metadata.unwrap_or_else(|| config.metadata_file.clone());
            let metadata = load_metadata(storage.as_ref(), &path).await?;
            assemble(&config, storage, &metadata).await?;
        }
        Commands::Run => {
            let metadata = generate(&config, storage.clone()).await?;
            if !config.unattended {
                let proceed = Confirm::new("Assets are ready. Render the video now?")
                    .with_default(true)
                    .prompt()?;
                if !proceed {
                    info!("Stopped before assembly. Run `autoshorts assemble` later.");
                    return Ok(());
                }
            }
            assemble(&config, storage, &metadata).await?;
        }
    }
    Ok(())
}

async fn generate(config: &Config, storage: Arc<dyn Storage>) -> Result<Metadata> {
    let brief = create_brief_source(&config.brief, storage.clone())?
        .read_brief()
        .await?;
    info!("Brief: {} ({}, for {})", brief.topic, brief.tone, brief.audience);

    let llm = create_llm(&config.llm)?;
    let tts = create_tts_client(&config.audio)?;
    let sanitizer = create_sanitizer(config.image.sanitizer, &config.moderation, llm.clone());
    let images = ImageGenerator::new(
        llm.clone(),
        sanitizer,
        Box::new(OpenAIImageClient::new(config.image.clone())),
        storage.clone(),
    );

    let manager = WorkflowManager::new(config.clone(), llm, tts, images, storage);
    manager.run(&brief).await
}

async fn assemble(config: &Config, storage: Arc<dyn Storage>, metadata: &Metadata) -> Result<()> {
    let llm = create_llm(&config.llm)?;
    let runner = FfmpegRunner::new(config.video.ffmpeg.clone(), config.video.ffprobe.clone());
    let assembler = VideoAssembler::new(config.clone(), llm, storage, Box::new(runner));

    let output = assembler.assemble(metadata).await?;
    info!("Done: {}", output);
    Ok(())
}
