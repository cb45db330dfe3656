use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use voxflow::domain::Backend;
use voxflow::AppController;

/// Local-first speech transcription with cloud fallback
#[derive(Parser, Debug)]
#[command(name = "voxflow", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Keep configuration, models and logs under this directory
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Transcribe an audio file (WAV, WebM, Ogg, MP3, MP4, FLAC)
    Transcribe {
        /// Audio file to transcribe
        file: PathBuf,

        /// Primary backend (default: from configuration)
        #[arg(long, value_enum)]
        mode: Option<Mode>,

        /// Language code (default: from configuration). Use "auto" to detect
        #[arg(long, value_name = "LANG")]
        language: Option<String>,

        /// Retry once on the other backend if the primary fails
        #[arg(long)]
        fallback: bool,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show whether the inference server binary is available and running
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Show configuration, data and log locations
    Paths,
    /// Ask the inference daemon script which device it would use. Exits 1
    /// when no accelerator is available
    CheckGpu {
        #[arg(long)]
        json: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    Local,
    Cloud,
}

impl From<Mode> for Backend {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Local => Backend::Local,
            Mode::Cloud => Backend::Cloud,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let controller = AppController::new(cli.root.as_deref());
    let controller = controller.context("Failed to initialize voxflow")?;

    let outcome = run(&controller, cli.command).await;
    controller.shutdown().await;
    outcome
}

async fn run(controller: &AppController, command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Transcribe {
            file,
            mode,
            language,
            fallback,
            json,
        } => {
            let mut options = controller.transcription_options();
            if let Some(mode) = mode {
                options.mode = mode.into();
            }
            if let Some(language) = language {
                options.language = match language.trim() {
                    "" | "auto" => None,
                    code => Some(code.to_string()),
                };
            }
            if fallback {
                match options.mode {
                    Backend::Local => options.fallback_to_cloud = true,
                    Backend::Cloud => options.fallback_to_local = true,
                }
            }

            let read_error = || format!("Failed to read {}", file.display());
            let result = controller.transcribe_file(&file, &options).await;
            let result = result.with_context(read_error)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if let Some(text) = &result.text {
                println!("{}", text);
            }
            if result.success {
                return Ok(ExitCode::SUCCESS);
            }

            if !json {
                let message = result.message.as_deref().unwrap_or("Transcription failed");
                eprintln!("{}", message);
            }
            let code = if result.is_no_audio() { 2 } else { 1 };
            Ok(ExitCode::from(code))
        }
        Commands::Status { json } => {
            let status = controller.server_status();
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("available: {}", status.available);
                println!("state:     {:?}", status.state);
                if let Some(port) = status.port {
                    println!("port:      {}", port);
                }
                if let Some(model) = &status.model_name {
                    println!("model:     {}", model);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Paths => {
            println!("config: {}", controller.config_path().display());
            println!("data:   {}", controller.data_dir().display());
            println!("models: {}", controller.models_dir().display());
            println!("logs:   {}", controller.logs_dir().display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckGpu { json } => {
            let report = controller.check_device().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("available: {}", report.available);
                if let Some(device) = &report.device {
                    println!("device:    {}", device);
                }
                if let Some(error) = &report.error {
                    println!("error:     {}", error);
                }
            }
            let code = if report.available { 0 } else { 1 };
            Ok(ExitCode::from(code))
        }
    }
}
