//! CLI for Photoshoot - compose subject photos into a new scene.

use clap::{Args, Parser, Subcommand, ValueEnum};
use photoshoot::image::decode_data_uri;
use photoshoot::session::{self, SessionStore};
use photoshoot::{
    ActionOutcome, AspectRatio, GeminiClient, GeminiModel, UploadFile, WorkflowConfig,
    WorkflowController,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "photoshoot")]
#[command(about = "Place your subjects in any scene via the Gemini image API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose subject images into one scene
    Compose(ComposeArgs),

    /// Enhance a single photo
    Enhance(EnhanceArgs),

    /// Show the saved session
    Session,

    /// Check that the Gemini API is reachable with the configured key
    Check {
        /// Check the stable model instead of the preview
        #[arg(long)]
        stable: bool,
    },
}

#[derive(Args)]
struct ComposeArgs {
    /// Description of the scene
    prompt: String,

    /// Subject images (PNG or JPEG), in the order they are sent
    #[arg(short, long = "input", num_args = 1..)]
    inputs: Vec<PathBuf>,

    /// Output file path
    #[arg(short, long)]
    output: PathBuf,

    /// Enhance subjects before composing (costs one credit)
    #[arg(long)]
    enhance: bool,

    /// Aspect ratio hint
    #[arg(long, value_enum, default_value = "square")]
    aspect_ratio: AspectRatioArg,

    /// Start from the subjects of the saved session
    #[arg(long)]
    resume: bool,

    /// Save subjects and prompt as the session after uploading
    #[arg(long)]
    save_session: bool,

    /// Credits available for this run
    #[arg(long, default_value_t = photoshoot::workflow::REFILL_CREDITS)]
    credits: u32,

    /// Retries on transient service errors
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Use the stable model instead of the preview
    #[arg(long)]
    stable: bool,
}

#[derive(Args)]
struct EnhanceArgs {
    /// Photo to enhance (PNG or JPEG)
    #[arg(short, long)]
    input: PathBuf,

    /// Output file path
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AspectRatioArg {
    Square,
    Portrait,
    Landscape,
}

impl From<AspectRatioArg> for AspectRatio {
    fn from(arg: AspectRatioArg) -> Self {
        match arg {
            AspectRatioArg::Square => AspectRatio::Square,
            AspectRatioArg::Portrait => AspectRatio::Portrait,
            AspectRatioArg::Landscape => AspectRatio::Landscape,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Compose(args) => compose(args, cli.json).await?,
        Commands::Enhance(args) => enhance(args, cli.json).await?,
        Commands::Session => show_session(cli.json)?,
        Commands::Check { stable } => check(model_for(stable), cli.json).await?,
    }

    Ok(())
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("photoshoot=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_workflow(
    model: GeminiModel,
    credits: u32,
    resume: bool,
) -> anyhow::Result<WorkflowController> {
    let client = GeminiClient::builder().model(model).build()?;
    let workflow = WorkflowController::builder()
        .client(Arc::new(client))
        .session_store(Arc::new(session::global().clone()))
        .config(WorkflowConfig {
            initial_credits: credits,
            restore_on_start: resume,
            ..WorkflowConfig::default()
        })
        .build()?;
    Ok(workflow)
}

fn model_for(stable: bool) -> GeminiModel {
    if stable {
        GeminiModel::FlashImage
    } else {
        GeminiModel::FlashImagePreview
    }
}

async fn compose(args: ComposeArgs, json_output: bool) -> anyhow::Result<()> {
    let workflow = build_workflow(model_for(args.stable), args.credits, args.resume)?;

    let files: Vec<_> = args.inputs.iter().map(UploadFile::from_path).collect();
    workflow.upload(&files).await?;
    workflow.set_prompt(&args.prompt);
    workflow.set_aspect_ratio(args.aspect_ratio.into());

    if args.save_session && !workflow.save_session()? {
        anyhow::bail!("nothing to save: add at least one subject image");
    }

    if args.enhance {
        workflow.enhance().await?;
    }

    if workflow.generate_with_retries(args.retries).await? == ActionOutcome::Ignored {
        anyhow::bail!("workflow busy");
    }

    let state = workflow.state();
    let Some(result) = state.result else {
        anyhow::bail!("no image was generated");
    };
    let size = write_data_uri(&result.image_uri, &args.output)?;

    if json_output {
        let out = serde_json::json!({
            "type": "composition",
            "success": true,
            "output": args.output.display().to_string(),
            "size_bytes": size,
            "subjects": state.subjects.len(),
            "enhanced": state.subjects_enhanced,
            "aspect_ratio": state.aspect_ratio,
            "note": result.note,
            "credits_left": state.credits,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "Composed image: {} ({} bytes) from {} subject(s) via {}",
            args.output.display(),
            size,
            state.subjects.len(),
            workflow.client_name()
        );
        if let Some(note) = result.note {
            println!("Note: {}", note);
        }
        println!("Credits left: {}", state.credits);
    }

    Ok(())
}

async fn enhance(args: EnhanceArgs, json_output: bool) -> anyhow::Result<()> {
    let workflow = build_workflow(GeminiModel::default(), 1, false)?;
    workflow.upload(&[UploadFile::from_path(&args.input)]).await?;
    workflow.enhance().await?;

    let state = workflow.state();
    let subject = state
        .subjects
        .first()
        .ok_or_else(|| anyhow::anyhow!("no subject after enhancement"))?;
    let size = write_data_uri(&photoshoot::image::to_display_uri(subject), &args.output)?;

    if json_output {
        let out = serde_json::json!({
            "type": "enhancement",
            "success": true,
            "output": args.output.display().to_string(),
            "size_bytes": size,
            "media_type": subject.media_type,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "Enhanced image: {} ({} bytes, {})",
            args.output.display(),
            size,
            subject.media_type
        );
    }

    Ok(())
}

async fn check(model: GeminiModel, json_output: bool) -> anyhow::Result<()> {
    let workflow = build_workflow(model, 0, false)?;
    let status = workflow.check_client().await;

    if json_output {
        let out = serde_json::json!({
            "client": workflow.client_name(),
            "model": model.as_str(),
            "available": status.is_ok(),
            "error": status.as_ref().err().map(|e| e.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        match &status {
            Ok(()) => println!("{} ({}): OK", workflow.client_name(), model.as_str()),
            Err(e) => println!("{} ({}): {}", workflow.client_name(), model.as_str(), e),
        }
    }

    status.map_err(Into::into)
}

fn write_data_uri(uri: &str, path: &Path) -> anyhow::Result<usize> {
    let (_, bytes) = decode_data_uri(uri)?;
    std::fs::write(path, &bytes)?;
    Ok(bytes.len())
}

fn show_session(json_output: bool) -> anyhow::Result<()> {
    let store = session::global();
    let Some(saved) = store.load() else {
        if json_output {
            println!("null");
        } else {
            println!("No saved session ({}).", store.path().display());
        }
        return Ok(());
    };

    let subjects = saved.subjects.unwrap_or_default();
    if json_output {
        let out = serde_json::json!({
            "path": store.path().display().to_string(),
            "subjects": subjects
                .iter()
                .map(|s| serde_json::json!({"id": s.id, "media_type": s.media_type}))
                .collect::<Vec<_>>(),
            "prompt": saved.prompt,
            "aspect_ratio": saved.aspect_ratio,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Saved session ({}):\n", store.path().display());
        println!("SUBJECTS:");
        for s in &subjects {
            println!("  {} ({})", s.id, s.media_type);
        }
        println!("\nPROMPT: {}", saved.prompt.as_deref().unwrap_or("-"));
        println!(
            "ASPECT RATIO: {}",
            saved.aspect_ratio.unwrap_or_default()
        );
    }

    Ok(())
}
