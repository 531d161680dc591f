use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use personid_core::{
    Annotator, Identifier, MatchPolicy, OnnxAnalyzer, Roster, RosterConfig, DEFAULT_SIMILARITY_THRESHOLD,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "personid", about = "Identify known people in a photograph")]
struct Cli {
    #[command(flatten)]
    models: ModelArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ModelArgs {
    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Roster TOML file (defaults to the built-in four references)
    #[arg(long, global = true)]
    roster: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify everyone in an image and write an annotated copy
    Identify {
        /// Image to analyze
        image: PathBuf,

        /// Where to write the annotated image (default: <image>.identified.jpg)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Label font (TTF/OTF); common system fonts are tried when omitted
        #[arg(long)]
        font: Option<PathBuf>,

        /// Cosine similarity needed for a match
        #[arg(long, default_value_t = DEFAULT_SIMILARITY_THRESHOLD)]
        threshold: f32,

        /// Which matching reference wins: "first" (roster order) or "best"
        #[arg(long, default_value_t = MatchPolicy::First)]
        policy: MatchPolicy,
    },
    /// Encode the roster and list each reference
    References,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Identify {
            image,
            output,
            font,
            threshold,
            policy,
        } => {
            let (mut analyzer, roster) = load(&cli.models)?;
            let annotator = Annotator::load(font.as_deref()).context("failed to load label font")?;
            let identifier = Identifier::new(roster, policy, threshold, annotator);

            let output = output.unwrap_or_else(|| default_output(&image));
            let report = identifier
                .identify_file(&mut analyzer, &image, &output)
                .with_context(|| format!("failed to identify {}", image.display()))?;

            for face in &report.faces {
                println!(
                    "{:<12} ({}, {}) - ({}, {})",
                    face.label, face.rect.left, face.rect.top, face.rect.right, face.rect.bottom
                );
            }
            if !report.faces.is_empty() {
                println!();
            }
            for identity in &report.identities {
                println!("Number of {}: {}", identity.plural, identity.count);
            }
            for entry in &report.decades {
                println!("Number of people from the {}: {}", entry.decade, entry.count);
            }
            println!("Number of people with Wikipedia articles: {}", report.wikipedia);
            println!();
            println!("Annotated image: {}", output.display());
        }
        Commands::References => {
            let (_, roster) = load(&cli.models)?;
            for reference in roster.references() {
                let decade = reference.decade.map(|d| d.to_string()).unwrap_or_else(|| "-".into());
                let wikipedia = if reference.wikipedia { "wikipedia" } else { "" };
                println!("{:<12} {:<6} {}", reference.name, decade, wikipedia);
            }
            println!("{} reference(s) encoded", roster.len());
        }
    }

    Ok(())
}

/// Load both models and encode the roster.
fn load(args: &ModelArgs) -> Result<(OnnxAnalyzer, Roster)> {
    let model_dir = args.model_dir.clone().unwrap_or_else(personid_core::default_model_dir);
    let scrfd = model_dir.join(personid_core::SCRFD_MODEL_FILE);
    let arcface = model_dir.join(personid_core::ARCFACE_MODEL_FILE);
    let mut analyzer = OnnxAnalyzer::load(&scrfd.to_string_lossy(), &arcface.to_string_lossy())
        .context("failed to load face models")?;

    let config = match &args.roster {
        Some(path) => RosterConfig::from_file(path)?,
        None => RosterConfig::default(),
    };
    let roster = Roster::build(&config, &mut analyzer).context("failed to encode reference roster")?;
    tracing::info!(references = roster.len(), "roster encoded");
    Ok((analyzer, roster))
}

fn default_output(image: &Path) -> PathBuf {
    let stem = image.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "output".into());
    image.with_file_name(format!("{stem}.identified.jpg"))
}
