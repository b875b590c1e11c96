use std::fs;
use std::path::PathBuf;

use clap::{Parser as ClapParser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use hashmatch::image::io::{load_scene, DirectoryParser};
use hashmatch::{Classifier, Criteria, Detector, Match};

#[derive(ClapParser, Debug)]
#[command(author, version, about = "RGB-D object detection by geometric hashing")]
struct Cli {
    /// Path to a JSON criteria file; defaults are used when omitted.
    #[arg(short, long, value_name = "FILE")]
    criteria: Option<PathBuf>,
    /// Enable tracing output for progress and profiling.
    #[arg(long)]
    trace: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train the detector over a template list and persist the index.
    Train {
        /// Text file listing one object directory per line.
        #[arg(value_name = "TEMPLATE_LIST")]
        list: PathBuf,
        /// Output directory for the trained bundle.
        #[arg(value_name = "OUT_DIR")]
        out: PathBuf,
        /// Optional comma-separated view indices to train per object.
        #[arg(long, value_delimiter = ',')]
        indices: Vec<u32>,
    },
    /// Detect trained objects in one RGB-D scene.
    Detect {
        /// Directory holding the trained bundle.
        #[arg(value_name = "TRAINED_DIR")]
        trained: PathBuf,
        /// 16-bit depth PNG of the scene.
        #[arg(value_name = "DEPTH_PNG")]
        depth: PathBuf,
        /// RGB color PNG of the scene.
        #[arg(value_name = "COLOR_PNG")]
        color: PathBuf,
        /// Write detections to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct MatchRecord {
    object_id: u32,
    template: u32,
    x: usize,
    y: usize,
    width: usize,
    height: usize,
    scale: f32,
    score: f32,
}

impl From<&Match> for MatchRecord {
    fn from(value: &Match) -> Self {
        Self {
            object_id: value.object_id,
            template: value.template,
            x: value.x,
            y: value.y,
            width: value.width,
            height: value.height,
            scale: value.scale,
            score: value.score,
        }
    }
}

#[derive(Debug, Serialize)]
struct Output {
    detections: Vec<MatchRecord>,
}

fn load_criteria(path: Option<&PathBuf>) -> Result<Criteria, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(Criteria::default()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive("hashmatch=info".parse()?),
            )
            .with_target(false)
            .init();
    }

    match cli.command {
        Command::Train { list, out, indices } => {
            let criteria = load_criteria(cli.criteria.as_ref())?;
            let classifier = Classifier::new(criteria)?;
            let summary = classifier.train(&DirectoryParser, &list, &out, &indices)?;

            println!(
                "trained {} objects ({} templates) -> {}",
                summary.objects,
                summary.templates,
                out.display()
            );
            for failure in &summary.failures {
                eprintln!("skipped {}: {}", failure.path.display(), failure.reason);
            }
        }
        Command::Detect {
            trained,
            depth,
            color,
            output,
        } => {
            let detector = Detector::load(&trained)?;
            let scene = load_scene(&depth, &color)?;
            let matches = detector.detect(&scene)?;

            let records = matches.iter().map(MatchRecord::from).collect();
            let json = serde_json::to_string_pretty(&Output {
                detections: records,
            })?;
            match output {
                Some(path) => fs::write(path, json)?,
                None => println!("{json}"),
            }
        }
    }

    Ok(())
}
