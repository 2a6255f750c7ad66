use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facecheck_core::detector::DEFAULT_CONFIDENCE_THRESHOLD;
use facecheck_core::{
    compare, decode_image_bytes, DetectorOptions, Embedding, FaceEncoder, ModelPaths,
    OnnxFaceEncoder, RecognizerOptions,
};
use image::RgbImage;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facecheck", about = "Encode and compare faces in local image files")]
struct Cli {
    /// Directory containing det_10g.onnx and dlib_face_recognition_resnet_model_v1.onnx
    #[arg(long, env = "FACECHECK_MODEL_DIR", global = true)]
    model_dir: Option<PathBuf>,

    /// Minimum detector score for a face
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD, global = true)]
    detection_threshold: f32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the embedding of the most confident face in an image
    Encode {
        image: PathBuf,
    },
    /// Compare the most confident face of two images
    Compare {
        first: PathBuf,
        second: PathBuf,
    },
    /// Compare a saved encoding (output of `encode`) against an image
    Verify {
        /// JSON file holding `{"encoding": [...]}` or a bare array
        #[arg(short, long)]
        encoding: PathBuf,
        image: PathBuf,
    },
    /// List detected faces with boxes and landmarks
    Detect {
        image: PathBuf,
    },
}

fn load_image(path: &Path) -> Result<RgbImage> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    decode_image_bytes(&bytes).with_context(|| format!("decoding {}", path.display()))
}

fn load_encoder(cli: &Cli) -> Result<OnnxFaceEncoder> {
    let dir = cli
        .model_dir
        .clone()
        .unwrap_or_else(facecheck_core::default_model_dir);
    let detector = DetectorOptions {
        confidence_threshold: cli.detection_threshold,
        ..DetectorOptions::default()
    };
    OnnxFaceEncoder::load(&ModelPaths::in_dir(&dir), detector, RecognizerOptions::default())
        .with_context(|| format!("loading models from {}", dir.display()))
}

fn first_face(encoder: &mut OnnxFaceEncoder, path: &Path) -> Result<Embedding> {
    let image = load_image(path)?;
    match encoder.first_face_encoding(&image)? {
        Some(embedding) => Ok(embedding),
        None => bail!("no face detected in {}", path.display()),
    }
}

/// Accept either the `encode` output object or a bare JSON array.
fn parse_encoding(text: &str) -> Result<Embedding> {
    let value: Value = serde_json::from_str(text).context("encoding file is not JSON")?;
    let array = match value {
        Value::Object(mut map) => map.remove("encoding").context("missing \"encoding\" key")?,
        other => other,
    };
    let embedding: Embedding =
        serde_json::from_value(array).context("encoding must be an array of numbers")?;
    if embedding.is_empty() {
        bail!("encoding is empty");
    }
    Ok(embedding)
}

fn run(cli: Cli) -> Result<Value> {
    let mut encoder = load_encoder(&cli)?;

    let output = match &cli.command {
        Commands::Encode { image } => {
            let embedding = first_face(&mut encoder, image)?;
            json!({ "encoding": embedding })
        }
        Commands::Compare { first, second } => {
            let a = first_face(&mut encoder, first)?;
            let b = first_face(&mut encoder, second)?;
            serde_json::to_value(compare(&a, &b)?)?
        }
        Commands::Verify { encoding, image } => {
            let text = std::fs::read_to_string(encoding)
                .with_context(|| format!("reading {}", encoding.display()))?;
            let known = parse_encoding(&text)?;
            let candidate = first_face(&mut encoder, image)?;
            serde_json::to_value(compare(&known, &candidate)?)?
        }
        Commands::Detect { image } => {
            let img = load_image(image)?;
            let faces = encoder.detector_mut().detect(&img)?;
            tracing::info!(faces = faces.len(), "detection complete");
            json!({ "width": img.width(), "height": img.height(), "faces": faces })
        }
    };

    Ok(output)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output = run(cli)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_verify_args() {
        let cli = Cli::try_parse_from([
            "facecheck", "verify", "--encoding", "known.json", "candidate.jpg", "--model-dir", "/m",
        ])
        .unwrap();
        assert_eq!(cli.model_dir, Some(PathBuf::from("/m")));
        match cli.command {
            Commands::Verify { encoding, image } => {
                assert_eq!(encoding, PathBuf::from("known.json"));
                assert_eq!(image, PathBuf::from("candidate.jpg"));
            }
            _ => panic!("expected verify"),
        }
    }

    #[test]
    fn test_parse_encoding_object_and_array() {
        let a = parse_encoding(r#"{"encoding": [0.5, -0.25]}"#).unwrap();
        let b = parse_encoding("[0.5, -0.25]").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.values, vec![0.5, -0.25]);
    }

    #[test]
    fn test_parse_encoding_rejects_bad_input() {
        assert!(parse_encoding("[]").is_err());
        assert!(parse_encoding(r#"{"other": [1.0]}"#).is_err());
        assert!(parse_encoding(r#"["x"]"#).is_err());
        assert!(parse_encoding("not json").is_err());
    }

    #[test]
    fn test_load_image_from_file() {
        let path = std::env::temp_dir().join(format!("facecheck-cli-{}.png", std::process::id()));
        RgbImage::from_pixel(6, 4, image::Rgb([9, 8, 7])).save(&path).unwrap();
        let img = load_image(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(img.dimensions(), (6, 4));
    }

    #[test]
    fn test_load_image_missing_file() {
        let err = load_image(Path::new("/nonexistent/face.png")).unwrap_err();
        assert!(err.to_string().contains("reading"));
    }
}
