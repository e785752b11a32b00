//! Threshold probe - recognition distance calibration
//!
//! Stand in front of the camera as the chosen identity and watch the
//! true-match range separate from the false-match range.
//!
//! ```bash
//! threshold-probe --identity max --samples 200
//! ```

use clap::Parser;
use facegate::calibration::DistanceStats;
use facegate::recognition::{FaceApiClient, RecognitionError, Recognizer};
use facegate::stream_reader::{FfmpegSource, StreamReader, StreamReaderConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "threshold-probe")]
#[command(about = "Collect recognition distances to pick a threshold for one identity")]
struct Args {
    /// Enrolled identity standing in front of the camera
    #[arg(long)]
    identity: String,

    /// Stop after this many frames with a face (runs until Ctrl-C if omitted)
    #[arg(long)]
    samples: Option<u64>,

    /// RTSP URL (defaults to STREAM_URL)
    #[arg(long)]
    stream_url: Option<String>,

    /// Recognition service (defaults to RECOGNITION_URL)
    #[arg(long)]
    recognition_url: Option<String>,

    /// Enrollment directory (defaults to DB_PATH)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Seconds to wait for the stream before the first frame
    #[arg(long, default_value_t = 5)]
    warmup: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "facegate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let stream_url = args
        .stream_url
        .or_else(|| std::env::var("STREAM_URL").ok())
        .ok_or_else(|| anyhow::anyhow!("--stream-url or STREAM_URL is required"))?;
    let recognition_url = args
        .recognition_url
        .or_else(|| std::env::var("RECOGNITION_URL").ok())
        .unwrap_or_else(|| "http://127.0.0.1:5005".to_string());
    let db_path = args
        .db_path
        .or_else(|| std::env::var("DB_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("db"));

    let roster = facegate::access_engine::load_roster(&db_path, 0.0, &Default::default()).await?;
    if !roster.iter().any(|r| r.identity_label == args.identity) {
        let known: Vec<_> = roster.iter().map(|r| r.identity_label.as_str()).collect();
        anyhow::bail!("unknown identity '{}' (enrolled: {})", args.identity, known.join(", "));
    }

    let recognizer = FaceApiClient::with_timeout(recognition_url, Duration::from_secs(30))?;
    recognizer.warm_up().await?;

    let reader = StreamReader::new(FfmpegSource::new(stream_url), StreamReaderConfig::default());
    reader.start().await;
    tokio::time::sleep(Duration::from_secs(args.warmup)).await;

    let mut stats = DistanceStats::new(args.identity.clone());
    let mut samples = 0u64;

    let probe = async {
        loop {
            if args.samples.is_some_and(|limit| samples >= limit) {
                break;
            }
            let Some(frame) = reader.read(Duration::from_secs(1)).await else {
                println!("Couldn't receive frame, continuing...");
                continue;
            };

            match recognizer.find(&frame).await {
                Ok(faces) => {
                    stats.record(&faces);
                    samples += 1;
                }
                Err(RecognitionError::NoFaceDetected) => {
                    stats.record_no_face();
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Recognition failed, continuing");
                    continue;
                }
            }

            println!("-----------------------------------");
            println!("{}", stats);
            println!("-----------------------------------");
        }
    };

    tokio::select! {
        _ = probe => {}
        _ = tokio::signal::ctrl_c() => println!("Interrupted"),
    }

    reader.stop().await;
    println!("{}", stats);
    Ok(())
}
