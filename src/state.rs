//! Application state
//!
//! Environment configuration and the production component bundle

use crate::access_engine::{
    load_roster, AccessEngine, CandidatePolicy, DecisionPolicy, DEFAULT_CLEARANCE_THRESHOLD,
    DEFAULT_LAST_SEEN_TIMEOUT_SECS, DEFAULT_RECOGNITION_THRESHOLD,
};
use crate::access_log::{AccessLog, DEFAULT_ACCESS_LOG_CAPACITY};
use crate::actuator::HttpActuator;
use crate::error::{Error, Result};
use crate::motion_gate::{HttpMotionSource, MotionGate, MotionGateConfig, DEFAULT_MOTION_FIELD};
use crate::orchestrator::{OrchestratorConfig, MAX_RECOGNITION_WORKERS};
use crate::recognition::FaceApiClient;
use crate::stream_reader::{FfmpegSource, StreamReader, StreamReaderConfig, DEFAULT_MAX_FRAME_BYTES};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// RTSP connection string
    pub stream_url: String,
    /// Motion sensor endpoint
    pub motion_url: String,
    /// Door actuator endpoint
    pub push_url: String,
    /// Recognition service base URL
    pub recognition_url: String,
    /// Enrollment directory (one sub-directory per identity)
    pub db_path: PathBuf,
    pub recognition_threshold: f64,
    /// Per-identity recognition threshold overrides
    pub identity_thresholds: HashMap<String, f64>,
    pub clearance_threshold: u32,
    pub last_seen_timeout: Duration,
    /// Absolute pretty-sure distance; derived from the ratio when unset
    pub pretty_sure_threshold: Option<f64>,
    pub pretty_sure_ratio: f64,
    pub candidate_policy: CandidatePolicy,
    pub reconnect_delay: Duration,
    pub capture_read_timeout: Duration,
    pub max_frame_bytes: usize,
    pub motion_poll_interval: Duration,
    pub motion_request_timeout: Duration,
    pub motion_field: String,
    pub frame_read_timeout: Duration,
    pub recognition_timeout: Duration,
    /// 0 = recognize inline on the main loop
    pub recognition_workers: usize,
    pub warmup: Duration,
    pub access_log_capacity: usize,
    pub debug: bool,
}

impl AppConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let recognition_threshold = env.parse("RECOGNITION_THRESHOLD", DEFAULT_RECOGNITION_THRESHOLD)?;
        let pretty_sure_ratio: f64 = env.parse("PRETTY_SURE_RATIO", 0.5)?;
        if !(0.0..=1.0).contains(&pretty_sure_ratio) {
            return Err(Error::Config(format!(
                "PRETTY_SURE_RATIO must be within 0..=1, got {}",
                pretty_sure_ratio
            )));
        }

        let clearance_threshold = env.parse("CLEARANCE_THRESHOLD", DEFAULT_CLEARANCE_THRESHOLD)?;
        if clearance_threshold == 0 {
            return Err(Error::Config("CLEARANCE_THRESHOLD must be at least 1".to_string()));
        }

        let reconnect_delay = Duration::from_secs(env.parse("RECONNECT_DELAY_SEC", 5)?);
        let capture_read_timeout = Duration::from_secs(env.parse("CAPTURE_READ_TIMEOUT_SEC", 10)?);
        let motion_poll_interval = Duration::from_millis(env.parse("MOTION_POLL_INTERVAL_MS", 1000)?);
        for (key, value) in [
            ("RECONNECT_DELAY_SEC", reconnect_delay),
            ("CAPTURE_READ_TIMEOUT_SEC", capture_read_timeout),
            ("MOTION_POLL_INTERVAL_MS", motion_poll_interval),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be greater than zero", key)));
            }
        }

        let recognition_workers: usize = env.parse("RECOGNITION_WORKERS", 0)?;
        if recognition_workers > MAX_RECOGNITION_WORKERS {
            return Err(Error::Config(format!(
                "RECOGNITION_WORKERS must be at most {}, got {}",
                MAX_RECOGNITION_WORKERS, recognition_workers
            )));
        }

        let identity_thresholds = match env.get("IDENTITY_THRESHOLDS") {
            Some(raw) => parse_identity_thresholds(&raw)?,
            None => HashMap::new(),
        };

        Ok(Self {
            stream_url: env.required("STREAM_URL")?,
            motion_url: env.required("MOTION_URL")?,
            push_url: env.required("PUSH_URL")?,
            recognition_url: env
                .get("RECOGNITION_URL")
                .unwrap_or_else(|| "http://127.0.0.1:5005".to_string()),
            db_path: PathBuf::from(env.get("DB_PATH").unwrap_or_else(|| "db".to_string())),
            recognition_threshold,
            identity_thresholds,
            clearance_threshold,
            last_seen_timeout: Duration::from_secs(
                env.parse("LAST_SEEN_TIMEOUT_SEC", DEFAULT_LAST_SEEN_TIMEOUT_SECS)?,
            ),
            pretty_sure_threshold: env.parse_optional("PRETTY_SURE_THRESHOLD")?,
            pretty_sure_ratio,
            candidate_policy: env.parse("CANDIDATE_POLICY", CandidatePolicy::Nearest)?,
            reconnect_delay,
            capture_read_timeout,
            max_frame_bytes: env.parse("MAX_FRAME_BYTES", DEFAULT_MAX_FRAME_BYTES)?,
            motion_poll_interval,
            motion_request_timeout: Duration::from_secs(env.parse("MOTION_REQUEST_TIMEOUT_SEC", 5)?),
            motion_field: env
                .get("MOTION_FIELD")
                .unwrap_or_else(|| DEFAULT_MOTION_FIELD.to_string()),
            frame_read_timeout: Duration::from_millis(env.parse("FRAME_READ_TIMEOUT_MS", 1000)?),
            recognition_timeout: Duration::from_secs(env.parse("RECOGNITION_TIMEOUT_SEC", 30)?),
            recognition_workers,
            warmup: Duration::from_secs(env.parse("WARMUP_SEC", 5)?),
            access_log_capacity: env.parse("ACCESS_LOG_CAPACITY", DEFAULT_ACCESS_LOG_CAPACITY)?,
            debug: env.flag("DEBUG")?,
        })
    }

    /// Effective pretty-sure threshold
    pub fn pretty_sure_threshold(&self) -> f64 {
        self.pretty_sure_threshold.unwrap_or_else(|| {
            DecisionPolicy::pretty_sure_from_ratio(self.recognition_threshold, self.pretty_sure_ratio)
        })
    }

    pub fn decision_policy(&self) -> DecisionPolicy {
        DecisionPolicy {
            clearance_threshold: self.clearance_threshold,
            pretty_sure_threshold: self.pretty_sure_threshold(),
            last_seen_timeout: self.last_seen_timeout,
            candidate_policy: self.candidate_policy,
        }
    }

    pub fn stream_reader_config(&self) -> StreamReaderConfig {
        StreamReaderConfig {
            reconnect_delay: self.reconnect_delay,
            read_timeout: self.capture_read_timeout,
        }
    }

    pub fn motion_gate_config(&self) -> MotionGateConfig {
        MotionGateConfig {
            poll_interval: self.motion_poll_interval,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            frame_read_timeout: self.frame_read_timeout,
            recognition_workers: self.recognition_workers,
            warmup: self.warmup,
        }
    }

    /// Default tracing filter directive
    pub fn default_log_filter(&self) -> &'static str {
        if self.debug {
            "facegate=debug"
        } else {
            "facegate=info"
        }
    }
}

/// Parse `IDENTITY_THRESHOLDS`, a JSON object of label -> distance
pub fn parse_identity_thresholds(raw: &str) -> Result<HashMap<String, f64>> {
    if raw.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let parsed: HashMap<String, f64> = serde_json::from_str(raw)
        .map_err(|e| Error::Config(format!("IDENTITY_THRESHOLDS is not a JSON object of numbers: {}", e)))?;
    if let Some((label, value)) = parsed.iter().find(|(_, v)| !v.is_finite() || **v < 0.0) {
        return Err(Error::Config(format!(
            "IDENTITY_THRESHOLDS: invalid threshold {} for '{}'",
            value, label
        )));
    }
    Ok(parsed)
}

/// Parse a boolean flag (`yes/y/true/t/1`, anything else is false)
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "yes" | "y" | "true" | "t" | "1"
    )
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key)
            .ok_or_else(|| Error::Config(format!("{} is required", key)))
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse_optional(key)?.unwrap_or(default))
    }

    fn parse_optional<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| Error::Config(format!("{}: invalid value '{}': {}", key, raw, e))),
            None => Ok(None),
        }
    }

    fn flag(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).map(|v| parse_flag(&v)).unwrap_or(false))
    }
}

/// Production components built from configuration
pub struct AppState {
    pub config: AppConfig,
    pub reader: Arc<StreamReader<FfmpegSource>>,
    pub gate: Arc<MotionGate<HttpMotionSource>>,
    pub recognizer: Arc<FaceApiClient>,
    pub engine: Arc<AccessEngine>,
    pub access_log: Arc<AccessLog>,
}

impl AppState {
    /// Build every component (nothing is started)
    pub async fn build(config: AppConfig) -> Result<Self> {
        let roster = load_roster(
            &config.db_path,
            config.recognition_threshold,
            &config.identity_thresholds,
        )
        .await?;

        let source = FfmpegSource::new(config.stream_url.clone())
            .with_max_frame_bytes(config.max_frame_bytes);
        let reader = Arc::new(StreamReader::new(source, config.stream_reader_config()));

        let motion = HttpMotionSource::new(
            config.motion_url.clone(),
            config.motion_field.clone(),
            config.motion_request_timeout,
        )
        .map_err(|e| Error::Internal(e.to_string()))?;
        let gate = Arc::new(MotionGate::new(motion, config.motion_gate_config()));

        let recognizer = Arc::new(FaceApiClient::with_timeout(
            config.recognition_url.clone(),
            config.recognition_timeout,
        )?);

        let access_log = Arc::new(AccessLog::new(config.access_log_capacity));
        let actuator = Arc::new(HttpActuator::new(config.push_url.clone())?);
        let engine = Arc::new(AccessEngine::new(
            roster,
            config.decision_policy(),
            actuator,
            access_log.clone(),
        ));

        Ok(Self {
            config,
            reader,
            gate,
            recognizer,
            engine,
            access_log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("STREAM_URL", "rtsp://cam/stream1"),
        ("MOTION_URL", "http://sensor/motion"),
        ("PUSH_URL", "http://door/push"),
    ];

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.recognition_url, "http://127.0.0.1:5005");
        assert_eq!(config.db_path, PathBuf::from("db"));
        assert_eq!(config.clearance_threshold, 3);
        assert_eq!(config.last_seen_timeout, Duration::from_secs(10));
        assert_eq!(config.candidate_policy, CandidatePolicy::Nearest);
        assert_eq!(config.recognition_workers, 0);
        assert_eq!(config.motion_field, "val");
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
        assert!(!config.debug);
        assert!((config.pretty_sure_threshold() - 0.20).abs() < 1e-9);
        assert_eq!(config.default_log_filter(), "facegate=info");
    }

    #[test]
    fn test_missing_required_value() {
        let err = AppConfig::from_lookup(lookup(&REQUIRED[..2])).unwrap_err();
        assert!(err.to_string().contains("PUSH_URL"));
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("PRETTY_SURE_THRESHOLD", "0.12"),
            ("CANDIDATE_POLICY", "all"),
            ("RECOGNITION_WORKERS", "4"),
            ("IDENTITY_THRESHOLDS", r#"{"laura": 0.3}"#),
            ("DEBUG", "Yes"),
        ]);
        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.pretty_sure_threshold(), 0.12);
        assert_eq!(config.candidate_policy, CandidatePolicy::All);
        assert_eq!(config.recognition_workers, 4);
        assert_eq!(config.identity_thresholds.get("laura"), Some(&0.3));
        assert!(config.debug);
        assert_eq!(config.default_log_filter(), "facegate=debug");
    }

    #[test]
    fn test_malformed_values_are_config_errors() {
        for (key, value) in [
            ("CLEARANCE_THRESHOLD", "three"),
            ("CLEARANCE_THRESHOLD", "0"),
            ("PRETTY_SURE_RATIO", "1.5"),
            ("IDENTITY_THRESHOLDS", "[0.3]"),
            ("CANDIDATE_POLICY", "closest"),
            ("MOTION_POLL_INTERVAL_MS", "0"),
            ("RECONNECT_DELAY_SEC", "0"),
            ("CAPTURE_READ_TIMEOUT_SEC", "0"),
            ("RECOGNITION_WORKERS", "100000"),
        ] {
            let mut pairs = REQUIRED.to_vec();
            pairs.push((key, value));
            let err = AppConfig::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{}={} should be rejected", key, value);
        }
    }

    #[test]
    fn test_parse_flag() {
        for yes in ["yes", "Y", "true", "T", "1"] {
            assert!(parse_flag(yes));
        }
        for no in ["no", "0", "false", "", "on"] {
            assert!(!parse_flag(no));
        }
    }
}
