use super::DEFAULT_MODEL;
use serde::Serialize;
use std::fmt;

const BALANCED_MODEL: &str = "Llama-3.2-3B-Instruct-q4f16_1-MLC";
const EFFICIENT_MODEL: &str = "Qwen2.5-1.5B-Instruct-q4f16_1-MLC";

/// Best-effort snapshot of the host. `None` means the signal was unavailable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HardwareProfile {
    pub ram_gb: Option<f64>,
    pub cores: Option<usize>,
    pub gpu: Option<String>,
    /// Network class such as `4g`, `3g`, `wifi`
    pub connection: Option<String>,
}

fn or_unknown<T: fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl fmt::Display for HardwareProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ram = self
            .ram_gb
            .map(|gb| format!("{:.1} GB", gb))
            .unwrap_or_else(|| "unknown".to_string());
        write!(
            f,
            "RAM: {}, cores: {}, GPU: {}, connection: {}",
            ram,
            or_unknown(&self.cores),
            or_unknown(&self.gpu),
            or_unknown(&self.connection)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::High => write!(f, "high"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub model_id: String,
    pub confidence: Confidence,
    pub reason: String,
    pub strengths: Vec<String>,
    pub limitations: Vec<String>,
}

/// Reads what the host exposes. Never fails.
///
/// GPU and network class have no portable source; they come from
/// `GEOQUERY_GPU` and `GEOQUERY_CONNECTION` when set.
pub fn detect_hardware() -> HardwareProfile {
    let cores = std::thread::available_parallelism().ok().map(|n| n.get());
    let ram_gb = std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|meminfo| parse_mem_total_gb(&meminfo));
    let gpu = std::env::var("GEOQUERY_GPU").ok().filter(|s| !s.is_empty());
    let connection = std::env::var("GEOQUERY_CONNECTION")
        .ok()
        .map(|s| s.to_lowercase())
        .filter(|s| !s.is_empty());

    HardwareProfile {
        ram_gb,
        cores,
        gpu,
        connection,
    }
}

fn parse_mem_total_gb(meminfo: &str) -> Option<f64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / (1024.0 * 1024.0))
}

/// Maps a hardware snapshot to a model. Deterministic; with every signal
/// unknown it returns the lightweight default.
pub fn recommend(hardware: &HardwareProfile) -> Recommendation {
    let mut strengths = Vec::new();
    let mut limitations = Vec::new();
    let mut model_id = DEFAULT_MODEL;
    let mut confidence = Confidence::Medium;
    let mut reason = "Safe default choice for most devices";

    if let Some(ram) = hardware.ram_gb {
        if ram >= 8.0 {
            strengths.push("Good RAM (8GB+)".to_string());
            model_id = BALANCED_MODEL;
            reason = "Your device has sufficient RAM for the balanced 3B model";
            confidence = Confidence::High;
        } else if ram >= 4.0 {
            strengths.push("Adequate RAM (4-8GB)".to_string());
            model_id = EFFICIENT_MODEL;
            reason = "Efficient model recommended for your RAM capacity";
        } else {
            limitations.push("Limited RAM (<4GB)".to_string());
            reason = "Lightweight model recommended for your device";
        }
    }

    match hardware.cores {
        Some(n) if n >= 8 => strengths.push("Multi-core CPU (8+ cores)".to_string()),
        Some(n) if n >= 4 => strengths.push("Quad-core CPU".to_string()),
        Some(_) => limitations.push("Limited CPU cores".to_string()),
        None => {}
    }

    match hardware.connection.as_deref() {
        Some("4g") | Some("5g") => strengths.push("Fast mobile connection".to_string()),
        Some("3g") => limitations.push("Slow connection (3G)".to_string()),
        _ => {}
    }

    if let Some(gpu) = &hardware.gpu {
        let gpu = gpu.to_lowercase();
        if ["nvidia", "amd", "intel", "apple"].iter().any(|v| gpu.contains(v)) {
            strengths.push("Dedicated/integrated GPU".to_string());
        }
    }

    Recommendation {
        model_id: model_id.to_string(),
        confidence,
        reason: reason.to_string(),
        strengths,
        limitations,
    }
}
