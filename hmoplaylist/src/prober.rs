//! Media duration probing.

use std::process::Command;

use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Failed to run {0}: {1}")]
    Spawn(String, String),

    #[error("{0} failed for {1}: {2}")]
    Failed(String, String, String),
}

/// Resolves the duration of a media URI, in whole seconds.
///
/// Probing blocks and may be slow. `Ok(None)` and `Err` are both treated
/// as an unresolved duration by the engine.
pub trait DurationProber: Send + Sync {
    fn probe(&self, uri: &str) -> Result<Option<u64>, ProbeError>;
}

/// Probes through the `ffprobe` binary.
#[derive(Clone, Debug)]
pub struct FfprobeProber {
    program: String,
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeProber {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl DurationProber for FfprobeProber {
    fn probe(&self, uri: &str) -> Result<Option<u64>, ProbeError> {
        let output = Command::new(&self.program)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                uri,
            ])
            .output()
            .map_err(|e| ProbeError::Spawn(self.program.clone(), e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ProbeError::Failed(self.program.clone(), uri.to_string(), stderr));
        }

        let duration = parse_ffprobe_output(&String::from_utf8_lossy(&output.stdout));
        debug!(uri = %uri, duration = ?duration, "ffprobe finished");
        Ok(duration)
    }
}

/// Reads the first numeric line printed by ffprobe (`"183.216000"`).
fn parse_ffprobe_output(stdout: &str) -> Option<u64> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .find(|d| d.is_finite() && *d > 0.0)
        .map(|d| d.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ffprobe_output_is_rounded() {
        assert_eq!(parse_ffprobe_output("183.516000\n"), Some(184));
        assert_eq!(parse_ffprobe_output("N/A\n42.1\n"), Some(42));
    }

    #[test]
    fn unusable_output_is_none() {
        assert_eq!(parse_ffprobe_output(""), None);
        assert_eq!(parse_ffprobe_output("N/A"), None);
        assert_eq!(parse_ffprobe_output("0.000"), None);
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let prober = FfprobeProber::new("/nonexistent/ffprobe-binary");
        assert!(matches!(prober.probe("a.mp3"), Err(ProbeError::Spawn(..))));
    }
}
