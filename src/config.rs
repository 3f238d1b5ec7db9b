use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.video.fps.is_finite() && self.video.fps > 0.0) {
            bail!("video.fps must be positive, got {}", self.video.fps);
        }
        if self.confirmation.confirm_hits == 0 {
            bail!("confirmation.confirm_hits must be at least 1");
        }
        if self.statistics.bucket_seconds == 0 {
            bail!("statistics.bucket_seconds must be at least 1");
        }
        if self.runner.queue_capacity == 0 {
            bail!("runner.queue_capacity must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.filter.min_confidence) {
            bail!(
                "filter.min_confidence must be within [0, 1], got {}",
                self.filter.min_confidence
            );
        }
        if self.persistence.retry.backoff_multiplier < 1.0 {
            bail!("persistence.retry.backoff_multiplier must be >= 1.0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.confirmation.confirm_hits, 5);
        assert_eq!(config.confirmation.max_missed_frames, 5);
        assert_eq!(config.statistics.bucket_seconds, 60);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "video:\n  fps: 25\nfilter:\n  classes: [person, car]\n  min_confidence: 0.4\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.video.fps, 25.0);
        assert_eq!(config.filter.classes.len(), 2);
        assert_eq!(config.confirmation.confirm_hits, 5);
        assert_eq!(config.runner.queue_capacity, 64);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.video.fps = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.confirmation.confirm_hits = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.statistics.bucket_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.runner.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.filter.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_mentions_path() {
        let err = Config::load("/nope/config.yaml").unwrap_err();
        assert!(format!("{:#}", err).contains("/nope/config.yaml"));
    }
}
