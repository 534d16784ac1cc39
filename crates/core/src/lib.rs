pub mod artifacts;
pub mod attribution;
pub mod encoding;
pub mod error;
pub mod model;
pub mod schema;
pub mod scoring;

pub mod config {
    use crate::artifacts::ArtifactPaths;
    use crate::scoring::{AttributionFallback, ScoringConfig, TierThresholds};
    use anyhow::{bail, Context};
    use std::path::PathBuf;
    use std::str::FromStr;

    const DEFAULT_MODEL_PATH: &str = "artifacts/model.json";
    const DEFAULT_ENCODING_SPEC_PATH: &str = "artifacts/encoding_spec.json";
    const DEFAULT_SAMPLED_PERMUTATIONS: usize = 256;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub model_path: PathBuf,
        pub encoding_spec_path: PathBuf,
        pub thresholds: TierThresholds,
        pub attribution_fallback: AttributionFallback,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Self::from_lookup(|key| std::env::var(key).ok())
        }

        /// Builds settings from any key lookup; `from_env` passes the process environment.
        pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
        where
            F: Fn(&str) -> Option<String>,
        {
            let defaults = TierThresholds::default();
            let thresholds = TierThresholds::new(
                parse_var(&lookup, "CANCELRISK_TIER_MEDIUM")?.unwrap_or(defaults.medium),
                parse_var(&lookup, "CANCELRISK_TIER_HIGH")?.unwrap_or(defaults.high),
            )?;

            let fallback = lookup("CANCELRISK_ATTRIBUTION_FALLBACK");
            let attribution_fallback = match fallback.as_deref().map(str::trim) {
                None | Some("") | Some("fail") => AttributionFallback::Fail,
                Some("omit") => AttributionFallback::Omit,
                Some("sampled") => AttributionFallback::Sampled {
                    permutations: parse_var(&lookup, "CANCELRISK_SAMPLED_PERMUTATIONS")?
                        .unwrap_or(DEFAULT_SAMPLED_PERMUTATIONS),
                    seed: parse_var(&lookup, "CANCELRISK_SAMPLED_SEED")?.unwrap_or(0),
                },
                Some(other) => bail!(
                    "CANCELRISK_ATTRIBUTION_FALLBACK must be fail, omit or sampled (got {other:?})"
                ),
            };

            Ok(Self {
                model_path: lookup("CANCELRISK_MODEL_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                encoding_spec_path: lookup("CANCELRISK_ENCODING_SPEC_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_ENCODING_SPEC_PATH)),
                thresholds,
                attribution_fallback,
                sentry_dsn: lookup("SENTRY_DSN"),
            })
        }

        pub fn artifact_paths(&self) -> ArtifactPaths {
            ArtifactPaths {
                model: self.model_path.clone(),
                encoding_spec: self.encoding_spec_path.clone(),
            }
        }

        pub fn scoring_config(&self) -> ScoringConfig {
            ScoringConfig {
                thresholds: self.thresholds,
                fallback: self.attribution_fallback,
            }
        }
    }

    fn parse_var<T, F>(lookup: &F, key: &str) -> anyhow::Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
        F: Fn(&str) -> Option<String>,
    {
        match lookup(key) {
            Some(s) if !s.trim().is_empty() => s
                .trim()
                .parse::<T>()
                .map(Some)
                .with_context(|| format!("{key} is not valid (got {s:?})")),
            _ => Ok(None),
        }
    }

}
