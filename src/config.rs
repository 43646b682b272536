//! RON descriptions of character bodies.
//!
//! ```ron
//! (
//!     capsule: (radius: 0.4, height: 1.8),
//!     settings: (
//!         slide: (max_bounces: 4, skin_width: 0.02),
//!         collision_mask: 1,
//!     ),
//! )
//! ```
use std::fs::read_to_string;
use std::path::{Path, PathBuf};

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::char_controller::prelude::*;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse character config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    /// Capsule dimensions are checked while parsing and end up in [`ConfigError::Parse`].
    #[error("invalid character config: {0}")]
    Invalid(&'static str),
}

/// Everything needed to build a [`CharacterBody`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterBodyConfig {
    pub capsule: CapsuleShape,
    #[serde(default)]
    pub settings: BodySettings,
}

impl CharacterBodyConfig {
    pub fn from_ron(source: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::de::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading character config from {}", path.display());
        let source = read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_ron(&source)
    }

    /// Like [`CharacterBodyConfig::load`], but falls back to the default body when the file is
    /// missing or broken.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path)
            .map_err(|e| warn!("using the default character config: {e}"))
            .unwrap_or_default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let skins = [
            self.settings.slide.skin_width,
            self.settings.depenetration.skin_width,
        ];
        if skins.iter().any(|skin| !skin.is_finite() || *skin <= 0.0) {
            return Err(ConfigError::Invalid("skin width must be positive"));
        }
        Ok(())
    }

    pub fn build<C: Copy + Eq + core::fmt::Debug>(&self, pose: Pose) -> CharacterBody<C> {
        CharacterBody::new(self.capsule, pose, self.settings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_partial_config() {
        let config = CharacterBodyConfig::from_ron(
            "(capsule: (radius: 0.4, height: 1.8), settings: (slide: (max_bounces: 3)))",
        )
        .unwrap();
        assert_eq!(config.capsule.radius(), 0.4);
        assert_eq!(config.capsule.height(), 1.8);
        assert_eq!(config.settings.slide.max_bounces, 3);
        assert_eq!(config.settings.slide.skin_width, SlideConfig::default().skin_width);
        assert_eq!(config.settings.depenetration, DepenetrationConfig::default());
        assert_eq!(config.settings.collision_mask, ALL_LAYERS);
    }

    #[test]
    fn parses_every_field() {
        let config = CharacterBodyConfig::from_ron(
            r#"(
                capsule: (radius: 0.3, height: 1.2, center: (0.0, 0.6, 0.0), axis: Z),
                settings: (
                    slide: (
                        max_bounces: 8,
                        skin_width: 0.05,
                        on_budget_exhausted: Discard,
                        stop_on_reversal: true,
                    ),
                    depenetration: (max_steps: 2, skin_width: 0.05),
                    collision_mask: 6,
                ),
            )"#,
        )
        .unwrap();
        assert_eq!(config.capsule.axis(), CapsuleAxis::Z);
        assert_eq!(config.capsule.center(), Vec3::new(0.0, 0.6, 0.0));
        assert_eq!(
            config.settings.slide.on_budget_exhausted,
            BudgetExhaustion::Discard
        );
        assert!(config.settings.slide.stop_on_reversal);
        assert_eq!(config.settings.depenetration.max_steps, 2);
        assert_eq!(config.settings.collision_mask, 6);
    }

    #[test]
    fn rejects_bad_capsules() {
        let err = CharacterBodyConfig::from_ron("(capsule: (radius: -1.0, height: 2.0))").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{err}");
    }

    #[test]
    fn rejects_non_positive_skin() {
        let err = CharacterBodyConfig::from_ron(
            "(capsule: (radius: 0.5, height: 2.0), settings: (slide: (skin_width: 0.0)))",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let path = "does/not/exist/character.ron";
        assert!(matches!(
            CharacterBodyConfig::load(path),
            Err(ConfigError::Io { .. })
        ));
        assert_eq!(
            CharacterBodyConfig::load_or_default(path),
            CharacterBodyConfig::default()
        );
    }
}
