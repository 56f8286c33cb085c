//! Architecture size presets for fresh student initialisation.
//!
//! Input width and class count always come from the teacher, so a preset
//! only fixes the backbone shape:
//!
//! | Preset  | Hidden widths     | Dropout |
//! |---------|-------------------|---------|
//! | `tiny`  | 64                | 0.0     |
//! | `small` | 256 → 128         | 0.1     |
//! | `base`  | 512 → 256 → 128   | 0.2     |

use anyhow::{bail, Result};
use kdtrain_core::ClassifierConfig;

/// Student architecture size preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizePreset {
    Tiny,
    Small,
    Base,
}

impl SizePreset {
    /// Parse a user-supplied string (`"tiny"`, `"small"`, `"base"`).
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tiny" => Ok(Self::Tiny),
            "small" => Ok(Self::Small),
            "base" => Ok(Self::Base),
            other => bail!(
                "Unknown size preset '{}'. Valid values: tiny, small, base.",
                other
            ),
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Small => "small",
            Self::Base => "base",
        }
    }

    pub fn hidden_dims(&self) -> Vec<usize> {
        match self {
            Self::Tiny => vec![64],
            Self::Small => vec![256, 128],
            Self::Base => vec![512, 256, 128],
        }
    }

    pub fn dropout(&self) -> f32 {
        match self {
            Self::Tiny => 0.0,
            Self::Small => 0.1,
            Self::Base => 0.2,
        }
    }

    /// Build the student [`ClassifierConfig`] for this preset.
    pub fn classifier_config(&self, name: &str, input_dim: usize, num_classes: usize) -> ClassifierConfig {
        ClassifierConfig {
            name: name.to_string(),
            input_dim,
            hidden_dims: self.hidden_dims(),
            num_classes,
            dropout: self.dropout(),
        }
    }

    /// Default student name, e.g. `"StudentSmall"`.
    pub fn default_name(&self) -> String {
        let label = self.label();
        let mut chars = label.chars();
        let capitalised: String = chars
            .next()
            .map(|c| c.to_ascii_uppercase())
            .into_iter()
            .chain(chars)
            .collect();
        format!("Student{capitalised}")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_sizes() {
        assert_eq!(SizePreset::parse("tiny").unwrap(), SizePreset::Tiny);
        assert_eq!(SizePreset::parse("small").unwrap(), SizePreset::Small);
        assert_eq!(SizePreset::parse("BASE").unwrap(), SizePreset::Base);
    }

    #[test]
    fn parse_invalid_size_errors() {
        assert!(SizePreset::parse("huge").is_err());
        assert!(SizePreset::parse("").is_err());
    }

    #[test]
    fn classifier_config_takes_io_from_caller() {
        let cfg = SizePreset::Small.classifier_config("S", 784, 10);
        assert_eq!(cfg.input_dim, 784);
        assert_eq!(cfg.num_classes, 10);
        assert_eq!(cfg.hidden_dims, vec![256, 128]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn presets_grow_in_size() {
        let params = |p: SizePreset| p.classifier_config("x", 100, 10).num_params();
        assert!(params(SizePreset::Tiny) < params(SizePreset::Small));
        assert!(params(SizePreset::Small) < params(SizePreset::Base));
    }

    #[test]
    fn default_names() {
        assert_eq!(SizePreset::Tiny.default_name(), "StudentTiny");
        assert_eq!(SizePreset::Base.default_name(), "StudentBase");
    }
}
