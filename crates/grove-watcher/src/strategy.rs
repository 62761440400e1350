//! Watch strategies.
//!
//! A [`StrategyPreset`] is the user-facing knob; a [`WatchPlan`] is what a
//! backend actually gets asked to do. The retry plan is fixed and is the
//! cheapest plan that still produces events.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How a root is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchMode {
    /// OS change notifications.
    Native,
    /// Periodic stat comparison at the given interval.
    Polling { interval: Duration },
}

impl WatchMode {
    pub fn is_polling(&self) -> bool {
        matches!(self, Self::Polling { .. })
    }
}

/// A concrete watch request handed to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchPlan {
    pub mode: WatchMode,
    /// Deepest directory level watched below the root; None is unlimited.
    pub depth: Option<usize>,
}

impl WatchPlan {
    /// The plan used for every retry after resource exhaustion.
    pub fn retry() -> Self {
        Self {
            mode: WatchMode::Polling {
                interval: Duration::from_secs(10),
            },
            depth: Some(2),
        }
    }

    /// Returns true if an event `depth` levels below the root is in range.
    pub fn covers_depth(&self, depth: usize) -> bool {
        self.depth.map_or(true, |limit| depth <= limit)
    }
}

/// Named strategy presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyPreset {
    /// Native, unlimited depth.
    Aggressive,
    /// Native, depth-limited.
    #[default]
    Conservative,
    /// Polling, shallow, slow.
    Minimal,
    /// Every watch request is a no-op skip.
    Disabled,
}

impl StrategyPreset {
    /// The plan this preset maps to, or None when watching is disabled.
    pub fn plan(&self) -> Option<WatchPlan> {
        match self {
            Self::Aggressive => Some(WatchPlan {
                mode: WatchMode::Native,
                depth: None,
            }),
            Self::Conservative => Some(WatchPlan {
                mode: WatchMode::Native,
                depth: Some(8),
            }),
            Self::Minimal => Some(WatchPlan {
                mode: WatchMode::Polling {
                    interval: Duration::from_secs(5),
                },
                depth: Some(3),
            }),
            Self::Disabled => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggressive => "aggressive",
            Self::Conservative => "conservative",
            Self::Minimal => "minimal",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for StrategyPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aggressive" => Ok(Self::Aggressive),
            "conservative" => Ok(Self::Conservative),
            "minimal" => Ok(Self::Minimal),
            "disabled" | "off" => Ok(Self::Disabled),
            other => Err(format!(
                "unknown strategy '{}' (expected aggressive, conservative, minimal or disabled)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_map_to_plans() {
        let aggressive = StrategyPreset::Aggressive.plan().unwrap();
        assert_eq!(aggressive.mode, WatchMode::Native);
        assert!(aggressive.covers_depth(100));

        let minimal = StrategyPreset::Minimal.plan().unwrap();
        assert!(minimal.mode.is_polling());
        assert!(minimal.covers_depth(3));
        assert!(!minimal.covers_depth(4));

        assert!(StrategyPreset::Disabled.plan().is_none());
    }

    #[test]
    fn test_retry_plan_is_most_conservative() {
        let retry = WatchPlan::retry();
        assert!(retry.mode.is_polling());
        assert_eq!(retry.depth, Some(2));
    }

    #[test]
    fn test_parse_preset() {
        assert_eq!("Minimal".parse::<StrategyPreset>(), Ok(StrategyPreset::Minimal));
        assert_eq!("off".parse::<StrategyPreset>(), Ok(StrategyPreset::Disabled));
        assert!("fast".parse::<StrategyPreset>().is_err());
        assert_eq!(StrategyPreset::default().to_string(), "conservative");
    }
}
