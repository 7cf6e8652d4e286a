//! Board session configuration.

use std::time::Duration;

use sketchroom_collab::PresenceConfig;
use sketchroom_core::ToolSettings;
use sketchroom_render::RenderConfig;

/// How a finished stroke's persistence write is retried.
///
/// The default makes a single attempt: a failed write is logged and the
/// stroke stays visible locally, marked failed.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for PersistPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl PersistPolicy {
    /// Exponential backoff with `attempts` tries.
    pub fn retrying(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (1-based), doubling each time.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct BoardConfig {
    /// Logical surface size, CSS px.
    pub width: f32,
    pub height: f32,
    pub device_pixel_ratio: f32,
    pub render: RenderConfig,
    pub presence: PresenceConfig,
    pub persist: PersistPolicy,
    /// Toolbar state at startup.
    pub tools: ToolSettings,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
            device_pixel_ratio: 1.0,
            render: RenderConfig::default(),
            presence: PresenceConfig::default(),
            persist: PersistPolicy::default(),
            tools: ToolSettings::default(),
        }
    }
}

impl BoardConfig {
    /// Small surface, no font loading, fast retries.
    pub fn for_testing() -> Self {
        Self {
            width: 200.0,
            height: 200.0,
            render: RenderConfig::for_testing(),
            persist: PersistPolicy {
                max_attempts: 1,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(20),
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_single_attempt() {
        let policy = PersistPolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(PersistPolicy::retrying(0).max_attempts, 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = PersistPolicy::retrying(10);
        assert_eq!(policy.backoff(1), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_secs(1));
        assert_eq!(policy.backoff(6), Duration::from_secs(5));
        assert_eq!(policy.backoff(64), Duration::from_secs(5));
    }

    #[test]
    fn test_testing_config() {
        let config = BoardConfig::for_testing();
        assert!(!config.render.draw_labels);
        assert_eq!((config.width, config.height), (200.0, 200.0));
        assert_eq!(config.device_pixel_ratio, 1.0);
    }
}
