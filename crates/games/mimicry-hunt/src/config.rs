use glam::Vec3;
use serde::{Deserialize, Serialize};

use mimicry_core::player::DEFAULT_MAX_NAME_LEN;

use crate::disguise::FormId;
use crate::physics::Collider;
use crate::world::{SECOND_CHANCE_FORM, WorldLayout};

/// Data-driven tuning for the hunt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HuntConfig {
    /// Human walking speed (units/s).
    pub human_walk_speed: f32,
    /// Human running speed (units/s).
    pub human_run_speed: f32,
    pub evader_max_health: f32,
    pub pursuer_max_health: f32,
    pub max_mana: f32,
    /// Mana regained per second.
    pub mana_regen_per_sec: f32,

    /// Struggles needed to break free of a trap.
    pub required_escape_count: u32,
    /// Trap timeout (seconds).
    pub max_trapped_secs: f32,
    /// Immunity to new traps after escaping or timing out (seconds).
    pub trap_grace_secs: f32,
    /// Trigger radius of a placed snare.
    pub snare_radius: f32,
    /// Snares a pursuer may have armed at once. Placing more drops the oldest.
    pub max_snares_per_pursuer: usize,

    /// Form evaders are forced into on their first death.
    pub second_chance_form: FormId,
    pub second_chance_health: f32,
    pub second_chance_invulnerable_secs: f32,

    /// Invulnerability granted when a protective charm absorbs a lethal hit.
    pub protection_invulnerable_secs: f32,
    pub protection_speed_multiplier: f32,
    /// Buff duration for the speed boost after a charm triggers.
    pub protection_speed_secs: f32,

    /// Time a downed pursuer stays down before recovering at full health.
    pub pursuer_recover_secs: f32,

    pub strike_damage: f32,
    pub strike_range: f32,
    pub strike_cooldown: f64,
    pub snare_cooldown: f64,
    pub snare_mana_cost: f32,
    pub execute_damage: f32,
    pub execute_range: f32,
    pub execute_cooldown: f64,
    /// Window after an execution during which the pursuer cannot act.
    pub execution_recovery_secs: f32,
    pub flash_radius: f32,
    pub flash_blind_secs: f32,
    pub flash_cooldown: f64,
    pub flash_mana_cost: f32,
    pub charm_cooldown: f64,
    pub charm_mana_cost: f32,

    /// Max distance to a prop or landmark to morph into it.
    pub interaction_range: f32,
    /// Max distance to a host to ride it.
    pub join_range: f32,
    pub max_passengers: usize,
    /// Ceiling on the magnitude of a host's own plus passenger input.
    pub max_combined_input: f32,
    /// Clearance added outside the host collider when ejecting.
    pub eject_margin: f32,
    pub eject_upward: f32,

    pub human_collider: Collider,
    /// Used when a disguise's geometry cannot be read.
    pub default_collider: Collider,

    pub max_name_len: usize,
    /// Round duration when the session does not set one.
    pub round_duration_secs: f32,

    pub layout: WorldLayout,
}

impl Default for HuntConfig {
    fn default() -> Self {
        Self {
            human_walk_speed: 4.0,
            human_run_speed: 7.0,
            evader_max_health: 100.0,
            pursuer_max_health: 150.0,
            max_mana: 100.0,
            mana_regen_per_sec: 5.0,
            required_escape_count: 5,
            max_trapped_secs: 6.0,
            trap_grace_secs: 1.5,
            snare_radius: 1.0,
            max_snares_per_pursuer: 3,
            second_chance_form: SECOND_CHANCE_FORM,
            second_chance_health: 30.0,
            second_chance_invulnerable_secs: 3.0,
            protection_invulnerable_secs: 2.5,
            protection_speed_multiplier: 1.5,
            protection_speed_secs: 2.5,
            pursuer_recover_secs: 5.0,
            strike_damage: 25.0,
            strike_range: 3.0,
            strike_cooldown: 1.0,
            snare_cooldown: 8.0,
            snare_mana_cost: 20.0,
            execute_damage: 60.0,
            execute_range: 2.0,
            execute_cooldown: 3.0,
            execution_recovery_secs: 1.5,
            flash_radius: 8.0,
            flash_blind_secs: 3.0,
            flash_cooldown: 10.0,
            flash_mana_cost: 30.0,
            charm_cooldown: 20.0,
            charm_mana_cost: 40.0,
            interaction_range: 3.0,
            join_range: 3.0,
            max_passengers: 3,
            max_combined_input: 1.5,
            eject_margin: 0.5,
            eject_upward: 0.5,
            human_collider: Collider::Capsule {
                radius: 0.4,
                height: 1.8,
            },
            default_collider: Collider::Box {
                half_extents: Vec3::new(0.5, 0.5, 0.5),
            },
            max_name_len: DEFAULT_MAX_NAME_LEN,
            round_duration_secs: 300.0,
            layout: WorldLayout::default(),
        }
    }
}

/// Path of the tuning file read when `MIMICRY_HUNT_CONFIG` is unset.
pub const DEFAULT_HUNT_CONFIG_PATH: &str = "config/hunt.toml";

/// Tuning that failed to parse or that the simulation cannot run with.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidConfig(pub String);

impl std::fmt::Display for InvalidConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid hunt config: {}", self.0)
    }
}

impl std::error::Error for InvalidConfig {}

fn positive(name: &str, value: f64) -> Result<(), InvalidConfig> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(InvalidConfig(format!("{name} must be > 0, got {value}")))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), InvalidConfig> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(InvalidConfig(format!("{name} must be >= 0, got {value}")))
    }
}

impl HuntConfig {
    /// Reject tuning that would feed NaN, negative or zero values into
    /// movement, trap timing or range checks.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        for (name, value) in [
            ("human_walk_speed", self.human_walk_speed),
            ("human_run_speed", self.human_run_speed),
            ("evader_max_health", self.evader_max_health),
            ("pursuer_max_health", self.pursuer_max_health),
            ("second_chance_health", self.second_chance_health),
            ("max_trapped_secs", self.max_trapped_secs),
            ("snare_radius", self.snare_radius),
            ("strike_range", self.strike_range),
            ("execute_range", self.execute_range),
            ("flash_radius", self.flash_radius),
            ("interaction_range", self.interaction_range),
            ("join_range", self.join_range),
            ("max_combined_input", self.max_combined_input),
            ("protection_speed_multiplier", self.protection_speed_multiplier),
            ("round_duration_secs", self.round_duration_secs),
            ("layout.width", self.layout.width),
            ("layout.depth", self.layout.depth),
        ] {
            positive(name, f64::from(value))?;
        }
        for (name, value) in [
            ("max_mana", self.max_mana),
            ("mana_regen_per_sec", self.mana_regen_per_sec),
            ("trap_grace_secs", self.trap_grace_secs),
            ("second_chance_invulnerable_secs", self.second_chance_invulnerable_secs),
            ("protection_invulnerable_secs", self.protection_invulnerable_secs),
            ("protection_speed_secs", self.protection_speed_secs),
            ("pursuer_recover_secs", self.pursuer_recover_secs),
            ("strike_damage", self.strike_damage),
            ("snare_mana_cost", self.snare_mana_cost),
            ("execute_damage", self.execute_damage),
            ("execution_recovery_secs", self.execution_recovery_secs),
            ("flash_blind_secs", self.flash_blind_secs),
            ("flash_mana_cost", self.flash_mana_cost),
            ("charm_mana_cost", self.charm_mana_cost),
            ("eject_margin", self.eject_margin),
            ("eject_upward", self.eject_upward),
        ] {
            non_negative(name, f64::from(value))?;
        }
        for (name, value) in [
            ("strike_cooldown", self.strike_cooldown),
            ("snare_cooldown", self.snare_cooldown),
            ("execute_cooldown", self.execute_cooldown),
            ("flash_cooldown", self.flash_cooldown),
            ("charm_cooldown", self.charm_cooldown),
        ] {
            non_negative(name, value)?;
        }
        if self.human_walk_speed > self.human_run_speed {
            return Err(InvalidConfig(
                "human_walk_speed must not exceed human_run_speed".into(),
            ));
        }
        if self.required_escape_count == 0 {
            return Err(InvalidConfig("required_escape_count must be > 0".into()));
        }
        if self.max_name_len == 0 {
            return Err(InvalidConfig("max_name_len must be > 0".into()));
        }
        Ok(())
    }

    /// Parse and validate TOML tuning. Missing keys keep their defaults.
    pub fn from_toml(contents: &str) -> Result<Self, InvalidConfig> {
        let config: Self = toml::from_str(contents).map_err(|e| InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from `MIMICRY_HUNT_CONFIG` or the default path, falling
    /// back to defaults when neither yields usable tuning.
    pub fn load() -> Self {
        let paths = std::env::var("MIMICRY_HUNT_CONFIG")
            .ok()
            .filter(|p| !p.is_empty())
            .into_iter()
            .chain(Some(DEFAULT_HUNT_CONFIG_PATH.to_string()));
        for path in paths {
            let Ok(contents) = std::fs::read_to_string(&path) else {
                continue;
            };
            match Self::from_toml(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path, "Loaded hunt config");
                    return config;
                },
                Err(e) => tracing::warn!(path = %path, error = %e, "Ignoring invalid hunt config"),
            }
        }
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: HuntConfig = toml::from_str(
            r#"
            required_escape_count = 2
            max_trapped_secs = 4.5
            "#,
        )
        .unwrap();
        assert_eq!(config.required_escape_count, 2);
        assert_eq!(config.max_trapped_secs, 4.5);
        assert_eq!(config.human_walk_speed, HuntConfig::default().human_walk_speed);
        assert_eq!(config.layout, WorldLayout::default());
    }

    #[test]
    fn default_config_is_valid() {
        assert_eq!(HuntConfig::default().validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_values_the_simulation_cannot_use() {
        let cases: Vec<fn(&mut HuntConfig)> = vec![
            |c| c.max_combined_input = 0.0,
            |c| c.max_combined_input = f32::NAN,
            |c| c.human_run_speed = -1.0,
            |c| c.human_walk_speed = 9.0,
            |c| c.interaction_range = -3.0,
            |c| c.max_trapped_secs = 0.0,
            |c| c.required_escape_count = 0,
            |c| c.trap_grace_secs = f32::INFINITY,
            |c| c.strike_cooldown = -0.5,
            |c| c.layout.width = 0.0,
        ];
        for break_it in cases {
            let mut config = HuntConfig::default();
            break_it(&mut config);
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn from_toml_validates() {
        let err = HuntConfig::from_toml("human_walk_speed = -4.0").unwrap_err();
        assert!(err.to_string().contains("human_walk_speed"));
        assert!(HuntConfig::from_toml("max_combined_input = nan").is_err());
        assert!(HuntConfig::from_toml("max_trapped_secs = [").is_err());
        let config = HuntConfig::from_toml("required_escape_count = 3").unwrap();
        assert_eq!(config.required_escape_count, 3);
    }

    #[test]
    fn collider_from_toml() {
        let config: HuntConfig = toml::from_str(
            r#"
            [human_collider.Capsule]
            radius = 0.3
            height = 1.6
            "#,
        )
        .unwrap();
        assert_eq!(
            config.human_collider,
            Collider::Capsule {
                radius: 0.3,
                height: 1.6
            }
        );
    }

    #[test]
    fn layout_from_toml() {
        let config: HuntConfig = toml::from_str(
            r#"
            [layout]
            width = 30.0
            depth = 20.0

            [[layout.props]]
            id = 1
            form = 1
            position = [3.0, 0.0, 4.0]
            "#,
        )
        .unwrap();
        assert_eq!(config.layout.width, 30.0);
        assert_eq!(config.layout.props.len(), 1);
        assert!(!config.layout.props[0].landmark);
        // Unspecified layout fields come from the built-in layout.
        assert!(!config.layout.forms.is_empty());
    }

    #[test]
    fn default_config_serializes_for_observers() {
        let config = HuntConfig::default();
        let bytes = rmp_serde::to_vec(&config).unwrap();
        let back: HuntConfig = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(config, back);
    }
}
