//! Match configuration: the line-oriented text format naming the global
//! simulation parameters and each player's compiled class files.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use antfarm_core::{AntClass, ClassFormatError, PlayerRoster, SimulationConfig};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("line {line}: expected '{expected}'")]
    ExpectedSection { line: usize, expected: &'static str },
    #[error("line {line}: unknown setting '{key}'")]
    UnknownKey { line: usize, key: String },
    #[error("line {line}: expected 'Key = value'")]
    MalformedLine { line: usize },
    #[error("line {line}: invalid value '{value}' for {key}")]
    InvalidValue {
        line: usize,
        key: String,
        value: String,
    },
    #[error("configuration declares {expected} players but lists {actual}")]
    PlayerCountMismatch { expected: usize, actual: usize },
    #[error("configuration file ends before the player list is complete")]
    Truncated,
    #[error("class file {path}: {source}")]
    ClassFile {
        path: PathBuf,
        #[source]
        source: ClassFormatError,
    },
}

/// One player's entry: a display name and the ordered class files, queen
/// first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerFiles {
    pub name: String,
    pub class_files: Vec<PathBuf>,
}

/// A fully parsed match configuration.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub simulation: SimulationConfig,
    pub players: Vec<PlayerFiles>,
}

impl MatchConfig {
    /// Read and parse a configuration file. Class-file paths resolve
    /// relative to the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let mut config = Self::parse(&text)?;
        if let Some(dir) = path.parent() {
            for player in &mut config.players {
                for file in &mut player.class_files {
                    *file = dir.join(&*file);
                }
            }
        }
        Ok(config)
    }

    /// Parse the `GlobalConfig:` / `PlayerConfig:` text format.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        let Some((line, header)) = lines.next() else {
            return Err(ConfigError::ExpectedSection {
                line: 1,
                expected: "GlobalConfig:",
            });
        };
        if header != "GlobalConfig:" {
            return Err(ConfigError::ExpectedSection {
                line,
                expected: "GlobalConfig:",
            });
        }

        let mut simulation = SimulationConfig {
            number_of_players: 0,
            ..SimulationConfig::default()
        };
        let mut saw_players_section = false;
        for (line, text) in &mut lines {
            if text == "PlayerConfig:" {
                saw_players_section = true;
                break;
            }
            let (key, value) = split_setting(line, text)?;
            apply_global(&mut simulation, line, key, value)?;
        }
        if !saw_players_section {
            return Err(ConfigError::Truncated);
        }

        let mut players = Vec::new();
        while let Some((line, text)) = lines.next() {
            let (key, name) = split_setting(line, text)?;
            if key != "Player" {
                return Err(ConfigError::UnknownKey {
                    line,
                    key: key.to_owned(),
                });
            }
            let Some((classes_line, classes_text)) = lines.next() else {
                return Err(ConfigError::Truncated);
            };
            let (classes_key, file_list) = split_setting(classes_line, classes_text)?;
            if classes_key != "Classes" {
                return Err(ConfigError::UnknownKey {
                    line: classes_line,
                    key: classes_key.to_owned(),
                });
            }
            let class_files: Vec<PathBuf> =
                file_list.split_whitespace().map(PathBuf::from).collect();
            players.push(PlayerFiles {
                name: name.to_owned(),
                class_files,
            });
        }

        if players.len() != simulation.number_of_players {
            return Err(ConfigError::PlayerCountMismatch {
                expected: simulation.number_of_players,
                actual: players.len(),
            });
        }
        Ok(Self {
            simulation,
            players,
        })
    }

    /// Load every player's compiled classes from disk, queen first.
    pub fn load_rosters(&self) -> Result<Vec<PlayerRoster>, ConfigError> {
        self.players
            .iter()
            .map(|player| {
                let classes = player
                    .class_files
                    .iter()
                    .map(|path| {
                        let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
                            path: path.clone(),
                            source,
                        })?;
                        let class = AntClass::from_bytes(&bytes).map_err(|source| {
                            ConfigError::ClassFile {
                                path: path.clone(),
                                source,
                            }
                        })?;
                        info!(
                            player = %player.name,
                            class = %class.name(),
                            id = class.id(),
                            instructions = class.instruction_count(),
                            "loaded ant class"
                        );
                        Ok(Arc::new(class))
                    })
                    .collect::<Result<Vec<_>, ConfigError>>()?;
                Ok(PlayerRoster {
                    name: player.name.clone(),
                    classes,
                })
            })
            .collect()
    }
}

/// Split a `Key = value` line into its key and the raw value text.
fn split_setting<'a>(line: usize, text: &'a str) -> Result<(&'a str, &'a str), ConfigError> {
    let Some((key, value)) = text.split_once('=') else {
        return Err(ConfigError::MalformedLine { line });
    };
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() || value.is_empty() || key.split_whitespace().count() != 1 {
        return Err(ConfigError::MalformedLine { line });
    }
    Ok((key, value))
}

fn apply_global(
    simulation: &mut SimulationConfig,
    line: usize,
    key: &str,
    value: &str,
) -> Result<(), ConfigError> {
    fn parse<T: std::str::FromStr>(line: usize, key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidValue {
            line,
            key: key.to_owned(),
            value: value.to_owned(),
        })
    }

    match key {
        "NumberOfPlayers" => simulation.number_of_players = parse(line, key, value)?,
        "PlayfieldWidth" => simulation.playfield_width = parse(line, key, value)?,
        "PlayfieldHeight" => simulation.playfield_height = parse(line, key, value)?,
        "PassableRatio" => simulation.passable_ratio = parse(line, key, value)?,
        "StonesRatio" => simulation.stones_ratio = parse(line, key, value)?,
        "FoodRatio" => simulation.food_ratio = parse(line, key, value)?,
        "MaxStonesPerCell" => simulation.max_stones_per_cell = parse(line, key, value)?,
        "MaxFoodPerCell" => simulation.max_food_per_cell = parse(line, key, value)?,
        "SleepPerCycle" => simulation.sleep_per_cycle = parse(line, key, value)?,
        "InitialEnergy" => simulation.initial_energy = parse(line, key, value)?,
        "EnergyPerFood" => simulation.energy_per_food = parse(line, key, value)?,
        "EnergyPerRun" => simulation.energy_per_run = parse(line, key, value)?,
        "FoodRegrowRate" => simulation.food_regrow_rate = parse(line, key, value)?,
        "RngSeed" => simulation.rng_seed = Some(parse(line, key, value)?),
        _ => {
            return Err(ConfigError::UnknownKey {
                line,
                key: key.to_owned(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "\
GlobalConfig:
NumberOfPlayers = 2
PlayfieldWidth = 64
PlayfieldHeight = 48
PassableRatio = 0.85
StonesRatio = 0.25
FoodRatio = 0.4
MaxStonesPerCell = 15
MaxFoodPerCell = 18
SleepPerCycle = 5
InitialEnergy = 9000
EnergyPerFood = 500
EnergyPerRun = 25
FoodRegrowRate = 0.01
RngSeed = 1234
PlayerConfig:
Player = alice
Classes = queen.bin worker.bin
Player = bob
Classes = solo.bin
";

    #[test]
    fn parses_every_global_key() {
        let config = MatchConfig::parse(FULL).expect("parse");
        let sim = &config.simulation;
        assert_eq!(sim.number_of_players, 2);
        assert_eq!(sim.playfield_width, 64);
        assert_eq!(sim.playfield_height, 48);
        assert_eq!(sim.passable_ratio, 0.85);
        assert_eq!(sim.stones_ratio, 0.25);
        assert_eq!(sim.food_ratio, 0.4);
        assert_eq!(sim.max_stones_per_cell, 15);
        assert_eq!(sim.max_food_per_cell, 18);
        assert_eq!(sim.sleep_per_cycle, 5);
        assert_eq!(sim.initial_energy, 9000);
        assert_eq!(sim.energy_per_food, 500);
        assert_eq!(sim.energy_per_run, 25);
        assert_eq!(sim.food_regrow_rate, 0.01);
        assert_eq!(sim.rng_seed, Some(1234));
        assert!(sim.validate().is_ok());

        assert_eq!(
            config.players,
            vec![
                PlayerFiles {
                    name: "alice".into(),
                    class_files: vec!["queen.bin".into(), "worker.bin".into()],
                },
                PlayerFiles {
                    name: "bob".into(),
                    class_files: vec!["solo.bin".into()],
                },
            ]
        );
    }

    #[test]
    fn unset_keys_keep_their_defaults() {
        let config = MatchConfig::parse(
            "GlobalConfig:\nNumberOfPlayers = 1\nPlayerConfig:\nPlayer = solo\nClasses = a.bin\n",
        )
        .expect("parse");
        let defaults = SimulationConfig::default();
        assert_eq!(config.simulation.playfield_width, defaults.playfield_width);
        assert_eq!(config.simulation.initial_energy, defaults.initial_energy);
        assert_eq!(config.simulation.rng_seed, None);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_numbers() {
        let err = MatchConfig::parse("GlobalConfig:\nGravity = 9\nPlayerConfig:\n")
            .expect_err("unknown key");
        assert!(matches!(
            err,
            ConfigError::UnknownKey { line: 2, ref key } if key == "Gravity"
        ));

        let err = MatchConfig::parse("GlobalConfig:\nPlayfieldWidth = wide\nPlayerConfig:\n")
            .expect_err("bad number");
        assert!(matches!(
            err,
            ConfigError::InvalidValue { line: 2, ref key, .. } if key == "PlayfieldWidth"
        ));

        let err =
            MatchConfig::parse("GlobalConfig:\nPlayfieldWidth\nPlayerConfig:\n").expect_err("no =");
        assert!(matches!(err, ConfigError::MalformedLine { line: 2 }));
    }

    #[test]
    fn rejects_truncated_files() {
        assert!(matches!(
            MatchConfig::parse("GlobalConfig:\nNumberOfPlayers = 1\n"),
            Err(ConfigError::Truncated)
        ));
        assert!(matches!(
            MatchConfig::parse(
                "GlobalConfig:\nNumberOfPlayers = 1\nPlayerConfig:\nPlayer = solo\n"
            ),
            Err(ConfigError::Truncated)
        ));
        assert!(matches!(
            MatchConfig::parse(""),
            Err(ConfigError::ExpectedSection { expected: "GlobalConfig:", .. })
        ));
        assert!(matches!(
            MatchConfig::parse("PlayerConfig:\n"),
            Err(ConfigError::ExpectedSection { line: 1, .. })
        ));
    }

    #[test]
    fn player_count_must_match_the_roster_list() {
        let err = MatchConfig::parse(
            "GlobalConfig:\nNumberOfPlayers = 2\nPlayerConfig:\nPlayer = solo\nClasses = a.bin\n",
        )
        .expect_err("count mismatch");
        assert!(matches!(
            err,
            ConfigError::PlayerCountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn class_lists_must_not_be_empty() {
        let err = MatchConfig::parse(
            "GlobalConfig:\nNumberOfPlayers = 1\nPlayerConfig:\nPlayer = solo\nClasses = \n",
        )
        .expect_err("empty class list");
        // `Classes =` with no value reads as a malformed line.
        assert!(matches!(err, ConfigError::MalformedLine { .. }));
    }
}
