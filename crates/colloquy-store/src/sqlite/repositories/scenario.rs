//! Scenario repository: versioned scenario documents for
//! scenario-driven agent strategies.

use rusqlite::{Connection, OptionalExtension, params};

use colloquy_core::conversation::ScenarioConfiguration;

use crate::errors::Result;

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn build(parts: (String, String, String, String)) -> Result<ScenarioConfiguration> {
    let (id, version_id, name, config_json) = parts;
    Ok(ScenarioConfiguration {
        id,
        version_id,
        name,
        config: serde_json::from_str(&config_json)?,
    })
}

/// Scenario repository: stateless, every method takes `&Connection`.
pub struct ScenarioRepo;

impl ScenarioRepo {
    /// Insert a scenario version.
    pub fn insert(conn: &Connection, scenario: &ScenarioConfiguration) -> Result<()> {
        let config_json = serde_json::to_string(&scenario.config)?;
        let _ = conn.execute(
            "INSERT INTO scenarios (id, version_id, name, config_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                scenario.id,
                scenario.version_id,
                scenario.name,
                config_json,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find a scenario by ID, pinned to a version or latest when `None`.
    pub fn find(
        conn: &Connection,
        scenario_id: &str,
        version_id: Option<&str>,
    ) -> Result<Option<ScenarioConfiguration>> {
        let parts = match version_id {
            Some(version) => conn
                .query_row(
                    "SELECT id, version_id, name, config_json FROM scenarios
                     WHERE id = ?1 AND version_id = ?2",
                    params![scenario_id, version],
                    map_row,
                )
                .optional()?,
            None => conn
                .query_row(
                    "SELECT id, version_id, name, config_json FROM scenarios
                     WHERE id = ?1 ORDER BY created_at DESC, version_id DESC LIMIT 1",
                    params![scenario_id],
                    map_row,
                )
                .optional()?,
        };
        parts.map(build).transpose()
    }
}
