//   Copyright (c) 2024-2026 Anton Kundenko <singaraiona@gmail.com>
//   All rights reserved.
//
//   Permission is hereby granted, free of charge, to any person obtaining a copy
//   of this software and associated documentation files (the "Software"), to deal
//   in the Software without restriction, including without limitation the rights
//   to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
//   copies of the Software, and to permit persons to whom the Software is
//   furnished to do so, subject to the following conditions:
//
//   The above copyright notice and this permission notice shall be included in all
//   copies or substantial portions of the Software.
//
//   THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
//   IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//   FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//   AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//   LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
//   OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
//   SOFTWARE.

// Precomputed table lookup against the metadata registry.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::SqlError;

/// Source of the continuous-query and materialized-view listings of a project.
pub trait MetadataRegistry {
    fn list_continuous(&self, project: &str) -> Result<Vec<String>, SqlError>;
    fn list_materialized(&self, project: &str) -> Result<Vec<String>, SqlError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSchema {
    Continuous,
    Materialized,
}

impl TableSchema {
    pub fn as_str(self) -> &'static str {
        match self {
            TableSchema::Continuous => "continuous",
            TableSchema::Materialized => "materialized",
        }
    }
}

impl fmt::Display for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrecomputedTableRef {
    pub schema: TableSchema,
    pub table_name: String,
}

impl PrecomputedTableRef {
    /// `schema.table`, usable both as a FROM item and as a column qualifier.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table_name)
    }
}

/// Name of the daily user table of `collection`, optionally broken down by a
/// column: `<connector>s_daily_<collection>[_by_<column>]`.
pub fn daily_table_name(connector_field: &str, collection: &str, by: Option<&str>) -> String {
    match by {
        Some(column) => format!("{connector_field}s_daily_{collection}_by_{column}"),
        None => format!("{connector_field}s_daily_{collection}"),
    }
}

// ---------------------------------------------------------------------------
// In-memory registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectTables {
    #[serde(default)]
    pub continuous: Vec<String>,
    #[serde(default)]
    pub materialized: Vec<String>,
}

/// Registry backed by fixed per-project listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRegistry {
    #[serde(default)]
    pub projects: HashMap<String, ProjectTables>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_continuous(mut self, project: &str, table: impl Into<String>) -> Self {
        self.projects
            .entry(project.to_string())
            .or_default()
            .continuous
            .push(table.into());
        self
    }

    pub fn with_materialized(mut self, project: &str, table: impl Into<String>) -> Self {
        self.projects
            .entry(project.to_string())
            .or_default()
            .materialized
            .push(table.into());
        self
    }

    pub fn from_json_file(path: &Path) -> Result<Self, SqlError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SqlError::Registry(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| SqlError::Registry(format!("{}: {e}", path.display())))
    }
}

impl MetadataRegistry for StaticRegistry {
    fn list_continuous(&self, project: &str) -> Result<Vec<String>, SqlError> {
        Ok(self
            .projects
            .get(project)
            .map(|p| p.continuous.clone())
            .unwrap_or_default())
    }

    fn list_materialized(&self, project: &str) -> Result<Vec<String>, SqlError> {
        Ok(self
            .projects
            .get(project)
            .map(|p| p.materialized.clone())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves precomputed tables for one project during one compilation.
///
/// Each listing is fetched at most once, and only when needed: the
/// materialized listing is never requested for a table found among the
/// continuous queries. A failing listing counts as empty, so lookups against
/// it miss and the step falls back to raw aggregation.
pub struct TableResolver<'a> {
    registry: &'a dyn MetadataRegistry,
    project: &'a str,
    connector_field: &'a str,
    continuous: Option<HashSet<String>>,
    materialized: Option<HashSet<String>>,
}

impl<'a> TableResolver<'a> {
    pub fn new(
        registry: &'a dyn MetadataRegistry,
        project: &'a str,
        connector_field: &'a str,
    ) -> Self {
        TableResolver {
            registry,
            project,
            connector_field,
            continuous: None,
            materialized: None,
        }
    }

    /// Look up the daily table of `collection`, optionally broken down by `by`.
    pub fn resolve(&mut self, collection: &str, by: Option<&str>) -> Option<PrecomputedTableRef> {
        let name = daily_table_name(self.connector_field, collection, by);
        self.resolve_table(&name)
    }

    fn resolve_table(&mut self, table_name: &str) -> Option<PrecomputedTableRef> {
        let schema = if self.continuous_tables().contains(table_name) {
            TableSchema::Continuous
        } else if self.materialized_tables().contains(table_name) {
            TableSchema::Materialized
        } else {
            tracing::debug!(project = self.project, table = table_name, "no precomputed table");
            return None;
        };
        tracing::debug!(project = self.project, table = table_name, %schema, "found precomputed table");
        Some(PrecomputedTableRef {
            schema,
            table_name: table_name.to_string(),
        })
    }

    fn continuous_tables(&mut self) -> &HashSet<String> {
        let (registry, project) = (self.registry, self.project);
        self.continuous.get_or_insert_with(|| {
            listing(TableSchema::Continuous, project, registry.list_continuous(project))
        })
    }

    fn materialized_tables(&mut self) -> &HashSet<String> {
        let (registry, project) = (self.registry, self.project);
        self.materialized.get_or_insert_with(|| {
            listing(TableSchema::Materialized, project, registry.list_materialized(project))
        })
    }
}

fn listing(
    schema: TableSchema,
    project: &str,
    result: Result<Vec<String>, SqlError>,
) -> HashSet<String> {
    match result {
        Ok(tables) => tables.into_iter().collect(),
        Err(err) => {
            tracing::warn!(project, %schema, error = %err, "metadata listing failed; treating as empty");
            HashSet::new()
        }
    }
}
