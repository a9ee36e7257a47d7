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

// Compiler configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::SqlError;

/// Key recorded when a filter column has no per-column precomputed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialFilterFallback {
    /// `(collection, None)`.
    #[default]
    CollectionOnly,
    /// `(collection, Some(column))`, naming the missing per-column table.
    Column,
    /// `(collection, dimension)`, the active breakdown dimension if any.
    Dimension,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunnelConfig {
    /// Column identifying the user across steps.
    pub connector_field: String,
    /// Event timestamp column of raw collections.
    pub time_column: String,
    /// Day column of precomputed tables (and of every step relation).
    pub date_column: String,
    /// Dimension values ranked past this position are reported as "Others".
    pub top_dimension_buckets: usize,
    pub partial_filter_fallback: PartialFilterFallback,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            connector_field: "_user".to_string(),
            time_column: "_time".to_string(),
            date_column: "date".to_string(),
            top_dimension_buckets: 15,
            partial_filter_fallback: PartialFilterFallback::CollectionOnly,
        }
    }
}

impl FunnelConfig {
    /// Load a JSON config file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, SqlError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SqlError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: FunnelConfig = serde_json::from_str(&text)
            .map_err(|e| SqlError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SqlError> {
        for (field, value) in [
            ("connector_field", &self.connector_field),
            ("time_column", &self.time_column),
            ("date_column", &self.date_column),
        ] {
            if value.trim().is_empty() {
                return Err(SqlError::Config(format!("{field} must not be empty")));
            }
        }
        if self.top_dimension_buckets == 0 {
            return Err(SqlError::Config(
                "top_dimension_buckets must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
