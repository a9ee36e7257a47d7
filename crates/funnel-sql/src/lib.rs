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

// funnel-sql: compiles multi-step funnel queries into a single SQL statement.
//
// Each step is served from a precomputed daily user table when the metadata
// registry lists one, otherwise it is aggregated from raw events. Steps that
// needed raw aggregation are reported back so their tables can be built.

pub mod catalog;
pub mod config;
pub mod expr;
pub mod planner;
pub mod tracker;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use catalog::{MetadataRegistry, PrecomputedTableRef, StaticRegistry, TableSchema};
pub use config::{FunnelConfig, PartialFilterFallback};
pub use expr::{parse_filter, ColumnRef, FilterExpr};
pub use planner::FunnelCompiler;
pub use tracker::{CalculatedUserSet, UnresolvedSteps};

/// Errors produced by the funnel compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlError {
    /// Filter expression could not be parsed.
    Parse(String),
    /// The request itself is invalid (bad dimension, empty funnel, ...).
    Request(String),
    /// Planning error (date overflow and similar).
    Plan(String),
    /// Metadata registry lookup failed.
    Registry(String),
    /// Invalid compiler configuration.
    Config(String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(msg) => write!(f, "filter parse error: {msg}"),
            SqlError::Request(msg) => write!(f, "invalid funnel request: {msg}"),
            SqlError::Plan(msg) => write!(f, "funnel planning error: {msg}"),
            SqlError::Registry(msg) => write!(f, "metadata registry error: {msg}"),
            SqlError::Config(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for SqlError {}

/// One funnel step: an event collection and an optional filter over its columns.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "StepDef")]
pub struct FunnelStep {
    pub collection: String,
    pub filter: Option<FilterExpr>,
}

impl FunnelStep {
    /// Build a step, treating an unparsable filter as no filter at all.
    pub fn new(collection: impl Into<String>, filter: Option<&str>) -> Self {
        let collection = collection.into();
        let filter = filter.and_then(|text| match parse_filter(text) {
            Ok(expr) => Some(expr),
            Err(err) => {
                tracing::warn!(%collection, filter = text, error = %err, "ignoring unparsable step filter");
                None
            }
        });
        FunnelStep { collection, filter }
    }

    /// Build a step, failing on an unparsable filter.
    pub fn try_new(collection: impl Into<String>, filter: Option<&str>) -> Result<Self, SqlError> {
        let filter = filter.map(parse_filter).transpose()?;
        Ok(FunnelStep {
            collection: collection.into(),
            filter,
        })
    }
}

#[derive(Deserialize)]
struct StepDef {
    collection: String,
    #[serde(default)]
    filter: Option<String>,
}

impl From<StepDef> for FunnelStep {
    fn from(def: StepDef) -> Self {
        FunnelStep::new(def.collection, def.filter.as_deref())
    }
}

/// A funnel query over an inclusive date range.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunnelRequest {
    pub project: String,
    pub steps: Vec<FunnelStep>,
    #[serde(default)]
    pub dimension: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Compiled SQL plus the steps that had to fall back to raw event scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledFunnel {
    pub sql: String,
    pub unresolved: BTreeSet<CalculatedUserSet>,
}

/// Compile a funnel request with the default configuration.
pub fn compile(
    request: &FunnelRequest,
    registry: &dyn MetadataRegistry,
) -> Result<CompiledFunnel, SqlError> {
    FunnelCompiler::new(registry).compile(request)
}
