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

// Funnel planner: compiles each step into a `step<i>` relation and assembles
// the relations into a single WITH ... UNION ALL statement.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::catalog::{daily_table_name, MetadataRegistry, PrecomputedTableRef, TableResolver};
use crate::config::{FunnelConfig, PartialFilterFallback};
use crate::expr::FilterExpr;
use crate::tracker::UnresolvedSteps;
use crate::{CompiledFunnel, FunnelRequest, FunnelStep, SqlError};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Compiles funnel requests against one metadata registry.
///
/// The compiler holds no per-request state; every `compile` call gets its
/// own resolver cache and tracker.
pub struct FunnelCompiler<'a> {
    registry: &'a dyn MetadataRegistry,
    config: FunnelConfig,
}

impl<'a> FunnelCompiler<'a> {
    pub fn new(registry: &'a dyn MetadataRegistry) -> Self {
        FunnelCompiler {
            registry,
            config: FunnelConfig::default(),
        }
    }

    pub fn with_config(mut self, config: FunnelConfig) -> Self {
        self.config = config;
        self
    }

    /// Compile `request` into one SQL statement plus the set of steps that
    /// precomputed tables could not serve.
    pub fn compile(&self, request: &FunnelRequest) -> Result<CompiledFunnel, SqlError> {
        self.config.validate()?;
        validate_request(request, &self.config)?;

        let mut planner = StepPlanner {
            config: &self.config,
            range: DateRange::new(request.start_date, request.end_date)?,
            dimension: request.dimension.as_deref(),
            resolver: TableResolver::new(
                self.registry,
                &request.project,
                &self.config.connector_field,
            ),
        };

        let mut unresolved = UnresolvedSteps::new();
        let relations: Vec<StepRelation> = request
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| planner.plan(index, step, &mut unresolved))
            .collect();

        let sql = assemble(&relations, planner.dimension, &self.config);
        tracing::info!(
            project = %request.project,
            steps = relations.len(),
            unresolved = unresolved.len(),
            fully_precomputed = unresolved.is_empty(),
            "compiled funnel query"
        );
        Ok(CompiledFunnel {
            sql,
            unresolved: unresolved.into_set(),
        })
    }
}

// Fixed columns of the assembled result; a dimension is aliased next to them.
const OUTPUT_COLUMNS: [&str; 3] = ["step", "step_index", "user_count"];

fn validate_request(request: &FunnelRequest, config: &FunnelConfig) -> Result<(), SqlError> {
    if request.steps.is_empty() {
        return Err(SqlError::Request("funnel needs at least one step".into()));
    }
    if let Some(dim) = request.dimension.as_deref() {
        if dim == config.connector_field {
            return Err(SqlError::Request(
                "dimension and connector field cannot be equal".into(),
            ));
        }
        if dim.trim().is_empty() {
            return Err(SqlError::Request("dimension name is empty".into()));
        }
        if OUTPUT_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(dim)) {
            return Err(SqlError::Request(format!(
                "dimension `{dim}` clashes with a result column"
            )));
        }
    }
    if request.start_date > request.end_date {
        return Err(SqlError::Request(format!(
            "start date {} is after end date {}",
            request.start_date, request.end_date
        )));
    }
    if let Some(pos) = request.steps.iter().position(|s| s.collection.trim().is_empty()) {
        return Err(SqlError::Request(format!(
            "step {} has an empty collection name",
            pos + 1
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Date range
// ---------------------------------------------------------------------------

/// Inclusive day range, rendered half-open as `[start, end + 1 day)`.
#[derive(Debug, Clone, Copy)]
struct DateRange {
    start: NaiveDate,
    end_exclusive: NaiveDate,
}

impl DateRange {
    fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, SqlError> {
        let end_exclusive = end
            .succ_opt()
            .ok_or_else(|| SqlError::Plan(format!("end date {end} is out of range")))?;
        Ok(DateRange {
            start,
            end_exclusive,
        })
    }

    fn predicate(&self, column: &str) -> String {
        format!(
            "{column} >= cast('{}' as date) AND {column} < cast('{}' as date)",
            self.start, self.end_exclusive
        )
    }
}

// ---------------------------------------------------------------------------
// Step relations
// ---------------------------------------------------------------------------

/// One compiled step: `SELECT <projection> FROM <source> WHERE <predicates>`,
/// exposing the columns date, [dimension,] connector.
#[derive(Debug)]
struct StepRelation {
    index: usize,
    projection: Vec<String>,
    source: String,
    predicates: Vec<String>,
    grouped: bool,
    join: Option<String>,
}

impl StepRelation {
    fn select_sql(&self) -> String {
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {}",
            self.projection.join(", "),
            self.source,
            self.predicates.join(" AND ")
        );
        if self.grouped {
            let ordinals: Vec<String> = (1..=self.projection.len()).map(|i| i.to_string()).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&ordinals.join(", "));
        }
        sql
    }

    fn render(&self) -> String {
        let name = format!("step{}", self.index);
        let mut sql = format!("{name} AS (SELECT {name}.* FROM ({}) {name}", self.select_sql());
        if let Some(join) = &self.join {
            sql.push(' ');
            sql.push_str(join);
        }
        sql.push(')');
        sql
    }
}

// ---------------------------------------------------------------------------
// Step planning
// ---------------------------------------------------------------------------

struct StepPlanner<'c> {
    config: &'c FunnelConfig,
    range: DateRange,
    dimension: Option<&'c str>,
    resolver: TableResolver<'c>,
}

impl<'c> StepPlanner<'c> {
    fn plan(&mut self, index: usize, step: &FunnelStep, unresolved: &mut UnresolvedSteps) -> StepRelation {
        let mut relation = match &step.filter {
            None => self.plan_unfiltered(index, &step.collection, unresolved),
            Some(filter) => self.plan_filtered(index, &step.collection, filter, unresolved),
        };
        relation.join = self.join_clause(index);
        relation
    }

    /// Whole step served by `<connector>s_daily_<collection>[_by_<dimension>]`.
    fn plan_unfiltered(
        &mut self,
        index: usize,
        collection: &str,
        unresolved: &mut UnresolvedSteps,
    ) -> StepRelation {
        let Some(table) = self.resolver.resolve(collection, self.dimension) else {
            unresolved.record(collection, self.dimension);
            return self.raw(index, collection, None);
        };
        tracing::debug!(step = index, table = %table.qualified(), "step served by precomputed table");

        let date = &self.config.date_column;
        let mut projection = vec![date.clone()];
        if let Some(dim) = self.dimension {
            projection.push(format!("{dim} AS dimension"));
        }
        projection.push(self.config.connector_field.clone());
        StepRelation {
            index,
            projection,
            source: table.qualified(),
            predicates: vec![self.range.predicate(date)],
            grouped: false,
            join: None,
        }
    }

    fn plan_filtered(
        &mut self,
        index: usize,
        collection: &str,
        filter: &FilterExpr,
        unresolved: &mut UnresolvedSteps,
    ) -> StepRelation {
        let dimension = self.dimension;

        // Misses go to a scratch tracker so a failed rewrite leaves no trace.
        let mut misses = UnresolvedSteps::new();
        let mut tables: Vec<PrecomputedTableRef> = Vec::new();
        let mut sources: HashMap<String, Option<String>> = HashMap::new();
        for column in filter.columns() {
            let qualifier = match self.resolver.resolve(collection, Some(&column)) {
                Some(table) => {
                    let qualifier = table.qualified();
                    if !tables.contains(&table) {
                        tables.push(table);
                    }
                    Some(qualifier)
                }
                None => {
                    let key = match self.config.partial_filter_fallback {
                        PartialFilterFallback::CollectionOnly => None,
                        PartialFilterFallback::Column => Some(column.as_str()),
                        PartialFilterFallback::Dimension => dimension,
                    };
                    misses.record(collection, key);
                    None
                }
            };
            sources.insert(column, qualifier);
        }
        let raw_columns = sources.values().any(Option::is_none);

        // Once precomputed tables are joined in, raw columns need their
        // collection as qualifier.
        let raw_qualifier = (raw_columns && !tables.is_empty()).then(|| collection.to_string());
        let rewritten = filter.rewrite_column_sources(|column| {
            sources
                .get(column)
                .cloned()
                .flatten()
                .or_else(|| raw_qualifier.clone())
        });

        let condition = match rewritten {
            Ok(sql) => sql,
            Err(err) => {
                tracing::debug!(step = index, error = %err, "filter rewrite failed, scanning raw events");
                unresolved.record(collection, dimension);
                return self.raw(index, collection, Some(filter.to_string()));
            }
        };
        unresolved.merge(misses);

        let Some(dim) = dimension else {
            return self.filtered(index, collection, condition, &tables, raw_columns, false);
        };
        if filter.references_column(dim) {
            return self.filtered(index, collection, condition, &tables, raw_columns, true);
        }

        let Some(dim_table) = self.resolver.resolve(collection, Some(dim)) else {
            unresolved.record(collection, Some(dim));
            return self.raw(index, collection, Some(filter.to_string()));
        };

        let inner = self.filtered(index, collection, condition, &tables, raw_columns, false);
        let (date, user) = (&self.config.date_column, &self.config.connector_field);
        StepRelation {
            index,
            projection: vec![
                format!("daily.{date} AS {date}"),
                format!("daily.{dim} AS dimension"),
                format!("daily.{user} AS {user}"),
            ],
            source: format!(
                "{} daily JOIN ({}) filtered ON (filtered.{date} = daily.{date} AND filtered.{user} = daily.{user})",
                dim_table.qualified(),
                inner.select_sql()
            ),
            predicates: vec![self.range.predicate(&format!("daily.{date}"))],
            grouped: true,
            join: None,
        }
    }

    /// Filtered step over precomputed per-column tables, joined to the raw
    /// collection when some filter column has no table.
    fn filtered(
        &self,
        index: usize,
        collection: &str,
        condition: String,
        tables: &[PrecomputedTableRef],
        raw_columns: bool,
        project_dimension: bool,
    ) -> StepRelation {
        let dim = if project_dimension { self.dimension } else { None };
        let Some(first) = tables.first() else {
            // Nothing precomputed: the rewritten filter is the raw filter.
            return self.raw_with(index, collection, Some(condition), dim);
        };

        let (date, user) = (&self.config.date_column, &self.config.connector_field);
        let (base, joined, date_expr, range_column) = if raw_columns {
            let day = format!("cast({collection}.{} as date)", self.config.time_column);
            (
                collection.to_string(),
                tables,
                day,
                format!("{collection}.{}", self.config.time_column),
            )
        } else {
            let q = first.qualified();
            (q.clone(), &tables[1..], format!("{q}.{date}"), format!("{q}.{date}"))
        };

        let mut source = base.clone();
        for table in joined {
            let q = table.qualified();
            source.push_str(&format!(
                " JOIN {q} ON ({q}.{date} = {date_expr} AND {q}.{user} = {base}.{user})"
            ));
        }

        let mut projection = vec![format!("{date_expr} AS {date}")];
        if let Some(dim) = dim {
            let dim_table = daily_table_name(user, collection, Some(dim));
            let qualifier = tables
                .iter()
                .find(|t| t.table_name == dim_table)
                .map(PrecomputedTableRef::qualified)
                .unwrap_or_else(|| collection.to_string());
            projection.push(format!("{qualifier}.{dim} AS dimension"));
        }
        projection.push(format!("{base}.{user} AS {user}"));

        StepRelation {
            index,
            projection,
            source,
            predicates: vec![self.range.predicate(&range_column), format!("({condition})")],
            grouped: true,
            join: None,
        }
    }

    fn raw(&self, index: usize, collection: &str, condition: Option<String>) -> StepRelation {
        self.raw_with(index, collection, condition, self.dimension)
    }

    /// Aggregate raw events of `collection` per day and user.
    fn raw_with(
        &self,
        index: usize,
        collection: &str,
        condition: Option<String>,
        dimension: Option<&str>,
    ) -> StepRelation {
        let config = self.config;
        let mut projection = vec![format!(
            "cast({} as date) AS {}",
            config.time_column, config.date_column
        )];
        if let Some(dim) = dimension {
            projection.push(format!("{dim} AS dimension"));
        }
        projection.push(config.connector_field.clone());

        let mut predicates = vec![self.range.predicate(&config.time_column)];
        predicates.extend(condition.map(|c| format!("({c})")));
        StepRelation {
            index,
            projection,
            source: collection.to_string(),
            predicates,
            grouped: true,
            join: None,
        }
    }

    /// Later steps only count users whose earlier step happened on or before
    /// the same day (and, with a breakdown, in the same bucket).
    fn join_clause(&self, index: usize) -> Option<String> {
        let prev = index.checked_sub(1)?;
        let (date, user) = (&self.config.date_column, &self.config.connector_field);
        let dimension = match self.dimension {
            Some(_) => format!(" AND step{index}.dimension = step{prev}.dimension"),
            None => String::new(),
        };
        Some(format!(
            "JOIN step{prev} ON (step{index}.{date} >= step{prev}.{date}{dimension} AND step{index}.{user} = step{prev}.{user})"
        ))
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

fn assemble(relations: &[StepRelation], dimension: Option<&str>, config: &FunnelConfig) -> String {
    let ctes: Vec<String> = relations.iter().map(StepRelation::render).collect();
    let user = &config.connector_field;

    let branches: Vec<String> = relations
        .iter()
        .map(|r| {
            let (i, label) = (r.index, r.index + 1);
            match dimension {
                None => format!(
                    "(SELECT {i} AS step_index, 'Step {label}' AS step, count(DISTINCT {user}) AS user_count FROM step{i})"
                ),
                Some(dim) => format!(
                    "(SELECT step_index, step, CASE WHEN bucket_rank > {top} THEN 'Others' ELSE cast(dimension AS varchar) END AS {dim}, sum(user_count) AS user_count \
                     FROM (SELECT {i} AS step_index, 'Step {label}' AS step, dimension, count(DISTINCT {user}) AS user_count, \
                     row_number() OVER (ORDER BY count(DISTINCT {user}) DESC) AS bucket_rank FROM step{i} GROUP BY dimension) ranked \
                     GROUP BY 1, 2, 3)",
                    top = config.top_dimension_buckets
                ),
            }
        })
        .collect();

    let (columns, order) = match dimension {
        None => ("step, user_count".to_string(), "step_index ASC"),
        Some(dim) => (
            format!("step, {dim}, user_count"),
            "step_index ASC, user_count DESC",
        ),
    };
    format!(
        "WITH {}\nSELECT {columns} FROM ({}) funnel ORDER BY {order}",
        ctes.join(",\n"),
        branches.join("\nUNION ALL\n")
    )
}
