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

// Bookkeeping for funnel steps that precomputed tables could not serve.

use std::collections::BTreeSet;

use serde::Serialize;

/// A step (and optional breakdown) that needs raw event aggregation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CalculatedUserSet {
    pub collection: String,
    pub dimension: Option<String>,
}

impl CalculatedUserSet {
    pub fn new(collection: impl Into<String>, dimension: Option<&str>) -> Self {
        CalculatedUserSet {
            collection: collection.into(),
            dimension: dimension.map(str::to_string),
        }
    }
}

/// Deduplicating accumulator owned by one compilation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnresolvedSteps {
    sets: BTreeSet<CalculatedUserSet>,
}

impl UnresolvedSteps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, collection: &str, dimension: Option<&str>) {
        if self.sets.insert(CalculatedUserSet::new(collection, dimension)) {
            tracing::debug!(collection, ?dimension, "recorded unresolved funnel step");
        }
    }

    pub fn merge(&mut self, other: UnresolvedSteps) {
        self.sets.extend(other.sets);
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn into_set(self) -> BTreeSet<CalculatedUserSet> {
        self.sets
    }
}
