//! Streaming collectors over index scans.
//!
//! A collector loads the columns it needs once per segment and then
//! receives matching ordinals in unspecified order; results are read
//! only after the scan by consuming the collector.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{RemarqueError, Result};
use crate::index::{Collector, Column, FieldHasher, MultiColumn, Segment};

fn load_column(segment: &Arc<Segment>, field: &str) -> Result<Arc<Column>> {
    segment
        .column(field)
        .ok_or_else(|| RemarqueError::Index(format!("segment has no column \"{field}\"")))
}

// ------------- LatestPerGroup -------------
/// Keeps, per group key, the payload of the document with the greatest
/// comparison key seen so far. Comparison keys are lexically ordered;
/// on an equal key the document visited later wins.
pub struct LatestPerGroup {
    group_field: String,
    value_field: String,
    order_field: String,
    group_column: Option<Arc<Column>>,
    value_column: Option<Arc<Column>>,
    order_column: Option<Arc<Column>>,
    latest: HashMap<String, String, FieldHasher>,
    order_keys: HashMap<String, String, FieldHasher>,
}

impl LatestPerGroup {
    pub fn new(group_field: &str, value_field: &str, order_field: &str) -> Self {
        Self {
            group_field: group_field.to_string(),
            value_field: value_field.to_string(),
            order_field: order_field.to_string(),
            group_column: None,
            value_column: None,
            order_column: None,
            latest: HashMap::default(),
            order_keys: HashMap::default(),
        }
    }

    /// The accumulated group -> payload mapping.
    pub fn into_latest(self) -> HashMap<String, String, FieldHasher> {
        self.latest
    }
}

impl Collector for LatestPerGroup {
    fn begin_segment(&mut self, segment: &Arc<Segment>) -> Result<()> {
        self.group_column = Some(load_column(segment, &self.group_field)?);
        self.value_column = Some(load_column(segment, &self.value_field)?);
        self.order_column = Some(load_column(segment, &self.order_field)?);
        Ok(())
    }

    fn visit(&mut self, ordinal: u32) {
        let i = ordinal as usize;
        let (Some(groups), Some(values), Some(orders)) =
            (&self.group_column, &self.value_column, &self.order_column)
        else {
            return;
        };
        let (Some(Some(group)), Some(Some(value)), Some(Some(order))) =
            (groups.get(i), values.get(i), orders.get(i))
        else {
            return;
        };
        match self.order_keys.get(group.as_ref()) {
            Some(best) if order.as_ref() < best.as_str() => (),
            _ => {
                self.latest.insert(group.to_string(), value.to_string());
                self.order_keys.insert(group.to_string(), order.to_string());
            }
        }
    }
}

// ------------- LinkedRefs -------------
/// Collects document ids referenced through a multi-valued link field.
/// Each link value passing the filter contributes the substring after
/// the marker token; values without the marker are skipped. Set
/// semantics suppress duplicates.
pub struct LinkedRefs<F: Fn(&str) -> bool> {
    link_field: String,
    marker: String,
    filter: F,
    links: Option<Arc<MultiColumn>>,
    ids: HashSet<String, FieldHasher>,
}

/// Filter that lets every link value through.
pub fn accept_all(_: &str) -> bool {
    true
}

impl<F: Fn(&str) -> bool> LinkedRefs<F> {
    pub fn new(link_field: &str, marker: &str, filter: F) -> Self {
        Self {
            link_field: link_field.to_string(),
            marker: marker.to_string(),
            filter,
            links: None,
            ids: HashSet::default(),
        }
    }

    pub fn into_ids(self) -> HashSet<String, FieldHasher> {
        self.ids
    }
}

impl<F: Fn(&str) -> bool> Collector for LinkedRefs<F> {
    fn begin_segment(&mut self, segment: &Arc<Segment>) -> Result<()> {
        self.links = Some(segment.multi_column(&self.link_field).ok_or_else(|| {
            RemarqueError::Index(format!("segment has no link column \"{}\"", self.link_field))
        })?);
        Ok(())
    }

    fn visit(&mut self, ordinal: u32) {
        let Some(links) = &self.links else { return };
        let Some(values) = links.get(ordinal as usize) else { return };
        for value in values {
            if !(self.filter)(value.as_ref()) {
                continue;
            }
            if let Some(at) = value.find(self.marker.as_str()) {
                self.ids.insert(value[at + self.marker.len()..].to_string());
            }
        }
    }
}

// ------------- KeyCollector -------------
/// Accumulates the distinct values of one column across all visited
/// documents.
pub struct KeyCollector {
    field: String,
    column: Option<Arc<Column>>,
    keys: HashSet<String, FieldHasher>,
}

impl KeyCollector {
    pub fn new(field: &str) -> Self {
        Self {
            field: field.to_string(),
            column: None,
            keys: HashSet::default(),
        }
    }

    pub fn into_keys(self) -> HashSet<String, FieldHasher> {
        self.keys
    }
}

impl Collector for KeyCollector {
    fn begin_segment(&mut self, segment: &Arc<Segment>) -> Result<()> {
        self.column = Some(load_column(segment, &self.field)?);
        Ok(())
    }

    fn visit(&mut self, ordinal: u32) {
        let Some(column) = &self.column else { return };
        if let Some(Some(key)) = column.get(ordinal as usize) {
            self.keys.insert(key.to_string());
        }
    }
}
