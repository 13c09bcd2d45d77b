//! Cross-chunk merge and deduplication
//!
//! The merge runs once per document after every chunk has reported. It is
//! a pure function of its input: the same observations in the same order
//! always produce the same record.

use crate::config::PipelineOptions;
use crate::temporal::{build_timeline, merge_timelines};
use crate::types::{Conflict, MergedRecord, NormalizedFields, TimelineEntry};
use fieldwise_domain::{Confidence, FieldSpec, FieldType};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One chunk's value for one field
#[derive(Debug, Clone)]
struct Observation<'a> {
    chunk: usize,
    value: &'a Value,
    confidence: Confidence,
}

/// Merged value, provenance, confidence and conflicts of one field
struct FieldMerge {
    value: Value,
    provenance: Vec<usize>,
    confidence: f64,
    conflicts: Option<Vec<Conflict>>,
    timeline: Option<Vec<TimelineEntry>>,
}

/// Combines per-chunk results into one record
pub struct Merger {
    specs: Vec<FieldSpec>,
    ascending_timeline: bool,
    segregate_unparsed_dates: bool,
}

impl Merger {
    /// Create a merger for `specs`
    pub fn new(specs: &[FieldSpec], options: &PipelineOptions) -> Self {
        Self {
            specs: specs.to_vec(),
            ascending_timeline: options.ascending_timeline,
            segregate_unparsed_dates: options.segregate_unparsed_dates,
        }
    }

    /// Merge every chunk's values into a single record
    ///
    /// Every requested field is present in the result: unique fields as a
    /// scalar or null, all others as a (possibly empty) list.
    pub fn merge(&self, chunks: &[NormalizedFields]) -> MergedRecord {
        let mut ordered: Vec<&NormalizedFields> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.fields.chunk_index);

        let mut record = MergedRecord::default();
        let mut timelines = Vec::new();

        for spec in &self.specs {
            let observations = observations_for(&ordered, &spec.name);
            let merged = match spec.field_type {
                FieldType::Timeline => self.merge_timeline(spec, &observations),
                _ if spec.unique => merge_unique(&observations),
                _ => merge_list(&observations),
            };

            record.fields.insert(spec.name.clone(), merged.value);
            record.provenance.insert(spec.name.clone(), merged.provenance);
            record.confidence.insert(spec.name.clone(), merged.confidence);
            if let Some(conflicts) = merged.conflicts {
                record.conflicts.insert(spec.name.clone(), conflicts);
            }
            if let Some(timeline) = merged.timeline {
                timelines.push(timeline);
            }
        }

        if !timelines.is_empty() {
            record.timeline = Some(merge_timelines(
                timelines,
                self.ascending_timeline,
                self.segregate_unparsed_dates,
            ));
        }
        record
    }

    fn merge_timeline(&self, spec: &FieldSpec, observations: &[Observation<'_>]) -> FieldMerge {
        let date_field = spec.date_field.as_deref().unwrap_or("date");
        let mut events = Vec::new();
        let mut contributors = Vec::new();

        for obs in observations {
            if let Value::Array(items) = obs.value {
                if !items.is_empty() {
                    events.extend(items.iter().cloned());
                    contributors.push(obs);
                }
            }
        }

        let timeline = build_timeline(
            &events,
            date_field,
            &spec.payload_fields,
            self.ascending_timeline,
            self.segregate_unparsed_dates,
        );

        // Undated events stay in the field, after the dated ones
        let mut value: Vec<Value> = timeline.iter().map(TimelineEntry::to_value).collect();
        for event in &events {
            if is_undated(event, date_field) && !value.contains(event) {
                value.push(event.clone());
            }
        }

        FieldMerge {
            value: Value::Array(value),
            provenance: contributors.iter().map(|o| o.chunk).collect(),
            confidence: Confidence::mean(contributors.iter().map(|o| o.confidence)).value(),
            conflicts: None,
            timeline: Some(timeline),
        }
    }
}

fn is_undated(event: &Value, date_field: &str) -> bool {
    match event.get(date_field) {
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Number(_)) => false,
        _ => true,
    }
}

fn observations_for<'a>(chunks: &[&'a NormalizedFields], field: &str) -> Vec<Observation<'a>> {
    chunks
        .iter()
        .filter_map(|c| {
            let value = c.fields.values.get(field)?;
            if value.is_null() {
                return None;
            }
            Some(Observation {
                chunk: c.fields.chunk_index,
                value,
                confidence: c.fields.confidence_of(field),
            })
        })
        .collect()
}

/// Highest confidence wins; ties go to the earliest chunk
fn merge_unique(observations: &[Observation<'_>]) -> FieldMerge {
    // Distinct values by normalized key, each with its best observation
    let mut groups: Vec<(String, &Observation<'_>, Vec<usize>)> = Vec::new();
    for obs in observations {
        let key = dedup_key(obs.value);
        match groups.iter_mut().find(|(k, _, _)| *k == key) {
            Some((_, best, chunks)) => {
                if obs.confidence > best.confidence {
                    *best = obs;
                }
                chunks.push(obs.chunk);
            }
            None => groups.push((key, obs, vec![obs.chunk])),
        }
    }

    let Some(winner) = (0..groups.len()).reduce(|a, b| {
        let (best_a, best_b) = (groups[a].1, groups[b].1);
        let beats = best_b.confidence > best_a.confidence
            || (best_b.confidence == best_a.confidence && best_b.chunk < best_a.chunk);
        if beats {
            b
        } else {
            a
        }
    }) else {
        return FieldMerge {
            value: Value::Null,
            provenance: Vec::new(),
            confidence: 0.0,
            conflicts: Some(Vec::new()),
            timeline: None,
        };
    };

    let mut conflicts: Vec<Conflict> = groups
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != winner)
        .map(|(_, (_, best, _))| Conflict {
            value: best.value.clone(),
            chunk_index: best.chunk,
            confidence: best.confidence.value(),
        })
        .collect();
    conflicts.sort_by_key(|c| c.chunk_index);

    let (_, best, chunks) = &groups[winner];
    FieldMerge {
        value: best.value.clone(),
        provenance: sorted_unique(chunks.iter().copied()),
        confidence: best.confidence.value(),
        conflicts: Some(conflicts),
        timeline: None,
    }
}

/// A retained list entry and the chunks that reported it
struct ListEntry {
    value: Value,
    key: String,
    chunks: BTreeSet<usize>,
}

impl ListEntry {
    fn absorbs(&self, key: &str, is_text: bool) -> bool {
        if self.key == key {
            return true;
        }
        is_text
            && self.value.is_string()
            && !key.is_empty()
            && !self.key.is_empty()
            && (self.key.contains(key) || key.contains(self.key.as_str()))
    }
}

/// Flatten, then dedup by normalized match or substring containment
fn merge_list(observations: &[Observation<'_>]) -> FieldMerge {
    let mut entries: Vec<ListEntry> = Vec::new();
    let mut chunk_confidence: BTreeMap<usize, Confidence> = BTreeMap::new();

    for obs in observations {
        chunk_confidence.insert(obs.chunk, obs.confidence);
        let items: Vec<&Value> = match obs.value {
            Value::Array(items) => items.iter().filter(|v| !v.is_null()).collect(),
            single => vec![single],
        };

        for item in items {
            let value = trimmed(item);
            let key = dedup_key(&value);
            let is_text = value.is_string();

            let Some(pos) = entries.iter().position(|e| e.absorbs(&key, is_text)) else {
                entries.push(ListEntry {
                    value,
                    key,
                    chunks: BTreeSet::from([obs.chunk]),
                });
                continue;
            };

            entries[pos].chunks.insert(obs.chunk);
            if key.len() > entries[pos].key.len() {
                // The superset string replaces the subset
                entries[pos].value = value;
                entries[pos].key = key;
                absorb_contained(&mut entries, pos);
            }
        }
    }

    let provenance = sorted_unique(entries.iter().flat_map(|e| e.chunks.iter().copied()));
    let confidence = Confidence::mean(
        provenance
            .iter()
            .filter_map(|chunk| chunk_confidence.get(chunk).copied()),
    )
    .value();

    FieldMerge {
        value: Value::Array(entries.into_iter().map(|e| e.value).collect()),
        provenance,
        confidence,
        conflicts: None,
        timeline: None,
    }
}

/// Fold every other entry contained in `entries[pos]` into it
fn absorb_contained(entries: &mut Vec<ListEntry>, pos: usize) {
    let key = entries[pos].key.clone();
    let mut absorbed = BTreeSet::new();
    let mut kept = Vec::with_capacity(entries.len());
    let mut target = 0;

    for (i, entry) in entries.drain(..).enumerate() {
        let contained = i != pos
            && entry.value.is_string()
            && !entry.key.is_empty()
            && key.contains(entry.key.as_str());
        if contained {
            absorbed.extend(entry.chunks);
        } else {
            if i == pos {
                target = kept.len();
            }
            kept.push(entry);
        }
    }

    kept[target].chunks.extend(absorbed);
    *entries = kept;
}

fn trimmed(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other.clone(),
    }
}

/// Case- and whitespace-insensitive comparison key
fn dedup_key(value: &Value) -> String {
    match value {
        Value::String(s) => s
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase(),
        other => other.to_string(),
    }
}

fn sorted_unique(chunks: impl IntoIterator<Item = usize>) -> Vec<usize> {
    chunks.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::types::ExtractedFields;
    use fieldwise_domain::TokenUsage;
    use proptest::prelude::*;

    fn observation() -> impl Strategy<Value = (String, Vec<String>, f64)> {
        (
            "[A-Za-z ]{0,8}",
            prop::collection::vec("[A-Za-z ]{0,8}", 0..4),
            0.0f64..=1.0,
        )
    }

    proptest! {
        /// Property: merging the same input twice yields identical records
        #[test]
        fn test_merge_idempotent(obs in prop::collection::vec(observation(), 0..6)) {
            let specs = vec![
                FieldSpec::new("name", "", FieldType::String).unique(),
                FieldSpec::new("tags", "", FieldType::String),
            ];
            let chunks: Vec<NormalizedFields> = obs
                .iter()
                .enumerate()
                .map(|(i, (name, tags, conf))| {
                    let mut values = BTreeMap::new();
                    values.insert("name".to_string(), Value::String(name.clone()));
                    values.insert("tags".to_string(), Value::from(tags.clone()));
                    let mut confidence = BTreeMap::new();
                    confidence.insert("name".to_string(), Confidence::new(*conf));
                    confidence.insert("tags".to_string(), Confidence::new(*conf));
                    NormalizedFields {
                        fields: ExtractedFields {
                            chunk_index: i,
                            values,
                            confidence,
                            issues: Vec::new(),
                            token_usage: TokenUsage::default(),
                        },
                        timeline: None,
                    }
                })
                .collect();

            let merger = Merger::new(&specs, &PipelineOptions::default());
            let a = merger.merge(&chunks);
            let b = merger.merge(&chunks);
            prop_assert_eq!(&a, &b);

            // Confidence stays in range and provenance points at real chunks
            for (field, conf) in &a.confidence {
                prop_assert!((0.0..=1.0).contains(conf), "{} out of range", field);
            }
            for chunks_for_field in a.provenance.values() {
                prop_assert!(chunks_for_field.iter().all(|c| *c < chunks.len()));
            }
        }
    }
}
