//! Response merging: amend cached frames with fresh ones, trim, evict
//!
//! The merger owns the only write path of merged content into the
//! [`CacheStore`]. For every target that received frames it:
//!
//! 1. matches each new frame to a cached frame by [`FieldIdentity`]
//! 2. amends matches (new data wins over its own time span), appends the rest
//! 3. trims every frame to the requested window and evicts empty ones
//! 4. stores the survivors and returns owned copies of them

use super::planner::PlanMetadata;
use super::store::{CacheEntry, CacheStore};
use crate::error::{Error, Result};
use crate::frame::{Field, FieldIdentity, Frame};
use crate::types::{QueryRequest, TargetIdentity, TimeRange};

/// Counters describing one merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Frames for series not seen before
    pub frames_appended: u64,
    /// Frames merged into a cached series
    pub frames_amended: u64,
    /// Frames trimmed to zero rows and dropped
    pub frames_evicted: u64,
    /// Rows received from the transport
    pub rows_fetched: u64,
    /// Rows returned to the caller
    pub rows_returned: u64,
}

/// Result of [`ResponseMerger::merge`]
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Frames covering the original window
    pub frames: Vec<Frame>,
    /// What the merge did
    pub stats: MergeStats,
}

/// Stitches raw transport frames onto cached frames
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseMerger;

impl ResponseMerger {
    /// Create a merger
    pub fn new() -> Self {
        Self
    }

    /// Merge `raw_frames` for `original` into `store` and return the full result
    ///
    /// `original` must be the request as the caller issued it, not the
    /// narrowed one: its window bounds the trim and becomes the entries'
    /// `prev_to`. Targets that received no frames keep their entry as is.
    ///
    /// A target whose entry failed to merge is dropped from the store so
    /// its next plan is full. So is a narrowed target whose entry vanished
    /// since planning; its frames are returned uncached.
    pub fn merge(
        &self,
        original: &QueryRequest,
        metadata: &PlanMetadata,
        raw_frames: Vec<Frame>,
        store: &mut CacheStore,
    ) -> Result<MergeOutcome> {
        let mut stats = MergeStats {
            rows_fetched: raw_frames.iter().map(|f| f.len() as u64).sum(),
            ..MergeStats::default()
        };

        if !metadata.should_cache {
            stats.rows_returned = stats.rows_fetched;
            return Ok(MergeOutcome {
                frames: raw_frames,
                stats,
            });
        }

        let mut groups: Vec<(TargetIdentity, Vec<Frame>)> = Vec::new();
        let mut uncached = Vec::new();
        for frame in raw_frames {
            let identity = original.target_identity(&frame.ref_id);
            if !metadata.target_signatures.contains_key(&identity) {
                tracing::warn!(
                    target_identity = %identity,
                    "Frame for unplanned target, returning uncached"
                );
                uncached.push(frame);
                continue;
            }
            match groups.iter_mut().find(|(id, _)| *id == identity) {
                Some((_, frames)) => frames.push(frame),
                None => groups.push((identity, vec![frame])),
            }
        }

        let mut output = Vec::new();
        for (identity, new_frames) in groups {
            let signature = metadata.target_signatures[&identity].clone();
            let cached = store.get(&identity).filter(|e| e.signature == signature);

            if let Some(baseline) = metadata.baselines.get(&identity) {
                if !cached.is_some_and(|e| e.prev_to >= *baseline) {
                    tracing::warn!(
                        target_identity = %identity,
                        baseline,
                        "Cache entry lost since planning, returning uncached"
                    );
                    store.remove(&identity);
                    let frames =
                        merge_target(&identity, None, new_frames, original.range, &mut stats)?;
                    output.extend(frames);
                    continue;
                }
            }

            let merged = merge_target(&identity, cached, new_frames, original.range, &mut stats);
            let frames = match merged {
                Ok(frames) => frames,
                Err(e) => {
                    store.remove(&identity);
                    return Err(e);
                }
            };

            output.extend(frames.iter().cloned());
            store.insert(
                identity,
                CacheEntry {
                    signature,
                    frames,
                    prev_to: original.range.to,
                },
            );
        }
        output.extend(uncached);

        stats.rows_returned = output.iter().map(|f| f.len() as u64).sum();
        Ok(MergeOutcome {
            frames: output,
            stats,
        })
    }
}

/// Merge one target's new frames onto its cached ones
fn merge_target(
    identity: &TargetIdentity,
    cached: Option<&CacheEntry>,
    new_frames: Vec<Frame>,
    window: TimeRange,
    stats: &mut MergeStats,
) -> Result<Vec<Frame>> {
    let mut frames: Vec<Frame> = cached.map(|e| e.frames.clone()).unwrap_or_default();
    let mut identities: Vec<FieldIdentity> = frames.iter().map(Frame::identity).collect();

    for frame in new_frames {
        check_rows(identity, &frame)?;
        let field = frame.identity();
        match identities.iter().position(|id| *id == field) {
            Some(idx) => {
                frames[idx] = amend_frame(identity, &frames[idx], &frame)?;
                stats.frames_amended += 1;
            }
            None => {
                identities.push(field);
                frames.push(frame);
                stats.frames_appended += 1;
            }
        }
    }

    // frames is exclusively owned here; trimming in place is safe
    for frame in &mut frames {
        trim_frame(frame, window);
    }
    let before = frames.len();
    frames.retain(|frame| {
        if frame.is_empty() {
            tracing::trace!(
                target_identity = %identity,
                series = %frame.identity(),
                "Evicted series outside window"
            );
        }
        !frame.is_empty()
    });
    stats.frames_evicted += (before - frames.len()) as u64;

    Ok(frames)
}

/// Amend `prev` with `next`, returning the combined frame
///
/// `next` is authoritative over `[next.first, next.last]`: cached rows in
/// that span are replaced, rows outside it are kept. Both time columns must
/// be ascending. Frames must have the same column count and types.
pub fn amend_frame(target: &TargetIdentity, prev: &Frame, next: &Frame) -> Result<Frame> {
    check_shape(target, prev, next)?;

    let (first, last) = match (next.time.first(), next.time.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Ok(prev.clone()),
    };

    let head = prev.time.partition_point(|t| *t < first);
    let tail = prev.time.partition_point(|t| *t <= last).max(head);

    let mut time = Vec::with_capacity(head + next.time.len() + prev.time.len() - tail);
    time.extend_from_slice(&prev.time[..head]);
    time.extend_from_slice(&next.time);
    time.extend_from_slice(&prev.time[tail..]);

    let mut fields = Vec::with_capacity(next.fields.len());
    for (old, new) in prev.fields.iter().zip(&next.fields) {
        let values = old
            .values
            .spliced(head, &new.values, tail)
            .ok_or_else(|| shape_error(target, next, "column type changed during amend"))?;
        fields.push(Field {
            name: new.name.clone(),
            labels: new.labels.clone(),
            values,
        });
    }

    Ok(Frame {
        ref_id: next.ref_id.clone(),
        name: next.name.clone().or_else(|| prev.name.clone()),
        time,
        fields,
    })
}

/// Drop rows outside `window` (inclusive on both ends)
pub fn trim_frame(frame: &mut Frame, window: TimeRange) {
    let start = frame.time.partition_point(|t| *t < window.from);
    let end = frame.time.partition_point(|t| *t <= window.to).max(start);
    if start == 0 && end == frame.time.len() {
        return;
    }

    frame.time.truncate(end);
    frame.time.drain(..start);
    for field in &mut frame.fields {
        field.values.retain_rows(start..end);
    }
}

fn check_shape(target: &TargetIdentity, prev: &Frame, next: &Frame) -> Result<()> {
    if prev.fields.len() != next.fields.len() {
        return Err(shape_error(
            target,
            next,
            &format!(
                "column count {} != {}",
                prev.fields.len(),
                next.fields.len()
            ),
        ));
    }

    for (idx, (old, new)) in prev.fields.iter().zip(&next.fields).enumerate() {
        let (old_type, new_type) = (old.values.field_type(), new.values.field_type());
        if old_type != new_type {
            return Err(shape_error(
                target,
                next,
                &format!(
                    "column {} type {} != {}",
                    idx,
                    old_type.name(),
                    new_type.name()
                ),
            ));
        }
    }

    check_rows(target, prev)?;
    check_rows(target, next)
}

/// Every value column must be as long as the time column
fn check_rows(target: &TargetIdentity, frame: &Frame) -> Result<()> {
    match frame.fields.iter().find(|f| f.values.len() != frame.len()) {
        Some(field) => Err(shape_error(
            target,
            frame,
            &format!(
                "column '{}' has {} rows, time column has {}",
                field.name,
                field.values.len(),
                frame.len()
            ),
        )),
        None => Ok(()),
    }
}

fn shape_error(target: &TargetIdentity, frame: &Frame, detail: &str) -> Error {
    tracing::warn!(target_identity = %target, detail, "Frame shape mismatch");
    Error::ShapeMismatch {
        target: target.to_string(),
        field: frame.identity().to_string(),
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Field, FieldValues, Labels};
    use crate::types::{RawTimeRange, Target};
    use std::collections::HashMap;

    fn labels(le: &str) -> Labels {
        let mut labels = Labels::new();
        labels.insert("le".to_string(), le.to_string());
        labels
    }

    fn series(le: &str, points: &[(i64, f64)]) -> Frame {
        Frame::new(
            "A",
            points.iter().map(|(t, _)| *t).collect(),
            vec![Field::number(
                "value",
                labels(le),
                points.iter().map(|(_, v)| Some(*v)).collect(),
            )],
        )
    }

    fn points(frame: &Frame) -> Vec<(i64, f64)> {
        match &frame.fields[0].values {
            FieldValues::Number(values) => frame
                .time
                .iter()
                .zip(values)
                .map(|(t, v)| (*t, v.unwrap_or(f64::NAN)))
                .collect(),
            other => panic!("unexpected column {:?}", other),
        }
    }

    fn request(from: i64, to: i64) -> QueryRequest {
        QueryRequest {
            request_id: "req".to_string(),
            dashboard_uid: "dash".to_string(),
            panel_id: 1,
            range: TimeRange::new(from, to),
            raw_range: RawTimeRange::new("now-1h", "now"),
            interval_ms: 1,
            interval: "1ms".to_string(),
            targets: vec![Target::new("A", "up")],
        }
    }

    fn metadata(req: &QueryRequest, signature: &str) -> PlanMetadata {
        let mut target_signatures = HashMap::new();
        target_signatures.insert(req.target_identity("A"), signature.to_string());
        PlanMetadata {
            target_signatures,
            should_cache: true,
            ..PlanMetadata::default()
        }
    }

    #[test]
    fn test_refresh_amends_overlap_and_appends_tail() {
        let merger = ResponseMerger::new();
        let mut store = CacheStore::new();

        let first = request(0, 100);
        let out = merger
            .merge(
                &first,
                &metadata(&first, "S1"),
                vec![series("1", &[(10, 1.0), (50, 5.0), (90, 9.0)])],
                &mut store,
            )
            .unwrap();
        assert_eq!(out.frames.len(), 1);
        assert_eq!(store.get(&first.target_identity("A")).unwrap().prev_to, 100);

        let second = request(0, 150);
        let out = merger
            .merge(
                &second,
                &metadata(&second, "S1"),
                vec![series("1", &[(90, 9.5), (130, 13.0)])],
                &mut store,
            )
            .unwrap();

        assert_eq!(
            points(&out.frames[0]),
            vec![(10, 1.0), (50, 5.0), (90, 9.5), (130, 13.0)]
        );
        assert_eq!(out.stats.frames_amended, 1);
        assert_eq!(store.get(&second.target_identity("A")).unwrap().prev_to, 150);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let merger = ResponseMerger::new();
        let mut store = CacheStore::new();
        let req = request(0, 100);
        let meta = metadata(&req, "S1");
        let frames = vec![series("1", &[(10, 1.0), (50, 5.0)]), series("2", &[(10, 2.0)])];

        let once = merger.merge(&req, &meta, frames.clone(), &mut store).unwrap();
        let twice = merger.merge(&req, &meta, frames, &mut store).unwrap();
        assert_eq!(once.frames, twice.frames);

        for frame in &twice.frames {
            let mut deduped = frame.time.clone();
            deduped.dedup();
            assert_eq!(deduped, frame.time);
        }
    }

    #[test]
    fn test_trim_bounds_and_eviction() {
        let merger = ResponseMerger::new();
        let mut store = CacheStore::new();

        let first = request(0, 100);
        merger
            .merge(
                &first,
                &metadata(&first, "S1"),
                vec![
                    series("1", &[(10, 1.0), (60, 6.0), (100, 10.0)]),
                    series("2", &[(20, 2.0)]),
                ],
                &mut store,
            )
            .unwrap();

        let second = request(50, 150);
        let out = merger
            .merge(
                &second,
                &metadata(&second, "S1"),
                vec![series("1", &[(100, 10.0), (150, 15.0)])],
                &mut store,
            )
            .unwrap();

        assert_eq!(out.frames.len(), 1);
        assert_eq!(out.stats.frames_evicted, 1);
        assert_eq!(points(&out.frames[0]), vec![(60, 6.0), (100, 10.0), (150, 15.0)]);
        for frame in &out.frames {
            assert!(frame.time.iter().all(|t| second.range.contains(*t)));
        }

        let entry = store.get(&second.target_identity("A")).unwrap();
        assert_eq!(entry.frames.len(), 1);
        assert_eq!(entry.frames[0].fields[0].labels, labels("1"));
    }

    #[test]
    fn test_new_series_is_appended() {
        let merger = ResponseMerger::new();
        let mut store = CacheStore::new();

        let first = request(0, 100);
        merger
            .merge(&first, &metadata(&first, "S1"), vec![series("1", &[(10, 1.0)])], &mut store)
            .unwrap();

        let second = request(0, 150);
        let out = merger
            .merge(&second, &metadata(&second, "S1"), vec![series("5", &[(140, 4.0)])], &mut store)
            .unwrap();

        assert_eq!(out.frames.len(), 2);
        assert_eq!(out.stats.frames_appended, 1);
        assert_eq!(points(&out.frames[0]), vec![(10, 1.0)]);
        assert_eq!(points(&out.frames[1]), vec![(140, 4.0)]);
    }

    #[test]
    fn test_bypass_returns_raw_frames_and_leaves_store() {
        let merger = ResponseMerger::new();
        let mut store = CacheStore::new();
        let req = request(0, 100);
        let frames = vec![series("1", &[(500, 1.0)])];

        let out = merger
            .merge(&req, &PlanMetadata::default(), frames.clone(), &mut store)
            .unwrap();
        assert_eq!(out.frames, frames);
        assert!(store.is_empty());
    }

    #[test]
    fn test_stale_signature_entry_is_not_merged() {
        let merger = ResponseMerger::new();
        let mut store = CacheStore::new();
        let req = request(0, 100);

        merger
            .merge(&req, &metadata(&req, "S1"), vec![series("1", &[(10, 1.0)])], &mut store)
            .unwrap();
        let out = merger
            .merge(&req, &metadata(&req, "S2"), vec![series("1", &[(90, 9.0)])], &mut store)
            .unwrap();

        assert_eq!(points(&out.frames[0]), vec![(90, 9.0)]);
        assert_eq!(store.get(&req.target_identity("A")).unwrap().signature, "S2");
    }

    #[test]
    fn test_unplanned_frames_pass_through_uncached() {
        let merger = ResponseMerger::new();
        let mut store = CacheStore::new();
        let req = request(0, 100);
        let mut stray = series("1", &[(10, 1.0)]);
        stray.ref_id = "Z".to_string();

        let out = merger
            .merge(&req, &metadata(&req, "S1"), vec![stray.clone()], &mut store)
            .unwrap();
        assert_eq!(out.frames, vec![stray]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_shape_mismatch_fails_and_drops_entry() {
        let merger = ResponseMerger::new();
        let mut store = CacheStore::new();
        let req = request(0, 100);
        merger
            .merge(&req, &metadata(&req, "S1"), vec![series("1", &[(10, 1.0)])], &mut store)
            .unwrap();

        let mut wider = series("1", &[(90, 9.0)]);
        wider.fields.push(Field {
            name: "exemplar".to_string(),
            labels: Labels::new(),
            values: FieldValues::String(vec![Some("trace".to_string())]),
        });

        let err = merger
            .merge(&req, &metadata(&req, "S1"), vec![wider], &mut store)
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert!(err.to_string().contains("column count 1 != 2"));
        assert!(store.get(&req.target_identity("A")).is_none());
    }

    #[test]
    fn test_ragged_new_series_is_rejected() {
        let merger = ResponseMerger::new();
        let mut store = CacheStore::new();
        let req = request(0, 100);
        let mut ragged = series("1", &[(10, 1.0), (50, 5.0), (90, 9.0)]);
        ragged.time.pop();

        let err = merger
            .merge(&req, &metadata(&req, "S1"), vec![ragged], &mut store)
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert!(err.to_string().contains("has 3 rows, time column has 2"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_narrowed_merge_without_baseline_is_not_stored() {
        let merger = ResponseMerger::new();
        let mut store = CacheStore::new();
        let req = request(0, 150);
        let mut meta = metadata(&req, "S1");
        meta.baselines.insert(req.target_identity("A"), 100);

        // entry cleared between planning and merging
        let out = merger
            .merge(&req, &meta, vec![series("1", &[(90, 9.0), (130, 13.0)])], &mut store)
            .unwrap();
        assert_eq!(points(&out.frames[0]), vec![(90, 9.0), (130, 13.0)]);
        assert!(store.is_empty());

        // entry rewound below the baseline
        let seeded = request(0, 80);
        merger
            .merge(&seeded, &metadata(&seeded, "S1"), vec![series("1", &[(10, 1.0)])], &mut store)
            .unwrap();
        merger
            .merge(&req, &meta, vec![series("1", &[(90, 9.0)])], &mut store)
            .unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_narrowed_merge_with_baseline_is_stored() {
        let merger = ResponseMerger::new();
        let mut store = CacheStore::new();
        let first = request(0, 100);
        merger
            .merge(&first, &metadata(&first, "S1"), vec![series("1", &[(10, 1.0)])], &mut store)
            .unwrap();

        let second = request(0, 150);
        let mut meta = metadata(&second, "S1");
        meta.baselines.insert(second.target_identity("A"), 100);
        let frames = vec![series("1", &[(90, 9.0), (130, 13.0)])];

        let once = merger.merge(&second, &meta, frames.clone(), &mut store).unwrap();
        assert_eq!(points(&once.frames[0]), vec![(10, 1.0), (90, 9.0), (130, 13.0)]);
        assert_eq!(store.get(&second.target_identity("A")).unwrap().prev_to, 150);

        let twice = merger.merge(&second, &meta, frames, &mut store).unwrap();
        assert_eq!(once.frames, twice.frames);
    }

    #[test]
    fn test_amend_cases() {
        let id = TargetIdentity::new("dash", 1, "A");
        let prev = series("1", &[(10, 1.0), (20, 2.0), (30, 3.0)]);

        // prepend without overlap
        let out = amend_frame(&id, &prev, &series("1", &[(0, 0.0)])).unwrap();
        assert_eq!(points(&out), vec![(0, 0.0), (10, 1.0), (20, 2.0), (30, 3.0)]);

        // full replace
        let out = amend_frame(&id, &prev, &series("1", &[(5, 0.5), (35, 3.5)])).unwrap();
        assert_eq!(points(&out), vec![(5, 0.5), (35, 3.5)]);

        // interior replace keeps both edges
        let out = amend_frame(&id, &prev, &series("1", &[(20, 2.5)])).unwrap();
        assert_eq!(points(&out), vec![(10, 1.0), (20, 2.5), (30, 3.0)]);

        // empty next changes nothing
        let out = amend_frame(&id, &prev, &series("1", &[])).unwrap();
        assert_eq!(out, prev);
    }

    #[test]
    fn test_amend_rejects_ragged_columns() {
        let id = TargetIdentity::new("dash", 1, "A");
        let prev = series("1", &[(10, 1.0)]);
        let mut ragged = series("1", &[(20, 2.0), (30, 3.0)]);
        ragged.time.pop();
        let err = amend_frame(&id, &prev, &ragged).unwrap_err();
        assert!(err.to_string().contains("time column has 1"));
    }

    #[test]
    fn test_trim_frame() {
        let mut frame = series("1", &[(10, 1.0), (20, 2.0), (30, 3.0), (40, 4.0)]);
        trim_frame(&mut frame, TimeRange::new(20, 30));
        assert_eq!(points(&frame), vec![(20, 2.0), (30, 3.0)]);

        trim_frame(&mut frame, TimeRange::new(100, 200));
        assert!(frame.is_empty());
        assert!(frame.fields[0].values.is_empty());
    }
}
