//! Track table ingest.
//!
//! Turns a tracked-particle CSV (one row per particle per frame) into
//! per-track intensity traces that are safe to fit.
//!
//! - **Strict schema** for the three required columns (exit code 2)
//! - **Row-level validation** (skip bad rows, but report what happened)
//! - **Deterministic order**: tracks in order of first appearance, samples by frame

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;

use crate::domain::{ColumnMap, Track, TrackFilter};
use crate::error::AppError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub track: Option<String>,
    pub message: String,
}

/// Ingest output: tracks + row errors + counters.
#[derive(Debug, Clone)]
pub struct IngestedTracks {
    pub tracks: Vec<Track>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

/// Load a track table from disk.
pub fn load_tracks(path: &Path, columns: &ColumnMap) -> Result<IngestedTracks, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;
    read_tracks(file, columns)
}

/// Read a track table from any reader.
pub fn read_tracks<R: Read>(input: R, columns: &ColumnMap) -> Result<IngestedTracks, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let track_idx = require_column(&header_map, &columns.track)?;
    let frame_idx = require_column(&header_map, &columns.frame)?;
    let intensity_idx = require_column(&header_map, &columns.intensity)?;

    let mut order: HashMap<String, usize> = HashMap::new();
    let mut samples: Vec<(String, Vec<(i64, f64)>)> = Vec::new();
    let mut seen_frames: Vec<HashSet<i64>> = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;
    let mut rows_used = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2: records start after the header line, lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    track: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let parsed = parse_row(&record, track_idx, frame_idx, intensity_idx, columns);
        let (track, frame, intensity) = match parsed {
            Ok(row) => row,
            Err((track, message)) => {
                row_errors.push(RowError { line, track, message });
                continue;
            }
        };

        let slot = *order.entry(track.clone()).or_insert_with(|| {
            samples.push((track.clone(), Vec::new()));
            seen_frames.push(HashSet::new());
            samples.len() - 1
        });
        if !seen_frames[slot].insert(frame) {
            row_errors.push(RowError {
                line,
                track: Some(track),
                message: format!("Duplicate frame {frame}; keeping the first row"),
            });
            continue;
        }
        samples[slot].1.push((frame, intensity));
        rows_used += 1;
    }

    let tracks = samples
        .into_iter()
        .map(|(id, mut rows)| {
            rows.sort_by_key(|&(frame, _)| frame);
            let (frames, intensity) = rows.into_iter().unzip();
            Track { id, frames, intensity }
        })
        .collect();

    Ok(IngestedTracks {
        tracks,
        row_errors,
        rows_read,
        rows_used,
    })
}

/// Apply a track filter.
///
/// A selected track id takes precedence over the length window; an unknown
/// id is an input error.
pub fn filter_tracks(tracks: Vec<Track>, filter: &TrackFilter) -> Result<Vec<Track>, AppError> {
    if let Some(id) = &filter.track {
        return tracks
            .into_iter()
            .find(|t| &t.id == id)
            .map(|t| vec![t])
            .ok_or_else(|| AppError::new(2, format!("Track '{id}' not found in input.")));
    }

    Ok(tracks
        .into_iter()
        .filter(|t| t.len() >= filter.min_len && filter.max_len.is_none_or(|max| t.len() <= max))
        .collect())
}

type ParsedRow = (String, i64, f64);

fn parse_row(
    record: &StringRecord,
    track_idx: usize,
    frame_idx: usize,
    intensity_idx: usize,
    columns: &ColumnMap,
) -> Result<ParsedRow, (Option<String>, String)> {
    let track = get_required(record, track_idx, &columns.track).map_err(|m| (None, m))?;
    let track = normalize_track_id(track);

    let frame = get_required(record, frame_idx, &columns.frame)
        .and_then(parse_frame)
        .map_err(|m| (Some(track.clone()), m))?;

    let intensity = get_required(record, intensity_idx, &columns.intensity)
        .and_then(|s| {
            s.parse::<f64>()
                .map_err(|_| format!("Invalid intensity '{s}'"))
                .and_then(|v| {
                    if v.is_finite() {
                        Ok(v)
                    } else {
                        Err(format!("Non-finite intensity '{s}'"))
                    }
                })
        })
        .map_err(|m| (Some(track.clone()), m))?;

    Ok((track, frame, intensity))
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    let mut map = HashMap::new();
    for (idx, name) in headers.iter().enumerate() {
        // First occurrence wins for repeated header names.
        map.entry(normalize_header_name(name)).or_insert(idx);
    }
    map
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn require_column(header_map: &HashMap<String, usize>, name: &str) -> Result<usize, AppError> {
    header_map
        .get(&normalize_header_name(name))
        .copied()
        .ok_or_else(|| AppError::new(2, format!("Missing required column: `{name}`")))
}

fn get_required<'a>(record: &'a StringRecord, idx: usize, name: &str) -> Result<&'a str, String> {
    record
        .get(idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required value: `{name}`"))
}

/// Trackers that write ids through float columns emit `12.0`; treat it as `12`.
fn normalize_track_id(s: &str) -> String {
    match s.strip_suffix(".0") {
        Some(head) if !head.is_empty() && head.bytes().all(|b| b.is_ascii_digit() || b == b'-') => {
            head.to_string()
        }
        _ => s.to_string(),
    }
}

fn parse_frame(s: &str) -> Result<i64, String> {
    if let Ok(v) = s.parse::<i64>() {
        return Ok(v);
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(v as i64),
        _ => Err(format!("Invalid frame '{s}'; expected an integer")),
    }
}
