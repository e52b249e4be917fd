//! Calendar-based step splitting: turns a single long-running simulation
//! step into a chain of shorter, restartable chunks aligned to calendar
//! month boundaries.
//!
//! Grounded directly in the reference splitter's month-slicing rule: every
//! interior boundary falls on the first of a month, while the very first and
//! very last slice are clipped to whatever start/end dates were actually
//! requested.

use chrono::{Datelike, NaiveDate};
use simwork_kernel::Step;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SplitError {
    #[error("end_date must be strictly after start_date")]
    NonPositiveSpan,
}

/// Produce the calendar slices covering `[start, end)`, with interior
/// boundaries on the first of each month.
///
/// `start` and `end` are always the first and last boundary, respectively,
/// even when neither lands on a month boundary itself — only interior
/// splits are month-aligned.
pub fn time_slices(start: NaiveDate, end: NaiveDate) -> Result<Vec<(NaiveDate, NaiveDate)>, SplitError> {
    if end <= start {
        return Err(SplitError::NonPositiveSpan);
    }

    let mut boundaries = vec![start];
    let mut cursor = first_of_next_month(start);
    while cursor < end {
        boundaries.push(cursor);
        cursor = first_of_next_month(cursor);
    }
    boundaries.push(end);

    Ok(boundaries.windows(2).map(|w| (w[0], w[1])).collect())
}

fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = (date.year(), date.month());
    if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("year/month arithmetic stays within NaiveDate's representable range")
}

/// A per-application splitting strategy. Kept as a trait (rather than
/// hardcoding `time_slices` everywhere) so an application whose simulator
/// checkpoints on a different cadence can plug in its own rule without
/// touching the registry's callers.
pub trait StepSplitter: Send + Sync {
    fn split(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<(NaiveDate, NaiveDate)>, SplitError>;
}

/// The reference splitter: plain calendar-month slicing, as used by the
/// coupled ocean/biogeochemistry application.
pub struct RomsMarblSplitter;

impl StepSplitter for RomsMarblSplitter {
    fn split(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<(NaiveDate, NaiveDate)>, SplitError> {
        time_slices(start, end)
    }
}

/// Application-tag -> splitter registry. Returns `None` for an application
/// with no registered splitter (e.g. a plain `sleep` smoke-test step), which
/// callers treat as "run this step as a single unsplit task".
pub fn splitter_for(application: &str) -> Option<Box<dyn StepSplitter>> {
    match application {
        "roms_marbl" => Some(Box::new(RomsMarblSplitter)),
        _ => None,
    }
}

/// The nested path the reference blueprint model stores output-directory and
/// initial-conditions-location fields under (`runtime_params.output_dir`,
/// `initial_conditions.location`), flattened to dotted keys since
/// `blueprint_overrides`/`workflow_overrides` are plain `key -> value` maps
/// rather than nested documents.
pub const OUTPUT_DIR_KEY: &str = "runtime_params.output_dir";
pub const INITIAL_CONDITIONS_LOCATION_KEY: &str = "initial_conditions.location";

/// Name of the expected restart artifact under a completed slice's output
/// directory — matches the reference adapter's
/// `runtime_params.output_dir / "initial_conditions"` convention.
const RESTART_FILE_NAME: &str = "initial_conditions";

/// Collapse whitespace and lowercase, matching the slug used for step log
/// file names elsewhere in the engine.
fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

fn format_slice_boundary(date: NaiveDate) -> String {
    format!("{:04}:{:02}:{:02}", date.year(), date.month(), date.day())
}

/// Expand `step` into a chain of sub-steps, one per calendar slice.
///
/// Sub-step naming, dependency chaining, and carried-forward state all
/// follow the reference splitter:
/// - name is `"{step.name}_{sliceStart:Y:M:D}-{sliceEnd:Y:M:D}"`;
/// - the first sub-step's `depends_on` is `step`'s own `depends_on`; every
///   later sub-step depends on *only* its immediate predecessor (not the
///   original's dependencies too — the reference transform overwrites
///   `depends_on` with `[step_name]` on each iteration rather than union);
/// - each sub-step's `output_dir` override is the original step's output
///   root plus a slug of the sub-step's own name;
/// - every sub-step after the first carries an `initial_conditions` override
///   pointing at the previous sub-step's output directory, joined with the
///   expected restart artifact name.
///
/// A step whose application has no registered splitter is returned
/// unchanged, as the sole element of a one-item vec.
pub fn expand_step(
    step: &Step,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<Step>, SplitError> {
    let Some(splitter) = splitter_for(&step.application) else {
        return Ok(vec![step.clone()]);
    };

    let output_root = step
        .blueprint_overrides
        .get(OUTPUT_DIR_KEY)
        .cloned()
        .unwrap_or_default();

    let slices = splitter.split(start, end)?;
    let mut chunks = Vec::with_capacity(slices.len());
    let mut previous: Option<(String, String)> = None; // (name, output_dir)

    for (slice_start, slice_end) in slices {
        let name = format!(
            "{}_{}-{}",
            step.name,
            format_slice_boundary(slice_start),
            format_slice_boundary(slice_end)
        );
        let output_dir = format!("{output_root}/{}", slugify(&name));

        let mut chunk = step.clone();
        chunk.name = name.clone();
        chunk.blueprint_overrides.insert(
            "runtime_params.start_date".into(),
            slice_start.to_string(),
        );
        chunk.blueprint_overrides.insert("runtime_params.end_date".into(), slice_end.to_string());
        chunk.blueprint_overrides.insert(OUTPUT_DIR_KEY.into(), output_dir.clone());

        chunk.depends_on = match &previous {
            None => step.depends_on.clone(),
            Some((prev_name, _)) => [prev_name.clone()].into_iter().collect(),
        };

        if let Some((_, prev_output_dir)) = &previous {
            chunk.blueprint_overrides.insert(
                INITIAL_CONDITIONS_LOCATION_KEY.into(),
                format!("{prev_output_dir}/{RESTART_FILE_NAME}"),
            );
        }

        previous = Some((name, output_dir));
        chunks.push(chunk);
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn full_year_produces_twelve_month_slices() {
        let start = date(2020, 1, 1);
        let end = date(2021, 1, 1);
        let slices = time_slices(start, end).unwrap();
        assert_eq!(slices.len(), 12);
        assert_eq!(slices.first().unwrap().0, start);
        assert_eq!(slices.last().unwrap().1, end);
        // interior boundaries all land on the first of a month
        for (_, slice_end) in &slices[..slices.len() - 1] {
            assert_eq!(slice_end.day(), 1);
        }
    }

    #[test]
    fn sub_month_span_is_a_single_clipped_slice() {
        let start = date(2020, 3, 10);
        let end = date(2020, 3, 20);
        let slices = time_slices(start, end).unwrap();
        assert_eq!(slices, vec![(start, end)]);
    }

    #[test]
    fn span_crossing_december_rolls_over_the_year() {
        let start = date(2020, 11, 15);
        let end = date(2021, 2, 10);
        let slices = time_slices(start, end).unwrap();
        assert_eq!(
            slices,
            vec![
                (date(2020, 11, 15), date(2020, 12, 1)),
                (date(2020, 12, 1), date(2021, 1, 1)),
                (date(2021, 1, 1), date(2021, 2, 10)),
            ]
        );
    }

    #[test]
    fn non_positive_span_is_rejected() {
        let d = date(2020, 1, 1);
        assert!(matches!(time_slices(d, d), Err(SplitError::NonPositiveSpan)));
        assert!(matches!(
            time_slices(date(2020, 2, 1), date(2020, 1, 1)),
            Err(SplitError::NonPositiveSpan)
        ));
    }

    #[test]
    fn registry_resolves_known_application_and_rejects_unknown() {
        assert!(splitter_for("roms_marbl").is_some());
        assert!(splitter_for("sleep").is_none());
        assert!(splitter_for("nonexistent").is_none());
    }

    #[test]
    fn expand_step_names_chunks_from_slice_boundaries() {
        let step = Step::new("ocean-run", "roms_marbl", "b.yaml").unwrap();
        let chunks = expand_step(&step, date(2020, 1, 1), date(2020, 3, 1)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].name, "ocean-run_2020:01:01-2020:02:01");
        assert_eq!(chunks[1].name, "ocean-run_2020:02:01-2020:03:01");
        assert!(chunks[1].depends_on.contains("ocean-run_2020:01:01-2020:02:01"));
        assert!(chunks[0].depends_on.is_empty());
        assert_eq!(
            chunks[0].blueprint_overrides.get("runtime_params.start_date").map(String::as_str),
            Some("2020-01-01")
        );
    }

    #[test]
    fn expand_step_passes_through_unsplittable_applications() {
        let step = Step::new("smoke", "sleep", "b.yaml").unwrap();
        let chunks = expand_step(&step, date(2020, 1, 1), date(2020, 3, 1)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].name, "smoke");
    }

    #[test]
    fn expand_step_preserves_existing_dependencies_on_the_first_chunk_only() {
        let step = Step::new("ocean-run", "roms_marbl", "b.yaml")
            .unwrap()
            .depends_on(["preprocess"]);
        let chunks = expand_step(&step, date(2020, 1, 1), date(2020, 3, 1)).unwrap();
        assert!(chunks[0].depends_on.contains("preprocess"));
        assert_eq!(chunks[1].depends_on.len(), 1);
        assert!(chunks[1].depends_on.contains("ocean-run_2020:01:01-2020:02:01"));
        assert!(!chunks[1].depends_on.contains("preprocess"));
    }

    #[test]
    fn expand_step_derives_output_dir_from_original_root_plus_slug() {
        let mut step = Step::new("ocean-run", "roms_marbl", "b.yaml").unwrap();
        step.blueprint_overrides
            .insert(OUTPUT_DIR_KEY.into(), "/scratch/ocean-run".into());
        let chunks = expand_step(&step, date(2020, 1, 1), date(2020, 3, 1)).unwrap();
        assert_eq!(
            chunks[0].blueprint_overrides.get(OUTPUT_DIR_KEY).unwrap(),
            "/scratch/ocean-run/ocean-run_2020:01:01-2020:02:01"
        );
        assert_eq!(
            chunks[1].blueprint_overrides.get(OUTPUT_DIR_KEY).unwrap(),
            "/scratch/ocean-run/ocean-run_2020:02:01-2020:03:01"
        );
    }

    #[test]
    fn expand_step_points_initial_conditions_at_previous_output_dir() {
        let mut step = Step::new("ocean-run", "roms_marbl", "b.yaml").unwrap();
        step.blueprint_overrides
            .insert(OUTPUT_DIR_KEY.into(), "/scratch/ocean-run".into());
        let chunks = expand_step(&step, date(2024, 1, 15), date(2024, 3, 10)).unwrap();
        assert_eq!(chunks.len(), 3);

        assert!(
            !chunks[0].blueprint_overrides.contains_key(INITIAL_CONDITIONS_LOCATION_KEY),
            "the first slice has no predecessor to restart from"
        );

        let first_output_dir = chunks[0].blueprint_overrides.get(OUTPUT_DIR_KEY).unwrap().clone();
        assert_eq!(
            chunks[1].blueprint_overrides.get(INITIAL_CONDITIONS_LOCATION_KEY).unwrap(),
            &format!("{first_output_dir}/initial_conditions")
        );

        let second_output_dir = chunks[1].blueprint_overrides.get(OUTPUT_DIR_KEY).unwrap().clone();
        assert_eq!(
            chunks[2].blueprint_overrides.get(INITIAL_CONDITIONS_LOCATION_KEY).unwrap(),
            &format!("{second_output_dir}/initial_conditions")
        );
    }

    #[test]
    fn month_slicing_chain_matches_the_reference_scenario() {
        // A span crossing two interior month boundaries: start mid-January,
        // end mid-March, three slices expected.
        let step = Step::new("ocean-run", "roms_marbl", "b.yaml").unwrap();
        let chunks = expand_step(&step, date(2024, 1, 15), date(2024, 3, 10)).unwrap();
        assert_eq!(
            chunks.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec![
                "ocean-run_2024:01:15-2024:02:01",
                "ocean-run_2024:02:01-2024:03:01",
                "ocean-run_2024:03:01-2024:03:10",
            ]
        );
        assert!(chunks[1].depends_on.contains("ocean-run_2024:01:15-2024:02:01"));
        assert!(chunks[2].depends_on.contains("ocean-run_2024:02:01-2024:03:01"));
    }
}
