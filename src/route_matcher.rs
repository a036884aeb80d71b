use geo::LineString;
use log::{debug, trace};
use ndarray::Array2;
use ordered_float::OrderedFloat;

use crate::error::RouteError;
use crate::geometry;
use crate::route_builder::RouteBuilderConfig;

/// Outcome of scoring all candidates against the ground truth.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub best_index: usize,
    pub score: f64,
    /// Score of every candidate, in candidate order.
    pub scores: Vec<f64>,
}

/// First `horizon` meters of the line.
pub fn truncate(line: &LineString<f64>, horizon: f64) -> LineString<f64> {
    geometry::substring(line, horizon)
}

fn sample(line: &LineString<f64>, horizon: f64, step: f64) -> Array2<f64> {
    let count = (horizon / step).ceil() as usize;
    let mut points = Array2::zeros((count, 2));
    for (i, mut row) in points.outer_iter_mut().enumerate() {
        if let Some(p) = geometry::interpolate(line, i as f64 * step) {
            row[0] = p.x;
            row[1] = p.y;
        }
    }
    points
}

/// Sum of point distances between two lines sampled every `step` meters
/// over the first `horizon` meters.
///
/// Both lines are truncated to the horizon first and must then be exactly
/// `horizon` long. A shorter line means the caller skipped the length
/// checks, which is reported as an integrity failure.
pub fn discrepancy(
    candidate: &LineString<f64>,
    ground_truth: &LineString<f64>,
    horizon: f64,
    step: f64,
    tolerance: f64,
) -> Result<f64, RouteError> {
    let candidate = truncate(candidate, horizon);
    let ground_truth = truncate(ground_truth, horizon);

    for (name, line) in [("candidate", &candidate), ("ground truth", &ground_truth)] {
        let len = geometry::length(line);
        if (len - horizon).abs() > tolerance {
            return Err(RouteError::integrity(format!(
                "truncated {} is {:.6} m long instead of {:.1} m",
                name, len, horizon
            )));
        }
    }

    let diff = sample(&candidate, horizon, step) - sample(&ground_truth, horizon, step);
    Ok(diff
        .outer_iter()
        .map(|row| (row[0] * row[0] + row[1] * row[1]).sqrt())
        .sum())
}

/// Picks the candidate with the lowest discrepancy. Ties go to the earlier
/// candidate.
pub fn select_best(
    candidates: &[LineString<f64>],
    ground_truth: &LineString<f64>,
    config: &RouteBuilderConfig,
) -> Result<MatchResult, RouteError> {
    let truth_length = geometry::length(ground_truth);
    if truth_length < config.horizon {
        return Err(RouteError::GroundTruthTooShort {
            length: truth_length,
            horizon: config.horizon,
        });
    }

    let scores = candidates
        .iter()
        .map(|candidate| {
            discrepancy(
                candidate,
                ground_truth,
                config.horizon,
                config.sample_step,
                config.horizon_tolerance,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    for (i, score) in scores.iter().enumerate() {
        trace!("Candidate {}: discrepancy {:.3}", i, score);
    }

    let (best_index, score) = scores
        .iter()
        .copied()
        .enumerate()
        .min_by_key(|&(_, s)| OrderedFloat(s))
        .ok_or(RouteError::NoRoutes {
            horizon: config.horizon,
        })?;

    debug!(
        "Best of {} candidates is #{} with discrepancy {:.3}",
        scores.len(),
        best_index,
        score
    );

    Ok(MatchResult {
        best_index,
        score,
        scores,
    })
}
