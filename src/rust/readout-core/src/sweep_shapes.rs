// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use crate::{Error, Result};

/// `n` evenly spaced values from `start` to `stop`, both included.
///
/// A single point yields `start`.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Frequencies visited by a sweep, one row per channel.
///
/// Spans are walked from high to low frequency.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepPlan {
    Explicit(Vec<Vec<f64>>),
    /// The same span around every center.
    Linear {
        centers: Vec<f64>,
        bandwidth: f64,
        points: usize,
    },
    /// Span of `center / q` around every center.
    QualityFactor {
        centers: Vec<f64>,
        q: Vec<f64>,
        points: usize,
    },
}

fn span(center: f64, bandwidth: f64, points: usize) -> Vec<f64> {
    linspace(center + bandwidth / 2.0, center - bandwidth / 2.0, points)
}

impl SweepPlan {
    pub fn frequencies(&self) -> Result<Vec<Vec<f64>>> {
        match self {
            SweepPlan::Explicit(frequencies) => Ok(frequencies.clone()),
            SweepPlan::Linear {
                centers,
                bandwidth,
                points,
            } => {
                check_points(*points)?;
                if bandwidth.is_nan() || *bandwidth < 0.0 {
                    return Err(Error::configuration(format!(
                        "Sweep bandwidth must be non-negative, got {bandwidth} Hz"
                    )));
                }
                Ok(centers
                    .iter()
                    .map(|&center| span(center, *bandwidth, *points))
                    .collect())
            }
            SweepPlan::QualityFactor { centers, q, points } => {
                check_points(*points)?;
                if centers.len() != q.len() {
                    return Err(Error::configuration(format!(
                        "Got {} centers but {} quality factors",
                        centers.len(),
                        q.len()
                    )));
                }
                centers
                    .iter()
                    .zip(q)
                    .map(|(&center, &q)| {
                        if q.is_nan() || q <= 0.0 {
                            return Err(Error::configuration(format!(
                                "Quality factors must be positive, got {q}"
                            )));
                        }
                        Ok(span(center, center / q, *points))
                    })
                    .collect()
            }
        }
    }
}

fn check_points(points: usize) -> Result<()> {
    if points == 0 {
        return Err(Error::configuration("A sweep needs at least one point"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linspace(3.0, 1.0, 1), vec![3.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_linear_plan_descends() {
        let plan = SweepPlan::Linear {
            centers: vec![1e9, 2e9],
            bandwidth: 20e3,
            points: 3,
        };
        let frequencies = plan.frequencies().unwrap();
        assert_eq!(frequencies[0], vec![1e9 + 10e3, 1e9, 1e9 - 10e3]);
        assert_eq!(frequencies[1], vec![2e9 + 10e3, 2e9, 2e9 - 10e3]);
    }

    #[test]
    fn test_quality_factor_plan() {
        let plan = SweepPlan::QualityFactor {
            centers: vec![1e9],
            q: vec![1e4],
            points: 2,
        };
        assert_eq!(
            plan.frequencies().unwrap(),
            vec![vec![1e9 + 50e3, 1e9 - 50e3]]
        );
        let bad = SweepPlan::QualityFactor {
            centers: vec![1e9],
            q: vec![0.0],
            points: 2,
        };
        assert!(bad.frequencies().unwrap_err().is_configuration());
    }

    #[test]
    fn test_invalid_point_count() {
        let plan = SweepPlan::Linear {
            centers: vec![1e9],
            bandwidth: 1e3,
            points: 0,
        };
        assert!(plan.frequencies().unwrap_err().is_configuration());
    }
}
