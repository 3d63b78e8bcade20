/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Admission control: rate-monotonic schedulability test.
//!
//! # Theory
//! **Liu & Layland (1973)**: Under Rate Monotonic scheduling (shorter period →
//! higher priority), a task set of `n` independent periodic tasks is
//! **guaranteed** schedulable on one CPU if:
//!
//! $$U = \sum_{i=1}^{n} \frac{C_i}{T_i} \leq n \left(2^{1/n} - 1\right)$$
//!
//! The bound tightens as `n` grows, converging to `ln(2) ≈ 0.693`.
//!
//! | n | Bound |
//! |---|---|
//! | 1 | 1.000 |
//! | 2 | 0.828 |
//! | 3 | 0.780 |
//! | 5 | 0.743 |
//! | ∞ | ln(2) ≈ 0.693 |
//!
//! # Integer arithmetic
//! Utilisation is scaled by 1000 and truncated per task (`1000 * C / P`), so
//! the test never touches floating point on the hot path.  The default policy
//! compares against the fixed limit `693`, which holds for every `n`.
//! [`AdmissionPolicy::LiuLayland`] instead uses the exact per-`n` bound,
//! admitting more load when few tasks are registered.

use super::SchedError;

// ── Constants ─────────────────────────────────────────────────────────────────

/// `ln(2)` in permille, truncated.  Safe for any task count.
pub const FIXED_BOUND_PERMILLE: u64 = 693;

// ── Policy ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// Accept iff `U ≤ bound_permille`.
    Fixed { bound_permille: u64 },
    /// Accept iff `U ≤ ⌊1000 · n(2^(1/n) − 1)⌋`, `n` counting the candidate.
    LiuLayland,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        AdmissionPolicy::Fixed {
            bound_permille: FIXED_BOUND_PERMILLE,
        }
    }
}

impl AdmissionPolicy {
    /// Scaled bound for a task set of `n` tasks.
    pub fn bound_permille(&self, n: usize) -> u64 {
        match *self {
            AdmissionPolicy::Fixed { bound_permille } => bound_permille,
            AdmissionPolicy::LiuLayland => (liu_layland_bound(n) * 1000.0) as u64,
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Compute the Liu & Layland utilisation upper bound for `n` tasks.
///
/// `U_bound(n) = n × (2^(1/n) − 1)`
///
/// Returns `1.0` for `n = 1` and `0.0` for `n = 0`.
pub fn liu_layland_bound(n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let nf = n as f64;
    nf * (2.0_f64.powf(1.0 / nf) - 1.0)
}

/// `1000 * C / P`, truncating.  Zero for a zero period.
pub fn scaled_utilization(computation_ms: u32, period_ms: u32) -> u64 {
    if period_ms == 0 {
        return 0;
    }
    u64::from(computation_ms) * 1000 / u64::from(period_ms)
}

/// Decide whether a candidate `(C, P)` may join a task set whose scaled
/// utilisation is `current_total` over `current_count` tasks.
///
/// Returns the new scaled total on acceptance.
///
/// # Errors
/// [`SchedError::Rejected`] with the would-be total and the bound applied.
pub fn admit(
    policy: &AdmissionPolicy,
    current_total: u64,
    current_count: usize,
    computation_ms: u32,
    period_ms: u32,
) -> Result<u64, SchedError> {
    let utilization = current_total + scaled_utilization(computation_ms, period_ms);
    let bound = policy.bound_permille(current_count + 1);

    if utilization > bound {
        return Err(SchedError::Rejected { utilization, bound });
    }
    Ok(utilization)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> AdmissionPolicy {
        AdmissionPolicy::default()
    }

    #[test]
    fn bound_zero_tasks_is_zero() {
        assert_eq!(liu_layland_bound(0), 0.0);
    }

    #[test]
    fn bound_one_task_is_one() {
        let b = liu_layland_bound(1);
        assert!((b - 1.0).abs() < 1e-10, "bound(1) should be 1.0, got {b}");
    }

    #[test]
    fn bound_converges_toward_ln2() {
        let b = liu_layland_bound(1000);
        assert!(
            (b - 2.0_f64.ln()).abs() < 1e-3,
            "bound(1000) should be close to ln(2) ≈ 0.6931, got {b}"
        );
    }

    #[test]
    fn scaled_utilization_truncates() {
        assert_eq!(scaled_utilization(1, 3), 333);
        assert_eq!(scaled_utilization(20, 100), 200);
        assert_eq!(scaled_utilization(9, 10), 900);
        assert_eq!(scaled_utilization(5, 0), 0);
    }

    #[test]
    fn two_light_tasks_admitted_heavy_third_rejected() {
        let p = fixed();
        let total = admit(&p, 0, 0, 10, 50).unwrap();
        assert_eq!(total, 200);
        let total = admit(&p, total, 1, 10, 100).unwrap();
        assert_eq!(total, 300);
        let err = admit(&p, total, 2, 9, 10).unwrap_err();
        assert_eq!(
            err,
            SchedError::Rejected {
                utilization: 1200,
                bound: 693
            }
        );
    }

    #[test]
    fn exactly_at_fixed_bound_is_admitted() {
        // 693 / 1000 → exactly 693‰
        assert_eq!(admit(&fixed(), 0, 0, 693, 1000), Ok(693));
        assert!(admit(&fixed(), 0, 0, 694, 1000).is_err());
    }

    #[test]
    fn liu_layland_policy_scales_with_task_count() {
        let ll = AdmissionPolicy::LiuLayland;
        assert_eq!(ll.bound_permille(1), 1000);
        assert_eq!(ll.bound_permille(2), 828);
        assert_eq!(ll.bound_permille(3), 779);
        // A single task at 90 % fits under the exact bound but not the fixed one.
        assert!(admit(&ll, 0, 0, 9, 10).is_ok());
        assert!(admit(&fixed(), 0, 0, 9, 10).is_err());
    }
}
