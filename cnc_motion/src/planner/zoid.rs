//! Jerk-limited trapezoid (S-curve) generator.
//!
//! A move is split into a head (accelerate from entry to cruise), a body
//! (constant cruise) and a tail (decelerate from cruise to exit). Each ramp
//! is a constant-jerk S-curve whose length is
//!
//! ```text
//! L = (Vi + Vf) · sqrt(|Vf − Vi| / J)
//! ```
//!
//! ## Profile cases
//!
//! | Case            | Condition                                    | Result                   |
//! |-----------------|----------------------------------------------|--------------------------|
//! | Body only       | entry ≈ cruise ≈ exit                        | body = L                 |
//! | Head only       | exit > entry, L too short to reach exit      | exit lowered, head = L   |
//! | Tail only       | entry > exit, L just long enough to brake    | tail = L                 |
//! | Full trapezoid  | head + tail ≤ L                              | body = L − head − tail   |
//! | Rate limited    | head + tail > L                              | cruise lowered to meet   |
//!
//! All relations are closed form except the asymmetric meet velocity, which
//! is refined by a fixed number of safeguarded Newton steps.

use cnc_common::consts::EPSILON_LENGTH;

use super::buffer::Buffer;

/// Newton/bisection iterations for the asymmetric meet velocity.
const MEET_ITERATIONS: usize = 16;

/// Velocities closer than this are considered equal [mm/min].
#[inline]
pub fn velocity_tolerance(velocity: f64) -> f64 {
    (velocity / 100.0).max(2.0)
}

/// Length needed to change velocity from `vi` to `vf` at the buffer's jerk.
#[inline]
pub fn target_length(vi: f64, vf: f64, bf: &Buffer) -> f64 {
    (vi + vf) * ((vf - vi).abs() * bf.recip_jerk).sqrt()
}

/// Velocity reached by accelerating from `vi` over `length` at the buffer's jerk.
///
/// Exact inverse of [`target_length`]: with `Vf = Vi + s²` the length relation
/// becomes the depressed cubic `s³ + 2·Vi·s − L·√J = 0`, which has exactly one
/// real root (solved with Cardano's formula, then one Newton polish step).
pub fn target_velocity(vi: f64, length: f64, bf: &Buffer) -> f64 {
    if length <= 0.0 || bf.jerk <= 0.0 {
        return vi;
    }
    if vi <= 0.0 {
        // Vf = cbrt(L² · J)
        return length.powf(2.0 / 3.0) * bf.cbrt_jerk;
    }
    let p = 2.0 * vi;
    let r = length * bf.jerk.sqrt();
    let disc = (r * r / 4.0 + p * p * p / 27.0).sqrt();
    let a = (r / 2.0 + disc).cbrt();
    let mut s = if a > 0.0 { a - p / (3.0 * a) } else { 0.0 };

    let f = s * s * s + p * s - r;
    let df = 3.0 * s * s + p;
    if df > 0.0 {
        s -= f / df;
    }
    vi + s.max(0.0) * s.max(0.0)
}

/// Apex velocity of a head+tail profile with no body that fits `length` exactly.
///
/// Bracketed between `max(vi, vf)` and the velocity reachable from it over the
/// full length. The ramps at the returned velocity overshoot `length` by at
/// most `EPSILON_LENGTH`; callers clamp the tail.
pub fn meet_velocity(vi: f64, vf: f64, length: f64, bf: &Buffer) -> f64 {
    let ramps = |v: f64| target_length(vi, v, bf) + target_length(vf, v, bf) - length;
    let slope = |v0: f64, v: f64| {
        let x = ((v - v0) * bf.recip_jerk).sqrt();
        x + (v0 + v) * bf.recip_jerk / (2.0 * x)
    };

    let mut lo = vi.max(vf);
    if ramps(lo) >= 0.0 {
        return lo;
    }
    let mut hi = target_velocity(lo, length, bf);
    let mut v = hi;

    for _ in 0..MEET_ITERATIONS {
        let g = ramps(v);
        if g.abs() < EPSILON_LENGTH * 0.1 {
            break;
        }
        if g < 0.0 {
            lo = v;
        } else {
            hi = v;
        }
        let d = slope(vi, v) + slope(vf, v);
        let mut next = v - g / d;
        if !next.is_finite() || next <= lo || next >= hi {
            next = 0.5 * (lo + hi);
        }
        v = next;
    }

    if ramps(v) <= EPSILON_LENGTH { v } else { lo }
}

/// Compute head/body/tail lengths for the buffer's entry, cruise and exit
/// velocities, lowering cruise and exit where the length does not allow them.
///
/// Postconditions: `head + body + tail == length`, all three `≥ 0`,
/// `cruise ≥ max(entry, exit)`.
pub fn calculate_trapezoid(bf: &mut Buffer) {
    let length = bf.length;
    let vi = bf.entry_velocity;
    let mut vf = bf.exit_velocity;
    let vc = bf.cruise_velocity.max(vi).max(vf);

    bf.head_length = 0.0;
    bf.body_length = 0.0;
    bf.tail_length = 0.0;

    if length < EPSILON_LENGTH {
        bf.body_length = length;
        bf.cruise_velocity = vi;
        bf.exit_velocity = vi;
        return;
    }

    let tol = velocity_tolerance(vi);

    // Body only
    if (vc - vi).abs() < tol && (vc - vf).abs() < tol {
        bf.body_length = length;
        bf.cruise_velocity = vc;
        return;
    }

    // Head only: cannot even reach the requested exit
    if vf > vi && length <= target_length(vi, vf, bf) {
        vf = vf.min(target_velocity(vi, length, bf));
        bf.head_length = length;
        bf.cruise_velocity = vf;
        bf.exit_velocity = vf;
        return;
    }

    // Tail only: braking takes the whole move
    if vi > vf && length <= target_length(vf, vi, bf) {
        bf.tail_length = length;
        bf.cruise_velocity = vi;
        return;
    }

    let head = target_length(vi, vc, bf);
    let tail = target_length(vf, vc, bf);
    if head + tail <= length {
        bf.head_length = head;
        bf.tail_length = tail;
        bf.body_length = length - head - tail;
        bf.cruise_velocity = vc;
        return;
    }

    // Rate limited: no body, cruise lowered to where the ramps meet
    let floor = vi.max(vf);
    let symmetric = (vi - vf).abs() < tol;
    let candidate = target_velocity(vi.min(vf), length / 2.0, bf);
    let apex = if symmetric && candidate >= floor {
        candidate
    } else {
        meet_velocity(vi, vf, length, bf)
    }
    .min(vc);

    let head = target_length(vi, apex, bf).min(length);
    let tail = target_length(vf, apex, bf).min(length - head);
    bf.head_length = head;
    bf.tail_length = tail;
    bf.body_length = (length - head - tail).max(0.0);
    bf.cruise_velocity = apex;
}
