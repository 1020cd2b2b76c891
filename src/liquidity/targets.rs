// =============================================================================
// Liquidity targets — nearest internal/external magnets for "pool to pool"
// =============================================================================
//
// Internal targets come from the primary-TF magnets, ranked by proximity
// (ATR-scaled), freshness and touch count. External targets come from HTF
// pivot clusters (1h/4h), previous-day and rolling-week extremes of the HTF
// frames, session extremes and the pwh/pwl context keys. Up to three per
// role, with a guarantee that both sides appear when candidates exist on
// both sides.

use chrono::{Duration, TimeZone, Utc};

use crate::config::SmcConfig;
use crate::market_data::{Bar, Frame};
use crate::types::{
    LiquidityTarget, SmcContext, SmcInput, SmcLiquidityMagnet, TargetRole, TargetSide,
};

#[derive(Debug, Clone)]
struct Candidate {
    role: TargetRole,
    tf: String,
    side: TargetSide,
    price: f64,
    kind: String,
    strength: f64,
    why: Vec<String>,
    distance_abs: f64,
}

impl Candidate {
    fn into_target(self) -> LiquidityTarget {
        LiquidityTarget {
            role: self.role,
            tf: self.tf,
            side: self.side,
            price: round6(self.price),
            kind: self.kind,
            strength: round3(self.strength),
            reason: self.why,
        }
    }
}

/// Build the liquidity target list, or empty with reasons when there is no
/// reference price.
pub fn build_liquidity_targets(
    snapshot: &SmcInput,
    magnets: &[SmcLiquidityMagnet],
    cfg: &SmcConfig,
) -> (Vec<LiquidityTarget>, Vec<String>) {
    let _ = cfg; // thresholds may become adaptive later
    let ref_price = match snapshot.primary_frame().and_then(Frame::last_close) {
        Some(price) if price.is_finite() => price,
        _ => return (Vec::new(), vec!["no_ref_price".to_string()]),
    };

    let mut candidates: Vec<Candidate> = Vec::new();

    candidates.extend(internal_candidates_from_magnets(
        magnets,
        &snapshot.tf_primary,
        ref_price,
        snapshot.primary_frame(),
    ));
    candidates.extend(external_candidates_from_context(
        &snapshot.context,
        ref_price,
    ));
    for tf in ["1h", "4h"] {
        let frame = match snapshot.frame(tf) {
            Some(frame) if !frame.is_empty() => frame,
            _ => continue,
        };
        candidates.extend(external_candidates_from_htf_pivots(frame, tf, ref_price));
        candidates.extend(external_candidates_from_day_week_extremes(
            frame, tf, ref_price,
        ));
    }

    dedup_candidates(&mut candidates);

    let mut selected = Vec::new();
    selected.extend(select_nearest_per_role(&candidates, TargetRole::Internal));
    selected.extend(select_nearest_per_role(&candidates, TargetRole::External));

    // Stable presentation: internal then external, near to far.
    selected.sort_by(|a, b| {
        let ka = (matches!(a.role, TargetRole::External) as u8, a.distance_abs);
        let kb = (matches!(b.role, TargetRole::External) as u8, b.distance_abs);
        ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal)
    });

    let reasons = if selected.is_empty() {
        vec!["no_candidates".to_string()]
    } else {
        Vec::new()
    };
    (
        selected.into_iter().map(Candidate::into_target).collect(),
        reasons,
    )
}

/// Nearest target of a role relative to the reference price.
pub fn pick_nearest_target<'a>(
    targets: &'a [LiquidityTarget],
    role: TargetRole,
    ref_price: f64,
) -> Option<&'a LiquidityTarget> {
    targets
        .iter()
        .filter(|t| t.role == role)
        .min_by(|a, b| {
            (a.price - ref_price)
                .abs()
                .total_cmp(&(b.price - ref_price).abs())
        })
}

// =============================================================================
// Internal candidates
// =============================================================================

fn internal_candidates_from_magnets(
    magnets: &[SmcLiquidityMagnet],
    tf: &str,
    ref_price: f64,
    frame: Option<&Frame>,
) -> Vec<Candidate> {
    let atr = frame.and_then(|f| atr_last_relaxed(f.bars(), 14));
    let scale = match atr {
        Some(value) if value > 0.0 => value,
        _ => (ref_price.abs() * 0.01).max(1e-9),
    };

    let mut out = Vec::new();
    for magnet in magnets {
        let price = magnet.center;
        if !price.is_finite() {
            continue;
        }
        let side = if price >= ref_price {
            TargetSide::Above
        } else {
            TargetSide::Below
        };
        let touches: u32 = magnet.pools.iter().map(|p| p.n_touches).sum();
        let last_time = magnet.pools.iter().filter_map(|p| p.last_time).max();

        let dist_abs = (price - ref_price).abs();
        let proximity = (1.0 - dist_abs / (3.0 * scale)).max(0.0);
        let freshness = freshness_bonus(frame, last_time);
        let touches_norm = if touches > 0 {
            (f64::from(touches) / 6.0).min(1.0)
        } else {
            0.0
        };
        let strength = 100.0 * (0.55 * proximity + 0.25 * freshness + 0.20 * touches_norm);

        out.push(Candidate {
            role: TargetRole::Internal,
            tf: tf.to_string(),
            side,
            price,
            kind: magnet.liq_type.name().to_string(),
            strength,
            why: vec![
                "source:magnet".to_string(),
                format!("liq_type:{}", magnet.liq_type.name()),
                format!("magnet_role:{}", magnet.role.name()),
                format!("pools:{}", magnet.pools.len()),
                format!("touches:{touches}"),
            ],
            distance_abs: dist_abs,
        });
    }
    out
}

/// Bonus for recent touches: 1.0 inside the last ~20 bars, 0.5 otherwise.
fn freshness_bonus(frame: Option<&Frame>, last_time: Option<i64>) -> f64 {
    let (frame, last_time) = match (frame, last_time) {
        (Some(f), Some(t)) if !f.is_empty() => (f, t),
        _ => return 0.0,
    };
    let age = frame
        .bars()
        .iter()
        .filter(|b| b.open_time <= last_time)
        .count();
    if age >= frame.len().saturating_sub(20) {
        1.0
    } else {
        0.5
    }
}

// =============================================================================
// External candidates
// =============================================================================

fn external_candidates_from_context(context: &SmcContext, ref_price: f64) -> Vec<Candidate> {
    let mut out = Vec::new();

    // Session extremes computed by the input adapter.
    if let Some(sessions) = &context.smc_sessions {
        for (tag, payload) in sessions {
            for (kind, value) in [
                ("SESSION_HIGH", payload.high),
                ("SESSION_LOW", payload.low),
            ] {
                let level = match value {
                    Some(v) if v.is_finite() => v,
                    _ => continue,
                };
                let dist_abs = (level - ref_price).abs();
                let proximity =
                    (1.0 - dist_abs / (ref_price.abs() * 0.01).max(1e-9)).max(0.0);
                out.push(Candidate {
                    role: TargetRole::External,
                    tf: "1h".to_string(),
                    side: if level >= ref_price {
                        TargetSide::Above
                    } else {
                        TargetSide::Below
                    },
                    price: level,
                    kind: kind.to_string(),
                    strength: 75.0 + 25.0 * proximity,
                    why: vec![
                        "source:smc_sessions".to_string(),
                        format!("session_tag:{}", tag.to_uppercase()),
                    ],
                    distance_abs: dist_abs,
                });
            }
        }
    }

    // Legacy week extremes from context keys.
    for (value, side, kind, key) in [
        (context.pwh, TargetSide::Above, "WEEK_HIGH", "pwh"),
        (context.pwl, TargetSide::Below, "WEEK_LOW", "pwl"),
    ] {
        let level = match value {
            Some(v) if v.is_finite() => v,
            _ => continue,
        };
        let dist_abs = (level - ref_price).abs();
        let proximity = (1.0 - dist_abs / (ref_price.abs() * 0.01).max(1e-9)).max(0.0);
        out.push(Candidate {
            role: TargetRole::External,
            tf: "4h".to_string(),
            side,
            price: level,
            kind: kind.to_string(),
            strength: 70.0 + 30.0 * proximity,
            why: vec!["source:context".to_string(), format!("key:{key}")],
            distance_abs: dist_abs,
        });
    }

    out
}

fn external_candidates_from_htf_pivots(frame: &Frame, tf: &str, ref_price: f64) -> Vec<Candidate> {
    let lookback = frame.len().min(200);
    if lookback < 10 {
        return Vec::new();
    }
    let tail = frame.tail(lookback);
    let atr = atr_last_relaxed(tail, 14);
    let tol = match atr {
        Some(value) if value > 0.0 => value * 0.6,
        _ => (ref_price.abs() * 0.002).max(1e-9),
    };

    let (pivot_highs, pivot_lows) = pivots(tail, 2, 2);
    let clusters_above = cluster_levels(
        pivot_highs
            .iter()
            .copied()
            .filter(|p| *p > ref_price)
            .collect(),
        tol,
    );
    let clusters_below = cluster_levels(
        pivot_lows
            .iter()
            .copied()
            .filter(|p| *p < ref_price)
            .collect(),
        tol,
    );

    let mut out = Vec::new();
    let why = |lb: usize| {
        vec![
            "source:htf_pivots".to_string(),
            format!("tf:{tf}"),
            "pivot_window:2".to_string(),
            format!("lookback:{lb}"),
            format!("tol:{}", round6(tol)),
        ]
    };

    // Nearest cluster above, with the tail high as fallback.
    let above_price = clusters_above
        .iter()
        .map(|c| c.center)
        .min_by(f64::total_cmp)
        .or_else(|| {
            tail.iter()
                .map(|b| b.high)
                .max_by(f64::total_cmp)
        });
    if let Some(price) = above_price.filter(|p| p.is_finite()) {
        out.push(Candidate {
            role: TargetRole::External,
            tf: tf.to_string(),
            side: TargetSide::Above,
            price,
            kind: "HTF_SWING_HIGH".to_string(),
            strength: external_strength(ref_price, price, &clusters_above, tol),
            why: why(lookback),
            distance_abs: (price - ref_price).abs(),
        });
    }

    // Nearest cluster below, with the tail low as fallback.
    let below_price = clusters_below
        .iter()
        .map(|c| c.center)
        .max_by(f64::total_cmp)
        .or_else(|| tail.iter().map(|b| b.low).min_by(f64::total_cmp));
    if let Some(price) = below_price.filter(|p| p.is_finite()) {
        out.push(Candidate {
            role: TargetRole::External,
            tf: tf.to_string(),
            side: TargetSide::Below,
            price,
            kind: "HTF_SWING_LOW".to_string(),
            strength: external_strength(ref_price, price, &clusters_below, tol),
            why: why(lookback),
            distance_abs: (price - ref_price).abs(),
        });
    }

    out
}

/// Previous-calendar-day extremes plus rolling 7-day extremes of the HTF
/// frame — the baseline when pivots are not enough.
fn external_candidates_from_day_week_extremes(
    frame: &Frame,
    tf: &str,
    ref_price: f64,
) -> Vec<Candidate> {
    let last_ts = match frame.last() {
        Some(bar) => bar.open_time,
        None => return Vec::new(),
    };
    let last_day = match Utc.timestamp_millis_opt(last_ts).single() {
        Some(dt) => {
            let date = dt.date_naive();
            Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight"))
        }
        None => return Vec::new(),
    };
    let last_day_ms = last_day.timestamp_millis();
    let prev_day_ms = (last_day - Duration::days(1)).timestamp_millis();
    let week_start_ms = (last_day - Duration::days(7)).timestamp_millis();

    let mut out = Vec::new();

    let prev_day: Vec<&Bar> = frame
        .bars()
        .iter()
        .filter(|b| b.open_time >= prev_day_ms && b.open_time < last_day_ms)
        .collect();
    if !prev_day.is_empty() {
        let pdh = prev_day.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let pdl = prev_day.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        for (level, kind) in [(pdh, "DAY_HIGH"), (pdl, "DAY_LOW")] {
            if !level.is_finite() {
                continue;
            }
            out.push(Candidate {
                role: TargetRole::External,
                tf: tf.to_string(),
                side: if level >= ref_price {
                    TargetSide::Above
                } else {
                    TargetSide::Below
                },
                price: level,
                kind: kind.to_string(),
                strength: 60.0,
                why: vec!["source:htf_day_extreme".to_string(), format!("tf:{tf}")],
                distance_abs: (level - ref_price).abs(),
            });
        }
    }

    let week: Vec<&Bar> = frame
        .bars()
        .iter()
        .filter(|b| b.open_time >= week_start_ms)
        .collect();
    if !week.is_empty() {
        let wh = week.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let wl = week.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        for (level, kind) in [(wh, "WEEK_HIGH_ROLLING"), (wl, "WEEK_LOW_ROLLING")] {
            if !level.is_finite() {
                continue;
            }
            out.push(Candidate {
                role: TargetRole::External,
                tf: tf.to_string(),
                side: if level >= ref_price {
                    TargetSide::Above
                } else {
                    TargetSide::Below
                },
                price: level,
                kind: kind.to_string(),
                strength: 55.0,
                why: vec!["source:htf_week_extreme".to_string(), format!("tf:{tf}")],
                distance_abs: (level - ref_price).abs(),
            });
        }
    }

    out
}

// =============================================================================
// Selection helpers
// =============================================================================

fn dedup_candidates(candidates: &mut Vec<Candidate>) {
    let mut seen: Vec<(TargetRole, String, TargetSide, i64, String)> = Vec::new();
    candidates.retain(|c| {
        let key = (
            c.role,
            c.tf.clone(),
            c.side,
            (c.price * 100_000.0).round() as i64,
            c.kind.clone(),
        );
        if seen.contains(&key) {
            false
        } else {
            seen.push(key);
            true
        }
    });
}

/// Nearest first; guarantee the other side when present; fill up to three.
fn select_nearest_per_role(candidates: &[Candidate], role: TargetRole) -> Vec<Candidate> {
    let mut role_cands: Vec<&Candidate> = candidates.iter().filter(|c| c.role == role).collect();
    if role_cands.is_empty() {
        return Vec::new();
    }
    role_cands.sort_by(|a, b| {
        (a.distance_abs, -a.strength)
            .partial_cmp(&(b.distance_abs, -b.strength))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut picked: Vec<Candidate> = vec![role_cands[0].clone()];
    let mut sides = vec![role_cands[0].side];
    for c in role_cands.iter().skip(1) {
        if !sides.contains(&c.side) {
            picked.push((*c).clone());
            sides.push(c.side);
            break;
        }
    }
    for c in role_cands.iter().skip(1) {
        if picked.len() >= 3 {
            break;
        }
        if picked
            .iter()
            .any(|p| p.price == c.price && p.kind == c.kind && p.side == c.side)
        {
            continue;
        }
        picked.push((*c).clone());
    }
    picked.truncate(3);
    picked
}

#[derive(Debug, Clone, Copy)]
struct LevelCluster {
    center: f64,
    n: usize,
}

fn cluster_levels(mut levels: Vec<f64>, tol: f64) -> Vec<LevelCluster> {
    levels.retain(|l| l.is_finite());
    if levels.is_empty() {
        return Vec::new();
    }
    levels.sort_by(f64::total_cmp);

    let mut clusters: Vec<Vec<f64>> = vec![vec![levels[0]]];
    for level in levels.into_iter().skip(1) {
        let last_cluster = clusters.last_mut().expect("non-empty");
        let last_level = *last_cluster.last().expect("non-empty");
        if (level - last_level).abs() <= tol {
            last_cluster.push(level);
        } else {
            clusters.push(vec![level]);
        }
    }
    clusters
        .into_iter()
        .map(|c| LevelCluster {
            center: c.iter().sum::<f64>() / c.len() as f64,
            n: c.len(),
        })
        .collect()
}

fn external_strength(ref_price: f64, level: f64, clusters: &[LevelCluster], tol: f64) -> f64 {
    let dist_abs = (level - ref_price).abs();
    let proximity = (1.0 - dist_abs / (3.0 * tol).max(1e-9)).max(0.0);
    let touches = clusters
        .iter()
        .find(|c| (c.center - level).abs() <= tol)
        .map_or(1, |c| c.n.max(1));
    let touches_norm = (touches as f64 / 4.0).min(1.0);
    100.0 * (0.70 * proximity + 0.30 * touches_norm)
}

/// Pivot highs/lows with an inclusive window: the last 20 of each kind.
fn pivots(bars: &[Bar], left: usize, right: usize) -> (Vec<f64>, Vec<f64>) {
    let n = bars.len();
    let mut highs = Vec::new();
    let mut lows = Vec::new();
    if n < left + right + 1 {
        return (highs, lows);
    }
    for i in left..n - right {
        let window = &bars[i - left..=i + right];
        let hi = bars[i].high;
        let lo = bars[i].low;
        let window_max = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let window_min = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        if hi.is_finite() && hi >= window_max {
            highs.push(hi);
        }
        if lo.is_finite() && lo <= window_min {
            lows.push(lo);
        }
    }
    let hs = highs.len().saturating_sub(20);
    let ls = lows.len().saturating_sub(20);
    (highs[hs..].to_vec(), lows[ls..].to_vec())
}

/// ATR with a relaxed minimum window (half the period), so short HTF tails
/// still produce a usable scale.
fn atr_last_relaxed(bars: &[Bar], period: usize) -> Option<f64> {
    if bars.is_empty() || period == 0 {
        return None;
    }
    let min_periods = (period / 2).max(2);
    let n = bars.len();
    if n < min_periods {
        return None;
    }
    let mut tr = Vec::with_capacity(n);
    for (i, bar) in bars.iter().enumerate() {
        let hl = (bar.high - bar.low).abs();
        let value = if i == 0 {
            hl
        } else {
            let prev_close = bars[i - 1].close;
            hl.max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        };
        tr.push(value);
    }
    let start = n.saturating_sub(period);
    let window = &tr[start..];
    if window.len() < min_periods {
        return None;
    }
    let atr = window.iter().sum::<f64>() / window.len() as f64;
    (atr.is_finite() && atr > 0.0).then_some(atr)
}

fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

fn round3(v: f64) -> f64 {
    (v * 1e3).round() / 1e3
}
