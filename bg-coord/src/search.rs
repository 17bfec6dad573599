// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::Result;
use log::{debug, info};
use std::collections::HashMap;

use crate::study::TrialStat;

// Hard ceiling on probed concurrency to bound runaway search cost.
pub const MAX_THREADS: u32 = 65_536;

// Below this width the ternary interval is enumerated exhaustively.
const TERNARY_SCAN_WIDTH: u32 = 4;

/// One full benchmark run at a fixed concurrency. Implemented by the trial
/// runner for real; tests drive the strategies with synthetic curves.
pub trait Prober {
    fn probe(&mut self, threads: u32, run: u32) -> Result<TrialStat>;
}

/// Largest concurrency that still meets the SLA ("socialites"). Doubles
/// from `minimum` until the first failure, then binary-searches between the
/// last passing and first failing levels. `None` means even `minimum`
/// failed and no feasible concurrency exists.
pub fn max_sla_concurrency(prober: &mut dyn Prober, minimum: u32) -> Result<Option<u32>> {
    let minimum = minimum.max(1);
    let mut runs = 0;
    let mut current = minimum;
    let mut best_valid = None;

    loop {
        let stat = prober.probe(current, runs)?;
        runs += 1;
        if !stat.sla_met {
            break;
        }
        best_valid = Some(current);
        current *= 2;
    }

    let mut left = match best_valid {
        Some(v) => v,
        None => return Ok(None),
    };
    let mut right = current - 1;

    while left <= right {
        let mid = (left + right) / 2;
        let stat = prober.probe(mid, runs)?;
        runs += 1;
        if stat.sla_met {
            best_valid = Some(mid);
            left = mid + 1;
        } else {
            right = mid - 1;
        }
    }

    info!("search: Max SLA-satisfying concurrency {:?}", best_valid);
    Ok(best_valid)
}

/// Concurrency with the highest throughput among SLA-satisfying levels
/// ("soar"). Expands exponentially while throughput keeps rising under
/// SLA, repairs the right edge back to a passing level if needed, then
/// ternary-searches the bracketed interval. `None` means even
/// `start_threads` failed the SLA.
pub fn max_throughput_concurrency(
    prober: &mut dyn Prober,
    start_threads: u32,
) -> Result<Option<u32>> {
    let start_threads = start_threads.max(1);
    let mut runs = 0;

    let mut last_good_threads = start_threads;
    let mut last_good = prober.probe(start_threads, runs)?;
    runs += 1;
    if !last_good.sla_met {
        return Ok(None);
    }

    // The interval handed to the ternary search must bracket the peak. The
    // last accepted point can already sit past it (its throughput only has
    // to beat the point before), so the left edge is the accepted point
    // one step back.
    let mut prev_good_threads = start_threads;

    let mut right_threads = start_threads * 2;
    let mut right = prober.probe(right_threads, runs)?;
    runs += 1;

    while right.sla_met && right.throughput > last_good.throughput && right_threads < MAX_THREADS {
        prev_good_threads = last_good_threads;
        last_good_threads = right_threads;
        last_good = right;

        right_threads *= 2;
        right = prober.probe(right_threads, runs)?;
        runs += 1;
    }

    // Pull the right frontier back to the nearest SLA-passing level.
    while !right.sla_met {
        let gap = right_threads - last_good_threads;
        if gap <= 1 {
            info!(
                "search: No SLA-satisfying interior, settling for {}",
                last_good_threads
            );
            return Ok(Some(last_good_threads));
        }
        right_threads = last_good_threads + gap / 2;
        right = prober.probe(right_threads, runs)?;
        runs += 1;
    }

    let best = constrained_ternary(prober, prev_good_threads, right_threads, &mut runs)?;
    info!("search: Max-throughput concurrency {}", best);
    Ok(Some(best))
}

fn cached_probe(
    prober: &mut dyn Prober,
    cache: &mut HashMap<u32, TrialStat>,
    threads: u32,
    runs: &mut u32,
) -> Result<TrialStat> {
    if let Some(stat) = cache.get(&threads) {
        return Ok(*stat);
    }
    let stat = prober.probe(threads, *runs)?;
    *runs += 1;
    cache.insert(threads, stat);
    Ok(stat)
}

/// Ternary search over `[l, r]` where both endpoints meet the SLA. SLA
/// failures discard the offending third; otherwise the lower-throughput
/// side goes, assuming a single interior maximum. Probes are memoized per
/// call since each one is a full benchmark run.
fn constrained_ternary(
    prober: &mut dyn Prober,
    mut l: u32,
    mut r: u32,
    runs: &mut u32,
) -> Result<u32> {
    let mut cache = HashMap::new();

    while r - l > TERNARY_SCAN_WIDTH {
        let m1 = l + (r - l) / 3;
        let m2 = r - (r - l) / 3;

        let s1 = cached_probe(prober, &mut cache, m1, runs)?;
        let s2 = cached_probe(prober, &mut cache, m2, runs)?;
        debug!(
            "search: ternary [{}, {}] m1={} ({:.1}, {}) m2={} ({:.1}, {})",
            l, r, m1, s1.throughput, s1.sla_met, m2, s2.throughput, s2.sla_met
        );

        if !s2.sla_met {
            r = m2 - 1;
            continue;
        }
        if !s1.sla_met {
            l = m1 + 1;
            continue;
        }
        if s1.throughput < s2.throughput {
            l = m1 + 1;
        } else {
            r = m2 - 1;
        }
    }

    let mut best_tp = -1.0;
    let mut best_threads = l;
    for threads in l..=r {
        let stat = cached_probe(prober, &mut cache, threads, runs)?;
        if stat.sla_met && stat.throughput > best_tp {
            best_tp = stat.throughput;
            best_threads = threads;
        }
    }
    Ok(best_threads)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FnProber<F: FnMut(u32) -> TrialStat> {
        f: F,
        probes: Vec<u32>,
    }

    impl<F: FnMut(u32) -> TrialStat> FnProber<F> {
        fn new(f: F) -> Self {
            Self { f, probes: vec![] }
        }
    }

    impl<F: FnMut(u32) -> TrialStat> Prober for FnProber<F> {
        fn probe(&mut self, threads: u32, _run: u32) -> Result<TrialStat> {
            self.probes.push(threads);
            Ok((self.f)(threads))
        }
    }

    fn sla_capped(limit: u32) -> impl FnMut(u32) -> TrialStat {
        move |t| TrialStat {
            throughput: t as f64,
            sla_met: t <= limit,
        }
    }

    fn parabola(peak: u32) -> impl FnMut(u32) -> TrialStat {
        move |t| TrialStat {
            throughput: -(t as f64 - peak as f64).powi(2) + 2500.0,
            sla_met: true,
        }
    }

    #[test]
    fn test_sla_search_converges_to_80() {
        let mut prober = FnProber::new(sla_capped(80));
        assert_eq!(max_sla_concurrency(&mut prober, 1).unwrap(), Some(80));
        // Exponential phase overshoots to 128 before binary search starts.
        assert!(prober.probes.contains(&128));
        assert!(!prober.probes.contains(&256));
    }

    #[test]
    fn test_sla_search_exact_for_many_limits() {
        for limit in [1, 2, 3, 5, 31, 32, 33, 64, 100, 127, 1000] {
            let mut prober = FnProber::new(sla_capped(limit));
            assert_eq!(
                max_sla_concurrency(&mut prober, 1).unwrap(),
                Some(limit),
                "limit {}",
                limit
            );
        }
    }

    #[test]
    fn test_sla_search_infeasible() {
        let mut prober = FnProber::new(|_| TrialStat {
            throughput: 0.0,
            sla_met: false,
        });
        assert_eq!(max_sla_concurrency(&mut prober, 1).unwrap(), None);
        assert_eq!(prober.probes, vec![1]);

        // Minimum above the feasible region.
        let mut prober = FnProber::new(sla_capped(3));
        assert_eq!(max_sla_concurrency(&mut prober, 4).unwrap(), None);
    }

    #[test]
    fn test_sla_search_respects_minimum() {
        let mut prober = FnProber::new(sla_capped(80));
        assert_eq!(max_sla_concurrency(&mut prober, 4).unwrap(), Some(80));
        assert!(prober.probes.iter().all(|t| *t >= 4));
    }

    #[test]
    fn test_soar_finds_unimodal_peak() {
        for peak in [5, 13, 50, 63, 97, 200] {
            let mut prober = FnProber::new(parabola(peak));
            assert_eq!(
                max_throughput_concurrency(&mut prober, 1).unwrap(),
                Some(peak),
                "peak {}",
                peak
            );
        }
    }

    #[test]
    fn test_soar_sla_capped_rising_curve() {
        // Throughput keeps rising but the SLA cuts off above 80; the best
        // SLA-satisfying point is the cap itself.
        let mut prober = FnProber::new(sla_capped(80));
        assert_eq!(max_throughput_concurrency(&mut prober, 1).unwrap(), Some(80));
    }

    #[test]
    fn test_soar_infeasible_start() {
        let mut prober = FnProber::new(|_| TrialStat {
            throughput: 100.0,
            sla_met: false,
        });
        assert_eq!(max_throughput_concurrency(&mut prober, 1).unwrap(), None);
    }

    #[test]
    fn test_soar_collapsed_gap_returns_last_good() {
        let mut prober = FnProber::new(sla_capped(1));
        assert_eq!(max_throughput_concurrency(&mut prober, 1).unwrap(), Some(1));
    }

    #[test]
    fn test_ternary_exact_on_bracketing_intervals() {
        for (l, r, peak) in [
            (1u32, 100u32, 50u32),
            (32, 128, 50),
            (40, 60, 50),
            (50, 200, 50),
            (1, 7, 3),
            (10, 1000, 499),
        ] {
            let mut prober = FnProber::new(parabola(peak));
            let mut runs = 0;
            assert_eq!(
                constrained_ternary(&mut prober, l, r, &mut runs).unwrap(),
                peak,
                "interval [{}, {}] peak {}",
                l,
                r,
                peak
            );
        }
    }

    #[test]
    fn test_ternary_memoizes_probes() {
        let mut prober = FnProber::new(parabola(50));
        let mut runs = 0;
        constrained_ternary(&mut prober, 1, 100, &mut runs).unwrap();

        let mut seen = prober.probes.clone();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), prober.probes.len(), "duplicate probes issued");
        assert_eq!(runs, prober.probes.len() as u32);
    }
}
