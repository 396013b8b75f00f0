//! The autoscale planner.

use std::collections::BTreeMap;

use tracing::debug;

use drover_state::{AutoScalingStrategy, BalanceMode, SupervisorOptions};

/// Load observed for one pool at evaluation time.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolLoad {
    /// Pool key (`connection:queue`).
    pub key: String,
    /// Ready jobs across the pool's queues.
    pub size: u64,
    /// Average job runtime in milliseconds across the pool's queues.
    pub runtime: f64,
    /// Current non-terminating process count.
    pub current: u32,
}

/// Desired process count per pool, before step limiting.
///
/// Targets are clamped to `[min_processes, max_processes]` for the
/// single-pool case and to `min + floored proportional share` otherwise,
/// so the sum of balanced targets never exceeds `max_processes` whenever
/// the budget is non-negative.
pub fn targets(options: &SupervisorOptions, pools: &[PoolLoad]) -> BTreeMap<String, u32> {
    let min = options.min_processes;
    let max = options.max_processes;

    if pools.len() == 1 && options.balance == BalanceMode::Off {
        let pool = &pools[0];
        let target = if pool.size > 0 { max } else { min };
        return BTreeMap::from([(pool.key.clone(), target.clamp(min, max))]);
    }

    let weights: Vec<f64> = pools
        .iter()
        .map(|pool| match options.auto_scaling_strategy {
            AutoScalingStrategy::Time => pool.size as f64 * pool.runtime,
            AutoScalingStrategy::Size => pool.size as f64,
        })
        .collect();
    let total: f64 = weights.iter().sum();

    if total <= 0.0 {
        return pools
            .iter()
            .map(|pool| (pool.key.clone(), min))
            .collect();
    }

    let reserved = min.saturating_mul(pools.len() as u32);
    let budget = max.saturating_sub(reserved);

    pools
        .iter()
        .zip(&weights)
        .map(|(pool, weight)| {
            let share = (budget as f64 * weight / total).floor() as u32;
            let target = (min + share).max(1);
            (pool.key.clone(), target)
        })
        .collect()
}

/// Next process count per pool: current stepped toward target by at most
/// `balance_max_shift`.
pub fn plan(options: &SupervisorOptions, pools: &[PoolLoad]) -> BTreeMap<String, u32> {
    let desired = targets(options, pools);
    let shift = options.balance_max_shift.max(1) as i64;

    pools
        .iter()
        .map(|pool| {
            let target = desired.get(&pool.key).copied().unwrap_or(pool.current);
            let delta = (target as i64 - pool.current as i64).clamp(-shift, shift);
            let next = (pool.current as i64 + delta) as u32;
            if next != pool.current {
                debug!(
                    pool = %pool.key,
                    from = pool.current,
                    to = next,
                    target,
                    "scaling pool"
                );
            }
            (pool.key.clone(), next)
        })
        .collect()
}
