//! Provisioning — the TOML file that declares a host's supervisors.
//!
//! A `[defaults]` table sets host-wide values; each `[supervisors.<key>]`
//! table overrides them per supervisor. Keys become supervisor names
//! prefixed by the master's identity (`{master}:{key}`), and the merged
//! result is validated before the master starts.
//!
//! ```toml
//! [defaults]
//! connection = "redis"
//! max_processes = 10
//!
//! [supervisors.app]
//! queues = ["high", "low"]
//! balance = "auto"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use drover_state::{AutoScalingStrategy, BalanceMode, SupervisorOptions};

/// One supervisor table, every field optional so it can layer over the
/// defaults table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorTable {
    pub connection: Option<String>,
    pub queues: Option<Vec<String>>,
    pub workers_name: Option<String>,
    pub balance: Option<BalanceMode>,
    pub min_processes: Option<u32>,
    pub max_processes: Option<u32>,
    pub balance_cooldown: Option<u64>,
    pub balance_max_shift: Option<u32>,
    pub auto_scaling_strategy: Option<AutoScalingStrategy>,
    pub nice: Option<i32>,
    pub backoff: Option<u64>,
    pub max_time: Option<u64>,
    pub max_jobs: Option<u64>,
    pub memory: Option<u64>,
    pub sleep: Option<u64>,
    pub timeout: Option<u64>,
    pub tries: Option<u32>,
    pub rest: Option<u64>,
    pub concurrency: Option<u32>,
}

impl SupervisorTable {
    /// Layer `self` over `base`, field by field.
    fn merged_over(&self, base: &SupervisorTable) -> SupervisorTable {
        macro_rules! pick {
            ($field:ident) => {
                self.$field.clone().or_else(|| base.$field.clone())
            };
        }
        SupervisorTable {
            connection: pick!(connection),
            queues: pick!(queues),
            workers_name: pick!(workers_name),
            balance: pick!(balance),
            min_processes: pick!(min_processes),
            max_processes: pick!(max_processes),
            balance_cooldown: pick!(balance_cooldown),
            balance_max_shift: pick!(balance_max_shift),
            auto_scaling_strategy: pick!(auto_scaling_strategy),
            nice: pick!(nice),
            backoff: pick!(backoff),
            max_time: pick!(max_time),
            max_jobs: pick!(max_jobs),
            memory: pick!(memory),
            sleep: pick!(sleep),
            timeout: pick!(timeout),
            tries: pick!(tries),
            rest: pick!(rest),
            concurrency: pick!(concurrency),
        }
    }

    /// Fill the remaining gaps with the stock defaults.
    fn into_options(self, name: String) -> SupervisorOptions {
        let stock = SupervisorOptions::default();
        SupervisorOptions {
            name,
            connection: self.connection.unwrap_or(stock.connection),
            queues: self.queues.unwrap_or(stock.queues),
            workers_name: self.workers_name.unwrap_or(stock.workers_name),
            balance: self.balance.unwrap_or(stock.balance),
            min_processes: self.min_processes.unwrap_or(stock.min_processes),
            max_processes: self.max_processes.unwrap_or(stock.max_processes),
            balance_cooldown: self.balance_cooldown.unwrap_or(stock.balance_cooldown),
            balance_max_shift: self.balance_max_shift.unwrap_or(stock.balance_max_shift),
            auto_scaling_strategy: self
                .auto_scaling_strategy
                .unwrap_or(stock.auto_scaling_strategy),
            nice: self.nice.unwrap_or(stock.nice),
            parent_id: None,
            backoff: self.backoff.unwrap_or(stock.backoff),
            max_time: self.max_time.unwrap_or(stock.max_time),
            max_jobs: self.max_jobs.unwrap_or(stock.max_jobs),
            memory: self.memory.unwrap_or(stock.memory),
            sleep: self.sleep.unwrap_or(stock.sleep),
            timeout: self.timeout.unwrap_or(stock.timeout),
            tries: self.tries.unwrap_or(stock.tries),
            rest: self.rest.unwrap_or(stock.rest),
            concurrency: self.concurrency.unwrap_or(stock.concurrency),
        }
    }
}

/// The whole provisioning file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisioningFile {
    #[serde(default)]
    pub defaults: SupervisorTable,
    #[serde(default)]
    pub supervisors: BTreeMap<String, SupervisorTable>,
}

impl ProvisioningFile {
    /// Parse a provisioning file from TOML text.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a provisioning file from disk.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        Self::parse(&text)
    }

    /// Resolve every supervisor into validated options, named
    /// `{master}:{key}` in key order.
    pub fn resolve(&self, master: &str) -> anyhow::Result<Vec<SupervisorOptions>> {
        let mut resolved = Vec::new();
        for (key, table) in &self.supervisors {
            let options = table
                .merged_over(&self.defaults)
                .into_options(format!("{master}:{key}"));
            options.validate()?;
            resolved.push(options);
        }
        Ok(resolved)
    }
}
