pub mod collectors;
pub mod config;
pub mod logging;
#[cfg(feature = "status")]
pub mod status;

pub use collectors::{MetricsCollector, Snapshot};

#[cfg(test)]
mod tests {
    use super::config::{merge_config, StatsConfig};
    use proptest::prelude::*;
    proptest! {
    #[test] fn merge_config_prefers_b_over_a(s in ".*", n in 1usize..100){ let a=StatsConfig::default(); let mut b=a.clone(); b.common.instance_id=s.clone(); b.sources.top_n_procs=n; let m=merge_config(&a,&b); prop_assert_eq!(m.common.instance_id,s); prop_assert_eq!(m.sources.top_n_procs,n); } }
}
