//! Grouping of resolved commands by target server

use log::warn;
use shared::{ProductId, ServerTarget, TargetSelector};
use std::collections::BTreeMap;

/// One resolved command line from one purchased item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub source_item_id: ProductId,
    pub template: String,
    pub command: String,
    pub selector: TargetSelector,
}

/// Server index → commands for that server, in gathering order
pub type DispatchBucket = BTreeMap<usize, Vec<CommandSpec>>;

#[derive(Debug, Default)]
pub struct Distribution {
    pub buckets: DispatchBucket,
    /// Non-fatal notes, e.g. a selector pointing past the server list
    pub warnings: Vec<String>,
}

impl Distribution {
    pub fn expected(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Pure function of its inputs: the same commands and servers always give the
/// same buckets.
pub fn distribute(commands: &[CommandSpec], servers: &[ServerTarget]) -> Distribution {
    let mut distribution = Distribution::default();
    if servers.is_empty() {
        return distribution;
    }

    for spec in commands {
        match spec.selector {
            TargetSelector::All => {
                for index in 0..servers.len() {
                    push(&mut distribution.buckets, index, spec);
                }
            }
            TargetSelector::Index(index) if index < servers.len() => {
                push(&mut distribution.buckets, index, spec);
            }
            TargetSelector::Index(index) => {
                let warning = format!(
                    "Product {}: selected server index {} not found, using default",
                    spec.source_item_id, index
                );
                warn!("{}", warning);
                distribution.warnings.push(warning);
                push(&mut distribution.buckets, 0, spec);
            }
            TargetSelector::Default => push(&mut distribution.buckets, 0, spec),
        }
    }

    distribution
}

fn push(buckets: &mut DispatchBucket, index: usize, spec: &CommandSpec) {
    buckets.entry(index).or_default().push(spec.clone());
}
