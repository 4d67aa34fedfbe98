//! Partitioner — groups primary definitions into partial units and closes
//! each group's dependency set.
//!
//! A translation unit small enough to pass straight through an ordinary
//! compiler without trouble doesn't need splitting at all; partitioning
//! only kicks in once the unit crosses `passthrough_threshold` primary
//! definitions, or is forced on with `split`, so that running PUS on a
//! small `.i` file is a no-op rather than needlessly fragmenting it.

use crate::resolve::close_necessary;
use crate::symtab::{Frozen, PuKey, PuKeySet};

/// One partial unit: a set of root (owned) definitions plus everything
/// transitively necessary to compile them standalone.
#[derive(Debug)]
pub struct Pu {
    pub id: usize,
    pub root_keys: Vec<PuKey>,
    pub necessary: PuKeySet,
}

impl Pu {
    /// Does this PU itself own `key`'s definition (i.e. should emit a body
    /// for it rather than a declaration)?
    pub fn owns(&self, key: &PuKey) -> bool {
        self.root_keys.contains(key)
    }
}

#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Definitions per partial unit once splitting is active.
    pub target_pu_size: usize,
    /// Below this many primary definitions, emit one passthrough PU
    /// instead of splitting (unless `split` forces it anyway).
    pub passthrough_threshold: usize,
    /// Force splitting even under `passthrough_threshold` — useful for
    /// exercising the splitter on small inputs in tests.
    pub split: bool,
    /// Restrict output to this one PU id, if set (`PU_FILTER`).
    pub pu_filter: Option<usize>,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        PartitionConfig {
            target_pu_size: 64,
            passthrough_threshold: 8,
            split: false,
            pu_filter: None,
        }
    }
}

/// Partition `table`'s primary definitions into partial units and close
/// each one's `necessary` set.
pub fn partition(table: &Frozen, config: &PartitionConfig) -> Vec<Pu> {
    let defs = table.primary_definitions();

    let groups: Vec<Vec<PuKey>> = if defs.len() <= config.passthrough_threshold && !config.split {
        if defs.is_empty() {
            Vec::new()
        } else {
            vec![defs]
        }
    } else {
        let size = config.target_pu_size.max(1);
        defs.chunks(size).map(|c| c.to_vec()).collect()
    };

    groups
        .into_iter()
        .enumerate()
        .filter(|(id, _)| config.pu_filter.map(|f| f == *id).unwrap_or(true))
        .map(|(id, root_keys)| {
            let necessary = close_necessary(table, &root_keys);
            Pu {
                id,
                root_keys,
                necessary,
            }
        })
        .collect()
}
