//! Eviction of low-value knowledge

use crate::error::Result;
use crate::store::GraphStore;
use crate::SECS_PER_DAY;

impl GraphStore {
    /// Delete nodes that are both weak and stale
    ///
    /// A node is removed only when its weight is below `threshold` AND it
    /// has not been used for more than `unused_days`. Each removal goes
    /// through [`GraphStore::delete`].
    pub fn prune(&mut self, threshold: f32, unused_days: i64) -> Result<usize> {
        let cutoff = self.unused_cutoff(unused_days);
        let doomed: Vec<String> = self
            .nodes(&[])
            .into_iter()
            .filter(|n| n.scores.weight < threshold && n.timestamps.last_used < cutoff)
            .map(|n| n.id.clone())
            .collect();

        let mut removed = 0;
        for id in doomed {
            if self.delete(&id)? {
                removed += 1;
            }
        }

        if removed > 0 {
            log::info!(
                "Pruned {} nodes (weight < {}, unused > {} days)",
                removed,
                threshold,
                unused_days
            );
        }
        Ok(removed)
    }

    /// Scale down the weight of nodes unused for more than `unused_days`
    ///
    /// Not delta tracked.
    pub fn decay(&mut self, factor: f32, unused_days: i64) -> Result<usize> {
        let factor = factor.clamp(0.0, 1.0);
        let cutoff = self.unused_cutoff(unused_days);

        let mut decayed = 0;
        let mut touched = Vec::new();
        for (node_type, partition) in self.partitions.iter_mut() {
            let before = decayed;
            for node in partition.values_mut() {
                if node.timestamps.last_used < cutoff {
                    node.scores.weight = (node.scores.weight * factor).clamp(0.0, 1.0);
                    decayed += 1;
                }
            }
            if decayed > before {
                touched.push(*node_type);
            }
        }

        for node_type in touched {
            self.persist_partition(node_type)?;
        }

        log::debug!("Decayed {} nodes by {}", decayed, factor);
        Ok(decayed)
    }

    /// Last-used time before which a node counts as unused; negative day
    /// counts mean zero
    fn unused_cutoff(&self, unused_days: i64) -> i64 {
        self.clock
            .now()
            .saturating_sub(unused_days.max(0).saturating_mul(SECS_PER_DAY))
    }
}
