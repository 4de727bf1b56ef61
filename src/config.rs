//! Graph-wide configuration.

/// Settings that affect how a [`crate::composite::Composite`] is run,
/// independent of its topology.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Run blocks as separate forked processes ([`crate::process`])
    /// rather than cooperatively in one task ([`crate::coop`]).
    ///
    /// Defaults to `true`: process isolation is the safer default for
    /// blocks that might wedge or crash.
    pub multiprocess: bool,

    /// Verbose debug logging from the engine's own bookkeeping
    /// (differentiation, rate resolution, pass-by-pass scheduling).
    pub debug: bool,
}

impl GraphConfig {
    /// Log level the engine's internal `debug!`/`trace!` calls should be
    /// compared against, derived from `self.debug`. The embedding binary
    /// decides how (or whether) to actually install a logger; this just
    /// tells it what the graph wants to say.
    #[must_use]
    pub fn level_filter(&self) -> log::LevelFilter {
        if self.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            multiprocess: true,
            debug: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prefers_multiprocess() {
        let cfg = GraphConfig::default();
        assert!(cfg.multiprocess);
        assert_eq!(cfg.level_filter(), log::LevelFilter::Info);
    }
}
