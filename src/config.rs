//! Iteration cap, recalculation order, protect mode and external-command
//! enablement, gathered into one struct instead of process-wide globals.

use crate::sheet::RecalcOrder;

#[derive(Debug, Clone)]
pub struct Config {
    pub iterations: u32,
    pub order: RecalcOrder,
    pub protect: bool,
    pub external_enabled: bool,
    /// Pins the PRNG seed for `rand()`/`randbetween()`, for reproducible
    /// test runs; `None` seeds from OS entropy.
    pub rng_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            iterations: 10,
            order: RecalcOrder::ByRows,
            protect: false,
            external_enabled: false,
            rng_seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_reference_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.iterations, 10);
        assert!(!cfg.protect);
        assert!(!cfg.external_enabled);
    }
}
