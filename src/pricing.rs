//! # Pricing
//!
//! Computes the price of accepting an event, in the relay's smallest
//! settlement unit, as a pure function of the event's encoded length and
//! kind. No state, no I/O — every call with the same inputs returns the
//! same price.

use num_bigint::BigUint;
use std::collections::HashMap;

/// Per-byte prices, configured once at startup and shared read-only
/// thereafter.
#[derive(Debug, Clone)]
pub struct PricingConfig {
    /// Price per byte for kinds with no entry in `kind_overrides`.
    pub base_price_per_byte: u64,
    /// Price per byte for specific kinds, taking precedence over the base
    /// rate.
    pub kind_overrides: HashMap<u32, u64>,
    /// The kind treated as an SPSP probe (spec.md §4.D's clamp rule).
    pub spsp_kind: u32,
    /// A price cap for `spsp_kind` events: when set and the length-derived
    /// price would exceed it, the required price is clamped down to it
    /// (allowing near-zero-cost SPSP handshakes regardless of payload
    /// size). `None` means SPSP-kind events are priced the same as any
    /// other kind — unset is not the same as a cap of zero.
    pub spsp_min_price: Option<u64>,
}

impl PricingConfig {
    /// The per-byte rate that applies to `kind`.
    pub fn per_byte(&self, kind: u32) -> u64 {
        self.kind_overrides
            .get(&kind)
            .copied()
            .unwrap_or(self.base_price_per_byte)
    }

    /// The price, in settlement units, to accept an event of `encoded_len`
    /// bytes and the given `kind`.
    pub fn price(&self, encoded_len: usize, kind: u32) -> BigUint {
        let per_byte = BigUint::from(self.per_byte(kind));
        let len = BigUint::from(encoded_len);
        let price = per_byte * len;

        match (kind == self.spsp_kind, self.spsp_min_price) {
            (true, Some(cap)) => price.min(BigUint::from(cap)),
            _ => price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PricingConfig {
        let mut kind_overrides = HashMap::new();
        kind_overrides.insert(1, 10);
        PricingConfig {
            base_price_per_byte: 2,
            kind_overrides,
            spsp_kind: 23194,
            spsp_min_price: Some(500),
        }
    }

    #[test]
    fn uses_base_rate_by_default() {
        let cfg = config();
        assert_eq!(cfg.price(100, 42), BigUint::from(200u64));
    }

    #[test]
    fn kind_override_takes_precedence() {
        let cfg = config();
        assert_eq!(cfg.price(100, 1), BigUint::from(1000u64));
    }

    #[test]
    fn zero_length_event_is_free_outside_spsp() {
        let cfg = config();
        assert_eq!(cfg.price(0, 42), BigUint::from(0u64));
    }

    #[test]
    fn spsp_clamp_leaves_price_below_cap_untouched() {
        let cfg = config();
        // 10 bytes * 2/byte = 20, well under the 500 cap.
        assert_eq!(cfg.price(10, 23194), BigUint::from(20u64));
    }

    #[test]
    fn spsp_clamp_caps_price_above_cap() {
        let cfg = config();
        // 1000 bytes * 2/byte = 2000, above the 500 cap: clamped down so
        // SPSP handshakes stay cheap regardless of payload size.
        assert_eq!(cfg.price(1000, 23194), BigUint::from(500u64));
    }

    #[test]
    fn spsp_zero_cap_allows_free_handshake() {
        let mut cfg = config();
        cfg.spsp_min_price = Some(0);
        assert_eq!(cfg.price(1000, 23194), BigUint::from(0u64));
    }

    #[test]
    fn spsp_unset_cap_prices_normally() {
        let mut cfg = config();
        cfg.spsp_min_price = None;
        // No cap configured: priced like any other kind, 1000 bytes * 2/byte.
        assert_eq!(cfg.price(1000, 23194), BigUint::from(2000u64));
    }

    #[test]
    fn price_is_monotonic_in_length() {
        let cfg = config();
        let mut previous = BigUint::from(0u64);
        for len in [0, 1, 10, 100, 10_000] {
            let current = cfg.price(len, 42);
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn large_length_does_not_overflow() {
        let cfg = config();
        let price = cfg.price(usize::MAX, 42);
        assert!(price > BigUint::from(u64::MAX));
    }
}
