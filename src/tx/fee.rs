//! Fee computation from exact rational configuration
//!
//! Gas headroom, gas price and the final fee multiplier are configured as
//! numerator/denominator pairs and applied with checked integer arithmetic,
//! rounding up at every step. No floating point is involved anywhere, so the
//! computed fee for a given gas estimate is identical across runs and hosts.

use std::num::NonZeroU64;

use cosmrs::{tx::Fee, Coin};

use crate::error::{DispatchError, DispatchResult};

/// Exact rational multiplier used in gas and fee computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeRatio {
    numerator: u64,
    denominator: NonZeroU64,
}

impl FeeRatio {
    pub const fn new(numerator: u64, denominator: NonZeroU64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Multiply `value` by the ratio, rounding up
    fn mul_ceil(&self, value: u128, operation: &'static str) -> DispatchResult<u128> {
        value
            .checked_mul(u128::from(self.numerator))
            .map(|product| product.div_ceil(u128::from(self.denominator.get())))
            .ok_or(DispatchError::Overflow { operation })
    }
}

/// The three independent ratios composing the fee policy
#[derive(Debug, Clone, Copy)]
pub struct FeeConfig {
    pub gas_adjustment: FeeRatio,
    pub gas_price: FeeRatio,
    pub fee_adjustment: FeeRatio,
}

/// Outcome of a fee computation: the gas to request and the fee to attach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputedFee {
    pub gas_limit: u64,
    pub amount: u128,
}

/// Pure fee calculator; all submissions of a process share one instance
#[derive(Debug, Clone)]
pub struct FeeCalculator {
    config: FeeConfig,
    denom: String,
}

impl FeeCalculator {
    pub fn new(config: FeeConfig, denom: impl Into<String>) -> Self {
        Self {
            config,
            denom: denom.into(),
        }
    }

    /// Compute the gas limit and fee amount for a gas usage estimate
    ///
    /// `adjusted_gas = ceil(estimate * gas_adjustment)`, then
    /// `fee = ceil(ceil(adjusted_gas * gas_price) * fee_adjustment)`, in the
    /// smallest unit of the fee token. Errors with `Overflow` instead of
    /// wrapping.
    pub fn compute(&self, gas_estimate: u64) -> DispatchResult<ComputedFee> {
        let adjusted_gas = self
            .config
            .gas_adjustment
            .mul_ceil(u128::from(gas_estimate), "gas adjustment")?;

        let gas_limit = u64::try_from(adjusted_gas)
            .map_err(|_| DispatchError::Overflow {
                operation: "gas adjustment",
            })?;

        let base_fee = self
            .config
            .gas_price
            .mul_ceil(adjusted_gas, "gas pricing")?;

        let amount = self
            .config
            .fee_adjustment
            .mul_ceil(base_fee, "fee adjustment")?;

        Ok(ComputedFee { gas_limit, amount })
    }

    /// Render a computed fee as the transaction fee structure
    pub fn to_tx_fee(&self, computed: ComputedFee) -> DispatchResult<Fee> {
        Coin::new(computed.amount, &self.denom)
            .map(|coin| Fee::from_amount_and_gas(coin, computed.gas_limit))
            .map_err(|error| {
                DispatchError::Configuration(format!("Invalid fee token denom: {error}"))
            })
    }
}
