//! Spot-price sources for the market-data feeder
//!
//! The feeder is agnostic to where prices come from; anything that can
//! produce a set of `PriceUpdate`s per cycle implements `PriceSource`. The
//! shipped implementation reads spot prices off a DEX contract.

use std::borrow::Cow;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::chain::{self, NodeApi};
use crate::config::Currency;
use crate::error::DispatchResult;
use crate::messages::{QueryMsg, SpotPriceResponse};
use crate::tx::batch::PriceUpdate;

#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> Cow<'static, str>;

    /// One observation per tracked currency, against the quote currency
    async fn spot_prices(&self) -> DispatchResult<Vec<PriceUpdate>>;
}

/// Spot prices read from a DEX contract's pools
pub struct DexSource<N> {
    node: N,
    contract_address: String,
    currencies: Vec<Currency>,
    quote: Currency,
}

impl<N> DexSource<N> {
    pub fn new(
        node: N,
        contract_address: String,
        currencies: Vec<Currency>,
        quote: Currency,
    ) -> Self {
        Self {
            node,
            contract_address,
            currencies,
            quote,
        }
    }
}

#[async_trait]
impl<N: NodeApi> PriceSource for DexSource<N> {
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("dex")
    }

    async fn spot_prices(&self) -> DispatchResult<Vec<PriceUpdate>> {
        let mut prices = Vec::with_capacity(self.currencies.len());

        for currency in &self.currencies {
            let response: SpotPriceResponse = chain::smart_query(
                &self.node,
                &self.contract_address,
                &QueryMsg::SpotPrice {
                    base: currency.dex_denom.clone(),
                    quote: self.quote.dex_denom.clone(),
                },
            )
            .await?;

            debug!(
                ticker = %currency.ticker,
                amount = %response.amount,
                amount_quote = %response.amount_quote,
                "Observed spot price"
            );

            prices.push(PriceUpdate {
                base_ticker: currency.ticker.clone(),
                base_amount: response.amount,
                quote_ticker: self.quote.ticker.clone(),
                quote_amount: response.amount_quote,
                observed_at: Utc::now(),
            });
        }

        Ok(prices)
    }
}
