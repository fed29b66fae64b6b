//! Contract message DTOs
//!
//! JSON shapes exchanged with the admin contract (alarm queries, alarm
//! dispatch, price feeding) and the DEX contract (spot prices).

use serde::{Deserialize, Serialize};

/// Identifier of a registered alarm
pub type AlarmId = u64;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMsg {
    FeedPrices { prices: Vec<PriceDto> },
    DispatchPriceAlarms { ids: Vec<AlarmId> },
    DispatchTimeAlarms { ids: Vec<AlarmId> },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMsg {
    DuePriceAlarms { max_count: u32 },
    DueTimeAlarms { max_count: u32 },
    SpotPrice { base: String, quote: String },
}

/// Alarms the contract reports as due, oldest first
#[derive(Debug, Clone, Deserialize)]
pub struct DueAlarmsResponse {
    pub ids: Vec<AlarmId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoinDto {
    pub amount: String,
    pub ticker: String,
}

/// One observed price: base amount against quote amount
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceDto {
    pub amount: CoinDto,
    pub amount_quote: CoinDto,
}

/// DEX spot-price answer, amounts in the two pool denominations
#[derive(Debug, Clone, Deserialize)]
pub struct SpotPriceResponse {
    pub amount: String,
    pub amount_quote: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_msg_shape() {
        let msg = ExecuteMsg::DispatchTimeAlarms { ids: vec![3, 5] };

        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"dispatch_time_alarms":{"ids":[3,5]}}"#
        );
    }

    #[test]
    fn query_msg_shape() {
        let msg = QueryMsg::DuePriceAlarms { max_count: 128 };

        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"due_price_alarms":{"max_count":128}}"#
        );
    }

    #[test]
    fn due_alarms_response_shape() {
        let response: DueAlarmsResponse = serde_json::from_str(r#"{"ids":[1,2,8]}"#).unwrap();

        assert_eq!(response.ids, vec![1, 2, 8]);
    }
}
