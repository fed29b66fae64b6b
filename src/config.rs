//! Configuration management for both services
//!
//! Every recognized option is an environment variable, loaded exactly once at
//! startup into an immutable `Settings` struct that is passed explicitly to
//! each component. Nested options use `__` as the separator, e.g.
//! `GAS_FEE_CONF__GAS_ADJUSTMENT_NUMERATOR`.

use std::num::{NonZeroU64, NonZeroUsize};
use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::error::{DispatchError, DispatchResult};
use crate::tx::batch::AlarmKind;
use crate::tx::fee::{FeeConfig, FeeRatio};
use crate::tx::sender::RetryPolicy;

/// Root configuration structure, shared between the feeder and the dispatcher
#[derive(Clone, Deserialize)]
pub struct Settings {
    pub node_grpc_uri: String,
    pub chain_id: String,
    pub address_prefix: String,
    signing_key_mnemonic: String,
    pub admin_contract_address: String,
    pub fee_token_denom: String,
    pub gas_fee_conf: GasFeeConf,
    pub broadcast_delay_duration_seconds: u64,
    pub broadcast_retry_delay_duration_milliseconds: u64,
    pub timeout_duration_seconds: u64,

    // Dispatcher-only options
    pub idle_duration_seconds: Option<u64>,
    pub price_alarms: Option<AlarmsConf>,
    pub time_alarms: Option<AlarmsConf>,

    // Feeder-only options
    pub update_currencies_interval_seconds: Option<u64>,
    pub duration_before_start: Option<u64>,
    pub gas_limit_per_price: Option<u64>,
    pub dex_contract_address: Option<String>,
    pub currencies: Option<String>,
    pub quote_currency: Option<String>,

    pub metrics_port: Option<u16>,
}

/// Exact rational gas and fee policy, split into numerator/denominator pairs
#[derive(Debug, Clone, Deserialize)]
pub struct GasFeeConf {
    pub gas_adjustment_numerator: u64,
    pub gas_adjustment_denominator: u64,
    pub gas_price_numerator: u64,
    pub gas_price_denominator: u64,
    pub fee_adjustment_numerator: u64,
    pub fee_adjustment_denominator: u64,
}

/// Per-alarm-kind batching limits
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AlarmsConf {
    pub gas_limit_per_alarm: u64,
    pub max_alarms_group: u32,
}

/// Validated batching limits for one alarm kind
#[derive(Debug, Clone, Copy)]
pub struct AlarmBatching {
    pub gas_limit_per_alarm: u64,
    pub max_alarms_group: NonZeroUsize,
}

/// Validated dispatcher configuration view
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub idle_duration: Duration,
    pub price_alarms: AlarmBatching,
    pub time_alarms: AlarmBatching,
}

impl DispatcherConfig {
    pub fn batching(&self, kind: AlarmKind) -> AlarmBatching {
        match kind {
            AlarmKind::Price => self.price_alarms,
            AlarmKind::Time => self.time_alarms,
        }
    }
}

/// A tracked currency: the ticker fed to the oracle and the denom the DEX
/// knows it by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Currency {
    pub ticker: String,
    pub dex_denom: String,
}

/// Validated feeder configuration view
#[derive(Debug, Clone)]
pub struct FeederConfig {
    pub update_interval: Duration,
    pub duration_before_start: Duration,
    pub gas_limit_per_price: u64,
    pub dex_contract_address: String,
    pub currencies: Vec<Currency>,
    pub quote: Currency,
}

impl Settings {
    /// Load settings from the process environment
    pub fn load() -> DispatchResult<Self> {
        let settings: Settings = Config::builder()
            .add_source(Environment::default().separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate options shared by both services
    fn validate(&self) -> DispatchResult<()> {
        if self.node_grpc_uri.is_empty() {
            return Err(DispatchError::Configuration(
                "NODE_GRPC_URI must not be empty".into(),
            ));
        }

        if self.timeout_duration_seconds == 0 {
            return Err(DispatchError::Configuration(
                "TIMEOUT_DURATION_SECONDS must be positive".into(),
            ));
        }

        // Surfaces zero denominators at startup instead of on first submission
        self.fee_config().map(|_| ())
    }

    /// The signing mnemonic, zeroized once the key has been derived
    pub fn signing_key_mnemonic(&self) -> Zeroizing<String> {
        Zeroizing::new(self.signing_key_mnemonic.clone())
    }

    /// Assemble the validated rational fee policy
    pub fn fee_config(&self) -> DispatchResult<FeeConfig> {
        let conf = &self.gas_fee_conf;

        Ok(FeeConfig {
            gas_adjustment: ratio(
                conf.gas_adjustment_numerator,
                conf.gas_adjustment_denominator,
                "GAS_ADJUSTMENT",
            )?,
            gas_price: ratio(
                conf.gas_price_numerator,
                conf.gas_price_denominator,
                "GAS_PRICE",
            )?,
            fee_adjustment: ratio(
                conf.fee_adjustment_numerator,
                conf.fee_adjustment_denominator,
                "FEE_ADJUSTMENT",
            )?,
        })
    }

    /// Retry and pacing policy shared by all submissions
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            broadcast_delay: Duration::from_secs(self.broadcast_delay_duration_seconds),
            retry_delay: Duration::from_millis(self.broadcast_retry_delay_duration_milliseconds),
            timeout: Duration::from_secs(self.timeout_duration_seconds),
        }
    }

    /// Validated dispatcher view; errors if a dispatcher option is missing
    pub fn dispatcher(&self) -> DispatchResult<DispatcherConfig> {
        Ok(DispatcherConfig {
            idle_duration: Duration::from_secs(required(
                self.idle_duration_seconds,
                "IDLE_DURATION_SECONDS",
            )?),
            price_alarms: alarm_batching(
                required(self.price_alarms, "PRICE_ALARMS__*")?,
                "PRICE_ALARMS",
            )?,
            time_alarms: alarm_batching(
                required(self.time_alarms, "TIME_ALARMS__*")?,
                "TIME_ALARMS",
            )?,
        })
    }

    /// Validated feeder view; errors if a feeder option is missing
    pub fn feeder(&self) -> DispatchResult<FeederConfig> {
        let currencies = required(self.currencies.as_deref(), "CURRENCIES")?
            .split(',')
            .map(parse_currency)
            .collect::<DispatchResult<Vec<_>>>()?;

        if currencies.is_empty() {
            return Err(DispatchError::Configuration(
                "CURRENCIES must list at least one currency".into(),
            ));
        }

        let gas_limit_per_price = required(self.gas_limit_per_price, "GAS_LIMIT_PER_PRICE")?;

        if gas_limit_per_price == 0 {
            return Err(DispatchError::Configuration(
                "GAS_LIMIT_PER_PRICE must be positive".into(),
            ));
        }

        Ok(FeederConfig {
            update_interval: Duration::from_secs(required(
                self.update_currencies_interval_seconds,
                "UPDATE_CURRENCIES_INTERVAL_SECONDS",
            )?),
            duration_before_start: Duration::from_secs(required(
                self.duration_before_start,
                "DURATION_BEFORE_START",
            )?),
            gas_limit_per_price,
            dex_contract_address: required(
                self.dex_contract_address.clone(),
                "DEX_CONTRACT_ADDRESS",
            )?,
            currencies,
            quote: parse_currency(required(self.quote_currency.as_deref(), "QUOTE_CURRENCY")?)?,
        })
    }
}

fn required<T>(value: Option<T>, name: &str) -> DispatchResult<T> {
    value.ok_or_else(|| DispatchError::Configuration(format!("{name} is not set")))
}

fn ratio(numerator: u64, denominator: u64, name: &str) -> DispatchResult<FeeRatio> {
    NonZeroU64::new(denominator)
        .map(|denominator| FeeRatio::new(numerator, denominator))
        .ok_or_else(|| {
            DispatchError::Configuration(format!(
                "GAS_FEE_CONF__{name}_DENOMINATOR must be non-zero"
            ))
        })
}

fn alarm_batching(conf: AlarmsConf, name: &str) -> DispatchResult<AlarmBatching> {
    if conf.gas_limit_per_alarm == 0 {
        return Err(DispatchError::Configuration(format!(
            "{name}__GAS_LIMIT_PER_ALARM must be positive"
        )));
    }

    NonZeroUsize::new(conf.max_alarms_group as usize)
        .map(|max_alarms_group| AlarmBatching {
            gas_limit_per_alarm: conf.gas_limit_per_alarm,
            max_alarms_group,
        })
        .ok_or_else(|| {
            DispatchError::Configuration(format!("{name}__MAX_ALARMS_GROUP must be positive"))
        })
}

/// Parse a `TICKER=denom` entry
fn parse_currency(entry: &str) -> DispatchResult<Currency> {
    entry
        .split_once('=')
        .map(|(ticker, dex_denom)| Currency {
            ticker: ticker.trim().to_owned(),
            dex_denom: dex_denom.trim().to_owned(),
        })
        .filter(|currency| !currency.ticker.is_empty() && !currency.dex_denom.is_empty())
        .ok_or_else(|| {
            DispatchError::Configuration(format!(
                "Malformed currency entry {entry:?}; expected TICKER=denom"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_base_env() {
        std::env::set_var("NODE_GRPC_URI", "http://localhost:9090");
        std::env::set_var("CHAIN_ID", "testing-1");
        std::env::set_var("ADDRESS_PREFIX", "wasm");
        std::env::set_var("SIGNING_KEY_MNEMONIC", "test test test");
        std::env::set_var("ADMIN_CONTRACT_ADDRESS", "wasm1admin");
        std::env::set_var("FEE_TOKEN_DENOM", "unls");
        std::env::set_var("GAS_FEE_CONF__GAS_ADJUSTMENT_NUMERATOR", "12");
        std::env::set_var("GAS_FEE_CONF__GAS_ADJUSTMENT_DENOMINATOR", "10");
        std::env::set_var("GAS_FEE_CONF__GAS_PRICE_NUMERATOR", "1");
        std::env::set_var("GAS_FEE_CONF__GAS_PRICE_DENOMINATOR", "400");
        std::env::set_var("GAS_FEE_CONF__FEE_ADJUSTMENT_NUMERATOR", "5");
        std::env::set_var("GAS_FEE_CONF__FEE_ADJUSTMENT_DENOMINATOR", "1");
        std::env::set_var("BROADCAST_DELAY_DURATION_SECONDS", "1");
        std::env::set_var("BROADCAST_RETRY_DELAY_DURATION_MILLISECONDS", "500");
        std::env::set_var("TIMEOUT_DURATION_SECONDS", "60");
        std::env::set_var("IDLE_DURATION_SECONDS", "10");
        std::env::set_var("PRICE_ALARMS__GAS_LIMIT_PER_ALARM", "500000");
        std::env::set_var("PRICE_ALARMS__MAX_ALARMS_GROUP", "32");
        std::env::set_var("TIME_ALARMS__GAS_LIMIT_PER_ALARM", "400000");
        std::env::set_var("TIME_ALARMS__MAX_ALARMS_GROUP", "16");
        std::env::set_var("UPDATE_CURRENCIES_INTERVAL_SECONDS", "30");
        std::env::set_var("DURATION_BEFORE_START", "120");
        std::env::set_var("GAS_LIMIT_PER_PRICE", "250000");
        std::env::set_var("DEX_CONTRACT_ADDRESS", "wasm1dex");
        std::env::set_var("CURRENCIES", "ATOM=ibc/atom, OSMO=uosmo");
        std::env::set_var("QUOTE_CURRENCY", "USDC=uusdc");
    }

    #[test]
    fn load_from_environment() {
        set_base_env();

        let settings = Settings::load().unwrap();

        assert_eq!(settings.node_grpc_uri, "http://localhost:9090");
        assert_eq!(settings.fee_token_denom, "unls");
        assert_eq!(settings.retry_policy().retry_delay, Duration::from_millis(500));

        let dispatcher = settings.dispatcher().unwrap();
        assert_eq!(dispatcher.idle_duration, Duration::from_secs(10));
        assert_eq!(dispatcher.price_alarms.max_alarms_group.get(), 32);
        assert_eq!(dispatcher.time_alarms.gas_limit_per_alarm, 400000);

        let feeder = settings.feeder().unwrap();
        assert_eq!(feeder.update_interval, Duration::from_secs(30));
        assert_eq!(feeder.duration_before_start, Duration::from_secs(120));
        assert_eq!(feeder.currencies.len(), 2);
        assert_eq!(feeder.currencies[1].ticker, "OSMO");
        assert_eq!(feeder.quote.dex_denom, "uusdc");
    }

    #[test]
    fn currency_entry_parsing() {
        let currency = parse_currency("ATOM=ibc/ABC123").unwrap();
        assert_eq!(currency.ticker, "ATOM");
        assert_eq!(currency.dex_denom, "ibc/ABC123");

        parse_currency("ATOM").unwrap_err();
        parse_currency("=uatom").unwrap_err();
    }

    #[test]
    fn zero_denominator_is_rejected() {
        let conf = GasFeeConf {
            gas_adjustment_numerator: 1,
            gas_adjustment_denominator: 0,
            gas_price_numerator: 1,
            gas_price_denominator: 1,
            fee_adjustment_numerator: 1,
            fee_adjustment_denominator: 1,
        };

        ratio(conf.gas_adjustment_numerator, conf.gas_adjustment_denominator, "GAS_ADJUSTMENT")
            .unwrap_err();
    }
}
