//! Session configuration and entry point.
//!
//! A [`Session`] wires a strategy and a broker client to one of the two
//! execution modes. Configuration is a builder; `build` validates that the
//! combination is runnable and `run` drives the session to completion.

use crate::broker::BrokerClient;
use crate::engine::{BacktestEngine, BacktestParams, ConfigError, EngineError, LiveEngine};
use crate::strategy::Strategy;
use crate::types::HedgePolicy;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Live,
    Backtest,
}

#[derive(Default)]
pub struct SessionBuilder {
    instruments: Vec<String>,
    account_id: Option<String>,
    initial_balance: Option<f64>,
    home_currency: Option<String>,
    leverage: Option<f64>,
    hedge: Option<HedgePolicy>,
    mode: Option<Mode>,
    strategy: Option<Box<dyn Strategy>>,
    client: Option<Arc<dyn BrokerClient>>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The instruments this session trades. Everything else the engine
    /// subscribes to is derived (conversion auxiliaries).
    pub fn instruments<I, S>(mut self, instruments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instruments = instruments.into_iter().map(Into::into).collect();
        self
    }

    pub fn account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    /// Starting balance. Backtest only; live sessions take it from the
    /// broker's account status.
    pub fn initial_balance(mut self, balance: f64) -> Self {
        self.initial_balance = Some(balance);
        self
    }

    /// Reporting currency. Backtest only.
    pub fn home_currency(mut self, currency: impl Into<String>) -> Self {
        self.home_currency = Some(currency.into());
        self
    }

    /// Account leverage. Backtest only.
    pub fn leverage(mut self, leverage: f64) -> Self {
        self.leverage = Some(leverage);
        self
    }

    /// Margin hedging policy. Backtest only; defaults to
    /// [`HedgePolicy::NoHedge`].
    pub fn hedge(mut self, hedge: HedgePolicy) -> Self {
        self.hedge = Some(hedge);
        self
    }

    pub fn live(mut self) -> Self {
        self.mode = Some(Mode::Live);
        self
    }

    pub fn backtest(mut self) -> Self {
        self.mode = Some(Mode::Backtest);
        self
    }

    pub fn strategy(mut self, strategy: impl Strategy + 'static) -> Self {
        self.strategy = Some(Box::new(strategy));
        self
    }

    pub fn client(mut self, client: impl BrokerClient + 'static) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    pub fn build(self) -> Result<Session, ConfigError> {
        let mode = self.mode.ok_or(ConfigError::ModeNotSet)?;
        let strategy = self.strategy.ok_or(ConfigError::MissingStrategy)?;
        let client = self.client.ok_or(ConfigError::MissingClient)?;

        if self.instruments.is_empty() {
            return Err(ConfigError::NoInstruments);
        }

        let mode = match mode {
            Mode::Live => {
                let account_id = self.account_id.ok_or(ConfigError::MissingAccountId)?;
                ModeConfig::Live { account_id }
            }
            Mode::Backtest => ModeConfig::Backtest {
                account_id: self.account_id.unwrap_or_else(|| "backtest".to_string()),
                params: BacktestParams {
                    initial_balance: self
                        .initial_balance
                        .ok_or(ConfigError::MissingBacktestParameter("an initial balance"))?,
                    home_currency: self
                        .home_currency
                        .ok_or(ConfigError::MissingBacktestParameter("a home currency"))?,
                    leverage: self
                        .leverage
                        .ok_or(ConfigError::MissingBacktestParameter("an account leverage"))?,
                    hedge: self.hedge.unwrap_or(HedgePolicy::NoHedge),
                },
            },
        };

        Ok(Session {
            mode,
            instruments: self.instruments,
            client,
            strategy,
        })
    }
}

enum ModeConfig {
    Live { account_id: String },
    Backtest { account_id: String, params: BacktestParams },
}

/// A fully configured trading session.
pub struct Session {
    mode: ModeConfig,
    instruments: Vec<String>,
    client: Arc<dyn BrokerClient>,
    strategy: Box<dyn Strategy>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Runs the session to completion: until `stop_session`, an exhausted
    /// tick source (backtest) or an interrupt (live).
    pub async fn run(self) -> Result<(), EngineError> {
        match self.mode {
            ModeConfig::Live { account_id } => {
                LiveEngine::run(account_id, self.instruments, self.client, self.strategy).await
            }
            ModeConfig::Backtest { account_id, params } => {
                BacktestEngine::run(
                    account_id,
                    self.instruments,
                    params,
                    self.client,
                    self.strategy,
                )
                .await
            }
        }
    }
}
