// Error taxonomy for session start-up and engine operation. Business-level
// rejections (margin, unknown trades) never appear here: they travel to the
// strategy inside `OrderFill.error`.

use crate::broker::TransportError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("no execution mode selected; call live() or backtest() before starting")]
    ModeNotSet,

    #[error("no strategy configured")]
    MissingStrategy,

    #[error("no broker client configured")]
    MissingClient,

    #[error("live sessions require an account id")]
    MissingAccountId,

    #[error("no instruments configured")]
    NoInstruments,

    #[error("instrument {0} is not available from the broker")]
    UnknownInstrument(String),

    #[error("backtest sessions require {0}")]
    MissingBacktestParameter(&'static str),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
