//! Live-mode session test against an in-process broker harness: start-up
//! rehydration, the four notification streams, order submission and the
//! margin pre-check.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fxengine::{
    Account, AccountStatus, BrokerClient, Engine, FundsTransfer, HedgePolicy, InstrumentSpec,
    OpenTradeRecord, OrderFill, Session, Side, Strategy, SwapCharge, Tick, TickSender,
    TradeSwapCharge, TransportError, NOT_ENOUGH_MARGIN,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

struct HarnessInner {
    specs: Vec<InstrumentSpec>,
    status: AccountStatus,
    open_trades: Vec<OpenTradeRecord>,
    tick_tx: Mutex<Option<TickSender>>,
    fills_tx: Mutex<Option<mpsc::Sender<OrderFill>>>,
    swaps_tx: Mutex<Option<mpsc::Sender<SwapCharge>>>,
    funds_tx: Mutex<Option<mpsc::Sender<FundsTransfer>>>,
    orders: Mutex<Vec<(String, u32, Side)>>,
    next_trade_id: AtomicU64,
}

#[derive(Clone)]
struct HarnessClient(Arc<HarnessInner>);

impl HarnessClient {
    fn new(open_trades: Vec<OpenTradeRecord>) -> Self {
        Self(Arc::new(HarnessInner {
            specs: vec![InstrumentSpec {
                name: "EUR_USD".to_string(),
                base_currency: "EUR".to_string(),
                quote_currency: "USD".to_string(),
                leverage: 50.0,
                pip_location: -4,
            }],
            status: AccountStatus {
                currency: "USD".to_string(),
                hedge: HedgePolicy::NoHedge,
                equity: 10_000.0,
                balance: 10_000.0,
                unrealized_gross_profit: 0.0,
                margin_used: 0.0,
                margin_free: 10_000.0,
                leverage: 20.0,
            },
            open_trades,
            tick_tx: Mutex::new(None),
            fills_tx: Mutex::new(None),
            swaps_tx: Mutex::new(None),
            funds_tx: Mutex::new(None),
            orders: Mutex::new(Vec::new()),
            next_trade_id: AtomicU64::new(100),
        }))
    }

    fn send_tick(&self, bid: f64, ask: f64, seconds: i64) {
        let tick = Tick {
            instrument: "EUR_USD".to_string(),
            bid,
            ask,
            time: start_time() + chrono::Duration::seconds(seconds),
        };
        self.0
            .tick_tx
            .lock()
            .unwrap()
            .as_ref()
            .expect("price subscription active")
            .send(tick);
    }

    async fn send_swap(&self, trade_id: &str, amount: f64) {
        let sender = self.0.swaps_tx.lock().unwrap().clone().unwrap();
        sender
            .send(SwapCharge {
                charges: vec![TradeSwapCharge {
                    trade_id: trade_id.to_string(),
                    amount,
                    instrument: "EUR_USD".to_string(),
                }],
                time: Utc::now(),
            })
            .await
            .unwrap();
    }

    async fn send_funds(&self, amount: f64) {
        let sender = self.0.funds_tx.lock().unwrap().clone().unwrap();
        sender
            .send(FundsTransfer {
                amount,
                time: Utc::now(),
            })
            .await
            .unwrap();
    }

    fn subscribed(&self) -> bool {
        self.0.tick_tx.lock().unwrap().is_some()
            && self.0.fills_tx.lock().unwrap().is_some()
            && self.0.swaps_tx.lock().unwrap().is_some()
            && self.0.funds_tx.lock().unwrap().is_some()
    }

    fn orders_sent(&self) -> usize {
        self.0.orders.lock().unwrap().len()
    }
}

#[async_trait]
impl BrokerClient for HarnessClient {
    async fn available_instruments(
        &self,
        _account_id: &str,
    ) -> Result<Vec<InstrumentSpec>, TransportError> {
        Ok(self.0.specs.clone())
    }

    async fn account_status(&self, _account_id: &str) -> Result<AccountStatus, TransportError> {
        Ok(self.0.status.clone())
    }

    async fn open_trades(
        &self,
        _account_id: &str,
    ) -> Result<Vec<OpenTradeRecord>, TransportError> {
        Ok(self.0.open_trades.clone())
    }

    async fn open_market_order(
        &self,
        _account_id: &str,
        instrument: &str,
        units: u32,
        side: Side,
    ) -> Result<(), TransportError> {
        self.0
            .orders
            .lock()
            .unwrap()
            .push((instrument.to_string(), units, side));

        // Confirm through the fill stream, like a real broker.
        let trade_id = self
            .0
            .next_trade_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let fill = OrderFill {
            error: None,
            trade_close: false,
            order_id: trade_id.clone(),
            trade_id,
            side,
            instrument: instrument.to_string(),
            price: 1.1002,
            units,
            profit: 0.0,
            charged_fees: 0.0,
            time: Utc::now(),
        };
        let sender = self.0.fills_tx.lock().unwrap().clone().unwrap();
        sender
            .send(fill)
            .await
            .map_err(|e| TransportError::new(e.to_string()))
    }

    async fn subscribe_prices(
        &self,
        _account_id: &str,
        _instruments: Vec<InstrumentSpec>,
        ticks: TickSender,
    ) -> Result<(), TransportError> {
        *self.0.tick_tx.lock().unwrap() = Some(ticks);
        Ok(())
    }

    async fn subscribe_order_fills(
        &self,
        _account_id: &str,
        fills: mpsc::Sender<OrderFill>,
    ) -> Result<(), TransportError> {
        *self.0.fills_tx.lock().unwrap() = Some(fills);
        Ok(())
    }

    async fn subscribe_swap_charges(
        &self,
        _account_id: &str,
        charges: mpsc::Sender<SwapCharge>,
    ) -> Result<(), TransportError> {
        *self.0.swaps_tx.lock().unwrap() = Some(charges);
        Ok(())
    }

    async fn subscribe_funds_transfers(
        &self,
        _account_id: &str,
        transfers: mpsc::Sender<FundsTransfer>,
    ) -> Result<(), TransportError> {
        *self.0.funds_tx.lock().unwrap() = Some(transfers);
        Ok(())
    }
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

#[derive(Default)]
struct SharedState {
    account: Mutex<Option<Arc<Account>>>,
    fills: Mutex<Vec<OrderFill>>,
}

/// Exposes the engine's account to the test and stops after a fixed number
/// of ticks.
struct ProbeStrategy {
    engine: Option<Arc<dyn Engine>>,
    shared: Arc<SharedState>,
    ticks: u32,
    stop_after: u32,
    buy_on_first_tick: Option<u32>,
}

impl Strategy for ProbeStrategy {
    fn set_engine(&mut self, engine: Arc<dyn Engine>) {
        *self.shared.account.lock().unwrap() = Some(engine.account());
        self.engine = Some(engine);
    }

    fn on_tick(&mut self, tick: &Tick) {
        self.ticks += 1;
        let engine = self.engine.as_ref().unwrap();

        if self.ticks == 1 {
            if let Some(units) = self.buy_on_first_tick {
                engine.buy(&tick.instrument, units);
            }
        }

        if self.ticks >= self.stop_after {
            engine.stop_session();
        }
    }

    fn on_order_fill(&mut self, fill: &OrderFill) {
        self.shared.fills.lock().unwrap().push(fill.clone());
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn live_session_rehydrates_and_consumes_all_streams() {
    let client = HarnessClient::new(vec![OpenTradeRecord {
        id: "T1".to_string(),
        instrument: "EUR_USD".to_string(),
        side: Side::Long,
        units: 1000,
        open_price: 1.10,
        charged_fees: -2.0,
        open_time: start_time() - chrono::Duration::hours(5),
    }]);

    let shared = Arc::new(SharedState::default());
    let strategy = ProbeStrategy {
        engine: None,
        shared: shared.clone(),
        ticks: 0,
        stop_after: 2,
        buy_on_first_tick: Some(1000),
    };

    let session = Session::builder()
        .instruments(["EUR_USD"])
        .account_id("001-001")
        .live()
        .strategy(strategy)
        .client(client.clone())
        .build()
        .unwrap();

    let session_handle = tokio::spawn(session.run());

    wait_for(|| client.subscribed()).await;
    let account = shared.account.lock().unwrap().clone().unwrap();

    // Rehydrated trade with its broker-reported fees.
    let instrument = account.instrument("EUR_USD").unwrap().clone();
    assert_eq!(instrument.trades_number(), 1);
    let rehydrated = instrument.trade("T1").unwrap();
    assert!((rehydrated.charged_fees() + 2.0).abs() < 1e-9);

    // Prime readiness, then let the strategy trade.
    client.send_tick(1.0998, 1.10, 0);
    client.send_tick(1.0998, 1.10, 1);

    wait_for(|| instrument.trades_number() == 2).await;
    assert_eq!(client.orders_sent(), 1);
    wait_for(|| !shared.fills.lock().unwrap().is_empty()).await;

    // Swap on the rehydrated trade, swap on an unknown trade (skipped),
    // and a funds transfer.
    client.send_swap("T1", -1.5).await;
    client.send_swap("no-such-trade", -99.0).await;
    client.send_funds(50.0).await;

    wait_for(|| (rehydrated.charged_fees() + 3.5).abs() < 1e-9).await;
    wait_for(|| (account.balance() - 10_048.5).abs() < 1e-9).await;

    // Third tick reaches stop_after and ends the session.
    client.send_tick(1.0999, 1.1001, 2);
    timeout(Duration::from_secs(5), session_handle)
        .await
        .expect("session did not stop")
        .unwrap()
        .unwrap();

    // Unknown-trade swap never touched the balance: 10000 - 1.5 + 50.
    assert!((account.balance() - 10_048.5).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn live_margin_precheck_rejects_without_broker_call() {
    let client = HarnessClient::new(Vec::new());

    let shared = Arc::new(SharedState::default());
    let strategy = ProbeStrategy {
        engine: None,
        shared: shared.clone(),
        ticks: 0,
        stop_after: 2,
        buy_on_first_tick: Some(10_000_000),
    };

    let session = Session::builder()
        .instruments(["EUR_USD"])
        .account_id("001-001")
        .live()
        .strategy(strategy)
        .client(client.clone())
        .build()
        .unwrap();

    let session_handle = tokio::spawn(session.run());

    wait_for(|| client.subscribed()).await;
    client.send_tick(1.0998, 1.10, 0);
    client.send_tick(1.0998, 1.10, 1);

    wait_for(|| !shared.fills.lock().unwrap().is_empty()).await;
    {
        let fills = shared.fills.lock().unwrap();
        assert_eq!(fills[0].error.as_deref(), Some(NOT_ENOUGH_MARGIN));
    }
    assert_eq!(client.orders_sent(), 0);

    client.send_tick(1.0998, 1.10, 2);
    timeout(Duration::from_secs(5), session_handle)
        .await
        .expect("session did not stop")
        .unwrap()
        .unwrap();
}
