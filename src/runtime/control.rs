//! Runtime control block
//!
//! Everything an iterator may touch besides its own state: the register
//! array, the bound external variables, the memory ledger and the single
//! fetch allowed per call.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{QueryError, QueryResult};
use crate::fetch::{Batch, ConsumedCapacity, FetchRequest, Fetcher};
use crate::observability::{Event, QueryMetrics};
use crate::plan::RegisterId;
use crate::value::Value;

use super::config::QueryConfig;
use super::memory::MemoryLedger;

/// Caller side of a cancellation signal
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// A signal to pass in `ExecuteOptions`
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Abort the fetch in flight (or the next one)
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine side of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; never resolves if the handle is dropped first
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub struct RuntimeControl {
    query_id: Uuid,
    registers: Vec<Value>,
    external_vars: Vec<Option<Value>>,
    ledger: Arc<MemoryLedger>,
    fetcher: Arc<dyn Fetcher>,
    config: QueryConfig,
    metrics: Arc<QueryMetrics>,
    cancel: Option<CancelSignal>,
    fetch_done: bool,
    needs_continuation: bool,
    call_consumed: ConsumedCapacity,
    total_consumed: ConsumedCapacity,
    pending_compile_cost: Option<ConsumedCapacity>,
}

impl RuntimeControl {
    pub fn new(
        query_id: Uuid,
        num_registers: usize,
        fetcher: Arc<dyn Fetcher>,
        config: QueryConfig,
        metrics: Arc<QueryMetrics>,
    ) -> Self {
        let ledger = Arc::new(MemoryLedger::new(config.max_memory_bytes));
        Self {
            query_id,
            registers: vec![Value::Empty; num_registers],
            external_vars: Vec::new(),
            ledger,
            fetcher,
            config,
            metrics,
            cancel: None,
            fetch_done: false,
            needs_continuation: false,
            call_consumed: ConsumedCapacity::default(),
            total_consumed: ConsumedCapacity::default(),
            pending_compile_cost: None,
        }
    }

    pub fn with_external_vars(mut self, vars: Vec<Option<Value>>) -> Self {
        self.external_vars = vars;
        self
    }

    /// Charged together with the first successful fetch
    pub fn with_compile_cost(mut self, cost: Option<ConsumedCapacity>) -> Self {
        self.pending_compile_cost = cost;
        self
    }

    /// Re-arms the per-call state
    pub fn begin_call(&mut self, cancel: Option<CancelSignal>) {
        self.fetch_done = false;
        self.needs_continuation = false;
        self.cancel = cancel;
    }

    pub fn query_id(&self) -> Uuid {
        self.query_id
    }

    pub fn reg(&self, id: RegisterId) -> &Value {
        self.registers.get(id).unwrap_or(&Value::Empty)
    }

    pub fn set_reg(&mut self, id: RegisterId, value: Value) {
        if let Some(slot) = self.registers.get_mut(id) {
            *slot = value;
        }
    }

    /// Value bound to the external variable at position `id`
    pub fn external_var(&self, id: usize, name: &str) -> QueryResult<&Value> {
        self.external_vars
            .get(id)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                QueryError::defect(format!("external variable {} referenced before binding", name))
            })
    }

    pub fn ledger(&self) -> &Arc<MemoryLedger> {
        &self.ledger
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn metrics(&self) -> &QueryMetrics {
        &self.metrics
    }

    /// Whether this call already spent its fetch
    pub fn fetch_done(&self) -> bool {
        self.fetch_done
    }

    pub fn needs_continuation(&self) -> bool {
        self.needs_continuation
    }

    /// Records that an iterator stopped only because the fetch budget of
    /// this call is spent
    pub fn set_needs_continuation(&mut self) {
        self.needs_continuation = true;
    }

    pub fn total_consumed(&self) -> ConsumedCapacity {
        self.total_consumed
    }

    /// Capacity consumed since the last call that returned successfully
    pub fn take_call_consumed(&mut self) -> ConsumedCapacity {
        std::mem::take(&mut self.call_consumed)
    }

    /// Issues the one fetch this call is allowed.
    ///
    /// Nothing is recorded unless the fetch succeeds, so the caller can
    /// retry with its state untouched.
    pub async fn fetch(&mut self, request: FetchRequest) -> QueryResult<Batch> {
        if self.fetch_done {
            return Err(QueryError::defect("second fetch requested within one call"));
        }
        self.fetch_done = true;
        self.metrics.increment_fetches();
        debug!(
            event = Event::FetchIssued.as_str(),
            query_id = %self.query_id,
            target = ?request.target,
            limit = request.limit,
            "fetching batch"
        );

        let fetcher = Arc::clone(&self.fetcher);
        let pending = fetcher.fetch(request);
        let result = match self.cancel.as_mut() {
            Some(signal) => {
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => {
                        debug!(event = Event::FetchCancelled.as_str(), query_id = %self.query_id);
                        Err(QueryError::Cancelled)
                    }
                    result = pending => result.map_err(QueryError::from),
                }
            }
            None => pending.await.map_err(QueryError::from),
        };

        match result {
            Ok(batch) => {
                let mut consumed = batch.consumed;
                if let Some(cost) = self.pending_compile_cost.take() {
                    consumed += cost;
                }
                self.call_consumed += consumed;
                self.total_consumed += consumed;
                Ok(batch)
            }
            Err(e) => {
                self.metrics.increment_fetch_failures();
                warn!(
                    event = Event::FetchFailed.as_str(),
                    query_id = %self.query_id,
                    retryable = e.is_retryable(),
                    error = %e,
                    "fetch failed"
                );
                Err(e)
            }
        }
    }
}
