//! Query driver
//!
//! Entry point for callers: starts queries, resumes them from continuation
//! tokens and releases them when drained or abandoned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{QueryError, QueryResult};
use crate::fetch::{ConsumedCapacity, Fetcher};
use crate::observability::{Event, QueryMetrics};
use crate::plan::PreparedPlan;
use crate::value::Value;

use super::config::{ExecuteOptions, QueryConfig};
use super::continuation::ContinuationToken;
use super::query::QueryRuntime;

/// Values for a plan's external variables, by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundVariables {
    values: Vec<(String, Value)>,
}

impl BoundVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name`, replacing an earlier binding of the same name
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Places bound values at the positions the plan declares
fn bind_external_vars(
    plan: &PreparedPlan,
    bindings: &BoundVariables,
) -> QueryResult<Vec<Option<Value>>> {
    if bindings.len() != plan.external_vars.len() {
        return Err(QueryError::invalid_argument(format!(
            "query declares {} external variables but {} were bound",
            plan.external_vars.len(),
            bindings.len()
        )));
    }
    let mut values = vec![None; plan.external_vars.len()];
    for var in &plan.external_vars {
        let value = bindings.get(&var.name).ok_or_else(|| {
            QueryError::invalid_argument(format!("external variable {} is not bound", var.name))
        })?;
        match values.get_mut(var.id) {
            Some(slot) => *slot = Some(value.clone()),
            None => {
                return Err(QueryError::protocol(format!(
                    "external variable {} has out-of-range id {}",
                    var.name, var.id
                )))
            }
        }
    }
    Ok(values)
}

/// Result of one `execute` call
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub rows: Vec<Value>,
    /// Present when more rows remain; pass it to the next call
    pub continuation: Option<ContinuationToken>,
    /// Capacity consumed by this call (and by failed calls before it)
    pub consumed: ConsumedCapacity,
    /// Capacity consumed by the query so far
    pub total_consumed: ConsumedCapacity,
    /// Bytes still charged to the query's ledger
    pub memory_in_use: u64,
}

/// A suspended query checked out of the session table for one call.
///
/// Dropping the lease puts the query back, so a call that fails or whose
/// future is dropped leaves the query resumable.
struct SessionLease<'a> {
    sessions: &'a Mutex<HashMap<Uuid, QueryRuntime>>,
    query_id: Uuid,
    runtime: Option<QueryRuntime>,
}

impl SessionLease<'_> {
    fn runtime(&mut self) -> QueryResult<&mut QueryRuntime> {
        self.runtime
            .as_mut()
            .ok_or_else(|| QueryError::defect("query state vanished"))
    }

    /// Takes the query for good; it is not put back
    fn release(mut self) -> Option<QueryRuntime> {
        self.runtime.take()
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            lock_sessions(self.sessions).insert(self.query_id, runtime);
        }
    }
}

fn lock_sessions(
    sessions: &Mutex<HashMap<Uuid, QueryRuntime>>,
) -> MutexGuard<'_, HashMap<Uuid, QueryRuntime>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs queries against one fetcher.
///
/// A driver may be shared: independent queries run concurrently, each with
/// its own memory ledger. Calls of one query are sequential; a query is
/// unknown to other callers while one of its calls is running.
pub struct QueryDriver {
    fetcher: Arc<dyn Fetcher>,
    config: QueryConfig,
    sessions: Mutex<HashMap<Uuid, QueryRuntime>>,
    metrics: Arc<QueryMetrics>,
}

impl QueryDriver {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: QueryConfig) -> Self {
        Self {
            fetcher,
            config,
            sessions: Mutex::new(HashMap::new()),
            metrics: Arc::new(QueryMetrics::new()),
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn metrics(&self) -> &QueryMetrics {
        &self.metrics
    }

    /// Number of queries suspended between calls
    pub fn active_queries(&self) -> usize {
        lock_sessions(&self.sessions).len()
    }

    /// Checks the suspended query named by `token` out of the session table
    fn resume(
        &self,
        plan: &Arc<PreparedPlan>,
        token: &ContinuationToken,
    ) -> QueryResult<SessionLease<'_>> {
        let runtime = lock_sessions(&self.sessions)
            .remove(&token.query_id)
            .ok_or_else(|| {
                QueryError::InvalidContinuation(format!(
                    "no suspended query {}",
                    token.query_id
                ))
            })?;
        let lease = SessionLease {
            sessions: &self.sessions,
            query_id: token.query_id,
            runtime: Some(runtime),
        };
        let Some(runtime) = lease.runtime.as_ref() else {
            return Err(QueryError::defect("query state vanished"));
        };
        if runtime.sequence() != token.sequence {
            return Err(QueryError::InvalidContinuation(format!(
                "stale token for query {}: call {} presented, call {} expected",
                token.query_id,
                token.sequence,
                runtime.sequence()
            )));
        }
        if !runtime.runs(plan) {
            return Err(QueryError::InvalidContinuation(
                "token belongs to a different plan".into(),
            ));
        }
        Ok(lease)
    }

    /// Runs one call of a query.
    ///
    /// Without `previous` a new query is started with `bindings`; with it
    /// the suspended query is resumed and `bindings` are ignored. At most
    /// one fetch is issued per call.
    pub async fn execute(
        &self,
        plan: &Arc<PreparedPlan>,
        bindings: &BoundVariables,
        options: ExecuteOptions,
        previous: Option<&ContinuationToken>,
    ) -> QueryResult<QueryOutcome> {
        self.metrics.increment_calls();
        if options.row_limit == Some(0) {
            return Err(QueryError::invalid_argument("row limit must be positive"));
        }

        let (mut lease, fresh) = match previous {
            Some(token) => (self.resume(plan, token)?, false),
            None => {
                let external_vars = bind_external_vars(plan, bindings)?;
                let query_id = Uuid::new_v4();
                let runtime = QueryRuntime::new(
                    query_id,
                    Arc::clone(plan),
                    external_vars,
                    Arc::clone(&self.fetcher),
                    self.config.clone(),
                    Arc::clone(&self.metrics),
                )?;
                info!(
                    event = Event::QueryStart.as_str(),
                    %query_id,
                    sorted_receive = plan.has_sorting_receive(),
                    "query started"
                );
                let lease = SessionLease {
                    sessions: &self.sessions,
                    query_id,
                    runtime: Some(runtime),
                };
                (lease, true)
            }
        };
        let query_id = lease.query_id;

        let result = {
            let runtime = lease.runtime()?;
            runtime.set_memory_limit(
                options
                    .max_memory_bytes
                    .unwrap_or(self.config.max_memory_bytes),
            );
            let call = runtime.run_call(options.row_limit, options.cancel);
            match options.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(QueryError::Timeout(timeout.as_millis())),
                },
                None => call.await,
            }
        };

        let more = match result {
            Ok(more) => more,
            Err(e) => {
                warn!(
                    event = Event::QueryFailed.as_str(),
                    %query_id,
                    code = e.code(),
                    retryable = e.is_retryable(),
                    error = %e,
                    "query call failed"
                );
                if fresh || !e.is_retryable() {
                    if let Some(mut runtime) = lease.release() {
                        runtime.close();
                    }
                }
                return Err(e);
            }
        };

        let runtime = lease.runtime()?;
        let rows = runtime.take_rows();
        self.metrics.add_rows_returned(rows.len() as u64);
        let consumed = runtime.take_call_consumed();
        let total_consumed = runtime.total_consumed();

        if more {
            let token = runtime.advance();
            debug!(
                event = Event::QuerySuspended.as_str(),
                %query_id,
                rows = rows.len(),
                sequence = token.sequence,
                "query suspended"
            );
            return Ok(QueryOutcome {
                rows,
                continuation: Some(token),
                consumed,
                total_consumed,
                memory_in_use: runtime.memory_in_use(),
            });
        }

        let mut runtime = lease
            .release()
            .ok_or_else(|| QueryError::defect("query state vanished"))?;
        runtime.close();
        let memory_in_use = runtime.memory_in_use();
        self.metrics.increment_queries_completed();
        info!(
            event = Event::QueryComplete.as_str(),
            %query_id,
            read_units = total_consumed.read_units,
            "query complete"
        );
        Ok(QueryOutcome {
            rows,
            continuation: None,
            consumed,
            total_consumed,
            memory_in_use,
        })
    }

    /// Releases a suspended query; returns false if it was not suspended
    pub fn abandon(&self, token: &ContinuationToken) -> bool {
        let removed = lock_sessions(&self.sessions).remove(&token.query_id);
        match removed {
            Some(mut runtime) => {
                runtime.close();
                self.metrics.increment_queries_abandoned();
                info!(
                    event = Event::QueryAbandoned.as_str(),
                    query_id = %token.query_id,
                    "query abandoned"
                );
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ExternalVarInfo;
    use crate::plan::{DistributionKind, PlanStep, ReceiveStep};

    fn plan_with_vars(names: &[&str]) -> PreparedPlan {
        let root = PlanStep::Receive(ReceiveStep {
            result_reg: 0,
            distribution: DistributionKind::AllPartitions,
            sort_specs: Vec::new(),
            primary_key_fields: Vec::new(),
        });
        PreparedPlan::new(root, 1).with_external_vars(
            names
                .iter()
                .enumerate()
                .map(|(id, name)| ExternalVarInfo {
                    name: name.to_string(),
                    id,
                })
                .collect(),
        )
    }

    #[test]
    fn test_bind_by_position() {
        let plan = plan_with_vars(&["$a", "$b"]);
        let bindings = BoundVariables::new().bind("$b", 2).bind("$a", 1);
        let values = bind_external_vars(&plan, &bindings).unwrap();
        assert_eq!(values, vec![Some(Value::Integer(1)), Some(Value::Integer(2))]);
    }

    #[test]
    fn test_binding_count_mismatch() {
        let plan = plan_with_vars(&["$a"]);
        let err = bind_external_vars(&plan, &BoundVariables::new()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
    }

    #[test]
    fn test_binding_wrong_name() {
        let plan = plan_with_vars(&["$a"]);
        let err = bind_external_vars(&plan, &BoundVariables::new().bind("$z", 1)).unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
    }

    #[test]
    fn test_rebinding_replaces() {
        let bindings = BoundVariables::new().bind("$a", 1).bind("$a", 5);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings.get("$a"), Some(&Value::Integer(5)));
    }
}
