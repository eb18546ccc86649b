//! Circuit breaker wrapping repeated `RunnerFactory` failures per role.
//! Scoped to the single axis this core needs: role, not task chains.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::domain::models::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub max_reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::seconds(30),
            max_reset_timeout: Duration::minutes(10),
        }
    }
}

#[derive(Debug, Clone)]
struct RoleCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    current_reset_timeout: Duration,
    half_open_trial_in_flight: bool,
}

impl RoleCircuit {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            current_reset_timeout: config.reset_timeout,
            half_open_trial_in_flight: false,
        }
    }
}

/// Per-role circuit breaker. `spawn` attempts check [`Self::allow`] before
/// calling into `RunnerFactory`; `Closed`/`HalfOpen`(one trial) pass through
/// the failure/success back into [`Self::on_failure`]/[`Self::on_success`].
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: RwLock<HashMap<Role, RoleCircuit>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: RwLock::new(HashMap::new()),
        }
    }

    /// Returns `true` if a spawn attempt for `role` may proceed. Exactly one
    /// caller observing `HalfOpen` gets to run the trial; concurrent callers
    /// during `HalfOpen` are refused until the trial resolves.
    pub async fn allow(&self, role: Role) -> bool {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits.entry(role).or_insert_with(|| RoleCircuit::new(&self.config));

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = circuit
                    .opened_at
                    .map(|t| Utc::now() - t)
                    .unwrap_or(Duration::zero());
                if elapsed >= circuit.current_reset_timeout {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.half_open_trial_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if circuit.half_open_trial_in_flight {
                    false
                } else {
                    circuit.half_open_trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub async fn on_success(&self, role: Role) {
        let mut circuits = self.circuits.write().await;
        if let Some(circuit) = circuits.get_mut(&role) {
            circuit.state = CircuitState::Closed;
            circuit.consecutive_failures = 0;
            circuit.opened_at = None;
            circuit.current_reset_timeout = self.config.reset_timeout;
            circuit.half_open_trial_in_flight = false;
        }
    }

    pub async fn on_failure(&self, role: Role) {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits.entry(role).or_insert_with(|| RoleCircuit::new(&self.config));
        circuit.half_open_trial_in_flight = false;

        match circuit.state {
            CircuitState::HalfOpen => {
                circuit.state = CircuitState::Open;
                circuit.opened_at = Some(Utc::now());
                circuit.current_reset_timeout =
                    (circuit.current_reset_timeout * 2).min(self.config.max_reset_timeout);
            }
            CircuitState::Closed => {
                circuit.consecutive_failures += 1;
                if circuit.consecutive_failures >= self.config.failure_threshold {
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(Utc::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self, role: Role) -> CircuitState {
        self.circuits
            .read()
            .await
            .get(&role)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::seconds(0),
            max_reset_timeout: Duration::seconds(0),
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new(fast_config());
        for _ in 0..2 {
            assert!(cb.allow(Role::Worker).await);
            cb.on_failure(Role::Worker).await;
        }
        assert_eq!(cb.state(Role::Worker).await, CircuitState::Closed);
        assert!(cb.allow(Role::Worker).await);
        cb.on_failure(Role::Worker).await;
        assert_eq!(cb.state(Role::Worker).await, CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_trial_success_closes_circuit() {
        let cb = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            cb.allow(Role::Worker).await;
            cb.on_failure(Role::Worker).await;
        }
        assert_eq!(cb.state(Role::Worker).await, CircuitState::Open);

        // reset_timeout is zero, so the next `allow` flips to HalfOpen.
        assert!(cb.allow(Role::Worker).await);
        cb.on_success(Role::Worker).await;
        assert_eq!(cb.state(Role::Worker).await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn roles_are_isolated() {
        let cb = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            cb.allow(Role::Worker).await;
            cb.on_failure(Role::Worker).await;
        }
        assert_eq!(cb.state(Role::Worker).await, CircuitState::Open);
        assert_eq!(cb.state(Role::Planner).await, CircuitState::Closed);
    }
}
