use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Circuit breaker guarding Telegram delivery.
pub type DeliveryCircuitBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates the breaker used around Bot API calls.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// While open, sends fail fast with `ExternalApiError`.
pub fn create_delivery_circuit_breaker() -> DeliveryCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::futures::CircuitBreaker;
    use failsafe::Error;

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_failures() {
        let cb = create_delivery_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), Error<&str>> =
                cb.call(async { Err::<(), &str>("telegram down") }).await;
            assert!(result.is_err());
        }

        let result: Result<(), Error<&str>> = cb.call(async { Ok::<(), &str>(()) }).await;
        assert!(matches!(result, Err(Error::Rejected)));
    }

    #[tokio::test]
    async fn test_circuit_breaker_allows_success() {
        let cb = create_delivery_circuit_breaker();
        let result: Result<i32, Error<&str>> = cb.call(async { Ok::<i32, &str>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
