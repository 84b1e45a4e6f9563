//! Health check module
//! Reports the state of the stores and collaborators the payment flow needs

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

#[cfg(feature = "cache")]
use crate::cache::RedisCache;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

type CheckResult = Result<u128, Box<dyn std::error::Error + Send + Sync>>;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }

    /// Ready to take traffic; a degraded service still is
    pub fn is_ready(&self) -> bool {
        !matches!(self.status, HealthState::Unhealthy)
    }

    fn record(&mut self, name: &str, health: ComponentHealth) {
        let status = match health.status {
            ComponentState::Down => HealthState::Unhealthy,
            ComponentState::Warning if self.status == HealthState::Healthy => HealthState::Degraded,
            _ => self.status,
        };
        self.status = status;
        self.checks.insert(name.to_string(), health);
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone, Default)]
pub struct HealthChecker {
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
    #[cfg(feature = "cache")]
    cache: Option<RedisCache>,
    gateway_configured: bool,
}

impl HealthChecker {
    pub fn new(gateway_configured: bool) -> Self {
        Self {
            gateway_configured,
            ..Self::default()
        }
    }

    #[cfg(feature = "database")]
    pub fn with_database(mut self, pool: sqlx::PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    #[cfg(feature = "cache")]
    pub fn with_cache(mut self, cache: RedisCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        #[cfg(feature = "database")]
        if let Some(pool) = &self.db_pool {
            let health = run_check("database", check_database_health(pool)).await;
            health_status.record("database", health);
        }

        #[cfg(feature = "cache")]
        if let Some(cache) = &self.cache {
            let health = run_check("cache", check_cache_health(cache)).await;
            health_status.record("cache", health);
        }

        let gateway = if self.gateway_configured {
            ComponentHealth::up(None)
        } else {
            warn!("Payment gateway credentials are not configured");
            ComponentHealth::warning(None, Some("credentials not configured".to_string()))
        };
        health_status.record("payment_gateway", gateway);

        health_status
    }
}

async fn run_check<F>(name: &str, check: F) -> ComponentHealth
where
    F: Future<Output = CheckResult>,
{
    match timeout(CHECK_TIMEOUT, check).await {
        Ok(Ok(response_time)) => {
            info!("{} health check: OK ({}ms)", name, response_time);
            ComponentHealth::up(Some(response_time))
        }
        Ok(Err(e)) => {
            error!("{} health check failed: {}", name, e);
            ComponentHealth::down(Some(e.to_string()))
        }
        Err(_) => {
            error!("{} health check timed out", name);
            ComponentHealth::down(Some("Timeout".to_string()))
        }
    }
}

#[cfg(feature = "database")]
pub async fn check_database_health(pool: &sqlx::PgPool) -> CheckResult {
    let start = std::time::Instant::now();
    crate::database::health_check(pool).await?;
    Ok(start.elapsed().as_millis())
}

#[cfg(feature = "cache")]
pub async fn check_cache_health(cache: &RedisCache) -> CheckResult {
    let start = std::time::Instant::now();
    let mut conn = cache.get_connection().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
    Ok(start.elapsed().as_millis())
}
