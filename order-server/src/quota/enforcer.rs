//! Quota Enforcer
//!
//! Counts every request against each tier of its route in the shared
//! [`Ledger`], then admits or rejects it. Counters are keyed
//! `quota:<subject>:<tier>:<window-index>` so they expire with their window.

use shared::util::now_secs;
use shared::{AppError, ErrorCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::policy::{QuotaPolicy, RouteClass, Tier};
use crate::store::{Ledger, StoreError};

/// Whose quota a request draws from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    /// Authenticated identity
    Identity(String),
    /// Anonymous origin address
    Origin(String),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Identity(name) => write!(f, "user:{name}"),
            Subject::Origin(addr) => write!(f, "ip:{addr}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("quota exceeded for tier {tier} ({limit} per {window_secs}s), retry after {retry_after}s")]
    Exceeded {
        tier: String,
        limit: u64,
        window_secs: u64,
        retry_after: u64,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<QuotaError> for AppError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::Exceeded {
                tier,
                limit,
                retry_after,
                ..
            } => AppError::new(ErrorCode::QuotaExceeded)
                .with_detail("tier", tier)
                .with_detail("limit", limit)
                .with_detail("retry_after", retry_after)
                .with_retry_after(retry_after),
            QuotaError::Store(e) => e.into(),
        }
    }
}

#[derive(Clone)]
pub struct QuotaEnforcer {
    policy: Arc<QuotaPolicy>,
    ledger: Arc<dyn Ledger>,
}

impl QuotaEnforcer {
    pub fn new(policy: QuotaPolicy, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            policy: Arc::new(policy),
            ledger,
        }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Count a request and decide whether it is admitted
    pub async fn admit(&self, subject: &Subject, route: RouteClass) -> Result<(), QuotaError> {
        self.admit_at(subject, route, now_secs()).await
    }

    /// [`admit`](Self::admit) against an explicit clock (Unix seconds)
    ///
    /// Every tier is incremented before deciding, so a rejected request still
    /// consumes quota on all its tiers. The first tier over its limit, in
    /// policy order, is reported.
    pub async fn admit_at(
        &self,
        subject: &Subject,
        route: RouteClass,
        now: i64,
    ) -> Result<(), QuotaError> {
        let mut tripped: Option<&Tier> = None;

        for tier in self.policy.tiers_for(route) {
            let key = counter_key(subject, tier, now);
            let ttl = Duration::from_secs(tier.remaining_secs(now));
            let count = self.ledger.increment(&key, ttl).await?;

            tracing::trace!(key = %key, count, limit = tier.limit, "Quota counter incremented");

            if count > tier.limit && tripped.is_none() {
                tripped = Some(tier);
            }
        }

        match tripped {
            Some(tier) => Err(QuotaError::Exceeded {
                tier: tier.name.clone(),
                limit: tier.limit,
                window_secs: tier.window_secs,
                retry_after: tier.remaining_secs(now),
            }),
            None => Ok(()),
        }
    }
}

/// Ledger key of a quota counter
pub fn counter_key(subject: &Subject, tier: &Tier, now: i64) -> String {
    format!("quota:{subject}:{}:{}", tier.name, tier.window_index(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedger;

    fn enforcer(policy: QuotaPolicy) -> QuotaEnforcer {
        QuotaEnforcer::new(policy, Arc::new(MemoryLedger::new()))
    }

    fn alice() -> Subject {
        Subject::Identity("alice".to_string())
    }

    #[test]
    fn test_counter_key_format() {
        let tier = Tier::new("orders-create", 30, 60);
        assert_eq!(
            counter_key(&alice(), &tier, 125),
            "quota:user:alice:orders-create:2"
        );
        assert_eq!(
            counter_key(&Subject::Origin("10.0.0.1".into()), &tier, 0),
            "quota:ip:10.0.0.1:orders-create:0"
        );
    }

    #[tokio::test]
    async fn test_limit_plus_one_is_rejected() {
        let enforcer = enforcer(QuotaPolicy::default());
        // Start of a minute window
        let now = 1_700_000_040;

        for _ in 0..10 {
            enforcer.admit_at(&alice(), RouteClass::Login, now).await.unwrap();
        }
        let err = enforcer
            .admit_at(&alice(), RouteClass::Login, now)
            .await
            .unwrap_err();
        match err {
            QuotaError::Exceeded {
                tier, retry_after, ..
            } => {
                assert_eq!(tier, "login");
                assert_eq!(retry_after, 60);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_next_window_is_admitted() {
        let enforcer = enforcer(QuotaPolicy::default());
        let now = 1_700_000_040;

        for _ in 0..10 {
            enforcer.admit_at(&alice(), RouteClass::Login, now).await.unwrap();
        }
        assert!(enforcer.admit_at(&alice(), RouteClass::Login, now + 59).await.is_err());
        assert!(enforcer.admit_at(&alice(), RouteClass::Login, now + 60).await.is_ok());
    }

    #[tokio::test]
    async fn test_identities_do_not_interfere() {
        let enforcer = enforcer(QuotaPolicy::default());
        let now = 1_700_000_040;
        let bob = Subject::Identity("bob".to_string());

        for _ in 0..11 {
            let _ = enforcer.admit_at(&alice(), RouteClass::Login, now).await;
        }
        assert!(enforcer.admit_at(&alice(), RouteClass::Login, now).await.is_err());
        assert!(enforcer.admit_at(&bob, RouteClass::Login, now).await.is_ok());

        // Same name, different subject kind
        let origin = Subject::Origin("alice".to_string());
        assert!(enforcer.admit_at(&origin, RouteClass::Login, now).await.is_ok());
    }

    #[tokio::test]
    async fn test_global_tier_spans_routes() {
        let policy = QuotaPolicy::default().with_global(vec![Tier::new("global-hour", 3, 3600)]);
        let enforcer = enforcer(policy);
        let now = 1_699_999_200;

        enforcer.admit_at(&alice(), RouteClass::OrdersList, now).await.unwrap();
        enforcer.admit_at(&alice(), RouteClass::OrdersGet, now).await.unwrap();
        enforcer.admit_at(&alice(), RouteClass::Logout, now).await.unwrap();

        let err = enforcer
            .admit_at(&alice(), RouteClass::OrdersCreate, now + 10)
            .await
            .unwrap_err();
        match err {
            QuotaError::Exceeded {
                tier, retry_after, ..
            } => {
                assert_eq!(tier, "global-hour");
                assert_eq!(retry_after, 3590);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Register and login carry no global tier
        assert!(enforcer.admit_at(&alice(), RouteClass::Login, now).await.is_ok());
    }

    #[tokio::test]
    async fn test_first_tripped_tier_in_policy_order() {
        let policy = QuotaPolicy::default()
            .with_route_tier(RouteClass::OrdersCreate, Tier::new("orders-create", 1, 60))
            .with_global(vec![Tier::new("global-hour", 1, 3600)]);
        let enforcer = enforcer(policy);
        let now = 1_699_999_200;

        enforcer.admit_at(&alice(), RouteClass::OrdersCreate, now).await.unwrap();
        let err = enforcer
            .admit_at(&alice(), RouteClass::OrdersCreate, now)
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::Exceeded { ref tier, .. } if tier == "orders-create"));
    }

    #[tokio::test]
    async fn test_rejected_requests_still_count() {
        let policy = QuotaPolicy::default()
            .with_route_tier(RouteClass::OrdersCreate, Tier::new("orders-create", 1, 60))
            .with_global(vec![Tier::new("global-hour", 3, 3600)]);
        let enforcer = enforcer(policy);
        let now = 1_699_999_200;

        // One admitted, two rejected by the route tier; all three hit the global tier
        for _ in 0..3 {
            let _ = enforcer.admit_at(&alice(), RouteClass::OrdersCreate, now).await;
        }
        let err = enforcer
            .admit_at(&alice(), RouteClass::OrdersList, now)
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::Exceeded { ref tier, .. } if tier == "global-hour"));
    }

    #[test]
    fn test_exceeded_maps_to_429_with_retry_after() {
        let err: AppError = QuotaError::Exceeded {
            tier: "orders-create".into(),
            limit: 30,
            window_secs: 60,
            retry_after: 17,
        }
        .into();
        assert_eq!(err.code, ErrorCode::QuotaExceeded);
        assert_eq!(err.retry_after, Some(17));
        let details = err.details.unwrap();
        assert_eq!(details.get("tier").unwrap(), "orders-create");
        assert_eq!(details.get("retry_after").unwrap(), 17);
    }
}
