//! Quota tiers and the per-route tier policy

use http::Method;
use std::collections::HashMap;
use thiserror::Error;

/// Rate string parse errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid rate '{0}': expected 'N/unit' or 'N per unit'")]
    InvalidRate(String),

    #[error("unknown time unit '{0}'")]
    UnknownUnit(String),

    #[error("duplicate global tier '{0}'")]
    DuplicateTier(String),
}

/// One named limit over a fixed window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    pub name: String,
    pub limit: u64,
    pub window_secs: u64,
}

impl Tier {
    pub fn new(name: impl Into<String>, limit: u64, window_secs: u64) -> Self {
        Self {
            name: name.into(),
            limit,
            window_secs: window_secs.max(1),
        }
    }

    /// Parse `"30/minute"` or `"30 per minute"`
    pub fn parse(name: impl Into<String>, rate: &str) -> Result<Self, PolicyError> {
        let (limit, window_secs) = parse_rate(rate)?;
        Ok(Self::new(name, limit, window_secs))
    }

    /// Index of the window containing `now` (Unix seconds)
    pub fn window_index(&self, now: i64) -> i64 {
        now.div_euclid(self.window_secs as i64)
    }

    /// Seconds left in the window containing `now`, at least 1
    pub fn remaining_secs(&self, now: i64) -> u64 {
        let window = self.window_secs as i64;
        (window - now.rem_euclid(window)).max(1) as u64
    }
}

/// Parse a rate string into `(limit, window_secs)`
pub fn parse_rate(rate: &str) -> Result<(u64, u64), PolicyError> {
    let rate = rate.trim();
    let (count, unit) = rate
        .split_once('/')
        .or_else(|| rate.split_once(" per "))
        .ok_or_else(|| PolicyError::InvalidRate(rate.to_string()))?;

    let limit = count
        .trim()
        .parse::<u64>()
        .map_err(|_| PolicyError::InvalidRate(rate.to_string()))?;
    let window_secs = unit_secs(unit.trim())?;
    Ok((limit, window_secs))
}

fn unit_secs(unit: &str) -> Result<u64, PolicyError> {
    match unit.to_ascii_lowercase().as_str() {
        "s" | "sec" | "second" | "seconds" => Ok(1),
        "m" | "min" | "minute" | "minutes" => Ok(60),
        "h" | "hour" | "hours" => Ok(3600),
        "d" | "day" | "days" => Ok(86_400),
        other => Err(PolicyError::UnknownUnit(other.to_string())),
    }
}

fn unit_name(window_secs: u64) -> String {
    match window_secs {
        1 => "second".to_string(),
        60 => "minute".to_string(),
        3600 => "hour".to_string(),
        86_400 => "day".to_string(),
        other => format!("{other}s"),
    }
}

/// Routes subject to quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Register,
    Login,
    Logout,
    OrdersList,
    OrdersCreate,
    OrdersGet,
    OrdersUpdate,
    Stats,
}

impl RouteClass {
    pub const ALL: [RouteClass; 8] = [
        RouteClass::Register,
        RouteClass::Login,
        RouteClass::Logout,
        RouteClass::OrdersList,
        RouteClass::OrdersCreate,
        RouteClass::OrdersGet,
        RouteClass::OrdersUpdate,
        RouteClass::Stats,
    ];

    /// Classify a request by method and matched route template.
    /// `None` means the route carries no quota (health, unknown routes).
    pub fn classify(method: &Method, path: &str) -> Option<Self> {
        match (method, path) {
            (&Method::POST, "/api/register") => Some(Self::Register),
            (&Method::POST, "/api/login") => Some(Self::Login),
            (&Method::POST, "/api/logout") => Some(Self::Logout),
            (&Method::GET, "/api/orders") => Some(Self::OrdersList),
            (&Method::POST, "/api/orders") => Some(Self::OrdersCreate),
            (&Method::GET, "/api/orders/{order_id}") => Some(Self::OrdersGet),
            (&Method::PUT, "/api/orders/{order_id}") => Some(Self::OrdersUpdate),
            (&Method::GET, "/api/stats") => Some(Self::Stats),
            _ => None,
        }
    }

    /// Name of the route's own tier
    pub fn tier_name(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
            Self::Logout => "logout",
            Self::OrdersList => "orders-list",
            Self::OrdersCreate => "orders-create",
            Self::OrdersGet => "orders-get",
            Self::OrdersUpdate => "orders-update",
            Self::Stats => "stats",
        }
    }

    /// Environment variable overriding the route's own tier
    pub fn env_key(&self) -> String {
        format!(
            "QUOTA_{}",
            self.tier_name().replace('-', "_").to_ascii_uppercase()
        )
    }
}

/// Tiers applied to one route class
#[derive(Debug, Clone)]
pub struct RouteQuota {
    pub tier: Option<Tier>,
    pub include_global: bool,
}

/// Route-to-tier policy
#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    routes: HashMap<RouteClass, RouteQuota>,
    global: Vec<Tier>,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        let route = |class: RouteClass, limit: u64, include_global: bool| {
            (
                class,
                RouteQuota {
                    tier: Some(Tier::new(class.tier_name(), limit, 60)),
                    include_global,
                },
            )
        };

        let routes = HashMap::from([
            route(RouteClass::Register, 5, false),
            route(RouteClass::Login, 10, false),
            (
                RouteClass::Logout,
                RouteQuota {
                    tier: None,
                    include_global: true,
                },
            ),
            route(RouteClass::OrdersList, 100, true),
            route(RouteClass::OrdersCreate, 30, true),
            route(RouteClass::OrdersGet, 200, true),
            route(RouteClass::OrdersUpdate, 20, true),
            route(RouteClass::Stats, 10, false),
        ]);

        Self {
            routes,
            global: vec![
                Tier::new("global-hour", 50, 3600),
                Tier::new("global-day", 200, 86_400),
            ],
        }
    }
}

impl QuotaPolicy {
    /// Defaults, overridden by `QUOTA_<ROUTE>` and `QUOTA_GLOBAL`
    pub fn from_env() -> Result<Self, PolicyError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults, overridden by whatever `lookup` returns per key
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PolicyError> {
        let mut policy = Self::default();

        for class in RouteClass::ALL {
            if let Some(rate) = lookup(&class.env_key()) {
                policy = policy.with_route_tier(class, Tier::parse(class.tier_name(), &rate)?);
            }
        }

        // e.g. QUOTA_GLOBAL="50/hour;200/day"
        if let Some(rates) = lookup("QUOTA_GLOBAL") {
            let mut global: Vec<Tier> = Vec::new();
            for rate in rates.split(';').map(str::trim).filter(|r| !r.is_empty()) {
                let (limit, window_secs) = parse_rate(rate)?;
                let name = format!("global-{}", unit_name(window_secs));
                if global.iter().any(|t| t.name == name) {
                    return Err(PolicyError::DuplicateTier(name));
                }
                global.push(Tier::new(name, limit, window_secs));
            }
            policy = policy.with_global(global);
        }

        Ok(policy)
    }

    /// Replace a route's own tier
    pub fn with_route_tier(mut self, class: RouteClass, tier: Tier) -> Self {
        self.routes
            .entry(class)
            .and_modify(|q| q.tier = Some(tier.clone()))
            .or_insert(RouteQuota {
                tier: Some(tier),
                include_global: false,
            });
        self
    }

    /// Replace the global tiers
    pub fn with_global(mut self, global: Vec<Tier>) -> Self {
        self.global = global;
        self
    }

    /// Tiers for a route in evaluation order: the route's own tier, then globals
    pub fn tiers_for(&self, class: RouteClass) -> Vec<&Tier> {
        let Some(quota) = self.routes.get(&class) else {
            return Vec::new();
        };
        let mut tiers: Vec<&Tier> = quota.tier.iter().collect();
        if quota.include_global {
            tiers.extend(self.global.iter());
        }
        tiers
    }
}
