//! Expiration policy engine.
//!
//! Policies are plain data attached to a ticket when it is minted. Whether a
//! ticket is expired is always recomputed from its usage counters and the
//! current time; nothing caches an "expired" flag.
//!
//! Durations are whole seconds. A non-positive duration means the ticket is
//! expired immediately: an immortal ticket must use
//! [`ExpirationPolicy::NeverExpires`] explicitly.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Usage counters an expiration policy is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketUsage {
    /// When the ticket was minted.
    pub created_at: DateTime<Utc>,
    /// When the ticket was last used (equal to `created_at` until first use).
    pub last_used_at: DateTime<Utc>,
    /// Number of successful uses so far.
    pub count_of_uses: u64,
}

impl TicketUsage {
    /// Usage of a ticket minted at `at` and never used.
    #[must_use]
    pub fn fresh(at: DateTime<Utc>) -> Self {
        Self {
            created_at: at,
            last_used_at: at,
            count_of_uses: 0,
        }
    }
}

/// Expiration policy attached to a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpirationPolicy {
    /// The ticket never expires on its own.
    NeverExpires,

    /// Expires once the ticket has been idle for longer than the timeout.
    Timeout {
        /// Maximum time between uses.
        idle_timeout_secs: i64,
    },

    /// Expires a fixed time after creation, however it is used.
    HardTimeout {
        /// Maximum lifetime since creation.
        max_lifetime_secs: i64,
    },

    /// Hard lifetime ceiling plus a use budget; uses that arrive faster than
    /// the minimum interval are refused without expiring the ticket.
    ThrottledUseAndTimeout {
        /// Maximum lifetime since creation.
        max_lifetime_secs: i64,
        /// Minimum time between two successive uses.
        min_interval_between_uses_secs: i64,
        /// Maximum number of uses; `None` means unlimited.
        #[serde(default)]
        max_uses: Option<u64>,
    },

    /// Default session policy: hard lifetime ceiling and an idle timeout.
    TicketGranting {
        /// Maximum lifetime since creation.
        max_lifetime_secs: i64,
        /// Maximum time between uses.
        idle_timeout_secs: i64,
    },

    /// Expires after a number of uses or a time-to-live, whichever comes first.
    MultiTimeUseOrTimeout {
        /// Number of uses after which the ticket is spent.
        max_uses: u64,
        /// Lifetime since creation.
        time_to_live_secs: i64,
    },

    /// Composite policy, expired as soon as any member policy is.
    AnyOf {
        /// Member policies.
        policies: Vec<ExpirationPolicy>,
    },
}

impl ExpirationPolicy {
    /// Default policy for ticket-granting tickets: 8 hours, 2 hours idle.
    #[must_use]
    pub fn default_ticket_granting() -> Self {
        ExpirationPolicy::TicketGranting {
            max_lifetime_secs: 8 * 60 * 60,
            idle_timeout_secs: 2 * 60 * 60,
        }
    }

    /// Default policy for service and proxy tickets: one use within 10 seconds.
    #[must_use]
    pub fn default_service() -> Self {
        ExpirationPolicy::MultiTimeUseOrTimeout {
            max_uses: 1,
            time_to_live_secs: 10,
        }
    }

    /// Decides whether a ticket with the given usage is expired at `now`.
    ///
    /// Pure and monotonic in `now`: for fixed usage, once this returns true it
    /// keeps returning true for every later instant.
    #[must_use]
    pub fn is_expired(&self, usage: &TicketUsage, now: DateTime<Utc>) -> bool {
        match self {
            ExpirationPolicy::NeverExpires => false,
            ExpirationPolicy::Timeout { idle_timeout_secs } => {
                elapsed_beyond(usage.last_used_at, now, *idle_timeout_secs)
            }
            ExpirationPolicy::HardTimeout { max_lifetime_secs } => {
                elapsed_beyond(usage.created_at, now, *max_lifetime_secs)
            }
            ExpirationPolicy::ThrottledUseAndTimeout {
                max_lifetime_secs,
                max_uses,
                ..
            } => {
                elapsed_beyond(usage.created_at, now, *max_lifetime_secs)
                    || max_uses.is_some_and(|max| usage.count_of_uses >= max)
            }
            ExpirationPolicy::TicketGranting {
                max_lifetime_secs,
                idle_timeout_secs,
            } => {
                elapsed_beyond(usage.created_at, now, *max_lifetime_secs)
                    || elapsed_beyond(usage.last_used_at, now, *idle_timeout_secs)
            }
            ExpirationPolicy::MultiTimeUseOrTimeout {
                max_uses,
                time_to_live_secs,
            } => {
                usage.count_of_uses >= *max_uses
                    || elapsed_beyond(usage.created_at, now, *time_to_live_secs)
            }
            // An empty composite would silently mean "never expires".
            ExpirationPolicy::AnyOf { policies } if policies.is_empty() => true,
            ExpirationPolicy::AnyOf { policies } => {
                policies.iter().any(|policy| policy.is_expired(usage, now))
            }
        }
    }

    /// Decides whether a use at `now` comes too soon after the previous one.
    ///
    /// Throttling refuses a single use; it never expires the ticket.
    #[must_use]
    pub fn is_throttled(&self, usage: &TicketUsage, now: DateTime<Utc>) -> bool {
        match self {
            ExpirationPolicy::ThrottledUseAndTimeout {
                min_interval_between_uses_secs,
                ..
            } => {
                usage.count_of_uses > 0
                    && *min_interval_between_uses_secs > 0
                    && now - usage.last_used_at
                        < Duration::seconds(*min_interval_between_uses_secs)
            }
            ExpirationPolicy::AnyOf { policies } => {
                policies.iter().any(|policy| policy.is_throttled(usage, now))
            }
            _ => false,
        }
    }

    /// Checks that the policy can ever yield a usable ticket.
    ///
    /// Used when loading configuration; tickets carrying an invalid policy are
    /// still handled safely (they are always expired).
    pub fn validate(&self) -> Result<(), String> {
        let positive = |name: &str, secs: i64| {
            if secs > 0 {
                Ok(())
            } else {
                Err(format!("{name} must be positive, got {secs}"))
            }
        };

        match self {
            ExpirationPolicy::NeverExpires => Ok(()),
            ExpirationPolicy::Timeout { idle_timeout_secs } => {
                positive("idle_timeout_secs", *idle_timeout_secs)
            }
            ExpirationPolicy::HardTimeout { max_lifetime_secs } => {
                positive("max_lifetime_secs", *max_lifetime_secs)
            }
            ExpirationPolicy::ThrottledUseAndTimeout {
                max_lifetime_secs,
                min_interval_between_uses_secs,
                max_uses,
            } => {
                positive("max_lifetime_secs", *max_lifetime_secs)?;
                if *min_interval_between_uses_secs < 0 {
                    return Err(format!(
                        "min_interval_between_uses_secs must not be negative, got {min_interval_between_uses_secs}"
                    ));
                }
                if *max_uses == Some(0) {
                    return Err("max_uses must be at least 1".to_string());
                }
                Ok(())
            }
            ExpirationPolicy::TicketGranting {
                max_lifetime_secs,
                idle_timeout_secs,
            } => {
                positive("max_lifetime_secs", *max_lifetime_secs)?;
                positive("idle_timeout_secs", *idle_timeout_secs)
            }
            ExpirationPolicy::MultiTimeUseOrTimeout {
                max_uses,
                time_to_live_secs,
            } => {
                if *max_uses == 0 {
                    return Err("max_uses must be at least 1".to_string());
                }
                positive("time_to_live_secs", *time_to_live_secs)
            }
            ExpirationPolicy::AnyOf { policies } => {
                if policies.is_empty() {
                    return Err("any_of requires at least one policy".to_string());
                }
                policies.iter().try_for_each(ExpirationPolicy::validate)
            }
        }
    }
}

fn elapsed_beyond(since: DateTime<Utc>, now: DateTime<Utc>, limit_secs: i64) -> bool {
    if limit_secs <= 0 {
        return true;
    }
    now - since > Duration::seconds(limit_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn used(count: u64, last_used_offset_secs: i64) -> TicketUsage {
        TicketUsage {
            created_at: base(),
            last_used_at: base() + Duration::seconds(last_used_offset_secs),
            count_of_uses: count,
        }
    }

    fn at(offset_secs: i64) -> DateTime<Utc> {
        base() + Duration::seconds(offset_secs)
    }

    #[test]
    fn test_never_expires() {
        let policy = ExpirationPolicy::NeverExpires;
        assert!(!policy.is_expired(&used(1_000, 0), at(10 * 365 * 24 * 3600)));
    }

    #[test]
    fn test_idle_timeout() {
        let policy = ExpirationPolicy::Timeout {
            idle_timeout_secs: 60,
        };
        let usage = used(3, 100);
        assert!(!policy.is_expired(&usage, at(160)));
        assert!(policy.is_expired(&usage, at(161)));
    }

    #[test]
    fn test_hard_timeout_ignores_use() {
        let policy = ExpirationPolicy::HardTimeout {
            max_lifetime_secs: 300,
        };
        assert!(!policy.is_expired(&used(0, 0), at(300)));
        assert!(policy.is_expired(&used(50, 299), at(301)));
    }

    #[test]
    fn test_non_positive_lifetime_is_always_expired() {
        for limit in [0, -1, -3600] {
            let hard = ExpirationPolicy::HardTimeout {
                max_lifetime_secs: limit,
            };
            let idle = ExpirationPolicy::Timeout {
                idle_timeout_secs: limit,
            };
            assert!(hard.is_expired(&TicketUsage::fresh(base()), base()));
            assert!(idle.is_expired(&TicketUsage::fresh(base()), base()));
        }
    }

    #[test]
    fn test_ticket_granting_policy() {
        let policy = ExpirationPolicy::TicketGranting {
            max_lifetime_secs: 1_000,
            idle_timeout_secs: 100,
        };
        // Kept alive by use, bounded by the ceiling
        assert!(!policy.is_expired(&used(9, 950), at(999)));
        assert!(policy.is_expired(&used(9, 950), at(1_001)));
        // Idle
        assert!(policy.is_expired(&used(1, 10), at(111)));
    }

    #[test]
    fn test_service_ticket_single_use() {
        let policy = ExpirationPolicy::default_service();
        assert!(!policy.is_expired(&used(0, 0), at(5)));
        assert!(policy.is_expired(&used(1, 1), at(1)));
        assert!(policy.is_expired(&used(0, 0), at(11)));
    }

    #[test]
    fn test_throttled_use() {
        let policy = ExpirationPolicy::ThrottledUseAndTimeout {
            max_lifetime_secs: 3_600,
            min_interval_between_uses_secs: 5,
            max_uses: Some(3),
        };

        // First use is never throttled
        assert!(!policy.is_throttled(&used(0, 0), at(0)));
        // Second use within the interval
        assert!(policy.is_throttled(&used(1, 10), at(12)));
        assert!(!policy.is_expired(&used(1, 10), at(12)));
        // After the interval
        assert!(!policy.is_throttled(&used(1, 10), at(15)));
        // Use budget exhausted
        assert!(policy.is_expired(&used(3, 20), at(30)));
        // Ceiling
        assert!(policy.is_expired(&used(1, 10), at(3_601)));
    }

    #[test]
    fn test_any_of_composite() {
        let policy = ExpirationPolicy::AnyOf {
            policies: vec![
                ExpirationPolicy::HardTimeout {
                    max_lifetime_secs: 1_000,
                },
                ExpirationPolicy::Timeout {
                    idle_timeout_secs: 10,
                },
            ],
        };
        assert!(!policy.is_expired(&used(1, 5), at(14)));
        assert!(policy.is_expired(&used(1, 5), at(16)));
        assert!(ExpirationPolicy::AnyOf { policies: vec![] }.is_expired(&used(0, 0), at(0)));
    }

    #[test]
    fn test_validate() {
        assert!(ExpirationPolicy::default_ticket_granting().validate().is_ok());
        assert!(ExpirationPolicy::default_service().validate().is_ok());
        assert!(ExpirationPolicy::NeverExpires.validate().is_ok());
        assert!(ExpirationPolicy::HardTimeout {
            max_lifetime_secs: 0
        }
        .validate()
        .is_err());
        assert!(ExpirationPolicy::MultiTimeUseOrTimeout {
            max_uses: 0,
            time_to_live_secs: 10
        }
        .validate()
        .is_err());
        assert!(ExpirationPolicy::AnyOf { policies: vec![] }.validate().is_err());
    }

    #[test]
    fn test_policy_serde_shape() {
        let policy = ExpirationPolicy::TicketGranting {
            max_lifetime_secs: 10,
            idle_timeout_secs: 5,
        };
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["type"], "ticket_granting");
        let back: ExpirationPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }

    mod monotonicity {
        use super::*;
        use proptest::prelude::*;

        fn policy_strategy() -> impl Strategy<Value = ExpirationPolicy> {
            let leaf = prop_oneof![
                Just(ExpirationPolicy::NeverExpires),
                (-10i64..5_000).prop_map(|idle_timeout_secs| ExpirationPolicy::Timeout {
                    idle_timeout_secs
                }),
                (-10i64..5_000).prop_map(|max_lifetime_secs| ExpirationPolicy::HardTimeout {
                    max_lifetime_secs
                }),
                (-10i64..5_000, 0i64..100, proptest::option::of(0u64..5)).prop_map(
                    |(max_lifetime_secs, min_interval_between_uses_secs, max_uses)| {
                        ExpirationPolicy::ThrottledUseAndTimeout {
                            max_lifetime_secs,
                            min_interval_between_uses_secs,
                            max_uses,
                        }
                    }
                ),
                (-10i64..5_000, -10i64..5_000).prop_map(
                    |(max_lifetime_secs, idle_timeout_secs)| ExpirationPolicy::TicketGranting {
                        max_lifetime_secs,
                        idle_timeout_secs,
                    }
                ),
                (0u64..4, -10i64..5_000).prop_map(|(max_uses, time_to_live_secs)| {
                    ExpirationPolicy::MultiTimeUseOrTimeout {
                        max_uses,
                        time_to_live_secs,
                    }
                }),
            ];
            leaf.prop_recursive(2, 8, 4, |inner| {
                prop::collection::vec(inner, 0..4)
                    .prop_map(|policies| ExpirationPolicy::AnyOf { policies })
            })
        }

        proptest! {
            #[test]
            fn test_expired_stays_expired(
                policy in policy_strategy(),
                count_of_uses in 0u64..6,
                last_used_offset in 0i64..5_000,
                t1 in 0i64..20_000,
                delta in 0i64..20_000,
            ) {
                let usage = used(count_of_uses, last_used_offset);
                if policy.is_expired(&usage, at(t1)) {
                    prop_assert!(policy.is_expired(&usage, at(t1 + delta)));
                }
            }
        }
    }
}
