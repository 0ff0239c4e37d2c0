//! Service status reconciliation.
//!
//! Merges the three independently observed component states of a managed
//! service (sidecar, proxy, user services) into the single status the
//! scheduler reports. Pure and total over all 64 input combinations, so
//! every observation maps to exactly one answer; workflow steps polling
//! for a start/stop goal use the result as their stop condition.

use helmsman_types::service::{ComponentState, SchedulerServiceStatus, ServiceSnapshot};

use ComponentState::{Absent, Failed, Running, Starting};
use SchedulerServiceStatus::{
    InError, IsAbsent, IsPresent, TransitionToAbsent, TransitionToPresent,
};

/// Project a raw three-component observation into one scheduler status.
///
/// The sidecar is the orchestrator, so its state is judged first:
/// - a failed sidecar always means `InError`
/// - an absent sidecar means the service is gone; anything still alive
///   (or failed) behind it is orphaned and reported as `InError`
/// - a starting sidecar is a startup in progress unless something failed
/// - with a running sidecar the user services decide, the proxy refining
///   between "fully present" and "still transitioning"
pub fn reconcile(snapshot: &ServiceSnapshot) -> SchedulerServiceStatus {
    let ServiceSnapshot {
        sidecar,
        proxy,
        user_services,
    } = *snapshot;

    match sidecar {
        Failed => InError,
        Absent => match (proxy, user_services) {
            (Absent, Absent) => IsAbsent,
            // Orphaned proxy or user services without their sidecar.
            _ => InError,
        },
        Starting => {
            if proxy == Failed || user_services == Failed {
                InError
            } else {
                TransitionToPresent
            }
        }
        Running => match user_services {
            Failed => InError,
            Absent => match proxy {
                Failed => InError,
                // No proxy left either: shutdown in progress.
                Absent => TransitionToAbsent,
                // Cold start: the sidecar is up, services not created yet.
                Starting | Running => TransitionToPresent,
            },
            Starting => {
                if proxy == Failed {
                    InError
                } else {
                    TransitionToPresent
                }
            }
            Running => match proxy {
                Running => IsPresent,
                Failed => InError,
                Absent | Starting => TransitionToPresent,
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ComponentState; 4] = [Absent, Starting, Running, Failed];

    fn status(
        sidecar: ComponentState,
        proxy: ComponentState,
        user_services: ComponentState,
    ) -> SchedulerServiceStatus {
        reconcile(&ServiceSnapshot::new(sidecar, proxy, user_services))
    }

    #[test]
    fn reference_rows() {
        assert_eq!(status(Running, Running, Running), IsPresent);
        assert_eq!(status(Absent, Absent, Absent), IsAbsent);
        assert_eq!(status(Failed, Absent, Absent), InError);
        assert_eq!(status(Running, Absent, Absent), TransitionToAbsent);
        assert_eq!(status(Running, Running, Absent), TransitionToPresent);
    }

    #[test]
    fn any_failed_component_means_in_error() {
        for sidecar in ALL {
            for proxy in ALL {
                for user_services in ALL {
                    if sidecar == Failed || proxy == Failed || user_services == Failed {
                        assert_eq!(
                            status(sidecar, proxy, user_services),
                            InError,
                            "{sidecar}/{proxy}/{user_services}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn is_absent_only_when_everything_is_absent() {
        for sidecar in ALL {
            for proxy in ALL {
                for user_services in ALL {
                    let expected_absent =
                        sidecar == Absent && proxy == Absent && user_services == Absent;
                    assert_eq!(
                        status(sidecar, proxy, user_services) == IsAbsent,
                        expected_absent,
                        "{sidecar}/{proxy}/{user_services}"
                    );
                }
            }
        }
    }

    #[test]
    fn orphaned_components_without_sidecar_are_errors() {
        assert_eq!(status(Absent, Running, Absent), InError);
        assert_eq!(status(Absent, Absent, Running), InError);
        assert_eq!(status(Absent, Absent, Failed), InError);
        assert_eq!(status(Absent, Starting, Starting), InError);
    }

    #[test]
    fn starting_sidecar_is_a_startup_in_progress() {
        assert_eq!(status(Starting, Absent, Absent), TransitionToPresent);
        assert_eq!(status(Starting, Starting, Starting), TransitionToPresent);
        assert_eq!(status(Starting, Running, Running), TransitionToPresent);
    }

    #[test]
    fn running_sidecar_refines_by_user_services_and_proxy() {
        // Cold start before services exist.
        assert_eq!(status(Running, Starting, Absent), TransitionToPresent);
        // Services on the way up.
        assert_eq!(status(Running, Absent, Starting), TransitionToPresent);
        assert_eq!(status(Running, Running, Starting), TransitionToPresent);
        // Services up but proxy lagging.
        assert_eq!(status(Running, Absent, Running), TransitionToPresent);
        assert_eq!(status(Running, Starting, Running), TransitionToPresent);
    }

    #[test]
    fn table_is_total() {
        // Every combination maps to exactly one status without panicking.
        let mut count = 0;
        for sidecar in ALL {
            for proxy in ALL {
                for user_services in ALL {
                    let _ = status(sidecar, proxy, user_services);
                    count += 1;
                }
            }
        }
        assert_eq!(count, 64);
    }
}
