// Route guard
// Pure decision between protected content, a loading placeholder, and the login surface

use std::time::{Duration, Instant};

use crate::session::types::SessionStatus;

/// Path of the login surface
pub const LOGIN_PATH: &str = "/admin/login";

/// Default destination after login when no return path was preserved
pub const DEFAULT_AUTHENTICATED_PATH: &str = "/admin/dashboard";

/// Query parameter carrying the post-login return target
const RETURN_PARAM: &str = "next";

/// What the shell should do for the current path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Bootstrap validation is still running and the grace window has not
    /// lapsed; show a placeholder instead of flashing the login form
    Loading,

    /// Render the protected content
    Render,

    /// Navigate to the login surface, preserving where the user was headed
    RedirectToLogin { target: String },
}

/// Decide what to do for `current_path` given the session state.
///
/// Pure function: same inputs, same decision. A background refresh keeps
/// rendering protected content, and the login surface never redirects to
/// itself regardless of status.
pub fn decide(
    status: SessionStatus,
    bootstrap_grace_elapsed: bool,
    current_path: &str,
) -> RouteDecision {
    if status.is_signed_in() {
        return RouteDecision::Render;
    }

    if status == SessionStatus::Validating && !bootstrap_grace_elapsed {
        return RouteDecision::Loading;
    }

    // Anonymous, or still validating after the grace window lapsed: treat
    // as signed out rather than keeping the user on a spinner forever
    match login_redirect(current_path) {
        Some(target) => RouteDecision::RedirectToLogin { target },
        None => RouteDecision::Render,
    }
}

/// Login redirect target for `current_path`, or `None` when the path
/// already is the login surface (redirecting there again would loop).
pub fn login_redirect(current_path: &str) -> Option<String> {
    let bare_path = current_path.split('?').next().unwrap_or(current_path);
    if bare_path == LOGIN_PATH {
        return None;
    }

    Some(format!("{}?{}={}", LOGIN_PATH, RETURN_PARAM, current_path))
}

/// Bootstrap grace deadline.
///
/// While the window is open the guard shows a placeholder for `Validating`
/// sessions; once it lapses an unresolved bootstrap is treated as signed out.
#[derive(Debug, Clone, Copy)]
pub struct GraceWindow {
    deadline: Instant,
}

impl GraceWindow {
    pub fn starting_now(duration: Duration) -> Self {
        Self {
            deadline: Instant::now() + duration,
        }
    }

    pub fn elapsed(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_signed_in_renders() {
        for status in [SessionStatus::Authenticated, SessionStatus::Refreshing] {
            for elapsed in [false, true] {
                assert_eq!(
                    decide(status, elapsed, "/admin/portfolio"),
                    RouteDecision::Render
                );
            }
        }
    }

    #[test]
    fn test_refresh_does_not_interrupt_ui() {
        // Staying authenticated during a background refresh keeps rendering
        assert_eq!(
            decide(SessionStatus::Refreshing, true, "/admin/finance"),
            RouteDecision::Render
        );
    }

    #[test]
    fn test_validating_within_grace_shows_loading() {
        assert_eq!(
            decide(SessionStatus::Validating, false, "/admin/team"),
            RouteDecision::Loading
        );
    }

    #[test]
    fn test_validating_after_grace_fails_closed() {
        assert_eq!(
            decide(SessionStatus::Validating, true, "/admin/team"),
            RouteDecision::RedirectToLogin {
                target: "/admin/login?next=/admin/team".to_string()
            }
        );
    }

    #[test]
    fn test_anonymous_redirects_with_return_target() {
        assert_eq!(
            decide(SessionStatus::Anonymous, true, "/admin/messages"),
            RouteDecision::RedirectToLogin {
                target: "/admin/login?next=/admin/messages".to_string()
            }
        );
    }

    #[test]
    fn test_anonymous_on_login_surface_renders() {
        assert_eq!(
            decide(SessionStatus::Anonymous, true, LOGIN_PATH),
            RouteDecision::Render
        );
    }

    #[test]
    fn test_login_redirect_skips_login_surface() {
        assert!(login_redirect(LOGIN_PATH).is_none());
        assert!(login_redirect("/admin/login?next=/admin/team").is_none());
        assert_eq!(
            login_redirect("/admin/consultations").as_deref(),
            Some("/admin/login?next=/admin/consultations")
        );
    }

    #[test]
    fn test_grace_window() {
        let open = GraceWindow::starting_now(Duration::from_secs(60));
        assert!(!open.elapsed());

        let lapsed = GraceWindow::starting_now(Duration::ZERO);
        assert!(lapsed.elapsed());
    }

    proptest! {
        // The guard never bounces the login surface back to itself, for any
        // status and any grace state
        #[test]
        fn never_redirects_from_login_surface(
            status_idx in 0usize..4,
            elapsed in proptest::bool::ANY,
        ) {
            let status = [
                SessionStatus::Anonymous,
                SessionStatus::Validating,
                SessionStatus::Authenticated,
                SessionStatus::Refreshing,
            ][status_idx];

            let decision = decide(status, elapsed, LOGIN_PATH);
            prop_assert!(
                !matches!(decision, RouteDecision::RedirectToLogin { .. }),
                "guard must not redirect from the login surface"
            );
        }

        // Every redirect target points at the login surface and carries the
        // original path for post-login return
        #[test]
        fn redirect_targets_preserve_the_path(
            segment in "[a-z]{1,12}",
        ) {
            let path = format!("/admin/{}", segment);
            let decision = decide(SessionStatus::Anonymous, true, &path);

            match decision {
                RouteDecision::RedirectToLogin { target } => {
                    prop_assert!(target.starts_with(LOGIN_PATH));
                    prop_assert!(target.ends_with(&path));
                }
                other => prop_assert!(false, "expected redirect, got {:?}", other),
            }
        }
    }
}
