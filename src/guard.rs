//! The route guard, run in front of every request.
//!
//! The decision only looks at the path and the session carried by the signed
//! cookie. It never reads the durable store and never leaves the process, so
//! the `X-Session-Token` header does not count here: a client that lost its
//! cookie can still check or end its session through `/auth`, but must log in
//! again to enter `/admin`.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::SignedCookieJar;
use time::OffsetDateTime;
use tracing::debug;

use crate::models::permissions::{can_administer, has_permission, Permission, Role};
use crate::session::Session;
use crate::util::current_time;

pub const ADMIN_PREFIX: &str = "/admin";
pub const LOGIN_PATH: &str = "/auth/login";
pub const SIGNUP_PATH: &str = "/auth/signup";
pub const DASHBOARD_PATH: &str = "/admin/dashboard";
pub const HOME_PATH: &str = "/";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(&'static str),
}

/// What an admin path asks of the session holder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdminAccess {
    /// A specific management permission
    Permission(Permission),
    /// Any one of the management permissions
    AnyManagement,
}

fn under(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .map_or(false, |rest| rest.starts_with('/'))
}

/// The access an admin path needs, or `None` outside the admin area.
pub fn required_access(path: &str) -> Option<AdminAccess> {
    if !under(path, ADMIN_PREFIX) {
        return None;
    }

    let panels = [
        ("/admin/events", Permission::ManageEvents),
        ("/admin/resources", Permission::ManageResources),
        ("/admin/users", Permission::ManageUsers),
    ];
    let access = panels
        .into_iter()
        .find(|(prefix, _)| under(path, prefix))
        .map_or(AdminAccess::AnyManagement, |(_, permission)| {
            AdminAccess::Permission(permission)
        });

    Some(access)
}

pub fn decide(path: &str, session: Option<&Session>, now: OffsetDateTime) -> GuardDecision {
    let session = session.filter(|session| session.is_live_at(now));

    if let Some(access) = required_access(path) {
        let Some(session) = session else {
            return GuardDecision::Redirect(LOGIN_PATH);
        };

        let user = &session.user;
        let permitted = user.role == Role::ADMIN
            || match access {
                AdminAccess::Permission(permission) => has_permission(user, permission),
                AdminAccess::AnyManagement => can_administer(user),
            };

        return if permitted {
            GuardDecision::Allow
        } else {
            GuardDecision::Redirect(HOME_PATH)
        };
    }

    if session.is_some() && (path == LOGIN_PATH || path == SIGNUP_PATH) {
        return GuardDecision::Redirect(DASHBOARD_PATH);
    }

    GuardDecision::Allow
}

pub async fn route_guard(jar: SignedCookieJar, request: Request, next: Next) -> Response {
    let now = current_time();
    let session = Session::from_cookie(&jar, now);

    match decide(request.uri().path(), session.as_ref(), now) {
        GuardDecision::Allow => next.run(request).await,
        GuardDecision::Redirect(to) => {
            debug!(path = request.uri().path(), to, "route guard redirected request");
            Redirect::to(to).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::tests::mock::mock_session;

    #[test]
    fn admin_paths_need_a_session() {
        let now = current_time();
        for path in ["/admin", "/admin/x", "/admin/dashboard", "/admin/events/new"] {
            assert_eq!(decide(path, None, now), GuardDecision::Redirect(LOGIN_PATH));
        }
    }

    #[test]
    fn members_are_sent_home() {
        let member = mock_session("member", &[]);
        assert_eq!(
            decide("/admin/x", Some(&member), current_time()),
            GuardDecision::Redirect(HOME_PATH)
        );
    }

    #[test]
    fn admins_pass_through() {
        let admin = mock_session("admin", &[]);
        for path in ["/admin/x", "/admin/users", "/admin/dashboard"] {
            assert_eq!(decide(path, Some(&admin), current_time()), GuardDecision::Allow);
        }
    }

    #[test]
    fn panels_need_their_permission() {
        let events_only = mock_session("member", &[Permission::ManageEvents]);
        let now = current_time();

        assert_eq!(decide("/admin/events", Some(&events_only), now), GuardDecision::Allow);
        assert_eq!(decide("/admin/dashboard", Some(&events_only), now), GuardDecision::Allow);
        assert_eq!(
            decide("/admin/users/1", Some(&events_only), now),
            GuardDecision::Redirect(HOME_PATH)
        );
        assert_eq!(
            decide("/admin/resources", Some(&events_only), now),
            GuardDecision::Redirect(HOME_PATH)
        );
    }

    #[test]
    fn logged_in_users_skip_the_auth_pages() {
        let member = mock_session("member", &[]);
        let now = current_time();

        assert_eq!(
            decide(LOGIN_PATH, Some(&member), now),
            GuardDecision::Redirect(DASHBOARD_PATH)
        );
        assert_eq!(
            decide(SIGNUP_PATH, Some(&member), now),
            GuardDecision::Redirect(DASHBOARD_PATH)
        );
        assert_eq!(decide(LOGIN_PATH, None, now), GuardDecision::Allow);
    }

    #[test]
    fn everything_else_is_allowed() {
        let now = current_time();
        for path in ["/", "/events", "/administrator", "/api/events", "/auth/callback"] {
            assert_eq!(decide(path, None, now), GuardDecision::Allow);
        }
    }

    #[test]
    fn expired_sessions_count_as_absent() {
        let admin = mock_session("admin", &[]);
        let later = admin.expires_at + Duration::seconds(1);

        assert_eq!(
            decide("/admin/x", Some(&admin), later),
            GuardDecision::Redirect(LOGIN_PATH)
        );
        assert_eq!(decide(LOGIN_PATH, Some(&admin), later), GuardDecision::Allow);
    }
}
