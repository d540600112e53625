use std::collections::BTreeSet;
use tokio::sync::watch;

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session restore still running: render nothing, decide nothing.
    Wait,
    Render,
    RedirectToSignIn,
    /// Signed in, but none of the required roles.
    Forbidden,
}

/// Gate for a protected view.
#[derive(Debug, Clone, Default)]
pub struct RouteGuard {
    required_roles: BTreeSet<String>,
}

impl RouteGuard {
    /// Any signed-in user may enter.
    pub fn protected() -> Self {
        Self::default()
    }

    /// Signed-in users holding at least one of `roles` may enter.
    pub fn with_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required_roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn evaluate(&self, session: &Session) -> GuardDecision {
        if session.loading {
            return GuardDecision::Wait;
        }
        if !session.is_authenticated() {
            return GuardDecision::RedirectToSignIn;
        }
        match &session.user {
            Some(user)
                if !self.required_roles.is_empty()
                    && !user.has_any_role(&self.required_roles) =>
            {
                GuardDecision::Forbidden
            }
            _ => GuardDecision::Render,
        }
    }

    /// Wait out the loading state, then decide.
    pub async fn resolve(&self, session: &mut watch::Receiver<Session>) -> GuardDecision {
        let settled = session
            .wait_for(|s| !s.loading)
            .await
            .map(|s| (*s).clone());
        match settled {
            Ok(settled) => self.evaluate(&settled),
            // sender gone: decide on the last value seen
            Err(_) => self.evaluate(&session.borrow()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;

    fn signed_in(roles: &[&str]) -> Session {
        Session {
            user: Some(User {
                id: "1".into(),
                name: "Ana".into(),
                email: "ana@example.com".into(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
            }),
            token: Some("T1".into()),
            loading: false,
        }
    }

    #[test]
    fn test_loading_never_redirects() {
        let session = Session {
            loading: true,
            ..Session::default()
        };
        assert_eq!(RouteGuard::protected().evaluate(&session), GuardDecision::Wait);
        assert_eq!(
            RouteGuard::with_roles(["admin"]).evaluate(&session),
            GuardDecision::Wait
        );
    }

    #[test]
    fn test_signed_out_redirects() {
        assert_eq!(
            RouteGuard::protected().evaluate(&Session::default()),
            GuardDecision::RedirectToSignIn
        );
    }

    #[test]
    fn test_token_without_user_redirects() {
        let session = Session {
            token: Some("T1".into()),
            ..Session::default()
        };
        assert_eq!(
            RouteGuard::protected().evaluate(&session),
            GuardDecision::RedirectToSignIn
        );
    }

    #[test]
    fn test_role_gate() {
        let guard = RouteGuard::with_roles(["admin", "manager"]);
        assert_eq!(guard.evaluate(&signed_in(&["manager"])), GuardDecision::Render);
        assert_eq!(guard.evaluate(&signed_in(&["cashier"])), GuardDecision::Forbidden);
        assert_eq!(
            RouteGuard::protected().evaluate(&signed_in(&[])),
            GuardDecision::Render
        );
    }

    #[tokio::test]
    async fn test_resolve_waits_for_restore() {
        let (tx, mut rx) = watch::channel(Session {
            loading: true,
            ..Session::default()
        });
        let guard = RouteGuard::protected();

        let waiter = tokio::spawn(async move { guard.resolve(&mut rx).await });
        tokio::task::yield_now().await;
        tx.send_replace(signed_in(&["admin"]));

        assert_eq!(waiter.await.unwrap(), GuardDecision::Render);
    }
}
