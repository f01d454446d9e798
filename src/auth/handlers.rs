use axum::{
    extract::{FromRef, State},
    response::Redirect,
    routing::post,
    Form, Router,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{LoginForm, PasswordChangeForm, RegisterForm},
        repo,
        session::{removal_cookie, AuthSession, SessionKeys, SESSION_COOKIE},
    },
    error::{AppError, AppResult, LOGIN_PAGE},
    state::AppState,
};

pub const ADMIN_LANDING: &str = "/admin/index.html";
pub const LOGIN_FAILED: &str = "/login.html?loginFailed=true";
const PASSWORD_CHANGED: &str = "/passwordChange.html?passwordChangeFailed=false";
const PASSWORD_CHANGE_FAILED: &str = "/passwordChange.html?passwordChangeFailed=true";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/register", post(register))
        .route("/passwordChange", post(password_change))
}

#[instrument(skip(state, jar, form))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> AppResult<(CookieJar, Redirect)> {
    let Some(user) = repo::authenticate(&state.db, &form.username, &form.password).await? else {
        return Ok((jar, Redirect::to(LOGIN_FAILED)));
    };

    let keys = SessionKeys::from_ref(&state);
    let token = keys.sign(user.id, user.session_version)?;

    info!(user_id = user.id, username = %user.username, party = %user.party_id, "user logged in");
    Ok((jar.add(keys.cookie(token)), Redirect::to(ADMIN_LANDING)))
}

/// Clears the cookie and, when it still held a valid session, revokes every
/// token of that user so a copied cookie dies with it.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    let keys = SessionKeys::from_ref(&state);
    let user_id = jar
        .get(SESSION_COOKIE)
        .and_then(|c| keys.verify(c.value()).ok())
        .and_then(|claims| claims.sub.parse::<i64>().ok());
    if let Some(user_id) = user_id {
        match repo::revoke_sessions(&state.db, user_id).await {
            Ok(()) => info!(user_id, "user logged out"),
            Err(e) => warn!(error = %e, user_id, "session revocation failed"),
        }
    }
    (jar.remove(removal_cookie()), Redirect::to(LOGIN_PAGE))
}

#[instrument(skip(state, form), fields(party = %session.party))]
pub async fn register(
    State(state): State<AppState>,
    session: AuthSession,
    Form(form): Form<RegisterForm>,
) -> AppResult<Redirect> {
    let failed = match repo::create_user(&state.db, &form.username, &form.password, &session.party).await {
        Ok(user) => {
            info!(user_id = user.id, username = %user.username, by = %session.username, "registered new user");
            false
        }
        Err(e @ (AppError::DuplicateUsername | AppError::Validation(_))) => {
            warn!(error = %e, "user creation refused");
            true
        }
        Err(e) => return Err(e),
    };
    Ok(Redirect::to(&format!("/newUser.html?userCreationFailed={failed}")))
}

#[instrument(skip(state, jar, form), fields(user_id = session.user_id, username = %session.username))]
pub async fn password_change(
    State(state): State<AppState>,
    jar: CookieJar,
    session: AuthSession,
    Form(form): Form<PasswordChangeForm>,
) -> AppResult<(CookieJar, Redirect)> {
    if form.new_password != form.new_password2 {
        warn!("password not changed, new passwords differ");
        return Ok((jar, Redirect::to(PASSWORD_CHANGE_FAILED)));
    }
    match repo::change_password(&state.db, &session.username, &form.password, &form.new_password).await {
        Ok(user) => {
            // older tokens are revoked now; keep this browser signed in
            let keys = SessionKeys::from_ref(&state);
            let token = keys.sign(user.id, user.session_version)?;
            Ok((jar.add(keys.cookie(token)), Redirect::to(PASSWORD_CHANGED)))
        }
        Err(e @ (AppError::IncorrectOldPassword | AppError::Validation(_))) => {
            warn!(error = %e, "password not changed");
            Ok((jar, Redirect::to(PASSWORD_CHANGE_FAILED)))
        }
        Err(e) => Err(e),
    }
}
