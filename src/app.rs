use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth, photos, state::AppState};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(auth::router())
        .merge(photos::router(&state.config.upload))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    // the query string carries the party name on uploads
                    let path = req.uri().path().to_owned();
                    tracing::info_span!("http_request", %method, %path, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "4300".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::repo, storage::PartyId};
    use axum::{
        body::Body,
        http::{header, Request, Response, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const BOUNDARY: &str = "photoboundary";

    async fn app_with_user(root: &std::path::Path) -> (Router, AppState) {
        let state = AppState::fake(root).await;
        repo::create_user(&state.db, "alice", "pw123", &PartyId::parse("acme").unwrap())
            .await
            .unwrap();
        (build_app(state.clone()), state)
    }

    fn multipart_body(files: &[(&str, &str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, content_type, content) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"photos\"; filename=\"{name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(content.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(party: &str, files: &[(&str, &str, &str)]) -> Request<Body> {
        Request::post(format!("/upload?partyname={party}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(files)))
            .unwrap()
    }

    fn form(uri: &str, body: &str, cookie: Option<&str>) -> Request<Body> {
        let mut req = Request::post(uri).header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(c) = cookie {
            req = req.header(header::COOKIE, c);
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, cookie: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    fn location(res: &Response<Body>) -> &str {
        res.headers()[header::LOCATION].to_str().unwrap()
    }

    async fn body_bytes(res: Response<Body>) -> Vec<u8> {
        res.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    async fn login(app: &Router, username: &str, password: &str) -> Response<Body> {
        app.clone()
            .oneshot(form(
                "/login",
                &format!("username={username}&password={password}"),
                None,
            ))
            .await
            .unwrap()
    }

    /// `session=<token>` from the login response.
    fn session_cookie(res: &Response<Body>) -> String {
        let raw = res.headers()[header::SET_COOKIE].to_str().unwrap();
        raw.split(';').next().unwrap().to_string()
    }

    async fn picture_names(app: &Router, cookie: &str, query: &str) -> Vec<String> {
        let res = app
            .clone()
            .oneshot(get(&format!("/admin/getpics{query}"), cookie))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(res).await).unwrap();
        json["pictures"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["fileName"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn health_is_public() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app_with_user(dir.path()).await;
        let res = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_bytes(res).await, b"ok");
    }

    #[tokio::test]
    async fn login_sets_session_only_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app_with_user(dir.path()).await;

        let ok = login(&app, "alice", "pw123").await;
        assert_eq!(ok.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&ok), "/admin/index.html");
        assert!(session_cookie(&ok).starts_with("session="));

        let bad = login(&app, "alice", "nope").await;
        assert_eq!(bad.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&bad), "/login.html?loginFailed=true");
        assert!(bad.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn admin_routes_redirect_without_session() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app_with_user(dir.path()).await;

        for uri in ["/admin/getpics", "/admin/downloadzip", "/admin/getpic/1_a.jpg"] {
            let res = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::SEE_OTHER, "{uri}");
            assert_eq!(location(&res), "/login.html");
        }

        let forged = app
            .clone()
            .oneshot(get("/admin/getpics", "session=not-a-token"))
            .await
            .unwrap();
        assert_eq!(forged.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn upload_moderate_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app_with_user(dir.path()).await;

        let res = app
            .clone()
            .oneshot(upload_request(
                "acme",
                &[
                    ("a.jpg", "image/jpeg", "aaa"),
                    ("b.jpg", "image/jpeg", "bbb"),
                    ("c.png", "image/png", "ccc"),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/uploadConfirmation.html");

        let cookie = session_cookie(&login(&app, "alice", "pw123").await);
        let all = picture_names(&app, &cookie, "").await;
        assert_eq!(all.len(), 3);
        assert!(all[0].ends_with("_a.jpg"));

        let res = app
            .clone()
            .oneshot(get(
                &format!("/admin/changepicstatus?filename={}&status=rejected", all[1]),
                &cookie,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_bytes(res).await, b"ok");

        let accepted = picture_names(&app, &cookie, "?acceptedonly=true").await;
        assert_eq!(accepted, [all[0].clone(), all[2].clone()]);

        let pic = app
            .clone()
            .oneshot(get(&format!("/admin/getpic/{}", all[0]), &cookie))
            .await
            .unwrap();
        assert_eq!(pic.status(), StatusCode::OK);
        assert_eq!(pic.headers()[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(body_bytes(pic).await, b"aaa");
    }

    #[tokio::test]
    async fn upload_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app_with_user(dir.path()).await;
        let file: &[(&str, &str, &str)] = &[("a.jpg", "image/jpeg", "aaa")];

        let missing = Request::post("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(file)))
            .unwrap();
        let res = app.clone().oneshot(missing).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app.clone().oneshot(upload_request("..", file)).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app.clone().oneshot(upload_request("ghosts", file)).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app
            .clone()
            .oneshot(upload_request("acme", &[("notes.txt", "text/plain", "hi")]))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let res = app.clone().oneshot(upload_request("acme", &[])).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM photos")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn parties_do_not_see_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app_with_user(dir.path()).await;
        repo::create_user(&state.db, "bob", "pw456", &PartyId::parse("globex").unwrap())
            .await
            .unwrap();

        app.clone()
            .oneshot(upload_request("acme", &[("a.jpg", "image/jpeg", "aaa")]))
            .await
            .unwrap();

        let alice = session_cookie(&login(&app, "alice", "pw123").await);
        let bob = session_cookie(&login(&app, "bob", "pw456").await);
        let names = picture_names(&app, &alice, "").await;
        assert_eq!(names.len(), 1);
        assert!(picture_names(&app, &bob, "").await.is_empty());

        let res = app
            .clone()
            .oneshot(get(&format!("/admin/getpic/{}", names[0]), &bob))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app
            .clone()
            .oneshot(
                Request::delete(format!("/admin/deletepic/{}", names[0]))
                    .header(header::COOKIE, &bob)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(picture_names(&app, &alice, "").await, names);
    }

    #[tokio::test]
    async fn delete_removes_listing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app_with_user(dir.path()).await;
        app.clone()
            .oneshot(upload_request("acme", &[("a.jpg", "image/jpeg", "aaa")]))
            .await
            .unwrap();
        let cookie = session_cookie(&login(&app, "alice", "pw123").await);
        let names = picture_names(&app, &cookie, "").await;

        let delete = |name: String| {
            Request::delete(format!("/admin/deletepic/{name}"))
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap()
        };
        let res = app.clone().oneshot(delete(names[0].clone())).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_bytes(res).await, b"Photo deleted successfully.");
        assert!(picture_names(&app, &cookie, "").await.is_empty());

        let again = app.clone().oneshot(delete(names[0].clone())).await.unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn change_status_requires_both_params() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app_with_user(dir.path()).await;
        let cookie = session_cookie(&login(&app, "alice", "pw123").await);

        let res = app
            .clone()
            .oneshot(get("/admin/changepicstatus?filename=1_a.jpg", &cookie))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app
            .clone()
            .oneshot(get("/admin/changepicstatus?filename=1_a.jpg&status=maybe", &cookie))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app
            .clone()
            .oneshot(get("/admin/changepicstatus?filename=1_a.jpg&status=accepted", &cookie))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_party_downloads_empty_zip() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app_with_user(dir.path()).await;
        let cookie = session_cookie(&login(&app, "alice", "pw123").await);

        let res = app
            .clone()
            .oneshot(get("/admin/downloadzip", &cookie))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/zip");
        assert_eq!(
            res.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"acme_photos.zip\""
        );
        let bytes = body_bytes(res).await;
        assert_eq!(&bytes[..4], b"PK\x05\x06");
    }

    #[tokio::test]
    async fn zip_contains_uploaded_photos() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app_with_user(dir.path()).await;
        app.clone()
            .oneshot(upload_request(
                "acme",
                &[("a.jpg", "image/jpeg", "aaa"), ("b.jpg", "image/jpeg", "bbb")],
            ))
            .await
            .unwrap();
        let cookie = session_cookie(&login(&app, "alice", "pw123").await);

        let res = app
            .clone()
            .oneshot(get("/admin/downloadzip", &cookie))
            .await
            .unwrap();
        let bytes = body_bytes(res).await;
        let reader = async_zip::base::read::mem::ZipFileReader::new(bytes)
            .await
            .unwrap();
        assert_eq!(reader.file().entries().len(), 2);
    }

    #[tokio::test]
    async fn register_and_change_password() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app_with_user(dir.path()).await;
        let cookie = session_cookie(&login(&app, "alice", "pw123").await);

        let res = app
            .clone()
            .oneshot(form("/register", "username=carol&password=pw789", Some(cookie.as_str())))
            .await
            .unwrap();
        assert_eq!(location(&res), "/newUser.html?userCreationFailed=false");
        let carol = repo::find_by_username(&state.db, "carol").await.unwrap().unwrap();
        assert_eq!(carol.party_id, "acme");

        let dup = app
            .clone()
            .oneshot(form("/register", "username=carol&password=x", Some(cookie.as_str())))
            .await
            .unwrap();
        assert_eq!(location(&dup), "/newUser.html?userCreationFailed=true");

        let wrong_old = app
            .clone()
            .oneshot(form(
                "/passwordChange",
                "password=bad&newPassword=next1&newPassword2=next1",
                Some(cookie.as_str()),
            ))
            .await
            .unwrap();
        assert_eq!(location(&wrong_old), "/passwordChange.html?passwordChangeFailed=true");

        let mismatch = app
            .clone()
            .oneshot(form(
                "/passwordChange",
                "password=pw123&newPassword=next1&newPassword2=next2",
                Some(cookie.as_str()),
            ))
            .await
            .unwrap();
        assert_eq!(location(&mismatch), "/passwordChange.html?passwordChangeFailed=true");
        assert_eq!(location(&login(&app, "alice", "pw123").await), "/admin/index.html");
        assert_eq!(location(&login(&app, "alice", "next1").await), "/login.html?loginFailed=true");

        let ok = app
            .clone()
            .oneshot(form(
                "/passwordChange",
                "password=pw123&newPassword=next1&newPassword2=next1",
                Some(cookie.as_str()),
            ))
            .await
            .unwrap();
        assert_eq!(location(&ok), "/passwordChange.html?passwordChangeFailed=false");
        let renewed = session_cookie(&ok);
        assert_eq!(location(&login(&app, "alice", "next1").await), "/admin/index.html");

        // sessions issued before the change are gone, the renewed one works
        let stale = app.clone().oneshot(get("/admin/getpics", &cookie)).await.unwrap();
        assert_eq!(stale.status(), StatusCode::SEE_OTHER);
        assert!(picture_names(&app, &renewed, "").await.is_empty());

        let anon = app
            .clone()
            .oneshot(form("/register", "username=mallory&password=x", None))
            .await
            .unwrap();
        assert_eq!(location(&anon), "/login.html");
        assert!(repo::find_by_username(&state.db, "mallory").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn logout_revokes_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app_with_user(dir.path()).await;
        let cookie = session_cookie(&login(&app, "alice", "pw123").await);
        assert!(picture_names(&app, &cookie, "").await.is_empty());

        let res = app
            .clone()
            .oneshot(form("/logout", "", Some(cookie.as_str())))
            .await
            .unwrap();
        assert_eq!(location(&res), "/login.html");

        // replaying the captured cookie no longer works
        let replay = app.clone().oneshot(get("/admin/getpics", &cookie)).await.unwrap();
        assert_eq!(replay.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&replay), "/login.html");
    }

    #[tokio::test]
    async fn legacy_bcrypt_admin_gets_a_login_redirect_not_a_500() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::fake(dir.path()).await;
        // seeded admin row as created by the previous deployment
        sqlx::query("INSERT INTO users (username, password, partyId) VALUES (?1, ?2, ?3)")
            .bind("admin")
            .bind("$2b$10$aRdMnDQSg/DeFoJNHj7HoupkHwQw8OE5WcxVONnICyy9FBK0eMcfe")
            .bind("myParty")
            .execute(&state.db)
            .await
            .unwrap();
        let legacy = bcrypt::hash("secret", 4).unwrap();
        sqlx::query("INSERT INTO users (username, password, partyId) VALUES ('old', ?1, 'myParty')")
            .bind(&legacy)
            .execute(&state.db)
            .await
            .unwrap();
        let app = build_app(state.clone());

        let wrong = login(&app, "admin", "wrong").await;
        assert_eq!(wrong.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&wrong), "/login.html?loginFailed=true");

        let ok = login(&app, "old", "secret").await;
        assert_eq!(location(&ok), "/admin/index.html");
        let upgraded = repo::find_by_username(&state.db, "old").await.unwrap().unwrap();
        assert!(upgraded.password_hash.starts_with("$argon2"));
        assert!(picture_names(&app, &session_cookie(&ok), "").await.is_empty());
    }
}
