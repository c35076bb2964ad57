use std::sync::Arc;

use askama::Template;
use axum::Form;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth::backend::LoginOutcome;
use crate::auth::extract::{SessionCookie, clear_session_cookie, set_session_cookie};
use crate::error::AppError;
use crate::login::flow::{LoginFlow, TwoFactorSubject};
use crate::login::locale::Locale;
use crate::login::notice::LoginNotice;
use crate::login::policy::{AttemptSnapshot, LoginStep, SessionSeed, TWO_FACTOR_THROTTLE_DELAY};
use crate::state::AppState;

// Templates

struct Labels {
    title: &'static str,
    username: &'static str,
    password: &'static str,
    code: &'static str,
    captcha: &'static str,
    submit: &'static str,
    verify: &'static str,
    back: &'static str,
    signed_in: &'static str,
    logout: &'static str,
}

impl Labels {
    fn for_locale(locale: Locale) -> Self {
        match locale {
            Locale::Ko => Labels {
                title: "로그인",
                username: "아이디",
                password: "비밀번호",
                code: "인증 코드",
                captcha: "보안 확인",
                submit: "로그인",
                verify: "확인",
                back: "로그인으로 돌아가기",
                signed_in: "로그인되었습니다",
                logout: "로그아웃",
            },
            Locale::En => Labels {
                title: "Sign in",
                username: "Username",
                password: "Password",
                code: "Verification code",
                captcha: "Security check",
                submit: "Sign in",
                verify: "Verify",
                back: "Back to sign in",
                signed_in: "Signed in",
                logout: "Sign out",
            },
        }
    }
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    lang: &'static str,
    labels: Labels,
    flow_id: String,
    two_factor: bool,
    oauth: bool,
    username: String,
    message: Option<String>,
    show_captcha: bool,
    submit_disabled: bool,
    remaining_seconds: Option<u64>,
}

#[derive(Template)]
#[template(path = "home.html")]
struct HomeTemplate {
    lang: &'static str,
    labels: Labels,
    username: String,
}

// Form structs

#[derive(Deserialize)]
pub struct LoginQuery {
    username: Option<String>,
    two_factor: Option<bool>,
    oauth_token: Option<String>,
    lang: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginForm {
    flow: String,
    username: String,
    password: String,
    captcha: Option<String>,
}

#[derive(Deserialize)]
pub struct TwoFactorForm {
    flow: String,
    code: String,
}

#[derive(Deserialize)]
pub struct FlowForm {
    flow: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn render_flow(
    flow: &LoginFlow,
    now: DateTime<Utc>,
    notice: Option<LoginNotice>,
) -> Result<Html<String>, AppError> {
    let snapshot = flow.policy.snapshot(now);
    let locale = flow.policy.locale();
    let message = notice.map(|n| n.message(locale)).or(snapshot.message);
    let html = LoginTemplate {
        lang: locale.code(),
        labels: Labels::for_locale(locale),
        flow_id: flow.id.clone(),
        two_factor: snapshot.step == LoginStep::TwoFactor,
        oauth: flow.policy.seed().oauth_token.is_some(),
        username: flow.username.clone(),
        message,
        show_captcha: snapshot.show_captcha,
        submit_disabled: snapshot.submit_disabled,
        remaining_seconds: snapshot.remaining_seconds,
    }
    .render()?;
    Ok(Html(html))
}

fn restart() -> Response {
    Redirect::to("/login").into_response()
}

async fn complete_login(state: &AppState, flow_id: &str, username: String) -> Response {
    state.flows.lock().await.remove(flow_id);
    tracing::info!("User '{}' signed in", username);
    let session = state.sessions.lock().await.create(username, Utc::now());
    (
        [(axum::http::header::SET_COOKIE, set_session_cookie(&session.token))],
        Redirect::to("/"),
    )
        .into_response()
}

// Handlers

pub async fn login_page(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LoginQuery>,
) -> Result<Response, AppError> {
    let locale = match non_empty(query.lang) {
        Some(code) => Locale::from_code(&code)?,
        None => state.default_locale,
    };
    let prefilled_username = non_empty(query.username);
    let seed = SessionSeed {
        force_two_factor: query.two_factor.unwrap_or(false) && prefilled_username.is_some(),
        prefilled_username,
        oauth_token: non_empty(query.oauth_token),
    };

    let mut flows = state.flows.lock().await;
    let flow = flows.mount(seed, locale);
    Ok(render_flow(flow, Utc::now(), None)?.into_response())
}

pub async fn login_submit(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let now = Utc::now();
    let mut flows = state.flows.lock().await;
    let Some(flow) = flows.get_mut(&form.flow) else {
        return Ok(restart());
    };

    // The pending second factor stays bound to its subject until the user
    // explicitly goes back.
    if flow.policy.step() != LoginStep::Credentials {
        tracing::info!("Rejected password submission on flow {} awaiting 2FA", flow.id);
        let html = render_flow(flow, now, None)?;
        return Ok((StatusCode::CONFLICT, html).into_response());
    }
    flow.username = form.username.clone();

    let check = flow.policy.check_blocked(now);
    if check.blocked {
        tracing::info!(
            "Rejected submission on blocked flow {}: {}",
            flow.id,
            check.message.unwrap_or_default()
        );
        let html = render_flow(flow, now, None)?;
        return Ok((StatusCode::TOO_MANY_REQUESTS, html).into_response());
    }

    if flow.policy.state().show_captcha
        && !state
            .backend
            .verify_captcha(form.captcha.as_deref().unwrap_or_default())
    {
        let html = render_flow(flow, now, Some(LoginNotice::CaptchaRequired))?;
        return Ok((StatusCode::BAD_REQUEST, html).into_response());
    }

    match state.backend.login(&form.username, &form.password) {
        LoginOutcome::Authenticated => {
            flow.policy.record_success();
            let flow_id = flow.id.clone();
            drop(flows);
            Ok(complete_login(&state, &flow_id, form.username).await)
        }
        LoginOutcome::TwoFactorRequired => {
            flow.subject = Some(TwoFactorSubject::Username(form.username));
            flow.policy.enter_two_factor();
            Ok(render_flow(flow, now, None)?.into_response())
        }
        LoginOutcome::Rejected => {
            let attempts = flow.policy.record_failed_login(now).failed_login_attempts;
            tracing::info!(
                "Failed login for '{}' ({} consecutive)",
                form.username,
                attempts
            );
            let html = render_flow(flow, now, None)?;
            Ok((StatusCode::UNAUTHORIZED, html).into_response())
        }
    }
}

pub async fn two_factor_submit(
    State(state): State<Arc<AppState>>,
    Form(form): Form<TwoFactorForm>,
) -> Result<Response, AppError> {
    let now = Utc::now();
    let mut flows = state.flows.lock().await;
    let Some(flow) = flows.get_mut(&form.flow) else {
        return Ok(restart());
    };

    let check = flow.policy.check_blocked(now);
    if check.blocked {
        tracing::info!(
            "Rejected submission on blocked flow {}: {}",
            flow.id,
            check.message.unwrap_or_default()
        );
        let html = render_flow(flow, now, None)?;
        return Ok((StatusCode::TOO_MANY_REQUESTS, html).into_response());
    }

    if flow.policy.state().busy {
        let html = render_flow(flow, now, Some(LoginNotice::TwoFactorThrottled))?;
        return Ok((StatusCode::TOO_MANY_REQUESTS, html).into_response());
    }

    let Some(subject) = flow.subject.clone() else {
        flow.policy.return_to_login();
        return Ok(render_flow(flow, now, None)?.into_response());
    };

    if let Some(username) = state.backend.verify_two_factor(&subject, &form.code) {
        flow.policy.record_success();
        let flow_id = flow.id.clone();
        drop(flows);
        return Ok(complete_login(&state, &flow_id, username).await);
    }

    let failure = flow.policy.record_failed_two_factor(now);

    if let Some(ticket) = failure.throttle {
        let state = Arc::clone(&state);
        let flow_id = flow.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(TWO_FACTOR_THROTTLE_DELAY).await;
            if let Some(flow) = state.flows.lock().await.get_mut(&flow_id) {
                flow.policy.clear_throttle(ticket);
            }
        });
    }

    if failure.restart_flow {
        // The OAuth one-time token must not be reused.
        let flow_id = flow.id.clone();
        flows.remove(&flow_id);
        return Ok(restart());
    }

    if failure.forced_return_to_login {
        flow.subject = None;
    }

    let html = render_flow(flow, now, None)?;
    Ok((StatusCode::UNAUTHORIZED, html).into_response())
}

pub async fn back_to_login(
    State(state): State<Arc<AppState>>,
    Form(form): Form<FlowForm>,
) -> Result<Response, AppError> {
    let mut flows = state.flows.lock().await;
    let Some(flow) = flows.get_mut(&form.flow) else {
        return Ok(restart());
    };

    if flow.policy.seed().oauth_token.is_some() {
        let flow_id = flow.id.clone();
        flows.remove(&flow_id);
        return Ok(restart());
    }

    flow.policy.return_to_login();
    flow.subject = None;
    Ok(render_flow(flow, Utc::now(), None)?.into_response())
}

#[derive(Deserialize)]
pub struct StatusQuery {
    flow: String,
}

pub async fn login_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<AttemptSnapshot>, AppError> {
    let flows = state.flows.lock().await;
    let flow = flows
        .get(&query.flow)
        .ok_or_else(|| AppError::NotFound(format!("Unknown login flow '{}'", query.flow)))?;
    Ok(Json(flow.policy.snapshot(Utc::now())))
}

pub async fn home(
    State(state): State<Arc<AppState>>,
    SessionCookie(token): SessionCookie,
) -> Result<Response, AppError> {
    let username = state
        .sessions
        .lock()
        .await
        .touch(&token, Utc::now())
        .ok_or(AppError::LoginRequired)?;

    let locale = state.default_locale;
    let html = HomeTemplate {
        lang: locale.code(),
        labels: Labels::for_locale(locale),
        username,
    }
    .render()?;
    Ok(Html(html).into_response())
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    SessionCookie(token): SessionCookie,
) -> Response {
    if let Some(session) = state.sessions.lock().await.remove(&token) {
        tracing::info!("User '{}' signed out", session.username);
    }
    (
        [(axum::http::header::SET_COOKIE, clear_session_cookie())],
        Redirect::to("/login"),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, header};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::backend::{AuthBackend, StaticAuthBackend};
    use crate::auth::session::SessionStore;
    use crate::config::AccountConfig;
    use crate::login::flow::LoginFlowStore;

    struct CountingBackend {
        inner: StaticAuthBackend,
        calls: AtomicUsize,
    }

    impl AuthBackend for CountingBackend {
        fn login(&self, username: &str, password: &str) -> LoginOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.login(username, password)
        }

        fn verify_two_factor(&self, subject: &TwoFactorSubject, code: &str) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.verify_two_factor(subject, code)
        }
    }

    fn test_state(two_factor_code: Option<&str>) -> (Arc<AppState>, Arc<CountingBackend>) {
        let backend = Arc::new(CountingBackend {
            inner: StaticAuthBackend::new(&AccountConfig {
                username: "admin".to_string(),
                password: "secret".to_string(),
                two_factor_code: two_factor_code.map(str::to_string),
                oauth_tokens: vec!["github-token".to_string()],
            }),
            calls: AtomicUsize::new(0),
        });
        let state = Arc::new(AppState {
            backend: backend.clone(),
            flows: tokio::sync::Mutex::new(LoginFlowStore::new()),
            sessions: tokio::sync::Mutex::new(SessionStore::new()),
            default_locale: Locale::Ko,
        });
        (state, backend)
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn flow_id(html: &str) -> String {
        let marker = "name=\"flow\" value=\"";
        let start = html.find(marker).unwrap() + marker.len();
        let end = html[start..].find('"').unwrap();
        html[start..start + end].to_string()
    }

    async fn get(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn post(app: &Router, uri: &str, body: String) -> Response {
        app.clone()
            .oneshot(
                Request::post(uri)
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn mount(app: &Router, uri: &str) -> String {
        let response = get(app, uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        flow_id(&body_text(response).await)
    }

    #[tokio::test]
    async fn test_login_page_mounts_fresh_flow() {
        let (state, _) = test_state(None);
        let app = crate::build_router(state.clone());
        let first = mount(&app, "/login").await;
        let second = mount(&app, "/login").await;
        assert_ne!(first, second);
        assert_eq!(state.flows.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_lang_is_rejected() {
        let (state, _) = test_state(None);
        let app = crate::build_router(state);
        let response = get(&app, "/login?lang=xx").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_successful_login_sets_session() {
        let (state, _) = test_state(None);
        let app = crate::build_router(state);
        let flow = mount(&app, "/login").await;

        let response = post(
            &app,
            "/login",
            format!("flow={}&username=admin&password=secret", flow),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let cookie = response.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();

        let response = app
            .clone()
            .oneshot(
                Request::get("/")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("admin"));
    }

    #[tokio::test]
    async fn test_home_without_session_redirects() {
        let (state, _) = test_state(None);
        let app = crate::build_router(state);
        let response = get(&app, "/").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }

    #[tokio::test]
    async fn test_captcha_then_lockout_blocks_before_backend() {
        let (state, backend) = test_state(None);
        let app = crate::build_router(state);
        let flow = mount(&app, "/login").await;
        let wrong = format!("flow={}&username=admin&password=wrong&captcha=ok", flow);

        for _ in 0..2 {
            let response = post(&app, "/login", wrong.clone()).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        let response = post(&app, "/login", wrong.clone()).await;
        assert!(body_text(response).await.contains("name=\"captcha\""));

        // CAPTCHA now required; a submission without it never reaches the backend.
        let calls = backend.calls.load(Ordering::SeqCst);
        let response = post(
            &app,
            "/login",
            format!("flow={}&username=admin&password=wrong", flow),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(backend.calls.load(Ordering::SeqCst), calls);

        post(&app, "/login", wrong.clone()).await;
        let response = post(&app, "/login", wrong.clone()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_text(response).await.contains("30초"));

        let calls = backend.calls.load(Ordering::SeqCst);
        let response = post(
            &app,
            "/login",
            format!("flow={}&username=admin&password=secret&captcha=ok", flow),
        )
        .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(body_text(response).await.contains("초 후에 다시 시도해주세요"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_status_reports_countdown_without_mutating() {
        let (state, _) = test_state(None);
        let app = crate::build_router(state.clone());
        let flow = mount(&app, "/login").await;
        for _ in 0..5 {
            post(
                &app,
                "/login",
                format!("flow={}&username=admin&password=wrong&captcha=ok", flow),
            )
            .await;
        }

        let response = get(&app, &format!("/login/status?flow={}", flow)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["submit_disabled"], true);
        assert_eq!(json["show_captcha"], true);
        assert!(json["remaining_seconds"].as_u64().unwrap() <= 30);

        let flows = state.flows.lock().await;
        assert_eq!(flows.get(&flow).unwrap().policy.state().failed_login_attempts, 5);
    }

    #[tokio::test]
    async fn test_status_unknown_flow() {
        let (state, _) = test_state(None);
        let app = crate::build_router(state);
        let response = get(&app, "/login/status?flow=missing").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_two_factor_login() {
        let (state, _) = test_state(Some("123456"));
        let app = crate::build_router(state);
        let flow = mount(&app, "/login").await;

        let response = post(
            &app,
            "/login",
            format!("flow={}&username=admin&password=secret", flow),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("name=\"code\""));

        let response = post(&app, "/login/two-factor", format!("flow={}&code=123456", flow)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_factor_throttle_clears_after_delay() {
        let (state, backend) = test_state(Some("123456"));
        let app = crate::build_router(state.clone());
        let flow = mount(&app, "/login?oauth_token=github-token").await;
        let wrong = format!("flow={}&code=000000", flow);

        for _ in 0..3 {
            let response = post(&app, "/login/two-factor", wrong.clone()).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        assert!(state.flows.lock().await.get(&flow).unwrap().policy.state().busy);

        let calls = backend.calls.load(Ordering::SeqCst);
        let response = post(&app, "/login/two-factor", wrong.clone()).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(backend.calls.load(Ordering::SeqCst), calls);

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        let flows = state.flows.lock().await;
        let policy = &flows.get(&flow).unwrap().policy;
        assert!(!policy.state().busy);
        assert_eq!(policy.state().failed_two_factor_attempts, 3);
        assert!(policy.state().block_end_time.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oauth_two_factor_lockout_redirects_to_login() {
        let (state, _) = test_state(Some("123456"));
        let app = crate::build_router(state.clone());
        let flow = mount(&app, "/login?oauth_token=github-token").await;
        let wrong = format!("flow={}&code=000000", flow);

        for _ in 0..4 {
            let response = post(&app, "/login/two-factor", wrong.clone()).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            tokio::time::sleep(Duration::from_millis(3_100)).await;
        }
        let response = post(&app, "/login/two-factor", wrong).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");
        assert!(state.flows.lock().await.get(&flow).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_password_two_factor_lockout_returns_to_credentials() {
        let (state, _) = test_state(Some("123456"));
        let app = crate::build_router(state);
        let flow = mount(&app, "/login").await;
        post(
            &app,
            "/login",
            format!("flow={}&username=admin&password=secret", flow),
        )
        .await;

        let wrong = format!("flow={}&code=000000", flow);
        for _ in 0..4 {
            post(&app, "/login/two-factor", wrong.clone()).await;
            tokio::time::sleep(Duration::from_millis(3_100)).await;
        }
        let response = post(&app, "/login/two-factor", wrong).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let html = body_text(response).await;
        assert!(html.contains("name=\"password\""));
        assert!(html.contains("2단계 인증"));
    }

    #[tokio::test]
    async fn test_back_to_login_keeps_captcha() {
        let (state, _) = test_state(Some("123456"));
        let app = crate::build_router(state);
        let flow = mount(&app, "/login").await;
        for _ in 0..3 {
            post(
                &app,
                "/login",
                format!("flow={}&username=admin&password=wrong&captcha=ok", flow),
            )
            .await;
        }
        post(
            &app,
            "/login",
            format!("flow={}&username=admin&password=secret&captcha=ok", flow),
        )
        .await;
        post(&app, "/login/two-factor", format!("flow={}&code=000000", flow)).await;

        let response = post(&app, "/login/back", format!("flow={}", flow)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("name=\"password\""));
        assert!(html.contains("name=\"captcha\""));
        assert!(!html.contains("인증 코드가 올바르지 않습니다"));
    }

    #[tokio::test]
    async fn test_password_submit_cannot_replace_oauth_subject() {
        let (state, backend) = test_state(Some("123456"));
        let app = crate::build_router(state.clone());
        let flow = mount(&app, "/login?oauth_token=github-token").await;

        let response = post(
            &app,
            "/login",
            format!("flow={}&username=admin&password=secret", flow),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(body_text(response).await.contains("name=\"code\""));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

        let flows = state.flows.lock().await;
        let stored = flows.get(&flow).unwrap();
        assert_eq!(
            stored.subject,
            Some(TwoFactorSubject::OAuthToken("github-token".to_string()))
        );
        assert_eq!(stored.policy.step(), LoginStep::TwoFactor);
    }

    #[tokio::test]
    async fn test_stale_flow_restarts() {
        let (state, _) = test_state(None);
        let app = crate::build_router(state);
        let response = post(
            &app,
            "/login",
            "flow=unknown&username=admin&password=secret".to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }
}
