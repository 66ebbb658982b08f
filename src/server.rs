use crate::auth;
use crate::config::Config;
use crate::database;
use crate::database::models::{CategoryId, Cook, DishId, ReviewId};
use crate::forms::FormData;
use crate::views::{self, Message, SessionChange};
use argon2::Argon2;
use axum::extract::{Form, FromRequestParts, Path, Query, Request, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinError;
use tower_cookies::cookie::time::Duration;
use tower_cookies::cookie::SameSite;
use tower_cookies::{Cookie, CookieManagerLayer, Cookies, Key};
use url::Url;

const SESSION_COOKIE: &str = "sessionid";
const FLASH_COOKIE: &str = "_flash";
const TEMPLATE_HEADER: &str = "x-template";
const KEY_SALT: &[u8] = b"tasty-ideas.session";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid HTTP_HOST header")]
    DisallowedHost,

    #[error("CSRF verification failed. Request aborted.")]
    CrossOrigin,

    #[error(transparent)]
    View(#[from] crate::Error),

    #[error("view task failed: {0}")]
    Join(#[from] JoinError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::DisallowedHost => StatusCode::BAD_REQUEST,
            AppError::CrossOrigin => StatusCode::FORBIDDEN,
            AppError::View(crate::Error::NotFound) => StatusCode::NOT_FOUND,
            AppError::View(_) | AppError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Internal failures only explain themselves in debug mode.
    fn respond(self, debug: bool) -> Response {
        let status = self.status();
        let body = if status.is_server_error() {
            error!("{self}");
            if debug {
                self.to_string()
            } else {
                status.canonical_reason().unwrap_or_default().to_owned()
            }
        } else {
            self.to_string()
        };
        (status, body).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.respond(false)
    }
}

/// A numeric id from the path. Anything that isn't one names nothing on the site.
struct PathId(i32);

impl<S: Send + Sync> FromRequestParts<S> for PathId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<i32>::from_request_parts(parts, state).await {
            Ok(Path(id)) => Ok(Self(id)),
            Err(rejection) => {
                debug!("no such path {}: {rejection}", parts.uri.path());
                Err(AppError::View(crate::Error::NotFound))
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    conn: Arc<Mutex<database::Connection>>,
    key: Key,
    config: Arc<Config>,
}

impl AppState {
    pub fn new(conn: database::Connection, config: Config) -> crate::Result<Self> {
        let key = signing_key(config.signing_secret()?)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            key,
            config: Arc::new(config),
        })
    }
}

/// Stretches the configured secret into the 64 bytes cookie signing wants.
fn signing_key(secret: &str) -> crate::Result<Key> {
    let mut bytes = [0u8; 64];
    Argon2::default()
        .hash_password_into(secret.as_bytes(), KEY_SALT, &mut bytes)
        .map_err(argon2::password_hash::Error::from)?;
    Ok(Key::from(&bytes[..]))
}

#[derive(Deserialize)]
struct ValuedMessage<T> {
    #[serde(rename = "_")]
    value: T,
}

#[derive(Serialize)]
struct ValuedMessageRef<'a, T> {
    #[serde(rename = "_")]
    value: &'a T,
}

fn expired(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, "")).path("/").build()
}

fn set_flash(cookies: &Cookies, message: &Message) -> crate::Result<()> {
    let value = serde_json::to_string(&ValuedMessageRef { value: message })?;
    cookies.add(Cookie::build((FLASH_COOKIE, value)).path("/").build());
    Ok(())
}

/// Pending messages, consumed by reading them.
fn take_flash(cookies: &Cookies) -> Vec<Message> {
    let Some(cookie) = cookies.get(FLASH_COOKIE) else {
        return vec![];
    };
    cookies.remove(expired(FLASH_COOKIE));
    match serde_json::from_str::<ValuedMessage<Message>>(cookie.value()) {
        Ok(ValuedMessage { value }) => vec![value],
        Err(e) => {
            debug!("dropping unreadable flash cookie: {e}");
            vec![]
        }
    }
}

/// What the browser's session cookie becomes once a view has run.
enum SessionCookie {
    Open(String),
    Clear,
}

fn session_key(key: &Key, cookies: &Cookies) -> Option<String> {
    let cookie = cookies.signed(key).get(SESSION_COOKIE)?;
    Some(cookie.value().to_owned())
}

/// Closes the session the request came with and opens a new one when a cook logs in.
fn change_session(
    conn: &mut database::Connection,
    current: Option<&str>,
    change: &SessionChange,
) -> crate::Result<SessionCookie> {
    if let Some(current) = current {
        auth::close_session(conn, current)?;
    }
    Ok(match change {
        SessionChange::LogIn(cook) => SessionCookie::Open(auth::open_session(conn, *cook)?),
        SessionChange::LogOut => SessionCookie::Clear,
    })
}

fn apply_session(key: &Key, cookies: &Cookies, session: SessionCookie) {
    let signed = cookies.signed(key);
    match session {
        SessionCookie::Open(value) => signed.add(
            Cookie::build((SESSION_COOKIE, value))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .max_age(Duration::seconds(auth::SESSION_AGE_SECS))
                .build(),
        ),
        SessionCookie::Clear => signed.remove(expired(SESSION_COOKIE)),
    }
}

fn into_http(
    cookies: &Cookies,
    key: &Key,
    response: views::Response,
    session: Option<SessionCookie>,
) -> crate::Result<Response> {
    match response {
        views::Response::Render {
            template,
            mut context,
        } => {
            context.insert("messages", &take_flash(cookies))?;
            Ok(([(TEMPLATE_HEADER, template)], Json(context)).into_response())
        }
        views::Response::Redirect {
            location, message, ..
        } => {
            if let Some(message) = &message {
                set_flash(cookies, message)?;
            }
            if let Some(session) = session {
                apply_session(key, cookies, session);
            }
            Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
        }
    }
}

/// Resolves the session's cook and runs `view` with the connection held.
async fn run_view<F>(state: &AppState, cookies: &Cookies, view: F) -> Response
where
    F: FnOnce(&mut database::Connection, Option<&Cook>) -> crate::Result<views::Response>
        + Send
        + 'static,
{
    let current = session_key(&state.key, cookies);
    let conn = state.conn.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
        let cook = match &current {
            Some(key) => auth::session_cook(&mut conn, key)?,
            None => None,
        };
        if current.is_some() && cook.is_none() {
            debug!("session is closed or expired");
        }
        let response = view(&mut conn, cook.as_ref())?;
        let session = match &response {
            views::Response::Redirect {
                session: Some(change),
                ..
            } => Some(change_session(&mut conn, current.as_deref(), change)?),
            _ => None,
        };
        Ok::<_, crate::Error>((response, session))
    })
    .await;

    let result = match outcome {
        Ok(Ok((response, session))) => {
            into_http(cookies, &state.key, response, session).map_err(AppError::from)
        }
        Ok(Err(e)) => Err(AppError::from(e)),
        Err(e) => Err(AppError::from(e)),
    };
    result.unwrap_or_else(|e| e.respond(state.config.debug))
}

fn request_host(request: &Request) -> String {
    request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| request.uri().host())
        .unwrap_or_default()
        .to_owned()
}

async fn check_host(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let host = request_host(&request);
    if !state.config.host_allowed(&host) {
        warn!("refusing request for disallowed host {host:?}");
        return AppError::DisallowedHost.into_response();
    }
    next.run(request).await
}

/// `host[:port]` of an `Origin` or `Referer` value, the way a `Host` header spells it.
fn origin_host(source: &str) -> Option<String> {
    let url = Url::parse(source).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}

/// Writes are only accepted from pages of this site: `Origin`, or failing that `Referer`, must
/// name the host the request was sent to.
async fn check_origin(request: Request, next: Next) -> Response {
    if request.method().is_safe() {
        return next.run(request).await;
    }
    let headers = request.headers();
    let source = headers
        .get(header::ORIGIN)
        .or_else(|| headers.get(header::REFERER))
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let host = request_host(&request);
    match source.as_deref().and_then(origin_host) {
        Some(origin) if origin.eq_ignore_ascii_case(&host) => next.run(request).await,
        _ => {
            warn!(
                "refusing {} {} from {source:?} sent to {host:?}",
                request.method(),
                request.uri().path()
            );
            AppError::CrossOrigin.into_response()
        }
    }
}

async fn index(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(params): Query<FormData>,
) -> Response {
    run_view(&state, &cookies, move |conn, _| views::index(conn, &params)).await
}

async fn dish_list(
    State(state): State<AppState>,
    cookies: Cookies,
    PathId(id): PathId,
    Query(params): Query<FormData>,
) -> Response {
    run_view(&state, &cookies, move |conn, _| {
        views::dish_list(conn, CategoryId::new(id), &params)
    })
    .await
}

async fn dish_detail(
    State(state): State<AppState>,
    cookies: Cookies,
    PathId(id): PathId,
) -> Response {
    run_view(&state, &cookies, move |conn, cook| {
        views::dish_detail(conn, cook, DishId::new(id))
    })
    .await
}

async fn add_review(
    State(state): State<AppState>,
    cookies: Cookies,
    PathId(id): PathId,
    Form(data): Form<FormData>,
) -> Response {
    run_view(&state, &cookies, move |conn, cook| {
        views::add_review(conn, cook, DishId::new(id), &data)
    })
    .await
}

async fn dish_create_form(
    State(state): State<AppState>,
    cookies: Cookies,
    PathId(id): PathId,
) -> Response {
    run_view(&state, &cookies, move |conn, cook| {
        views::dish_create_form(conn, cook, CategoryId::new(id))
    })
    .await
}

async fn dish_create(
    State(state): State<AppState>,
    cookies: Cookies,
    PathId(id): PathId,
    Form(data): Form<FormData>,
) -> Response {
    run_view(&state, &cookies, move |conn, cook| {
        views::dish_create(conn, cook, CategoryId::new(id), &data)
    })
    .await
}

async fn dish_update_form(
    State(state): State<AppState>,
    cookies: Cookies,
    PathId(id): PathId,
) -> Response {
    run_view(&state, &cookies, move |conn, cook| {
        views::dish_update_form(conn, cook, DishId::new(id))
    })
    .await
}

async fn dish_update(
    State(state): State<AppState>,
    cookies: Cookies,
    PathId(id): PathId,
    Form(data): Form<FormData>,
) -> Response {
    run_view(&state, &cookies, move |conn, cook| {
        views::dish_update(conn, cook, DishId::new(id), &data)
    })
    .await
}

async fn dish_delete_confirm(
    State(state): State<AppState>,
    cookies: Cookies,
    PathId(id): PathId,
) -> Response {
    run_view(&state, &cookies, move |conn, cook| {
        views::dish_delete_confirm(conn, cook, DishId::new(id))
    })
    .await
}

async fn dish_delete(
    State(state): State<AppState>,
    cookies: Cookies,
    PathId(id): PathId,
) -> Response {
    run_view(&state, &cookies, move |conn, cook| {
        views::dish_delete(conn, cook, DishId::new(id))
    })
    .await
}

async fn delete_review(
    State(state): State<AppState>,
    cookies: Cookies,
    PathId(id): PathId,
) -> Response {
    run_view(&state, &cookies, move |conn, cook| {
        views::delete_review(conn, cook, ReviewId::new(id))
    })
    .await
}

async fn profile(State(state): State<AppState>, cookies: Cookies) -> Response {
    run_view(&state, &cookies, |_, cook| views::profile(cook)).await
}

async fn profile_update(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(data): Form<FormData>,
) -> Response {
    run_view(&state, &cookies, move |conn, cook| {
        views::profile_update(conn, cook, &data)
    })
    .await
}

async fn signup_form(State(state): State<AppState>, cookies: Cookies) -> Response {
    run_view(&state, &cookies, |_, _| views::signup_form()).await
}

async fn signup(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(data): Form<FormData>,
) -> Response {
    run_view(&state, &cookies, move |conn, _| views::signup(conn, &data)).await
}

async fn login_form(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(params): Query<FormData>,
) -> Response {
    run_view(&state, &cookies, move |_, _| views::login_form(&params)).await
}

async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(params): Query<FormData>,
    Form(data): Form<FormData>,
) -> Response {
    run_view(&state, &cookies, move |conn, _| {
        views::login(conn, &params, &data)
    })
    .await
}

async fn logout(State(state): State<AppState>, cookies: Cookies) -> Response {
    run_view(&state, &cookies, |_, cook| views::logout(cook)).await
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/categories/{id}/", get(dish_list))
        .route(
            "/categories/{id}/dishes/create/",
            get(dish_create_form).post(dish_create),
        )
        .route("/dishes/{id}/", get(dish_detail).post(add_review))
        .route(
            "/dishes/{id}/update/",
            get(dish_update_form).post(dish_update),
        )
        .route(
            "/dishes/{id}/delete/",
            get(dish_delete_confirm).post(dish_delete),
        )
        .route("/review/{id}/delete/", post(delete_review))
        .route("/profile/", get(profile).post(profile_update))
        .route("/accounts/signup/", get(signup_form).post(signup))
        .route("/accounts/login/", get(login_form).post(login))
        .route("/accounts/logout/", post(logout))
        .layer(CookieManagerLayer::new())
        .layer(middleware::from_fn(check_origin))
        .layer(middleware::from_fn_with_state(state.clone(), check_host))
        .with_state(state)
}

pub async fn serve(conn: database::Connection, config: Config) -> crate::Result<()> {
    let address = config.bind_address.clone();
    let app = router(AppState::new(conn, config)?);

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}


#[cfg(test)]
use axum::body::Body;
#[cfg(test)]
use tower::ServiceExt as _;

#[cfg(test)]
const SITE_ORIGIN: &str = "http://localhost:8000";

#[cfg(test)]
struct Site {
    router: Router,
    dish: DishId,
}

#[cfg(test)]
fn site() -> Site {
    use crate::database::models::{Difficulty, DishType};
    use crate::query;
    use std::path::PathBuf;

    let mut conn = database::test_connection();
    let sushi = query::add_category(&mut conn, DishType::Sushi, None).unwrap();
    let dish = query::test_support::dish(
        &mut conn,
        sushi.id,
        "Tuna Roll",
        "10.99",
        Difficulty::Easy,
        &[],
    );
    auth::register(
        &mut conn,
        &auth::Registration {
            username: "testcook",
            first_name: "Test",
            last_name: "Cook",
            email: "",
            password: Some("testpass123"),
            experience: 3,
        },
    )
    .unwrap();

    let config = Config {
        database_path: PathBuf::from(":memory:"),
        secret_key: Some("s".repeat(40)),
        debug: true,
        allowed_hosts: vec![],
        bind_address: "127.0.0.1:0".into(),
    };
    Site {
        router: router(AppState::new(conn, config).unwrap()),
        dish: dish.id,
    }
}

#[cfg(test)]
fn get_page(uri: &str) -> Request {
    axum::http::Request::get(uri)
        .header(header::HOST, "localhost:8000")
        .body(Body::empty())
        .unwrap()
}

/// A form post as a page of the site sends it.
#[cfg(test)]
fn post_form(uri: &str, body: &str) -> Request {
    axum::http::Request::post(uri)
        .header(header::HOST, "localhost:8000")
        .header(header::ORIGIN, SITE_ORIGIN)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_owned()))
        .unwrap()
}

#[cfg(test)]
fn with_cookie(mut request: Request, cookie: &str) -> Request {
    request
        .headers_mut()
        .insert(header::COOKIE, cookie.parse().unwrap());
    request
}

#[cfg(test)]
fn set_cookie_header(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{name}=")))
        .map(str::to_owned)
}

/// The `name=value` part of the response's cookie called `name`.
#[cfg(test)]
fn cookie_named(response: &Response, name: &str) -> Option<String> {
    set_cookie_header(response, name).map(|v| v.split(';').next().unwrap_or_default().to_owned())
}

#[cfg(test)]
fn location(response: &Response) -> &str {
    response.headers()[header::LOCATION].to_str().unwrap()
}

#[cfg(test)]
async fn json(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Logs `testcook` in and hands back the session cookie to send.
#[cfg(test)]
async fn log_in(site: &Site) -> String {
    let response = site
        .router
        .clone()
        .oneshot(post_form(
            "/accounts/login/",
            "username=testcook&password=testpass123",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    cookie_named(&response, SESSION_COOKIE).unwrap()
}

#[tokio::test]
async fn renders_context_with_template_header() {
    let site = site();
    let response = site.router.oneshot(get_page("/categories/1/?query=tuna")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[TEMPLATE_HEADER], "tasty_ideas/dish_list.html");
    let body = json(response).await;
    assert_eq!(body["dishes"][0]["name"], "Tuna Roll");
    assert_eq!(body["messages"], serde_json::json!([]));
}

#[tokio::test]
async fn missing_things_are_not_found() {
    let site = site();
    let response = site.router.clone().oneshot(get_page("/dishes/99999/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = site.router.oneshot(get_page("/categories/1/?page=9")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unusable_path_ids_are_not_found() {
    let site = site();
    for uri in [
        "/dishes/abc/",
        "/dishes/99999999999/",
        "/dishes/-/update/",
        "/categories/abc/",
        "/categories/1.5/dishes/create/",
    ] {
        let response = site.router.clone().oneshot(get_page(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
    let response = site
        .router
        .oneshot(post_form("/review/abc/delete/", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn disallowed_host_rejected() {
    let site = site();
    let request = axum::http::Request::get("/")
        .header(header::HOST, "evil.example")
        .body(Body::empty())
        .unwrap();
    let response = site.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cross_origin_writes_rejected() {
    let site = site();
    let login = |origin: Option<(header::HeaderName, &str)>| {
        let mut request = post_form("/accounts/login/", "username=testcook&password=testpass123");
        request.headers_mut().remove(header::ORIGIN);
        if let Some((name, value)) = origin {
            request.headers_mut().insert(name, value.parse().unwrap());
        }
        request
    };

    for request in [
        login(Some((header::ORIGIN, "http://evil.example"))),
        login(Some((header::ORIGIN, "http://localhost:9000"))),
        login(Some((header::ORIGIN, "null"))),
        login(Some((header::REFERER, "http://evil.example/accounts/login/"))),
        login(None),
    ] {
        let response = site.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(cookie_named(&response, SESSION_COOKIE).is_none());
    }

    let request = login(Some((header::REFERER, "http://localhost:8000/accounts/login/")));
    let response = site.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn anonymous_sent_to_login() {
    let site = site();
    let response = site.router.oneshot(get_page("/profile/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/accounts/login/?next=/profile/");
}

#[tokio::test]
async fn anonymous_review_flashes_message() {
    let site = site();
    let detail = format!("/dishes/{}/", site.dish);
    let response = site
        .router
        .clone()
        .oneshot(post_form(&detail, "content=hello"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), detail);
    let flash = cookie_named(&response, FLASH_COOKIE).unwrap();

    let response = site
        .router
        .oneshot(with_cookie(get_page(&detail), &flash))
        .await
        .unwrap();
    let body = json(response).await;
    assert_eq!(body["messages"][0]["text"], "Please log in before adding reviews.");
    assert_eq!(body["messages"][0]["level"], "error");
    assert_eq!(body["reviews"], serde_json::json!([]));
}

#[tokio::test]
async fn login_session_round_trip() {
    let site = site();
    let response = site
        .router
        .clone()
        .oneshot(post_form(
            "/accounts/login/?next=/profile/",
            "username=testcook&password=testpass123",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/profile/");
    let header = set_cookie_header(&response, SESSION_COOKIE).unwrap();
    assert!(header.contains("HttpOnly"), "{header}");
    assert!(header.contains("SameSite=Lax"), "{header}");
    assert!(header.contains("Max-Age=1209600"), "{header}");
    let session = cookie_named(&response, SESSION_COOKIE).unwrap();

    let response = site
        .router
        .clone()
        .oneshot(with_cookie(get_page("/profile/"), &session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["user"]["username"], "testcook");

    let detail = format!("/dishes/{}/", site.dish);
    let response = site
        .router
        .clone()
        .oneshot(with_cookie(post_form(&detail, "content=Lovely"), &session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(cookie_named(&response, FLASH_COOKIE).is_none());

    let response = site.router.oneshot(get_page(&detail)).await.unwrap();
    assert_eq!(json(response).await["reviews"][0]["content"], "Lovely");
}

#[tokio::test]
async fn login_next_stays_on_site() {
    let site = site();
    for next in ["/%5Cevil.example/", "//evil.example/", "https://evil.example/"] {
        let response = site
            .router
            .clone()
            .oneshot(post_form(
                &format!("/accounts/login/?next={next}"),
                "username=testcook&password=testpass123",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/", "{next}");
    }
}

#[tokio::test]
async fn logged_out_session_cannot_be_replayed() {
    let site = site();
    let session = log_in(&site).await;

    let response = site
        .router
        .clone()
        .oneshot(with_cookie(post_form("/accounts/logout/", ""), &session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(set_cookie_header(&response, SESSION_COOKIE).is_some());

    let response = site
        .router
        .oneshot(with_cookie(get_page("/profile/"), &session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/accounts/login/?next=/profile/");
}

#[tokio::test]
async fn password_change_logs_out_other_browsers() {
    let site = site();
    let here = log_in(&site).await;
    let elsewhere = log_in(&site).await;

    let response = site
        .router
        .clone()
        .oneshot(with_cookie(
            post_form(
                "/profile/",
                "username=testcook&password1=brandnewpass&password2=brandnewpass",
            ),
            &here,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let renewed = cookie_named(&response, SESSION_COOKIE).unwrap();

    for (session, status) in [
        (&here, StatusCode::FOUND),
        (&elsewhere, StatusCode::FOUND),
        (&renewed, StatusCode::OK),
    ] {
        let response = site
            .router
            .clone()
            .oneshot(with_cookie(get_page("/profile/"), session))
            .await
            .unwrap();
        assert_eq!(response.status(), status);
    }
}

#[tokio::test]
async fn forged_session_ignored() {
    let site = site();
    let response = site
        .router
        .oneshot(with_cookie(get_page("/profile/"), "sessionid=1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn internal_detail_only_in_debug() {
    let error = || AppError::View(crate::Error::Config("boom".into()));
    let response = error().respond(false);
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"Internal Server Error");

    let body = axum::body::to_bytes(error().respond(true).into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"configuration error: boom");
}
