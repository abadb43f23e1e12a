use std::convert::Infallible;

use axum::{
    Json,
    extract::State,
    http::header,
    response::{
        Html, IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::WatchStream;

use crate::common::AppState;
use crate::render::{self, DashboardView};
use crate::routes::session::DashboardSession;

/// Latest rendered dashboard
///
/// Served from the session's last cycle; runs one immediately if the poller
/// has not rendered yet.
#[utoipa::path(
    get,
    path = "/api/dashboard",
    responses(
        (status = 200, description = "Current dashboard view", body = DashboardView),
        (status = 401, description = "Not logged in"),
    ),
    security(("session" = [])),
    tag = "dashboard"
)]
pub async fn get_dashboard(
    State(state): State<AppState>,
    DashboardSession(session): DashboardSession,
) -> Json<DashboardView> {
    let view = match session.latest_view() {
        Some(view) => view,
        None => render::refresh_view(&state, &session).await,
    };
    Json((*view).clone())
}

/// Stream of rendered dashboards (server-sent events)
///
/// Emits a `dashboard` event with the current view on connect and after every
/// poll cycle or command. Ends when the session is torn down.
#[utoipa::path(
    get,
    path = "/api/dashboard/stream",
    responses(
        (status = 200, description = "text/event-stream of DashboardView"),
        (status = 401, description = "Not logged in"),
    ),
    security(("session" = [])),
    tag = "dashboard"
)]
pub async fn stream_dashboard(
    DashboardSession(session): DashboardSession,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = session.id;
    let events = WatchStream::new(session.subscribe()).filter_map(move |view| async move {
        let view = view?;
        match Event::default().event("dashboard").json_data(&*view) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Could not encode dashboard event");
                None
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

pub async fn index() -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "no-cache")],
        Html(INDEX_HTML),
    )
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Valve Control</title>
    <style>
        body { font-family: system-ui, sans-serif; max-width: 960px; margin: 0 auto; padding: 1rem; }
        .hidden { display: none; }
        .metrics { display: flex; gap: 1rem; flex-wrap: wrap; }
        .metric { border: 1px solid #ccc; border-radius: 0.375rem; padding: 0.75rem 1rem; min-width: 10rem; }
        .metric b { display: block; font-size: 1.5rem; }
        .offline { color: #b91c1c; }
        .error { color: #b91c1c; min-height: 1.25rem; }
        table { border-collapse: collapse; }
        td, th { border: 1px solid #ddd; padding: 0.25rem 0.5rem; }
    </style>
</head>
<body>
<section id="login">
    <h1>Valve Control</h1>
    <form id="login-form">
        <input id="username" placeholder="Username" autocomplete="username">
        <input id="password" type="password" placeholder="Password" autocomplete="current-password">
        <button type="submit">Log in</button>
    </form>
    <p class="error" id="login-error"></p>
</section>

<section id="dashboard" class="hidden">
    <header>
        <span id="who"></span>
        <span id="status"></span>
        <button id="logout">Log out</button>
    </header>
    <div class="metrics">
        <div class="metric">Pressure<b id="pressure">-</b></div>
        <div class="metric">Rotation<b id="rotation">-</b></div>
        <div class="metric">Motor load<b id="motor">-</b></div>
        <div class="metric">Clock<b id="clock">-</b></div>
    </div>
    <p>
        <label><input type="checkbox" id="auto-mode"> Auto mode</label>
        Command: <span id="command"></span>
        <span id="emergency"></span>
    </p>
    <p>
        <button data-cmd="OPEN">OPEN</button>
        <button data-cmd="CLOSE">CLOSE</button>
        <button data-cmd="STOP">EMERGENCY STOP</button>
    </p>
    <p class="error" id="command-error"></p>
    <h2>Schedule</h2>
    <textarea id="schedule" rows="6" cols="40"></textarea><br>
    <button id="save-schedule">Save schedule</button>
    <h2>Activity</h2>
    <table><tbody id="activity"></tbody></table>
</section>

<script>
let token = sessionStorage.getItem("session");
let timer = null;
const $ = (id) => document.getElementById(id);

async function api(method, path, body) {
    const headers = { "Content-Type": "application/json" };
    if (token) headers["Authorization"] = "Bearer " + token;
    const res = await fetch(path, { method, headers, body: body ? JSON.stringify(body) : undefined });
    const data = res.status === 204 ? null : await res.json();
    if (!res.ok) throw new Error(data && data.error ? data.error : res.statusText);
    return data;
}

function render(view) {
    $("who").textContent = view.username + " (" + view.role + ")";
    $("status").textContent = view.online ? "online" : "OFFLINE (last known values)";
    $("status").className = view.online ? "" : "offline";
    $("pressure").textContent = view.metrics.pressure;
    $("rotation").textContent = view.metrics.rotation;
    $("motor").textContent = view.metrics.motor_load;
    $("clock").textContent = view.metrics.clock;
    $("auto-mode").checked = view.auto_mode;
    $("auto-mode").disabled = !view.controls.auto_toggle;
    $("command").textContent = view.command;
    $("emergency").textContent = view.emergency ? "EMERGENCY" : "";
    document.querySelector("[data-cmd=OPEN]").disabled = !view.controls.open;
    document.querySelector("[data-cmd=CLOSE]").disabled = !view.controls.close;
    document.querySelector("[data-cmd=STOP]").disabled = !view.controls.stop;
    $("save-schedule").disabled = !view.controls.schedule;
    if (document.activeElement !== $("schedule")) {
        $("schedule").value = view.schedule.map((e) => e.start_time + " " + e.target).join("\n");
    }
    $("activity").innerHTML = "";
    for (const entry of view.recent_activity) {
        const row = document.createElement("tr");
        for (const text of [entry.timestamp, entry.user, entry.action]) {
            const cell = document.createElement("td");
            cell.textContent = text;
            row.appendChild(cell);
        }
        $("activity").appendChild(row);
    }
}

function showDashboard() {
    $("login").classList.add("hidden");
    $("dashboard").classList.remove("hidden");
    clearTimeout(timer);
    // EventSource cannot send headers; poll the JSON view instead.
    const tick = async () => {
        try { render(await api("GET", "/api/dashboard")); } catch (e) { showLogin(); return; }
        timer = setTimeout(tick, 3000);
    };
    tick();
}

function showLogin() {
    clearTimeout(timer);
    $("dashboard").classList.add("hidden");
    $("login").classList.remove("hidden");
}

async function mutate(method, path, body) {
    $("command-error").textContent = "";
    try {
        const result = await api(method, path, body);
        render(result.view);
    } catch (e) {
        $("command-error").textContent = e.message;
    }
}

$("login-form").addEventListener("submit", async (ev) => {
    ev.preventDefault();
    $("login-error").textContent = "";
    try {
        const res = await api("POST", "/api/login", { username: $("username").value, password: $("password").value });
        token = res.session_id;
        sessionStorage.setItem("session", token);
        showDashboard();
    } catch (e) {
        $("login-error").textContent = e.message;
    }
});

$("logout").addEventListener("click", async () => {
    try { await api("POST", "/api/logout"); } catch (e) {}
    token = null;
    sessionStorage.removeItem("session");
    showLogin();
});

for (const button of document.querySelectorAll("[data-cmd]")) {
    button.addEventListener("click", () => mutate("POST", "/api/commands", { command: button.dataset.cmd }));
}
$("auto-mode").addEventListener("change", (ev) => mutate("PUT", "/api/auto-mode", { enabled: ev.target.checked }));
$("save-schedule").addEventListener("click", () => {
    const schedule = $("schedule").value.split("\n").map((l) => l.trim()).filter(Boolean).map((l) => {
        const [start_time, target] = l.split(/\s+/);
        return { start_time, target: Number(target) };
    });
    mutate("PUT", "/api/schedule", { schedule });
});

if (token) {
    api("GET", "/api/session").then((s) => s.phase === "dashboard" ? showDashboard() : showLogin()).catch(showLogin);
}
</script>
</body>
</html>
"##;
